//! Engine task
//!
//! Owns everything around the matcher that is not on the event path:
//! rebuilding the eligible-workflow snapshot when the configuration, the
//! frontmost application or the weekday changes, firing application
//! triggers, and sleeping on the matcher's reset deadline.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Datelike, Local, Weekday};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::dispatch::DispatchRequest;
use crate::events::EngineEvent;
use crate::workflow::{ApplicationContext, Configuration};

use super::{Mode, SequenceMatcher, Snapshot};

/// Matcher shared between the event tap thread and the engine task
pub type SharedMatcher = Arc<Mutex<SequenceMatcher>>;

/// How often the weekday is re-read for rule evaluation
pub const WEEKDAY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Lock the matcher, recovering from a poisoned lock. A panic mid-event
/// leaves at worst a stale sequence, which the next reset clears.
pub fn lock_matcher(matcher: &SharedMatcher) -> MutexGuard<'_, SequenceMatcher> {
    matcher.lock().unwrap_or_else(|poisoned| {
        warn!("matcher lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Signals delivered to the engine by collaborators
#[derive(Debug)]
pub enum EngineInput {
    ConfigurationReplaced(Configuration),
    FrontmostApplicationChanged(String),
    ApplicationLaunched(String),
    ApplicationTerminated(String),
    SetMode(Mode),
}

type WeekdaySource = Box<dyn Fn() -> Weekday + Send>;

pub struct Engine {
    matcher: SharedMatcher,
    configuration: Configuration,
    frontmost: Option<String>,
    weekday: Weekday,
    weekday_source: WeekdaySource,
    dispatch_tx: mpsc::UnboundedSender<DispatchRequest>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(
        matcher: SharedMatcher,
        dispatch_tx: mpsc::UnboundedSender<DispatchRequest>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            matcher,
            configuration: Configuration::default(),
            frontmost: None,
            weekday: Local::now().weekday(),
            weekday_source: Box::new(|| Local::now().weekday()),
            dispatch_tx,
            event_tx,
        }
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Replace the local-clock weekday, e.g. with a fixed one in tests
    pub fn with_weekday_source(mut self, source: impl Fn() -> Weekday + Send + 'static) -> Self {
        self.weekday = source();
        self.weekday_source = Box::new(source);
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn frontmost(&self) -> Option<&str> {
        self.frontmost.as_deref()
    }

    pub fn handle_input(&mut self, input: EngineInput) {
        match input {
            EngineInput::ConfigurationReplaced(configuration) => {
                info!(
                    groups = configuration.groups.len(),
                    workflows = configuration.workflow_count(),
                    "configuration replaced"
                );
                self.configuration = configuration;
                self.rebuild();
            }
            EngineInput::FrontmostApplicationChanged(bundle_identifier) => {
                if self.frontmost.as_deref() == Some(bundle_identifier.as_str()) {
                    return;
                }
                debug!(application = %bundle_identifier, "frontmost application changed");
                self.frontmost = Some(bundle_identifier.clone());
                self.rebuild();
                self.trigger_application(&bundle_identifier, ApplicationContext::Frontmost);
            }
            EngineInput::ApplicationLaunched(bundle_identifier) => {
                self.trigger_application(&bundle_identifier, ApplicationContext::Launched);
            }
            EngineInput::ApplicationTerminated(bundle_identifier) => {
                self.trigger_application(&bundle_identifier, ApplicationContext::Closed);
            }
            EngineInput::SetMode(mode) => lock_matcher(&self.matcher).set_mode(mode),
        }
    }

    /// Build a fresh snapshot outside the lock and swap it in
    pub fn rebuild(&mut self) {
        let snapshot = Arc::new(Snapshot::build(
            &self.configuration,
            self.frontmost.as_deref(),
            self.weekday,
        ));
        let active_workflows = snapshot.active_workflows().len();

        lock_matcher(&self.matcher).install(snapshot);

        debug!(
            active_workflows,
            frontmost = ?self.frontmost,
            weekday = %self.weekday,
            "snapshot installed"
        );
        let _ = self.event_tx.send(EngineEvent::SnapshotInstalled {
            active_workflows,
            frontmost_application: self.frontmost.clone(),
        });
    }

    /// Re-read the weekday and rebuild when it rolled over. Returns whether
    /// it changed.
    pub fn check_weekday(&mut self) -> bool {
        let weekday = (self.weekday_source)();
        if weekday == self.weekday {
            return false;
        }
        info!(from = %self.weekday, to = %weekday, "weekday rolled over");
        self.weekday = weekday;
        self.rebuild();
        true
    }

    fn trigger_application(&self, bundle_identifier: &str, context: ApplicationContext) {
        let snapshot = Arc::clone(lock_matcher(&self.matcher).snapshot());

        for workflow in snapshot.application_workflows(bundle_identifier, context) {
            info!(
                workflow = %workflow.id,
                application = %bundle_identifier,
                ?context,
                "application trigger matched"
            );
            let _ = self.event_tx.send(EngineEvent::WorkflowFired {
                workflow_id: workflow.id.clone(),
                name: workflow.name.clone(),
            });
            if self.dispatch_tx.send(DispatchRequest::new(workflow)).is_err() {
                warn!("dispatcher is gone, workflow dropped");
            }
        }
    }

    /// Run the engine until the input channel closes
    pub async fn run(mut self, mut input_rx: mpsc::Receiver<EngineInput>) {
        info!("engine started");

        let mut deadline_rx = lock_matcher(&self.matcher).subscribe_deadline();
        let mut weekday_check = tokio::time::interval(WEEKDAY_CHECK_INTERVAL);
        weekday_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        weekday_check.tick().await;

        self.rebuild();

        loop {
            let deadline = *deadline_rx.borrow_and_update();

            tokio::select! {
                input = input_rx.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep_until(deadline) => {
                    let applied = lock_matcher(&self.matcher).expire(Instant::now().into_std());
                    trace!(applied, "deadline elapsed");
                }
                _ = weekday_check.tick() => {
                    self.check_weekday();
                }
            }
        }

        info!("engine stopped");
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
