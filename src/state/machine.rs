//! Sequence matcher state machine
//!
//! Consumes one classified key event at a time, accumulates chords, asks
//! the resolver what the sequence means and decides whether the event is
//! consumed or passed through. Runs synchronously inside the event tap
//! callback, so nothing here blocks: matches are handed to the dispatcher
//! over an unbounded channel and the reset deadline is published to the
//! engine task, which owns the actual timer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Weekday;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::dispatch::DispatchRequest;
use crate::events::{EngineEvent, RecordingSignal};
use crate::hotkey::keys::{self, code, KeyEventKind, RawKeyEvent};
use crate::workflow::{KeyShortcut, MatchResult, Modifier, Workflow};

use super::{Mode, Snapshot};

/// Idle interval after which an unfinished sequence is abandoned
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(1);

/// Combinations the system owns; never offered as recordable shortcuts
const SYSTEM_RESERVED: &[(&str, &[Modifier])] = &[
    ("Tab", &[Modifier::Command]),
    ("Tab", &[Modifier::Command, Modifier::Shift]),
    ("Space", &[Modifier::Command]),
    ("Space", &[Modifier::Control]),
    ("Escape", &[Modifier::Option, Modifier::Command]),
    ("Q", &[Modifier::Control, Modifier::Command]),
];

/// Fate of the event that was just handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the event from the system stream
    Consume,
    /// Deliver the event unmodified
    Pass,
}

/// Observable matcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherState {
    /// No chords accumulated
    Idle,
    /// One or more chords accumulated, candidates remain
    Accumulating,
    /// Final chord of a hold trigger is down, waiting for the hold to elapse
    Holding,
}

impl std::fmt::Display for MatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatcherState::Idle => write!(f, "Idle"),
            MatcherState::Accumulating => write!(f, "Accumulating"),
            MatcherState::Holding => write!(f, "Holding"),
        }
    }
}

#[derive(Debug)]
struct PendingHold {
    workflow: Arc<Workflow>,
    key_code: u16,
}

/// Suppresses auto-repeat of a key that just fired until its key-up
#[derive(Debug, Clone, Copy)]
struct RepeatGuard {
    key_code: u16,
    disposition: Disposition,
}

pub struct SequenceMatcher {
    mode: Mode,
    snapshot: Arc<Snapshot>,
    /// Chords accumulated since the last reset
    sequence: Vec<KeyShortcut>,
    /// Key code and press time of the chord that last extended `sequence`
    last_chord: Option<(u16, Instant)>,
    hold: Option<PendingHold>,
    repeat_guard: Option<RepeatGuard>,
    /// Key codes whose key-down was consumed; their key-up is consumed too
    suppressed: HashSet<u16>,
    /// Reset (or hold) deadline; `None` when disarmed
    deadline: Option<Instant>,
    reset_interval: Duration,
    dispatch_tx: mpsc::UnboundedSender<DispatchRequest>,
    event_tx: broadcast::Sender<EngineEvent>,
    deadline_tx: watch::Sender<Option<Instant>>,
}

impl SequenceMatcher {
    pub fn new(
        reset_interval: Duration,
        dispatch_tx: mpsc::UnboundedSender<DispatchRequest>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let (deadline_tx, _) = watch::channel(None);
        Self {
            mode: Mode::Intercept,
            snapshot: Arc::new(Snapshot::empty(Weekday::Mon)),
            sequence: Vec::new(),
            last_chord: None,
            hold: None,
            repeat_guard: None,
            suppressed: HashSet::new(),
            deadline: None,
            reset_interval,
            dispatch_tx,
            event_tx,
            deadline_tx,
        }
    }

    /// Watch the armed deadline; the engine task sleeps on it
    pub fn subscribe_deadline(&self) -> watch::Receiver<Option<Instant>> {
        self.deadline_tx.subscribe()
    }

    pub fn state(&self) -> MatcherState {
        if self.hold.is_some() {
            MatcherState::Holding
        } else if self.sequence.is_empty() {
            MatcherState::Idle
        } else {
            MatcherState::Accumulating
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn sequence(&self) -> &[KeyShortcut] {
        &self.sequence
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Workflows the current sequence can still complete; the whole active
    /// set when idle
    pub fn session_workflows(&self) -> Vec<Arc<Workflow>> {
        if self.sequence.is_empty() {
            self.snapshot.active_workflows().to_vec()
        } else {
            self.snapshot.resolver().candidates(&self.sequence)
        }
    }

    /// Swap in a freshly built snapshot. Any open sequence refers to the old
    /// trie and is dropped.
    pub fn install(&mut self, snapshot: Arc<Snapshot>) {
        if self.state() != MatcherState::Idle {
            debug!(state = %self.state(), "discarding open sequence for new snapshot");
        }
        self.hold = None;
        self.reset_sequence();
        self.suppressed.clear();
        self.snapshot = snapshot;
    }

    /// Switch mode. Callers hold the matcher lock, so the change applies
    /// from the next event on and never to one already being handled.
    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        info!(from = %self.mode, to = %mode, "matcher mode changed");
        self.mode = mode;
        self.hold = None;
        self.repeat_guard = None;
        self.reset_sequence();
        // Key-ups seen in another mode never reached `key_up`
        self.suppressed.clear();
        self.emit(EngineEvent::ModeChanged { mode });
    }

    /// Handle one event from the tap
    pub fn handle_event(&mut self, event: &RawKeyEvent) -> Disposition {
        if event.synthetic {
            return Disposition::Pass;
        }

        match self.mode {
            Mode::Disabled => Disposition::Pass,
            Mode::Recording => self.record(event),
            Mode::Intercept => {
                // The timer task may not have run yet; an overdue deadline is
                // applied before the event so it cannot extend a dead sequence.
                if self.deadline.is_some_and(|deadline| event.timestamp >= deadline) {
                    self.expire(event.timestamp);
                }
                match event.kind {
                    KeyEventKind::KeyDown => self.key_down(event),
                    KeyEventKind::KeyUp => self.key_up(event),
                    KeyEventKind::FlagsChanged => Disposition::Pass,
                }
            }
        }
    }

    /// Apply an elapsed deadline. Returns false when the deadline was
    /// already disarmed or moved, which makes an exact-match reset win any
    /// race with the timer.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return false,
        }
        self.disarm();

        if let Some(hold) = self.hold.take() {
            debug!(workflow = %hold.workflow.id, "hold duration reached");
            self.dispatch(hold.workflow);
            self.repeat_guard = Some(RepeatGuard {
                key_code: hold.key_code,
                disposition: Disposition::Consume,
            });
            return true;
        }

        // Final chord, if its key is still down
        let held = self
            .last_chord
            .filter(|(key_code, _)| self.suppressed.contains(key_code));

        if let Some((key_code, pressed_at)) = held {
            if let Some((workflow, duration)) = self.deferred_hold() {
                debug!(workflow = %workflow.id, "sequence settled on a held hold trigger");
                self.reset_sequence();
                self.hold = Some(PendingHold { workflow, key_code });
                self.arm((pressed_at + duration).max(now));
                return true;
            }
        }

        if !self.settle() {
            debug!("sequence timed out");
            self.emit(EngineEvent::SequenceReset);
        }
        if let Some((key_code, _)) = held {
            self.repeat_guard = Some(RepeatGuard {
                key_code,
                disposition: Disposition::Consume,
            });
        }
        true
    }

    fn key_down(&mut self, event: &RawKeyEvent) -> Disposition {
        if let Some(guard) = self.repeat_guard {
            if guard.key_code == event.key_code && event.is_repeat {
                trace!(key_code = event.key_code, "suppressing repeat of fired chord");
                return guard.disposition;
            }
            self.repeat_guard = None;
        }

        if let Some(hold) = &self.hold {
            if hold.key_code == event.key_code {
                return Disposition::Consume;
            }
            debug!(workflow = %hold.workflow.id, "hold interrupted by another key");
            self.hold = None;
            self.disarm();
        }

        // Auto-repeat of the chord that is holding the sequence open
        if event.is_repeat
            && self
                .last_chord
                .is_some_and(|(key_code, _)| key_code == event.key_code)
        {
            return Disposition::Consume;
        }

        let shortcut = match keys::classify(event) {
            Ok(shortcut) => shortcut,
            Err(error) => {
                debug!(%error, "unresolvable key treated as no match");
                self.settle();
                return Disposition::Pass;
            }
        };

        if let Some(disposition) = self.advance(&shortcut, event) {
            return disposition;
        }
        if self.sequence.is_empty() {
            return Disposition::Pass;
        }

        // The chord broke an open sequence: settle it, then give the chord
        // a chance to start a sequence of its own.
        self.settle();
        self.advance(&shortcut, event).unwrap_or(Disposition::Pass)
    }

    fn key_up(&mut self, event: &RawKeyEvent) -> Disposition {
        if self
            .repeat_guard
            .is_some_and(|guard| guard.key_code == event.key_code)
        {
            self.repeat_guard = None;
        }

        if self
            .hold
            .as_ref()
            .is_some_and(|hold| hold.key_code == event.key_code)
        {
            debug!("hold released early");
            self.hold = None;
            self.disarm();
        }

        if self.suppressed.remove(&event.key_code) {
            Disposition::Consume
        } else {
            Disposition::Pass
        }
    }

    /// Extend the sequence with `shortcut`. Returns `None`, with the
    /// sequence left as it was, when nothing extends it.
    fn advance(&mut self, shortcut: &KeyShortcut, event: &RawKeyEvent) -> Option<Disposition> {
        self.sequence.push(shortcut.clone());
        match self.snapshot.resolver().resolve(&self.sequence) {
            MatchResult::Exact(workflow) => Some(self.fire(workflow, event)),
            MatchResult::Partial { progress, .. } => {
                self.suppressed.insert(event.key_code);
                self.last_chord = Some((event.key_code, event.timestamp));
                self.arm(event.timestamp + self.reset_interval);
                trace!(%progress, "sequence accumulating");
                self.emit(EngineEvent::SequenceProgress { progress });
                Some(Disposition::Consume)
            }
            MatchResult::None => {
                self.sequence.pop();
                None
            }
        }
    }

    fn fire(&mut self, workflow: Arc<Workflow>, event: &RawKeyEvent) -> Disposition {
        self.sequence.clear();
        self.last_chord = None;

        if let Some(duration) = workflow.hold_duration() {
            self.suppressed.insert(event.key_code);
            self.hold = Some(PendingHold {
                workflow,
                key_code: event.key_code,
            });
            self.arm(event.timestamp + duration);
            return Disposition::Consume;
        }

        let disposition = if workflow.passthrough() {
            Disposition::Pass
        } else {
            self.suppressed.insert(event.key_code);
            Disposition::Consume
        };

        self.disarm();
        self.dispatch(workflow);
        self.repeat_guard = Some(RepeatGuard {
            key_code: event.key_code,
            disposition,
        });
        disposition
    }

    /// Deferred exact match of the open sequence when it is a hold trigger
    fn deferred_hold(&self) -> Option<(Arc<Workflow>, Duration)> {
        match self.snapshot.resolver().resolve(&self.sequence) {
            MatchResult::Partial { exact: Some(workflow), .. } => {
                let duration = workflow.hold_duration()?;
                Some((workflow, duration))
            }
            _ => None,
        }
    }

    /// Close the open sequence: a deferred exact match fires, anything else
    /// is dropped. A deferred hold trigger never fires from here; `expire`
    /// starts its hold instead when the key is still down. Returns whether a
    /// workflow fired.
    fn settle(&mut self) -> bool {
        let pending = match self.snapshot.resolver().resolve(&self.sequence) {
            MatchResult::Partial { exact: Some(workflow), .. }
                if workflow.hold_duration().is_none() =>
            {
                Some(workflow)
            }
            _ => None,
        };
        self.reset_sequence();

        match pending {
            Some(workflow) => {
                self.dispatch(workflow);
                true
            }
            None => false,
        }
    }

    fn record(&mut self, event: &RawKeyEvent) -> Disposition {
        match event.kind {
            KeyEventKind::FlagsChanged => Disposition::Pass,
            KeyEventKind::KeyUp => Disposition::Consume,
            KeyEventKind::KeyDown => {
                if event.is_repeat {
                    return Disposition::Consume;
                }
                match keys::classify(event) {
                    Ok(shortcut) => {
                        let signal = recording_signal(event.key_code, shortcut);
                        debug!(?signal, "recorded key");
                        self.emit(EngineEvent::Recording(signal));
                    }
                    Err(error) => debug!(%error, "unrecordable key"),
                }
                Disposition::Consume
            }
        }
    }

    fn dispatch(&self, workflow: Arc<Workflow>) {
        info!(workflow = %workflow.id, name = %workflow.name, "workflow fired");
        self.emit(EngineEvent::WorkflowFired {
            workflow_id: workflow.id.clone(),
            name: workflow.name.clone(),
        });
        if self.dispatch_tx.send(DispatchRequest::new(workflow)).is_err() {
            warn!("dispatcher is gone, workflow dropped");
        }
    }

    fn reset_sequence(&mut self) {
        self.sequence.clear();
        self.last_chord = None;
        self.disarm();
    }

    fn arm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
        self.deadline_tx.send_replace(Some(deadline));
    }

    fn disarm(&mut self) {
        if self.deadline.take().is_some() {
            self.deadline_tx.send_replace(None);
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn recording_signal(key_code: u16, shortcut: KeyShortcut) -> RecordingSignal {
    if shortcut.modifiers().is_empty() {
        match key_code {
            code::ESCAPE | code::RETURN => return RecordingSignal::Cancelled,
            code::DELETE | code::FORWARD_DELETE => return RecordingSignal::Deleted,
            _ => {}
        }
    }

    let reserved = SYSTEM_RESERVED.iter().any(|(key, modifiers)| {
        shortcut.key() == *key
            && shortcut.modifiers().len() == modifiers.len()
            && modifiers.iter().all(|m| shortcut.has_modifier(*m))
    });
    if reserved {
        RecordingSignal::Reserved { shortcut }
    } else {
        RecordingSignal::Recorded { shortcut }
    }
}
