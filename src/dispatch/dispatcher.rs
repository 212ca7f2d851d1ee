//! Workflow command dispatcher
//!
//! Receives matched workflows from the sequence matcher and runs their
//! enabled commands on spawned tasks, so the event tap thread never waits
//! on a command.
//!
//! - Serial: strictly in order; the first failure abandons the rest of the
//!   run; a newer serial run cancels an older one at its next command
//!   boundary.
//! - Concurrent: every command on its own task; failures are isolated.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EngineEvent;
use crate::workflow::{Command, Execution, Workflow};

use super::executor::{execute, CommandExecutor, DispatchError};

/// A matched workflow handed over by the matcher or engine
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub workflow: Arc<Workflow>,
}

impl DispatchRequest {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self { workflow }
    }
}

/// Outcome of one workflow run
#[derive(Debug, Default)]
pub struct RunReport {
    pub workflow_id: String,
    /// Ids of commands that completed, in completion order
    pub completed: Vec<String>,
    pub failures: Vec<DispatchError>,
    /// Serial run stopped early by a newer run
    pub cancelled: bool,
}

impl RunReport {
    fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            ..Default::default()
        }
    }
}

pub struct Dispatcher {
    executor: Arc<dyn CommandExecutor>,
    event_tx: broadcast::Sender<EngineEvent>,
    /// Cancellation handle of the most recent serial run
    serial_run: Option<CancellationToken>,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            executor,
            event_tx,
            serial_run: None,
        }
    }

    /// Dispatch requests until every sender is dropped
    pub async fn run(mut self, mut dispatch_rx: mpsc::UnboundedReceiver<DispatchRequest>) {
        info!("dispatcher started");

        while let Some(request) = dispatch_rx.recv().await {
            // Fire and forget; the run reports through events and logs
            drop(self.dispatch(request.workflow));
        }

        info!("dispatcher stopped");
    }

    /// Start running a workflow's enabled commands
    pub fn dispatch(&mut self, workflow: Arc<Workflow>) -> JoinHandle<RunReport> {
        let commands: Vec<Command> = workflow.enabled_commands().cloned().collect();
        debug!(
            workflow = %workflow.id,
            commands = commands.len(),
            execution = ?workflow.execution,
            "dispatching workflow"
        );

        let executor = Arc::clone(&self.executor);
        let event_tx = self.event_tx.clone();

        match workflow.execution {
            Execution::Serial => {
                if let Some(previous) = self.serial_run.take() {
                    previous.cancel();
                }
                let token = CancellationToken::new();
                self.serial_run = Some(token.clone());
                tokio::spawn(run_serial(executor, workflow, commands, token, event_tx))
            }
            Execution::Concurrent => {
                tokio::spawn(run_concurrent(executor, workflow, commands, event_tx))
            }
        }
    }
}

async fn run_serial(
    executor: Arc<dyn CommandExecutor>,
    workflow: Arc<Workflow>,
    commands: Vec<Command>,
    token: CancellationToken,
    event_tx: broadcast::Sender<EngineEvent>,
) -> RunReport {
    let mut report = RunReport::new(&workflow.id);

    for command in commands {
        if token.is_cancelled() {
            info!(workflow = %workflow.id, "serial run superseded by a newer trigger");
            let _ = event_tx.send(EngineEvent::RunCancelled {
                workflow_id: workflow.id.clone(),
            });
            report.cancelled = true;
            break;
        }

        announce(&event_tx, &workflow, &command);
        match execute(executor.as_ref(), &command).await {
            Ok(()) => report.completed.push(command.meta.id),
            Err(source) => {
                let error = DispatchError {
                    workflow_id: workflow.id.clone(),
                    command_id: command.meta.id,
                    source,
                };
                warn!(%error, "serial run aborted");
                report_failure(&event_tx, &error);
                report.failures.push(error);
                break;
            }
        }
    }

    report
}

async fn run_concurrent(
    executor: Arc<dyn CommandExecutor>,
    workflow: Arc<Workflow>,
    commands: Vec<Command>,
    event_tx: broadcast::Sender<EngineEvent>,
) -> RunReport {
    let mut report = RunReport::new(&workflow.id);
    let mut tasks = JoinSet::new();

    for command in commands {
        announce(&event_tx, &workflow, &command);
        let executor = Arc::clone(&executor);
        tasks.spawn(async move {
            let result = execute(executor.as_ref(), &command).await;
            (command.meta.id, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((command_id, Ok(()))) => report.completed.push(command_id),
            Ok((command_id, Err(source))) => {
                let error = DispatchError {
                    workflow_id: workflow.id.clone(),
                    command_id,
                    source,
                };
                warn!(%error, "command failed");
                report_failure(&event_tx, &error);
                report.failures.push(error);
            }
            Err(error) => {
                warn!(workflow = %workflow.id, %error, "command task panicked");
            }
        }
    }

    report
}

fn announce(event_tx: &broadcast::Sender<EngineEvent>, workflow: &Workflow, command: &Command) {
    debug!(
        workflow = %workflow.id,
        command = %command.meta.id,
        kind = command.kind.label(),
        "running command"
    );
    if command.meta.notification {
        let _ = event_tx.send(EngineEvent::CommandStarted {
            workflow_id: workflow.id.clone(),
            command_id: command.meta.id.clone(),
            name: command.meta.name.clone(),
        });
    }
}

fn report_failure(event_tx: &broadcast::Sender<EngineEvent>, error: &DispatchError) {
    let _ = event_tx.send(EngineEvent::CommandFailed {
        workflow_id: error.workflow_id.clone(),
        command_id: error.command_id.clone(),
        message: error.source.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::dispatch::ExecutorError;
    use crate::workflow::{CommandKind, CommandMeta, OpenCommand};

    /// Opens succeed except for targets named "fail"; "slow" takes 50ms
    #[derive(Default)]
    struct RecordingExecutor {
        opened: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn open(&self, command: &OpenCommand) -> Result<(), ExecutorError> {
            self.opened.lock().unwrap().push(command.target.clone());
            match command.target.as_str() {
                "fail" => Err(ExecutorError::Failed("no such target".to_string())),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn open(target: &str) -> Command {
        Command::new(
            CommandMeta::new(target, target),
            CommandKind::Open(OpenCommand {
                target: target.to_string(),
                application: None,
            }),
        )
    }

    fn workflow(id: &str, execution: Execution, commands: Vec<Command>) -> Arc<Workflow> {
        let mut workflow = Workflow::new(id, id).with_execution(execution);
        workflow.commands = commands;
        Arc::new(workflow)
    }

    fn setup() -> (Dispatcher, Arc<RecordingExecutor>, broadcast::Receiver<EngineEvent>) {
        let executor = Arc::new(RecordingExecutor::default());
        let (event_tx, event_rx) = broadcast::channel(64);
        let dispatcher = Dispatcher::new(executor.clone(), event_tx);
        (dispatcher, executor, event_rx)
    }

    #[tokio::test]
    async fn test_serial_runs_enabled_commands_in_order() {
        let (mut dispatcher, executor, _) = setup();
        let mut disabled = open("b");
        disabled.meta.is_enabled = false;

        let report = tokio_test::assert_ok!(
            dispatcher
                .dispatch(workflow("w", Execution::Serial, vec![open("a"), disabled, open("c")]))
                .await
        );

        assert_eq!(report.completed, vec!["a", "c"]);
        assert_eq!(executor.opened(), vec!["a", "c"]);
        assert!(report.failures.is_empty());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_serial_failure_abandons_remaining_commands() {
        let (mut dispatcher, executor, mut event_rx) = setup();

        let commands = vec![open("a"), open("fail"), open("c")];
        let report = tokio_test::assert_ok!(
            dispatcher
                .dispatch(workflow("w", Execution::Serial, commands))
                .await
        );

        assert_eq!(report.completed, vec!["a"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].command_id, "fail");
        assert_eq!(report.failures[0].workflow_id, "w");
        assert_eq!(executor.opened(), vec!["a", "fail"]);

        let event = event_rx.try_recv().unwrap();
        assert!(matches!(
            event,
            EngineEvent::CommandFailed { ref command_id, .. } if command_id == "fail"
        ));
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_isolated() {
        let (mut dispatcher, executor, _) = setup();

        let report = tokio_test::assert_ok!(
            dispatcher
                .dispatch(workflow(
                    "w",
                    Execution::Concurrent,
                    vec![open("a"), open("fail"), open("slow")]
                ))
                .await
        );

        let mut completed = report.completed.clone();
        completed.sort();
        assert_eq!(completed, vec!["a", "slow"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(executor.opened().len(), 3);
    }

    #[tokio::test]
    async fn test_new_serial_run_cancels_previous() {
        let (mut dispatcher, executor, _) = setup();

        let first = dispatcher.dispatch(workflow(
            "first",
            Execution::Serial,
            vec![open("slow"), open("never")],
        ));
        let second = dispatcher.dispatch(workflow("second", Execution::Serial, vec![open("b")]));

        let first = tokio_test::assert_ok!(first.await);
        let second = tokio_test::assert_ok!(second.await);

        assert!(first.cancelled);
        assert!(!executor.opened().contains(&"never".to_string()));
        assert_eq!(second.completed, vec!["b"]);
        assert!(!second.cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_run_does_not_cancel_serial() {
        let (mut dispatcher, _, _) = setup();

        let serial =
            dispatcher.dispatch(workflow("s", Execution::Serial, vec![open("a"), open("b")]));
        let concurrent = dispatcher.dispatch(workflow("c", Execution::Concurrent, vec![open("x")]));

        let serial = tokio_test::assert_ok!(serial.await);
        tokio_test::assert_ok!(concurrent.await);
        assert!(!serial.cancelled);
        assert_eq!(serial.completed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_notification_flag_announces_command() {
        let (mut dispatcher, _, mut event_rx) = setup();
        let mut command = open("a");
        command.meta.notification = true;

        tokio_test::assert_ok!(
            dispatcher
                .dispatch(workflow("w", Execution::Serial, vec![command]))
                .await
        );

        let event = event_rx.try_recv().unwrap();
        assert!(matches!(
            event,
            EngineEvent::CommandStarted { ref command_id, .. } if command_id == "a"
        ));
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (dispatcher, executor, _) = setup();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        dispatch_tx
            .send(DispatchRequest::new(workflow("w", Execution::Serial, vec![open("a")])))
            .unwrap();
        drop(dispatch_tx);
        dispatcher.run(dispatch_rx).await;

        // The spawned run may still be in flight after the loop exits
        for _ in 0..50 {
            if !executor.opened().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(executor.opened(), vec!["a"]);
    }
}
