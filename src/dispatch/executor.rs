//! Command executor seam
//!
//! One async entry point per command kind. The dispatcher treats every
//! implementation opaquely; each entry point either completes or fails with
//! an `ExecutorError`.

use async_trait::async_trait;
use thiserror::Error;

use crate::workflow::{
    ApplicationCommand, Command, CommandKind, KeyboardCommand, OpenCommand, ScriptCommand,
    ShortcutCommand, SystemCommand, TextCommand, UiElementCommand, WindowCommand,
};

/// Errors a command executor can report
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0} commands are not supported by this executor")]
    Unsupported(&'static str),

    #[error("{program} exited with status {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("keystroke synthesis failed: {0}")]
    Synthesis(String),

    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command failure, tagged with where it came from
#[derive(Debug, Error)]
#[error("command {command_id} of workflow {workflow_id} failed: {source}")]
pub struct DispatchError {
    pub workflow_id: String,
    pub command_id: String,
    #[source]
    pub source: ExecutorError,
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn application(&self, command: &ApplicationCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("application"))
    }

    async fn keyboard(&self, command: &KeyboardCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("keyboard"))
    }

    async fn open(&self, command: &OpenCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("open"))
    }

    async fn script(&self, command: &ScriptCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("script"))
    }

    async fn shortcut(&self, command: &ShortcutCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("shortcut"))
    }

    async fn text(&self, command: &TextCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("text"))
    }

    async fn system(&self, command: &SystemCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("system"))
    }

    async fn window(&self, command: &WindowCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("window"))
    }

    async fn ui_element(&self, command: &UiElementCommand) -> Result<(), ExecutorError> {
        let _ = command;
        Err(ExecutorError::Unsupported("ui_element"))
    }
}

/// Route a command to its executor entry point, honoring its delay
pub async fn execute(
    executor: &dyn CommandExecutor,
    command: &Command,
) -> Result<(), ExecutorError> {
    if let Some(delay) = command.meta.delay() {
        tokio::time::sleep(delay).await;
    }

    match &command.kind {
        CommandKind::Application(c) => executor.application(c).await,
        CommandKind::Keyboard(c) => executor.keyboard(c).await,
        CommandKind::Open(c) => executor.open(c).await,
        CommandKind::Script(c) => executor.script(c).await,
        CommandKind::Shortcut(c) => executor.shortcut(c).await,
        CommandKind::Text(c) => executor.text(c).await,
        CommandKind::System(c) => executor.system(c).await,
        CommandKind::Window(c) => executor.window(c).await,
        CommandKind::UiElement(c) => executor.ui_element(c).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{CommandMeta, SystemAction};

    struct OpenOnly;

    #[async_trait]
    impl CommandExecutor for OpenOnly {
        async fn open(&self, _command: &OpenCommand) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_execute_routes_by_kind() {
        let open = Command::new(
            CommandMeta::new("c1", "open"),
            CommandKind::Open(OpenCommand {
                target: "/tmp".to_string(),
                application: None,
            }),
        );
        tokio_test::assert_ok!(execute(&OpenOnly, &open).await);

        let system = Command::new(
            CommandMeta::new("c2", "desktop"),
            CommandKind::System(SystemCommand {
                action: SystemAction::ShowDesktop,
            }),
        );
        let error = tokio_test::assert_err!(execute(&OpenOnly, &system).await);
        assert!(matches!(error, ExecutorError::Unsupported("system")));
    }

    #[test]
    fn test_dispatch_error_display() {
        let error = DispatchError {
            workflow_id: "w1".to_string(),
            command_id: "c1".to_string(),
            source: ExecutorError::Failed("boom".to_string()),
        };
        assert_eq!(error.to_string(), "command c1 of workflow w1 failed: boom");
    }
}
