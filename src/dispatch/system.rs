//! Default executor set
//!
//! Keyboard commands go through the keystroke synthesizer; the rest shell
//! out to the stock macOS tools (`open`, `osascript`, `shortcuts`) or `sh`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as Process;
use tracing::debug;

use crate::hotkey::KeystrokeSynthesizer;
use crate::workflow::{
    ApplicationAction, ApplicationCommand, KeyboardCommand, OpenCommand, ScriptCommand,
    ScriptLanguage, ScriptSource, ShortcutCommand, TextCommand,
};

use super::executor::{CommandExecutor, ExecutorError};

/// Gap between replayed chords so the target application keeps up
const KEYSTROKE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct SystemExecutor {
    synthesizer: KeystrokeSynthesizer,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self {
            synthesizer: KeystrokeSynthesizer::new(),
        }
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn application(&self, command: &ApplicationCommand) -> Result<(), ExecutorError> {
        let bundle = &command.bundle_identifier;
        match command.action {
            ApplicationAction::Open => match &command.path {
                Some(path) => run("open", ["-a", path.as_str()]).await,
                None => run("open", ["-b", bundle.as_str()]).await,
            },
            ApplicationAction::Close => {
                let script = format!("tell application id {} to quit", applescript_string(bundle));
                run("osascript", ["-e", script.as_str()]).await
            }
            ApplicationAction::Hide | ApplicationAction::Unhide => {
                let visible = command.action == ApplicationAction::Unhide;
                let script = format!(
                    "tell application \"System Events\" to set visible of \
                     (first process whose bundle identifier is {}) to {}",
                    applescript_string(bundle),
                    visible
                );
                run("osascript", ["-e", script.as_str()]).await
            }
        }
    }

    async fn keyboard(&self, command: &KeyboardCommand) -> Result<(), ExecutorError> {
        for _ in 0..command.iterations {
            for shortcut in &command.keys {
                self.synthesizer
                    .post_shortcut(shortcut)
                    .map_err(|e| ExecutorError::Synthesis(e.to_string()))?;
                tokio::time::sleep(KEYSTROKE_INTERVAL).await;
            }
        }
        Ok(())
    }

    async fn open(&self, command: &OpenCommand) -> Result<(), ExecutorError> {
        let mut args = Vec::with_capacity(3);
        if let Some(application) = &command.application {
            args.push("-b");
            args.push(application.as_str());
        }
        args.push(command.target.as_str());
        run("open", args).await
    }

    async fn script(&self, command: &ScriptCommand) -> Result<(), ExecutorError> {
        match (command.language, &command.source) {
            (ScriptLanguage::Shell, ScriptSource::Inline { contents }) => {
                run("sh", ["-c", contents.as_str()]).await
            }
            (ScriptLanguage::Shell, ScriptSource::Path { path }) => {
                run("sh", [path.as_str()]).await
            }
            (ScriptLanguage::AppleScript, ScriptSource::Inline { contents }) => {
                run("osascript", ["-e", contents.as_str()]).await
            }
            (ScriptLanguage::AppleScript, ScriptSource::Path { path }) => {
                run("osascript", [path.as_str()]).await
            }
        }
    }

    async fn shortcut(&self, command: &ShortcutCommand) -> Result<(), ExecutorError> {
        run("shortcuts", ["run", command.shortcut_identifier.as_str()]).await
    }

    async fn text(&self, command: &TextCommand) -> Result<(), ExecutorError> {
        let script = format!(
            "tell application \"System Events\" to keystroke {}",
            applescript_string(&command.text)
        );
        run("osascript", ["-e", script.as_str()]).await
    }
}

/// Run a program to completion; non-zero exit is an error carrying stderr
async fn run<'a>(
    program: &str,
    args: impl IntoIterator<Item = &'a str>,
) -> Result<(), ExecutorError> {
    let args: Vec<&str> = args.into_iter().collect();
    debug!(program, ?args, "spawning");

    let output = Process::new(program).args(&args).output().await?;
    if output.status.success() {
        return Ok(());
    }

    Err(ExecutorError::ProcessFailed {
        program: program.to_string(),
        status: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Quote a value as an AppleScript string literal
fn applescript_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{KeyShortcut, Modifier};

    fn shell(contents: &str) -> ScriptCommand {
        ScriptCommand {
            language: ScriptLanguage::Shell,
            source: ScriptSource::Inline {
                contents: contents.to_string(),
            },
        }
    }

    #[test]
    fn test_applescript_string_escapes() {
        assert_eq!(applescript_string("plain"), "\"plain\"");
        assert_eq!(applescript_string(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(applescript_string(r"a\b"), r#""a\\b""#);
    }

    #[tokio::test]
    async fn test_inline_shell_script() {
        let executor = SystemExecutor::new();
        tokio_test::assert_ok!(executor.script(&shell("true")).await);
    }

    #[tokio::test]
    async fn test_failing_script_reports_status_and_stderr() {
        let executor = SystemExecutor::new();
        let error = tokio_test::assert_err!(executor.script(&shell("echo nope >&2; exit 3")).await);
        match error {
            ExecutorError::ProcessFailed {
                program,
                status,
                stderr,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(status, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_shell_script_from_path() {
        let path = std::env::temp_dir().join(format!("keyflow-script-{}.sh", std::process::id()));
        std::fs::write(&path, "exit 0\n").unwrap();

        let executor = SystemExecutor::new();
        let command = ScriptCommand {
            language: ScriptLanguage::Shell,
            source: ScriptSource::Path {
                path: path.to_string_lossy().into_owned(),
            },
        };
        let result = executor.script(&command).await;
        std::fs::remove_file(&path).unwrap();
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_keyboard_with_unknown_key_fails() {
        let executor = SystemExecutor::new();
        let command = KeyboardCommand {
            keys: vec![KeyShortcut::new("NotAKey", [Modifier::Command])],
            iterations: 1,
        };
        let error = tokio_test::assert_err!(executor.keyboard(&command).await);
        assert!(matches!(error, ExecutorError::Synthesis(_)));
    }
}
