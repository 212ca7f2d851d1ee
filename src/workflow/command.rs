//! Command definitions
//!
//! A command is the shared `CommandMeta` plus one `CommandKind` variant.
//! Executors receive the variant payload; the dispatcher reads the meta.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::KeyShortcut;

/// Fields every command carries regardless of kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMeta {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Announce the command on the outbound event stream when it starts
    #[serde(default)]
    pub notification: bool,
    /// Wait this long before running the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl CommandMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_enabled: true,
            notification: false,
            delay_ms: None,
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }
}

/// A single automation step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(flatten)]
    pub meta: CommandMeta,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl Command {
    pub fn new(meta: CommandMeta, kind: CommandKind) -> Self {
        Self { meta, kind }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn is_enabled(&self) -> bool {
        self.meta.is_enabled
    }
}

/// Closed set of command kinds, one per executor entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    Application(ApplicationCommand),
    Keyboard(KeyboardCommand),
    Open(OpenCommand),
    Script(ScriptCommand),
    Shortcut(ShortcutCommand),
    Text(TextCommand),
    System(SystemCommand),
    Window(WindowCommand),
    UiElement(UiElementCommand),
}

impl CommandKind {
    pub fn label(&self) -> &'static str {
        match self {
            CommandKind::Application(_) => "application",
            CommandKind::Keyboard(_) => "keyboard",
            CommandKind::Open(_) => "open",
            CommandKind::Script(_) => "script",
            CommandKind::Shortcut(_) => "shortcut",
            CommandKind::Text(_) => "text",
            CommandKind::System(_) => "system",
            CommandKind::Window(_) => "window",
            CommandKind::UiElement(_) => "ui_element",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationAction {
    #[default]
    Open,
    Close,
    Hide,
    Unhide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCommand {
    pub bundle_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub action: ApplicationAction,
}

/// Replays a sequence of chords as synthetic key events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardCommand {
    pub keys: Vec<KeyShortcut>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenCommand {
    /// File path or URL
    pub target: String,
    /// Bundle identifier of the application to open it with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLanguage {
    Shell,
    AppleScript,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ScriptSource {
    Inline { contents: String },
    Path { path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptCommand {
    pub language: ScriptLanguage,
    #[serde(flatten)]
    pub source: ScriptSource,
}

/// Runs a named shortcut from the system Shortcuts app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutCommand {
    pub shortcut_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCommand {
    pub text: String,
}

/// Known system actions; identifiers this build does not know land in
/// `Unknown` instead of failing the whole configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    ApplicationWindows,
    MinimizeAllOpenWindows,
    MissionControl,
    ShowDesktop,
    ActivateLastApplication,
    MoveFocusToNextWindow,
    MoveFocusToPreviousWindow,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCommand {
    pub action: SystemAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAction {
    Center,
    Fullscreen,
    LeftHalf,
    RightHalf,
    TopHalf,
    BottomHalf,
    MoveToNextDisplay,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCommand {
    pub action: WindowAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElementCommand {
    /// Accessibility predicates identifying the element, executor-defined
    pub predicates: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_deserialization_flattens_meta_and_kind() {
        let json = r#"{
            "id": "c1",
            "name": "Open example",
            "kind": "open",
            "target": "https://example.com"
        }"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(command.id(), "c1");
        assert!(command.is_enabled());
        assert!(matches!(
            command.kind,
            CommandKind::Open(OpenCommand { ref target, .. }) if target == "https://example.com"
        ));
    }

    #[test]
    fn test_unknown_system_action_falls_back() {
        let json = r#"{"id":"c2","kind":"system","action":"summon_dragons"}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(
            command.kind,
            CommandKind::System(SystemCommand { action: SystemAction::Unknown })
        );
    }

    #[test]
    fn test_script_source_serialization() {
        let kind = CommandKind::Script(ScriptCommand {
            language: ScriptLanguage::Shell,
            source: ScriptSource::Inline { contents: "echo hi".to_string() },
        });
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains(r#""kind":"script""#));
        assert!(json.contains(r#""source":"inline""#));
    }

    #[test]
    fn test_keyboard_command_default_iterations() {
        let json = r#"{"id":"c3","kind":"keyboard","keys":[{"key":"v","modifiers":["command"]}]}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        match command.kind {
            CommandKind::Keyboard(keyboard) => {
                assert_eq!(keyboard.iterations, 1);
                assert_eq!(keyboard.keys[0].to_string(), "⌘V");
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
