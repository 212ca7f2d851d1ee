//! Workflow configuration tree
//!
//! `Configuration` -> `WorkflowGroup` -> `Workflow` -> `Command`. The tree is
//! delivered whole by the configuration collaborator and never mutated by
//! the engine.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Command, KeyShortcut, Rule};

/// Application lifecycle moments that can trigger a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationContext {
    Launched,
    Closed,
    Frontmost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationTrigger {
    pub bundle_identifier: String,
    pub contexts: BTreeSet<ApplicationContext>,
}

impl ApplicationTrigger {
    pub fn matches(&self, bundle_identifier: &str, context: ApplicationContext) -> bool {
        self.bundle_identifier == bundle_identifier && self.contexts.contains(&context)
    }
}

/// What activates a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    KeyboardShortcuts {
        shortcuts: Vec<KeyShortcut>,
        /// Let the firing key event through to the frontmost application
        #[serde(default)]
        passthrough: bool,
        /// Fire only after the final chord has been held this long
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hold_duration_ms: Option<u64>,
    },
    Application {
        triggers: Vec<ApplicationTrigger>,
    },
}

/// How a workflow's commands are run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Execution {
    /// In order, abort on failure, cancelled by the next serial run
    Serial,
    /// All at once, failures isolated
    #[default]
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub execution: Execution,
}

fn default_enabled() -> bool {
    true
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_enabled: true,
            trigger: None,
            commands: Vec::new(),
            execution: Execution::default(),
        }
    }

    pub fn with_shortcuts(mut self, shortcuts: Vec<KeyShortcut>) -> Self {
        self.trigger = Some(Trigger::KeyboardShortcuts {
            shortcuts,
            passthrough: false,
            hold_duration_ms: None,
        });
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Chord sequence of a keyboard trigger; empty for any other trigger
    pub fn shortcuts(&self) -> &[KeyShortcut] {
        match &self.trigger {
            Some(Trigger::KeyboardShortcuts { shortcuts, .. }) => shortcuts,
            _ => &[],
        }
    }

    pub fn passthrough(&self) -> bool {
        matches!(
            self.trigger,
            Some(Trigger::KeyboardShortcuts { passthrough: true, .. })
        )
    }

    pub fn hold_duration(&self) -> Option<Duration> {
        match &self.trigger {
            Some(Trigger::KeyboardShortcuts { hold_duration_ms, .. }) => {
                hold_duration_ms.map(Duration::from_millis)
            }
            _ => None,
        }
    }

    pub fn application_triggers(&self) -> &[ApplicationTrigger] {
        match &self.trigger {
            Some(Trigger::Application { triggers }) => triggers,
            _ => &[],
        }
    }

    /// Enabled commands in their configured order
    pub fn enabled_commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(|command| command.is_enabled())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
}

impl WorkflowGroup {
    pub fn new(id: impl Into<String>, workflows: Vec<Workflow>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            workflows,
            rule: None,
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }
}

/// Full configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub groups: Vec<WorkflowGroup>,
}

impl Configuration {
    pub fn new(groups: Vec<WorkflowGroup>) -> Self {
        Self { groups }
    }

    /// Read a snapshot file; a missing file is not an error
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let configuration = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(configuration))
    }

    pub fn workflow_count(&self) -> usize {
        self.groups.iter().map(|group| group.workflows.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{CommandKind, CommandMeta, OpenCommand};

    fn open_command(id: &str, enabled: bool) -> Command {
        let mut meta = CommandMeta::new(id, id);
        meta.is_enabled = enabled;
        Command::new(
            meta,
            CommandKind::Open(OpenCommand {
                target: "https://example.com".to_string(),
                application: None,
            }),
        )
    }

    #[test]
    fn test_trigger_accessors() {
        let workflow = Workflow::new("w1", "Example").with_trigger(Trigger::KeyboardShortcuts {
            shortcuts: vec!["cmd+k".parse().unwrap()],
            passthrough: true,
            hold_duration_ms: Some(300),
        });
        assert_eq!(workflow.shortcuts().len(), 1);
        assert!(workflow.passthrough());
        assert_eq!(workflow.hold_duration(), Some(Duration::from_millis(300)));
        assert!(workflow.application_triggers().is_empty());
    }

    #[test]
    fn test_enabled_commands_preserve_order() {
        let workflow = Workflow::new("w1", "Example")
            .with_command(open_command("a", true))
            .with_command(open_command("b", false))
            .with_command(open_command("c", true));
        let ids: Vec<_> = workflow.enabled_commands().map(Command::id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_configuration_deserialization() {
        let json = r#"{
            "groups": [{
                "id": "g1",
                "workflows": [{
                    "id": "w1",
                    "name": "Open example",
                    "trigger": {
                        "type": "keyboard_shortcuts",
                        "shortcuts": [
                            {"key": "K", "modifiers": ["command"]},
                            {"key": "M", "modifiers": ["command"]}
                        ]
                    },
                    "execution": "serial",
                    "commands": [
                        {"id": "c1", "kind": "open", "target": "https://example.com"}
                    ]
                }]
            }]
        }"#;
        let configuration: Configuration = serde_json::from_str(json).unwrap();
        assert_eq!(configuration.workflow_count(), 1);
        let workflow = &configuration.groups[0].workflows[0];
        assert_eq!(workflow.execution, Execution::Serial);
        assert_eq!(workflow.shortcuts().len(), 2);
        assert!(!workflow.passthrough());
    }

    #[test]
    fn test_application_trigger_matches() {
        let trigger = ApplicationTrigger {
            bundle_identifier: "com.apple.Safari".to_string(),
            contexts: [ApplicationContext::Launched].into_iter().collect(),
        };
        assert!(trigger.matches("com.apple.Safari", ApplicationContext::Launched));
        assert!(!trigger.matches("com.apple.Safari", ApplicationContext::Closed));
        assert!(!trigger.matches("com.apple.Mail", ApplicationContext::Launched));
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("keyflow-missing-workflows.json");
        assert!(Configuration::load(&path).unwrap().is_none());
    }
}
