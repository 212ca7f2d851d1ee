//! Outbound engine events
//!
//! Published on a broadcast channel for UI collaborators (bezel, menu bar,
//! IPC subscribers). Sending never blocks and nobody awaits delivery.

use serde::{Deserialize, Serialize};

use crate::state::Mode;
use crate::workflow::KeyShortcut;

/// What the recorder made of a key press while in recording mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RecordingSignal {
    /// A recordable chord
    Recorded { shortcut: KeyShortcut },
    /// Combination owned by the system; not recordable
    Reserved { shortcut: KeyShortcut },
    /// Escape or Return: abandon recording
    Cancelled,
    /// Delete: clear the shortcut being edited
    Deleted,
}

/// Events emitted by the engine, matcher and dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Event tap installed
    InterceptionStarted,

    /// Event tap could not be installed; persists until resolved
    InterceptionUnavailable { reason: String },

    /// Matcher mode switched
    ModeChanged { mode: Mode },

    /// New eligible workflow set swapped in
    SnapshotInstalled {
        active_workflows: usize,
        frontmost_application: Option<String>,
    },

    /// A chord was intercepted and the sequence is still open
    SequenceProgress { progress: String },

    /// An open sequence was abandoned by the reset timer
    SequenceReset,

    /// A workflow matched and was handed to the dispatcher
    WorkflowFired { workflow_id: String, name: String },

    /// A command flagged for notification started running
    CommandStarted {
        workflow_id: String,
        command_id: String,
        name: String,
    },

    /// A command failed
    CommandFailed {
        workflow_id: String,
        command_id: String,
        message: String,
    },

    /// A serial run was cancelled by a newer one
    RunCancelled { workflow_id: String },

    /// Key captured in recording mode
    Recording(RecordingSignal),
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::InterceptionStarted => write!(f, "INTERCEPTION_STARTED"),
            EngineEvent::InterceptionUnavailable { reason } => {
                write!(f, "INTERCEPTION_UNAVAILABLE ({})", reason)
            }
            EngineEvent::ModeChanged { mode } => write!(f, "MODE_CHANGED ({})", mode),
            EngineEvent::SnapshotInstalled { active_workflows, .. } => {
                write!(f, "SNAPSHOT_INSTALLED ({} workflows)", active_workflows)
            }
            EngineEvent::SequenceProgress { progress } => {
                write!(f, "SEQUENCE_PROGRESS ({})", progress)
            }
            EngineEvent::SequenceReset => write!(f, "SEQUENCE_RESET"),
            EngineEvent::WorkflowFired { workflow_id, .. } => {
                write!(f, "WORKFLOW_FIRED ({})", workflow_id)
            }
            EngineEvent::CommandStarted { command_id, .. } => {
                write!(f, "COMMAND_STARTED ({})", command_id)
            }
            EngineEvent::CommandFailed { command_id, message, .. } => {
                write!(f, "COMMAND_FAILED ({}: {})", command_id, message)
            }
            EngineEvent::RunCancelled { workflow_id } => {
                write!(f, "RUN_CANCELLED ({})", workflow_id)
            }
            EngineEvent::Recording(signal) => write!(f, "RECORDING ({:?})", signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::WorkflowFired {
            workflow_id: "w1".to_string(),
            name: "Open example".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("workflow_fired"));
        assert!(json.contains("w1"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"sequence_reset"}"#;
        let event: EngineEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, EngineEvent::SequenceReset));
    }

    #[test]
    fn test_recording_signal_nests_under_event() {
        let event = EngineEvent::Recording(RecordingSignal::Recorded {
            shortcut: "cmd+k".parse().unwrap(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"recording""#));
        assert!(json.contains(r#""signal":"recorded""#));
    }

    #[test]
    fn test_display() {
        let event = EngineEvent::ModeChanged { mode: Mode::Recording };
        assert_eq!(event.to_string(), "MODE_CHANGED (recording)");
    }
}
