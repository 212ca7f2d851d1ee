//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::EngineEvent;
use crate::state::Mode;
use crate::workflow::Configuration;

/// Largest accepted message body; bigger frames disconnect the client
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Switch the matcher mode
    SetMode { mode: Mode },

    /// Replace the whole workflow configuration
    ReplaceConfiguration { configuration: Configuration },

    /// An application became frontmost
    ApplicationActivated { bundle_identifier: String },

    ApplicationLaunched { bundle_identifier: String },

    ApplicationTerminated { bundle_identifier: String },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to engine event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Mode switch forwarded to the engine
    ModeChange { mode: Mode },

    /// Configuration forwarded to the engine
    ConfigurationAccepted { workflows: usize },

    /// Application signal forwarded to the engine
    Acknowledged,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Engine event occurred
    Event { event: EngineEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current matcher mode
    pub mode: Mode,

    /// Whether the event tap is installed
    pub interception_active: bool,

    /// Persistent warning shown until interception is restored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,

    /// Keyboard workflows eligible right now
    pub active_workflows: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontmost_application: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: Mode::default(),
            interception_active: false,
            warning: None,
            active_workflows: 0,
            frontmost_application: None,
            uptime_secs: 0,
        }
    }
}

impl DaemonStatus {
    /// Fold an engine event into the status
    pub fn apply_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::InterceptionStarted => {
                self.interception_active = true;
                self.warning = None;
            }
            EngineEvent::InterceptionUnavailable { reason } => {
                self.interception_active = false;
                self.warning = Some(reason.clone());
            }
            EngineEvent::ModeChanged { mode } => self.mode = *mode,
            EngineEvent::SnapshotInstalled {
                active_workflows,
                frontmost_application,
            } => {
                self.active_workflows = *active_workflows;
                self.frontmost_application = frontmost_application.clone();
            }
            _ => {}
        }
    }
}
