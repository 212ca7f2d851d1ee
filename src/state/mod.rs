//! Sequence matching and engine state
//!
//! Provides the sequence matcher state machine with three modes:
//! - Intercept: match chords against workflows, consume what matches
//! - Disabled: pass every event through untouched
//! - Recording: capture every key for the shortcut editor
//!
//! plus the snapshot of eligible workflows it matches against and the
//! engine task that rebuilds that snapshot and drives the reset timer.

mod engine;
mod machine;
mod snapshot;

use serde::{Deserialize, Serialize};

pub use engine::{lock_matcher, Engine, EngineInput, SharedMatcher, WEEKDAY_CHECK_INTERVAL};
pub use machine::{Disposition, MatcherState, SequenceMatcher, DEFAULT_RESET_INTERVAL};
pub use snapshot::Snapshot;

/// Matcher operating mode, switched by external signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Intercept,
    Disabled,
    Recording,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Intercept
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Intercept => write!(f, "intercept"),
            Mode::Disabled => write!(f, "disabled"),
            Mode::Recording => write!(f, "recording"),
        }
    }
}
