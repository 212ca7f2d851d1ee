//! keyflow: global keyboard workflow engine for macOS
//!
//! Intercepts system-wide key events, matches chord sequences against the
//! eligible workflows and dispatches their commands.

pub mod config;
pub mod dispatch;
pub mod events;
pub mod hotkey;
pub mod ipc;
pub mod lifecycle;
pub mod state;
pub mod workflow;
