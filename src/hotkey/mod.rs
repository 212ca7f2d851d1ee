//! Hotkey module for global keyboard interception
//!
//! Uses a macOS CGEventTap to intercept key events for the sequence
//! matcher, and posts tagged synthetic events for keyboard commands.

pub mod keys;
mod listener;
mod synth;

pub use keys::{KeyEventKind, RawKeyEvent, ResolveError};
pub use listener::{HotkeyError, HotkeyListener};
pub use synth::{KeystrokeSynthesizer, SYNTHETIC_EVENT_TAG};
