//! Synthetic keystroke posting
//!
//! Keyboard commands replay chords by posting key events at the HID tap
//! location. Every posted event carries `SYNTHETIC_EVENT_TAG` in its source
//! user data so the listener recognises it and never matches it again.

#[cfg(target_os = "macos")]
use core_graphics::event::{CGEvent, CGEventFlags, CGEventTapLocation, EventField};
#[cfg(target_os = "macos")]
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use tracing::trace;

use crate::workflow::KeyShortcut;

use super::keys;
use super::listener::HotkeyError;

/// Source user data stamped on every event we post ("kflw")
pub const SYNTHETIC_EVENT_TAG: i64 = 0x6b66_6c77;

/// Posts chords as tagged key-down/key-up pairs
#[derive(Debug, Default, Clone, Copy)]
pub struct KeystrokeSynthesizer;

impl KeystrokeSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Post one chord: key down then key up, modifiers set on both
    pub fn post_shortcut(&self, shortcut: &KeyShortcut) -> Result<(), HotkeyError> {
        let key_code = keys::code_for_name(shortcut.key()).ok_or_else(|| {
            HotkeyError::Synthesis(format!("no key code for {}", shortcut.key()))
        })?;
        let flags = keys::flags_for_modifiers(shortcut.modifiers());

        trace!(%shortcut, key_code, "posting synthetic chord");
        post_key(key_code, flags, true)?;
        post_key(key_code, flags, false)
    }
}

#[cfg(target_os = "macos")]
fn post_key(key_code: u16, flags: u64, key_down: bool) -> Result<(), HotkeyError> {
    let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|_| HotkeyError::Synthesis("failed to create event source".to_string()))?;
    let event = CGEvent::new_keyboard_event(source, key_code, key_down)
        .map_err(|_| HotkeyError::Synthesis("failed to create key event".to_string()))?;

    event.set_flags(CGEventFlags::from_bits_truncate(flags));
    event.set_integer_value_field(EventField::EVENT_SOURCE_USER_DATA, SYNTHETIC_EVENT_TAG);
    event.post(CGEventTapLocation::HID);
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn post_key(_key_code: u16, _flags: u64, _key_down: bool) -> Result<(), HotkeyError> {
    Err(HotkeyError::Unsupported)
}
