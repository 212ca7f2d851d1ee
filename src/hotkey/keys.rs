//! Key code definitions and event classification
//!
//! Provides the macOS virtual key code table (ANSI layout), the raw
//! modifier flag masks, and `classify`, which turns a raw key-down into a
//! canonical `KeyShortcut`.

use std::time::Instant;

use thiserror::Error;

use crate::workflow::{KeyShortcut, Modifier, ModifierSide};

/// Modifier flag masks from macOS CGEventFlags, kept as raw bits so
/// classification works without the CoreGraphics types.
pub mod flags {
    /// Caps lock
    pub const ALPHA_SHIFT: u64 = 0x0001_0000;
    /// Shift key modifier flag
    pub const SHIFT: u64 = 0x0002_0000;
    /// Control key modifier flag
    pub const CONTROL: u64 = 0x0004_0000;
    /// Option/Alt key modifier flag
    pub const OPTION: u64 = 0x0008_0000;
    /// Command key modifier flag
    pub const COMMAND: u64 = 0x0010_0000;
    /// Fn key modifier flag
    pub const FUNCTION: u64 = 0x0080_0000;

    /// Device-dependent bits telling left and right modifiers apart
    pub mod device {
        pub const LEFT_CONTROL: u64 = 0x0000_0001;
        pub const LEFT_SHIFT: u64 = 0x0000_0002;
        pub const RIGHT_SHIFT: u64 = 0x0000_0004;
        pub const LEFT_COMMAND: u64 = 0x0000_0008;
        pub const RIGHT_COMMAND: u64 = 0x0000_0010;
        pub const LEFT_OPTION: u64 = 0x0000_0020;
        pub const RIGHT_OPTION: u64 = 0x0000_0040;
        pub const RIGHT_CONTROL: u64 = 0x0000_2000;

        pub const LEFT: u64 = LEFT_CONTROL | LEFT_SHIFT | LEFT_COMMAND | LEFT_OPTION;
        pub const RIGHT: u64 = RIGHT_CONTROL | RIGHT_SHIFT | RIGHT_COMMAND | RIGHT_OPTION;
    }
}

/// Virtual key codes the matcher special-cases
pub mod code {
    pub const RETURN: u16 = 0x24;
    pub const TAB: u16 = 0x30;
    pub const SPACE: u16 = 0x31;
    pub const DELETE: u16 = 0x33;
    pub const ESCAPE: u16 = 0x35;
    pub const FORWARD_DELETE: u16 = 0x75;
}

/// (key code, canonical name, extra accepted spellings)
const KEY_TABLE: &[(u16, &str, &[&str])] = &[
    (0x00, "A", &[]),
    (0x01, "S", &[]),
    (0x02, "D", &[]),
    (0x03, "F", &[]),
    (0x04, "H", &[]),
    (0x05, "G", &[]),
    (0x06, "Z", &[]),
    (0x07, "X", &[]),
    (0x08, "C", &[]),
    (0x09, "V", &[]),
    (0x0B, "B", &[]),
    (0x0C, "Q", &[]),
    (0x0D, "W", &[]),
    (0x0E, "E", &[]),
    (0x0F, "R", &[]),
    (0x10, "Y", &[]),
    (0x11, "T", &[]),
    (0x12, "1", &[]),
    (0x13, "2", &[]),
    (0x14, "3", &[]),
    (0x15, "4", &[]),
    (0x16, "6", &[]),
    (0x17, "5", &[]),
    (0x18, "=", &["equal", "equals"]),
    (0x19, "9", &[]),
    (0x1A, "7", &[]),
    (0x1B, "-", &["minus"]),
    (0x1C, "8", &[]),
    (0x1D, "0", &[]),
    (0x1E, "]", &["rightbracket"]),
    (0x1F, "O", &[]),
    (0x20, "U", &[]),
    (0x21, "[", &["leftbracket"]),
    (0x22, "I", &[]),
    (0x23, "P", &[]),
    (code::RETURN, "Return", &["enter", "↩"]),
    (0x25, "L", &[]),
    (0x26, "J", &[]),
    (0x27, "'", &["quote"]),
    (0x28, "K", &[]),
    (0x29, ";", &["semicolon"]),
    (0x2A, "\\", &["backslash"]),
    (0x2B, ",", &["comma"]),
    (0x2C, "/", &["slash"]),
    (0x2D, "N", &[]),
    (0x2E, "M", &[]),
    (0x2F, ".", &["period"]),
    (code::TAB, "Tab", &["⇥"]),
    (code::SPACE, "Space", &["spacebar"]),
    (0x32, "`", &["grave", "backtick"]),
    (code::DELETE, "Delete", &["backspace", "⌫"]),
    (code::ESCAPE, "Escape", &["esc", "⎋"]),
    (0x40, "F17", &[]),
    (0x41, "Keypad.", &["keypaddecimal"]),
    (0x43, "Keypad*", &["keypadmultiply"]),
    (0x45, "Keypad+", &["keypadplus"]),
    (0x47, "KeypadClear", &[]),
    (0x4B, "Keypad/", &["keypaddivide"]),
    (0x4C, "KeypadEnter", &[]),
    (0x4E, "Keypad-", &["keypadminus"]),
    (0x4F, "F18", &[]),
    (0x50, "F19", &[]),
    (0x51, "Keypad=", &["keypadequals"]),
    (0x52, "Keypad0", &[]),
    (0x53, "Keypad1", &[]),
    (0x54, "Keypad2", &[]),
    (0x55, "Keypad3", &[]),
    (0x56, "Keypad4", &[]),
    (0x57, "Keypad5", &[]),
    (0x58, "Keypad6", &[]),
    (0x59, "Keypad7", &[]),
    (0x5A, "F20", &[]),
    (0x5B, "Keypad8", &[]),
    (0x5C, "Keypad9", &[]),
    (0x60, "F5", &[]),
    (0x61, "F6", &[]),
    (0x62, "F7", &[]),
    (0x63, "F3", &[]),
    (0x64, "F8", &[]),
    (0x65, "F9", &[]),
    (0x67, "F11", &[]),
    (0x69, "F13", &[]),
    (0x6A, "F16", &[]),
    (0x6B, "F14", &[]),
    (0x6D, "F10", &[]),
    (0x6F, "F12", &[]),
    (0x71, "F15", &[]),
    (0x72, "Help", &[]),
    (0x73, "Home", &["↖"]),
    (0x74, "PageUp", &["⇞"]),
    (code::FORWARD_DELETE, "ForwardDelete", &["⌦"]),
    (0x76, "F4", &[]),
    (0x77, "End", &["↘"]),
    (0x78, "F2", &[]),
    (0x79, "PageDown", &["⇟"]),
    (0x7A, "F1", &[]),
    (0x7B, "Left", &["leftarrow", "←"]),
    (0x7C, "Right", &["rightarrow", "→"]),
    (0x7D, "Down", &["downarrow", "↓"]),
    (0x7E, "Up", &["uparrow", "↑"]),
];

/// Key codes of the modifier keys themselves; these only ever arrive as
/// flags-changed events and are never chords on their own.
const MODIFIER_KEY_CODES: &[u16] = &[0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F];

/// macOS sets the Fn flag on these keys whether or not Fn is held
const IMPLICIT_FUNCTION_KEYS: &[&str] = &[
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
    "F15", "F16", "F17", "F18", "F19", "F20", "Left", "Right", "Down", "Up", "Home", "End",
    "PageUp", "PageDown", "ForwardDelete", "Help",
];

/// Canonical display name for a key code
pub fn name_for_code(key_code: u16) -> Option<&'static str> {
    KEY_TABLE
        .iter()
        .find(|(code, _, _)| *code == key_code)
        .map(|(_, name, _)| *name)
}

/// Key code for a canonical or alias key name (case-insensitive)
pub fn code_for_name(name: &str) -> Option<u16> {
    lookup(name).map(|(code, _)| code)
}

/// Canonicalize a key name, e.g. `"k"` -> `"K"`, `"esc"` -> `"Escape"`
pub fn canonical_name(name: &str) -> Option<&'static str> {
    lookup(name).map(|(_, canonical)| canonical)
}

fn lookup(name: &str) -> Option<(u16, &'static str)> {
    KEY_TABLE
        .iter()
        .find(|(_, canonical, aliases)| {
            canonical.eq_ignore_ascii_case(name)
                || aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
        })
        .map(|(code, canonical, _)| (*code, *canonical))
}

/// Kind of raw keyboard event delivered by the event source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    KeyDown,
    KeyUp,
    FlagsChanged,
}

/// One keyboard event as seen by the event tap. Consumed once, never stored.
#[derive(Debug, Clone, Copy)]
pub struct RawKeyEvent {
    pub key_code: u16,
    pub kind: KeyEventKind,
    pub flags: u64,
    pub timestamp: Instant,
    /// Auto-repeat key-down produced by a held key
    pub is_repeat: bool,
    /// Posted by our own synthesizer
    pub synthetic: bool,
}

impl RawKeyEvent {
    pub fn new(key_code: u16, kind: KeyEventKind, flags: u64, timestamp: Instant) -> Self {
        Self {
            key_code,
            kind,
            flags,
            timestamp,
            is_repeat: false,
            synthetic: false,
        }
    }
}

/// A key that could not be mapped to a canonical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("key code {0:#04x} has no display name")]
    UnknownKeyCode(u16),
    #[error("key code {0:#04x} is a modifier key")]
    ModifierKey(u16),
}

/// Modifier set encoded in raw event flags
pub fn modifiers_from_flags(raw: u64) -> Vec<Modifier> {
    let mut modifiers = Vec::with_capacity(5);
    if raw & flags::FUNCTION != 0 {
        modifiers.push(Modifier::Function);
    }
    if raw & flags::CONTROL != 0 {
        modifiers.push(Modifier::Control);
    }
    if raw & flags::OPTION != 0 {
        modifiers.push(Modifier::Option);
    }
    if raw & flags::SHIFT != 0 {
        modifiers.push(Modifier::Shift);
    }
    if raw & flags::COMMAND != 0 {
        modifiers.push(Modifier::Command);
    }
    modifiers
}

/// Which hand's modifiers are down: all left, all right, or neither/mixed
pub fn side_from_flags(raw: u64) -> ModifierSide {
    let left = raw & flags::device::LEFT != 0;
    let right = raw & flags::device::RIGHT != 0;
    match (left, right) {
        (true, false) => ModifierSide::Left,
        (false, true) => ModifierSide::Right,
        _ => ModifierSide::Unspecified,
    }
}

/// Raw flag bits for a modifier set, used when synthesizing key events
pub fn flags_for_modifiers<'a>(modifiers: impl IntoIterator<Item = &'a Modifier>) -> u64 {
    modifiers.into_iter().fold(0, |acc, modifier| {
        acc | match modifier {
            Modifier::Function => flags::FUNCTION,
            Modifier::Control => flags::CONTROL,
            Modifier::Option => flags::OPTION,
            Modifier::Shift => flags::SHIFT,
            Modifier::Command => flags::COMMAND,
        }
    })
}

/// Classify a key event into its chord
pub fn classify(event: &RawKeyEvent) -> Result<KeyShortcut, ResolveError> {
    if MODIFIER_KEY_CODES.contains(&event.key_code) {
        return Err(ResolveError::ModifierKey(event.key_code));
    }
    let name = name_for_code(event.key_code)
        .ok_or(ResolveError::UnknownKeyCode(event.key_code))?;

    let implicit_fn = IMPLICIT_FUNCTION_KEYS.contains(&name);
    let modifiers = modifiers_from_flags(event.flags)
        .into_iter()
        .filter(|m| !(implicit_fn && *m == Modifier::Function));

    Ok(KeyShortcut::new(name, modifiers).with_side(side_from_flags(event.flags)))
}
