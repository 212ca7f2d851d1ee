//! Key chord value type
//!
//! A `KeyShortcut` is one chord: a canonical key name plus a set of
//! modifiers. Equality and hashing ignore the hardware side, which is only
//! consulted when two otherwise identical triggers compete.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hotkey::keys;

/// Errors that can occur when parsing a shortcut string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShortcutParseError {
    #[error("shortcut string is empty")]
    Empty,
    #[error("shortcut has no key, only modifiers")]
    MissingKey,
    #[error("unknown token '{0}' in shortcut")]
    UnknownToken(String),
    #[error("unknown key '{0}'")]
    UnknownKey(String),
}

/// Modifier keys, ordered the way macOS displays them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Function,
    Control,
    Option,
    Shift,
    Command,
}

impl Modifier {
    /// Glyph used in the canonical display form
    pub fn glyph(self) -> &'static str {
        match self {
            Modifier::Function => "fn",
            Modifier::Control => "⌃",
            Modifier::Option => "⌥",
            Modifier::Shift => "⇧",
            Modifier::Command => "⌘",
        }
    }

    fn parse_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "cmd" | "command" | "⌘" | "meta" | "super" => Some(Modifier::Command),
            "opt" | "option" | "alt" | "⌥" => Some(Modifier::Option),
            "ctrl" | "control" | "ctl" | "⌃" | "^" => Some(Modifier::Control),
            "shift" | "⇧" => Some(Modifier::Shift),
            "fn" | "function" => Some(Modifier::Function),
            _ => None,
        }
    }
}

/// Which hand's modifier keys produced a chord
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierSide {
    Left,
    Right,
    #[default]
    Unspecified,
}

impl ModifierSide {
    /// A declared side agrees with an observed one when either is unspecified
    pub fn agrees_with(self, observed: ModifierSide) -> bool {
        self == ModifierSide::Unspecified || self == observed
    }
}

/// A single chord: key plus modifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShortcut {
    #[serde(deserialize_with = "deserialize_key")]
    key: String,
    #[serde(default)]
    side: ModifierSide,
    #[serde(default)]
    modifiers: BTreeSet<Modifier>,
}

impl KeyShortcut {
    pub fn new(
        key: impl Into<String>,
        modifiers: impl IntoIterator<Item = Modifier>,
    ) -> Self {
        let key = key.into();
        Self {
            key: keys::canonical_name(&key).map(str::to_string).unwrap_or(key),
            side: ModifierSide::Unspecified,
            modifiers: modifiers.into_iter().collect(),
        }
    }

    pub fn with_side(mut self, side: ModifierSide) -> Self {
        self.side = side;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn side(&self) -> ModifierSide {
        self.side
    }

    pub fn modifiers(&self) -> &BTreeSet<Modifier> {
        &self.modifiers
    }

    pub fn has_modifier(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }

    /// Canonical string form, used as the resolver's index key
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let key = String::deserialize(deserializer)?;
    Ok(keys::canonical_name(&key).map(str::to_string).unwrap_or(key))
}

impl PartialEq for KeyShortcut {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.modifiers == other.modifiers
    }
}

impl Eq for KeyShortcut {}

impl Hash for KeyShortcut {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.modifiers.hash(state);
    }
}

impl fmt::Display for KeyShortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            f.write_str(modifier.glyph())?;
        }
        f.write_str(&self.key)
    }
}

impl FromStr for KeyShortcut {
    type Err = ShortcutParseError;

    /// Accepts `cmd+shift+k`, `Cmd Shift K` and glyph forms such as `⌘⇧K`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ShortcutParseError::Empty);
        }

        let mut modifiers = BTreeSet::new();
        let mut rest = s;
        loop {
            let glyph = ["⌘", "⌥", "⌃", "⇧"]
                .into_iter()
                .find(|g| rest.starts_with(g));
            match glyph {
                Some(g) => {
                    if let Some(m) = Modifier::parse_token(g) {
                        modifiers.insert(m);
                    }
                    rest = &rest[g.len()..];
                }
                None => break,
            }
        }

        let normalized = rest.replace('+', " ");
        let mut key_part: Option<&str> = None;
        for part in normalized.split_whitespace() {
            if let Some(m) = Modifier::parse_token(part) {
                modifiers.insert(m);
                continue;
            }
            if key_part.is_some() {
                return Err(ShortcutParseError::UnknownToken(part.to_string()));
            }
            key_part = Some(part);
        }

        let key = key_part.ok_or(ShortcutParseError::MissingKey)?;
        let canonical = keys::canonical_name(key)
            .ok_or_else(|| ShortcutParseError::UnknownKey(key.to_string()))?;

        Ok(Self {
            key: canonical.to_string(),
            side: ModifierSide::Unspecified,
            modifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_word_form() {
        let shortcut: KeyShortcut = "cmd+shift+k".parse().unwrap();
        assert_eq!(shortcut.key(), "K");
        assert!(shortcut.has_modifier(Modifier::Command));
        assert!(shortcut.has_modifier(Modifier::Shift));
        assert!(!shortcut.has_modifier(Modifier::Option));
    }

    #[test]
    fn test_parse_glyph_form() {
        let shortcut: KeyShortcut = "⌘⇧K".parse().unwrap();
        assert_eq!(shortcut, "cmd+shift+k".parse().unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<KeyShortcut>(), Err(ShortcutParseError::Empty));
        assert_eq!(
            "cmd+shift".parse::<KeyShortcut>(),
            Err(ShortcutParseError::MissingKey)
        );
        assert_eq!(
            "cmd+k+j".parse::<KeyShortcut>(),
            Err(ShortcutParseError::UnknownToken("j".to_string()))
        );
        assert_eq!(
            "cmd+nope".parse::<KeyShortcut>(),
            Err(ShortcutParseError::UnknownKey("nope".to_string()))
        );
    }

    #[test]
    fn test_display_uses_macos_order() {
        let shortcut = KeyShortcut::new(
            "k",
            [Modifier::Command, Modifier::Shift, Modifier::Control, Modifier::Option],
        );
        assert_eq!(shortcut.to_string(), "⌃⌥⇧⌘K");
    }

    #[test]
    fn test_equality_ignores_side() {
        let left = KeyShortcut::new("A", [Modifier::Command]).with_side(ModifierSide::Left);
        let right = KeyShortcut::new("A", [Modifier::Command]).with_side(ModifierSide::Right);
        assert_eq!(left, right);

        let mut set = HashSet::new();
        set.insert(left);
        assert!(set.contains(&right));
    }

    #[test]
    fn test_side_agreement() {
        assert!(ModifierSide::Unspecified.agrees_with(ModifierSide::Right));
        assert!(ModifierSide::Left.agrees_with(ModifierSide::Left));
        assert!(!ModifierSide::Left.agrees_with(ModifierSide::Right));
    }

    #[test]
    fn test_deserialize_defaults() {
        let shortcut: KeyShortcut =
            serde_json::from_str(r#"{"key":"m","modifiers":["command"]}"#).unwrap();
        assert_eq!(shortcut.side(), ModifierSide::Unspecified);
        assert_eq!(shortcut.to_string(), "⌘M");
    }
}
