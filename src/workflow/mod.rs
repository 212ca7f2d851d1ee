//! Workflow model, activation rules and shortcut resolution
//!
//! Immutable value types delivered by the configuration collaborator, plus
//! the two pure derivations the engine computes from them: the eligible
//! group set and the shortcut trie.

mod command;
mod definition;
mod resolver;
mod rules;
mod shortcut;

pub use command::{
    ApplicationAction, ApplicationCommand, Command, CommandKind, CommandMeta, KeyboardCommand,
    OpenCommand, ScriptCommand, ScriptLanguage, ScriptSource, ShortcutCommand, SystemAction,
    SystemCommand, TextCommand, UiElementCommand, WindowAction, WindowCommand,
};
pub use definition::{
    ApplicationContext, ApplicationTrigger, Configuration, Execution, Trigger, Workflow,
    WorkflowGroup,
};
pub use resolver::{progress_key, MatchResult, ShortcutResolver};
pub use rules::{eligible_groups, Rule};
pub use shortcut::{KeyShortcut, Modifier, ModifierSide, ShortcutParseError};
