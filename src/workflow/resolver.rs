//! Shortcut resolver
//!
//! A trie keyed by the canonical string of each chord, built once per
//! eligible workflow set. Resolving a sequence walks at most
//! `sequence.len()` nodes, independent of how many workflows exist.
//!
//! Precedence:
//! - A node with children is never an immediate exact match; any workflow
//!   ending there is reported as `Partial { exact: Some(..) }` and fires
//!   only if the sequence is not extended (longest match wins).
//! - A deferred hold trigger cannot fire when the sequence settles, since
//!   its key may be up by then. If the key is still down when the reset
//!   interval elapses, the matcher starts the hold measured from the
//!   original press; otherwise it is dropped.
//! - Workflows with identical triggers: the one whose declared modifier
//!   sides agree with the pressed sides wins, then the one registered last.

use std::collections::HashMap;
use std::sync::Arc;

use super::{KeyShortcut, Workflow};

/// Outcome of resolving an accumulated sequence
#[derive(Debug, Clone)]
pub enum MatchResult {
    /// Dead end: no trigger starts with this sequence
    None,
    /// Prefix of at least one longer trigger
    Partial {
        progress: String,
        /// Workflow whose trigger is exactly this sequence, deferred
        exact: Option<Arc<Workflow>>,
    },
    /// Uniquely identifies one workflow
    Exact(Arc<Workflow>),
}

impl MatchResult {
    pub fn is_none(&self) -> bool {
        matches!(self, MatchResult::None)
    }
}

#[derive(Debug)]
struct Terminal {
    workflow: Arc<Workflow>,
    order: usize,
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, usize>,
    terminals: Vec<Terminal>,
    /// Workflows whose trigger passes through this node
    candidates: Vec<Arc<Workflow>>,
}

#[derive(Debug)]
pub struct ShortcutResolver {
    nodes: Vec<Node>,
    workflow_count: usize,
}

impl Default for ShortcutResolver {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
            workflow_count: 0,
        }
    }
}

impl ShortcutResolver {
    /// Index every workflow with a non-empty keyboard trigger
    pub fn build<'a>(workflows: impl IntoIterator<Item = &'a Arc<Workflow>>) -> Self {
        let mut resolver = Self::default();
        for (order, workflow) in workflows.into_iter().enumerate() {
            if workflow.shortcuts().is_empty() {
                continue;
            }
            resolver.insert(workflow, order);
        }
        resolver
    }

    fn insert(&mut self, workflow: &Arc<Workflow>, order: usize) {
        let mut node = 0;
        for shortcut in workflow.shortcuts() {
            let key = shortcut.canonical();
            node = match self.nodes[node].children.get(&key) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(key, next);
                    next
                }
            };
            self.nodes[node].candidates.push(Arc::clone(workflow));
        }
        self.nodes[node].terminals.push(Terminal {
            workflow: Arc::clone(workflow),
            order,
        });
        self.workflow_count += 1;
    }

    fn walk(&self, sequence: &[KeyShortcut]) -> Option<&Node> {
        let mut node = 0;
        for shortcut in sequence {
            node = *self.nodes[node].children.get(&shortcut.canonical())?;
        }
        Some(&self.nodes[node])
    }

    /// Resolve an accumulated sequence. An empty sequence is `None`.
    pub fn resolve(&self, sequence: &[KeyShortcut]) -> MatchResult {
        if sequence.is_empty() {
            return MatchResult::None;
        }
        let Some(node) = self.walk(sequence) else {
            return MatchResult::None;
        };

        let exact = Self::select_terminal(&node.terminals, sequence);
        if node.children.is_empty() {
            match exact {
                Some(workflow) => MatchResult::Exact(workflow),
                None => MatchResult::None,
            }
        } else {
            MatchResult::Partial {
                progress: progress_key(sequence),
                exact,
            }
        }
    }

    /// Workflows still reachable from `sequence` (the session set)
    pub fn candidates(&self, sequence: &[KeyShortcut]) -> Vec<Arc<Workflow>> {
        if sequence.is_empty() {
            return Vec::new();
        }
        self.walk(sequence)
            .map(|node| node.candidates.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.workflow_count
    }

    pub fn is_empty(&self) -> bool {
        self.workflow_count == 0
    }

    fn select_terminal(terminals: &[Terminal], sequence: &[KeyShortcut]) -> Option<Arc<Workflow>> {
        let sides_agree = |terminal: &&Terminal| {
            terminal
                .workflow
                .shortcuts()
                .iter()
                .zip(sequence)
                .all(|(declared, pressed)| declared.side().agrees_with(pressed.side()))
        };

        terminals
            .iter()
            .filter(sides_agree)
            .max_by_key(|terminal| terminal.order)
            .or_else(|| terminals.iter().max_by_key(|terminal| terminal.order))
            .map(|terminal| Arc::clone(&terminal.workflow))
    }
}

/// Display form of a partial sequence, e.g. `⌘K ⌘M`
pub fn progress_key(sequence: &[KeyShortcut]) -> String {
    sequence
        .iter()
        .map(KeyShortcut::canonical)
        .collect::<Vec<_>>()
        .join(" ")
}
