// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Shared decision graph: arena-owned nodes and path insertion.
//!
//! Every instruction contributes one root-to-`match` path of check-steps.
//! Insertion reuses existing branches wherever the step sequence matches, so
//! the union of all instructions forms a single decision structure. After
//! normalization the structure is a DAG: a node may be referenced from
//! several parents, which is why nodes live in an arena and are addressed by
//! [`NodeId`] rather than owned by their parents.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Reporter;

use super::row::InstructionRow;

/// The kind of check a node performs. Along any root-to-`match` path the
/// actions appear in this fixed order ([`Decode`](Action::Decode) and
/// [`Read`](Action::Read)/[`Arg`](Action::Arg) possibly repeated,
/// [`IsMem`](Action::IsMem) only for ModR/M instructions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
    Decode,
    Is64,
    Prefix,
    AddrSize,
    DataSize,
    IsMem,
    Op,
    Read,
    Arg,
    Match,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Is64 => "is64",
            Self::Prefix => "prefix",
            Self::AddrSize => "addrsize",
            Self::DataSize => "datasize",
            Self::IsMem => "ismem",
            Self::Op => "op",
            Self::Read => "read",
            Self::Arg => "arg",
            Self::Match => "match",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Display helper for a node's possibly-unset action.
pub(crate) fn action_name(action: Option<Action>) -> &'static str {
    action.map(Action::name).unwrap_or("")
}

/// One check-step of an instruction's path: the action to apply and the key
/// selecting the branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub action: Action,
    pub key: String,
}

impl Step {
    pub fn new(action: Action, key: impl Into<String>) -> Self {
        Self {
            action,
            key: key.into(),
        }
    }
}

/// Arena index of a node. Reference equality is identifier equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

/// One node of the decision graph.
///
/// A freshly allocated node has no action yet; the first insertion through
/// it decides the action for good. Children are keyed by the branch key and
/// iterate in sorted order, which every later pass relies on for
/// deterministic output. `pc` is written by the lowerer only (0 means
/// unassigned; PC 0 of the emitted program is the reserved fail word).
#[derive(Debug)]
pub struct Node {
    pub action: Option<Action>,
    pub children: BTreeMap<String, NodeId>,
    pub path: String,
    pub pc: u16,
}

impl Node {
    fn new(path: String) -> Self {
        Self {
            action: None,
            children: BTreeMap::new(),
            path,
            pc: 0,
        }
    }

    /// Child keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }
}

/// The decision graph under construction.
pub struct OpTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl OpTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(String::new())],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn child(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.node(id).children.get(key).copied()
    }

    fn alloc(&mut self, path: String) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(path));
        id
    }

    /// Insert one instruction's check-step sequence, reusing existing
    /// branches along the way.
    pub fn insert(&mut self, steps: &[Step], row: &InstructionRow, reporter: &mut Reporter) {
        let mut at = self.root;
        for step in steps {
            at = self.walk(at, step.action, &step.key, row, reporter);
        }
    }

    /// Advance from `at` by applying `action` with branch `key`.
    ///
    /// The first insertion through a node decides its action; a later
    /// insertion carrying a different action is a conflict. The conflicting
    /// insertion is redirected into a throwaway node unreachable from the
    /// root, so the main graph stays consistent while the rest of the row is
    /// still type-checked.
    fn walk(
        &mut self,
        at: NodeId,
        action: Action,
        key: &str,
        row: &InstructionRow,
        reporter: &mut Reporter,
    ) -> NodeId {
        match self.node(at).action {
            None => self.node_mut(at).action = Some(action),
            Some(have) if have != action => {
                let message = format!(
                    "{}; {}: conflicting paths {} and {}|{} {}",
                    row.text,
                    row.encoding,
                    self.leaf_path(at),
                    self.node(at).path,
                    action,
                    key
                );
                reporter.error(message);
                return self.alloc(String::new());
            }
            Some(_) => {}
        }
        if let Some(child) = self.child(at, key) {
            return child;
        }
        let path = format!("{}|{} {}", self.node(at).path, action, key);
        let child = self.alloc(path);
        self.node_mut(at).children.insert(key.to_string(), child);
        child
    }

    /// Full path of some leaf under `id`, used as an example of where an
    /// existing subtree is headed in conflict messages.
    pub fn leaf_path(&self, id: NodeId) -> &str {
        let mut at = id;
        loop {
            let node = self.node(at);
            match node.children.values().next() {
                None => return &node.path,
                Some(&first) => at = first,
            }
        }
    }
}

impl Default for OpTree {
    fn default() -> Self {
        Self::new()
    }
}
