// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Wildcard normalization: fold `any` children into concrete siblings.
//!
//! During insertion a check that does not constrain an instruction is
//! recorded under the `any` key. A node holding both an `any` child and
//! concrete keys would force the decoder to look in two places; this pass
//! removes that case by merging the `any` subtree into every concrete
//! sibling and expanding the remaining `any` across the action's declared
//! key space. After the pass a node either has a single `any` child (a
//! no-op check) or no `any` child at all.
//!
//! Merging does not copy nodes: where a key exists on only one side the
//! subtree is cross-linked, so the graph becomes a DAG. No paths may be
//! added after normalization.

use crate::error::Reporter;

use super::graph::{action_name, Action, NodeId, OpTree};

/// The full key space of actions that support `any` expansion.
fn key_space(action: Action) -> Option<&'static [&'static str]> {
    match action {
        Action::Is64 | Action::IsMem => Some(&["0", "1"]),
        Action::AddrSize | Action::DataSize => Some(&["16", "32", "64"]),
        _ => None,
    }
}

/// Normalize the whole graph and verify the single-child invariant of
/// `op`/`read`/`arg` nodes.
pub fn normalize(tree: &mut OpTree, reporter: &mut Reporter) {
    normalize_node(tree, tree.root(), reporter);
}

fn normalize_node(tree: &mut OpTree, id: NodeId, reporter: &mut Reporter) {
    let any_child = tree.child(id, "any");
    if let Some(any_id) = any_child {
        if tree.node(id).children.len() > 1 {
            let concrete: Vec<NodeId> = tree
                .node(id)
                .children
                .iter()
                .filter(|(key, _)| key.as_str() != "any")
                .map(|(_, &child)| child)
                .collect();
            for child in concrete {
                merge_into(tree, child, any_id, reporter);
            }
            match tree.node(id).action.and_then(key_space) {
                None => {
                    let node = tree.node(id);
                    reporter.error(format!(
                        "{}: unknown key space for {}=any",
                        node.path,
                        action_name(node.action)
                    ));
                }
                Some(keys) => {
                    for &key in keys {
                        if tree.child(id, key).is_none() {
                            tree.node_mut(id).children.insert(key.to_string(), any_id);
                        }
                    }
                }
            }
            tree.node_mut(id).children.remove("any");
        }
    }

    let children: Vec<NodeId> = tree.node(id).children.values().copied().collect();
    for child in children {
        normalize_node(tree, child, reporter);
    }

    if matches!(
        tree.node(id).action,
        Some(Action::Op | Action::Read | Action::Arg)
    ) && tree.node(id).children.len() > 1
    {
        let node = tree.node(id);
        reporter.error(format!(
            "{}: multiple children for action={}: {:?}",
            node.path,
            action_name(node.action),
            node.keys()
        ));
    }
}

/// Merge the subtree at `src` into the subtree at `dst`: keys present in
/// both sides merge recursively, keys present only in `src` are cross-linked
/// into `dst`.
fn merge_into(tree: &mut OpTree, dst: NodeId, src: NodeId, reporter: &mut Reporter) {
    if dst == src {
        return;
    }
    if tree.node(dst).action != tree.node(src).action {
        let (dst_node, src_node) = (tree.node(dst), tree.node(src));
        reporter.error(format!(
            "cannot merge {}|{} and {}|{}",
            dst_node.path,
            action_name(dst_node.action),
            src_node.path,
            action_name(src_node.action)
        ));
        return;
    }
    let src_children: Vec<(String, NodeId)> = tree
        .node(src)
        .children
        .iter()
        .map(|(key, &child)| (key.clone(), child))
        .collect();
    for (key, src_child) in src_children {
        match tree.child(dst, &key) {
            None => {
                tree.node_mut(dst).children.insert(key, src_child);
            }
            Some(dst_child) => merge_into(tree, dst_child, src_child, reporter),
        }
    }
}
