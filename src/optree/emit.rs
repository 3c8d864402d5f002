// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Output artifact assembly for the decoder and text formats.

use super::graph::{action_name, NodeId, OpTree};
use super::lower::LoweredProgram;

/// Render the generated decoder source: the flat program array, the
/// operation constants in ascending lexical order starting after the
/// reserved zero, the `maxOp` marker, and the parallel name table. The
/// identifiers `decoder`, `maxOp`, `opNames`, and the `x*` word names are
/// the ABI shared with the disassembler and are emitted verbatim.
pub fn render_decoder(input_name: &str, program: &LoweredProgram) -> String {
    let mut out = String::new();
    out.push_str("// DO NOT EDIT\n");
    out.push_str(&format!(
        "// generated by: opmap --fmt decoder {input_name}\n\n"
    ));
    out.push_str("#![allow(non_upper_case_globals)]\n\n");

    out.push_str("pub static decoder: &[u16] = &[\n    xFail,\n");
    for line in &program.lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("];\n\n");

    for (index, op) in program.ops.iter().enumerate() {
        out.push_str(&format!("pub const {}: u16 = {};\n", op, index + 1));
    }
    out.push('\n');

    if let Some(last) = program.ops.last() {
        out.push_str(&format!("pub const maxOp: u16 = {last};\n\n"));
    }

    out.push_str("pub static opNames: &[&str] = &[\n    \"\",\n");
    for op in &program.ops {
        out.push_str(&format!("    \"{op}\",\n"));
    }
    out.push_str("];\n");
    out
}

/// Render the graph as an indented dump: each node prints its action, then
/// each child key one level deeper with the child subtree below it.
pub fn render_text(tree: &OpTree) -> String {
    let mut out = String::new();
    render_node(tree, tree.root(), 0, &mut out);
    out
}

fn render_node(tree: &OpTree, id: NodeId, depth: usize, out: &mut String) {
    let node = tree.node(id);
    indent(depth, out);
    out.push_str(action_name(node.action));
    out.push('\n');
    for (key, &child) in &node.children {
        indent(depth + 1, out);
        out.push_str(key);
        out.push('\n');
        render_node(tree, child, depth + 2, out);
    }
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}
