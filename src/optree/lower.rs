// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Two-pass lowering of the decision graph to the flat decoder program.
//!
//! Every node is assigned a program counter (a 16-bit word offset into the
//! emitted array; PC 0 is the reserved fail word emitted ahead of the
//! program). The lowering runs the same depth-first traversal twice: the
//! first pass records each node's PC without writing anything, the second
//! pass writes the program lines using the now-known PCs as jump and branch
//! targets. Both passes must visit children in identical sorted-key order;
//! any divergence would silently corrupt the table.
//!
//! A node reached again at a different PC has already been laid out
//! elsewhere (the graph is a DAG), so a two-word jump to the first copy is
//! emitted instead.

use std::collections::BTreeSet;

use crate::error::Reporter;

use super::graph::{Action, NodeId, OpTree};
use super::path::{is_hex_key, is_slash_num};

/// The lowered program: formatted array-body lines plus the sorted set of
/// referenced operation mnemonics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredProgram {
    pub lines: Vec<String>,
    pub ops: Vec<String>,
}

/// Lower a normalized graph. Call once per tree: PCs are written into the
/// nodes and a second lowering of the same tree would see them as already
/// assigned.
pub fn lower(tree: &mut OpTree, reporter: &mut Reporter) -> LoweredProgram {
    let root = tree.root();
    let mut ops: BTreeSet<String> = BTreeSet::new();
    ops.insert("PAUSE".to_string());

    {
        let mut record = Pass {
            tree: &mut *tree,
            ops: &mut ops,
            reporter: &mut *reporter,
            printing: false,
            lines: Vec::new(),
        };
        record.emit_node(root, 1);
    }

    let lines = {
        let mut write = Pass {
            tree: &mut *tree,
            ops: &mut ops,
            reporter: &mut *reporter,
            printing: true,
            lines: Vec::new(),
        };
        write.emit_node(root, 1);
        write.lines
    };

    LoweredProgram {
        lines,
        ops: ops.into_iter().collect(),
    }
}

struct Pass<'a> {
    tree: &'a mut OpTree,
    ops: &'a mut BTreeSet<String>,
    reporter: &'a mut Reporter,
    printing: bool,
    lines: Vec<String>,
}

impl Pass<'_> {
    fn push(&mut self, line: String) {
        if self.printing {
            self.lines.push(line);
        }
    }

    /// PC of the child under `key`, or 0 (the reserved fail word) when the
    /// key is absent.
    fn child_pc(&self, id: NodeId, key: &str) -> u16 {
        self.tree
            .child(id, key)
            .map(|child| self.tree.node(child).pc)
            .unwrap_or(0)
    }

    /// Report a problem once per lowering (during the recording pass only,
    /// so the writing pass does not repeat it).
    fn report(&mut self, message: String) {
        if !self.printing {
            self.reporter.warning(message);
        }
    }

    /// Lay out `id` at `pc` and return the PC after its code.
    fn emit_node(&mut self, id: NodeId, mut pc: u16) -> u16 {
        if self.tree.node(id).pc == 0 {
            self.tree.node_mut(id).pc = pc;
        }
        // A mismatched PC means this node was laid out elsewhere; jump there.
        if self.tree.node(id).pc != pc {
            let target = self.tree.node(id).pc;
            self.push(format!("    /*{pc}*/ xJump, {target},"));
            return pc + 2;
        }

        let keys: Vec<String> = self.tree.node(id).children.keys().cloned().collect();
        let mut next: Option<NodeId> = None;

        match self.tree.node(id).action {
            None => {
                let path = self.tree.node(id).path.clone();
                self.report(format!("lower: node without action: {path}"));
            }

            Some(Action::Decode) => {
                // Hex byte checks take priority over /n reg-field checks, so
                // the hex block is emitted first. A "40+" key is an 8-wide
                // swath of byte values sharing one target.
                let mut hex: u16 = 0;
                let mut slash = 0;
                for key in &keys {
                    if is_hex_key(key) {
                        hex += if key.contains('+') { 8 } else { 1 };
                    }
                    if is_slash_num(key) {
                        slash += 1;
                    }
                }
                if hex > 0 {
                    if self.printing {
                        self.push(format!("    /*{pc}*/ xCondByte, {hex},"));
                        for key in &keys {
                            if !is_hex_key(key) {
                                continue;
                            }
                            let target = self.child_pc(id, key);
                            if let Some(pos) = key.find('+') {
                                let base =
                                    u16::from_str_radix(&key[..pos], 16).unwrap_or_default();
                                for offset in 0..8 {
                                    self.push(format!("    {:#04x}, {target},", base + offset));
                                }
                            } else {
                                self.push(format!("    0x{key}, {target},"));
                            }
                        }
                    }
                    pc += 2 + 2 * hex;

                    // Other checks fail the decode when nothing matches, but
                    // the byte check falls through into the /n check. With
                    // no /n block following, failure must be explicit.
                    if slash == 0 {
                        self.push("    xFail,".to_string());
                        pc += 1;
                    }
                }
                if slash > 0 {
                    if self.printing {
                        self.push(format!("    /*{pc}*/ xCondSlashR,"));
                        for digit in 0..8 {
                            let target = self.child_pc(id, &format!("/{digit}"));
                            self.push(format!("    {target}, // {digit}"));
                        }
                    }
                    pc += 1 + 8;
                }
            }

            Some(Action::Is64) => {
                if keys.len() == 1 && keys[0] == "any" {
                    next = self.tree.child(id, "any");
                } else {
                    if self.tree.child(id, "any").is_some() {
                        let path = self.tree.node(id).path.clone();
                        self.report(format!("{path}: mixed is64 keys: {keys:?}"));
                    }
                    let (pc0, pc1) = (self.child_pc(id, "0"), self.child_pc(id, "1"));
                    self.push(format!("    /*{pc}*/ xCondIs64, {pc0}, {pc1},"));
                    pc += 3;
                }
            }

            Some(Action::Prefix) => {
                // The "0" key means "none of the above"; when it is the only
                // alternative the check constrains nothing, like "any".
                if keys.len() == 1 && (keys[0] == "any" || keys[0] == "0") {
                    next = self.tree.child(id, &keys[0]);
                } else {
                    if self.tree.child(id, "any").is_some() {
                        let path = self.tree.node(id).path.clone();
                        self.report(format!("{path}: mixed prefix keys: {keys:?}"));
                    }
                    // Reverse sorted order tests F3 and F2 before 66 and
                    // leaves the "0" fallback last.
                    let count = keys.len();
                    if self.printing {
                        self.push(format!("    /*{pc}*/ xCondPrefix, {count},"));
                        for key in keys.iter().rev() {
                            let target = self.child_pc(id, key);
                            self.push(format!("    0x{key}, {target},"));
                        }
                    }
                    pc += 2 + 2 * count as u16;
                }
            }

            Some(Action::AddrSize) => {
                if keys.len() == 1 && keys[0] == "any" {
                    next = self.tree.child(id, "any");
                } else {
                    if self.tree.child(id, "any").is_some() {
                        let path = self.tree.node(id).path.clone();
                        self.report(format!("{path}: mixed addrsize keys: {keys:?}"));
                    }
                    let (pc16, pc32, pc64) = (
                        self.child_pc(id, "16"),
                        self.child_pc(id, "32"),
                        self.child_pc(id, "64"),
                    );
                    self.push(format!("    /*{pc}*/ xCondAddrSize, {pc16}, {pc32}, {pc64},"));
                    pc += 4;
                }
            }

            Some(Action::DataSize) => {
                if keys.len() == 1 && keys[0] == "any" {
                    next = self.tree.child(id, "any");
                } else {
                    if self.tree.child(id, "any").is_some() {
                        let path = self.tree.node(id).path.clone();
                        self.report(format!("{path}: mixed datasize keys: {keys:?}"));
                    }
                    let (pc16, pc32, pc64) = (
                        self.child_pc(id, "16"),
                        self.child_pc(id, "32"),
                        self.child_pc(id, "64"),
                    );
                    self.push(format!("    /*{pc}*/ xCondDataSize, {pc16}, {pc32}, {pc64},"));
                    pc += 4;
                }
            }

            Some(Action::IsMem) => {
                if keys.len() == 1 && keys[0] == "any" {
                    next = self.tree.child(id, "any");
                } else {
                    if self.tree.child(id, "any").is_some() {
                        let path = self.tree.node(id).path.clone();
                        self.report(format!("{path}: mixed ismem keys: {keys:?}"));
                    }
                    let (pc0, pc1) = (self.child_pc(id, "0"), self.child_pc(id, "1"));
                    self.push(format!("    /*{pc}*/ xCondIsMem, {pc0}, {pc1},"));
                    pc += 3;
                }
            }

            Some(Action::Op) => match keys.first() {
                Some(mnemonic) => {
                    self.ops.insert(mnemonic.clone());
                    self.push(format!("    /*{pc}*/ xSetOp, {mnemonic},"));
                    next = self.tree.child(id, mnemonic);
                    pc += 2;
                }
                None => {
                    let path = self.tree.node(id).path.clone();
                    self.report(format!("{path}: op node without mnemonic"));
                }
            },

            Some(Action::Read) => match keys.first() {
                Some(token) => {
                    let suffix = word_suffix(token);
                    self.push(format!("    /*{pc}*/ xRead{suffix},"));
                    next = self.tree.child(id, token);
                    pc += 1;
                }
                None => {
                    let path = self.tree.node(id).path.clone();
                    self.report(format!("{path}: read node without token"));
                }
            },

            Some(Action::Arg) => match keys.first() {
                Some(arg) => {
                    let suffix = word_suffix(arg);
                    self.push(format!("    /*{pc}*/ xArg{suffix},"));
                    next = self.tree.child(id, arg);
                    pc += 1;
                }
                None => {
                    let path = self.tree.node(id).path.clone();
                    self.report(format!("{path}: arg node without shorthand"));
                }
            },

            Some(Action::Match) => {
                self.push(format!("    /*{pc}*/ xMatch,"));
                return pc + 1;
            }
        }

        if let Some(next) = next {
            pc = self.emit_node(next, pc);
        }

        for key in &keys {
            if let Some(child) = self.tree.child(id, key) {
                let child_pc = self.tree.node(child).pc;
                if child_pc == 0 || child_pc == pc {
                    pc = self.emit_node(child, pc);
                }
            }
        }

        pc
    }
}

/// Literal replacements applied to an uppercased shorthand, tried in table
/// order at each position.
const SUFFIX_FIXES: &[(&str, &str)] = &[
    ("/R", "SlashR"),
    ("/", ""),
    ("<", ""),
    (">", ""),
    ("+", "plus"),
    ("-", "dash"),
    (":", "colon"),
    ("&", "and"),
    ("ST(0)", "ST"),
    ("ST(I)", "STi"),
    ("ST(I)+Op", "STi"),
];

/// Convert an Intel-manual shorthand into a decoder word suffix.
///
/// The first letter of every maximal letter/digit run is uppercased, then
/// the punctuation fixes above are applied: `r/m32` becomes `RM32`,
/// `m16:32` becomes `M16colon32`, `CR0-CR7` becomes `CR0dashCR7`.
pub fn word_suffix(shorthand: &str) -> String {
    let bytes = shorthand.as_bytes();
    let mut upper = String::with_capacity(bytes.len());
    for (i, &b) in bytes.iter().enumerate() {
        let run_start = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if b.is_ascii_lowercase() && run_start {
            upper.push(b.to_ascii_uppercase() as char);
        } else {
            upper.push(b as char);
        }
    }

    let mut out = String::with_capacity(upper.len());
    let mut i = 0;
    'scan: while i < upper.len() {
        for (pattern, replacement) in SUFFIX_FIXES {
            if upper[i..].starts_with(pattern) {
                out.push_str(replacement);
                i += pattern.len();
                continue 'scan;
            }
        }
        out.push_str(&upper[i..i + 1]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optree;
    use crate::optree::graph::Step;
    use crate::optree::normalize::normalize;
    use crate::optree::row::InstructionRow;
    use crate::table::TableRow;

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn suffix_output_is_alphanumeric(shorthand in "[a-z0-9/:&+<>-]{0,12}") {
            let suffix = word_suffix(&shorthand);
            prop_assert!(suffix.bytes().all(|b| b.is_ascii_alphanumeric()));
        }

        #[test]
        fn plain_shorthand_only_gets_leading_uppercase(shorthand in "[a-z][a-z0-9]{0,8}") {
            let suffix = word_suffix(&shorthand);
            let expected = format!(
                "{}{}",
                shorthand[..1].to_ascii_uppercase(),
                &shorthand[1..]
            );
            prop_assert_eq!(suffix, expected);
        }
    }

    #[test]
    fn suffix_examples() {
        assert_eq!(word_suffix("r/m32"), "RM32");
        assert_eq!(word_suffix("r32"), "R32");
        assert_eq!(word_suffix("imm8"), "Imm8");
        assert_eq!(word_suffix("ib"), "Ib");
        assert_eq!(word_suffix("/r"), "SlashR");
        assert_eq!(word_suffix("m16:32"), "M16colon32");
        assert_eq!(word_suffix("m16&32"), "M16and32");
        assert_eq!(word_suffix("CR0-CR7"), "CR0dashCR7");
        assert_eq!(word_suffix("ST(i)"), "STi");
        assert_eq!(word_suffix("ST(0)"), "ST");
        assert_eq!(word_suffix("moffs8"), "Moffs8");
        assert_eq!(word_suffix("rel16"), "Rel16");
    }

    fn compile_rows(rows: &[(&str, &str, &str, &str, &str)]) -> (OpTree, Reporter) {
        let raw: Vec<TableRow> = rows
            .iter()
            .map(|(text, encoding, v32, v64, tags)| TableRow {
                text: text.to_string(),
                encoding: encoding.to_string(),
                valid32: v32.to_string(),
                valid64: v64.to_string(),
                cpuid: String::new(),
                tags: tags.to_string(),
            })
            .collect();
        let mut reporter = Reporter::new();
        let tree = optree::compile(&raw, &mut reporter).expect("compile failed");
        (tree, reporter)
    }

    #[test]
    fn nop_program_layout() {
        let (mut tree, mut reporter) = compile_rows(&[("NOP", "90", "V", "V", "")]);
        let program = lower(&mut tree, &mut reporter);
        assert!(reporter.is_empty());
        assert_eq!(
            program.lines,
            [
                "    /*1*/ xCondByte, 1,",
                "    0x90, 6,",
                "    xFail,",
                "    /*6*/ xSetOp, NOP,",
                "    /*8*/ xMatch,",
            ]
        );
        assert_eq!(program.ops, ["NOP", "PAUSE"]);
    }

    #[test]
    fn plus_key_expands_to_eight_entries() {
        let (mut tree, mut reporter) =
            compile_rows(&[("BSWAP r32", "0F C8+rd", "V", "V", "")]);
        let program = lower(&mut tree, &mut reporter);
        assert!(reporter.is_empty());
        let entries: Vec<&String> = program
            .lines
            .iter()
            .filter(|line| line.starts_with("    0xc"))
            .collect();
        assert_eq!(entries.len(), 8);
        assert!(program.lines.iter().any(|l| l.contains("xCondByte, 8,")));
        // All eight byte values share one target.
        let first = entries[0].rsplit(' ').next().expect("target");
        assert!(entries.iter().all(|line| line.ends_with(first)));
    }

    #[test]
    fn slash_block_fills_missing_digits_with_fail() {
        let (mut tree, mut reporter) = compile_rows(&[
            ("INC r/m32", "FF /0", "V", "V", "operand32"),
            ("PUSH r/m32", "FF /6", "V", "N.E.", "operand32"),
        ]);
        let program = lower(&mut tree, &mut reporter);
        assert!(reporter.is_empty());
        let slash_at = program
            .lines
            .iter()
            .position(|line| line.contains("xCondSlashR"))
            .expect("slash block");
        let targets: Vec<&String> = program.lines[slash_at + 1..slash_at + 9].iter().collect();
        // /0 and /6 point at real code, everything else at the fail word.
        assert!(!targets[0].starts_with("    0,"));
        assert!(!targets[6].starts_with("    0,"));
        for digit in [1, 2, 3, 4, 5, 7] {
            assert!(
                targets[digit].starts_with("    0,"),
                "digit {digit} should fail: {:?}",
                targets[digit]
            );
        }
    }

    #[test]
    fn hex_block_falls_through_into_slash_block() {
        // A decode node carrying both a hex byte and /n extensions emits the
        // byte check first and no explicit failure in between.
        let (mut tree, mut reporter) = compile_rows(&[
            ("SGDT m", "0F 01 /0", "V", "V", "modrm_memonly"),
            ("MONITOR", "0F 01 C8", "V", "V", ""),
        ]);
        let program = lower(&mut tree, &mut reporter);
        assert!(reporter.is_empty());
        let pair_at = program
            .lines
            .iter()
            .position(|line| line.starts_with("    0xC8,"))
            .expect("byte pair for MONITOR");
        assert!(program.lines[pair_at + 1].contains("xCondSlashR"));
    }

    #[test]
    fn hex_only_block_emits_trailing_fail() {
        let (mut tree, mut reporter) = compile_rows(&[("NOP", "90", "V", "V", "")]);
        let program = lower(&mut tree, &mut reporter);
        assert!(reporter.is_empty());
        let pair_at = program
            .lines
            .iter()
            .position(|line| line.starts_with("    0x90,"))
            .expect("byte pair");
        assert_eq!(program.lines[pair_at + 1], "    xFail,");
    }

    #[test]
    fn prefix_pairs_emit_in_reverse_sorted_order() {
        let (mut tree, mut reporter) = compile_rows(&[
            ("MOVUPS xmm1, xmm2/m128", "0F 10 /r", "V", "V", ""),
            ("MOVUPD xmm1, xmm2/m128", "66 0F 10 /r", "V", "V", ""),
            ("MOVSD xmm1, xmm2/m64", "F2 0F 10 /r", "V", "V", ""),
            ("MOVSS xmm1, xmm2/m32", "F3 0F 10 /r", "V", "V", ""),
        ]);
        let program = lower(&mut tree, &mut reporter);
        assert!(reporter.is_empty(), "diagnostics: {:?}", reporter.diagnostics());
        let at = program
            .lines
            .iter()
            .position(|line| line.contains("xCondPrefix, 4,"))
            .expect("prefix block for 0F 10");
        assert!(program.lines[at + 1].starts_with("    0xF3,"));
        assert!(program.lines[at + 2].starts_with("    0xF2,"));
        assert!(program.lines[at + 3].starts_with("    0x66,"));
        assert!(program.lines[at + 4].starts_with("    0x0,"));
    }

    #[test]
    fn shared_tail_becomes_jump() {
        // The two rows diverge only at the argument below a wildcard
        // operand-size split. Normalization cross-links the wildcard subtree
        // into the concrete key, so the shared match node is laid out once
        // and the second path reaches it through a jump.
        let (mut tree, mut reporter) = compile_rows(&[
            ("XBEGIN rel16", "C7 F8", "V", "V", "operand16"),
            ("XBEGIN rel32", "C7 F8", "V", "V", ""),
        ]);
        let program = lower(&mut tree, &mut reporter);
        // The merge leaves an arg node with two children, which is reported.
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("multiple children for action=arg")));
        let jumps = program
            .lines
            .iter()
            .filter(|line| line.contains("xJump"))
            .count();
        assert_eq!(jumps, 1, "lines: {:#?}", program.lines);
        let matches = program
            .lines
            .iter()
            .filter(|line| line.contains("xMatch"))
            .count();
        assert_eq!(matches, 2);
    }

    #[test]
    fn pause_is_preseeded() {
        let (mut tree, mut reporter) = compile_rows(&[("NOP", "90", "V", "V", "")]);
        let program = lower(&mut tree, &mut reporter);
        assert!(program.ops.contains(&"PAUSE".to_string()));
    }

    #[test]
    fn two_passes_agree_on_pcs() {
        let (mut tree, mut reporter) = compile_rows(&[
            ("ADD r/m16, r16", "01 /r", "V", "V", "operand16"),
            ("ADD r/m32, r32", "01 /r", "V", "V", "operand32"),
            ("ADD r/m64, r64", "REX.W 01 /r", "N.E.", "V", ""),
            ("NOP", "90", "V", "V", ""),
        ]);
        let program = lower(&mut tree, &mut reporter);
        // Every head comment PC must be strictly increasing and unique.
        let mut pcs = Vec::new();
        for line in &program.lines {
            if let Some(rest) = line.trim_start().strip_prefix("/*") {
                let pc: u16 = rest
                    .split("*/")
                    .next()
                    .expect("pc comment")
                    .parse()
                    .expect("numeric pc");
                pcs.push(pc);
            }
        }
        let mut sorted = pcs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(pcs, sorted, "head PCs must be unique and increasing");
    }

    #[test]
    fn match_terminates_each_path() {
        let (mut tree, mut reporter) = compile_rows(&[("HLT", "F4", "V", "V", "")]);
        let program = lower(&mut tree, &mut reporter);
        assert!(program.lines.last().expect("lines").contains("xMatch"));
    }

    #[test]
    fn lowering_ignores_throwaway_subgraphs() {
        // A conflicting row is rerouted during insertion; the main program
        // must still lower cleanly.
        let mut tree = OpTree::new();
        let mut reporter = Reporter::new();
        let row_a = InstructionRow {
            text: "A".to_string(),
            encoding: "90".to_string(),
            valid32: true,
            valid64: true,
            tags: Vec::new(),
        };
        tree.insert(
            &[
                Step::new(Action::Decode, "90"),
                Step::new(Action::Op, "A"),
                Step::new(Action::Match, "!"),
            ],
            &row_a,
            &mut reporter,
        );
        tree.insert(
            &[
                Step::new(Action::Decode, "90"),
                Step::new(Action::Is64, "any"),
                Step::new(Action::Op, "B"),
                Step::new(Action::Match, "!"),
            ],
            &row_a,
            &mut reporter,
        );
        assert_eq!(reporter.diagnostics().len(), 1);
        normalize(&mut tree, &mut reporter);
        let program = lower(&mut tree, &mut reporter);
        assert!(program.lines.iter().any(|l| l.contains("xSetOp, A,")));
        assert!(!program.lines.iter().any(|l| l.contains("xSetOp, B,")));
    }
}
