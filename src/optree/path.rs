// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Path building: one instruction row to its ordered check-step sequence.
//!
//! The step order is fixed for every instruction: the encoding pieces needed
//! to make a decision, the 64-bit mode check, the prefix check, the address
//! and operand size checks, the register-vs-memory check, and only then the
//! operation, its byte readers, and its arguments. Keeping the order uniform
//! maximizes branch reuse when the sequences are inserted into the shared
//! graph: two rows agreeing on a prefix of checks share the corresponding
//! prefix of nodes.

use crate::error::Reporter;

use super::graph::{Action, Step};
use super::row::InstructionRow;

/// The x86 legacy prefix bytes (segment, lock, repeat, and size overrides).
pub const LEGACY_PREFIXES: &[&str] = &[
    "26", "2E", "36", "3E", "64", "65", "66", "67", "F0", "F2", "F3",
];

/// Operand shorthands that consume the ModR/M reg field.
const USES_REG: &[&str] = &["r16", "r32", "r64", "r8"];

/// Operand shorthands that consume the ModR/M r/m field.
const USES_RM: &[&str] = &["r/m16", "r/m32", "r/m64", "r/m8"];

/// Whether `token` is a two-digit uppercase hex byte, possibly carrying a
/// `+suffix` (an 8-wide register-in-opcode range).
pub fn is_hex_key(token: &str) -> bool {
    let token = match token.find('+') {
        Some(pos) => &token[..pos],
        None => token,
    };
    token.len() == 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

/// Whether `token` is a `/n` ModR/M-reg extension for n in 0..=7.
pub fn is_slash_num(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 2 && bytes[0] == b'/' && (b'0'..=b'7').contains(&bytes[1])
}

fn is_legacy_prefix(token: &str) -> bool {
    LEGACY_PREFIXES.contains(&token)
}

/// Build the check-step sequence for one instruction row.
///
/// Returns `None` when the row is structurally broken badly enough that no
/// path can be built (a second legacy prefix); lesser problems are reported
/// and the affected piece is skipped.
pub fn build_steps(row: &InstructionRow, reporter: &mut Reporter) -> Option<Vec<Step>> {
    let fields: Vec<&str> = row.encoding.split_whitespace().collect();
    let mut i = 0;
    let mut rex: Option<&str> = None;
    let mut prefix: Option<&str> = None;

    if fields.get(i).is_some_and(|f| f.starts_with("REX")) {
        rex = Some(fields[i]);
        i += 1;
        if fields.get(i) == Some(&"+") {
            i += 1;
        }
    }
    if fields.get(i).is_some_and(|f| is_legacy_prefix(f)) {
        prefix = Some(fields[i]);
        i += 1;
    }
    if rex.is_none() && fields.get(i).is_some_and(|f| f.starts_with("REX")) {
        if fields[i] == "REX" {
            reporter.warning(format!("REX without REX.W: {} {}", row.text, row.encoding));
        }
        i += 1;
        if fields.get(i) == Some(&"+") {
            i += 1;
        }
    }
    if fields.get(i).is_some_and(|f| is_legacy_prefix(f)) {
        reporter.error(format!("{} {}: too many prefixes", row.text, row.encoding));
        return None;
    }

    let mut steps = Vec::new();
    let mut have_modrm = false;
    let mut have_plus = false;
    let mut used_reg: Option<String> = None;

    while let Some(&token) = fields.get(i) {
        if !is_hex_key(token) && !is_slash_num(token) {
            break;
        }
        let mut key = token.to_string();
        if is_slash_num(token) {
            if used_reg.is_some() {
                reporter.warning(format!("{} {}: multiple modrm checks", row.text, row.encoding));
            }
            have_modrm = true;
            used_reg = Some(key.clone());
        }
        if let Some(pos) = key.find('+') {
            key.truncate(pos + 1);
            have_plus = true;
        }
        steps.push(Step::new(Action::Decode, key));
        i += 1;
    }

    let mode = if !row.valid32 {
        "1"
    } else if !row.valid64 {
        "0"
    } else {
        "any"
    };
    steps.push(Step::new(Action::Is64, mode));

    steps.push(Step::new(Action::Prefix, prefix.unwrap_or("0")));

    let addrsize = if row.has_tag("address16") {
        "16"
    } else if row.has_tag("address32") {
        "32"
    } else if row.has_tag("address64") {
        "64"
    } else {
        "any"
    };
    steps.push(Step::new(Action::AddrSize, addrsize));

    let datasize = if row.has_tag("operand16") {
        "16"
    } else if row.has_tag("operand32") {
        "32"
    } else if row.has_tag("operand64") {
        "64"
    } else {
        "any"
    };
    steps.push(Step::new(Action::DataSize, datasize));

    if fields.get(i) == Some(&"/r") {
        have_modrm = true;
    }
    if have_modrm {
        let ismem = if row.has_tag("modrm_regonly") {
            "0"
        } else if row.has_tag("modrm_memonly") {
            "1"
        } else {
            "any"
        };
        steps.push(Step::new(Action::IsMem, ismem));
    }

    steps.push(Step::new(Action::Op, row.mnemonic()));

    for &token in &fields[i..] {
        steps.push(Step::new(Action::Read, token));
    }

    let mut used_rm: Option<String> = None;
    for arg in row.args() {
        let uses_reg = USES_REG.contains(&arg);
        let uses_rm = USES_RM.contains(&arg);
        if uses_reg && !have_modrm && !have_plus {
            reporter.error(format!(
                "{} {}: no modrm field to use for {}",
                row.text, row.encoding, arg
            ));
            continue;
        }
        if uses_rm && !have_modrm {
            reporter.error(format!(
                "{} {}: no modrm field to use for {}",
                row.text, row.encoding, arg
            ));
            continue;
        }
        if uses_reg {
            if let Some(prev) = &used_reg {
                reporter.error(format!(
                    "{} {}: modrm reg field used by both {} and {}",
                    row.text, row.encoding, prev, arg
                ));
                continue;
            }
            used_reg = Some(arg.to_string());
        }
        if uses_rm {
            if let Some(prev) = &used_rm {
                reporter.error(format!(
                    "{} {}: modrm r/m field used by both {} and {}",
                    row.text, row.encoding, prev, arg
                ));
                continue;
            }
            used_rm = Some(arg.to_string());
        }
        steps.push(Step::new(Action::Arg, arg));
    }

    steps.push(Step::new(Action::Match, "!"));
    Some(steps)
}
