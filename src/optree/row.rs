// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Row normalization: raw table records to path-ready instruction rows.

use crate::error::MapError;
use crate::table::TableRow;

/// One normalized instruction row, ready for path building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionRow {
    /// Mnemonic and operand shorthands, e.g. `"ADD r/m32, r32"`.
    pub text: String,
    /// Space-separated encoding tokens, e.g. `"01 /r"`.
    pub encoding: String,
    pub valid32: bool,
    pub valid64: bool,
    pub tags: Vec<String>,
}

impl InstructionRow {
    /// The operation mnemonic: the first whitespace field of `text`.
    pub fn mnemonic(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or("")
    }

    /// Operand shorthands after the mnemonic, trailing commas stripped.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.text
            .split_whitespace()
            .skip(1)
            .map(|arg| arg.trim_end_matches(','))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Normalize one raw record into zero or more instruction rows.
///
/// Pseudo-ops are dropped entirely: they are prefixes for other
/// instructions, composite instructions, or alternate mnemonics of other
/// encodings, and none of them may participate in disassembly because the
/// decoding must be unique. VEX-encoded instructions are out of scope and
/// dropped as well.
///
/// `REX.W` in the encoding forces 64-bit operand size, so it is folded into
/// an `operand64` tag up front. When a row then carries more than one
/// `operand*` tag it is split into one row per size, because each size needs
/// its own key in the operand-size branch and an insertion adds exactly one
/// key per node. Operand size is the only tag axis that may repeat; any
/// other tag naming an operand size is a hard error.
pub fn expand(raw: &TableRow) -> Result<Vec<InstructionRow>, MapError> {
    let mut tags: Vec<String> = if raw.tags.is_empty() {
        Vec::new()
    } else {
        raw.tags.split(',').map(str::to_string).collect()
    };

    if tags.iter().any(|tag| tag.contains("pseudo")) {
        return Ok(Vec::new());
    }
    if raw.encoding.starts_with("VEX") {
        return Ok(Vec::new());
    }

    if raw.encoding.contains("REX.W") && !tags.iter().any(|tag| tag == "operand64") {
        tags.push("operand64".to_string());
    }

    let valid32 = raw.valid32 == "V";
    let valid64 = raw.valid64 == "V";
    let base = |tags: Vec<String>| InstructionRow {
        text: raw.text.clone(),
        encoding: raw.encoding.clone(),
        valid32,
        valid64,
        tags,
    };

    let operand_count = tags.iter().filter(|tag| tag.contains("operand")).count();
    if operand_count > 1 {
        let mut rest = Vec::new();
        let mut sizes = Vec::new();
        for tag in tags {
            if tag.starts_with("operand") {
                sizes.push(tag);
            } else if tag.contains("operand") {
                return Err(MapError::RepeatedSizeTag { tag });
            } else {
                rest.push(tag);
            }
        }
        let rows = sizes
            .into_iter()
            .map(|size| {
                let mut tags = rest.clone();
                tags.push(size);
                base(tags)
            })
            .collect();
        return Ok(rows);
    }

    Ok(vec![base(tags)])
}
