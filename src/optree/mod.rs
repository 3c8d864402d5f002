// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Decision-graph compiler: instruction rows to the normalized decode graph
//! and its lowered decoder program.

pub mod emit;
pub mod graph;
pub mod lower;
pub mod normalize;
pub mod path;
pub mod row;

use crate::error::{MapError, Reporter};
use crate::table::TableRow;

use graph::OpTree;

/// Build the normalized decision graph from raw table rows.
///
/// Structural problems in individual rows are reported and the affected row
/// or step is skipped; only malformed input as a whole is an error. After
/// this returns the graph is frozen: the lowerer reads it and assigns PCs,
/// nothing mutates its shape.
pub fn compile(rows: &[TableRow], reporter: &mut Reporter) -> Result<OpTree, MapError> {
    let mut tree = OpTree::new();
    for raw in rows {
        for row in row::expand(raw)? {
            if let Some(steps) = path::build_steps(&row, reporter) {
                tree.insert(&steps, &row, reporter);
            }
        }
    }
    normalize::normalize(&mut tree, reporter);
    Ok(tree)
}
