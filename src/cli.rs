// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface for the map compiler.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Compile the x86 instruction-set CSV into decoding tables.

The known output formats are:

  text (default) - print the decoding tree in text form
  decoder        - print the decoding tables for the disassembler";

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented dump of the decision tree, for debugging.
    Text,
    /// Flat decoder program plus the operation enumeration.
    Decoder,
}

#[derive(Parser, Debug)]
#[command(
    name = "opmap",
    version = VERSION,
    about = "x86 opcode map compiler: instruction-set CSV to decoder tables",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    /// Instruction-set CSV file to compile.
    pub input: PathBuf,
    #[arg(
        long = "fmt",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Select the output format. text prints the decoding tree; decoder prints the flat decoder program consumed by the disassembler."
    )]
    pub fmt: OutputFormat,
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        long_help = "Write the generated artifact to FILE instead of standard output."
    )]
    pub output: Option<PathBuf>,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Suppress non-fatal diagnostics. Fatal errors are still reported."
    )]
    pub quiet: bool,
}
