// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for opmap.

use std::fs;
use std::io::{self, Write};
use std::process;

use clap::Parser;

use opmap::cli::{Cli, OutputFormat};
use opmap::error::{MapError, Reporter};
use opmap::optree::{self, emit, lower};
use opmap::table;

fn main() {
    let cli = Cli::parse();
    let mut reporter = Reporter::new();
    let result = run(&cli, &mut reporter);

    if !cli.quiet {
        for diag in reporter.diagnostics() {
            eprintln!("opmap: {}", diag.format());
        }
    }

    let artifact = match result {
        Ok(artifact) => artifact,
        Err(err) => {
            eprintln!("opmap: {err}");
            process::exit(1);
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(err) = fs::write(path, &artifact) {
                eprintln!("opmap: writing {}: {err}", path.display());
                process::exit(1);
            }
        }
        None => {
            if let Err(err) = io::stdout().write_all(artifact.as_bytes()) {
                eprintln!("opmap: writing output: {err}");
                process::exit(1);
            }
        }
    }
}

fn run(cli: &Cli, reporter: &mut Reporter) -> Result<String, MapError> {
    let rows = table::read_table(&cli.input)?;
    let mut tree = optree::compile(&rows, reporter)?;
    let artifact = match cli.fmt {
        OutputFormat::Text => emit::render_text(&tree),
        OutputFormat::Decoder => {
            let program = lower::lower(&mut tree, reporter);
            emit::render_decoder(&cli.input.display().to_string(), &program)
        }
    };
    Ok(artifact)
}
