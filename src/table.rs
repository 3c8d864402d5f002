// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction-table (CSV) input reader.
//!
//! The table starts with an optional run of blank lines and `#` comment
//! lines, followed by CSV records of at least six fields each:
//! mnemonic-and-args, encoding, valid-in-32-bit, valid-in-64-bit, cpuid
//! feature set, and tags. Extra fields are ignored.

use std::fs;
use std::path::Path;

use crate::error::MapError;

/// One raw table record, reduced to the six fields the compiler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub text: String,
    pub encoding: String,
    pub valid32: String,
    pub valid64: String,
    pub cpuid: String,
    pub tags: String,
}

/// Read and parse the instruction table at `path`.
pub fn read_table(path: &Path) -> Result<Vec<TableRow>, MapError> {
    let data = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_table(path, &data)
}

/// Parse table text. Split out from [`read_table`] so tests can feed inline
/// CSV without touching the filesystem.
pub fn parse_table(path: &Path, data: &str) -> Result<Vec<TableRow>, MapError> {
    let (body, skipped_lines) = skip_header(data);
    let records = parse_records(body, skipped_lines + 1).map_err(|(line, message)| {
        MapError::Csv {
            path: path.to_path_buf(),
            line,
            message,
        }
    })?;
    if records.is_empty() {
        return Err(MapError::EmptyInput {
            path: path.to_path_buf(),
        });
    }

    let mut rows = Vec::with_capacity(records.len());
    for (line, record) in records {
        if record.len() < 6 {
            return Err(MapError::RowTooNarrow {
                path: path.to_path_buf(),
                line,
                columns: record.len(),
            });
        }
        let mut fields = record.into_iter();
        rows.push(TableRow {
            text: fields.next().unwrap_or_default(),
            encoding: fields.next().unwrap_or_default(),
            valid32: fields.next().unwrap_or_default(),
            valid64: fields.next().unwrap_or_default(),
            cpuid: fields.next().unwrap_or_default(),
            tags: fields.next().unwrap_or_default(),
        });
    }
    Ok(rows)
}

/// Skip the leading run of blank lines and `#` comment lines. Returns the
/// remaining text and the number of lines skipped.
fn skip_header(data: &str) -> (&str, usize) {
    let mut rest = data;
    let mut skipped = 0;
    loop {
        if let Some(after) = rest.strip_prefix('\n') {
            rest = after;
            skipped += 1;
        } else if let Some(after) = rest.strip_prefix("\r\n") {
            rest = after;
            skipped += 1;
        } else if rest.starts_with('#') {
            match rest.find('\n') {
                Some(pos) => {
                    rest = &rest[pos + 1..];
                    skipped += 1;
                }
                None => return ("", skipped + 1),
            }
        } else {
            return (rest, skipped);
        }
    }
}

/// Parser state for one field position.
enum FieldState {
    Start,
    Unquoted,
    Quoted,
    QuoteSeen,
}

/// Parse CSV records: comma-separated fields, `"`-quoted fields with `""`
/// escapes, records separated by newlines (`\r\n` accepted). Blank lines are
/// skipped. Returns each record with the line number it starts on.
fn parse_records(
    body: &str,
    first_line: usize,
) -> Result<Vec<(usize, Vec<String>)>, (usize, String)> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut state = FieldState::Start;
    let mut line = first_line;
    let mut record_line = first_line;

    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        let in_quotes = matches!(state, FieldState::Quoted);
        let newline = !in_quotes && (c == '\n' || c == '\r');
        if newline && c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
        }
        match state {
            FieldState::Start => {
                if newline {
                    // Blank lines produce no record; a trailing comma before
                    // the newline leaves a pending empty field.
                    if !record.is_empty() {
                        record.push(String::new());
                        records.push((record_line, std::mem::take(&mut record)));
                    }
                    line += 1;
                    record_line = line;
                } else {
                    match c {
                        '"' => state = FieldState::Quoted,
                        ',' => record.push(String::new()),
                        _ => {
                            field.push(c);
                            state = FieldState::Unquoted;
                        }
                    }
                }
            }
            FieldState::Unquoted => {
                if newline {
                    record.push(std::mem::take(&mut field));
                    records.push((record_line, std::mem::take(&mut record)));
                    line += 1;
                    record_line = line;
                    state = FieldState::Start;
                } else {
                    match c {
                        ',' => {
                            record.push(std::mem::take(&mut field));
                            state = FieldState::Start;
                        }
                        '"' => return Err((line, "bare '\"' in non-quoted field".to_string())),
                        _ => field.push(c),
                    }
                }
            }
            FieldState::Quoted => {
                if c == '"' {
                    state = FieldState::QuoteSeen;
                } else {
                    field.push(c);
                    if c == '\n' {
                        line += 1;
                    }
                }
            }
            FieldState::QuoteSeen => {
                if newline {
                    record.push(std::mem::take(&mut field));
                    records.push((record_line, std::mem::take(&mut record)));
                    line += 1;
                    record_line = line;
                    state = FieldState::Start;
                } else {
                    match c {
                        '"' => {
                            field.push('"');
                            state = FieldState::Quoted;
                        }
                        ',' => {
                            record.push(std::mem::take(&mut field));
                            state = FieldState::Start;
                        }
                        _ => {
                            return Err((
                                line,
                                "unexpected character after closing quote".to_string(),
                            ))
                        }
                    }
                }
            }
        }
    }

    match state {
        FieldState::Quoted => return Err((line, "unterminated quoted field".to_string())),
        FieldState::Unquoted | FieldState::QuoteSeen => {
            record.push(std::mem::take(&mut field));
            records.push((record_line, record));
        }
        FieldState::Start => {
            if !record.is_empty() {
                record.push(String::new());
                records.push((record_line, record));
            }
        }
    }
    Ok(records)
}
