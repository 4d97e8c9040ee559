//! History export parsing
//!
//! Reads the line-oriented history export of the source repository (the
//! detailed format: a `Changeset:` marker followed by `User:`, `Date:`,
//! `Comment:` and `Items:` blocks) and turns it into revision ids or full
//! [`Revision`] records.
//!
//! Parsing is tolerant. A malformed marker line is logged and skipped; the
//! contract is to extract what is parseable.
//!
//! ## Examples
//!
//! ```rust
//! use replayvc::history::parse_history;
//!
//! let log = "Changeset: 12\nUser: a\n\nChangeset: 10\nUser: b\nChangeset: 12\n";
//! assert_eq!(parse_history(log), vec![10, 12]);
//! ```

use crate::error::Result;
use crate::operations;
use crate::types::{Revision, RevisionId};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Prefix of the line that opens a revision block
pub const REVISION_MARKER: &str = "Changeset:";

/// Parse a history export into sorted, de-duplicated revision ids
pub fn parse_history(text: &str) -> Vec<RevisionId> {
    let mut ids = BTreeSet::new();
    let mut line_count = 0usize;

    for (index, line) in text.lines().enumerate() {
        line_count += 1;
        if let Some(id) = marker_id(line, index + 1) {
            ids.insert(id);
        }
    }

    info!(
        "Processed {} lines and found {} unique revision ids",
        line_count,
        ids.len()
    );
    ids.into_iter().collect()
}

/// Parse a history export into full revision records, ascending by id
///
/// When an id appears more than once, the first block wins.
pub fn parse_revisions(text: &str) -> Vec<Revision> {
    let mut revisions: BTreeMap<RevisionId, Revision> = BTreeMap::new();
    let mut current: Option<(RevisionId, Vec<&str>)> = None;

    for (index, line) in text.lines().enumerate() {
        if line.trim_start().starts_with(REVISION_MARKER) {
            if let Some((id, block)) = current.take() {
                revisions.entry(id).or_insert_with(|| parse_block(id, &block));
            }
            current = marker_id(line, index + 1).map(|id| (id, Vec::new()));
            continue;
        }
        if let Some((_, block)) = current.as_mut() {
            block.push(line);
        }
    }
    if let Some((id, block)) = current.take() {
        revisions.entry(id).or_insert_with(|| parse_block(id, &block));
    }

    debug!("Parsed {} revision records", revisions.len());
    revisions.into_values().collect()
}

/// Read a history export, decoding UTF-16 exports transparently
pub fn read_history_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(decode_export(&bytes))
}

/// Decode export bytes by BOM, falling back to a UTF-16LE sniff and UTF-8
pub fn decode_export(bytes: &[u8]) -> String {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [first, 0, ..] if *first != 0 => decode_utf16(bytes, u16::from_le_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Revision id on a marker line, or `None` (with a warning) when malformed
fn marker_id(line: &str, line_number: usize) -> Option<RevisionId> {
    let rest = line.trim().strip_prefix(REVISION_MARKER)?;
    match rest.split_whitespace().next().map(str::parse::<RevisionId>) {
        Some(Ok(id)) => Some(id),
        _ => {
            warn!(
                "Malformed revision marker on line {}: {:?}",
                line_number,
                line.trim()
            );
            None
        }
    }
}

fn parse_block(id: RevisionId, lines: &[&str]) -> Revision {
    let mut revision = Revision::bare(id);
    let mut comment_lines: Vec<&str> = Vec::new();
    let mut in_comment = false;

    for line in lines {
        let trimmed = line.trim();
        let indented = line.starts_with(char::is_whitespace);

        if !indented {
            if let Some(value) = trimmed.strip_prefix("User:") {
                revision.author = value.trim().to_string();
                in_comment = false;
                continue;
            }
            if let Some(value) = trimmed.strip_prefix("Date:") {
                revision.timestamp = Some(value.trim().to_string());
                in_comment = false;
                continue;
            }
            if let Some(value) = trimmed.strip_prefix("Comment:") {
                in_comment = true;
                if !value.trim().is_empty() {
                    comment_lines.push(value.trim());
                }
                continue;
            }
            if trimmed.ends_with(':') || trimmed.starts_with("---") {
                in_comment = false;
                continue;
            }
        }

        if in_comment && !trimmed.is_empty() {
            comment_lines.push(trimmed);
        }
    }

    if !comment_lines.is_empty() {
        revision.comment = Some(comment_lines.join("\n"));
    }
    revision.operations = operations::extract(&lines.join("\n"));
    revision
}
