//! Operation extraction and path mapping
//!
//! Turns the detail text of a single revision into a list of
//! [`Operation`]s, prunes deletes made redundant by an ancestor delete, and
//! maps repository paths between the source and target roots.
//!
//! The detail text is the informal output of the source tool, e.g.
//!
//! ```text
//! Changeset: 12
//! User: Jane Doe
//! Date: Monday, March 3, 2025 10:00:00 AM
//!
//! Comment:
//!   Fix the build
//!
//! Items:
//!   edit $/Project/src/main.cs
//!   delete, source rename $/Project/old.cs;X34
//!   rename $/Project/new.cs
//! ```
//!
//! Extraction never fails: text it cannot make sense of yields an empty list,
//! which callers must read as "replicate in bulk" rather than "no changes".

use crate::error::{ReplayError, Result};
use crate::types::{Operation, OperationKind};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, trace};

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z \-]*:").expect("section header regex must compile"));

static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-{5,}\s*$").expect("separator regex must compile"));

static CHANGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z]+(?:\s*,\s*[a-z]+(?: [a-z]+)?)*)\s+(\S.*)$").expect("change line regex must compile")
});

static VERSION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";[A-Za-z]\d+$").expect("version suffix regex must compile"));

/// Headers that open the list of changed items
const CHANGE_SECTION_HEADERS: &[&str] = &["items", "changes"];

/// When one line carries several keywords, the first of these present wins
const KIND_PRIORITY: [OperationKind; 6] = [
    OperationKind::Delete,
    OperationKind::Add,
    OperationKind::Rename,
    OperationKind::Branch,
    OperationKind::Edit,
    OperationKind::Merge,
];

/// Extract the operations listed in a revision's detail text
pub fn extract(detail: &str) -> Vec<Operation> {
    let mut operations = Vec::new();
    let mut in_changes = false;

    for line in detail.lines() {
        let trimmed = line.trim();
        let indented = line.starts_with(char::is_whitespace);

        if SEPARATOR.is_match(trimmed) {
            in_changes = false;
            continue;
        }

        if !indented && SECTION_HEADER.is_match(trimmed) && !trimmed.contains("$/") {
            let name = trimmed.split(':').next().unwrap_or("").trim().to_ascii_lowercase();
            in_changes = CHANGE_SECTION_HEADERS.contains(&name.as_str());
            continue;
        }

        if !in_changes || trimmed.is_empty() {
            continue;
        }

        match parse_change_line(trimmed) {
            Some(op) => operations.push(op),
            None => trace!("Skipping unrecognized change line: {}", trimmed),
        }
    }

    debug!("Extracted {} operations", operations.len());
    operations
}

/// Parse one `keyword[, keyword] path` line
fn parse_change_line(line: &str) -> Option<Operation> {
    let caps = CHANGE_LINE.captures(line)?;
    let keywords = caps.get(1)?.as_str();
    let path = strip_version_suffix(caps.get(2)?.as_str().trim());

    let present: BTreeSet<OperationKind> = keywords
        .split(',')
        .filter_map(|part| part.split_whitespace().last())
        .filter_map(|word| word.parse().ok())
        .collect();

    let kind = KIND_PRIORITY.into_iter().find(|k| present.contains(k))?;
    Some(Operation::new(kind, path))
}

/// Remove a trailing `;C123` / `;X4` version annotation
pub fn strip_version_suffix(path: &str) -> &str {
    match VERSION_SUFFIX.find(path) {
        Some(m) => &path[..m.start()],
        None => path,
    }
}

/// Drop deletes already covered by a delete of an ancestor directory
///
/// Non-delete operations keep their position; duplicate deletes collapse to
/// the first occurrence.
pub fn prune_redundant_deletes(operations: &[Operation]) -> Vec<Operation> {
    let deleted: BTreeSet<&str> = operations
        .iter()
        .filter(|op| op.kind == OperationKind::Delete)
        .map(|op| op.path.trim_end_matches('/'))
        .collect();

    let mut seen = BTreeSet::new();
    let mut pruned = Vec::with_capacity(operations.len());

    for op in operations {
        if op.kind != OperationKind::Delete {
            pruned.push(op.clone());
            continue;
        }
        let path = op.path.trim_end_matches('/');
        let covered = ancestors(path).any(|ancestor| deleted.contains(ancestor));
        if covered {
            trace!("Pruned delete of {} (ancestor already deleted)", path);
            continue;
        }
        if seen.insert(path.to_string()) {
            pruned.push(op.clone());
        }
    }

    pruned
}

/// Proper ancestors of a `/`-separated path, nearest first
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .rev()
        .filter(|(_, c)| *c == '/')
        .map(move |(i, _)| &path[..i])
        .filter(|p| !p.is_empty() && *p != "$")
}

/// Maps repository paths from the source root onto the target root
///
/// Stateless; the same mapping is recomputed for every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    source_root: String,
    target_root: String,
}

impl PathMapping {
    /// Create a mapping between two roots
    pub fn new(source_root: impl Into<String>, target_root: impl Into<String>) -> Self {
        Self {
            source_root: normalize_root(source_root.into()),
            target_root: normalize_root(target_root.into()),
        }
    }

    /// Source root prefix
    pub fn source_root(&self) -> &str {
        &self.source_root
    }

    /// Target root prefix
    pub fn target_root(&self) -> &str {
        &self.target_root
    }

    /// Map a source path onto the target root
    ///
    /// Returns `None` when the path is not under the source root. Only the
    /// prefix is replaced; the remainder is preserved byte-for-byte.
    pub fn to_target(&self, source_path: &str) -> Option<String> {
        swap_prefix(source_path, &self.source_root, &self.target_root)
    }

    /// Map a target path back onto the source root
    pub fn to_source(&self, target_path: &str) -> Option<String> {
        swap_prefix(target_path, &self.target_root, &self.source_root)
    }

    /// Like [`to_target`](Self::to_target) but with an error for foreign paths
    pub fn try_to_target(&self, source_path: &str) -> Result<String> {
        self.to_target(source_path).ok_or_else(|| ReplayError::PathOutsideRoot {
            path: source_path.to_string(),
            root: self.source_root.clone(),
        })
    }

    /// Path of a source item relative to the source root
    pub fn source_relative<'p>(&self, source_path: &'p str) -> Option<&'p str> {
        relative_to(source_path, &self.source_root)
    }

    /// Path of a target item relative to the target root
    pub fn target_relative<'p>(&self, target_path: &'p str) -> Option<&'p str> {
        relative_to(target_path, &self.target_root)
    }
}

fn normalize_root(root: String) -> String {
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "$" {
        // Keep "$/" usable as a root: everything is under it
        return "$".to_string();
    }
    trimmed.to_string()
}

fn relative_to<'p>(path: &'p str, root: &str) -> Option<&'p str> {
    if path == root {
        return Some("");
    }
    path.strip_prefix(root)?.strip_prefix('/')
}

fn swap_prefix(path: &str, from: &str, to: &str) -> Option<String> {
    let rest = relative_to(path, from)?;
    if rest.is_empty() {
        Some(to.to_string())
    } else {
        Some(format!("{}/{}", to, rest))
    }
}

/// Local file for a root-relative repository path inside a working copy
pub fn local_path(working_copy: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(working_copy.to_path_buf(), |acc, segment| acc.join(segment))
}
