//! Provenance comments
//!
//! Every replayed revision is checked in with a comment that names the
//! source revision: `#<id>: <comment> (<author>)`, bounded in length.
//! Verification later extracts the id (and the comment when present) to
//! cross-reference target history against source history. Two older
//! templates are still recognized when reading:
//!
//! - `Migrated from changeset [no. ]<id>: <comment>`
//! - `Migrated changeset [no. ]<id>` (id only)

use crate::types::RevisionId;
use regex::Regex;
use std::sync::LazyLock;

static CURRENT_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^#(\d+):\s?(.*)$").expect("provenance regex must compile"));

static LEGACY_FULL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^Migrated from changeset\s+(?:no\.\s*)?(\d+):\s?(.*)$")
        .expect("legacy provenance regex must compile")
});

static CURRENT_ID_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(\d+)\b").expect("provenance id regex must compile"));

static LEGACY_ID_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Migrated changeset\s+(?:no\.\s*)?(\d+)\b")
        .expect("legacy provenance id regex must compile")
});

static AUTHOR_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^()]*\)$").expect("author suffix regex must compile"));

const ELLIPSIS: &str = "...";

/// What a target comment says about its source revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Id and (possibly truncated) comment were recovered
    Full {
        /// Source revision id
        id: RevisionId,
        /// Comment with the author suffix and truncation marker removed
        comment: String,
    },
    /// Only the id was recovered
    IdOnly {
        /// Source revision id
        id: RevisionId,
    },
}

impl Provenance {
    /// Source revision id
    pub fn id(&self) -> RevisionId {
        match self {
            Provenance::Full { id, .. } | Provenance::IdOnly { id } => *id,
        }
    }

    /// Extracted comment, if any
    pub fn comment(&self) -> Option<&str> {
        match self {
            Provenance::Full { comment, .. } => Some(comment),
            Provenance::IdOnly { .. } => None,
        }
    }
}

/// Collapse whitespace runs (including newlines) into single spaces
pub fn normalize_comment(comment: &str) -> String {
    comment.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the check-in comment for a replayed revision
///
/// The result never exceeds `max_len` characters. The source comment is
/// truncated (with `...`) first; the author suffix is dropped only when it
/// alone would not fit.
pub fn format_comment(id: RevisionId, comment: &str, author: &str, max_len: usize) -> String {
    let prefix = format!("#{}: ", id);
    let author = author.trim();
    let suffix = if author.is_empty() {
        String::new()
    } else {
        format!(" ({})", author)
    };
    let comment = normalize_comment(comment);

    let fixed = prefix.chars().count() + suffix.chars().count();
    let (suffix, budget) = if fixed <= max_len {
        (suffix, max_len - fixed)
    } else {
        (String::new(), max_len.saturating_sub(prefix.chars().count()))
    };

    let body = if comment.chars().count() <= budget {
        comment
    } else if budget <= ELLIPSIS.len() {
        comment.chars().take(budget).collect()
    } else {
        let kept: String = comment.chars().take(budget - ELLIPSIS.len()).collect();
        format!("{}{}", kept.trim_end(), ELLIPSIS)
    };

    if body.is_empty() {
        format!("#{}:{}", id, suffix)
    } else {
        format!("{}{}{}", prefix, body, suffix)
    }
}

/// Recover provenance from a target comment
pub fn parse(comment: &str) -> Option<Provenance> {
    let comment = comment.trim();

    for pattern in [&*CURRENT_FULL, &*LEGACY_FULL] {
        if let Some(caps) = pattern.captures(comment) {
            let Ok(id) = caps[1].parse() else { continue };
            return Some(Provenance::Full {
                id,
                comment: clean_extracted(&caps[2]),
            });
        }
    }

    for pattern in [&*CURRENT_ID_ONLY, &*LEGACY_ID_ONLY] {
        if let Some(caps) = pattern.captures(comment) {
            if let Ok(id) = caps[1].parse() {
                return Some(Provenance::IdOnly { id });
            }
        }
    }
    None
}

fn clean_extracted(raw: &str) -> String {
    let normalized = normalize_comment(raw);
    let without_author = AUTHOR_SUFFIX.replace(&normalized, "");
    without_author.trim_end_matches(ELLIPSIS).trim().to_string()
}

/// Whether an extracted comment agrees with the source comment
///
/// Prefix or containment after whitespace normalization; an empty
/// extraction only matches an empty source comment.
pub fn comment_matches(source_comment: &str, extracted: &str) -> bool {
    let source = normalize_comment(source_comment);
    let extracted = normalize_comment(extracted);
    if extracted.is_empty() {
        return source.is_empty();
    }
    source.starts_with(&extracted) || source.contains(&extracted)
}
