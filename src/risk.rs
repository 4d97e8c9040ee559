//! Revision risk analysis
//!
//! Summarizes a revision's operations so an operator can see which revisions
//! are likely to stress the destination tool, and so the executor can pick
//! the replication strategy it tries first. Purely advisory.

use crate::types::{Operation, OperationKind, ReplicationStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Paths longer than this have historically broken destination tooling
pub const LONG_PATH_THRESHOLD: usize = 200;

/// Default size of the extension histogram
pub const DEFAULT_TOP_EXTENSIONS: usize = 10;

/// Above this many operations, bulk replication is attempted first
pub const BULK_OPERATION_THRESHOLD: usize = 1000;

/// Summary of a revision's operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    /// Total number of operations
    pub total: usize,
    /// Count per operation kind
    pub counts: BTreeMap<OperationKind, usize>,
    /// Most common extensions with their counts, most frequent first
    pub top_extensions: Vec<(String, usize)>,
    /// Paths exceeding [`LONG_PATH_THRESHOLD`] characters
    pub long_paths: Vec<String>,
}

impl RiskReport {
    /// Count for one kind
    pub fn count(&self, kind: OperationKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Operations granular replay cannot apply one by one
    pub fn unsupported(&self) -> usize {
        self.counts
            .iter()
            .filter(|(kind, _)| !kind.is_granular())
            .map(|(_, count)| count)
            .sum()
    }

    /// Strategy to attempt first
    ///
    /// Bulk when there is nothing to apply granularly, when renames, branches
    /// or merges are present, when long paths are present, or when the
    /// revision is very large.
    pub fn suggested_strategy(&self) -> ReplicationStrategy {
        if self.total == 0
            || self.unsupported() > 0
            || !self.long_paths.is_empty()
            || self.total > BULK_OPERATION_THRESHOLD
        {
            ReplicationStrategy::Bulk
        } else {
            ReplicationStrategy::Granular
        }
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let counts = OperationKind::ALL
            .iter()
            .filter(|kind| self.count(**kind) > 0)
            .map(|kind| format!("{} {}", self.count(*kind), kind))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} operations ({}), {} long paths",
            self.total,
            if counts.is_empty() { "none".to_string() } else { counts },
            self.long_paths.len()
        )
    }
}

/// Analyze an operation list
pub fn analyze(operations: &[Operation], top_n: usize) -> RiskReport {
    let mut counts = BTreeMap::new();
    let mut extensions: BTreeMap<String, usize> = BTreeMap::new();
    let mut long_paths = Vec::new();

    for op in operations {
        *counts.entry(op.kind).or_insert(0) += 1;
        if let Some(ext) = op.extension() {
            *extensions.entry(ext).or_insert(0) += 1;
        }
        if op.path.chars().count() > LONG_PATH_THRESHOLD {
            long_paths.push(op.path.clone());
        }
    }

    let mut top_extensions: Vec<(String, usize)> = extensions.into_iter().collect();
    // Ties resolve alphabetically because the map iterates in key order
    top_extensions.sort_by(|a, b| b.1.cmp(&a.1));
    top_extensions.truncate(top_n);

    RiskReport {
        total: operations.len(),
        counts,
        top_extensions,
        long_paths,
    }
}
