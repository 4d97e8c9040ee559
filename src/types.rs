//! Core data types used throughout replayvc
//!
//! This module contains the data model shared by the parser, the executor,
//! the checkpoint manager and the verification engine.
//!
//! ## Overview
//!
//! - **History**: `Revision`, `Operation`, `OperationKind` - what the source
//!   recorded, read-only once parsed
//! - **Classification**: `RevisionClass` - how a revision must be handled
//! - **Replay**: `ReplayPhase`, `ReplicationStrategy`, `RevisionOutcome`,
//!   `RunSummary` - what happened when a revision was replayed
//! - **Progress**: `ProgressInfo`, `ProgressCallback` - feedback for
//!   long-running fetches
//!
//! ## Examples
//!
//! ```rust
//! use replayvc::types::{Operation, OperationKind};
//!
//! let op = Operation::new(OperationKind::Edit, "$/Project/src/main.cs");
//! assert_eq!(op.extension(), Some("cs".to_string()));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier of a revision in the source history
pub type RevisionId = u64;

/// One atomic, ordered unit of change in the source history
///
/// Identified once from the source history log and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Monotonically increasing, unique identifier
    pub id: RevisionId,
    /// Free-text check-in comment
    pub comment: Option<String>,
    /// Author display name
    pub author: String,
    /// Timestamp exactly as the source tool printed it
    pub timestamp: Option<String>,
    /// Operations recorded for this revision, in listing order
    pub operations: Vec<Operation>,
}

impl Revision {
    /// Create a revision with no metadata
    pub fn bare(id: RevisionId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Comment text, or an empty string when absent
    pub fn comment_text(&self) -> &str {
        self.comment.as_deref().unwrap_or("")
    }
}

/// Kind of a path-level change recorded in a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// New item
    Add,
    /// Content change
    Edit,
    /// Removal
    Delete,
    /// Move or rename
    Rename,
    /// Item created by branching
    Branch,
    /// Item touched by a merge
    Merge,
}

impl OperationKind {
    /// All kinds, in declaration order
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Add,
        OperationKind::Edit,
        OperationKind::Delete,
        OperationKind::Rename,
        OperationKind::Branch,
        OperationKind::Merge,
    ];

    /// Keyword used by the source tool
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Edit => "edit",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
            OperationKind::Branch => "branch",
            OperationKind::Merge => "merge",
        }
    }

    /// Whether granular replay knows how to apply this kind
    pub fn is_granular(&self) -> bool {
        matches!(self, OperationKind::Add | OperationKind::Edit | OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(OperationKind::Add),
            "edit" => Ok(OperationKind::Edit),
            "delete" => Ok(OperationKind::Delete),
            "rename" => Ok(OperationKind::Rename),
            "branch" => Ok(OperationKind::Branch),
            "merge" => Ok(OperationKind::Merge),
            _ => Err(()),
        }
    }
}

/// A single (kind, path) pair extracted from a revision's details
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    /// What happened to the path
    pub kind: OperationKind,
    /// Repository-rooted, `/`-separated path
    pub path: String,
}

impl Operation {
    /// Create an operation
    pub fn new(kind: OperationKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Lower-cased extension of the final path segment, if it has one
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Classification of a revision with respect to branch topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionClass {
    /// Replayable mechanically
    Regular,
    /// Creates the trunk branch; needs an operator
    TrunkCreating,
    /// Creates a branch off existing history; needs an operator
    BranchCreating,
}

impl RevisionClass {
    /// Whether the executor must halt before this revision
    pub fn requires_operator(&self) -> bool {
        !matches!(self, RevisionClass::Regular)
    }
}

impl fmt::Display for RevisionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionClass::Regular => f.write_str("regular"),
            RevisionClass::TrunkCreating => f.write_str("trunk-creating"),
            RevisionClass::BranchCreating => f.write_str("branch-creating"),
        }
    }
}

/// States of the per-revision replay state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPhase {
    /// Not started
    Idle,
    /// Retrieving the source tree as of the revision
    FetchingSnapshot,
    /// Applying operations (granular or bulk) to the target working copy
    ApplyingOperations,
    /// Checking that something is actually pending
    StagingChanges,
    /// Checking in, with conflict resolution and retries
    CommittingRevision,
    /// Terminal: committed or recorded as a no-op
    Success,
    /// Terminal: gave up on this revision
    Failed,
}

impl ReplayPhase {
    /// Whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayPhase::Success | ReplayPhase::Failed)
    }
}

/// How the changes of a revision were transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStrategy {
    /// One operation at a time from the extracted list
    Granular,
    /// Full mirror plus reconcile
    Bulk,
}

/// Final status of a replayed revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Changes were checked in
    Committed,
    /// Reconciliation found nothing to check in
    NoOp,
    /// The revision could not be replayed
    Failed,
}

/// Record of what happened to one revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionOutcome {
    /// Source revision
    pub revision: RevisionId,
    /// Terminal status
    pub status: OutcomeStatus,
    /// Phase the state machine was in when it gave up
    pub failed_in: Option<ReplayPhase>,
    /// Strategy that produced the staged changes
    pub strategy: Option<ReplicationStrategy>,
    /// Number of pending changes at commit time
    pub changes_staged: usize,
    /// Commit attempts made
    pub attempts: u32,
    /// Comment used for the check-in
    pub commit_comment: Option<String>,
    /// Failure reason, if any
    pub failure: Option<String>,
    /// Wall-clock time in milliseconds
    pub duration_ms: u64,
}

impl RevisionOutcome {
    /// Whether the outcome counts as a success
    pub fn is_success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed)
    }
}

/// Why a run stopped before exhausting its queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltInfo {
    /// Revision that needs operator action
    pub revision: RevisionId,
    /// Its classification
    pub class: RevisionClass,
    /// Where the checkpoint was written
    pub state_path: std::path::PathBuf,
    /// Where the operator instructions were written
    pub instructions_path: std::path::PathBuf,
}

/// Aggregate result of one executor run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Per-revision outcomes in processing order
    pub outcomes: Vec<RevisionOutcome>,
    /// Revisions committed
    pub committed: usize,
    /// Revisions recorded as no-ops
    pub no_ops: usize,
    /// Revisions that failed
    pub failed: usize,
    /// Last revision that reached a terminal state
    pub last_processed: Option<RevisionId>,
    /// Set when the run stopped for an operator
    pub halt: Option<HaltInfo>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl RunSummary {
    /// Fold an outcome into the counters
    pub fn record(&mut self, outcome: RevisionOutcome) {
        match outcome.status {
            OutcomeStatus::Committed => self.committed += 1,
            OutcomeStatus::NoOp => self.no_ops += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
        self.last_processed = Some(outcome.revision);
        self.outcomes.push(outcome);
    }

    /// Whether the run halted for an operator
    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    /// Ids of failed revisions
    pub fn failed_revisions(&self) -> Vec<RevisionId> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.revision)
            .collect()
    }
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Revision the operation belongs to
    pub revision: Option<RevisionId>,
    /// Position of the revision in the queue (1-based)
    pub processed: usize,
    /// Queue length
    pub total: Option<usize>,
    /// Time spent in the current operation
    pub elapsed_ms: u64,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}
