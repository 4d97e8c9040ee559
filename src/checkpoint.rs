//! Migration state and operator hand-off
//!
//! When the executor reaches a revision that needs manual work (a trunk or
//! branch creation) it stops and persists a [`MigrationState`] alongside an
//! instructions file. The operator performs the manual step, then resumes
//! from the persisted queue.
//!
//! ## State Integrity
//!
//! Each state carries a SHA-256 `state_hash` over its contents. A state
//! whose hash does not match is refused on load rather than silently
//! resuming from an edited or truncated queue.
//!
//! ## Examples
//!
//! ```rust
//! use replayvc::checkpoint::MigrationState;
//!
//! // Queue [10, 11, 12]; 10 is done and 11 needs the operator
//! let state = MigrationState::from_history("run-1", &[10, 11, 12], Some(10))
//!     .paused_at(11, replayvc::RevisionClass::BranchCreating);
//! assert_eq!(state.remaining_queue, vec![12]);
//! assert!(state.verify_integrity());
//! ```

use crate::config::{BranchDirective, MigrationConfig, RepositoryCoordinates};
use crate::error::{ReplayError, Result};
use crate::types::{RevisionClass, RevisionId};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the persisted state inside the checkpoint directory
pub const STATE_FILE: &str = "migration_state.json";

/// File name of the operator instructions inside the checkpoint directory
pub const INSTRUCTIONS_FILE: &str = "RESUME_INSTRUCTIONS.md";

/// Process exit code signalling "stopped, operator action required"
pub const EXIT_NEEDS_OPERATOR: i32 = 3;

/// Version of the persisted state layout
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Information about the host that wrote a state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Hostname
    pub hostname: String,
    /// Operating system
    pub os: String,
    /// Architecture
    pub arch: String,
    /// Username (if available)
    pub username: Option<String>,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            hostname: hostname::get()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            username: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .ok(),
        }
    }
}

/// Resumable progress of a migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationState {
    /// Layout version
    pub format_version: u32,
    /// Identifier shared by every run of the same migration
    pub migration_id: String,
    /// Last revision that reached a terminal state
    pub last_processed_revision: Option<RevisionId>,
    /// Revision awaiting operator action, if the run halted
    pub paused_at_revision: Option<RevisionId>,
    /// Classification of the paused revision
    pub paused_class: Option<RevisionClass>,
    /// Revisions still to replay, in order
    pub remaining_queue: Vec<RevisionId>,
    /// Source coordinates, when known
    pub source: Option<RepositoryCoordinates>,
    /// Target coordinates, when known
    pub target: Option<RepositoryCoordinates>,
    /// Host that wrote the state
    pub host_info: HostInfo,
    /// When the state was written
    pub updated_at: DateTime<Utc>,
    /// SHA-256 over the fields above
    pub state_hash: String,
}

impl MigrationState {
    /// Create a state with an explicit queue
    pub fn new(
        migration_id: impl Into<String>,
        last_processed_revision: Option<RevisionId>,
        remaining_queue: Vec<RevisionId>,
    ) -> Self {
        let mut state = Self {
            format_version: STATE_FORMAT_VERSION,
            migration_id: migration_id.into(),
            last_processed_revision,
            paused_at_revision: None,
            paused_class: None,
            remaining_queue,
            source: None,
            target: None,
            host_info: HostInfo::default(),
            updated_at: Utc::now(),
            state_hash: String::new(),
        };
        state.state_hash = state.compute_state_hash();
        state
    }

    /// Derive the queue from full history: every id greater than the last
    /// processed one, in history order
    pub fn from_history(
        migration_id: impl Into<String>,
        history: &[RevisionId],
        last_processed_revision: Option<RevisionId>,
    ) -> Self {
        let remaining = remaining_after(history, last_processed_revision);
        Self::new(migration_id, last_processed_revision, remaining)
    }

    /// Mark the state as paused at `revision`
    ///
    /// The paused revision leaves the queue; the operator replays it by hand.
    pub fn paused_at(mut self, revision: RevisionId, class: RevisionClass) -> Self {
        self.remaining_queue.retain(|id| *id != revision);
        self.paused_at_revision = Some(revision);
        self.paused_class = Some(class);
        self.state_hash = self.compute_state_hash();
        self
    }

    /// Attach repository coordinates from a configuration
    pub fn with_coordinates(mut self, config: &MigrationConfig) -> Self {
        self.source = Some(config.source.clone());
        self.target = Some(config.target.clone());
        self.state_hash = self.compute_state_hash();
        self
    }

    /// Whether the state records a halt awaiting the operator
    pub fn is_paused(&self) -> bool {
        self.paused_at_revision.is_some()
    }

    /// Compute the state hash from every other field
    pub fn compute_state_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.format_version.to_le_bytes());
        hasher.update(&self.migration_id);
        hasher.update(optional_id(self.last_processed_revision));
        hasher.update(optional_id(self.paused_at_revision));
        hasher.update(self.paused_class.map(|c| c.to_string()).unwrap_or_default());
        for id in &self.remaining_queue {
            hasher.update(id.to_le_bytes());
        }
        for coords in [&self.source, &self.target] {
            if let Ok(bytes) = serde_json::to_vec(coords) {
                hasher.update(&bytes);
            }
        }
        if let Ok(bytes) = serde_json::to_vec(&self.host_info) {
            hasher.update(&bytes);
        }
        hasher.update(self.updated_at.to_rfc3339());

        hex::encode(hasher.finalize())
    }

    /// Whether the stored hash matches the contents
    pub fn verify_integrity(&self) -> bool {
        self.compute_state_hash() == self.state_hash
    }
}

fn optional_id(id: Option<RevisionId>) -> String {
    id.map(|v| v.to_string()).unwrap_or_default()
}

/// Ids of `history` strictly after `last_processed`, preserving order
pub fn remaining_after(history: &[RevisionId], last_processed: Option<RevisionId>) -> Vec<RevisionId> {
    match last_processed {
        Some(last) => history.iter().copied().filter(|id| *id > last).collect(),
        None => history.to_vec(),
    }
}

/// Reads and writes migration state and operator instructions
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Manager rooted at a checkpoint directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Manager for a configuration's checkpoint directory
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(config.checkpoint_dir.clone())
    }

    /// Checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Path of the instructions file
    pub fn instructions_path(&self) -> PathBuf {
        self.dir.join(INSTRUCTIONS_FILE)
    }

    /// Whether a state file exists
    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    /// Persist a state atomically
    pub fn save(&self, state: &MigrationState) -> Result<PathBuf> {
        let path = self.state_path();
        let json = serde_json::to_string_pretty(state)?;
        utils::atomic_write(&path, json.as_bytes())?;
        debug!(
            "Saved migration state ({} remaining) to {:?}",
            state.remaining_queue.len(),
            path
        );
        Ok(path)
    }

    /// Load and integrity-check the persisted state
    pub fn load(&self) -> Result<MigrationState> {
        let path = self.state_path();
        if !path.exists() {
            return Err(ReplayError::CheckpointNotFound(path));
        }
        let text = fs::read_to_string(&path)?;
        let state: MigrationState = serde_json::from_str(&text)
            .map_err(|e| ReplayError::CheckpointCorrupted(format!("unreadable state: {}", e)))?;

        if state.format_version > STATE_FORMAT_VERSION {
            return Err(ReplayError::CheckpointCorrupted(format!(
                "state format {} is newer than supported {}",
                state.format_version, STATE_FORMAT_VERSION
            )));
        }
        if !state.verify_integrity() {
            warn!("Migration state at {:?} failed its integrity check", path);
            return Err(ReplayError::CheckpointCorrupted("state hash mismatch".to_string()));
        }
        Ok(state)
    }

    /// Persist a halted state plus operator instructions
    ///
    /// Returns the state and instructions paths.
    pub fn halt(
        &self,
        state: &MigrationState,
        directive: Option<&BranchDirective>,
    ) -> Result<(PathBuf, PathBuf)> {
        let state_path = self.save(state)?;
        let instructions_path = self.instructions_path();
        let text = render_instructions(state, directive);
        utils::atomic_write(&instructions_path, text.as_bytes())?;
        info!(
            "Halted at revision {:?}; instructions written to {:?}",
            state.paused_at_revision, instructions_path
        );
        Ok((state_path, instructions_path))
    }

    /// Remove the state and instructions files
    pub fn clear(&self) -> Result<()> {
        for path in [self.state_path(), self.instructions_path()] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// Render the operator instructions for a halted state
pub fn render_instructions(state: &MigrationState, directive: Option<&BranchDirective>) -> String {
    let mut out = String::new();
    let revision = optional_id(state.paused_at_revision);
    let class = state
        .paused_class
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let target_root = state
        .target
        .as_ref()
        .map(|t| t.root.clone())
        .unwrap_or_else(|| "$/<target root>".to_string());

    let _ = writeln!(out, "# Migration paused at revision {}", revision);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Classification: {}", class);
    let _ = writeln!(
        out,
        "- Last replayed revision: {}",
        state
            .last_processed_revision
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    let _ = writeln!(out, "- Remaining revisions: {}", state.remaining_queue.len());
    if let Some(next) = state.remaining_queue.first() {
        let _ = writeln!(out, "- Next revision after resume: {}", next);
    }
    let _ = writeln!(out, "- Written by: {} ({})", state.host_info.hostname, state.updated_at.to_rfc3339());
    let _ = writeln!(out);

    if let Some(directive) = directive {
        let _ = writeln!(out, "## Operator directive for this revision");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Branch source: `{}`", directive.source_path);
        let _ = writeln!(out, "- Branch target: `{}`", directive.target_path);
        if let Some(comment) = &directive.comment {
            let _ = writeln!(out, "- Comment: {}", comment);
        }
        let _ = writeln!(out);
    }

    let source_hint = directive
        .map(|d| d.source_path.clone())
        .unwrap_or_else(|| format!("{}/<existing branch>", target_root));
    let target_hint = directive
        .map(|d| d.target_path.clone())
        .unwrap_or_else(|| format!("{}/<new branch>", target_root));

    let _ = writeln!(out, "## Procedure A: convert a folder to the trunk");
    let _ = writeln!(out);
    let _ = writeln!(out, "1. Make sure every pending change in the target working copy is checked in.");
    let _ = writeln!(out, "2. In the target repository, convert `{}/<trunk folder>` to a branch.", target_root);
    let _ = writeln!(out, "3. Record the revision created by the conversion for the verification report.");
    let _ = writeln!(out);

    let _ = writeln!(out, "## Procedure B: branch from an existing branch");
    let _ = writeln!(out);
    let _ = writeln!(out, "1. Create the branch:");
    let _ = writeln!(out, "   `tf branch {} {} /noprompt`", source_hint, target_hint);
    let _ = writeln!(
        out,
        "2. Check it in with comment `#{}: <source comment> (<author>)` so cross-referencing finds it.",
        revision
    );
    let _ = writeln!(out, "3. Bring the branch content to the state of revision {} if it differs.", revision);
    let _ = writeln!(out);

    let _ = writeln!(out, "## Procedure C: branch within a new folder");
    let _ = writeln!(out);
    let _ = writeln!(out, "1. Create and check in the new parent folder under `{}`.", target_root);
    let _ = writeln!(out, "2. Follow procedure B with the branch target inside that folder.");
    let _ = writeln!(out, "3. Convert the new branch folder to a branch if the tool did not do so.");
    let _ = writeln!(out);

    let _ = writeln!(out, "## Resume");
    let _ = writeln!(out);
    let _ = writeln!(out, "Once the manual step is checked in, run:");
    let _ = writeln!(out);
    let _ = writeln!(out, "    replayvc resume");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Only the remaining queue is replayed; revision {} will not be replayed again.",
        revision
    );
    out
}
