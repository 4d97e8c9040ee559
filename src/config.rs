//! Migration configuration
//!
//! A [`MigrationConfig`] is built once, validated, and then passed by
//! reference into the classifier, the executor and the verification engine.
//! It can be assembled in code with [`MigrationConfigBuilder`] or loaded from
//! a JSON file.
//!
//! ## Examples
//!
//! ```rust
//! use replayvc::config::{MigrationConfigBuilder, RepositoryCoordinates};
//!
//! # fn main() -> replayvc::Result<()> {
//! let config = MigrationConfigBuilder::new()
//!     .source(RepositoryCoordinates::new("https://dev.example.com/old", "$/Legacy", "/work/src"))
//!     .target(RepositoryCoordinates::new("https://dev.example.com/new", "$/Modern", "/work/dst"))
//!     .branch_creating([7, 11])
//!     .commit_attempts(3)
//!     .build()?;
//!
//! assert!(config.branch_creating.contains(&7));
//! # Ok(())
//! # }
//! ```

use crate::error::{ReplayError, Result};
use crate::types::RevisionId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Location of one side of the migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCoordinates {
    /// Server collection URL
    pub collection: String,
    /// Server root path, e.g. `$/Project`
    pub root: String,
    /// Local working-copy directory mapped to `root`
    pub local_path: PathBuf,
    /// Workspace name, if the tool needs one
    #[serde(default)]
    pub workspace: Option<String>,
}

impl RepositoryCoordinates {
    /// Coordinates without a workspace name
    pub fn new(collection: impl Into<String>, root: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            collection: collection.into(),
            root: root.into(),
            local_path: local_path.into(),
            workspace: None,
        }
    }
}

/// Operator-curated details of a branch-creating revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDirective {
    /// Branch the new one is created from
    pub source_path: String,
    /// Path of the new branch
    pub target_path: String,
    /// Comment to use when recreating it
    #[serde(default)]
    pub comment: Option<String>,
}

/// Settings of the verification pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Number of files sampled for content comparison
    pub sample_size: usize,
    /// Number of most recent revisions cross-referenced
    pub history_depth: usize,
    /// Percentage of source ids that must be referenced by the target
    pub id_match_threshold: f64,
    /// Seed for the content sample, for reproducible runs
    pub seed: Option<u64>,
    /// Where reports are written
    pub results_dir: PathBuf,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            sample_size: 50,
            history_depth: 50,
            id_match_threshold: 87.0,
            seed: None,
            results_dir: PathBuf::from("verification"),
        }
    }
}

fn default_commit_attempts() -> u32 {
    3
}

fn default_max_comment_length() -> usize {
    256
}

fn default_metadata_dirs() -> Vec<String> {
    vec!["$tf".to_string(), ".tf".to_string()]
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".replayvc")
}

fn default_tool() -> String {
    "tf".to_string()
}

fn default_true() -> bool {
    true
}

/// Immutable configuration for a migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Repository history is read from
    pub source: RepositoryCoordinates,
    /// Repository history is replayed into
    pub target: RepositoryCoordinates,
    /// Revisions that create the trunk
    #[serde(default)]
    pub trunk_creating: BTreeSet<RevisionId>,
    /// Revisions that create a branch
    #[serde(default)]
    pub branch_creating: BTreeSet<RevisionId>,
    /// Extra details for trunk/branch-creating revisions
    #[serde(default)]
    pub branch_directives: BTreeMap<RevisionId, BranchDirective>,
    /// Check-in attempts per revision
    #[serde(default = "default_commit_attempts")]
    pub commit_attempts: u32,
    /// Upper bound on the synthesized check-in comment
    #[serde(default = "default_max_comment_length")]
    pub max_comment_length: usize,
    /// Directory names the bulk wipe leaves in place
    #[serde(default = "default_metadata_dirs")]
    pub metadata_dirs: Vec<String>,
    /// Glob patterns skipped when mirroring a snapshot
    #[serde(default)]
    pub mirror_ignore: Vec<String>,
    /// Where checkpoint and instructions are written
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Write the migration state after every revision
    #[serde(default = "default_true")]
    pub persist_progress: bool,
    /// Working-copy command-line client
    #[serde(default = "default_tool")]
    pub tool: String,
    /// Verification settings
    #[serde(default)]
    pub verification: VerificationConfig,
}

impl MigrationConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: MigrationConfig = serde_json::from_str(&text)?;
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        crate::utils::atomic_write(path, json.as_bytes())
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> Result<()> {
        for (side, coords) in [("source", &self.source), ("target", &self.target)] {
            if coords.root.trim().is_empty() {
                return Err(ReplayError::config(format!("{} root path is empty", side)));
            }
            if coords.local_path.as_os_str().is_empty() {
                return Err(ReplayError::config(format!("{} local path is empty", side)));
            }
        }
        if self.source.local_path == self.target.local_path {
            return Err(ReplayError::config(
                "source and target must use different local working copies",
            ));
        }
        if let Some(id) = self.trunk_creating.intersection(&self.branch_creating).next() {
            return Err(ReplayError::config(format!(
                "revision {} is listed as both trunk-creating and branch-creating",
                id
            )));
        }
        if self.commit_attempts == 0 {
            return Err(ReplayError::config("commit_attempts must be at least 1"));
        }
        if self.max_comment_length < 16 {
            return Err(ReplayError::config("max_comment_length must be at least 16"));
        }
        let threshold = self.verification.id_match_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ReplayError::config(format!(
                "id_match_threshold {} is outside 0..=100",
                threshold
            )));
        }
        Ok(())
    }

    /// Path of the persisted migration state
    pub fn state_path(&self) -> PathBuf {
        self.checkpoint_dir.join(crate::checkpoint::STATE_FILE)
    }
}

/// Builder for [`MigrationConfig`]
///
/// Every field other than the two coordinates has a default.
#[derive(Debug, Clone)]
pub struct MigrationConfigBuilder {
    source: Option<RepositoryCoordinates>,
    target: Option<RepositoryCoordinates>,
    trunk_creating: BTreeSet<RevisionId>,
    branch_creating: BTreeSet<RevisionId>,
    branch_directives: BTreeMap<RevisionId, BranchDirective>,
    commit_attempts: u32,
    max_comment_length: usize,
    metadata_dirs: Vec<String>,
    mirror_ignore: Vec<String>,
    checkpoint_dir: PathBuf,
    persist_progress: bool,
    tool: String,
    verification: VerificationConfig,
}

impl MigrationConfigBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            source: None,
            target: None,
            trunk_creating: BTreeSet::new(),
            branch_creating: BTreeSet::new(),
            branch_directives: BTreeMap::new(),
            commit_attempts: default_commit_attempts(),
            max_comment_length: default_max_comment_length(),
            metadata_dirs: default_metadata_dirs(),
            mirror_ignore: Vec::new(),
            checkpoint_dir: default_checkpoint_dir(),
            persist_progress: true,
            tool: default_tool(),
            verification: VerificationConfig::default(),
        }
    }

    /// Set the source coordinates
    pub fn source(mut self, coords: RepositoryCoordinates) -> Self {
        self.source = Some(coords);
        self
    }

    /// Set the target coordinates
    pub fn target(mut self, coords: RepositoryCoordinates) -> Self {
        self.target = Some(coords);
        self
    }

    /// Revisions that create the trunk
    pub fn trunk_creating(mut self, ids: impl IntoIterator<Item = RevisionId>) -> Self {
        self.trunk_creating.extend(ids);
        self
    }

    /// Revisions that create a branch
    pub fn branch_creating(mut self, ids: impl IntoIterator<Item = RevisionId>) -> Self {
        self.branch_creating.extend(ids);
        self
    }

    /// Attach operator details to a trunk/branch-creating revision
    pub fn branch_directive(mut self, id: RevisionId, directive: BranchDirective) -> Self {
        self.branch_directives.insert(id, directive);
        self
    }

    /// Check-in attempts per revision
    pub fn commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts;
        self
    }

    /// Upper bound on synthesized comments
    pub fn max_comment_length(mut self, length: usize) -> Self {
        self.max_comment_length = length;
        self
    }

    /// Directories preserved by the bulk wipe
    pub fn metadata_dirs(mut self, dirs: Vec<String>) -> Self {
        self.metadata_dirs = dirs;
        self
    }

    /// Glob patterns skipped while mirroring
    pub fn mirror_ignore(mut self, patterns: Vec<String>) -> Self {
        self.mirror_ignore = patterns;
        self
    }

    /// Checkpoint directory
    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// Persist state after every revision
    pub fn persist_progress(mut self, persist: bool) -> Self {
        self.persist_progress = persist;
        self
    }

    /// Working-copy client program
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Verification settings
    pub fn verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = verification;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<MigrationConfig> {
        let source = self
            .source
            .ok_or_else(|| ReplayError::config("source coordinates are required"))?;
        let target = self
            .target
            .ok_or_else(|| ReplayError::config("target coordinates are required"))?;

        let config = MigrationConfig {
            source,
            target,
            trunk_creating: self.trunk_creating,
            branch_creating: self.branch_creating,
            branch_directives: self.branch_directives,
            commit_attempts: self.commit_attempts,
            max_comment_length: self.max_comment_length,
            metadata_dirs: self.metadata_dirs,
            mirror_ignore: self.mirror_ignore,
            checkpoint_dir: self.checkpoint_dir,
            persist_progress: self.persist_progress,
            tool: self.tool,
            verification: self.verification,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for MigrationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
