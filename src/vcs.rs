//! Version-control interfaces and command-line adapters
//!
//! The replay engine talks to the outside world through two narrow traits:
//!
//! - [`RepositoryClient`]: read access to a server repository (revision
//!   detail and snapshot, revision listing, path listing, raw content,
//!   labels)
//! - [`WorkingCopy`]: the local working copy of the target, against which
//!   changes are staged, reconciled and checked in
//!
//! [`TfRepositoryClient`] and [`TfWorkingCopy`] implement them by shelling
//! out to the `tf` command-line client. Tests substitute in-process doubles.

use crate::config::RepositoryCoordinates;
use crate::error::{ReplayError, Result};
use crate::history;
use crate::types::{Revision, RevisionId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use tracing::{debug, trace, warn};

static PENDING_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+change\(s\)").expect("pending count regex must compile"));

static CHECKED_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)changeset\s+#?(\d+)\s+checked in").expect("check-in receipt regex must compile")
});

/// An item listed under a repository scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryItem {
    /// Repository-rooted path
    pub path: String,
    /// Whether the item is a folder
    pub is_folder: bool,
    /// Size in bytes, when the listing reports it
    pub size: Option<u64>,
}

impl RepositoryItem {
    /// A file item
    pub fn file(path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            is_folder: false,
            size,
        }
    }

    /// A folder item
    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_folder: true,
            size: None,
        }
    }
}

/// Read access to a server repository
pub trait RepositoryClient: Send + Sync {
    /// Materialize the tree as of `revision` into `destination`
    fn fetch_snapshot(&self, revision: RevisionId, destination: &Path) -> Result<()>;

    /// Detail text of one revision (metadata and changed items)
    fn revision_detail(&self, revision: RevisionId) -> Result<String>;

    /// Most recent revisions, newest first, at most `top`
    fn list_revisions(&self, top: usize) -> Result<Vec<Revision>>;

    /// Every item under `scope`, recursively, including `scope` itself
    fn list_items(&self, scope: &str) -> Result<Vec<RepositoryItem>>;

    /// Raw bytes of a file at its latest version
    fn fetch_content(&self, path: &str) -> Result<Vec<u8>>;

    /// Label names, or `None` when the repository has no label concept
    fn list_labels(&self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Result of staging a single change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The change is now pending
    Staged,
    /// The item was already under version control; benign
    AlreadyTracked,
    /// The tool rejected the change
    Failed(String),
}

impl StageOutcome {
    /// Whether the outcome leaves the working copy in the intended state
    pub fn is_ok(&self) -> bool {
        !matches!(self, StageOutcome::Failed(_))
    }
}

/// How conflicting pending changes are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the locally staged content
    KeepLocal,
    /// Take the server's content
    TakeServer,
}

/// Result of asking the working copy to detect changes on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Changes were detected and pended; the count may be zero
    Detected(usize),
    /// The working copy cannot detect changes; stage explicitly instead
    Unsupported,
}

/// Receipt of a successful check-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Revision created in the target, when the tool reports it
    pub revision: Option<RevisionId>,
    /// Raw tool output
    pub output: String,
}

/// A local working copy of the target repository
///
/// Methods take `&mut self`: one writer per working copy.
pub trait WorkingCopy {
    /// Local root directory
    fn root(&self) -> &Path;

    /// Pend an add for a file that now exists locally
    fn stage_add(&mut self, path: &Path) -> StageOutcome;

    /// Check out an existing file for modification
    fn stage_edit(&mut self, path: &Path) -> StageOutcome;

    /// Pend a delete
    fn stage_delete(&mut self, path: &Path) -> StageOutcome;

    /// Pend an add for everything under the root
    fn stage_all(&mut self) -> StageOutcome;

    /// Detect adds, edits and deletes relative to the server
    fn reconcile(&mut self) -> Result<ReconcileOutcome>;

    /// Number of pending changes
    fn pending_changes(&mut self) -> Result<usize>;

    /// Check in everything pending
    fn commit(&mut self, comment: &str) -> Result<CommitReceipt>;

    /// Resolve conflicts among pending changes
    fn resolve_conflicts(&mut self, policy: ConflictPolicy) -> Result<()>;
}

/// Captured output of a tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Whether the process exited successfully
    pub success: bool,
    /// Raw stdout
    pub stdout: Vec<u8>,
    /// Stderr, lossily decoded
    pub stderr: String,
}

impl ToolOutput {
    /// Stdout, lossily decoded
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Stdout and stderr together, for message matching
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout_text(), self.stderr)
    }

    fn into_result(self, program: &str, args: &[String]) -> Result<ToolOutput> {
        if self.success {
            return Ok(self);
        }
        let stderr = self.stderr.trim().to_string();
        let message = if stderr.is_empty() {
            "unknown error".to_string()
        } else {
            stderr
        };
        Err(ReplayError::CommandFailed {
            program: program.to_string(),
            args: args.join(" "),
            message,
        })
    }
}

/// Run a tool, returning its output whatever the exit status
///
/// Only a failure to start the process is an error.
pub fn run_tool(program: &str, cwd: Option<&Path>, args: &[String]) -> Result<ToolOutput> {
    debug!("Executing: {} {}", program, args.join(" "));
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command.output().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ReplayError::ToolNotInstalled(program.to_string())
        } else {
            ReplayError::CommandFailed {
                program: program.to_string(),
                args: args.join(" "),
                message: err.to_string(),
            }
        }
    })?;

    Ok(ToolOutput {
        success: output.status.success(),
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// [`RepositoryClient`] backed by the `tf` command-line client
#[derive(Debug, Clone)]
pub struct TfRepositoryClient {
    tool: String,
    coordinates: RepositoryCoordinates,
}

impl TfRepositoryClient {
    /// Create a client for one side of the migration
    pub fn new(tool: impl Into<String>, coordinates: RepositoryCoordinates) -> Self {
        Self {
            tool: tool.into(),
            coordinates,
        }
    }

    fn collection_arg(&self) -> String {
        format!("/collection:{}", self.coordinates.collection)
    }

    fn run(&self, cwd: Option<&Path>, args: Vec<String>) -> Result<ToolOutput> {
        run_tool(&self.tool, cwd, &args)?.into_result(&self.tool, &args)
    }
}

impl RepositoryClient for TfRepositoryClient {
    fn fetch_snapshot(&self, revision: RevisionId, destination: &Path) -> Result<()> {
        std::fs::create_dir_all(destination)?;
        let args = vec![
            "get".to_string(),
            self.coordinates.root.clone(),
            format!("/version:C{}", revision),
            "/recursive".to_string(),
            "/force".to_string(),
            "/noprompt".to_string(),
        ];
        self.run(Some(destination), args)
            .map(|_| ())
            .map_err(|e| ReplayError::SnapshotFailed {
                revision,
                reason: e.to_string(),
            })
    }

    fn revision_detail(&self, revision: RevisionId) -> Result<String> {
        let args = vec![
            "changeset".to_string(),
            revision.to_string(),
            self.collection_arg(),
            "/noprompt".to_string(),
        ];
        Ok(self.run(None, args)?.stdout_text())
    }

    fn list_revisions(&self, top: usize) -> Result<Vec<Revision>> {
        let args = vec![
            "history".to_string(),
            self.coordinates.root.clone(),
            "/recursive".to_string(),
            "/noprompt".to_string(),
            "/format:detailed".to_string(),
            format!("/stopafter:{}", top),
            self.collection_arg(),
        ];
        let text = self.run(None, args)?.stdout_text();
        let mut revisions = history::parse_revisions(&text);
        revisions.reverse();
        revisions.truncate(top);
        Ok(revisions)
    }

    fn list_items(&self, scope: &str) -> Result<Vec<RepositoryItem>> {
        let args = vec![
            "dir".to_string(),
            scope.to_string(),
            "/recursive".to_string(),
            self.collection_arg(),
        ];
        let text = self.run(None, args)?.stdout_text();
        Ok(parse_dir_listing(scope, &text))
    }

    fn fetch_content(&self, path: &str) -> Result<Vec<u8>> {
        let args = vec![
            "view".to_string(),
            path.to_string(),
            "/console".to_string(),
            self.collection_arg(),
        ];
        Ok(self.run(None, args)?.stdout)
    }

    fn list_labels(&self) -> Result<Option<Vec<String>>> {
        let args = vec![
            "labels".to_string(),
            "/owner:*".to_string(),
            self.collection_arg(),
        ];
        let text = self.run(None, args)?.stdout_text();
        Ok(Some(parse_label_listing(&text)))
    }
}

/// Parse a recursive `dir` listing into items
///
/// Folder headers end with `:`, sub-folders are prefixed with `$`, and a
/// trailing `N item(s)` line closes the listing.
pub fn parse_dir_listing(scope: &str, text: &str) -> Vec<RepositoryItem> {
    let scope = scope.trim_end_matches('/');
    let mut items = vec![RepositoryItem::folder(scope)];
    let mut current: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.ends_with("item(s)") {
            continue;
        }
        if trimmed.starts_with("$/") && trimmed.ends_with(':') {
            current = Some(trimmed.trim_end_matches(':').to_string());
            continue;
        }
        let Some(folder) = current.as_deref() else {
            trace!("Ignoring dir line outside a folder block: {}", trimmed);
            continue;
        };
        match trimmed.strip_prefix('$') {
            Some(name) => items.push(RepositoryItem::folder(format!("{}/{}", folder, name))),
            None => items.push(RepositoryItem::file(format!("{}/{}", folder, trimmed), None)),
        }
    }

    items.sort_by(|a, b| a.path.cmp(&b.path));
    items.dedup_by(|a, b| a.path == b.path);
    items
}

/// Parse a `labels` listing: a header row, a dashed rule, then one label per row
pub fn parse_label_listing(text: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut past_rule = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("---") {
            past_rule = true;
            continue;
        }
        if !past_rule || trimmed.is_empty() {
            continue;
        }
        if let Some(name) = trimmed.split_whitespace().next() {
            labels.push(name.to_string());
        }
    }
    labels.sort();
    labels.dedup();
    labels
}

/// How [`TfWorkingCopy`] detects changes during bulk replication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Use the tool's reconcile command
    Reconcile,
    /// Report reconcile as unsupported; callers stage a blanket add
    BlanketAdd,
}

/// [`WorkingCopy`] backed by the `tf` command-line client
#[derive(Debug, Clone)]
pub struct TfWorkingCopy {
    tool: String,
    root: PathBuf,
    mode: ReconcileMode,
}

impl TfWorkingCopy {
    /// Working copy rooted at `root`, using reconcile when bulk-replicating
    pub fn new(tool: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            root: root.into(),
            mode: ReconcileMode::Reconcile,
        }
    }

    /// Choose how bulk replication detects changes
    pub fn with_reconcile_mode(mut self, mode: ReconcileMode) -> Self {
        self.mode = mode;
        self
    }

    fn stage(&self, args: Vec<String>) -> StageOutcome {
        match run_tool(&self.tool, Some(&self.root), &args) {
            Ok(output) if output.success => StageOutcome::Staged,
            Ok(output) => {
                let text = output.combined();
                if is_already_tracked(&text) {
                    StageOutcome::AlreadyTracked
                } else {
                    StageOutcome::Failed(text.trim().to_string())
                }
            }
            Err(e) => StageOutcome::Failed(e.to_string()),
        }
    }

    fn path_arg(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }
}

/// Whether tool output says the item was already under version control
pub fn is_already_tracked(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("already has pending")
        || lower.contains("already exists")
        || lower.contains("no arguments matched any files to add")
}

impl WorkingCopy for TfWorkingCopy {
    fn root(&self) -> &Path {
        &self.root
    }

    fn stage_add(&mut self, path: &Path) -> StageOutcome {
        self.stage(vec!["add".to_string(), Self::path_arg(path), "/noprompt".to_string()])
    }

    fn stage_edit(&mut self, path: &Path) -> StageOutcome {
        self.stage(vec!["checkout".to_string(), Self::path_arg(path), "/noprompt".to_string()])
    }

    fn stage_delete(&mut self, path: &Path) -> StageOutcome {
        self.stage(vec!["delete".to_string(), Self::path_arg(path), "/noprompt".to_string()])
    }

    fn stage_all(&mut self) -> StageOutcome {
        self.stage(args(["add", "*", "/recursive", "/noprompt"]))
    }

    fn reconcile(&mut self) -> Result<ReconcileOutcome> {
        if self.mode == ReconcileMode::BlanketAdd {
            return Ok(ReconcileOutcome::Unsupported);
        }
        let reconcile_args = args([
            "reconcile", "/promote", "/adds", "/deletes", "/diff", "/recursive", "/noprompt", ".",
        ]);
        let output = run_tool(&self.tool, Some(&self.root), &reconcile_args)?;
        if !output.success {
            let text = output.combined().to_ascii_lowercase();
            if text.contains("unrecognized command") || text.contains("not supported") {
                warn!("Reconcile is not available; falling back to blanket add");
                return Ok(ReconcileOutcome::Unsupported);
            }
            output.into_result(&self.tool, &reconcile_args)?;
        }
        Ok(ReconcileOutcome::Detected(self.pending_changes()?))
    }

    fn pending_changes(&mut self) -> Result<usize> {
        let status_args = args(["status", ".", "/recursive", "/noprompt"]);
        let output = run_tool(&self.tool, Some(&self.root), &status_args)?
            .into_result(&self.tool, &status_args)?;
        Ok(parse_pending_count(&output.stdout_text()))
    }

    fn commit(&mut self, comment: &str) -> Result<CommitReceipt> {
        let checkin_args = vec![
            "checkin".to_string(),
            format!("/comment:{}", comment),
            "/recursive".to_string(),
            "/noprompt".to_string(),
        ];
        let output = run_tool(&self.tool, Some(&self.root), &checkin_args)?
            .into_result(&self.tool, &checkin_args)?;
        let text = output.combined();
        Ok(CommitReceipt {
            revision: parse_checkin_receipt(&text),
            output: text,
        })
    }

    fn resolve_conflicts(&mut self, policy: ConflictPolicy) -> Result<()> {
        let auto = match policy {
            ConflictPolicy::KeepLocal => "/auto:KeepYours",
            ConflictPolicy::TakeServer => "/auto:TakeTheirs",
        };
        let resolve_args = args(["resolve", ".", auto, "/recursive", "/noprompt"]);
        run_tool(&self.tool, Some(&self.root), &resolve_args)?.into_result(&self.tool, &resolve_args)?;
        Ok(())
    }
}

/// Number of pending changes reported by `status`
pub fn parse_pending_count(text: &str) -> usize {
    if text.to_ascii_lowercase().contains("no pending changes") {
        return 0;
    }
    PENDING_COUNT
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or_else(|| text.lines().filter(|l| l.contains("$/") || l.contains('\\')).count())
}

/// Revision id from a check-in receipt like `Changeset #123 checked in.`
pub fn parse_checkin_receipt(text: &str) -> Option<RevisionId> {
    CHECKED_IN.captures(text).and_then(|caps| caps[1].parse().ok())
}
