//! In-memory repository doubles shared by the integration suites
//!
//! `FakeSource` serves snapshots and history for a scripted set of
//! revisions. `FakeWorkingCopy` commits the files on disk into a
//! `SharedTarget`, which can then be verified as a repository in its own
//! right.

use ::replayvc::vcs::{
    CommitReceipt, ConflictPolicy, ReconcileOutcome, RepositoryClient, RepositoryItem,
    StageOutcome, WorkingCopy,
};
use ::replayvc::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

/// First id handed out by the fake target
pub const TARGET_FIRST_ID: RevisionId = 5000;

/// One scripted source revision
#[derive(Debug, Clone)]
pub struct ScriptedRevision {
    pub author: String,
    pub comment: String,
    pub operations: Vec<(OperationKind, String)>,
    pub files: BTreeMap<String, String>,
}

/// Source repository with a full snapshot per revision
#[derive(Debug, Clone)]
pub struct FakeSource {
    pub root: String,
    pub revisions: BTreeMap<RevisionId, ScriptedRevision>,
    pub labels: Option<Vec<String>>,
}

impl FakeSource {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            revisions: BTreeMap::new(),
            labels: None,
        }
    }

    /// Add a revision whose snapshot is the previous one with `changes`
    /// applied (`None` deletes the file)
    pub fn revision(
        mut self,
        id: RevisionId,
        author: &str,
        comment: &str,
        changes: &[(&str, Option<&str>)],
    ) -> Self {
        let mut files = self
            .revisions
            .values()
            .next_back()
            .map(|r| r.files.clone())
            .unwrap_or_default();
        let mut operations = Vec::new();
        for (path, body) in changes {
            let kind = match (body, files.contains_key(*path)) {
                (None, _) => OperationKind::Delete,
                (Some(_), true) => OperationKind::Edit,
                (Some(_), false) => OperationKind::Add,
            };
            match body {
                Some(body) => {
                    files.insert(path.to_string(), body.to_string());
                }
                None => {
                    files.remove(*path);
                }
            }
            operations.push((kind, path.to_string()));
        }
        self.revisions.insert(
            id,
            ScriptedRevision {
                author: author.to_string(),
                comment: comment.to_string(),
                operations,
                files,
            },
        );
        self
    }

    /// Add a revision recorded as a branch of `path`
    pub fn branch_revision(mut self, id: RevisionId, author: &str, comment: &str, path: &str) -> Self {
        self = self.revision(id, author, comment, &[(path, Some("branched"))]);
        if let Some(revision) = self.revisions.get_mut(&id) {
            revision.operations = vec![(OperationKind::Branch, path.to_string())];
        }
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = Some(labels.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn ids(&self) -> Vec<RevisionId> {
        self.revisions.keys().copied().collect()
    }

    /// Detail text in the export format
    pub fn detail(&self, id: RevisionId) -> Option<String> {
        let revision = self.revisions.get(&id)?;
        let mut text = format!(
            "Changeset: {}\nUser: {}\nDate: Monday, March 3, 2025 10:00:00 AM\n\nComment:\n  {}\n\nItems:\n",
            id, revision.author, revision.comment
        );
        for (kind, path) in &revision.operations {
            text.push_str(&format!("  {} {}/{}\n", kind, self.root, path));
        }
        Some(text)
    }

    /// Full history export, newest first like the source tool prints it
    pub fn export(&self) -> String {
        let mut blocks: Vec<String> = self.revisions.keys().filter_map(|id| self.detail(*id)).collect();
        blocks.reverse();
        blocks.join("\n------------------------------------------------------------\n")
    }

    fn latest_files(&self) -> BTreeMap<String, String> {
        self.revisions
            .values()
            .next_back()
            .map(|r| r.files.clone())
            .unwrap_or_default()
    }
}

impl RepositoryClient for FakeSource {
    fn fetch_snapshot(&self, revision: RevisionId, destination: &Path) -> Result<()> {
        let scripted = self
            .revisions
            .get(&revision)
            .ok_or(ReplayError::RevisionNotFound(revision))?;
        if destination.exists() {
            fs::remove_dir_all(destination)?;
        }
        fs::create_dir_all(destination)?;
        for (path, body) in &scripted.files {
            let file = operations::local_path(destination, path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(file, body)?;
        }
        Ok(())
    }

    fn revision_detail(&self, revision: RevisionId) -> Result<String> {
        self.detail(revision).ok_or(ReplayError::RevisionNotFound(revision))
    }

    fn list_revisions(&self, top: usize) -> Result<Vec<Revision>> {
        Ok(self
            .revisions
            .iter()
            .rev()
            .take(top)
            .map(|(id, r)| Revision {
                id: *id,
                comment: Some(r.comment.clone()),
                author: r.author.clone(),
                timestamp: None,
                operations: Vec::new(),
            })
            .collect())
    }

    fn list_items(&self, scope: &str) -> Result<Vec<RepositoryItem>> {
        Ok(items_for(scope, self.latest_files().iter().map(|(p, b)| (p.clone(), b.len()))))
    }

    fn fetch_content(&self, path: &str) -> Result<Vec<u8>> {
        let relative = path
            .strip_prefix(&self.root)
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| ReplayError::remote(format!("{} is outside {}", path, self.root)))?;
        self.latest_files()
            .get(relative)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| ReplayError::remote(format!("no such item {}", path)))
    }

    fn list_labels(&self) -> Result<Option<Vec<String>>> {
        Ok(self.labels.clone())
    }
}

/// Listing with the scope folder, intermediate folders and files
fn items_for(scope: &str, files: impl Iterator<Item = (String, usize)>) -> Vec<RepositoryItem> {
    let mut folders = BTreeSet::new();
    let mut items = Vec::new();
    folders.insert(scope.to_string());
    for (path, size) in files {
        let mut prefix = scope.to_string();
        let segments: Vec<&str> = path.split('/').collect();
        for segment in &segments[..segments.len() - 1] {
            prefix = format!("{}/{}", prefix, segment);
            folders.insert(prefix.clone());
        }
        items.push(RepositoryItem::file(format!("{}/{}", scope, path), Some(size as u64)));
    }
    items.extend(folders.into_iter().map(RepositoryItem::folder));
    items.sort_by(|a, b| a.path.cmp(&b.path));
    items
}

/// Committed state of the fake target repository
#[derive(Debug, Default)]
pub struct TargetState {
    pub root: String,
    pub commits: Vec<(RevisionId, String)>,
    pub files: BTreeMap<String, String>,
    pub labels: Option<Vec<String>>,
}

/// Target repository shared between the working copy and the verifier
#[derive(Debug, Clone)]
pub struct SharedTarget(pub Arc<Mutex<TargetState>>);

impl SharedTarget {
    pub fn new(root: &str) -> Self {
        Self(Arc::new(Mutex::new(TargetState {
            root: root.to_string(),
            ..Default::default()
        })))
    }

    pub fn comments(&self) -> Vec<String> {
        self.0.lock().commits.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.0.lock().files.clone()
    }

    /// Record a check-in made outside the replay (an operator's branch)
    pub fn manual_commit(&self, comment: &str, path: &str, body: &str) {
        let mut state = self.0.lock();
        state.files.insert(path.to_string(), body.to_string());
        let id = TARGET_FIRST_ID + state.commits.len() as RevisionId;
        state.commits.push((id, comment.to_string()));
    }
}

impl RepositoryClient for SharedTarget {
    fn fetch_snapshot(&self, _revision: RevisionId, _destination: &Path) -> Result<()> {
        Err(ReplayError::remote("the target is never fetched"))
    }

    fn revision_detail(&self, revision: RevisionId) -> Result<String> {
        Err(ReplayError::RevisionNotFound(revision))
    }

    fn list_revisions(&self, top: usize) -> Result<Vec<Revision>> {
        Ok(self
            .0
            .lock()
            .commits
            .iter()
            .rev()
            .take(top)
            .map(|(id, comment)| Revision {
                id: *id,
                comment: Some(comment.clone()),
                author: "replay".to_string(),
                timestamp: None,
                operations: Vec::new(),
            })
            .collect())
    }

    fn list_items(&self, scope: &str) -> Result<Vec<RepositoryItem>> {
        let files = self.files();
        Ok(items_for(scope, files.iter().map(|(p, b)| (p.clone(), b.len()))))
    }

    fn fetch_content(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.0.lock();
        let relative = path
            .strip_prefix(&state.root)
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| ReplayError::remote(format!("{} is outside {}", path, state.root)))?;
        state
            .files
            .get(relative)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| ReplayError::remote(format!("no such item {}", path)))
    }

    fn list_labels(&self) -> Result<Option<Vec<String>>> {
        Ok(self.0.lock().labels.clone())
    }
}

/// Working copy that checks in whatever is on disk
pub struct FakeWorkingCopy {
    pub root: PathBuf,
    pub target: SharedTarget,
    pub staged: BTreeSet<PathBuf>,
    pub detected: usize,
    pub supports_reconcile: bool,
    pub commit_failures: u32,
    pub resolutions: Vec<ConflictPolicy>,
}

impl FakeWorkingCopy {
    pub fn new(root: &Path, target: SharedTarget) -> Self {
        Self {
            root: root.to_path_buf(),
            target,
            staged: BTreeSet::new(),
            detected: 0,
            supports_reconcile: true,
            commit_failures: 0,
            resolutions: Vec::new(),
        }
    }

    /// Files on disk, relative and `/`-separated, skipping metadata
    fn disk_files(&self) -> BTreeMap<String, String> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != "$tf")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(&self.root).ok()?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let body = fs::read_to_string(e.path()).ok()?;
                Some((key, body))
            })
            .collect()
    }

    fn differences(&self) -> usize {
        let disk = self.disk_files();
        let committed = self.target.files();
        let changed = disk.iter().filter(|(p, b)| committed.get(*p) != Some(*b)).count();
        let removed = committed.keys().filter(|p| !disk.contains_key(*p)).count();
        changed + removed
    }
}

impl WorkingCopy for FakeWorkingCopy {
    fn root(&self) -> &Path {
        &self.root
    }

    fn stage_add(&mut self, path: &Path) -> StageOutcome {
        if !self.staged.insert(path.to_path_buf()) {
            return StageOutcome::AlreadyTracked;
        }
        StageOutcome::Staged
    }

    fn stage_edit(&mut self, path: &Path) -> StageOutcome {
        self.staged.insert(path.to_path_buf());
        StageOutcome::Staged
    }

    fn stage_delete(&mut self, path: &Path) -> StageOutcome {
        match fs::remove_file(path) {
            Ok(()) => {
                self.staged.insert(path.to_path_buf());
                StageOutcome::Staged
            }
            Err(e) => StageOutcome::Failed(e.to_string()),
        }
    }

    fn stage_all(&mut self) -> StageOutcome {
        self.detected = self.differences();
        StageOutcome::Staged
    }

    fn reconcile(&mut self) -> Result<ReconcileOutcome> {
        if !self.supports_reconcile {
            return Ok(ReconcileOutcome::Unsupported);
        }
        self.detected = self.differences();
        Ok(ReconcileOutcome::Detected(self.detected))
    }

    fn pending_changes(&mut self) -> Result<usize> {
        Ok(self.staged.len() + self.detected)
    }

    fn commit(&mut self, comment: &str) -> Result<CommitReceipt> {
        if self.commit_failures > 0 {
            self.commit_failures -= 1;
            return Err(ReplayError::remote("conflict on check-in"));
        }
        let files = self.disk_files();
        let mut state = self.target.0.lock();
        state.files = files;
        let id = TARGET_FIRST_ID + state.commits.len() as RevisionId;
        state.commits.push((id, comment.to_string()));
        drop(state);

        self.staged.clear();
        self.detected = 0;
        Ok(CommitReceipt {
            revision: Some(id),
            output: format!("Changeset #{} checked in.", id),
        })
    }

    fn resolve_conflicts(&mut self, policy: ConflictPolicy) -> Result<()> {
        self.resolutions.push(policy);
        Ok(())
    }
}

/// Temporary directories plus a configuration pointing into them
pub struct Workspace {
    pub temp: TempDir,
    pub config: MigrationConfig,
}

impl Workspace {
    pub fn new(branch_creating: &[RevisionId]) -> Self {
        Self::with(|builder| builder.branch_creating(branch_creating.iter().copied()))
    }

    pub fn with(customize: impl FnOnce(MigrationConfigBuilder) -> MigrationConfigBuilder) -> Self {
        let temp = TempDir::new().unwrap();
        let target_root = temp.path().join("target");
        fs::create_dir_all(target_root.join("$tf")).unwrap();
        let builder = MigrationConfigBuilder::new()
            .source(RepositoryCoordinates::new("https://old", "$/Old", temp.path().join("source")))
            .target(RepositoryCoordinates::new("https://new", "$/New", &target_root))
            .checkpoint_dir(temp.path().join(".replayvc"));
        let config = customize(builder).build().unwrap();
        Self { temp, config }
    }

    pub fn target_root(&self) -> &Path {
        &self.config.target.local_path
    }

    pub fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::from_config(&self.config)
    }
}
