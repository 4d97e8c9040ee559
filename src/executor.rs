//! Revision replay
//!
//! The executor walks a revision queue strictly in order. Each revision
//! moves through a small state machine:
//!
//! ```text
//! Idle -> FetchingSnapshot -> ApplyingOperations -> StagingChanges
//!      -> CommittingRevision -> Success
//! (any non-terminal phase) -> Failed
//! ```
//!
//! A failed revision is recorded and the loop moves on. A revision the
//! classifier marks as trunk- or branch-creating stops the loop before any
//! work is done on it: the checkpoint manager persists the remaining queue
//! and writes operator instructions.
//!
//! ## Strategies
//!
//! - **Granular**: apply the extracted add/edit/delete operations one by
//!   one (copy from the source snapshot, then stage)
//! - **Bulk**: wipe the target working copy except metadata directories,
//!   mirror the snapshot over it, and let the working copy detect changes
//!
//! Granular is tried first when the risk report allows it; any staging
//! failure or an empty stage falls back to bulk.

use crate::checkpoint::{CheckpointManager, MigrationState};
use crate::classifier::RevisionClassifier;
use crate::config::MigrationConfig;
use crate::error::{ReplayError, Result};
use crate::history;
use crate::mirror;
use crate::operations::{self, PathMapping};
use crate::provenance;
use crate::risk;
use crate::types::{
    HaltInfo, Operation, OperationKind, OutcomeStatus, ProgressCallback, ProgressInfo, ReplayPhase,
    ReplicationStrategy, Revision, RevisionId, RevisionOutcome, RunSummary,
};
use crate::utils;
use crate::vcs::{ConflictPolicy, ReconcileOutcome, RepositoryClient, StageOutcome, WorkingCopy};
use globset::GlobSet;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Interval between progress callbacks during a snapshot fetch
const PROGRESS_TICK: Duration = Duration::from_millis(250);

/// Counters from a granular application pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GranularReport {
    /// Operations applied and staged
    pub applied: usize,
    /// Operations that needed no action (folders, already-absent deletes)
    pub skipped: usize,
    /// Operations that could not be applied
    pub failures: usize,
}

/// Replays source revisions into a target working copy
pub struct ReplicationExecutor<'a, S: RepositoryClient + ?Sized, W: WorkingCopy> {
    config: &'a MigrationConfig,
    source: &'a S,
    target: W,
    classifier: RevisionClassifier,
    mapping: PathMapping,
    checkpoints: CheckpointManager,
    ignore: GlobSet,
    migration_id: String,
    last_processed: Option<RevisionId>,
    progress: Option<ProgressCallback>,
}

impl<'a, S: RepositoryClient + ?Sized, W: WorkingCopy> ReplicationExecutor<'a, S, W> {
    /// Create an executor for a fresh migration
    pub fn new(config: &'a MigrationConfig, source: &'a S, target: W) -> Result<Self> {
        Ok(Self {
            config,
            source,
            target,
            classifier: RevisionClassifier::from_config(config),
            mapping: PathMapping::new(config.source.root.clone(), config.target.root.clone()),
            checkpoints: CheckpointManager::from_config(config),
            ignore: mirror::build_ignore_set(&config.mirror_ignore)?,
            migration_id: uuid::Uuid::new_v4().to_string(),
            last_processed: None,
            progress: None,
        })
    }

    /// Set a progress callback
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Identifier recorded in every persisted state
    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    /// The target working copy
    pub fn target(&self) -> &W {
        &self.target
    }

    /// Consume the executor, returning the target working copy
    pub fn into_target(self) -> W {
        self.target
    }

    /// Replay a queue in order, halting before any revision that needs an
    /// operator
    pub fn run(&mut self, queue: &[RevisionId]) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::default();
        info!("Replaying {} revisions", queue.len());

        for (index, &revision) in queue.iter().enumerate() {
            let class = self.classifier.classify(revision);
            let remaining = queue[index + 1..].to_vec();

            if class.requires_operator() {
                let state = MigrationState::new(&self.migration_id, self.last_processed, remaining)
                    .with_coordinates(self.config)
                    .paused_at(revision, class);
                let directive = self.config.branch_directives.get(&revision);
                let (state_path, instructions_path) = self.checkpoints.halt(&state, directive)?;
                warn!(
                    "Revision {} is {}; stopping for operator action ({} revisions remain)",
                    revision,
                    class,
                    state.remaining_queue.len()
                );
                summary.halt = Some(HaltInfo {
                    revision,
                    class,
                    state_path,
                    instructions_path,
                });
                break;
            }

            let outcome = self.replay_indexed(revision, index + 1, queue.len());
            self.last_processed = Some(revision);
            summary.record(outcome);

            if self.config.persist_progress {
                let state = MigrationState::new(&self.migration_id, self.last_processed, remaining)
                    .with_coordinates(self.config);
                self.checkpoints.save(&state)?;
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run finished in {}ms: {} committed, {} no-op, {} failed{}",
            summary.duration_ms,
            summary.committed,
            summary.no_ops,
            summary.failed,
            if summary.is_halted() { ", halted" } else { "" }
        );
        Ok(summary)
    }

    /// Continue from a persisted state's remaining queue
    pub fn run_from(&mut self, state: &MigrationState) -> Result<RunSummary> {
        self.migration_id = state.migration_id.clone();
        self.last_processed = state.last_processed_revision;
        self.run(&state.remaining_queue)
    }

    /// Replay one revision to a terminal state
    pub fn replay_revision(&mut self, revision: RevisionId) -> RevisionOutcome {
        self.replay_indexed(revision, 1, 1)
    }

    #[instrument(skip(self))]
    fn replay_indexed(&mut self, revision: RevisionId, position: usize, total: usize) -> RevisionOutcome {
        let start = Instant::now();
        let mut outcome = RevisionOutcome {
            revision,
            status: OutcomeStatus::Failed,
            failed_in: None,
            strategy: None,
            changes_staged: 0,
            attempts: 0,
            commit_comment: None,
            failure: None,
            duration_ms: 0,
        };

        let mut phase = ReplayPhase::Idle;
        let record = self.describe(revision);
        debug!("Revision {} has {} operations", revision, record.operations.len());

        let result = self.advance(&record, position, total, &mut phase, &mut outcome);
        outcome.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(status) => {
                outcome.status = status;
                info!(
                    "Revision {} {} ({:?}, {} changes, {} attempts): {}",
                    revision,
                    match status {
                        OutcomeStatus::NoOp => "had nothing to check in",
                        _ => "replayed",
                    },
                    outcome.strategy,
                    outcome.changes_staged,
                    outcome.attempts,
                    record.comment_text()
                );
            }
            Err(e) => {
                outcome.status = OutcomeStatus::Failed;
                outcome.failed_in = Some(phase);
                outcome.failure = Some(e.to_string());
                error!(
                    "Revision {} failed in {:?}: {} (comment: {})",
                    revision,
                    phase,
                    e,
                    record.comment_text()
                );
            }
        }
        outcome
    }

    /// Metadata and operations of a revision; degrades to a bare record
    fn describe(&self, revision: RevisionId) -> Revision {
        let detail = match self.source.revision_detail(revision) {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not read detail of revision {}: {}", revision, e);
                return Revision::bare(revision);
            }
        };
        let mut record = history::parse_revisions(&detail)
            .into_iter()
            .find(|r| r.id == revision)
            .unwrap_or_else(|| Revision::bare(revision));
        if record.operations.is_empty() {
            record.operations = operations::extract(&detail);
        }
        record
    }

    fn advance(
        &mut self,
        record: &Revision,
        position: usize,
        total: usize,
        phase: &mut ReplayPhase,
        outcome: &mut RevisionOutcome,
    ) -> Result<OutcomeStatus> {
        *phase = ReplayPhase::FetchingSnapshot;
        self.fetch_snapshot(record.id, position, total)?;

        *phase = ReplayPhase::ApplyingOperations;
        let operations = operations::prune_redundant_deletes(&record.operations);
        let report = risk::analyze(&operations, risk::DEFAULT_TOP_EXTENSIONS);
        let mut strategy = report.suggested_strategy();
        debug!("Revision {}: {}", record.id, report.summary());

        let mut reconcile = None;
        if strategy == ReplicationStrategy::Granular {
            match self.apply_granular(&operations) {
                Ok(applied) if applied.failures == 0 => {
                    if self.target.pending_changes()? == 0 {
                        warn!("Granular replay of revision {} staged nothing; falling back to bulk", record.id);
                        strategy = ReplicationStrategy::Bulk;
                    }
                }
                Ok(applied) => {
                    warn!(
                        "Granular replay of revision {} incomplete ({} failures); falling back to bulk",
                        record.id, applied.failures
                    );
                    strategy = ReplicationStrategy::Bulk;
                }
                Err(e) => {
                    warn!("Granular replay of revision {} failed: {}; falling back to bulk", record.id, e);
                    strategy = ReplicationStrategy::Bulk;
                }
            }
        }
        if strategy == ReplicationStrategy::Bulk {
            reconcile = Some(self.apply_bulk()?);
        }
        outcome.strategy = Some(strategy);

        *phase = ReplayPhase::StagingChanges;
        let pending = self.target.pending_changes()?;
        outcome.changes_staged = pending;
        if pending == 0 {
            return match reconcile {
                Some(ReconcileOutcome::Detected(_)) => {
                    *phase = ReplayPhase::Success;
                    Ok(OutcomeStatus::NoOp)
                }
                _ => Err(ReplayError::internal("nothing staged after applying the revision")),
            };
        }

        *phase = ReplayPhase::CommittingRevision;
        let comment = provenance::format_comment(
            record.id,
            record.comment_text(),
            &record.author,
            self.config.max_comment_length,
        );
        outcome.commit_comment = Some(comment.clone());
        self.commit_with_retries(&comment, outcome)?;

        *phase = ReplayPhase::Success;
        Ok(OutcomeStatus::Committed)
    }

    /// Fetch the source snapshot on a worker thread, ticking progress
    fn fetch_snapshot(&self, revision: RevisionId, position: usize, total: usize) -> Result<()> {
        let source = self.source;
        let destination = self.config.source.local_path.as_path();
        let started = Instant::now();

        std::thread::scope(|scope| {
            let (sender, receiver) = mpsc::channel();
            scope.spawn(move || {
                let _ = sender.send(source.fetch_snapshot(revision, destination));
            });

            loop {
                match receiver.recv_timeout(PROGRESS_TICK) {
                    Ok(result) => {
                        self.emit(revision, position, total, started);
                        return result;
                    }
                    Err(RecvTimeoutError::Timeout) => self.emit(revision, position, total, started),
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(ReplayError::SnapshotFailed {
                            revision,
                            reason: "fetch worker exited without a result".to_string(),
                        })
                    }
                }
            }
        })
    }

    fn emit(&self, revision: RevisionId, position: usize, total: usize, started: Instant) {
        if let Some(callback) = &self.progress {
            callback(ProgressInfo {
                operation: format!("Fetching revision {}", revision),
                revision: Some(revision),
                processed: position,
                total: Some(total),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    /// Apply add/edit/delete operations one at a time
    pub fn apply_granular(&mut self, operations: &[Operation]) -> Result<GranularReport> {
        let mut report = GranularReport::default();
        let source_root = self.config.source.local_path.clone();
        let target_root = self.target.root().to_path_buf();

        for op in operations {
            let Some(relative) = self.mapping.source_relative(&op.path) else {
                warn!("Operation path {} is outside the source root", op.path);
                report.failures += 1;
                continue;
            };
            let source_file = operations::local_path(&source_root, relative);
            let target_file = operations::local_path(&target_root, relative);

            let staged = match op.kind {
                OperationKind::Add => {
                    if source_file.is_dir() {
                        std::fs::create_dir_all(&target_file)?;
                        report.skipped += 1;
                        continue;
                    }
                    if !source_file.exists() {
                        warn!("Added file {} is missing from the snapshot", op.path);
                        report.failures += 1;
                        continue;
                    }
                    if mirror::same_content(&source_file, &target_file)? {
                        debug!("{} already matches the snapshot", op.path);
                        report.skipped += 1;
                        continue;
                    }
                    mirror::copy_file(&source_file, &target_file)?;
                    match self.target.stage_add(&target_file) {
                        StageOutcome::AlreadyTracked => self.target.stage_edit(&target_file),
                        other => other,
                    }
                }
                OperationKind::Edit => {
                    if source_file.is_dir() {
                        report.skipped += 1;
                        continue;
                    }
                    if source_file.exists() && mirror::same_content(&source_file, &target_file)? {
                        debug!("{} already matches the snapshot", op.path);
                        report.skipped += 1;
                        continue;
                    }
                    let staged = self.target.stage_edit(&target_file);
                    if staged.is_ok() {
                        mirror::copy_file(&source_file, &target_file)?;
                    }
                    staged
                }
                OperationKind::Delete => {
                    if !target_file.exists() {
                        debug!("{} already absent from the target", op.path);
                        report.skipped += 1;
                        continue;
                    }
                    self.target.stage_delete(&target_file)
                }
                OperationKind::Rename | OperationKind::Branch | OperationKind::Merge => {
                    StageOutcome::Failed(format!("{} cannot be applied granularly", op.kind))
                }
            };

            match staged {
                StageOutcome::Staged | StageOutcome::AlreadyTracked => report.applied += 1,
                StageOutcome::Failed(reason) => {
                    warn!("Could not stage {} {}: {}", op.kind, op.path, reason);
                    report.failures += 1;
                }
            }
        }

        debug!(
            "Granular pass: {} applied, {} skipped, {} failed",
            report.applied, report.skipped, report.failures
        );
        Ok(report)
    }

    /// Mirror the snapshot over the working copy and detect changes
    pub fn apply_bulk(&mut self) -> Result<ReconcileOutcome> {
        let target_root = self.target.root().to_path_buf();
        mirror::clear_working_copy(&target_root, &self.config.metadata_dirs)?;
        let stats = mirror::mirror_tree(
            &self.config.source.local_path,
            &target_root,
            &self.config.metadata_dirs,
            &self.ignore,
        )?;
        debug!(
            "Bulk mirror copied {} files ({}), skipped {}",
            stats.files_copied,
            utils::format_bytes(stats.bytes_copied),
            stats.skipped
        );

        let outcome = self.target.reconcile()?;
        if outcome == ReconcileOutcome::Unsupported {
            if let StageOutcome::Failed(reason) = self.target.stage_all() {
                warn!("Blanket add reported: {}", reason);
            }
            self.target.resolve_conflicts(ConflictPolicy::KeepLocal)?;
        }
        Ok(outcome)
    }

    fn commit_with_retries(&mut self, comment: &str, outcome: &mut RevisionOutcome) -> Result<()> {
        let attempts = self.config.commit_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            outcome.attempts = attempt;
            match self.target.commit(comment) {
                Ok(receipt) => {
                    debug!("Check-in accepted as {:?}", receipt.revision);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Check-in attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        if let Err(resolve) = self.target.resolve_conflicts(ConflictPolicy::KeepLocal) {
                            warn!("Conflict resolution failed: {}", resolve);
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ReplayError::internal("no check-in attempts were made")))
    }
}
