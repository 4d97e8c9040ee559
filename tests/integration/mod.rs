//! Integration tests for replayvc
//!
//! Full migrations against the in-memory repositories in `support`:
//! halting and resuming, strategy fallbacks, retries and verification of
//! the result.

use crate::support::*;
use ::replayvc::checkpoint::{MigrationState, EXIT_NEEDS_OPERATOR};
use ::replayvc::vcs::ConflictPolicy;
use ::replayvc::*;
use std::fs;
use tracing::info;

/// Three revisions, the middle one creating a branch
fn branching_source() -> FakeSource {
    FakeSource::new("$/Old")
        .revision(10, "Ann", "first", &[("a.txt", Some("one"))])
        .branch_revision(11, "Ann", "create release branch", "b.txt")
        .revision(12, "Bob", "tweak", &[("a.txt", Some("two"))])
}

/// A longer linear history touching nested folders
fn linear_source() -> FakeSource {
    FakeSource::new("$/Old")
        .revision(1, "Ann", "scaffold", &[("src/main.cs", Some("v1")), ("README.md", Some("hello"))])
        .revision(2, "Ann", "add lib", &[("src/lib/util.cs", Some("u1"))])
        .revision(3, "Bob", "fix main", &[("src/main.cs", Some("v2"))])
        .revision(4, "Bob", "drop readme", &[("README.md", None)])
        .revision(5, "Cid", "docs", &[("docs/guide.md", Some("g1")), ("src/lib/util.cs", Some("u2"))])
}

fn replay(
    ws: &Workspace,
    source: &FakeSource,
    target: &SharedTarget,
    queue: &[RevisionId],
) -> RunSummary {
    let copy = FakeWorkingCopy::new(ws.target_root(), target.clone());
    let mut executor = ReplicationExecutor::new(&ws.config, source, copy).unwrap();
    executor.run(queue).unwrap()
}

#[test]
fn test_halt_before_branch_creating_revision_and_resume() {
    let ws = Workspace::new(&[11]);
    let source = branching_source();
    let target = SharedTarget::new("$/New");

    let queue = history::parse_history(&source.export());
    assert_eq!(queue, vec![10, 11, 12]);

    // First run stops in front of 11
    let summary = replay(&ws, &source, &target, &queue);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.committed, 1);
    let halt = summary.halt.clone().unwrap();
    assert_eq!(halt.revision, 11);
    assert_eq!(halt.class, RevisionClass::BranchCreating);
    assert_eq!(target.comments(), vec!["#10: first (Ann)"]);

    let state = ws.checkpoints().load().unwrap();
    assert_eq!(state.last_processed_revision, Some(10));
    assert_eq!(state.paused_at_revision, Some(11));
    assert_eq!(state.remaining_queue, vec![12]);
    assert!(state.verify_integrity());

    let instructions = fs::read_to_string(&halt.instructions_path).unwrap();
    assert!(instructions.contains("Migration paused at revision 11"));
    assert!(instructions.contains("Procedure B"));
    assert!(instructions.contains("replayvc resume"));
    assert_eq!(EXIT_NEEDS_OPERATOR, 3);

    // The operator recreates the branch by hand
    fs::write(ws.target_root().join("b.txt"), "branched").unwrap();
    target.manual_commit("#11: create release branch (Ann)", "b.txt", "branched");

    // Resume replays only what is left
    let copy = FakeWorkingCopy::new(ws.target_root(), target.clone());
    let mut executor = ReplicationExecutor::new(&ws.config, &source, copy).unwrap();
    let resumed = executor.run_from(&state).unwrap();
    assert_eq!(executor.migration_id(), state.migration_id);
    assert!(!resumed.is_halted());
    assert_eq!(resumed.outcomes.len(), 1);
    assert_eq!(resumed.outcomes[0].revision, 12);
    assert_eq!(
        target.comments(),
        vec!["#10: first (Ann)", "#11: create release branch (Ann)", "#12: tweak (Bob)"]
    );

    let files = target.files();
    assert_eq!(files.get("a.txt").map(String::as_str), Some("two"));
    assert_eq!(files.get("b.txt").map(String::as_str), Some("branched"));

    let finished = ws.checkpoints().load().unwrap();
    assert_eq!(finished.last_processed_revision, Some(12));
    assert!(finished.remaining_queue.is_empty());
    assert!(!finished.is_paused());
}

#[test]
fn test_trunk_creating_revision_halts_at_queue_start() {
    let ws = Workspace::with(|b| b.trunk_creating([10]));
    let source = branching_source();
    let target = SharedTarget::new("$/New");

    let summary = replay(&ws, &source, &target, &[10, 11, 12]);
    assert!(summary.outcomes.is_empty());
    assert_eq!(summary.halt.as_ref().map(|h| h.class), Some(RevisionClass::TrunkCreating));
    assert!(target.comments().is_empty());

    let state = ws.checkpoints().load().unwrap();
    assert_eq!(state.last_processed_revision, None);
    assert_eq!(state.remaining_queue, vec![11, 12]);
}

#[test]
fn test_resume_matches_uninterrupted_run() {
    let source = linear_source();
    let queue = source.ids();

    let straight_ws = Workspace::new(&[]);
    let straight = SharedTarget::new("$/New");
    let summary = replay(&straight_ws, &source, &straight, &queue);
    assert_eq!(summary.committed, 5);

    // Interrupted after the third revision, then resumed from a derived state
    let split_ws = Workspace::new(&[]);
    let split = SharedTarget::new("$/New");
    let copy = FakeWorkingCopy::new(split_ws.target_root(), split.clone());
    let mut executor = ReplicationExecutor::new(&split_ws.config, &source, copy).unwrap();
    executor.run(&queue[..3]).unwrap();
    let state = MigrationState::from_history(executor.migration_id(), &queue, Some(3));
    assert_eq!(state.remaining_queue, vec![4, 5]);
    drop(executor);

    let copy = FakeWorkingCopy::new(split_ws.target_root(), split.clone());
    let mut executor = ReplicationExecutor::new(&split_ws.config, &source, copy).unwrap();
    let resumed = executor.run_from(&state).unwrap();
    assert_eq!(resumed.committed, 2);

    info!("Comparing {} commits", straight.comments().len());
    assert_eq!(straight.comments(), split.comments());
    assert_eq!(straight.files(), split.files());
    assert!(!split.files().contains_key("README.md"));
}

#[test]
fn test_commit_retries_with_keep_local_resolution() {
    let ws = Workspace::new(&[]);
    let source = linear_source();
    let target = SharedTarget::new("$/New");

    let mut copy = FakeWorkingCopy::new(ws.target_root(), target.clone());
    copy.commit_failures = 2;
    let mut executor = ReplicationExecutor::new(&ws.config, &source, copy).unwrap();
    let outcome = executor.replay_revision(1);

    assert_eq!(outcome.status, OutcomeStatus::Committed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(
        executor.target().resolutions,
        vec![ConflictPolicy::KeepLocal, ConflictPolicy::KeepLocal]
    );
    assert_eq!(target.comments(), vec!["#1: scaffold (Ann)"]);
}

#[test]
fn test_failed_revision_does_not_stop_the_run() {
    let ws = Workspace::new(&[]);
    let source = linear_source();
    let target = SharedTarget::new("$/New");

    let mut copy = FakeWorkingCopy::new(ws.target_root(), target.clone());
    copy.commit_failures = 3;
    let mut executor = ReplicationExecutor::new(&ws.config, &source, copy).unwrap();
    let summary = executor.run(&[1, 2]).unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.failed_revisions(), vec![1]);
    let failed = &summary.outcomes[0];
    assert_eq!(failed.failed_in, Some(ReplayPhase::CommittingRevision));
    assert!(failed.failure.is_some());

    // The second check-in carries the files of both revisions
    assert_eq!(target.comments(), vec!["#2: add lib (Ann)"]);
    assert!(target.files().contains_key("src/main.cs"));

    let state = ws.checkpoints().load().unwrap();
    assert_eq!(state.last_processed_revision, Some(2));
}

#[test]
fn test_revision_without_changes_is_a_noop() {
    let ws = Workspace::new(&[]);
    let source = FakeSource::new("$/Old")
        .revision(1, "Ann", "seed", &[("a.txt", Some("x"))])
        .revision(2, "Ann", "property change only", &[]);
    let target = SharedTarget::new("$/New");

    let summary = replay(&ws, &source, &target, &[1, 2]);
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.no_ops, 1);
    let noop = &summary.outcomes[1];
    assert_eq!(noop.status, OutcomeStatus::NoOp);
    assert_eq!(noop.strategy, Some(ReplicationStrategy::Bulk));
    assert_eq!(target.comments().len(), 1);
}

#[test]
fn test_replaying_a_committed_revision_is_a_noop() {
    let ws = Workspace::new(&[]);
    let source = linear_source();
    let target = SharedTarget::new("$/New");
    let summary = replay(&ws, &source, &target, &[1, 2, 3]);
    assert_eq!(summary.committed, 3);

    // A crash between check-in and checkpoint replays the last revision again
    let copy = FakeWorkingCopy::new(ws.target_root(), target.clone());
    let mut executor = ReplicationExecutor::new(&ws.config, &source, copy).unwrap();
    let outcome = executor.replay_revision(3);

    assert_eq!(outcome.status, OutcomeStatus::NoOp);
    assert_eq!(outcome.strategy, Some(ReplicationStrategy::Bulk));
    assert_eq!(outcome.changes_staged, 0);
    assert!(outcome.commit_comment.is_none());
    assert_eq!(
        target.comments(),
        vec!["#1: scaffold (Ann)", "#2: add lib (Ann)", "#3: fix main (Bob)"]
    );
    assert_eq!(target.files().get("src/main.cs").map(String::as_str), Some("v2"));
}

#[test]
fn test_rename_falls_back_to_bulk_mirror() {
    let ws = Workspace::new(&[]);
    let mut source = FakeSource::new("$/Old")
        .revision(1, "Ann", "seed", &[("old.txt", Some("x"))])
        .revision(2, "Ann", "rename", &[("old.txt", None), ("new.txt", Some("x"))]);
    if let Some(revision) = source.revisions.get_mut(&2) {
        revision.operations = vec![(OperationKind::Rename, "new.txt".to_string())];
    }
    let target = SharedTarget::new("$/New");

    let summary = replay(&ws, &source, &target, &[1, 2]);
    assert_eq!(summary.committed, 2);
    assert_eq!(summary.outcomes[1].strategy, Some(ReplicationStrategy::Bulk));

    let files = target.files();
    assert!(files.contains_key("new.txt"));
    assert!(!files.contains_key("old.txt"));
    assert!(ws.target_root().join("$tf").is_dir());
}

#[test]
fn test_blanket_add_when_reconcile_is_unsupported() {
    let ws = Workspace::new(&[]);
    let mut source = linear_source();
    if let Some(revision) = source.revisions.get_mut(&2) {
        revision.operations = vec![(OperationKind::Merge, "src/lib/util.cs".to_string())];
    }
    let target = SharedTarget::new("$/New");

    let mut copy = FakeWorkingCopy::new(ws.target_root(), target.clone());
    copy.supports_reconcile = false;
    let mut executor = ReplicationExecutor::new(&ws.config, &source, copy).unwrap();
    let summary = executor.run(&[1, 2]).unwrap();

    assert_eq!(summary.committed, 2);
    assert_eq!(executor.target().resolutions, vec![ConflictPolicy::KeepLocal]);
    assert_eq!(target.files().get("src/lib/util.cs").map(String::as_str), Some("u1"));
}

#[test]
fn test_progress_callback_reports_queue_position() {
    use parking_lot::Mutex;
    use std::sync::Arc;

    let ws = Workspace::new(&[]);
    let source = linear_source();
    let target = SharedTarget::new("$/New");
    let seen: Arc<Mutex<Vec<(usize, Option<usize>)>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let copy = FakeWorkingCopy::new(ws.target_root(), target.clone());
    let mut executor = ReplicationExecutor::new(&ws.config, &source, copy)
        .unwrap()
        .with_progress(Arc::new(move |info: ProgressInfo| {
            sink.lock().push((info.processed, info.total));
        }));
    executor.run(&[1, 2, 3]).unwrap();

    let seen = seen.lock();
    assert!(seen.contains(&(1, Some(3))));
    assert!(seen.contains(&(3, Some(3))));
}

#[test]
fn test_verification_of_a_finished_migration() {
    let ws = Workspace::new(&[]);
    let source = linear_source().with_labels(&["v1.0"]);
    let target = SharedTarget::new("$/New");
    target.0.lock().labels = Some(vec!["v1.0".to_string()]);

    let summary = replay(&ws, &source, &target, &source.ids());
    assert_eq!(summary.committed, 5);

    let report = VerificationEngine::new(&ws.config, &source, &target)
        .with_seed(7)
        .run();
    assert!(report.structure.passed, "{:?}", report.structure);
    assert!(report.structure.missing.is_empty());
    assert!(report.content.passed);
    assert_eq!(report.content.compared, report.content.population);
    assert!(report.history.passed);
    assert_eq!(report.history.id_match_percentage, 100.0);
    assert_eq!(report.history.full_match_percentage, 100.0);
    assert!(report.labels.supported && report.labels.passed);
    assert!(report.passed());

    let out = ws.temp.path().join("verification");
    let written = report.write_artifacts(&out).unwrap();
    assert_eq!(written.len(), 5);
    for name in [
        "structure_comparison.csv",
        "content_comparison.csv",
        "revision_comparison.csv",
        "label_comparison.csv",
        "verification_summary.json",
    ] {
        assert!(out.join(name).exists(), "{} missing", name);
    }
}

#[test]
fn test_verification_detects_drift() {
    let ws = Workspace::new(&[]);
    let source = linear_source().with_labels(&["v1.0", "v1.1"]);
    let target = SharedTarget::new("$/New");
    target.0.lock().labels = Some(vec!["v1.0".to_string()]);
    replay(&ws, &source, &target, &source.ids());

    // Someone edits a file directly in the target after the migration
    target.manual_commit("hotfix", "src/main.cs", "patched");

    let report = VerificationEngine::new(&ws.config, &source, &target)
        .with_seed(1)
        .run();
    assert!(report.structure.passed);
    assert!(!report.content.passed);
    assert_eq!(report.content.mismatched, 1);
    assert!(!report.labels.passed);
    assert_eq!(report.labels.missing, vec!["v1.1".to_string()]);
    assert!(!report.passed());
}

#[test]
fn test_history_threshold_boundary() {
    let ws = Workspace::new(&[]);
    let mut source = FakeSource::new("$/Old");
    for id in 1..=10 {
        source = source.revision(id, "Ann", &format!("change {}", id), &[("a.txt", Some("x"))]);
    }

    // Nine of ten referenced: 90% clears the 87% bar
    let target = SharedTarget::new("$/New");
    for id in 1..=9 {
        target.manual_commit(&format!("#{}: change {} (Ann)", id, id), "a.txt", "x");
    }
    let report = VerificationEngine::new(&ws.config, &source, &target).run();
    assert_eq!(report.history.id_match_percentage, 90.0);
    assert!(report.history.passed);
    assert!(report.structure.passed && report.content.passed);
    assert!(report.passed());

    // Eight of ten: 80% does not
    let target = SharedTarget::new("$/New");
    for id in 1..=8 {
        target.manual_commit(&format!("#{}: change {} (Ann)", id, id), "a.txt", "x");
    }
    let report = VerificationEngine::new(&ws.config, &source, &target).run();
    assert_eq!(report.history.id_match_percentage, 80.0);
    assert!(!report.history.passed);
    assert_eq!(report.history.unmatched_source_ids, vec![9, 10]);
    assert!(report.structure.passed && report.content.passed);
    assert!(!report.passed());
}
