//! # replayvc CLI - Replay repository history revision by revision
//!
//! ## Usage
//! ```bash
//! # Classify the history and write the plan
//! replayvc plan history.txt --output plan.json
//!
//! # Inspect one revision
//! replayvc analyze 1042
//!
//! # Replay everything (stops at trunk/branch-creating revisions)
//! replayvc replay --history history.txt
//!
//! # Continue after the manual step
//! replayvc resume
//!
//! # Compare the finished repositories
//! replayvc verify --sample 40 --seed 7
//! ```
//!
//! Exit codes: 0 success, 1 error, 2 failed revisions or failed
//! verification, 3 halted for operator action.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use replayvc::checkpoint::{CheckpointManager, EXIT_NEEDS_OPERATOR};
use replayvc::operations;
use replayvc::risk;
use replayvc::vcs::{ReconcileMode, RepositoryClient, TfRepositoryClient, TfWorkingCopy};
use replayvc::{
    history, MigrationConfig, MigrationState, OutcomeStatus, ProgressInfo, ReplayError,
    ReplicationExecutor, RevisionClass, RevisionClassifier, RevisionId, RunSummary,
    VerificationEngine,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_INCOMPLETE: i32 = 2;

/// Replay a centralized repository's history into another repository
#[derive(Parser)]
#[command(name = "replayvc")]
#[command(version)]
#[command(about = "Replay repository history revision by revision, with checkpoints and verification")]
#[command(long_about = None)]
struct Cli {
    /// Migration configuration file
    #[arg(short, long, global = true, default_value = "replayvc.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and classify a history export
    Plan {
        /// History export file
        history: PathBuf,

        /// Where to write the plan JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the operations and risk of one revision
    Analyze {
        /// Source revision id
        revision: RevisionId,
    },

    /// Replay the full history
    Replay {
        /// History export file
        #[arg(long)]
        history: PathBuf,

        /// Start over even if a checkpoint exists
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        working_copy: WorkingCopyArgs,
    },

    /// Continue from the checkpoint
    Resume {
        #[command(flatten)]
        working_copy: WorkingCopyArgs,
    },

    /// Show the checkpoint
    Status,

    /// Compare the source and target repositories
    Verify {
        /// Number of files to sample for content comparison
        #[arg(long)]
        sample: Option<usize>,

        /// Number of recent revisions to cross-reference
        #[arg(long)]
        depth: Option<usize>,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Directory for the artifacts
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct WorkingCopyArgs {
    /// Stage with a blanket add instead of reconcile in bulk mode
    #[arg(long)]
    no_reconcile: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            let message = match e.downcast_ref::<ReplayError>() {
                Some(replay) => replay.user_message(),
                None => format!("{:#}", e),
            };
            eprintln!("{}: {}", "Error".red().bold(), message);
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Plan { history, output } => cmd_plan(&cli.config, &history, output),
        Commands::Analyze { revision } => cmd_analyze(&load_config(&cli.config)?, revision),
        Commands::Replay {
            history,
            force,
            working_copy,
        } => cmd_replay(&load_config(&cli.config)?, &history, force, &working_copy),
        Commands::Resume { working_copy } => cmd_resume(&load_config(&cli.config)?, &working_copy),
        Commands::Status => cmd_status(&load_config(&cli.config)?),
        Commands::Verify {
            sample,
            depth,
            seed,
            out,
        } => cmd_verify(&load_config(&cli.config)?, sample, depth, seed, out),
    }
}

fn load_config(path: &Path) -> anyhow::Result<MigrationConfig> {
    MigrationConfig::load(path).with_context(|| format!("loading configuration {}", path.display()))
}

fn load_queue(path: &Path) -> anyhow::Result<Vec<RevisionId>> {
    let text = history::read_history_file(path)
        .with_context(|| format!("reading history export {}", path.display()))?;
    Ok(history::parse_history(&text))
}

/// Parse, classify and optionally save the plan
///
/// The configuration is optional here: without one every revision is
/// classified as regular.
fn cmd_plan(config_path: &Path, history_path: &Path, output: Option<PathBuf>) -> anyhow::Result<i32> {
    let queue = load_queue(history_path)?;
    let classifier = if config_path.exists() {
        RevisionClassifier::from_config(&load_config(config_path)?)
    } else {
        RevisionClassifier::default()
    };
    let plan = classifier.plan(&queue);

    println!("{}", "Revision plan".blue().bold());
    println!("  Revisions: {}", plan.entries.len().to_string().cyan());
    println!("  Regular: {}", plan.count(RevisionClass::Regular).to_string().cyan());
    println!(
        "  Trunk-creating: {}",
        plan.count(RevisionClass::TrunkCreating).to_string().yellow()
    );
    println!(
        "  Branch-creating: {}",
        plan.count(RevisionClass::BranchCreating).to_string().yellow()
    );
    if let (Some(first), Some(last)) = (plan.entries.first(), plan.entries.last()) {
        println!("  Range: {} .. {}", first.revision, last.revision);
    }
    let halts = plan.halting_revisions();
    if !halts.is_empty() {
        let ids: Vec<String> = halts.iter().map(|id| id.to_string()).collect();
        println!("  Operator stops: {}", ids.join(", ").yellow());
    }

    if let Some(path) = output {
        plan.save(&path)?;
        println!("{} Plan written to {}", "✓".green().bold(), path.display().to_string().cyan());
    }
    Ok(EXIT_SUCCESS)
}

/// Show the operations of one revision and the strategy hint
fn cmd_analyze(config: &MigrationConfig, revision: RevisionId) -> anyhow::Result<i32> {
    let source = TfRepositoryClient::new(&config.tool, config.source.clone());
    let detail = source.revision_detail(revision)?;
    let extracted = operations::extract(&detail);
    let pruned = operations::prune_redundant_deletes(&extracted);
    let report = risk::analyze(&pruned, risk::DEFAULT_TOP_EXTENSIONS);

    println!("{} {}", "Revision".blue().bold(), revision.to_string().yellow());
    println!("  Class: {}", RevisionClassifier::from_config(config).classify(revision));
    println!("  {}", report.summary());
    if extracted.len() != pruned.len() {
        println!("  Redundant deletes pruned: {}", extracted.len() - pruned.len());
    }
    for (ext, count) in &report.top_extensions {
        println!("    .{:<12} {}", ext, count);
    }
    for path in &report.long_paths {
        println!("  {} long path: {}", "⚠".yellow().bold(), path);
    }
    println!("  Suggested strategy: {:?}", report.suggested_strategy());
    Ok(EXIT_SUCCESS)
}

fn working_copy(config: &MigrationConfig, args: &WorkingCopyArgs) -> TfWorkingCopy {
    let mode = if args.no_reconcile {
        ReconcileMode::BlanketAdd
    } else {
        ReconcileMode::Reconcile
    };
    TfWorkingCopy::new(&config.tool, &config.target.local_path).with_reconcile_mode(mode)
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn execute(
    config: &MigrationConfig,
    args: &WorkingCopyArgs,
    resume_from: Option<&MigrationState>,
    queue: &[RevisionId],
) -> anyhow::Result<RunSummary> {
    let source = TfRepositoryClient::new(&config.tool, config.source.clone());
    let pb = spinner();
    let progress_bar = pb.clone();
    let progress = Arc::new(move |info: ProgressInfo| {
        progress_bar.set_message(format!(
            "[{}/{}] {} ({}s)",
            info.processed,
            info.total.unwrap_or(0),
            info.operation,
            info.elapsed_ms / 1000
        ));
    });

    let mut executor =
        ReplicationExecutor::new(config, &source, working_copy(config, args))?.with_progress(progress);
    let summary = match resume_from {
        Some(state) => executor.run_from(state),
        None => executor.run(queue),
    };
    pb.finish_and_clear();
    Ok(summary?)
}

fn report_run(summary: &RunSummary) -> i32 {
    for outcome in &summary.outcomes {
        let (mark, label) = match outcome.status {
            OutcomeStatus::Committed => ("✓".green().bold(), "committed".green()),
            OutcomeStatus::NoOp => ("-".cyan().bold(), "no changes".cyan()),
            OutcomeStatus::Failed => ("✗".red().bold(), "failed".red()),
        };
        print!("{} {} {}", mark, outcome.revision.to_string().yellow(), label);
        if let Some(comment) = &outcome.commit_comment {
            print!("  {}", comment.dimmed());
        }
        if let Some(reason) = &outcome.failure {
            print!("  {}", reason.red());
        }
        println!();
    }

    println!("\n{}", "Run summary:".bold());
    println!("  Committed: {}", summary.committed.to_string().green());
    println!("  No-op: {}", summary.no_ops.to_string().cyan());
    println!("  Failed: {}", summary.failed.to_string().red());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(summary.duration_ms)).to_string().cyan()
    );

    if let Some(halt) = &summary.halt {
        println!(
            "\n{} Stopped before {} revision {}",
            "⚠".yellow().bold(),
            halt.class,
            halt.revision.to_string().yellow().bold()
        );
        println!("  Instructions: {}", halt.instructions_path.display().to_string().cyan());
        println!("  State: {}", halt.state_path.display().to_string().cyan());
        println!("  After the manual step run: {}", "replayvc resume".yellow());
        return EXIT_NEEDS_OPERATOR;
    }
    if summary.failed > 0 {
        let ids: Vec<String> = summary.failed_revisions().iter().map(|id| id.to_string()).collect();
        println!("  Failed revisions: {}", ids.join(", ").red());
        return EXIT_INCOMPLETE;
    }
    EXIT_SUCCESS
}

/// Replay the whole history from the start
fn cmd_replay(
    config: &MigrationConfig,
    history_path: &Path,
    force: bool,
    args: &WorkingCopyArgs,
) -> anyhow::Result<i32> {
    let checkpoints = CheckpointManager::from_config(config);
    if checkpoints.exists() && !force {
        bail!(
            "a checkpoint already exists at {}; run 'replayvc resume' or pass --force",
            checkpoints.state_path().display()
        );
    }

    let queue = load_queue(history_path)?;
    println!(
        "{} {} revisions from {}",
        "Replaying".blue().bold(),
        queue.len().to_string().cyan(),
        history_path.display()
    );
    let summary = execute(config, args, None, &queue)?;
    Ok(report_run(&summary))
}

/// Continue from the persisted queue
fn cmd_resume(config: &MigrationConfig, args: &WorkingCopyArgs) -> anyhow::Result<i32> {
    let state = CheckpointManager::from_config(config).load()?;
    if let Some(paused) = state.paused_at_revision {
        println!(
            "{} after operator action at revision {}",
            "Resuming".blue().bold(),
            paused.to_string().yellow()
        );
    }
    if state.remaining_queue.is_empty() {
        println!("{} Nothing left to replay", "✓".green().bold());
        return Ok(EXIT_SUCCESS);
    }
    println!("  Remaining: {}", state.remaining_queue.len().to_string().cyan());

    let summary = execute(config, args, Some(&state), &[])?;
    Ok(report_run(&summary))
}

/// Print the checkpoint
fn cmd_status(config: &MigrationConfig) -> anyhow::Result<i32> {
    let checkpoints = CheckpointManager::from_config(config);
    if !checkpoints.exists() {
        println!("No checkpoint at {}", checkpoints.state_path().display());
        return Ok(EXIT_SUCCESS);
    }
    let state = checkpoints.load()?;

    println!("{}", "Migration state:".bold());
    println!("  Migration: {}", state.migration_id.yellow());
    println!(
        "  Last processed: {}",
        state
            .last_processed_revision
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string())
            .cyan()
    );
    println!("  Remaining: {}", state.remaining_queue.len().to_string().cyan());
    if let Some(next) = state.remaining_queue.first() {
        println!("  Next: {}", next);
    }
    println!("  Updated: {} on {}", state.updated_at.to_rfc3339(), state.host_info.hostname);
    if let Some(paused) = state.paused_at_revision {
        let class = state.paused_class.map(|c| c.to_string()).unwrap_or_default();
        println!(
            "  {} Paused at {} revision {}; see {}",
            "⚠".yellow().bold(),
            class,
            paused.to_string().yellow(),
            checkpoints.instructions_path().display()
        );
        return Ok(EXIT_NEEDS_OPERATOR);
    }
    Ok(EXIT_SUCCESS)
}

/// Run the four verification checks and write artifacts
fn cmd_verify(
    config: &MigrationConfig,
    sample: Option<usize>,
    depth: Option<usize>,
    seed: Option<u64>,
    out: Option<PathBuf>,
) -> anyhow::Result<i32> {
    let source = TfRepositoryClient::new(&config.tool, config.source.clone());
    let target = TfRepositoryClient::new(&config.tool, config.target.clone());

    let mut engine = VerificationEngine::new(config, &source, &target);
    if let Some(sample) = sample {
        engine = engine.with_sample_size(sample);
    }
    if let Some(depth) = depth {
        engine = engine.with_history_depth(depth);
    }
    if let Some(seed) = seed {
        engine = engine.with_seed(seed);
    }

    println!("{}", "Verifying migration...".blue().bold());
    let start = Instant::now();
    let report = engine.run();
    let dir = out.unwrap_or_else(|| config.verification.results_dir.clone());
    report.write_artifacts(&dir)?;

    let verdict = |passed: bool| if passed { "✓ Pass".green() } else { "✗ Fail".red() };
    println!("\n{}", "Verification Report:".bold());
    println!(
        "  Structure: {} ({} missing, {} extra)",
        verdict(report.structure.passed),
        report.structure.missing.len(),
        report.structure.extra.len()
    );
    println!(
        "  Content: {} ({}/{} matched, {} retrieval failures)",
        verdict(report.content.passed),
        report.content.matched,
        report.content.compared,
        report.content.retrieval_failures
    );
    println!(
        "  History: {} ({:.1}% ids, {:.1}% with comments, threshold {:.1}%)",
        verdict(report.history.passed),
        report.history.id_match_percentage,
        report.history.full_match_percentage,
        report.history.threshold
    );
    println!(
        "  Labels: {}{}",
        verdict(report.labels.passed),
        if report.labels.supported { "" } else { " (not supported)" }
    );
    for error in [
        &report.structure.error,
        &report.content.error,
        &report.history.error,
        &report.labels.error,
    ]
    .into_iter()
    .flatten()
    {
        println!("  {} {}", "⚠".yellow().bold(), error);
    }
    println!("  Artifacts: {}", dir.display().to_string().cyan());
    println!("  Time: {}", format_duration(start.elapsed()).to_string().cyan());

    Ok(if report.passed() { EXIT_SUCCESS } else { EXIT_INCOMPLETE })
}
