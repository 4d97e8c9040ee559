//! # replayvc - Revision-by-revision repository replay
//!
//! Replays the history of a centralized version-control repository into a
//! second repository one revision at a time, so the target ends up with an
//! equivalent history instead of a single import snapshot.
//!
//! ## Overview
//!
//! - Parse a history export into an ordered queue of revision ids
//! - Classify each revision against operator-curated trunk/branch sets
//! - Extract per-revision operations and assess their risk
//! - Replay each revision granularly or in bulk, checking in with a
//!   provenance comment and retrying with conflict resolution
//! - Halt before topology-changing revisions, persisting a resumable state
//!   and operator instructions
//! - Verify the finished repositories for structure, content, history and
//!   label parity
//!
//! ## Architecture
//!
//! ```text
//! history -> classifier / risk -> executor (loop) -> checkpoint (on halt)
//!                                               \-> verification (later)
//! ```
//!
//! The executor is strictly sequential: revision *n+1* never starts before
//! revision *n* has reached a terminal state. External tools sit behind the
//! [`vcs::RepositoryClient`] and [`vcs::WorkingCopy`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replayvc::config::MigrationConfig;
//! use replayvc::executor::ReplicationExecutor;
//! use replayvc::history;
//! use replayvc::vcs::{TfRepositoryClient, TfWorkingCopy};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigrationConfig::load(Path::new("replayvc.json"))?;
//! let queue = history::parse_history(&history::read_history_file(Path::new("history.txt"))?);
//!
//! let source = TfRepositoryClient::new(&config.tool, config.source.clone());
//! let target = TfWorkingCopy::new(&config.tool, &config.target.local_path);
//! let mut executor = ReplicationExecutor::new(&config, &source, target)?;
//!
//! let summary = executor.run(&queue)?;
//! if let Some(halt) = &summary.halt {
//!     println!("Operator action needed: see {:?}", halt.instructions_path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Operations return `Result<T, ReplayError>`. Conditions that are part of
//! a normal migration (an already tracked file, a malformed history line, a
//! failed revision, a halt for the operator) are values, not errors.
//!
//! ## Module Organization
//!
//! - [`history`]: history export parsing
//! - [`classifier`]: revision classification and plans
//! - [`operations`]: operation extraction and path mapping
//! - [`risk`]: operation statistics and strategy hints
//! - [`executor`]: the per-revision state machine and run loop
//! - [`checkpoint`]: resumable state and operator instructions
//! - [`verification`]: post-migration checks
//! - [`vcs`]: external tool interfaces
//! - [`config`]: migration configuration
//! - [`types`]: shared data model
//! - [`error`]: error types

// Public API modules
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod mirror;
pub mod operations;
pub mod provenance;
pub mod risk;
pub mod types;
pub mod vcs;
pub mod verification;

// Internal modules (not part of public API)
mod utils;

// Re-export main types for convenience
pub use checkpoint::{CheckpointManager, MigrationState};
pub use classifier::{RevisionClassifier, RevisionPlan};
pub use config::{MigrationConfig, MigrationConfigBuilder, RepositoryCoordinates};
pub use error::{ReplayError, Result};
pub use executor::ReplicationExecutor;
pub use types::*;
pub use verification::{VerificationEngine, VerificationReport};
