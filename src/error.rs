//! Error types for replayvc
//!
//! This module defines the errors that can surface from history replay,
//! checkpointing and verification. Conditions that are expected during a
//! migration (an already tracked file, an unparseable history line, a
//! revision that needs an operator) are modelled as values elsewhere and
//! never reach this enum.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the replayvc library
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Main error type for all replayvc operations
#[derive(Debug, Error)]
pub enum ReplayError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// The external version-control tool could not be started
    #[error("Version-control tool '{0}' is not available in PATH")]
    ToolNotInstalled(String),

    /// The external version-control tool exited unsuccessfully
    #[error("Command failed: {program} {args} ({message})")]
    CommandFailed {
        /// Program that was invoked
        program: String,
        /// Joined argument list
        args: String,
        /// Trimmed stderr or a fallback description
        message: String,
    },

    /// A remote repository request failed
    #[error("Remote error: {0}")]
    Remote(String),

    /// The source snapshot for a revision could not be fetched
    #[error("Failed to fetch snapshot for revision {revision}: {reason}")]
    SnapshotFailed {
        /// Revision being fetched
        revision: u64,
        /// Underlying cause
        reason: String,
    },

    /// A revision was requested that the repository does not know
    #[error("Revision not found: {0}")]
    RevisionNotFound(u64),

    /// A path could not be mapped between repository roots
    #[error("Path {path} is not under root {root}")]
    PathOutsideRoot {
        /// Offending path
        path: String,
        /// Root it was expected under
        root: String,
    },

    /// No checkpoint exists where one was expected
    #[error("Checkpoint not found at {0:?}")]
    CheckpointNotFound(PathBuf),

    /// A persisted checkpoint failed its integrity check
    #[error("Checkpoint corrupted: {0}")]
    CheckpointCorrupted(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid glob in the mirror ignore list
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Verification could not be carried out
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for ReplayError {
    fn from(err: globset::Error) -> Self {
        ReplayError::InvalidPattern(err.to_string())
    }
}

impl ReplayError {
    /// Create a remote error with a custom message
    pub fn remote(msg: impl Into<String>) -> Self {
        ReplayError::Remote(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        ReplayError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        ReplayError::Internal(msg.into())
    }

    /// Whether the error is a network/timeout style failure that the caller
    /// may retry at the operation level
    pub fn is_transient(&self) -> bool {
        match self {
            ReplayError::Remote(_) => true,
            ReplayError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ReplayError::ToolNotInstalled(tool) => {
                format!(
                    "'{}' was not found in PATH. Install the command-line client or set \"tool\" in the configuration.",
                    tool
                )
            }
            ReplayError::CheckpointNotFound(path) => {
                format!(
                    "No checkpoint at {:?}. Start a new run with 'replayvc replay --history <file>'.",
                    path
                )
            }
            ReplayError::CheckpointCorrupted(reason) => {
                format!(
                    "The checkpoint failed its integrity check ({}). Restore it from backup or regenerate the queue from the history file.",
                    reason
                )
            }
            ReplayError::InvalidConfiguration(reason) => {
                format!("Configuration rejected: {}. Fix the configuration file and retry.", reason)
            }
            _ => self.to_string(),
        }
    }
}
