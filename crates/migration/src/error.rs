//! Migration error types

use std::path::PathBuf;

use cnxrepo_core::{ItemId, RepoError};
use thiserror::Error;

use crate::work_queue::QueueClosed;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors raised while replaying a legacy export
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Error from the repository
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Filesystem error while reading the export
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The export does not follow the expected layout
    #[error("invalid export at {path}: {reason}")]
    InvalidExport {
        /// Offending path
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// A version directory is numbered below the next expected version
    #[error("out of order version directory for {item}: found {found}, expected at least {expected}")]
    OutOfOrderVersion {
        /// Item being migrated
        item: ItemId,
        /// Version number of the directory
        found: u32,
        /// Next expected version
        expected: u32,
    },

    /// The item directory holds no version directories
    #[error("{item} has no versions")]
    NoVersions {
        /// Item being migrated
        item: ItemId,
    },

    /// A step kept failing until the attempt budget ran out
    #[error("{}", exhausted_message(.item, .version, .attempts, .last_error))]
    AttemptsExhausted {
        /// Item being migrated
        item: ItemId,
        /// Version being appended, if the failing step was an append
        version: Option<u32>,
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: RepoError,
    },

    /// A stage's worker threads could not be started
    #[error("failed to start migration workers: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// A stage's work queue stopped accepting items
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    /// Invalid migration configuration
    #[error("invalid migration config: {0}")]
    Config(String),

    /// At least one item failed; the others are migrated
    #[error("migration finished with {failed} failed item(s)")]
    RunFailed {
        /// Number of failed items
        failed: usize,
    },
}

fn exhausted_message(
    item: &ItemId,
    version: &Option<u32>,
    attempts: &u32,
    last_error: &RepoError,
) -> String {
    match version {
        Some(v) => format!(
            "failed after {} attempts: {}/{}: {}",
            attempts, item, v, last_error
        ),
        None => format!("failed after {} attempts: {}: {}", attempts, item, last_error),
    }
}

impl MigrationError {
    /// Wrap an I/O error with the path that produced it
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }

    /// Build an `InvalidExport` error
    pub fn invalid_export(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MigrationError::InvalidExport {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
