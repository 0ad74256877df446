//! Error types for Stencil

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for Stencil operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Stencil operations
#[derive(Error, Debug)]
pub enum Error {
    /// One or more settings rules are violated
    #[error("Configuration error: {}", .0.join("; "))]
    Configuration(Vec<String>),

    /// A mirror operation was attempted before `configure()`
    #[error("Repository mirror is not configured")]
    NotConfigured,

    /// The catalog path does not exist
    #[error("Catalog repository not found at {}", .0.display())]
    RepositoryNotFound(PathBuf),

    /// The catalog path exists but holds no git metadata
    #[error("Not a git repository: {}", .0.display())]
    NotAGitRepository(PathBuf),

    /// The working copy layout is broken
    #[error("Repository structure error: {0}")]
    RepositoryStructure(String),

    /// The working copy points at a different remote than configured
    #[error(
        "Remote mismatch: working copy origin is {existing} but the configured URL is {configured}. \
         Remove the catalog directory and retry."
    )]
    RemoteMismatch { configured: String, existing: String },

    /// The working copy has uncommitted changes
    #[error("Working copy at {} has uncommitted changes", .0.display())]
    DirtyWorkingCopy(PathBuf),

    /// HEAD is not where it must be
    #[error("Expected branch '{expected}' to be checked out, found '{actual}'")]
    BranchState { expected: String, actual: String },

    /// A merge (or rebase) produced conflicts
    #[error("Merge conflict: {0}")]
    MergeConflict(String),

    /// A merge reported success but left the working copy dirty
    #[error("Working copy is dirty after merging {0}")]
    MergeInconsistency(String),

    /// The remote refused the push
    #[error("Push rejected: {0}")]
    PushRejected(String),

    /// The remote has no branch of that name yet
    #[error("Remote branch not found: {0}")]
    RemoteBranchMissing(String),

    /// The transaction deadline expired
    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    /// The remote URL is not usable for authenticated transport
    #[error("Invalid remote URL: {0}")]
    InvalidRemoteUrl(String),

    /// A version-control failure surfaced through the credential channel
    #[error("Sync error: {0}")]
    Sync(String),

    /// git2 error
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// A git subprocess failed
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure may clear up on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::MergeConflict(_) | Error::PushRejected(_) | Error::Git(_) | Error::Command { .. }
        )
    }

    /// Whether the error comes straight from the version-control layer
    /// rather than from Stencil's own taxonomy
    pub fn is_vcs_failure(&self) -> bool {
        matches!(
            self,
            Error::Git(_) | Error::Command { .. } | Error::Io(_) | Error::Json(_)
        )
    }
}
