//! Stencil Core - git-backed template catalog mirrors
//!
//! This crate keeps a local working copy of a shared template catalog in sync
//! with a remote git repository. Mutations run as transactions: serialized by
//! a file lock, isolated on their own branch, merged and pushed with bounded
//! retries, and rolled back to a clean default branch on failure.

pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod error;
pub mod git;
pub mod mirror;
pub mod secrets;
pub mod settings;
pub mod sync;
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_support;

pub use bootstrap::{BootstrapNormalizer, BootstrapReport};
pub use config::Config;
pub use credentials::CredentialChannel;
pub use error::{Error, Result};
pub use git::{GitRepo, WorkingCopy};
pub use mirror::RepositoryMirror;
pub use secrets::Secrets;
pub use settings::{Author, RepositorySettings, SettingsUpdate};
pub use sync::{
    CatalogListener, CommandListener, CommitCache, FileCommitCache, LogListener, SyncOrchestrator,
    SyncOutcome,
};
pub use transaction::{TransactionCoordinator, TransactionOptions, TransactionPhase};
