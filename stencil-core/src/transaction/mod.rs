//! Transactional mutation of a catalog working copy
//!
//! A transaction serializes on a file lock, runs caller work on an isolated
//! `tx/...` branch, then merges and pushes the result with bounded retries.
//! Whatever happens, the working copy ends up back on its default branch.

pub mod coordinator;
pub mod lock;
pub mod retry;

use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::{Error, Result};

pub use coordinator::TransactionCoordinator;
pub use lock::WorkingCopyLock;
pub use retry::RetryPolicy;

/// Retries after the first attempt for merges and pushes
pub const MAX_RETRIES: u32 = 3;

/// Wall-clock bound on one transaction
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote every transaction talks to unless told otherwise
pub const DEFAULT_REMOTE: &str = "origin";

/// Commit message for work left uncommitted by the caller
pub const DEFAULT_MESSAGE: &str = "Update template catalog";

/// A point in time after which a transaction gives up
///
/// Checked cooperatively at phase boundaries; nothing is interrupted
/// mid-operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    /// Deadline `limit` from now
    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.start.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.limit
    }

    /// Fail with [`Error::Timeout`] once expired
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(Error::Timeout(self.limit))
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, cut short at the deadline
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        std::thread::sleep(duration.min(self.remaining()));
        self.check()
    }
}

/// Per-call knobs for a transaction
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Remote to merge against and push to
    pub remote: String,
    /// Passed to the remote as `--push-option` values
    pub push_options: Vec<String>,
    /// Bound on the whole transaction
    pub timeout: Duration,
    /// Message for committing work the caller left uncommitted
    pub message: String,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            push_options: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

impl TransactionOptions {
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn push_option(mut self, option: impl Into<String>) -> Self {
        self.push_options.push(option.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// One unit of work against the catalog
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Isolated branch the work runs on
    pub branch_name: String,
    pub remote_name: String,
    pub push_options: Vec<String>,
    pub timeout: Duration,
}

impl Transaction {
    pub fn new(options: &TransactionOptions) -> Self {
        Self {
            branch_name: Self::generate_branch_name(),
            remote_name: options.remote.clone(),
            push_options: options.push_options.clone(),
            timeout: options.timeout,
        }
    }

    /// `tx/<UTC timestamp>-<random hex>`
    fn generate_branch_name() -> String {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%6fZ");
        let random = Uuid::new_v4().simple().to_string();
        format!("tx/{}-{}", stamp, &random[..8])
    }
}

/// Where a transaction currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPhase {
    #[default]
    Idle,
    /// Exclusive lock acquired
    LockHeld,
    /// Preflight checks passed
    Validated,
    /// Transaction branch created and checked out
    BranchCreated,
    /// Caller work finished
    WorkExecuted,
    /// Merging into the default branch (attempt number)
    Merging(u32),
    Merged,
    /// Pushing the default branch (attempt number)
    Pushing(u32),
    Completed,
    RollingBack,
    RolledBack,
}

impl TransactionPhase {
    /// Get a human-readable description
    pub fn description(&self) -> String {
        match self {
            TransactionPhase::Idle => "Idle".to_string(),
            TransactionPhase::LockHeld => "Holding working copy lock".to_string(),
            TransactionPhase::Validated => "Working copy validated".to_string(),
            TransactionPhase::BranchCreated => "Transaction branch checked out".to_string(),
            TransactionPhase::WorkExecuted => "Work executed".to_string(),
            TransactionPhase::Merging(attempt) => format!("Merging (attempt {})", attempt),
            TransactionPhase::Merged => "Merged into default branch".to_string(),
            TransactionPhase::Pushing(attempt) => format!("Pushing (attempt {})", attempt),
            TransactionPhase::Completed => "Transaction complete".to_string(),
            TransactionPhase::RollingBack => "Rolling back".to_string(),
            TransactionPhase::RolledBack => "Rolled back".to_string(),
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionPhase::Completed | TransactionPhase::RolledBack
        )
    }
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name_shape() {
        let tx = Transaction::new(&TransactionOptions::default());
        let name = tx.branch_name.strip_prefix("tx/").unwrap();
        let (stamp, random) = name.rsplit_once('-').unwrap();

        assert!(stamp.ends_with('Z'));
        assert!(stamp.contains('T'));
        assert_eq!(random.len(), 8);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(git2::Reference::is_valid_name(&format!("refs/heads/{}", tx.branch_name)));
    }

    #[test]
    fn test_branch_names_are_unique() {
        let options = TransactionOptions::default();
        let a = Transaction::new(&options);
        let b = Transaction::new(&options);
        assert_ne!(a.branch_name, b.branch_name);
    }

    #[test]
    fn test_options_builder() {
        let options = TransactionOptions::default()
            .remote("upstream")
            .push_option("ci.skip")
            .timeout(Duration::from_secs(5))
            .message("Import template");

        let tx = Transaction::new(&options);
        assert_eq!(tx.remote_name, "upstream");
        assert_eq!(tx.push_options, vec!["ci.skip".to_string()]);
        assert_eq!(tx.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_deadline() {
        let open = Deadline::after(Duration::from_secs(60));
        assert!(!open.expired());
        assert!(open.check().is_ok());

        let closed = Deadline::after(Duration::ZERO);
        assert!(closed.expired());
        assert_eq!(closed.remaining(), Duration::ZERO);
        assert!(matches!(closed.check(), Err(Error::Timeout(_))));
        assert!(matches!(
            closed.sleep(Duration::from_secs(10)),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TransactionPhase::Merging(2).to_string(), "Merging (attempt 2)");
        assert!(TransactionPhase::RolledBack.is_terminal());
        assert!(!TransactionPhase::Pushing(1).is_terminal());
    }
}
