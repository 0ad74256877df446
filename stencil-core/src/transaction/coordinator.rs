//! Lock, branch, execute, merge, push and clean up

use std::cell::Cell;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Deadline, RetryPolicy, Transaction, TransactionOptions, TransactionPhase, WorkingCopyLock};
use crate::credentials::CredentialChannel;
use crate::git::{RemoteUrl, WorkingCopy};
use crate::settings::RepositorySettings;
use crate::{Error, Result};

/// Runs transactions and locked brackets against one working copy
pub struct TransactionCoordinator<'a, W: WorkingCopy> {
    working_copy: &'a W,
    settings: &'a RepositorySettings,
    policy: RetryPolicy,
    credentials: Option<CredentialChannel<'a>>,
    phase: Cell<TransactionPhase>,
}

impl<'a, W: WorkingCopy> TransactionCoordinator<'a, W> {
    pub fn new(working_copy: &'a W, settings: &'a RepositorySettings) -> Self {
        Self {
            working_copy,
            settings,
            policy: RetryPolicy::default(),
            credentials: None,
            phase: Cell::new(TransactionPhase::Idle),
        }
    }

    /// Replace the merge/push retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Put credentials on the remote while the lock is held
    ///
    /// The remote URL lives in `.git/config`, so it is only rewritten once
    /// the working copy lock is ours and restored before it is released.
    pub fn with_credentials(mut self, channel: CredentialChannel<'a>) -> Self {
        self.credentials = Some(channel);
        self
    }

    /// Phase of the most recent operation
    pub fn phase(&self) -> TransactionPhase {
        self.phase.get()
    }

    fn enter(&self, phase: TransactionPhase) {
        debug!(from = %self.phase.get(), to = %phase, "Transaction phase");
        self.phase.set(phase);
    }

    fn authenticated<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        match &self.credentials {
            Some(channel) => channel.with_credentials(self.working_copy, |_| op()),
            None => op(),
        }
    }

    fn default_branch(&self) -> &str {
        &self.settings.branch
    }

    /// Run `work` on a fresh transaction branch and publish its result
    ///
    /// Any changes the work leaves uncommitted are committed on the
    /// transaction branch with `options.message`. When the working copy is
    /// writable the branch is merged into the default branch and pushed.
    /// When it is not, the work is discarded: the default branch is checked
    /// out again and the transaction branch deleted unmerged.
    ///
    /// On any failure after the branch exists, uncommitted changes are
    /// dropped, the default branch is restored and the transaction branch
    /// deleted before the original error is returned.
    pub fn perform<T>(
        &self,
        options: &TransactionOptions,
        work: impl FnOnce(&W) -> Result<T>,
    ) -> Result<T> {
        let tx = Transaction::new(options);
        let deadline = Deadline::after(tx.timeout);
        self.enter(TransactionPhase::Idle);

        let _lock = WorkingCopyLock::acquire(self.working_copy.git_dir(), &deadline)?;
        self.enter(TransactionPhase::LockHeld);

        self.authenticated(|| {
            self.preflight()?;
            self.assert_on_default_branch()?;
            self.enter(TransactionPhase::Validated);

            let result = match self.execute(&tx, options, &deadline, work) {
                Ok(value) => Ok(value),
                Err(err) => {
                    warn!(branch = %tx.branch_name, error = %err, "Transaction failed, rolling back");
                    self.rollback(&tx);
                    Err(err)
                }
            };

            self.finish(result)
        })
    }

    fn execute<T>(
        &self,
        tx: &Transaction,
        options: &TransactionOptions,
        deadline: &Deadline,
        work: impl FnOnce(&W) -> Result<T>,
    ) -> Result<T> {
        let wc = self.working_copy;

        wc.create_branch(&tx.branch_name)?;
        wc.checkout(&tx.branch_name)?;
        self.enter(TransactionPhase::BranchCreated);
        deadline.check()?;

        let value = work(wc)?;
        deadline.check()?;

        if let Some(commit) = wc.commit_all(&options.message, &self.settings.author())? {
            debug!(branch = %tx.branch_name, commit = %commit, "Committed transaction work");
        }
        self.enter(TransactionPhase::WorkExecuted);

        if self.is_writable(&tx.remote_name)? {
            self.merge_with_retry(tx, deadline)?;
            wc.delete_branch(&tx.branch_name)?;
            self.enter(TransactionPhase::Merged);

            if !wc.is_clean()? {
                return Err(Error::MergeInconsistency(tx.branch_name.clone()));
            }

            self.push_with_retry(&tx.remote_name, &tx.push_options, deadline)?;
        } else {
            info!(
                branch = %tx.branch_name,
                "Working copy is not writable, discarding transaction work"
            );
            wc.checkout(self.default_branch())?;
            wc.delete_branch(&tx.branch_name)?;
        }

        self.enter(TransactionPhase::Completed);
        Ok(value)
    }

    /// Run `op` under the lock after the same checks a transaction makes,
    /// without a transaction branch
    pub fn bracket<T>(
        &self,
        timeout: Duration,
        op: impl FnOnce(&W, &Deadline) -> Result<T>,
    ) -> Result<T> {
        let deadline = Deadline::after(timeout);
        let _lock = WorkingCopyLock::acquire(self.working_copy.git_dir(), &deadline)?;
        self.enter(TransactionPhase::LockHeld);

        self.authenticated(|| {
            self.preflight()?;
            self.assert_on_default_branch()?;
            self.enter(TransactionPhase::Validated);

            let result = op(self.working_copy, &deadline);
            if result.is_ok() {
                self.enter(TransactionPhase::Completed);
            }
            self.finish(result)
        })
    }

    /// Run a read-only `op` under the lock; only the layout is checked
    pub fn read<T>(&self, timeout: Duration, op: impl FnOnce(&W) -> Result<T>) -> Result<T> {
        let deadline = Deadline::after(timeout);
        let _lock = WorkingCopyLock::acquire(self.working_copy.git_dir(), &deadline)?;
        self.check_structure()?;
        op(self.working_copy)
    }

    fn check_structure(&self) -> Result<()> {
        let wc = self.working_copy;
        if !wc.root().is_dir() {
            return Err(Error::RepositoryStructure(format!(
                "{} is not a directory",
                wc.root().display()
            )));
        }
        if !wc.git_dir().is_dir() {
            return Err(Error::RepositoryStructure(format!(
                "{} has no version-control metadata",
                wc.root().display()
            )));
        }
        Ok(())
    }

    /// Layout is intact, there is history to branch from and nothing is
    /// pending
    pub fn preflight(&self) -> Result<()> {
        self.check_structure()?;

        if self.working_copy.head_commit()?.is_none() {
            return Err(Error::RepositoryStructure(format!(
                "{} has no commits; bootstrap the catalog first",
                self.working_copy.root().display()
            )));
        }

        if !self.working_copy.is_clean()? {
            return Err(Error::DirtyWorkingCopy(self.working_copy.root().to_path_buf()));
        }

        Ok(())
    }

    /// HEAD must be on the configured default branch
    pub fn assert_on_default_branch(&self) -> Result<()> {
        let expected = self.default_branch();
        match self.working_copy.current_branch()? {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(Error::BranchState {
                expected: expected.to_string(),
                actual,
            }),
            None => Err(Error::BranchState {
                expected: expected.to_string(),
                actual: "detached HEAD".to_string(),
            }),
        }
    }

    /// `remote` carries a username and password, and the index accepts writes
    pub fn is_writable(&self, remote: &str) -> Result<bool> {
        let Some(url) = self.working_copy.remote_url(remote)? else {
            return Ok(false);
        };
        let authenticated = RemoteUrl::parse(&url)
            .map(|url| url.has_credentials())
            .unwrap_or(false);

        Ok(authenticated && self.working_copy.index_writable())
    }

    /// Merge the transaction branch into the default branch
    ///
    /// Between attempts the default branch is hard-reset to where it was
    /// before the first attempt and the transaction branch checked out again.
    fn merge_with_retry(&self, tx: &Transaction, deadline: &Deadline) -> Result<()> {
        let wc = self.working_copy;
        let default = self.default_branch();
        let author = self.settings.author();
        let base = wc.branch_head(default)?.ok_or_else(|| Error::BranchState {
            expected: default.to_string(),
            actual: "missing".to_string(),
        })?;

        self.policy.run(
            "merge",
            deadline,
            |attempt| {
                self.enter(TransactionPhase::Merging(attempt));
                wc.checkout(default)?;
                wc.merge(&tx.branch_name, &author)
            },
            |_| {
                if wc.current_branch()?.as_deref() == Some(default) {
                    wc.reset_hard(&base)?;
                }
                wc.checkout(&tx.branch_name)
            },
        )?;

        info!(branch = %tx.branch_name, into = %default, "Merged transaction branch");
        Ok(())
    }

    /// Push the default branch, pulling with rebase between attempts
    pub fn push_with_retry(
        &self,
        remote: &str,
        push_options: &[String],
        deadline: &Deadline,
    ) -> Result<()> {
        let wc = self.working_copy;
        let branch = self.default_branch();

        self.policy.run(
            "push",
            deadline,
            |attempt| {
                self.enter(TransactionPhase::Pushing(attempt));
                wc.push(remote, branch, push_options)
            },
            |_| wc.pull(remote, branch),
        )?;

        info!(remote = %remote, branch = %branch, "Pushed catalog");
        Ok(())
    }

    /// Best-effort return to the default branch without the transaction branch
    fn rollback(&self, tx: &Transaction) {
        self.enter(TransactionPhase::RollingBack);
        let wc = self.working_copy;

        if let Err(e) = wc.discard_changes() {
            warn!(error = %e, "Rollback: failed to discard changes");
        }
        if let Err(e) = wc.checkout(self.default_branch()) {
            warn!(branch = %self.default_branch(), error = %e, "Rollback: failed to check out default branch");
        }
        match wc.local_branches() {
            Ok(branches) if branches.contains(&tx.branch_name) => {
                if let Err(e) = wc.delete_branch(&tx.branch_name) {
                    warn!(branch = %tx.branch_name, error = %e, "Rollback: failed to delete transaction branch");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Rollback: failed to list branches"),
        }

        self.enter(TransactionPhase::RolledBack);
    }

    /// Re-assert default branch and clean status
    ///
    /// A failed check replaces a success; after a failure the original error
    /// is kept and the check failure only logged.
    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        let state = self.assert_on_default_branch().and_then(|()| {
            if self.working_copy.is_clean()? {
                Ok(())
            } else {
                Err(Error::DirtyWorkingCopy(self.working_copy.root().to_path_buf()))
            }
        });

        match (result, state) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(state_err)) => Err(state_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(state_err)) => {
                warn!(error = %state_err, "Working copy left in unexpected state");
                Err(err)
            }
        }
    }
}
