//! Git operations for Stencil
//!
//! This module provides the working-copy primitives the transaction layer is
//! built on: status, branches, merges, remote configuration, push and pull.

mod branch;
mod clone;
mod repo;

use std::path::Path;

pub use clone::{redact_credentials, RemoteUrl};
pub use repo::{GitRepo, RemoteInfo};

use crate::settings::Author;
use crate::Result;

/// Primitive version-control operations on one working copy
///
/// [`GitRepo`] is the production implementation; the transaction coordinator
/// only talks to this trait.
pub trait WorkingCopy {
    /// Working copy root
    fn root(&self) -> &Path;

    /// Version-control metadata directory
    fn git_dir(&self) -> &Path;

    /// Checked-out branch, `None` when HEAD is detached
    fn current_branch(&self) -> Result<Option<String>>;

    /// Local branch names
    fn local_branches(&self) -> Result<Vec<String>>;

    /// Newest commit on the current branch
    fn head_commit(&self) -> Result<Option<String>>;

    /// Tip of a local branch
    fn branch_head(&self, branch: &str) -> Result<Option<String>>;

    /// No changed, added, deleted or untracked entries
    fn is_clean(&self) -> Result<bool>;

    /// Whether the index accepts writes
    fn index_writable(&self) -> bool;

    fn create_branch(&self, name: &str) -> Result<()>;

    fn checkout(&self, name: &str) -> Result<()>;

    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Merge `branch` into the current branch
    fn merge(&self, branch: &str, author: &Author) -> Result<()>;

    /// Hard-reset the current branch to `commit`
    fn reset_hard(&self, commit: &str) -> Result<()>;

    /// Drop all uncommitted and untracked changes
    fn discard_changes(&self) -> Result<()>;

    /// Commit everything; `None` when there was nothing to commit
    fn commit_all(&self, message: &str, author: &Author) -> Result<Option<String>>;

    fn remote_url(&self, remote: &str) -> Result<Option<String>>;

    fn set_remote_url(&self, remote: &str, url: &str) -> Result<()>;

    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    fn push(&self, remote: &str, branch: &str, push_options: &[String]) -> Result<()>;

    /// Pull with rebase
    fn pull(&self, remote: &str, branch: &str) -> Result<()>;
}

impl WorkingCopy for GitRepo {
    fn root(&self) -> &Path {
        GitRepo::root(self)
    }

    fn git_dir(&self) -> &Path {
        GitRepo::git_dir(self)
    }

    fn current_branch(&self) -> Result<Option<String>> {
        GitRepo::current_branch(self)
    }

    fn local_branches(&self) -> Result<Vec<String>> {
        self.list_local_branches()
    }

    fn head_commit(&self) -> Result<Option<String>> {
        GitRepo::head_commit(self)
    }

    fn branch_head(&self, branch: &str) -> Result<Option<String>> {
        GitRepo::branch_head(self, branch)
    }

    fn is_clean(&self) -> Result<bool> {
        GitRepo::is_clean(self)
    }

    fn index_writable(&self) -> bool {
        GitRepo::index_writable(self)
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        GitRepo::create_branch(self, name)
    }

    fn checkout(&self, name: &str) -> Result<()> {
        self.checkout_branch(name)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        GitRepo::delete_branch(self, name)
    }

    fn merge(&self, branch: &str, author: &Author) -> Result<()> {
        self.merge_branch(branch, author)
    }

    fn reset_hard(&self, commit: &str) -> Result<()> {
        GitRepo::reset_hard(self, commit)
    }

    fn discard_changes(&self) -> Result<()> {
        GitRepo::discard_changes(self)
    }

    fn commit_all(&self, message: &str, author: &Author) -> Result<Option<String>> {
        GitRepo::commit_all(self, message, author)
    }

    fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        GitRepo::remote_url(self, remote)
    }

    fn set_remote_url(&self, remote: &str, url: &str) -> Result<()> {
        GitRepo::set_remote_url(self, remote, url)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        GitRepo::set_config(self, key, value)
    }

    fn push(&self, remote: &str, branch: &str, push_options: &[String]) -> Result<()> {
        GitRepo::push(self, remote, branch, push_options)
    }

    fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        GitRepo::pull(self, remote, branch)
    }
}
