//! Git working copy detection, status and configuration

use std::fs;
use std::path::{Path, PathBuf};

use git2::{ConfigLevel, IndexAddOption, Repository, ResetType, Signature, Status, StatusOptions};

use crate::settings::Author;
use crate::{Error, Result};

/// Information about a git remote
#[derive(Debug, Clone)]
pub struct RemoteInfo {
    /// Name of the remote (e.g., "origin")
    pub name: String,
    /// URL of the remote
    pub url: String,
}

/// A git working copy holding a template catalog
pub struct GitRepo {
    /// The underlying git2 repository
    repo: Repository,
    /// Path to the working copy root
    root: PathBuf,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open the working copy rooted exactly at `path`
    ///
    /// Unlike discovery, parent directories are never searched: a catalog
    /// nested inside another repository must have its own `.git`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::RepositoryNotFound(path.to_path_buf()));
        }
        if !Self::is_git_repo(path) {
            return Err(Error::NotAGitRepository(path.to_path_buf()));
        }

        let repo = Repository::open(path)?;
        let root = repo
            .workdir()
            .ok_or_else(|| {
                Error::RepositoryStructure("Bare repositories are not supported".to_string())
            })?
            .to_path_buf();

        Ok(Self { repo, root })
    }

    /// Get the working copy root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the `.git` metadata directory
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Check if the given path holds git metadata of its own
    pub fn is_git_repo(path: impl AsRef<Path>) -> bool {
        path.as_ref().join(".git").exists()
    }

    /// Get the URL of a remote as configured, if the remote exists
    ///
    /// This is the raw `remote.<name>.url` value; `url.<base>.insteadOf`
    /// rewriting only applies to the transport.
    pub fn remote_url(&self, name: &str) -> Result<Option<String>> {
        self.config_value(&format!("remote.{}.url", name))
    }

    /// Point a remote at `url`, creating the remote if needed
    pub fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        match self.remote_url(name)? {
            Some(current) if current == url => Ok(()),
            Some(_) => Ok(self.repo.remote_set_url(name, url)?),
            None => {
                self.repo.remote(name, url)?;
                Ok(())
            }
        }
    }

    /// List all remotes
    pub fn list_remotes(&self) -> Result<Vec<RemoteInfo>> {
        let remotes = self.repo.remotes()?;

        let mut result = Vec::new();
        for remote_name in remotes.iter().flatten() {
            if let Some(url) = self.remote_url(remote_name)? {
                result.push(RemoteInfo {
                    name: remote_name.to_string(),
                    url,
                });
            }
        }

        Ok(result)
    }

    /// Get the current branch name
    ///
    /// An unborn branch (no commits yet) is still reported by name.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = self.repo.find_reference("HEAD")?;
        match head.symbolic_target() {
            Some(target) => Ok(target.strip_prefix("refs/heads/").map(str::to_string)),
            // Detached HEAD
            None => Ok(None),
        }
    }

    /// SHA of the commit HEAD points at; a branch without commits yields `None`
    pub fn head_commit(&self) -> Result<Option<String>> {
        Ok(self.head_commit_object()?.map(|commit| commit.id().to_string()))
    }

    fn head_commit_object(&self) -> Result<Option<git2::Commit<'_>>> {
        if self.head_is_unborn()? {
            return Ok(None);
        }
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// HEAD names a branch whose ref does not exist yet
    ///
    /// Checked on the symbolic ref itself: libgit2 reports an unborn HEAD
    /// with a generic error code from some entry points.
    fn head_is_unborn(&self) -> Result<bool> {
        let head = self.repo.find_reference("HEAD")?;
        Ok(match head.symbolic_target() {
            Some(target) => self.repo.refname_to_id(target).is_err(),
            None => false,
        })
    }

    /// Whether status shows no modified, staged, deleted or untracked entries
    pub fn is_clean(&self) -> Result<bool> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        Ok(self.repo.statuses(Some(&mut options))?.is_empty())
    }

    /// Whether the index (or the metadata directory, before an index exists) is writable
    pub fn index_writable(&self) -> bool {
        let index = self.git_dir().join("index");
        let target = if index.exists() {
            index
        } else {
            self.git_dir().to_path_buf()
        };

        fs::metadata(target)
            .map(|meta| !meta.permissions().readonly())
            .unwrap_or(false)
    }

    /// Stage everything in the working copy and commit it on the current branch
    ///
    /// Returns `None` when the staged tree equals the parent tree.
    pub fn commit_all(&self, message: &str, author: &Author) -> Result<Option<String>> {
        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent = self.head_commit_object()?;

        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
            return Ok(None);
        }

        let signature = Signature::now(&author.name, &author.email)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

        tracing::debug!(commit = %oid, "Committed working copy changes");
        Ok(Some(oid.to_string()))
    }

    /// Throw away every uncommitted change, including untracked files
    pub fn discard_changes(&self) -> Result<()> {
        match self.head_commit_object()? {
            Some(commit) => self.repo.reset(commit.as_object(), ResetType::Hard, None)?,
            None => {
                let mut index = self.repo.index()?;
                index.clear()?;
                index.write()?;
            }
        }
        self.repo.cleanup_state()?;

        let mut options = StatusOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(false);

        let untracked: Vec<PathBuf> = self
            .repo
            .statuses(Some(&mut options))?
            .iter()
            .filter(|entry| entry.status().contains(Status::WT_NEW))
            .filter_map(|entry| entry.path().map(|p| self.root.join(p)))
            .collect();

        for path in untracked {
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }

        Ok(())
    }

    /// Set a value in the working copy's local git configuration
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let mut config = self.repo.config()?.open_level(ConfigLevel::Local)?;
        config.set_str(key, value)?;
        Ok(())
    }

    /// Read a string value from the effective git configuration
    pub fn config_value(&self, key: &str) -> Result<Option<String>> {
        match self.repo.config()?.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{author, bare_remote, clone_of, init_working_copy, REMOTE_URL};
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_path() {
        let temp = TempDir::new().unwrap();
        let result = GitRepo::open(temp.path().join("absent"));
        assert!(matches!(result, Err(Error::RepositoryNotFound(_))));
    }

    #[test]
    fn test_open_non_git_dir() {
        let temp = TempDir::new().unwrap();
        let result = GitRepo::open(temp.path());
        assert!(matches!(result, Err(Error::NotAGitRepository(_))));
        assert!(!GitRepo::is_git_repo(temp.path()));
    }

    #[test]
    fn test_unborn_branch_reported_by_name() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());

        assert_eq!(repo.current_branch().unwrap(), Some("main".to_string()));
        assert_eq!(repo.head_commit().unwrap(), None);
    }

    #[test]
    fn test_empty_clone_has_no_head_commit() {
        let temp = TempDir::new().unwrap();
        let remote = bare_remote(&temp.path().join("remote.git"));
        let repo = clone_of(&remote, &temp.path().join("clone"));

        assert_eq!(repo.head_commit().unwrap(), None);
        assert_eq!(repo.current_branch().unwrap(), Some("main".to_string()));

        fs::write(repo.root().join("stray.json"), "{}").unwrap();
        repo.discard_changes().unwrap();
        assert!(repo.is_clean().unwrap());

        fs::write(repo.root().join("manifest.json"), "{}").unwrap();
        let first = repo.commit_all("First", &author()).unwrap();
        assert!(first.is_some());
        assert_eq!(repo.head_commit().unwrap(), first);
    }

    #[test]
    fn test_commit_all_and_clean_status() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());

        fs::write(temp.path().join("manifest.json"), "{}").unwrap();
        assert!(!repo.is_clean().unwrap());

        let first = repo.commit_all("Add manifest", &author()).unwrap();
        assert!(first.is_some());
        assert!(repo.is_clean().unwrap());
        assert_eq!(repo.head_commit().unwrap(), first);

        // Nothing new to commit
        assert_eq!(repo.commit_all("Again", &author()).unwrap(), None);
    }

    #[test]
    fn test_commit_all_records_deletions() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());

        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::write(temp.path().join("b.txt"), "b").unwrap();
        repo.commit_all("Add files", &author()).unwrap();

        fs::remove_file(temp.path().join("a.txt")).unwrap();
        assert!(repo.commit_all("Remove a", &author()).unwrap().is_some());
        assert!(repo.is_clean().unwrap());

        let head = repo.inner().head().unwrap().peel_to_tree().unwrap();
        assert!(head.get_name("a.txt").is_none());
        assert!(head.get_name("b.txt").is_some());
    }

    #[test]
    fn test_discard_changes_removes_untracked() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());

        fs::write(temp.path().join("kept.txt"), "original").unwrap();
        repo.commit_all("Seed", &author()).unwrap();

        fs::write(temp.path().join("kept.txt"), "modified").unwrap();
        fs::create_dir(temp.path().join("stray")).unwrap();
        fs::write(temp.path().join("stray").join("file.json"), "{}").unwrap();

        repo.discard_changes().unwrap();

        assert!(repo.is_clean().unwrap());
        assert_eq!(
            fs::read_to_string(temp.path().join("kept.txt")).unwrap(),
            "original"
        );
        assert!(!temp.path().join("stray").exists());
    }

    #[test]
    fn test_remote_url_roundtrip() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());

        assert_eq!(repo.remote_url("origin").unwrap(), None);
        repo.set_remote_url("origin", "https://example.com/a.git").unwrap();
        repo.set_remote_url("origin", "https://example.com/b.git").unwrap();
        assert_eq!(
            repo.remote_url("origin").unwrap().as_deref(),
            Some("https://example.com/b.git")
        );
        assert_eq!(repo.list_remotes().unwrap().len(), 1);
    }

    #[test]
    fn test_remote_url_is_not_rewritten() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());
        repo.set_remote_url("origin", REMOTE_URL).unwrap();
        repo.set_config("url.file:///srv/mirror/catalog.git.insteadOf", REMOTE_URL)
            .unwrap();

        assert_eq!(repo.remote_url("origin").unwrap().as_deref(), Some(REMOTE_URL));
        assert_eq!(repo.list_remotes().unwrap()[0].url, REMOTE_URL);

        repo.set_remote_url("origin", REMOTE_URL).unwrap();
        assert_eq!(repo.remote_url("origin").unwrap().as_deref(), Some(REMOTE_URL));
    }

    #[test]
    fn test_local_config() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());

        repo.set_config("stencil.marker", "yes").unwrap();
        assert_eq!(
            repo.config_value("stencil.marker").unwrap().as_deref(),
            Some("yes")
        );
        assert!(repo.index_writable());
    }
}
