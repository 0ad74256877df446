//! Branch creation, checkout and merging for catalog working copies

use git2::build::CheckoutBuilder;
use git2::{BranchType, Signature};

use super::repo::GitRepo;
use crate::settings::{Author, DEFAULT_BRANCH};
use crate::{Error, Result};

impl GitRepo {
    /// Whether a local branch exists
    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        match self.inner().find_branch(name, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// SHA of the tip of a local branch
    pub fn branch_head(&self, name: &str) -> Result<Option<String>> {
        match self.inner().find_branch(name, BranchType::Local) {
            Ok(branch) => Ok(branch.get().target().map(|oid| oid.to_string())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a local branch at the current HEAD commit
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let commit = self.inner().head()?.peel_to_commit()?;
        self.inner().branch(name, &commit, false)?;
        Ok(())
    }

    /// Check out a local branch
    ///
    /// Uses a safe checkout: local modifications are never overwritten.
    pub fn checkout_branch(&self, name: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", name);
        let target = self.inner().revparse_single(&refname)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.inner().checkout_tree(&target, Some(&mut checkout))?;
        self.inner().set_head(&refname)?;

        Ok(())
    }

    /// Delete a local branch
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.inner().find_branch(name, BranchType::Local)?.delete()?;
        Ok(())
    }

    /// Merge a local branch into the current branch
    ///
    /// Fast-forwards when possible, otherwise records a merge commit.
    /// Conflicts fail with [`Error::MergeConflict`] and leave the merge state
    /// in place for the caller to reset.
    pub fn merge_branch(&self, name: &str, author: &Author) -> Result<()> {
        let repo = self.inner();
        let their_ref = repo.find_reference(&format!("refs/heads/{}", name))?;
        let theirs = repo.reference_to_annotated_commit(&their_ref)?;

        let (analysis, _) = repo.merge_analysis(&[&theirs])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }

        if analysis.is_fast_forward() {
            let target = repo.find_object(theirs.id(), None)?;
            let mut checkout = CheckoutBuilder::new();
            checkout.safe();
            repo.checkout_tree(&target, Some(&mut checkout))?;

            let mut head = repo.head()?;
            head.set_target(theirs.id(), &format!("Fast-forward to {}", name))?;
            tracing::debug!(branch = %name, commit = %theirs.id(), "Fast-forwarded");
            return Ok(());
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.merge(&[&theirs], None, Some(&mut checkout))?;

        let mut index = repo.index()?;
        if index.has_conflicts() {
            let paths: Vec<String> = index
                .conflicts()?
                .filter_map(|c| c.ok())
                .filter_map(|c| c.our.or(c.their))
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .collect();
            return Err(Error::MergeConflict(format!(
                "merging {} conflicts in {}",
                name,
                paths.join(", ")
            )));
        }

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let ours = repo.head()?.peel_to_commit()?;
        let their_commit = repo.find_commit(theirs.id())?;
        let signature = Signature::now(&author.name, &author.email)?;

        let oid = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &format!("Merge branch '{}'", name),
            &tree,
            &[&ours, &their_commit],
        )?;
        repo.cleanup_state()?;

        tracing::debug!(branch = %name, commit = %oid, "Recorded merge commit");
        Ok(())
    }

    /// Hard-reset the current branch to a commit, clearing any merge state
    pub fn reset_hard(&self, commit: &str) -> Result<()> {
        let target = self.inner().revparse_single(commit)?;
        self.inner()
            .reset(&target, git2::ResetType::Hard, None)?;
        self.inner().cleanup_state()?;
        Ok(())
    }

    /// Make `name` the checked-out branch
    ///
    /// Priority:
    /// 1. Already on `name`
    /// 2. Existing local branch
    /// 3. Remote tracking branch `<remote>/<name>`
    /// 4. Unborn HEAD is re-pointed at `name`
    /// 5. New branch from the current HEAD commit
    pub fn switch_to_branch(&self, name: &str, remote: &str) -> Result<()> {
        if self.current_branch()?.as_deref() == Some(name) {
            return Ok(());
        }

        if self.branch_exists(name)? {
            return self.checkout_branch(name);
        }

        let tracking = format!("refs/remotes/{}/{}", remote, name);
        if let Ok(remote_ref) = self.inner().find_reference(&tracking) {
            let commit = remote_ref.peel_to_commit()?;
            let mut branch = self.inner().branch(name, &commit, false)?;
            branch.set_upstream(Some(&format!("{}/{}", remote, name)))?;
            return self.checkout_branch(name);
        }

        if self.head_commit()?.is_none() {
            self.inner().set_head(&format!("refs/heads/{}", name))?;
            return Ok(());
        }

        self.create_branch(name)?;
        self.checkout_branch(name)
    }

    /// Get the branch the remote's HEAD points at
    ///
    /// Falls back to `main` when the remote HEAD is unknown.
    pub fn remote_default_branch(&self, remote: &str) -> Result<String> {
        let head = format!("refs/remotes/{}/HEAD", remote);
        if let Ok(reference) = self.inner().find_reference(&head) {
            let prefix = format!("refs/remotes/{}/", remote);
            if let Some(branch) = reference
                .symbolic_target()
                .and_then(|target| target.strip_prefix(prefix.as_str()))
            {
                return Ok(branch.to_string());
            }
        }

        // Check for remote main / master
        for candidate in [DEFAULT_BRANCH, "master"] {
            let tracking = format!("refs/remotes/{}/{}", remote, candidate);
            if self.inner().find_reference(&tracking).is_ok() {
                return Ok(candidate.to_string());
            }
        }

        Ok(DEFAULT_BRANCH.to_string())
    }

    /// List all local branches
    pub fn list_local_branches(&self) -> Result<Vec<String>> {
        let mut branches = Vec::new();

        for branch in self.inner().branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name().ok().flatten() {
                branches.push(name.to_string());
            }
        }

        branches.sort();
        Ok(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{author, init_working_copy, seed_commit};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_create_checkout_delete() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());
        seed_commit(&repo, "manifest.json", "{}");

        repo.create_branch("tx/one").unwrap();
        repo.checkout_branch("tx/one").unwrap();
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("tx/one"));

        repo.checkout_branch("main").unwrap();
        repo.delete_branch("tx/one").unwrap();
        assert_eq!(repo.list_local_branches().unwrap(), vec!["main".to_string()]);
    }

    #[test]
    fn test_fast_forward_merge() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());
        seed_commit(&repo, "manifest.json", "{}");

        repo.create_branch("feature").unwrap();
        repo.checkout_branch("feature").unwrap();
        fs::write(temp.path().join("new.txt"), "hello").unwrap();
        let tip = repo.commit_all("Add new", &author()).unwrap();

        repo.checkout_branch("main").unwrap();
        assert!(!temp.path().join("new.txt").exists());

        repo.merge_branch("feature", &author()).unwrap();
        assert_eq!(repo.head_commit().unwrap(), tip);
        assert!(temp.path().join("new.txt").exists());
        assert!(repo.is_clean().unwrap());
    }

    #[test]
    fn test_true_merge_creates_merge_commit() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());
        seed_commit(&repo, "manifest.json", "{}");

        repo.create_branch("feature").unwrap();
        repo.checkout_branch("feature").unwrap();
        fs::write(temp.path().join("feature.txt"), "f").unwrap();
        repo.commit_all("Feature", &author()).unwrap();

        repo.checkout_branch("main").unwrap();
        fs::write(temp.path().join("main.txt"), "m").unwrap();
        repo.commit_all("Main", &author()).unwrap();

        repo.merge_branch("feature", &author()).unwrap();
        let head = repo.inner().head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 2);
        assert!(temp.path().join("feature.txt").exists());
        assert!(temp.path().join("main.txt").exists());
        assert!(repo.is_clean().unwrap());
    }

    #[test]
    fn test_conflicting_merge_then_reset() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());
        let base = seed_commit(&repo, "manifest.json", "{}");

        repo.create_branch("feature").unwrap();
        repo.checkout_branch("feature").unwrap();
        fs::write(temp.path().join("manifest.json"), "{\"side\": \"feature\"}").unwrap();
        repo.commit_all("Feature edit", &author()).unwrap();

        repo.checkout_branch("main").unwrap();
        fs::write(temp.path().join("manifest.json"), "{\"side\": \"main\"}").unwrap();
        let main_tip = repo.commit_all("Main edit", &author()).unwrap().unwrap();
        assert_ne!(main_tip, base);

        let result = repo.merge_branch("feature", &author());
        assert!(matches!(result, Err(Error::MergeConflict(_))));

        repo.reset_hard(&main_tip).unwrap();
        assert!(repo.is_clean().unwrap());
        assert_eq!(repo.head_commit().unwrap().as_deref(), Some(main_tip.as_str()));
    }

    #[test]
    fn test_switch_to_branch_on_unborn_head() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());

        repo.switch_to_branch("catalog", "origin").unwrap();
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("catalog"));
        assert_eq!(repo.head_commit().unwrap(), None);
    }

    #[test]
    fn test_switch_to_branch_creates_from_head() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());
        let seed = seed_commit(&repo, "manifest.json", "{}");

        repo.switch_to_branch("catalog", "origin").unwrap();
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("catalog"));
        assert_eq!(repo.branch_head("catalog").unwrap(), Some(seed));
    }

    #[test]
    fn test_remote_default_branch_fallback() {
        let temp = TempDir::new().unwrap();
        let repo = init_working_copy(temp.path());
        assert_eq!(repo.remote_default_branch("origin").unwrap(), "main");
    }
}
