//! The catalog mirror: one working copy, its settings and its operations

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::credentials::CredentialChannel;
use crate::git::GitRepo;
use crate::settings::{RepositorySettings, SettingsUpdate};
use crate::transaction::{
    Deadline, TransactionCoordinator, TransactionOptions, DEFAULT_REMOTE, DEFAULT_TIMEOUT,
};
use crate::{Error, Result};

fn template_dir_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .expect("template directory pattern is valid")
    })
}

/// A local working copy mirroring the remote template catalog
///
/// Build one per catalog path with [`RepositoryMirror::new`], then
/// [`configure`](RepositoryMirror::configure) it before running operations.
#[derive(Debug)]
pub struct RepositoryMirror {
    catalog_path: PathBuf,
    settings: RepositorySettings,
    configured: bool,
    errors: Vec<String>,
    timeout: Duration,
}

impl RepositoryMirror {
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            settings: RepositorySettings::default(),
            configured: false,
            errors: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Merge `update` into the settings and mark the mirror configured
    pub fn configure(&mut self, update: SettingsUpdate) -> &mut Self {
        self.settings.assign(update);
        self.configured = true;
        debug!(settings = ?self.settings, "Configured repository mirror");
        self
    }

    /// Back to default settings, unconfigured
    pub fn reset(&mut self) {
        self.settings = RepositorySettings::default();
        self.configured = false;
        self.errors.clear();
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// Override the per-operation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Messages collected by the last [`validate`](RepositoryMirror::validate)
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Check the catalog path and the settings, recording every problem
    pub fn validate(&mut self) -> bool {
        self.errors.clear();
        if let Err(e) = self.check_structure() {
            self.errors.push(e.to_string());
        }
        self.errors.extend(self.settings.validate());
        self.errors.is_empty()
    }

    /// Fail on the first structural problem, otherwise with every settings
    /// problem at once
    pub fn validate_strict(&self) -> Result<()> {
        self.check_structure()?;
        self.settings.validate_strict()
    }

    /// The catalog path exists and holds its own git metadata
    pub fn check_structure(&self) -> Result<()> {
        if !self.catalog_path.exists() {
            return Err(Error::RepositoryNotFound(self.catalog_path.clone()));
        }
        if !GitRepo::is_git_repo(&self.catalog_path) {
            return Err(Error::NotAGitRepository(self.catalog_path.clone()));
        }
        Ok(())
    }

    pub fn ensure_configured(&self) -> Result<()> {
        if self.configured {
            Ok(())
        } else {
            Err(Error::NotConfigured)
        }
    }

    pub fn open_working_copy(&self) -> Result<GitRepo> {
        GitRepo::open(&self.catalog_path)
    }

    /// True when there is no working copy or it has no commits yet
    pub fn is_empty(&self) -> Result<bool> {
        if self.check_structure().is_err() {
            return Ok(true);
        }
        Ok(self.open_working_copy()?.head_commit()?.is_none())
    }

    /// Names of top-level directories that look like template ids, sorted
    pub fn list_templates(&self) -> Result<Vec<String>> {
        if !self.catalog_path.is_dir() {
            return Ok(Vec::new());
        }

        let mut templates = Vec::new();
        for entry in fs::read_dir(&self.catalog_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if template_dir_pattern().is_match(name) {
                    templates.push(name.to_string());
                }
            }
        }

        templates.sort();
        Ok(templates)
    }

    /// Number of template directories
    pub fn template_count(&self) -> Result<usize> {
        Ok(self.list_templates()?.len())
    }

    /// SHA at the tip of the default branch, read under the lock
    pub fn last_commit(&self) -> Result<String> {
        self.ensure_configured()?;
        let working_copy = self.open_working_copy()?;

        TransactionCoordinator::new(&working_copy, &self.settings).read(self.timeout, |wc| {
            wc.head_commit()?.ok_or_else(|| {
                Error::RepositoryStructure(format!(
                    "{} has no commits",
                    self.catalog_path.display()
                ))
            })
        })
    }

    /// Credentials are configured and the index accepts writes
    pub fn is_writable(&self) -> bool {
        self.settings.has_credentials()
            && self
                .open_working_copy()
                .map(|wc| wc.index_writable())
                .unwrap_or(false)
    }

    /// The configured branch, else the remote's default, else `main`
    pub fn default_branch(&self) -> Result<String> {
        if !self.settings.branch.is_empty() {
            return Ok(self.settings.branch.clone());
        }
        self.open_working_copy()?.remote_default_branch(DEFAULT_REMOTE)
    }

    /// Run `work` as a transaction with default options
    pub fn transaction<T>(&self, work: impl FnOnce(&GitRepo) -> Result<T>) -> Result<T> {
        self.transaction_with(TransactionOptions::default().timeout(self.timeout), work)
    }

    /// Run `work` as a transaction
    ///
    /// See [`TransactionCoordinator::perform`] for what happens to the work,
    /// including on mirrors that are not writable.
    pub fn transaction_with<T>(
        &self,
        options: TransactionOptions,
        work: impl FnOnce(&GitRepo) -> Result<T>,
    ) -> Result<T> {
        self.ensure_configured()?;
        let working_copy = self.open_working_copy()?;
        self.validate_strict()?;

        TransactionCoordinator::new(&working_copy, &self.settings)
            .with_credentials(CredentialChannel::new(&self.settings, &options.remote))
            .perform(&options, work)
    }

    /// Pull the default branch from the remote
    ///
    /// A remote without the branch yet is not an error.
    pub fn pull(&self) -> Result<()> {
        self.ensure_configured()?;
        let working_copy = self.open_working_copy()?;
        self.validate_strict()?;
        let branch = self.settings.branch.clone();

        TransactionCoordinator::new(&working_copy, &self.settings)
            .with_credentials(CredentialChannel::new(&self.settings, DEFAULT_REMOTE))
            .bracket(self.timeout, |wc, _| match wc.pull(DEFAULT_REMOTE, &branch) {
                Err(Error::RemoteBranchMissing(_)) => {
                    info!(branch = %branch, "Remote has no catalog branch yet");
                    Ok(())
                }
                other => other,
            })
    }

    /// Publish the local default branch, rebasing onto the remote as needed
    pub fn push(&self) -> Result<()> {
        self.ensure_configured()?;
        let working_copy = self.open_working_copy()?;
        self.validate_strict()?;
        if !self.settings.has_credentials() {
            return Err(Error::Configuration(vec![
                "username and password are required to push".to_string(),
            ]));
        }

        let coordinator = TransactionCoordinator::new(&working_copy, &self.settings)
            .with_credentials(CredentialChannel::new(&self.settings, DEFAULT_REMOTE));
        coordinator.bracket(self.timeout, |_, deadline: &Deadline| {
            coordinator.push_with_retry(DEFAULT_REMOTE, &[], deadline)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_working_copy, Fixture, PASSWORD};
    use tempfile::TempDir;

    const TEMPLATE_ID: &str = "3f2b8c1e-4d5a-4b6c-9e7f-0a1b2c3d4e5f";

    #[test]
    fn test_configure_and_reset() {
        let fixture = Fixture::new();
        let mut mirror = RepositoryMirror::new(&fixture.catalog);
        assert!(!mirror.is_configured());

        mirror.configure(crate::test_support::settings_update(true));
        assert!(mirror.is_configured());
        assert!(mirror.validate(), "{:?}", mirror.errors());

        mirror.reset();
        assert!(!mirror.is_configured());
        assert_eq!(mirror.settings(), &RepositorySettings::default());
    }

    #[test]
    fn test_unconfigured_operations_fail_fast() {
        let fixture = Fixture::new();
        let mirror = RepositoryMirror::new(&fixture.catalog);

        assert!(matches!(mirror.transaction(|_| Ok(())), Err(Error::NotConfigured)));
        assert!(matches!(mirror.pull(), Err(Error::NotConfigured)));
        assert!(matches!(mirror.push(), Err(Error::NotConfigured)));
        assert!(matches!(mirror.last_commit(), Err(Error::NotConfigured)));
    }

    #[test]
    fn test_validate_reports_missing_path() {
        let temp = TempDir::new().unwrap();
        let mut mirror = RepositoryMirror::new(temp.path().join("absent"));
        mirror.configure(crate::test_support::settings_update(false));

        assert!(!mirror.validate());
        assert_eq!(mirror.errors().len(), 1);
        assert!(matches!(mirror.validate_strict(), Err(Error::RepositoryNotFound(_))));

        let plain_dir = RepositoryMirror::new(temp.path());
        assert!(matches!(
            plain_dir.validate_strict(),
            Err(Error::NotAGitRepository(_))
        ));
    }

    #[test]
    fn test_errors_cleared_between_validations() {
        let temp = TempDir::new().unwrap();
        let mut mirror = RepositoryMirror::new(temp.path().join("catalog"));
        mirror.configure(crate::test_support::settings_update(false));
        assert!(!mirror.validate());

        init_working_copy(&temp.path().join("catalog"));
        assert!(mirror.validate());
        assert!(mirror.errors().is_empty());
    }

    #[test]
    fn test_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog");
        let mirror = RepositoryMirror::new(&path);
        assert!(mirror.is_empty().unwrap());

        let repo = init_working_copy(&path);
        assert!(mirror.is_empty().unwrap());

        crate::test_support::seed_commit(&repo, "manifest.json", "{}");
        assert!(!mirror.is_empty().unwrap());
    }

    #[test]
    fn test_list_templates_only_counts_uuid_dirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(TEMPLATE_ID)).unwrap();
        fs::create_dir(temp.path().join("assets")).unwrap();
        fs::create_dir(temp.path().join("3f2b8c1e4d5a4b6c9e7f0a1b2c3d4e5f")).unwrap();
        fs::write(temp.path().join("9a1b2c3d-0000-4000-8000-000000000000"), "file").unwrap();

        let mirror = RepositoryMirror::new(temp.path());
        assert_eq!(mirror.list_templates().unwrap(), vec![TEMPLATE_ID.to_string()]);
        assert_eq!(mirror.template_count().unwrap(), 1);
    }

    #[test]
    fn test_transaction_publishes_template() {
        let fixture = Fixture::new();
        let mirror = fixture.mirror(true);
        assert!(mirror.is_writable());

        mirror
            .transaction(|wc| {
                let dir = wc.root().join(TEMPLATE_ID);
                fs::create_dir(&dir)?;
                fs::write(dir.join("template.json"), "{}")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(mirror.template_count().unwrap(), 1);
        assert_eq!(Some(mirror.last_commit().unwrap()), fixture.remote_head());

        let origin = fixture.repo().remote_url("origin").unwrap().unwrap();
        assert!(!origin.contains(PASSWORD));
    }

    #[test]
    fn test_failed_transaction_restores_plain_origin() {
        let fixture = Fixture::new();
        let mirror = fixture.mirror(true);

        let result: Result<()> =
            mirror.transaction(|_| Err(Error::MergeInconsistency("simulated".into())));
        assert!(result.is_err());

        let origin = fixture.repo().remote_url("origin").unwrap().unwrap();
        assert!(!origin.contains(PASSWORD));
    }

    #[test]
    fn test_concurrent_writable_transactions_both_publish() {
        let fixture = Fixture::new();
        let mirror = fixture.mirror(true);

        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["a.json", "b.json"]
                .into_iter()
                .map(|file| {
                    let mirror = &mirror;
                    scope.spawn(move || {
                        mirror.transaction(|wc| {
                            fs::write(wc.root().join(file), "{}")?;
                            Ok(())
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in &results {
            assert!(result.is_ok(), "{:?}", result);
        }
        assert!(fixture.remote_has("a.json"));
        assert!(fixture.remote_has("b.json"));
        assert_eq!(Some(mirror.last_commit().unwrap()), fixture.remote_head());

        let origin = fixture.repo().remote_url("origin").unwrap().unwrap();
        assert!(!origin.contains(PASSWORD));
    }

    #[test]
    fn test_read_only_mirror_discards_work() {
        let fixture = Fixture::new();
        let mirror = fixture.mirror(false);
        assert!(!mirror.is_writable());
        let before = mirror.last_commit().unwrap();

        mirror
            .transaction(|wc| {
                let dir = wc.root().join(TEMPLATE_ID);
                fs::create_dir(&dir)?;
                fs::write(dir.join("template.json"), "{}")?;
                Ok(())
            })
            .unwrap();

        assert!(!fixture.catalog.join(TEMPLATE_ID).join("template.json").exists());
        assert_eq!(mirror.last_commit().unwrap(), before);
        assert_eq!(fixture.repo().list_local_branches().unwrap(), vec!["main".to_string()]);
    }

    #[test]
    fn test_pull_brings_in_remote_commits() {
        let fixture = Fixture::new();
        let mirror = fixture.mirror(false);

        let other = fixture.second_clone("other");
        fs::create_dir(other.root().join(TEMPLATE_ID)).unwrap();
        fs::write(other.root().join(TEMPLATE_ID).join("template.json"), "{}").unwrap();
        other.commit_all("Add template", &crate::test_support::author()).unwrap();
        other.push("origin", "main", &[]).unwrap();

        mirror.pull().unwrap();
        assert_eq!(mirror.template_count().unwrap(), 1);
        assert_eq!(Some(mirror.last_commit().unwrap()), fixture.remote_head());
    }

    #[test]
    fn test_push_publishes_local_commits() {
        let fixture = Fixture::new();
        let mirror = fixture.mirror(true);
        let repo = fixture.repo();
        fs::write(fixture.catalog.join("local.json"), "{}").unwrap();
        let local = repo.commit_all("Local only", &crate::test_support::author()).unwrap();

        mirror.push().unwrap();
        assert_eq!(fixture.remote_head(), local);
    }

    #[test]
    fn test_push_requires_credentials() {
        let fixture = Fixture::new();
        let mirror = fixture.mirror(false);
        assert!(matches!(mirror.push(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_default_branch_prefers_settings() {
        let fixture = Fixture::new();
        let mut mirror = fixture.mirror(false);
        assert_eq!(mirror.default_branch().unwrap(), "main");

        mirror.configure(SettingsUpdate::default().branch("catalog"));
        assert_eq!(mirror.default_branch().unwrap(), "catalog");
    }
}
