//! Bring a catalog working copy into a usable state
//!
//! Normalization is idempotent: running it against an already prepared
//! working copy only re-applies configuration.

use std::fs;

use serde::Serialize;
use tracing::info;

use crate::git::{redact_credentials, GitRepo, RemoteUrl};
use crate::mirror::RepositoryMirror;
use crate::transaction::{Deadline, WorkingCopyLock, DEFAULT_REMOTE};
use crate::{Error, Result};

/// File listing the catalog's templates
pub const MANIFEST_FILE: &str = "manifest.json";

const README_FILE: &str = "README.md";
const README: &str = "# Template catalog\n\n\
Each directory named by a template id holds one exported template.\n\
This repository is maintained by Stencil; edit it through the application.\n";

const INITIAL_COMMIT_MESSAGE: &str = "Initialize template catalog";

#[derive(Debug, Serialize)]
struct Manifest {
    templates: Vec<String>,
}

/// What a normalization run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// The working copy was cloned during this run
    pub cloned: bool,
    /// SHA of the placeholder commit, if one was created
    pub initial_commit: Option<String>,
}

/// Prepares the mirror's working copy for transactions
pub struct BootstrapNormalizer<'a> {
    mirror: &'a RepositoryMirror,
}

impl<'a> BootstrapNormalizer<'a> {
    pub fn new(mirror: &'a RepositoryMirror) -> Self {
        Self { mirror }
    }

    /// Clone if needed, check the remote, apply configuration, check out the
    /// default branch and make sure there is at least one commit
    ///
    /// Everything after the clone runs under the working copy lock and waits
    /// at most the mirror's timeout for it.
    pub fn normalize(&self) -> Result<BootstrapReport> {
        self.mirror.ensure_configured()?;
        let settings = self.mirror.settings();
        settings.validate_strict()?;

        let url = RemoteUrl::parse(&settings.url)?;
        let path = self.mirror.catalog_path();
        let mut report = BootstrapReport::default();

        if !GitRepo::is_git_repo(path) {
            let clone_url = match (settings.username.as_deref(), settings.password.as_deref()) {
                (Some(user), Some(pass)) if settings.has_credentials() => {
                    url.authenticated(user, pass)?
                }
                _ => url.plain(),
            };

            let repo = GitRepo::clone_from(&clone_url, path)?;
            repo.set_remote_url(DEFAULT_REMOTE, &url.plain())?;
            report.cloned = true;
        }

        let repo = GitRepo::open(path)?;
        let deadline = Deadline::after(self.mirror.timeout());
        let _lock = WorkingCopyLock::acquire(repo.git_dir(), &deadline)?;
        self.check_remote(&repo, &url)?;
        self.apply_config(&repo)?;
        repo.switch_to_branch(&settings.branch, DEFAULT_REMOTE)?;

        if repo.head_commit()?.is_none() {
            report.initial_commit = Some(self.initial_commit(&repo)?);
        }

        info!(
            path = %path.display(),
            cloned = report.cloned,
            initialized = report.initial_commit.is_some(),
            "Catalog working copy ready"
        );
        Ok(report)
    }

    /// `origin` must point at the configured remote; a leftover
    /// authenticated form is reset to the plain URL
    fn check_remote(&self, repo: &GitRepo, url: &RemoteUrl) -> Result<()> {
        let plain = url.plain();

        let Some(existing) = repo.remote_url(DEFAULT_REMOTE)? else {
            return repo.set_remote_url(DEFAULT_REMOTE, &plain);
        };

        let matches = RemoteUrl::parse(&existing)
            .map(|existing| existing.plain() == plain)
            .unwrap_or(false);
        if !matches {
            return Err(Error::RemoteMismatch {
                configured: self.mirror.settings().url.clone(),
                existing: redact_credentials(&existing),
            });
        }

        if existing != plain {
            repo.set_remote_url(DEFAULT_REMOTE, &plain)?;
        }
        Ok(())
    }

    fn apply_config(&self, repo: &GitRepo) -> Result<()> {
        let settings = self.mirror.settings();
        let branch = &settings.branch;

        repo.set_config("user.name", &settings.author_name)?;
        repo.set_config("user.email", &settings.author_email)?;
        repo.set_config("pull.rebase", "true")?;
        repo.set_config(&format!("branch.{}.remote", branch), DEFAULT_REMOTE)?;
        repo.set_config(
            &format!("branch.{}.merge", branch),
            &format!("refs/heads/{}", branch),
        )?;
        Ok(())
    }

    fn initial_commit(&self, repo: &GitRepo) -> Result<String> {
        let manifest = serde_json::to_string_pretty(&Manifest {
            templates: Vec::new(),
        })?;
        fs::write(repo.root().join(MANIFEST_FILE), format!("{}\n", manifest))?;
        fs::write(repo.root().join(README_FILE), README)?;

        let author = self.mirror.settings().author();
        repo.commit_all(INITIAL_COMMIT_MESSAGE, &author)?
            .ok_or_else(|| {
                Error::RepositoryStructure("placeholder files produced no commit".to_string())
            })
    }
}
