//! Periodic reconciliation between the local mirror and the remote catalog
//!
//! One [`SyncOrchestrator::sync`] run:
//! 1. Normalize the working copy (a failure skips the run, it is not an error)
//! 2. Validate the mirror
//! 3. Push local commits when the mirror is writable
//! 4. Pull the remote
//! 5. Notify listeners if the latest commit differs from the cached one

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::bootstrap::BootstrapNormalizer;
use crate::mirror::RepositoryMirror;
use crate::{Error, Result};

/// Remembers the last commit listeners were told about
pub trait CommitCache {
    fn load(&self) -> Result<Option<String>>;
    fn store(&self, commit: &str) -> Result<()>;
}

/// Told when the catalog moved to a new commit
pub trait CatalogListener {
    fn catalog_changed(&self, commit: &str) -> Result<()>;
}

/// Commit cache in a small state file
#[derive(Debug, Clone)]
pub struct FileCommitCache {
    path: PathBuf,
}

impl FileCommitCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file under `state_dir`
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("last-commit"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommitCache for FileCommitCache {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let commit = contents.trim();
                Ok((!commit.is_empty()).then(|| commit.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, commit: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format!("{}\n", commit))?;
        Ok(())
    }
}

/// Logs catalog changes
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl CatalogListener for LogListener {
    fn catalog_changed(&self, commit: &str) -> Result<()> {
        info!(commit = %commit, "Template catalog changed");
        Ok(())
    }
}

/// Runs an operator command with `STENCIL_COMMIT` set to the new commit
#[derive(Debug, Clone)]
pub struct CommandListener {
    program: String,
    args: Vec<String>,
}

impl CommandListener {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl CatalogListener for CommandListener {
    fn catalog_changed(&self, commit: &str) -> Result<()> {
        debug!(program = %self.program, commit = %commit, "Running catalog hook");
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("STENCIL_COMMIT", commit)
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Command {
                command: self.program.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Result of one sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Syncing is turned off
    Disabled,
    /// The working copy could not be normalized; nothing else ran
    BootstrapFailed(String),
    /// Latest commit matches the cached one
    Unchanged { commit: String },
    /// Listeners were notified of a new commit
    Changed {
        commit: String,
        previous: Option<String>,
    },
}

/// Drives one reconciliation of a mirror with its remote
pub struct SyncOrchestrator<'a> {
    mirror: &'a RepositoryMirror,
    cache: Box<dyn CommitCache + 'a>,
    listeners: Vec<Box<dyn CatalogListener + 'a>>,
    enabled: bool,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(mirror: &'a RepositoryMirror, cache: impl CommitCache + 'a) -> Self {
        Self {
            mirror,
            cache: Box::new(cache),
            listeners: Vec::new(),
            enabled: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn listener(mut self, listener: impl CatalogListener + 'a) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn sync(&self) -> Result<SyncOutcome> {
        if !self.enabled {
            debug!("Catalog sync disabled");
            return Ok(SyncOutcome::Disabled);
        }

        if let Err(e) = BootstrapNormalizer::new(self.mirror).normalize() {
            warn!(error = %e, "Catalog bootstrap failed, skipping sync");
            return Ok(SyncOutcome::BootstrapFailed(e.to_string()));
        }

        self.mirror.validate_strict()?;

        if self.mirror.is_writable() {
            self.mirror.push()?;
        }
        self.mirror.pull()?;

        let commit = self.mirror.last_commit()?;
        let previous = self.cache.load()?;
        if previous.as_deref() == Some(commit.as_str()) {
            debug!(commit = %commit, "Catalog unchanged");
            return Ok(SyncOutcome::Unchanged { commit });
        }

        for listener in &self.listeners {
            listener.catalog_changed(&commit)?;
        }
        self.cache.store(&commit)?;

        info!(
            commit = %commit,
            previous = previous.as_deref().unwrap_or("none"),
            "Catalog synchronized"
        );
        Ok(SyncOutcome::Changed { commit, previous })
    }
}
