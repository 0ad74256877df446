//! Configuration management for Stencil
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (STENCIL_*)
//! 3. Config file (~/.config/stencil/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mirror::RepositoryMirror;
use crate::secrets::Secrets;
use crate::settings::{SettingsUpdate, DEFAULT_BRANCH};
use crate::transaction::DEFAULT_TIMEOUT;
use crate::{Error, Result};

/// Remote catalog configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// HTTPS URL of the catalog repository
    pub url: String,

    /// Branch holding the catalog
    pub branch: String,

    /// Username for authenticated pushes; the password lives in secrets.toml
    pub username: Option<String>,

    /// Commit author name
    pub author_name: String,

    /// Commit author email
    pub author_email: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            username: None,
            author_name: "Stencil Catalog".to_string(),
            author_email: "catalog@stencil.invalid".to_string(),
        }
    }
}

/// Periodic sync configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether sync runs at all
    pub enabled: bool,

    /// Pause between runs of `stencil watch`
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Bound on each locked operation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Where the last observed commit is remembered
    pub state_dir: Option<PathBuf>,

    /// Command run when the catalog changes, with STENCIL_COMMIT set
    pub on_change: Option<Vec<String>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            timeout: DEFAULT_TIMEOUT,
            state_dir: None,
            on_change: None,
        }
    }
}

impl SyncConfig {
    /// Configured state directory, else `<data dir>/stencil`
    pub fn state_dir(&self) -> Option<PathBuf> {
        self.state_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|p| p.join("stencil")))
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Local working copy of the catalog
    pub catalog_path: Option<PathBuf>,

    pub remote: RemoteConfig,

    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/stencil/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stencil").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - STENCIL_CATALOG_PATH: Local working copy
    /// - STENCIL_REMOTE_URL: Remote catalog URL
    /// - STENCIL_BRANCH: Catalog branch
    /// - STENCIL_USERNAME: Username for pushes
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("STENCIL_CATALOG_PATH") {
            self.catalog_path = Some(PathBuf::from(path));
        }

        if let Ok(url) = std::env::var("STENCIL_REMOTE_URL") {
            self.remote.url = url;
        }

        if let Ok(branch) = std::env::var("STENCIL_BRANCH") {
            self.remote.branch = branch;
        }

        if let Ok(username) = std::env::var("STENCIL_USERNAME") {
            self.remote.username = Some(username);
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, catalog_path: Option<PathBuf>, url: Option<String>) -> Self {
        if let Some(path) = catalog_path {
            self.catalog_path = Some(path);
        }

        if let Some(url) = url {
            self.remote.url = url;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(catalog_path: Option<PathBuf>, url: Option<String>) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()
            .with_cli_overrides(catalog_path, url))
    }

    /// Configured catalog path, else `<data dir>/stencil/catalog`
    pub fn catalog_path(&self) -> Result<PathBuf> {
        self.catalog_path
            .clone()
            .or_else(|| dirs::data_local_dir().map(|p| p.join("stencil").join("catalog")))
            .ok_or_else(|| Error::Config("Could not determine catalog path".to_string()))
    }

    /// Settings update for [`RepositoryMirror::configure`]
    pub fn repository_settings(&self, secrets: &Secrets) -> SettingsUpdate {
        let update = SettingsUpdate::with_url(self.remote.url.clone())
            .branch(self.remote.branch.clone())
            .author(self.remote.author_name.clone(), self.remote.author_email.clone());

        match (&self.remote.username, secrets.remote_password()) {
            (Some(username), Some(password)) => update.credentials(username.clone(), password),
            (username, _) => SettingsUpdate {
                username: username.clone(),
                ..update
            },
        }
    }

    /// A configured mirror for the catalog path
    pub fn mirror(&self, secrets: &Secrets) -> Result<RepositoryMirror> {
        let mut mirror = RepositoryMirror::new(self.catalog_path()?).with_timeout(self.sync.timeout);
        mirror.configure(self.repository_settings(secrets));
        Ok(mirror)
    }
}
