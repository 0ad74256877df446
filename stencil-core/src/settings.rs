//! Repository settings and their validation rules

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default branch used when none is configured
pub const DEFAULT_BRANCH: &str = "main";

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    })
}

/// Commit author identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// Settings describing the remote catalog and the identity used to commit to it
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RepositorySettings {
    /// HTTPS URL of the remote catalog repository
    pub url: String,

    /// Default branch holding the catalog
    pub branch: String,

    /// Username for authenticated pushes
    pub username: Option<String>,

    /// Password or token for authenticated pushes
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Commit author name
    pub author_name: String,

    /// Commit author email
    pub author_email: String,
}

impl std::fmt::Debug for RepositorySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySettings")
            .field("url", &self.url)
            .field("branch", &self.branch)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("author_name", &self.author_name)
            .field("author_email", &self.author_email)
            .finish()
    }
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            username: None,
            password: None,
            author_name: "Stencil Catalog".to_string(),
            author_email: "catalog@stencil.invalid".to_string(),
        }
    }
}

/// A partial update merged into [`RepositorySettings`] by `assign`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub url: Option<String>,
    pub branch: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl SettingsUpdate {
    /// Update carrying only a remote URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set username and password together
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the default branch
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Set the commit author
    pub fn author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self.author_email = Some(email.into());
        self
    }
}

impl RepositorySettings {
    /// Merge a partial update into these settings
    pub fn assign(&mut self, update: SettingsUpdate) {
        if let Some(url) = update.url {
            self.url = url.trim().to_string();
        }
        if let Some(branch) = update.branch {
            self.branch = branch.trim().to_string();
        }
        if let Some(username) = update.username {
            self.username = Some(username);
        }
        if let Some(password) = update.password {
            self.password = Some(password);
        }
        if let Some(name) = update.author_name {
            self.author_name = name;
        }
        if let Some(email) = update.author_email {
            self.author_email = email;
        }
    }

    /// Check every rule and return one message per violation
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.url) {
            Ok(parsed) if parsed.scheme() == "https" => {}
            Ok(_) => errors.push(format!("url must use https: {}", self.url)),
            Err(_) => errors.push(format!("url is not a valid URL: '{}'", self.url)),
        }

        if self.branch.is_empty() {
            errors.push("branch must not be empty".to_string());
        } else if !git2::Reference::is_valid_name(&format!("refs/heads/{}", self.branch)) {
            errors.push(format!("branch is not a valid branch name: {}", self.branch));
        }

        let has_user = self.username.as_deref().is_some_and(|u| !u.is_empty());
        let has_pass = self.password.as_deref().is_some_and(|p| !p.is_empty());
        if has_user != has_pass {
            errors.push("username and password must be provided together".to_string());
        }

        if self.author_name.trim().chars().count() < 3 {
            errors.push("author name must be at least 3 characters".to_string());
        }

        if !email_pattern().is_match(&self.author_email) {
            errors.push(format!("author email is not valid: {}", self.author_email));
        }

        errors
    }

    /// Fail with every violated rule at once
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration(errors))
        }
    }

    /// Whether both username and password are present
    pub fn has_credentials(&self) -> bool {
        matches!(
            (self.username.as_deref(), self.password.as_deref()),
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty()
        )
    }

    /// The commit author identity
    pub fn author(&self) -> Author {
        Author {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }
}
