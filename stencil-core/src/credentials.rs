//! Transient credentials on the remote URL
//!
//! Authenticated git transport reads the username and password from the
//! remote URL. The channel puts them there for one operation and always
//! rewrites the remote to its plain form afterwards, so nothing secret stays
//! in `.git/config`.

use tracing::{debug, warn};

use crate::git::{redact_credentials, RemoteUrl, WorkingCopy};
use crate::settings::RepositorySettings;
use crate::{Error, Result};

/// Scopes credentials to a single block of work
pub struct CredentialChannel<'a> {
    settings: &'a RepositorySettings,
    remote: &'a str,
}

impl<'a> CredentialChannel<'a> {
    pub fn new(settings: &'a RepositorySettings, remote: &'a str) -> Self {
        Self { settings, remote }
    }

    /// Run `block` with the authenticated URL on the remote
    ///
    /// Without a username/password pair the plain URL is used. Failures from
    /// the version-control layer come back as [`Error::Sync`] with any
    /// credentials redacted; Stencil's own errors pass through unchanged.
    pub fn with_credentials<W, T>(
        &self,
        working_copy: &W,
        block: impl FnOnce(&W) -> Result<T>,
    ) -> Result<T>
    where
        W: WorkingCopy,
    {
        let url = RemoteUrl::parse(&self.settings.url)?;
        let plain = url.plain();
        let target = match (
            self.settings.username.as_deref(),
            self.settings.password.as_deref(),
        ) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                url.authenticated(user, pass)?
            }
            _ => plain.clone(),
        };

        let _restore = RestoreRemote {
            working_copy,
            remote: self.remote,
            url: plain,
        };

        let result = working_copy
            .set_remote_url(self.remote, &target)
            .and_then(|()| working_copy.set_config("pull.rebase", "true"))
            .and_then(|()| block(working_copy));

        result.map_err(into_sync_error)
    }
}

fn into_sync_error(err: Error) -> Error {
    if err.is_vcs_failure() {
        Error::Sync(redact_credentials(&err.to_string()))
    } else {
        err
    }
}

/// Puts the plain URL back on drop
struct RestoreRemote<'w, W: WorkingCopy> {
    working_copy: &'w W,
    remote: &'w str,
    url: String,
}

impl<W: WorkingCopy> Drop for RestoreRemote<'_, W> {
    fn drop(&mut self) {
        match self.working_copy.set_remote_url(self.remote, &self.url) {
            Ok(()) => debug!(remote = %self.remote, "Restored unauthenticated remote URL"),
            Err(e) => warn!(
                remote = %self.remote,
                error = %redact_credentials(&e.to_string()),
                "Failed to restore unauthenticated remote URL"
            ),
        }
    }
}
