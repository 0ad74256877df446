//! Remote URLs and network operations (clone, push, pull) via the git CLI

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::repo::GitRepo;
use crate::{Error, Result};

/// A remote catalog URL, with or without embedded credentials
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    url: Url,
}

impl std::fmt::Debug for RemoteUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RemoteUrl").field(&self.plain()).finish()
    }
}

impl RemoteUrl {
    /// Parse an HTTP(S) remote URL
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let url = Url::parse(input)
            .map_err(|e| Error::InvalidRemoteUrl(format!("{}: {}", redact_credentials(input), e)))?;

        match url.scheme() {
            "https" | "http" => {}
            other => {
                return Err(Error::InvalidRemoteUrl(format!(
                    "{}: unsupported scheme '{}'. Expected http or https",
                    redact_credentials(input),
                    other
                )))
            }
        }

        if url.host_str().is_none() {
            return Err(Error::InvalidRemoteUrl(format!(
                "{}: missing host",
                redact_credentials(input)
            )));
        }

        Ok(Self { url })
    }

    /// The URL with any user-info removed
    pub fn plain(&self) -> String {
        let mut url = self.url.clone();
        // Host-based URLs always accept user-info changes
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.to_string()
    }

    /// The URL with `username` and `password` embedded as user-info
    pub fn authenticated(&self, username: &str, password: &str) -> Result<String> {
        let mut url = self.url.clone();
        url.set_username(username)
            .and_then(|()| url.set_password(Some(password)))
            .map_err(|()| {
                Error::InvalidRemoteUrl(format!("{} cannot carry credentials", self.plain()))
            })?;
        Ok(url.to_string())
    }

    /// Whether both a username and a password are embedded
    pub fn has_credentials(&self) -> bool {
        !self.url.username().is_empty() && self.url.password().is_some_and(|p| !p.is_empty())
    }

    /// Get the host (e.g., "git.example.com")
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }
}

fn userinfo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*://)[^/@\s]+@")
            .expect("userinfo pattern is valid")
    })
}

/// Replace user-info in every URL found in `text`
pub fn redact_credentials(text: &str) -> String {
    userinfo_pattern()
        .replace_all(text, "${scheme}***@")
        .into_owned()
}

/// Run git with prompts disabled, returning stdout
fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let command = redact_credentials(&format!("git {}", args.join(" ")));
    tracing::debug!(command = %command, dir = %dir.display(), "Running git");

    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(|e| Error::Command {
            command: command.clone(),
            stderr: format!("failed to run git: {}", e),
        })?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = redact_credentials(String::from_utf8_lossy(&output.stderr).trim());
    let stdout = redact_credentials(String::from_utf8_lossy(&output.stdout).trim());
    Err(classify_failure(command, stderr, &stdout))
}

/// Map git's failure output onto the error taxonomy
///
/// Some status lines (merge conflicts during rebase) go to stdout, so both
/// streams are inspected.
fn classify_failure(command: String, stderr: String, stdout: &str) -> Error {
    let seen = |needle: &str| stderr.contains(needle) || stdout.contains(needle);

    if seen("[rejected]")
        || seen("[remote rejected]")
        || seen("non-fast-forward")
        || seen("fetch first")
        || seen("failed to push some refs")
    {
        return Error::PushRejected(stderr);
    }

    if seen("CONFLICT") || seen("could not apply") {
        return Error::MergeConflict(stderr);
    }

    if seen("couldn't find remote ref") {
        return Error::RemoteBranchMissing(stderr);
    }

    Error::Command { command, stderr }
}

impl GitRepo {
    /// Clone `url` into `target`
    ///
    /// `url` may carry credentials; they are never logged and the caller is
    /// responsible for rewriting `origin` afterwards.
    pub fn clone_from(url: &str, target: &Path) -> Result<Self> {
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::RepositoryStructure(format!("invalid clone target {}", target.display()))
            })?;
        match run_git(parent, &["clone", "--quiet", url, &name]) {
            Ok(_) => {}
            Err(Error::Command { command, stderr }) => {
                // Check for common error types
                if stderr.contains("Authentication failed") || stderr.contains("could not read Username") {
                    return Err(Error::Sync(format!(
                        "Authentication failed for {}. Check the configured username and password.",
                        redact_credentials(url)
                    )));
                }

                if stderr.contains("Could not resolve host") {
                    return Err(Error::Sync(format!(
                        "Network error cloning {}. Check your connection.",
                        redact_credentials(url)
                    )));
                }

                return Err(Error::Command { command, stderr });
            }
            Err(e) => return Err(e),
        }

        tracing::info!(url = %redact_credentials(url), path = %target.display(), "Cloned catalog");
        Self::open(target)
    }

    /// Push a local branch to the same-named branch on `remote`
    pub fn push(&self, remote: &str, branch: &str, push_options: &[String]) -> Result<()> {
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        let option_args: Vec<String> = push_options
            .iter()
            .map(|option| format!("--push-option={}", option))
            .collect();

        let mut args: Vec<&str> = vec!["push", "--quiet"];
        args.extend(option_args.iter().map(String::as_str));
        args.push(remote);
        args.push(&refspec);

        run_git(self.root(), &args)?;
        tracing::debug!(remote = %remote, branch = %branch, "Pushed");
        Ok(())
    }

    /// Pull `branch` from `remote`, rebasing local commits on top
    ///
    /// A conflicting rebase is aborted so the working copy stays usable.
    pub fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        match run_git(self.root(), &["pull", "--rebase", "--quiet", remote, branch]) {
            Ok(_) => {
                tracing::debug!(remote = %remote, branch = %branch, "Pulled");
                Ok(())
            }
            Err(err @ Error::MergeConflict(_)) => {
                if let Err(abort) = run_git(self.root(), &["rebase", "--abort"]) {
                    tracing::warn!(error = %abort, "Failed to abort rebase after conflict");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
