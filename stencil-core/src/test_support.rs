//! Shared fixtures for unit tests: bare remotes, clones and HTTPS aliases

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, RepositoryInitOptions};
use tempfile::TempDir;

use crate::git::{GitRepo, RemoteUrl};
use crate::mirror::RepositoryMirror;
use crate::settings::{Author, SettingsUpdate};

/// HTTPS URL the fixtures reroute to a local bare repository
pub(crate) const REMOTE_URL: &str = "https://stencil.test/catalog.git";
pub(crate) const USERNAME: &str = "alice";
pub(crate) const PASSWORD: &str = "s3cret-token";

pub(crate) fn author() -> Author {
    Author {
        name: "Catalog Bot".to_string(),
        email: "bot@example.com".to_string(),
    }
}

/// Fresh non-bare repository with `main` as its unborn branch
pub(crate) fn init_working_copy(path: &Path) -> GitRepo {
    let mut options = RepositoryInitOptions::new();
    options.initial_head("main");
    Repository::init_opts(path, &options).unwrap();

    let repo = GitRepo::open(path).unwrap();
    set_identity(&repo);
    repo
}

/// Write one file and commit it, returning the commit SHA
pub(crate) fn seed_commit(repo: &GitRepo, file: &str, contents: &str) -> String {
    fs::write(repo.root().join(file), contents).unwrap();
    repo.commit_all(&format!("Add {}", file), &author())
        .unwrap()
        .unwrap()
}

/// Empty bare repository whose HEAD names `main`
pub(crate) fn bare_remote(path: &Path) -> PathBuf {
    let mut options = RepositoryInitOptions::new();
    options.bare(true).initial_head("main");
    Repository::init_opts(path, &options).unwrap();
    path.to_path_buf()
}

/// Clone a local bare repository with the production clone path
pub(crate) fn clone_of(remote: &Path, dest: &Path) -> GitRepo {
    let url = format!("file://{}", remote.display());
    let repo = GitRepo::clone_from(&url, dest).unwrap();
    if repo.head_commit().unwrap().is_none() {
        repo.inner().set_head("refs/heads/main").unwrap();
    }
    set_identity(&repo);
    repo
}

fn set_identity(repo: &GitRepo) {
    repo.set_config("user.name", "Catalog Bot").unwrap();
    repo.set_config("user.email", "bot@example.com").unwrap();
}

/// Route [`REMOTE_URL`] (with and without credentials) to `remote` and
/// point `origin` at the plain HTTPS form
pub(crate) fn alias_remote(repo: &GitRepo, remote: &Path) {
    let plain_base = format!("file://{}", remote.display());
    let auth_base = remote.display().to_string();
    let authenticated = RemoteUrl::parse(REMOTE_URL)
        .unwrap()
        .authenticated(USERNAME, PASSWORD)
        .unwrap();

    repo.set_config(&format!("url.{}.insteadOf", plain_base), REMOTE_URL)
        .unwrap();
    repo.set_config(&format!("url.{}.insteadOf", auth_base), &authenticated)
        .unwrap();
    repo.set_remote_url("origin", REMOTE_URL).unwrap();
}

/// Remote with one commit on `main`
pub(crate) fn seeded_remote(dir: &Path) -> PathBuf {
    let remote = bare_remote(&dir.join("remote.git"));
    let scratch = clone_of(&remote, &dir.join("seed"));
    seed_commit(&scratch, "manifest.json", "{\"templates\": []}\n");
    scratch.push("origin", "main", &[]).unwrap();
    remote
}

/// Settings pointing at [`REMOTE_URL`]
pub(crate) fn settings_update(writable: bool) -> SettingsUpdate {
    let update = SettingsUpdate::with_url(REMOTE_URL).author("Catalog Bot", "bot@example.com");
    if writable {
        update.credentials(USERNAME, PASSWORD)
    } else {
        update
    }
}

/// Every file below `root` except git metadata, keyed by relative path
pub(crate) fn file_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.file_name().is_some_and(|n| n == ".git") {
                continue;
            }
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(relative, fs::read(&path).unwrap());
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// A seeded remote plus a catalog clone aliased to [`REMOTE_URL`]
pub(crate) struct Fixture {
    pub temp: TempDir,
    pub remote: PathBuf,
    pub catalog: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let remote = seeded_remote(temp.path());
        let catalog = temp.path().join("catalog");
        let repo = clone_of(&remote, &catalog);
        alias_remote(&repo, &remote);

        Self {
            temp,
            remote,
            catalog,
        }
    }

    /// Another clone of the same remote, aliased the same way
    pub fn second_clone(&self, name: &str) -> GitRepo {
        let repo = clone_of(&self.remote, &self.temp.path().join(name));
        alias_remote(&repo, &self.remote);
        repo
    }

    pub fn repo(&self) -> GitRepo {
        GitRepo::open(&self.catalog).unwrap()
    }

    pub fn mirror(&self, writable: bool) -> RepositoryMirror {
        let mut mirror = RepositoryMirror::new(&self.catalog);
        mirror.configure(settings_update(writable));
        mirror
    }

    /// Whether `path` is in the tree at the tip of `main` on the bare remote
    pub fn remote_has(&self, path: &str) -> bool {
        let bare = Repository::open_bare(&self.remote).unwrap();
        let tree = bare
            .find_reference("refs/heads/main")
            .and_then(|r| r.peel_to_tree())
            .unwrap();
        let found = tree.get_path(Path::new(path)).is_ok();
        found
    }

    /// Tip of `main` on the bare remote
    pub fn remote_head(&self) -> Option<String> {
        let bare = Repository::open_bare(&self.remote).unwrap();
        let head = bare
            .find_reference("refs/heads/main")
            .ok()
            .and_then(|r| r.target())
            .map(|oid| oid.to_string());
        head
    }
}
