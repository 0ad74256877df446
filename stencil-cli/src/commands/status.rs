//! Status command - show the catalog working copy and its settings

use clap::Args;
use stencil_core::{Config, GitRepo, RepositoryMirror, Secrets};

/// Show the state of the local catalog mirror
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list local branches
    #[arg(short, long)]
    branches: bool,
}

impl StatusArgs {
    /// Execute the status command
    pub fn execute(&self, verbose: bool, config: &Config, secrets: &Secrets) -> anyhow::Result<()> {
        let mut mirror = config.mirror(secrets)?;
        let valid = mirror.validate();

        println!();
        println!("Catalog: {}", mirror.catalog_path().display());
        println!("  Remote: {}", display_or_unset(&mirror.settings().url));
        println!("  Branch: {}", mirror.default_branch().unwrap_or_else(|_| mirror.settings().branch.clone()));
        println!("  Writable: {}", if mirror.is_writable() { "yes" } else { "no" });

        if !valid {
            println!();
            println!("Problems:");
            for error in mirror.errors() {
                println!("  - {}", error);
            }
        }

        if mirror.check_structure().is_err() {
            println!();
            println!("No working copy yet. Run `stencil bootstrap` to create it.");
            return Ok(());
        }

        println!();
        if mirror.is_empty()? {
            println!("  Last commit: (none)");
        } else {
            print_last_commit(&mirror, verbose);
        }
        println!("  Templates: {}", mirror.template_count()?);

        if self.branches {
            let repo = GitRepo::open(mirror.catalog_path())?;
            let current = repo.current_branch()?;
            println!();
            println!("Branches:");
            for branch in repo.list_local_branches()? {
                let marker = if current.as_deref() == Some(branch.as_str()) { "*" } else { " " };
                println!("  {} {}", marker, branch);
            }
        }

        Ok(())
    }
}

fn print_last_commit(mirror: &RepositoryMirror, verbose: bool) {
    match mirror.last_commit() {
        Ok(commit) => println!("  Last commit: {}", commit),
        Err(e) => {
            println!("  Last commit: (unavailable)");
            if verbose {
                eprintln!("Warning: {}", e);
            }
        }
    }
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}
