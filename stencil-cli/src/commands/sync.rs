//! Sync commands - bootstrap, one-shot sync and periodic watch

use std::time::Duration;

use clap::Args;
use stencil_core::{
    BootstrapNormalizer, CommandListener, Config, FileCommitCache, LogListener, Secrets,
    SyncOrchestrator, SyncOutcome,
};
use tracing::{error, info};

/// Reconcile the local catalog with the remote once
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Run even when sync is disabled in the config
    #[arg(short, long)]
    force: bool,
}

impl SyncArgs {
    /// Execute the sync command
    pub async fn execute(&self, config: &Config, secrets: &Secrets) -> anyhow::Result<()> {
        let outcome = sync_blocking(config.clone(), secrets.clone(), self.force).await?;
        print_outcome(&outcome);
        Ok(())
    }
}

/// Sync periodically until interrupted
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between runs (defaults to sync.interval from the config)
    #[arg(short, long)]
    interval: Option<u64>,
}

impl WatchArgs {
    /// Execute the watch command
    pub async fn execute(&self, config: &Config, secrets: &Secrets) -> anyhow::Result<()> {
        let period = self
            .interval
            .map(Duration::from_secs)
            .unwrap_or(config.sync.interval);
        info!(interval = ?period, "Watching catalog");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sync_blocking(config.clone(), secrets.clone(), false).await {
                        Ok(outcome) => print_outcome(&outcome),
                        Err(e) => error!(error = %e, "Sync failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping watch");
                    return Ok(());
                }
            }
        }
    }
}

/// Run one sync on the blocking pool
async fn sync_blocking(config: Config, secrets: Secrets, force: bool) -> anyhow::Result<SyncOutcome> {
    tokio::task::spawn_blocking(move || run_sync(&config, &secrets, force)).await?
}

fn run_sync(config: &Config, secrets: &Secrets, force: bool) -> anyhow::Result<SyncOutcome> {
    let mirror = config.mirror(secrets)?;
    let state_dir = config
        .sync
        .state_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine sync state directory"))?;

    let mut orchestrator = SyncOrchestrator::new(&mirror, FileCommitCache::in_dir(&state_dir))
        .enabled(force || config.sync.enabled)
        .listener(LogListener);

    if let Some((program, args)) = config
        .sync
        .on_change
        .as_ref()
        .and_then(|command| command.split_first())
    {
        orchestrator = orchestrator.listener(CommandListener::new(program.clone(), args.to_vec()));
    }

    Ok(orchestrator.sync()?)
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Disabled => println!("Sync is disabled (use --force to run anyway)"),
        SyncOutcome::BootstrapFailed(reason) => println!("Skipped: catalog not ready: {}", reason),
        SyncOutcome::Unchanged { commit } => println!("Up to date at {}", commit),
        SyncOutcome::Changed { commit, previous } => match previous {
            Some(previous) => println!("Catalog updated {} -> {}", previous, commit),
            None => println!("Catalog at {}", commit),
        },
    }
}

/// Prepare the local working copy
pub async fn bootstrap(config: &Config, secrets: &Secrets) -> anyhow::Result<()> {
    let config = config.clone();
    let secrets = secrets.clone();

    let report = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let mirror = config.mirror(&secrets)?;
        let report = BootstrapNormalizer::new(&mirror).normalize()?;
        Ok((mirror.catalog_path().to_path_buf(), report))
    })
    .await??;

    let (path, report) = report;
    println!("Catalog ready at {}", path.display());
    if report.cloned {
        println!("  Cloned from remote");
    }
    if let Some(commit) = report.initial_commit {
        println!("  Created initial commit {}", commit);
    }
    Ok(())
}
