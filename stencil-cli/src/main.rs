//! Stencil CLI - Command line interface for Stencil
//!
//! Keeps a local template catalog in sync with its git remote.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stencil_core::{Config, Secrets};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{StatusArgs, SyncArgs, TemplatesArgs, WatchArgs};

/// Stencil: git-backed template catalog mirror
#[derive(Parser, Debug)]
#[command(name = "stencil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Local catalog working copy (overrides config and env)
    #[arg(long, global = true, env = "STENCIL_CATALOG_PATH")]
    catalog: Option<PathBuf>,

    /// Remote catalog URL (overrides config and env)
    #[arg(long, global = true, env = "STENCIL_REMOTE_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Show the local catalog and its settings
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Clone and initialize the local catalog
    Bootstrap,

    /// Reconcile the local catalog with the remote once
    Sync(SyncArgs),

    /// Sync periodically until interrupted
    Watch(WatchArgs),

    /// List templates in the local catalog
    #[command(visible_alias = "ls")]
    Templates(TemplatesArgs),

    /// Show current configuration
    Config,

    /// Create a secrets file template
    InitSecrets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    // Load configuration with overrides
    let config = Config::load_with_overrides(cli.catalog.clone(), cli.url.clone())?;

    if cli.verbose {
        tracing::info!(
            catalog_path = ?config.catalog_path,
            url = %config.remote.url,
            branch = %config.remote.branch,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("stencil {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Status(args)) => {
            args.execute(cli.verbose, &config, &Secrets::load()?)?;
        }
        Some(Commands::Bootstrap) => {
            commands::bootstrap(&config, &Secrets::load()?).await?;
        }
        Some(Commands::Sync(args)) => {
            args.execute(&config, &Secrets::load()?).await?;
        }
        Some(Commands::Watch(args)) => {
            args.execute(&config, &Secrets::load()?).await?;
        }
        Some(Commands::Templates(args)) => {
            args.execute(&config, &Secrets::load()?)?;
        }
        Some(Commands::Config) => {
            print_config(&config);
        }
        Some(Commands::InitSecrets) => {
            let path = Secrets::create_template()?;
            println!("Created {}", path.display());
            println!("Add the catalog password, then set remote.username in config.toml.");
        }
        None => {
            println!("Stencil - git-backed template catalog mirror");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn print_config(config: &Config) {
    println!("Stencil Configuration");
    println!("=====================");
    println!();
    match config.catalog_path() {
        Ok(path) => println!("catalog_path: {}", path.display()),
        Err(_) => println!("catalog_path: (unknown)"),
    }
    println!();
    println!("Remote Settings:");
    println!("  url: {}", config.remote.url);
    println!("  branch: {}", config.remote.branch);
    println!("  username: {}", config.remote.username.as_deref().unwrap_or("(anonymous)"));
    println!("  author: {} <{}>", config.remote.author_name, config.remote.author_email);
    println!();
    println!("Sync Settings:");
    println!("  enabled: {}", config.sync.enabled);
    println!("  interval: {}", humanize(config.sync.interval));
    println!("  timeout: {}", humanize(config.sync.timeout));
    match config.sync.state_dir() {
        Some(dir) => println!("  state_dir: {}", dir.display()),
        None => println!("  state_dir: (unknown)"),
    }
    if let Some(command) = &config.sync.on_change {
        println!("  on_change: {}", command.join(" "));
    }
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
    if let Some(path) = Secrets::default_secrets_path() {
        println!("Secrets file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - run `stencil init-secrets`)");
        }
    }
}

fn humanize(duration: std::time::Duration) -> String {
    humantime::format_duration(duration).to_string()
}
