//! Shortener command-line interface
//!
//! Opens the backend selected by configuration and runs one operation
//! against it, or keeps it open with the reaper running.
//!
//! # Examples
//!
//! ```bash
//! # Keep a log-backed store open and reap deleted urls every ten minutes
//! shortener --file-storage-path data/urls.json serve
//!
//! # Shorten two urls for one owner
//! shortener --database-dsn sqlite://data/urls.db add --owner u1 https://a.example/x https://a.example/y
//!
//! # Delete codes owned by u1; codes owned by others are ignored
//! shortener --database-dsn sqlite://data/urls.db delete --owner u1 3f2a9c01d4e5b6a7
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use shortener::error::Error;
use shortener::reaper::spawn_reaper;
use shortener::{Settings, Storage};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// URL shortener storage core
#[derive(Parser, Debug)]
#[command(name = "shortener")]
#[command(version = shortener::VERSION)]
#[command(about = "URL shortener storage core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML settings file
    #[arg(long, global = true, env = "SHORTENER_CONFIG")]
    config: Option<PathBuf>,

    /// Relational connection string; selects the relational backend
    #[arg(long, global = true, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Append-only log path; selects the file backend when no DSN is given
    #[arg(long, global = true, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "SHORTENER_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open storage and reap deleted urls until Ctrl-C
    Serve,

    /// Shorten one or more urls
    Add {
        #[arg(short, long)]
        owner: String,

        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Resolve a short code
    Get { code: String },

    /// List an owner's urls, deleted ones included
    List {
        #[arg(short, long)]
        owner: String,
    },

    /// Soft-delete codes owned by the given owner
    Delete {
        #[arg(short, long)]
        owner: String,

        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Physically remove soft-deleted urls now
    Reap,

    /// Count live urls and distinct owners
    Stats,

    /// Check that the backend is reachable
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let settings = load_settings(&cli)?;
    let storage = Storage::open(&settings)
        .await
        .context("failed to open storage")?;

    let result = match cli.command {
        Commands::Serve => serve_command(&storage).await,
        Commands::Add { owner, urls } => add_command(&storage, &owner, urls).await,
        Commands::Get { code } => get_command(&storage, &code).await,
        Commands::List { owner } => list_command(&storage, &owner).await,
        Commands::Delete { owner, codes } => delete_command(&storage, &owner, codes).await,
        Commands::Reap => {
            let removed = storage.reap().await?;
            println!("Reaped {} urls", removed);
            Ok(())
        }
        Commands::Stats => {
            let stats = storage.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Ping => {
            storage.health_check().await?;
            println!("ok");
            Ok(())
        }
    };

    if let Err(e) = storage.shutdown().await {
        warn!(error = %e, "Storage shutdown failed");
    }

    result
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "shortener.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Settings file and environment first, then command-line flags on top
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    if let Some(dsn) = &cli.database_dsn {
        settings.database_dsn = Some(dsn.clone());
    }
    if let Some(path) = &cli.file_storage_path {
        settings.file_storage_path = Some(path.clone());
    }

    Ok(settings)
}

async fn serve_command(storage: &Storage) -> anyhow::Result<()> {
    info!(version = %shortener::VERSION, backend = storage.engine().name(), "Shortener starting");

    let cancel = CancellationToken::new();
    let reaper = spawn_reaper(
        storage.engine(),
        storage.settings().reap_interval(),
        cancel.clone(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    cancel.cancel();
    if let Err(e) = reaper.await {
        error!(error = %e, "Reaper task failed");
    }

    Ok(())
}

async fn add_command(storage: &Storage, owner: &str, urls: Vec<String>) -> anyhow::Result<()> {
    if let [url] = urls.as_slice() {
        let shortened = storage.shorten(owner, url).await?;
        let marker = if shortened.is_new() { "created" } else { "existing" };
        println!("{} {} ({})", shortened.code(), url, marker);
        return Ok(());
    }

    for entry in storage.shorten_batch(owner, &urls).await? {
        println!("{} {}", entry.short_code, entry.original_url);
    }
    Ok(())
}

async fn get_command(storage: &Storage, code: &str) -> anyhow::Result<()> {
    match storage.resolve(code).await {
        Ok(url) => {
            println!("{}", url);
            Ok(())
        }
        Err(Error::Gone(_)) => {
            println!("{} has been deleted", code);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_command(storage: &Storage, owner: &str) -> anyhow::Result<()> {
    let records = storage.list_by_owner(owner).await?;
    if records.is_empty() {
        println!("No urls.");
        return Ok(());
    }

    for record in records {
        let state = if record.deleted { "deleted" } else { "live" };
        println!("{} {} {}", record.short_code, record.original_url, state);
    }
    Ok(())
}

async fn delete_command(storage: &Storage, owner: &str, codes: Vec<String>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let report = storage.delete_urls(owner, codes, &cancel).await?;
    println!(
        "Deleted {} of {} requested urls",
        report.committed, report.requested
    );
    Ok(())
}
