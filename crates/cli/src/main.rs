use anyhow::{Context, Result};
use clap::Parser;
use reportwatch_store::open_store;
use reportwatch_watcher::{AuditLog, Category, Reconciler, TargetRegistry, WatchDriver, WatchError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

mod config;

use config::{CliOverrides, Settings};

#[derive(Parser)]
#[command(name = "reportwatch")]
#[command(
    about = "Ingests test-report folders into a document store and keeps it in sync",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Config file (defaults to CONFIG_FILE, then config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long)]
    quiet: bool,

    /// Re-derive every test-run record during full passes
    #[arg(long)]
    refresh_runs: bool,

    /// With --refresh-runs: run the startup pass and exit
    #[arg(long)]
    exit_after_refresh: bool,

    /// Seconds between periodic full passes
    #[arg(long)]
    sync_interval_seconds: Option<u64>,

    /// Watch only the first level of each target root
    #[arg(long)]
    no_recursive: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone(),
            refresh_runs: self.refresh_runs,
            exit_after_refresh: self.exit_after_refresh,
            sync_interval_seconds: self.sync_interval_seconds,
            no_recursive: self.no_recursive,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let settings = Settings::load(&cli.overrides(), |key| std::env::var(key).ok())?;
    let store = open_store(&settings.store_uri, &settings.database).with_context(|| {
        format!(
            "Failed to open document store {} (database {})",
            settings.store_uri, settings.database
        )
    })?;
    let audit = AuditLog::with_store(store.clone());
    audit.record(
        Category::Config,
        format!("Using file: {}", settings.config_file.display()),
    );

    let registry = match TargetRegistry::resolve(&settings.descriptors, &audit) {
        Ok(registry) => registry,
        Err(WatchError::NoTargets) => {
            audit.record(
                Category::Fatal,
                "No valid watch paths found. Please update config.json or environment.",
            );
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    let reconciler = Reconciler::new(store, audit.clone()).with_refresh_runs(settings.refresh_runs);
    let driver = WatchDriver::new(Arc::new(registry), reconciler, settings.driver_config());

    if settings.refresh_only() {
        let stats = driver.run_refresh_only().await?;
        audit.record(
            Category::Refresh,
            format!(
                "Refresh complete: {} runs, {} cases; exiting",
                stats.runs, stats.cases
            ),
        );
        return Ok(ExitCode::SUCCESS);
    }

    let stats = driver.startup().await?;
    log::debug!("Startup pass: {stats:?}");

    driver
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(ExitCode::SUCCESS)
}
