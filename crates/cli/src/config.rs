//! Process configuration: a JSON file, environment overrides and CLI flags,
//! resolved once at startup into an immutable [`Settings`].

use anyhow::{Context, Result};
use reportwatch_watcher::{TargetDescriptor, WatchDriverConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STORE_URI: &str = ".reportwatch";
pub const DEFAULT_DATABASE: &str = "reportwatch";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Keys accepted in the config file. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub watch_path: Option<String>,
    pub collection: Option<String>,
    pub targets: Option<Vec<TargetDescriptor>>,
    #[serde(alias = "mongo_uri")]
    pub store_uri: Option<String>,
    pub database: Option<String>,
    pub recursive: Option<bool>,
    pub sync_interval_seconds: Option<u64>,
}

impl FileConfig {
    /// A missing file is an empty config; an unreadable or malformed one is an error.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Values given on the command line; they win over env and file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub refresh_runs: bool,
    pub exit_after_refresh: bool,
    pub sync_interval_seconds: Option<u64>,
    pub no_recursive: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub config_file: PathBuf,
    pub descriptors: Vec<TargetDescriptor>,
    pub store_uri: String,
    pub database: String,
    pub recursive: bool,
    pub sync_interval: Duration,
    pub refresh_runs: bool,
    pub exit_after_refresh: bool,
}

impl Settings {
    pub fn load(cli: &CliOverrides, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_file = select_config_file(
            cli.config.as_deref(),
            env("CONFIG_FILE").as_deref(),
            std::env::consts::OS,
        );
        let file = FileConfig::read(&config_file)?;
        Ok(Self::resolve(config_file, file, cli, env))
    }

    /// Precedence: CLI flag, then environment, then file, then default.
    pub fn resolve(
        config_file: PathBuf,
        file: FileConfig,
        cli: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());

        let descriptors = match file.targets.filter(|targets| !targets.is_empty()) {
            Some(targets) => targets,
            None => {
                let watch_path = non_empty("WATCH_PATH").or(file.watch_path);
                let collection = non_empty("COLLECTION").or(file.collection);
                match (watch_path, collection) {
                    (Some(path), Some(collection)) => {
                        vec![TargetDescriptor::single(path, collection)]
                    }
                    _ => Vec::new(),
                }
            }
        };

        let store_uri = non_empty("STORE_URI")
            .or_else(|| non_empty("MONGO_URI"))
            .or(file.store_uri)
            .unwrap_or_else(|| DEFAULT_STORE_URI.to_string());
        let database = non_empty("DB_NAME")
            .or(file.database)
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let recursive = !cli.no_recursive
            && env("RECURSIVE")
                .map(|v| is_true(&v))
                .or(file.recursive)
                .unwrap_or(true);

        let sync_secs = cli
            .sync_interval_seconds
            .or_else(|| {
                let raw = env("SYNC_INTERVAL_SECONDS")?;
                match raw.trim().parse() {
                    Ok(secs) => Some(secs),
                    Err(_) => {
                        log::warn!("Ignoring invalid SYNC_INTERVAL_SECONDS={raw}");
                        None
                    }
                }
            })
            .or(file.sync_interval_seconds)
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS)
            .max(1);

        Self {
            config_file,
            descriptors,
            store_uri,
            database,
            recursive,
            sync_interval: Duration::from_secs(sync_secs),
            refresh_runs: cli.refresh_runs || env("REFRESH_TEST_RUNS").is_some_and(|v| is_true(&v)),
            exit_after_refresh: cli.exit_after_refresh
                || env("EXIT_AFTER_REFRESH").is_some_and(|v| is_true(&v)),
        }
    }

    pub fn driver_config(&self) -> WatchDriverConfig {
        WatchDriverConfig {
            recursive: self.recursive,
            sync_interval: self.sync_interval,
            ..WatchDriverConfig::default()
        }
    }

    /// One startup pass, then exit without watching.
    pub fn refresh_only(&self) -> bool {
        self.refresh_runs && self.exit_after_refresh
    }
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// `--config`, else `CONFIG_FILE` if it names a file, else the first existing
/// per-OS candidate, else `config.json`.
pub fn select_config_file(explicit: Option<&Path>, env_file: Option<&str>, os: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env_file.map(PathBuf::from).filter(|p| p.is_file()) {
        return path;
    }
    let candidates: &[&str] = match os {
        "windows" => &["config.windows.json", DEFAULT_CONFIG_FILE],
        "macos" => &["config.macos.json", DEFAULT_CONFIG_FILE],
        _ => &[DEFAULT_CONFIG_FILE],
    };
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
