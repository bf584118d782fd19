use assert_cmd::prelude::*;
use pretty_assertions::assert_eq;
use reportwatch_model::{AUDIT_COLLECTION, TEST_CASES_COLLECTION, TEST_RUNS_COLLECTION};
use reportwatch_store::{database_file, DocumentStore, Filter, SqliteStore};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const CONFIG_ENV: &[&str] = &[
    "CONFIG_FILE",
    "WATCH_PATH",
    "COLLECTION",
    "STORE_URI",
    "MONGO_URI",
    "DB_NAME",
    "RECURSIVE",
    "SYNC_INTERVAL_SECONDS",
    "REFRESH_TEST_RUNS",
    "EXIT_AFTER_REFRESH",
];

fn reportwatch(workdir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("reportwatch"));
    cmd.current_dir(workdir);
    for key in CONFIG_ENV {
        cmd.env_remove(key);
    }
    cmd
}

fn bodies(store: &SqliteStore, collection: &str) -> Vec<Value> {
    store
        .find(collection, &Filter::All)
        .unwrap()
        .into_iter()
        .map(|d| Value::Object(d.body))
        .collect()
}

#[test]
fn refresh_only_run_ingests_and_exits() {
    let temp = TempDir::new().unwrap();
    let reports = temp.path().join("reports");
    let run = reports.join("2024-05-01");
    fs::create_dir_all(&run).unwrap();
    fs::write(
        run.join("checkout.json"),
        json!({"name": "Checkout", "result": "SUCCESS"}).to_string(),
    )
    .unwrap();

    let store_dir = temp.path().join("store");
    let config = temp.path().join("config.json");
    fs::write(
        &config,
        json!({
            "watch_path": reports.to_string_lossy(),
            "collection": "web",
            "store_uri": store_dir.to_string_lossy(),
            "database": "reports"
        })
        .to_string(),
    )
    .unwrap();

    reportwatch(temp.path())
        .args(["--refresh-runs", "--exit-after-refresh", "--quiet"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    let store = SqliteStore::open(database_file(&store_dir.to_string_lossy(), "reports")).unwrap();
    let folders = bodies(&store, "web");
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0]["name"], json!("2024-05-01"));

    let runs = bodies(&store, TEST_RUNS_COLLECTION);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["project"], json!("web"));
    assert_eq!(bodies(&store, TEST_CASES_COLLECTION).len(), 1);
    assert_eq!(bodies(&store, "web-summary")[0]["total"], json!(1));

    let audit = bodies(&store, AUDIT_COLLECTION);
    assert!(audit
        .iter()
        .any(|entry| entry["message"].as_str().is_some_and(|m| m.starts_with("Using file:"))));
}

#[test]
fn environment_supplies_the_target() {
    let temp = TempDir::new().unwrap();
    let reports = temp.path().join("reports");
    fs::create_dir_all(reports.join("R1")).unwrap();
    let store_dir = temp.path().join("store");

    reportwatch(temp.path())
        .env("WATCH_PATH", &reports)
        .env("COLLECTION", "api")
        .env("STORE_URI", &store_dir)
        .env("REFRESH_TEST_RUNS", "true")
        .env("EXIT_AFTER_REFRESH", "TRUE")
        .assert()
        .success();

    let store =
        SqliteStore::open(database_file(&store_dir.to_string_lossy(), "reportwatch")).unwrap();
    assert_eq!(bodies(&store, "api").len(), 1);
}

#[test]
fn missing_targets_exit_with_failure() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store");

    reportwatch(temp.path())
        .env("WATCH_PATH", temp.path().join("does-not-exist"))
        .env("COLLECTION", "web")
        .env("STORE_URI", &store_dir)
        .assert()
        .code(1)
        .stderr(predicates::str::contains("No valid watch paths found"));

    let store =
        SqliteStore::open(database_file(&store_dir.to_string_lossy(), "reportwatch")).unwrap();
    let messages: Vec<String> = bodies(&store, AUDIT_COLLECTION)
        .iter()
        .filter_map(|e| e["message"].as_str().map(str::to_string))
        .collect();
    assert!(messages.iter().any(|m| m.contains("Watch path not found")));
    assert!(messages.iter().any(|m| m.contains("No valid watch paths found")));
}

#[test]
fn malformed_config_is_an_error() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("config.json"), "{ not json").unwrap();

    reportwatch(temp.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("Failed to parse config file"));
}
