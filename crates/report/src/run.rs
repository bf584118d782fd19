//! Test Run records: the optional `summary.txt` a report tool leaves in a run
//! folder, with counts from the folder's report files filling the gaps.

use crate::aggregate::count_results;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reportwatch_model::{RunSource, RunSummary, TestRun, REPORT_TOOL};
use std::path::Path;

pub const SUMMARY_FILE_NAME: &str = "summary.txt";
pub const START_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

static GENERATED_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Serenity report generated\s*:?\s*(\d{2}-\d{2}-\d{4}\s+\d{2}:\d{2}:\d{2})")
        .expect("static regex")
});

fn label_regex(label: &str) -> Regex {
    Regex::new(&format!(r"(?i){label}\s*:\s*(\d+)")).expect("static regex")
}

static TOTAL: Lazy<Regex> = Lazy::new(|| label_regex("Number of test cases"));
static PASSED: Lazy<Regex> = Lazy::new(|| label_regex("Passed"));
static FAILED: Lazy<Regex> = Lazy::new(|| label_regex("Failed"));
static BROKEN: Lazy<Regex> = Lazy::new(|| label_regex("Failed with errors"));
static PENDING: Lazy<Regex> = Lazy::new(|| label_regex("Pending"));
static IGNORED: Lazy<Regex> = Lazy::new(|| label_regex("Ignored"));
static SKIPPED: Lazy<Regex> = Lazy::new(|| label_regex("Skipped"));
static COMPROMISED: Lazy<Regex> = Lazy::new(|| label_regex("Compromised"));

/// Values recognized in a run's `summary.txt`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryText {
    pub start_time: Option<String>,
    pub total: Option<u64>,
    pub passed: Option<u64>,
    pub failed: Option<u64>,
    pub broken: Option<u64>,
    pub pending: Option<u64>,
    pub ignored: Option<u64>,
    pub skipped: Option<u64>,
    pub compromised: Option<u64>,
}

fn grab(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text).and_then(|caps| caps[1].parse().ok())
}

#[must_use]
pub fn parse_summary_text(text: &str) -> SummaryText {
    SummaryText {
        start_time: GENERATED_AT
            .captures(text)
            .map(|caps| caps[1].to_string()),
        total: grab(&TOTAL, text),
        passed: grab(&PASSED, text),
        failed: grab(&FAILED, text),
        broken: grab(&BROKEN, text),
        pending: grab(&PENDING, text),
        ignored: grab(&IGNORED, text),
        skipped: grab(&SKIPPED, text),
        compromised: grab(&COMPROMISED, text),
    }
}

/// `None` when the folder has no readable `summary.txt`.
#[must_use]
pub fn read_summary_file(folder: &Path) -> Option<SummaryText> {
    let path = folder.join(SUMMARY_FILE_NAME);
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(text) => Some(parse_summary_text(&text)),
        Err(e) => {
            log::warn!("Failed to read {}: {e}", path.display());
            None
        }
    }
}

/// Folder creation time (modification time where creation is unavailable),
/// or now if the folder cannot be inspected.
#[must_use]
pub fn folder_start_time(folder: &Path) -> DateTime<Utc> {
    let Ok(meta) = std::fs::metadata(folder) else {
        return Utc::now();
    };
    meta.created()
        .or_else(|_| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Builds the Test Run record for `folder`; the run id is the folder name.
#[must_use]
pub fn build_test_run(folder: &Path, project: Option<&str>) -> TestRun {
    let run_id = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let text = read_summary_file(folder).unwrap_or_default();
    let counts = count_results(folder);

    let start_time = text
        .start_time
        .clone()
        .unwrap_or_else(|| folder_start_time(folder).format(START_TIME_FORMAT).to_string());

    TestRun {
        run_id,
        project: project.map(str::to_string),
        start_time: Some(start_time),
        summary: RunSummary {
            total: text.total.or(Some(counts.total)),
            passed: text.passed.or(Some(counts.passing)),
            failed: text.failed.or(Some(counts.failed)),
            broken: text.broken.or(Some(counts.broken_flaky)),
            skipped: text.skipped.or(Some(counts.skipped)),
            pending: text.pending,
            ignored: text.ignored,
            compromised: text.compromised,
        },
        source: RunSource {
            tool: REPORT_TOOL.to_string(),
            report_path: folder.to_string_lossy().into_owned(),
        },
    }
}
