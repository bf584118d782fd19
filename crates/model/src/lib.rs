//! Normalized records written by the report watcher.
//!
//! Field names follow the stored document shape (camelCase for run-level
//! entities, snake_case for per-target aggregates), so these types double as
//! the wire format for the document store.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

pub const TEST_RUNS_COLLECTION: &str = "test-runs";
pub const TEST_CASES_COLLECTION: &str = "test-cases";
pub const TEST_STEPS_COLLECTION: &str = "test-steps";
pub const ATTACHMENTS_COLLECTION: &str = "attachments";
pub const AUDIT_COLLECTION: &str = "log-watcher";

pub const SUMMARY_SUFFIX: &str = "-summary";
pub const ERROR_SUFFIX: &str = "-error";
pub const FAIL_SUFFIX: &str = "-fail";

/// Tool name recorded as provenance on every test run.
pub const REPORT_TOOL: &str = "serenity";

/// Value substituted for `Authorization` headers before storage.
pub const HEADER_MASK: &str = "***";

/// One first-level subdirectory of a watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFolderRecord {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub first_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: Option<u64>,
    pub passed: Option<u64>,
    pub failed: Option<u64>,
    pub broken: Option<u64>,
    pub skipped: Option<u64>,
    pub pending: Option<u64>,
    pub ignored: Option<u64>,
    pub compromised: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSource {
    pub tool: String,
    pub report_path: String,
}

/// Derived record for one run folder, keyed by `runId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub run_id: String,
    pub project: Option<String>,
    pub start_time: Option<String>,
    pub summary: RunSummary,
    pub source: RunSource,
}

/// One recognized report document inside a run folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub run_id: String,
    pub test_case_id: String,
    pub name: Option<String>,
    pub feature: Option<String>,
    pub story: Option<String>,
    pub tags: Vec<String>,
    pub status: Option<String>,
    pub duration: i64,
    pub error_message: Option<String>,
    pub has_steps: bool,
    pub has_attachment: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub method: Option<String>,
    pub url: Option<String>,
    pub content: Option<serde_json::Value>,
    pub content_type: Option<String>,
    /// Header mapping with `Authorization` masked.
    pub headers: Option<serde_json::Map<String, serde_json::Value>>,
    /// Raw header block exactly as reported; kept for audit.
    pub request_headers: Option<serde_json::Value>,
    pub response_body: Option<serde_json::Value>,
    pub status_code: Option<serde_json::Value>,
    #[serde(rename = "cUrl")]
    pub curl: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Option<serde_json::Value>,
    pub body: Option<serde_json::Value>,
}

/// One step in the flattened, pre-order step sequence of a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub run_id: String,
    pub test_case_id: String,
    pub step_order: u32,
    pub name: Option<String>,
    pub status: Option<String>,
    pub duration: Option<serde_json::Number>,
    pub request: Option<StepRequest>,
    pub response: Option<StepResponse>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub run_id: String,
    pub test_case_id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub path: Option<String>,
}

/// Pass/fail buckets over every result-bearing JSON document under a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub passing: u64,
    pub broken_flaky: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
}

impl ResultCounts {
    pub fn record_passing(&mut self) {
        self.passing += 1;
        self.total += 1;
    }

    pub fn record_broken(&mut self) {
        self.broken_flaky += 1;
        self.total += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
        self.total += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
        self.total += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub path: String,
    pub key: String,
    #[serde(flatten)]
    pub counts: ResultCounts,
    pub first_time: Option<DateTime<Utc>>,
    pub latest_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Which result value a root-cause table is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CauseOutcome {
    Error,
    Failure,
}

impl CauseOutcome {
    #[must_use]
    pub fn result_token(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Failure => "FAILURE",
        }
    }

    #[must_use]
    pub fn total_field(self) -> &'static str {
        match self {
            Self::Error => "totalError",
            Self::Failure => "totalFail",
        }
    }
}

/// Ranked failure causes for one target. Serialized with `totalError` or
/// `totalFail` depending on the outcome it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCauseTable {
    pub outcome: CauseOutcome,
    pub path: String,
    pub key: String,
    pub total: u64,
    pub root_cause: Vec<String>,
    /// Example case names per cause, in `root_cause` order.
    pub examples: Vec<(String, Vec<String>)>,
    pub updated_at: DateTime<Utc>,
}

impl Serialize for RootCauseTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("path", &self.path)?;
        map.serialize_entry("key", &self.key)?;
        map.serialize_entry(self.outcome.total_field(), &self.total)?;
        map.serialize_entry("rootCause", &self.root_cause)?;
        map.serialize_entry("ex", &RankedExamples(&self.examples))?;
        map.serialize_entry("updated_at", &self.updated_at)?;
        map.end()
    }
}

impl RootCauseTable {
    #[must_use]
    pub fn examples_for(&self, cause: &str) -> Option<&[String]> {
        self.examples
            .iter()
            .find(|(name, _)| name == cause)
            .map(|(_, names)| names.as_slice())
    }
}

/// Serializes cause examples as an object keyed in rank order.
struct RankedExamples<'a>(&'a [(String, Vec<String>)]);

impl Serialize for RankedExamples<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(cause, names)| (cause, names)))
    }
}
