//! Target-wide aggregates: result counts and ranked root-cause tables.
//!
//! Everything here is recomputed from the files on disk on every call. No
//! previous result is read back.

use crate::fields::{first_str, scalar_text, truthy, Object};
use crate::scanner::{read_json_file, ReportScanner};
use crate::tree::for_each_object;
use chrono::{DateTime, Utc};
use reportwatch_model::{CauseOutcome, ResultCounts, RootCauseTable};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

pub const TOP_CAUSES: usize = 10;
pub const EXAMPLES_PER_CAUSE: usize = 5;
pub const MESSAGE_CAUSE_CHARS: usize = 200;

#[derive(Debug, Default)]
struct CauseEntry {
    count: u64,
    first_seen: usize,
    examples: Vec<String>,
}

/// Running tally of failure causes for one outcome.
#[derive(Debug)]
pub struct CauseTally {
    outcome: CauseOutcome,
    total: u64,
    causes: HashMap<String, CauseEntry>,
}

impl CauseTally {
    pub fn new(outcome: CauseOutcome) -> Self {
        Self {
            outcome,
            total: 0,
            causes: HashMap::new(),
        }
    }

    pub fn outcome(&self) -> CauseOutcome {
        self.outcome
    }

    /// Number of matching objects that carried at least one cause.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Scans every object nested anywhere in `doc`.
    pub fn observe_document(&mut self, doc: &Value) {
        for_each_object(doc, |obj| self.observe_object(obj));
    }

    fn observe_object(&mut self, obj: &Object) {
        let matches = obj
            .get("result")
            .and_then(Value::as_str)
            .is_some_and(|r| r.eq_ignore_ascii_case(self.outcome.result_token()));
        if !matches {
            return;
        }
        let causes = extract_causes(obj.get("testFailureCause"));
        if causes.is_empty() {
            return;
        }
        self.total += 1;
        let case_name = first_str(obj, &["testCaseName", "title", "name"]);
        for cause in causes {
            self.record(cause, case_name);
        }
    }

    fn record(&mut self, cause: String, case_name: Option<&str>) {
        let next_index = self.causes.len();
        let entry = self.causes.entry(cause).or_insert_with(|| CauseEntry {
            first_seen: next_index,
            ..CauseEntry::default()
        });
        entry.count += 1;
        if let Some(name) = case_name {
            if entry.examples.len() < EXAMPLES_PER_CAUSE
                && !entry.examples.iter().any(|e| e == name)
            {
                entry.examples.push(name.to_string());
            }
        }
    }

    /// Causes by count, descending; equal counts keep first-seen order.
    pub fn ranked(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&String, &CauseEntry)> = self.causes.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.first_seen);
        entries.sort_by(|a, b| b.1.count.cmp(&a.1.count));
        entries
            .into_iter()
            .map(|(cause, entry)| (cause.as_str(), entry.count))
            .collect()
    }

    /// Keeps the top causes and only their examples.
    pub fn into_table(
        self,
        path: impl Into<String>,
        key: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> RootCauseTable {
        let root_cause: Vec<String> = self
            .ranked()
            .into_iter()
            .take(TOP_CAUSES)
            .map(|(cause, _)| cause.to_string())
            .collect();
        let mut causes = self.causes;
        let examples: Vec<(String, Vec<String>)> = root_cause
            .iter()
            .map(|cause| {
                let examples = causes
                    .remove(cause)
                    .map(|entry| entry.examples)
                    .unwrap_or_default();
                (cause.clone(), examples)
            })
            .collect();
        RootCauseTable {
            outcome: self.outcome,
            path: path.into(),
            key: key.into(),
            total: self.total,
            root_cause,
            examples,
            updated_at,
        }
    }
}

/// Cause strings carried by a `testFailureCause` value. Empty values never count.
fn extract_causes(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| truthy(item))
            .filter_map(scalar_text)
            .collect(),
        Some(Value::String(text)) if !text.is_empty() => vec![text.clone()],
        Some(Value::Object(cause)) => {
            let text = first_str(cause, &["errorType"]).map(str::to_string).or_else(|| {
                first_str(cause, &["message"])
                    .map(|msg| msg.chars().take(MESSAGE_CAUSE_CHARS).collect())
            });
            text.into_iter().collect()
        }
        _ => Vec::new(),
    }
}

/// Bucket for a top-level `result` value, if it has one.
fn classify(counts: &mut ResultCounts, doc: &Value) {
    let Some(result) = doc
        .as_object()
        .and_then(|obj| obj.get("result"))
        .filter(|r| truthy(r))
        .and_then(scalar_text)
    else {
        return;
    };
    match result.to_uppercase().as_str() {
        "SUCCESS" => counts.record_passing(),
        "ERROR" => counts.record_broken(),
        "FAILURE" => counts.record_failed(),
        "PENDING" | "SKIPPED" => counts.record_skipped(),
        _ => {}
    }
}

/// Fresh aggregate of everything under one path.
#[derive(Debug)]
pub struct TargetAggregate {
    pub counts: ResultCounts,
    pub errors: CauseTally,
    pub failures: CauseTally,
    /// Files skipped because they could not be read or parsed.
    pub unreadable: usize,
}

impl Default for TargetAggregate {
    fn default() -> Self {
        Self {
            counts: ResultCounts::default(),
            errors: CauseTally::new(CauseOutcome::Error),
            failures: CauseTally::new(CauseOutcome::Failure),
            unreadable: 0,
        }
    }
}

impl TargetAggregate {
    pub fn observe(&mut self, doc: &Value) {
        classify(&mut self.counts, doc);
        self.errors.observe_document(doc);
        self.failures.observe_document(doc);
    }
}

/// Walks every JSON file beneath `root` once, feeding counts and both cause
/// tallies. Unparseable files are skipped.
#[must_use]
pub fn aggregate_path(root: &Path) -> TargetAggregate {
    let mut aggregate = TargetAggregate::default();
    for path in ReportScanner::new(root).json_files() {
        match read_json_file(&path) {
            Ok(doc) => aggregate.observe(&doc),
            Err(e) => {
                log::debug!("Skipping {} during aggregation: {e}", path.display());
                aggregate.unreadable += 1;
            }
        }
    }
    aggregate
}

/// Result-bucket counts for every JSON file beneath `root`.
#[must_use]
pub fn count_results(root: &Path) -> ResultCounts {
    let mut counts = ResultCounts::default();
    for path in ReportScanner::new(root).json_files() {
        if let Ok(doc) = read_json_file(&path) {
            classify(&mut counts, &doc);
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn ranking_keeps_top_ten_by_count() {
        let mut tally = CauseTally::new(CauseOutcome::Error);
        let counts = [50u64, 40, 30, 20, 10, 9, 8, 7, 6, 5, 2, 1];
        for (i, count) in counts.iter().enumerate() {
            for n in 0..*count {
                tally.observe_document(&json!({
                    "result": "error",
                    "testFailureCause": format!("cause-{i}"),
                    "name": format!("case-{}", n % 7)
                }));
            }
        }

        let table = tally.into_table("/runs", "web", Utc::now());
        let expected: Vec<String> = (0..10).map(|i| format!("cause-{i}")).collect();
        assert_eq!(table.root_cause, expected);
        let example_keys: Vec<&str> = table.examples.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(example_keys, expected);
        assert!(table.examples_for("cause-10").is_none());
        assert_eq!(
            table.examples_for("cause-0").map(<[String]>::len),
            Some(EXAMPLES_PER_CAUSE)
        );
        assert_eq!(table.total, counts.iter().sum::<u64>());
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let mut tally = CauseTally::new(CauseOutcome::Failure);
        for cause in ["b", "a", "c", "a"] {
            tally.observe_document(&json!({"result": "FAILURE", "testFailureCause": cause}));
        }
        assert_eq!(tally.ranked(), vec![("a", 2), ("b", 1), ("c", 1)]);
    }

    #[test]
    fn nested_objects_and_cause_shapes_are_scanned() {
        let doc = json!({
            "name": "outer",
            "result": "SUCCESS",
            "testSteps": [
                {"result": "ERROR", "title": "step 1",
                 "testFailureCause": {"errorType": "Timeout", "message": "ignored"}},
                {"result": "error", "testCaseName": "step 2",
                 "testFailureCause": ["Timeout", "", "Refused"]},
                {"result": "ERROR", "testFailureCause": {"message": "x".repeat(300)}},
                {"result": "ERROR", "testFailureCause": ""},
                {"result": "FAILURE", "testFailureCause": "not an error"}
            ]
        });
        let mut tally = CauseTally::new(CauseOutcome::Error);
        tally.observe_document(&doc);

        assert_eq!(tally.total(), 3);
        let ranked = tally.ranked();
        assert_eq!(ranked[0], ("Timeout", 2));
        assert_eq!(ranked[1], ("Refused", 1));
        assert_eq!(ranked[2].0.len(), MESSAGE_CAUSE_CHARS);

        let table = tally.into_table("/r", "k", Utc::now());
        assert_eq!(
            table.examples_for("Timeout"),
            Some(&["step 1".to_string(), "step 2".to_string()][..])
        );
    }

    #[test]
    fn counts_are_recomputed_from_disk() {
        let dir = tempdir().unwrap();
        let run = dir.path().join("r1");
        std::fs::create_dir(&run).unwrap();
        let files = [
            ("a.json", json!({"result": "SUCCESS"})),
            ("b.json", json!({"result": "error"})),
            ("c.json", json!({"result": "Failure"})),
            ("d.json", json!({"result": "PENDING"})),
            ("e.json", json!({"result": "skipped"})),
            ("f.json", json!({"name": "no result"})),
            ("g.json", json!({"result": "UNKNOWN"})),
        ];
        for (name, body) in &files {
            std::fs::write(run.join(name), body.to_string()).unwrap();
        }
        std::fs::write(run.join("broken.json"), "{").unwrap();

        let aggregate = aggregate_path(dir.path());
        assert_eq!(
            aggregate.counts,
            ResultCounts {
                passing: 1,
                broken_flaky: 1,
                failed: 1,
                skipped: 2,
                total: 5,
            }
        );
        assert_eq!(aggregate.unreadable, 1);
        assert_eq!(count_results(dir.path()), aggregate.counts);

        std::fs::remove_file(run.join("a.json")).unwrap();
        assert_eq!(count_results(dir.path()).passing, 0);
    }
}
