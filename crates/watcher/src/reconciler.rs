//! Keeps the document store in step with the run folders under each target.
//!
//! Every write is an upsert keyed by a natural identity tuple, so replaying an
//! event or a whole pass is harmless. Failures are contained to the document,
//! folder, or store call that produced them; they are logged and counted, and
//! the surrounding pass carries on.

use crate::audit::{AuditLog, Category};
use crate::stats::PassStats;
use crate::targets::Target;
use chrono::{DateTime, Utc};
use reportwatch_model::{
    RunFolderRecord, TargetSummary, ATTACHMENTS_COLLECTION, TEST_CASES_COLLECTION,
    TEST_RUNS_COLLECTION, TEST_STEPS_COLLECTION,
};
use reportwatch_report::{aggregate_path, build_test_run, parse_run_folder, ParsedCase};
use reportwatch_store::{
    doc, to_document, DocId, Document, DocumentStore, Filter, IndexSpec, StoredDocument,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const FOLDER_INDEX: &[&str] = &["name", "path"];

fn run_indexes() -> [(&'static str, IndexSpec); 4] {
    [
        (TEST_RUNS_COLLECTION, IndexSpec::unique(&["runId"])),
        (TEST_CASES_COLLECTION, IndexSpec::unique(&["runId", "testCaseId"])),
        (
            TEST_STEPS_COLLECTION,
            IndexSpec::unique(&["runId", "testCaseId", "stepOrder"]),
        ),
        (
            ATTACHMENTS_COLLECTION,
            IndexSpec::non_unique(&["runId", "testCaseId", "name", "path"]),
        ),
    ]
}

/// Selects the listed fields of a serialized record as an upsert key.
fn key_of(body: &Document, fields: &[&str]) -> Document {
    fields
        .iter()
        .map(|f| ((*f).to_string(), body.get(*f).cloned().unwrap_or_default()))
        .collect()
}

fn created_at() -> Document {
    doc(json!({ "createdAt": Utc::now() }))
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First-level directories under `root`, sorted. A missing root lists nothing.
fn first_level_dirs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

struct FolderRow {
    id: DocId,
    record: RunFolderRecord,
}

fn folder_rows(docs: Vec<StoredDocument>) -> Vec<FolderRow> {
    docs.into_iter()
        .filter_map(|stored| {
            let record = serde_json::from_value(stored.body.into()).ok()?;
            Some(FolderRow {
                id: stored.id,
                record,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    audit: AuditLog,
    refresh_runs: bool,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, audit: AuditLog) -> Self {
        Self {
            store,
            audit,
            refresh_runs: false,
        }
    }

    /// Also rewrite every Test Run during full passes, logged as REFRESH.
    #[must_use]
    pub fn with_refresh_runs(mut self, enabled: bool) -> Self {
        self.refresh_runs = enabled;
        self
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Startup work for one target: dedup, folder index, run indexes.
    pub fn prepare(&self, target: &Target) -> usize {
        let removed = self.deduplicate(target);
        self.ensure_folder_index(target);
        self.ensure_run_indexes();
        removed
    }

    pub fn ensure_folder_index(&self, target: &Target) {
        let collection = &target.collections().folders;
        if let Err(e) = self
            .store
            .ensure_index(collection, &IndexSpec::unique(FOLDER_INDEX))
        {
            self.audit
                .record(Category::Warn, format!("Create unique index failed: {e}"));
        }
    }

    pub fn ensure_run_indexes(&self) {
        for (collection, index) in run_indexes() {
            if let Err(e) = self.store.ensure_index(collection, &index) {
                self.audit
                    .record(Category::Warn, format!("Create run indexes failed: {e}"));
            }
        }
    }

    /// Full reconciliation of one target: sync folder records, drop duplicates,
    /// optionally refresh runs, reparse every run folder and recompute aggregates.
    pub fn full_pass(&self, target: &Target) -> PassStats {
        let started = Instant::now();
        let mut stats = PassStats::default();

        self.sync(target, &mut stats);
        stats.duplicates_removed += self.deduplicate(target);
        if self.refresh_runs {
            self.refresh_runs(target, &mut stats);
        }

        match first_level_dirs(target.root()) {
            Ok(folders) => {
                for folder in folders {
                    self.process_run_folder(target, &folder, &mut stats);
                }
            }
            Err(e) => {
                stats.failures += 1;
                self.audit.record(
                    Category::Warn,
                    format!("Run parse failed for {}: {e}", target.root().display()),
                );
            }
        }
        self.update_aggregates(target, &mut stats);

        stats.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log::debug!(
            "Reconciled {} in {} ms: {stats:?}",
            target.root().display(),
            stats.time_ms
        );
        stats
    }

    /// A first-level directory appeared (created or moved in).
    pub fn folder_created(&self, target: &Target, folder: &Path) -> PassStats {
        let mut stats = PassStats::default();
        if !target.is_first_level(folder) || !folder.is_dir() {
            return stats;
        }
        let name = folder_name(folder);
        match self.insert_folder_record(target, folder) {
            Ok(true) => {
                stats.folders_inserted += 1;
                self.audit
                    .record(Category::Insert, format!("Added folder: {name}"));
            }
            Ok(false) => self
                .audit
                .record(Category::Skip, format!("Folder already exists: {name}")),
            Err(e) => {
                stats.failures += 1;
                self.audit.record(
                    Category::Error,
                    format!("Insert folder failed: {name} - {e}"),
                );
            }
        }
        self.process_run_folder(target, folder, &mut stats);
        self.update_aggregates(target, &mut stats);
        stats
    }

    /// A first-level path disappeared (deleted or moved out). Paths without a
    /// folder record, such as renamed files, leave no trace. Records derived
    /// from the folder are kept.
    pub fn folder_removed(&self, target: &Target, folder: &Path) -> PassStats {
        let mut stats = PassStats::default();
        if !target.is_first_level(folder) {
            return stats;
        }
        let name = folder_name(folder);
        let filter = Filter::Eq(doc(json!({
            "name": name,
            "path": folder.to_string_lossy(),
        })));
        match self.store.delete_many(&target.collections().folders, &filter) {
            Ok(0) => {
                log::debug!("No folder record for {}", folder.display());
                return stats;
            }
            Ok(removed) => {
                stats.stale_removed += usize::try_from(removed).unwrap_or(usize::MAX);
                self.audit.record(
                    Category::Event,
                    format!("Folder deleted: {}", folder.display()),
                );
                self.audit
                    .record(Category::Delete, format!("Removed from DB: {name}"));
            }
            Err(e) => {
                stats.failures += 1;
                self.audit
                    .record(Category::Error, format!("Delete failed: {name} - {e}"));
                return stats;
            }
        }
        self.update_aggregates(target, &mut stats);
        stats
    }

    fn insert_folder_record(
        &self,
        target: &Target,
        folder: &Path,
    ) -> reportwatch_store::Result<bool> {
        let record = RunFolderRecord {
            name: folder_name(folder),
            path: folder.to_string_lossy().into_owned(),
            first_seen_at: Some(Utc::now()),
        };
        let body = to_document(&record)?;
        let outcome = self.store.insert_if_absent(
            &target.collections().folders,
            &key_of(&body, FOLDER_INDEX),
            &body,
        )?;
        Ok(outcome.inserted())
    }

    fn stored_folders(&self, target: &Target) -> reportwatch_store::Result<Vec<FolderRow>> {
        let docs = self.store.find(
            &target.collections().folders,
            &Filter::path_prefix("path", target.child_prefix()),
        )?;
        Ok(folder_rows(docs))
    }

    /// Inserts records for folders on disk and removes records whose folder is
    /// gone or is not a direct child of the root.
    pub fn sync(&self, target: &Target, stats: &mut PassStats) {
        match first_level_dirs(target.root()) {
            Ok(folders) => {
                stats.folders += folders.len();
                for folder in &folders {
                    match self.insert_folder_record(target, folder) {
                        Ok(true) => {
                            stats.folders_inserted += 1;
                            self.audit.record(
                                Category::Sync,
                                format!("Added folder: {}", folder_name(folder)),
                            );
                        }
                        Ok(false) => {}
                        Err(e) => {
                            stats.failures += 1;
                            self.audit.record(Category::Error, format!("Sync failed: {e}"));
                        }
                    }
                }
            }
            Err(e) => {
                stats.failures += 1;
                self.audit.record(
                    Category::Error,
                    format!("Sync failed for {}: {e}", target.root().display()),
                );
            }
        }

        let rows = match self.stored_folders(target) {
            Ok(rows) => rows,
            Err(e) => {
                stats.failures += 1;
                self.audit.record(Category::Error, format!("Sync failed: {e}"));
                return;
            }
        };
        for row in rows {
            let path = Path::new(&row.record.path);
            let reason = if !path.is_dir() {
                "stale"
            } else if !target.is_first_level(path) {
                "nested"
            } else {
                continue;
            };
            match self
                .store
                .delete_by_id(&target.collections().folders, row.id)
            {
                Ok(true) => {
                    stats.stale_removed += 1;
                    self.audit.record(
                        Category::Sync,
                        format!("Removed {reason}: {}", row.record.name),
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    stats.failures += 1;
                    self.audit.record(Category::Error, format!("Sync failed: {e}"));
                }
            }
        }
    }

    /// Keeps one record per `(name, path)`: the latest `firstSeenAt`, newest
    /// row on ties. Returns how many were removed.
    pub fn deduplicate(&self, target: &Target) -> usize {
        let rows = match self.stored_folders(target) {
            Ok(rows) => rows,
            Err(e) => {
                self.audit.record(Category::Error, format!("Dedup failed: {e}"));
                return 0;
            }
        };

        let mut order: Vec<(String, String)> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<FolderRow>> = HashMap::new();
        for row in rows {
            let key = (row.record.name.clone(), row.record.path.clone());
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(row);
        }

        let mut removed = 0;
        for key in order {
            let Some(mut group) = groups.remove(&key) else {
                continue;
            };
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| {
                (b.record.first_seen_at, b.id).cmp(&(a.record.first_seen_at, a.id))
            });
            let mut removed_here = 0;
            for row in group.iter().skip(1) {
                match self.store.delete_by_id(&target.collections().folders, row.id) {
                    Ok(true) => removed_here += 1,
                    Ok(false) => {}
                    Err(e) => self.audit.record(Category::Error, format!("Dedup failed: {e}")),
                }
            }
            self.audit.record(
                Category::Dedup,
                format!("Removed {removed_here} duplicates for {}", key.0),
            );
            removed += removed_here;
        }
        removed
    }

    fn upsert_record<T: Serialize>(
        &self,
        collection: &str,
        record: &T,
        key_fields: &[&str],
    ) -> reportwatch_store::Result<()> {
        let body = to_document(record)?;
        self.store
            .upsert(collection, &key_of(&body, key_fields), &body, &created_at())?;
        Ok(())
    }

    fn write_test_run(&self, target: &Target, folder: &Path) -> reportwatch_store::Result<String> {
        let run = build_test_run(folder, Some(target.key()));
        self.upsert_record(TEST_RUNS_COLLECTION, &run, &["runId"])?;
        Ok(run.run_id)
    }

    /// Rewrites the Test Run of every first-level folder.
    pub fn refresh_runs(&self, target: &Target, stats: &mut PassStats) {
        let folders = match first_level_dirs(target.root()) {
            Ok(folders) => folders,
            Err(e) => {
                stats.failures += 1;
                self.audit
                    .record(Category::Error, format!("Refresh runs failed: {e}"));
                return;
            }
        };
        for folder in folders {
            match self.write_test_run(target, &folder) {
                Ok(run_id) => self
                    .audit
                    .record(Category::Refresh, format!("test-runs: {run_id} updated")),
                Err(e) => {
                    stats.failures += 1;
                    self.audit
                        .record(Category::Error, format!("Refresh runs failed: {e}"));
                }
            }
        }
    }

    /// Upserts the Test Run and every recognized case (with steps and
    /// attachments) found under `folder`.
    pub fn process_run_folder(&self, target: &Target, folder: &Path, stats: &mut PassStats) {
        let run_id = folder_name(folder);
        match self.write_test_run(target, folder) {
            Ok(_) => stats.runs += 1,
            Err(e) => {
                stats.failures += 1;
                self.audit
                    .record(Category::Error, format!("Insert test-runs failed: {e}"));
            }
        }

        let report = parse_run_folder(folder, &run_id);
        stats.ignored_documents += report.ignored;
        for failure in &report.failures {
            stats.failures += 1;
            self.audit.record(
                Category::Warn,
                format!(
                    "Skipped unreadable report {}: {}",
                    failure.path.display(),
                    failure.error
                ),
            );
        }
        for parsed in &report.cases {
            self.write_case(parsed, stats);
        }
    }

    fn write_case(&self, parsed: &ParsedCase, stats: &mut PassStats) {
        let case_id = &parsed.case.test_case_id;
        match self.upsert_record(
            TEST_CASES_COLLECTION,
            &parsed.case,
            &["runId", "testCaseId"],
        ) {
            Ok(()) => stats.cases += 1,
            Err(e) => {
                stats.failures += 1;
                self.audit
                    .record(Category::Error, format!("Upsert case {case_id} failed: {e}"));
            }
        }
        for step in &parsed.steps {
            match self.upsert_record(
                TEST_STEPS_COLLECTION,
                step,
                &["runId", "testCaseId", "stepOrder"],
            ) {
                Ok(()) => stats.steps += 1,
                Err(e) => {
                    stats.failures += 1;
                    self.audit.record(
                        Category::Error,
                        format!("Upsert step {case_id}#{} failed: {e}", step.step_order),
                    );
                }
            }
        }
        for attachment in &parsed.attachments {
            match self.upsert_record(
                ATTACHMENTS_COLLECTION,
                attachment,
                &["runId", "testCaseId", "name", "path"],
            ) {
                Ok(()) => stats.attachments += 1,
                Err(e) => {
                    stats.failures += 1;
                    self.audit.record(
                        Category::Error,
                        format!("Upsert attachment for {case_id} failed: {e}"),
                    );
                }
            }
        }
    }

    fn first_seen_range(&self, target: &Target) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self.stored_folders(target) {
            Ok(rows) => {
                let times = rows.iter().filter_map(|row| row.record.first_seen_at);
                let earliest = times.clone().min();
                (earliest, times.max())
            }
            Err(e) => {
                log::warn!("Failed to read folder records for summary: {e}");
                (None, None)
            }
        }
    }

    /// Recomputes the target summary and both root-cause tables from disk and
    /// overwrites the stored copies.
    pub fn update_aggregates(&self, target: &Target, stats: &mut PassStats) {
        let root = target.root_path();
        let aggregate = aggregate_path(target.root());
        let (first_time, latest_time) = self.first_seen_range(target);
        let now = Utc::now();
        let key = doc(json!({ "path": root }));

        let summary = TargetSummary {
            path: root.clone(),
            key: target.key().to_string(),
            counts: aggregate.counts,
            first_time,
            latest_time,
            updated_at: now,
        };
        let written = to_document(&summary).and_then(|body| {
            self.store
                .upsert(&target.collections().summary, &key, &body, &Document::new())
        });
        match written {
            Ok(_) => self.audit.record(
                Category::Summary,
                format!("Upsert for {root}: total={}", summary.counts.total),
            ),
            Err(e) => {
                stats.failures += 1;
                self.audit
                    .record(Category::Error, format!("Summary upsert failed: {e}"));
            }
        }

        let tables = [
            (
                aggregate.errors.into_table(&root, target.key(), now),
                &target.collections().errors,
                Category::ErrorSummary,
            ),
            (
                aggregate.failures.into_table(&root, target.key(), now),
                &target.collections().failures,
                Category::FailSummary,
            ),
        ];
        for (table, collection, category) in tables {
            let written = to_document(&table).and_then(|body| {
                self.store
                    .upsert(collection, &key, &body, &Document::new())
            });
            match written {
                Ok(_) => self.audit.record(
                    category,
                    format!(
                        "Upsert for {root}: {}={}, causes={}",
                        table.outcome.total_field(),
                        table.total,
                        table.root_cause.len()
                    ),
                ),
                Err(e) => {
                    stats.failures += 1;
                    self.audit.record(
                        Category::Error,
                        format!("{category} upsert failed: {e}"),
                    );
                }
            }
        }
    }
}
