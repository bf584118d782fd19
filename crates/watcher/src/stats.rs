use serde::Serialize;

/// Counters for one reconciliation pass (or one event dispatch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// First-level run folders found on disk
    pub folders: usize,

    /// Folder records newly inserted
    pub folders_inserted: usize,

    /// Folder records removed because the folder is gone or nested
    pub stale_removed: usize,

    /// Duplicate folder records removed
    pub duplicates_removed: usize,

    pub runs: usize,
    pub cases: usize,
    pub steps: usize,
    pub attachments: usize,

    /// Report documents that are not test cases
    pub ignored_documents: usize,

    /// Unreadable documents plus failed store operations
    pub failures: usize,

    /// Time taken in milliseconds
    pub time_ms: u64,
}

impl PassStats {
    pub fn merge(&mut self, other: &Self) {
        self.folders += other.folders;
        self.folders_inserted += other.folders_inserted;
        self.stale_removed += other.stale_removed;
        self.duplicates_removed += other.duplicates_removed;
        self.runs += other.runs;
        self.cases += other.cases;
        self.steps += other.steps;
        self.attachments += other.attachments;
        self.ignored_documents += other.ignored_documents;
        self.failures += other.failures;
        self.time_ms += other.time_ms;
    }
}
