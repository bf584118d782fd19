//! Categorized operational log. Every line goes to the `log` facade as
//! `[CATEGORY] message`; with a store attached it is also appended to the
//! audit collection.

use chrono::Utc;
use reportwatch_model::AUDIT_COLLECTION;
use reportwatch_store::{doc, DocumentStore};
use serde_json::json;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Config,
    Info,
    Event,
    Insert,
    Skip,
    Delete,
    Sync,
    Dedup,
    Summary,
    ErrorSummary,
    FailSummary,
    Refresh,
    Warn,
    Error,
    Fatal,
}

impl Category {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::Info => "INFO",
            Self::Event => "EVENT",
            Self::Insert => "INSERT",
            Self::Skip => "SKIP",
            Self::Delete => "DELETE",
            Self::Sync => "SYNC",
            Self::Dedup => "DEDUP",
            Self::Summary => "SUMMARY",
            Self::ErrorSummary => "ERROR-SUMMARY",
            Self::FailSummary => "FAIL-SUMMARY",
            Self::Refresh => "REFRESH",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    #[must_use]
    pub fn level(self) -> log::Level {
        match self {
            Self::Warn => log::Level::Warn,
            Self::Error | Self::Fatal => log::Level::Error,
            _ => log::Level::Info,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Default)]
pub struct AuditLog {
    sink: Option<Arc<dyn DocumentStore>>,
}

impl AuditLog {
    /// Log-facade only.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        Self { sink: Some(store) }
    }

    /// Never fails; a rejected audit write is reported through `log` only.
    pub fn record(&self, category: Category, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::log!(category.level(), "[{category}] {message}");

        let Some(store) = &self.sink else {
            return;
        };
        let entry = doc(json!({
            "level": category.as_str(),
            "message": message,
            "timestamp": Utc::now(),
        }));
        if let Err(e) = store.insert(AUDIT_COLLECTION, entry) {
            log::error!("[ERROR] Log to DB failed: {e}");
        }
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("store_sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportwatch_store::{Filter, MemoryStore};
    use serde_json::Value;

    #[test]
    fn entries_are_appended_to_the_audit_collection() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditLog::with_store(store.clone());
        audit.record(Category::Insert, "Added folder: r1");
        audit.record(Category::ErrorSummary, "Upsert for /runs");

        let entries = store.find(AUDIT_COLLECTION, &Filter::All).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].body["level"], Value::from("INSERT"));
        assert_eq!(entries[0].body["message"], Value::from("Added folder: r1"));
        assert!(entries[0].body["timestamp"].is_string());
        assert_eq!(entries[1].body["level"], Value::from("ERROR-SUMMARY"));
    }

    #[test]
    fn levels_follow_category_severity() {
        assert_eq!(Category::Warn.level(), log::Level::Warn);
        assert_eq!(Category::Fatal.level(), log::Level::Error);
        assert_eq!(Category::Dedup.level(), log::Level::Info);
    }
}
