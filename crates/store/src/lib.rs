//! # Reportwatch Store
//!
//! Document-store interface used by the reconciler, plus two backends:
//! [`MemoryStore`] and [`SqliteStore`].
//!
//! All writes the reconciler issues are keyed by natural identity tuples, so
//! replaying any of them is harmless:
//!
//! ```no_run
//! use reportwatch_store::{doc, open_store, DocumentStore};
//! use serde_json::json;
//!
//! fn main() -> reportwatch_store::Result<()> {
//!     let store = open_store(".reportwatch", "reportwatch")?;
//!     store.upsert(
//!         "test-runs",
//!         &doc(json!({"runId": "2024-05-01"})),
//!         &doc(json!({"project": "web"})),
//!         &doc(json!({"createdAt": "2024-05-01T10:00:00Z"})),
//!     )?;
//!     Ok(())
//! }
//! ```

mod document;
mod error;
mod memory;
mod sqlite;

pub use document::{
    doc, to_document, DocId, Document, Filter, IndexSpec, StoredDocument, UpsertOutcome,
};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;
use std::sync::Arc;

pub const IN_MEMORY_URI: &str = ":memory:";
const SQLITE_SCHEME: &str = "sqlite://";

pub trait DocumentStore: Send + Sync {
    /// Updates the first document matching every `key` field with `set`; if none
    /// matches, inserts `key ∪ set_on_insert ∪ set`.
    fn upsert(
        &self,
        collection: &str,
        key: &Document,
        set: &Document,
        set_on_insert: &Document,
    ) -> Result<UpsertOutcome>;

    /// Inserts `doc` unless a document with the same `key` already exists.
    /// An existing document is left untouched.
    fn insert_if_absent(
        &self,
        collection: &str,
        key: &Document,
        doc: &Document,
    ) -> Result<UpsertOutcome> {
        self.upsert(collection, key, &Document::new(), doc)
    }

    /// Unconditional append.
    fn insert(&self, collection: &str, doc: Document) -> Result<DocId>;

    /// Matching documents in insertion order.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<StoredDocument>>;

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64>;

    fn delete_by_id(&self, collection: &str, id: DocId) -> Result<bool>;

    /// Creating an index that already exists is a no-op. A unique index fails
    /// when stored documents already violate it.
    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()>;
}

/// Resolves the database file for `uri` and `database`: `uri` names a
/// directory (optionally `sqlite://`-prefixed) holding `<database>.sqlite3`.
#[must_use]
pub fn database_file(uri: &str, database: &str) -> PathBuf {
    let dir = uri.strip_prefix(SQLITE_SCHEME).unwrap_or(uri);
    PathBuf::from(dir).join(format!("{database}.sqlite3"))
}

pub fn open_store(uri: &str, database: &str) -> Result<Arc<dyn DocumentStore>> {
    let uri = uri.trim();
    if uri == IN_MEMORY_URI {
        log::debug!("Opening in-memory document store");
        return Ok(Arc::new(SqliteStore::open_in_memory()?));
    }
    let path = database_file(uri, database);
    log::debug!("Opening document store at {}", path.display());
    Ok(Arc::new(SqliteStore::open(path)?))
}
