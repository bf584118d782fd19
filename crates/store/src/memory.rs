use crate::document::{apply_set, compose_insert};
use crate::{
    DocId, Document, DocumentStore, Filter, IndexSpec, Result, StoreError, StoredDocument,
    UpsertOutcome,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Process-local store. Mirrors the matching and index rules of
/// [`crate::SqliteStore`]; used by tests and embedders without a database file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    collections: HashMap<String, Vec<StoredDocument>>,
    indexes: HashMap<String, Vec<IndexSpec>>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> DocId {
        self.next_id += 1;
        DocId(self.next_id)
    }

    fn check_unique(&self, collection: &str, candidate: &Document) -> Result<()> {
        let Some(indexes) = self.indexes.get(collection) else {
            return Ok(());
        };
        let docs = self.collections.get(collection);
        for index in indexes.iter().filter(|i| i.unique) {
            let projected = index.project(candidate);
            let clash = docs
                .into_iter()
                .flatten()
                .any(|existing| index.project(&existing.body) == projected);
            if clash {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    detail: format!("{:?} = {:?}", index.fields, projected),
                });
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl DocumentStore for MemoryStore {
    fn upsert(
        &self,
        collection: &str,
        key: &Document,
        set: &Document,
        set_on_insert: &Document,
    ) -> Result<UpsertOutcome> {
        let mut state = self.lock()?;
        let filter = Filter::Eq(key.clone());
        if let Some(existing) = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| filter.matches(&d.body)))
        {
            apply_set(&mut existing.body, set);
            return Ok(UpsertOutcome::Matched(existing.id));
        }

        let body = compose_insert(key, set, set_on_insert);
        state.check_unique(collection, &body)?;
        let id = state.allocate_id();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredDocument { id, body });
        Ok(UpsertOutcome::Inserted(id))
    }

    fn insert(&self, collection: &str, doc: Document) -> Result<DocId> {
        let mut state = self.lock()?;
        state.check_unique(collection, &doc)?;
        let id = state.allocate_id();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredDocument { id, body: doc });
        Ok(id)
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<StoredDocument>> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(&d.body))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut state = self.lock()?;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(&d.body));
        Ok((before - docs.len()) as u64)
    }

    fn delete_by_id(&self, collection: &str, id: DocId) -> Result<bool> {
        let mut state = self.lock()?;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() != before)
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .indexes
            .get(collection)
            .and_then(|all| all.iter().find(|i| i.fields == index.fields))
        {
            if existing.unique != index.unique {
                return Err(StoreError::IndexError {
                    collection: collection.to_string(),
                    detail: format!(
                        "index on {:?} already exists with different options",
                        index.fields
                    ),
                });
            }
            return Ok(());
        }

        if index.unique {
            let mut seen = HashSet::new();
            for doc in state.collections.get(collection).into_iter().flatten() {
                let key = serde_json::to_string(&index.project(&doc.body))?;
                if !seen.insert(key) {
                    return Err(StoreError::IndexError {
                        collection: collection.to_string(),
                        detail: format!("duplicate values for unique index {:?}", index.fields),
                    });
                }
            }
        }

        state
            .indexes
            .entry(collection.to_string())
            .or_default()
            .push(index.clone());
        Ok(())
    }
}
