//! SQLite-backed document store.
//!
//! Every collection lives in one `documents` table; bodies are JSON text and
//! key matching goes through `json_extract`. Unique indexes are partial
//! expression indexes scoped to one collection.

use crate::document::{apply_set, compose_insert};
use crate::{
    DocId, Document, DocumentStore, Filter, IndexSpec, Result, StoreError, StoredDocument,
    UpsertOutcome,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 collection TEXT NOT NULL,
                 body TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS documents_by_collection ON documents(collection, id);",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl DocumentStore for SqliteStore {
    fn upsert(
        &self,
        collection: &str,
        key: &Document,
        set: &Document,
        set_on_insert: &Document,
    ) -> Result<UpsertOutcome> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut values = vec![SqlValue::Text(collection.to_string())];
        let clause = filter_clause(&Filter::Eq(key.clone()), &mut values)?;
        let sql = format!(
            "SELECT id, body FROM documents WHERE collection = ?1 AND {clause} ORDER BY id LIMIT 1"
        );
        let existing: Option<(i64, String)> = tx
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        let outcome = match existing {
            Some((id, raw)) => {
                let mut body = parse_body(&raw)?;
                if apply_set(&mut body, set) {
                    tx.execute(
                        "UPDATE documents SET body = ?1 WHERE id = ?2",
                        params![serde_json::to_string(&body)?, id],
                    )
                    .map_err(|e| constraint_to_duplicate(e, collection))?;
                }
                UpsertOutcome::Matched(DocId(id))
            }
            None => {
                let body = compose_insert(key, set, set_on_insert);
                tx.execute(
                    "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
                    params![collection, serde_json::to_string(&body)?],
                )
                .map_err(|e| constraint_to_duplicate(e, collection))?;
                UpsertOutcome::Inserted(DocId(tx.last_insert_rowid()))
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn insert(&self, collection: &str, doc: Document) -> Result<DocId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
            params![collection, serde_json::to_string(&doc)?],
        )
        .map_err(|e| constraint_to_duplicate(e, collection))?;
        Ok(DocId(conn.last_insert_rowid()))
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<StoredDocument>> {
        let conn = self.lock()?;
        let mut values = vec![SqlValue::Text(collection.to_string())];
        let clause = filter_clause(filter, &mut values)?;
        let sql =
            format!("SELECT id, body FROM documents WHERE collection = ?1 AND {clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            out.push(StoredDocument {
                id: DocId(id),
                body: parse_body(&raw)?,
            });
        }
        Ok(out)
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let conn = self.lock()?;
        let mut values = vec![SqlValue::Text(collection.to_string())];
        let clause = filter_clause(filter, &mut values)?;
        let sql = format!("DELETE FROM documents WHERE collection = ?1 AND {clause}");
        let removed = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(removed as u64)
    }

    fn delete_by_id(&self, collection: &str, id: DocId) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id.0],
        )?;
        Ok(removed > 0)
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        if index.fields.is_empty() {
            return Err(StoreError::IndexError {
                collection: collection.to_string(),
                detail: "index needs at least one field".to_string(),
            });
        }
        let mut exprs = Vec::with_capacity(index.fields.len());
        for field in &index.fields {
            exprs.push(json_field(field)?);
        }

        let name = format!(
            "ix_{}_{}{}",
            sanitize_ident(collection),
            index.fields.join("_"),
            if index.unique { "_u" } else { "" }
        );
        let sql = format!(
            "CREATE {unique}INDEX IF NOT EXISTS \"{name}\" ON documents({exprs}) WHERE collection = '{collection}'",
            unique = if index.unique { "UNIQUE " } else { "" },
            exprs = exprs.join(", "),
            collection = collection.replace('\'', "''"),
        );

        let conn = self.lock()?;
        conn.execute_batch(&sql).map_err(|e| StoreError::IndexError {
            collection: collection.to_string(),
            detail: e.to_string(),
        })
    }
}

fn parse_body(raw: &str) -> Result<Document> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Other(format!(
            "stored body is not an object: {other}"
        ))),
    }
}

fn constraint_to_duplicate(err: rusqlite::Error, collection: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, detail) = &err {
        if code.code == ErrorCode::ConstraintViolation {
            return StoreError::DuplicateKey {
                collection: collection.to_string(),
                detail: detail.clone().unwrap_or_else(|| code.to_string()),
            };
        }
    }
    StoreError::Sqlite(err)
}

fn json_field(field: &str) -> Result<String> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidField(field.to_string()));
    }
    Ok(format!("json_extract(body, '$.{field}')"))
}

fn sanitize_ident(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Renders `filter` as a SQL condition, appending bound values to `values`.
/// Placeholders are numbered after whatever `values` already holds.
fn filter_clause(filter: &Filter, values: &mut Vec<SqlValue>) -> Result<String> {
    match filter {
        Filter::All => Ok("1 = 1".to_string()),
        Filter::Eq(fields) => {
            if fields.is_empty() {
                return Ok("1 = 1".to_string());
            }
            let mut parts = Vec::with_capacity(fields.len());
            for (name, expected) in fields {
                let expr = json_field(name)?;
                match json_to_sql(expected)? {
                    None => parts.push(format!("{expr} IS NULL")),
                    Some(value) => {
                        values.push(value);
                        parts.push(format!("{expr} = ?{}", values.len()));
                    }
                }
            }
            Ok(parts.join(" AND "))
        }
        Filter::PathPrefix { field, prefix } => {
            let expr = json_field(field)?;
            values.push(SqlValue::Text(prefix.clone()));
            let n = values.len();
            Ok(format!("substr({expr}, 1, length(?{n})) = ?{n}"))
        }
    }
}

/// How `json_extract` reports a JSON value, so equality can be pushed into SQL.
fn json_to_sql(value: &Value) -> Result<Option<SqlValue>> {
    Ok(match value {
        Value::Null => None,
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Some(SqlValue::Text(serde_json::to_string(value)?)),
    })
}
