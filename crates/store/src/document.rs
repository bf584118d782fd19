use crate::{Result, StoreError};
use serde::Serialize;
use serde_json::Value;

/// A stored document body.
pub type Document = serde_json::Map<String, Value>;

/// Surrogate row id. Only used to address a specific stored document (dedup,
/// stale removal); never used as a match criterion for upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(pub i64);

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocId,
    pub body: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(DocId),
    Matched(DocId),
}

impl UpsertOutcome {
    #[must_use]
    pub fn inserted(self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Every listed field equals the given value; `null` also matches a missing field.
    Eq(Document),
    /// A string field starts with `prefix`.
    PathPrefix { field: String, prefix: String },
}

impl Filter {
    pub fn path_prefix(field: &str, prefix: impl Into<String>) -> Self {
        Self::PathPrefix {
            field: field.to_string(),
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq(fields) => fields
                .iter()
                .all(|(name, expected)| doc.get(name).unwrap_or(&Value::Null) == expected),
            Self::PathPrefix { field, prefix } => doc
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|value| value.starts_with(prefix.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            unique: true,
        }
    }

    pub fn non_unique(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            unique: false,
        }
    }

    /// Values of the indexed fields; missing fields project to `null`.
    pub(crate) fn project(&self, doc: &Document) -> Vec<Value> {
        self.fields
            .iter()
            .map(|f| doc.get(f).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Turns a `json!({...})` object literal into a [`Document`]. Non-object values
/// yield an empty document.
#[must_use]
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Other(format!(
            "expected an object document, got {other}"
        ))),
    }
}

/// Body of a newly inserted document for an upsert miss.
pub(crate) fn compose_insert(key: &Document, set: &Document, set_on_insert: &Document) -> Document {
    let mut body = key.clone();
    for (k, v) in set_on_insert {
        body.insert(k.clone(), v.clone());
    }
    for (k, v) in set {
        body.insert(k.clone(), v.clone());
    }
    body
}

/// Applies `set` to an existing body. Returns `true` if anything changed.
pub(crate) fn apply_set(body: &mut Document, set: &Document) -> bool {
    let mut changed = false;
    for (k, v) in set {
        if body.get(k) != Some(v) {
            body.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_filter_treats_null_as_missing() {
        let filter = Filter::Eq(doc(json!({"name": "a", "path": null})));
        assert!(filter.matches(&doc(json!({"name": "a"}))));
        assert!(!filter.matches(&doc(json!({"name": "a", "path": "/x"}))));
    }

    #[test]
    fn prefix_filter_requires_string_field() {
        let filter = Filter::path_prefix("path", "/runs/");
        assert!(filter.matches(&doc(json!({"path": "/runs/r1"}))));
        assert!(!filter.matches(&doc(json!({"path": "/runs2/r1"}))));
        assert!(!filter.matches(&doc(json!({"path": 3}))));
    }

    #[test]
    fn insert_body_lets_set_override_on_insert_fields() {
        let body = compose_insert(
            &doc(json!({"runId": "r1"})),
            &doc(json!({"status": "new"})),
            &doc(json!({"status": "old", "createdAt": "t0"})),
        );
        assert_eq!(body, doc(json!({"runId": "r1", "status": "new", "createdAt": "t0"})));
    }
}
