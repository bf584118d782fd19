use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Duplicate key in {collection}: {detail}")]
    DuplicateKey { collection: String, detail: String },

    #[error("Index error on {collection}: {detail}")]
    IndexError { collection: String, detail: String },

    #[error("Invalid field name: {0}")]
    InvalidField(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("{0}")]
    Other(String),
}
