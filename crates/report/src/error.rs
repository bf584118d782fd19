use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A report document that could not be read or parsed. Siblings are unaffected.
#[derive(Debug)]
pub struct DocumentFailure {
    pub path: PathBuf,
    pub error: ReportError,
}
