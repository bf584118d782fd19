use crate::error::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Report-tool outputs that live next to case documents but are never cases.
pub const CONTROL_FILE_NAMES: &[&str] = &[
    "serenity.configuration.json",
    "bootstrap-icons.json",
    "serenity-summary.json",
];

/// Finds report documents under a folder, recursively and in a stable order.
pub struct ReportScanner {
    root: PathBuf,
}

impl ReportScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Every `.json` file under the root, sorted by file name per directory.
    pub fn json_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    if Self::is_json(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => log::debug!("Failed to read entry under {}: {e}", self.root.display()),
            }
        }
        files
    }

    /// `.json` files that may hold a test case.
    pub fn case_documents(&self) -> Vec<PathBuf> {
        let files: Vec<PathBuf> = self
            .json_files()
            .into_iter()
            .filter(|path| !is_control_file(path))
            .collect();
        log::debug!(
            "Found {} candidate case documents under {}",
            files.len(),
            self.root.display()
        );
        files
    }

    fn is_json(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }
}

pub fn is_control_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            CONTROL_FILE_NAMES
                .iter()
                .any(|candidate| name.eq_ignore_ascii_case(candidate))
        })
}

pub fn read_json_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_json_recursively_and_skips_control_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("data");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.JSON"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("serenity-summary.json"), "{}").unwrap();
        std::fs::write(nested.join("c.json"), "{}").unwrap();

        let scanner = ReportScanner::new(dir.path());
        let names: Vec<String> = scanner
            .case_documents()
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, ["a.JSON", "b.json", "data/c.json"]);
        assert_eq!(scanner.json_files().len(), 4);
    }

    #[test]
    fn unreadable_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_json_file(&path).is_err());
        assert!(read_json_file(&dir.path().join("missing.json")).is_err());
    }
}
