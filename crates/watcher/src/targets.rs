use crate::audit::{AuditLog, Category};
use crate::{Result, WatchError};
use reportwatch_model::{ERROR_SUFFIX, FAIL_SUFFIX, SUMMARY_SUFFIX};
use serde::Deserialize;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// One entry of the `targets` configuration list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TargetDescriptor {
    pub watch_path: Option<String>,
    pub collection: Option<String>,
    pub summary_collection: Option<String>,
    pub error_collection: Option<String>,
    pub fail_collection: Option<String>,
    pub key: Option<String>,
}

impl TargetDescriptor {
    /// The single `watch_path` + `collection` form.
    pub fn single(watch_path: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            watch_path: Some(watch_path.into()),
            collection: Some(collection.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCollections {
    pub folders: String,
    pub summary: String,
    pub errors: String,
    pub failures: String,
}

impl TargetCollections {
    fn from_descriptor(collection: &str, descriptor: &TargetDescriptor) -> Self {
        let or_suffixed = |explicit: &Option<String>, suffix: &str| {
            explicit
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("{collection}{suffix}"))
        };
        Self {
            folders: collection.to_string(),
            summary: or_suffixed(&descriptor.summary_collection, SUMMARY_SUFFIX),
            errors: or_suffixed(&descriptor.error_collection, ERROR_SUFFIX),
            failures: or_suffixed(&descriptor.fail_collection, FAIL_SUFFIX),
        }
    }
}

/// A watched root with its logical key and storage destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    root: PathBuf,
    key: String,
    collections: TargetCollections,
}

impl Target {
    /// Builds a target without touching the filesystem. `root` is used as given.
    pub fn new(root: impl Into<PathBuf>, descriptor: &TargetDescriptor) -> Option<Self> {
        let collection = descriptor.collection.as_deref().filter(|c| !c.is_empty())?;
        let key = descriptor
            .key
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| collection.to_string());
        Some(Self {
            root: root.into(),
            key,
            collections: TargetCollections::from_descriptor(collection, descriptor),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root as stored in `path` fields.
    pub fn root_path(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    /// Prefix shared by the stored paths of this target's run folders. Sibling
    /// roots such as `/runs-old` next to `/runs` never match.
    pub fn child_prefix(&self) -> String {
        let mut prefix = self.root_path();
        if !prefix.ends_with(MAIN_SEPARATOR) {
            prefix.push(MAIN_SEPARATOR);
        }
        prefix
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn collections(&self) -> &TargetCollections {
        &self.collections
    }

    /// Whether `path` is a direct child of the root.
    pub fn is_first_level(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
    }
}

/// Targets resolved once at startup; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// Keeps descriptors with a path and a collection whose path is an existing
    /// directory. Roots are canonicalised. Fails when nothing usable remains.
    pub fn resolve(descriptors: &[TargetDescriptor], audit: &AuditLog) -> Result<Self> {
        let mut targets = Vec::new();
        for descriptor in descriptors {
            let Some(raw_path) = descriptor.watch_path.as_deref().filter(|p| !p.is_empty()) else {
                continue;
            };
            if !descriptor.collection.as_deref().is_some_and(|c| !c.is_empty()) {
                continue;
            }
            let path = Path::new(raw_path);
            if !path.is_dir() {
                audit.record(
                    Category::Warn,
                    format!("Watch path not found: {raw_path} (skipped)"),
                );
                continue;
            }
            let root = match path.canonicalize() {
                Ok(root) => root,
                Err(e) => {
                    audit.record(
                        Category::Warn,
                        format!("Watch path not usable: {raw_path} ({e}) (skipped)"),
                    );
                    continue;
                }
            };
            if let Some(target) = Target::new(root, descriptor) {
                audit.record(
                    Category::Info,
                    format!("===== Watching folder: {} =====", target.root().display()),
                );
                targets.push(target);
            }
        }

        if targets.is_empty() {
            return Err(WatchError::NoTargets);
        }
        Ok(Self { targets })
    }

    pub fn from_targets(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Target whose root is the parent of `path`.
    pub fn owner_of(&self, path: &Path) -> Option<&Target> {
        self.targets.iter().find(|t| t.is_first_level(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn collections_default_from_collection_name() {
        let target = Target::new("/runs", &TargetDescriptor::single("/runs", "web")).unwrap();
        assert_eq!(target.key(), "web");
        assert_eq!(
            target.collections(),
            &TargetCollections {
                folders: "web".into(),
                summary: "web-summary".into(),
                errors: "web-error".into(),
                failures: "web-fail".into(),
            }
        );
    }

    #[test]
    fn explicit_collections_and_key_win() {
        let descriptor = TargetDescriptor {
            watch_path: Some("/runs".into()),
            collection: Some("web".into()),
            summary_collection: Some("totals".into()),
            fail_collection: Some("fails".into()),
            key: Some("frontend".into()),
            ..TargetDescriptor::default()
        };
        let target = Target::new("/runs", &descriptor).unwrap();
        assert_eq!(target.key(), "frontend");
        assert_eq!(target.collections().summary, "totals");
        assert_eq!(target.collections().errors, "web-error");
        assert_eq!(target.collections().failures, "fails");
    }

    #[test]
    fn resolve_drops_incomplete_and_missing_targets() {
        let dir = tempdir().unwrap();
        let existing = dir.path().to_string_lossy().into_owned();
        let descriptors = vec![
            TargetDescriptor::single(dir.path().join("missing").to_string_lossy(), "a"),
            TargetDescriptor {
                watch_path: Some(existing.clone()),
                ..TargetDescriptor::default()
            },
            TargetDescriptor::single(existing, "b"),
        ];

        let registry = TargetRegistry::resolve(&descriptors, &AuditLog::disabled()).unwrap();
        assert_eq!(registry.len(), 1);
        let target = registry.iter().next().unwrap();
        assert_eq!(target.collections().folders, "b");
        assert_eq!(target.root(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn resolve_without_usable_targets_fails() {
        let result = TargetRegistry::resolve(
            &[TargetDescriptor::single("/definitely/not/here", "x")],
            &AuditLog::disabled(),
        );
        assert!(matches!(result, Err(WatchError::NoTargets)));
    }

    #[test]
    fn first_level_matching_is_exact() {
        let target = Target::new("/runs", &TargetDescriptor::single("/runs", "web")).unwrap();
        assert!(target.is_first_level(Path::new("/runs/r1")));
        assert!(!target.is_first_level(Path::new("/runs/r1/nested")));
        assert!(!target.is_first_level(Path::new("/runs-old/r1")));
        assert_eq!(target.child_prefix(), format!("/runs{MAIN_SEPARATOR}"));
    }
}
