//! Event loop: filesystem notifications, the periodic reconciliation timer and
//! shutdown share one sequential `select!` loop. Reconciler work runs on the
//! blocking pool, one target at a time.

use crate::audit::Category;
use crate::reconciler::Reconciler;
use crate::stats::PassStats;
use crate::targets::TargetRegistry;
use crate::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct WatchDriverConfig {
    pub recursive: bool,
    pub sync_interval: Duration,
    pub debounce: Duration,
    pub max_batch_wait: Duration,
    pub notify_poll_interval: Duration,
}

impl Default for WatchDriverConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            sync_interval: Duration::from_secs(30),
            debounce: Duration::from_millis(250),
            max_batch_wait: Duration::from_secs(3),
            notify_poll_interval: Duration::from_secs(2),
        }
    }
}

/// A directory-level change worth dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    Created(PathBuf),
    Removed(PathBuf),
}

impl FsChange {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Removed(path) => path,
        }
    }
}

/// Maps a raw notification to creates and removes. A rename is a remove of the
/// old path followed by a create of the new one.
#[must_use]
pub fn classify_event(event: &Event) -> Vec<FsChange> {
    let created = |paths: &[PathBuf]| -> Vec<FsChange> {
        paths.iter().cloned().map(FsChange::Created).collect()
    };
    let removed = |paths: &[PathBuf]| -> Vec<FsChange> {
        paths.iter().cloned().map(FsChange::Removed).collect()
    };

    match &event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => Vec::new(),
        EventKind::Create(_) => created(&event.paths),
        EventKind::Remove(_) => removed(&event.paths),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => removed(&event.paths),
            RenameMode::To => created(&event.paths),
            RenameMode::Both => match event.paths.as_slice() {
                [from, to] => vec![
                    FsChange::Removed(from.clone()),
                    FsChange::Created(to.clone()),
                ],
                _ => Vec::new(),
            },
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .map(|path| {
                    if path.exists() {
                        FsChange::Created(path.clone())
                    } else {
                        FsChange::Removed(path.clone())
                    }
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// Coalesces changes until the debounce window closes (bounded by
/// `max_batch`). Order between distinct changes is preserved.
struct DebounceState {
    debounce: Duration,
    max_batch: Duration,
    pending: Vec<FsChange>,
    first_event: Option<Instant>,
    last_event: Option<Instant>,
}

impl DebounceState {
    fn new(debounce: Duration, max_batch: Duration) -> Self {
        Self {
            debounce,
            max_batch,
            pending: Vec::new(),
            first_event: None,
            last_event: None,
        }
    }

    /// Returns `false` when the change repeats the latest pending change for
    /// the same path.
    fn record(&mut self, change: FsChange) -> bool {
        let latest_for_path = self.pending.iter().rev().find(|c| c.path() == change.path());
        if latest_for_path == Some(&change) {
            return false;
        }
        let now = Instant::now();
        self.pending.push(change);
        self.last_event = Some(now);
        self.first_event.get_or_insert(now);
        true
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        let quiet = self.last_event.map(|last| last + self.debounce);
        let forced = self.first_event.map(|first| first + self.max_batch);
        match (quiet, forced) {
            (Some(q), Some(f)) => Some(q.min(f)),
            (q, f) => q.or(f),
        }
    }

    fn take(&mut self) -> Vec<FsChange> {
        self.first_event = None;
        self.last_event = None;
        std::mem::take(&mut self.pending)
    }
}

pub struct WatchDriver {
    registry: Arc<TargetRegistry>,
    reconciler: Reconciler,
    config: WatchDriverConfig,
}

impl WatchDriver {
    pub fn new(
        registry: Arc<TargetRegistry>,
        reconciler: Reconciler,
        config: WatchDriverConfig,
    ) -> Self {
        Self {
            registry,
            reconciler,
            config,
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Per target: dedup, indexes, then a full reconciliation pass.
    pub async fn startup(&self) -> Result<PassStats> {
        let mut total = PassStats::default();
        for target in self.registry.iter() {
            let reconciler = self.reconciler.clone();
            let target = target.clone();
            let stats = tokio::task::spawn_blocking(move || {
                let removed = reconciler.prepare(&target);
                let mut stats = reconciler.full_pass(&target);
                stats.duplicates_removed += removed;
                reconciler.audit().record(
                    Category::Info,
                    format!(
                        "Initial pass for {}: {} folders, {} cases",
                        target.root().display(),
                        stats.folders,
                        stats.cases
                    ),
                );
                stats
            })
            .await?;
            total.merge(&stats);
        }
        Ok(total)
    }

    /// Startup pass only; no subscription is made.
    pub async fn run_refresh_only(&self) -> Result<PassStats> {
        self.startup().await
    }

    /// Full reconciliation of every target, sequentially.
    pub async fn full_pass(&self) -> Result<PassStats> {
        let mut total = PassStats::default();
        for target in self.registry.iter() {
            let reconciler = self.reconciler.clone();
            let target = target.clone();
            let stats = tokio::task::spawn_blocking(move || reconciler.full_pass(&target)).await?;
            total.merge(&stats);
        }
        Ok(total)
    }

    /// Applies changes in order. Paths that are not first-level children of a
    /// target are ignored.
    pub async fn dispatch(&self, changes: Vec<FsChange>) -> Result<PassStats> {
        let mut total = PassStats::default();
        for change in changes {
            let Some(target) = self.registry.owner_of(change.path()) else {
                continue;
            };
            let reconciler = self.reconciler.clone();
            let target = target.clone();
            let stats = tokio::task::spawn_blocking(move || match change {
                FsChange::Created(path) => {
                    if !path.is_dir() {
                        return PassStats::default();
                    }
                    reconciler.audit().record(
                        Category::Event,
                        format!("New folder detected: {}", path.display()),
                    );
                    reconciler.folder_created(&target, &path)
                }
                FsChange::Removed(path) => reconciler.folder_removed(&target, &path),
            })
            .await?;
            total.merge(&stats);
        }
        Ok(total)
    }

    /// Watches every target until `shutdown` resolves. A pass already running
    /// when shutdown is requested completes first.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (event_tx, mut event_rx) = mpsc::channel(1024);
        let watcher = self.create_fs_watcher(event_tx)?;

        let mut state = DebounceState::new(self.config.debounce, self.config.max_batch_wait);
        let mut ticker = time::interval(self.config.sync_interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        tokio::pin!(shutdown);

        loop {
            let next_deadline = state.next_deadline();

            tokio::select! {
                () = &mut shutdown => break,
                Some(event) = event_rx.recv() => self.handle_event(event, &mut state),
                _ = ticker.tick() => {
                    match self.full_pass().await {
                        Ok(stats) => log::debug!("Periodic pass: {stats:?}"),
                        Err(e) => self
                            .reconciler
                            .audit()
                            .record(Category::Error, format!("Periodic pass failed: {e}")),
                    }
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if next_deadline.is_some() => {
                    let changes = state.take();
                    log::debug!("Dispatching {} filesystem changes", changes.len());
                    if let Err(e) = self.dispatch(changes).await {
                        self.reconciler
                            .audit()
                            .record(Category::Error, format!("Event dispatch failed: {e}"));
                    }
                }
            }
        }

        drop(watcher);
        log::info!("Watch loop stopped");
        Ok(())
    }

    fn handle_event(&self, event: notify::Result<Event>, state: &mut DebounceState) {
        match event {
            Ok(event) => {
                for change in classify_event(&event) {
                    if self.registry.owner_of(change.path()).is_some() && state.record(change) {
                        log::trace!("{} pending filesystem changes", state.pending());
                    }
                }
            }
            Err(err) => log::warn!("Watcher error: {err}"),
        }
    }

    fn create_fs_watcher(
        &self,
        sender: mpsc::Sender<notify::Result<Event>>,
    ) -> Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = sender.blocking_send(res);
            },
            NotifyConfig::default().with_poll_interval(self.config.notify_poll_interval),
        )?;
        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for target in self.registry.iter() {
            if let Err(err) = watcher.watch(target.root(), mode) {
                self.reconciler.audit().record(
                    Category::Warn,
                    format!("Failed to watch {}: {err}", target.root().display()),
                );
            }
        }
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rename(mode: RenameMode, paths: &[&str]) -> Event {
        paths.iter().fold(
            Event::new(EventKind::Modify(ModifyKind::Name(mode))),
            |event, path| event.add_path(PathBuf::from(path)),
        )
    }

    #[test]
    fn rename_both_is_remove_then_create() {
        let event = rename(RenameMode::Both, &["/runs/a", "/elsewhere/a"]);
        assert_eq!(
            classify_event(&event),
            vec![
                FsChange::Removed(PathBuf::from("/runs/a")),
                FsChange::Created(PathBuf::from("/elsewhere/a")),
            ]
        );
    }

    #[test]
    fn split_renames_map_to_one_side() {
        assert_eq!(
            classify_event(&rename(RenameMode::From, &["/runs/a"])),
            vec![FsChange::Removed(PathBuf::from("/runs/a"))]
        );
        assert_eq!(
            classify_event(&rename(RenameMode::To, &["/runs/b"])),
            vec![FsChange::Created(PathBuf::from("/runs/b"))]
        );
    }

    #[test]
    fn file_level_and_content_events_are_dropped() {
        let file_create =
            Event::new(EventKind::Create(CreateKind::File)).add_path("/runs/a.json".into());
        let folder_create =
            Event::new(EventKind::Create(CreateKind::Folder)).add_path("/runs/r1".into());
        let write = Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/runs/r1".into());
        assert!(classify_event(&file_create).is_empty());
        assert!(classify_event(&write).is_empty());
        assert_eq!(
            classify_event(&folder_create),
            vec![FsChange::Created(PathBuf::from("/runs/r1"))]
        );
    }

    #[test]
    fn debounce_collapses_repeats_and_keeps_order() {
        let mut state = DebounceState::new(Duration::from_millis(100), Duration::from_secs(1));
        assert!(state.next_deadline().is_none());
        assert!(state.record(FsChange::Created("/runs/a".into())));
        assert!(!state.record(FsChange::Created("/runs/a".into())));
        assert!(state.record(FsChange::Removed("/runs/b".into())));
        assert!(state.record(FsChange::Removed("/runs/a".into())));
        assert!(state.record(FsChange::Created("/runs/a".into())));
        assert!(state.next_deadline().is_some());

        let changes = state.take();
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[1], FsChange::Removed("/runs/b".into()));
        assert!(state.next_deadline().is_none());
    }

    #[test]
    fn deadline_is_bounded_by_max_batch() {
        let mut state = DebounceState::new(Duration::from_secs(10), Duration::from_millis(50));
        state.record(FsChange::Created("/runs/a".into()));
        let deadline = state.next_deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_millis(50));
    }
}
