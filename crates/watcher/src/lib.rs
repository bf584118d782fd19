//! # Reportwatch Watcher
//!
//! Keeps the document store in sync with test-report folders.
//!
//! ## Pipeline
//!
//! ```text
//! Target root
//!     │
//!     ├──> Watch Driver (notify + periodic timer)
//!     │      └─> Created / Removed first-level folders
//!     │
//!     ├──> Reconciler
//!     │      ├─> folder records (sync, dedup)
//!     │      └─> runs, cases, steps, attachments
//!     │
//!     └──> Aggregator
//!            └─> summary, error and fail tables
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use reportwatch_store::open_store;
//! use reportwatch_watcher::{
//!     AuditLog, Reconciler, TargetDescriptor, TargetRegistry, WatchDriver, WatchDriverConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = open_store(".reportwatch", "reportwatch")?;
//!     let audit = AuditLog::with_store(store.clone());
//!     let descriptors = [TargetDescriptor::single("/reports", "web")];
//!     let registry = TargetRegistry::resolve(&descriptors, &audit)?;
//!
//!     let driver = WatchDriver::new(
//!         Arc::new(registry),
//!         Reconciler::new(store, audit),
//!         WatchDriverConfig::default(),
//!     );
//!     driver.startup().await?;
//!     driver.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

mod audit;
mod driver;
mod error;
mod reconciler;
mod stats;
mod targets;

pub use audit::{AuditLog, Category};
pub use driver::{classify_event, FsChange, WatchDriver, WatchDriverConfig};
pub use error::{Result, WatchError};
pub use reconciler::Reconciler;
pub use stats::PassStats;
pub use targets::{Target, TargetCollections, TargetDescriptor, TargetRegistry};
