//! Data durability for the blog store: snapshots, restores, archiving of aged rows, and the
//! schedules that drive them.

pub mod archive;
pub mod backup;
pub mod codec;
pub mod config;
pub mod errors;
pub mod logging;
pub mod restore;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use archive::{ArchiveManager, ArchiveRestoreReport, ArchiveStats};
pub use backup::{BackupManager, BackupStats};
pub use config::AppConfig;
pub use errors::{DurabilityError, Result};
pub use restore::{RestoreOptions, RestoreReport, ValidationReport};
pub use scheduler::Scheduler;
pub use store::{SqliteStore, Store};
pub use task::{ArchiveTask, BackupKind, BackupTask, TaskGate, TaskStatus};
