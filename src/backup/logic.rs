// durabilitytool/src/backup/logic.rs
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::BackupManager;
use super::db_dump::{dump_table, list_user_tables};
use crate::codec::EncryptionKey;
use crate::codec::dump::DumpWriter;
use crate::codec::envelope::{FileSink, seal_file};
use crate::errors::Result;
use crate::store::Store;
use crate::task::{BackupKind, BackupTask, TaskGate};

/// A finished snapshot file.
struct Snapshot {
    path: PathBuf,
    size_bytes: u64,
    tables: Vec<String>,
}

impl<S: Store> BackupManager<S> {
    /// Snapshots every user table into one timestamped file.
    pub async fn create_full_backup(&self) -> Result<BackupTask> {
        self.run_backup(BackupKind::Full).await
    }

    /// Snapshots the tables changed since the last full backup, which is every table.
    /// Without a previous full backup this is a full backup.
    pub async fn create_incremental_backup(&self) -> Result<BackupTask> {
        if self.last_full_backup_at().is_none() {
            info!("ℹ️ No full backup recorded yet, running a full backup instead");
            return self.create_full_backup().await;
        }
        self.run_backup(BackupKind::Incremental).await
    }

    pub async fn run_backup(&self, kind: BackupKind) -> Result<BackupTask> {
        let task = self.new_task(kind);
        let _permit = self.gate.try_acquire(task.id())?;
        self.execute_backup(task).await
    }

    pub(crate) fn new_task(&self, kind: BackupKind) -> BackupTask {
        BackupTask::new(
            kind,
            self.config.compression,
            self.encryption_key.is_some(),
        )
    }

    /// Runs a backup task. The caller must hold the task gate.
    pub(crate) async fn execute_backup(&self, mut task: BackupTask) -> Result<BackupTask> {
        task.start()?;
        self.record_task(&task);
        self.persist_history();
        info!("🚀 Starting {} backup {}", task.kind(), task.id());

        let base = match task.kind() {
            BackupKind::Full => None,
            BackupKind::Incremental => self.last_full_backup_at(),
        };

        let outcome = self.write_snapshot(&task, base).await;
        let result = match outcome {
            Ok(snapshot) => {
                task.complete(snapshot.path.clone(), snapshot.size_bytes, snapshot.tables)?;
                info!(
                    "✅ {} backup {} written to {} ({} bytes)",
                    task.kind(),
                    task.id(),
                    snapshot.path.display(),
                    snapshot.size_bytes
                );
                Ok(task.clone())
            }
            Err(e) => {
                error!("❌ Backup {} failed: {}", task.id(), e);
                task.fail(e.to_string())?;
                Err(e)
            }
        };

        self.record_task(&task);
        self.persist_history();
        result
    }

    fn snapshot_path(&self, task: &BackupTask) -> PathBuf {
        let stamp = task.created_at().format("%Y-%m-%d_%H-%M-%S");
        let id = task.id();
        let suffix = &id[id.len().saturating_sub(8)..];
        let mut name = format!("backup_{}_{}_{}.sql", task.kind(), stamp, suffix);
        if self.config.compression {
            name.push_str(".gz");
        }
        if self.encryption_key.is_some() {
            name.push_str(".enc");
        }
        self.config.backup_dir.join(name)
    }

    async fn write_snapshot(
        &self,
        task: &BackupTask,
        base: Option<DateTime<Utc>>,
    ) -> Result<Snapshot> {
        fs::create_dir_all(&self.config.backup_dir)?;
        let path = self.snapshot_path(task);

        let result = self.dump_into(&path, task, base).await;
        if result.is_err() && path.exists() {
            warn!("⚠️ Partial backup file left at {}", path.display());
        }
        result
    }

    async fn dump_into(
        &self,
        path: &Path,
        task: &BackupTask,
        base: Option<DateTime<Utc>>,
    ) -> Result<Snapshot> {
        let sink = FileSink::create(path, self.config.compression_level())?;
        let mut writer = DumpWriter::new(sink);

        let mut header = vec![
            ("Kind", task.kind().to_string()),
            ("Task", task.id().to_string()),
            ("Created", task.created_at().to_rfc3339()),
        ];
        if let Some(base) = base {
            header.push(("Base full backup", base.to_rfc3339()));
        }
        writer.write_header(&header)?;

        let store = self.store.as_ref();
        let tables = list_user_tables(store).await?;
        let mut total_rows = 0;
        for schema in &tables {
            total_rows += dump_table(store, &mut writer, schema, self.config.batch_size).await?;
        }
        info!(
            "📦 Dumped {} tables, {} rows, {} statements",
            tables.len(),
            total_rows,
            writer.statements_written()
        );

        let mut size_bytes = writer.into_inner()?.finish()?;
        if let Some(key) = &self.encryption_key {
            size_bytes = seal_file(path, key)?;
        }

        Ok(Snapshot {
            path: path.to_path_buf(),
            size_bytes,
            tables: tables.into_iter().map(|t| t.name).collect(),
        })
    }

    pub(crate) fn store(&self) -> &S {
        self.store.as_ref()
    }

    pub(crate) fn encryption_key(&self) -> Option<&EncryptionKey> {
        self.encryption_key.as_ref()
    }

    pub(crate) fn gate(&self) -> &TaskGate {
        &self.gate
    }
}
