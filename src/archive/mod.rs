// durabilitytool/src/archive/mod.rs
pub mod export;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::backup::db_dump::{RowPager, describe_table};
use crate::codec::{Statement, StatementBuilder, quote_ident};
use crate::config::{ArchiveConfig, ArchiveTableConfig};
use crate::errors::{DurabilityError, Result};
use crate::store::Store;
use crate::task::history::{load_history, save_history};
use crate::task::{ArchiveTask, TaskGate, TaskStatus};
use crate::utils::{ensure_identifier, format_store_datetime, resolve_in_dir};
use export::{ArchiveFile, parse_archive_file_name, read_archive_file, write_archive_file};

pub const HISTORY_FILE_NAME: &str = "archive_history.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ArchiveHistory {
    #[serde(default)]
    tasks: Vec<ArchiveTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveStats {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_records_archived: u64,
    pub records_by_table: BTreeMap<String, u64>,
    pub archive_files: usize,
    pub archive_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveRestoreReport {
    pub file: PathBuf,
    pub table: String,
    pub records_restored: u64,
}

/// Moves aged rows out of the live store into archive files, and back.
pub struct ArchiveManager<S: Store> {
    store: Arc<S>,
    config: ArchiveConfig,
    gate: TaskGate,
    history: Mutex<ArchiveHistory>,
    history_path: PathBuf,
}

impl<S: Store> ArchiveManager<S> {
    pub fn new(store: Arc<S>, config: ArchiveConfig, gate: TaskGate) -> Result<Self> {
        fs::create_dir_all(&config.archive_dir)?;
        let history_path = config.archive_dir.join(HISTORY_FILE_NAME);
        let mut history: ArchiveHistory = load_history(&history_path)?;
        let interrupted = history
            .tasks
            .iter_mut()
            .map(|task| task.interrupt())
            .filter(|interrupted| *interrupted)
            .count();

        let manager = Self {
            store,
            config,
            gate,
            history: Mutex::new(history),
            history_path,
        };
        if interrupted > 0 {
            warn!("⚠️ Marked {} interrupted archive task(s) as failed", interrupted);
            manager.persist_history();
        }
        Ok(manager)
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    fn new_task(&self, table: &str, condition: &str) -> Result<ArchiveTask> {
        ensure_identifier("table", table)?;
        if condition.trim().is_empty() {
            return Err(DurabilityError::validation("archive condition cannot be empty"));
        }
        Ok(ArchiveTask::new(table, condition))
    }

    /// Records a pending task; no rows are touched until it is executed.
    pub fn create_archive_task(&self, table: &str, condition: &str) -> Result<String> {
        let task = self.new_task(table, condition)?;
        let id = task.id().to_string();
        self.record_task(&task);
        self.persist_history();
        info!("📝 Created archive task {} for {} where {}", id, table, condition);
        Ok(id)
    }

    pub fn get_task(&self, task_id: &str) -> Option<ArchiveTask> {
        self.history
            .lock()
            .tasks
            .iter()
            .find(|t| t.id() == task_id)
            .cloned()
    }

    /// All archive tasks, newest first.
    pub fn list_tasks(&self) -> Vec<ArchiveTask> {
        self.history.lock().tasks.iter().rev().cloned().collect()
    }

    /// Exports the rows matching the task's condition, then deletes them. The export is
    /// on disk before anything is deleted.
    pub async fn execute_archive_task(&self, task_id: &str) -> Result<ArchiveTask> {
        let task = self
            .get_task(task_id)
            .ok_or_else(|| DurabilityError::not_found(format!("archive task {}", task_id)))?;
        match task.status() {
            TaskStatus::Pending => {}
            TaskStatus::Running => {
                return Err(DurabilityError::conflict(format!(
                    "archive task {} is already running",
                    task_id
                )));
            }
            status => {
                return Err(DurabilityError::conflict(format!(
                    "archive task {} already {}; create a new task to retry",
                    task_id, status
                )));
            }
        }

        let _permit = self.gate.try_acquire(task_id)?;
        self.run_task(task).await
    }

    /// Takes the gate before the task is recorded, so a busy gate leaves no task behind.
    async fn run_new_task(&self, task: ArchiveTask) -> Result<ArchiveTask> {
        let _permit = self.gate.try_acquire(task.id())?;
        self.run_task(task).await
    }

    /// Runs a pending task. The caller holds the gate.
    async fn run_task(&self, mut task: ArchiveTask) -> Result<ArchiveTask> {
        task.start()?;
        self.record_task(&task);
        self.persist_history();
        info!("🚀 Archiving {} where {}", task.table_name(), task.condition());

        let result = match self.run_archive(&task).await {
            Ok((records, path)) => {
                task.complete(records, path)?;
                info!(
                    "✅ Archive task {} moved {} record(s) out of {}",
                    task.id(),
                    records,
                    task.table_name()
                );
                Ok(task.clone())
            }
            Err(e) => {
                error!("❌ Archive task {} failed: {}", task.id(), e);
                task.fail(e.to_string())?;
                Err(e)
            }
        };

        self.record_task(&task);
        self.persist_history();
        result
    }

    async fn run_archive(&self, task: &ArchiveTask) -> Result<(u64, Option<PathBuf>)> {
        let store = self.store.as_ref();
        let schema = describe_table(store, task.table_name()).await?;
        let builder = StatementBuilder::table(task.table_name());

        let matching = store
            .query(&builder.count_where(task.condition()))
            .await?
            .first()
            .and_then(|row| row.get_i64("total"))
            .unwrap_or(0);
        if matching == 0 {
            info!("ℹ️ No rows in {} match, nothing to archive", task.table_name());
            return Ok((0, None));
        }

        let mut records = Vec::with_capacity(usize::try_from(matching).unwrap_or_default());
        let mut pager = RowPager::new(&schema, Some(task.condition()), self.config.batch_size);
        while let Some(rows) = pager.next_page(store).await? {
            records.extend(rows.into_iter().map(|row| row.into_values()));
        }

        let archive = ArchiveFile {
            table_name: task.table_name().to_string(),
            task_id: task.id().to_string(),
            condition: task.condition().to_string(),
            exported_at: Utc::now(),
            record_count: records.len() as u64,
            columns: schema.columns.clone(),
            records,
        };
        let path = write_archive_file(
            &self.config.archive_dir,
            &archive,
            self.config.compression_level(),
        )?;
        info!("💾 Wrote {} record(s) to {}", archive.record_count, path.display());

        let deleted = store
            .execute(&builder.delete_where(task.condition()))
            .await?;
        if deleted != archive.record_count {
            warn!(
                "⚠️ Exported {} record(s) from {} but deleted {}",
                archive.record_count,
                task.table_name(),
                deleted
            );
        }
        Ok((deleted, Some(path)))
    }

    pub async fn archive_old_data(&self, table: &str, date_column: &str) -> Result<ArchiveTask> {
        self.archive_old_data_at(table, date_column, Utc::now()).await
    }

    /// Archives rows whose `date_column` is older than `archive_after_days` before `now`.
    pub async fn archive_old_data_at(
        &self,
        table: &str,
        date_column: &str,
        now: DateTime<Utc>,
    ) -> Result<ArchiveTask> {
        ensure_identifier("date column", date_column)?;
        let task = self.new_task(table, &self.age_condition(date_column, now))?;
        self.run_new_task(task).await
    }

    fn age_condition(&self, date_column: &str, now: DateTime<Utc>) -> String {
        let cutoff = now - Duration::days(i64::from(self.config.archive_after_days));
        format!(
            "{} < '{}'",
            quote_ident(date_column),
            format_store_datetime(cutoff)
        )
    }

    /// Archives each table in turn. Failures are logged and skipped; the ids of every task
    /// that was recorded are returned. A table is skipped without a task while another
    /// operation holds the gate.
    pub async fn archive_multiple_tables(&self, tables: &[ArchiveTableConfig]) -> Vec<String> {
        let now = Utc::now();
        let mut attempted = Vec::with_capacity(tables.len());
        for entry in tables {
            let task = match ensure_identifier("date column", &entry.date_column)
                .and_then(|_| self.new_task(&entry.table, &self.age_condition(&entry.date_column, now)))
            {
                Ok(task) => task,
                Err(e) => {
                    warn!("⚠️ Skipping archive of {}: {}", entry.table, e);
                    continue;
                }
            };
            let task_id = task.id().to_string();
            match self.run_new_task(task).await {
                Ok(_) => attempted.push(task_id),
                Err(DurabilityError::Conflict(reason)) => {
                    warn!("⚠️ Skipping archive of {}: {}", entry.table, reason);
                }
                Err(e) => {
                    warn!("⚠️ Archiving {} failed, moving on: {}", entry.table, e);
                    attempted.push(task_id);
                }
            }
        }
        attempted
    }

    /// Upserts every archived row back into `target_table`, or into the table the file
    /// name points at, in one transaction. Restoring the same file twice is harmless for
    /// tables with a primary key.
    pub async fn restore_from_archive(
        &self,
        file: &Path,
        target_table: Option<&str>,
    ) -> Result<ArchiveRestoreReport> {
        let path = resolve_in_dir(&self.config.archive_dir, file);
        let archive = read_archive_file(&path)?;

        let table = match target_table {
            Some(table) => table.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_archive_file_name)
                .map(|parsed| parsed.table)
                .unwrap_or_else(|| archive.table_name.clone()),
        };
        ensure_identifier("table", &table)?;

        let builder = StatementBuilder::table(&table);
        let statements: Vec<Statement> = archive
            .records
            .into_iter()
            .map(|values| builder.upsert(&archive.columns, values))
            .collect();
        if !statements.is_empty() {
            self.store.transaction(&statements).await?;
        }

        info!(
            "♻️ Restored {} record(s) from {} into {}",
            statements.len(),
            path.display(),
            table
        );
        Ok(ArchiveRestoreReport {
            file: path,
            table,
            records_restored: statements.len() as u64,
        })
    }

    /// Archive files directly inside the archive directory, with their size and mtime.
    fn archive_files(&self) -> Vec<(PathBuf, u64, SystemTime)> {
        WalkDir::new(&self.config.archive_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry.file_name().to_str().and_then(parse_archive_file_name)?;
                let meta = entry.metadata().ok().filter(|m| m.is_file())?;
                Some((entry.into_path(), meta.len(), meta.modified().ok()?))
            })
            .collect()
    }

    pub fn cleanup_expired_archives(&self) -> Result<usize> {
        self.cleanup_expired_archives_at(Utc::now())
    }

    /// Deletes archive files last modified before `now - retention_days`.
    pub fn cleanup_expired_archives_at(&self, now: DateTime<Utc>) -> Result<usize> {
        if !self.config.archive_dir.is_dir() {
            return Err(DurabilityError::not_found(format!(
                "archive directory {}",
                self.config.archive_dir.display()
            )));
        }
        let cutoff: SystemTime =
            (now - Duration::days(i64::from(self.config.retention_days))).into();

        let mut removed = 0;
        for (path, _, modified) in self.archive_files() {
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    info!("🗑️ Removed expired archive {}", path.display());
                }
                Err(e) => warn!("⚠️ Could not remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    pub fn get_archive_stats(&self) -> ArchiveStats {
        let mut stats = ArchiveStats::default();
        {
            let history = self.history.lock();
            stats.total_tasks = history.tasks.len();
            for task in &history.tasks {
                match task.status() {
                    TaskStatus::Pending => stats.pending_tasks += 1,
                    TaskStatus::Running => stats.running_tasks += 1,
                    TaskStatus::Completed => {
                        stats.completed_tasks += 1;
                        stats.total_records_archived += task.records_processed();
                        *stats
                            .records_by_table
                            .entry(task.table_name().to_string())
                            .or_default() += task.records_processed();
                    }
                    TaskStatus::Failed => stats.failed_tasks += 1,
                }
            }
        }
        for (_, size, _) in self.archive_files() {
            stats.archive_files += 1;
            stats.archive_bytes += size;
        }
        stats
    }

    fn record_task(&self, task: &ArchiveTask) {
        let mut history = self.history.lock();
        match history.tasks.iter_mut().find(|t| t.id() == task.id()) {
            Some(existing) => *existing = task.clone(),
            None => history.tasks.push(task.clone()),
        }
    }

    fn persist_history(&self) {
        let snapshot = self.history.lock().clone();
        if let Err(e) = save_history(&self.history_path, &snapshot) {
            warn!(
                "⚠️ Failed to write archive history {}: {}",
                self.history_path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::test_support::{count_rows, open_store, seed_blog};
    use chrono::TimeZone;
    use std::fs::File;
    use tempfile::{TempDir, tempdir};

    const OLD_COMMENTS: &str = "created_at < '2021-01-01 00:00:00'";

    async fn manager(dir: &TempDir) -> anyhow::Result<ArchiveManager<SqliteStore>> {
        let store = open_store(dir.path()).await?;
        seed_blog(&store).await?;
        let config = ArchiveConfig {
            archive_dir: dir.path().join("archives"),
            batch_size: 2,
            ..ArchiveConfig::default()
        };
        Ok(ArchiveManager::new(Arc::new(store), config, TaskGate::new())?)
    }

    #[tokio::test]
    async fn test_archive_writes_file_then_deletes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;

        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;
        assert_eq!(manager.get_task(&id).map(|t| t.status()), Some(TaskStatus::Pending));
        assert_eq!(count_rows(manager.store.as_ref(), "comments").await?, 5);

        let task = manager.execute_archive_task(&id).await?;
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.records_processed(), 3);
        assert_eq!(count_rows(manager.store.as_ref(), "comments").await?, 2);

        let archive = read_archive_file(task.file_path().expect("archive path"))?;
        assert_eq!(archive.record_count, 3);
        assert_eq!(archive.records.len(), 3);
        assert_eq!(archive.columns, vec!["id", "article_id", "body", "created_at"]);
        assert_eq!(archive.task_id, id);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_matches_is_success_without_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;

        let id = manager.create_archive_task("comments", "created_at < '1990-01-01 00:00:00'")?;
        let task = manager.execute_archive_task(&id).await?;
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.records_processed(), 0);
        assert!(task.file_path().is_none());
        assert_eq!(manager.get_archive_stats().archive_files, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_export_deletes_nothing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let archive_dir = dir.path().join("archives");
        fs::remove_dir_all(&archive_dir)?;
        fs::write(&archive_dir, b"in the way")?;

        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;
        let result = manager.execute_archive_task(&id).await;
        assert!(result.is_err());

        let task = manager.get_task(&id).expect("task recorded");
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.records_processed(), 0);
        assert_eq!(count_rows(manager.store.as_ref(), "comments").await?, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_finished_task_cannot_rerun() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;
        manager.execute_archive_task(&id).await?;

        let again = manager.execute_archive_task(&id).await;
        assert!(matches!(again, Err(DurabilityError::Conflict(_))));
        assert!(matches!(
            manager.execute_archive_task("missing").await,
            Err(DurabilityError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_busy_gate_leaves_task_pending() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;

        let _held = manager.gate.try_acquire("backup-in-progress")?;
        let result = manager.execute_archive_task(&id).await;
        assert!(matches!(result, Err(DurabilityError::Conflict(_))));
        assert_eq!(manager.get_task(&id).map(|t| t.status()), Some(TaskStatus::Pending));
        Ok(())
    }

    #[tokio::test]
    async fn test_busy_gate_skips_batch_without_tasks() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let tables = vec![ArchiveTableConfig {
            table: "comments".to_string(),
            date_column: "created_at".to_string(),
        }];

        {
            let _held = manager.gate.try_acquire("backup-in-progress")?;
            assert!(manager.archive_multiple_tables(&tables).await.is_empty());
            assert!(manager.list_tasks().is_empty());
            let direct = manager.archive_old_data("comments", "created_at").await;
            assert!(matches!(direct, Err(DurabilityError::Conflict(_))));
            assert!(manager.list_tasks().is_empty());
        }

        let ids = manager.archive_multiple_tables(&tables).await;
        assert_eq!(ids.len(), 1);
        assert_eq!(manager.get_task(&ids[0]).map(|t| t.status()), Some(TaskStatus::Completed));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let result = manager.create_archive_task("comments; DROP TABLE users", OLD_COMMENTS);
        assert!(matches!(result, Err(DurabilityError::Validation(_))));
        assert!(manager.list_tasks().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_archive_old_data_uses_age_cutoff() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let now = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();

        // 365 days back from 2020-06-01 crosses Feb 29, so the cutoff is 2019-06-02
        let task = manager.archive_old_data_at("comments", "created_at", now).await?;
        assert_eq!(task.records_processed(), 2);
        assert_eq!(task.condition(), "\"created_at\" < '2019-06-02 00:00:00'");
        assert_eq!(count_rows(manager.store.as_ref(), "comments").await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let tables = vec![
            ArchiveTableConfig {
                table: "ghosts".to_string(),
                date_column: "created_at".to_string(),
            },
            ArchiveTableConfig {
                table: "bad name".to_string(),
                date_column: "created_at".to_string(),
            },
            ArchiveTableConfig {
                table: "comments".to_string(),
                date_column: "created_at".to_string(),
            },
        ];

        let ids = manager.archive_multiple_tables(&tables).await;
        assert_eq!(ids.len(), 2);
        let ghosts = manager.get_task(&ids[0]).expect("ghosts task");
        assert_eq!(ghosts.status(), TaskStatus::Failed);
        let comments = manager.get_task(&ids[1]).expect("comments task");
        assert_eq!(comments.status(), TaskStatus::Completed);
        assert_eq!(comments.records_processed(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_from_archive_is_idempotent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;
        let task = manager.execute_archive_task(&id).await?;
        let file_name = task
            .file_path()
            .and_then(|p| p.file_name())
            .map(PathBuf::from)
            .expect("archive file name");

        for _ in 0..2 {
            let report = manager.restore_from_archive(&file_name, None).await?;
            assert_eq!(report.table, "comments");
            assert_eq!(report.records_restored, 3);
            assert_eq!(count_rows(manager.store.as_ref(), "comments").await?, 5);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_into_explicit_table() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        manager
            .store
            .execute(&Statement::raw(
                "CREATE TABLE comments_history (id INTEGER PRIMARY KEY, article_id INTEGER, body TEXT, created_at TEXT)",
            ))
            .await?;
        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;
        let task = manager.execute_archive_task(&id).await?;

        let report = manager
            .restore_from_archive(task.file_path().expect("path"), Some("comments_history"))
            .await?;
        assert_eq!(report.table, "comments_history");
        assert_eq!(count_rows(manager.store.as_ref(), "comments_history").await?, 3);
        assert_eq!(count_rows(manager.store.as_ref(), "comments").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_archives() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;
        let task = manager.execute_archive_task(&id).await?;
        let archive_path = task.file_path().expect("path").to_path_buf();

        let stranger = dir.path().join("archives").join("notes.txt");
        fs::write(&stranger, "keep me")?;

        let now = Utc::now();
        assert_eq!(manager.cleanup_expired_archives_at(now)?, 0);

        let old: SystemTime = (now - Duration::days(2 * 365 * 2)).into();
        File::options().write(true).open(&archive_path)?.set_modified(old)?;
        File::options().write(true).open(&stranger)?.set_modified(old)?;

        assert_eq!(manager.cleanup_expired_archives_at(now)?, 1);
        assert!(!archive_path.exists());
        assert!(stranger.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_and_history_survive_reload() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir).await?;
        let id = manager.create_archive_task("comments", OLD_COMMENTS)?;
        manager.execute_archive_task(&id).await?;
        manager.create_archive_task("articles", "rating IS NULL")?;

        let stats = manager.get_archive_stats();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.pending_tasks, 1);
        assert_eq!(stats.total_records_archived, 3);
        assert_eq!(stats.records_by_table.get("comments"), Some(&3));
        assert_eq!(stats.archive_files, 1);
        assert!(stats.archive_bytes > 0);

        let reloaded = ArchiveManager::new(
            manager.store.clone(),
            manager.config.clone(),
            TaskGate::new(),
        )?;
        let tasks = reloaded.list_tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id(), id);
        assert_eq!(tasks[1].records_processed(), 3);
        Ok(())
    }
}
