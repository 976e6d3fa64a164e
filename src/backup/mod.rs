// durabilitytool/src/backup/mod.rs
pub(crate) mod db_dump;
mod logic;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::codec::EncryptionKey;
use crate::config::BackupConfig;
use crate::errors::{DurabilityError, Result};
use crate::store::Store;
use crate::task::history::{load_history, save_history};
use crate::task::{BackupKind, BackupTask, TaskGate, TaskStatus};

pub const HISTORY_FILE_NAME: &str = "backup_history.json";

/// What `backup_history.json` holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BackupHistory {
    #[serde(default)]
    tasks: Vec<BackupTask>,
    #[serde(default)]
    last_full_backup_at: Option<DateTime<Utc>>,
}

/// Aggregates over the backup history, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupStats {
    pub total_backups: usize,
    pub completed_backups: usize,
    pub failed_backups: usize,
    pub success_rate: f64,
    pub total_size_bytes: u64,
    pub average_duration_ms: Option<f64>,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
    pub last_full_backup_at: Option<DateTime<Utc>>,
}

/// Creates snapshots of the live store, restores them, and keeps the backup history.
pub struct BackupManager<S: Store> {
    store: Arc<S>,
    config: BackupConfig,
    encryption_key: Option<EncryptionKey>,
    gate: TaskGate,
    history: Mutex<BackupHistory>,
    history_path: PathBuf,
}

impl<S: Store> BackupManager<S> {
    /// Loads the history file from the backup directory. Tasks a previous process left
    /// `pending` or `running` are marked failed.
    pub fn new(store: Arc<S>, config: BackupConfig, gate: TaskGate) -> Result<Self> {
        let encryption_key = config.encryption_key()?;
        fs::create_dir_all(&config.backup_dir)?;
        let history_path = config.backup_dir.join(HISTORY_FILE_NAME);

        let mut history: BackupHistory = load_history(&history_path)?;
        let interrupted = history
            .tasks
            .iter_mut()
            .filter_map(|task| task.interrupt().then(|| task.id().to_string()))
            .collect::<Vec<_>>();

        let manager = Self {
            store,
            config,
            encryption_key,
            gate,
            history: Mutex::new(history),
            history_path,
        };
        if !interrupted.is_empty() {
            warn!(
                "⚠️ Marked {} interrupted backup task(s) as failed: {}",
                interrupted.len(),
                interrupted.join(", ")
            );
            manager.persist_history();
        }
        Ok(manager)
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.backup_dir
    }

    /// All backup tasks, newest first.
    pub fn get_backup_history(&self) -> Vec<BackupTask> {
        let history = self.history.lock();
        history.tasks.iter().rev().cloned().collect()
    }

    pub fn get_task(&self, task_id: &str) -> Option<BackupTask> {
        self.history
            .lock()
            .tasks
            .iter()
            .find(|t| t.id() == task_id)
            .cloned()
    }

    /// The backup task currently running, if any.
    pub fn current_task(&self) -> Option<BackupTask> {
        self.history
            .lock()
            .tasks
            .iter()
            .find(|t| t.status() == TaskStatus::Running)
            .cloned()
    }

    pub fn last_full_backup_at(&self) -> Option<DateTime<Utc>> {
        self.history.lock().last_full_backup_at
    }

    pub fn get_backup_stats(&self) -> BackupStats {
        let history = self.history.lock();
        let tasks = &history.tasks;
        let completed: Vec<&BackupTask> = tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Completed)
            .collect();
        let failed = tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Failed)
            .count();

        let durations: Vec<i64> = completed
            .iter()
            .filter_map(|t| t.lifecycle().duration_ms())
            .collect();
        let average_duration_ms = (!durations.is_empty())
            .then(|| durations.iter().sum::<i64>() as f64 / durations.len() as f64);

        BackupStats {
            total_backups: tasks.len(),
            completed_backups: completed.len(),
            failed_backups: failed,
            success_rate: if tasks.is_empty() {
                0.0
            } else {
                completed.len() as f64 / tasks.len() as f64
            },
            total_size_bytes: completed.iter().filter_map(|t| t.file_size_bytes()).sum(),
            average_duration_ms,
            oldest_backup: completed.iter().map(|t| t.created_at()).min(),
            newest_backup: completed.iter().map(|t| t.created_at()).max(),
            last_full_backup_at: history.last_full_backup_at,
        }
    }

    /// Deletes a finished backup's file, then its history entry.
    pub fn delete_backup(&self, task_id: &str) -> Result<()> {
        let task = self
            .get_task(task_id)
            .ok_or_else(|| DurabilityError::not_found(format!("backup task {}", task_id)))?;
        if !task.status().is_terminal() {
            return Err(DurabilityError::conflict(format!(
                "backup task {} is {} and cannot be deleted",
                task_id,
                task.status()
            )));
        }

        if let Some(path) = task.file_path() {
            remove_backup_file(path)?;
        }
        self.history.lock().tasks.retain(|t| t.id() != task_id);
        self.persist_history();
        info!("🗑️ Deleted backup {}", task_id);
        Ok(())
    }

    pub fn cleanup_old_backups(&self) -> Result<usize> {
        self.cleanup_old_backups_at(Utc::now())
    }

    /// Prunes finished backups created before `now - retention_days`, then completed
    /// backups beyond `max_backups`, oldest first. A task whose file cannot be removed
    /// stays in the history.
    pub fn cleanup_old_backups_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(i64::from(self.config.retention_days));
        let victims = {
            let history = self.history.lock();
            let mut victims: Vec<BackupTask> = history
                .tasks
                .iter()
                .filter(|t| t.status().is_terminal() && t.created_at() < cutoff)
                .cloned()
                .collect();

            let mut completed: Vec<&BackupTask> = history
                .tasks
                .iter()
                .filter(|t| t.status() == TaskStatus::Completed)
                .filter(|t| !victims.iter().any(|v| v.id() == t.id()))
                .collect();
            completed.sort_by_key(|t| std::cmp::Reverse(t.created_at()));
            victims.extend(
                completed
                    .into_iter()
                    .skip(self.config.max_backups)
                    .cloned(),
            );
            victims
        };

        let mut removed = 0;
        for task in &victims {
            if let Some(path) = task.file_path() {
                if let Err(e) = remove_backup_file(path) {
                    warn!("⚠️ Keeping backup {} in history: {}", task.id(), e);
                    continue;
                }
            }
            self.history.lock().tasks.retain(|t| t.id() != task.id());
            removed += 1;
        }

        if removed > 0 {
            self.persist_history();
            info!("🧹 Pruned {} old backup(s)", removed);
        }
        Ok(removed)
    }

    /// Writes the history file; a failed write is logged and the in-memory history stays
    /// authoritative.
    fn persist_history(&self) {
        let snapshot = self.history.lock().clone();
        if let Err(e) = save_history(&self.history_path, &snapshot) {
            warn!(
                "⚠️ Failed to write backup history {}: {}",
                self.history_path.display(),
                e
            );
        }
    }

    fn record_task(&self, task: &BackupTask) {
        let mut history = self.history.lock();
        match history.tasks.iter_mut().find(|t| t.id() == task.id()) {
            Some(existing) => *existing = task.clone(),
            None => history.tasks.push(task.clone()),
        }
        if task.kind() == BackupKind::Full && task.status() == TaskStatus::Completed {
            history.last_full_backup_at = Some(task.created_at());
        }
    }
}

fn remove_backup_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
