//! Recurring backup and archive cycles.
//!
//! Both schedules share one loop, so a backup cycle and an archive cycle never run at the
//! same time. The first cycle of each runs one full interval after start; ticks missed
//! while a cycle is still running are skipped rather than queued.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveManager;
use crate::backup::BackupManager;
use crate::config::MAX_INTERVAL_MINUTES;
use crate::store::Store;
use crate::task::BackupKind;

pub struct Scheduler<S: Store + 'static> {
    backup: Arc<BackupManager<S>>,
    archive: Arc<ArchiveManager<S>>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: Store + 'static> Scheduler<S> {
    pub fn new(backup: Arc<BackupManager<S>>, archive: Arc<ArchiveManager<S>>) -> Self {
        Self {
            backup,
            archive,
            cancel_token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawns the schedule loop when at least one schedule is enabled. Returns how many
    /// schedules are running.
    pub fn start(&mut self) -> usize {
        let backup = self.backup.config().schedule.clone();
        let archive = self.archive.config().schedule.clone();
        let backup_period = backup.enabled.then(|| backup.interval());
        let archive_period = archive.enabled.then(|| archive.interval());

        let enabled = usize::from(backup.enabled) + usize::from(archive.enabled);
        if enabled > 0 {
            self.spawn_loop(backup_period, archive_period);
        }
        tracing::info!("⏰ Scheduler started with {} schedule(s)", enabled);
        enabled
    }

    fn spawn_loop(&mut self, backup_period: Option<Duration>, archive_period: Option<Duration>) {
        let handle = tokio::spawn(run_schedules(
            self.backup.clone(),
            self.archive.clone(),
            backup_period,
            archive_period,
            self.cancel_token.child_token(),
        ));
        self.tasks.push(handle);
    }

    /// Stops the loop. A cycle already in progress finishes first.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for handle in self.tasks {
            if let Err(e) = handle.await {
                tracing::warn!("Scheduler loop ended abnormally: {}", e);
            }
        }
        tracing::info!("⏹️ Scheduler stopped");
    }
}

async fn run_schedules<S: Store>(
    backup: Arc<BackupManager<S>>,
    archive: Arc<ArchiveManager<S>>,
    backup_period: Option<Duration>,
    archive_period: Option<Duration>,
    cancel_token: CancellationToken,
) {
    let mut backup_ticks = backup_period.map(ticker);
    let mut archive_ticks = archive_period.map(ticker);
    tracing::debug!(
        "Schedule loop running, backup every {:?}, archive every {:?}",
        backup_period,
        archive_period
    );

    loop {
        tokio::select! {
            _ = next_tick(&mut backup_ticks) => {
                tracing::debug!("backup cycle triggered");
                run_backup_cycle(&backup).await;
            }
            _ = next_tick(&mut archive_ticks) => {
                tracing::debug!("archive cycle triggered");
                run_archive_cycle(&archive).await;
            }
            _ = cancel_token.cancelled() => {
                tracing::debug!("schedule loop cancelled");
                break;
            }
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let period = period.clamp(
        Duration::from_millis(1),
        Duration::from_secs(MAX_INTERVAL_MINUTES * 60),
    );
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Never resolves for a disabled schedule.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// One scheduled backup followed by retention pruning. Failures are logged, never
/// returned; a failed backup is already recorded as a failed task.
pub async fn run_backup_cycle<S: Store>(manager: &BackupManager<S>) {
    let result = match manager.config().scheduled_kind {
        BackupKind::Full => manager.create_full_backup().await,
        BackupKind::Incremental => manager.create_incremental_backup().await,
    };
    if let Err(e) = result {
        tracing::error!("❌ Scheduled backup failed: {}", e);
    }

    match manager.cleanup_old_backups() {
        Ok(removed) => tracing::debug!("Retention pass removed {} backup(s)", removed),
        Err(e) => tracing::error!("❌ Backup retention pass failed: {}", e),
    }
}

/// Archives every configured table, then removes expired archive files.
pub async fn run_archive_cycle<S: Store>(manager: &ArchiveManager<S>) {
    let tables = manager.config().tables.clone();
    if !tables.is_empty() {
        let attempted = manager.archive_multiple_tables(&tables).await;
        tracing::info!("📚 Scheduled archive attempted {} task(s)", attempted.len());
    }

    match manager.cleanup_expired_archives() {
        Ok(removed) => tracing::debug!("Removed {} expired archive file(s)", removed),
        Err(e) => tracing::error!("❌ Archive cleanup failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveConfig, ArchiveTableConfig, BackupConfig, ScheduleConfig};
    use crate::store::SqliteStore;
    use crate::errors::DurabilityError;
    use crate::task::{TaskGate, TaskStatus};
    use crate::test_support::{open_store, seed_blog};
    use tempfile::{TempDir, tempdir};

    async fn managers(
        dir: &TempDir,
        enabled: bool,
    ) -> anyhow::Result<(Arc<BackupManager<SqliteStore>>, Arc<ArchiveManager<SqliteStore>>)> {
        let store = Arc::new(open_store(dir.path()).await?);
        seed_blog(store.as_ref()).await?;
        let gate = TaskGate::new();
        let schedule = ScheduleConfig {
            enabled,
            interval_minutes: 60,
        };
        let backup = BackupManager::new(
            store.clone(),
            BackupConfig {
                backup_dir: dir.path().join("backups"),
                schedule: schedule.clone(),
                ..BackupConfig::default()
            },
            gate.clone(),
        )?;
        let archive = ArchiveManager::new(
            store,
            ArchiveConfig {
                archive_dir: dir.path().join("archives"),
                tables: vec![ArchiveTableConfig {
                    table: "comments".to_string(),
                    date_column: "created_at".to_string(),
                }],
                schedule,
                ..ArchiveConfig::default()
            },
            gate,
        )?;
        Ok((Arc::new(backup), Arc::new(archive)))
    }

    #[tokio::test]
    async fn test_backup_cycle_records_a_task() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (backup, _) = managers(&dir, false).await?;

        // incremental is configured, but the first run has no full backup to build on
        run_backup_cycle(&backup).await;
        run_backup_cycle(&backup).await;
        let history = backup.get_backup_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kind(), BackupKind::Full);
        assert_eq!(history[0].kind(), BackupKind::Incremental);
        assert!(history.iter().all(|t| t.status() == TaskStatus::Completed));
        Ok(())
    }

    #[tokio::test]
    async fn test_archive_cycle_moves_old_rows() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (_, archive) = managers(&dir, false).await?;

        run_archive_cycle(&archive).await;
        let tasks = archive.list_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].records_processed(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_cycles_leave_no_pending_task() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (backup, archive) = managers(&dir, false).await?;

        // whichever cycle takes the gate first runs; the other records nothing
        tokio::join!(run_backup_cycle(&backup), run_archive_cycle(&archive));
        let backups = backup.get_backup_history();
        let tasks = archive.list_tasks();
        assert_eq!(backups.len() + tasks.len(), 1);
        assert!(backups.iter().all(|t| t.status() == TaskStatus::Completed));
        assert!(tasks.iter().all(|t| t.status() == TaskStatus::Completed));

        run_backup_cycle(&backup).await;
        run_archive_cycle(&archive).await;
        let tasks = archive.list_tasks();
        assert!(!backup.get_backup_history().is_empty());
        assert!(tasks.iter().all(|t| t.status() == TaskStatus::Completed));
        assert_eq!(tasks.iter().map(|t| t.records_processed()).sum::<u64>(), 3);
        assert!(backup.gate().active().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_overlapping_backups_one_conflicts() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (backup, _) = managers(&dir, false).await?;

        let (first, second) =
            tokio::join!(backup.create_full_backup(), backup.create_full_backup());
        let (done, rejected) = match (first, second) {
            (Ok(done), Err(rejected)) | (Err(rejected), Ok(done)) => (done, rejected),
            other => panic!("expected one backup and one conflict, got {:?}", other),
        };
        assert!(matches!(rejected, DurabilityError::Conflict(_)));
        assert_eq!(done.status(), TaskStatus::Completed);
        assert_eq!(backup.get_backup_history().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_archive_and_backup_overlap_one_conflicts() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (backup, archive) = managers(&dir, false).await?;
        let id = archive.create_archive_task("comments", "created_at < '2021-01-01 00:00:00'")?;

        let (archived, backed_up) =
            tokio::join!(archive.execute_archive_task(&id), backup.create_full_backup());
        match (&archived, &backed_up) {
            (Ok(task), Err(DurabilityError::Conflict(_))) => {
                assert_eq!(task.records_processed(), 3);
                assert!(backup.get_backup_history().is_empty());
            }
            (Err(DurabilityError::Conflict(_)), Ok(_)) => {
                assert_eq!(archive.get_task(&id).map(|t| t.status()), Some(TaskStatus::Pending));
            }
            other => panic!("expected exactly one conflict, got {:?}", other),
        }
        assert!(backup.gate().active().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_equal_intervals_run_one_after_the_other() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (backup, archive) = managers(&dir, false).await?;

        let mut scheduler = Scheduler::new(backup.clone(), archive.clone());
        let period = Duration::from_millis(50);
        scheduler.spawn_loop(Some(period), Some(period));
        tokio::time::sleep(Duration::from_millis(400)).await;
        scheduler.shutdown().await;

        let backups = backup.get_backup_history();
        let tasks = archive.list_tasks();
        assert!(!backups.is_empty());
        assert!(!tasks.is_empty());
        assert!(backups.iter().all(|t| t.status() == TaskStatus::Completed));
        assert!(tasks.iter().all(|t| t.status() == TaskStatus::Completed));
        Ok(())
    }

    #[tokio::test]
    async fn test_ticker_bounds_unvalidated_periods() {
        assert_eq!(ticker(Duration::ZERO).period(), Duration::from_millis(1));
        assert_eq!(
            ticker(Duration::from_secs(u64::MAX)).period(),
            Duration::from_secs(MAX_INTERVAL_MINUTES * 60)
        );
    }

    #[tokio::test]
    async fn test_loops_wait_one_interval_and_stop() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (backup, archive) = managers(&dir, true).await?;

        let mut scheduler = Scheduler::new(backup.clone(), archive.clone());
        assert_eq!(scheduler.start(), 2);
        tokio::task::yield_now().await;
        assert!(backup.get_backup_history().is_empty());

        scheduler.shutdown().await;
        assert!(backup.get_backup_history().is_empty());
        assert!(archive.list_tasks().is_empty());
        Ok(())
    }
}
