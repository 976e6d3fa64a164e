//! Backup and archive task records and their shared state machine.
//!
//! `pending -> running -> completed | failed`. Terminal states are final; a retry is always a
//! new task.

mod gate;
pub mod history;

pub use gate::{TaskGate, TaskPermit};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::{DurabilityError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        })
    }
}

/// Status and timestamps shared by both task kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    fn start(&mut self, task_id: &str) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(DurabilityError::conflict(format!(
                "task {} is {} and cannot be started",
                task_id, self.status
            )));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    fn finish(&mut self, task_id: &str, status: TaskStatus, error: Option<String>) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(DurabilityError::conflict(format!(
                "task {} is {} and cannot become {}",
                task_id, self.status, status
            )));
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.error_message = error;
        Ok(())
    }

    /// Marks a task left unfinished by a previous process as failed.
    fn interrupt(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some("interrupted before completion".to_string());
        true
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Milliseconds between start and completion, once both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

fn new_task_id() -> String {
    // v7 ids lead with a millisecond timestamp, so they sort by creation time
    Uuid::now_v7().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupTask {
    id: String,
    kind: BackupKind,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    lifecycle: Lifecycle,
    file_path: Option<PathBuf>,
    file_size_bytes: Option<u64>,
    compressed: bool,
    encrypted: bool,
    #[serde(default)]
    tables: Vec<String>,
}

impl BackupTask {
    pub fn new(kind: BackupKind, compressed: bool, encrypted: bool) -> Self {
        Self {
            id: new_task_id(),
            kind,
            created_at: Utc::now(),
            lifecycle: Lifecycle::new(),
            file_path: None,
            file_size_bytes: None,
            compressed,
            encrypted,
            tables: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.lifecycle.start(&self.id)
    }

    pub fn complete(&mut self, file_path: PathBuf, file_size_bytes: u64, tables: Vec<String>) -> Result<()> {
        self.lifecycle.finish(&self.id, TaskStatus::Completed, None)?;
        self.file_path = Some(file_path);
        self.file_size_bytes = Some(file_size_bytes);
        self.tables = tables;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.lifecycle
            .finish(&self.id, TaskStatus::Failed, Some(error.into()))
    }

    pub(crate) fn interrupt(&mut self) -> bool {
        self.lifecycle.interrupt()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> BackupKind {
        self.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.lifecycle.status()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.started_at()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.completed_at()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.lifecycle.error_message()
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn file_size_bytes(&self) -> Option<u64> {
        self.file_size_bytes
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    #[cfg(test)]
    pub(crate) fn backdated(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTask {
    id: String,
    table_name: String,
    condition: String,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    lifecycle: Lifecycle,
    records_processed: u64,
    file_path: Option<PathBuf>,
}

impl ArchiveTask {
    pub fn new(table_name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            id: new_task_id(),
            table_name: table_name.into(),
            condition: condition.into(),
            created_at: Utc::now(),
            lifecycle: Lifecycle::new(),
            records_processed: 0,
            file_path: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.lifecycle.start(&self.id)
    }

    pub fn complete(&mut self, records_processed: u64, file_path: Option<PathBuf>) -> Result<()> {
        self.lifecycle.finish(&self.id, TaskStatus::Completed, None)?;
        self.records_processed = records_processed;
        self.file_path = file_path;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.lifecycle
            .finish(&self.id, TaskStatus::Failed, Some(error.into()))
    }

    pub(crate) fn interrupt(&mut self) -> bool {
        self.lifecycle.interrupt()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn condition(&self) -> &str {
        &self.condition
    }

    pub fn status(&self) -> TaskStatus {
        self.lifecycle.status()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn records_processed(&self) -> u64 {
        self.records_processed
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.lifecycle.error_message()
    }
}
