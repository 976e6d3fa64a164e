// durabilitytool/src/restore/mod.rs
pub(crate) mod db_restore;
pub(crate) mod verification;

pub use verification::{ValidationReport, inspect_snapshot};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use uuid::Uuid;

use crate::backup::BackupManager;
use crate::errors::{DurabilityError, Result};
use crate::store::Store;
use crate::task::BackupKind;
use crate::utils::{ensure_identifier, resolve_in_dir};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Absolute, or relative to the backup directory.
    pub backup_file: PathBuf,
    #[serde(default)]
    pub target_tables: Option<Vec<String>>,
    #[serde(default)]
    pub drop_existing: bool,
    #[serde(default = "default_true")]
    pub validate_before_restore: bool,
    #[serde(default = "default_true")]
    pub create_backup_before_restore: bool,
}

impl RestoreOptions {
    pub fn new(backup_file: impl Into<PathBuf>) -> Self {
        Self {
            backup_file: backup_file.into(),
            target_tables: None,
            drop_existing: false,
            validate_before_restore: true,
            create_backup_before_restore: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub backup_file: PathBuf,
    pub tables_restored: Vec<String>,
    pub statements_executed: u64,
    pub safety_backup_id: Option<String>,
}

impl<S: Store> BackupManager<S> {
    pub fn resolve_backup_path(&self, file: &Path) -> PathBuf {
        resolve_in_dir(self.backup_dir(), file)
    }

    pub fn validate_backup_file(&self, file: &Path) -> Result<ValidationReport> {
        let path = self.resolve_backup_path(file);
        verification::validate_backup_file(&path, self.encryption_key())
    }

    /// Restores a snapshot: validate, take a safety backup, then replay one transaction per
    /// table section, dropping each target table inside its own transaction first. Any
    /// failure stops the restore.
    pub async fn restore_database(&self, options: RestoreOptions) -> Result<RestoreReport> {
        let path = self.resolve_backup_path(&options.backup_file);
        if let Some(targets) = &options.target_tables {
            for table in targets {
                ensure_identifier("table", table)?;
            }
        }

        let restore_id = format!("restore-{}", Uuid::now_v7());
        let _permit = self.gate().try_acquire(&restore_id)?;
        info!("🔄 Restoring from {}", path.display());

        let result = self.restore_with_permit(&path, &options).await;
        match &result {
            Ok(report) => info!(
                "✅ Restore from {} complete: {} tables, {} statements",
                path.display(),
                report.tables_restored.len(),
                report.statements_executed
            ),
            Err(e) => error!("❌ Restore from {} failed: {}", path.display(), e),
        }
        result
    }

    async fn restore_with_permit(
        &self,
        path: &Path,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        if options.validate_before_restore {
            let report = verification::validate_backup_file(path, self.encryption_key())?;
            if !report.is_valid {
                return Err(DurabilityError::validation(format!(
                    "backup file {} failed validation: {}",
                    path.display(),
                    report.reason.unwrap_or_default()
                )));
            }
        }

        let safety_backup_id = if options.create_backup_before_restore {
            info!("🛡️ Taking a safety backup before restoring");
            let task = self.execute_backup(self.new_task(BackupKind::Full)).await?;
            Some(task.id().to_string())
        } else {
            None
        };

        let units = db_restore::load_units(path, self.encryption_key())?;
        let units = db_restore::select_units(units, options.target_tables.as_deref())?;

        // only an explicit table list may drop tables
        let drop_existing = options.drop_existing && options.target_tables.is_some();
        let statements_executed =
            db_restore::replay_units(self.store(), &units, drop_existing).await?;
        Ok(RestoreReport {
            backup_file: path.to_path_buf(),
            tables_restored: units.iter().filter_map(|u| u.table.clone()).collect(),
            statements_executed,
            safety_backup_id,
        })
    }
}
