// durabilitytool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::EncryptionKey;
use crate::errors::DurabilityError;
use crate::task::BackupKind;
use crate::utils::ensure_identifier;

const DEFAULT_DATABASE_URL: &str = "sqlite://blog.db";
const DEFAULT_BACKUP_DIR: &str = "./backups";
const DEFAULT_ARCHIVE_DIR: &str = "./archives";
/// One year.
pub const MAX_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 24 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    pub retention_days: u32,
    pub max_backups: usize,
    pub compression: bool,
    pub compression_level: u32,
    /// 64 hex characters; snapshots are encrypted when set.
    pub encryption_key: Option<String>,
    pub batch_size: u32,
    pub scheduled_kind: BackupKind,
    pub schedule: ScheduleConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            retention_days: 30,
            max_backups: 10,
            compression: true,
            compression_level: 6,
            encryption_key: None,
            batch_size: 500,
            scheduled_kind: BackupKind::Incremental,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl BackupConfig {
    /// The gzip level to write with, or `None` when compression is off.
    pub fn compression_level(&self) -> Option<u32> {
        self.compression.then_some(self.compression_level)
    }

    pub fn encryption_key(&self) -> crate::errors::Result<Option<EncryptionKey>> {
        self.encryption_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(EncryptionKey::from_hex)
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTableConfig {
    pub table: String,
    #[serde(default = "default_date_column")]
    pub date_column: String,
}

fn default_date_column() -> String {
    "created_at".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub archive_dir: PathBuf,
    pub archive_after_days: u32,
    pub retention_days: u32,
    pub batch_size: u32,
    pub compression: bool,
    pub compression_level: u32,
    pub tables: Vec<ArchiveTableConfig>,
    pub schedule: ScheduleConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            archive_after_days: 365,
            retention_days: 3 * 365,
            batch_size: 1000,
            compression: true,
            compression_level: 6,
            tables: Vec::new(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl ArchiveConfig {
    pub fn compression_level(&self) -> Option<u32> {
        self.compression.then_some(self.compression_level)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub backup: BackupConfig,
    pub archive: ArchiveConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            backup: BackupConfig::default(),
            archive: ArchiveConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `config.json`, falling back to defaults when the file does not exist, then
    /// applies environment overrides and validates the result.
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file at {}", config_path.display())
            })?;
            Self::from_json_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            tracing::warn!(
                "Config file {} not found, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.apply_env_overrides();
        config
            .validate()
            .context("Invalid durability configuration")?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// `DATABASE_URL`, `BACKUP_DIR`, `ARCHIVE_DIR` and `BACKUP_ENCRYPTION_KEY` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(dir) = env::var("BACKUP_DIR") {
            self.backup.backup_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("ARCHIVE_DIR") {
            self.archive.archive_dir = PathBuf::from(dir);
        }
        if let Ok(key) = env::var("BACKUP_ENCRYPTION_KEY") {
            self.backup.encryption_key = Some(key);
        }
    }

    pub fn validate(&self) -> crate::errors::Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(DurabilityError::configuration("database_url cannot be empty"));
        }

        let backup = &self.backup;
        if backup.backup_dir.as_os_str().is_empty() {
            return Err(DurabilityError::configuration("backup.backup_dir cannot be empty"));
        }
        if backup.retention_days == 0 {
            return Err(DurabilityError::configuration(
                "backup.retention_days must be at least 1",
            ));
        }
        if backup.max_backups == 0 {
            return Err(DurabilityError::configuration(
                "backup.max_backups must be at least 1",
            ));
        }
        check_common("backup", backup.batch_size, backup.compression_level, &backup.schedule)?;
        backup.encryption_key()?;

        let archive = &self.archive;
        if archive.archive_dir.as_os_str().is_empty() {
            return Err(DurabilityError::configuration("archive.archive_dir cannot be empty"));
        }
        if archive.archive_dir == backup.backup_dir {
            return Err(DurabilityError::configuration(
                "archive.archive_dir and backup.backup_dir must be different directories",
            ));
        }
        if archive.archive_after_days == 0 || archive.retention_days == 0 {
            return Err(DurabilityError::configuration(
                "archive.archive_after_days and archive.retention_days must be at least 1",
            ));
        }
        check_common(
            "archive",
            archive.batch_size,
            archive.compression_level,
            &archive.schedule,
        )?;
        for entry in &archive.tables {
            ensure_identifier("archive table", &entry.table)
                .and_then(|_| ensure_identifier("archive date column", &entry.date_column))
                .map_err(|e| DurabilityError::configuration(e.to_string()))?;
        }
        Ok(())
    }
}

fn check_common(
    section: &str,
    batch_size: u32,
    compression_level: u32,
    schedule: &ScheduleConfig,
) -> crate::errors::Result<()> {
    if batch_size == 0 {
        return Err(DurabilityError::configuration(format!(
            "{}.batch_size must be at least 1",
            section
        )));
    }
    if compression_level > 9 {
        return Err(DurabilityError::configuration(format!(
            "{}.compression_level must be between 0 and 9, got {}",
            section, compression_level
        )));
    }
    if schedule.enabled && schedule.interval_minutes == 0 {
        return Err(DurabilityError::configuration(format!(
            "{}.schedule.interval_minutes must be at least 1 when scheduling is enabled",
            section
        )));
    }
    if schedule.interval_minutes > MAX_INTERVAL_MINUTES {
        return Err(DurabilityError::configuration(format!(
            "{}.schedule.interval_minutes must be at most {}, got {}",
            section, MAX_INTERVAL_MINUTES, schedule.interval_minutes
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() -> anyhow::Result<()> {
        AppConfig::default().validate()?;
        Ok(())
    }

    #[test]
    fn test_partial_json_keeps_defaults() -> anyhow::Result<()> {
        let content = json!({
            "database_url": "sqlite://content.db",
            "backup": { "retention_days": 7, "compression": false },
            "archive": { "tables": [ { "table": "comments" }, { "table": "audit_log", "date_column": "logged_at" } ] }
        })
        .to_string();

        let config = AppConfig::from_json_str(&content)?;
        assert_eq!(config.database_url, "sqlite://content.db");
        assert_eq!(config.backup.retention_days, 7);
        assert_eq!(config.backup.compression_level(), None);
        assert_eq!(config.backup.max_backups, 10);
        assert_eq!(config.archive.tables[0].date_column, "created_at");
        assert_eq!(config.archive.tables[1].date_column, "logged_at");
        assert_eq!(config.archive.compression_level(), Some(6));
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_bad_values_are_configuration_errors() {
        let mut config = AppConfig::default();
        config.backup.retention_days = 0;
        assert!(matches!(config.validate(), Err(DurabilityError::Configuration(_))));

        let mut config = AppConfig::default();
        config.archive.compression_level = 12;
        assert!(matches!(config.validate(), Err(DurabilityError::Configuration(_))));

        let mut config = AppConfig::default();
        config.backup.encryption_key = Some("tooshort".into());
        assert!(matches!(config.validate(), Err(DurabilityError::Configuration(_))));

        let mut config = AppConfig::default();
        config.archive.tables.push(ArchiveTableConfig {
            table: "comments; DROP TABLE users".into(),
            date_column: "created_at".into(),
        });
        assert!(matches!(config.validate(), Err(DurabilityError::Configuration(_))));
    }

    #[test]
    fn test_huge_schedule_interval() {
        let schedule = ScheduleConfig {
            enabled: true,
            interval_minutes: u64::MAX,
        };
        assert_eq!(schedule.interval(), Duration::from_secs(u64::MAX));

        let mut config = AppConfig::default();
        config.archive.schedule = schedule;
        assert!(matches!(config.validate(), Err(DurabilityError::Configuration(_))));

        config.archive.schedule.interval_minutes = MAX_INTERVAL_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AppConfig::load_from_json(&dir.path().join("config.json"))?;
        assert_eq!(config.backup.batch_size, 500);
        Ok(())
    }
}
