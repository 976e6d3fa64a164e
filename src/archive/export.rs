//! Archive files: one JSON document per archive task, optionally gzipped.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::codec::Value;
use crate::codec::envelope::{gzip, read_payload, write_atomically};
use crate::errors::{DurabilityError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFile {
    pub table_name: String,
    pub task_id: String,
    pub condition: String,
    pub exported_at: DateTime<Utc>,
    pub record_count: u64,
    pub columns: Vec<String>,
    pub records: Vec<Vec<Value>>,
}

/// The parts encoded in an archive file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFileName {
    pub table: String,
    pub task_id: String,
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<table>.+)_(?P<ts>\d{14})_(?P<id>[0-9a-f-]{36})\.json(\.gz)?$")
            .expect("static regex")
    })
}

/// `{table}_{YYYYmmddHHMMSS}_{taskId}.json[.gz]`
pub fn archive_file_name(
    table: &str,
    exported_at: DateTime<Utc>,
    task_id: &str,
    compressed: bool,
) -> String {
    format!(
        "{}_{}_{}.json{}",
        table,
        exported_at.format("%Y%m%d%H%M%S"),
        task_id,
        if compressed { ".gz" } else { "" }
    )
}

pub fn parse_archive_file_name(name: &str) -> Option<ArchiveFileName> {
    let caps = name_regex().captures(name)?;
    Some(ArchiveFileName {
        table: caps["table"].to_string(),
        task_id: caps["id"].to_string(),
    })
}

/// Writes the archive into `dir` and returns its path once it is synced and renamed into
/// place.
pub fn write_archive_file(
    dir: &Path,
    archive: &ArchiveFile,
    compression_level: Option<u32>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(archive_file_name(
        &archive.table_name,
        archive.exported_at,
        &archive.task_id,
        compression_level.is_some(),
    ));

    let json = serde_json::to_vec(archive)?;
    let data = match compression_level {
        Some(level) => gzip(&json, level)?,
        None => json,
    };
    write_atomically(dir, &path, &data)?;
    Ok(path)
}

pub fn read_archive_file(path: &Path) -> Result<ArchiveFile> {
    if !path.is_file() {
        return Err(DurabilityError::not_found(format!(
            "archive file {}",
            path.display()
        )));
    }
    let payload = read_payload(path, None)?;
    serde_json::from_slice(&payload).map_err(|e| {
        DurabilityError::validation(format!(
            "archive file {} is not a valid archive: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    const TASK_ID: &str = "01928c4e-7a1b-7c3d-9e8f-0123456789ab";

    #[test]
    fn test_file_name_convention() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let name = archive_file_name("page_views", at, TASK_ID, true);
        assert_eq!(name, format!("page_views_20260102030405_{}.json.gz", TASK_ID));

        let parsed = parse_archive_file_name(&name).expect("parses");
        assert_eq!(parsed.table, "page_views");
        assert_eq!(parsed.task_id, TASK_ID);

        assert!(parse_archive_file_name("backup_history.json").is_none());
        assert!(parse_archive_file_name("notes.txt").is_none());
    }

    #[test]
    fn test_written_archive_reads_back() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let archive = ArchiveFile {
            table_name: "comments".to_string(),
            task_id: TASK_ID.to_string(),
            condition: "created_at < '2020-01-01 00:00:00'".to_string(),
            exported_at: Utc::now(),
            record_count: 2,
            columns: vec!["id".to_string(), "body".to_string(), "score".to_string()],
            records: vec![
                vec![Value::Integer(1), Value::from("hi"), Value::Real(2.0)],
                vec![Value::Integer(2), Value::Null, Value::Blob(vec![1, 2])],
            ],
        };

        let path = write_archive_file(dir.path(), &archive, Some(6))?;
        assert!(path.to_string_lossy().ends_with(".json.gz"));
        assert_eq!(read_archive_file(&path)?, archive);
        Ok(())
    }

    #[test]
    fn test_garbage_is_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(format!("comments_20260101000000_{}.json", TASK_ID));
        fs::write(&path, b"[1, 2, 3]")?;
        assert!(matches!(read_archive_file(&path), Err(DurabilityError::Validation(_))));
        Ok(())
    }
}
