pub mod setting;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::errors::{DurabilityError, Result};

/// Timestamp format the blog tables use for their date columns (`CURRENT_TIMESTAMP`).
pub const STORE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("static regex"))
}

pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

/// Rejects table/column names that are not plain identifiers.
pub fn ensure_identifier(kind: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DurabilityError::validation(format!(
            "invalid {} name: {:?}",
            kind, name
        )))
    }
}

pub fn format_store_datetime(at: DateTime<Utc>) -> String {
    at.format(STORE_DATETIME_FORMAT).to_string()
}

/// `file` as given when absolute or present, otherwise joined onto `dir`.
pub fn resolve_in_dir(dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() || file.exists() {
        file.to_path_buf()
    } else {
        dir.join(file)
    }
}
