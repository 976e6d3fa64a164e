//! Persistence of task history files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::codec::envelope::write_atomically;
use crate::errors::{DurabilityError, Result};

/// Reads a history file, returning the default value when none exists yet.
pub fn load_history<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read(path)?;
    serde_json::from_slice(&content).map_err(|e| {
        DurabilityError::validation(format!(
            "history file {} is corrupt: {}",
            path.display(),
            e
        ))
    })
}

/// Replaces the history file atomically.
pub fn save_history<T: Serialize>(path: &Path, history: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(history)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    write_atomically(dir, path, &content)
}
