// durabilitytool/src/restore/db_restore.rs
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::codec::dump::{RestoreUnit, read_units};
use crate::codec::envelope::read_payload;
use crate::codec::{EncryptionKey, Statement, StatementBuilder};
use crate::errors::{DurabilityError, Result};
use crate::store::Store;

/// Decodes a snapshot file into its restore units.
pub fn load_units(path: &Path, key: Option<&EncryptionKey>) -> Result<Vec<RestoreUnit>> {
    let payload = read_payload(path, key)?;
    let text = String::from_utf8(payload).map_err(|_| {
        DurabilityError::validation(format!("{} is not valid UTF-8 text", path.display()))
    })?;
    Ok(read_units(&text))
}

/// Keeps the units for `targets`, or every unit when no targets are given. Fails when a
/// requested table has no section in the snapshot.
pub fn select_units(units: Vec<RestoreUnit>, targets: Option<&[String]>) -> Result<Vec<RestoreUnit>> {
    let Some(targets) = targets else {
        return Ok(units);
    };

    let present: HashSet<&str> = units.iter().filter_map(|u| u.table.as_deref()).collect();
    let missing: Vec<&str> = targets
        .iter()
        .map(String::as_str)
        .filter(|t| !present.contains(t))
        .collect();
    if !missing.is_empty() {
        return Err(DurabilityError::validation(format!(
            "backup does not contain table(s): {}",
            missing.join(", ")
        )));
    }

    Ok(units
        .into_iter()
        .filter(|u| u.table.as_ref().is_some_and(|t| targets.contains(t)))
        .collect())
}

/// Foreign keys are checked at commit, so a referenced table can be dropped and refilled
/// inside one transaction.
const DEFER_FOREIGN_KEYS: &str = "PRAGMA defer_foreign_keys = ON";

/// Builds the transaction for one unit: the foreign key deferral, the table drop when
/// `drop_existing` is set, then the unit's own statements.
fn unit_transaction(unit: &RestoreUnit, drop_existing: bool) -> Vec<Statement> {
    let mut statements = Vec::with_capacity(unit.statements.len() + 2);
    statements.push(Statement::raw(DEFER_FOREIGN_KEYS));
    if let (true, Some(table)) = (drop_existing, unit.table.as_deref()) {
        statements.push(StatementBuilder::table(table).drop_table());
    }
    statements.extend(unit.statements.iter().map(|sql| Statement::raw(sql.as_str())));
    statements
}

/// Replays each unit in its own transaction, in file order. With `drop_existing` the
/// unit's table is dropped in the same transaction, so a failed replay leaves the old
/// table in place. Returns the number of snapshot statements executed.
pub async fn replay_units<S: Store>(
    store: &S,
    units: &[RestoreUnit],
    drop_existing: bool,
) -> Result<u64> {
    let mut executed = 0u64;
    for unit in units {
        if unit.statements.is_empty() {
            continue;
        }
        store.transaction(&unit_transaction(unit, drop_existing)).await?;
        executed += unit.statements.len() as u64;
        let table = unit.table.as_deref().unwrap_or("preamble");
        if drop_existing && unit.table.is_some() {
            info!("🗑️ Dropped and restored table {}", table);
        }
        debug!("Replayed {} statements for {}", unit.statements.len(), table);
    }
    Ok(executed)
}
