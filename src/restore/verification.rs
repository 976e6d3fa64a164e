// durabilitytool/src/restore/verification.rs
use serde::Serialize;
use sqlparser::ast::Statement as SqlStatement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::path::Path;
use tracing::debug;

use crate::codec::EncryptionKey;
use crate::codec::dump::read_units;
use crate::codec::envelope::read_payload;
use crate::errors::{DurabilityError, Result};

/// Outcome of a structural check of a snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub statement_count: usize,
    pub schema_statements: usize,
    pub insert_statements: usize,
    pub tables: Vec<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementClass {
    Schema,
    Insert,
    Other,
}

fn classify(sql: &str) -> StatementClass {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(parsed) => match parsed.first() {
            Some(SqlStatement::CreateTable { .. }) | Some(SqlStatement::CreateIndex { .. }) => {
                StatementClass::Schema
            }
            Some(SqlStatement::Insert { .. }) => StatementClass::Insert,
            _ => StatementClass::Other,
        },
        Err(e) => {
            debug!("Statement not recognised by the parser: {}", e);
            StatementClass::Other
        }
    }
}

/// Checks decoded snapshot text: it must hold at least one table definition or insert.
pub fn inspect_snapshot(text: &str) -> ValidationReport {
    let units = read_units(text);
    let tables: Vec<String> = units.iter().filter_map(|u| u.table.clone()).collect();

    let mut report = ValidationReport {
        is_valid: false,
        statement_count: 0,
        schema_statements: 0,
        insert_statements: 0,
        tables,
        reason: None,
    };

    for statement in units.iter().flat_map(|u| u.statements.iter()) {
        report.statement_count += 1;
        match classify(statement) {
            StatementClass::Schema => report.schema_statements += 1,
            StatementClass::Insert => report.insert_statements += 1,
            StatementClass::Other => {}
        }
    }

    if text.trim().is_empty() {
        report.reason = Some("backup file is empty".to_string());
    } else if report.schema_statements + report.insert_statements == 0 {
        report.reason = Some("no table definition or insert statement found".to_string());
    } else {
        report.is_valid = true;
    }
    report
}

/// Reads, decrypts and decompresses a snapshot file, then inspects it.
pub fn validate_backup_file(path: &Path, key: Option<&EncryptionKey>) -> Result<ValidationReport> {
    if !path.is_file() {
        return Err(DurabilityError::not_found(format!(
            "backup file {}",
            path.display()
        )));
    }
    let payload = read_payload(path, key)?;
    let text = String::from_utf8(payload).map_err(|_| {
        DurabilityError::validation(format!("{} is not valid UTF-8 text", path.display()))
    })?;
    Ok(inspect_snapshot(&text))
}
