// durabilitytool/src/backup/db_dump.rs
use regex::Regex;
use std::io::Write;
use std::sync::OnceLock;
use tracing::debug;

use crate::codec::dump::{DumpWriter, with_if_not_exists};
use crate::codec::{Statement, StatementBuilder, Value};
use crate::errors::{DurabilityError, Result};
use crate::store::{Row, Store};

/// What the dumper needs to know about one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub ddl: String,
    pub columns: Vec<String>,
    pub without_rowid: bool,
    pub indexes: Vec<String>,
}

fn without_rowid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bWITHOUT\s+ROWID\b").expect("static regex"))
}

/// Lists user tables in creation order, so referenced tables come before the tables
/// that point at them. Catalog tables and virtual tables are left out.
pub async fn list_user_tables<S: Store>(store: &S) -> Result<Vec<TableSchema>> {
    let rows = store
        .query(&Statement::raw(
            r"SELECT name, sql FROM sqlite_master
              WHERE type = 'table'
                AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
                AND sql IS NOT NULL
                AND sql NOT LIKE 'CREATE VIRTUAL%'
              ORDER BY rowid",
        ))
        .await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let (Some(name), Some(ddl)) = (row.get_text("name"), row.get_text("sql")) else {
            continue;
        };
        tables.push(load_schema(store, name, ddl).await?);
    }
    Ok(tables)
}

/// Looks up a single table by name.
pub async fn describe_table<S: Store>(store: &S, table: &str) -> Result<TableSchema> {
    let rows = store
        .query(&Statement::with_params(
            "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            vec![Value::from(table)],
        ))
        .await?;

    let row = rows
        .first()
        .ok_or_else(|| DurabilityError::not_found(format!("table {} does not exist", table)))?;
    let ddl = row.get_text("sql").unwrap_or_default();
    load_schema(store, table, ddl).await
}

async fn load_schema<S: Store>(store: &S, name: &str, ddl: &str) -> Result<TableSchema> {
    let columns = store
        .query(&Statement::with_params(
            "SELECT name FROM pragma_table_info(?) ORDER BY cid",
            vec![Value::from(name)],
        ))
        .await?
        .iter()
        .filter_map(|row| row.get_text("name").map(str::to_string))
        .collect::<Vec<_>>();

    if columns.is_empty() {
        return Err(DurabilityError::validation(format!(
            "table {} has no readable columns",
            name
        )));
    }

    let indexes = store
        .query(&Statement::with_params(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL ORDER BY rowid",
            vec![Value::from(name)],
        ))
        .await?
        .iter()
        .filter_map(|row| row.get_text("sql").map(str::to_string))
        .collect();

    Ok(TableSchema {
        name: name.to_string(),
        ddl: ddl.to_string(),
        columns,
        without_rowid: without_rowid_regex().is_match(ddl),
        indexes,
    })
}

/// Walks a table, optionally filtered, one page of `batch_size` rows at a time.
pub struct RowPager<'a> {
    schema: &'a TableSchema,
    filter: Option<&'a str>,
    batch_size: i64,
    offset: i64,
    done: bool,
}

impl<'a> RowPager<'a> {
    pub fn new(schema: &'a TableSchema, filter: Option<&'a str>, batch_size: u32) -> Self {
        Self {
            schema,
            filter,
            batch_size: i64::from(batch_size.max(1)),
            offset: 0,
            done: false,
        }
    }

    pub async fn next_page<S: Store>(&mut self, store: &S) -> Result<Option<Vec<Row>>> {
        if self.done {
            return Ok(None);
        }
        let statement = StatementBuilder::table(&self.schema.name).select_page(
            &self.schema.columns,
            self.filter,
            !self.schema.without_rowid,
            self.batch_size,
            self.offset,
        );
        let rows = store.query(&statement).await?;

        if (rows.len() as i64) < self.batch_size {
            self.done = true;
        }
        self.offset += self.batch_size;
        if rows.is_empty() { Ok(None) } else { Ok(Some(rows)) }
    }
}

/// Writes one table section: definition, one insert per row, then its indexes.
pub async fn dump_table<S: Store, W: Write>(
    store: &S,
    writer: &mut DumpWriter<W>,
    schema: &TableSchema,
    batch_size: u32,
) -> Result<u64> {
    writer.begin_table(&schema.name)?;
    writer.write_statement(&with_if_not_exists(&schema.ddl))?;

    let builder = StatementBuilder::table(&schema.name);
    let mut pager = RowPager::new(schema, None, batch_size);
    let mut total_rows = 0u64;

    while let Some(rows) = pager.next_page(store).await? {
        for row in rows {
            let insert = builder.insert(&schema.columns, row.into_values());
            writer.write_statement(&insert.to_literal_sql())?;
            total_rows += 1;
        }
    }

    for index in &schema.indexes {
        writer.write_statement(&with_if_not_exists(index))?;
    }

    debug!("Dumped {} rows from table {}", total_rows, schema.name);
    Ok(total_rows)
}
