use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use super::{Row, Store};
use crate::codec::{Statement, Value};
use crate::errors::{DurabilityError, Result};

/// The embedded store, reached through a sqlx connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to a `sqlite://` URL, creating the database file when missing.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DurabilityError::store(format!("connect {}", database_url), e))?
            .create_if_missing(true);
        Self::connect_with(options, database_url).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options, &path.display().to_string()).await
    }

    async fn connect_with(options: SqliteConnectOptions, label: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| DurabilityError::store(format!("connect {}", label), e))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Blob(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Decodes a column by the storage class of the value actually stored, not the declared type.
fn decode_value(row: &SqliteRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_string();

    Ok(match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get::<i64, _>(index)?),
        "REAL" => Value::Real(row.try_get::<f64, _>(index)?),
        "BLOB" => Value::Blob(row.try_get::<Vec<u8>, _>(index)?),
        _ => Value::Text(row.try_get::<String, _>(index)?),
    })
}

fn decode_rows(rows: Vec<SqliteRow>) -> std::result::Result<Vec<Row>, sqlx::Error> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    rows.iter()
        .map(|row| {
            let values = (0..row.len())
                .map(|i| decode_value(row, i))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Row::new(columns.clone(), values))
        })
        .collect()
}

impl Store for SqliteStore {
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let rows = bind_values(sqlx::query(statement.sql()), statement.params())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DurabilityError::store(statement.sql(), e))?;
        decode_rows(rows).map_err(|e| DurabilityError::store(statement.sql(), e))
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let result = bind_values(sqlx::query(statement.sql()), statement.params())
            .execute(&self.pool)
            .await
            .map_err(|e| DurabilityError::store(statement.sql(), e))?;
        Ok(result.rows_affected())
    }

    async fn transaction(&self, statements: &[Statement]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DurabilityError::store("BEGIN", e))?;

        let mut changes = 0;
        for statement in statements {
            let result = bind_values(sqlx::query(statement.sql()), statement.params())
                .execute(&mut *tx)
                .await
                .map_err(|e| DurabilityError::store(statement.sql(), e))?;
            changes += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DurabilityError::store("COMMIT", e))?;
        Ok(changes)
    }
}
