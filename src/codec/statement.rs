//! Parameterized statement construction.
//!
//! Every identifier goes through [`quote_ident`] and every value travels as a bound parameter.
//! The dump stream needs literal SQL, which [`Statement::to_literal_sql`] produces by
//! substituting escaped literals for the placeholders.

use super::value::Value;

/// A SQL statement with `?` placeholders and the values bound to them, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Replaces each placeholder outside quoted identifiers and string literals with the
    /// escaped literal of its parameter.
    pub fn to_literal_sql(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut params = self.params.iter();
        let mut in_ident = false;
        let mut in_string = false;

        for ch in self.sql.chars() {
            match ch {
                '"' if !in_string => {
                    in_ident = !in_ident;
                    out.push(ch);
                }
                '\'' if !in_ident => {
                    in_string = !in_string;
                    out.push(ch);
                }
                '?' if !in_ident && !in_string => match params.next() {
                    Some(value) => out.push_str(&value.to_sql_literal()),
                    None => out.push(ch),
                },
                _ => out.push(ch),
            }
        }
        out
    }
}

/// Quotes an identifier for the store, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds statements against one table.
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    table: String,
}

impl StatementBuilder {
    pub fn table(name: impl Into<String>) -> Self {
        Self { table: name.into() }
    }

    fn quoted_table(&self) -> String {
        quote_ident(&self.table)
    }

    fn column_list(columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn insert_with(&self, verb: &str, columns: &[String], values: Vec<Value>) -> Statement {
        let placeholders = vec!["?"; columns.len()].join(", ");
        Statement::with_params(
            format!(
                "{} INTO {} ({}) VALUES ({})",
                verb,
                self.quoted_table(),
                Self::column_list(columns),
                placeholders
            ),
            values,
        )
    }

    /// Plain `INSERT`, as emitted into snapshot streams.
    pub fn insert(&self, columns: &[String], values: Vec<Value>) -> Statement {
        self.insert_with("INSERT", columns, values)
    }

    /// `INSERT OR REPLACE`, keyed on the table's primary key.
    pub fn upsert(&self, columns: &[String], values: Vec<Value>) -> Statement {
        self.insert_with("INSERT OR REPLACE", columns, values)
    }

    /// One page of rows in a stable order. `filter` is a predicate in the store's own
    /// filter language and is wrapped in parentheses as-is.
    pub fn select_page(
        &self,
        columns: &[String],
        filter: Option<&str>,
        order_by_rowid: bool,
        limit: i64,
        offset: i64,
    ) -> Statement {
        let mut sql = format!(
            "SELECT {} FROM {}",
            Self::column_list(columns),
            self.quoted_table()
        );
        if let Some(filter) = filter {
            sql.push_str(&format!(" WHERE ({})", filter));
        }
        sql.push_str(if order_by_rowid {
            " ORDER BY rowid"
        } else {
            " ORDER BY 1"
        });
        sql.push_str(" LIMIT ? OFFSET ?");
        Statement::with_params(sql, vec![Value::Integer(limit), Value::Integer(offset)])
    }

    pub fn count_where(&self, filter: &str) -> Statement {
        Statement::raw(format!(
            "SELECT COUNT(*) AS total FROM {} WHERE ({})",
            self.quoted_table(),
            filter
        ))
    }

    pub fn delete_where(&self, filter: &str) -> Statement {
        Statement::raw(format!(
            "DELETE FROM {} WHERE ({})",
            self.quoted_table(),
            filter
        ))
    }

    pub fn drop_table(&self) -> Statement {
        Statement::raw(format!("DROP TABLE IF EXISTS {}", self.quoted_table()))
    }
}
