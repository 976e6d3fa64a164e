//! The textual snapshot stream.
//!
//! Layout:
//!
//! ```text
//! -- durabilitytool snapshot
//! -- Kind: full
//! -- Created: 2026-10-16T12:00:00Z
//!
//! -- Table: "articles"
//! CREATE TABLE IF NOT EXISTS "articles" (...);
//! INSERT INTO "articles" ("id", "title") VALUES (1, 'Hello');
//! CREATE INDEX IF NOT EXISTS ...;
//! ```
//!
//! A `-- Table:` marker opens a restore unit; everything up to the next marker belongs to it.

use regex::Regex;
use std::io::{self, Write};
use std::sync::OnceLock;

use super::statement::quote_ident;

pub const STREAM_BANNER: &str = "-- durabilitytool snapshot";
const TABLE_MARKER: &str = "-- Table: ";

/// Writes a snapshot stream statement by statement.
pub struct DumpWriter<W: Write> {
    inner: W,
    statements: u64,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            statements: 0,
        }
    }

    pub fn write_header(&mut self, fields: &[(&str, String)]) -> io::Result<()> {
        writeln!(self.inner, "{}", STREAM_BANNER)?;
        for (key, value) in fields {
            writeln!(self.inner, "-- {}: {}", key, value)?;
        }
        Ok(())
    }

    pub fn begin_table(&mut self, table: &str) -> io::Result<()> {
        writeln!(self.inner, "\n{}{}", TABLE_MARKER, quote_ident(table))
    }

    pub fn write_statement(&mut self, sql: &str) -> io::Result<()> {
        writeln!(self.inner, "{};", sql.trim_end().trim_end_matches(';'))?;
        self.statements += 1;
        Ok(())
    }

    pub fn statements_written(&self) -> u64 {
        self.statements
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// The statements belonging to one table section of a stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreUnit {
    /// `None` for statements that appear before the first table marker.
    pub table: Option<String>,
    pub statements: Vec<String>,
}

/// Splits a stream into restore units, honouring quotes and comments.
pub fn read_units(text: &str) -> Vec<RestoreUnit> {
    let mut units: Vec<RestoreUnit> = Vec::new();
    let mut current = RestoreUnit::default();
    let mut buf = String::new();

    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            buf.push(ch);
            if ch == q {
                // a doubled quote is an escaped quote and keeps us inside the literal
                if chars.peek() == Some(&q) {
                    buf.push(q);
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                buf.push(ch);
            }
            '[' => {
                quote = Some(']');
                buf.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                let mut comment = String::from("-");
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                    comment.push(c);
                }
                if buf.trim().is_empty() {
                    if let Some(name) = comment.strip_prefix(TABLE_MARKER) {
                        if !current.statements.is_empty() || current.table.is_some() {
                            units.push(std::mem::take(&mut current));
                        }
                        current.table = Some(unquote_ident(name.trim()));
                    }
                } else {
                    buf.push('\n');
                }
            }
            ';' => {
                let stmt = buf.trim();
                if !stmt.is_empty() {
                    current.statements.push(stmt.to_string());
                }
                buf.clear();
            }
            _ => buf.push(ch),
        }
    }

    let tail = buf.trim();
    if !tail.is_empty() {
        current.statements.push(tail.to_string());
    }
    if !current.statements.is_empty() || current.table.is_some() {
        units.push(current);
    }
    units
}

/// Flattens a stream into its statements, in order.
pub fn split_statements(text: &str) -> Vec<String> {
    read_units(text)
        .into_iter()
        .flat_map(|unit| unit.statements)
        .collect()
}

fn unquote_ident(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => raw.to_string(),
    }
}

fn create_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*CREATE\s+(UNIQUE\s+)?(TABLE|INDEX)\s+(IF\s+NOT\s+EXISTS\s+)?")
            .expect("static regex")
    })
}

/// Rewrites `CREATE TABLE`/`CREATE [UNIQUE] INDEX` into their `IF NOT EXISTS` form so a
/// snapshot can be replayed over a partially present schema.
pub fn with_if_not_exists(ddl: &str) -> String {
    let re = create_regex();
    match re.captures(ddl) {
        Some(caps) => {
            let unique = caps.get(1).map(|_| "UNIQUE ").unwrap_or("");
            let kind = caps.get(2).map(|m| m.as_str().to_uppercase()).unwrap_or_default();
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            format!("CREATE {}{} IF NOT EXISTS {}", unique, kind, &ddl[end..])
        }
        None => ddl.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_quotes_and_comments() {
        let text = "-- header; not a statement\n\
                    INSERT INTO t VALUES ('a;b', 'it''s; fine');\n\
                    INSERT INTO \"x;y\" VALUES (1); -- trailing; comment\n\
                    CREATE TABLE z (a TEXT DEFAULT ';');";
        let statements = split_statements(text);
        assert_eq!(
            statements,
            vec![
                "INSERT INTO t VALUES ('a;b', 'it''s; fine')".to_string(),
                "INSERT INTO \"x;y\" VALUES (1)".to_string(),
                "CREATE TABLE z (a TEXT DEFAULT ';')".to_string(),
            ]
        );
    }

    #[test]
    fn test_units_follow_table_markers() -> anyhow::Result<()> {
        let mut writer = DumpWriter::new(Vec::new());
        writer.write_header(&[("Kind", "full".to_string())])?;
        writer.begin_table("users")?;
        writer.write_statement("CREATE TABLE IF NOT EXISTS \"users\" (id INTEGER PRIMARY KEY)")?;
        writer.write_statement("INSERT INTO \"users\" (\"id\") VALUES (1)")?;
        writer.begin_table("post \"drafts\"")?;
        writer.write_statement("CREATE TABLE IF NOT EXISTS \"post \"\"drafts\"\"\" (id INTEGER)")?;
        assert_eq!(writer.statements_written(), 3);

        let text = String::from_utf8(writer.into_inner()?)?;
        let units = read_units(&text);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].table.as_deref(), Some("users"));
        assert_eq!(units[0].statements.len(), 2);
        assert_eq!(units[1].table.as_deref(), Some("post \"drafts\""));
        assert_eq!(units[1].statements.len(), 1);
        Ok(())
    }

    #[test]
    fn test_with_if_not_exists() {
        assert_eq!(
            with_if_not_exists("CREATE TABLE articles (id INTEGER)"),
            "CREATE TABLE IF NOT EXISTS articles (id INTEGER)"
        );
        assert_eq!(
            with_if_not_exists("create unique index idx_slug on articles(slug)"),
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_slug on articles(slug)"
        );
        assert_eq!(
            with_if_not_exists("CREATE TABLE IF NOT EXISTS \"t\" (a)"),
            "CREATE TABLE IF NOT EXISTS \"t\" (a)"
        );
    }
}
