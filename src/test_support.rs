//! Fixtures shared by the unit tests: a file-backed store seeded with a small blog.

use std::path::Path;

use crate::codec::Statement;
use crate::errors::Result;
use crate::store::{SqliteStore, Store};

pub const BLOG_SCHEMA: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE articles (
        id INTEGER PRIMARY KEY,
        author_id INTEGER NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        body TEXT,
        rating REAL,
        cover BLOB,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX idx_articles_author ON articles(author_id)",
    "CREATE TABLE comments (
        id INTEGER PRIMARY KEY,
        article_id INTEGER NOT NULL REFERENCES articles(id),
        body TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
];

const BLOG_ROWS: &[&str] = &[
    "INSERT INTO users (id, username) VALUES (1, 'ada'), (2, 'linus')",
    "INSERT INTO articles (id, author_id, title, body, rating, cover) VALUES
        (1, 1, 'It''s alive', 'first; post', 4.5, X'CAFE'),
        (2, 2, 'Second', NULL, NULL, NULL),
        (3, 1, 'Third', '-- not a comment', 0.1, NULL)",
    "INSERT INTO comments (id, article_id, body, created_at) VALUES
        (1, 1, 'old one', '2019-05-01 10:00:00'),
        (2, 1, 'old two', '2019-06-01 10:00:00'),
        (3, 2, 'old three', '2020-01-15 08:30:00')",
    "INSERT INTO comments (id, article_id, body) VALUES
        (4, 2, 'fresh'),
        (5, 3, 'fresher')",
];

pub async fn open_store(dir: &Path) -> Result<SqliteStore> {
    SqliteStore::open(&dir.join("blog.db")).await
}

pub async fn seed_blog<S: Store>(store: &S) -> Result<()> {
    let statements: Vec<Statement> = BLOG_SCHEMA
        .iter()
        .chain(BLOG_ROWS)
        .map(|sql| Statement::raw(*sql))
        .collect();
    store.transaction(&statements).await?;
    Ok(())
}

pub async fn count_rows<S: Store>(store: &S, table: &str) -> Result<i64> {
    let rows = store
        .query(&Statement::raw(format!("SELECT COUNT(*) AS total FROM {}", table)))
        .await?;
    Ok(rows.first().and_then(|r| r.get_i64("total")).unwrap_or(0))
}
