use anyhow::{Context, Result};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::data_models::{CrawledPage, Field, Keyword, Page};
use crate::error::RelayError;

/// SQLite VM instructions between two deadline checks on a reader connection.
const DEADLINE_CHECK_OPS: i32 = 1000;

/// Extra time the async guard in `timed` waits for SQLite to interrupt itself.
const INTERRUPT_GRACE: Duration = Duration::from_millis(250);

/// Extended result code of `SQLITE_INTERRUPT`.
const SQLITE_INTERRUPT: &str = "9";

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS pages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL UNIQUE,
        title TEXT,
        content TEXT,
        last_modified TEXT,
        size INTEGER,
        crawled_at TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_url TEXT NOT NULL,
        child_url TEXT NOT NULL,
        UNIQUE(parent_url, child_url)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS words (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        word TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS body_keywords (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        page_id INTEGER NOT NULL REFERENCES pages(id),
        word_id INTEGER NOT NULL REFERENCES words(id),
        frequency INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS title_keywords (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        page_id INTEGER NOT NULL REFERENCES pages(id),
        word_id INTEGER NOT NULL REFERENCES words(id),
        frequency INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS body_positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        page_id INTEGER NOT NULL REFERENCES pages(id),
        word_id INTEGER NOT NULL REFERENCES words(id),
        position INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS title_positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        page_id INTEGER NOT NULL REFERENCES pages(id),
        word_id INTEGER NOT NULL REFERENCES words(id),
        position INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_links_parent ON links(parent_url)",
    "CREATE INDEX IF NOT EXISTS idx_links_child ON links(child_url)",
    "CREATE INDEX IF NOT EXISTS idx_body_keywords_page ON body_keywords(page_id)",
    "CREATE INDEX IF NOT EXISTS idx_title_keywords_page ON title_keywords(page_id)",
    "CREATE INDEX IF NOT EXISTS idx_body_positions_lookup ON body_positions(page_id, word_id)",
    "CREATE INDEX IF NOT EXISTS idx_title_positions_lookup ON title_positions(page_id, word_id)",
];

/// Owns the connection pools to the data store.
///
/// `writer` is a single-connection pool used by the indexer and for schema
/// setup. `reader` is opened read-only and serves every relay and search
/// request, so nothing reaching the HTTP surface can modify the store.
#[derive(Debug, Clone)]
pub struct Database {
    writer: SqlitePool,
    reader: SqlitePool,
    query_timeout: Duration,
}

impl Database {
    /// Opens (creating if needed) the database file and ensures the schema exists.
    pub async fn open(path: &Path, max_connections: u32, query_timeout: Duration) -> Result<Self> {
        let writer_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(query_timeout)
            .connect_with(writer_options)
            .await
            .with_context(|| format!("failed to open database {}", path.display()))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&writer)
                .await
                .context("failed to create schema")?;
        }

        let reader_options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(Duration::from_secs(5));

        let reader = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(query_timeout)
            .connect_with(reader_options)
            .await
            .with_context(|| format!("failed to open read-only pool on {}", path.display()))?;

        log::info!(
            "Connected to SQLite database: {} ({} reader connections)",
            path.display(),
            max_connections.max(1)
        );

        Ok(Self {
            writer,
            reader,
            query_timeout,
        })
    }

    /// Create a Database instance using the loaded configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(&config.db_path, config.max_connections, config.query_timeout).await
    }

    pub fn writer(&self) -> &SqlitePool {
        &self.writer
    }

    pub fn reader(&self) -> &SqlitePool {
        &self.reader
    }

    /// Checks out a reader connection whose statements abort once the
    /// per-query deadline has passed.
    ///
    /// The deadline is enforced by a SQLite progress handler, so a runaway
    /// statement stops inside the engine and the connection goes back to the
    /// pool. The handler is replaced on every checkout.
    pub async fn acquire_reader(&self) -> Result<PoolConnection<Sqlite>, RelayError> {
        let mut conn = self.reader.acquire().await?;
        let deadline = Instant::now() + self.query_timeout;
        conn.lock_handle()
            .await?
            .set_progress_handler(DEADLINE_CHECK_OPS, move || Instant::now() < deadline);
        Ok(conn)
    }

    /// Runs a store future under the configured per-query deadline.
    ///
    /// Statements on a connection from `acquire_reader` are interrupted by
    /// SQLite itself; the async timeout only catches a future that never
    /// reaches the engine.
    pub async fn timed<T, F>(&self, fut: F) -> Result<T, RelayError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout + INTERRUPT_GRACE, fut).await {
            Ok(Err(err)) if is_interrupted(&err) => Err(RelayError::Timeout(self.query_timeout)),
            Ok(res) => res.map_err(RelayError::from),
            Err(_) => Err(RelayError::Timeout(self.query_timeout)),
        }
    }

    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

fn is_interrupted(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(SQLITE_INTERRUPT) || db_err.message() == "interrupted"
        }
        _ => false,
    }
}

/// Positions of every term in one field, keyed by term.
pub type TermPositions = BTreeMap<String, Vec<usize>>;

/// Page-centric reads and writes over the index tables.
#[derive(Debug, Clone)]
pub struct PageRepo {
    db: Database,
}

impl PageRepo {
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    /// Writes a page and its index entries in one transaction.
    ///
    /// An existing row with the same url keeps its id; its keywords,
    /// positions and outgoing links are replaced.
    pub async fn store_indexed_page(
        &self,
        page: &CrawledPage,
        crawled_at: &str,
        fields: &[(Field, &TermPositions)],
    ) -> Result<i64> {
        let mut tx = self
            .db
            .writer()
            .begin()
            .await
            .context("failed to begin transaction")?;

        let page_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO pages (url, title, content, last_modified, size, crawled_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(url) DO UPDATE SET
                   title = excluded.title,
                   content = excluded.content,
                   last_modified = excluded.last_modified,
                   size = excluded.size,
                   crawled_at = excluded.crawled_at
               RETURNING id"#,
        )
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.content)
        .bind(&page.last_modified)
        .bind(page.size)
        .bind(crawled_at)
        .fetch_one(&mut *tx)
        .await
        .context("failed to upsert page")?;

        clear_page_entries(&mut tx, page_id, &page.url).await?;

        let mut word_ids: HashMap<String, i64> = HashMap::new();
        for (field, terms) in fields {
            for (term, positions) in terms.iter() {
                let word_id = match word_ids.get(term) {
                    Some(id) => *id,
                    None => {
                        let id = get_or_create_word(&mut tx, term).await?;
                        word_ids.insert(term.clone(), id);
                        id
                    }
                };

                sqlx::query(&format!(
                    "INSERT INTO {} (page_id, word_id, frequency) VALUES (?, ?, ?)",
                    field.keywords_table()
                ))
                .bind(page_id)
                .bind(word_id)
                .bind(positions.len() as i64)
                .execute(&mut *tx)
                .await
                .context("failed to insert keyword")?;

                let insert_position = format!(
                    "INSERT INTO {} (page_id, word_id, position) VALUES (?, ?, ?)",
                    field.positions_table()
                );
                for pos in positions {
                    sqlx::query(&insert_position)
                        .bind(page_id)
                        .bind(word_id)
                        .bind(*pos as i64)
                        .execute(&mut *tx)
                        .await
                        .context("failed to insert position")?;
                }
            }
        }

        for child in &page.outgoing_links {
            sqlx::query("INSERT OR IGNORE INTO links (parent_url, child_url) VALUES (?, ?)")
                .bind(&page.url)
                .bind(child)
                .execute(&mut *tx)
                .await
                .context("failed to insert link")?;
        }

        tx.commit().await.context("failed to commit page")?;
        Ok(page_id)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Page>, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(
                sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *conn),
            )
            .await
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<Page>, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(
                sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE url = ?")
                    .bind(url)
                    .fetch_optional(&mut *conn),
            )
            .await
    }

    pub async fn count(&self) -> Result<i64, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(sqlx::query_scalar("SELECT COUNT(*) FROM pages").fetch_one(&mut *conn))
            .await
    }

    /// Most frequent body keywords of a page, highest frequency first.
    pub async fn top_keywords(&self, page_id: i64, limit: i64) -> Result<Vec<Keyword>, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(
                sqlx::query_as::<_, Keyword>(
                    r#"SELECT w.word AS word, k.frequency AS frequency
                       FROM body_keywords k
                       JOIN words w ON w.id = k.word_id
                       WHERE k.page_id = ?
                       ORDER BY k.frequency DESC, w.word ASC
                       LIMIT ?"#,
                )
                .bind(page_id)
                .bind(limit)
                .fetch_all(&mut *conn),
            )
            .await
    }

    /// Pages that link to `url`.
    pub async fn parent_links(&self, url: &str) -> Result<Vec<String>, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(
                sqlx::query_scalar("SELECT parent_url FROM links WHERE child_url = ? ORDER BY id")
                    .bind(url)
                    .fetch_all(&mut *conn),
            )
            .await
    }

    /// Links found on the page at `url`.
    pub async fn child_links(&self, url: &str) -> Result<Vec<String>, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(
                sqlx::query_scalar("SELECT child_url FROM links WHERE parent_url = ? ORDER BY id")
                    .bind(url)
                    .fetch_all(&mut *conn),
            )
            .await
    }

    /// `(page_id, word, frequency)` for every keyword row of a field.
    pub async fn term_frequencies(&self, field: Field) -> Result<Vec<(i64, String, i64)>, RelayError> {
        let sql = format!(
            "SELECT k.page_id, w.word, k.frequency FROM {} k JOIN words w ON w.id = k.word_id",
            field.keywords_table()
        );
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(sqlx::query_as(&sql).fetch_all(&mut *conn))
            .await
    }

    pub async fn page_ids(&self) -> Result<Vec<i64>, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(sqlx::query_scalar("SELECT id FROM pages ORDER BY id").fetch_all(&mut *conn))
            .await
    }

    /// Sorted positions of `word` in one field of a page.
    pub async fn positions(
        &self,
        field: Field,
        page_id: i64,
        word: &str,
    ) -> Result<Vec<i64>, RelayError> {
        let sql = format!(
            r#"SELECT p.position FROM {} p
               JOIN words w ON w.id = p.word_id
               WHERE p.page_id = ? AND w.word = ?
               ORDER BY p.position"#,
            field.positions_table()
        );
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(
                sqlx::query_scalar(&sql)
                    .bind(page_id)
                    .bind(word)
                    .fetch_all(&mut *conn),
            )
            .await
    }
}

async fn clear_page_entries(
    tx: &mut Transaction<'_, Sqlite>,
    page_id: i64,
    url: &str,
) -> Result<()> {
    for field in Field::ALL {
        for table in [field.keywords_table(), field.positions_table()] {
            sqlx::query(&format!("DELETE FROM {table} WHERE page_id = ?"))
                .bind(page_id)
                .execute(&mut **tx)
                .await
                .with_context(|| format!("failed to clear {table}"))?;
        }
    }
    sqlx::query("DELETE FROM links WHERE parent_url = ?")
        .bind(url)
        .execute(&mut **tx)
        .await
        .context("failed to clear outgoing links")?;
    Ok(())
}

async fn get_or_create_word(conn: &mut SqliteConnection, word: &str) -> Result<i64> {
    sqlx::query("INSERT INTO words (word) VALUES (?) ON CONFLICT(word) DO NOTHING")
        .bind(word)
        .execute(&mut *conn)
        .await
        .context("failed to insert word")?;

    sqlx::query_scalar("SELECT id FROM words WHERE word = ?")
        .bind(word)
        .fetch_one(&mut *conn)
        .await
        .context("failed to look up word id")
}

// =============================================================================
// Test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use tempfile::TempDir;

    /// Opens a fresh database inside a temp dir. Keep the dir alive for the test's duration.
    pub async fn create_test_db() -> Result<(Database, TempDir)> {
        let dir = tempfile::tempdir()?;
        let db = Database::open(&dir.path().join("spider.db"), 4, Duration::from_secs(5)).await?;
        Ok((db, dir))
    }

    pub fn terms(pairs: &[(&str, &[usize])]) -> TermPositions {
        pairs
            .iter()
            .map(|(term, positions)| (term.to_string(), positions.to_vec()))
            .collect()
    }
}
