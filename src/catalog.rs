use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

use crate::data_models::{ColumnDescriptor, TableDescriptor};
use crate::db::Database;
use crate::error::RelayError;

const READ_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "EXPLAIN"];

/// Introspection and read-only passthrough over the data store.
///
/// Table names coming from a request are only used after they matched a
/// name read from `sqlite_master` in the same call.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>, RelayError> {
        let mut conn = self.db.acquire_reader().await?;
        self.db
            .timed(
                sqlx::query_as::<_, TableDescriptor>(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .fetch_all(&mut *conn),
            )
            .await
    }

    /// Returns the catalog's spelling of `name`, or `InjectionRejected`.
    pub async fn ensure_known_table(&self, name: &str) -> Result<String, RelayError> {
        self.list_tables()
            .await?
            .into_iter()
            .find(|t| t.name == name)
            .map(|t| t.name)
            .ok_or_else(|| RelayError::InjectionRejected(name.to_string()))
    }

    pub async fn table_rows(&self, name: &str) -> Result<Vec<Value>, RelayError> {
        self.select_rows(name, None).await
    }

    /// At most `limit` rows, in storage order.
    pub async fn sample_rows(&self, name: &str, limit: i64) -> Result<Vec<Value>, RelayError> {
        self.select_rows(name, Some(limit)).await
    }

    async fn select_rows(&self, name: &str, limit: Option<i64>) -> Result<Vec<Value>, RelayError> {
        let table = self.ensure_known_table(name).await?;
        let mut sql = format!("SELECT * FROM {}", quote_identifier(&table));
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }
        let query = sqlx::query(&sql);
        let query = match limit {
            Some(limit) => query.bind(limit),
            None => query,
        };
        let mut conn = self.db.acquire_reader().await?;
        let rows = self.db.timed(query.fetch_all(&mut *conn)).await?;
        rows.iter().map(row_to_json).collect()
    }

    pub async fn table_schema(&self, name: &str) -> Result<Vec<ColumnDescriptor>, RelayError> {
        let table = self.ensure_known_table(name).await?;
        let mut conn = self.db.acquire_reader().await?;
        let rows: Vec<(i64, String, String, i64, Option<String>, i64)> = self
            .db
            .timed(
                sqlx::query_as(
                    r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
                )
                .bind(&table)
                .fetch_all(&mut *conn),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|(cid, name, data_type, notnull, dflt_value, pk)| ColumnDescriptor {
                cid,
                name,
                data_type,
                notnull: notnull != 0,
                dflt_value,
                pk: pk != 0,
            })
            .collect())
    }

    /// Runs one read statement with positional JSON parameters.
    pub async fn run_read_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, RelayError> {
        let statement = ensure_read_only(sql)?;
        let mut query = sqlx::query(statement);
        for param in params {
            query = bind_json(query, param);
        }

        let mut conn = self.db.acquire_reader().await?;
        let rows = self
            .db
            .timed(query.fetch_all(&mut *conn))
            .await
            .map_err(|err| match err {
                RelayError::QueryExecution(msg) if msg.contains("readonly") => {
                    RelayError::ReadOnlyViolation(msg)
                }
                other => other,
            })?;
        rows.iter().map(row_to_json).collect()
    }
}

/// Accepts a single `SELECT`/`WITH`/`VALUES`/`EXPLAIN` statement and returns
/// it without the trailing semicolon.
///
/// Leading `--` and `/* */` comments are skipped when reading the keyword.
/// Any other `;` is rejected, including one inside a string literal or comment.
pub fn ensure_read_only(sql: &str) -> Result<&str, RelayError> {
    let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let body = skip_leading_comments(statement);
    if body.is_empty() {
        return Err(RelayError::Validation("Query is required".to_string()));
    }
    if statement.contains(';') {
        return Err(RelayError::ReadOnlyViolation(
            "multiple statements are not allowed".to_string(),
        ));
    }

    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    if !READ_KEYWORDS.contains(&keyword.as_str()) {
        return Err(RelayError::ReadOnlyViolation(format!(
            "{} statements are not allowed",
            if keyword.is_empty() { "these" } else { keyword.as_str() }
        )));
    }
    Ok(statement)
}

fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(line) = rest.strip_prefix("--") {
            rest = line.find('\n').map_or("", |end| &line[end + 1..]).trim_start();
        } else if let Some(block) = rest.strip_prefix("/*") {
            // an unterminated block comment runs to the end of input
            rest = block.find("*/").map_or("", |end| &block[end + 2..]).trim_start();
        } else {
            return rest;
        }
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_json<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Maps a row to a JSON object keyed by column name, in column order.
pub fn row_to_json(row: &SqliteRow) -> Result<Value, RelayError> {
    let mut object = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Value::from(row.try_get_unchecked::<f64, _>(idx)?),
                "BLOB" => Value::from(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
                _ => Value::from(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}
