use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Create a new SQLite backend with connection pool
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // every connection to an in-memory database opens its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        tracing::debug!(url = url, max_connections, "connected sqlite backend");

        Ok(Self { pool })
    }

    /// Create an in-memory SQLite database
    pub async fn memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Create a file-based SQLite database
    pub async fn file(path: &str) -> Result<Self> {
        Self::new(&format!("sqlite://{}", path)).await
    }

    fn bind<'q>(sql: &'q str, params: &[Value]) -> SqliteQuery<'q> {
        params.iter().fold(sqlx::query(sql), |query, value| match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        })
    }

    /// Convert SQLite row to QueryRow using the storage class of each value
    fn convert_row(row: &SqliteRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let idx = column.ordinal();
            let value = match row.try_get_raw(idx) {
                Ok(raw) if raw.is_null() => Value::Null,
                Ok(raw) => {
                    let type_name = raw.type_info().name().to_string();
                    match type_name.as_str() {
                        "INTEGER" => row
                            .try_get_unchecked::<i64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get_unchecked::<f64, _>(idx)
                            .ok()
                            .and_then(serde_json::Number::from_f64)
                            .map(Value::Number)
                            .unwrap_or(Value::Null),
                        "BLOB" => row
                            .try_get_unchecked::<Vec<u8>, _>(idx)
                            .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get_unchecked::<String, _>(idx)
                            .map(Value::String)
                            .unwrap_or(Value::Null),
                    }
                }
                Err(_) => Value::Null,
            };
            query_row.insert(column.name().to_string(), value);
        }

        query_row
    }

    /// Get list of all tables
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await?;

        let tables = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tables)
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn connect(url: &str) -> Result<Self> {
        Self::new(url).await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let result = Self::bind(sql, params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::trace!(sql = sql, parameters = params.len(), "fetching");
        let rows = Self::bind(sql, params).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(Self::convert_row).collect())
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_memory() {
        let backend = SqliteBackend::memory().await;
        assert!(backend.is_ok());
        assert!(backend.unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_sqlite_create_table() {
        let mut backend = SqliteBackend::memory().await.unwrap();

        backend
            .execute("CREATE TABLE test_table (id TEXT PRIMARY KEY, entity JSON)", &[])
            .await
            .unwrap();

        let tables = backend.list_tables().await.unwrap();
        assert!(tables.contains(&"test_table".to_string()));
    }

    #[tokio::test]
    async fn test_sqlite_bind_params() {
        let mut backend = SqliteBackend::memory().await.unwrap();

        backend
            .execute(
                "CREATE TABLE items (id TEXT PRIMARY KEY, amount REAL, flag INTEGER, note TEXT)",
                &[],
            )
            .await
            .unwrap();
        backend
            .execute(
                "INSERT INTO items (id, amount, flag, note) VALUES (?, ?, ?, ?)",
                &[json!("a"), json!(1.5), json!(true), Value::Null],
            )
            .await
            .unwrap();
        backend
            .execute(
                "INSERT INTO items (id, amount, flag, note) VALUES (?, ?, ?, ?)",
                &[json!("b"), json!(3), json!(false), json!(["x"])],
            )
            .await
            .unwrap();

        let results = backend
            .fetch("SELECT * FROM items WHERE amount > ? ORDER BY id", &[json!(1)])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get_string("id"), Some("a".to_string()));
        assert_eq!(results[0].get_f64("amount"), Some(1.5));
        assert_eq!(results[0].get_i64("flag"), Some(1));
        assert_eq!(results[0].value("note"), None);
        assert_eq!(results[1].get_f64("amount"), Some(3.0));
        assert_eq!(results[1].get_json("note"), Some(json!(["x"])));
    }

    #[tokio::test]
    async fn test_sqlite_json_each() {
        let backend = SqliteBackend::memory().await.unwrap();

        let results = backend
            .fetch(
                "SELECT COUNT(*) AS n FROM json_each(?) WHERE value IN (?, ?)",
                &[json!(r#"["de", "fr", "it"]"#), json!("de"), json!("it")],
            )
            .await
            .unwrap();

        assert_eq!(results[0].get_i64("n"), Some(2));
    }
}
