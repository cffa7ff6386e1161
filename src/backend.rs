use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Row from a query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    pub columns: HashMap<String, Value>,
}

impl QueryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.columns.insert(key, value);
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.columns.get(key).filter(|v| !v.is_null())
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.value(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.value(key).and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(|v| v.as_i64())
    }

    /// Numeric column, also accepting numbers stored as text
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.value(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// JSON document stored as text
    pub fn get_json(&self, key: &str) -> Option<Value> {
        match self.value(key)? {
            Value::String(s) => serde_json::from_str(s).ok(),
            other => Some(other.clone()),
        }
    }
}

/// Result of a query
pub type QueryResult = Vec<QueryRow>;

/// Database backend executing compiled statements
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Connect to the database
    async fn connect(url: &str) -> Result<Self>
    where
        Self: Sized;

    /// Execute a statement with positional parameters (no results)
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query, binding `params` to its `?` placeholders in order
    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(self) -> Result<()>;
}
