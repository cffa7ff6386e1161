use crate::error::{QueryError, Result};
use crate::search::FTS_SUFFIX;

/// SQL type mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Json,
}

impl SqlType {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Json => "JSON",
        }
    }
}

/// Column definition
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// Index definition
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Layout of an entity table and its full-text index.
///
/// Rows hold `id`, `schema`, `dataset` and the entity document as JSON;
/// the `<table>__fts` table maps entity ids to indexed text.
#[derive(Debug, Clone)]
pub struct EntityTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl EntityTable {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(QueryError::Database(format!("Invalid table name: {}", name)));
        }

        let column = |name: &str, sql_type, nullable| ColumnDef {
            name: name.to_string(),
            sql_type,
            nullable,
        };

        Ok(Self {
            name: name.to_string(),
            columns: vec![
                column("id", SqlType::Text, false),
                column("schema", SqlType::Text, false),
                column("dataset", SqlType::Text, true),
                column("entity", SqlType::Json, false),
            ],
            indexes: vec![
                IndexDef {
                    name: format!("idx_{}_schema", name),
                    columns: vec!["schema".to_string()],
                    unique: false,
                },
                IndexDef {
                    name: format!("idx_{}_dataset", name),
                    columns: vec!["dataset".to_string()],
                    unique: false,
                },
            ],
        })
    }

    pub fn fts_name(&self) -> String {
        format!("{}{}", self.name, FTS_SUFFIX)
    }

    /// CREATE TABLE statement for the entity table
    pub fn table_ddl(&self) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", self.name);

        let column_defs: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut def = format!("    {} {}", col.name, col.sql_type.to_sql());
                if !col.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        sql.push_str(&column_defs.join(",\n"));
        sql.push_str(",\n    PRIMARY KEY (id)\n");
        sql.push_str(");");
        sql
    }

    /// Generate CREATE INDEX SQL
    pub fn index_ddl(&self, index: &IndexDef) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            unique,
            index.name,
            self.name,
            index.columns.join(", ")
        )
    }

    pub fn fts_ddl(&self) -> String {
        format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts5(id UNINDEXED, text);",
            self.fts_name()
        )
    }

    /// All bootstrap statements, one per entry
    pub fn ddl(&self) -> Vec<String> {
        let mut statements = vec![self.table_ddl()];
        statements.extend(self.indexes.iter().map(|i| self.index_ddl(i)));
        statements.push(self.fts_ddl());
        statements
    }

    /// Upsert of one entity row, binding `id, schema, dataset, entity`
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT OR REPLACE INTO {} (id, schema, dataset, entity) VALUES (?, ?, ?, ?)",
            self.name
        )
    }

    /// Index row insert, binding `id, text`
    pub fn fts_insert_sql(&self) -> String {
        format!("INSERT INTO {} (id, text) VALUES (?, ?)", self.fts_name())
    }

    pub fn fts_delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = ?", self.fts_name())
    }
}
