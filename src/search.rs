use crate::builder::{Query, SortDirection, Statement, REVERSE_SOURCE};
use crate::error::Result;
use crate::field::TABLE_ALIAS;
use serde_json::Value;
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Suffix of the full-text index table next to the entity table
pub const FTS_SUFFIX: &str = "__fts";

/// Strip diacritics, keeping case and everything else
pub fn normalize_term(term: &str) -> String {
    term.nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect::<String>()
        .trim()
        .to_string()
}

/// FTS5 match expression for a normalized term.
///
/// Every whitespace-separated token becomes a quoted string, so operators,
/// column filters and punctuation in user input are matched as text.
pub fn fts_query(term: &str) -> String {
    term.split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Entity query joined against the full-text index.
///
/// Without a term it renders exactly like the wrapped [`Query`].
#[derive(Debug, Clone)]
pub struct SearchQuery {
    query: Query,
    term: Option<String>,
}

impl SearchQuery {
    pub fn new(query: Query, term: Option<&str>) -> Self {
        let term = term.map(normalize_term).filter(|t| !t.is_empty());
        Self { query, term }
    }

    pub fn term(&self) -> Option<&str> {
        self.term.as_deref()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn fts_table(&self) -> String {
        format!("{}{}", self.query.table(), FTS_SUFFIX)
    }

    fn map(&self, query: Query) -> Self {
        Self {
            query,
            term: self.term.clone(),
        }
    }

    pub fn with_term(&self, term: Option<&str>) -> Self {
        Self::new(self.query.clone(), term)
    }

    pub fn and_where<I, K, V>(&self, filters: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Ok(self.map(self.query.and_where(filters)?))
    }

    pub fn where_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Ok(self.map(self.query.where_field(key, value)?))
    }

    /// Explicit ordering replaces the relevance ordering
    pub fn order_by<I, S>(&self, fields: I, direction: SortDirection) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.map(self.query.order_by(fields, direction)?))
    }

    pub fn order_by_asc<I, S>(&self, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.order_by(fields, SortDirection::Asc)
    }

    pub fn get(&self, index: i64) -> Result<Self> {
        Ok(self.map(self.query.get(index)?))
    }

    pub fn slice(&self, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<Self> {
        Ok(self.map(self.query.slice(start, stop, step)?))
    }

    pub fn page(&self, page: i64, limit: i64) -> Result<Self> {
        Ok(self.map(self.query.page(page, limit)?))
    }

    pub fn unpaged(&self) -> Self {
        self.map(self.query.unpaged())
    }

    /// Statement parts; the quoted MATCH term is always the last parameter
    pub fn statement(&self) -> Statement {
        let mut statement = self.query.statement();

        let Some(term) = &self.term else {
            return statement;
        };

        let table = self.query.table();
        statement.from = format!(
            "{} s LEFT JOIN {} {} ON s.id = {}.id",
            self.fts_table(),
            table,
            TABLE_ALIAS,
            TABLE_ALIAS
        );
        if self.query.has_reverse() {
            statement.from = format!("{}, {}", statement.from, REVERSE_SOURCE);
        }
        statement.conditions.push("s.text MATCH ?".to_string());
        statement.parameters.push(Value::String(fts_query(term)));
        statement.order = Some(match self.query.ordering() {
            Some(order) => order.to_sql(true),
            None => "s.rank".to_string(),
        });

        statement
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let statement = self.statement();
        let sql = statement.render();
        tracing::debug!(
            table = %self.query.table(),
            term = self.term.as_deref().unwrap_or_default(),
            parameters = statement.parameters.len(),
            "rendered search query"
        );
        tracing::trace!(sql = %sql);
        (sql, statement.parameters)
    }

    pub fn parameters(&self) -> Vec<Value> {
        self.statement().parameters
    }

    pub fn count_sql(&self) -> String {
        self.unpaged().statement().count_sql()
    }

    pub fn schema_groups_sql(&self) -> String {
        self.unpaged().statement().schema_groups_sql()
    }
}

impl From<Query> for SearchQuery {
    fn from(query: Query) -> Self {
        Self::new(query, None)
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement().render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModelRegistry, PropertyRegistry, PropertyType};
    use serde_json::json;
    use std::sync::Arc;

    const TABLE: &str = "ftm_test";

    fn query() -> Query {
        let registry: Arc<dyn PropertyRegistry> = Arc::new(
            ModelRegistry::new()
                .with_property("name", PropertyType::Name)
                .with_property("keywords", PropertyType::String),
        );
        Query::new(TABLE, registry)
    }

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("Café Müller"), "Cafe Muller");
        assert_eq!(normalize_term("  Ålborg "), "Alborg");
        assert_eq!(normalize_term("alice"), "alice");
    }

    #[test]
    fn test_query_search() {
        let q = SearchQuery::new(query(), Some("alice"));
        assert_eq!(
            q.to_string(),
            "SELECT t.id, t.schema, t.entity FROM ftm_test__fts s LEFT JOIN ftm_test t ON s.id = t.id WHERE s.text MATCH ? ORDER BY s.rank"
        );
        assert_eq!(q.parameters(), vec![json!("\"alice\"")]);

        let q = q.where_field("schema", "Person").unwrap();
        assert_eq!(
            q.to_string(),
            "SELECT t.id, t.schema, t.entity FROM ftm_test__fts s LEFT JOIN ftm_test t ON s.id = t.id WHERE (t.schema = ?) AND s.text MATCH ? ORDER BY s.rank"
        );
        assert_eq!(q.parameters(), vec![json!("Person"), json!("\"alice\"")]);

        let q = q.where_field("keywords", "foo").unwrap();
        assert_eq!(
            q.to_string(),
            "SELECT t.id, t.schema, t.entity, json_extract(t.entity, '$.properties.keywords') AS keywords FROM ftm_test__fts s LEFT JOIN ftm_test t ON s.id = t.id WHERE (EXISTS (SELECT 1 FROM json_each(keywords) WHERE value = ?)) AND (t.schema = ?) AND s.text MATCH ? ORDER BY s.rank"
        );
        assert_eq!(
            q.parameters(),
            vec![json!("foo"), json!("Person"), json!("\"alice\"")]
        );

        let q = q.order_by_asc(["name"]).unwrap();
        assert_eq!(q.statement().order_part().unwrap(), "ORDER BY name ASC");

        let q = q.order_by_asc(["id"]).unwrap();
        assert_eq!(q.statement().order_part().unwrap(), "ORDER BY t.id ASC");
    }

    #[test]
    fn test_fts_query() {
        assert_eq!(fts_query("alice"), "\"alice\"");
        assert_eq!(fts_query("O'Brien"), "\"O'Brien\"");
        assert_eq!(fts_query("Jean-Pierre"), "\"Jean-Pierre\"");
        assert_eq!(fts_query("jane AND"), "\"jane\" \"AND\"");
        assert_eq!(fts_query("a&b  co"), "\"a&b\" \"co\"");
        assert_eq!(fts_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
    }

    #[test]
    fn test_query_search_without_term() {
        let base = query().where_field("name", "x").unwrap();
        assert_eq!(SearchQuery::from(base.clone()).to_sql(), base.to_sql());
        assert_eq!(SearchQuery::new(base.clone(), Some("  ")).to_sql(), base.to_sql());
    }

    #[test]
    fn test_query_search_term_normalized_last() {
        let q = SearchQuery::new(query(), Some("Zoë"))
            .get(2)
            .unwrap()
            .where_field("name__in", json!(["a", "b"]))
            .unwrap();
        let (sql, params) = q.to_sql();

        assert!(sql.ends_with("s.text MATCH ? ORDER BY s.rank LIMIT 1 OFFSET 2"));
        assert_eq!(params, vec![json!("a"), json!("b"), json!("\"Zoe\"")]);
        assert_eq!(sql.matches('?').count(), params.len());
    }

    #[test]
    fn test_query_search_count() {
        let q = SearchQuery::new(query(), Some("alice")).page(2, 10).unwrap();
        assert_eq!(
            q.count_sql(),
            "SELECT COUNT(*) FROM (SELECT t.id, t.schema, t.entity FROM ftm_test__fts s LEFT JOIN ftm_test t ON s.id = t.id WHERE s.text MATCH ?)"
        );
    }

    #[test]
    fn test_query_search_reverse() {
        let q = SearchQuery::new(query(), Some("alice"))
            .where_field("reverse", "id-1")
            .unwrap();
        assert_eq!(
            q.statement().from,
            "ftm_test__fts s LEFT JOIN ftm_test t ON s.id = t.id, json_each(t.entity, '$.properties') r"
        );
    }
}
