//! Request parameter intake.
//!
//! Turns raw `key=value` pairs from a query string into [`QueryParams`] and
//! from there into compiled queries. Repeated keys keep all their values.

use crate::aggregate::{AggregateFunc, AggregationQuery, Aggregations};
use crate::builder::{Query, SortDirection};
use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::registry::PropertyRegistry;
use crate::search::{normalize_term, SearchQuery};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const AGG_PREFIX: &str = "agg";

/// Aggregations requested as `aggSum=amount&aggMax=date`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationParams {
    functions: BTreeMap<AggregateFunc, Vec<String>>,
}

impl AggregationParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is one of the `agg*` parameters
    pub fn is_aggregation_key(key: &str) -> bool {
        Self::parse_key(key).is_some()
    }

    fn parse_key(key: &str) -> Option<AggregateFunc> {
        let name = key.strip_prefix(AGG_PREFIX)?;
        AggregateFunc::ALL
            .into_iter()
            .find(|f| f.alias().strip_prefix(AGG_PREFIX) == Some(name))
    }

    pub fn add(&mut self, func: AggregateFunc, field: impl Into<String>) {
        self.functions.entry(func).or_default().push(field.into());
    }

    pub fn fields(&self, func: AggregateFunc) -> &[String] {
        self.functions.get(&func).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.functions.values().all(Vec::is_empty)
    }

    /// Field → functions view of the requested aggregations
    pub fn inverse(&self) -> Aggregations {
        Aggregations::from_functions(
            self.functions
                .iter()
                .map(|(func, fields)| (*func, fields.iter().cloned())),
        )
    }
}

/// Validated request parameters
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    pub limit: i64,
    pub page: i64,
    pub schema: Option<String>,
    pub order_by: Vec<String>,
    pub direction: SortDirection,
    pub q: Option<String>,
    pub lookups: BTreeMap<String, Value>,
    pub aggregations: AggregationParams,
    min_search_length: usize,
}

impl QueryParams {
    pub fn new(config: &QueryConfig) -> Self {
        Self {
            limit: config.default_limit,
            page: 1,
            schema: None,
            order_by: Vec::new(),
            direction: SortDirection::Asc,
            q: None,
            lookups: BTreeMap::new(),
            aggregations: AggregationParams::new(),
            min_search_length: config.min_search_length,
        }
    }

    /// Collect parameters from query string pairs.
    ///
    /// Unauthenticated requests never get more than `config.default_limit`
    /// rows per page.
    pub fn from_pairs<I, K, V>(pairs: I, config: &QueryConfig, authenticated: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in pairs {
            grouped
                .entry(key.as_ref().to_string())
                .or_default()
                .push(value.as_ref().to_string());
        }

        let mut params = Self::new(config);
        let mut prop = None;
        let mut prop_value = None;

        for (key, mut values) in grouped {
            match key.as_str() {
                "limit" => params.limit = parse_int(&key, last(&values))?,
                "page" => params.page = parse_int(&key, last(&values))?,
                "order_by" => {
                    let raw = last(&values);
                    let (direction, fields) = match raw.strip_prefix('-') {
                        Some(fields) => (SortDirection::Desc, fields),
                        None => (SortDirection::Asc, raw),
                    };
                    params.direction = direction;
                    params.order_by = fields
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(String::from)
                        .collect();
                }
                "schema" => params.schema = values.pop().filter(|s| !s.is_empty()),
                "q" => params.q = values.pop(),
                "prop" => prop = values.pop(),
                "value" => prop_value = values.pop(),
                "api_key" => {}
                other => match AggregationParams::parse_key(other) {
                    Some(func) => {
                        for field in values {
                            params.aggregations.add(func, field);
                        }
                    }
                    None => {
                        let value = if values.len() == 1 {
                            Value::String(values.remove(0))
                        } else {
                            Value::Array(values.into_iter().map(Value::String).collect())
                        };
                        params.lookups.insert(other.to_string(), value);
                    }
                },
            }
        }

        match (prop, prop_value) {
            (Some(prop), Some(value)) => {
                params.lookups.insert(prop, Value::String(value));
            }
            (Some(prop), None) => {
                tracing::warn!(prop = %prop, "rejected `prop` without `value`");
                return Err(QueryError::invalid_value("prop", "requires `value`"));
            }
            (None, Some(_)) => {
                tracing::warn!("rejected `value` without `prop`");
                return Err(QueryError::invalid_value("value", "requires `prop`"));
            }
            (None, None) => {}
        }

        if params.page < 1 {
            tracing::warn!(page = params.page, "rejected page");
            return Err(QueryError::invalid_value("page", "must be at least 1"));
        }
        if params.limit < 1 {
            tracing::warn!(limit = params.limit, "rejected limit");
            return Err(QueryError::LimitOutOfRange(params.limit));
        }
        if !authenticated && params.limit > config.default_limit {
            tracing::debug!(
                requested = params.limit,
                limit = config.default_limit,
                "capping limit for unauthenticated request"
            );
            params.limit = config.default_limit;
        }

        Ok(params)
    }

    /// Parse a raw `a=1&b=2` query string
    pub fn from_query_string(
        query: &str,
        config: &QueryConfig,
        authenticated: bool,
    ) -> Result<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(
            url::form_urlencoded::parse(query.as_bytes()),
            config,
            authenticated,
        )
    }

    /// Entity query for the requested page, ordering, schema and lookups
    pub fn to_query(&self, table: &str, registry: Arc<dyn PropertyRegistry>) -> Result<Query> {
        let mut query = Query::new(table, registry.clone()).page(self.page, self.limit)?;

        if !self.order_by.is_empty() {
            query = query.order_by(&self.order_by, self.direction)?;
        }

        if let Some(schema) = &self.schema {
            if !registry.is_known_schema(schema) {
                tracing::warn!(schema = %schema, "rejected unknown schema");
                return Err(QueryError::InvalidSchema(schema.clone()));
            }
            query = query.where_field("schema", schema.as_str())?;
        }

        query.and_where(self.lookups.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Full-text query; the term must be present and long enough
    pub fn to_search_query(
        &self,
        table: &str,
        registry: Arc<dyn PropertyRegistry>,
    ) -> Result<SearchQuery> {
        let term = self.q.as_deref().map(normalize_term).unwrap_or_default();
        if term.chars().count() < self.min_search_length {
            tracing::warn!(term = %term, "rejected search term");
            return Err(QueryError::InvalidSearchTerm(
                self.q.clone().unwrap_or_default(),
            ));
        }
        Ok(SearchQuery::new(self.to_query(table, registry)?, Some(&term)))
    }

    pub fn to_aggregation_query(
        &self,
        table: &str,
        registry: Arc<dyn PropertyRegistry>,
    ) -> Result<AggregationQuery> {
        AggregationQuery::new(self.to_query(table, registry)?, self.aggregations.inverse())
    }

    pub fn pagination(&self, total: i64) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
            total,
        }
    }
}

/// Page position within a filtered result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

impl Pagination {
    pub fn has_next(&self) -> bool {
        self.limit.saturating_mul(self.page) < self.total
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn next_page(&self) -> Option<i64> {
        self.has_next().then(|| self.page + 1)
    }

    pub fn prev_page(&self) -> Option<i64> {
        self.has_prev().then(|| self.page - 1)
    }
}

fn last(values: &[String]) -> &str {
    values.last().map(String::as_str).unwrap_or_default()
}

fn parse_int(field: &str, raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|_| {
        tracing::warn!(field = field, value = raw, "rejected non-integer parameter");
        QueryError::invalid_value(field, format!("expected an integer, got `{}`", raw))
    })
}
