use crate::builder::Query;
use crate::error::{QueryError, Result};
use crate::field::{FieldKind, ResolvedField};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub const ALL: [AggregateFunc; 5] = [
        AggregateFunc::Count,
        AggregateFunc::Sum,
        AggregateFunc::Avg,
        AggregateFunc::Min,
        AggregateFunc::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
        }
    }

    /// Result column name, e.g. `aggSum`
    pub fn alias(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "aggCount",
            AggregateFunc::Sum => "aggSum",
            AggregateFunc::Avg => "aggAvg",
            AggregateFunc::Min => "aggMin",
            AggregateFunc::Max => "aggMax",
        }
    }

    pub fn to_sql(&self, column: &str) -> String {
        match self {
            AggregateFunc::Count => format!("COUNT({})", column),
            AggregateFunc::Sum => format!("SUM({})", column),
            AggregateFunc::Avg => format!("AVG({})", column),
            AggregateFunc::Min => format!("MIN({})", column),
            AggregateFunc::Max => format!("MAX({})", column),
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AggregateFunc {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        AggregateFunc::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| QueryError::InvalidAggregation(s.to_string()))
    }
}

/// Requested aggregations keyed by field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregations {
    fields: BTreeMap<String, BTreeSet<AggregateFunc>>,
}

impl Aggregations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the function → fields mapping
    pub fn from_functions<I, F, S>(functions: I) -> Self
    where
        I: IntoIterator<Item = (AggregateFunc, F)>,
        F: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut aggregations = Self::new();
        for (func, fields) in functions {
            for field in fields {
                aggregations.add(func, field);
            }
        }
        aggregations
    }

    pub fn add(&mut self, func: AggregateFunc, field: impl Into<String>) {
        self.fields.entry(field.into()).or_default().insert(func);
    }

    pub fn with(mut self, func: AggregateFunc, field: impl Into<String>) -> Self {
        self.add(func, field);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Functions requested per field
    pub fn functions(&self, field: &str) -> Option<&BTreeSet<AggregateFunc>> {
        self.fields.get(field)
    }

    /// All `(field, function)` pairs, grouped by field
    pub fn pairs(&self) -> impl Iterator<Item = (&str, AggregateFunc)> {
        self.fields
            .iter()
            .flat_map(|(field, funcs)| funcs.iter().map(move |f| (field.as_str(), *f)))
    }
}

/// One aggregate over the filtered rows
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationStatement {
    pub field: String,
    pub func: AggregateFunc,
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// Aggregations over the full filtered set of a [`Query`]
#[derive(Debug, Clone)]
pub struct AggregationQuery {
    query: Query,
    aggregations: Aggregations,
    fields: BTreeMap<String, ResolvedField>,
}

impl AggregationQuery {
    pub fn new(query: Query, aggregations: Aggregations) -> Result<Self> {
        let resolver = query.resolver();
        let mut fields = BTreeMap::new();

        for (name, _) in aggregations.pairs() {
            if fields.contains_key(name) {
                continue;
            }
            let field = resolver.resolve(name)?;
            if field.kind == FieldKind::Reverse {
                return Err(QueryError::InvalidField(field.name));
            }
            fields.insert(name.to_string(), field);
        }

        Ok(Self {
            query,
            aggregations,
            fields,
        })
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn aggregations(&self) -> &Aggregations {
        &self.aggregations
    }

    /// One statement per `(field, function)` pair.
    ///
    /// Every statement wraps the query without ordering and pagination and
    /// binds the same parameters. Pairs sharing a field are not batched.
    pub fn get_agg_queries(&self) -> Vec<AggregationStatement> {
        let statement = self.query.unpaged().statement();
        let inner = statement.render();

        self.aggregations
            .pairs()
            .filter_map(|(name, func)| {
                let field = self.fields.get(name)?;
                let sql = match &field.json_expr {
                    // scalar extra fields are aggregated as extracted
                    Some(expr) if field.kind == FieldKind::Context => format!(
                        "SELECT {} AS {} FROM ({}) t",
                        func.to_sql(expr),
                        func.alias(),
                        inner
                    ),
                    Some(expr) => format!(
                        "SELECT {} AS {} FROM ({}) t, json_each({})",
                        func.to_sql("value"),
                        func.alias(),
                        inner,
                        expr
                    ),
                    None => format!(
                        "SELECT {} AS {} FROM ({}) t",
                        func.to_sql(&field.alias),
                        func.alias(),
                        inner
                    ),
                };
                Some(AggregationStatement {
                    field: name.to_string(),
                    func,
                    sql,
                    parameters: statement.parameters.clone(),
                })
            })
            .collect()
    }
}

impl fmt::Display for AggregationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModelRegistry, PropertyRegistry, PropertyType};
    use serde_json::json;
    use std::sync::Arc;

    fn query() -> Query {
        let registry: Arc<dyn PropertyRegistry> = Arc::new(
            ModelRegistry::new()
                .with_property("amount", PropertyType::Number)
                .with_property("date", PropertyType::Date),
        );
        Query::new("ftm_test", registry)
    }

    #[test]
    fn test_aggregate_func() {
        assert_eq!("SUM".parse::<AggregateFunc>().unwrap(), AggregateFunc::Sum);
        assert_eq!(AggregateFunc::Avg.alias(), "aggAvg");
        assert_eq!(AggregateFunc::Max.to_sql("value"), "MAX(value)");
        assert!(matches!(
            "median".parse::<AggregateFunc>(),
            Err(QueryError::InvalidAggregation(_))
        ));
    }

    #[test]
    fn test_aggregations_inverse() {
        let aggregations = Aggregations::from_functions([
            (AggregateFunc::Sum, vec!["amount"]),
            (AggregateFunc::Max, vec!["amount", "date"]),
        ]);

        assert_eq!(
            aggregations.pairs().collect::<Vec<_>>(),
            vec![
                ("amount", AggregateFunc::Sum),
                ("amount", AggregateFunc::Max),
                ("date", AggregateFunc::Max),
            ]
        );
    }

    #[test]
    fn test_query_aggregations() {
        let q = query()
            .where_field("amount__gt", 10)
            .unwrap()
            .order_by_asc(["amount"])
            .unwrap()
            .slice(None, Some(10), None)
            .unwrap();
        let aggregations = Aggregations::new().with(AggregateFunc::Sum, "amount");
        let agg = AggregationQuery::new(q, aggregations).unwrap();

        assert_eq!(
            agg.to_string(),
            "SELECT t.id, t.schema, t.entity, json_extract(t.entity, '$.properties.amount') AS amount FROM ftm_test t WHERE (EXISTS (SELECT 1 FROM json_each(amount) WHERE CAST(value AS NUMERIC) > ?)) ORDER BY CAST(json_extract(amount, '$[0]') AS NUMERIC) ASC LIMIT 10 OFFSET 0"
        );

        let statements = agg.get_agg_queries();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].field, "amount");
        assert_eq!(statements[0].func, AggregateFunc::Sum);
        assert_eq!(
            statements[0].sql,
            "SELECT SUM(value) AS aggSum FROM (SELECT t.id, t.schema, t.entity, json_extract(t.entity, '$.properties.amount') AS amount FROM ftm_test t WHERE (EXISTS (SELECT 1 FROM json_each(amount) WHERE CAST(value AS NUMERIC) > ?))) t, json_each(json_extract(t.entity, '$.properties.amount'))"
        );
        assert_eq!(statements[0].parameters, vec![json!(10)]);
    }

    #[test]
    fn test_query_aggregations_fan_out() {
        let aggregations = Aggregations::new()
            .with(AggregateFunc::Min, "date")
            .with(AggregateFunc::Max, "date")
            .with(AggregateFunc::Count, "id");
        let agg = AggregationQuery::new(query(), aggregations).unwrap();
        let statements = agg.get_agg_queries();

        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| s.parameters.is_empty()));
        let count = statements.iter().find(|s| s.field == "id").unwrap();
        assert_eq!(
            count.sql,
            "SELECT COUNT(t.id) AS aggCount FROM (SELECT t.id, t.schema, t.entity FROM ftm_test t) t"
        );
    }

    #[test]
    fn test_query_aggregations_context() {
        let aggregations = Aggregations::new()
            .with(AggregateFunc::Count, "context.scope")
            .with(AggregateFunc::Count, "context.tags[]");
        let agg = AggregationQuery::new(query(), aggregations).unwrap();
        let statements = agg.get_agg_queries();

        assert_eq!(
            statements[0].sql,
            "SELECT COUNT(json_extract(t.entity, '$.scope')) AS aggCount FROM (SELECT t.id, t.schema, t.entity FROM ftm_test t) t"
        );
        assert_eq!(
            statements[1].sql,
            "SELECT COUNT(value) AS aggCount FROM (SELECT t.id, t.schema, t.entity FROM ftm_test t) t, json_each(json_extract(t.entity, '$.tags'))"
        );
    }

    #[test]
    fn test_query_aggregations_invalid() {
        let nope = Aggregations::new().with(AggregateFunc::Sum, "nope");
        let err = AggregationQuery::new(query(), nope).unwrap_err();
        assert!(matches!(err, QueryError::InvalidField(_)));

        let reverse = Aggregations::new().with(AggregateFunc::Sum, "reverse");
        let err = AggregationQuery::new(query(), reverse).unwrap_err();
        assert!(matches!(err, QueryError::InvalidField(_)));
    }
}
