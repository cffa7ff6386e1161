use crate::error::{QueryError, Result};
use crate::field::{FieldKind, FieldResolver, ResolvedField, TABLE_ALIAS};
use crate::lookup::{compile_lookup, Predicate};
use crate::registry::PropertyRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Columns every entity query selects first
pub const BASE_COLUMNS: &[&str] = &["t.id", "t.schema", "t.entity"];

/// Cross join exposing every property array as `r.value`; one row per
/// property, so matches are not deduplicated
pub(crate) const REVERSE_SOURCE: &str = "json_each(t.entity, '$.properties') r";

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// ORDER BY clause; the direction applies to the clause as a whole
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub fields: Vec<ResolvedField>,
    pub direction: SortDirection,
}

impl OrderBy {
    /// Render the items; `joined` qualifies columns with the row alias
    pub fn to_sql(&self, joined: bool) -> String {
        let items = self
            .fields
            .iter()
            // reverse fields are rejected when the clause is built
            .filter_map(|f| f.order_expr(joined).ok())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} {}", items, self.direction)
    }
}

/// Statement parts collected from a query and rendered in one pass.
///
/// `conditions` and `parameters` are filled together, so the n-th `?` in
/// the rendered text always binds the n-th parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub select: Vec<String>,
    pub from: String,
    pub conditions: Vec<String>,
    pub parameters: Vec<Value>,
    pub order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Statement {
    /// Drop ordering and pagination
    pub fn unpaged(mut self) -> Self {
        self.order = None;
        self.limit = None;
        self.offset = None;
        self
    }

    pub fn select_part(&self) -> String {
        self.select.join(", ")
    }

    pub fn where_part(&self) -> Option<String> {
        if self.conditions.is_empty() {
            None
        } else {
            Some(format!("WHERE {}", self.conditions.join(" AND ")))
        }
    }

    pub fn order_part(&self) -> Option<String> {
        self.order.as_ref().map(|o| format!("ORDER BY {}", o))
    }

    pub fn limit_part(&self) -> Option<String> {
        if self.limit.is_none() && self.offset.is_none() {
            return None;
        }
        Some(format!(
            "LIMIT {} OFFSET {}",
            self.limit.unwrap_or(-1),
            self.offset.unwrap_or(0)
        ))
    }

    pub fn render(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select_part(), self.from);

        for part in [self.where_part(), self.order_part(), self.limit_part()]
            .into_iter()
            .flatten()
        {
            sql.push(' ');
            sql.push_str(&part);
        }

        sql
    }

    /// `SELECT COUNT(*)` over the unpaged statement
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM ({})", self.clone().unpaged().render())
    }

    /// Entity counts per schema over the unpaged statement
    pub fn schema_groups_sql(&self) -> String {
        format!(
            "SELECT schema, COUNT(*) FROM ({}) GROUP BY schema",
            self.clone().unpaged().render()
        )
    }
}

#[derive(Debug, Clone)]
struct Lookup {
    value: Value,
    predicate: Predicate,
}

/// Immutable entity query.
///
/// Every chaining method returns a new `Query`; the receiver is left
/// untouched, so a base query can be shared by count, schema grouping and
/// aggregation derivations. All input validation happens in the chaining
/// methods, rendering never fails.
#[derive(Debug, Clone)]
pub struct Query {
    table: String,
    registry: Arc<dyn PropertyRegistry>,
    lookups: BTreeMap<String, Lookup>,
    order_by: Option<OrderBy>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Query {
    /// Create a query over `table`, which is inlined into the SQL text
    pub fn new(table: impl Into<String>, registry: Arc<dyn PropertyRegistry>) -> Self {
        Self {
            table: table.into(),
            registry,
            lookups: BTreeMap::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn registry(&self) -> &Arc<dyn PropertyRegistry> {
        &self.registry
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn ordering(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    /// Current lookup value for a `field[__operator]` key
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.lookups.get(key).map(|l| &l.value)
    }

    /// Lookups in rendering order
    pub fn lookups(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.lookups.iter().map(|(k, l)| (k.as_str(), &l.value))
    }

    pub(crate) fn resolver(&self) -> FieldResolver<'_> {
        FieldResolver::new(self.registry.as_ref())
    }

    /// Merge lookups into a new query.
    ///
    /// A list merged into an existing list yields their union, any other
    /// value replaces the previous one and `null` removes the key.
    pub fn and_where<I, K, V>(&self, filters: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut query = self.clone();

        for (key, value) in filters {
            let key = key.into();
            let value = value.into();

            if value.is_null() {
                query.lookups.remove(&key);
                continue;
            }

            let value = match (query.lookups.get(&key).map(|l| &l.value), value) {
                (Some(Value::Array(existing)), Value::Array(new)) => {
                    let mut merged = existing.clone();
                    for item in new {
                        if !merged.contains(&item) {
                            merged.push(item);
                        }
                    }
                    Value::Array(merged)
                }
                (_, value) => value,
            };

            let predicate = compile_lookup(&query.resolver(), &key, &value)?;
            query.lookups.remove(&key);
            query.check_alias(&predicate.field)?;
            query.lookups.insert(key, Lookup { value, predicate });
        }

        Ok(query)
    }

    /// Merge a single lookup
    pub fn where_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.and_where([(key.into(), value.into())])
    }

    /// Replace the ordering; an empty field list clears it
    pub fn order_by<I, S>(&self, fields: I, direction: SortDirection) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolver = self.resolver();
        let fields = fields
            .into_iter()
            .map(|name| {
                let field = resolver.resolve(name.as_ref())?;
                if field.kind == FieldKind::Reverse {
                    return Err(QueryError::InvalidField(field.name));
                }
                Ok(field)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut query = self.clone();
        query.order_by = None;
        for (i, field) in fields.iter().enumerate() {
            query.check_alias(field)?;
            if fields[..i]
                .iter()
                .any(|f| f.alias == field.alias && f.json_expr != field.json_expr)
            {
                return Err(QueryError::InvalidField(field.name.clone()));
            }
        }
        query.order_by = if fields.is_empty() {
            None
        } else {
            Some(OrderBy { fields, direction })
        };
        Ok(query)
    }

    pub fn order_by_asc<I, S>(&self, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.order_by(fields, SortDirection::Asc)
    }

    /// Single row at `index`
    pub fn get(&self, index: i64) -> Result<Self> {
        if index < 0 {
            return Err(QueryError::InvalidSlice(format!("negative index {}", index)));
        }
        let mut query = self.clone();
        query.limit = Some(1);
        query.offset = Some(index);
        Ok(query)
    }

    /// Contiguous half-open range `[start, stop)`; an open end means no limit
    pub fn slice(&self, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<Self> {
        if let Some(step) = step {
            if step != 1 {
                return Err(QueryError::InvalidSlice(format!("unsupported step {}", step)));
            }
        }

        let start = start.unwrap_or(0);
        if start < 0 {
            return Err(QueryError::InvalidSlice(format!("negative start {}", start)));
        }

        let limit = match stop {
            Some(stop) if stop <= start => {
                return Err(QueryError::InvalidSlice(format!(
                    "empty or reversed range {}:{}",
                    start, stop
                )));
            }
            Some(stop) => stop - start,
            None => -1,
        };

        let mut query = self.clone();
        query.limit = Some(limit);
        query.offset = Some(start);
        Ok(query)
    }

    /// 1-based page of `limit` rows
    pub fn page(&self, page: i64, limit: i64) -> Result<Self> {
        if page < 1 {
            return Err(QueryError::InvalidSlice(format!("page {} out of range", page)));
        }
        if limit < 1 {
            return Err(QueryError::LimitOutOfRange(limit));
        }
        let bounds = (page - 1)
            .checked_mul(limit)
            .zip(page.checked_mul(limit))
            .ok_or_else(|| QueryError::InvalidSlice(format!("page {} out of range", page)))?;
        self.slice(Some(bounds.0), Some(bounds.1), None)
    }

    /// Set the limit; `-1` means unbounded
    pub fn with_limit(&self, limit: i64) -> Result<Self> {
        if limit < -1 {
            return Err(QueryError::LimitOutOfRange(limit));
        }
        let mut query = self.clone();
        query.limit = Some(limit);
        Ok(query)
    }

    pub fn with_offset(&self, offset: i64) -> Result<Self> {
        if offset < 0 {
            return Err(QueryError::InvalidSlice(format!("negative offset {}", offset)));
        }
        let mut query = self.clone();
        query.offset = Some(offset);
        Ok(query)
    }

    /// Same filters without ordering or pagination
    pub fn unpaged(&self) -> Self {
        let mut query = self.clone();
        query.order_by = None;
        query.limit = None;
        query.offset = None;
        query
    }

    // Two paths slugged into one select alias would read each other's value.
    fn check_alias(&self, field: &ResolvedField) -> Result<()> {
        let collides = self
            .lookups
            .values()
            .map(|l| &l.predicate.field)
            .chain(self.order_by.iter().flat_map(|o| o.fields.iter()))
            .any(|other| other.alias == field.alias && other.json_expr != field.json_expr);
        if collides {
            return Err(QueryError::InvalidField(field.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn has_reverse(&self) -> bool {
        self.lookups
            .values()
            .any(|l| l.predicate.field.kind == FieldKind::Reverse)
    }

    pub(crate) fn from_part(&self) -> String {
        if self.has_reverse() {
            format!("{} {}, {}", self.table, TABLE_ALIAS, REVERSE_SOURCE)
        } else {
            format!("{} {}", self.table, TABLE_ALIAS)
        }
    }

    fn select_part(&self) -> Vec<String> {
        let mut extracts = BTreeMap::new();

        let fields = self
            .lookups
            .values()
            .map(|l| &l.predicate.field)
            .chain(self.order_by.iter().flat_map(|o| o.fields.iter()));
        for field in fields {
            if let Some(expr) = &field.json_expr {
                extracts.insert(field.alias.as_str(), expr.as_str());
            }
        }

        BASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(
                extracts
                    .into_iter()
                    .map(|(alias, expr)| format!("{} AS {}", expr, alias)),
            )
            .collect()
    }

    /// Collect the statement parts
    pub fn statement(&self) -> Statement {
        let mut conditions = Vec::with_capacity(self.lookups.len());
        let mut parameters = Vec::new();

        for lookup in self.lookups.values() {
            conditions.push(format!("({})", lookup.predicate.to_sql()));
            parameters.extend(lookup.predicate.values.iter().cloned());
        }

        Statement {
            select: self.select_part(),
            from: self.from_part(),
            conditions,
            parameters,
            order: self.order_by.as_ref().map(|o| o.to_sql(self.has_reverse())),
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Render the SELECT statement and its positional parameters
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let statement = self.statement();
        let sql = statement.render();
        tracing::debug!(
            table = %self.table,
            parameters = statement.parameters.len(),
            "rendered entity query"
        );
        tracing::trace!(sql = %sql);
        (sql, statement.parameters)
    }

    pub fn parameters(&self) -> Vec<Value> {
        self.statement().parameters
    }

    /// Count over the filtered, unpaged rows; binds `parameters()`
    pub fn count_sql(&self) -> String {
        self.unpaged().statement().count_sql()
    }

    /// Per-schema counts over the filtered, unpaged rows; binds `parameters()`
    pub fn schema_groups_sql(&self) -> String {
        self.unpaged().statement().schema_groups_sql()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement().render())
    }
}
