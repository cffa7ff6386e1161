use crate::aggregate::AggregationQuery;
use crate::backend::{DatabaseBackend, QueryResult};
use crate::builder::Query;
use crate::error::{QueryError, Result};
use crate::registry::{PropertyRegistry, PropertyType};
use crate::schema::EntityTable;
use crate::search::{normalize_term, SearchQuery};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// FollowTheMoney entity as stored in the `entity` column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub schema: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<String>,
    /// Extra fields beside the model properties (`context.*`, `foo[]`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema: schema.into(),
            properties: BTreeMap::new(),
            datasets: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.datasets.push(dataset.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, property: &str) -> &[String] {
        self.properties
            .get(property)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Entity counts of a filtered set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    pub entity_count: i64,
    pub schemata: BTreeMap<String, i64>,
}

/// Aggregate values by field, then by function name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatorResult {
    #[serde(flatten)]
    pub fields: BTreeMap<String, BTreeMap<String, Value>>,
}

impl AggregatorResult {
    pub fn get(&self, field: &str, func: &str) -> Option<&Value> {
        self.fields.get(field).and_then(|funcs| funcs.get(func))
    }
}

/// Runs compiled queries against an entity table
pub struct EntityStore<B: DatabaseBackend> {
    backend: Arc<RwLock<B>>,
    table: EntityTable,
    registry: Arc<dyn PropertyRegistry>,
}

impl<B: DatabaseBackend> EntityStore<B> {
    pub fn new(backend: B, table: &str, registry: Arc<dyn PropertyRegistry>) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(RwLock::new(backend)),
            table: EntityTable::new(table)?,
            registry,
        })
    }

    pub fn table(&self) -> &EntityTable {
        &self.table
    }

    /// Empty query over this store's table
    pub fn query(&self) -> Query {
        Query::new(self.table.name.clone(), self.registry.clone())
    }

    /// Create the entity table and its full-text index
    pub async fn initialize_schema(&self) -> Result<()> {
        let mut backend = self.backend.write().await;

        for statement in self.table.ddl() {
            backend.execute(&statement, &[]).await?;
        }

        tracing::debug!(table = %self.table.name, "initialized entity table");
        Ok(())
    }

    /// Insert or replace an entity and its index text
    pub async fn put(&self, entity: &Entity) -> Result<()> {
        let document = serde_json::to_value(entity)?;
        let dataset = entity
            .datasets
            .first()
            .map(|d| Value::String(d.clone()))
            .unwrap_or(Value::Null);
        let id = Value::String(entity.id.clone());

        let mut backend = self.backend.write().await;
        backend
            .execute(
                &self.table.insert_sql(),
                &[
                    id.clone(),
                    Value::String(entity.schema.clone()),
                    dataset,
                    Value::String(document.to_string()),
                ],
            )
            .await?;
        backend
            .execute(&self.table.fts_delete_sql(), &[id.clone()])
            .await?;

        let text = self.search_text(entity);
        if !text.is_empty() {
            backend
                .execute(&self.table.fts_insert_sql(), &[id, Value::String(text)])
                .await?;
        }

        Ok(())
    }

    pub async fn put_all<'a, I>(&self, entities: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let mut count = 0;
        for entity in entities {
            self.put(entity).await?;
            count += 1;
        }
        tracing::debug!(table = %self.table.name, count, "stored entities");
        Ok(count)
    }

    // Name values, normalized like search terms
    fn search_text(&self, entity: &Entity) -> String {
        entity
            .properties
            .iter()
            .filter(|(name, _)| self.registry.property_type(name) == Some(PropertyType::Name))
            .flat_map(|(_, values)| values.iter())
            .map(|v| normalize_term(v))
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let backend = self.backend.read().await;
        backend.fetch(sql, params).await
    }

    fn to_entities(rows: QueryResult) -> Result<Vec<Entity>> {
        rows.iter()
            .map(|row| -> Result<Entity> {
                let document = row.get_json("entity").ok_or_else(|| {
                    QueryError::Database("row without entity document".to_string())
                })?;
                Ok(serde_json::from_value(document)?)
            })
            .collect()
    }

    pub async fn entities(&self, query: &Query) -> Result<Vec<Entity>> {
        let (sql, params) = query.to_sql();
        Self::to_entities(self.fetch(&sql, &params).await?)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Entity>> {
        let (sql, params) = query.to_sql();
        Self::to_entities(self.fetch(&sql, &params).await?)
    }

    /// Number of rows matching the filters, ignoring pagination
    pub async fn count(&self, query: &Query) -> Result<i64> {
        let rows = self
            .fetch(&query.count_sql(), &query.unpaged().parameters())
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_i64("COUNT(*)"))
            .unwrap_or(0))
    }

    pub async fn stats(&self, query: &Query) -> Result<DatasetStats> {
        let rows = self
            .fetch(&query.schema_groups_sql(), &query.unpaged().parameters())
            .await?;

        let mut stats = DatasetStats::default();
        for row in rows {
            let (Some(schema), Some(count)) = (row.get_string("schema"), row.get_i64("COUNT(*)"))
            else {
                continue;
            };
            stats.entity_count += count;
            stats.schemata.insert(schema, count);
        }

        Ok(stats)
    }

    /// Run every aggregation statement; empty sets aggregate to `null`
    pub async fn aggregations(&self, query: &AggregationQuery) -> Result<AggregatorResult> {
        let mut result = AggregatorResult::default();

        for statement in query.get_agg_queries() {
            let rows = self.fetch(&statement.sql, &statement.parameters).await?;
            let value = rows
                .first()
                .and_then(|row| row.value(statement.func.alias()))
                .cloned()
                .unwrap_or(Value::Null);
            result
                .fields
                .entry(statement.field)
                .or_default()
                .insert(statement.func.to_string(), value);
        }

        Ok(result)
    }

    pub async fn close(self) -> Result<()> {
        let backend = Arc::try_unwrap(self.backend)
            .map_err(|_| QueryError::Database("backend still in use".to_string()))?
            .into_inner();
        backend.close().await
    }
}
