//! ftmq-sql - query compiler for FollowTheMoney entity stores
//!
//! ftmq-sql turns filter, ordering, pagination, full-text search and
//! aggregation requests over FollowTheMoney entities into parameterized
//! SQLite statements. Entities live as JSON documents in one table; model
//! properties are stored as arrays under `$.properties`.
//!
//! # Architecture
//!
//! - **Field Resolver**: classifies field names (meta column, model property,
//!   context field, array field, `reverse`) against a [`PropertyRegistry`]
//! - **Lookup Compiler**: `field__operator` lookups become predicates whose
//!   placeholders line up with their bound values
//! - **Query Builder**: immutable [`Query`] values rendered through an explicit
//!   [`Statement`] in one pass
//! - **Search / Aggregation**: FTS5 join and per-field aggregate statements
//!   derived from the same filtered query
//! - **Execution**: optional sqlx backend and [`EntityStore`] running the
//!   compiled statements
//!
//! # Example
//!
//! ```rust
//! use ftmq_sql::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let registry: Arc<dyn PropertyRegistry> = Arc::new(ModelRegistry::bundled()?);
//!
//! let query = Query::new("ftm", registry)
//!     .where_field("schema", "Payment")?
//!     .where_field("amount__gte", 1000)?
//!     .order_by(["amount"], SortDirection::Desc)?
//!     .page(1, 10)?;
//!
//! let (sql, params) = query.to_sql();
//! assert!(sql.ends_with("LIMIT 10 OFFSET 0"));
//! assert_eq!(params, vec![json!(1000), json!("Payment")]);
//! # Ok(())
//! # }
//! ```
//!
//! # Backend Support
//!
//! The sqlx SQLite backend is behind the default `sqlite` feature. Query
//! compilation itself has no database dependency.

pub mod aggregate;
pub mod backend;
pub mod builder;
pub mod config;
pub mod error;
pub mod field;
pub mod lookup;
pub mod params;
pub mod registry;
pub mod schema;
pub mod search;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use aggregate::{AggregateFunc, AggregationQuery, AggregationStatement, Aggregations};
pub use backend::{DatabaseBackend, QueryResult, QueryRow};
pub use builder::{OrderBy, Query, SortDirection, Statement};
pub use config::QueryConfig;
pub use error::{QueryError, Result};
pub use field::{FieldKind, FieldResolver, ResolvedField};
pub use lookup::{compile_lookup, Operand, Operator, Predicate};
pub use params::{AggregationParams, Pagination, QueryParams};
pub use registry::{ModelRegistry, PropertyRegistry, PropertyType};
pub use schema::EntityTable;
pub use search::{fts_query, normalize_term, SearchQuery};
pub use store::{AggregatorResult, DatasetStats, Entity, EntityStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::aggregate::{AggregateFunc, AggregationQuery, Aggregations};
    pub use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
    pub use crate::builder::{Query, SortDirection};
    pub use crate::config::QueryConfig;
    pub use crate::error::{QueryError, Result};
    pub use crate::params::{Pagination, QueryParams};
    pub use crate::registry::{ModelRegistry, PropertyRegistry};
    pub use crate::search::SearchQuery;
    pub use crate::store::{Entity, EntityStore};

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::SqliteBackend;
}
