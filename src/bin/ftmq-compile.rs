//! Compile a query string into SQL
//!
//! # Usage
//!
//! ```bash
//! # Entity query
//! ftmq-compile 'schema=Payment&amount__gte=1000&order_by=-amount'
//!
//! # Full-text search
//! ftmq-compile --search 'q=jane&schema=Person'
//!
//! # Run against a database
//! FTMQ_DATABASE_URL=sqlite://ftm.db ftmq-compile --execute 'country=de'
//! ```

use clap::Parser;
use ftmq_sql::{QueryConfig, QueryParams};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ftmq-compile")]
#[command(about = "Compile FollowTheMoney entity queries to SQL")]
struct Cli {
    #[command(flatten)]
    config: QueryConfig,

    /// Compile a full-text search query (requires `q`)
    #[arg(long)]
    search: bool,

    /// Lift the page size cap for unauthenticated requests
    #[arg(long)]
    authenticated: bool,

    /// Run the compiled statements against `--database-url`
    #[arg(long)]
    execute: bool,

    /// URL query string, e.g. `schema=Person&name__like=%jane%`
    query: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(errors) = cli.config.validate() {
        for error in &errors {
            tracing::error!("{}", error);
        }
        return Err(errors.join(", ").into());
    }

    let config = &cli.config;
    let registry = config.load_registry()?;
    let params = QueryParams::from_query_string(&cli.query, config, cli.authenticated)?;

    let output = if cli.search {
        let query = params.to_search_query(&config.table, registry)?;
        let (sql, parameters) = query.to_sql();
        json!({
            "sql": sql,
            "parameters": parameters,
            "count_sql": query.count_sql(),
        })
    } else {
        let query = params.to_query(&config.table, registry.clone())?;
        let (sql, parameters) = query.to_sql();
        let aggregations = params
            .to_aggregation_query(&config.table, registry)?
            .get_agg_queries()
            .into_iter()
            .map(|s| json!({"field": s.field, "func": s.func.to_string(), "sql": s.sql}))
            .collect::<Vec<Value>>();
        let mut output = json!({
            "sql": sql,
            "parameters": parameters,
            "count_sql": query.count_sql(),
            "schema_groups_sql": query.schema_groups_sql(),
        });
        if !aggregations.is_empty() {
            output["aggregations"] = Value::Array(aggregations);
        }
        output
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    if cli.execute {
        execute(&cli, params).await?;
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn execute(cli: &Cli, params: QueryParams) -> Result<(), Box<dyn std::error::Error>> {
    use ftmq_sql::{DatabaseBackend, EntityStore, SqliteBackend};

    let config = &cli.config;
    let url = config
        .database_url
        .as_deref()
        .ok_or("--execute requires --database-url")?;
    let registry = config.load_registry()?;
    let backend = SqliteBackend::connect(url).await?;
    let store = EntityStore::new(backend, &config.table, registry.clone())?;

    let result = if cli.search {
        let query = params.to_search_query(&config.table, registry)?;
        json!({ "entities": store.search(&query).await? })
    } else {
        let query = params.to_query(&config.table, registry.clone())?;
        let stats = store.stats(&query).await?;
        let pagination = params.pagination(stats.entity_count);
        let aggregations = params.to_aggregation_query(&config.table, registry)?;
        json!({
            "entities": store.entities(&query).await?,
            "stats": stats,
            "pagination": pagination,
            "aggregations": store.aggregations(&aggregations).await?,
        })
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    store.close().await?;
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
async fn execute(_cli: &Cli, _params: QueryParams) -> Result<(), Box<dyn std::error::Error>> {
    Err("--execute requires the `sqlite` feature".into())
}
