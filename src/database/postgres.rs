//! PostgreSQL/PostGIS backend

use super::pool::{ConnectionKey, PoolRegistry};
use super::schema::{ColumnDescription, RelationDescription, RelationKind, SchemaDescription};
use super::{Database, DatabaseConnector, QueryResult};
use crate::config::DatabaseConfig;
use crate::error::{Result, SpatialMindError};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Executor, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const TABLES_QUERY: &str = "\
SELECT table_name::text AS table_name, table_type::text AS table_type \
FROM information_schema.tables \
WHERE table_schema = 'public' AND table_type IN ('BASE TABLE', 'VIEW') \
ORDER BY table_name";

const COLUMNS_QUERY: &str = "\
SELECT column_name::text AS column_name, \
       (CASE WHEN data_type = 'USER-DEFINED' THEN udt_name ELSE data_type END)::text AS data_type, \
       is_nullable::text AS is_nullable, \
       column_default::text AS column_default \
FROM information_schema.columns \
WHERE table_schema = 'public' AND table_name = $1 \
ORDER BY ordinal_position";

/// Opens sessions against PostgreSQL through a shared [`PoolRegistry`]
pub struct PostgresConnector {
    registry: Arc<PoolRegistry>,
}

impl PostgresConnector {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
        config.validate()?;
        let (key, pool) = self.registry.acquire(config).await?;
        Ok(Arc::new(PostgresDatabase {
            key,
            pool,
            registry: Arc::clone(&self.registry),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One session's handle on a pooled PostgreSQL connection
pub struct PostgresDatabase {
    key: ConnectionKey,
    pool: PgPool,
    registry: Arc<PoolRegistry>,
    closed: AtomicBool,
}

impl PostgresDatabase {
    async fn load_schema(&self) -> std::result::Result<SchemaDescription, sqlx::Error> {
        let tables = sqlx::query(TABLES_QUERY).fetch_all(&self.pool).await?;

        let mut relations = Vec::with_capacity(tables.len());
        for table in tables {
            let name: String = table.try_get("table_name")?;
            let table_type: String = table.try_get("table_type")?;

            let columns = sqlx::query(COLUMNS_QUERY)
                .bind(&name)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|row| {
                    let nullable: String = row.try_get("is_nullable")?;
                    Ok(ColumnDescription {
                        name: row.try_get("column_name")?,
                        data_type: row.try_get("data_type")?,
                        nullable: nullable.eq_ignore_ascii_case("YES"),
                        default: row.try_get("column_default")?,
                    })
                })
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

            let sample_sql = format!("SELECT * FROM {} LIMIT 1", quote_ident(&name));
            let sample_row: Option<PgRow> = (&self.pool)
                .fetch_optional(sqlx::raw_sql(&sample_sql))
                .await?;
            let sample = match sample_row {
                Some(row) => Some(column_names(&row).into_iter().zip(text_values(&row)?).collect()),
                None => None,
            };

            relations.push(RelationDescription {
                name,
                kind: RelationKind::from_table_type(&table_type),
                columns,
                sample,
            });
        }

        Ok(SchemaDescription::new(relations))
    }

    /// Runs `sql` once over the simple query protocol
    ///
    /// Postgres wraps a simple query in an implicit transaction that commits
    /// when the statement succeeds, so no explicit transaction is opened here.
    async fn run(&self, sql: &str) -> std::result::Result<QueryResult, sqlx::Error> {
        let rows: Vec<PgRow> = (&self.pool).fetch_all(sqlx::raw_sql(sql)).await?;

        let columns = match rows.first() {
            Some(row) => column_names(row),
            None => self.describe_columns(sql).await,
        };
        let values = rows
            .iter()
            .map(text_values)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        QueryResult::success(columns, values).map_err(|e| sqlx::Error::Protocol(e.to_string()))
    }

    /// Column names for a statement that returned no rows
    async fn describe_columns(&self, sql: &str) -> Vec<String> {
        match (&self.pool).describe(sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                tracing::debug!("Could not describe empty result columns: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn introspect_schema(&self) -> Result<SchemaDescription> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SpatialMindError::Database("connection closed".to_string()).into());
        }

        let settings = self.registry.settings();
        match tokio::time::timeout(settings.statement_timeout(), self.load_schema()).await {
            Ok(Ok(schema)) => {
                tracing::debug!(
                    target_db = %self.key,
                    relations = schema.relations.len(),
                    "Introspected schema"
                );
                Ok(schema)
            }
            Ok(Err(e)) => {
                tracing::error!(target_db = %self.key, "Schema introspection failed: {}", e);
                Err(SpatialMindError::Database(format!(
                    "Schema introspection failed: {}",
                    error_message(&e)
                ))
                .into())
            }
            Err(_) => Err(SpatialMindError::Timeout {
                operation: "schema introspection".to_string(),
                seconds: settings.statement_timeout_seconds,
            }
            .into()),
        }
    }

    async fn execute(&self, sql: &str) -> QueryResult {
        if self.closed.load(Ordering::SeqCst) {
            return QueryResult::failure("connection closed");
        }
        if sql.trim().is_empty() {
            return QueryResult::failure("no SQL to execute");
        }

        let settings = self.registry.settings();
        match tokio::time::timeout(settings.statement_timeout(), self.run(sql)).await {
            Ok(Ok(result)) => {
                tracing::info!(
                    target_db = %self.key,
                    rows = result.row_count(),
                    "Query executed"
                );
                result
            }
            Ok(Err(e)) => {
                tracing::warn!(target_db = %self.key, "Query failed: {}", e);
                QueryResult::failure(error_message(&e))
            }
            Err(_) => {
                tracing::warn!(target_db = %self.key, "Query timed out");
                QueryResult::failure(
                    SpatialMindError::Timeout {
                        operation: "query execution".to_string(),
                        seconds: settings.statement_timeout_seconds,
                    }
                    .to_string(),
                )
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.registry.release(&self.key).await;
        }
        Ok(())
    }

    fn target(&self) -> String {
        self.key.to_string()
    }
}

fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Simple-protocol rows arrive in text format, so every column decodes as text
fn text_values(row: &PgRow) -> std::result::Result<Vec<Option<String>>, sqlx::Error> {
    (0..row.len())
        .map(|idx| row.try_get_unchecked::<Option<String>, _>(idx))
        .collect()
}

/// Server-side message when available, without the driver prefix
fn error_message(err: &sqlx::Error) -> String {
    match err.as_database_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
