//! Database collaborator abstraction
//!
//! A session talks to its database through the [`Database`] trait: schema
//! introspection for prompts and raw SQL execution for results. Backends are
//! created by a [`DatabaseConnector`] selected from the session's
//! [`DatabaseConfig`](crate::config::DatabaseConfig).

pub mod pool;
pub mod postgres;
pub mod schema;

use crate::config::DatabaseConfig;
use crate::error::{Result, SpatialMindError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub use pool::{ConnectionKey, PoolRegistry};
pub use postgres::{PostgresConnector, PostgresDatabase};
pub use schema::{
    ColumnDescription, RelationDescription, RelationKind, SchemaDescription, SchemaDetail,
};

/// Outcome of executing one SQL text
///
/// Failure is an ordinary value: `success == false` with an error message and
/// no columns or rows. Every row has exactly `columns.len()` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub columns: Vec<String>,
    /// Text-coerced values; `None` is SQL NULL
    pub rows: Vec<Vec<Option<String>>>,
    pub error: Option<String>,
}

impl QueryResult {
    /// Build a successful result
    ///
    /// # Errors
    ///
    /// Returns a database error if any row's arity differs from the columns
    pub fn success(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(SpatialMindError::Database(format!(
                "row {} has {} values but the result has {} columns",
                idx,
                row.len(),
                columns.len()
            ))
            .into());
        }
        Ok(Self {
            success: true,
            columns,
            rows,
            error: None,
        })
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            error: Some(if error.trim().is_empty() {
                "query failed".to_string()
            } else {
                error
            }),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A connected database bound to one session
#[async_trait]
pub trait Database: Send + Sync {
    /// Describe public tables and views
    ///
    /// # Errors
    ///
    /// Fails as a whole if any catalog or sample query fails; no partial
    /// schema is returned.
    async fn introspect_schema(&self) -> Result<SchemaDescription>;

    /// Run SQL exactly once and commit
    ///
    /// Never fails; errors come back as [`QueryResult::failure`].
    async fn execute(&self, sql: &str) -> QueryResult;

    /// Release the connection; later calls to `execute` fail
    async fn close(&self) -> Result<()>;

    /// Connection target without credentials
    fn target(&self) -> String;
}

/// Creates database handles from per-session configuration
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Validate the configuration and connect
    ///
    /// # Errors
    ///
    /// Configuration errors for unsupported backends, connection errors when
    /// the database is unreachable
    async fn connect(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>>;
}
