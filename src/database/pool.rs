//! Keyed PostgreSQL pool registry
//!
//! Sessions pointing at the same `(host, port, database, user)` share one
//! [`PgPool`]. The registry counts references and closes a pool when the last
//! session releases it.

use crate::config::{DatabaseConfig, DatabaseSettings};
use crate::error::{Result, SpatialMindError};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Executor;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;

/// Identity of a shared pool
///
/// The password is not part of the key: two sessions for the same user share
/// the pool opened by whichever connected first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
}

impl ConnectionKey {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            host: config.db_host.trim().to_lowercase(),
            port: config.db_port,
            database: config.db_name.clone(),
            user: config.db_user.clone(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "postgresql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

struct PoolEntry {
    pool: PgPool,
    refs: usize,
}

/// Registry-owned pools with reference-counted lifetime
pub struct PoolRegistry {
    settings: DatabaseSettings,
    pools: Mutex<HashMap<ConnectionKey, PoolEntry>>,
}

impl PoolRegistry {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Get the shared pool for `config`, connecting if none exists
    ///
    /// The registry lock is not held while connecting, so a slow host does
    /// not stall sessions on other databases. When two callers race to open
    /// the same key, the first pool inserted wins and the other is closed.
    ///
    /// # Errors
    ///
    /// Returns a connection error if a new pool cannot reach the database
    /// within the connect timeout
    pub async fn acquire(&self, config: &DatabaseConfig) -> Result<(ConnectionKey, PgPool)> {
        let key = ConnectionKey::from_config(config);
        if let Some(pool) = Self::share(&mut *self.pools.lock().await, &key) {
            return Ok((key, pool));
        }

        let pool = self.connect(config, &key).await?;

        let existing = {
            let mut pools = self.pools.lock().await;
            match Self::share(&mut pools, &key) {
                Some(existing) => Some(existing),
                None => {
                    pools.insert(
                        key.clone(),
                        PoolEntry {
                            pool: pool.clone(),
                            refs: 1,
                        },
                    );
                    None
                }
            }
        };

        match existing {
            Some(existing) => {
                tracing::debug!(target_db = %key, "Lost pool open race; closing duplicate");
                pool.close().await;
                Ok((key, existing))
            }
            None => {
                tracing::info!(target_db = %key, "Opened connection pool");
                Ok((key, pool))
            }
        }
    }

    /// Take a reference on an open pool for `key`, if there is one
    fn share(pools: &mut HashMap<ConnectionKey, PoolEntry>, key: &ConnectionKey) -> Option<PgPool> {
        let entry = pools.get_mut(key)?;
        if entry.pool.is_closed() {
            return None;
        }
        entry.refs += 1;
        tracing::debug!(target_db = %key, refs = entry.refs, "Reusing pooled connection");
        Some(entry.pool.clone())
    }

    async fn connect(&self, config: &DatabaseConfig, key: &ConnectionKey) -> Result<PgPool> {
        let options = PgConnectOptions::new()
            .host(&config.db_host)
            .port(config.db_port)
            .database(&config.db_name)
            .username(&config.db_user)
            .password(&config.db_password)
            .application_name(concat!("spatialmind-", env!("CARGO_PKG_VERSION")));

        let statement_timeout_secs = self.settings.statement_timeout_seconds;
        let connect = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout())
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(
                        format!("SET statement_timeout = '{}s'", statement_timeout_secs).as_str(),
                    )
                    .await?;
                    Ok(())
                })
            })
            .connect_with(options);

        match tokio::time::timeout(self.settings.connect_timeout(), connect).await {
            Ok(Ok(pool)) => Ok(pool),
            Ok(Err(e)) => {
                tracing::error!(target_db = %key, "Database connection failed: {}", e);
                Err(SpatialMindError::Connection(format!("Failed to connect to {}: {}", key, e)).into())
            }
            Err(_) => {
                tracing::error!(target_db = %key, "Database connection timed out");
                Err(SpatialMindError::Connection(format!(
                    "Timed out after {}s connecting to {}",
                    self.settings.connect_timeout_seconds, key
                ))
                .into())
            }
        }
    }

    /// Drop one reference; closes the pool when none remain
    ///
    /// Closing waits at most the configured close timeout for in-flight
    /// statements. Past that the pool keeps closing in the background as
    /// connections are returned.
    pub async fn release(&self, key: &ConnectionKey) {
        let pool = {
            let mut pools = self.pools.lock().await;
            let Some(entry) = pools.get_mut(key) else {
                tracing::debug!(target_db = %key, "Release for unknown pool ignored");
                return;
            };
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                tracing::debug!(target_db = %key, refs = entry.refs, "Released pooled connection");
                return;
            }
            match pools.remove(key) {
                Some(entry) => entry.pool,
                None => return,
            }
        };

        if tokio::time::timeout(self.settings.close_timeout(), pool.close())
            .await
            .is_err()
        {
            tracing::warn!(
                target_db = %key,
                "Pool close did not finish within {}s; in-flight statements will fail",
                self.settings.close_timeout_seconds
            );
        } else {
            tracing::info!(target_db = %key, "Closed connection pool");
        }
    }

    /// Number of open pools
    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
