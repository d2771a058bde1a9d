//! Connection handles and the named pool registry
//!
//! Models are bound to a [`DatabaseHandle`] at registration time. Handles are
//! named references into a [`PoolRegistry`]; a handle may be registered before
//! its pool is connected, in which case query execution through it fails with
//! a connection error until [`DatabaseHandle::pool`] has something to return.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::error::ModelError;

/// Database resolution error types
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Unknown database '{name}'")]
    UnknownPool { name: String },

    #[error("No default database configured")]
    NoDefaultPool,

    #[error("Database '{name}' is not connected")]
    NotConnected { name: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(#[from] sqlx::Error),
}

impl From<PoolError> for ModelError {
    fn from(err: PoolError) -> Self {
        ModelError::Connection(err.to_string())
    }
}

/// Named reference to a database connection pool.
#[derive(Clone)]
pub struct DatabaseHandle {
    name: Arc<str>,
    pool: Option<Arc<Pool<Postgres>>>,
}

impl DatabaseHandle {
    /// Create a handle that is not yet connected.
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into().into(),
            pool: None,
        }
    }

    /// Create a handle over an existing pool.
    pub fn connected(name: impl Into<String>, pool: Arc<Pool<Postgres>>) -> Self {
        Self {
            name: name.into().into(),
            pool: Some(pool),
        }
    }

    /// Connect a handle by opening a pool against `database_url`.
    pub async fn connect(
        name: impl Into<String>,
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, PoolError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::connected(name, Arc::new(pool)))
    }

    /// Name this handle was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    /// The underlying pool, or a connection error for detached handles.
    pub fn pool(&self) -> Result<&Pool<Postgres>, PoolError> {
        self.pool
            .as_deref()
            .ok_or_else(|| PoolError::NotConnected {
                name: self.name.to_string(),
            })
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .field("connected", &self.pool.is_some())
            .finish()
    }
}

/// Registry of named database handles with an optional default.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: HashMap<String, DatabaseHandle>,
    default: Option<String>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its own name. The first registered handle
    /// becomes the default unless one was set explicitly.
    pub fn register(&mut self, handle: DatabaseHandle) {
        let name = handle.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        tracing::debug!(db = %name, connected = handle.is_connected(), "Registered database handle");
        self.pools.insert(name, handle);
    }

    /// Make `name` the default handle for unqualified lookups.
    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default = Some(name.into());
    }

    /// Resolve a handle by name; `None` resolves the default.
    pub fn get(&self, name: Option<&str>) -> Result<DatabaseHandle, PoolError> {
        let name = match name {
            Some(name) => name,
            None => self.default.as_deref().ok_or(PoolError::NoDefaultPool)?,
        };
        self.pools
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::UnknownPool {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.pools.keys().map(String::as_str).collect()
    }
}

/// Server-side facilities a model can reach once registered.
///
/// The registration layer resolves connection handles through this seam, and
/// models decorated with server injection hold it as `Arc<dyn ServerContext>`.
pub trait ServerContext: Send + Sync + fmt::Debug {
    /// Server name, used in logs.
    fn name(&self) -> &str;

    /// Resolve a database handle; `None` selects the default connection.
    fn db(&self, name: Option<&str>) -> Result<DatabaseHandle, PoolError>;
}
