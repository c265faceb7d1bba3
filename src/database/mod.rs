//! Keyed dictionary stores
//!
//! `DictionaryStore` is the capability set the pipeline needs from the
//! persistent dictionaries: exact lookup, prefix lookup and an atomic batch
//! write. The Postgres implementation is bound to concrete tables through
//! `TableBinding`s; the in-memory implementation backs tests and dry runs.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{DictionaryEntry, DictionaryKind};

pub mod memory_store;

#[cfg(feature = "database")]
pub mod dictionary_repository;

pub use memory_store::InMemoryDictionaryStore;

#[cfg(feature = "database")]
pub use dictionary_repository::PgDictionaryStore;

#[cfg(feature = "database")]
use sqlx::{postgres::PgPoolOptions, PgPool};
#[cfg(feature = "database")]
use std::time::Duration;
#[cfg(feature = "database")]
use tracing::{info, warn};

/// Lookup and write operations over both dictionaries
#[async_trait]
pub trait DictionaryStore: Send + Sync {
    /// Every row of `kind` whose key code equals `key_code`.
    ///
    /// Key codes are not enforced unique, so more than one row may return.
    async fn find_by_key(
        &self,
        kind: DictionaryKind,
        key_code: &str,
    ) -> Result<Vec<DictionaryEntry>, StoreError>;

    /// Every row of `kind` whose key code starts with `prefix`.
    async fn find_by_prefix(
        &self,
        kind: DictionaryKind,
        prefix: &str,
    ) -> Result<Vec<DictionaryEntry>, StoreError>;

    /// Persist the external codes of both slices in one unit of work.
    ///
    /// Returns the number of rows updated.
    async fn write_batch(
        &self,
        streets: &[DictionaryEntry],
        settlements: &[DictionaryEntry],
    ) -> Result<u64, StoreError>;
}

/// Table and column names backing one dictionary kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    pub table: String,
    pub id_column: String,
    pub key_column: String,
    pub external_column: String,
}

impl TableBinding {
    pub fn new(table: &str, id_column: &str, key_column: &str, external_column: &str) -> Self {
        Self {
            table: table.to_string(),
            id_column: id_column.to_string(),
            key_column: key_column.to_string(),
            external_column: external_column.to_string(),
        }
    }

    /// Reject names that would need quoting; they are spliced into SQL.
    pub fn validate(&self) -> Result<(), StoreError> {
        for name in [
            &self.table,
            &self.id_column,
            &self.key_column,
            &self.external_column,
        ] {
            let valid = !name.is_empty() && name.split('.').all(is_plain_identifier);
            if !valid {
                return Err(StoreError::InvalidBinding {
                    message: format!("'{}' is not a plain SQL identifier", name),
                });
            }
        }
        Ok(())
    }
}

fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Table bindings for both dictionary kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryBindings {
    pub street: TableBinding,
    pub settlement: TableBinding,
}

impl DictionaryBindings {
    pub fn get(&self, kind: DictionaryKind) -> &TableBinding {
        match kind {
            DictionaryKind::Street => &self.street,
            DictionaryKind::Settlement => &self.settlement,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        self.street.validate()?;
        self.settlement.validate()
    }
}

impl Default for DictionaryBindings {
    /// The legacy KLADR tables.
    fn default() -> Self {
        Self {
            street: TableBinding::new("sprav_kladr_street", "id", "kladr", "external_id"),
            settlement: TableBinding::new("sprav_kladr", "id_kladr", "kladr", "external_id"),
        }
    }
}

/// Database configuration
#[cfg(feature = "database")]
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

#[cfg(feature = "database")]
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/addresses".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }
}

/// Database connection manager
#[cfg(feature = "database")]
pub struct DatabaseManager {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl DatabaseManager {
    /// Create a new database manager with the given configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self, sqlx::Error> {
        info!(
            "Connecting to database: {}",
            mask_database_url(&config.database_url)
        );

        let mut pool_options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout);

        if let Some(idle_timeout) = config.idle_timeout {
            pool_options = pool_options.idle_timeout(idle_timeout);
        }

        if let Some(max_lifetime) = config.max_lifetime {
            pool_options = pool_options.max_lifetime(max_lifetime);
        }

        let pool = pool_options
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                e
            })?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create a new database manager with default configuration
    pub async fn with_default_config() -> Result<Self, sqlx::Error> {
        Self::new(DatabaseConfig::default()).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Dictionary store over the legacy KLADR tables
    pub fn dictionary_store(&self) -> Result<PgDictionaryStore, StoreError> {
        PgDictionaryStore::new(self.pool.clone(), DictionaryBindings::default())
    }

    /// Test database connectivity
    pub async fn test_connection(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

/// Mask sensitive information in database URL for logging
#[cfg(feature = "database")]
fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        return masked.to_string();
    }

    let chars: Vec<char> = url.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 10..].iter().collect();
        format!("{}***{}", head, tail)
    } else {
        "***".to_string()
    }
}
