//! RecordStore - Main entry point for typed record storage
//!
//! A `RecordStore` owns the connection pool, the schema cache and the change
//! feed. Record operations go through a [`Database`] handle bound to the public
//! scope or to one user's private scope; users, devices, relations and assets
//! are methods on the store itself.

mod asset;
mod database;
mod device;
mod relation;
mod user;

pub use database::{Database, RecordCursor};

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;

use crate::config::StoreConfig;
use crate::entity::Device;
use crate::error::{RecordStoreError, Result};
use crate::record::{DatabaseScope, RecordEvent};
use crate::schema::SchemaRegistry;
use crate::sql::ddl::DdlGenerator;
use crate::types::RecordSchema;

/// Typed record store backed by one PostgreSQL schema
///
/// Every table lives in the `app_<name>` schema derived from the configured
/// application name. Schemas resolved through this handle are cached on it;
/// other handles keep their own caches.
pub struct RecordStore {
    /// Database connection pool
    pool: PgPool,
    /// Store configuration
    config: StoreConfig,
    /// Record schemas resolved through this handle
    schemas: SchemaRegistry,
    /// Committed record changes
    events: broadcast::Sender<RecordEvent>,
}

impl RecordStore {
    /// Create a new RecordStore from configuration
    ///
    /// This will:
    /// 1. Connect to the database
    /// 2. Create the application schema and internal tables if they don't exist
    pub async fn new(config: StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                RecordStoreError::Connection(format!("Database connection failed: {}", e))
            })?;

        Self::from_pool(pool, config).await
    }

    /// Create a new RecordStore from an existing pool
    pub async fn from_pool(pool: PgPool, config: StoreConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        let store = Self {
            pool,
            config,
            schemas: SchemaRegistry::new(),
            events,
        };
        store.ensure_internal_tables().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Handle on records shared by every user
    pub fn public_db(&self) -> Database<'_> {
        Database::new(self, DatabaseScope::Public)
    }

    /// Handle on the records owned by `user_id`
    pub fn private_db(&self, user_id: impl Into<String>) -> Database<'_> {
        Database::new(self, DatabaseScope::Private(user_id.into()))
    }

    /// Receive every record change committed through this store
    ///
    /// Events are only delivered to receivers that exist when the change
    /// commits. A receiver falling more than `event_capacity` events behind
    /// skips the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }

    /// Schema of `record_type` currently cached on this handle
    pub fn cached_schema(&self, record_type: &str) -> Option<RecordSchema> {
        self.schemas.cached(record_type)
    }

    pub(crate) fn ddl(&self) -> DdlGenerator<'_> {
        DdlGenerator::new(&self.config)
    }

    pub(crate) fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub(crate) fn publish(&self, event: RecordEvent) {
        // No receivers is not an error
        let _ = self.events.send(event);
    }

    async fn ensure_internal_tables(&self) -> Result<()> {
        let ddl = self.ddl();
        let mut tx = self.pool.begin().await?;

        sqlx::query(&ddl.generate_create_schema())
            .execute(&mut *tx)
            .await?;
        for statement in ddl.generate_internal_tables() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::info!(schema = %self.config.schema_name(), "internal tables ready");
        Ok(())
    }
}

/// Device resolution for notification delivery
#[async_trait]
pub trait DeviceLookup: Send + Sync {
    /// Fetch a device by id, failing with `NotFound` if it is not registered
    async fn get_device(&self, id: &str) -> Result<Device>;
}

#[async_trait]
impl DeviceLookup for RecordStore {
    async fn get_device(&self, id: &str) -> Result<Device> {
        RecordStore::get_device(self, id).await
    }
}
