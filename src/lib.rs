//! # runtara-record-store
//!
//! A typed record store for application backends, built on PostgreSQL.
//!
//! Each application gets its own PostgreSQL schema holding one table per
//! record type plus internal tables for users, devices, relations and asset
//! metadata. Record types are declared at runtime and only ever grow: fields
//! can be added, never retyped or removed.
//!
//! ## Features
//!
//! - **Runtime Schemas**: Declare record types and extend them with new fields
//! - **Typed Fields**: String, Number, Boolean, DateTime, JSON, Asset, Location, Sequence and Reference
//! - **Public and Private Scopes**: Shared records plus one private database per user
//! - **Predicate Queries**: Comparisons, `LIKE`, `IN`, JSON containment and geographic distance
//! - **Users, Devices and Relations**: Account records, push registrations and directed user edges
//! - **Change Events**: Subscribe to every committed create, update and delete
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runtara_record_store::{
//!     FieldType, Predicate, Query, Record, RecordId, RecordSchema, RecordStore, Sort, StoreConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::builder("postgres://localhost/mydb", "notes").build();
//!     let store = RecordStore::new(config).await?;
//!     let db = store.public_db();
//!
//!     // Declare a record type
//!     let mut schema = RecordSchema::new();
//!     schema.insert("title".to_string(), FieldType::String);
//!     schema.insert("rating".to_string(), FieldType::Number);
//!     db.extend("note", &schema).await?;
//!
//!     // Save a record
//!     let mut note = Record::new(RecordId::new("note", "n1"), "user-1")
//!         .with("title", "Hello")
//!         .with("rating", 4.5);
//!     db.save(&mut note).await?;
//!
//!     // Query records
//!     let cursor = db
//!         .query(
//!             &Query::new("note")
//!                 .with_predicate(Predicate::like("title", "Hel%"))
//!                 .with_sort(Sort::desc("rating"))
//!                 .with_pagination(10, 0),
//!         )
//!         .await?;
//!     for record in &cursor {
//!         println!("{} {:?}", record.id, record.get("title"));
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The store is configured using `StoreConfig`:
//!
//! ```rust
//! use runtara_record_store::StoreConfig;
//!
//! let config = StoreConfig::builder("postgres://localhost/mydb", "My-App")
//!     .max_connections(20)   // Pool size (default 10)
//!     .event_capacity(4096)  // Change events buffered per subscriber (default 1024)
//!     .build();
//!
//! assert_eq!(config.schema_name(), "app_my_app");
//! ```
//!
//! ## Scopes
//!
//! Record types are shared, records are not. [`RecordStore::public_db`] reads
//! and writes records visible to everyone while [`RecordStore::private_db`]
//! is limited to one user's records. A record id belongs to exactly one scope.

mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod query;
pub mod record;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{StoreConfig, StoreConfigBuilder};
pub use entity::{Asset, AuthInfo, Device, Pagination, RelationDirection, UserInfo};
pub use error::{RecordStoreError, Result};
pub use query::{CompareOp, Expression, Function, Predicate, Query, Sort, SortKey, SortOrder};
pub use record::{
    AccessLevel, AclEntry, Data, DatabaseScope, Record, RecordEvent, RecordEventKind,
};
pub use schema::{SchemaRegistry, diff_schema};
pub use store::{Database, DeviceLookup, RecordCursor, RecordStore};
pub use types::{FieldType, Location, RecordId, RecordSchema, Value};

// Re-export SQL utilities for advanced users
pub use sql::condition::{build_condition_clause, build_order_by_clause};
pub use sql::ddl::DdlGenerator;
pub use sql::sanitize::{quote_identifier, validate_name};
