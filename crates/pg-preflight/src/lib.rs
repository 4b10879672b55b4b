//! # pg-preflight
//!
//! Pre-flight assessment for PostgreSQL-to-PostgreSQL migrations.
//!
//! This library connects to named PostgreSQL instances, inventories their
//! schema objects and reports what would block or complicate a migration:
//!
//! - **Connection provider** with retry and exponential backoff
//! - **Catalog discovery** of databases, tables, partitions, sequences, roles and extensions
//! - **Conflict detection** between a source and a destination instance
//! - **Extension availability** on the destination
//! - **Health checks** across all configured instances
//!
//! Nothing is written to either instance.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pg_preflight::{Config, ConnectionProvider, Preflight};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_preflight::Result<()> {
//!     let config = Arc::new(Config::load("config.yaml")?);
//!     let preflight = Preflight::new(ConnectionProvider::new(config.clone()));
//!     let cancel = CancellationToken::new();
//!     for mapping in &config.mappings {
//!         let assessed = preflight.assess(mapping, &cancel).await?;
//!         println!("{}: {} conflicts", assessed.mapping_id, assessed.conflicts.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod conflicts;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod extensions;
pub mod health;
pub mod model;
pub mod preflight;
pub mod retry;
pub mod tls;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use config::{Config, InstanceConfig, MappingConfig, ReplicationConfig, RoleConflictStrategy};
pub use conflicts::{ConflictDetector, ConflictSummary, RoleResolution};
pub use connection::{ConnectionProvider, PgConnection};
pub use discovery::{merge_destination_sequence_values, CatalogSource, SchemaDiscovery};
pub use error::{PreflightError, Result};
pub use extensions::ExtensionValidator;
pub use health::{ConnectionTester, HealthChecker};
pub use model::{
    ConflictInfo, ConflictType, DatabaseInfo, ExtensionInfo, MigrationMapping, MigrationPhase,
    PartitionInfo, ReplicationSlotInfo, RoleInfo, SequenceInfo, SyncStatus, TableInfo,
};
pub use preflight::Preflight;
pub use retry::RetryPolicy;
pub use tls::SslMode;
