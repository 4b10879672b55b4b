//! Conflict detection between a source and a destination instance.
//!
//! Conflicts are recomputed from live catalog reads on every call. The
//! comparison itself lives in pure functions so it can be checked without
//! a server.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RoleConflictStrategy;
use crate::connection::MAINTENANCE_DATABASE;
use crate::discovery::CatalogSource;
use crate::error::Result;
use crate::model::{ConflictInfo, ConflictType, DatabaseInfo, ExtensionInfo, RoleInfo};

/// What the role migration should do with a source role that already
/// exists on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleResolution {
    /// Keep the destination role and grant through it.
    UseExisting,
    /// Leave the role out.
    SkipRole,
    /// Stop the migration.
    Abort(String),
}

impl RoleConflictStrategy {
    /// Resolve a role name collision according to this strategy.
    pub fn resolve(&self, source: &RoleInfo, destination: &RoleInfo) -> RoleResolution {
        match self {
            RoleConflictStrategy::Merge => RoleResolution::UseExisting,
            RoleConflictStrategy::Skip => RoleResolution::SkipRole,
            RoleConflictStrategy::Fail => {
                let detail = if source.differs_from(destination) {
                    "with different properties"
                } else {
                    "with matching properties"
                };
                RoleResolution::Abort(format!(
                    "Role '{}' already exists on destination {} and role_conflict_strategy is Fail",
                    source.name, detail
                ))
            }
        }
    }
}

/// Counts over a conflict list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictSummary {
    pub total: usize,
    pub blocking: usize,
    pub by_type: BTreeMap<String, usize>,
}

impl ConflictSummary {
    pub fn from_conflicts(conflicts: &[ConflictInfo]) -> Self {
        let mut by_type = BTreeMap::new();
        for conflict in conflicts {
            *by_type
                .entry(format!("{:?}", conflict.conflict_type))
                .or_insert(0) += 1;
        }
        Self {
            total: conflicts.len(),
            blocking: conflicts.iter().filter(|c| c.is_blocking).count(),
            by_type,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.blocking == 0
    }
}

/// Detects conflicts that would block or complicate a migration.
#[derive(Clone)]
pub struct ConflictDetector {
    catalog: Arc<dyn CatalogSource>,
}

impl ConflictDetector {
    pub fn new(catalog: Arc<dyn CatalogSource>) -> Self {
        Self { catalog }
    }

    /// Database, role and missing-extension conflicts, in that order.
    ///
    /// Active connections are not part of this aggregate; ask for them
    /// per database with [`detect_active_connections`](Self::detect_active_connections).
    pub async fn detect_conflicts(
        &self,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConflictInfo>> {
        info!(
            "Detecting conflicts between {} and {}",
            source, destination
        );

        let mut conflicts = self
            .detect_database_conflicts(source, destination, cancel)
            .await?;
        conflicts.extend(self.detect_role_conflicts(source, destination, cancel).await?);
        conflicts.extend(
            self.detect_missing_extensions(source, destination, cancel)
                .await?,
        );

        let blocking = conflicts.iter().filter(|c| c.is_blocking).count();
        info!(
            "Found {} conflicts ({} blocking)",
            conflicts.len(),
            blocking
        );
        Ok(conflicts)
    }

    /// Source databases whose name is already taken on the destination.
    pub async fn detect_database_conflicts(
        &self,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConflictInfo>> {
        let source_dbs = self.catalog.discover_databases(source, cancel).await?;
        let dest_dbs = self.catalog.discover_databases(destination, cancel).await?;

        let conflicts = database_conflicts(&source_dbs, &dest_dbs);
        for conflict in &conflicts {
            warn!("Database conflict: {}", conflict.object_name);
        }
        Ok(conflicts)
    }

    /// Source roles whose name is already taken on the destination.
    pub async fn detect_role_conflicts(
        &self,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConflictInfo>> {
        let source_roles = self.catalog.discover_roles(source, cancel).await?;
        let dest_roles = self.catalog.discover_roles(destination, cancel).await?;

        let conflicts = role_conflicts(&source_roles, &dest_roles);
        for conflict in &conflicts {
            info!("Role conflict: {}", conflict.object_name);
        }
        Ok(conflicts)
    }

    /// Extensions installed in a source database but not in its destination
    /// counterpart.
    ///
    /// A source database is compared against the destination database of
    /// the same name when it exists, otherwise against the destination's
    /// maintenance database.
    pub async fn detect_missing_extensions(
        &self,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConflictInfo>> {
        let source_dbs = self.catalog.discover_databases(source, cancel).await?;
        let dest_names: HashSet<String> = self
            .catalog
            .discover_databases(destination, cancel)
            .await?
            .into_iter()
            .map(|db| db.name)
            .collect();

        let mut maintenance_extensions: Option<Vec<ExtensionInfo>> = None;
        let mut conflicts = Vec::new();

        for db in &source_dbs {
            let source_extensions = self
                .catalog
                .discover_extensions(source, &db.name, cancel)
                .await?;

            let missing = if dest_names.contains(&db.name) {
                let dest_extensions = self
                    .catalog
                    .discover_extensions(destination, &db.name, cancel)
                    .await?;
                missing_extension_conflicts(&db.name, &source_extensions, &dest_extensions)
            } else {
                if maintenance_extensions.is_none() {
                    maintenance_extensions = Some(
                        self.catalog
                            .discover_extensions(destination, MAINTENANCE_DATABASE, cancel)
                            .await?,
                    );
                }
                missing_extension_conflicts(
                    &db.name,
                    &source_extensions,
                    maintenance_extensions.as_deref().unwrap_or_default(),
                )
            };

            for conflict in &missing {
                warn!(
                    "Missing extension in {}: {}",
                    db.name, conflict.object_name
                );
            }
            conflicts.extend(missing);
        }

        Ok(conflicts)
    }

    /// Other sessions connected to a destination database.
    ///
    /// A failed check is logged and reported as no conflicts.
    pub async fn detect_active_connections(
        &self,
        destination: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Vec<ConflictInfo> {
        match self
            .catalog
            .count_active_connections(destination, database, cancel)
            .await
        {
            Ok(count) => active_connection_conflicts(database, count),
            Err(e) => {
                warn!(
                    "Could not check active connections for {} on {}: {}",
                    database, destination, e
                );
                Vec::new()
            }
        }
    }
}

/// One blocking conflict per source database also present on the destination.
pub fn database_conflicts(source: &[DatabaseInfo], destination: &[DatabaseInfo]) -> Vec<ConflictInfo> {
    let existing: HashSet<&str> = destination.iter().map(|db| db.name.as_str()).collect();

    source
        .iter()
        .filter(|db| existing.contains(db.name.as_str()))
        .map(|db| {
            ConflictInfo::new(
                ConflictType::DatabaseNameConflict,
                db.name.clone(),
                format!("Database '{}' already exists on destination instance", db.name),
                true,
            )
            .with_resolution(
                "Manual intervention required: Drop database on destination or rename source database",
            )
        })
        .collect()
}

/// One non-blocking conflict per source role also present on the destination.
pub fn role_conflicts(source: &[RoleInfo], destination: &[RoleInfo]) -> Vec<ConflictInfo> {
    let existing: HashMap<&str, &RoleInfo> = destination
        .iter()
        .map(|role| (role.name.as_str(), role))
        .collect();

    source
        .iter()
        .filter_map(|role| {
            let dest = existing.get(role.name.as_str())?;
            let properties = if role.differs_from(dest) {
                "Properties differ between source and destination."
            } else {
                "Properties match."
            };
            Some(
                ConflictInfo::new(
                    ConflictType::RoleNameConflict,
                    role.name.clone(),
                    format!(
                        "Role '{}' already exists on destination. {}",
                        role.name, properties
                    ),
                    false,
                )
                .with_resolution(
                    "Role conflict strategy in configuration will determine behavior (Merge/Skip/Fail)",
                ),
            )
        })
        .collect()
}

/// One blocking conflict per source extension absent from `destination`.
pub fn missing_extension_conflicts(
    database: &str,
    source: &[ExtensionInfo],
    destination: &[ExtensionInfo],
) -> Vec<ConflictInfo> {
    let installed: HashSet<&str> = destination.iter().map(|e| e.name.as_str()).collect();

    source
        .iter()
        .filter(|ext| !installed.contains(ext.name.as_str()))
        .map(|ext| {
            ConflictInfo::new(
                ConflictType::MissingExtension,
                ext.name.clone(),
                format!(
                    "Extension '{}' (version {}) required by source database '{}' is not available on destination",
                    ext.name,
                    ext.version.as_deref().unwrap_or("unknown"),
                    database
                ),
                true,
            )
            .with_resolution(format!(
                "Install extension '{}' on destination instance before proceeding",
                ext.name
            ))
        })
        .collect()
}

fn active_connection_conflicts(database: &str, count: i64) -> Vec<ConflictInfo> {
    if count <= 0 {
        return Vec::new();
    }
    vec![ConflictInfo::new(
        ConflictType::ActiveConnectionsOnDestination,
        database,
        format!(
            "Database '{}' on destination has {} active connections",
            database, count
        ),
        true,
    )
    .with_resolution("Close all connections to the destination database before migration")]
}
