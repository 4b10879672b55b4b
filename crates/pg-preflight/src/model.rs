//! Domain model shared with the orchestrator and UI.
//!
//! Everything here is a plain value. Discovery results are snapshots of a
//! single catalog query and are never merged across calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MappingConfig;

/// Migration phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum MigrationPhase {
    #[default]
    NotStarted,
    PreFlight,
    SchemaDiscovery,
    ConflictDetection,
    SchemaMigration,
    SequenceMigration,
    RoleMigration,
    PermissionMigration,
    ReplicationSetup,
    InitialDataSync,
    ContinuousSync,
    CutoverReady,
    Completed,
}

/// Synchronization status for a mapping, database, table or partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    #[default]
    NotStarted,
    PreFlightCheck,
    SchemaMigration,
    RoleMigration,
    ReplicationSetup,
    InitialSync,
    /// Continuous replication, still catching up.
    InCatchup,
    /// Lag within thresholds.
    Synced,
    /// Lag minimal and stable.
    CutoverReady,
    /// Error or replication issue detected.
    Problematic,
    Completed,
    Failed,
}

/// A database on an instance, with its objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub owner: Option<String>,
    pub encoding: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub sequences: Vec<SequenceInfo>,
    #[serde(default)]
    pub extensions: Vec<ExtensionInfo>,
    #[serde(default)]
    pub status: SyncStatus,
    pub last_updated: DateTime<Utc>,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            encoding: None,
            tables: Vec::new(),
            sequences: Vec::new(),
            extensions: Vec::new(),
            status: SyncStatus::NotStarted,
            last_updated: Utc::now(),
        }
    }

    /// Sum of planner row estimates over all tables.
    pub fn estimated_row_count(&self) -> i64 {
        self.tables.iter().map(|t| t.estimated_row_count).sum()
    }
}

/// A regular or partitioned table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub is_partitioned: bool,
    #[serde(default)]
    pub partitions: Vec<PartitionInfo>,
    /// From `pg_class.reltuples`.
    pub estimated_row_count: i64,
    /// Exact `count(*)`, only filled on request.
    pub actual_row_count: Option<i64>,
    #[serde(default)]
    pub status: SyncStatus,
    pub last_updated: DateTime<Utc>,
}

impl TableInfo {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            is_partitioned: false,
            partitions: Vec::new(),
            estimated_row_count: 0,
            actual_row_count: None,
            status: SyncStatus::NotStarted,
            last_updated: Utc::now(),
        }
    }

    /// Fully qualified name (`schema.table`).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// One child partition of a partitioned table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub schema: String,
    pub name: String,
    /// `schema.table` of the parent. A lookup key, not a reference.
    pub parent_table: Option<String>,
    /// RANGE, LIST or HASH.
    pub partition_strategy: Option<String>,
    /// Partition bound expression, e.g. `FOR VALUES FROM ('2024-01-01') TO ('2024-02-01')`.
    pub partition_expression: Option<String>,
    pub estimated_row_count: i64,
    #[serde(default)]
    pub status: SyncStatus,
    pub last_updated: DateTime<Utc>,
}

impl PartitionInfo {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub schema: String,
    pub name: String,
    pub current_value_source: Option<i64>,
    pub current_value_destination: Option<i64>,
    /// e.g. bigint, integer
    pub data_type: Option<String>,
    pub increment_by: Option<i64>,
    #[serde(default)]
    pub status: SyncStatus,
    pub last_updated: DateTime<Utc>,
}

impl SequenceInfo {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub name: String,
    pub is_superuser: bool,
    pub can_login: bool,
    /// Only present when the catalog exposes it unmasked.
    pub password_hash: Option<String>,
    #[serde(default)]
    pub password_migrated: bool,
    #[serde(default)]
    pub exists_on_destination: bool,
    #[serde(default)]
    pub status: SyncStatus,
    pub last_updated: DateTime<Utc>,
}

impl RoleInfo {
    pub fn new(name: impl Into<String>, is_superuser: bool, can_login: bool) -> Self {
        Self {
            name: name.into(),
            is_superuser,
            can_login,
            password_hash: None,
            password_migrated: false,
            exists_on_destination: false,
            status: SyncStatus::NotStarted,
            last_updated: Utc::now(),
        }
    }

    /// Whether the attributes compared during conflict detection differ.
    pub fn differs_from(&self, other: &RoleInfo) -> bool {
        self.is_superuser != other.is_superuser || self.can_login != other.can_login
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    /// e.g. "uuid-ossp", "pg_trgm"
    pub name: String,
    pub version: Option<String>,
    pub schema: Option<String>,
    #[serde(default)]
    pub exists_on_destination: bool,
}

impl ExtensionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            schema: None,
            exists_on_destination: false,
        }
    }
}

/// Kind of conflict detected between source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictType {
    /// Database name already exists on destination.
    DatabaseNameConflict,
    /// Role name already exists on destination.
    RoleNameConflict,
    SchemaObjectConflict,
    /// Extension installed on source but not on destination.
    MissingExtension,
    ActiveConnectionsOnDestination,
    Other,
}

/// A detected conflict. Recomputed on every detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub conflict_type: ConflictType,
    pub object_name: String,
    pub description: String,
    pub suggested_resolution: Option<String>,
    pub is_blocking: bool,
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    pub fn new(
        conflict_type: ConflictType,
        object_name: impl Into<String>,
        description: impl Into<String>,
        is_blocking: bool,
    ) -> Self {
        Self {
            conflict_type,
            object_name: object_name.into(),
            description: description.into(),
            suggested_resolution: None,
            is_blocking,
            detected_at: Utc::now(),
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.suggested_resolution = Some(resolution.into());
        self
    }
}

/// Replication slot snapshot, filled by the replication monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSlotInfo {
    pub slot_name: String,
    /// e.g. "pgoutput"
    pub plugin: Option<String>,
    pub current_wal_position: Option<String>,
    pub confirmed_flush_lsn: Option<String>,
    pub wal_lag_bytes: i64,
    pub time_lag_minutes: Option<f64>,
    pub is_lag_acceptable: bool,
    pub last_updated: DateTime<Utc>,
}

impl ReplicationSlotInfo {
    pub fn wal_lag_mb(&self) -> f64 {
        self.wal_lag_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Everything known about one source -> destination mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationMapping {
    pub mapping_id: String,
    pub source_instance: String,
    pub destination_instance: String,
    pub current_phase: MigrationPhase,
    pub status: SyncStatus,
    /// Databases discovered on the source.
    pub databases: Vec<DatabaseInfo>,
    pub conflicts: Vec<ConflictInfo>,
    pub replication_slot: Option<ReplicationSlotInfo>,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl MigrationMapping {
    pub fn new(config: &MappingConfig) -> Self {
        Self {
            mapping_id: config.mapping_id(),
            source_instance: config.source_instance.clone(),
            destination_instance: config.destination_instance.clone(),
            current_phase: MigrationPhase::NotStarted,
            status: SyncStatus::NotStarted,
            databases: Vec::new(),
            conflicts: Vec::new(),
            replication_slot: None,
            last_updated: Utc::now(),
            error_message: None,
        }
    }

    /// Derived from `status`; never stored.
    pub fn is_cutover_ready(&self) -> bool {
        self.status == SyncStatus::CutoverReady
    }

    pub fn blocking_conflicts(&self) -> impl Iterator<Item = &ConflictInfo> {
        self.conflicts.iter().filter(|c| c.is_blocking)
    }

    pub fn has_blocking_conflicts(&self) -> bool {
        self.conflicts.iter().any(|c| c.is_blocking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleConflictStrategy;

    fn mapping_config() -> MappingConfig {
        MappingConfig {
            source_instance: "legacy".to_string(),
            destination_instance: "cloud".to_string(),
            role_conflict_strategy: RoleConflictStrategy::Merge,
            fallback_password: None,
        }
    }

    #[test]
    fn test_phases_are_ordered() {
        assert!(MigrationPhase::NotStarted < MigrationPhase::PreFlight);
        assert!(MigrationPhase::ConflictDetection < MigrationPhase::SchemaMigration);
        assert!(MigrationPhase::CutoverReady < MigrationPhase::Completed);
    }

    #[test]
    fn test_cutover_ready_follows_status() {
        let mut mapping = MigrationMapping::new(&mapping_config());
        assert_eq!(mapping.mapping_id, "legacy->cloud");
        assert!(!mapping.is_cutover_ready());

        mapping.status = SyncStatus::CutoverReady;
        assert!(mapping.is_cutover_ready());

        // Phase alone does not make a mapping ready
        mapping.status = SyncStatus::Synced;
        mapping.current_phase = MigrationPhase::CutoverReady;
        assert!(!mapping.is_cutover_ready());
    }

    #[test]
    fn test_blocking_conflicts() {
        let mut mapping = MigrationMapping::new(&mapping_config());
        mapping.conflicts.push(ConflictInfo::new(
            ConflictType::RoleNameConflict,
            "app_user",
            "exists",
            false,
        ));
        assert!(!mapping.has_blocking_conflicts());

        mapping.conflicts.push(ConflictInfo::new(
            ConflictType::DatabaseNameConflict,
            "orders",
            "exists",
            true,
        ));
        assert!(mapping.has_blocking_conflicts());
        let names: Vec<&str> = mapping
            .blocking_conflicts()
            .map(|c| c.object_name.as_str())
            .collect();
        assert_eq!(names, vec!["orders"]);
    }

    #[test]
    fn test_full_names() {
        let table = TableInfo::new("sales", "orders");
        assert_eq!(table.full_name(), "sales.orders");
    }

    #[test]
    fn test_role_differs() {
        let a = RoleInfo::new("app", false, true);
        let b = RoleInfo::new("app", true, true);
        assert!(a.differs_from(&b));
        assert!(!a.differs_from(&a.clone()));
    }

    #[test]
    fn test_wal_lag_mb() {
        let slot = ReplicationSlotInfo {
            slot_name: "preflight_slot".to_string(),
            plugin: Some("pgoutput".to_string()),
            current_wal_position: None,
            confirmed_flush_lsn: None,
            wal_lag_bytes: 3 * 1024 * 1024,
            time_lag_minutes: None,
            is_lag_acceptable: true,
            last_updated: Utc::now(),
        };
        assert_eq!(slot.wal_lag_mb(), 3.0);
    }

    #[test]
    fn test_mapping_serializes_without_derived_flag() {
        let mapping = MigrationMapping::new(&mapping_config());
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["mapping_id"], "legacy->cloud");
        assert_eq!(json["status"], "NotStarted");
        assert!(json.get("is_cutover_ready").is_none());
    }
}
