//! Pre-flight assessment of one mapping.
//!
//! Fills a [`MigrationMapping`] with the source's database tree and the
//! aggregate conflict list, and sets its phase and status from the result.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MappingConfig;
use crate::conflicts::{ConflictDetector, ConflictSummary};
use crate::connection::ConnectionProvider;
use crate::discovery::SchemaDiscovery;
use crate::error::Result;
use crate::model::{ConflictInfo, DatabaseInfo, MigrationMapping, MigrationPhase, SyncStatus};

/// Runs discovery and conflict detection for configured mappings.
#[derive(Clone)]
pub struct Preflight {
    discovery: SchemaDiscovery,
    detector: ConflictDetector,
}

impl Preflight {
    pub fn new(connections: ConnectionProvider) -> Self {
        let discovery = SchemaDiscovery::new(connections);
        let detector = ConflictDetector::new(Arc::new(discovery.clone()));
        Self {
            discovery,
            detector,
        }
    }

    pub fn discovery(&self) -> &SchemaDiscovery {
        &self.discovery
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Assess one mapping. Read-only on both instances.
    pub async fn assess(
        &self,
        mapping_config: &MappingConfig,
        cancel: &CancellationToken,
    ) -> Result<MigrationMapping> {
        let mut mapping = MigrationMapping::new(mapping_config);
        info!("Assessing mapping {}", mapping.mapping_id);

        let databases = self
            .discovery
            .discover_database_tree(&mapping.source_instance, cancel)
            .await?;

        let conflicts = self
            .detector
            .detect_conflicts(
                &mapping.source_instance,
                &mapping.destination_instance,
                cancel,
            )
            .await?;

        apply_assessment(&mut mapping, databases, conflicts);

        let summary = ConflictSummary::from_conflicts(&mapping.conflicts);
        if summary.is_clear() {
            info!(
                "Mapping {} passed pre-flight checks ({} databases, {} non-blocking conflicts)",
                mapping.mapping_id,
                mapping.databases.len(),
                summary.total
            );
        } else {
            warn!(
                "Mapping {} has {} blocking conflicts",
                mapping.mapping_id, summary.blocking
            );
        }

        Ok(mapping)
    }
}

/// Record discovery and conflict results on `mapping`.
///
/// A mapping with blocking conflicts is marked `Problematic`; otherwise it
/// stays in `PreFlightCheck` until the orchestrator moves it on.
pub fn apply_assessment(
    mapping: &mut MigrationMapping,
    databases: Vec<DatabaseInfo>,
    conflicts: Vec<ConflictInfo>,
) {
    mapping.databases = databases;
    mapping.conflicts = conflicts;
    mapping.current_phase = MigrationPhase::ConflictDetection;

    let blocking = mapping.blocking_conflicts().count();
    if blocking > 0 {
        mapping.status = SyncStatus::Problematic;
        mapping.error_message = Some(format!(
            "{} blocking conflicts must be resolved before migration",
            blocking
        ));
    } else {
        mapping.status = SyncStatus::PreFlightCheck;
        mapping.error_message = None;
    }
    mapping.last_updated = Utc::now();
}
