//! Discovery against real servers.
//!
//! Ignored by default. Point `PG_PREFLIGHT_TEST_CONFIG` at a configuration
//! file whose first mapping names two reachable instances, then run with
//! `--ignored`.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pg_preflight::{
    Config, ConflictDetector, ConflictType, ConnectionProvider, DatabaseInfo, HealthChecker,
    Preflight, SchemaDiscovery, SequenceInfo, SyncStatus,
};
use tokio_util::sync::CancellationToken;

fn live_config() -> Option<Arc<Config>> {
    let path = std::env::var("PG_PREFLIGHT_TEST_CONFIG").ok()?;
    Some(Arc::new(Config::load(path).unwrap()))
}

/// Clear the capture timestamps so two snapshots can be compared.
fn normalized(mut databases: Vec<DatabaseInfo>) -> Vec<DatabaseInfo> {
    let epoch = Utc.timestamp_opt(0, 0).unwrap();
    for db in &mut databases {
        db.last_updated = epoch;
        for table in &mut db.tables {
            table.last_updated = epoch;
            for partition in &mut table.partitions {
                partition.last_updated = epoch;
            }
        }
        for sequence in &mut db.sequences {
            sequence.last_updated = epoch;
        }
    }
    databases
}

#[tokio::test]
#[ignore]
async fn test_discovery_is_repeatable() {
    let Some(config) = live_config() else {
        return;
    };
    let source = config.mappings[0].source_instance.clone();
    let discovery = SchemaDiscovery::new(ConnectionProvider::new(config));
    let cancel = CancellationToken::new();

    let first = discovery.discover_database_tree(&source, &cancel).await.unwrap();
    let second = discovery.discover_database_tree(&source, &cancel).await.unwrap();

    assert_eq!(normalized(first), normalized(second));
}

#[tokio::test]
#[ignore]
async fn test_database_listing_matches_discovery() {
    let Some(config) = live_config() else {
        return;
    };
    let source = config.mappings[0].source_instance.clone();
    let provider = ConnectionProvider::new(config);
    let discovery = SchemaDiscovery::new(provider.clone());
    let cancel = CancellationToken::new();

    let names = provider.list_databases(&source, &cancel).await.unwrap();
    let discovered: Vec<String> = discovery
        .discover_databases(&source, &cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|db| db.name)
        .collect();

    assert_eq!(names, discovered);
    assert!(!names.iter().any(|n| n == "postgres" || n.starts_with("template")));
}

#[tokio::test]
#[ignore]
async fn test_all_instances_healthy() {
    let Some(config) = live_config() else {
        return;
    };
    let expected = config.instances.len();
    let results = HealthChecker::for_provider(ConnectionProvider::new(config))
        .check_all_instances(&CancellationToken::new())
        .await;

    assert_eq!(results.len(), expected);
    assert!(results.values().all(|ok| *ok));
}

#[tokio::test]
#[ignore]
async fn test_assessment_against_itself_conflicts_on_every_database() {
    let Some(config) = live_config() else {
        return;
    };
    let source = config.mappings[0].source_instance.clone();
    let discovery = SchemaDiscovery::new(ConnectionProvider::new(config.clone()));
    let detector = ConflictDetector::new(Arc::new(discovery.clone()));
    let cancel = CancellationToken::new();

    let databases = discovery.discover_databases(&source, &cancel).await.unwrap();
    let conflicts = detector
        .detect_database_conflicts(&source, &source, &cancel)
        .await
        .unwrap();

    assert_eq!(conflicts.len(), databases.len());
    assert!(conflicts
        .iter()
        .all(|c| c.conflict_type == ConflictType::DatabaseNameConflict && c.is_blocking));

    let assessed = Preflight::new(ConnectionProvider::new(config.clone()))
        .assess(&config.mappings[0], &cancel)
        .await
        .unwrap();
    assert_eq!(assessed.databases.len(), databases.len());
}

#[tokio::test]
#[ignore]
async fn test_exact_counts_fill_every_table() {
    let Some(config) = live_config() else {
        return;
    };
    let source = config.mappings[0].source_instance.clone();
    let discovery = SchemaDiscovery::new(ConnectionProvider::new(config));
    let cancel = CancellationToken::new();

    let mut databases = discovery.discover_database_tree(&source, &cancel).await.unwrap();
    for db in &mut databases {
        for table in &mut db.tables {
            let count = discovery
                .count_table_rows(&source, &db.name, table, &cancel)
                .await
                .unwrap();
            assert!(count >= 0);
            assert_eq!(table.actual_row_count, Some(count));
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_sequence_values_against_itself_and_absent_database() {
    let Some(config) = live_config() else {
        return;
    };
    let source = config.mappings[0].source_instance.clone();
    let destination = config.mappings[0].destination_instance.clone();
    let discovery = SchemaDiscovery::new(ConnectionProvider::new(config));
    let cancel = CancellationToken::new();

    for db in discovery.discover_database_tree(&source, &cancel).await.unwrap() {
        let mut sequences = db.sequences.clone();
        discovery
            .fill_destination_sequence_values(&source, &db.name, &mut sequences, &cancel)
            .await
            .unwrap();
        for sequence in &sequences {
            assert_eq!(sequence.current_value_destination, sequence.current_value_source);
        }
    }

    // A database the destination does not have leaves every value unset
    let mut sequences = vec![SequenceInfo {
        schema: "public".to_string(),
        name: "orders_id_seq".to_string(),
        current_value_source: Some(42),
        current_value_destination: Some(1),
        data_type: None,
        increment_by: None,
        status: SyncStatus::NotStarted,
        last_updated: Utc::now(),
    }];
    discovery
        .fill_destination_sequence_values(
            &destination,
            "pg_preflight_absent_database",
            &mut sequences,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(sequences[0].current_value_destination, None);
}
