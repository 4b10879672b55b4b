//! pg-preflight CLI - pre-flight checks for PostgreSQL migrations.

use clap::{Parser, Subcommand};
use pg_preflight::{
    Config, ConflictInfo, ConflictSummary, ConnectionProvider, DatabaseInfo, ExtensionValidator,
    HealthChecker, MappingConfig, Preflight, PreflightError, SchemaDiscovery,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-preflight")]
#[command(about = "Pre-flight checks for PostgreSQL to PostgreSQL migrations")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file without connecting
    CheckConfig,

    /// Test connections to every configured instance
    HealthCheck,

    /// List user databases on an instance
    ListDatabases {
        /// Instance name from the configuration
        #[arg(long)]
        instance: String,
    },

    /// Discover schema objects on an instance
    Discover {
        /// Instance name from the configuration
        #[arg(long)]
        instance: String,

        /// Only this database (default: all user databases)
        #[arg(long)]
        database: Option<String>,

        /// Count rows exactly instead of using planner estimates (scans every table)
        #[arg(long)]
        exact_counts: bool,

        /// Also read current sequence values from this destination instance
        #[arg(long)]
        sequences_from: Option<String>,
    },

    /// Detect database, role and extension conflicts
    Conflicts {
        /// Mapping id (source->destination); default: all mappings
        #[arg(long)]
        mapping: Option<String>,
    },

    /// Check that source extensions can be installed on the destination
    Extensions {
        /// Mapping id (source->destination); default: all mappings
        #[arg(long)]
        mapping: Option<String>,
    },

    /// Check for sessions connected to a destination database
    ActiveConnections {
        /// Instance name from the configuration
        #[arg(long)]
        instance: String,

        /// Database name
        #[arg(long)]
        database: String,
    },

    /// Full pre-flight assessment: discovery plus conflict detection
    Assess {
        /// Mapping id (source->destination); default: all mappings
        #[arg(long)]
        mapping: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

/// Returns whether every check passed.
async fn run() -> Result<bool, PreflightError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Arc::new(Config::load(&cli.config)?);
    info!(
        "Loaded configuration from {:?} (hash {})",
        cli.config,
        config.hash()
    );

    let cancel = setup_signal_handler();
    let provider = ConnectionProvider::new(config.clone());

    match cli.command {
        Commands::CheckConfig => {
            if cli.output_json {
                let report = serde_json::json!({
                    "valid": true,
                    "instances": config.instances.keys().collect::<Vec<_>>(),
                    "mappings": config.mappings.iter().map(|m| m.mapping_id()).collect::<Vec<_>>(),
                    "hash": config.hash(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Configuration is valid");
                println!("  Instances: {}", config.instances.len());
                for (name, instance) in &config.instances {
                    println!(
                        "    {} ({}:{}, ssl_mode={})",
                        name, instance.server, instance.port, instance.ssl_mode
                    );
                }
                println!("  Mappings: {}", config.mappings.len());
                for mapping in &config.mappings {
                    println!(
                        "    {} (role conflicts: {:?})",
                        mapping.mapping_id(),
                        mapping.role_conflict_strategy
                    );
                }
                println!("  Hash: {}", config.hash());
            }
            Ok(true)
        }

        Commands::HealthCheck => {
            let results = HealthChecker::for_provider(provider)
                .check_all_instances(&cancel)
                .await;
            let healthy = results.values().all(|ok| *ok);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Health Check Results:");
                for (name, ok) in &results {
                    println!("  {}: {}", name, if *ok { "OK" } else { "FAILED" });
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }
            Ok(healthy)
        }

        Commands::ListDatabases { instance } => {
            let databases = provider.list_databases(&instance, &cancel).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&databases)?);
            } else {
                for name in &databases {
                    println!("{}", name);
                }
            }
            Ok(true)
        }

        Commands::Discover {
            instance,
            database,
            exact_counts,
            sequences_from,
        } => {
            if let Some(ref destination) = sequences_from {
                if config.instance(destination).is_none() {
                    return Err(PreflightError::UnknownInstance(destination.clone()));
                }
            }

            let discovery = SchemaDiscovery::new(provider);
            let mut databases = match database {
                Some(name) => vec![discovery.discover_database(&instance, &name, &cancel).await?],
                None => discovery.discover_database_tree(&instance, &cancel).await?,
            };

            for db in &mut databases {
                if exact_counts {
                    for table in &mut db.tables {
                        discovery
                            .count_table_rows(&instance, &db.name, table, &cancel)
                            .await?;
                    }
                }
                if let Some(ref destination) = sequences_from {
                    discovery
                        .fill_destination_sequence_values(
                            destination,
                            &db.name,
                            &mut db.sequences,
                            &cancel,
                        )
                        .await?;
                }
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&databases)?);
            } else {
                print_databases(&instance, &databases);
            }
            Ok(true)
        }

        Commands::Conflicts { mapping } => {
            let preflight = Preflight::new(provider);
            let mut passed = true;
            let mut report = serde_json::Map::new();

            for mapping in select_mappings(&config, mapping.as_deref())? {
                let conflicts = preflight
                    .detector()
                    .detect_conflicts(&mapping.source_instance, &mapping.destination_instance, &cancel)
                    .await?;
                let summary = ConflictSummary::from_conflicts(&conflicts);
                passed &= summary.is_clear();

                if cli.output_json {
                    report.insert(
                        mapping.mapping_id(),
                        serde_json::json!({ "summary": summary, "conflicts": conflicts }),
                    );
                } else {
                    println!("Mapping {}:", mapping.mapping_id());
                    print_conflicts(&conflicts, &summary);
                }
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(passed)
        }

        Commands::Extensions { mapping } => {
            let preflight = Preflight::new(provider);
            let validator = ExtensionValidator::new(Arc::new(preflight.discovery().clone()));
            let mut passed = true;
            let mut report = serde_json::Map::new();

            for mapping in select_mappings(&config, mapping.as_deref())? {
                let errors = validator
                    .validate_extensions(&mapping.source_instance, &mapping.destination_instance, &cancel)
                    .await?;
                passed &= errors.is_empty();

                if cli.output_json {
                    report.insert(mapping.mapping_id(), serde_json::json!(errors));
                } else {
                    println!("Mapping {}:", mapping.mapping_id());
                    if errors.is_empty() {
                        println!("  All required extensions are available");
                    }
                    for error in &errors {
                        println!("  ✗ {}", error);
                    }
                }
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(passed)
        }

        Commands::ActiveConnections { instance, database } => {
            let conflicts = Preflight::new(provider)
                .detector()
                .detect_active_connections(&instance, &database, &cancel)
                .await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&conflicts)?);
            } else if conflicts.is_empty() {
                println!("No active connections to {} on {}", database, instance);
            } else {
                print_conflicts(&conflicts, &ConflictSummary::from_conflicts(&conflicts));
            }
            Ok(conflicts.is_empty())
        }

        Commands::Assess { mapping } => {
            let preflight = Preflight::new(provider);
            let mut passed = true;
            let mut assessed = Vec::new();

            for mapping in select_mappings(&config, mapping.as_deref())? {
                let result = preflight.assess(&mapping, &cancel).await?;
                passed &= !result.has_blocking_conflicts();

                if !cli.output_json {
                    println!("Mapping {}:", result.mapping_id);
                    println!("  Status: {:?}", result.status);
                    print_databases(&result.source_instance, &result.databases);
                    print_conflicts(
                        &result.conflicts,
                        &ConflictSummary::from_conflicts(&result.conflicts),
                    );
                    if let Some(ref msg) = result.error_message {
                        println!("  Error: {}", msg);
                    }
                }
                assessed.push(result);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&assessed)?);
            }
            Ok(passed)
        }
    }
}

/// The named mapping, or all of them.
fn select_mappings(config: &Config, mapping_id: Option<&str>) -> Result<Vec<MappingConfig>, PreflightError> {
    match mapping_id {
        Some(id) => config
            .mapping(id)
            .cloned()
            .map(|m| vec![m])
            .ok_or_else(|| PreflightError::Config(format!("Mapping not found: {}", id))),
        None => Ok(config.mappings.clone()),
    }
}

fn print_databases(instance: &str, databases: &[DatabaseInfo]) {
    println!("  Databases on {}: {}", instance, databases.len());
    for db in databases {
        println!(
            "    {} (owner: {}, encoding: {}): {} tables, {} sequences, {} extensions, ~{} rows",
            db.name,
            db.owner.as_deref().unwrap_or("-"),
            db.encoding.as_deref().unwrap_or("-"),
            db.tables.len(),
            db.sequences.len(),
            db.extensions.len(),
            db.estimated_row_count()
        );
        for table in &db.tables {
            if let Some(count) = table.actual_row_count {
                println!("      {}: {} rows", table.full_name(), count);
            }
        }
        for sequence in &db.sequences {
            if let Some(destination) = sequence.current_value_destination {
                println!(
                    "      {}: {} on source, {} on destination",
                    sequence.full_name(),
                    sequence
                        .current_value_source
                        .map_or_else(|| "-".to_string(), |v| v.to_string()),
                    destination
                );
            }
        }
        for table in db.tables.iter().filter(|t| t.is_partitioned) {
            println!(
                "      {} partitioned into {}",
                table.full_name(),
                table.partitions.len()
            );
        }
    }
}

fn print_conflicts(conflicts: &[ConflictInfo], summary: &ConflictSummary) {
    println!(
        "  Conflicts: {} ({} blocking)",
        summary.total, summary.blocking
    );
    for conflict in conflicts {
        let marker = if conflict.is_blocking { "✗" } else { "!" };
        println!("    {} [{:?}] {}", marker, conflict.conflict_type, conflict.description);
        if let Some(ref resolution) = conflict.suggested_resolution {
            println!("      → {}", resolution);
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to set up {} handler: {}", label, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Cancelling pre-flight checks...", label);
            token.cancel();
        });
    }

    cancel_token
}

/// Only Ctrl-C is available off unix.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to set up Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Cancelling pre-flight checks...");
        token.cancel();
    });

    cancel_token
}
