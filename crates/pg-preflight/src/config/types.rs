//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named PostgreSQL instances (sources and destinations).
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceConfig>,

    /// Source -> destination pairs to assess.
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,

    /// Replication, monitoring and retry settings.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Config {
    /// Look up an instance by name.
    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances.get(name)
    }

    /// Find a mapping by its `source->destination` id.
    pub fn mapping(&self, mapping_id: &str) -> Option<&MappingConfig> {
        self.mappings.iter().find(|m| m.mapping_id() == mapping_id)
    }
}

/// Connection settings for one PostgreSQL instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Server hostname or IP address.
    pub server: String,

    /// Port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Username.
    pub username: String,

    /// Password.
    pub password: String,

    /// SSL mode: disable, prefer, require, verify-ca, verify-full (default: disable).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// What to do when a source role already exists on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoleConflictStrategy {
    /// Keep using the existing destination role.
    #[default]
    #[serde(alias = "merge")]
    Merge,

    /// Leave the role out of the migration.
    #[serde(alias = "skip")]
    Skip,

    /// Stop the migration.
    #[serde(alias = "fail")]
    Fail,
}

/// A source -> destination migration pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Source instance name (key in `instances`).
    pub source_instance: String,

    /// Destination instance name (key in `instances`).
    pub destination_instance: String,

    /// Role conflict strategy (default: Merge).
    #[serde(default)]
    pub role_conflict_strategy: RoleConflictStrategy,

    /// Password used when a role's password cannot be carried over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_password: Option<String>,
}

impl MappingConfig {
    /// Unique identifier for this mapping.
    pub fn mapping_id(&self) -> String {
        format!("{}->{}", self.source_instance, self.destination_instance)
    }
}

impl fmt::Debug for MappingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingConfig")
            .field("source_instance", &self.source_instance)
            .field("destination_instance", &self.destination_instance)
            .field("role_conflict_strategy", &self.role_conflict_strategy)
            .field(
                "fallback_password",
                &self.fallback_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Replication and monitoring settings.
///
/// Only the retry and timeout fields are acted on here; the lag and cutover
/// thresholds are carried for the replication monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Rate limit in MB/s (default: 100).
    #[serde(default = "default_rate_limit")]
    pub rate_limit_mbps: u32,

    /// UI refresh interval in seconds (default: 5).
    #[serde(default = "default_ui_refresh")]
    pub ui_refresh_interval_seconds: u32,

    /// WAL lag alert threshold in MB (default: 1024).
    #[serde(default = "default_wal_lag_mb")]
    pub wal_lag_threshold_mb: u32,

    /// WAL lag alert threshold in minutes (default: 5).
    #[serde(default = "default_wal_lag_minutes")]
    pub wal_lag_threshold_minutes: u32,

    /// How long lag must stay low before a mapping is cutover ready (default: 30).
    #[serde(default = "default_cutover_stability")]
    pub cutover_ready_stability_seconds: u32,

    /// Total connection attempts for transient failures (default: 5).
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Delay before the first retry, doubled per retry (default: 1000).
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Connect timeout passed to the driver (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            rate_limit_mbps: default_rate_limit(),
            ui_refresh_interval_seconds: default_ui_refresh(),
            wal_lag_threshold_mb: default_wal_lag_mb(),
            wal_lag_threshold_minutes: default_wal_lag_minutes(),
            cutover_ready_stability_seconds: default_cutover_stability(),
            max_retry_attempts: default_max_retry_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_rate_limit() -> u32 {
    100
}

fn default_ui_refresh() -> u32 {
    5
}

fn default_wal_lag_mb() -> u32 {
    1024
}

fn default_wal_lag_minutes() -> u32 {
    5
}

fn default_cutover_stability() -> u32 {
    30
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    30
}
