//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{PreflightError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "PGMIGRATOR_";

impl Config {
    /// Load configuration from a YAML file, apply environment overrides and
    /// validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Apply `PGMIGRATOR_INSTANCES__<NAME>__<FIELD>` overrides.
    ///
    /// Instance names are matched case-insensitively. Supported fields are
    /// SERVER, PORT, USERNAME, PASSWORD and SSL_MODE. Variables naming an
    /// unknown instance or field are ignored.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let parts: Vec<&str> = rest.split("__").collect();
            let [section, name, field] = parts.as_slice() else {
                continue;
            };
            if !section.eq_ignore_ascii_case("instances") {
                continue;
            }

            let Some(instance) = self
                .instances
                .iter_mut()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
            else {
                continue;
            };

            match field.to_ascii_uppercase().as_str() {
                "SERVER" => instance.server = value,
                "USERNAME" => instance.username = value,
                "PASSWORD" => instance.password = value,
                "SSL_MODE" => instance.ssl_mode = value,
                "PORT" => {
                    instance.port = value.parse().map_err(|_| {
                        PreflightError::Config(format!("{} is not a valid port: {}", key, value))
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compute a SHA256 fingerprint of the configuration.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
instances:
  legacy:
    server: pg-old.internal
    username: migrator
    password: old-secret
  cloud:
    server: pg-new.internal
    port: 6432
    username: migrator
    password: new-secret
    ssl_mode: require
mappings:
  - source_instance: legacy
    destination_instance: cloud
    role_conflict_strategy: Skip
replication:
  max_retry_attempts: 3
  initial_retry_delay_ms: 250
"#;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.instances.len(), 2);
        assert_eq!(config.instances["legacy"].port, 5432);
        assert_eq!(config.instances["legacy"].ssl_mode, "disable");
        assert_eq!(config.instances["cloud"].port, 6432);
        assert_eq!(
            config.mappings[0].role_conflict_strategy,
            RoleConflictStrategy::Skip
        );
        assert_eq!(config.mappings[0].mapping_id(), "legacy->cloud");
        assert_eq!(config.replication.max_retry_attempts, 3);
        assert_eq!(config.replication.initial_retry_delay_ms, 250);
        assert_eq!(config.replication.wal_lag_threshold_mb, 1024);
        assert!(config.mapping("legacy->cloud").is_some());
        assert!(config.mapping("cloud->legacy").is_none());
    }

    #[test]
    fn test_lowercase_strategy_accepted() {
        let yaml = SAMPLE.replace("role_conflict_strategy: Skip", "role_conflict_strategy: fail");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(
            config.mappings[0].role_conflict_strategy,
            RoleConflictStrategy::Fail
        );
    }

    #[test]
    fn test_out_of_range_port_rejected() {
        let yaml = SAMPLE.replace("port: 6432", "port: 70000");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(PreflightError::Yaml(_))
        ));
    }

    #[test]
    fn test_empty_document_fails_validation() {
        assert!(matches!(
            Config::from_yaml("{}"),
            Err(PreflightError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config
            .apply_env_overrides(vars(&[
                ("PGMIGRATOR_INSTANCES__LEGACY__PASSWORD", "rotated"),
                ("PGMIGRATOR_INSTANCES__CLOUD__PORT", "5433"),
                ("PGMIGRATOR_INSTANCES__MISSING__PASSWORD", "ignored"),
                ("HOME", "/root"),
            ]))
            .unwrap();
        assert_eq!(config.instances["legacy"].password, "rotated");
        assert_eq!(config.instances["cloud"].port, 5433);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_bad_port() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        let result =
            config.apply_env_overrides(vars(&[("PGMIGRATOR_INSTANCES__CLOUD__PORT", "abc")]));
        assert!(matches!(result, Err(PreflightError::Config(_))));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(SAMPLE).unwrap();
        let b = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
