//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::error::{PreflightError, Result};
use crate::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.instances.is_empty() {
        return Err(PreflightError::Config(
            "No instances configured. Add at least one source and one destination instance."
                .into(),
        ));
    }

    if config.mappings.is_empty() {
        return Err(PreflightError::Config(
            "No mappings configured. Add at least one source->destination mapping.".into(),
        ));
    }

    let mut seen = HashSet::new();
    for mapping in &config.mappings {
        if !config.instances.contains_key(&mapping.source_instance) {
            return Err(PreflightError::Config(format!(
                "Mapping references unknown source instance: {}",
                mapping.source_instance
            )));
        }
        if !config.instances.contains_key(&mapping.destination_instance) {
            return Err(PreflightError::Config(format!(
                "Mapping references unknown destination instance: {}",
                mapping.destination_instance
            )));
        }
        if mapping.source_instance == mapping.destination_instance {
            return Err(PreflightError::Config(format!(
                "Mapping cannot have same source and destination: {}",
                mapping.source_instance
            )));
        }
        if !seen.insert(mapping.mapping_id()) {
            return Err(PreflightError::Config(format!(
                "Duplicate mapping: {}",
                mapping.mapping_id()
            )));
        }
    }

    for (name, instance) in &config.instances {
        if instance.server.trim().is_empty() {
            return Err(PreflightError::Config(format!(
                "Instance '{}' has no server specified.",
                name
            )));
        }
        if instance.username.trim().is_empty() {
            return Err(PreflightError::Config(format!(
                "Instance '{}' has no username specified.",
                name
            )));
        }
        if instance.password.trim().is_empty() {
            return Err(PreflightError::Config(format!(
                "Instance '{}' has no password specified.",
                name
            )));
        }
        // u16 already caps the upper bound
        if instance.port == 0 {
            return Err(PreflightError::Config(format!(
                "Instance '{}' has invalid port: {}",
                name, instance.port
            )));
        }
        SslMode::parse(&instance.ssl_mode).map_err(|e| {
            PreflightError::Config(format!("Instance '{}': {}", name, e))
        })?;
    }

    if config.replication.max_retry_attempts == 0 {
        return Err(PreflightError::Config(
            "replication.max_retry_attempts must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceConfig, MappingConfig, ReplicationConfig, RoleConflictStrategy};

    fn instance(server: &str) -> InstanceConfig {
        InstanceConfig {
            server: server.to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }

    fn mapping(source: &str, destination: &str) -> MappingConfig {
        MappingConfig {
            source_instance: source.to_string(),
            destination_instance: destination.to_string(),
            role_conflict_strategy: RoleConflictStrategy::Merge,
            fallback_password: None,
        }
    }

    fn valid_config() -> Config {
        Config {
            instances: [
                ("legacy".to_string(), instance("pg-old.internal")),
                ("cloud".to_string(), instance("pg-new.internal")),
            ]
            .into_iter()
            .collect(),
            mappings: vec![mapping("legacy", "cloud")],
            replication: ReplicationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_no_instances() {
        let mut config = valid_config();
        config.instances.clear();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("No instances configured"));
    }

    #[test]
    fn test_no_mappings() {
        let mut config = valid_config();
        config.mappings.clear();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("No mappings configured"));
    }

    #[test]
    fn test_unknown_source_instance() {
        let mut config = valid_config();
        config.mappings[0].source_instance = "missing".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("unknown source instance: missing"));
    }

    #[test]
    fn test_unknown_destination_instance() {
        let mut config = valid_config();
        config.mappings[0].destination_instance = "missing".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err
            .to_string()
            .contains("unknown destination instance: missing"));
    }

    #[test]
    fn test_same_source_and_destination() {
        let mut config = valid_config();
        config.mappings[0].destination_instance = "legacy".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("same source and destination"));
    }

    #[test]
    fn test_duplicate_mapping() {
        let mut config = valid_config();
        config.mappings.push(mapping("legacy", "cloud"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate mapping: legacy->cloud"));
    }

    #[test]
    fn test_blank_credentials() {
        let mut config = valid_config();
        config.instances.get_mut("cloud").unwrap().password = "   ".to_string();
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.instances.get_mut("cloud").unwrap().username = String::new();
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.instances.get_mut("legacy").unwrap().server = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_port_zero() {
        let mut config = valid_config();
        config.instances.get_mut("legacy").unwrap().port = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("invalid port: 0"));
    }

    #[test]
    fn test_bad_ssl_mode() {
        let mut config = valid_config();
        config.instances.get_mut("legacy").unwrap().ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_retry_attempts() {
        let mut config = valid_config();
        config.replication.max_retry_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_instance_debug_redacts_password() {
        let mut config = valid_config();
        config.instances.get_mut("legacy").unwrap().password =
            "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.instances["legacy"]);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_mapping_debug_redacts_fallback_password() {
        let mut m = mapping("legacy", "cloud");
        m.fallback_password = Some("fallback_secret_456".to_string());
        let debug_output = format!("{:?}", m);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("fallback_secret_456"));
    }
}
