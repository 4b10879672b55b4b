//! In-memory catalog for reconciler tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::discovery::CatalogSource;
use crate::error::{PreflightError, Result};
use crate::model::{DatabaseInfo, ExtensionInfo, RoleInfo};

#[derive(Default)]
pub struct FakeCatalog {
    databases: HashMap<String, Vec<String>>,
    roles: HashMap<String, Vec<RoleInfo>>,
    extensions: HashMap<(String, String), Vec<String>>,
    available: HashMap<String, Vec<String>>,
    active_connections: HashMap<(String, String), i64>,
    unreachable: Vec<String>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_databases(mut self, instance: &str, names: &[&str]) -> Self {
        self.databases.insert(
            instance.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    pub fn with_roles(mut self, instance: &str, roles: Vec<RoleInfo>) -> Self {
        self.roles.insert(instance.to_string(), roles);
        self
    }

    pub fn with_extensions(mut self, instance: &str, database: &str, names: &[&str]) -> Self {
        self.extensions.insert(
            (instance.to_string(), database.to_string()),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    pub fn with_available(mut self, instance: &str, names: &[&str]) -> Self {
        self.available.insert(
            instance.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    pub fn with_active_connections(mut self, instance: &str, database: &str, count: i64) -> Self {
        self.active_connections
            .insert((instance.to_string(), database.to_string()), count);
        self
    }

    /// Every read against `instance` fails.
    pub fn unreachable(mut self, instance: &str) -> Self {
        self.unreachable.push(instance.to_string());
        self
    }

    fn check(&self, instance: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PreflightError::Cancelled);
        }
        if self.unreachable.iter().any(|i| i == instance) {
            return Err(PreflightError::Config(format!(
                "instance {} is unreachable",
                instance
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn discover_databases(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>> {
        self.check(instance, cancel)?;
        Ok(self
            .databases
            .get(instance)
            .map(|names| names.iter().map(DatabaseInfo::new).collect())
            .unwrap_or_default())
    }

    async fn discover_roles(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RoleInfo>> {
        self.check(instance, cancel)?;
        Ok(self.roles.get(instance).cloned().unwrap_or_default())
    }

    async fn discover_extensions(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtensionInfo>> {
        self.check(instance, cancel)?;
        Ok(self
            .extensions
            .get(&(instance.to_string(), database.to_string()))
            .map(|names| {
                names
                    .iter()
                    .map(|n| {
                        let mut ext = ExtensionInfo::new(n.as_str());
                        ext.version = Some("1.0".to_string());
                        ext.schema = Some("public".to_string());
                        ext
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn available_extensions(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.check(instance, cancel)?;
        Ok(self.available.get(instance).cloned().unwrap_or_default())
    }

    async fn count_active_connections(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        self.check(instance, cancel)?;
        Ok(self
            .active_connections
            .get(&(instance.to_string(), database.to_string()))
            .copied()
            .unwrap_or(0))
    }
}
