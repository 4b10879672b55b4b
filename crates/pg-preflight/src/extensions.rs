//! Extension availability on the destination.
//!
//! Unlike [`ConflictDetector::detect_missing_extensions`](crate::conflicts::ConflictDetector::detect_missing_extensions),
//! which compares installed extensions, this checks whether the destination
//! could install them at all. The two answers can disagree.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::discovery::CatalogSource;
use crate::error::Result;

/// Validates that the source's extensions can be installed on the destination.
#[derive(Clone)]
pub struct ExtensionValidator {
    catalog: Arc<dyn CatalogSource>,
}

impl ExtensionValidator {
    pub fn new(catalog: Arc<dyn CatalogSource>) -> Self {
        Self { catalog }
    }

    /// One message per (source database, extension) that the destination
    /// does not offer in `pg_available_extensions`. Empty means every
    /// extension can be installed.
    pub async fn validate_extensions(
        &self,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        info!(
            "Validating extensions between {} and {}",
            source, destination
        );

        let available: HashSet<String> = self
            .catalog
            .available_extensions(destination, cancel)
            .await?
            .into_iter()
            .collect();

        let mut errors = Vec::new();
        for db in self.catalog.discover_databases(source, cancel).await? {
            let extensions = self
                .catalog
                .discover_extensions(source, &db.name, cancel)
                .await?;

            for ext in extensions.iter().filter(|e| !available.contains(&e.name)) {
                let message = format!(
                    "Extension '{}' (required by database '{}') is not available on destination instance '{}'",
                    ext.name, db.name, destination
                );
                error!("{}", message);
                errors.push(message);
            }
        }

        if errors.is_empty() {
            info!("All required extensions are available on destination");
        } else {
            error!("Found {} missing extensions on destination", errors.len());
        }

        Ok(errors)
    }

    /// Extension names the instance could install.
    pub async fn available_extensions(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.catalog.available_extensions(instance, cancel).await
    }
}
