//! Liveness probing across all configured instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionProvider;
use crate::error::Result;

/// Opens a connection and runs a trivial query.
#[async_trait]
pub trait ConnectionTester: Send + Sync {
    async fn test_connection(&self, instance: &str, cancel: &CancellationToken) -> Result<bool>;
}

#[async_trait]
impl ConnectionTester for ConnectionProvider {
    async fn test_connection(&self, instance: &str, cancel: &CancellationToken) -> Result<bool> {
        Ok(ConnectionProvider::test_connection(self, instance, cancel).await)
    }
}

/// Checks every instance concurrently.
#[derive(Clone)]
pub struct HealthChecker {
    tester: Arc<dyn ConnectionTester>,
    instances: Vec<String>,
}

impl HealthChecker {
    pub fn new(tester: Arc<dyn ConnectionTester>, instances: Vec<String>) -> Self {
        Self { tester, instances }
    }

    /// Health-check all instances of the provider's configuration.
    pub fn for_provider(provider: ConnectionProvider) -> Self {
        let instances = provider.config().instances.keys().cloned().collect();
        Self::new(Arc::new(provider), instances)
    }

    /// One task per instance, all started at once. A check that errors or
    /// panics counts as unhealthy and does not affect the others.
    pub async fn check_all_instances(&self, cancel: &CancellationToken) -> BTreeMap<String, bool> {
        info!("Running health check on all instances");

        let handles: Vec<_> = self
            .instances
            .iter()
            .map(|name| {
                let tester = Arc::clone(&self.tester);
                let cancel = cancel.clone();
                let task_name = name.clone();
                let handle = tokio::spawn(async move {
                    check_instance(tester.as_ref(), &task_name, &cancel).await
                });
                (name.clone(), handle)
            })
            .collect();

        let joined = join_all(
            handles
                .into_iter()
                .map(|(name, handle)| async move { (name, handle.await) }),
        )
        .await;

        let mut results = BTreeMap::new();
        for (name, outcome) in joined {
            let healthy = match outcome {
                Ok(healthy) => healthy,
                Err(e) => {
                    error!("Health check task for {} failed: {}", name, e);
                    false
                }
            };
            results.insert(name, healthy);
        }

        let healthy = results.values().filter(|ok| **ok).count();
        info!(
            "Health check complete: {}/{} instances healthy",
            healthy,
            results.len()
        );
        results
    }

    /// Health-check one instance.
    pub async fn check_instance(&self, name: &str, cancel: &CancellationToken) -> bool {
        check_instance(self.tester.as_ref(), name, cancel).await
    }
}

async fn check_instance(
    tester: &dyn ConnectionTester,
    name: &str,
    cancel: &CancellationToken,
) -> bool {
    match tester.test_connection(name, cancel).await {
        Ok(true) => {
            debug!("Health check passed for {}", name);
            true
        }
        Ok(false) => {
            warn!("Health check failed for {}", name);
            false
        }
        Err(e) => {
            error!("Health check error for {}: {}", name, e);
            false
        }
    }
}
