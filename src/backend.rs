//! Host boundary.
//!
//! The host talks to the plugin through two capability-shaped handlers:
//! [`QueryDataHandler`] for query batches and [`CheckHealthHandler`] for
//! connectivity probes. [`SnowflakeBackend`] implements both over the
//! instance registry and the fan-out coordinator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::InstanceSettings;
use crate::driver::WarehouseDriver;
use crate::error::QueryError;
use crate::instance::InstanceManager;
use crate::query::{coordinator, QueryDataRequest, QueryDataResponse};

/// Upper bound for the health-check round trip.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Statement used for the health-check round trip.
const HEALTH_CHECK_QUERY: &str = "SELECT 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone)]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
}

/// Entry point for query batches.
#[async_trait]
pub trait QueryDataHandler: Send + Sync {
    async fn query_data(
        &self,
        token: CancellationToken,
        request: QueryDataRequest,
    ) -> Result<QueryDataResponse, QueryError>;
}

/// Entry point for host health probes.
#[async_trait]
pub trait CheckHealthHandler: Send + Sync {
    async fn check_health(&self, settings: &InstanceSettings) -> CheckHealthResult;
}

/// The concrete backend: resolves instances per batch and fans queries out.
#[derive(Debug)]
pub struct SnowflakeBackend {
    manager: Arc<InstanceManager>,
}

impl SnowflakeBackend {
    pub fn new(driver: Arc<dyn WarehouseDriver>) -> Self {
        SnowflakeBackend {
            manager: Arc::new(InstanceManager::new(driver)),
        }
    }

    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    /// Dispose every instance. Called on process shutdown.
    pub fn shutdown(&self) {
        self.manager.dispose_all();
    }

    async fn round_trip(&self, settings: &InstanceSettings) -> Result<(), QueryError> {
        let instance = self.manager.get_or_create(settings)?;
        let token = CancellationToken::new();
        let probe = async {
            let mut conn = instance.pool().acquire(&token).await?;
            conn.execute(HEALTH_CHECK_QUERY).await.map(|_| ())
        };
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| QueryError::Connect("health check timed out".to_string()))?
    }
}

#[async_trait]
impl QueryDataHandler for SnowflakeBackend {
    /// Resolve the instance for the batch and run every query. Instance
    /// resolution failures (config, connect) fail the batch uniformly;
    /// everything past that point is per-query.
    async fn query_data(
        &self,
        token: CancellationToken,
        request: QueryDataRequest,
    ) -> Result<QueryDataResponse, QueryError> {
        let instance = self.manager.get_or_create(&request.settings).map_err(|e| {
            error!(uid = %request.settings.uid, error = %e, "could not resolve instance");
            e
        })?;
        Ok(coordinator::execute_batch(instance, request.queries, token).await)
    }
}

#[async_trait]
impl CheckHealthHandler for SnowflakeBackend {
    async fn check_health(&self, settings: &InstanceSettings) -> CheckHealthResult {
        match self.round_trip(settings).await {
            Ok(()) => CheckHealthResult {
                status: HealthStatus::Ok,
                message: "data source is working".to_string(),
            },
            Err(e) => CheckHealthResult {
                status: HealthStatus::Error,
                message: e.to_string(),
            },
        }
    }
}
