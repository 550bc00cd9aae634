use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use once_cell::sync::Lazy;

use super::handlers::{health_handler, metrics_handler, query_handler};
use crate::backend::SnowflakeBackend;
use crate::metrics::{self, InstanceCollector};

pub const PATH_QUERY: &str = "/query";
pub const PATH_HEALTH: &str = "/health";
pub const PATH_METRICS: &str = "/metrics";

pub struct AppServer {
    pub router: Router,
    pub backend: Arc<SnowflakeBackend>,
}

impl AppServer {
    pub fn new(backend: SnowflakeBackend) -> Self {
        let backend = Arc::new(backend);

        // Force counter registration before the first scrape; the collector
        // registration fails harmlessly when a previous server instance in
        // this process already owns the descriptors.
        Lazy::force(&metrics::QUERIES_TOTAL);
        let _ = InstanceCollector::register(backend.manager().clone());

        AppServer {
            router: Router::new()
                .route(PATH_QUERY, post(query_handler))
                .route(PATH_HEALTH, post(health_handler))
                .route(PATH_METRICS, get(metrics_handler))
                .with_state(backend.clone()),
            backend,
        }
    }
}
