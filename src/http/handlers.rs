use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use prometheus::{Encoder, TextEncoder};
use tokio_util::sync::CancellationToken;

use super::error::ApiError;
use super::models::{
    CheckHealthBody, CheckHealthResponseBody, QueryDataBody, QueryDataResponseBody,
};
use crate::backend::{CheckHealthHandler, HealthStatus, QueryDataHandler, SnowflakeBackend};
use crate::metrics;
use crate::query::QueryDataRequest;

/// POST /query: run a batch of queries against one datasource instance.
pub async fn query_handler(
    State(backend): State<Arc<SnowflakeBackend>>,
    Json(body): Json<QueryDataBody>,
) -> Result<Json<QueryDataResponseBody>, ApiError> {
    let request = QueryDataRequest {
        settings: body.plugin_context.data_source_instance_settings,
        queries: body.queries.into_iter().map(Into::into).collect(),
    };

    let response = backend
        .query_data(CancellationToken::new(), request)
        .await?;
    Ok(Json(response.into()))
}

/// POST /health: trivial round trip through the instance pool.
pub async fn health_handler(
    State(backend): State<Arc<SnowflakeBackend>>,
    Json(body): Json<CheckHealthBody>,
) -> Json<CheckHealthResponseBody> {
    let result = backend
        .check_health(&body.plugin_context.data_source_instance_settings)
        .await;
    Json(CheckHealthResponseBody {
        status: match result.status {
            HealthStatus::Ok => "OK".to_string(),
            HealthStatus::Error => "ERROR".to_string(),
        },
        message: result.message,
    })
}

/// GET /metrics: text exposition of the process registry.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();

    axum::response::Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
        .unwrap()
}
