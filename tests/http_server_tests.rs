//! Integration tests for the HTTP surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use snowgate::driver::mock::MockDriver;
use snowgate::error::QueryError;
use snowgate::http::AppServer;
use snowgate::SnowflakeBackend;

fn app(driver: Arc<MockDriver>) -> AppServer {
    AppServer::new(SnowflakeBackend::new(driver))
}

fn json_request(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn plugin_context(uid: &str, json_data: Value) -> Value {
    json!({
        "dataSourceInstanceSettings": {
            "uid": uid,
            "name": format!("{uid}-name"),
            "updated": 1,
            "jsonData": json_data,
        }
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_query_endpoint_returns_batch_results() {
    let app = app(Arc::new(MockDriver::new()));

    let response = app
        .router
        .oneshot(json_request(
            "/query",
            json!({
                "pluginContext": plugin_context("http-u1", json!({})),
                "queries": [
                    {"refId": "A", "json": {"queryText": "SELECT 1"}},
                    {"refId": "B", "json": {"queryText": "SELECT 2"}},
                ]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let results = body["results"].as_object().unwrap();
    assert_eq!(results.len(), 2);
    let frame = &results["A"]["frame"];
    assert_eq!(frame["columns"], json!(["value"]));
    assert_eq!(frame["rowCount"], 1);
    assert!(frame["data"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn test_query_endpoint_carries_per_query_errors() {
    let driver = Arc::new(MockDriver::new());
    driver.script_error("SELECT broken", QueryError::Exec("bad column".into()));
    let app = app(driver);

    let response = app
        .router
        .oneshot(json_request(
            "/query",
            json!({
                "pluginContext": plugin_context("http-u2", json!({})),
                "queries": [
                    {"refId": "A", "json": {"queryText": "SELECT 1"}},
                    {"refId": "B", "json": {"queryText": "SELECT broken"}},
                ]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["results"]["A"]["error"].is_null());
    assert_eq!(body["results"]["B"]["error"]["kind"], "exec");
}

#[tokio::test]
async fn test_query_endpoint_rejects_invalid_config() {
    let app = app(Arc::new(MockDriver::new()));

    let response = app
        .router
        .oneshot(json_request(
            "/query",
            json!({
                "pluginContext": plugin_context("http-u3", json!({"cacheSize": "big"})),
                "queries": [{"refId": "A", "json": {"queryText": "SELECT 1"}}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app(Arc::new(MockDriver::new()));

    let response = app
        .router
        .oneshot(json_request(
            "/health",
            json!({"pluginContext": plugin_context("http-u4", json!({}))}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_metrics_endpoint_exposition_format() {
    let app = app(Arc::new(MockDriver::new()));

    // Serve one query so the counter exists, then scrape.
    let _ = app
        .router
        .clone()
        .oneshot(json_request(
            "/query",
            json!({
                "pluginContext": plugin_context("http-u5", json!({})),
                "queries": [{"refId": "A", "json": {"queryText": "SELECT 1"}}]
            }),
        ))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(
        text.contains("grafana_plugin_queries_total"),
        "exposition: {text}"
    );
}
