//! Batch fan-out and result assembly.
//!
//! Each query of a batch runs on its own task; results come back over a
//! bounded channel of the batch size and are assembled into a refID-keyed
//! map once every worker has finished. The map always covers exactly the
//! input refIDs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{worker, DataQuery, DataResponse, QueryDataResponse};
use crate::error::QueryError;
use crate::instance::Instance;

/// Run every query of a batch concurrently on the given instance and wait for
/// all of them. Duplicate refIDs resolve last-write-wins and are flagged as a
/// batch warning.
pub async fn execute_batch(
    instance: Arc<Instance>,
    queries: Vec<DataQuery>,
    token: CancellationToken,
) -> QueryDataResponse {
    let mut response = QueryDataResponse::default();
    if queries.is_empty() {
        return response;
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(queries.len());
    for query in &queries {
        if !seen.insert(&query.ref_id) {
            response.warnings.push(format!(
                "duplicate refId '{}': the last result wins",
                query.ref_id
            ));
        }
    }
    let ref_ids: Vec<String> = queries.iter().map(|q| q.ref_id.clone()).collect();

    let (tx, mut rx) = mpsc::channel::<(String, DataResponse)>(queries.len());
    let mut handles = Vec::with_capacity(queries.len());

    for query in queries {
        let instance = instance.clone();
        let token = token.clone();
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            let result = worker::run_query(&instance, &query, &token).await;
            // Capacity equals the batch size, so the send never blocks.
            let _ = tx.send((query.ref_id, result)).await;
        }));
    }
    drop(tx);

    // Barrier: the batch completes only when every worker has.
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "query worker task failed");
        }
    }

    let mut responses = HashMap::with_capacity(ref_ids.len());
    while let Some((ref_id, result)) = rx.recv().await {
        responses.insert(ref_id, result);
    }

    // A panicked worker never sent its result; the map still covers every
    // input refID.
    for ref_id in ref_ids {
        responses.entry(ref_id).or_insert_with(|| {
            DataResponse::from_error(QueryError::Internal(
                "query worker terminated unexpectedly".to_string(),
            ))
        });
    }

    response.responses = responses;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceSettings;
    use crate::driver::mock::MockDriver;
    use crate::query::TimeRange;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    fn test_instance(driver: Arc<MockDriver>, json_data: serde_json::Value) -> Arc<Instance> {
        Instance::create(
            driver,
            &InstanceSettings {
                uid: "u1".into(),
                name: "ds".into(),
                updated: 1,
                json_data,
                decrypted_secure_json_data: Default::default(),
            },
        )
        .unwrap()
    }

    fn query(ref_id: &str, sql: &str) -> DataQuery {
        DataQuery {
            ref_id: ref_id.into(),
            time_range: TimeRange {
                from: Utc.timestamp_millis_opt(0).unwrap(),
                to: Utc.timestamp_millis_opt(60_000).unwrap(),
            },
            interval_ms: 1_000,
            json: json!({"queryText": sql}),
        }
    }

    #[tokio::test]
    async fn test_result_map_covers_all_ref_ids() {
        let driver = Arc::new(MockDriver::new());
        let instance = test_instance(driver, json!({}));
        let queries = vec![query("A", "SELECT 1"), query("B", "SELECT 2"), query("C", "SELECT 3")];

        let result = execute_batch(instance, queries, CancellationToken::new()).await;

        let mut keys: Vec<_> = result.responses.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_failing_query_does_not_poison_siblings() {
        let driver = Arc::new(MockDriver::new());
        driver.script_error("SELECT broken", QueryError::Exec("boom".into()));
        let instance = test_instance(driver, json!({}));
        let queries = vec![
            query("A", "SELECT 1"),
            query("B", "SELECT broken"),
            query("C", "SELECT 3"),
        ];

        let result = execute_batch(instance, queries, CancellationToken::new()).await;

        assert_eq!(result.responses.len(), 3);
        assert!(result.responses["A"].frame.is_some());
        assert!(result.responses["C"].frame.is_some());
        assert_eq!(result.responses["B"].error.as_ref().unwrap().kind(), "exec");
    }

    #[tokio::test]
    async fn test_duplicate_ref_ids_last_write_wins_with_warning() {
        let driver = Arc::new(MockDriver::new());
        let instance = test_instance(driver, json!({}));
        let queries = vec![query("A", "SELECT 1"), query("A", "SELECT 2")];

        let result = execute_batch(instance, queries, CancellationToken::new()).await;

        assert_eq!(result.responses.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("duplicate refId 'A'"));
    }

    #[tokio::test]
    async fn test_cancelled_batch_returns_complete_map() {
        let driver = Arc::new(MockDriver::new());
        driver.set_exec_delay(Duration::from_secs(5));
        let instance = test_instance(driver, json!({}));
        let queries = vec![query("A", "SELECT 1"), query("B", "SELECT 2")];

        let token = CancellationToken::new();
        let task = tokio::spawn(execute_batch(instance, queries, token.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = task.await.unwrap();
        assert_eq!(result.responses.len(), 2);
        for response in result.responses.values() {
            assert_eq!(response.error.as_ref().unwrap().kind(), "cancelled");
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let driver = Arc::new(MockDriver::new());
        let instance = test_instance(driver, json!({}));
        let result = execute_batch(instance, Vec::new(), CancellationToken::new()).await;
        assert!(result.responses.is_empty());
    }
}
