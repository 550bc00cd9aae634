//! Per-query execution.
//!
//! One worker runs one query end-to-end: cache lookup, pool execution on a
//! miss, frame materialization, and the write-behind into the cache. Errors
//! are folded into the response so sibling queries are never poisoned.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{cache_key, DataQuery, DataResponse, QueryOptions};
use crate::classify::classify_query;
use crate::error::QueryError;
use crate::frame::Frame;
use crate::instance::Instance;
use crate::metrics;

/// Run one query against the instance, observing the batch cancellation
/// token. Always produces a response.
pub async fn run_query(
    instance: &Instance,
    query: &DataQuery,
    token: &CancellationToken,
) -> DataResponse {
    match execute(instance, query, token).await {
        Ok(response) => response,
        Err(QueryError::Cancelled) => DataResponse::from_error(QueryError::Cancelled),
        Err(error) => {
            match &error {
                QueryError::Internal(msg) => {
                    tracing::error!(ref_id = %query.ref_id, error = %msg, "query failed unexpectedly")
                }
                other => warn!(ref_id = %query.ref_id, error = %other, "query failed"),
            }
            DataResponse::from_error(error)
        }
    }
}

async fn execute(
    instance: &Instance,
    query: &DataQuery,
    token: &CancellationToken,
) -> Result<DataResponse, QueryError> {
    let options = QueryOptions::from_value(&query.json)?;
    let query_type = classify_query(&options.query_text);

    // Caching applies when the instance has a cache and the query does not
    // opt out (or opts in over a disabled default).
    let caching = instance.cache().is_some()
        && options
            .use_cache
            .unwrap_or(instance.config().use_cache_by_default);
    let key = caching.then(|| cache_key(instance.uid(), &options, query));

    if let (Some(cache), Some(key)) = (instance.cache(), key.as_deref()) {
        if let Some(bytes) = cache.get(key) {
            let frame = Frame::decode(&bytes)?;
            metrics::record_query(query_type, "cache");
            debug!(ref_id = %query.ref_id, "served from cache");
            return Ok(DataResponse::cached(frame));
        }
    }

    let mut conn = instance.pool().acquire(token).await?;
    let result = tokio::select! {
        _ = token.cancelled() => return Err(QueryError::Cancelled),
        result = conn.execute(&options.query_text) => result,
    };
    drop(conn);

    // The statement reached the database; count it whether or not it
    // succeeded.
    metrics::record_query(query_type, "db");

    let frame = Frame::from_result_set(&result?)?;

    if let (Some(cache), Some(key)) = (instance.cache(), key.as_deref()) {
        let ttl = options
            .cache_ttl_minutes
            .map(|minutes| Duration::from_secs(minutes.max(0) as u64 * 60))
            .unwrap_or_else(|| cache.life_window());
        match frame.encode() {
            Ok(bytes) => match cache.put(key, bytes, ttl) {
                Ok(()) => {}
                Err(QueryError::CacheTooLarge(size)) => {
                    debug!(ref_id = %query.ref_id, size, "result exceeds cache cap, not cached");
                }
                Err(error) => {
                    debug!(ref_id = %query.ref_id, error = %error, "cache write failed");
                }
            },
            Err(error) => {
                debug!(ref_id = %query.ref_id, error = %error, "frame encoding for cache failed");
            }
        }
    }

    Ok(DataResponse::from_db(frame))
}
