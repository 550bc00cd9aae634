//! Query and response models for the host boundary.

pub mod coordinator;
pub mod worker;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::InstanceSettings;
use crate::error::QueryError;
use crate::frame::Frame;

/// Requested time window of one query.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One query of a batch, as handed over by the host. The JSON payload is
/// opaque at this level; workers parse it into [`QueryOptions`].
#[derive(Debug, Clone)]
pub struct DataQuery {
    /// Stable identifier the host attaches to this query; unique within a
    /// batch.
    pub ref_id: String,
    pub time_range: TimeRange,
    pub interval_ms: i64,
    pub json: Value,
}

/// Per-query options carried in the opaque JSON payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub query_text: String,
    /// Overrides the instance-level cache default when present.
    pub use_cache: Option<bool>,
    pub cache_ttl_minutes: Option<i64>,
    /// Bound parameters; part of the cache fingerprint.
    pub params: Vec<Value>,
}

impl QueryOptions {
    pub fn from_value(value: &Value) -> Result<Self, QueryError> {
        serde_json::from_value(value.clone())
            .map_err(|e| QueryError::Internal(format!("malformed query options: {e}")))
    }
}

/// Result of one query, tagged with its refID by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct DataResponse {
    pub frame: Option<Frame>,
    pub error: Option<QueryError>,
    /// True when the frame was served from the instance cache.
    pub from_cache: bool,
}

impl DataResponse {
    pub fn from_db(frame: Frame) -> Self {
        DataResponse {
            frame: Some(frame),
            error: None,
            from_cache: false,
        }
    }

    pub fn cached(frame: Frame) -> Self {
        DataResponse {
            frame: Some(frame),
            error: None,
            from_cache: true,
        }
    }

    pub fn from_error(error: QueryError) -> Self {
        DataResponse {
            frame: None,
            error: Some(error),
            from_cache: false,
        }
    }
}

/// One host-issued batch sharing a cancellation context.
#[derive(Debug, Clone)]
pub struct QueryDataRequest {
    pub settings: InstanceSettings,
    pub queries: Vec<DataQuery>,
}

/// Assembled batch result: exactly one response per input refID, unordered.
#[derive(Debug, Default)]
pub struct QueryDataResponse {
    pub responses: HashMap<String, DataResponse>,
    pub warnings: Vec<String>,
}

/// Fingerprint of a logical query for the cache.
///
/// Covers the instance UID, the whitespace-normalized SQL, the bound
/// parameters, the time window rounded down to the interval, and the interval
/// itself; two renderings of the same logical query share one entry.
pub fn cache_key(uid: &str, options: &QueryOptions, query: &DataQuery) -> String {
    let normalized_sql: String = options
        .query_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let (from, to) = if query.interval_ms > 0 {
        (
            round_down(query.time_range.from.timestamp_millis(), query.interval_ms),
            round_down(query.time_range.to.timestamp_millis(), query.interval_ms),
        )
    } else {
        (
            query.time_range.from.timestamp_millis(),
            query.time_range.to.timestamp_millis(),
        )
    };

    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update([0]);
    hasher.update(normalized_sql.as_bytes());
    hasher.update([0]);
    for param in &options.params {
        hasher.update(param.to_string().as_bytes());
        hasher.update([0]);
    }
    hasher.update(from.to_le_bytes());
    hasher.update(to.to_le_bytes());
    hasher.update(query.interval_ms.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

fn round_down(millis: i64, interval_ms: i64) -> i64 {
    millis.div_euclid(interval_ms) * interval_ms
}
