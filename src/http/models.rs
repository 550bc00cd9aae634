//! JSON wire models for the host-facing HTTP surface.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::InstanceSettings;
use crate::query::{DataQuery, DataResponse, QueryDataResponse, TimeRange};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginContextBody {
    pub data_source_instance_settings: InstanceSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataBody {
    pub plugin_context: PluginContextBody,
    #[serde(default)]
    pub queries: Vec<QueryBody>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthBody {
    pub plugin_context: PluginContextBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeBody {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Default for TimeRangeBody {
    fn default() -> Self {
        let epoch = Utc.timestamp_millis_opt(0).unwrap();
        TimeRangeBody {
            from: epoch,
            to: epoch,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBody {
    pub ref_id: String,
    #[serde(default)]
    pub time_range: TimeRangeBody,
    #[serde(default)]
    pub interval_ms: i64,
    #[serde(default)]
    pub json: Value,
}

impl From<QueryBody> for DataQuery {
    fn from(body: QueryBody) -> Self {
        DataQuery {
            ref_id: body.ref_id,
            time_range: TimeRange {
                from: body.time_range.from,
                to: body.time_range.to,
            },
            interval_ms: body.interval_ms,
            json: body.json,
        }
    }
}

/// One frame on the wire: column names plus the arrow IPC payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameBody {
    pub columns: Vec<String>,
    pub row_count: usize,
    /// Base64-encoded arrow IPC stream.
    pub data: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub from_cache: bool,
}

impl From<DataResponse> for DataResponseBody {
    fn from(response: DataResponse) -> Self {
        let mut error = response.error.as_ref().map(|e| ErrorBody {
            kind: e.kind().to_string(),
            message: e.to_string(),
        });

        let frame = response.frame.and_then(|frame| match frame.encode() {
            Ok(bytes) => Some(FrameBody {
                columns: frame.column_names(),
                row_count: frame.num_rows(),
                data: BASE64.encode(bytes),
                warnings: frame.warnings.clone(),
            }),
            Err(e) => {
                error.get_or_insert(ErrorBody {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                None
            }
        });

        DataResponseBody {
            frame,
            error,
            from_cache: response.from_cache,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataResponseBody {
    pub results: HashMap<String, DataResponseBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<QueryDataResponse> for QueryDataResponseBody {
    fn from(response: QueryDataResponse) -> Self {
        QueryDataResponseBody {
            results: response
                .responses
                .into_iter()
                .map(|(ref_id, r)| (ref_id, r.into()))
                .collect(),
            warnings: response.warnings,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthResponseBody {
    pub status: String,
    pub message: String,
}
