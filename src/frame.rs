//! Columnar result frames.
//!
//! A frame wraps one arrow `RecordBatch` plus non-fatal warnings collected
//! while materializing it. Frames are encoded to arrow IPC stream bytes for
//! the cache artifact; warnings ride along in the schema metadata so a cache
//! hit reproduces the stored frame exactly.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;

use crate::driver::{ColumnKind, ResultSet, ScalarValue};
use crate::error::QueryError;

/// Schema metadata key carrying frame warnings across encode/decode.
const WARNINGS_METADATA_KEY: &str = "warnings";

#[derive(Debug, Clone)]
pub struct Frame {
    pub batch: RecordBatch,
    pub warnings: Vec<String>,
}

impl Frame {
    /// Materialize a driver result set into a typed frame.
    ///
    /// Integer columns stay 64-bit signed. Fixed-precision numerics whose
    /// values all fit i64 are preserved as integers; anything beyond that is
    /// demoted to float64 with a warning attached. Timestamps are normalized
    /// to UTC. Every column tolerates nulls.
    pub fn from_result_set(result: &ResultSet) -> Result<Frame, QueryError> {
        let mut warnings = Vec::new();
        let mut fields = Vec::with_capacity(result.columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(result.columns.len());

        for (idx, column) in result.columns.iter().enumerate() {
            let (field, array) = build_column(idx, column.kind, &column.name, result, &mut warnings)?;
            fields.push(field);
            arrays.push(array);
        }

        let batch = if arrays.is_empty() {
            RecordBatch::new_empty(Arc::new(Schema::empty()))
        } else {
            RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
                .map_err(|e| QueryError::Internal(format!("frame assembly failed: {e}")))?
        };

        Ok(Frame { batch, warnings })
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Encode to arrow IPC stream bytes, warnings included.
    pub fn encode(&self) -> Result<Vec<u8>, QueryError> {
        let schema = if self.warnings.is_empty() {
            self.batch.schema()
        } else {
            let warnings_json = serde_json::to_string(&self.warnings)
                .map_err(|e| QueryError::Internal(format!("warning encoding failed: {e}")))?;
            let mut metadata: HashMap<String, String> = self.batch.schema().metadata().clone();
            metadata.insert(WARNINGS_METADATA_KEY.to_string(), warnings_json);
            Arc::new(
                Schema::new(self.batch.schema().fields().clone()).with_metadata(metadata),
            )
        };

        let batch = RecordBatch::try_new(schema.clone(), self.batch.columns().to_vec())
            .map_err(|e| QueryError::Internal(format!("IPC write error: {e}")))?;

        let mut buffer = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut buffer, schema.as_ref())
                .map_err(|e| QueryError::Internal(format!("IPC write error: {e}")))?;
            writer
                .write(&batch)
                .map_err(|e| QueryError::Internal(format!("IPC write error: {e}")))?;
            writer
                .finish()
                .map_err(|e| QueryError::Internal(format!("IPC finish error: {e}")))?;
        }
        Ok(buffer)
    }

    /// Decode a frame previously produced by [`Frame::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Frame, QueryError> {
        let mut reader = StreamReader::try_new(Cursor::new(bytes), None)
            .map_err(|e| QueryError::Internal(format!("IPC read error: {e}")))?;

        let warnings = reader
            .schema()
            .metadata()
            .get(WARNINGS_METADATA_KEY)
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(|e| QueryError::Internal(format!("warning decoding failed: {e}")))?
            .unwrap_or_default();

        let batch = reader
            .next()
            .ok_or_else(|| QueryError::Internal("empty IPC stream".to_string()))?
            .map_err(|e| QueryError::Internal(format!("IPC read error: {e}")))?;

        Ok(Frame { batch, warnings })
    }
}

fn build_column(
    idx: usize,
    kind: ColumnKind,
    name: &str,
    result: &ResultSet,
    warnings: &mut Vec<String>,
) -> Result<(Field, ArrayRef), QueryError> {
    let cells = result.rows.iter().map(move |row| &row[idx]);

    match kind {
        ColumnKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(result.rows.len());
            for cell in cells {
                match cell {
                    ScalarValue::Bool(v) => builder.append_value(*v),
                    ScalarValue::Null => builder.append_null(),
                    other => return Err(type_mismatch(name, "boolean", other)),
                }
            }
            Ok((
                Field::new(name, DataType::Boolean, true),
                Arc::new(builder.finish()),
            ))
        }
        ColumnKind::Int => {
            let mut builder = Int64Builder::with_capacity(result.rows.len());
            for cell in cells {
                match cell {
                    ScalarValue::Int(v) => builder.append_value(*v),
                    ScalarValue::Null => builder.append_null(),
                    other => return Err(type_mismatch(name, "integer", other)),
                }
            }
            Ok((
                Field::new(name, DataType::Int64, true),
                Arc::new(builder.finish()),
            ))
        }
        ColumnKind::Float => {
            let mut builder = Float64Builder::with_capacity(result.rows.len());
            for cell in cells {
                match cell {
                    ScalarValue::Float(v) => builder.append_value(*v),
                    ScalarValue::Int(v) => builder.append_value(*v as f64),
                    ScalarValue::Null => builder.append_null(),
                    other => return Err(type_mismatch(name, "float", other)),
                }
            }
            Ok((
                Field::new(name, DataType::Float64, true),
                Arc::new(builder.finish()),
            ))
        }
        ColumnKind::Decimal => build_decimal_column(idx, name, result, warnings),
        ColumnKind::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(result.rows.len());
            for cell in cells {
                match cell {
                    ScalarValue::Timestamp(ts) => builder.append_value(ts.timestamp_micros()),
                    ScalarValue::Null => builder.append_null(),
                    other => return Err(type_mismatch(name, "timestamp", other)),
                }
            }
            let array = builder.finish().with_timezone("UTC");
            Ok((
                Field::new(
                    name,
                    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                    true,
                ),
                Arc::new(array),
            ))
        }
        ColumnKind::Text => {
            let mut builder = StringBuilder::with_capacity(result.rows.len(), result.rows.len() * 32);
            for cell in cells {
                match cell {
                    ScalarValue::Text(v) => builder.append_value(v),
                    ScalarValue::Null => builder.append_null(),
                    other => return Err(type_mismatch(name, "text", other)),
                }
            }
            Ok((
                Field::new(name, DataType::Utf8, true),
                Arc::new(builder.finish()),
            ))
        }
    }
}

/// Fixed-precision numerics keep i64 when every value fits; otherwise the
/// whole column is demoted to float64 and a warning is recorded.
fn build_decimal_column(
    idx: usize,
    name: &str,
    result: &ResultSet,
    warnings: &mut Vec<String>,
) -> Result<(Field, ArrayRef), QueryError> {
    let fits_i64 = result.rows.iter().all(|row| match &row[idx] {
        ScalarValue::Decimal(s) => s.parse::<i64>().is_ok(),
        ScalarValue::Int(_) | ScalarValue::Null => true,
        _ => false,
    });

    if fits_i64 {
        let mut builder = Int64Builder::with_capacity(result.rows.len());
        for row in &result.rows {
            match &row[idx] {
                ScalarValue::Decimal(s) => builder.append_value(s.parse::<i64>().unwrap()),
                ScalarValue::Int(v) => builder.append_value(*v),
                ScalarValue::Null => builder.append_null(),
                other => return Err(type_mismatch(name, "decimal", other)),
            }
        }
        return Ok((
            Field::new(name, DataType::Int64, true),
            Arc::new(builder.finish()),
        ));
    }

    let mut builder = Float64Builder::with_capacity(result.rows.len());
    for row in &result.rows {
        match &row[idx] {
            ScalarValue::Decimal(s) => {
                let parsed: f64 = s
                    .parse()
                    .map_err(|_| QueryError::Exec(format!("column '{name}': unparseable numeric value '{s}'")))?;
                builder.append_value(parsed);
            }
            ScalarValue::Int(v) => builder.append_value(*v as f64),
            ScalarValue::Float(v) => builder.append_value(*v),
            ScalarValue::Null => builder.append_null(),
            other => return Err(type_mismatch(name, "decimal", other)),
        }
    }
    warnings.push(format!(
        "column '{name}': values exceed 64-bit integer precision, demoted to float64"
    ));
    Ok((
        Field::new(name, DataType::Float64, true),
        Arc::new(builder.finish()),
    ))
}

fn type_mismatch(column: &str, expected: &str, got: &ScalarValue) -> QueryError {
    QueryError::Exec(format!(
        "column '{column}': expected {expected} value, got {got:?}"
    ))
}
