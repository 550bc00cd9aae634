//! Warehouse driver boundary.
//!
//! The SQL dialect and wire protocol live behind these traits; the engine
//! only sees a DSN going in and typed rows coming out. Production binds a
//! real Snowflake driver here; tests use [`mock::MockDriver`].

pub mod mock;
pub mod pool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueryError;

pub use pool::{PoolStatus, WarehousePool};

/// Logical column type as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    /// Fixed-precision numeric; values arrive as decimal strings.
    Decimal,
    Timestamp,
    Text,
}

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Decimal string for fixed-precision numerics (NUMBER(38,0) etc.)
    Decimal(String),
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// Materialized result of one statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnSchema>,
    pub rows: Vec<Vec<ScalarValue>>,
}

/// A live warehouse session. Held exclusively by one worker at a time via
/// the pool.
#[async_trait]
pub trait WarehouseConnection: Send + Sync + std::fmt::Debug {
    /// Execute one statement and materialize its rows.
    async fn execute(&mut self, sql: &str) -> Result<ResultSet, QueryError>;

    /// Cheap liveness probe used by pool recycling and health checks.
    async fn ping(&mut self) -> Result<(), QueryError>;
}

/// Connection factory for one warehouse flavor.
#[async_trait]
pub trait WarehouseDriver: Send + Sync + std::fmt::Debug {
    async fn connect(&self, dsn: &str) -> Result<Box<dyn WarehouseConnection>, QueryError>;
}
