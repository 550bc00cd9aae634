//! Mock warehouse driver for testing.
//!
//! Scriptable per-statement results and failure modes so the engine can be
//! exercised without a live warehouse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ColumnKind, ColumnSchema, ResultSet, ScalarValue, WarehouseConnection, WarehouseDriver};
use crate::error::QueryError;

#[derive(Debug, Default)]
struct MockState {
    connect_count: AtomicUsize,
    exec_count: AtomicUsize,
    fail_connect: AtomicBool,
    fail_auth: AtomicBool,
    exec_delay: Mutex<Duration>,
    responses: Mutex<HashMap<String, Result<ResultSet, QueryError>>>,
}

/// Mock driver. Unscripted statements return a single-row `value = 1` result
/// so trivial round trips (health checks) succeed out of the box.
#[derive(Debug, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result returned for an exact SQL text.
    pub fn script_result(&self, sql: &str, result: ResultSet) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(sql.to_string(), Ok(result));
    }

    /// Script a failure for an exact SQL text.
    pub fn script_error(&self, sql: &str, error: QueryError) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(sql.to_string(), Err(error));
    }

    /// Delay every execute call, opening a window for cancellation tests.
    pub fn set_exec_delay(&self, delay: Duration) {
        *self.state.exec_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_auth(&self, fail: bool) {
        self.state.fail_auth.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.state.exec_count.load(Ordering::SeqCst)
    }

    /// Convenience: a one-column integer result.
    pub fn int_result(name: &str, values: &[i64]) -> ResultSet {
        ResultSet {
            columns: vec![ColumnSchema::new(name, ColumnKind::Int)],
            rows: values.iter().map(|v| vec![ScalarValue::Int(*v)]).collect(),
        }
    }
}

#[async_trait]
impl WarehouseDriver for MockDriver {
    async fn connect(&self, _dsn: &str) -> Result<Box<dyn WarehouseConnection>, QueryError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(QueryError::Connect("mock: connection refused".to_string()));
        }
        if self.state.fail_auth.load(Ordering::SeqCst) {
            return Err(QueryError::Auth("mock: credentials rejected".to_string()));
        }
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug)]
struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl WarehouseConnection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<ResultSet, QueryError> {
        let delay = *self.state.exec_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.exec_count.fetch_add(1, Ordering::SeqCst);

        if let Some(scripted) = self.state.responses.lock().unwrap().get(sql) {
            return scripted.clone();
        }

        Ok(MockDriver::int_result("value", &[1]))
    }

    async fn ping(&mut self) -> Result<(), QueryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_result() {
        let driver = MockDriver::new();
        let mut conn = driver.connect("dsn").await.unwrap();
        let rs = conn.execute("SELECT 1").await.unwrap();
        assert_eq!(rs.columns.len(), 1);
        assert_eq!(rs.rows, vec![vec![ScalarValue::Int(1)]]);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let driver = MockDriver::new();
        driver.script_error("SELECT broken", QueryError::Exec("boom".to_string()));
        let mut conn = driver.connect("dsn").await.unwrap();
        let err = conn.execute("SELECT broken").await.unwrap_err();
        assert_eq!(err.kind(), "exec");
    }

    #[tokio::test]
    async fn test_fail_connect() {
        let driver = MockDriver::new();
        driver.set_fail_connect(true);
        assert!(driver.connect("dsn").await.is_err());
        assert_eq!(driver.connect_count(), 0);
    }
}
