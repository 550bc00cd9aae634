//! Bounded warehouse connection pool.
//!
//! Wraps a managed [`deadpool`] pool so that max-open and max-idle are both
//! bounded by the configured connection count and every connection is retired
//! once it exceeds the configured lifetime. Waiting acquisitions are counted
//! for the metrics surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deadpool::managed::{
    Manager, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult, TimeoutType, Timeouts,
};
use deadpool::Runtime;
use tokio_util::sync::CancellationToken;

use super::{WarehouseConnection, WarehouseDriver};
use crate::error::QueryError;

/// Counters kept outside deadpool's own bookkeeping.
#[derive(Debug, Default)]
struct PoolCounters {
    lifetime_closed: AtomicU64,
    idle_closed: AtomicU64,
    wait_count: AtomicU64,
    wait_duration_micros: AtomicU64,
}

/// Point-in-time pool health, shaped for the metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub in_use: u64,
    pub idle: u64,
    pub open: u64,
    pub max_open: u64,
    /// Connections retired because they exceeded the configured lifetime.
    pub lifetime_closed: u64,
    /// Connections dropped while idle (always 0 while max-idle == max-open).
    pub idle_closed: u64,
    pub wait_count: u64,
    pub wait_duration_micros: u64,
}

/// Connection factory handed to deadpool.
pub struct ConnectionManager {
    driver: Arc<dyn WarehouseDriver>,
    dsn: String,
    max_lifetime: Duration,
    counters: Arc<PoolCounters>,
}

/// The DSN embeds credentials and must never reach logs.
impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("driver", &self.driver)
            .field("dsn", &"<redacted>")
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

impl Manager for ConnectionManager {
    type Type = Box<dyn WarehouseConnection>;
    type Error = QueryError;

    async fn create(&self) -> Result<Self::Type, QueryError> {
        self.driver.connect(&self.dsn).await
    }

    async fn recycle(
        &self,
        _conn: &mut Self::Type,
        metrics: &Metrics,
    ) -> RecycleResult<QueryError> {
        if metrics.age() > self.max_lifetime {
            self.counters.lifetime_closed.fetch_add(1, Ordering::Relaxed);
            return Err(RecycleError::Message(
                "connection exceeded max lifetime".into(),
            ));
        }
        Ok(())
    }
}

/// A pooled connection; returns to the pool on drop.
pub type PooledConnection = Object<ConnectionManager>;

/// Bounded connection pool for one instance.
#[derive(Debug)]
pub struct WarehousePool {
    pool: Pool<ConnectionManager>,
    counters: Arc<PoolCounters>,
}

impl WarehousePool {
    /// Open a pool bounded to `max_open` connections (max-idle is the same
    /// bound) with a per-connection maximum lifetime. Connections are
    /// established lazily on first acquire.
    pub fn open(
        driver: Arc<dyn WarehouseDriver>,
        dsn: String,
        max_open: usize,
        max_lifetime: Duration,
    ) -> Result<Self, QueryError> {
        let counters = Arc::new(PoolCounters::default());
        let manager = ConnectionManager {
            driver,
            dsn,
            max_lifetime,
            counters: counters.clone(),
        };
        let pool = Pool::builder(manager)
            .max_size(max_open)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| QueryError::Connect(e.to_string()))?;
        Ok(WarehousePool { pool, counters })
    }

    /// Acquire a connection, waiting for a slot when the pool is exhausted.
    /// Waiting acquisitions are counted; cancellation is observed while
    /// waiting.
    pub async fn acquire(
        &self,
        token: &CancellationToken,
    ) -> Result<PooledConnection, QueryError> {
        // Fast path: an idle connection or a free slot.
        let fast_timeouts = Timeouts {
            wait: Some(Duration::ZERO),
            ..Timeouts::default()
        };
        let fast = tokio::select! {
            _ = token.cancelled() => return Err(QueryError::Cancelled),
            result = self.pool.timeout_get(&fast_timeouts) => result,
        };

        match fast {
            Ok(conn) => Ok(conn),
            Err(PoolError::Timeout(TimeoutType::Wait)) => {
                // Pool exhausted: join the wait queue.
                self.counters.wait_count.fetch_add(1, Ordering::Relaxed);
                let start = Instant::now();
                let conn = tokio::select! {
                    _ = token.cancelled() => return Err(QueryError::Cancelled),
                    result = self.pool.get() => result.map_err(map_pool_error)?,
                };
                self.counters
                    .wait_duration_micros
                    .fetch_add(start.elapsed().as_micros().max(1) as u64, Ordering::Relaxed);
                Ok(conn)
            }
            Err(other) => Err(map_pool_error(other)),
        }
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            in_use: status.size.saturating_sub(status.available) as u64,
            idle: status.available as u64,
            open: status.size as u64,
            max_open: status.max_size as u64,
            lifetime_closed: self.counters.lifetime_closed.load(Ordering::Relaxed),
            idle_closed: self.counters.idle_closed.load(Ordering::Relaxed),
            wait_count: self.counters.wait_count.load(Ordering::Relaxed),
            wait_duration_micros: self.counters.wait_duration_micros.load(Ordering::Relaxed),
        }
    }

    /// Close the pool. Held connections are dropped when their workers
    /// release them; new acquisitions fail.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn map_pool_error(e: PoolError<QueryError>) -> QueryError {
    match e {
        PoolError::Backend(inner) => inner,
        PoolError::Closed => QueryError::Connect("pool is closed".to_string()),
        other => QueryError::Connect(other.to_string()),
    }
}
