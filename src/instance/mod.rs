//! Datasource instance lifecycle.
//!
//! An instance owns one bounded connection pool and, when caching is
//! enabled, one result cache. It is created on first use after a
//! configuration revision, replaced when the host signals a change, and
//! disposed exactly once.

pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{CacheConfig, QueryCache, DEFAULT_SHARD_COUNT, DEFAULT_SWEEP_INTERVAL};
use crate::config::{InstanceSettings, PluginConfig};
use crate::driver::{WarehouseDriver, WarehousePool};
use crate::dsn::build_dsn;
use crate::error::QueryError;
use crate::secrets::Secrets;

pub use registry::InstanceManager;

/// A live (pool, optional cache) pair for one configured datasource revision.
/// Holds no per-batch state; concurrent use across batches is the normal case.
#[derive(Debug)]
pub struct Instance {
    uid: String,
    name: String,
    config: PluginConfig,
    pool: WarehousePool,
    cache: Option<Arc<QueryCache>>,
    disposed: AtomicBool,
}

impl Instance {
    /// Build an instance from host-supplied settings: parse the config, build
    /// the DSN, open the pool, and initialize the cache when enabled.
    ///
    /// Config errors abort creation; the pool itself connects lazily.
    pub fn create(
        driver: Arc<dyn WarehouseDriver>,
        settings: &InstanceSettings,
    ) -> Result<Arc<Self>, QueryError> {
        info!(uid = %settings.uid, name = %settings.name, "creating instance");

        let config = PluginConfig::from_settings(settings)?;
        let secrets = Secrets::from_settings(settings);
        let dsn = build_dsn(&config, &secrets);

        let pool = WarehousePool::open(
            driver,
            dsn,
            config.max_open_connections as usize,
            Duration::from_secs(config.connection_lifetime as u64 * 60),
        )?;

        let cache = config.use_caching.then(|| {
            QueryCache::new(CacheConfig {
                shards: DEFAULT_SHARD_COUNT,
                life_window: Duration::from_secs(config.cache_retention as u64 * 60),
                sweep_interval: DEFAULT_SWEEP_INTERVAL,
                hard_max_bytes: config.cache_size as u64 * 1024 * 1024,
                ..CacheConfig::default()
            })
        });

        Ok(Arc::new(Instance {
            uid: settings.uid.clone(),
            name: settings.name.clone(),
            config,
            pool,
            cache,
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn pool(&self) -> &WarehousePool {
        &self.pool
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.cache.as_ref()
    }

    /// Close cache then pool. Idempotent; both closes tolerate absence.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(uid = %self.uid, name = %self.name, "disposing instance");
        if let Some(cache) = &self.cache {
            cache.close();
        }
        self.pool.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.dispose();
    }
}
