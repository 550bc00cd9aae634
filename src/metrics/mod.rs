//! Prometheus metrics surface.
//!
//! One process-wide registry holds a global query counter plus an
//! [`InstanceCollector`] that reads pool and cache health from every live
//! instance at scrape time. Series are labeled `{instance_name, uid}` under
//! shared descriptors so instance names never leak into the metric namespace.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::classify::QueryType;
use crate::instance::InstanceManager;

/// Process-wide metrics registry served by the scrape endpoint.
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

const LABELS: [&str; 2] = ["instance_name", "uid"];

/// Total queries served, split by statement type and by whether the result
/// came from the cache or the database.
pub static QUERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("grafana_plugin_queries_total", "Total number of queries."),
        &["query_type", "query_source"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Bump the query counter. `source` is `"db"` or `"cache"`.
pub fn record_query(query_type: QueryType, source: &str) {
    QUERIES_TOTAL
        .with_label_values(&[query_type.as_str(), source])
        .inc();
}

struct MetricDef {
    name: &'static str,
    help: &'static str,
}

const POOL_IN_USE: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_in_use_connections",
    help: "SQL pool: connections currently in use.",
};
const POOL_IDLE: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_idle_connections",
    help: "SQL pool: idle connections.",
};
const POOL_OPEN: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_open_connections",
    help: "SQL pool: currently open connections.",
};
const POOL_MAX: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_max_connections",
    help: "SQL pool: configured maximum of open connections.",
};
const POOL_LIFETIME_CLOSED: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_lifetime_closed_total",
    help: "SQL pool: connections closed after exceeding the maximum lifetime.",
};
const POOL_IDLE_CLOSED: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_idle_closed_total",
    help: "SQL pool: connections closed while idle.",
};
const POOL_WAIT_COUNT: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_wait_count_total",
    help: "SQL pool: acquisitions that had to wait for a slot.",
};
const POOL_WAIT_DURATION: MetricDef = MetricDef {
    name: "grafana_plugin_sql_pool_wait_duration_seconds_total",
    help: "SQL pool: total time spent waiting for a connection.",
};
const CACHE_CAPACITY: MetricDef = MetricDef {
    name: "grafana_plugin_cache_capacity_bytes",
    help: "Cache: bytes currently stored.",
};
const CACHE_ENTRIES: MetricDef = MetricDef {
    name: "grafana_plugin_cache_entries",
    help: "Cache: number of stored entries.",
};
const CACHE_COLLISIONS: MetricDef = MetricDef {
    name: "grafana_plugin_cache_collisions_total",
    help: "Cache: observed key hash collisions.",
};
const CACHE_DEL_HITS: MetricDef = MetricDef {
    name: "grafana_plugin_cache_del_hits_total",
    help: "Cache: successfully deleted keys.",
};
const CACHE_DEL_MISS: MetricDef = MetricDef {
    name: "grafana_plugin_cache_del_miss_total",
    help: "Cache: delete calls that found no key.",
};
const CACHE_HITS: MetricDef = MetricDef {
    name: "grafana_plugin_cache_hits_total",
    help: "Cache: successfully found keys.",
};
const CACHE_MISS: MetricDef = MetricDef {
    name: "grafana_plugin_cache_miss_total",
    help: "Cache: lookups that found no key.",
};

const ALL_DEFS: [&MetricDef; 15] = [
    &POOL_IN_USE,
    &POOL_IDLE,
    &POOL_OPEN,
    &POOL_MAX,
    &POOL_LIFETIME_CLOSED,
    &POOL_IDLE_CLOSED,
    &POOL_WAIT_COUNT,
    &POOL_WAIT_DURATION,
    &CACHE_CAPACITY,
    &CACHE_ENTRIES,
    &CACHE_COLLISIONS,
    &CACHE_DEL_HITS,
    &CACHE_DEL_MISS,
    &CACHE_HITS,
    &CACHE_MISS,
];

/// Scrape-time collector over the live instances. Instances without a cache
/// simply omit the cache series.
pub struct InstanceCollector {
    manager: Arc<InstanceManager>,
    descs: Vec<Desc>,
}

impl InstanceCollector {
    pub fn new(manager: Arc<InstanceManager>) -> Self {
        let descs = ALL_DEFS
            .iter()
            .map(|def| {
                Desc::new(
                    def.name.to_string(),
                    def.help.to_string(),
                    LABELS.iter().map(|l| l.to_string()).collect(),
                    HashMap::new(),
                )
                .unwrap()
            })
            .collect();
        InstanceCollector { manager, descs }
    }

    /// Register a collector for `manager` on the process registry.
    pub fn register(manager: Arc<InstanceManager>) -> prometheus::Result<()> {
        REGISTRY.register(Box::new(InstanceCollector::new(manager)))
    }
}

fn gauge_vec(def: &MetricDef) -> IntGaugeVec {
    IntGaugeVec::new(Opts::new(def.name, def.help), &LABELS).unwrap()
}

fn counter_vec(def: &MetricDef) -> IntCounterVec {
    IntCounterVec::new(Opts::new(def.name, def.help), &LABELS).unwrap()
}

impl Collector for InstanceCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let pool_in_use = gauge_vec(&POOL_IN_USE);
        let pool_idle = gauge_vec(&POOL_IDLE);
        let pool_open = gauge_vec(&POOL_OPEN);
        let pool_max = gauge_vec(&POOL_MAX);
        let pool_lifetime_closed = counter_vec(&POOL_LIFETIME_CLOSED);
        let pool_idle_closed = counter_vec(&POOL_IDLE_CLOSED);
        let pool_wait_count = counter_vec(&POOL_WAIT_COUNT);
        let pool_wait_duration = CounterVec::new(
            Opts::new(POOL_WAIT_DURATION.name, POOL_WAIT_DURATION.help),
            &LABELS,
        )
        .unwrap();
        let cache_capacity = gauge_vec(&CACHE_CAPACITY);
        let cache_entries = gauge_vec(&CACHE_ENTRIES);
        let cache_collisions = counter_vec(&CACHE_COLLISIONS);
        let cache_del_hits = counter_vec(&CACHE_DEL_HITS);
        let cache_del_miss = counter_vec(&CACHE_DEL_MISS);
        let cache_hits = counter_vec(&CACHE_HITS);
        let cache_miss = counter_vec(&CACHE_MISS);

        for instance in self.manager.snapshot() {
            if instance.is_disposed() {
                continue;
            }
            let labels = [instance.name(), instance.uid()];

            let pool = instance.pool().status();
            pool_in_use.with_label_values(&labels).set(pool.in_use as i64);
            pool_idle.with_label_values(&labels).set(pool.idle as i64);
            pool_open.with_label_values(&labels).set(pool.open as i64);
            pool_max.with_label_values(&labels).set(pool.max_open as i64);
            pool_lifetime_closed
                .with_label_values(&labels)
                .inc_by(pool.lifetime_closed);
            pool_idle_closed
                .with_label_values(&labels)
                .inc_by(pool.idle_closed);
            pool_wait_count
                .with_label_values(&labels)
                .inc_by(pool.wait_count);
            pool_wait_duration
                .with_label_values(&labels)
                .inc_by(pool.wait_duration_micros as f64 / 1_000_000.0);

            if let Some(cache) = instance.cache() {
                let stats = cache.stats();
                cache_capacity
                    .with_label_values(&labels)
                    .set(cache.used_bytes() as i64);
                cache_entries
                    .with_label_values(&labels)
                    .set(cache.len() as i64);
                cache_collisions
                    .with_label_values(&labels)
                    .inc_by(stats.collisions);
                cache_del_hits
                    .with_label_values(&labels)
                    .inc_by(stats.del_hits);
                cache_del_miss
                    .with_label_values(&labels)
                    .inc_by(stats.del_misses);
                cache_hits.with_label_values(&labels).inc_by(stats.hits);
                cache_miss.with_label_values(&labels).inc_by(stats.misses);
            }
        }

        let mut families = Vec::with_capacity(ALL_DEFS.len());
        families.extend(pool_in_use.collect());
        families.extend(pool_idle.collect());
        families.extend(pool_open.collect());
        families.extend(pool_max.collect());
        families.extend(pool_lifetime_closed.collect());
        families.extend(pool_idle_closed.collect());
        families.extend(pool_wait_count.collect());
        families.extend(pool_wait_duration.collect());
        families.extend(cache_capacity.collect());
        families.extend(cache_entries.collect());
        families.extend(cache_collisions.collect());
        families.extend(cache_del_hits.collect());
        families.extend(cache_del_miss.collect());
        families.extend(cache_hits.collect());
        families.extend(cache_miss.collect());
        families
    }
}
