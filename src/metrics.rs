//! Metrics collection and export for keyed object pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time statistics of one sub-pool
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SubPoolStats {
    /// String form of the sub-pool's key
    pub name: String,

    /// Active + idle objects
    pub pool_size: usize,

    /// High-water mark of `pool_size`
    pub peak_count: usize,

    /// Objects currently borrowed
    pub active_count: usize,

    /// Objects waiting for reuse
    pub idle_count: usize,

    /// Slots reserved by creates still in flight
    pub pending_creates: usize,

    pub total_created: usize,
    pub total_destroyed: usize,
    pub total_borrowed: usize,
    /// Returns that put the object back in the idle queue
    pub total_returned: usize,
    pub total_evicted: usize,
    pub create_failures: usize,
    pub validation_failures: usize,

    /// Number of borrows refused because the sub-pool was full
    pub exhausted_events: usize,
}

/// Aggregate metrics over every sub-pool of a registry
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, KeyedObjectPool, PoolConfiguration};
///
/// let pool = KeyedObjectPool::new(
///     "memcached",
///     FnFactory::new(|key: &String| Ok(key.len())),
///     PoolConfiguration::default(),
/// ).unwrap();
///
/// let obj = pool.borrow(&"10.0.0.1:11211".to_string()).unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_active_count, 1);
/// assert_eq!(metrics.sub_pools, 1);
/// pool.return_object(&"10.0.0.1:11211".to_string(), obj).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    pub name: String,
    pub sub_pools: usize,
    pub total_pool_size: usize,
    pub highest_peak_count: usize,
    pub total_active_count: usize,
    pub total_idle_count: usize,
    pub total_created: usize,
    pub total_destroyed: usize,
    pub total_borrowed: usize,
    /// Returns that put the object back in the idle queue
    pub total_returned: usize,
    pub total_evicted: usize,
    pub create_failures: usize,
    pub validation_failures: usize,
    pub exhausted_events: usize,

    /// Per-key breakdown, sorted by key name
    pub per_key: Vec<SubPoolStats>,
}

impl PoolMetrics {
    /// Fold per-key statistics into registry totals
    pub fn aggregate(name: &str, mut per_key: Vec<SubPoolStats>) -> Self {
        per_key.sort_by(|a, b| a.name.cmp(&b.name));

        let mut metrics = PoolMetrics {
            name: name.to_string(),
            sub_pools: per_key.len(),
            total_pool_size: 0,
            highest_peak_count: 0,
            total_active_count: 0,
            total_idle_count: 0,
            total_created: 0,
            total_destroyed: 0,
            total_borrowed: 0,
            total_returned: 0,
            total_evicted: 0,
            create_failures: 0,
            validation_failures: 0,
            exhausted_events: 0,
            per_key: Vec::new(),
        };

        for stats in &per_key {
            metrics.total_pool_size += stats.pool_size;
            metrics.highest_peak_count = metrics.highest_peak_count.max(stats.peak_count);
            metrics.total_active_count += stats.active_count;
            metrics.total_idle_count += stats.idle_count;
            metrics.total_created += stats.total_created;
            metrics.total_destroyed += stats.total_destroyed;
            metrics.total_borrowed += stats.total_borrowed;
            metrics.total_returned += stats.total_returned;
            metrics.total_evicted += stats.total_evicted;
            metrics.create_failures += stats.create_failures;
            metrics.validation_failures += stats.validation_failures;
            metrics.exhausted_events += stats.exhausted_events;
        }
        metrics.per_key = per_key;
        metrics
    }

    /// Export registry totals as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("sub_pools".to_string(), self.sub_pools.to_string());
        metrics.insert("total_pool_size".to_string(), self.total_pool_size.to_string());
        metrics.insert("highest_peak_count".to_string(), self.highest_peak_count.to_string());
        metrics.insert("total_active_count".to_string(), self.total_active_count.to_string());
        metrics.insert("total_idle_count".to_string(), self.total_idle_count.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_borrowed".to_string(), self.total_borrowed.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("total_evicted".to_string(), self.total_evicted.to_string());
        metrics.insert("create_failures".to_string(), self.create_failures.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format, one series per key
    ///
    /// # Examples
    ///
    /// ```
    /// use keyed_objectpool::{FnFactory, KeyedObjectPool, PoolConfiguration};
    /// use std::collections::HashMap;
    ///
    /// let pool = KeyedObjectPool::new(
    ///     "memcached",
    ///     FnFactory::new(|_: &&str| Ok(())),
    ///     PoolConfiguration::default(),
    /// ).unwrap();
    /// let obj = pool.borrow(&"cache-a").unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus(Some(&tags)).unwrap();
    /// assert!(output.contains("keyed_objectpool_objects_active"));
    /// assert!(output.contains("key=\"cache-a\""));
    /// assert!(output.contains("service=\"api\""));
    /// # pool.return_object(&"cache-a", obj).unwrap();
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        tags: Option<&HashMap<String, String>>,
    ) -> crate::PoolResult<String> {
        use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), metrics.name.clone());
        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.insert(key.clone(), value.clone());
            }
        }
        let registry = Registry::new_custom(Some("keyed_objectpool".to_string()), Some(labels))?;

        let gauges: [(&str, &str, fn(&SubPoolStats) -> usize); 5] = [
            ("objects_active", "Objects currently borrowed", |s| s.active_count),
            ("objects_idle", "Objects waiting for reuse", |s| s.idle_count),
            ("objects_total", "Active and idle objects", |s| s.pool_size),
            ("objects_peak", "High-water mark of active and idle objects", |s| s.peak_count),
            ("creates_pending", "Creates in flight", |s| s.pending_creates),
        ];
        for (name, help, read) in gauges {
            let gauge = IntGaugeVec::new(Opts::new(name, help), &["key"])?;
            registry.register(Box::new(gauge.clone()))?;
            for stats in &metrics.per_key {
                gauge
                    .with_label_values(&[stats.name.as_str()])
                    .set(i64::try_from(read(stats)).unwrap_or(i64::MAX));
            }
        }

        let counters: [(&str, &str, fn(&SubPoolStats) -> usize); 8] = [
            ("objects_created_total", "Objects created", |s| s.total_created),
            ("objects_destroyed_total", "Objects destroyed", |s| s.total_destroyed),
            ("objects_borrowed_total", "Successful borrows", |s| s.total_borrowed),
            ("objects_returned_total", "Returns", |s| s.total_returned),
            ("objects_evicted_total", "Idle objects evicted", |s| s.total_evicted),
            ("create_failures_total", "Failed creates", |s| s.create_failures),
            ("validation_failures_total", "Failed validations", |s| s.validation_failures),
            ("events_exhausted_total", "Borrows refused at capacity", |s| s.exhausted_events),
        ];
        for (name, help, read) in counters {
            let counter = IntCounterVec::new(Opts::new(name, help), &["key"])?;
            registry.register(Box::new(counter.clone()))?;
            for stats in &metrics.per_key {
                counter
                    .with_label_values(&[stats.name.as_str()])
                    .inc_by(read(stats) as u64);
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| crate::PoolError::Metrics(err.to_string()))
    }
}

#[cfg(feature = "metrics")]
impl From<prometheus::Error> for crate::PoolError {
    fn from(err: prometheus::Error) -> Self {
        crate::PoolError::Metrics(err.to_string())
    }
}

/// Internal per-sub-pool counters
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub borrowed: AtomicUsize,
    pub returned: AtomicUsize,
    pub evicted: AtomicUsize,
    pub create_failures: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub exhausted_events: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicUsize, amount: usize) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Combine the counters with a gauge snapshot taken under the sub-pool lock
    pub fn get_stats(
        &self,
        name: &str,
        active: usize,
        idle: usize,
        pending: usize,
        peak: usize,
    ) -> SubPoolStats {
        SubPoolStats {
            name: name.to_string(),
            pool_size: active + idle,
            peak_count: peak,
            active_count: active,
            idle_count: idle,
            pending_creates: pending,
            total_created: self.created.load(Ordering::Relaxed),
            total_destroyed: self.destroyed.load(Ordering::Relaxed),
            total_borrowed: self.borrowed.load(Ordering::Relaxed),
            total_returned: self.returned.load(Ordering::Relaxed),
            total_evicted: self.evicted.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
        }
    }
}
