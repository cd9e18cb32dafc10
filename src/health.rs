//! Health monitoring for keyed object pools

use crate::metrics::PoolMetrics;

/// Health status of a keyed object pool
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, KeyedObjectPool, PoolConfiguration};
///
/// let pool = KeyedObjectPool::new(
///     "memcached",
///     FnFactory::new(|_: &&str| Ok(())),
///     PoolConfiguration::new().with_max_per_key(2),
/// ).unwrap();
///
/// let a = pool.borrow(&"cache-a").unwrap();
/// let health = pool.get_health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.active_objects, 1);
/// # pool.return_object(&"cache-a", a).unwrap();
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Active objects over total capacity of all keys (0.0 to 1.0), zero when unbounded
    pub utilization: f64,

    pub active_objects: usize,
    pub idle_objects: usize,

    /// Keys whose sub-pool is full with nothing idle
    pub saturated_keys: Vec<String>,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Derive health from a metrics snapshot
    pub fn new(metrics: &PoolMetrics, max_per_key: Option<usize>, destroyed: bool) -> Self {
        let utilization = match max_per_key {
            Some(max) if metrics.sub_pools > 0 => {
                metrics.total_active_count as f64 / (max * metrics.sub_pools) as f64
            }
            _ => 0.0,
        };

        let saturated_keys: Vec<String> = match max_per_key {
            Some(max) => metrics
                .per_key
                .iter()
                .filter(|s| s.idle_count == 0 && s.active_count + s.pending_creates >= max)
                .map(|s| s.name.clone())
                .collect(),
            None => Vec::new(),
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if destroyed {
            warnings.push("Pool has been destroyed".to_string());
            is_healthy = false;
        }

        // Check for high utilization
        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        for key in &saturated_keys {
            warnings.push(format!("Sub-pool {key} is at capacity"));
        }

        if metrics.total_borrowed > 0 && metrics.create_failures > metrics.total_borrowed {
            warnings.push(format!(
                "Create failures ({}) outnumber successful borrows ({})",
                metrics.create_failures, metrics.total_borrowed
            ));
            is_healthy = false;
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            active_objects: metrics.total_active_count,
            idle_objects: metrics.total_idle_count,
            saturated_keys,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
