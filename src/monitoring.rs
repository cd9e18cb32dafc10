//! Read-only views for a management layer
//!
//! [`ObjectPoolMonitor`] exposes registry-wide attributes and one
//! [`KeyedObjectMonitor`] per key. Neither can change pool state. A
//! management layer subscribes to [`ObjectPoolMonitor::subscribe`] and
//! registers or deregisters keyed monitors as [`PoolEvent`]s arrive.

use crate::registry::{KeyedObjectPool, PoolEvent};
use crate::sub_pool::{KeyedSubPool, PoolKey};

use crossbeam::channel::Receiver;
use std::fmt;
use std::sync::Arc;

/// Object counts of one key, `-1` everywhere once the key is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ObjectStat {
    pub object_size: i64,
    pub peak_count: i64,
    pub active_count: i64,
    pub idle_count: i64,
}

impl ObjectStat {
    pub const INVALID: ObjectStat = ObjectStat {
        object_size: -1,
        peak_count: -1,
        active_count: -1,
        idle_count: -1,
    };
}

/// Registry-wide object counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ObjectPoolStat {
    pub total_pool_size: i64,
    pub highest_peak_count: i64,
    pub total_active_count: i64,
    pub total_idle_count: i64,
}

fn gauge(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Monitoring view of a whole registry
pub struct ObjectPoolMonitor<K: PoolKey, V: Send + 'static> {
    pool: Arc<KeyedObjectPool<K, V>>,
}

impl<K: PoolKey, V: Send + 'static> ObjectPoolMonitor<K, V> {
    pub fn new(pool: Arc<KeyedObjectPool<K, V>>) -> Self {
        Self { pool }
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    pub fn pool_type(&self) -> &'static str {
        self.pool.pool_type()
    }

    pub fn pool_stat(&self) -> ObjectPoolStat {
        let metrics = self.pool.get_metrics();
        ObjectPoolStat {
            total_pool_size: gauge(metrics.total_pool_size),
            highest_peak_count: gauge(metrics.highest_peak_count),
            total_active_count: gauge(metrics.total_active_count),
            total_idle_count: gauge(metrics.total_idle_count),
        }
    }

    pub fn min_per_key(&self) -> i64 {
        gauge(self.pool.min())
    }

    /// `-1` when unbounded
    pub fn max_per_key(&self) -> i64 {
        self.pool.max().map_or(-1, gauge)
    }

    pub fn is_borrow_validation(&self) -> bool {
        self.pool.is_borrow_validation()
    }

    pub fn is_return_validation(&self) -> bool {
        self.pool.is_return_validation()
    }

    pub fn is_disposable(&self) -> bool {
        self.pool.is_disposable()
    }

    pub fn keep_alive_timeout_secs(&self) -> i64 {
        self.pool.keep_alive_timeout_secs()
    }

    pub fn is_destroyed(&self) -> bool {
        self.pool.is_destroyed()
    }

    pub fn keys(&self) -> String {
        self.pool.keys_listing()
    }

    /// One monitor per key currently known
    pub fn keyed_monitors(&self) -> Vec<KeyedObjectMonitor<K, V>> {
        self.pool
            .keys()
            .into_iter()
            .map(|key| self.keyed_monitor(key))
            .collect()
    }

    pub fn keyed_monitor(&self, key: K) -> KeyedObjectMonitor<K, V> {
        KeyedObjectMonitor {
            pool: Arc::clone(&self.pool),
            key,
        }
    }

    /// Sub-pool created/removed notifications
    pub fn subscribe(&self) -> Receiver<PoolEvent<K>> {
        self.pool.subscribe()
    }
}

impl<K: PoolKey, V: Send + 'static> fmt::Debug for ObjectPoolMonitor<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPoolMonitor")
            .field("pool", &self.pool.name())
            .finish()
    }
}

/// Monitoring view of one key.
///
/// Resolves the sub-pool on every read, so a monitor for a removed key
/// reports `(invalid)` names and [`ObjectStat::INVALID`].
pub struct KeyedObjectMonitor<K: PoolKey, V: Send + 'static> {
    pool: Arc<KeyedObjectPool<K, V>>,
    key: K,
}

impl<K: PoolKey, V: Send + 'static> KeyedObjectMonitor<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn name(&self) -> String {
        match self.pool.get_sub_pool(&self.key) {
            Some(sub_pool) => sub_pool.name().to_string(),
            None => format!("(invalid){}", self.key),
        }
    }

    pub fn keyed_object_type(&self) -> String {
        match self.pool.get_sub_pool(&self.key) {
            Some(sub_pool) => sub_pool.pool_type().to_string(),
            None => format!("(invalid){}", std::any::type_name::<KeyedSubPool<K, V>>()),
        }
    }

    pub fn object_stat(&self) -> ObjectStat {
        match self.pool.get_sub_pool(&self.key) {
            Some(sub_pool) => {
                let stats = sub_pool.stats();
                ObjectStat {
                    object_size: gauge(stats.pool_size),
                    peak_count: gauge(stats.peak_count),
                    active_count: gauge(stats.active_count),
                    idle_count: gauge(stats.idle_count),
                }
            }
            None => ObjectStat::INVALID,
        }
    }
}

impl<K: PoolKey, V: Send + 'static> fmt::Debug for KeyedObjectMonitor<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedObjectMonitor")
            .field("key", &self.key.to_string())
            .finish()
    }
}
