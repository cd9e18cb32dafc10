//! Registry of keyed sub-pools

use crate::config::PoolConfiguration;
use crate::entry::{Borrowed, PooledObject};
use crate::errors::{PoolError, PoolResult};
use crate::factory::ObjectLifecycleFactory;
use crate::health::HealthStatus;
use crate::metrics::PoolMetrics;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::reaper::IdleReaper;
use crate::sub_pool::{KeyedSubPool, PoolKey};

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// How often a borrow re-resolves its key after the sub-pool was pruned underneath it
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Sub-pool lifecycle notifications for monitoring collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent<K> {
    SubPoolCreated(K),
    SubPoolRemoved(K),
    PoolDestroyed,
}

/// Keyed object pool: one bounded [`KeyedSubPool`] per key, created on demand.
///
/// Operations on different keys never contend. The key map is sharded and
/// only locked while a sub-pool is looked up, inserted or removed.
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, KeyedObjectPool, PoolConfiguration, PoolError};
///
/// let pool = KeyedObjectPool::new(
///     "memcached",
///     FnFactory::new(|server: &String| Ok(format!("connection to {server}"))),
///     PoolConfiguration::new().with_max_per_key(1),
/// ).unwrap();
///
/// let server = "10.0.0.1:11211".to_string();
/// let conn = pool.borrow(&server).unwrap();
/// assert!(matches!(pool.borrow(&server), Err(PoolError::Exhausted { .. })));
///
/// pool.return_object(&server, conn).unwrap();
/// assert_eq!(pool.total_idle_count(), 1);
/// ```
pub struct KeyedObjectPool<K: PoolKey, V: Send + 'static> {
    name: String,
    sub_pools: DashMap<K, Arc<KeyedSubPool<K, V>>>,
    factory: Arc<dyn ObjectLifecycleFactory<K, V>>,
    config: Arc<PoolConfiguration>,
    destroyed: AtomicBool,
    listeners: Mutex<Vec<Sender<PoolEvent<K>>>>,
    reaper: Mutex<Option<IdleReaper>>,
}

impl<K: PoolKey, V: Send + 'static> KeyedObjectPool<K, V> {
    /// Create a registry using `factory` for every key
    pub fn new<F>(name: impl Into<String>, factory: F, config: PoolConfiguration) -> PoolResult<Self>
    where
        F: ObjectLifecycleFactory<K, V> + 'static,
    {
        Self::with_factory(name, Arc::new(factory), config)
    }

    /// Create a registry around a shared factory
    pub fn with_factory(
        name: impl Into<String>,
        factory: Arc<dyn ObjectLifecycleFactory<K, V>>,
        config: PoolConfiguration,
    ) -> PoolResult<Self> {
        config.validate()?;
        let name = name.into();
        debug!(pool = %name, ?config, "created keyed object pool");
        Ok(Self {
            name,
            sub_pools: DashMap::new(),
            factory,
            config: Arc::new(config),
            destroyed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            reaper: Mutex::new(None),
        })
    }

    /// Start the background idle reaper on the current Tokio runtime.
    ///
    /// Does nothing if a reaper is already running or the keep-alive timeout
    /// is disabled.
    pub fn start_idle_reaper(self: &Arc<Self>) -> PoolResult<()> {
        if self.is_destroyed() {
            return Err(PoolError::Destroyed);
        }
        let mut reaper = self.reaper.lock();
        if reaper.as_ref().is_some_and(|r| !r.is_finished()) {
            return Ok(());
        }
        if self.config.keep_alive_timeout.is_none() {
            debug!(pool = %self.name, "keep-alive timeout disabled, idle reaper not started");
            return Ok(());
        }
        *reaper = Some(IdleReaper::spawn(Arc::downgrade(self), self.config.eviction_interval)?);
        info!(pool = %self.name, interval = ?self.config.eviction_interval, "idle reaper started");
        Ok(())
    }

    /// Stop the idle reaper if one is running
    pub fn stop_idle_reaper(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.stop();
            info!(pool = %self.name, "idle reaper stopped");
        }
    }

    pub fn is_reaper_running(&self) -> bool {
        self.reaper.lock().as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Look up the sub-pool for `key`, creating it on first use
    pub fn get_or_create_sub_pool(&self, key: &K) -> PoolResult<Arc<KeyedSubPool<K, V>>> {
        if self.is_destroyed() {
            return Err(PoolError::Destroyed);
        }
        if let Some(existing) = self.sub_pools.get(key) {
            return Ok(Arc::clone(existing.value()));
        }

        let created = match self.sub_pools.entry(key.clone()) {
            Entry::Occupied(occupied) => return Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let sub_pool = KeyedSubPool::new(
                    key.clone(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.factory),
                );
                vacant.insert(Arc::clone(&sub_pool));
                sub_pool
            }
        };

        // Lost a race with destroy(): don't leave the new sub-pool behind.
        if self.is_destroyed() {
            self.sub_pools.remove(key);
            created.destroy();
            return Err(PoolError::Destroyed);
        }

        debug!(pool = %self.name, key = %created.name(), "created sub-pool");
        self.emit(PoolEvent::SubPoolCreated(key.clone()));

        if self.config.prewarm && self.config.min_per_key > 0 {
            match created.warmup(self.config.min_per_key) {
                Ok(count) => trace!(key = %created.name(), count, "pre-warmed sub-pool"),
                Err(err) => debug!(key = %created.name(), error = %err, "pre-warm aborted"),
            }
        }
        Ok(created)
    }

    /// Existing sub-pool for `key`, without creating one
    pub fn get_sub_pool(&self, key: &K) -> Option<Arc<KeyedSubPool<K, V>>> {
        self.sub_pools.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Borrow an object for `key`
    pub fn borrow(&self, key: &K) -> PoolResult<Borrowed<K, V>> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let sub_pool = self.get_or_create_sub_pool(key)?;
            match sub_pool.borrow() {
                // Pruned between lookup and borrow; resolve the key again.
                Err(PoolError::Destroyed) if !self.is_destroyed() => {
                    trace!(key = %sub_pool.name(), "sub-pool retired during borrow");
                }
                result => return result,
            }
        }
        Err(PoolError::Destroyed)
    }

    /// Borrow an object that returns itself when dropped
    pub fn get_object(&self, key: &K) -> PoolResult<PooledObject<K, V>> {
        self.borrow(key).map(PooledObject::new)
    }

    /// Give a borrowed object back to the sub-pool of `key`
    pub fn return_object(&self, key: &K, borrowed: Borrowed<K, V>) -> PoolResult<()> {
        if borrowed.key() != key {
            return Err(self.reject_misrouted(key, borrowed));
        }
        Arc::clone(borrowed.origin()).return_object(borrowed)
    }

    /// Destroy a borrowed object instead of returning it
    pub fn remove_object(&self, key: &K, borrowed: Borrowed<K, V>) -> PoolResult<()> {
        if borrowed.key() != key {
            return Err(self.reject_misrouted(key, borrowed));
        }
        Arc::clone(borrowed.origin()).remove_object(borrowed)
    }

    /// Snapshot of the known keys
    pub fn keys(&self) -> Vec<K> {
        self.sub_pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Keys formatted for display, sorted: `[a, b, c]`
    pub fn keys_listing(&self) -> String {
        let mut names: Vec<String> = self.sub_pools.iter().map(|entry| entry.key().to_string()).collect();
        names.sort();
        format!("[{}]", names.join(", "))
    }

    /// Snapshot of all sub-pools
    pub fn sub_pools(&self) -> Vec<Arc<KeyedSubPool<K, V>>> {
        self.sub_pools.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn total_pool_size(&self) -> usize {
        self.sub_pools().iter().map(|p| p.pool_size()).sum()
    }

    pub fn highest_peak_count(&self) -> usize {
        self.sub_pools().iter().map(|p| p.peak_count()).max().unwrap_or(0)
    }

    pub fn total_active_count(&self) -> usize {
        self.sub_pools().iter().map(|p| p.active_count()).sum()
    }

    pub fn total_idle_count(&self) -> usize {
        self.sub_pools().iter().map(|p| p.idle_count()).sum()
    }

    /// Run one eviction sweep over every sub-pool and prune empty ones if
    /// configured. Returns the number of objects destroyed.
    pub fn evict_idle(&self) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let evicted = match self.config.keep_alive_timeout {
            Some(timeout) => self
                .sub_pools()
                .iter()
                .map(|p| p.evict_idle_older_than(timeout))
                .sum(),
            None => 0,
        };
        if self.config.prune_empty_sub_pools {
            self.prune_empty_sub_pools();
        }
        evicted
    }

    /// Drop sub-pools holding no objects. Returns how many were removed.
    pub fn prune_empty_sub_pools(&self) -> usize {
        let mut pruned = 0;
        for key in self.keys() {
            if let Some((key, _)) = self.sub_pools.remove_if(&key, |_, p| p.retire_if_unused()) {
                debug!(pool = %self.name, key = %key, "pruned empty sub-pool");
                self.emit(PoolEvent::SubPoolRemoved(key));
                pruned += 1;
            }
        }
        pruned
    }

    /// Destroy and forget the sub-pool of `key`
    pub fn remove_sub_pool(&self, key: &K) -> bool {
        match self.sub_pools.remove(key) {
            Some((key, sub_pool)) => {
                sub_pool.destroy();
                self.emit(PoolEvent::SubPoolRemoved(key));
                true
            }
            None => false,
        }
    }

    /// Receive sub-pool lifecycle events from now on
    pub fn subscribe(&self) -> Receiver<PoolEvent<K>> {
        let (tx, rx) = channel::unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    /// Destroy every sub-pool and stop accepting borrows. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_idle_reaper();

        let keys = self.keys();
        for key in keys {
            if let Some((key, sub_pool)) = self.sub_pools.remove(&key) {
                sub_pool.destroy();
                self.emit(PoolEvent::SubPoolRemoved(key));
            }
        }
        self.sub_pools.clear();
        self.emit(PoolEvent::PoolDestroyed);
        info!(pool = %self.name, "keyed object pool destroyed");
    }

    /// Aggregate metrics over a snapshot of the sub-pools
    pub fn get_metrics(&self) -> PoolMetrics {
        let per_key = self.sub_pools().iter().map(|p| p.stats()).collect();
        PoolMetrics::aggregate(&self.name, per_key)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), tags)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::new(&self.get_metrics(), self.config.max_per_key, self.is_destroyed())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implementation type tag for monitoring
    pub fn pool_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.config
    }

    pub fn min(&self) -> usize {
        self.config.min_per_key
    }

    pub fn max(&self) -> Option<usize> {
        self.config.max_per_key
    }

    pub fn is_borrow_validation(&self) -> bool {
        self.config.borrow_validation
    }

    pub fn is_return_validation(&self) -> bool {
        self.config.return_validation
    }

    pub fn is_disposable(&self) -> bool {
        self.config.disposable
    }

    pub fn keep_alive_timeout_secs(&self) -> i64 {
        self.config.keep_alive_timeout_secs()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Destroy an object handed in under the wrong key so its own sub-pool
    /// frees the slot, and report the caller's mistake.
    fn reject_misrouted(&self, key: &K, borrowed: Borrowed<K, V>) -> PoolError {
        let origin = Arc::clone(borrowed.origin());
        warn!(
            pool = %self.name,
            key = %key,
            origin = %origin.name(),
            "object returned under a key it was not borrowed from"
        );
        if let Err(err) = origin.remove_object(borrowed) {
            warn!(pool = %self.name, error = %err, "failed to release misrouted object");
        }
        PoolError::InvalidReturn { key: key.to_string() }
    }

    fn emit(&self, event: PoolEvent<K>) {
        self.listeners.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<K: PoolKey, V: Send + 'static> Drop for KeyedObjectPool<K, V> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<K: PoolKey, V: Send + 'static> fmt::Debug for KeyedObjectPool<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedObjectPool")
            .field("name", &self.name)
            .field("keys", &self.keys_listing())
            .field("config", &self.config)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
