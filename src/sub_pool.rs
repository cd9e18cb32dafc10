//! Bounded per-key sub-pool

use crate::config::{PoolConfiguration, QueueOrder};
use crate::entry::{Borrowed, PooledEntry};
use crate::errors::{PoolError, PoolResult};
use crate::factory::ObjectLifecycleFactory;
use crate::metrics::{MetricsTracker, SubPoolStats};

use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Requirements on the key identifying a sub-pool, typically a server address
pub trait PoolKey: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static {}

impl<T> PoolKey for T where T: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static {}

/// Mutable bookkeeping guarded by the sub-pool lock
struct SubPoolState<V> {
    idle: VecDeque<PooledEntry<V>>,
    active: HashSet<u64>,
    /// Slots reserved for creates running outside the lock
    pending: usize,
    peak: usize,
}

impl<V> SubPoolState<V> {
    fn size(&self) -> usize {
        self.active.len() + self.idle.len()
    }

    fn occupied(&self) -> usize {
        self.size() + self.pending
    }

    fn record_peak(&mut self) {
        self.peak = self.peak.max(self.size());
    }
}

/// Outcome of the locked part of a borrow
enum Slot<V> {
    Idle(PooledEntry<V>),
    Reserved,
}

/// The pool of objects belonging to one key.
///
/// Every factory call runs outside the lock. A create first reserves a slot
/// under the lock, then builds the object, then commits or rolls the
/// reservation back, so `active + idle + pending` never exceeds the maximum.
pub struct KeyedSubPool<K: PoolKey, V: Send + 'static> {
    key: K,
    name: String,
    config: Arc<PoolConfiguration>,
    factory: Arc<dyn ObjectLifecycleFactory<K, V>>,
    state: Mutex<SubPoolState<V>>,
    destroyed: AtomicBool,
    next_id: AtomicU64,
    metrics: MetricsTracker,
}

impl<K: PoolKey, V: Send + 'static> KeyedSubPool<K, V> {
    /// Create an empty sub-pool for `key`
    pub fn new(
        key: K,
        config: Arc<PoolConfiguration>,
        factory: Arc<dyn ObjectLifecycleFactory<K, V>>,
    ) -> Arc<Self> {
        let name = key.to_string();
        Arc::new(Self {
            key,
            name,
            config,
            factory,
            state: Mutex::new(SubPoolState {
                idle: VecDeque::new(),
                active: HashSet::new(),
                pending: 0,
                peak: 0,
            }),
            destroyed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            metrics: MetricsTracker::new(),
        })
    }

    /// Check out an object, reusing an idle one when possible.
    ///
    /// Never waits for capacity: a full sub-pool fails with
    /// [`PoolError::Exhausted`] right away.
    pub fn borrow(self: &Arc<Self>) -> PoolResult<Borrowed<K, V>> {
        // Number of idle entries this call may try before it falls back to creating.
        let mut idle_attempts: Option<usize> = None;

        loop {
            let slot = {
                let mut state = self.state.lock();
                if self.is_destroyed() {
                    return Err(PoolError::Destroyed);
                }

                let attempts = *idle_attempts.get_or_insert(state.idle.len());
                let reused = if attempts > 0 {
                    self.pop_idle(&mut state)
                } else {
                    None
                };

                match reused {
                    Some(entry) => {
                        state.active.insert(entry.id);
                        Slot::Idle(entry)
                    }
                    None if self.has_capacity(&state) => {
                        state.pending += 1;
                        Slot::Reserved
                    }
                    None => {
                        drop(state);
                        MetricsTracker::increment(&self.metrics.exhausted_events);
                        trace!(key = %self.name, "sub-pool exhausted");
                        return Err(PoolError::Exhausted {
                            key: self.name.clone(),
                            max: self.config.max_per_key.unwrap_or(usize::MAX),
                        });
                    }
                }
            };

            match slot {
                Slot::Reserved => return self.create_reserved(),
                Slot::Idle(entry) => {
                    if !self.config.borrow_validation
                        || self.factory.validate(&self.key, &entry.value)
                    {
                        MetricsTracker::increment(&self.metrics.borrowed);
                        trace!(key = %self.name, id = entry.id, "reused idle object");
                        return Ok(Borrowed::new(entry, Arc::clone(self)));
                    }

                    MetricsTracker::increment(&self.metrics.validation_failures);
                    debug!(key = %self.name, id = entry.id, "idle object failed validation");
                    self.state.lock().active.remove(&entry.id);
                    self.destroy_value(entry.value);
                    idle_attempts = idle_attempts.map(|n| n.saturating_sub(1));
                }
            }
        }
    }

    /// Check an object back in.
    ///
    /// Disposable and destroyed sub-pools destroy the object instead of
    /// keeping it. A handle from another sub-pool is an
    /// [`PoolError::InvalidReturn`]; that object is removed from its own
    /// sub-pool so neither pool's counts drift.
    pub fn return_object(&self, borrowed: Borrowed<K, V>) -> PoolResult<()> {
        let mut entry = self.claim(borrowed)?;

        let mut state = self.state.lock();
        if !state.active.contains(&entry.id) {
            drop(state);
            return Err(self.invalid_return(entry));
        }

        if self.config.disposable || self.is_destroyed() {
            state.active.remove(&entry.id);
            drop(state);
            self.destroy_value(entry.value);
            return Ok(());
        }

        if self.config.return_validation {
            drop(state);
            let valid = self.factory.validate(&self.key, &entry.value);
            state = self.state.lock();
            if !valid {
                state.active.remove(&entry.id);
                drop(state);
                MetricsTracker::increment(&self.metrics.validation_failures);
                debug!(key = %self.name, id = entry.id, "returned object failed validation");
                self.destroy_value(entry.value);
                return Ok(());
            }
        }

        state.active.remove(&entry.id);
        if self.is_destroyed() {
            drop(state);
            self.destroy_value(entry.value);
            return Ok(());
        }
        entry.mark_returned();
        state.idle.push_back(entry);
        drop(state);
        MetricsTracker::increment(&self.metrics.returned);
        Ok(())
    }

    /// Destroy a borrowed object the caller knows is broken
    pub fn remove_object(&self, borrowed: Borrowed<K, V>) -> PoolResult<()> {
        let entry = self.claim(borrowed)?;
        if !self.state.lock().active.remove(&entry.id) {
            return Err(self.invalid_return(entry));
        }
        trace!(key = %self.name, id = entry.id, "removing borrowed object");
        self.destroy_value(entry.value);
        Ok(())
    }

    /// Release a borrowed object from accounting without destroying it
    pub fn detach(&self, borrowed: Borrowed<K, V>) -> PoolResult<V> {
        let entry = self.claim(borrowed)?;
        if !self.state.lock().active.remove(&entry.id) {
            return Err(self.invalid_return(entry));
        }
        Ok(entry.value)
    }

    /// Destroy idle objects unused for longer than `threshold`.
    ///
    /// Oldest entries go first and the sub-pool never drops below
    /// `min_per_key` objects. Returns the number destroyed.
    pub fn evict_idle_older_than(&self, threshold: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<PooledEntry<V>> = {
            let mut state = self.state.lock();
            let mut removable = state.size().saturating_sub(self.config.min_per_key);
            let mut kept = VecDeque::with_capacity(state.idle.len());
            let mut expired = Vec::new();

            // Both queue orders push at the back, so the front is the oldest.
            for entry in state.idle.drain(..) {
                if removable > 0 && entry.idle_for(now) > threshold {
                    removable -= 1;
                    expired.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            state.idle = kept;
            expired
        };

        let evicted = expired.len();
        for entry in expired {
            self.destroy_value(entry.value);
        }
        if evicted > 0 {
            MetricsTracker::add(&self.metrics.evicted, evicted);
            debug!(key = %self.name, evicted, "evicted idle objects");
        }
        evicted
    }

    /// Create up to `count` idle objects ahead of demand.
    ///
    /// Stops at the first create failure, which is logged. Returns how many
    /// objects were added.
    pub fn warmup(&self, count: usize) -> PoolResult<usize> {
        let mut created = 0;
        for _ in 0..count {
            {
                let mut state = self.state.lock();
                if self.is_destroyed() {
                    return Err(PoolError::Destroyed);
                }
                if !self.has_capacity(&state) {
                    break;
                }
                state.pending += 1;
            }

            match self.factory.create(&self.key) {
                Ok(value) => {
                    MetricsTracker::increment(&self.metrics.created);
                    let entry = PooledEntry::new(self.next_id(), value);
                    let mut state = self.state.lock();
                    state.pending -= 1;
                    if self.is_destroyed() {
                        drop(state);
                        self.destroy_value(entry.value);
                        return Err(PoolError::Destroyed);
                    }
                    state.idle.push_back(entry);
                    state.record_peak();
                    created += 1;
                }
                Err(err) => {
                    self.state.lock().pending -= 1;
                    MetricsTracker::increment(&self.metrics.create_failures);
                    warn!(key = %self.name, error = %err, "warm-up create failed");
                    break;
                }
            }
        }
        Ok(created)
    }

    /// Mark the sub-pool destroyed and destroy its idle objects.
    ///
    /// Borrowed objects are destroyed as they come back. Calling this more
    /// than once has no further effect.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let idle: Vec<PooledEntry<V>> = self.state.lock().idle.drain(..).collect();
        debug!(key = %self.name, idle = idle.len(), "destroying sub-pool");
        for entry in idle {
            self.destroy_value(entry.value);
        }
    }

    /// Retire the sub-pool if it holds nothing and nothing is being created
    pub(crate) fn retire_if_unused(&self) -> bool {
        let state = self.state.lock();
        if state.occupied() > 0 || self.is_destroyed() {
            return false;
        }
        self.destroyed.store(true, Ordering::SeqCst);
        true
    }

    /// Reset the peak to the current pool size
    pub fn reset_peak(&self) {
        let mut state = self.state.lock();
        state.peak = state.size();
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// String form of the key
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

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Active + idle objects
    pub fn pool_size(&self) -> usize {
        self.state.lock().size()
    }

    pub fn peak_count(&self) -> usize {
        self.state.lock().peak
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Consistent snapshot of gauges and counters
    pub fn stats(&self) -> SubPoolStats {
        let (active, idle, pending, peak) = {
            let state = self.state.lock();
            (state.active.len(), state.idle.len(), state.pending, state.peak)
        };
        self.metrics.get_stats(&self.name, active, idle, pending, peak)
    }

    fn create_reserved(self: &Arc<Self>) -> PoolResult<Borrowed<K, V>> {
        match self.factory.create(&self.key) {
            Ok(value) => {
                MetricsTracker::increment(&self.metrics.created);
                let entry = PooledEntry::new(self.next_id(), value);
                let mut state = self.state.lock();
                state.pending -= 1;
                if self.is_destroyed() {
                    drop(state);
                    self.destroy_value(entry.value);
                    return Err(PoolError::Destroyed);
                }
                state.active.insert(entry.id);
                state.record_peak();
                drop(state);

                MetricsTracker::increment(&self.metrics.borrowed);
                trace!(key = %self.name, id = entry.id, "created object");
                Ok(Borrowed::new(entry, Arc::clone(self)))
            }
            Err(err) => {
                self.state.lock().pending -= 1;
                MetricsTracker::increment(&self.metrics.create_failures);
                debug!(key = %self.name, error = %err, "create failed");
                Err(PoolError::Factory(err))
            }
        }
    }

    fn pop_idle(&self, state: &mut MutexGuard<'_, SubPoolState<V>>) -> Option<PooledEntry<V>> {
        match self.config.queue_order {
            QueueOrder::Lifo => state.idle.pop_back(),
            QueueOrder::Fifo => state.idle.pop_front(),
        }
    }

    fn has_capacity(&self, state: &SubPoolState<V>) -> bool {
        match self.config.max_per_key {
            Some(max) => state.occupied() < max,
            None => true,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Unwrap a handle that must belong to this sub-pool
    fn claim(&self, borrowed: Borrowed<K, V>) -> PoolResult<PooledEntry<V>> {
        if std::ptr::eq(Arc::as_ptr(borrowed.origin()), self) {
            let (entry, _) = borrowed.into_parts();
            return Ok(entry);
        }

        let (entry, origin) = borrowed.into_parts();
        warn!(
            key = %self.name,
            origin = %origin.name(),
            "object returned to a sub-pool it was not borrowed from"
        );
        let key = self.name.clone();
        origin.release_unreturned(entry);
        Err(PoolError::InvalidReturn { key })
    }

    /// Take an entry that will never be returned out of accounting and destroy it
    pub(crate) fn release_unreturned(&self, entry: PooledEntry<V>) {
        self.state.lock().active.remove(&entry.id);
        self.destroy_value(entry.value);
    }

    fn invalid_return(&self, entry: PooledEntry<V>) -> PoolError {
        warn!(key = %self.name, id = entry.id, "returned object is not active in this sub-pool");
        self.destroy_value(entry.value);
        PoolError::InvalidReturn {
            key: self.name.clone(),
        }
    }

    fn destroy_value(&self, value: V) {
        MetricsTracker::increment(&self.metrics.destroyed);
        if let Err(err) = self.factory.destroy(&self.key, value) {
            warn!(key = %self.name, error = %err, "failed to destroy pooled object");
        }
    }
}

impl<K: PoolKey, V: Send + 'static> fmt::Debug for KeyedSubPool<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("KeyedSubPool")
            .field("key", &self.name)
            .field("active", &stats.active_count)
            .field("idle", &stats.idle_count)
            .field("peak", &stats.peak_count)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FactoryError;
    use std::sync::atomic::AtomicUsize;

    /// Hands out increasing numbers and counts lifecycle calls
    #[derive(Default)]
    struct Counting {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        fail_create: AtomicBool,
        fail_destroy: AtomicBool,
        reject: AtomicBool,
    }

    impl ObjectLifecycleFactory<&'static str, usize> for Counting {
        fn create(&self, _key: &&'static str) -> Result<usize, FactoryError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(FactoryError::new("connection refused"));
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        fn validate(&self, _key: &&'static str, _value: &usize) -> bool {
            !self.reject.load(Ordering::SeqCst)
        }

        fn destroy(&self, _key: &&'static str, _value: usize) -> Result<(), FactoryError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            if self.fail_destroy.load(Ordering::SeqCst) {
                return Err(FactoryError::new("close failed"));
            }
            Ok(())
        }
    }

    fn sub_pool(
        config: PoolConfiguration,
    ) -> (Arc<KeyedSubPool<&'static str, usize>>, Arc<Counting>) {
        let factory = Arc::new(Counting::default());
        let pool = KeyedSubPool::new(
            "cache-1:11211",
            Arc::new(config),
            Arc::clone(&factory) as Arc<dyn ObjectLifecycleFactory<_, _>>,
        );
        (pool, factory)
    }

    #[test]
    fn test_lifo_reuses_last_returned() {
        let (pool, _) = sub_pool(PoolConfiguration::default());
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        let (a_val, b_val) = (*a, *b);
        pool.return_object(a).unwrap();
        pool.return_object(b).unwrap();

        assert_eq!(*pool.borrow().unwrap(), b_val);
        assert_ne!(a_val, b_val);
    }

    #[test]
    fn test_fifo_reuses_first_returned() {
        let (pool, _) = sub_pool(PoolConfiguration::new().with_queue_order(QueueOrder::Fifo));
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        let a_val = *a;
        pool.return_object(a).unwrap();
        pool.return_object(b).unwrap();

        assert_eq!(*pool.borrow().unwrap(), a_val);
    }

    #[test]
    fn test_exhausted_at_max() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_max_per_key(2));
        let _a = pool.borrow().unwrap();
        let _b = pool.borrow().unwrap();

        let err = pool.borrow().unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { max: 2, .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().exhausted_events, 1);
    }

    #[test]
    fn test_create_failure_leaves_counts_untouched() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_max_per_key(1));
        factory.fail_create.store(true, Ordering::SeqCst);

        assert!(matches!(pool.borrow(), Err(PoolError::Factory(_))));
        let stats = pool.stats();
        assert_eq!(stats.pool_size, 0);
        assert_eq!(stats.pending_creates, 0);
        assert_eq!(stats.create_failures, 1);

        factory.fail_create.store(false, Ordering::SeqCst);
        assert!(pool.borrow().is_ok());
    }

    #[test]
    fn test_stale_idle_entry_replaced() {
        let (pool, factory) =
            sub_pool(PoolConfiguration::new().with_borrow_validation(true));
        let obj = pool.borrow().unwrap();
        pool.return_object(obj).unwrap();
        factory.reject.store(true, Ordering::SeqCst);

        let fresh = pool.borrow().unwrap();
        assert_eq!(*fresh, 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn test_stale_idle_then_create_failure_surfaces() {
        let (pool, factory) =
            sub_pool(PoolConfiguration::new().with_borrow_validation(true));
        let obj = pool.borrow().unwrap();
        pool.return_object(obj).unwrap();
        factory.reject.store(true, Ordering::SeqCst);
        factory.fail_create.store(true, Ordering::SeqCst);

        assert!(matches!(pool.borrow(), Err(PoolError::Factory(_))));
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.pool_size(), 0);
    }

    #[test]
    fn test_all_idle_invalid_terminates() {
        let (pool, factory) = sub_pool(
            PoolConfiguration::new()
                .with_max_per_key(4)
                .with_borrow_validation(true),
        );
        let held: Vec<_> = (0..4).map(|_| pool.borrow().unwrap()).collect();
        for obj in held {
            pool.return_object(obj).unwrap();
        }
        factory.reject.store(true, Ordering::SeqCst);

        let fresh = pool.borrow().unwrap();
        assert_eq!(*fresh, 4);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_return_validation_frees_slot() {
        let (pool, factory) = sub_pool(
            PoolConfiguration::new()
                .with_max_per_key(1)
                .with_return_validation(true),
        );
        let obj = pool.borrow().unwrap();
        factory.reject.store(true, Ordering::SeqCst);
        pool.return_object(obj).unwrap();

        assert_eq!(pool.pool_size(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert!(pool.borrow().is_ok());
    }

    #[test]
    fn test_disposable_never_reuses() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_disposable(true));
        for _ in 0..3 {
            let obj = pool.borrow().unwrap();
            pool.return_object(obj).unwrap();
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_object_destroys() {
        let (pool, factory) = sub_pool(PoolConfiguration::default());
        let obj = pool.borrow().unwrap();
        pool.remove_object(obj).unwrap();

        assert_eq!(pool.pool_size(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_return_to_foreign_sub_pool_is_invalid() {
        let (first, first_factory) = sub_pool(PoolConfiguration::default());
        let (second, second_factory) = sub_pool(PoolConfiguration::default());
        let obj = first.borrow().unwrap();

        assert!(matches!(
            second.return_object(obj),
            Err(PoolError::InvalidReturn { .. })
        ));
        assert_eq!(first.active_count(), 0);
        assert_eq!(second.idle_count(), 0);
        assert_eq!(first_factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(second_factory.destroyed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let (pool, _) = sub_pool(PoolConfiguration::default());
        let held: Vec<_> = (0..3).map(|_| pool.borrow().unwrap()).collect();
        assert_eq!(pool.peak_count(), 3);

        for obj in held {
            pool.remove_object(obj).unwrap();
        }
        assert_eq!(pool.peak_count(), 3);

        pool.reset_peak();
        assert_eq!(pool.peak_count(), 0);
    }

    #[test]
    fn test_eviction_respects_min() {
        let (pool, factory) = sub_pool(
            PoolConfiguration::new()
                .with_min_per_key(1)
                .with_max_per_key(5),
        );
        let held: Vec<_> = (0..3).map(|_| pool.borrow().unwrap()).collect();
        for obj in held {
            pool.return_object(obj).unwrap();
        }
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(pool.evict_idle_older_than(Duration::from_millis(10)), 2);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_eviction_skips_recent() {
        let (pool, _) = sub_pool(PoolConfiguration::default());
        let obj = pool.borrow().unwrap();
        pool.return_object(obj).unwrap();

        assert_eq!(pool.evict_idle_older_than(Duration::from_secs(60)), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (pool, factory) = sub_pool(PoolConfiguration::default());
        let held: Vec<_> = (0..2).map(|_| pool.borrow().unwrap()).collect();
        for obj in held {
            pool.return_object(obj).unwrap();
        }

        pool.destroy();
        pool.destroy();
        assert!(pool.is_destroyed());
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.borrow(), Err(PoolError::Destroyed)));
    }

    #[test]
    fn test_return_after_destroy_destroys() {
        let (pool, factory) = sub_pool(PoolConfiguration::default());
        let obj = pool.borrow().unwrap();
        pool.destroy();

        pool.return_object(obj).unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_warmup_fills_to_capacity() {
        let (pool, _) = sub_pool(PoolConfiguration::new().with_max_per_key(3));
        assert_eq!(pool.warmup(5).unwrap(), 3);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.peak_count(), 3);
    }

    #[test]
    fn test_warmup_stops_on_failure() {
        let (pool, factory) = sub_pool(PoolConfiguration::default());
        factory.fail_create.store(true, Ordering::SeqCst);
        assert_eq!(pool.warmup(2).unwrap(), 0);
        assert_eq!(pool.stats().pending_creates, 0);
    }

    #[test]
    fn test_retire_only_when_unused() {
        let (pool, _) = sub_pool(PoolConfiguration::default());
        let obj = pool.borrow().unwrap();
        assert!(!pool.retire_if_unused());

        pool.remove_object(obj).unwrap();
        assert!(pool.retire_if_unused());
        assert!(pool.is_destroyed());
    }

    #[test]
    fn test_dropped_handle_frees_slot() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_max_per_key(1));
        let obj = pool.borrow().unwrap();
        drop(obj);

        assert_eq!(pool.active_count(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert!(pool.borrow().is_ok());
    }

    #[test]
    fn test_panic_while_borrowed_frees_slot() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_max_per_key(1));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _obj = pool.borrow().unwrap();
            panic!("request handler failed");
        }));
        assert!(result.is_err());

        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        let obj = pool.borrow().unwrap();
        pool.return_object(obj).unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_dropped_handle_after_destroy_is_destroyed_once() {
        let (pool, factory) = sub_pool(PoolConfiguration::default());
        let obj = pool.borrow().unwrap();
        pool.destroy();
        drop(obj);

        assert_eq!(pool.active_count(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_destroy_does_not_stop_eviction() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_max_per_key(4));
        factory.fail_destroy.store(true, Ordering::SeqCst);
        let held: Vec<_> = (0..4).map(|_| pool.borrow().unwrap()).collect();
        for obj in held {
            pool.return_object(obj).unwrap();
        }
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(pool.evict_idle_older_than(Duration::from_millis(10)), 4);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 4);
        assert_eq!(pool.stats().total_evicted, 4);
    }

    #[test]
    fn test_failing_destroy_does_not_stop_teardown() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_max_per_key(3));
        factory.fail_destroy.store(true, Ordering::SeqCst);
        let held: Vec<_> = (0..3).map(|_| pool.borrow().unwrap()).collect();
        for obj in held {
            pool.return_object(obj).unwrap();
        }

        pool.destroy();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats().total_destroyed, 3);
    }

    #[test]
    fn test_returned_counts_only_requeued_objects() {
        let (pool, factory) = sub_pool(PoolConfiguration::new().with_return_validation(true));
        let kept = pool.borrow().unwrap();
        let rejected = pool.borrow().unwrap();
        pool.return_object(kept).unwrap();
        factory.reject.store(true, Ordering::SeqCst);
        pool.return_object(rejected).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total_returned, 1);
        assert_eq!(stats.validation_failures, 1);
        assert_eq!(stats.total_destroyed, 1);
    }
}
