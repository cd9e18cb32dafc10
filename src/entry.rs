//! Pooled entries and the handles borrowers hold

use crate::errors::PoolResult;
use crate::sub_pool::{KeyedSubPool, PoolKey};

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One managed object plus its lifecycle metadata.
///
/// An entry is either in its sub-pool's idle queue or inside exactly one
/// [`Borrowed`] handle.
#[derive(Debug)]
pub(crate) struct PooledEntry<V> {
    pub id: u64,
    pub value: V,
    pub created_at: Instant,
    pub last_returned_at: Instant,
}

impl<V> PooledEntry<V> {
    pub fn new(id: u64, value: V) -> Self {
        let now = Instant::now();
        Self {
            id,
            value,
            created_at: now,
            last_returned_at: now,
        }
    }

    pub fn mark_returned(&mut self) {
        self.last_returned_at = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_returned_at)
    }
}

/// An object checked out of a sub-pool.
///
/// Hand it back with [`KeyedObjectPool::return_object`](crate::KeyedObjectPool::return_object)
/// or [`KeyedObjectPool::remove_object`](crate::KeyedObjectPool::remove_object).
/// The handle remembers which sub-pool it came from, so it always goes back
/// to the right place. Dropping it without returning (including during a
/// panic) destroys the object through its sub-pool and frees the slot; use
/// [`PooledObject`] to return it on drop instead.
pub struct Borrowed<K: PoolKey, V: Send + 'static> {
    entry: Option<PooledEntry<V>>,
    origin: Arc<KeyedSubPool<K, V>>,
}

impl<K: PoolKey, V: Send + 'static> Borrowed<K, V> {
    pub(crate) fn new(entry: PooledEntry<V>, origin: Arc<KeyedSubPool<K, V>>) -> Self {
        Self {
            entry: Some(entry),
            origin,
        }
    }

    fn entry(&self) -> &PooledEntry<V> {
        match self.entry {
            Some(ref entry) => entry,
            // Only `into_parts` empties the slot and it consumes the handle.
            None => unreachable!("borrowed entry already released"),
        }
    }

    /// Key of the sub-pool this object belongs to
    pub fn key(&self) -> &K {
        self.origin.key()
    }

    /// Identifier of the object, unique within its sub-pool
    pub fn id(&self) -> u64 {
        self.entry().id
    }

    /// Time since the object was created
    pub fn age(&self) -> Duration {
        self.entry().created_at.elapsed()
    }

    pub(crate) fn origin(&self) -> &Arc<KeyedSubPool<K, V>> {
        &self.origin
    }

    pub(crate) fn into_parts(mut self) -> (PooledEntry<V>, Arc<KeyedSubPool<K, V>>) {
        match self.entry.take() {
            Some(entry) => (entry, Arc::clone(&self.origin)),
            None => unreachable!("borrowed entry already released"),
        }
    }
}

impl<K: PoolKey, V: Send + 'static> Deref for Borrowed<K, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.entry().value
    }
}

impl<K: PoolKey, V: Send + 'static> DerefMut for Borrowed<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.entry {
            Some(ref mut entry) => &mut entry.value,
            None => unreachable!("borrowed entry already released"),
        }
    }
}

impl<K: PoolKey, V: Send + 'static> Drop for Borrowed<K, V> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            debug!(key = %self.origin.name(), id = entry.id, "borrowed object dropped without return");
            self.origin.release_unreturned(entry);
        }
    }
}

impl<K: PoolKey, V: Send + 'static> fmt::Debug for Borrowed<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowed")
            .field("key", &self.origin.name())
            .field("id", &self.entry.as_ref().map(|entry| entry.id))
            .finish()
    }
}

/// A borrowed object that returns itself to its sub-pool when dropped
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, KeyedObjectPool, PoolConfiguration};
///
/// let pool = KeyedObjectPool::new(
///     "memcached",
///     FnFactory::new(|key: &&str| Ok(format!("conn to {key}"))),
///     PoolConfiguration::default(),
/// ).unwrap();
///
/// {
///     let conn = pool.get_object(&"10.0.0.1:11211").unwrap();
///     assert_eq!(conn.as_str(), "conn to 10.0.0.1:11211");
///     // Returned when `conn` goes out of scope
/// }
///
/// assert_eq!(pool.total_idle_count(), 1);
/// ```
pub struct PooledObject<K: PoolKey, V: Send + 'static> {
    inner: Option<Borrowed<K, V>>,
}

impl<K: PoolKey, V: Send + 'static> PooledObject<K, V> {
    pub(crate) fn new(borrowed: Borrowed<K, V>) -> Self {
        Self {
            inner: Some(borrowed),
        }
    }

    /// Destroy the object instead of returning it, e.g. after an I/O error
    pub fn discard(mut self) -> PoolResult<()> {
        match self.inner.take() {
            Some(borrowed) => Arc::clone(borrowed.origin()).remove_object(borrowed),
            None => Ok(()),
        }
    }

    /// Take the object out of the pool's accounting for good
    pub fn detach(mut self) -> PoolResult<V> {
        let borrowed = self.take();
        Arc::clone(borrowed.origin()).detach(borrowed)
    }

    /// Switch to manual return
    pub fn into_borrowed(mut self) -> Borrowed<K, V> {
        self.take()
    }

    fn take(&mut self) -> Borrowed<K, V> {
        match self.inner.take() {
            Some(borrowed) => borrowed,
            // Every consuming method takes `self`, so the slot is only empty during drop.
            None => unreachable!("pooled object already released"),
        }
    }

    fn borrowed(&self) -> &Borrowed<K, V> {
        match self.inner {
            Some(ref borrowed) => borrowed,
            None => unreachable!("pooled object already released"),
        }
    }
}

impl<K: PoolKey, V: Send + 'static> Deref for PooledObject<K, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        self.borrowed()
    }
}

impl<K: PoolKey, V: Send + 'static> DerefMut for PooledObject<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.inner {
            Some(ref mut borrowed) => borrowed,
            None => unreachable!("pooled object already released"),
        }
    }
}

impl<K: PoolKey, V: Send + 'static> Drop for PooledObject<K, V> {
    fn drop(&mut self) {
        if let Some(borrowed) = self.inner.take() {
            let origin = Arc::clone(borrowed.origin());
            if let Err(err) = origin.return_object(borrowed) {
                warn!(key = %origin.name(), error = %err, "failed to return pooled object");
            }
        }
    }
}

impl<K: PoolKey, V: Send + 'static> fmt::Debug for PooledObject<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject").field("inner", &self.inner).finish()
    }
}
