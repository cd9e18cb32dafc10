//! Background sweeper destroying objects idle past the keep-alive timeout

use crate::errors::{PoolError, PoolResult};
use crate::registry::KeyedObjectPool;
use crate::sub_pool::PoolKey;

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// Handle to a running idle reaper task.
///
/// The task holds only a weak reference to its registry and stops on its
/// own once the registry is dropped or destroyed. Dropping the handle stops
/// it as well.
#[derive(Debug)]
pub struct IdleReaper {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
    interval: Duration,
}

impl IdleReaper {
    /// Spawn the sweep loop on the current Tokio runtime
    pub(crate) fn spawn<K: PoolKey, V: Send + 'static>(
        pool: Weak<KeyedObjectPool<K, V>>,
        interval: Duration,
    ) -> PoolResult<Self> {
        let runtime = Handle::try_current().map_err(|_| PoolError::RuntimeUnavailable)?;
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {}
                }

                let Some(registry) = pool.upgrade() else { break };
                if registry.is_destroyed() {
                    break;
                }
                let name = registry.name().to_string();

                // Factory destroy calls may block, keep them off the async workers.
                match tokio::task::spawn_blocking(move || registry.evict_idle()).await {
                    Ok(0) => trace!(pool = %name, "idle sweep found nothing to evict"),
                    Ok(evicted) => debug!(pool = %name, evicted, "idle sweep finished"),
                    Err(err) => warn!(pool = %name, error = %err, "idle sweep panicked"),
                }
            }
            debug!("idle reaper stopped");
        });

        Ok(Self {
            shutdown,
            handle,
            interval,
        })
    }

    /// Ask the task to stop after its current sweep
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PoolConfiguration;
    use crate::errors::PoolError;
    use crate::factory::FnFactory;
    use crate::registry::KeyedObjectPool;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_pool(
        config: PoolConfiguration,
    ) -> (Arc<KeyedObjectPool<&'static str, u32>>, Arc<AtomicUsize>) {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let factory = FnFactory::new(|_: &&'static str| Ok(1)).with_destroyer(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let pool = Arc::new(KeyedObjectPool::new("reaper-test", factory, config).unwrap());
        (pool, destroyed)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reaper_evicts_expired_objects() {
        let config = PoolConfiguration::new()
            .with_max_per_key(5)
            .with_keep_alive_timeout(Duration::from_millis(100))
            .with_eviction_interval(Duration::from_millis(50));
        let (pool, destroyed) = counting_pool(config);
        pool.start_idle_reaper().unwrap();

        let held: Vec<_> = (0..3).map(|_| pool.borrow(&"cache-a").unwrap()).collect();
        for obj in held {
            pool.return_object(&"cache-a", obj).unwrap();
        }
        assert_eq!(pool.total_idle_count(), 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pool.total_idle_count(), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reaper_stops_on_destroy() {
        let config = PoolConfiguration::new().with_eviction_interval(Duration::from_millis(20));
        let (pool, _) = counting_pool(config);
        pool.start_idle_reaper().unwrap();
        assert!(pool.is_reaper_running());

        pool.destroy();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pool.is_reaper_running());
    }

    #[test]
    fn test_reaper_needs_runtime() {
        let (pool, _) = counting_pool(PoolConfiguration::default());
        assert!(matches!(
            pool.start_idle_reaper(),
            Err(PoolError::RuntimeUnavailable)
        ));
    }
}
