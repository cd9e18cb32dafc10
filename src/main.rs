// Keyed object pool demo
// Borrows connections for a few fake memcached servers and lets the idle
// reaper clean up behind them.

use keyed_objectpool::{
    FactoryError, FnFactory, KeyedObjectPool, ObjectPoolMonitor, PoolConfiguration, PoolEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct FakeConnection {
    server: String,
    requests: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyed_objectpool=debug,info")),
        )
        .init();

    let factory = FnFactory::new(|server: &String| {
        if server.ends_with(":0") {
            return Err(FactoryError::new(format!("cannot connect to {server}")));
        }
        Ok(FakeConnection {
            server: server.clone(),
            requests: 0,
        })
    })
    .with_validator(|_, conn: &FakeConnection| conn.requests < 100);

    let config = PoolConfiguration::new()
        .with_max_per_key(2)
        .with_borrow_validation(true)
        .with_keep_alive_timeout(Duration::from_millis(300))
        .with_eviction_interval(Duration::from_millis(100));

    let pool = Arc::new(KeyedObjectPool::new("memcached", factory, config)?);
    let events = pool.subscribe();
    pool.start_idle_reaper()?;

    let servers = ["10.0.0.1:11211", "10.0.0.2:11211", "10.0.0.3:0"].map(String::from);
    for server in &servers {
        match pool.get_object(server) {
            Ok(mut conn) => {
                conn.requests += 1;
                info!(server = %conn.server, requests = conn.requests, "request served");
            }
            Err(err) => info!(server = %server, error = %err, retryable = err.is_retryable(), "borrow failed"),
        }
    }

    let monitor = ObjectPoolMonitor::new(Arc::clone(&pool));
    info!(keys = %monitor.keys(), stat = ?monitor.pool_stat(), "after first round");

    tokio::time::sleep(Duration::from_millis(600)).await;
    info!(stat = ?monitor.pool_stat(), metrics = ?pool.export_metrics(), "after idle sweep");

    pool.destroy();
    for event in events.try_iter() {
        if let PoolEvent::SubPoolCreated(key) | PoolEvent::SubPoolRemoved(key) = &event {
            info!(key = %key, ?event, "pool event");
        }
    }
    Ok(())
}
