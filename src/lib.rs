//! # Keyed object pool
//!
//! Thread-safe resource lifecycle pool for expensive handles such as server
//! connections. Every key (commonly a server address) gets its own bounded
//! sub-pool of reusable objects, created on first use.
//!
//! ## Features
//!
//! - Per-key sub-pools with independent locks and limits
//! - Non-blocking admission: a full sub-pool fails fast with `Exhausted`
//! - Create, validate and destroy through a caller-supplied factory, never under a lock
//! - Borrow/return validation and disposable (never reused) pools
//! - LIFO or FIFO reuse of idle objects
//! - Background idle reaper driven by a keep-alive timeout
//! - RAII guards that return objects on drop
//! - Sub-pool lifecycle events, metrics, Prometheus export and health status
//!
//! ## Quick Start
//!
//! ```rust
//! use keyed_objectpool::{FnFactory, KeyedObjectPool, PoolConfiguration};
//!
//! let pool = KeyedObjectPool::new(
//!     "memcached",
//!     FnFactory::new(|server: &&str| Ok(format!("connection to {server}"))),
//!     PoolConfiguration::new().with_max_per_key(4),
//! ).unwrap();
//!
//! let conn = pool.borrow(&"10.0.0.1:11211").unwrap();
//! println!("Got: {}", *conn);
//! pool.return_object(&"10.0.0.1:11211", conn).unwrap();
//!
//! {
//!     let _conn = pool.get_object(&"10.0.0.1:11211").unwrap();
//!     // Object automatically returned when `_conn` goes out of scope
//! }
//! assert_eq!(pool.total_idle_count(), 1);
//! ```

mod config;
mod entry;
mod errors;
mod factory;
mod health;
mod metrics;
mod monitoring;
mod reaper;
mod registry;
mod sub_pool;

pub use config::{PoolConfiguration, QueueOrder};
pub use entry::{Borrowed, PooledObject};
pub use errors::{FactoryError, PoolError, PoolResult};
pub use factory::{FnFactory, ObjectLifecycleFactory};
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::{PoolMetrics, SubPoolStats};
pub use monitoring::{KeyedObjectMonitor, ObjectPoolMonitor, ObjectPoolStat, ObjectStat};
pub use reaper::IdleReaper;
pub use registry::{KeyedObjectPool, PoolEvent};
pub use sub_pool::{KeyedSubPool, PoolKey};
