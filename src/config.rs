//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

/// Order in which idle objects are handed out again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueueOrder {
    /// Most recently returned first. Keeps hot connections warm and lets
    /// cold ones age out through the keep-alive timeout.
    #[default]
    Lifo,

    /// Least recently returned first. Spreads use evenly over idle objects.
    Fifo,
}

/// Configuration applied to every sub-pool a registry creates
///
/// # Examples
///
/// ```
/// use keyed_objectpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_min_per_key(1)
///     .with_max_per_key(8)
///     .with_borrow_validation(true)
///     .with_keep_alive_timeout(Duration::from_secs(60));
///
/// assert_eq!(config.max_per_key, Some(8));
/// assert_eq!(config.keep_alive_timeout_secs(), 60);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Number of objects per key that eviction never goes below
    pub min_per_key: usize,

    /// Maximum number of objects (active + idle) per key, `None` for unbounded
    pub max_per_key: Option<usize>,

    /// Whether idle objects are validated before being handed out
    pub borrow_validation: bool,

    /// Whether objects are validated when they come back
    pub return_validation: bool,

    /// Whether objects are destroyed on return instead of being reused
    pub disposable: bool,

    /// How long an object may sit idle before the reaper destroys it
    pub keep_alive_timeout: Option<Duration>,

    /// How often the idle reaper sweeps the registry
    pub eviction_interval: Duration,

    /// Reuse order of idle objects
    pub queue_order: QueueOrder,

    /// Whether sweeps drop sub-pools that hold no objects at all
    pub prune_empty_sub_pools: bool,

    /// Whether new sub-pools are filled to `min_per_key` on creation
    pub prewarm: bool,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            min_per_key: 0,
            max_per_key: Some(100),
            borrow_validation: false,
            return_validation: false,
            disposable: false,
            keep_alive_timeout: Some(Duration::from_secs(30 * 60)),
            eviction_interval: Duration::from_secs(60),
            queue_order: QueueOrder::Lifo,
            prune_empty_sub_pools: false,
            prewarm: false,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of objects kept per key
    pub fn with_min_per_key(mut self, min: usize) -> Self {
        self.min_per_key = min;
        self
    }

    /// Set the maximum number of objects per key
    pub fn with_max_per_key(mut self, max: usize) -> Self {
        self.max_per_key = Some(max);
        self
    }

    /// Remove the per-key limit
    pub fn unbounded(mut self) -> Self {
        self.max_per_key = None;
        self
    }

    pub fn with_borrow_validation(mut self, enabled: bool) -> Self {
        self.borrow_validation = enabled;
        self
    }

    pub fn with_return_validation(mut self, enabled: bool) -> Self {
        self.return_validation = enabled;
        self
    }

    /// Never reuse objects: every borrow creates, every return destroys
    pub fn with_disposable(mut self, disposable: bool) -> Self {
        self.disposable = disposable;
        self
    }

    /// Set the keep-alive timeout for idle objects
    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(timeout);
        self
    }

    /// Keep idle objects forever
    pub fn without_keep_alive_timeout(mut self) -> Self {
        self.keep_alive_timeout = None;
        self
    }

    /// Set how often the idle reaper runs
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_queue_order(mut self, order: QueueOrder) -> Self {
        self.queue_order = order;
        self
    }

    pub fn with_prune_empty_sub_pools(mut self, prune: bool) -> Self {
        self.prune_empty_sub_pools = prune;
        self
    }

    /// Fill each new sub-pool up to `min_per_key` idle objects
    pub fn with_prewarm(mut self, prewarm: bool) -> Self {
        self.prewarm = prewarm;
        self
    }

    /// Keep-alive timeout in whole seconds, `-1` when eviction is disabled
    pub fn keep_alive_timeout_secs(&self) -> i64 {
        match self.keep_alive_timeout {
            Some(timeout) => i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
            None => -1,
        }
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> PoolResult<()> {
        if let Some(max) = self.max_per_key {
            if max == 0 {
                return Err(PoolError::InvalidConfiguration(
                    "max_per_key must be at least 1".to_string(),
                ));
            }
            if self.min_per_key > max {
                return Err(PoolError::InvalidConfiguration(format!(
                    "min_per_key ({}) exceeds max_per_key ({})",
                    self.min_per_key, max
                )));
            }
        }
        if self.eviction_interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "eviction_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
