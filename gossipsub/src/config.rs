use crate::Error;
use std::time::Duration;

/// Configuration for the [`Engine`](super::Engine).
///
/// Supplied once at startup and immutable thereafter.
#[derive(Clone, Debug)]
pub struct Config {
    /// Target mesh degree.
    pub d: usize,

    /// Mesh degree below which a heartbeat grafts new peers (up to `d`).
    pub d_low: usize,

    /// Mesh degree above which a heartbeat prunes peers (down to `d_high`).
    pub d_high: usize,

    /// Interval between heartbeats (identical for every node).
    pub heartbeat_interval: Duration,

    /// Time a fanout entry survives after the last publish on its topic.
    pub fanout_ttl: Duration,

    /// Maximum number of payloads retained to answer `IWANT` requests.
    pub cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            d: 4,
            d_low: 2,
            d_high: 6,
            heartbeat_interval: Duration::from_millis(1_000),
            fanout_ttl: Duration::from_millis(36_000),
            cache_size: 10_000,
        }
    }
}

impl Config {
    /// Ensure the configuration is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.d_low == 0 || self.d_low > self.d || self.d > self.d_high {
            return Err(Error::InvalidDegree {
                d_low: self.d_low,
                d: self.d,
                d_high: self.d_high,
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::InvalidHeartbeat);
        }
        if self.cache_size == 0 {
            return Err(Error::InvalidCacheSize);
        }
        Ok(())
    }
}
