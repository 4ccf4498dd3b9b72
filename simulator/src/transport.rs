//! Delivery model: link latency plus serialization delay on the sender's uplink.

use crate::Error;
use dasgossip_gossipsub::PeerId;
use rand::Rng;
use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

/// Framing overhead applied to every serialized byte.
const OVERHEAD: f64 = 1.03;

/// Latency of a link, drawn uniformly from `[min, max]` for every send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub min: Duration,
    pub max: Duration,
}

impl Link {
    /// Create a link with latency in `[min, max]`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, Error> {
        let link = Self { min, max };
        link.validate()?;
        Ok(link)
    }

    /// Create a link with a fixed latency.
    pub fn constant(latency: Duration) -> Self {
        Self {
            min: latency,
            max: latency,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max < self.min {
            return Err(Error::InvalidLatency {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Draw a latency.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for Link {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(10),
            max: Duration::from_millis(100),
        }
    }
}

/// Scope of uplink contention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Uplink {
    /// Every node has its own uplink.
    #[default]
    PerNode,
    /// A single uplink shared by every node in the network.
    Shared,
}

/// Time needed to push `size` bytes through a `bandwidth` bits/s uplink.
///
/// Zero if either `size` or `bandwidth` is zero.
pub fn serialization(size: usize, bandwidth: u64) -> Duration {
    if size == 0 || bandwidth == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(size as f64 * 8.0 * OVERHEAD / bandwidth as f64)
}

/// Converts sends into delivery delays.
///
/// Each uplink tracks the time until which it is busy: a send starting before then queues behind
/// it, and a send with content extends it by its serialization delay.
pub struct Transport {
    link: Link,
    uplink: Uplink,

    busy: BTreeMap<PeerId, SystemTime>,
    shared: Option<SystemTime>,
}

impl Transport {
    pub fn new(link: Link, uplink: Uplink) -> Self {
        Self {
            link,
            uplink,
            busy: BTreeMap::new(),
            shared: None,
        }
    }

    /// Time until which the uplink used by `src` is busy, if it was ever used.
    pub fn busy_until(&self, src: &PeerId) -> Option<SystemTime> {
        match self.uplink {
            Uplink::PerNode => self.busy.get(src).copied(),
            Uplink::Shared => self.shared,
        }
    }

    /// Delay spent on the uplink of `src` (queueing plus serialization) for a send at `now`.
    ///
    /// Nodes without bandwidth (`0`) have an unlimited uplink.
    pub fn contention(
        &mut self,
        now: SystemTime,
        src: PeerId,
        size: usize,
        bandwidth: u64,
    ) -> Duration {
        if bandwidth == 0 {
            return Duration::ZERO;
        }
        let busy = match self.uplink {
            Uplink::PerNode => self.busy.entry(src).or_insert(now),
            Uplink::Shared => self.shared.get_or_insert(now),
        };
        let start = (*busy).max(now);
        *busy = start + serialization(size, bandwidth);
        busy.duration_since(now).unwrap_or_default()
    }

    /// Total delay (latency plus uplink contention) of a send at `now`.
    pub fn delay<R: Rng>(
        &mut self,
        rng: &mut R,
        now: SystemTime,
        src: PeerId,
        size: usize,
        bandwidth: u64,
    ) -> Duration {
        let latency = self.link.sample(rng);
        latency + self.contention(now, src, size, bandwidth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::UNIX_EPOCH;

    const MBPS: u64 = 1_000_000;

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    #[test]
    fn test_link_validation() {
        let ms = Duration::from_millis;
        assert!(Link::new(ms(10), ms(10)).is_ok());
        assert!(matches!(
            Link::new(ms(11), ms(10)),
            Err(Error::InvalidLatency { .. })
        ));
    }

    #[test]
    fn test_latency_within_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        let link = Link::new(Duration::from_millis(10), Duration::from_millis(20)).unwrap();
        for _ in 0..1_000 {
            let latency = link.sample(&mut rng);
            assert!(latency >= link.min && latency <= link.max);
        }
        let constant = Link::constant(Duration::from_millis(7));
        assert_eq!(constant.sample(&mut rng), Duration::from_millis(7));
    }

    #[test]
    fn test_serialization() {
        // 1000 bytes over 1 Mbps = 8ms, plus overhead
        let delay = serialization(1_000, MBPS);
        assert!((delay.as_secs_f64() - 0.00824).abs() < 1e-9);
        assert_eq!(serialization(0, MBPS), Duration::ZERO);
        assert_eq!(serialization(1_000, 0), Duration::ZERO);
    }

    #[test]
    fn test_idle_uplink_adds_serialization_only() {
        let mut rng = StdRng::seed_from_u64(0);
        let link = Link::new(Duration::from_millis(10), Duration::from_millis(20)).unwrap();
        let mut transport = Transport::new(link.clone(), Uplink::PerNode);
        let src = PeerId::from(1);
        let delay = transport.delay(&mut rng, at(0), src, 1_000, MBPS);
        let serialized = serialization(1_000, MBPS);
        assert!(delay >= link.min + serialized);
        assert!(delay <= link.max + serialized);
        assert_eq!(transport.busy_until(&src), Some(at(0) + serialized));
    }

    #[test]
    fn test_busy_uplink_queues() {
        let mut transport = Transport::new(Link::constant(Duration::ZERO), Uplink::PerNode);
        let src = PeerId::from(1);
        let serialized = serialization(125_000, MBPS);

        // Back-to-back sends queue behind each other
        let first = transport.contention(at(0), src, 125_000, MBPS);
        let second = transport.contention(at(0), src, 125_000, MBPS);
        assert_eq!(first, serialized);
        assert_eq!(second, serialized * 2);

        // Control messages wait for the link but do not extend it
        let control = transport.contention(at(10), src, 0, MBPS);
        assert_eq!(control, (at(0) + serialized * 2).duration_since(at(10)).unwrap());
        assert_eq!(transport.busy_until(&src), Some(at(0) + serialized * 2));

        // Once idle, only the send's own serialization applies
        let later = at(10_000);
        assert_eq!(transport.contention(later, src, 125_000, MBPS), serialized);
    }

    #[test]
    fn test_uplink_scope() {
        let size = 125_000;
        let serialized = serialization(size, MBPS);

        let mut per_node = Transport::new(Link::constant(Duration::ZERO), Uplink::PerNode);
        per_node.contention(at(0), PeerId::from(1), size, MBPS);
        let other = per_node.contention(at(0), PeerId::from(2), size, MBPS);
        assert_eq!(other, serialized);

        let mut shared = Transport::new(Link::constant(Duration::ZERO), Uplink::Shared);
        shared.contention(at(0), PeerId::from(1), size, MBPS);
        let other = shared.contention(at(0), PeerId::from(2), size, MBPS);
        assert_eq!(other, serialized * 2);
        assert_eq!(shared.busy_until(&PeerId::from(3)), Some(at(0) + serialized * 2));
    }

    #[test]
    fn test_unlimited_bandwidth() {
        let mut transport =
            Transport::new(Link::constant(Duration::from_millis(5)), Uplink::PerNode);
        let mut rng = StdRng::seed_from_u64(0);
        let src = PeerId::from(1);
        let delay = transport.delay(&mut rng, at(0), src, 1_000_000, 0);
        assert_eq!(delay, Duration::from_millis(5));
        assert_eq!(transport.busy_until(&src), None);
    }
}
