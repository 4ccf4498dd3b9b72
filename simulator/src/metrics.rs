use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use std::time::SystemTime;

/// Holds constants for bucket sizes for histograms.
///
/// The bucket sizes are in seconds.
pub struct Buckets;

impl Buckets {
    /// For dissemination over a network (possibly over multiple hops, rounds, or retries).
    pub const NETWORK: [f64; 13] = [
        0.010, 0.020, 0.050, 0.100, 0.200, 0.500, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 300.0,
    ];
}

/// Extension trait for histograms.
pub trait HistogramExt {
    /// Observe the duration between two points in time, in seconds.
    ///
    /// If `end` is before `start`, the duration is 0.
    fn observe_between(&self, start: SystemTime, end: SystemTime);
}

impl HistogramExt for Histogram {
    fn observe_between(&self, start: SystemTime, end: SystemTime) {
        let duration = end
            .duration_since(start)
            .map_or(0.0, |duration| duration.as_secs_f64());
        self.observe(duration);
    }
}

/// Label for delivered message metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Delivered {
    /// Kind of the delivered message
    pub kind: String,
}

impl Delivered {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
        }
    }
}

/// Metrics for the [crate::Monitor].
pub struct Metrics {
    /// Number of messages delivered to nodes by kind
    pub delivered: Family<Delivered, Counter>,
    /// Number of content bytes delivered to nodes
    pub bytes: Counter,
    /// Number of content deliveries of an already-seen message
    pub duplicates: Counter,
    /// Number of content deliveries of a message a node had not seen before
    pub first: Counter,
    /// Number of sends dropped because their destination could not be resolved
    pub dropped: Counter,
    /// Histogram of time from publish to first delivery at each node
    pub latency: Histogram,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let delivered = Family::<Delivered, Counter>::default();
        registry.register(
            "delivered",
            "Number of messages delivered to nodes by kind",
            delivered.clone(),
        );
        let bytes = Counter::default();
        registry.register(
            "delivered_bytes",
            "Number of content bytes delivered to nodes",
            bytes.clone(),
        );
        let duplicates = Counter::default();
        registry.register(
            "duplicates",
            "Number of content deliveries of an already-seen message",
            duplicates.clone(),
        );
        let first = Counter::default();
        registry.register(
            "first_deliveries",
            "Number of content deliveries of a message a node had not seen before",
            first.clone(),
        );
        let dropped = Counter::default();
        registry.register(
            "dropped",
            "Number of sends dropped because their destination could not be resolved",
            dropped.clone(),
        );
        let latency = Histogram::new(Buckets::NETWORK.into_iter());
        registry.register(
            "latency",
            "Histogram of time from publish to first delivery at each node",
            latency.clone(),
        );
        Self {
            delivered,
            bytes,
            duplicates,
            first,
            dropped,
            latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_observe_between_clamps_backwards() {
        let mut registry = Registry::default();
        let metrics = Metrics::init(&mut registry);
        let start = UNIX_EPOCH + Duration::from_secs(10);
        metrics.latency.observe_between(start, start + Duration::from_millis(15));
        metrics.latency.observe_between(start, UNIX_EPOCH);

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("latency_count 2"));
        assert!(buffer.contains("latency_sum 0.015"));
    }

    #[test]
    fn test_delivered_by_kind() {
        let mut registry = Registry::default();
        let metrics = Metrics::init(&mut registry);
        metrics.delivered.get_or_create(&Delivered::new("graft")).inc();
        metrics.delivered.get_or_create(&Delivered::new("graft")).inc();
        metrics.delivered.get_or_create(&Delivered::new("ihave")).inc();

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("delivered_total{kind=\"graft\"} 2"));
        assert!(buffer.contains("delivered_total{kind=\"ihave\"} 1"));
    }
}
