use crate::metrics::{Delivered, HistogramExt, Metrics};
use dasgossip_gossipsub::{Kind, Message, MessageId, Payload, PeerId};
use prometheus_client::registry::Registry;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::{Duration, SystemTime},
};

/// Hook notified of every event delivered to a node.
pub trait Observer<P: Payload> {
    /// Called before `message` is handed to the engine of `node`.
    ///
    /// `fresh` is `true` if the message carries content `node` has not seen on its topic.
    fn delivered(&mut self, now: SystemTime, node: PeerId, message: &Message<P>, fresh: bool);

    /// Called when `message` could not be routed to its destination.
    fn dropped(&mut self, _now: SystemTime, _message: &Message<P>) {}
}

impl<P: Payload> Observer<P> for () {
    fn delivered(&mut self, _: SystemTime, _: PeerId, _: &Message<P>, _: bool) {}
}

/// Dissemination latency statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Number of messages published.
    pub published: usize,
    /// Number of messages first delivered to a node other than their publisher.
    pub deliveries: usize,
    pub mean: Duration,
    pub median: Duration,
    pub max: Duration,
}

/// Average of `count` durations summing to `total`.
fn mean(total: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(count) => total / count,
        Err(_) => total.div_f64(count as f64),
    }
}

/// [Observer] that records dissemination metrics.
pub struct Monitor {
    metrics: Metrics,

    published: HashMap<MessageId, SystemTime>,
    coverage: BTreeMap<PeerId, HashSet<MessageId>>,
    latencies: Vec<Duration>,
}

impl Monitor {
    /// Create a monitor with its metrics registered in `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        Self {
            metrics: Metrics::init(registry),
            published: HashMap::new(),
            coverage: BTreeMap::new(),
            latencies: Vec::new(),
        }
    }

    /// Number of distinct messages `node` has published or received (on any topic).
    pub fn coverage(&self, node: &PeerId) -> usize {
        self.coverage.get(node).map_or(0, HashSet::len)
    }

    /// Number of messages published.
    pub fn published(&self) -> usize {
        self.published.len()
    }

    /// Summarize the time from publish to first delivery across all nodes.
    pub fn summary(&self) -> Summary {
        let mut latencies = self.latencies.clone();
        latencies.sort();
        let deliveries = latencies.len();
        if deliveries == 0 {
            return Summary {
                published: self.published.len(),
                ..Default::default()
            };
        }
        let total: Duration = latencies.iter().sum();
        Summary {
            published: self.published.len(),
            deliveries,
            mean: mean(total, deliveries),
            median: latencies[deliveries / 2],
            max: latencies[deliveries - 1],
        }
    }
}

impl<P: Payload> Observer<P> for Monitor {
    fn delivered(&mut self, now: SystemTime, node: PeerId, message: &Message<P>, fresh: bool) {
        self.metrics
            .delivered
            .get_or_create(&Delivered::new(message.kind.label()))
            .inc();
        let Some(payload) = message.payload() else {
            return;
        };
        let id = payload.id();
        if let Kind::Publish(_) = message.kind {
            if fresh {
                self.published.entry(id).or_insert(now);
                self.coverage.entry(node).or_default().insert(id);
            }
            return;
        }

        self.metrics.bytes.inc_by(payload.size() as u64);
        if !fresh {
            self.metrics.duplicates.inc();
            return;
        }
        self.metrics.first.inc();

        // The same content may be disseminated on several topics
        if !self.coverage.entry(node).or_default().insert(id) {
            return;
        }
        if let Some(published) = self.published.get(&id) {
            self.metrics.latency.observe_between(*published, now);
            self.latencies
                .push(now.duration_since(*published).unwrap_or_default());
        }
    }

    fn dropped(&mut self, _: SystemTime, _: &Message<P>) {
        self.metrics.dropped.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Blob(MessageId);

    impl Payload for Blob {
        fn id(&self) -> MessageId {
            self.0
        }

        fn size(&self) -> usize {
            100
        }
    }

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn content(src: u64, dst: u64, id: MessageId) -> Message<Blob> {
        Message {
            kind: Kind::Message {
                publisher: PeerId::from(0),
                payload: Blob(id),
            },
            topic: "t".to_string(),
            src: PeerId::from(src),
            dst: PeerId::from(dst),
            hops: 1,
            timestamp: at(0),
        }
    }

    #[test]
    fn test_latency_summary() {
        let mut registry = Registry::default();
        let mut monitor = Monitor::new(&mut registry);
        let publisher = PeerId::from(0);
        let publish = Message::local(publisher, "t", Kind::Publish(Blob(1)), at(0));
        monitor.delivered(at(0), publisher, &publish, true);

        monitor.delivered(at(10), PeerId::from(1), &content(0, 1, 1), true);
        monitor.delivered(at(30), PeerId::from(2), &content(1, 2, 1), true);
        monitor.delivered(at(20), PeerId::from(3), &content(0, 3, 1), true);
        monitor.delivered(at(40), PeerId::from(2), &content(3, 2, 1), false);

        let summary = monitor.summary();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.deliveries, 3);
        assert_eq!(summary.mean, Duration::from_millis(20));
        assert_eq!(summary.median, Duration::from_millis(20));
        assert_eq!(summary.max, Duration::from_millis(30));

        assert_eq!(monitor.coverage(&publisher), 1);
        assert_eq!(monitor.coverage(&PeerId::from(2)), 1);
        assert_eq!(monitor.coverage(&PeerId::from(9)), 0);
    }

    #[test]
    fn test_mean_of_large_counts() {
        assert_eq!(mean(Duration::from_millis(60), 3), Duration::from_millis(20));
        let count = u32::MAX as usize + 1;
        let total = Duration::from_secs(count as u64);
        assert_eq!(mean(total, count), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_summary() {
        let mut registry = Registry::default();
        let monitor = Monitor::new(&mut registry);
        assert_eq!(monitor.summary(), Summary::default());
    }
}
