//! Arena of simulated nodes driven by a single scheduler.

use crate::{Error, Event, Link, Observer, Scheduler, Transport, Uplink};
use dasgossip_gossipsub::{self as gossipsub, Engine, Kind, Message, Payload, PeerId};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    time::{Duration, SystemTime},
};
use tracing::{debug, trace, warn};

/// Configuration for a simulated [Network].
#[derive(Clone, Debug)]
pub struct Config {
    /// Seed of every random choice made during the simulation.
    pub seed: u64,

    /// Protocol configuration shared by every node.
    pub protocol: gossipsub::Config,

    /// Latency of every link.
    pub link: Link,

    /// Scope of uplink contention.
    pub uplink: Uplink,

    /// Default uplink bandwidth of a node in bits per second (`0` for unlimited).
    pub bandwidth: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 0,
            protocol: gossipsub::Config::default(),
            link: Link::default(),
            uplink: Uplink::default(),
            bandwidth: 100_000_000,
        }
    }
}

struct Node<P: Payload> {
    engine: Engine<P, StdRng>,
    bandwidth: u64,
}

/// Simulated network of GossipSub nodes.
pub struct Network<P: Payload, O: Observer<P>> {
    protocol: gossipsub::Config,
    bandwidth: u64,

    rng: StdRng,
    scheduler: Scheduler<P>,
    transport: Transport,
    nodes: BTreeMap<PeerId, Node<P>>,

    observer: O,
    dropped: u64,
}

impl<P: Payload, O: Observer<P>> Network<P, O> {
    /// Create an empty network.
    pub fn new(cfg: Config, observer: O) -> Result<Self, Error> {
        cfg.protocol.validate()?;
        cfg.link.validate()?;
        Ok(Self {
            protocol: cfg.protocol,
            bandwidth: cfg.bandwidth,
            rng: StdRng::seed_from_u64(cfg.seed),
            scheduler: Scheduler::new(),
            transport: Transport::new(cfg.link, cfg.uplink),
            nodes: BTreeMap::new(),
            observer,
            dropped: 0,
        })
    }

    /// Current logical time.
    pub fn now(&self) -> SystemTime {
        self.scheduler.now()
    }

    /// Random source of the simulation (shared with workloads).
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Number of sends dropped because their destination was unknown.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Registered nodes, in ascending order.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.nodes.keys().copied()
    }

    /// Engine of `peer`, if registered.
    pub fn engine(&self, peer: &PeerId) -> Option<&Engine<P, StdRng>> {
        self.nodes.get(peer).map(|node| &node.engine)
    }

    /// Register `peer` with the default bandwidth.
    pub fn register(&mut self, peer: PeerId) -> Result<(), Error> {
        self.register_with_bandwidth(peer, self.bandwidth)
    }

    /// Register `peer` with an uplink of `bandwidth` bits per second.
    ///
    /// The first heartbeat of the node fires one interval after registration.
    pub fn register_with_bandwidth(&mut self, peer: PeerId, bandwidth: u64) -> Result<(), Error> {
        let Entry::Vacant(entry) = self.nodes.entry(peer) else {
            return Err(Error::DuplicatePeer(peer));
        };
        let rng = StdRng::seed_from_u64(self.rng.gen());
        let engine = Engine::new(rng, peer, self.protocol.clone())?;
        entry.insert(Node { engine, bandwidth });
        self.scheduler
            .schedule(self.protocol.heartbeat_interval, peer, Event::Heartbeat);
        debug!(?peer, bandwidth, "registered node");
        Ok(())
    }

    /// Teach `node` that `peer` participates in `topic`.
    pub fn add_peer(&mut self, node: &PeerId, topic: &str, peer: PeerId) -> Result<(), Error> {
        let Some(entry) = self.nodes.get_mut(node) else {
            return Err(Error::UnknownPeer(*node));
        };
        entry.engine.add_peer(topic, peer);
        Ok(())
    }

    /// Schedule `node` to join `topic` after `delay`.
    pub fn join(&mut self, delay: Duration, node: PeerId, topic: &str) -> Result<(), Error> {
        self.local(delay, node, topic, Kind::Join)
    }

    /// Schedule `node` to leave `topic` after `delay`.
    pub fn leave(&mut self, delay: Duration, node: PeerId, topic: &str) -> Result<(), Error> {
        self.local(delay, node, topic, Kind::Leave)
    }

    /// Schedule `node` to publish `payload` on `topic` after `delay`.
    pub fn publish(
        &mut self,
        delay: Duration,
        node: PeerId,
        topic: &str,
        payload: P,
    ) -> Result<(), Error> {
        self.local(delay, node, topic, Kind::Publish(payload))
    }

    fn local(
        &mut self,
        delay: Duration,
        node: PeerId,
        topic: &str,
        kind: Kind<P>,
    ) -> Result<(), Error> {
        if !self.nodes.contains_key(&node) {
            return Err(Error::UnknownPeer(node));
        }
        let message = Message::local(node, topic, kind, self.now() + delay);
        self.scheduler.schedule(delay, node, Event::Deliver(message));
        Ok(())
    }

    /// Dispatch the next pending event.
    ///
    /// Returns `false` if no event was pending.
    pub fn step(&mut self) -> bool {
        let Some((target, event)) = self.scheduler.pop() else {
            return false;
        };
        let now = self.scheduler.now();
        let Some(node) = self.nodes.get_mut(&target) else {
            warn!(?target, "dropping event for unknown node");
            return true;
        };

        let mut outbox = Vec::new();
        match event {
            Event::Deliver(message) => {
                let fresh = message
                    .payload()
                    .is_some_and(|payload| !node.engine.store().seen(&message.topic, payload.id()));
                self.observer.delivered(now, target, &message, fresh);
                node.engine.handle(now, message, &mut outbox);
            }
            Event::Heartbeat => {
                node.engine.heartbeat(now, &mut outbox);
                self.scheduler
                    .schedule(self.protocol.heartbeat_interval, target, Event::Heartbeat);
            }
        }
        let bandwidth = node.bandwidth;
        self.route(now, bandwidth, outbox);
        true
    }

    /// Dispatch every event scheduled at or before `deadline`, then move the clock to it.
    pub fn run_until(&mut self, deadline: SystemTime) {
        while self.scheduler.peek().is_some_and(|time| time <= deadline) {
            self.step();
        }
        self.scheduler.advance(deadline);
    }

    fn route(&mut self, now: SystemTime, bandwidth: u64, outbox: Vec<Message<P>>) {
        for mut message in outbox {
            if !self.nodes.contains_key(&message.dst) {
                warn!(
                    src = ?message.src,
                    dst = ?message.dst,
                    kind = message.kind.label(),
                    reason = "unknown peer",
                    "dropping message"
                );
                self.dropped += 1;
                self.observer.dropped(now, &message);
                continue;
            }
            let delay = self
                .transport
                .delay(&mut self.rng, now, message.src, message.size(), bandwidth);
            message.hops += 1;
            trace!(
                src = ?message.src,
                dst = ?message.dst,
                kind = message.kind.label(),
                ?delay,
                "sending message"
            );
            let dst = message.dst;
            self.scheduler.schedule(delay, dst, Event::Deliver(message));
        }
    }
}
