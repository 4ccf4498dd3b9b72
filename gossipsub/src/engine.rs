use crate::{
    Config, Directory, Error, Kind, Mesh, Message, MessageId, Payload, PeerId, Sender, Store, Topic,
};
use rand::{seq::SliceRandom, Rng};
use std::{
    collections::{BTreeSet, HashSet},
    time::SystemTime,
};
use tracing::{debug, trace, warn};

/// Emit a single message from `me`.
fn send<P, S: Sender<P>>(
    sender: &mut S,
    now: SystemTime,
    me: PeerId,
    dst: PeerId,
    topic: &str,
    kind: Kind<P>,
    hops: u32,
) {
    debug_assert_ne!(me, dst, "attempted to send to self");
    trace!(?dst, topic, kind = kind.label(), "sending");
    sender.send(Message {
        kind,
        topic: topic.to_string(),
        src: me,
        dst,
        hops,
        timestamp: now,
    });
}

/// GossipSub state machine of a single node.
///
/// The engine is driven by two entry points: [Engine::handle] for every event addressed to the
/// node (local `JOIN`/`LEAVE`/`PUBLISH` or a message from a peer) and [Engine::heartbeat] on a
/// fixed interval. Both receive the current time and push any resulting outbound messages into
/// the provided [Sender].
pub struct Engine<P: Payload, R: Rng> {
    rng: R,
    me: PeerId,
    cfg: Config,

    directory: Directory,
    mesh: Mesh,
    store: Store<P>,
}

impl<P: Payload, R: Rng> Engine<P, R> {
    /// Create a new engine for node `me`.
    ///
    /// `rng` drives peer selection (mesh construction, pruning, and gossip targets).
    pub fn new(rng: R, me: PeerId, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        let store = Store::new(cfg.cache_size);
        Ok(Self {
            rng,
            me,
            cfg,
            directory: Directory::new(),
            mesh: Mesh::new(),
            store,
        })
    }

    /// Identifier of the node running the engine.
    pub fn me(&self) -> PeerId {
        self.me
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn store(&self) -> &Store<P> {
        &self.store
    }

    /// Learn `peer` for `topic` (used to seed bootstrap membership).
    pub fn add_peer(&mut self, topic: &str, peer: PeerId) {
        if self.directory.add(topic, peer) {
            trace!(?peer, topic, "learned peer");
        }
    }

    /// Handle an event addressed to this node.
    pub fn handle<S: Sender<P>>(&mut self, now: SystemTime, message: Message<P>, sender: &mut S) {
        if message.dst != self.me {
            warn!(dst = ?message.dst, "dropping message addressed to another node");
            return;
        }
        let Message {
            kind,
            topic,
            src,
            hops,
            ..
        } = message;
        match kind {
            Kind::Join | Kind::Leave | Kind::Publish(_) if src != self.me => {
                warn!(?src, %topic, kind = kind.label(), "dropping remote local event");
            }
            Kind::Graft
            | Kind::Prune
            | Kind::IHave(_)
            | Kind::IWant(_)
            | Kind::Message { .. }
                if src == self.me =>
            {
                warn!(%topic, kind = kind.label(), "dropping self-sourced message");
            }
            Kind::Join => self.join(now, &topic, sender),
            Kind::Leave => self.leave(now, &topic, sender),
            Kind::Publish(payload) => self.publish(now, &topic, payload, sender),
            Kind::Graft => self.graft(&topic, src),
            Kind::Prune => self.prune(&topic, src),
            Kind::IHave(ids) => self.ihave(now, &topic, src, &ids, sender),
            Kind::IWant(ids) => self.iwant(now, &topic, src, &ids, sender),
            Kind::Message { publisher, payload } => {
                self.relay(now, &topic, src, publisher, payload, hops, sender)
            }
        }
    }

    fn join<S: Sender<P>>(&mut self, now: SystemTime, topic: &str, sender: &mut S) {
        if self.mesh.subscribed(topic) {
            trace!(topic, "already joined");
            return;
        }

        // Inherit the fanout set (if any) and top up to the target degree
        let me = self.me;
        let mut peers = self.mesh.promote(topic).unwrap_or_default();
        if peers.len() < self.cfg.d {
            let needed = self.cfg.d - peers.len();
            let selected = self
                .directory
                .select(topic, needed, &mut self.rng, |p| *p == me || peers.contains(p));
            peers.extend(selected);
        }

        for peer in &peers {
            send(sender, now, me, *peer, topic, Kind::Graft, 0);
        }
        debug!(topic, peers = peers.len(), "joined");
        self.mesh.subscribe(topic, peers);
    }

    fn leave<S: Sender<P>>(&mut self, now: SystemTime, topic: &str, sender: &mut S) {
        let Some(peers) = self.mesh.unsubscribe(topic) else {
            trace!(topic, "not joined");
            return;
        };
        for peer in &peers {
            send(sender, now, self.me, *peer, topic, Kind::Prune, 0);
        }
        debug!(topic, peers = peers.len(), "left");
    }

    fn graft(&mut self, topic: &str, src: PeerId) {
        self.add_peer(topic, src);
        if self.mesh.graft(topic, src) {
            debug!(?src, topic, "grafted peer");
        }
    }

    fn prune(&mut self, topic: &str, src: PeerId) {
        if self.mesh.prune(topic, &src) {
            debug!(?src, topic, "pruned peer");
        } else {
            debug!(?src, topic, "ignoring prune from non-mesh peer");
        }
    }

    fn ihave<S: Sender<P>>(
        &mut self,
        now: SystemTime,
        topic: &str,
        src: PeerId,
        ids: &[MessageId],
        sender: &mut S,
    ) {
        let missing = self.store.missing(topic, ids);
        if missing.is_empty() {
            return;
        }
        trace!(?src, topic, missing = missing.len(), "requesting missing messages");
        send(sender, now, self.me, src, topic, Kind::IWant(missing), 0);
    }

    fn iwant<S: Sender<P>>(
        &mut self,
        now: SystemTime,
        topic: &str,
        src: PeerId,
        ids: &[MessageId],
        sender: &mut S,
    ) {
        for id in ids {
            let Some(cached) = self.store.get(*id) else {
                trace!(?src, topic, id, "requested message not cached");
                continue;
            };
            let kind = Kind::Message {
                publisher: cached.publisher,
                payload: cached.payload.clone(),
            };
            send(sender, now, self.me, src, topic, kind, 0);
        }
    }

    fn publish<S: Sender<P>>(&mut self, now: SystemTime, topic: &str, payload: P, sender: &mut S) {
        let me = self.me;
        let id = payload.id();
        if !self.store.record(topic, me, payload.clone()) {
            debug!(topic, id, "ignoring publish of seen message");
            return;
        }

        // Publishing on a topic that was never joined goes through fanout
        let peers: Vec<PeerId> = match self.mesh.peers(topic) {
            Some(peers) => peers.iter().copied().collect(),
            None => {
                let current: BTreeSet<PeerId> = self
                    .mesh
                    .fanout(topic)
                    .map(|fanout| fanout.peers.clone())
                    .unwrap_or_default();
                let selected = if current.len() < self.cfg.d {
                    self.directory.select(
                        topic,
                        self.cfg.d - current.len(),
                        &mut self.rng,
                        |p| *p == me || current.contains(p),
                    )
                } else {
                    Vec::new()
                };
                self.mesh
                    .refresh(topic, selected, now + self.cfg.fanout_ttl);
                self.mesh
                    .fanout(topic)
                    .map(|fanout| fanout.peers.iter().copied().collect())
                    .unwrap_or_default()
            }
        };

        debug!(topic, id, peers = peers.len(), "published");
        for peer in peers {
            let kind = Kind::Message {
                publisher: me,
                payload: payload.clone(),
            };
            send(sender, now, me, peer, topic, kind, 0);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn relay<S: Sender<P>>(
        &mut self,
        now: SystemTime,
        topic: &str,
        src: PeerId,
        publisher: PeerId,
        payload: P,
        hops: u32,
        sender: &mut S,
    ) {
        let me = self.me;
        let id = payload.id();
        if publisher == me || src == me {
            trace!(?src, topic, id, "ignoring own message");
            return;
        }
        if !self.store.record(topic, publisher, payload.clone()) {
            trace!(?src, topic, id, "ignoring duplicate message");
            return;
        }
        debug!(?src, ?publisher, topic, id, hops, "received message");

        let Some(peers) = self.mesh.peers(topic) else {
            return;
        };
        for peer in peers {
            if *peer == src || *peer == me || *peer == publisher {
                continue;
            }
            let kind = Kind::Message {
                publisher,
                payload: payload.clone(),
            };
            send(sender, now, me, *peer, topic, kind, hops);
        }
    }

    /// Rebalance mesh degree, maintain fanout, and gossip seen ids to non-mesh peers.
    pub fn heartbeat<S: Sender<P>>(&mut self, now: SystemTime, sender: &mut S) {
        let me = self.me;

        // Keep every mesh within [d_low, d_high]
        let topics: Vec<Topic> = self.mesh.topics().map(str::to_string).collect();
        for topic in &topics {
            let Some(current) = self.mesh.peers(topic) else {
                continue;
            };
            let size = current.len();
            if size < self.cfg.d_low {
                let selected = self.directory.select(
                    topic,
                    self.cfg.d - size,
                    &mut self.rng,
                    |p| *p == me || current.contains(p),
                );
                for peer in selected {
                    self.mesh.graft(topic, peer);
                    send(sender, now, me, peer, topic, Kind::Graft, 0);
                }
            } else if size > self.cfg.d_high {
                let excess = size - self.cfg.d_high;
                for peer in self.mesh.trim(topic, excess, &mut self.rng) {
                    send(sender, now, me, peer, topic, Kind::Prune, 0);
                }
            }
        }

        // Expire stale fanout and top up the rest (fanout membership is never advertised)
        for topic in self.mesh.expire(now) {
            debug!(%topic, "fanout expired");
        }
        let fanout: Vec<Topic> = self.mesh.fanout_topics().map(str::to_string).collect();
        for topic in &fanout {
            let Some(current) = self.mesh.fanout(topic) else {
                continue;
            };
            if current.peers.len() >= self.cfg.d {
                continue;
            }
            let selected = self.directory.select(
                topic,
                self.cfg.d - current.peers.len(),
                &mut self.rng,
                |p| *p == me || current.peers.contains(p),
            );
            self.mesh.extend_fanout(topic, selected);
        }

        // Advertise everything seen to up to d peers outside the mesh and fanout
        let gossip: BTreeSet<Topic> = topics.into_iter().chain(fanout).collect();
        for topic in &gossip {
            let ledger = self.store.ledger(topic);
            if ledger.is_empty() {
                continue;
            }
            let mut candidates = self.directory.peers(topic).to_vec();
            candidates.shuffle(&mut self.rng);
            let mut gossiped = HashSet::new();
            for peer in candidates {
                if gossiped.len() >= self.cfg.d {
                    break;
                }
                if peer == me || self.mesh.contains(topic, &peer) {
                    continue;
                }
                send(sender, now, me, peer, topic, Kind::IHave(ledger.to_vec()), 0);
                gossiped.insert(peer);
            }
            trace!(%topic, peers = gossiped.len(), ids = ledger.len(), "gossiped");
        }
    }
}
