use crate::{PeerId, Topic};
use rand::{seq::IteratorRandom, Rng};
use std::{
    collections::{BTreeMap, BTreeSet},
    time::SystemTime,
};

/// Transient relay set for a topic the node publishes on without having joined it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fanout {
    pub peers: BTreeSet<PeerId>,
    pub expires: SystemTime,
}

/// Per-topic mesh and fanout peer sets.
///
/// A node is subscribed to a topic iff it has a mesh entry for it (possibly empty). Mesh and
/// fanout entries for the same topic are mutually exclusive: a fanout entry can only be created
/// for a topic without a mesh, and joining a topic moves the fanout set into the mesh.
#[derive(Default)]
pub struct Mesh {
    mesh: BTreeMap<Topic, BTreeSet<PeerId>>,
    fanout: BTreeMap<Topic, Fanout>,
}

impl Mesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    // ---------- Mesh ----------

    /// Returns `true` if the node is subscribed to `topic`.
    pub fn subscribed(&self, topic: &str) -> bool {
        self.mesh.contains_key(topic)
    }

    /// Mesh peers of `topic`, if subscribed.
    pub fn peers(&self, topic: &str) -> Option<&BTreeSet<PeerId>> {
        self.mesh.get(topic)
    }

    /// Subscribed topics.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.mesh.keys().map(String::as_str)
    }

    /// Create the mesh entry for `topic`, taking ownership of `peers`.
    ///
    /// Any fanout entry for the topic is dropped.
    pub fn subscribe(&mut self, topic: &str, peers: BTreeSet<PeerId>) {
        self.fanout.remove(topic);
        self.mesh.insert(topic.to_string(), peers);
    }

    /// Remove the mesh entry for `topic`, returning its peers if it existed.
    pub fn unsubscribe(&mut self, topic: &str) -> Option<BTreeSet<PeerId>> {
        self.mesh.remove(topic)
    }

    /// Add `peer` to the mesh of `topic` if subscribed (regardless of current degree).
    ///
    /// Returns `true` if the peer was added.
    pub fn graft(&mut self, topic: &str, peer: PeerId) -> bool {
        self.mesh
            .get_mut(topic)
            .is_some_and(|peers| peers.insert(peer))
    }

    /// Remove `peer` from the mesh of `topic`.
    ///
    /// Returns `true` if the peer was a member.
    pub fn prune(&mut self, topic: &str, peer: &PeerId) -> bool {
        self.mesh
            .get_mut(topic)
            .is_some_and(|peers| peers.remove(peer))
    }

    /// Remove `excess` randomly chosen peers from the mesh of `topic`, returning them.
    pub fn trim<R: Rng>(&mut self, topic: &str, excess: usize, rng: &mut R) -> Vec<PeerId> {
        let Some(peers) = self.mesh.get_mut(topic) else {
            return Vec::new();
        };
        let removed = peers.iter().copied().choose_multiple(rng, excess);
        for peer in &removed {
            peers.remove(peer);
        }
        removed
    }

    // ---------- Fanout ----------

    /// Fanout entry of `topic`, if any.
    pub fn fanout(&self, topic: &str) -> Option<&Fanout> {
        self.fanout.get(topic)
    }

    /// Topics with a fanout entry.
    pub fn fanout_topics(&self) -> impl Iterator<Item = &str> {
        self.fanout.keys().map(String::as_str)
    }

    /// Move the fanout set of `topic` out of the fanout table.
    pub fn promote(&mut self, topic: &str) -> Option<BTreeSet<PeerId>> {
        self.fanout.remove(topic).map(|fanout| fanout.peers)
    }

    /// Add `peers` to the fanout of `topic` and push its expiry to `expires`.
    ///
    /// Creates the entry if missing. No-op if subscribed to `topic`.
    pub fn refresh(
        &mut self,
        topic: &str,
        peers: impl IntoIterator<Item = PeerId>,
        expires: SystemTime,
    ) {
        if self.subscribed(topic) {
            return;
        }
        let fanout = self
            .fanout
            .entry(topic.to_string())
            .or_insert_with(|| Fanout {
                peers: BTreeSet::new(),
                expires,
            });
        fanout.peers.extend(peers);
        fanout.expires = fanout.expires.max(expires);
    }

    /// Add `peers` to an existing fanout entry without touching its expiry.
    pub fn extend_fanout(&mut self, topic: &str, peers: impl IntoIterator<Item = PeerId>) {
        if let Some(fanout) = self.fanout.get_mut(topic) {
            fanout.peers.extend(peers);
        }
    }

    /// Drop every fanout entry whose expiry is not after `now`, returning their topics.
    pub fn expire(&mut self, now: SystemTime) -> Vec<Topic> {
        let expired: Vec<Topic> = self
            .fanout
            .iter()
            .filter(|(_, fanout)| fanout.expires <= now)
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in &expired {
            self.fanout.remove(topic);
        }
        expired
    }

    // ---------- Both ----------

    /// Returns `true` if `peer` is in the mesh or the fanout of `topic`.
    pub fn contains(&self, topic: &str, peer: &PeerId) -> bool {
        self.mesh.get(topic).is_some_and(|peers| peers.contains(peer))
            || self
                .fanout
                .get(topic)
                .is_some_and(|fanout| fanout.peers.contains(peer))
    }
}
