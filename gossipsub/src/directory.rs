use crate::{PeerId, Topic};
use rand::{seq::IteratorRandom, Rng};
use std::collections::{BTreeMap, HashSet};

/// Known peers for a single topic, in the order they were learned.
#[derive(Default)]
struct Peers {
    order: Vec<PeerId>,
    members: HashSet<PeerId>,
}

/// Registry of every peer known per topic.
///
/// The directory only grows: a peer, once learned for a topic, stays known. It supplies candidates
/// for mesh construction, fanout, and gossip.
#[derive(Default)]
pub struct Directory {
    topics: BTreeMap<Topic, Peers>,
}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn `peer` for `topic`.
    ///
    /// Returns `true` if the peer was not already known for the topic.
    pub fn add(&mut self, topic: &str, peer: PeerId) -> bool {
        let peers = self.topics.entry(topic.to_string()).or_default();
        if !peers.members.insert(peer) {
            return false;
        }
        peers.order.push(peer);
        true
    }

    /// All peers known for `topic` (empty if the topic was never referenced).
    pub fn peers(&self, topic: &str) -> &[PeerId] {
        self.topics
            .get(topic)
            .map_or(&[][..], |peers| peers.order.as_slice())
    }

    /// Returns `true` if `peer` is known for `topic`.
    pub fn contains(&self, topic: &str, peer: &PeerId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|peers| peers.members.contains(peer))
    }

    /// Iterate over all topics with at least one known peer.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    /// Select up to `n` distinct peers known for `topic` for which `exclude` returns `false`.
    ///
    /// Candidates are sampled uniformly at random. Fewer than `n` peers are returned when the
    /// directory does not hold enough eligible candidates.
    pub fn select<R, F>(&self, topic: &str, n: usize, rng: &mut R, exclude: F) -> Vec<PeerId>
    where
        R: Rng,
        F: Fn(&PeerId) -> bool,
    {
        if n == 0 {
            return Vec::new();
        }
        let Some(peers) = self.topics.get(topic) else {
            return Vec::new();
        };
        peers
            .order
            .iter()
            .filter(|peer| !exclude(*peer))
            .copied()
            .choose_multiple(rng, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_add_idempotent() {
        let mut directory = Directory::new();
        assert!(directory.add("Row1", PeerId::from(1)));
        assert!(directory.add("Row1", PeerId::from(2)));
        assert!(!directory.add("Row1", PeerId::from(1)));
        assert_eq!(directory.peers("Row1"), &[PeerId::from(1), PeerId::from(2)]);
        assert!(directory.contains("Row1", &PeerId::from(2)));
        assert!(!directory.contains("Row2", &PeerId::from(2)));
    }

    #[test]
    fn test_unknown_topic_is_empty() {
        let directory = Directory::new();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(directory.peers("missing").is_empty());
        assert!(directory.select("missing", 4, &mut rng, |_| false).is_empty());
        assert_eq!(directory.topics().count(), 0);
    }

    #[test]
    fn test_select_respects_exclusion_and_bound() {
        let mut directory = Directory::new();
        for i in 0..10u64 {
            directory.add("blockChannel", PeerId::from(i));
        }
        let excluded: HashSet<_> = (0..5u64).map(PeerId::from).collect();
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            let selected = directory.select("blockChannel", 3, &mut rng, |p| excluded.contains(p));
            assert_eq!(selected.len(), 3);
            let unique: HashSet<_> = selected.iter().collect();
            assert_eq!(unique.len(), 3);
            assert!(selected.iter().all(|p| !excluded.contains(p)));
        }
    }

    #[test]
    fn test_select_underrun() {
        let mut directory = Directory::new();
        for i in 0..4u64 {
            directory.add("t", PeerId::from(i));
        }
        let mut rng = StdRng::seed_from_u64(1);
        let selected = directory.select("t", 10, &mut rng, |p| *p == PeerId::from(0));
        assert_eq!(selected.len(), 3);
        assert!(!selected.contains(&PeerId::from(0)));

        assert!(directory.select("t", 0, &mut rng, |_| false).is_empty());
    }
}
