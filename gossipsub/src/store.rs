use crate::{MessageId, Payload, PeerId, Topic};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::trace;

/// Ids seen on a single topic, in the order they were first seen.
#[derive(Default)]
struct Ledger {
    order: Vec<MessageId>,
    members: HashSet<MessageId>,
}

/// A payload retained to answer `IWANT` requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cached<P> {
    /// Original author of the payload.
    pub publisher: PeerId,
    pub payload: P,
}

/// Per-topic seen ledger and a bounded payload cache.
///
/// The ledger is append-only and is the source of truth for deduplication and for the contents
/// of `IHAVE`. The cache retains at most `capacity` payloads and evicts the oldest insertion
/// first. Until the cache first evicts, every id in a ledger has its payload cached.
pub struct Store<P: Payload> {
    seen: BTreeMap<Topic, Ledger>,

    capacity: usize,
    items: HashMap<MessageId, Cached<P>>,
    /// Insertion order of `items` (oldest first).
    order: VecDeque<MessageId>,
}

impl<P: Payload> Store<P> {
    /// Create an empty store that caches at most `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: BTreeMap::new(),
            capacity,
            items: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` if `id` was already seen on `topic`.
    pub fn seen(&self, topic: &str, id: MessageId) -> bool {
        self.seen
            .get(topic)
            .is_some_and(|ledger| ledger.members.contains(&id))
    }

    /// Ids seen on `topic`, in the order they were first seen.
    pub fn ledger(&self, topic: &str) -> &[MessageId] {
        self.seen
            .get(topic)
            .map_or(&[][..], |ledger| ledger.order.as_slice())
    }

    /// Subset of `ids` not yet seen on `topic` (preserving order).
    pub fn missing(&self, topic: &str, ids: &[MessageId]) -> Vec<MessageId> {
        match self.seen.get(topic) {
            Some(ledger) => ids
                .iter()
                .filter(|id| !ledger.members.contains(*id))
                .copied()
                .collect(),
            None => ids.to_vec(),
        }
    }

    /// Record `payload` as seen on `topic`.
    ///
    /// The payload is cached before its id is appended to the ledger. Returns `false` (and
    /// leaves the store untouched) if the id was already seen on `topic`.
    pub fn record(&mut self, topic: &str, publisher: PeerId, payload: P) -> bool {
        let id = payload.id();
        if self.seen(topic, id) {
            return false;
        }
        self.cache(publisher, payload);
        let ledger = self.seen.entry(topic.to_string()).or_default();
        ledger.members.insert(id);
        ledger.order.push(id);
        true
    }

    /// Cached payload for `id`, if still retained.
    pub fn get(&self, id: MessageId) -> Option<&Cached<P>> {
        self.items.get(&id)
    }

    /// Number of cached payloads.
    pub fn cached(&self) -> usize {
        self.items.len()
    }

    /// Iterate over all topics with a ledger.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.seen.keys().map(String::as_str)
    }

    fn cache(&mut self, publisher: PeerId, payload: P) {
        // The same payload may be seen on multiple topics
        let id = payload.id();
        if self.items.contains_key(&id) {
            return;
        }
        self.items.insert(id, Cached { publisher, payload });
        self.order.push_back(id);

        while self.items.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.items.remove(&oldest);
            trace!(id = oldest, "evicted cached payload");
        }
    }
}
