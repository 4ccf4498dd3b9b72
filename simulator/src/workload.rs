//! Generators deciding who joins which topic and what gets published.

use crate::{Error, Network, Observer};
use dasgossip_gossipsub::{MessageId, Payload, PeerId, Topic};
use rand::Rng;
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};
use tracing::debug;

/// Topic carrying whole blocks in the [Sequencer] workload.
pub const BLOCK_CHANNEL: &str = "blockChannel";

/// Window over which [Sequencer] nodes join [BLOCK_CHANNEL].
const JOIN_WINDOW: Duration = Duration::from_millis(200);

/// Topic of the 1-based `row` of a block.
pub fn row_topic(row: usize) -> Topic {
    format!("Row{row}")
}

/// Topic of the 1-based `column` of a block.
pub fn column_topic(column: usize) -> Topic {
    format!("Column{column}")
}

/// Delay before block `index` (0-based) is published when one block is published per `interval`.
///
/// The first block is published one interval after the start of the simulation.
pub fn publication_delay(interval: Duration, index: u64) -> Result<Duration, Error> {
    index
        .checked_add(1)
        .and_then(|n| u32::try_from(n).ok())
        .and_then(|n| interval.checked_mul(n))
        .ok_or(Error::InvalidWorkload("publication schedule overflows"))
}

/// Cell of a [Block].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub id: MessageId,
    /// Id of the block the sample belongs to.
    pub block: u64,
    /// 1-based row.
    pub row: usize,
    /// 1-based column.
    pub column: usize,
    pub size: usize,
    /// Publisher of the block.
    pub publisher: PeerId,
}

impl Payload for Sample {
    fn id(&self) -> MessageId {
        self.id
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// Square grid of [Sample]s.
#[derive(Clone, Debug)]
pub struct Block {
    id: u64,
    dim: usize,
    publisher: PeerId,
    samples: Vec<Sample>,
}

impl Block {
    /// Create block `id` with `dim × dim` samples of `sample_size` bytes each.
    ///
    /// Sample ids are unique across blocks of the same dimension.
    pub fn new(id: u64, dim: usize, sample_size: usize, publisher: PeerId) -> Self {
        let cells = (dim * dim) as u64;
        let mut samples = Vec::with_capacity(dim * dim);
        for row in 1..=dim {
            for column in 1..=dim {
                let index = ((row - 1) * dim + (column - 1)) as u64;
                samples.push(Sample {
                    id: id * cells + index,
                    block: id,
                    row,
                    column,
                    size: sample_size,
                    publisher,
                });
            }
        }
        Self {
            id,
            dim,
            publisher,
            samples,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn publisher(&self) -> PeerId {
        self.publisher
    }

    /// Samples in row-major order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Sample at the 1-based (`row`, `column`).
    pub fn sample(&self, row: usize, column: usize) -> Option<&Sample> {
        if row == 0 || column == 0 || row > self.dim || column > self.dim {
            return None;
        }
        self.samples.get((row - 1) * self.dim + (column - 1))
    }
}

/// Populates a [Network] and publishes [Block]s on it.
pub trait Workload {
    /// Node that publishes every block.
    fn publisher(&self) -> PeerId;

    /// Seed bootstrap directories and schedule topic joins.
    fn setup<O: Observer<Sample>>(
        &mut self,
        network: &mut Network<Sample, O>,
    ) -> Result<(), Error>;

    /// Schedule the publication of `block` after `delay`.
    fn publish<O: Observer<Sample>>(
        &mut self,
        network: &mut Network<Sample, O>,
        delay: Duration,
        block: &Block,
    ) -> Result<(), Error>;
}

/// Make every registered node aware of every member of each topic.
fn seed<O: Observer<Sample>>(
    network: &mut Network<Sample, O>,
    memberships: &BTreeMap<Topic, BTreeSet<PeerId>>,
) -> Result<(), Error> {
    let nodes: Vec<PeerId> = network.peers().collect();
    for (topic, members) in memberships {
        for node in &nodes {
            for member in members {
                network.add_peer(node, topic, *member)?;
            }
        }
    }
    Ok(())
}

/// Samples are published on one topic per row and one topic per column.
///
/// The builder joins every row and column. Every other node joins `copies` random rows and
/// `copies` random columns (possibly the same one more than once).
pub struct RowColumn {
    builder: PeerId,
    dim: usize,
    copies: usize,
}

impl RowColumn {
    pub fn new(builder: PeerId, dim: usize, copies: usize) -> Result<Self, Error> {
        if dim == 0 {
            return Err(Error::InvalidWorkload("block dimension must be non-zero"));
        }
        if copies == 0 {
            return Err(Error::InvalidWorkload("rows and columns per node must be non-zero"));
        }
        Ok(Self {
            builder,
            dim,
            copies,
        })
    }
}

impl Workload for RowColumn {
    fn publisher(&self) -> PeerId {
        self.builder
    }

    fn setup<O: Observer<Sample>>(
        &mut self,
        network: &mut Network<Sample, O>,
    ) -> Result<(), Error> {
        let nodes: Vec<PeerId> = network.peers().collect();
        if !nodes.contains(&self.builder) {
            return Err(Error::UnknownPeer(self.builder));
        }

        let mut memberships: BTreeMap<Topic, BTreeSet<PeerId>> = BTreeMap::new();
        for node in nodes {
            let mut topics = BTreeSet::new();
            if node == self.builder {
                for i in 1..=self.dim {
                    topics.insert(row_topic(i));
                    topics.insert(column_topic(i));
                }
            } else {
                for _ in 0..self.copies {
                    let row = network.rng().gen_range(1..=self.dim);
                    topics.insert(row_topic(row));
                    let column = network.rng().gen_range(1..=self.dim);
                    topics.insert(column_topic(column));
                }
            }
            for topic in topics {
                network.join(Duration::ZERO, node, &topic)?;
                memberships.entry(topic).or_default().insert(node);
            }
        }
        seed(network, &memberships)?;
        debug!(topics = memberships.len(), "row/column workload ready");
        Ok(())
    }

    fn publish<O: Observer<Sample>>(
        &mut self,
        network: &mut Network<Sample, O>,
        delay: Duration,
        block: &Block,
    ) -> Result<(), Error> {
        if block.dim() != self.dim {
            return Err(Error::InvalidWorkload("block dimension mismatch"));
        }
        for sample in block.samples() {
            network.publish(delay, self.builder, &row_topic(sample.row), sample.clone())?;
            network.publish(delay, self.builder, &column_topic(sample.column), sample.clone())?;
        }
        Ok(())
    }
}

/// Whole blocks are published by a single sequencer on [BLOCK_CHANNEL].
///
/// Every node knows every other node and joins after a random delay in `[0, 200)` ms.
pub struct Sequencer {
    sequencer: PeerId,
}

impl Sequencer {
    pub fn new(sequencer: PeerId) -> Self {
        Self { sequencer }
    }
}

impl Workload for Sequencer {
    fn publisher(&self) -> PeerId {
        self.sequencer
    }

    fn setup<O: Observer<Sample>>(
        &mut self,
        network: &mut Network<Sample, O>,
    ) -> Result<(), Error> {
        let nodes: BTreeSet<PeerId> = network.peers().collect();
        if !nodes.contains(&self.sequencer) {
            return Err(Error::UnknownPeer(self.sequencer));
        }
        for node in &nodes {
            let delay = network.rng().gen_range(Duration::ZERO..JOIN_WINDOW);
            network.join(delay, *node, BLOCK_CHANNEL)?;
        }
        let memberships = BTreeMap::from([(BLOCK_CHANNEL.to_string(), nodes)]);
        seed(network, &memberships)?;
        debug!(nodes = memberships[BLOCK_CHANNEL].len(), "sequencer workload ready");
        Ok(())
    }

    fn publish<O: Observer<Sample>>(
        &mut self,
        network: &mut Network<Sample, O>,
        delay: Duration,
        block: &Block,
    ) -> Result<(), Error> {
        if block.dim() == 0 {
            return Err(Error::InvalidWorkload("block dimension must be non-zero"));
        }
        for sample in block.samples() {
            network.publish(delay, self.sequencer, BLOCK_CHANNEL, sample.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Link, Monitor};
    use prometheus_client::registry::Registry;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn network<O: Observer<Sample>>(n: u64, observer: O) -> Network<Sample, O> {
        let cfg = Config {
            seed: 42,
            link: Link::new(Duration::from_millis(10), Duration::from_millis(50)).unwrap(),
            ..Default::default()
        };
        let mut network = Network::new(cfg, observer).unwrap();
        for i in 0..n {
            network.register(PeerId::from(i)).unwrap();
        }
        network
    }

    #[test]
    fn test_block_layout() {
        let publisher = PeerId::from(1);
        let block = Block::new(2, 3, 512, publisher);
        assert_eq!(block.samples().len(), 9);
        assert_eq!(block.id(), 2);
        assert_eq!(block.publisher(), publisher);

        let sample = block.sample(2, 3).unwrap();
        assert_eq!((sample.row, sample.column), (2, 3));
        assert_eq!(sample.block, 2);
        assert_eq!(sample.size(), 512);
        assert!(block.sample(0, 1).is_none());
        assert!(block.sample(4, 1).is_none());

        // Ids never collide across blocks
        let next = Block::new(3, 3, 512, publisher);
        let ids: BTreeSet<_> = block
            .samples()
            .iter()
            .chain(next.samples())
            .map(Payload::id)
            .collect();
        assert_eq!(ids.len(), 18);
    }

    #[test]
    fn test_topics() {
        assert_eq!(row_topic(1), "Row1");
        assert_eq!(column_topic(12), "Column12");
    }

    #[test]
    fn test_invalid_row_column() {
        assert!(matches!(
            RowColumn::new(PeerId::from(0), 0, 2),
            Err(Error::InvalidWorkload(_))
        ));
        assert!(matches!(
            RowColumn::new(PeerId::from(0), 4, 0),
            Err(Error::InvalidWorkload(_))
        ));

        let mut network = network(2, ());
        let mut workload = RowColumn::new(PeerId::from(7), 4, 2).unwrap();
        assert!(matches!(
            workload.setup(&mut network),
            Err(Error::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_sequencer_rejects_empty_block() {
        let mut network = network(2, ());
        let mut workload = Sequencer::new(PeerId::from(0));
        workload.setup(&mut network).unwrap();
        let block = Block::new(0, 0, 512, PeerId::from(0));
        assert!(block.samples().is_empty());
        assert!(matches!(
            workload.publish(&mut network, Duration::ZERO, &block),
            Err(Error::InvalidWorkload(_))
        ));
    }

    #[test]
    fn test_publication_delay() {
        let interval = Duration::from_secs(12);
        assert_eq!(publication_delay(interval, 0).unwrap(), interval);
        assert_eq!(publication_delay(interval, 4).unwrap(), interval * 5);
        assert!(matches!(
            publication_delay(interval, u64::from(u32::MAX)),
            Err(Error::InvalidWorkload(_))
        ));
        assert!(matches!(
            publication_delay(interval, u64::MAX),
            Err(Error::InvalidWorkload(_))
        ));
        assert!(matches!(
            publication_delay(Duration::MAX, 1),
            Err(Error::InvalidWorkload(_))
        ));
    }

    #[test]
    fn test_sequencer_converges() {
        let mut registry = Registry::default();
        let mut network = network(10, Monitor::new(&mut registry));
        let sequencer = PeerId::from(0);
        let mut workload = Sequencer::new(sequencer);
        workload.setup(&mut network).unwrap();

        let block = Block::new(0, 4, 256, workload.publisher());
        workload
            .publish(&mut network, Duration::from_millis(500), &block)
            .unwrap();
        network.run_until(at(10_000));

        for node in network.peers().collect::<Vec<_>>() {
            let engine = network.engine(&node).unwrap();
            assert!(engine.mesh().subscribed(BLOCK_CHANNEL));
            assert_eq!(engine.store().ledger(BLOCK_CHANNEL).len(), 16);
            assert_eq!(network.observer().coverage(&node), 16);
        }
        let summary = network.observer().summary();
        assert_eq!(summary.published, 16);
        assert_eq!(summary.deliveries, 16 * 9);
        assert!(summary.max >= Duration::from_millis(10));
        assert_eq!(network.dropped(), 0);
    }

    #[test]
    fn test_row_column_reaches_members() {
        let mut network = network(20, ());
        let builder = PeerId::from(0);
        let mut workload = RowColumn::new(builder, 4, 2).unwrap();
        workload.setup(&mut network).unwrap();

        let block = Block::new(0, 4, 128, builder);
        workload
            .publish(&mut network, Duration::from_millis(500), &block)
            .unwrap();
        network.run_until(at(10_000));

        // The builder joined everything
        let engine = network.engine(&builder).unwrap();
        for i in 1..=4 {
            assert!(engine.mesh().subscribed(&row_topic(i)));
            assert!(engine.mesh().subscribed(&column_topic(i)));
        }

        // Every member of a row holds every sample of that row
        for node in network.peers().collect::<Vec<_>>() {
            let engine = network.engine(&node).unwrap();
            let mut joined = 0;
            for i in 1..=4 {
                for topic in [row_topic(i), column_topic(i)] {
                    if !engine.mesh().subscribed(&topic) {
                        continue;
                    }
                    joined += 1;
                    let mut ledger = engine.store().ledger(&topic).to_vec();
                    ledger.sort();
                    let expected: Vec<_> = block
                        .samples()
                        .iter()
                        .filter(|s| topic == row_topic(s.row) || topic == column_topic(s.column))
                        .map(|s| s.id)
                        .collect();
                    assert_eq!(ledger, expected, "{topic} incomplete at {node:?}");
                }
            }
            assert!(joined >= 2);
        }

        // Mesh never includes the node itself
        for node in network.peers().collect::<Vec<_>>() {
            let engine = network.engine(&node).unwrap();
            for topic in engine.mesh().topics() {
                assert!(!engine.mesh().peers(topic).unwrap().contains(&node));
            }
        }
    }
}
