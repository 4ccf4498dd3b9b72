//! Simulate the dissemination of data-availability samples over a GossipSub overlay.
//!
//! The [Network] replicates a [dasgossip_gossipsub::Engine] on every registered node and drives
//! them from a single discrete-event [Scheduler] under a logical clock (starting at
//! [std::time::UNIX_EPOCH]). Every message emitted by an engine is routed through the
//! [Transport], which draws a uniform link latency and adds serialization delay behind the
//! sender's uplink, and is then scheduled for delivery at its destination. Heartbeats are
//! scheduled per node on a fixed interval and interleave with deliveries purely by time.
//!
//! Given the same [Config] (including its seed) and the same sequence of calls, a simulation is
//! fully deterministic.
//!
//! [Workload]s populate the network (topic memberships and bootstrap directories) and publish
//! [Block]s of [Sample]s, while an [Observer] (such as the [Monitor]) is notified of every event
//! delivered to a node.
//!
//! # Status
//!
//! `dasgossip-simulator` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use dasgossip_gossipsub::PeerId;
use std::time::Duration;
use thiserror::Error;

mod metrics;
mod network;
pub use network::{Config, Network};
mod observer;
pub use observer::{Monitor, Observer, Summary};
mod scheduler;
pub use scheduler::{Event, Scheduler};
mod transport;
pub use transport::{serialization, Link, Transport, Uplink};
mod workload;
pub use workload::{
    column_topic, publication_delay, row_topic, Block, RowColumn, Sample, Sequencer, Workload,
    BLOCK_CHANNEL,
};

/// Errors that can occur when building or populating a simulation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid latency (max must be >= min): min={min:?} max={max:?}")]
    InvalidLatency { min: Duration, max: Duration },
    #[error("peer already registered: {0:?}")]
    DuplicatePeer(PeerId),
    #[error("unknown peer: {0:?}")]
    UnknownPeer(PeerId),
    #[error("invalid workload: {0}")]
    InvalidWorkload(&'static str),
    #[error("invalid protocol config: {0}")]
    Protocol(#[from] dasgossip_gossipsub::Error),
}
