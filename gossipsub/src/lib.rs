//! Disseminate data-availability samples over a GossipSub-style overlay.
//!
//! This crate contains the protocol core: a synchronous state machine that is replicated on
//! every node of the overlay. It owns no clock, no scheduler, and no transport. Every handler
//! is given the current (logical) time and a [Sender] to which it pushes outbound [Message]s,
//! which makes the engine usable from a discrete-event simulator, a test, or any other driver
//! that decides when and how messages actually arrive.
//!
//! # Overview
//!
//! Each node tracks, per topic:
//!
//! | State | Purpose |
//! |-------|---------|
//! | [Directory] | Every peer ever learned for the topic (never shrinks) |
//! | [Mesh] (mesh) | Peers to which full messages are eagerly relayed (`D_low <= len <= D_high` after a heartbeat) |
//! | [Mesh] (fanout) | Peers used to publish on a topic the node has not joined (expires) |
//! | [Store] (ledger) | Ids of every message seen on the topic, in arrival order |
//! | [Store] (cache) | Payloads by id, used to answer `IWANT` |
//!
//! Control messages (`GRAFT`/`PRUNE`) keep the mesh symmetric, content (`MESSAGE`) is flooded
//! through the mesh, and the periodic [Engine::heartbeat] rebalances mesh degree and advertises
//! seen ids (`IHAVE`) to non-mesh peers so they can pull what they missed (`IWANT`).
//!
//! # Status
//!
//! `dasgossip-gossipsub` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use rand::RngCore;
use std::fmt::{self, Debug, Display};
use thiserror::Error;

mod config;
pub use config::Config;
mod directory;
pub use directory::Directory;
mod engine;
pub use engine::Engine;
mod mesh;
pub use mesh::{Fanout, Mesh};
mod message;
pub use message::{Kind, Message};
mod store;
pub use store::{Cached, Store};

/// Identifier of a message (the id of the payload it carries).
pub type MessageId = u64;

/// Label partitioning the overlay into independent dissemination groups.
pub type Topic = String;

/// Errors that can occur when configuring the protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid degree (must satisfy 1 <= d_low <= d <= d_high): d_low={d_low} d={d} d_high={d_high}")]
    InvalidDegree { d_low: usize, d: usize, d_high: usize },
    #[error("heartbeat interval must be non-zero")]
    InvalidHeartbeat,
    #[error("message cache size must be non-zero")]
    InvalidCacheSize,
}

/// Opaque, totally-ordered 256-bit identifier of a node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; PeerId::LENGTH]);

impl PeerId {
    /// Length of an identifier in bytes.
    pub const LENGTH: usize = 32;

    /// Create an identifier from raw bytes.
    pub const fn new(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generate a uniformly random identifier.
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes of the identifier.
    pub const fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }
}

/// Encodes `value` big-endian in the low-order bytes, so ordering matches the integer.
impl From<u64> for PeerId {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[Self::LENGTH - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full identifiers make logs unreadable
        for byte in self.0[..4].iter() {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")?;
        for byte in self.0[Self::LENGTH - 4..].iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Content disseminated over the overlay.
///
/// The engine never inspects a payload beyond its id (used for deduplication and gossip) and
/// its size (used by delivery models to compute serialization delay).
pub trait Payload: Clone + Debug {
    /// Unique identifier of the payload.
    fn id(&self) -> MessageId;

    /// Size of the payload in bytes.
    fn size(&self) -> usize;
}

/// Interface used by the [Engine] to emit outbound messages.
///
/// Sending never blocks: implementations only record or schedule the message.
pub trait Sender<P> {
    /// Emit a message addressed to `message.dst`.
    fn send(&mut self, message: Message<P>);
}

impl<P> Sender<P> for Vec<Message<P>> {
    fn send(&mut self, message: Message<P>) {
        self.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_peer_id_ordering_matches_integer() {
        let ids: Vec<PeerId> = (0..100u64).map(PeerId::from).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(PeerId::from(u64::MAX) > PeerId::from(1u64 << 40));
    }

    #[test]
    fn test_peer_id_display() {
        let id = PeerId::from(0xabcdu64);
        let display = id.to_string();
        assert_eq!(display.len(), 64);
        assert!(display.ends_with("abcd"));
        assert_eq!(format!("{:?}", id), "00000000..0000abcd");
    }

    #[test]
    fn test_peer_id_random_unique() {
        let mut rng = StdRng::seed_from_u64(0);
        let a = PeerId::random(&mut rng);
        let b = PeerId::random(&mut rng);
        assert_ne!(a, b);

        // Same seed, same identifiers
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(PeerId::random(&mut rng), a);
    }
}
