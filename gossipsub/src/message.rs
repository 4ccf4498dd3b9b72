//! Envelope exchanged between (and injected into) engines.

use crate::{MessageId, Payload, PeerId, Topic};
use std::time::SystemTime;

/// Type of a [Message] and the data specific to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Kind<P> {
    /// Subscribe to the topic (local event).
    Join,
    /// Unsubscribe from the topic (local event).
    Leave,
    /// Originate a payload on the topic (local event).
    Publish(P),
    /// Sender added the recipient to its mesh.
    Graft,
    /// Sender removed the recipient from its mesh.
    Prune,
    /// Sender has seen the listed messages.
    IHave(Vec<MessageId>),
    /// Sender requests the listed messages.
    IWant(Vec<MessageId>),
    /// Content authored by `publisher`, relayed by the sender.
    Message { publisher: PeerId, payload: P },
}

impl<P> Kind<P> {
    /// Short label of the kind (used in logs and metrics).
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Publish(_) => "publish",
            Self::Graft => "graft",
            Self::Prune => "prune",
            Self::IHave(_) => "ihave",
            Self::IWant(_) => "iwant",
            Self::Message { .. } => "message",
        }
    }
}

/// Envelope of every event handled by an [crate::Engine].
///
/// Local events (`Join`, `Leave`, `Publish`) are addressed from a node to itself. Every other
/// kind travels between two distinct nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<P> {
    pub kind: Kind<P>,
    pub topic: Topic,

    /// Immediate sender (the relayer, not necessarily the author).
    pub src: PeerId,
    pub dst: PeerId,

    /// Number of times the envelope (or the copy it was made from) was sent.
    pub hops: u32,

    /// Time at which the envelope was emitted.
    pub timestamp: SystemTime,
}

impl<P> Message<P> {
    /// Create a local event for `node`.
    pub fn local(
        node: PeerId,
        topic: impl Into<Topic>,
        kind: Kind<P>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            kind,
            topic: topic.into(),
            src: node,
            dst: node,
            hops: 0,
            timestamp,
        }
    }

    /// Original author of the content, if the envelope carries content.
    pub fn publisher(&self) -> Option<PeerId> {
        match &self.kind {
            Kind::Message { publisher, .. } => Some(*publisher),
            Kind::Publish(_) => Some(self.src),
            _ => None,
        }
    }

    /// Payload carried by the envelope, if any.
    pub fn payload(&self) -> Option<&P> {
        match &self.kind {
            Kind::Publish(payload) | Kind::Message { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl<P: Payload> Message<P> {
    /// Size of the envelope on the wire.
    ///
    /// Only content is accounted for: control messages are considered free to serialize.
    pub fn size(&self) -> usize {
        self.payload().map_or(0, Payload::size)
    }
}
