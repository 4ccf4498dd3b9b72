use dasgossip_gossipsub::{Message, PeerId};
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Event dispatched to a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<P> {
    /// Hand a message to the node's engine.
    Deliver(Message<P>),
    /// Run the node's periodic maintenance.
    Heartbeat,
}

struct Entry<P> {
    time: SystemTime,
    sequence: u64,
    target: PeerId,
    event: Event<P>,
}

impl<P> PartialEq for Entry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl<P> Eq for Entry<P> {}

impl<P> PartialOrd for Entry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for Entry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse the ordering for min-heap (ties resolved in insertion order)
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Time-ordered queue of pending events under a logical clock.
///
/// Events are dispatched in non-decreasing time order and, for equal times, in the order they
/// were scheduled.
pub struct Scheduler<P> {
    now: SystemTime,
    sequence: u64,
    queue: BinaryHeap<Entry<P>>,
}

impl<P> Default for Scheduler<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Scheduler<P> {
    /// Create an empty scheduler with the clock at [UNIX_EPOCH].
    pub fn new() -> Self {
        Self {
            now: UNIX_EPOCH,
            sequence: 0,
            queue: BinaryHeap::new(),
        }
    }

    /// Current logical time.
    pub fn now(&self) -> SystemTime {
        self.now
    }

    /// Schedule `event` for `target`, `delay` after the current time.
    pub fn schedule(&mut self, delay: Duration, target: PeerId, event: Event<P>) {
        let sequence = self.sequence;
        self.sequence += 1;
        self.queue.push(Entry {
            time: self.now + delay,
            sequence,
            target,
            event,
        });
    }

    /// Time of the next pending event, if any.
    pub fn peek(&self) -> Option<SystemTime> {
        self.queue.peek().map(|entry| entry.time)
    }

    /// Remove the next pending event and advance the clock to its time.
    pub fn pop(&mut self) -> Option<(PeerId, Event<P>)> {
        let entry = self.queue.pop()?;
        self.now = entry.time;
        Some((entry.target, entry.event))
    }

    /// Advance the clock to `time` (never backwards).
    pub fn advance(&mut self, time: SystemTime) {
        self.now = self.now.max(time);
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
