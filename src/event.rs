/*!
Time-ordered event queue driving a simulation

Every change to the simulated network happens by popping an [`Event`] from the
[`Scheduler`] and dispatching it to the peer it targets. Events are ordered by
timestamp, and events with equal timestamps are popped in the order they were
scheduled, so a run is fully determined by its seed. The one exception is
[`EventKind::SimulationEnd`], which comes after every other event with the
same timestamp.

The scheduler never removes events early. Handlers decide at dispatch time
whether an event is still relevant (see
[`Peer::on_block_mined`](crate::node::Peer::on_block_mined)).
*/

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use crate::{block::Block, node::PeerId, transaction::Transaction};

/// Logical simulation time, in seconds.
pub type SimTime = f64;

/// What happens when an [`Event`] fires.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A transaction becomes known to the target peer.
    TransactionArrival(TxnArrival),
    /// The target peer finds a block extending `parent`, unless its mining
    /// target moved since this event was scheduled.
    BlockMined { parent: crate::block::BlockId },
    /// The target peer receives `block` from its neighbor `from`.
    BlockReceived { block: Arc<Block>, from: PeerId },
    /// The simulation horizon is reached.
    SimulationEnd,
}

impl EventKind {
    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::SimulationEnd)
    }
}

/// Origin of a [`EventKind::TransactionArrival`].
#[derive(Debug, Clone)]
pub enum TxnArrival {
    /// The target peer creates a new transaction of its own.
    Generated,
    /// A neighbor relays a transaction to the target peer.
    Relayed { txn: Transaction, from: PeerId },
}

/// An [`EventKind`] scheduled at some point in simulated time.
#[derive(Debug, Clone)]
pub struct Event {
    pub time: SimTime,
    /// Insertion sequence number, used to order simultaneous events.
    pub seq: u64,
    /// The peer whose behavior handles this event.
    pub peer: PeerId,
    pub kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed so that BinaryHeap pops the earliest event first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.kind.is_end().cmp(&self.kind.is_end()))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-priority queue of [`Event`]s with a monotonically non-decreasing clock.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Event>,
    now: SimTime,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the most recently popped event, or 0 before any event fires.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of pending events.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueues `kind` for `peer` at `time`.
    ///
    /// ## Panics
    /// Panics in debug builds if `time` lies before [`Scheduler::now`].
    pub fn schedule(&mut self, time: SimTime, peer: PeerId, kind: EventKind) {
        debug_assert!(
            time >= self.now,
            "event scheduled at {} before current time {}",
            time,
            self.now
        );

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Event { time, seq, peer, kind });
    }

    /// Removes and returns the earliest pending event, advancing the clock to
    /// its timestamp.
    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.queue.pop()?;
        self.now = self.now.max(event.time);

        Some(event)
    }

    /// Timestamp of the earliest pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|event| event.time)
    }

    /// Drops every pending event, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();

        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_time_order() {
        let mut scheduler = Scheduler::new();
        for (time, peer) in [(3.0, 0), (1.0, 1), (2.0, 2)] {
            scheduler.schedule(time, PeerId(peer), EventKind::SimulationEnd);
        }

        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop_next())
            .map(|e| e.peer)
            .collect();
        assert_eq!(order, vec![PeerId(1), PeerId(2), PeerId(0)]);
        assert_eq!(scheduler.now(), 3.0);
    }

    #[test]
    fn simultaneous_events_are_fifo() {
        let mut scheduler = Scheduler::new();
        for peer in 0..10 {
            scheduler.schedule(5.0, PeerId(peer), EventKind::SimulationEnd);
        }

        for peer in 0..10 {
            let event = scheduler.pop_next().unwrap();
            assert_eq!(event.peer, PeerId(peer));
            assert_eq!(event.seq, peer as u64);
        }
        assert!(scheduler.pop_next().is_none());
    }

    #[test]
    fn end_follows_simultaneous_events() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(5.0, PeerId(0), EventKind::SimulationEnd);
        scheduler.schedule(
            5.0,
            PeerId(1),
            EventKind::BlockMined { parent: crate::block::BlockId::GENESIS },
        );
        scheduler.schedule(
            4.0,
            PeerId(2),
            EventKind::TransactionArrival(TxnArrival::Generated),
        );

        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop_next())
            .map(|e| (e.peer, e.kind.is_end()))
            .collect();
        assert_eq!(
            order,
            vec![(PeerId(2), false), (PeerId(1), false), (PeerId(0), true)]
        );
    }

    #[test]
    fn clock_only_moves_on_pop() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(10.0, PeerId(0), EventKind::SimulationEnd);
        assert_eq!(scheduler.now(), 0.0);
        assert_eq!(scheduler.peek_time(), Some(10.0));

        scheduler.pop_next();
        assert_eq!(scheduler.now(), 10.0);
        assert_eq!(scheduler.clear(), 0);
    }
}
