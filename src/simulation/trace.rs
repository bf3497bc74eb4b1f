//! Chronological record of what happened during a simulation

use std::fmt;

use crate::{block::BlockId, event::SimTime, node::PeerId, transaction::TxnId};

/// What a [`TraceEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraceKind {
    TransactionGenerated,
    TransactionReceived,
    BlockMined,
    BlockReceived,
    /// A freshly mined block was kept private.
    BlockWithheld,
    /// A previously withheld block was broadcast.
    BlockReleased,
    /// A withheld block was abandoned without being broadcast.
    BlockDiscarded,
    /// The mining target moved to a block not descending from the old one.
    ForkSwitch,
    InvalidBlock,
    OrphanDiscarded,
    /// A mining event fired after its peer moved to another target.
    StaleMiningDropped,
    SimulationEnd,
}

/// A single observable event of a simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceEntry {
    pub time: SimTime,
    /// `None` for events of the whole simulation.
    pub peer: Option<PeerId>,
    pub kind: TraceKind,
    pub block: Option<BlockId>,
    pub txn: Option<TxnId>,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} {:?}", self.time, self.kind)?;
        if let Some(peer) = self.peer {
            write!(f, " peer={}", peer)?;
        }
        if let Some(block) = self.block {
            write!(f, " block={}", block)?;
        }
        if let Some(txn) = self.txn {
            write!(f, " txn={}", txn)?;
        }

        Ok(())
    }
}

/// Append-only list of [`TraceEntry`]s in the order they happened. A disabled
/// trace records nothing.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    enabled: bool,
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, entries: vec![] }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, entry: TraceEntry) {
        if self.enabled {
            let last = self.entries.last();
            debug_assert!(
                last.map_or(true, |last| last.time <= entry.time),
                "trace entries out of order"
            );
            self.entries.push(entry);
        }
    }

    #[inline]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> + '_ {
        self.entries.iter()
    }

    /// Entries of the given kind, in order.
    pub fn of_kind(
        &self,
        kind: TraceKind,
    ) -> impl Iterator<Item = &TraceEntry> + '_ {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }

    /// Number of entries of the given kind.
    pub fn count(&self, kind: TraceKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Entries concerning `peer`, in order.
    pub fn of_peer(
        &self,
        peer: PeerId,
    ) -> impl Iterator<Item = &TraceEntry> + '_ {
        self.entries.iter().filter(move |entry| entry.peer == Some(peer))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time: SimTime, kind: TraceKind) -> TraceEntry {
        TraceEntry { time, peer: Some(PeerId(0)), kind, block: None, txn: None }
    }

    #[test]
    fn disabled_trace_records_nothing() {
        let mut trace = Trace::new(false);
        trace.record(entry(1.0, TraceKind::BlockMined));

        assert!(trace.is_empty());
    }

    #[test]
    fn counts_by_kind() {
        let mut trace = Trace::new(true);
        trace.record(entry(1.0, TraceKind::BlockMined));
        trace.record(entry(2.0, TraceKind::ForkSwitch));
        trace.record(entry(2.0, TraceKind::BlockMined));

        assert_eq!(trace.count(TraceKind::BlockMined), 2);
        assert_eq!(trace.of_peer(PeerId(0)).count(), 3);
        assert_eq!(
            trace.entries()[1].to_string(),
            "2.000000 ForkSwitch peer=P0"
        );
    }
}
