//! Coin transfers between peers

use crate::{event::SimTime, node::PeerId};

/// Nominal size of a single transaction, in bits (1 KB).
pub const TXN_SIZE_BITS: f64 = 8_000.0;

/// Amount of coins held by or transferred between peers.
pub type Coins = i64;

/// Unique identifier assigned to each [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub(crate) u64);

impl TxnId {
    /// Returns the [`u64`] corresponding to this [`TxnId`].
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TxnId {
    fn from(value: u64) -> Self {
        TxnId(value)
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A transfer of `amount` coins from `payer` to `payee`. Never changes after
/// creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transaction {
    pub id: TxnId,
    pub payer: PeerId,
    pub payee: PeerId,
    pub amount: Coins,
    pub created_at: SimTime,
}

impl Transaction {
    /// Size of this transaction on the wire, in bits.
    #[inline]
    pub fn size_bits(&self) -> f64 {
        TXN_SIZE_BITS
    }
}
