//! Implementation of the HONEST (or FRONTIER) mining strategy.

use crate::{block::Block, blockchain::Ledger};

use super::{OnMine, OnReceive, PrivateChain};

/// Publishes all blocks as soon as possible at the tip of the longest chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Honest;

impl Honest {
    pub fn decide_on_mine(
        &self,
        _block: &Block,
        _ledger: &Ledger,
        _private: &PrivateChain,
    ) -> OnMine {
        OnMine::BroadcastNow
    }

    /// Switches to `block` iff it became the tip of the ledger.
    pub fn decide_on_receive(
        &self,
        block: &Block,
        ledger: &Ledger,
        _private: &PrivateChain,
    ) -> OnReceive {
        if ledger.tip() == block.id {
            OnReceive::AdoptPublic
        } else {
            OnReceive::KeepMiningPrivate
        }
    }
}
