//! Implementation of stubborn mining.
//!
//! A stubborn miner never settles a race by publishing early, and keeps mining
//! on its own branch while the public chain is at most `trail` blocks ahead of
//! it. When it is ahead it only publishes enough blocks to match the public
//! height, keeping the rest of its lead hidden.

use crate::{block::Block, blockchain::Ledger};

use super::{OnMine, OnReceive, PrivateChain};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stubborn {
    /// How many blocks the private branch may fall behind the public chain
    /// before it is abandoned.
    pub trail: u64,
}

impl Stubborn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trail(trail: u64) -> Self {
        Stubborn { trail }
    }

    /// Withholds `block`, unless it brings a trailing private branch level
    /// with the public chain. Then the whole branch is published to start a
    /// race.
    pub fn decide_on_mine(
        &self,
        _block: &Block,
        ledger: &Ledger,
        private: &PrivateChain,
    ) -> OnMine {
        if private.has_private_branch(ledger) && private.lead(ledger) == -1 {
            OnMine::BroadcastNow
        } else {
            OnMine::WithholdAndExtendPrivately
        }
    }

    pub fn decide_on_receive(
        &self,
        block: &Block,
        ledger: &Ledger,
        private: &PrivateChain,
    ) -> OnReceive {
        if private.public_tip() != block.id {
            return OnReceive::KeepMiningPrivate;
        }
        if !private.has_private_branch(ledger) {
            return OnReceive::AdoptPublic;
        }

        let lead = private.lead(ledger);
        if lead < 0 {
            if lead.unsigned_abs() > self.trail {
                OnReceive::AdoptPublic
            } else {
                OnReceive::KeepMiningPrivate
            }
        } else if private.withheld().len() == 0 {
            OnReceive::KeepMiningPrivate
        } else {
            let public_height = ledger[private.public_tip()].height();
            OnReceive::ReleasePrivateChain(public_height)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{block::BlockId, node::PeerId};

    fn setup() -> (Ledger, PrivateChain) {
        let genesis = Arc::new(Block::genesis(vec![0; 2]));
        (Ledger::new(genesis, 0), PrivateChain::new(BlockId::GENESIS))
    }

    fn add(
        ledger: &mut Ledger,
        id: u64,
        parent: BlockId,
        miner: usize,
    ) -> Arc<Block> {
        let parent = &ledger[parent].block;
        let block = Arc::new(
            Block::mine(BlockId(id), parent, PeerId(miner), 0.0, vec![], 0)
                .unwrap(),
        );
        ledger.insert(block.clone(), 0.0).unwrap();
        block
    }

    #[test]
    fn ahead_releases_only_to_public_height() {
        let (mut ledger, mut private) = setup();
        let a1 = add(&mut ledger, 1, BlockId::GENESIS, 1);
        private.record_mined(a1, true, &ledger);
        let a2 = add(&mut ledger, 2, BlockId(1), 1);
        private.record_mined(a2, true, &ledger);

        let h1 = add(&mut ledger, 3, BlockId::GENESIS, 0);
        private.observe_public(&h1, &ledger);

        let strategy = Stubborn::new();
        assert_eq!(
            strategy.decide_on_receive(&h1, &ledger, &private),
            OnReceive::ReleasePrivateChain(1)
        );
    }

    #[test]
    fn trails_within_threshold() {
        let (mut ledger, mut private) = setup();
        let a1 = add(&mut ledger, 1, BlockId::GENESIS, 1);
        private.record_mined(a1, false, &ledger);
        let h1 = add(&mut ledger, 2, BlockId::GENESIS, 0);
        private.observe_public(&h1, &ledger);
        let h2 = add(&mut ledger, 3, BlockId(2), 0);
        private.observe_public(&h2, &ledger);
        assert_eq!(private.lead(&ledger), -1);

        assert_eq!(
            Stubborn::with_trail(1).decide_on_receive(&h2, &ledger, &private),
            OnReceive::KeepMiningPrivate
        );
        assert_eq!(
            Stubborn::with_trail(0).decide_on_receive(&h2, &ledger, &private),
            OnReceive::AdoptPublic
        );

        let a2 = add(&mut ledger, 4, BlockId(1), 1);
        assert_eq!(
            Stubborn::with_trail(1).decide_on_mine(&a2, &ledger, &private),
            OnMine::BroadcastNow
        );
    }
}
