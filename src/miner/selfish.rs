//! Implementation of selfish mining.
//!
//! The selfish miner withholds the blocks it finds and publishes just enough
//! of them to override the honest chain whenever the honest peers catch up.

use crate::{block::Block, blockchain::Ledger};

use super::{OnMine, OnReceive, PrivateChain};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Selfish;

impl Selfish {
    /// Withholds `block`, unless the miner is racing a public branch of equal
    /// height, in which case `block` settles the race.
    pub fn decide_on_mine(
        &self,
        _block: &Block,
        ledger: &Ledger,
        private: &PrivateChain,
    ) -> OnMine {
        if private.in_race(ledger) {
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

        let public_height = ledger[private.public_tip()].height();
        match private.lead(ledger) {
            lead if lead < 0 => OnReceive::AdoptPublic,
            // Tie: publish everything and race
            0 if private.withheld().len() == 0 => OnReceive::KeepMiningPrivate,
            0 => OnReceive::ReleasePrivateChain(public_height),
            // One block ahead: publish everything and win outright
            1 => OnReceive::ReleasePrivateChain(public_height + 1),
            _ => OnReceive::ReleasePrivateChain(public_height),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{block::BlockId, node::PeerId};

    const ADVERSARY: PeerId = PeerId(1);

    struct Fixture {
        ledger: Ledger,
        private: PrivateChain,
        next_id: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let genesis = Arc::new(Block::genesis(vec![0; 2]));
            Self {
                ledger: Ledger::new(genesis, 0),
                private: PrivateChain::new(BlockId::GENESIS),
                next_id: 1,
            }
        }

        fn block(&mut self, parent: BlockId, miner: PeerId) -> Arc<Block> {
            let id = BlockId(self.next_id);
            self.next_id += 1;
            let parent = &self.ledger[parent].block;
            let block = Arc::new(
                Block::mine(id, parent, miner, 0.0, vec![], 0).unwrap(),
            );
            self.ledger.insert(block.clone(), 0.0).unwrap();
            block
        }

        fn mine(&mut self) -> OnMine {
            let block = self.block(self.private.tip(), ADVERSARY);
            let decision =
                Selfish.decide_on_mine(&block, &self.ledger, &self.private);
            let withhold = decision == OnMine::WithholdAndExtendPrivately;
            if !withhold {
                let height = block.height;
                self.private.release_up_to(height, &self.ledger);
            }
            self.private.record_mined(block, withhold, &self.ledger);
            decision
        }

        fn honest(&mut self) -> OnReceive {
            let block = self.block(self.private.public_tip(), PeerId(0));
            self.private.observe_public(&block, &self.ledger);
            Selfish.decide_on_receive(&block, &self.ledger, &self.private)
        }
    }

    #[test]
    fn lead_of_one_released_on_tie() {
        let mut f = Fixture::new();
        assert_eq!(f.mine(), OnMine::WithholdAndExtendPrivately);
        assert_eq!(f.honest(), OnReceive::ReleasePrivateChain(1));

        f.private.release_up_to(1, &f.ledger);
        assert!(f.private.in_race(&f.ledger));
        assert_eq!(f.mine(), OnMine::BroadcastNow);
    }

    #[test]
    fn lead_of_two_released_in_full() {
        let mut f = Fixture::new();
        f.mine();
        f.mine();
        assert_eq!(f.honest(), OnReceive::ReleasePrivateChain(2));
    }

    #[test]
    fn long_lead_released_one_at_a_time() {
        let mut f = Fixture::new();
        for _ in 0..4 {
            f.mine();
        }
        assert_eq!(f.honest(), OnReceive::ReleasePrivateChain(1));
    }

    #[test]
    fn behind_adopts_public() {
        let mut f = Fixture::new();
        assert_eq!(f.honest(), OnReceive::AdoptPublic);
    }
}
