/*!
Mining strategies

A [`Strategy`] decides what a peer does with the blocks it mines and how it
reacts to blocks mined by others. The set of strategies is closed:

- Honest Mining [`honest::Honest`]
- Selfish Mining [`selfish::Selfish`]
- Stubborn Mining [`stubborn::Stubborn`]

Every peer tracks its mining state in a [`PrivateChain`]. For honest peers the
private tip always equals the public tip. Adversarial peers use it to keep
blocks withheld from the network, and to account for every block they mine:
each one is broadcast, still withheld, or discarded when its branch is
abandoned, and stays in the adversary's ledger in every case.

# Examples
```
use p2p_mining_sim::prelude::*;

let strategy = Strategy::Stubborn(Stubborn::with_trail(2));
assert!(strategy.is_adversarial());
assert_eq!(strategy.name(), "Stubborn (trail 2)");
```
*/

use std::{collections::VecDeque, sync::Arc};

use crate::{
    block::{Block, BlockId},
    blockchain::Ledger,
};

pub mod honest;
pub mod selfish;
pub mod stubborn;

pub use honest::Honest;
pub use selfish::Selfish;
pub use stubborn::Stubborn;

/// What to do with a freshly mined block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMine {
    /// Send the block, and every withheld block below it, to all neighbors.
    BroadcastNow,
    /// Keep the block private and keep mining on top of it.
    WithholdAndExtendPrivately,
}

/// How to react to a block mined by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnReceive {
    /// Abandon any private branch and mine on the public tip.
    AdoptPublic,
    /// Keep the current mining target.
    KeepMiningPrivate,
    /// Broadcast withheld blocks with height up to and including the given
    /// height, keeping the current mining target.
    ReleasePrivateChain(u64),
}

/// A mining strategy. See the [module documentation](self).
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Honest(Honest),
    Selfish(Selfish),
    Stubborn(Stubborn),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Honest(Honest)
    }
}

impl Strategy {
    /// Returns the name of this strategy.
    pub fn name(&self) -> String {
        match self {
            Self::Honest(_) => "Honest".to_string(),
            Self::Selfish(_) => "Selfish".to_string(),
            Self::Stubborn(s) => format!("Stubborn (trail {})", s.trail),
        }
    }

    /// Returns true for strategies which may withhold blocks.
    #[inline]
    pub fn is_adversarial(&self) -> bool {
        !matches!(self, Self::Honest(_))
    }

    /// Called after `block` was mined on the private tip, before it is
    /// recorded in `private`.
    pub fn decide_on_mine(
        &self,
        block: &Block,
        ledger: &Ledger,
        private: &PrivateChain,
    ) -> OnMine {
        match self {
            Self::Honest(s) => s.decide_on_mine(block, ledger, private),
            Self::Selfish(s) => s.decide_on_mine(block, ledger, private),
            Self::Stubborn(s) => s.decide_on_mine(block, ledger, private),
        }
    }

    /// Called after `block`, mined by someone else, was accepted into
    /// `ledger` and shown to `private`.
    pub fn decide_on_receive(
        &self,
        block: &Block,
        ledger: &Ledger,
        private: &PrivateChain,
    ) -> OnReceive {
        match self {
            Self::Honest(s) => s.decide_on_receive(block, ledger, private),
            Self::Selfish(s) => s.decide_on_receive(block, ledger, private),
            Self::Stubborn(s) => s.decide_on_receive(block, ledger, private),
        }
    }
}

/// Mining state of a peer: the block it mines on, the best public block it
/// knows, and the blocks it mined but has not broadcast yet.
#[derive(Debug, Clone)]
pub struct PrivateChain {
    tip: BlockId,
    public_tip: BlockId,
    /// Withheld blocks, lowest first. Each extends the one before it, and the
    /// last one is `tip`.
    withheld: VecDeque<Arc<Block>>,
    mined: Vec<BlockId>,
    released: Vec<BlockId>,
    discarded: Vec<BlockId>,
}

impl PrivateChain {
    pub fn new(genesis: BlockId) -> Self {
        Self {
            tip: genesis,
            public_tip: genesis,
            withheld: VecDeque::new(),
            mined: vec![],
            released: vec![],
            discarded: vec![],
        }
    }

    /// The block this peer mines on.
    #[inline]
    pub fn tip(&self) -> BlockId {
        self.tip
    }

    /// Highest block mined by other peers or broadcast by this peer, first
    /// seen on ties.
    #[inline]
    pub fn public_tip(&self) -> BlockId {
        self.public_tip
    }

    pub fn withheld(&self) -> impl ExactSizeIterator<Item = &Arc<Block>> {
        self.withheld.iter()
    }

    /// Every block this peer has mined, in order.
    #[inline]
    pub fn mined(&self) -> &[BlockId] {
        &self.mined
    }

    /// Blocks broadcast by this peer, in order.
    #[inline]
    pub fn released(&self) -> &[BlockId] {
        &self.released
    }

    /// Withheld blocks abandoned without ever being broadcast.
    #[inline]
    pub fn discarded(&self) -> &[BlockId] {
        &self.discarded
    }

    /// Height of the private tip minus the height of the public tip.
    pub fn lead(&self, ledger: &Ledger) -> i64 {
        let private = ledger[self.tip].height() as i64;
        private - ledger[self.public_tip].height() as i64
    }

    /// Returns true iff the private tip is not on the public chain.
    pub fn has_private_branch(&self, ledger: &Ledger) -> bool {
        !ledger.is_ancestor(self.tip, self.public_tip)
    }

    /// Returns true iff this peer has published a competing branch of the same
    /// height as the public chain, and withholds nothing.
    pub fn in_race(&self, ledger: &Ledger) -> bool {
        self.withheld.is_empty()
            && self.lead(ledger) == 0
            && self.has_private_branch(ledger)
    }

    /// Records a block this peer mined on its tip. The block must already be
    /// in `ledger`.
    pub(crate) fn record_mined(
        &mut self,
        block: Arc<Block>,
        withhold: bool,
        ledger: &Ledger,
    ) {
        debug_assert_eq!(block.parent_id, Some(self.tip));

        self.tip = block.id;
        self.mined.push(block.id);
        if withhold {
            self.withheld.push_back(block);
        } else {
            self.released.push(block.id);
            self.observe_public(&block, ledger);
        }
    }

    /// Shows this peer a block that is now public. Returns true iff the block
    /// became the public tip.
    pub(crate) fn observe_public(
        &mut self,
        block: &Block,
        ledger: &Ledger,
    ) -> bool {
        if block.height > ledger[self.public_tip].height() {
            self.public_tip = block.id;
            true
        } else {
            false
        }
    }

    /// Removes and returns the withheld blocks of height at most `height`,
    /// lowest first.
    pub(crate) fn release_up_to(
        &mut self,
        height: u64,
        ledger: &Ledger,
    ) -> Vec<Arc<Block>> {
        let mut blocks = vec![];
        while let Some(block) = self.withheld.pop_front() {
            if block.height > height {
                self.withheld.push_front(block);
                break;
            }

            self.released.push(block.id);
            blocks.push(block);
        }

        if let Some(last) = blocks.last() {
            self.observe_public(last, ledger);
        }

        blocks
    }

    /// Abandons every withheld block and moves the tip to the public tip.
    /// Returns the discarded blocks.
    pub(crate) fn adopt_public(&mut self) -> Vec<BlockId> {
        let discarded: Vec<_> =
            self.withheld.drain(..).map(|block| block.id).collect();
        self.discarded.extend(&discarded);
        self.tip = self.public_tip;

        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PeerId;

    fn ledger_with_blocks(
        parents: &[(u64, u64, usize)],
    ) -> (Ledger, Vec<Arc<Block>>) {
        let genesis = Arc::new(Block::genesis(vec![0; 3]));
        let mut ledger = Ledger::new(genesis.clone(), 0);
        let mut blocks = vec![genesis];

        for &(id, parent, miner) in parents {
            let parent = blocks.iter().find(|b| b.id.get() == parent).unwrap();
            let block = Arc::new(
                Block::mine(BlockId(id), parent, PeerId(miner), 0.0, vec![], 0)
                    .unwrap(),
            );
            ledger.insert(block.clone(), id as f64).unwrap();
            blocks.push(block);
        }

        (ledger, blocks)
    }

    #[test]
    fn accounting_covers_every_mined_block() {
        let (ledger, blocks) =
            ledger_with_blocks(&[(1, 0, 2), (2, 1, 2), (3, 0, 0)]);
        let mut private = PrivateChain::new(BlockId::GENESIS);

        private.record_mined(blocks[1].clone(), true, &ledger);
        private.record_mined(blocks[2].clone(), true, &ledger);
        assert_eq!(private.lead(&ledger), 2);

        private.observe_public(&blocks[3], &ledger);
        assert_eq!(private.public_tip(), BlockId(3));
        assert_eq!(private.lead(&ledger), 1);

        let released = private.release_up_to(1, &ledger);
        assert_eq!(released.len(), 1);
        assert_eq!(private.withheld().len(), 1);

        let discarded = private.adopt_public();
        assert_eq!(discarded, vec![BlockId(2)]);
        assert_eq!(private.tip(), BlockId(3));
        assert_eq!(
            private.mined().len(),
            private.released().len() + private.discarded().len()
        );
    }

    #[test]
    fn race_requires_published_equal_branch() {
        let (ledger, blocks) = ledger_with_blocks(&[(1, 0, 0), (2, 0, 2)]);
        let mut private = PrivateChain::new(BlockId::GENESIS);

        private.observe_public(&blocks[1], &ledger);
        private.record_mined(blocks[2].clone(), true, &ledger);
        assert!(!private.in_race(&ledger));

        private.release_up_to(1, &ledger);
        assert!(private.in_race(&ledger));
    }
}
