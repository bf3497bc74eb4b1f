use std::{collections::HashMap, ops::Index, sync::Arc};

use thiserror::Error;

use crate::{
    block::{self, BalanceError, Block, BlockId},
    event::SimTime,
    transaction::Coins,
};

/// A single peer's view of the block tree. [Blocks](Block) are added to this
/// ledger via [Ledger::insert].
///
/// # Invariants
/// - Every block other than the genesis block has its parent in the ledger.
/// - The height of a block is one more than the height of its parent.
/// - The tip is a block of maximum height; among blocks of equal height, the
///   one which arrived first is kept.
#[derive(Debug, Clone)]
pub struct Ledger {
    genesis: BlockId,
    tip: BlockId,
    /// Coinbase reward every valid block must carry.
    reward: Coins,
    /// Map from the ID of a block to its associated data.
    blocks: HashMap<BlockId, BlockData>,
    /// IDs of all blocks in the order they arrived.
    arrivals: Vec<BlockId>,
}

/// A block and its associated metadata as held within a [Ledger].
#[derive(Debug, Clone)]
pub struct BlockData {
    pub block: Arc<Block>,
    /// Simulation time at which this ledger first accepted the block.
    pub arrived_at: SimTime,
    /// All blocks which directly point to `block`.
    pub children: Vec<BlockId>,
}

impl BlockData {
    #[inline]
    pub fn height(&self) -> u64 {
        self.block.height
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("block does not contain a parent block ID")]
    NoParentGiven,
    #[error("block does not name its miner")]
    NoMinerGiven,
    #[error("parent {0} of the block was not found in this ledger")]
    ParentNotFound(BlockId),
    #[error("block ID {0} already exists in this ledger")]
    DuplicateBlockId(BlockId),
    #[error("block has height {found}, expected {expected}")]
    HeightMismatch { expected: u64, found: u64 },
    #[error("block pays a reward of {found}, expected {expected}")]
    InvalidReward { expected: Coins, found: Coins },
    #[error("block transactions are invalid")]
    InvalidTransactions(#[from] BalanceError),
    #[error("block balances do not match its transactions")]
    BalanceMismatch,
}

/// Outcome of a successful [Ledger::insert].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    /// Tip of the ledger before the insertion.
    pub previous_tip: BlockId,
    /// Whether the inserted block became the new tip.
    pub new_tip: bool,
}

/// The blocks which leave and join the preferred chain when the tip moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reorg {
    /// Blocks on the old chain above the common ancestor, highest first.
    pub removed: Vec<BlockId>,
    /// Blocks on the new chain above the common ancestor, lowest first.
    pub added: Vec<BlockId>,
}

impl Reorg {
    /// A reorg which removes blocks abandons a branch.
    #[inline]
    pub fn is_fork_switch(&self) -> bool {
        !self.removed.is_empty()
    }
}

impl Ledger {
    /// Creates a new ledger containing only `genesis`, which arrived at time
    /// 0. Every block added later must pay a coinbase of exactly `reward`.
    pub fn new(genesis: Arc<Block>, reward: Coins) -> Self {
        let id = genesis.id;
        let blocks = HashMap::from([(
            id,
            BlockData { block: genesis, arrived_at: 0.0, children: vec![] },
        )]);

        Ledger { genesis: id, tip: id, reward, blocks, arrivals: vec![id] }
    }

    #[inline]
    pub fn genesis(&self) -> BlockId {
        self.genesis
    }

    /// The block this ledger currently considers the head of its preferred
    /// chain.
    #[inline]
    pub fn tip(&self) -> BlockId {
        self.tip
    }

    #[inline]
    pub fn tip_height(&self) -> u64 {
        self[self.tip].height()
    }

    /// Returns true iff the given block ID is associated with a block in the
    /// ledger.
    #[inline]
    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&BlockData> {
        self.blocks.get(&id)
    }

    /// Returns the parent of the block with the given ID.
    #[inline]
    pub fn get_parent(&self, id: BlockId) -> Option<BlockId> {
        self.blocks.get(&id).and_then(|data| data.block.parent_id)
    }

    /// Number of blocks in the ledger, including the genesis block.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// All blocks in the ledger, in the order they arrived.
    pub fn iter(&self) -> impl Iterator<Item = &BlockData> + '_ {
        self.arrivals.iter().map(|id| &self.blocks[id])
    }

    /// Returns the IDs of all blocks on the path from the given block ID to the
    /// genesis block, in ascending order of height and including the given
    /// block ID.
    ///
    /// ## Panics
    /// If a block with [BlockId] `id` is not present in the ledger.
    pub fn ancestors_of(&self, id: BlockId) -> Vec<BlockId> {
        assert!(
            self.contains(id),
            "ledger does not contain a block with ID: {:?}",
            id
        );

        let mut ancestors = vec![id];

        let mut curr = id;
        while let Some(parent) = self.get_parent(curr) {
            ancestors.push(parent);
            curr = parent;
        }

        ancestors.reverse();
        ancestors
    }

    /// Returns the IDs of all blocks on the preferred chain, in order from the
    /// genesis block to the tip.
    #[inline]
    pub fn longest_chain(&self) -> Vec<BlockId> {
        self.ancestors_of(self.tip)
    }

    /// Returns true iff `ancestor` lies on the path from `id` to the genesis
    /// block. Every block is its own ancestor.
    pub fn is_ancestor(&self, ancestor: BlockId, id: BlockId) -> bool {
        let Some(target) = self.get(ancestor) else {
            return false;
        };

        let mut curr = id;
        loop {
            if curr == ancestor {
                return true;
            }
            match self.get(curr) {
                Some(data) if data.height() > target.height() => {
                    match data.block.parent_id {
                        Some(parent) => curr = parent,
                        None => return false,
                    }
                }
                _ => return false,
            }
        }
    }

    /// Returns the highest block which is an ancestor of both `a` and `b`.
    ///
    /// ## Panics
    /// If either block is not present in the ledger.
    pub fn common_ancestor(&self, a: BlockId, b: BlockId) -> BlockId {
        let (mut a, mut b) = (a, b);
        while a != b {
            if self[a].height() >= self[b].height() {
                a = self.get_parent(a).expect("genesis is a common ancestor");
            } else {
                b = self.get_parent(b).expect("genesis is a common ancestor");
            }
        }

        a
    }

    /// Returns the blocks which leave and join the preferred chain when the
    /// tip moves from `from` to `to`.
    pub fn reorg(&self, from: BlockId, to: BlockId) -> Reorg {
        let ancestor = self.common_ancestor(from, to);

        let walk = |mut curr: BlockId| {
            let mut path = vec![];
            while curr != ancestor {
                path.push(curr);
                curr = self.get_parent(curr).expect("ancestor is on the path");
            }
            path
        };

        let removed = walk(from);
        let mut added = walk(to);
        added.reverse();

        Reorg { removed, added }
    }

    /// Checks that `block` could be added to the ledger, without adding it.
    pub fn validate(&self, block: &Block) -> Result<(), LedgerError> {
        use LedgerError::*;

        if self.contains(block.id) {
            return Err(DuplicateBlockId(block.id));
        }
        let parent = match block.parent_id {
            None => return Err(NoParentGiven),
            Some(parent) => match self.get(parent) {
                None => return Err(ParentNotFound(parent)),
                Some(data) => &data.block,
            },
        };

        if block.height != parent.height + 1 {
            return Err(HeightMismatch {
                expected: parent.height + 1,
                found: block.height,
            });
        }
        if block.reward != self.reward {
            return Err(InvalidReward {
                expected: self.reward,
                found: block.reward,
            });
        }

        let miner = block.miner_id.ok_or(NoMinerGiven)?;
        let balances =
            block::apply(&parent.balances, &block.txns, miner, block.reward)?;
        if balances != block.balances {
            return Err(BalanceMismatch);
        }

        Ok(())
    }

    /// Adds the given block to the ledger, moving the tip if the block is
    /// strictly higher than the current tip.
    pub fn insert(
        &mut self,
        block: Arc<Block>,
        arrived_at: SimTime,
    ) -> Result<Insertion, LedgerError> {
        self.validate(&block)?;

        let previous_tip = self.tip;
        let id = block.id;
        let height = block.height;
        if let Some(parent) = block.parent_id {
            if let Some(data) = self.blocks.get_mut(&parent) {
                data.children.push(id);
            }
        }

        self.blocks
            .insert(id, BlockData { block, arrived_at, children: vec![] });
        self.arrivals.push(id);

        let new_tip = height > self.tip_height();
        if new_tip {
            self.tip = id;
        }

        Ok(Insertion { previous_tip, new_tip })
    }

    /// Verifies the structural invariants of the ledger.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        for data in self.blocks.values() {
            let block = &data.block;
            let Some(parent) = block.parent_id else {
                continue;
            };
            let parent = self
                .get(parent)
                .ok_or(LedgerError::ParentNotFound(parent))?;

            if block.height != parent.height() + 1 {
                return Err(LedgerError::HeightMismatch {
                    expected: parent.height() + 1,
                    found: block.height,
                });
            }
        }

        let max = self.blocks.values().map(BlockData::height).max();
        if max != Some(self.tip_height()) {
            return Err(LedgerError::HeightMismatch {
                expected: max.unwrap_or_default(),
                found: self.tip_height(),
            });
        }

        Ok(())
    }
}

impl Index<BlockId> for Ledger {
    type Output = BlockData;

    fn index(&self, index: BlockId) -> &Self::Output {
        self.blocks.index(&index)
    }
}

impl Index<&BlockId> for Ledger {
    type Output = BlockData;

    fn index(&self, index: &BlockId) -> &Self::Output {
        self.blocks.index(index)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::{prelude::*, sample::Index as Pick};

    use super::*;
    use crate::node::PeerId;

    const REWARD: Coins = 50;

    fn genesis() -> Arc<Block> {
        Arc::new(Block::genesis(vec![0; 4]))
    }

    fn child(id: u64, parent: &Block, miner: usize) -> Arc<Block> {
        Arc::new(
            Block::mine(
                BlockId(id),
                parent,
                PeerId(miner),
                id as f64,
                vec![],
                REWARD,
            )
            .unwrap(),
        )
    }

    #[test]
    fn new_instance_longest_chain() {
        let ledger = Ledger::new(genesis(), REWARD);
        let lc = ledger.longest_chain();

        assert_eq!(lc, vec![BlockId::GENESIS]);
        assert_eq!(ledger.tip_height(), 0);
    }

    #[test]
    fn equal_height_keeps_first_seen_tip() {
        let g = genesis();
        let mut ledger = Ledger::new(g.clone(), REWARD);

        let a = child(1, &g, 0);
        let b = child(2, &g, 1);
        assert!(ledger.insert(a, 1.0).unwrap().new_tip);
        assert!(!ledger.insert(b.clone(), 2.0).unwrap().new_tip);
        assert_eq!(ledger.tip(), BlockId(1));

        let c = child(3, &b, 2);
        let insertion = ledger.insert(c, 3.0).unwrap();
        assert!(insertion.new_tip);
        assert_eq!(insertion.previous_tip, BlockId(1));

        let reorg = ledger.reorg(BlockId(1), ledger.tip());
        assert_eq!(reorg.removed, vec![BlockId(1)]);
        assert_eq!(reorg.added, vec![BlockId(2), BlockId(3)]);
        assert!(reorg.is_fork_switch());
    }

    #[test]
    fn duplicate_receipt_leaves_ledger_unchanged() {
        let g = genesis();
        let mut ledger = Ledger::new(g.clone(), REWARD);
        let a = child(1, &g, 0);

        ledger.insert(a.clone(), 1.0).unwrap();
        let before = (ledger.tip(), ledger.num_blocks());

        assert_eq!(
            ledger.insert(a, 2.0),
            Err(LedgerError::DuplicateBlockId(BlockId(1)))
        );
        assert_eq!((ledger.tip(), ledger.num_blocks()), before);
        assert_eq!(ledger[BlockId(1)].arrived_at, 1.0);
    }

    #[test]
    fn rejects_missing_parent_and_bad_height() {
        let g = genesis();
        let a = child(1, &g, 0);
        let b = child(2, &a, 0);
        let mut ledger = Ledger::new(g.clone(), REWARD);

        assert_eq!(
            ledger.insert(b, 1.0),
            Err(LedgerError::ParentNotFound(BlockId(1)))
        );

        let mut bad = (*child(3, &g, 0)).clone();
        bad.height = 5;
        assert_eq!(
            ledger.insert(Arc::new(bad), 1.0),
            Err(LedgerError::HeightMismatch { expected: 1, found: 5 })
        );
    }

    #[test]
    fn rejects_forged_balances() {
        let g = genesis();
        let mut forged = (*child(1, &g, 0)).clone();
        forged.balances[1] = 1_000;

        let mut ledger = Ledger::new(g, REWARD);
        assert_eq!(
            ledger.insert(Arc::new(forged), 1.0),
            Err(LedgerError::BalanceMismatch)
        );
    }

    #[test]
    fn ancestry_queries() {
        let g = genesis();
        let a = child(1, &g, 0);
        let b = child(2, &a, 0);
        let c = child(3, &g, 1);
        let mut ledger = Ledger::new(g, REWARD);
        for block in [a, b, c] {
            ledger.insert(block, 0.0).unwrap();
        }

        assert!(ledger.is_ancestor(BlockId(1), BlockId(2)));
        assert!(ledger.is_ancestor(BlockId(2), BlockId(2)));
        assert!(!ledger.is_ancestor(BlockId(3), BlockId(2)));
        assert_eq!(ledger.common_ancestor(BlockId(2), BlockId(3)), BlockId(0));
        assert_eq!(ledger.ancestors_of(BlockId(2)).len(), 3);
    }

    proptest! {
        /// Builds a random tree by attaching each new block to a random
        /// existing block, delivering the blocks to two ledgers in the same
        /// order.
        #[test]
        fn random_trees_keep_invariants(
            parents in prop::collection::vec(any::<Pick>(), 1..40)
        ) {
            let g = genesis();
            let mut all = vec![g.clone()];
            let mut first = Ledger::new(g.clone(), REWARD);
            let mut second = Ledger::new(g, REWARD);

            for (i, parent) in parents.iter().enumerate() {
                let parent = parent.get(&all).clone();
                let block = child(i as u64 + 1, &parent, i % 4);
                all.push(block.clone());

                first.insert(block.clone(), i as f64).unwrap();
                second.insert(block, i as f64 + 0.5).unwrap();
            }

            prop_assert!(first.check_invariants().is_ok());
            prop_assert_eq!(first.tip(), second.tip());

            let max = all.iter().map(|b| b.height).max().unwrap();
            prop_assert_eq!(first.tip_height(), max);
            let earliest = all.iter().find(|b| b.height == max).unwrap().id;
            prop_assert_eq!(first.tip(), earliest);
        }
    }
}
