use crate::{
    event::SimTime,
    node::PeerId,
    transaction::{Coins, Transaction, TXN_SIZE_BITS},
};

/// Representation of a mined block of transactions.
///
/// Blocks never change once mined and are shared between the ledgers of
/// every peer which learns about them.
#[derive(Debug, Clone)]
pub struct Block {
    /// The block this block extends. `None` only for the genesis block.
    pub parent_id: Option<BlockId>,
    pub id: BlockId,
    /// The miner of this block. `None` only for the genesis block.
    pub miner_id: Option<PeerId>,
    /// Simulation time at which this block was mined.
    pub created_at: SimTime,
    /// Number of blocks on the path from this block to the genesis block.
    pub height: u64,
    /// The transactions contained within this block, in execution order.
    pub txns: Vec<Transaction>,
    /// Coins credited to the miner by this block's coinbase.
    pub reward: Coins,
    /// Balance of every peer after applying this block to its parent.
    pub balances: Vec<Coins>,
}

/// A unique identifier assigned to each [Block], in the order that blocks are
/// mined. The genesis block always has ID 0.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct BlockId(pub(crate) u64);

impl BlockId {
    pub const GENESIS: BlockId = BlockId(0);

    /// Returns the [`u64`] corresponding to this [`BlockId`].
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for BlockId {
    fn from(value: u64) -> Self {
        BlockId(value)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BalanceError {
    #[error("transaction {txn} overdraws the balance of peer {payer}")]
    Overdraft { txn: crate::transaction::TxnId, payer: PeerId },
    #[error("peer {0} has no account")]
    UnknownPeer(PeerId),
}

impl Block {
    /// Creates the genesis block, in which peer `i` holds `balances[i]` coins.
    pub fn genesis(balances: Vec<Coins>) -> Self {
        Block {
            parent_id: None,
            id: BlockId::GENESIS,
            miner_id: None,
            created_at: 0.0,
            height: 0,
            txns: vec![],
            reward: 0,
            balances,
        }
    }

    /// Mines a new block on top of `parent`, computing the resulting
    /// balances.
    pub fn mine(
        id: BlockId,
        parent: &Block,
        miner_id: PeerId,
        created_at: SimTime,
        txns: Vec<Transaction>,
        reward: Coins,
    ) -> Result<Self, BalanceError> {
        let balances = apply(&parent.balances, &txns, miner_id, reward)?;

        Ok(Block {
            parent_id: Some(parent.id),
            id,
            miner_id: Some(miner_id),
            created_at,
            height: parent.height + 1,
            txns,
            reward,
            balances,
        })
    }

    /// Size of this block on the wire, in bits. Every block carries at least
    /// its coinbase.
    pub fn size_bits(&self) -> f64 {
        (self.txns.len() + 1) as f64 * TXN_SIZE_BITS
    }

    /// Balance of `peer` after this block.
    #[inline]
    pub fn balance_of(&self, peer: PeerId) -> Coins {
        self.balances.get(peer.get()).copied().unwrap_or_default()
    }
}

/// Applies `txns` in order to `balances`, then credits `reward` to `miner`.
pub fn apply(
    balances: &[Coins],
    txns: &[Transaction],
    miner: PeerId,
    reward: Coins,
) -> Result<Vec<Coins>, BalanceError> {
    let mut balances = balances.to_vec();
    let n = balances.len();

    for txn in txns {
        for peer in [txn.payer, txn.payee] {
            if peer.get() >= n {
                return Err(BalanceError::UnknownPeer(peer));
            }
        }

        balances[txn.payer.get()] -= txn.amount;
        if balances[txn.payer.get()] < 0 || txn.amount < 0 {
            return Err(BalanceError::Overdraft {
                txn: txn.id,
                payer: txn.payer,
            });
        }
        balances[txn.payee.get()] += txn.amount;
    }

    match balances.get_mut(miner.get()) {
        Some(balance) => *balance += reward,
        None => return Err(BalanceError::UnknownPeer(miner)),
    }

    Ok(balances)
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Block {}

impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Block {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxnId;

    fn txn(id: u64, payer: usize, payee: usize, amount: Coins) -> Transaction {
        Transaction {
            id: TxnId(id),
            payer: PeerId(payer),
            payee: PeerId(payee),
            amount,
            created_at: 0.0,
        }
    }

    #[test]
    fn mine_applies_transactions_and_reward() {
        let genesis = Block::genesis(vec![10, 10, 10]);
        let block = Block::mine(
            BlockId(1),
            &genesis,
            PeerId(2),
            1.0,
            vec![txn(1, 0, 1, 4), txn(2, 1, 0, 14)],
            50,
        )
        .unwrap();

        assert_eq!(block.height, 1);
        assert_eq!(block.parent_id, Some(BlockId::GENESIS));
        assert_eq!(block.balances, vec![20, 0, 60]);
    }

    #[test]
    fn overdraft_is_rejected() {
        let genesis = Block::genesis(vec![5, 0]);
        let txns = vec![txn(1, 0, 1, 6)];
        let err = Block::mine(BlockId(1), &genesis, PeerId(1), 1.0, txns, 50)
            .unwrap_err();

        assert_eq!(
            err,
            BalanceError::Overdraft { txn: TxnId(1), payer: PeerId(0) }
        );
    }

    #[test]
    fn block_size_counts_coinbase() {
        let genesis = Block::genesis(vec![0]);
        assert_eq!(genesis.size_bits(), TXN_SIZE_BITS);
    }
}
