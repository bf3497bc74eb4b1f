/*!
Peers and their reaction to simulation events

Each [`Peer`] owns a private [`Ledger`], a pool of pending transactions and a
[`PrivateChain`] holding its mining state. Events are dispatched to a peer
through [`Peer::handle`], which may change the peer's state, send messages to
its neighbors and schedule follow-up events in the [`SimulationContext`].

Received blocks whose parent is still unknown wait in an orphan buffer until
the parent arrives. An orphan not connected after
[`NodeParams::max_orphan_retries`] further block receptions is dropped.
*/

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
};

use tracing::{debug, trace, warn};

use crate::{
    block::{Block, BlockId},
    blockchain::{Ledger, LedgerError},
    event::{Event, EventKind, SimTime, TxnArrival},
    miner::{OnMine, OnReceive, PrivateChain, Strategy},
    power_dist::PowerValue,
    sampler::SamplerError,
    simulation::{trace::TraceKind, SimulationContext, SimulationError},
    transaction::{Coins, Transaction, TxnId, TXN_SIZE_BITS},
};

/// Unique identifier of a peer. Peers are numbered from 0, and the adversary,
/// if any, comes last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub(crate) usize);

impl PeerId {
    #[inline]
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for PeerId {
    fn from(value: usize) -> Self {
        PeerId(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Parameters shared by every peer in a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeParams {
    /// Mean time between two transactions generated by the same peer. `None`
    /// disables transaction generation.
    pub txn_mean: Option<SimTime>,
    /// Mean time between two blocks of the whole network. A peer holding
    /// hashing power `h` finds blocks with mean `block_mean / h`.
    pub block_mean: SimTime,
    /// Maximum number of transactions in a block, not counting the coinbase.
    pub max_block_txns: usize,
    /// Coinbase reward of every block.
    pub reward: Coins,
    pub max_orphan_retries: usize,
}

impl Default for NodeParams {
    fn default() -> Self {
        Self {
            txn_mean: Some(10.0),
            block_mean: 100.0,
            max_block_txns: 999,
            reward: 50,
            max_orphan_retries: 100,
        }
    }
}

/// Whether a peer is working on a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningState {
    /// The peer has no hashing power.
    Idle,
    /// A [`EventKind::BlockMined`] event extending `target` is pending.
    Mining { target: BlockId },
}

#[derive(Debug, Clone)]
struct Orphan {
    block: Arc<Block>,
    from: PeerId,
    /// Blocks received since this orphan was buffered.
    age: usize,
}

/// A single participant of the network. See the
/// [module documentation](self).
#[derive(Debug, Clone)]
pub struct Peer {
    id: PeerId,
    hash_power: PowerValue,
    strategy: Strategy,
    /// Adversaries forward blocks from other peers only if this is set.
    relays_blocks: bool,
    ledger: Ledger,
    private: PrivateChain,
    /// Pending transactions which are not on the chain being mined.
    pool: BTreeMap<TxnId, Transaction>,
    seen_txns: HashSet<TxnId>,
    seen_blocks: HashSet<BlockId>,
    /// Buffered blocks keyed by their missing parent.
    orphans: BTreeMap<BlockId, Vec<Orphan>>,
    state: MiningState,
    fork_switches: usize,
}

impl Peer {
    pub fn new(
        id: PeerId,
        hash_power: PowerValue,
        strategy: Strategy,
        genesis: Arc<Block>,
        reward: Coins,
    ) -> Self {
        let genesis_id = genesis.id;
        Peer {
            id,
            hash_power,
            relays_blocks: !strategy.is_adversarial(),
            strategy,
            ledger: Ledger::new(genesis, reward),
            private: PrivateChain::new(genesis_id),
            pool: BTreeMap::new(),
            seen_txns: HashSet::new(),
            seen_blocks: HashSet::from([genesis_id]),
            orphans: BTreeMap::new(),
            state: MiningState::Idle,
            fork_switches: 0,
        }
    }

    /// Makes an adversarial peer forward blocks mined by others, like honest
    /// peers do.
    pub fn with_block_relay(mut self, relay: bool) -> Self {
        self.relays_blocks = relay || !self.strategy.is_adversarial();
        self
    }

    #[inline]
    pub fn id(&self) -> PeerId {
        self.id
    }

    #[inline]
    pub fn hash_power(&self) -> PowerValue {
        self.hash_power
    }

    #[inline]
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    #[inline]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[inline]
    pub fn private_chain(&self) -> &PrivateChain {
        &self.private
    }

    #[inline]
    pub fn state(&self) -> MiningState {
        self.state
    }

    /// The block this peer currently mines on.
    #[inline]
    pub fn mining_target(&self) -> BlockId {
        self.private.tip()
    }

    /// Pending transactions, in order of ID.
    pub fn pool(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.pool.values()
    }

    /// Number of buffered blocks whose parent is unknown.
    pub fn num_orphans(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }

    /// Number of times the mining target moved to a block not descending from
    /// the previous one.
    #[inline]
    pub fn fork_switches(&self) -> usize {
        self.fork_switches
    }

    /// Schedules this peer's first transaction and starts mining on genesis.
    pub fn start(
        &mut self,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        self.schedule_transaction(ctx)?;
        self.schedule_mining(ctx)?;

        Ok(())
    }

    /// Dispatches `event` to the matching handler.
    pub fn handle(
        &mut self,
        event: Event,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        debug_assert_eq!(event.peer, self.id);
        trace!(
            peer = %self.id,
            time = event.time,
            kind = ?event.kind,
            "dispatch"
        );

        match event.kind {
            EventKind::TransactionArrival(arrival) => {
                self.on_transaction_arrival(arrival, ctx)
            }
            EventKind::BlockMined { parent } => {
                self.on_block_mined(parent, ctx)
            }
            EventKind::BlockReceived { block, from } => {
                self.on_block_received(block, from, ctx)
            }
            EventKind::SimulationEnd => Ok(()),
        }
    }

    pub fn on_transaction_arrival(
        &mut self,
        arrival: TxnArrival,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        match arrival {
            TxnArrival::Generated => {
                if let Some(txn) = self.generate_transaction(ctx) {
                    ctx.trace_txn(
                        self.id,
                        TraceKind::TransactionGenerated,
                        txn.id,
                    );
                    self.seen_txns.insert(txn.id);
                    self.pool.insert(txn.id, txn);
                    self.flood_transaction(txn, None, ctx)?;
                }
                self.schedule_transaction(ctx)?;
            }
            TxnArrival::Relayed { txn, from } => {
                if !self.seen_txns.insert(txn.id) {
                    return Ok(());
                }

                ctx.trace_txn(self.id, TraceKind::TransactionReceived, txn.id);
                self.pool.insert(txn.id, txn);
                self.flood_transaction(txn, Some(from), ctx)?;
            }
        }

        Ok(())
    }

    /// Creates a transaction paying a random amount of this peer's balance to
    /// a random other peer. Returns `None` if the balance is empty.
    fn generate_transaction(
        &self,
        ctx: &mut SimulationContext,
    ) -> Option<Transaction> {
        let target = &self.ledger[self.mining_target()].block;
        let balance = target.balance_of(self.id);
        let peers = ctx.topology.num_peers();
        if balance <= 0 || peers < 2 {
            return None;
        }

        let amount = 1 + ctx.sampler.index(balance as usize) as Coins;
        let mut payee = ctx.sampler.index(peers - 1);
        if payee >= self.id.0 {
            payee += 1;
        }

        Some(Transaction {
            id: ctx.next_txn_id(),
            payer: self.id,
            payee: PeerId(payee),
            amount,
            created_at: ctx.now(),
        })
    }

    fn schedule_transaction(
        &self,
        ctx: &mut SimulationContext,
    ) -> Result<(), SamplerError> {
        if let Some(mean) = ctx.params.txn_mean {
            let at = ctx.now() + ctx.sampler.exponential(mean)?;
            ctx.scheduler.schedule(
                at,
                self.id,
                EventKind::TransactionArrival(TxnArrival::Generated),
            );
        }

        Ok(())
    }

    fn flood_transaction(
        &self,
        txn: Transaction,
        except: Option<PeerId>,
        ctx: &mut SimulationContext,
    ) -> Result<(), SamplerError> {
        let neighbors: Vec<_> = ctx.topology.neighbors(self.id).collect();
        for to in neighbors.into_iter().filter(|&p| Some(p) != except) {
            ctx.send(
                self.id,
                to,
                TXN_SIZE_BITS,
                EventKind::TransactionArrival(TxnArrival::Relayed {
                    txn,
                    from: self.id,
                }),
            )?;
        }

        Ok(())
    }

    /// Handles the end of a mining attempt on `parent`. The event is stale,
    /// and dropped, if this peer has moved on to another target since it was
    /// scheduled.
    pub fn on_block_mined(
        &mut self,
        parent: BlockId,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        if self.state != (MiningState::Mining { target: parent }) {
            trace!(peer = %self.id, %parent, "dropped stale mining event");
            ctx.trace_block(self.id, TraceKind::StaleMiningDropped, parent);
            return Ok(());
        }

        let parent_block = self.ledger[parent].block.clone();
        let txns =
            self.select_transactions(&parent_block, ctx.params.max_block_txns);
        let block = Arc::new(Block::mine(
            ctx.next_block_id(),
            &parent_block,
            self.id,
            ctx.now(),
            txns,
            ctx.params.reward,
        )?);

        self.ledger.insert(block.clone(), ctx.now())?;
        self.seen_blocks.insert(block.id);
        ctx.trace_block(self.id, TraceKind::BlockMined, block.id);

        let decision =
            self.strategy.decide_on_mine(&block, &self.ledger, &self.private);
        match decision {
            OnMine::BroadcastNow => {
                let withheld =
                    self.private.release_up_to(block.height, &self.ledger);
                self.private.record_mined(block.clone(), false, &self.ledger);
                for released in withheld {
                    self.broadcast_release(released, ctx)?;
                }
                self.broadcast_block(&block, None, ctx)?;
            }
            OnMine::WithholdAndExtendPrivately => {
                debug!(peer = %self.id, block = %block.id, "withholding block");
                ctx.trace_block(self.id, TraceKind::BlockWithheld, block.id);
                self.private.record_mined(block, true, &self.ledger);
            }
        }

        self.retarget(parent, ctx)
    }

    /// Picks pending transactions, in order of ID, which the balances after
    /// `parent` can pay for.
    fn select_transactions(
        &self,
        parent: &Block,
        limit: usize,
    ) -> Vec<Transaction> {
        let mut balances = parent.balances.clone();
        let n = balances.len();

        let mut txns = vec![];
        for txn in self.pool.values() {
            if txns.len() >= limit {
                break;
            }

            let (payer, payee) = (txn.payer.0, txn.payee.0);
            if payer >= n || payee >= n || txn.amount > balances[payer] {
                continue;
            }
            balances[payer] -= txn.amount;
            balances[payee] += txn.amount;
            txns.push(*txn);
        }

        txns
    }

    pub fn on_block_received(
        &mut self,
        block: Arc<Block>,
        from: PeerId,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        if !self.seen_blocks.insert(block.id) {
            return Ok(());
        }
        ctx.trace_block(self.id, TraceKind::BlockReceived, block.id);
        self.age_orphans(ctx);

        match self.ledger.validate(&block) {
            Ok(()) => self.accept(block, from, ctx),
            Err(LedgerError::ParentNotFound(parent)) => {
                debug!(
                    peer = %self.id,
                    block = %block.id,
                    %parent,
                    "buffering orphan"
                );
                self.orphans
                    .entry(parent)
                    .or_default()
                    .push(Orphan { block, from, age: 0 });
                Ok(())
            }
            Err(e) => {
                warn!(
                    peer = %self.id,
                    block = %block.id,
                    %from,
                    error = %e,
                    "dropping invalid block"
                );
                ctx.trace_block(self.id, TraceKind::InvalidBlock, block.id);
                Ok(())
            }
        }
    }

    /// Drops orphans which have waited for more than the allowed number of
    /// receptions.
    fn age_orphans(&mut self, ctx: &mut SimulationContext) {
        let max_age = ctx.params.max_orphan_retries;
        let mut dropped = vec![];

        self.orphans.retain(|_, orphans| {
            orphans.retain_mut(|orphan| {
                orphan.age += 1;
                if orphan.age > max_age {
                    dropped.push(orphan.block.id);
                    false
                } else {
                    true
                }
            });
            !orphans.is_empty()
        });

        for id in dropped {
            warn!(peer = %self.id, block = %id, "discarding unresolved orphan");
            ctx.trace_block(self.id, TraceKind::OrphanDiscarded, id);
            // Allow a later copy of the block to be received again
            self.seen_blocks.remove(&id);
        }
    }

    /// Inserts a valid block into the ledger, along with every buffered
    /// descendant it connects.
    fn accept(
        &mut self,
        block: Arc<Block>,
        from: PeerId,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        let mut queue = VecDeque::from([(block, from)]);

        while let Some((block, from)) = queue.pop_front() {
            let insertion = match self.ledger.insert(block.clone(), ctx.now()) {
                Ok(insertion) => insertion,
                Err(e) => {
                    warn!(
                        peer = %self.id,
                        block = %block.id,
                        error = %e,
                        "dropping invalid block"
                    );
                    ctx.trace_block(self.id, TraceKind::InvalidBlock, block.id);
                    continue;
                }
            };
            if insertion.new_tip {
                trace!(peer = %self.id, tip = %block.id, "new ledger tip");
            }
            self.on_public_block(&block, from, ctx)?;

            if let Some(children) = self.orphans.remove(&block.id) {
                queue.extend(children.into_iter().map(|o| (o.block, o.from)));
            }
        }

        Ok(())
    }

    /// Lets the strategy react to a block from another peer which was just
    /// added to the ledger.
    fn on_public_block(
        &mut self,
        block: &Arc<Block>,
        from: PeerId,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        let previous_target = self.private.tip();
        self.private.observe_public(block, &self.ledger);

        let decision =
            self.strategy.decide_on_receive(block, &self.ledger, &self.private);
        match decision {
            OnReceive::AdoptPublic => {
                for id in self.private.adopt_public() {
                    debug!(
                        peer = %self.id,
                        block = %id,
                        "discarding withheld block"
                    );
                    ctx.trace_block(self.id, TraceKind::BlockDiscarded, id);
                }
            }
            OnReceive::KeepMiningPrivate => (),
            OnReceive::ReleasePrivateChain(height) => {
                let released = self.private.release_up_to(height, &self.ledger);
                for withheld in released {
                    self.broadcast_release(withheld, ctx)?;
                }
            }
        }

        // Every accepted block is flooded once, so that the ancestors of a
        // later tip reach peers further away
        if self.relays_blocks {
            self.broadcast_block(block, Some(from), ctx)?;
        }

        self.retarget(previous_target, ctx)
    }

    fn broadcast_release(
        &self,
        block: Arc<Block>,
        ctx: &mut SimulationContext,
    ) -> Result<(), SamplerError> {
        debug!(
            peer = %self.id,
            block = %block.id,
            height = block.height,
            "releasing block"
        );
        ctx.trace_block(self.id, TraceKind::BlockReleased, block.id);
        self.broadcast_block(&block, None, ctx)
    }

    /// Sends `block` to every neighbor except `except`.
    fn broadcast_block(
        &self,
        block: &Arc<Block>,
        except: Option<PeerId>,
        ctx: &mut SimulationContext,
    ) -> Result<(), SamplerError> {
        let size = block.size_bits();
        let neighbors: Vec<_> = ctx.topology.neighbors(self.id).collect();
        for to in neighbors.into_iter().filter(|&p| Some(p) != except) {
            ctx.send(
                self.id,
                to,
                size,
                EventKind::BlockReceived {
                    block: block.clone(),
                    from: self.id,
                },
            )?;
        }

        Ok(())
    }

    /// Brings the pool and the mining schedule up to date after the mining
    /// target may have moved away from `previous`.
    fn retarget(
        &mut self,
        previous: BlockId,
        ctx: &mut SimulationContext,
    ) -> Result<(), SimulationError> {
        let target = self.private.tip();
        if target != previous {
            let reorg = self.ledger.reorg(previous, target);
            for id in &reorg.removed {
                for txn in &self.ledger[id].block.txns {
                    self.pool.insert(txn.id, *txn);
                }
            }
            for id in &reorg.added {
                for txn in &self.ledger[id].block.txns {
                    self.pool.remove(&txn.id);
                    self.seen_txns.insert(txn.id);
                }
            }

            if reorg.is_fork_switch() {
                self.fork_switches += 1;
                debug!(
                    peer = %self.id,
                    from = %previous,
                    to = %target,
                    depth = reorg.removed.len(),
                    "switched fork"
                );
                ctx.trace_block(self.id, TraceKind::ForkSwitch, target);
            } else {
                trace!(peer = %self.id, tip = %target, "extended chain");
            }
        }

        self.schedule_mining(ctx)?;
        Ok(())
    }

    /// Schedules the next block of this peer on its current target, unless
    /// one is already pending.
    fn schedule_mining(
        &mut self,
        ctx: &mut SimulationContext,
    ) -> Result<(), SamplerError> {
        if self.hash_power <= 0.0 {
            self.state = MiningState::Idle;
            return Ok(());
        }

        let target = self.private.tip();
        if self.state == (MiningState::Mining { target }) {
            return Ok(());
        }

        let mean = ctx.params.block_mean / self.hash_power;
        let delay = ctx.sampler.exponential(mean)?;
        ctx.scheduler.schedule(
            ctx.now() + delay,
            self.id,
            EventKind::BlockMined { parent: target },
        );
        self.state = MiningState::Mining { target };

        Ok(())
    }
}
