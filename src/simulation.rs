/*!
Building/running simulations and analyzing the resulting data

A [`Simulation`] owns every [`Peer`] of one network together with the
[`SimulationContext`] they share: the event scheduler, the random source, the
topology and the trace. [`Simulation::run`] pops events until the horizon is
reached. Events at exactly the horizon are still dispatched, and events
scheduled past it are discarded.

Groups of independent simulations are built with [`SimulationBuilder`] and run
with [`SimulationGroup::run_all`], in parallel when the `rayon` feature is
enabled.

# Examples
```
use p2p_mining_sim::prelude::*;

let output = Simulation::new(SimulationConfig {
    horizon: 1_000.0,
    seed: 7,
    ..Default::default()
})
.and_then(Simulation::run)
.unwrap();

let reference = output.reference_peer();
assert!(reference.ledger().tip_height() > 0);
```
*/

use std::{collections::BTreeMap, num::NonZeroUsize, sync::Arc};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::info;

use crate::{
    block::{BalanceError, Block, BlockId},
    blockchain::LedgerError,
    event::{EventKind, SimTime},
    miner::Strategy,
    node::{NodeParams, Peer, PeerId},
    power_dist::{PowerDistribution, PowerDistributionError, PowerValue},
    results::ResultsBuilder,
    sampler::{Sampler, SamplerError},
    topology::{Topology, TopologyConfig, TopologyError},
    transaction::{Coins, TxnId},
};

pub mod builder;
pub mod trace;

pub use builder::{SimulationBuildError, SimulationBuilder};
use trace::{Trace, TraceEntry, TraceKind};

/// The adversary added to a network in attack mode.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackConfig {
    pub strategy: Strategy,
    /// Fraction of the total hashing power held by the adversary.
    pub hash_fraction: PowerValue,
    /// Number of honest peers the adversary is linked to.
    pub degree: usize,
    /// Whether the adversary forwards blocks mined by honest peers.
    pub relay_blocks: bool,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Selfish(crate::miner::Selfish),
            hash_fraction: 0.3,
            degree: 3,
            relay_blocks: false,
        }
    }
}

/// Complete description of a single simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub topology: TopologyConfig,
    /// How hashing power is split between honest peers.
    pub power_dist: PowerDistribution,
    pub node: NodeParams,
    /// Simulated time at which the run stops.
    pub horizon: SimTime,
    /// Coins held by every peer in the genesis block.
    pub initial_balance: Coins,
    pub attack: Option<AttackConfig>,
    pub seed: u64,
    /// Whether to keep a [`Trace`] of the run.
    pub record_trace: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            power_dist: PowerDistribution::default(),
            node: NodeParams::default(),
            horizon: 10_000.0,
            initial_balance: 100,
            attack: None,
            seed: 0,
            record_trace: true,
        }
    }
}

impl SimulationConfig {
    /// Checks every parameter of this configuration.
    pub fn validate(&self) -> Result<(), SimulationBuildError> {
        self.topology.validate()?;
        self.power_dist.validate(self.topology.peers)?;

        let positive = |value: f64| value.is_finite() && value > 0.0;
        if let Some(mean) = self.node.txn_mean {
            if !positive(mean) {
                return Err(SimulationBuildError::InvalidMean {
                    name: "transaction",
                    value: mean,
                });
            }
        }
        if !positive(self.node.block_mean) {
            return Err(SimulationBuildError::InvalidMean {
                name: "block",
                value: self.node.block_mean,
            });
        }
        if !positive(self.horizon) {
            return Err(SimulationBuildError::InvalidHorizon(self.horizon));
        }
        if self.initial_balance < 0 {
            return Err(SimulationBuildError::NegativeCoins(
                self.initial_balance,
            ));
        }
        if self.node.reward < 0 {
            return Err(SimulationBuildError::NegativeCoins(self.node.reward));
        }

        if let Some(attack) = &self.attack {
            let honest = self.topology.peers;
            if attack.degree == 0 || attack.degree > honest {
                return Err(SimulationBuildError::AdversaryDegree {
                    requested: attack.degree,
                    honest,
                });
            }
            PowerDistribution::with_adversary(&[], attack.hash_fraction)?;
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid simulation configuration")]
    Build(#[from] SimulationBuildError),
    #[error("could not build the network topology")]
    Topology(#[from] TopologyError),
    #[error("invalid mining power distribution")]
    PowerDistribution(#[from] PowerDistributionError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error("a peer produced a block its own ledger rejects")]
    Ledger(#[from] LedgerError),
    #[error("a peer produced a block with invalid balances")]
    Balance(#[from] BalanceError),
}

/// State shared by all peers of one simulation.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    pub scheduler: crate::event::Scheduler,
    pub sampler: Sampler,
    pub topology: Topology,
    pub trace: Trace,
    pub params: NodeParams,
    next_block: u64,
    next_txn: u64,
}

impl SimulationContext {
    pub fn new(
        topology: Topology,
        sampler: Sampler,
        params: NodeParams,
        record_trace: bool,
    ) -> Self {
        Self {
            scheduler: Default::default(),
            sampler,
            topology,
            trace: Trace::new(record_trace),
            params,
            next_block: BlockId::GENESIS.get() + 1,
            next_txn: 0,
        }
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn next_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    pub fn next_txn_id(&mut self) -> TxnId {
        let id = TxnId(self.next_txn);
        self.next_txn += 1;
        id
    }

    /// Sends a message of `size_bits` over the link from `from` to `to`,
    /// scheduling `kind` for `to` when it arrives.
    pub fn send(
        &mut self,
        from: PeerId,
        to: PeerId,
        size_bits: f64,
        kind: EventKind,
    ) -> Result<(), SamplerError> {
        let at = self.topology.transmit(
            from,
            to,
            size_bits,
            self.scheduler.now(),
            &mut self.sampler,
        )?;
        self.scheduler.schedule(at, to, kind);

        Ok(())
    }

    pub fn trace_block(
        &mut self,
        peer: PeerId,
        kind: TraceKind,
        block: BlockId,
    ) {
        self.trace.record(TraceEntry {
            time: self.now(),
            peer: Some(peer),
            kind,
            block: Some(block),
            txn: None,
        });
    }

    pub fn trace_txn(&mut self, peer: PeerId, kind: TraceKind, txn: TxnId) {
        self.trace.record(TraceEntry {
            time: self.now(),
            peer: Some(peer),
            kind,
            block: None,
            txn: Some(txn),
        });
    }
}

/// A single run of the network. See the [module documentation](self).
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
    ctx: SimulationContext,
    peers: Vec<Peer>,
    adversary: Option<PeerId>,
    events: usize,
    finished: bool,
}

impl Simulation {
    /// Generates the network described by `config` and schedules the first
    /// event of every peer.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let mut sampler = Sampler::from_seed(config.seed);
        let mut topology = Topology::generate(&config.topology, &mut sampler)?;

        let classes: Vec<_> =
            topology.peers().iter().map(|info| info.hash_class).collect();
        let honest = config.power_dist.values(&classes)?;

        let (powers, adversary) = match &config.attack {
            Some(attack) => {
                let id = topology.add_adversary(attack.degree, &mut sampler)?;
                let powers = PowerDistribution::with_adversary(
                    &honest,
                    attack.hash_fraction,
                )?;
                (powers, Some((id, attack)))
            }
            None => (honest, None),
        };

        let balances = vec![config.initial_balance; powers.len()];
        let genesis = Arc::new(Block::genesis(balances));
        let reward = config.node.reward;
        let mut peers: Vec<_> = powers
            .iter()
            .enumerate()
            .map(|(i, &power)| {
                let strategy = Strategy::default();
                Peer::new(PeerId(i), power, strategy, genesis.clone(), reward)
            })
            .collect();
        if let Some((id, attack)) = adversary {
            let strategy = attack.strategy.clone();
            peers[id.0] =
                Peer::new(id, powers[id.0], strategy, genesis, reward)
                    .with_block_relay(attack.relay_blocks);
        }
        let adversary = adversary.map(|(id, _)| id);

        let mut ctx = SimulationContext::new(
            topology,
            sampler,
            config.node.clone(),
            config.record_trace,
        );
        // Popped after every other event at the horizon
        ctx.scheduler.schedule(
            config.horizon,
            PeerId(0),
            EventKind::SimulationEnd,
        );
        for peer in peers.iter_mut() {
            peer.start(&mut ctx)?;
        }

        info!(
            seed = config.seed,
            peers = peers.len(),
            links = ctx.topology.links().len(),
            adversary = adversary.map(|id| id.0),
            horizon = config.horizon,
            "starting simulation"
        );

        Ok(Simulation {
            config,
            ctx,
            peers,
            adversary,
            events: 0,
            finished: false,
        })
    }

    /// Dispatches the next event. Returns its time, or `None` once the
    /// simulation has finished.
    pub fn step(&mut self) -> Result<Option<SimTime>, SimulationError> {
        if self.finished {
            return Ok(None);
        }

        let Some(event) = self.ctx.scheduler.pop_next() else {
            self.finish();
            return Ok(None);
        };
        let time = event.time;
        self.events += 1;

        match event.kind {
            EventKind::SimulationEnd => self.finish(),
            _ => {
                let peer = &mut self.peers[event.peer.0];
                peer.handle(event, &mut self.ctx)?;
            }
        }

        Ok(Some(time))
    }

    fn finish(&mut self) {
        let discarded = self.ctx.scheduler.clear();
        self.ctx.trace.record(TraceEntry {
            time: self.ctx.now(),
            peer: None,
            kind: TraceKind::SimulationEnd,
            block: None,
            txn: None,
        });
        self.finished = true;

        info!(
            time = self.ctx.now(),
            events = self.events,
            discarded,
            "simulation finished"
        );
    }

    /// Runs the simulation to its horizon.
    pub fn run(mut self) -> Result<SimulationOutput, SimulationError> {
        while self.step()?.is_some() {}

        Ok(self.into_output())
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.ctx.now()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[inline]
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    #[inline]
    pub fn adversary(&self) -> Option<PeerId> {
        self.adversary
    }

    #[inline]
    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn into_output(self) -> SimulationOutput {
        SimulationOutput {
            end_time: self.ctx.now(),
            events: self.events,
            config: self.config,
            topology: self.ctx.topology,
            peers: self.peers,
            adversary: self.adversary,
            trace: self.ctx.trace,
        }
    }
}

/// Contains the output data from a simulation.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub config: SimulationConfig,
    pub topology: Topology,
    pub peers: Vec<Peer>,
    pub adversary: Option<PeerId>,
    pub trace: Trace,
    pub end_time: SimTime,
    /// Number of events dispatched, including the end of the simulation.
    pub events: usize,
}

impl SimulationOutput {
    /// The peer whose tip is highest, lowest ID first on ties. Its preferred
    /// chain is the reference chain for revenue.
    pub fn reference_peer(&self) -> &Peer {
        self.peers
            .iter()
            .rev()
            .max_by_key(|peer| peer.ledger().tip_height())
            .expect("a simulation has at least one peer")
    }

    /// The reference chain, from genesis to tip.
    pub fn longest_chain(&self) -> Vec<BlockId> {
        self.reference_peer().ledger().longest_chain()
    }

    /// Number of blocks on the reference chain mined by each peer.
    pub fn chain_blocks_by_peer(&self) -> BTreeMap<PeerId, usize> {
        let ledger = self.reference_peer().ledger();
        let mut blocks = BTreeMap::new();
        for id in ledger.longest_chain() {
            if let Some(miner) = ledger[id].block.miner_id {
                *blocks.entry(miner).or_default() += 1;
            }
        }

        blocks
    }

    /// Share of the reference chain, excluding genesis, mined by `peer`.
    pub fn revenue_of(&self, peer: PeerId) -> f64 {
        let length = self.reference_peer().ledger().tip_height();
        if length == 0 {
            return 0.0;
        }

        let blocks = self.chain_blocks_by_peer();
        let mined = blocks.get(&peer).copied().unwrap_or(0);
        mined as f64 / length as f64
    }

    /// Number of blocks mined during the run, including withheld ones.
    pub fn blocks_mined(&self) -> usize {
        self.peers.iter().map(|peer| peer.private_chain().mined().len()).sum()
    }

    /// Mined blocks which did not end up on the reference chain.
    pub fn stale_blocks(&self) -> usize {
        let on_chain = self.reference_peer().ledger().tip_height() as usize;
        self.blocks_mined().saturating_sub(on_chain)
    }

    /// Total number of fork switches of all honest peers.
    pub fn fork_switches(&self) -> usize {
        self.honest_peers().map(Peer::fork_switches).sum()
    }

    pub fn honest_peers(&self) -> impl Iterator<Item = &Peer> + '_ {
        self.peers
            .iter()
            .filter(move |peer| Some(peer.id()) != self.adversary)
    }

    pub fn adversary_peer(&self) -> Option<&Peer> {
        self.adversary.map(|id| &self.peers[id.0])
    }

    /// Hashing power of the adversary, or 0 without one.
    pub fn adversary_power(&self) -> PowerValue {
        self.adversary_peer().map_or(0.0, Peer::hash_power)
    }
}

/// Container for a group of independent simulations. Simulations should be
/// run using this struct's `run_all` method.
#[derive(Debug, Clone)]
pub struct SimulationGroup {
    configs: Vec<SimulationConfig>,
    repeat_all: NonZeroUsize,
}

impl SimulationGroup {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// Configurations of every run, repeated runs grouped together.
    pub fn configs(&self) -> &[SimulationConfig] {
        &self.configs
    }

    pub fn run_all(self) -> Result<ResultsBuilder, SimulationError> {
        let SimulationGroup { configs, repeat_all } = self;

        #[cfg(feature = "rayon")]
        let iter = configs.into_par_iter();
        #[cfg(not(feature = "rayon"))]
        let iter = configs.into_iter();

        let outputs: Result<Vec<_>, _> = iter
            .map(|config| Simulation::new(config).and_then(Simulation::run))
            .collect();

        Ok(ResultsBuilder::new(outputs?, repeat_all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TxnArrival;

    fn small_config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            topology: TopologyConfig { peers: 6, ..Default::default() },
            horizon: 500.0,
            node: NodeParams { block_mean: 20.0, ..Default::default() },
            seed,
            ..Default::default()
        }
    }

    #[test]
    fn same_seed_same_run() {
        let run = |config| Simulation::new(config).and_then(Simulation::run);
        let a = run(small_config(3)).unwrap();
        let b = run(small_config(3)).unwrap();

        assert_eq!(a.trace.entries(), b.trace.entries());
        assert_eq!(a.longest_chain(), b.longest_chain());
    }

    #[test]
    fn step_stops_at_horizon() {
        let mut sim = Simulation::new(small_config(1)).unwrap();
        let mut last = 0.0;
        while let Some(time) = sim.step().unwrap() {
            assert!(time >= last);
            assert!(time <= 500.0);
            last = time;
        }

        assert!(sim.is_finished());
        assert_eq!(sim.now(), 500.0);
        assert!(sim.context().scheduler.is_empty());
        assert_eq!(sim.step().unwrap(), None);
    }

    #[test]
    fn events_at_horizon_are_dispatched() {
        let mut config = small_config(4);
        config.node.txn_mean = None;
        let mut sim = Simulation::new(config).unwrap();
        sim.ctx.scheduler.schedule(
            500.0,
            PeerId(0),
            EventKind::TransactionArrival(TxnArrival::Generated),
        );

        let output = sim.run().unwrap();
        let generated: Vec<_> = output
            .trace
            .of_kind(TraceKind::TransactionGenerated)
            .map(|entry| entry.time)
            .collect();
        assert_eq!(generated, vec![500.0]);
        assert_eq!(output.end_time, 500.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SimulationConfig { horizon: -1.0, ..Default::default() };
        assert!(matches!(
            Simulation::new(config),
            Err(SimulationError::Build(SimulationBuildError::InvalidHorizon(_)))
        ));

        let attack = AttackConfig { degree: 0, ..Default::default() };
        let config =
            SimulationConfig { attack: Some(attack), ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(SimulationBuildError::AdversaryDegree { requested: 0, .. })
        ));
    }

    #[test]
    fn adversary_power_is_validated() {
        for hash_fraction in [1.5, 1.0, -0.1, f64::NAN] {
            let attack = AttackConfig { hash_fraction, ..Default::default() };
            let config =
                SimulationConfig { attack: Some(attack), ..Default::default() };

            assert!(matches!(
                config.validate(),
                Err(SimulationBuildError::PowerDistribution(
                    PowerDistributionError::BadAdversaryPower(_)
                ))
            ));
        }

        let attack = AttackConfig { hash_fraction: 0.0, ..Default::default() };
        let config =
            SimulationConfig { attack: Some(attack), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn adversary_is_last_peer() {
        let config = SimulationConfig {
            attack: Some(AttackConfig {
                hash_fraction: 0.25,
                ..Default::default()
            }),
            ..small_config(2)
        };
        let sim = Simulation::new(config).unwrap();

        assert_eq!(sim.adversary(), Some(PeerId(6)));
        assert_eq!(sim.peers().len(), 7);
        assert_eq!(sim.peers()[6].hash_power(), 0.25);
        let total: PowerValue = sim.peers().iter().map(Peer::hash_power).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
