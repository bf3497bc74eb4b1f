use std::{num::NonZeroUsize, ops::RangeInclusive};

use crate::{
    event::SimTime,
    miner::Strategy,
    power_dist::{PowerDistribution, PowerDistributionError, PowerValue},
    topology::{LinkModel, LinkSpeedPolicy, TopologyError},
    transaction::Coins,
};

use super::{AttackConfig, SimulationConfig, SimulationGroup};

/// Builds a [`SimulationGroup`].
///
/// Every option not set explicitly keeps the value of
/// [`SimulationConfig::default`]. When an adversary is added, one group of
/// runs is created for each adversary power value, in the order the values
/// were given.
///
/// # Examples
/// ```
/// use p2p_mining_sim::prelude::*;
///
/// let group = SimulationBuilder::new()
///     .peers(8)
///     .slow_peers(4)
///     .horizon(2_000.0)
///     .adversary(Strategy::Selfish(Selfish))
///     .adversary_power_iter((10..=30).step_by(10).map(|p| p as f64 / 100.0))
///     .repeat_all(2)
///     .build()
///     .unwrap();
///
/// assert_eq!(group.configs().len(), 6);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimulationBuilder {
    config: SimulationConfig,
    adversary: Option<Strategy>,
    adversary_degree: Option<usize>,
    adversary_relays_blocks: bool,
    adversary_powers: Vec<PowerValue>,
    repeat_all: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationBuildError {
    #[error("{name} inter-arrival mean {value} must be positive and finite")]
    InvalidMean { name: &'static str, value: SimTime },
    #[error("simulation horizon {0} must be positive and finite")]
    InvalidHorizon(SimTime),
    #[error("coin amount {0} must not be negative")]
    NegativeCoins(Coins),
    #[error("adversary degree {requested} must be in 1..={honest}")]
    AdversaryDegree { requested: usize, honest: usize },
    #[error("an adversary strategy was given without any adversary power")]
    NoAdversaryPower,
    #[error("adversary power was given without an adversary strategy")]
    NoAdversary,
    #[error("cannot repeat simulations 0 times")]
    ZeroRepeats,
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    PowerDistribution(#[from] PowerDistributionError),
}

impl SimulationBuilder {
    /// Creates a new [`SimulationBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of honest peers (default 10).
    pub fn peers(mut self, peers: usize) -> Self {
        self.config.topology.peers = peers;

        self
    }

    /// Sets how many honest peers have slow links.
    pub fn slow_peers(mut self, slow: usize) -> Self {
        self.config.topology.slow_peers = slow;

        self
    }

    /// Sets how many honest peers have low hashing power.
    pub fn low_hash_peers(mut self, low: usize) -> Self {
        self.config.topology.low_hash_peers = low;

        self
    }

    /// Sets the allowed number of neighbors of each honest peer.
    pub fn degree(mut self, degree: RangeInclusive<usize>) -> Self {
        self.config.topology.degree = degree;

        self
    }

    /// Sets how many random topologies may be rejected before giving up.
    pub fn retry_budget(mut self, budget: usize) -> Self {
        self.config.topology.retry_budget = budget;

        self
    }

    pub fn link_speed(mut self, policy: LinkSpeedPolicy) -> Self {
        self.config.topology.link_speed = policy;

        self
    }

    pub fn link_model(mut self, model: LinkModel) -> Self {
        self.config.topology.link_model = model;

        self
    }

    /// Splits honest hashing power according to `dist`.
    pub fn power_dist(mut self, dist: PowerDistribution) -> Self {
        self.config.power_dist = dist;

        self
    }

    /// Sets the mean time between transactions of a single peer.
    pub fn txn_mean(mut self, mean: SimTime) -> Self {
        self.config.node.txn_mean = Some(mean);

        self
    }

    /// Disables transaction generation.
    pub fn no_transactions(mut self) -> Self {
        self.config.node.txn_mean = None;

        self
    }

    /// Sets the mean time between blocks of the whole network.
    pub fn block_mean(mut self, mean: SimTime) -> Self {
        self.config.node.block_mean = mean;

        self
    }

    /// Sets the maximum number of transactions per block.
    pub fn max_block_txns(mut self, max: usize) -> Self {
        self.config.node.max_block_txns = max;

        self
    }

    pub fn reward(mut self, reward: Coins) -> Self {
        self.config.node.reward = reward;

        self
    }

    pub fn initial_balance(mut self, balance: Coins) -> Self {
        self.config.initial_balance = balance;

        self
    }

    pub fn max_orphan_retries(mut self, retries: usize) -> Self {
        self.config.node.max_orphan_retries = retries;

        self
    }

    /// Sets the simulated time at which every run stops.
    pub fn horizon(mut self, horizon: SimTime) -> Self {
        self.config.horizon = horizon;

        self
    }

    /// Sets the seed of the first run. Repeated runs use consecutive seeds.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;

        self
    }

    pub fn record_trace(mut self, record: bool) -> Self {
        self.config.record_trace = record;

        self
    }

    /// Adds an adversary peer following `strategy`.
    pub fn adversary(mut self, strategy: Strategy) -> Self {
        self.adversary = Some(strategy);

        self
    }

    /// Sets the number of honest peers the adversary is linked to.
    pub fn adversary_degree(mut self, degree: usize) -> Self {
        self.adversary_degree = Some(degree);

        self
    }

    /// Makes the adversary forward blocks mined by honest peers.
    pub fn adversary_relays_blocks(mut self, relay: bool) -> Self {
        self.adversary_relays_blocks = relay;

        self
    }

    /// Runs the simulation with the adversary holding `power` of the total
    /// hashing power.
    pub fn adversary_power(mut self, power: PowerValue) -> Self {
        self.adversary_powers.push(power);

        self
    }

    /// Call `SimulationBuilder::adversary_power` once for each element of
    /// `values`.
    pub fn adversary_power_iter<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = PowerValue>,
    {
        self.adversary_powers.extend(values);

        self
    }

    /// Each configured simulation will be run `times` times, with
    /// consecutive seeds.
    pub fn repeat_all(mut self, times: usize) -> Self {
        self.repeat_all = Some(times);

        self
    }

    /// Creates a [`SimulationGroup`] from the specified parameters.
    pub fn build(self) -> Result<SimulationGroup, SimulationBuildError> {
        use SimulationBuildError::{NoAdversary, NoAdversaryPower, ZeroRepeats};

        let SimulationBuilder {
            config,
            adversary,
            adversary_degree,
            adversary_relays_blocks,
            adversary_powers,
            repeat_all,
        } = self;

        let repeat_all = match repeat_all {
            Some(times) => NonZeroUsize::new(times).ok_or(ZeroRepeats)?,
            None => NonZeroUsize::MIN,
        };

        let bases: Vec<SimulationConfig> = match adversary {
            None if !adversary_powers.is_empty() => return Err(NoAdversary),
            None => vec![config],
            Some(_) if adversary_powers.is_empty() => {
                return Err(NoAdversaryPower)
            }
            Some(strategy) => {
                let degree =
                    adversary_degree.unwrap_or(AttackConfig::default().degree);
                adversary_powers
                    .into_iter()
                    .map(|hash_fraction| SimulationConfig {
                        attack: Some(AttackConfig {
                            strategy: strategy.clone(),
                            hash_fraction,
                            degree,
                            relay_blocks: adversary_relays_blocks,
                        }),
                        ..config.clone()
                    })
                    .collect()
            }
        };

        let mut configs = vec![];
        for base in bases {
            base.validate()?;
            for r in 0..repeat_all.get() {
                configs.push(SimulationConfig {
                    seed: base.seed.wrapping_add(r as u64),
                    ..base.clone()
                });
            }
        }

        Ok(SimulationGroup { configs, repeat_all })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::Stubborn;

    #[test]
    fn example_build() {
        let group = SimulationBuilder::new()
            .build()
            .expect("valid simulation build");

        assert_eq!(group.configs().len(), 1);
        assert!(group.configs()[0].attack.is_none());
    }

    #[test]
    fn repeats_use_consecutive_seeds() {
        let group = SimulationBuilder::new()
            .seed(10)
            .adversary(Strategy::Stubborn(Stubborn::new()))
            .adversary_power_iter([0.1, 0.2])
            .repeat_all(3)
            .build()
            .unwrap();

        let seeds: Vec<_> = group.configs().iter().map(|c| c.seed).collect();
        assert_eq!(seeds, vec![10, 11, 12, 10, 11, 12]);
        let attack = group.configs()[3].attack.as_ref().unwrap();
        assert_eq!(attack.hash_fraction, 0.2);
    }

    #[test]
    fn bad_options_are_rejected() {
        use SimulationBuildError::*;

        assert_eq!(
            SimulationBuilder::new().repeat_all(0).build().unwrap_err(),
            ZeroRepeats
        );
        assert_eq!(
            SimulationBuilder::new().adversary_power(0.3).build().unwrap_err(),
            NoAdversary
        );
        assert!(matches!(
            SimulationBuilder::new().block_mean(0.0).build(),
            Err(InvalidMean { name: "block", .. })
        ));
        assert!(matches!(
            SimulationBuilder::new().peers(5).slow_peers(6).build(),
            Err(Topology(TopologyError::TooManySlowPeers { .. }))
        ));
        assert!(matches!(
            SimulationBuilder::new()
                .adversary(Strategy::default())
                .adversary_degree(11)
                .adversary_power(0.1)
                .build(),
            Err(AdversaryDegree { requested: 11, honest: 10 })
        ));
    }
}
