//! Describing distributions of hashing power

use crate::topology::HashClass;

/// Numeric type used to represent hashing power.
pub type PowerValue = f64;

/// Ratio between the hashing power of a high-hash and a low-hash peer.
pub const HIGH_TO_LOW_RATIO: PowerValue = 10.0;

/// Determines how hashing power is distributed between honest peers during a
/// simulation.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum PowerDistribution {
    /// Weight peers by their [`HashClass`], with high-hash peers holding
    /// [`HIGH_TO_LOW_RATIO`] times the power of low-hash peers.
    #[default]
    Classes,
    /// Weight each peer equally.
    Equal,
    /// Set all hashing power values to those in the given vector.
    SetValues(Vec<PowerValue>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PowerDistributionError {
    #[error("distribution values sum to {0}, not 1.0")]
    BadDistributionSum(PowerValue),
    #[error("power value {0} is not in the range 0.0..=1.0")]
    BadPowerValue(PowerValue),
    #[error("power distribution size {0} does not match peer count {1}")]
    WrongNumPeers(usize, usize),
    #[error("cannot create a distribution for zero peers")]
    ZeroPeersGiven,
    #[error("adversary power {0} is not in the range 0.0..1.0")]
    BadAdversaryPower(PowerValue),
}

impl PowerDistribution {
    /// Allowable difference between a distribution sum and 1.0.
    const EPSILON_POWER: PowerValue = 1e-6;

    /// Returns true if the discrete distribution described by this
    /// [`PowerDistribution`] is valid over `num_peers`.
    #[inline]
    pub fn is_valid(&self, num_peers: usize) -> bool {
        self.validate(num_peers).is_ok()
    }

    /// Checks if the discrete distribution described by this
    /// [`PowerDistribution`] is valid over `num_peers`.
    pub fn validate(
        &self,
        num_peers: usize,
    ) -> Result<(), PowerDistributionError> {
        use PowerDistributionError::*;

        if num_peers == 0 {
            return Err(ZeroPeersGiven);
        }

        match &self {
            Self::Classes | Self::Equal => Ok(()),
            Self::SetValues(dist) => {
                if dist.len() != num_peers {
                    return Err(WrongNumPeers(dist.len(), num_peers));
                }

                if let Some(&val) = dist
                    .iter()
                    .find(|&x| x.is_nan() || !(0.0..=1.0).contains(x))
                {
                    return Err(BadPowerValue(val));
                }

                let sum = dist.iter().sum();
                if PowerValue::abs(sum - 1.0) > Self::EPSILON_POWER {
                    return Err(BadDistributionSum(sum));
                }

                Ok(())
            }
        }
    }

    /// Returns the hashing power of each honest peer, given the peers' hash
    /// classes in order of ID.
    pub fn values(
        &self,
        classes: &[HashClass],
    ) -> Result<Vec<PowerValue>, PowerDistributionError> {
        let n = classes.len();
        self.validate(n)?;

        Ok(match &self {
            Self::Equal => vec![1.0 / n as PowerValue; n],
            Self::SetValues(dist) => dist.clone(),
            Self::Classes => {
                let weight = |class: &HashClass| match class {
                    HashClass::Low => 1.0,
                    HashClass::High => HIGH_TO_LOW_RATIO,
                };
                let total: PowerValue = classes.iter().map(weight).sum();

                classes.iter().map(|c| weight(c) / total).collect()
            }
        })
    }

    /// Returns the distribution in which an adversary appended after the
    /// honest peers holds `adversary`, and the honest peers share the rest in
    /// proportion to `honest`.
    pub fn with_adversary(
        honest: &[PowerValue],
        adversary: PowerValue,
    ) -> Result<Vec<PowerValue>, PowerDistributionError> {
        if adversary.is_nan() || !(0.0..1.0).contains(&adversary) {
            return Err(PowerDistributionError::BadAdversaryPower(adversary));
        }

        let mut dist: Vec<_> =
            honest.iter().map(|p| p * (1.0 - adversary)).collect();
        dist.push(adversary);

        Ok(dist)
    }
}

/// Helper trait for turning inclusive integer ranges into percentages.
/// # Example
/// ```
/// use p2p_mining_sim::power_dist::Percent;
///
/// for p in (0..=10).percent() {
///    println!("{}", p);
/// }
/// ```
pub trait Percent {
    /// Returns an iterator over percentage values. Can be used with
    /// [`SimulationBuilder`](crate::simulation::SimulationBuilder) to sweep
    /// adversary hashing power.
    fn percent(self) -> impl Iterator<Item = PowerValue>;
}

impl Percent for std::ops::RangeInclusive<usize> {
    fn percent(self) -> impl Iterator<Item = PowerValue> {
        assert!(
            (0..=100).contains(self.start()) && (0..=100).contains(self.end()),
            "invalid percent range {} to {}",
            self.start(),
            self.end()
        );

        self.map(|n| n as PowerValue / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_dist_equal_power() {
        assert_eq!(
            PowerDistribution::Equal.values(&[HashClass::Low; 4]).unwrap(),
            vec![0.25, 0.25, 0.25, 0.25]
        )
    }

    #[test]
    fn high_hash_peers_get_ten_times_the_power() {
        use HashClass::*;

        let values =
            PowerDistribution::Classes.values(&[Low, High, Low, High]).unwrap();
        assert!((values[1] / values[0] - HIGH_TO_LOW_RATIO).abs() < 1e-9);
        assert!((values.iter().sum::<PowerValue>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bad_values_are_rejected() {
        let dist = PowerDistribution::SetValues(vec![0.5, 0.6]);
        assert!(matches!(
            dist.validate(2),
            Err(PowerDistributionError::BadDistributionSum(_))
        ));
        assert!(!PowerDistribution::Equal.is_valid(0));
        assert!(PowerDistribution::with_adversary(&[1.0], 1.0).is_err());
    }

    #[test]
    fn adversary_takes_its_share() {
        let dist = PowerDistribution::with_adversary(&[0.5, 0.5], 0.4).unwrap();

        assert_eq!(dist.len(), 3);
        assert!((dist[0] - 0.3).abs() < 1e-9);
        assert_eq!(dist[2], 0.4);
    }
}
