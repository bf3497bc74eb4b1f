//! Seeded random source for every stochastic choice in a simulation

use rand::{seq::index, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::event::SimTime;

/// Single owner of the random state of one simulation run. Every sample in a
/// run comes from here, so runs with equal seeds are identical.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: ChaCha8Rng,
    seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SamplerError {
    #[error("distribution mean {0} must be positive and finite")]
    InvalidMean(f64),
    #[error("cannot sample {wanted} distinct values out of {available}")]
    NotEnoughValues { wanted: usize, available: usize },
    #[error("range {0}..={1} is empty or not finite")]
    InvalidRange(f64, f64),
}

impl Sampler {
    pub fn from_seed(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed), seed }
    }

    /// Returns the seed used for this sampler.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draws from the exponential distribution with the given mean.
    pub fn exponential(
        &mut self,
        mean: SimTime,
    ) -> Result<SimTime, SamplerError> {
        if !(mean.is_finite() && mean > 0.0) {
            return Err(SamplerError::InvalidMean(mean));
        }

        // 1 - u lies in (0, 1], so the logarithm is finite
        let u: f64 = self.rng.gen();
        Ok(-mean * (1.0 - u).ln())
    }

    /// Draws uniformly from `low..=high`.
    pub fn uniform(
        &mut self,
        low: f64,
        high: f64,
    ) -> Result<f64, SamplerError> {
        if !(low.is_finite() && high.is_finite() && low <= high) {
            return Err(SamplerError::InvalidRange(low, high));
        }
        if low == high {
            return Ok(low);
        }

        Ok(self.rng.gen_range(low..=high))
    }

    /// Draws uniformly from `0..n`.
    ///
    /// ## Panics
    /// Panics if `n` is 0.
    #[inline]
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Returns true with probability `p`, clamped to `0.0..=1.0`.
    #[inline]
    pub fn bernoulli(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Samples `amount` distinct values from `0..length` without replacement.
    pub fn distinct(
        &mut self,
        length: usize,
        amount: usize,
    ) -> Result<Vec<usize>, SamplerError> {
        if amount > length {
            return Err(SamplerError::NotEnoughValues {
                wanted: amount,
                available: length,
            });
        }

        let mut values =
            index::sample(&mut self.rng, length, amount).into_vec();
        values.sort_unstable();

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_samples() {
        let mut a = Sampler::from_seed(7);
        let mut b = Sampler::from_seed(7);

        for _ in 0..100 {
            assert_eq!(a.exponential(2.0), b.exponential(2.0));
        }
    }

    #[test]
    fn exponential_mean_is_close() {
        let mut sampler = Sampler::from_seed(1);
        let n = 20_000;
        let mean = (0..n)
            .map(|_| sampler.exponential(10.0).unwrap())
            .sum::<f64>()
            / n as f64;

        assert!((mean - 10.0).abs() < 0.5, "sample mean {}", mean);
    }

    #[test]
    fn rejects_bad_means() {
        let mut sampler = Sampler::from_seed(0);
        for mean in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                sampler.exponential(mean),
                Err(SamplerError::InvalidMean(_))
            ));
        }
    }

    #[test]
    fn distinct_values_have_exact_count() {
        let mut sampler = Sampler::from_seed(3);
        let values = sampler.distinct(10, 4).unwrap();

        assert_eq!(values.len(), 4);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert!(sampler.distinct(3, 4).is_err());
    }
}
