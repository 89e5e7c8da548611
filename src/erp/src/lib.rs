// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Elementary random procedures.
//!
//! This crate is the random-number facade shared by user programs and the
//! particle schedulers: an opaque, seedable generator ([`Erp`]) exposing the
//! standard distribution primitives, their log-density companions, and
//! [`log_sum_exp`].
//!
//! Every particle owns its own `Erp`. When a particle is forked, the child is
//! reseeded from a value drawn from the parent's stream ([`Erp::fork_seed`]),
//! so parent and child diverge immediately without sharing state.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution, Gamma, Normal, Poisson};

mod density;

pub use density::{
    beta_lnp, dirichlet_lnp, discrete_lnp, flip_lnp, gamma_lnp, ln_gamma, normal_lnp, poisson_lnp,
    uniform_discrete_lnp, uniform_lnp,
};

/// A seedable, forkable random number generator with distribution primitives.
///
/// The sampling parameterizations match the log-density functions in this
/// crate: [`Erp::normal`] takes a variance (not a standard deviation) and
/// [`Erp::gamma`] takes a shape and a rate (not a scale).
#[derive(Debug, Clone)]
pub struct Erp {
    rng: SmallRng,
}

impl Erp {
    /// Creates a generator seeded from OS entropy.
    pub fn new() -> Erp {
        Erp {
            rng: SmallRng::from_entropy(),
        }
    }

    /// Creates a generator with a fixed seed.
    pub fn with_seed(seed: u64) -> Erp {
        Erp {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Draws a seed for a forked child generator.
    ///
    /// Advances this generator's stream, so repeated calls yield distinct
    /// child seeds.
    pub fn fork_seed(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Samples `true` with probability `p`.
    pub fn flip(&mut self, p: f64) -> bool {
        self.rng.gen_range(0.0..1.0) < p
    }

    /// Samples uniformly from the half-open interval `[lower, upper)`.
    pub fn uniform(&mut self, lower: f64, upper: f64) -> f64 {
        self.rng.gen_range(lower..upper)
    }

    /// Samples uniformly from `0..n`.
    pub fn uniform_discrete(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Samples an index from an unnormalized probability vector.
    ///
    /// The vector is renormalized by its sum. A degenerate vector (zero or
    /// non-finite mass) falls back to a uniform draw, which is the defined
    /// behavior for uniformly bad resampling weights.
    pub fn discrete(&mut self, probs: &[f64]) -> usize {
        assert!(!probs.is_empty());
        let sum: f64 = probs.iter().sum();
        if !(sum > 0.0) || !sum.is_finite() {
            return self.uniform_discrete(probs.len());
        }
        let u = self.rng.gen_range(0.0..1.0);
        let mut cumsum = 0.0;
        for (i, p) in probs.iter().enumerate() {
            cumsum += p / sum;
            if u < cumsum {
                return i;
            }
        }
        // Rounding can leave cumsum fractionally below 1.
        probs.len() - 1
    }

    /// Samples an index from an unnormalized log-probability vector.
    pub fn discrete_log(&mut self, log_probs: &[f64]) -> usize {
        assert!(!log_probs.is_empty());
        let normalizer = log_sum_exp(log_probs);
        if !normalizer.is_finite() {
            return self.uniform_discrete(log_probs.len());
        }
        let u = self.rng.gen_range(0.0..1.0);
        let mut cumsum = 0.0;
        for (i, lp) in log_probs.iter().enumerate() {
            cumsum += (lp - normalizer).exp();
            if u < cumsum {
                return i;
            }
        }
        log_probs.len() - 1
    }

    /// Samples from a normal distribution with the given mean and variance.
    pub fn normal(&mut self, mean: f64, variance: f64) -> f64 {
        let dist = Normal::new(mean, variance.sqrt()).expect("normal requires variance >= 0");
        dist.sample(&mut self.rng)
    }

    /// Samples from a beta distribution.
    pub fn beta(&mut self, a: f64, b: f64) -> f64 {
        let dist = Beta::new(a, b).expect("beta requires positive shape parameters");
        dist.sample(&mut self.rng)
    }

    /// Samples from a gamma distribution with the given shape and rate.
    pub fn gamma(&mut self, shape: f64, rate: f64) -> f64 {
        let dist = Gamma::new(shape, 1.0 / rate).expect("gamma requires positive parameters");
        dist.sample(&mut self.rng)
    }

    /// Samples from a Poisson distribution with the given rate.
    pub fn poisson(&mut self, rate: f64) -> u64 {
        let dist = Poisson::new(rate).expect("poisson requires a positive rate");
        let x: f64 = dist.sample(&mut self.rng);
        x as u64
    }

    /// Samples from a Dirichlet distribution.
    pub fn dirichlet(&mut self, alpha: &[f64]) -> Vec<f64> {
        // Normalized independent gamma draws; avoids the degenerate-alpha
        // panics of the packaged sampler for the small concentrations
        // nonparametric programs use.
        let mut draws: Vec<f64> = alpha.iter().map(|&a| self.gamma(a, 1.0)).collect();
        let sum: f64 = draws.iter().sum();
        for x in &mut draws {
            *x /= sum;
        }
        draws
    }

    /// Samples from a symmetric Dirichlet distribution with `k` components.
    pub fn dirichlet_sym(&mut self, alpha: f64, k: usize) -> Vec<f64> {
        self.dirichlet(&vec![alpha; k])
    }
}

impl Default for Erp {
    fn default() -> Erp {
        Erp::new()
    }
}

/// Computes `log(sum(exp(values)))` without overflow or catastrophic
/// underflow, via the identity `max + log(sum(exp(x - max)))`.
///
/// An empty or uniformly `-inf` input yields `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        // Either empty, all -inf, or a +inf/NaN entry; exp-shifting would
        // produce NaN in every case, so report the extremum directly.
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn log_sum_exp_matches_naive() {
        let xs = [0.5, -1.0, 2.0, 0.0];
        let naive = xs.iter().map(|x: &f64| x.exp()).sum::<f64>().ln();
        assert!((log_sum_exp(&xs) - naive).abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp_degenerate() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(
            log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        // A single finite entry is its own log-sum.
        assert!((log_sum_exp(&[-700.0]) - -700.0).abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp_spread_weights() {
        // Entries differing by hundreds in log space must not underflow to
        // -inf: the result is dominated by the max.
        let v = log_sum_exp(&[-1000.0, 0.0]);
        assert!(v.is_finite());
        assert!((v - 0.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn log_sum_exp_naive_agreement(xs in prop::collection::vec(-30.0f64..30.0, 1..20)) {
            let naive = xs.iter().map(|x: &f64| x.exp()).sum::<f64>().ln();
            prop_assert!((log_sum_exp(&xs) - naive).abs() < 1e-12);
        }

        #[test]
        fn log_sum_exp_shift_invariant(
            xs in prop::collection::vec(-30.0f64..30.0, 1..20),
            shift in -50.0f64..50.0,
        ) {
            let shifted: Vec<f64> = xs.iter().map(|x| x + shift).collect();
            let lhs = log_sum_exp(&shifted);
            let rhs = log_sum_exp(&xs) + shift;
            prop_assert!((lhs - rhs).abs() < 1e-9);
        }
    }

    #[test]
    fn discrete_falls_back_to_uniform() {
        let mut erp = Erp::with_seed(7);
        // Zero mass and non-finite mass must still return a valid index.
        for _ in 0..100 {
            let i = erp.discrete(&[0.0, 0.0, 0.0]);
            assert!(i < 3);
            let j = erp.discrete(&[f64::NAN, 1.0]);
            assert!(j < 2);
        }
    }

    #[test]
    fn discrete_tracks_weights() {
        let mut erp = Erp::with_seed(42);
        let mut counts = [0u32; 3];
        for _ in 0..10_000 {
            counts[erp.discrete(&[1.0, 2.0, 7.0])] += 1;
        }
        assert!((f64::from(counts[2]) / 10_000.0 - 0.7).abs() < 0.03);
        assert!((f64::from(counts[0]) / 10_000.0 - 0.1).abs() < 0.03);
    }

    #[test]
    fn flip_frequency() {
        let mut erp = Erp::with_seed(1);
        let heads = (0..20_000).filter(|_| erp.flip(0.3)).count();
        assert!((heads as f64 / 20_000.0 - 0.3).abs() < 0.02);
    }

    #[test]
    fn fork_seed_diverges() {
        let mut parent = Erp::with_seed(9);
        let mut a = Erp::with_seed(parent.fork_seed());
        let mut b = Erp::with_seed(parent.fork_seed());
        let xs: Vec<f64> = (0..8).map(|_| a.uniform(0.0, 1.0)).collect();
        let ys: Vec<f64> = (0..8).map(|_| b.uniform(0.0, 1.0)).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn sampler_moments() {
        let mut erp = Erp::with_seed(3);
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| erp.normal(2.0, 9.0)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.1);
        let bmean: f64 = (0..n).map(|_| erp.beta(2.0, 6.0)).sum::<f64>() / n as f64;
        assert!((bmean - 0.25).abs() < 0.01);
        let gmean: f64 = (0..n).map(|_| erp.gamma(3.0, 2.0)).sum::<f64>() / n as f64;
        assert!((gmean - 1.5).abs() < 0.05);
        let pmean: f64 = (0..n).map(|_| erp.poisson(4.0) as f64).sum::<f64>() / n as f64;
        assert!((pmean - 4.0).abs() < 0.1);
    }

    #[test]
    fn dirichlet_sums_to_one() {
        let mut erp = Erp::with_seed(5);
        let x = erp.dirichlet(&[0.5, 1.5, 3.0]);
        assert_eq!(x.len(), 3);
        assert!((x.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(x.iter().all(|&v| v >= 0.0));
    }
}
