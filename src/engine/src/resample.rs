// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Offspring-count resamplers over a weighted particle set.
//!
//! Given unnormalized per-slot log-weights, a resampler assigns each slot an
//! offspring count such that the counts sum to the particle budget:
//! high-weight slots reproduce, low-weight slots die. All arithmetic runs
//! through [`log_sum_exp`], so weight vectors differing by hundreds of nats
//! are handled without underflow; a degenerate vector (uniformly `-inf`)
//! falls back to uniform resampling.

use ppl_erp::{log_sum_exp, Erp};

/// The effective sample size of a weight vector, `1 / sum(p_i^2)`.
///
/// For a degenerate vector the normalized weights are taken as uniform, so
/// the ESS is the slot count and no adaptive resampler will trigger.
pub fn ess(log_weights: &[f64]) -> f64 {
    let n = log_weights.len() as f64;
    let normalization = log_sum_exp(log_weights);
    if !normalization.is_finite() {
        return n;
    }
    let sum_sq: f64 = log_weights
        .iter()
        .map(|w| (w - normalization).exp().powi(2))
        .sum();
    1.0 / sum_sq
}

/// Normalized probabilities from unnormalized log-weights, with the uniform
/// fallback for degenerate input.
fn sampling_dist(log_weights: &[f64]) -> Vec<f64> {
    let normalization = log_sum_exp(log_weights);
    if !normalization.is_finite() {
        return vec![1.0 / log_weights.len() as f64; log_weights.len()];
    }
    log_weights
        .iter()
        .map(|w| (w - normalization).exp())
        .collect()
}

/// Multinomial resampling: draws `draws` independent categorical samples
/// from the normalized weights and returns per-slot offspring counts.
pub fn multinomial(erp: &mut Erp, log_weights: &[f64], draws: usize) -> Vec<usize> {
    let dist = sampling_dist(log_weights);
    let mut n_offspring = vec![0; log_weights.len()];
    for _ in 0..draws {
        n_offspring[erp.discrete(&dist)] += 1;
    }
    n_offspring
}

/// Multinomial resampling for conditional SMC: samples `N - 1` offspring
/// over all `N` slots, then pins one additional offspring to the retained
/// slot (the last one), so the retained lineage always survives.
pub fn multinomial_pinned(erp: &mut Erp, log_weights: &[f64]) -> Vec<usize> {
    let n = log_weights.len();
    let mut n_offspring = multinomial(erp, log_weights, n - 1);
    n_offspring[n - 1] += 1;
    assert_eq!(n_offspring.iter().sum::<usize>(), n);
    n_offspring
}

/// Residual resampling: assigns each slot `floor(N * p_i)` offspring
/// deterministically, then distributes the remainder multinomially.
pub fn residual(erp: &mut Erp, log_weights: &[f64]) -> Vec<usize> {
    let n = log_weights.len();
    let dist = sampling_dist(log_weights);
    let mut n_offspring: Vec<usize> = dist.iter().map(|p| (n as f64 * p) as usize).collect();
    let mut remainder = n - n_offspring.iter().sum::<usize>();
    while remainder > 0 {
        n_offspring[erp.discrete(&dist)] += 1;
        remainder -= 1;
    }
    assert_eq!(n_offspring.iter().sum::<usize>(), n);
    n_offspring
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn ess_extremes() {
        // Equal weights: ESS is N. One dominant weight: ESS approaches 1.
        assert!((ess(&[0.0; 8]) - 8.0).abs() < 1e-9);
        assert!((ess(&[0.0, -200.0, -200.0]) - 1.0).abs() < 1e-6);
        // Degenerate vector: uniform fallback.
        assert_eq!(ess(&[f64::NEG_INFINITY; 5]), 5.0);
    }

    #[test]
    fn multinomial_concentrates_on_heavy_slots() {
        let mut erp = Erp::with_seed(11);
        // One slot carries essentially all the mass.
        let weights = [-300.0, 0.0, -300.0, -300.0];
        let counts = multinomial(&mut erp, &weights, 4);
        assert_eq!(counts[1], 4);
    }

    #[test]
    fn degenerate_weights_resample_uniformly() {
        let mut erp = Erp::with_seed(13);
        let weights = [f64::NEG_INFINITY; 10];
        let mut totals = vec![0usize; 10];
        for _ in 0..200 {
            for (slot, k) in multinomial(&mut erp, &weights, 10).iter().enumerate() {
                totals[slot] += k;
            }
        }
        // 2000 draws over 10 slots; every slot should be hit.
        assert!(totals.iter().all(|&t| t > 100));
    }

    #[test]
    fn residual_keeps_integer_part() {
        let mut erp = Erp::with_seed(17);
        // p = [0.5, 0.25, 0.25] over budget 3: the floor pass guarantees the
        // heavy slot at least one offspring before the remainder draws.
        let weights = [2f64.ln(), 0.0, 0.0];
        let counts = residual(&mut erp, &weights);
        assert_eq!(counts.iter().sum::<usize>(), 3);
        assert!(counts[0] >= 1);
    }

    proptest! {
        #[test]
        fn multinomial_preserves_budget(
            weights in prop::collection::vec(-400.0f64..100.0, 1..40),
            seed in 0u64..1000,
        ) {
            let mut erp = Erp::with_seed(seed);
            let n = weights.len();
            let counts = multinomial(&mut erp, &weights, n);
            prop_assert_eq!(counts.iter().sum::<usize>(), n);
        }

        #[test]
        fn residual_preserves_budget(
            weights in prop::collection::vec(-400.0f64..100.0, 1..40),
            seed in 0u64..1000,
        ) {
            let mut erp = Erp::with_seed(seed);
            let counts = residual(&mut erp, &weights);
            prop_assert_eq!(counts.iter().sum::<usize>(), weights.len());
        }

        #[test]
        fn pinned_multinomial_keeps_retained_slot(
            weights in prop::collection::vec(-400.0f64..100.0, 2..40),
            seed in 0u64..1000,
        ) {
            let mut erp = Erp::with_seed(seed);
            let n = weights.len();
            let counts = multinomial_pinned(&mut erp, &weights);
            prop_assert_eq!(counts.iter().sum::<usize>(), n);
            prop_assert!(counts[n - 1] >= 1);
        }
    }
}
