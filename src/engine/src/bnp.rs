// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Nonparametric process helpers: the Pólya urn and stick breaking.
//!
//! Both are plain per-particle data structures; like [`Memo`](crate::mem::Memo)
//! they clone with the particle, so lineages evolve their own cluster
//! assignments.

use ppl_erp::Erp;

/// A Pólya urn (Chinese restaurant process) over cluster indices.
///
/// Each draw joins an existing cluster with probability proportional to its
/// occupancy, or opens a new one with probability proportional to the
/// concentration.
#[derive(Debug, Clone)]
pub struct PolyaUrn {
    concentration: f64,
    counts: Vec<u32>,
    total: u32,
}

impl PolyaUrn {
    pub fn new(concentration: f64) -> PolyaUrn {
        assert!(concentration > 0.0);
        PolyaUrn {
            concentration,
            counts: Vec::new(),
            total: 0,
        }
    }

    /// Draws a cluster index, updating the occupancy counts.
    pub fn draw(&mut self, erp: &mut Erp) -> usize {
        if self.counts.is_empty() {
            self.counts.push(1);
            self.total = 1;
            return 0;
        }
        let denominator = self.concentration + f64::from(self.total);
        let mut dist: Vec<f64> = self
            .counts
            .iter()
            .map(|&c| f64::from(c) / denominator)
            .collect();
        dist.push(self.concentration / denominator);
        let bucket = erp.discrete(&dist);
        if bucket < self.counts.len() {
            self.counts[bucket] += 1;
        } else {
            self.counts.push(1);
        }
        self.total += 1;
        bucket
    }

    /// Number of occupied clusters.
    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    /// Total draws made from the urn.
    pub fn num_draws(&self) -> u32 {
        self.total
    }
}

/// A stick-breaking representation of a Dirichlet process.
///
/// Stick proportions are drawn lazily: a draw walks the sticks broken so
/// far and extends the sequence only when the uniform variate falls past
/// them, so the state stays finite.
#[derive(Debug, Clone)]
pub struct StickBreaking {
    concentration: f64,
    sticks: Vec<f64>,
}

impl StickBreaking {
    pub fn new(concentration: f64) -> StickBreaking {
        assert!(concentration > 0.0);
        StickBreaking {
            concentration,
            sticks: Vec::new(),
        }
    }

    /// Draws an index from the stick-breaking weights.
    pub fn draw(&mut self, erp: &mut Erp) -> usize {
        let u = erp.uniform(0.0, 1.0);
        let mut cumulative = 0.0;
        let mut remaining = 1.0;
        let mut i = 0;
        loop {
            if i == self.sticks.len() {
                self.sticks.push(erp.beta(1.0, self.concentration));
            }
            let weight = self.sticks[i] * remaining;
            if u < cumulative + weight {
                return i;
            }
            cumulative += weight;
            remaining *= 1.0 - self.sticks[i];
            i += 1;
        }
    }

    /// Number of sticks broken so far.
    pub fn num_sticks(&self) -> usize {
        self.sticks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urn_grows_rich_get_richer() {
        let mut erp = Erp::with_seed(2);
        let mut urn = PolyaUrn::new(1.0);
        assert_eq!(urn.draw(&mut erp), 0);
        for _ in 0..99 {
            let bucket = urn.draw(&mut erp);
            assert!(bucket < urn.num_classes());
        }
        assert_eq!(urn.num_draws(), 100);
        // With concentration 1, E[classes] after n draws is about ln(n): far
        // fewer than draws.
        assert!(urn.num_classes() >= 1);
        assert!(urn.num_classes() < 30);
    }

    #[test]
    fn urn_expected_new_table_rate() {
        // Second draw opens a new cluster with probability c / (c + 1).
        let mut news = 0;
        for seed in 0..2000 {
            let mut erp = Erp::with_seed(seed);
            let mut urn = PolyaUrn::new(1.0);
            urn.draw(&mut erp);
            if urn.draw(&mut erp) == 1 {
                news += 1;
            }
        }
        let rate = f64::from(news) / 2000.0;
        assert!((rate - 0.5).abs() < 0.05, "rate = {}", rate);
    }

    #[test]
    fn sticks_extend_lazily() {
        let mut erp = Erp::with_seed(4);
        let mut sticks = StickBreaking::new(1.0);
        let mut max_index = 0;
        for _ in 0..200 {
            max_index = max_index.max(sticks.draw(&mut erp));
        }
        assert!(sticks.num_sticks() >= max_index + 1);
        assert!(sticks.num_sticks() < 100);
    }
}
