// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Demo probabilistic programs.
//!
//! Each model is a [`Model`] state machine: `resume` runs the program
//! forward to its next synchronizing observe. The models here are the
//! classic small benchmarks — coin flips, the tricky coin, a Gaussian with
//! unknown mean, a three-state HMM, a Poisson/Fibonacci branching program,
//! and a CRP mixture — and each has a companion binary exposing the engine's
//! scheduler subcommands.

use ppl_engine::bnp::PolyaUrn;
use ppl_engine::mem::Memo;
use ppl_engine::{Model, Step, Trace};
use ppl_erp::{flip_lnp, normal_lnp, poisson_lnp};

/// Beta-Bernoulli coin: observes heads, heads, tails under a uniform prior,
/// so the posterior over `p` is Beta(3, 2) with mean 0.6.
#[derive(Debug, Clone, Default)]
pub struct CoinFlip {
    p: f64,
    observed: u8,
}

impl Model for CoinFlip {
    fn resume(&mut self, trace: &mut Trace) -> Step {
        const FLIPS: [bool; 3] = [true, true, false];
        if self.observed == 0 {
            self.p = trace.erp().beta(1.0, 1.0);
        }
        if usize::from(self.observed) < FLIPS.len() {
            let x = FLIPS[usize::from(self.observed)];
            self.observed += 1;
            return Step::Observe(flip_lnp(x, self.p));
        }
        trace.predict("p", format!("{:.4}", self.p));
        Step::Done
    }
}

/// The "tricky coin" example: a coin is tricky with prior probability 0.1,
/// in which case its bias is uniform; five heads are observed.
#[derive(Debug, Clone, Default)]
pub struct TrickyCoin {
    is_tricky: bool,
    theta: f64,
    observed: u8,
}

impl Model for TrickyCoin {
    fn resume(&mut self, trace: &mut Trace) -> Step {
        if self.observed == 0 {
            self.is_tricky = trace.erp().flip(0.1);
            self.theta = if self.is_tricky {
                trace.erp().beta(1.0, 1.0)
            } else {
                0.5
            };
        }
        if self.observed < 5 {
            self.observed += 1;
            return Step::Observe(flip_lnp(true, self.theta));
        }
        trace.predict("is_tricky", u8::from(self.is_tricky));
        trace.predict("theta", format!("{:.4}", self.theta));
        Step::Done
    }
}

/// Gaussian with unknown mean: `mu ~ N(1, 5)`, observations 9 and 8 with
/// variance 2. The analytic posterior mean is (0.2·1 + 17/2) / 1.2 = 7.25.
#[derive(Debug, Clone, Default)]
pub struct GaussianMean {
    mu: f64,
    observed: u8,
}

impl GaussianMean {
    pub const VARIANCE: f64 = 2.0;
    pub const DATA: [f64; 2] = [9.0, 8.0];
}

impl Model for GaussianMean {
    fn resume(&mut self, trace: &mut Trace) -> Step {
        if self.observed == 0 {
            self.mu = trace.erp().normal(1.0, 5.0);
        }
        if usize::from(self.observed) < Self::DATA.len() {
            let x = Self::DATA[usize::from(self.observed)];
            self.observed += 1;
            return Step::Observe(normal_lnp(x, self.mu, Self::VARIANCE));
        }
        trace.predict("mu", self.mu);
        Step::Done
    }
}

/// A three-state hidden Markov model with unit-variance Gaussian emissions
/// and 17 latent states, observed at steps 1 through 16.
#[derive(Debug, Clone, Default)]
pub struct Hmm {
    states: Vec<usize>,
    next: usize,
    pending: Option<usize>,
}

impl Hmm {
    pub const K: usize = 3;
    pub const N: usize = 17;
    pub const TRANSITION: [[f64; 3]; 3] = [
        [0.1, 0.5, 0.4],
        [0.2, 0.2, 0.6],
        [0.15, 0.15, 0.7],
    ];
    /// `DATA[0]` is unused: the initial state is unobserved.
    pub const DATA: [f64; 17] = [
        f64::NAN,
        0.9,
        0.8,
        0.7,
        0.0,
        -0.025,
        -5.0,
        -2.0,
        -0.1,
        0.0,
        0.13,
        0.45,
        6.0,
        0.2,
        0.3,
        -1.0,
        -1.0,
    ];
    pub const INITIAL_STATE: [f64; 3] = [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0];
    pub const STATE_MEAN: [f64; 3] = [-1.0, 1.0, 0.0];
}

impl Model for Hmm {
    fn resume(&mut self, trace: &mut Trace) -> Step {
        // The predict for step n lands after step n's observe returns, so a
        // particle killed at that observe never reports the state.
        if let Some(n) = self.pending.take() {
            trace.predict(&format!("state[{}]", n), self.states[n]);
        }
        if self.next == 0 {
            let s = trace.erp().discrete(&Self::INITIAL_STATE);
            self.states.push(s);
            trace.predict("state[0]", s);
            self.next = 1;
        }
        if self.next < Self::N {
            let n = self.next;
            let s = trace.erp().discrete(&Self::TRANSITION[self.states[n - 1]]);
            self.states.push(s);
            self.next += 1;
            self.pending = Some(n);
            return Step::Observe(normal_lnp(Self::DATA[n], Self::STATE_MEAN[s], 1.0));
        }
        Step::Done
    }
}

fn fib(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fib(n - 1) + fib(n - 2)
    }
}

/// The Poisson/Fibonacci branching program: `r ~ Poisson(4)`; when `r ≤ 4`
/// the latent rate is `fib(3r) + Poisson(4)`, otherwise 6; a count of 6 is
/// observed under that rate.
#[derive(Debug, Clone, Default)]
pub struct Branching {
    r: u64,
    observed: bool,
}

impl Model for Branching {
    fn resume(&mut self, trace: &mut Trace) -> Step {
        if !self.observed {
            self.r = trace.erp().poisson(4.0);
            let l = if 4 < self.r {
                6
            } else {
                fib(3 * self.r) + trace.erp().poisson(4.0)
            };
            self.observed = true;
            return Step::Observe(poisson_lnp(6, l as f64));
        }
        trace.predict("r", self.r);
        Step::Done
    }
}

/// Per-cluster parameters of the CRP mixture, drawn from a normal-gamma
/// prior.
#[derive(Debug, Clone, Copy)]
struct Theta {
    mu: f64,
    var: f64,
}

/// A Dirichlet-process mixture of Gaussians over ten points, with cluster
/// assignments drawn from a Pólya urn through a memoized class function.
#[derive(Debug, Clone)]
pub struct Crp {
    urn: PolyaUrn,
    class_of: Memo<usize, usize>,
    params: Vec<Option<Theta>>,
    n: usize,
}

impl Crp {
    pub const DATA: [f64; 10] = [1.0, 1.1, 1.2, -1.0, -1.5, -2.0, 0.001, 0.01, 0.005, 0.0];

    pub fn new(concentration: f64) -> Crp {
        Crp {
            urn: PolyaUrn::new(concentration),
            class_of: Memo::new(),
            params: Vec::new(),
            n: 0,
        }
    }
}

impl Default for Crp {
    fn default() -> Crp {
        Crp::new(1.0)
    }
}

impl Model for Crp {
    fn resume(&mut self, trace: &mut Trace) -> Step {
        if self.n < Self::DATA.len() {
            let n = self.n;
            self.n += 1;
            let urn = &mut self.urn;
            let class = self.class_of.invoke(n, |_| urn.draw(trace.erp()));
            if self.params.len() <= class {
                self.params.resize(class + 1, None);
            }
            let theta = match self.params[class] {
                Some(theta) => theta,
                None => {
                    let var = 1.0 / trace.erp().gamma(1.0, 1.0);
                    let theta = Theta {
                        mu: trace.erp().normal(0.0, var),
                        var,
                    };
                    self.params[class] = Some(theta);
                    theta
                }
            };
            return Step::Observe(normal_lnp(Self::DATA[n], theta.mu, theta.var));
        }
        trace.predict("num_classes", self.urn.num_classes());
        Step::Done
    }
}

#[cfg(test)]
mod tests {
    use ppl_engine::simulate;
    use ppl_erp::Erp;

    use super::*;

    fn observe_counts<M: Model + Default>(expected: usize) {
        for seed in 0..20 {
            let sim = simulate(M::default(), Erp::with_seed(seed));
            assert_eq!(sim.observes, expected);
            assert!(sim.log_likelihood <= 0.0 || sim.log_likelihood.is_finite());
        }
    }

    #[test]
    fn observe_counts_are_trace_invariant() {
        observe_counts::<CoinFlip>(3);
        observe_counts::<TrickyCoin>(5);
        observe_counts::<GaussianMean>(2);
        observe_counts::<Hmm>(16);
        observe_counts::<Branching>(1);
        observe_counts::<Crp>(10);
    }

    #[test]
    fn hmm_predicts_every_state_in_order() {
        let sim = simulate(Hmm::default(), Erp::with_seed(5));
        let lines: Vec<&str> = sim.predict.lines().collect();
        assert_eq!(lines.len(), Hmm::N);
        for (n, line) in lines.iter().enumerate() {
            assert!(line.starts_with(&format!("state[{}],", n)), "line {:?}", line);
            let state: usize = line.split(',').nth(1).unwrap().parse().unwrap();
            assert!(state < Hmm::K);
        }
    }

    #[test]
    fn tricky_coin_outputs() {
        let sim = simulate(TrickyCoin::default(), Erp::with_seed(3));
        let lines: Vec<&str> = sim.predict.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0] == "is_tricky,0" || lines[0] == "is_tricky,1");
        let theta: f64 = lines[1].strip_prefix("theta,").unwrap().parse().unwrap();
        assert!((0.0..=1.0).contains(&theta));
    }

    #[test]
    fn fib_matches_the_sequence() {
        let expected = [0, 1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144];
        for (n, &f) in expected.iter().enumerate() {
            assert_eq!(fib(n as u64), f);
        }
    }

    #[test]
    fn crp_reports_cluster_count() {
        let sim = simulate(Crp::default(), Erp::with_seed(9));
        let line = sim.predict.lines().next().unwrap();
        let classes: usize = line.strip_prefix("num_classes,").unwrap().parse().unwrap();
        assert!(classes >= 1 && classes <= Crp::DATA.len());
    }
}
