// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The particle cascade scheduler.
//!
//! Unlike SMC, the cascade has no fixed population and no barriers: each
//! particle decides its own offspring count at every synchronizing observe
//! by comparing its weight against a running per-observation average. Root
//! particles are spawned continuously until a soft limit of completed traces
//! is reached, so the population is unbounded in principle and the estimate
//! is asymptotically unbiased.
//!
//! Two throttles bound the live population. The root loop pauses whenever
//! the live count exceeds a target (half the configured cap), resuming as
//! completions free slots. And when forking offspring would push the live
//! count past the cap, the offspring are *collapsed* instead: the particle
//! keeps running alone with its `pseudocount` multiplied by the suppressed
//! count, which preserves the expected weight it contributes to the running
//! averages downstream.

use std::time::Instant;

use tracing::debug;

use ppl_erp::{log_sum_exp, Erp};

use crate::config::CascadeConfig;
use crate::error::Error;
use crate::model::{Model, Step};
use crate::output::OutputSink;
use crate::particle::Particle;
use crate::pool::Pool;

/// Summary of a cascade run.
#[derive(Debug, Clone)]
pub struct CascadeReport {
    /// Completed traces.
    pub completed: u64,
    /// Root particles launched.
    pub launched: u64,
    /// The highest live-particle count observed; never exceeds the
    /// configured cap.
    pub peak_live: usize,
    /// Synchronizing observes in the program.
    pub observes: usize,
    /// Final marginal-likelihood estimate, when enabled and the program
    /// observes at all.
    pub log_marginal_likelihood: Option<f64>,
}

/// Running statistics for one observation index.
#[derive(Debug, Clone, Default)]
struct ObserveStats {
    /// Particles that have arrived here.
    arrivals: u64,
    /// Log of the running weighted mean of arrival weights.
    log_avg_weight: f64,
    /// Offspring spawned by those arrivals (pre-collapse).
    offspring: u64,
    /// Pseudocount-weighted arrivals, for the marginal-likelihood estimate.
    total_pseudo: u64,
}

/// Folds one arrival into a running log-domain weighted mean: `arrivals`
/// particles averaging `log_avg` so far, joined by an arrival of weight `w`
/// carrying `pseudo` collapsed particles.
fn fold_avg(log_avg: f64, arrivals: u64, w: f64, pseudo: u64) -> f64 {
    log_sum_exp(&[
        (arrivals as f64).ln() + log_avg,
        (pseudo as f64).ln() + w,
    ]) - ((arrivals + pseudo) as f64).ln()
}

fn count_observes<M: Model>(model: M, erp: Erp) -> usize {
    let mut particle = Particle::root(model, erp);
    particle.trace.prerun = true;
    let mut observes = 0;
    while let Step::Observe(_) = particle.advance() {
        observes += 1;
    }
    observes
}

/// Runs particle cascade inference over `model`, writing output to `sink`.
pub fn run<M: Model>(
    config: CascadeConfig,
    model: M,
    sink: &OutputSink,
) -> Result<CascadeReport, Error> {
    config.validate()?;
    let start = Instant::now();
    let mut erp = match config.rng_seed {
        Some(seed) => Erp::with_seed(seed),
        None => Erp::new(),
    };

    let observes = count_observes(model.clone(), Erp::with_seed(erp.fork_seed()));
    debug!(observes, "pre-run complete");
    let mut stats = vec![ObserveStats::default(); observes];

    let pool = Pool::new(config.workers)?;
    let cap = config.max_leaf_nodes;
    let target = config.target_execution_count();
    let mut live: usize = 0;
    let mut peak_live: usize = 0;
    let mut launched: u64 = 0;
    let mut completed: u64 = 0;
    let mut initial_particles: u64 = 0;
    let mut stop_launching = false;

    while !(stop_launching && live == 0) {
        // Keep the pipeline fed: spawn fresh root particles while the live
        // count is at or below the execution target.
        while !stop_launching && live <= target {
            let mut root = Particle::root(model.clone(), Erp::with_seed(erp.fork_seed()));
            root.trace.initial_index = launched;
            launched += 1;
            live += 1;
            peak_live = peak_live.max(live);
            pool.submit(root);
            if completed >= config.particle_soft_limit {
                stop_launching = true;
            }
        }

        let (mut particle, step) = pool.recv();
        match step {
            Step::Observe(_) => {
                let o = particle.trace.current_observe() - 1;
                if o >= observes {
                    return Err(Error::TraceShape(format!(
                        "particle observed a {}th time, but the pre-run counted {}",
                        o + 1,
                        observes,
                    )));
                }
                let w = particle.trace.log_weight();
                let pseudo = particle.trace.pseudocount;
                if config.estimate_marginal_likelihood {
                    stats[o].total_pseudo += pseudo;
                }

                // Snapshot the counts this particle's offspring rule sees,
                // then fold it into the running average.
                let launched_here = stats[o].arrivals;
                let launched_at_root = stats[0].arrivals;
                if launched_here == 0 {
                    stats[o].log_avg_weight = w;
                    stats[o].offspring = 0;
                } else {
                    stats[o].log_avg_weight =
                        fold_avg(stats[o].log_avg_weight, launched_here, w, pseudo);
                }

                let ratio = (w - stats[o].log_avg_weight).exp();
                let final_observe = o + 1 == observes;
                let (mut k, new_log_weight) = if final_observe {
                    // No point in multiple children at the last observe;
                    // collapse accumulated pseudo-observations into the
                    // terminal weight.
                    let collapsed = w + (pseudo as f64).ln();
                    particle.trace.pseudocount = 1;
                    (1, collapsed)
                } else if ratio.is_nan() {
                    // Both the weight and the average are -inf. Keep the
                    // lineage alive; resampling among equally impossible
                    // particles is uniform.
                    (1, stats[o].log_avg_weight)
                } else if ratio < 1.0 {
                    (
                        usize::from(particle.trace.erp().flip(ratio)),
                        stats[o].log_avg_weight,
                    )
                } else if config.random_offspring_rule {
                    let k = ratio.floor() as usize
                        + usize::from(particle.trace.erp().flip(ratio.fract()));
                    (k, stats[o].log_avg_weight)
                } else {
                    let k = if stats[o].offspring > launched_at_root.min(launched_here) {
                        ratio.floor() as usize
                    } else {
                        ratio.ceil() as usize
                    };
                    (k, w - (k as f64).ln())
                };

                stats[o].arrivals += 1;
                stats[o].offspring += k as u64;

                if k == 0 {
                    initial_particles = initial_particles.max(particle.trace.initial_index + 1);
                    live -= 1;
                    continue;
                }
                if k > 1 && live + (k - 1) > cap {
                    // The cap would be breached: run one offspring and let
                    // its pseudocount stand in for the other k - 1.
                    debug!(observe = o, discarded = k - 1, live, "collapsing offspring");
                    particle.trace.pseudocount = particle.trace.pseudocount.saturating_mul(k as u64);
                    k = 1;
                }
                particle.trace.log_weight = new_log_weight;
                for _ in 1..k {
                    let child = particle.fork();
                    live += 1;
                    pool.submit(child);
                }
                peak_live = peak_live.max(live);
                pool.submit(particle);
            }
            Step::Done => {
                if particle.trace.current_observe() != observes {
                    return Err(Error::TraceShape(format!(
                        "particle completed after {} observes, but the pre-run counted {}",
                        particle.trace.current_observe(),
                        observes,
                    )));
                }
                let id = completed;
                completed += 1;
                initial_particles = initial_particles.max(particle.trace.initial_index + 1);
                sink.write_weighted(&particle.trace.predict, particle.trace.log_weight(), id);
                if config.timeit {
                    sink.write_walltime(start.elapsed(), id);
                }
                if config.estimate_marginal_likelihood && observes > 0 {
                    let last = &stats[observes - 1];
                    sink.write_all(&format!("initial_particles,{},,{}\n", initial_particles, id));
                    sink.write_all(&format!(
                        "log_marginal_likelihood,{:.10},,{}\n",
                        last.log_avg_weight + (last.total_pseudo as f64).ln()
                            - (initial_particles as f64).ln(),
                        id,
                    ));
                }
                live -= 1;
                if completed >= config.particle_soft_limit {
                    stop_launching = true;
                }
            }
        }
    }

    debug!(completed, launched, peak_live, "cascade drained");
    let log_marginal_likelihood = if config.estimate_marginal_likelihood && observes > 0 {
        let last = &stats[observes - 1];
        Some(
            last.log_avg_weight + (last.total_pseudo as f64).ln()
                - (initial_particles as f64).ln(),
        )
    } else {
        None
    };

    Ok(CascadeReport {
        completed,
        launched,
        peak_live,
        observes,
        log_marginal_likelihood,
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::trace::Trace;

    proptest! {
        #[test]
        fn running_average_matches_direct_mean(
            weights in prop::collection::vec(-40.0f64..10.0, 1..30),
        ) {
            // With unit pseudocounts the incremental update must agree with
            // the log of the arithmetic mean of the weights.
            let mut avg = weights[0];
            for (i, &w) in weights.iter().enumerate().skip(1) {
                avg = fold_avg(avg, i as u64, w, 1);
            }
            let direct = log_sum_exp(&weights) - (weights.len() as f64).ln();
            prop_assert!((avg - direct).abs() < 1e-9, "avg {} direct {}", avg, direct);
        }
    }

    #[test]
    fn pseudocount_weights_the_average() {
        // One arrival of weight ln(1) carrying 3 collapsed particles pulls
        // the average of [ln(4)] to ln((4 + 3*1) / 4).
        let avg = fold_avg(4.0f64.ln(), 1, 0.0, 3);
        assert!((avg - (7.0f64 / 4.0).ln()).abs() < 1e-12);
    }

    /// Two observes with weights that spread the population.
    #[derive(Clone)]
    struct TwoObserves {
        stage: u8,
        theta: f64,
    }

    impl Model for TwoObserves {
        fn resume(&mut self, trace: &mut Trace) -> Step {
            match self.stage {
                0 => {
                    self.theta = trace.erp().beta(1.0, 1.0);
                    self.stage = 1;
                    Step::Observe(ppl_erp::flip_lnp(true, self.theta))
                }
                1 => {
                    self.stage = 2;
                    Step::Observe(ppl_erp::flip_lnp(true, self.theta))
                }
                _ => {
                    trace.predict("theta", self.theta);
                    Step::Done
                }
            }
        }
    }

    fn config() -> CascadeConfig {
        CascadeConfig {
            particle_soft_limit: 200,
            max_leaf_nodes: 16,
            rng_seed: Some(19),
            workers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn completes_soft_limit_within_cap() {
        let (sink, capture) = OutputSink::capture();
        let report = run(config(), TwoObserves { stage: 0, theta: 0.0 }, &sink).unwrap();
        assert!(report.completed >= 200);
        assert!(report.peak_live <= 16, "peak {}", report.peak_live);
        assert_eq!(report.observes, 2);
        // Every completed trace flushed one weighted line.
        assert_eq!(
            capture.contents().lines().count() as u64,
            report.completed
        );
    }

    #[test]
    fn evidence_lines_accompany_each_trace() {
        let mut cfg = config();
        cfg.particle_soft_limit = 300;
        cfg.estimate_marginal_likelihood = true;
        let (sink, capture) = OutputSink::capture();
        let report = run(cfg, TwoObserves { stage: 0, theta: 0.0 }, &sink).unwrap();
        assert!(report.log_marginal_likelihood.is_some());
        let contents = capture.contents();
        let evidence = contents
            .lines()
            .filter(|l| l.starts_with("log_marginal_likelihood,"))
            .count() as u64;
        assert_eq!(evidence, report.completed);
        // The true evidence for two heads under a uniform prior is 1/3.
        let z = report.log_marginal_likelihood.unwrap();
        assert!((z - (1.0f64 / 3.0).ln()).abs() < 0.4, "z = {}", z);
    }

    /// No observes: every root runs straight to completion.
    #[derive(Clone)]
    struct PriorOnly;

    impl Model for PriorOnly {
        fn resume(&mut self, trace: &mut Trace) -> Step {
            let u = trace.erp().uniform(0.0, 1.0);
            trace.predict("u", u);
            Step::Done
        }
    }

    #[test]
    fn zero_observe_program_completes() {
        let mut cfg = config();
        cfg.particle_soft_limit = 40;
        let (sink, capture) = OutputSink::capture();
        let report = run(cfg, PriorOnly, &sink).unwrap();
        assert!(report.completed >= 40);
        assert_eq!(report.observes, 0);
        assert!(report.log_marginal_likelihood.is_none());
        assert_eq!(
            capture.contents().lines().count() as u64,
            report.completed
        );
    }
}
