// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The sequential Monte Carlo scheduler.
//!
//! A fixed population of `N` particles runs the program in parallel. At each
//! synchronizing observe the hub gathers all `N` arrivals, computes the
//! effective sample size of their weights, and — when `ESS < τ·N` — draws
//! per-slot offspring counts, accumulates a marginal-likelihood
//! contribution, and resets the weights. Slots with zero offspring die;
//! slots with `k` offspring continue as one particle plus `k − 1` forked
//! clones.
//!
//! A sentinel observe with `ln_p = 0` is applied when the program completes,
//! so even a program with no observes passes through the protocol once. In
//! the default unweighted mode any weight remaining after the sentinel is
//! removed by a final excess-weight resample, and surviving slots flush
//! their predict buffers verbatim (duplicated per offspring); in weighted
//! mode each particle flushes once, with every line suffixed by its terminal
//! weight and particle id.

use std::time::Instant;

use tracing::debug;

use ppl_erp::{log_sum_exp, Erp};

use crate::config::{Resampler, SmcConfig};
use crate::error::Error;
use crate::model::{Model, Step};
use crate::output::OutputSink;
use crate::particle::Particle;
use crate::pool::Pool;
use crate::resample;

/// Summary of one SMC run.
#[derive(Debug, Clone)]
pub struct SmcReport {
    /// The configured particle count.
    pub particles: usize,
    /// Synchronizing observes encountered by the program (excluding the
    /// sentinel).
    pub observes: usize,
    /// Resampling events, including any terminal excess-weight resample.
    pub resamples: usize,
    /// Accumulated marginal-likelihood estimate.
    pub log_marginal_likelihood: f64,
}

fn draw_offspring(erp: &mut Erp, log_weights: &[f64], resampler: Resampler) -> Vec<usize> {
    match resampler {
        Resampler::Multinomial => resample::multinomial(erp, log_weights, log_weights.len()),
        Resampler::Residual => resample::residual(erp, log_weights),
    }
}

/// Runs SMC inference over `model`, writing inference output to `sink`.
pub fn run<M: Model>(config: SmcConfig, model: M, sink: &OutputSink) -> Result<SmcReport, Error> {
    config.validate()?;
    let start = Instant::now();
    let n = config.particles;
    let mut erp = match config.rng_seed {
        Some(seed) => Erp::with_seed(seed),
        None => Erp::new(),
    };

    let pool = Pool::new(config.workers)?;
    for _ in 0..n {
        pool.submit(Particle::root(model.clone(), Erp::with_seed(erp.fork_seed())));
    }

    let mut round = 0;
    let mut resamples = 0;
    let mut log_marginal_likelihood = 0.0;

    // Barrier loop: each pass gathers all N live particles, which must have
    // arrived at the same observe (or all completed).
    let mut finishers: Vec<Particle<M>> = loop {
        let batch = pool.collect(n);
        let observing = batch
            .iter()
            .filter(|(_, step)| matches!(step, Step::Observe(_)))
            .count();
        if observing == 0 {
            break batch.into_iter().map(|(particle, _)| particle).collect();
        }
        if observing != n {
            return Err(Error::TraceShape(format!(
                "at observe {}: {} of {} particles observed while the rest completed; \
                 the number of synchronizing observes must not vary across traces",
                round, observing, n,
            )));
        }
        for (particle, _) in &batch {
            if particle.trace.current_observe() != round + 1 {
                return Err(Error::TraceShape(format!(
                    "particle arrived at observe {} while the barrier is at observe {}",
                    particle.trace.current_observe() - 1,
                    round,
                )));
            }
        }

        let log_weights: Vec<f64> = batch
            .iter()
            .map(|(particle, _)| particle.trace.log_weight())
            .collect();
        let ess = resample::ess(&log_weights);
        debug!(observe = round, ess, "observe barrier complete");

        let verdicts = if ess < config.ess_threshold * n as f64 {
            log_marginal_likelihood += log_sum_exp(&log_weights) - (n as f64).ln();
            resamples += 1;
            let counts = draw_offspring(&mut erp, &log_weights, config.resampler);
            debug!(observe = round, ?counts, "resampled");
            Some(counts)
        } else {
            None
        };

        for (slot, (mut particle, _)) in batch.into_iter().enumerate() {
            match &verdicts {
                None => pool.submit(particle),
                Some(counts) => {
                    let k = counts[slot];
                    if k == 0 {
                        // Zero offspring: the particle dies here.
                        continue;
                    }
                    particle.trace.log_weight = 0.0;
                    for _ in 1..k {
                        pool.submit(particle.fork());
                    }
                    pool.submit(particle);
                }
            }
        }
        round += 1;
    };

    if config.weighted_output {
        for particle in &mut finishers {
            particle.trace.fold_pending();
        }
        for (id, particle) in finishers.iter().enumerate() {
            sink.write_weighted(&particle.trace.predict, particle.trace.log_weight(), id as u64);
        }
    } else {
        // Sentinel observe: every program synchronizes at least once.
        for particle in &mut finishers {
            particle.trace.apply_observe(0.0);
        }
        let log_weights: Vec<f64> = finishers
            .iter()
            .map(|particle| particle.trace.log_weight())
            .collect();
        let mut counts = vec![1; n];
        if resample::ess(&log_weights) < config.ess_threshold * n as f64 {
            log_marginal_likelihood += log_sum_exp(&log_weights) - (n as f64).ln();
            resamples += 1;
            counts = draw_offspring(&mut erp, &log_weights, config.resampler);
        } else {
            // Any weight still spread across the population would bias an
            // unweighted sample; one more resample removes it.
            let excess = log_sum_exp(&log_weights) - (n as f64).ln();
            if excess > 0.0 {
                log_marginal_likelihood += excess;
                resamples += 1;
                counts = draw_offspring(&mut erp, &log_weights, config.resampler);
            }
        }
        for (particle, k) in finishers.iter().zip(&counts) {
            for _ in 0..*k {
                sink.write_all(&particle.trace.predict);
            }
        }
    }

    if config.timeit {
        sink.write_walltime(start.elapsed(), 0);
    }
    if config.estimate_marginal_likelihood {
        sink.write_all(&format!(
            "log_marginal_likelihood,{:.8},,{}\n",
            log_marginal_likelihood, n,
        ));
    }

    Ok(SmcReport {
        particles: n,
        observes: round,
        resamples,
        log_marginal_likelihood,
    })
}
