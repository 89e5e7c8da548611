// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The particle-independent Metropolis–Hastings scheduler.
//!
//! Each iteration runs one independent SMC sweep and treats its marginal
//! likelihood estimate `log Ẑ` as the proposal's score: the sweep is
//! accepted with probability `min(1, exp(log Ẑ − log Ẑ_prev))`. On
//! acceptance the sweep's per-slot predict buffers become the new retained
//! output set; on rejection the previous set is re-emitted. Either way,
//! every iteration flushes exactly `N` buffers, so the output stream is a
//! Markov chain over complete particle populations.

use std::time::Instant;

use tracing::debug;

use ppl_erp::{log_sum_exp, Erp};

use crate::config::PimhConfig;
use crate::error::Error;
use crate::model::{Model, Step};
use crate::output::OutputSink;
use crate::particle::Particle;
use crate::pool::Pool;
use crate::resample;

/// The ESS fraction below which a sweep resamples.
const ESS_THRESHOLD: f64 = 0.5;

/// Summary of a PIMH run.
#[derive(Debug, Clone)]
pub struct PimhReport {
    /// The configured particle count.
    pub particles: usize,
    /// Completed MCMC iterations.
    pub iterations: usize,
    /// Accepted proposals (the first iteration always accepts).
    pub accepted: usize,
    /// The marginal-likelihood estimate of the last accepted sweep.
    pub log_marginal_likelihood: f64,
}

/// Runs PIMH inference over `model`, writing output to `sink`.
pub fn run<M: Model>(config: PimhConfig, model: M, sink: &OutputSink) -> Result<PimhReport, Error> {
    config.validate()?;
    let start = Instant::now();
    let n = config.particles;
    let mut erp = match config.rng_seed {
        Some(seed) => Erp::with_seed(seed),
        None => Erp::new(),
    };

    let pool = Pool::new(config.workers)?;
    let mut kept: Vec<String> = vec![String::new(); n];
    let mut log_z_prev = f64::NEG_INFINITY;
    let mut accepted = 0;

    for iter in 0..config.iterations {
        // One independent SMC sweep.
        for _ in 0..n {
            pool.submit(Particle::root(model.clone(), Erp::with_seed(erp.fork_seed())));
        }
        let mut log_z = 0.0;
        let mut round = 0;
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
            let resampled = if resample::ess(&log_weights) < ESS_THRESHOLD * n as f64 {
                log_z += log_sum_exp(&log_weights) - (n as f64).ln();
                Some(resample::multinomial(&mut erp, &log_weights, n))
            } else {
                None
            };
            for (slot, (mut particle, _)) in batch.into_iter().enumerate() {
                match &resampled {
                    None => pool.submit(particle),
                    Some(counts) => {
                        let k = counts[slot];
                        if k == 0 {
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

        // Sentinel observe, then remove any excess weight so the proposal's
        // population is unweighted.
        for particle in &mut finishers {
            particle.trace.apply_observe(0.0);
        }
        let log_weights: Vec<f64> = finishers
            .iter()
            .map(|particle| particle.trace.log_weight())
            .collect();
        let mut counts = vec![1; n];
        if resample::ess(&log_weights) < ESS_THRESHOLD * n as f64 {
            log_z += log_sum_exp(&log_weights) - (n as f64).ln();
            counts = resample::multinomial(&mut erp, &log_weights, n);
        } else {
            let excess = log_sum_exp(&log_weights) - (n as f64).ln();
            if excess > 0.0 {
                log_z += excess;
                counts = resample::multinomial(&mut erp, &log_weights, n);
            }
        }
        let mut buffers: Vec<String> = Vec::with_capacity(n);
        for (particle, k) in finishers.iter().zip(&counts) {
            for _ in 0..*k {
                buffers.push(particle.trace.predict.clone());
            }
        }
        assert_eq!(buffers.len(), n);

        // Metropolis–Hastings over whole sweeps, gated by the evidence
        // ratio.
        let log_ratio = log_z - log_z_prev;
        let accept = erp.uniform(0.0, 1.0).ln() < log_ratio;
        debug!(
            iteration = iter,
            log_z, log_z_prev, accept, "proposal scored"
        );
        if accept {
            accepted += 1;
            log_z_prev = log_z;
            kept = buffers;
        }
        for buffer in &kept {
            sink.write_all(buffer);
        }
        if config.timeit {
            sink.write_walltime(start.elapsed(), iter as u64);
        }
    }

    Ok(PimhReport {
        particles: n,
        iterations: config.iterations,
        accepted,
        log_marginal_likelihood: log_z_prev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Trace;

    #[derive(Clone)]
    struct OneFlip {
        x: Option<bool>,
    }

    impl Model for OneFlip {
        fn resume(&mut self, trace: &mut Trace) -> Step {
            match self.x {
                None => {
                    let x = trace.erp().flip(0.2);
                    self.x = Some(x);
                    Step::Observe(ppl_erp::flip_lnp(x, 0.99))
                }
                Some(x) => {
                    trace.predict("x", u8::from(x));
                    Step::Done
                }
            }
        }
    }

    #[test]
    fn first_iteration_always_accepts() {
        let config = PimhConfig {
            particles: 8,
            iterations: 1,
            rng_seed: Some(11),
            workers: 2,
            ..Default::default()
        };
        let (sink, capture) = OutputSink::capture();
        let report = run(config, OneFlip { x: None }, &sink).unwrap();
        assert_eq!(report.accepted, 1);
        assert!(report.log_marginal_likelihood.is_finite());
        assert_eq!(capture.contents().lines().count(), 8);
    }

    #[test]
    fn every_iteration_flushes_n_buffers() {
        let config = PimhConfig {
            particles: 5,
            iterations: 12,
            rng_seed: Some(23),
            workers: 2,
            ..Default::default()
        };
        let (sink, capture) = OutputSink::capture();
        let report = run(config, OneFlip { x: None }, &sink).unwrap();
        assert!(report.accepted >= 1);
        assert_eq!(capture.contents().lines().count(), 5 * 12);
    }
}
