// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The particle Gibbs (PMCMC) scheduler.
//!
//! Particle Gibbs runs conditional SMC repeatedly: each iteration sweeps a
//! fresh population of particles through the program while one *retained*
//! trace from the previous iteration is held fixed, and ends by drawing the
//! next retained trace uniformly from the finishers (the retained one
//! included). The retained lineage is pinned at least one offspring at every
//! resampling point, which is what makes the sweep a valid conditional SMC
//! kernel.
//!
//! A pre-run executes the program once to count its synchronizing observes;
//! all per-observation state is sized on that count (plus the engine's
//! sentinel observe at program completion). During a sweep the hub stores a
//! snapshot of every arrival at every observe; the retained trace is the
//! chain of snapshots along the chosen finisher's ancestry, and "branching
//! the retained particle" at observe `o` is cloning the stored snapshot.
//! Where the process-based design parked retained processes on
//! per-observation conditions, the snapshot table makes the rendezvous a
//! plain table lookup, and releasing the retained trace at shutdown is
//! simply dropping the table.

use std::time::Instant;

use tracing::debug;

use ppl_erp::Erp;

use crate::config::PgConfig;
use crate::error::Error;
use crate::model::{Model, Step};
use crate::output::OutputSink;
use crate::particle::Particle;
use crate::pool::Pool;
use crate::resample;

/// Summary of a particle Gibbs run.
#[derive(Debug, Clone)]
pub struct PgReport {
    /// The configured particle count.
    pub particles: usize,
    /// Completed MCMC iterations.
    pub iterations: usize,
    /// Synchronizing observes in the program (excluding the sentinel).
    pub observes: usize,
    /// The retained trace's predict buffer after each iteration: the MCMC
    /// chain output.
    pub retained_chain: Vec<String>,
}

/// Runs the program once, without output, to count synchronizing observes.
fn count_observes<M: Model>(model: M, erp: Erp) -> Result<usize, Error> {
    let mut particle = Particle::root(model, erp);
    particle.trace.prerun = true;
    let mut observes = 0;
    loop {
        match particle.advance() {
            Step::Observe(_) => observes += 1,
            Step::Done => return Ok(observes),
        }
    }
}

/// Runs particle Gibbs inference over `model`, writing output to `sink`.
pub fn run<M: Model>(config: PgConfig, model: M, sink: &OutputSink) -> Result<PgReport, Error> {
    config.validate()?;
    let start = Instant::now();
    let n = config.particles;
    let mut erp = match config.rng_seed {
        Some(seed) => Erp::with_seed(seed),
        None => Erp::new(),
    };

    // Pre-run: every iteration-phase structure is sized on the observe
    // count, with one extra slot for the sentinel observe at completion.
    let observes = count_observes(model.clone(), Erp::with_seed(erp.fork_seed()))?;
    let num_steps = observes + 1;
    debug!(observes, "pre-run complete");

    let pool = Pool::new(config.workers)?;
    let mut retained: Option<Vec<Particle<M>>> = None;
    let mut retained_chain = Vec::with_capacity(config.iterations);

    for iter in 0..config.iterations {
        debug!(iteration = iter, "starting conditional SMC sweep");
        let has_retained = retained.is_some();

        // Snapshot tables, one per observe. With a retained trace, its
        // snapshot occupies index 0 of every table and serves as the fork
        // source for retained-lineage offspring.
        let mut nodes: Vec<Vec<Particle<M>>> = (0..num_steps).map(|_| Vec::new()).collect();
        if let Some(chain) = retained.take() {
            for (o, snapshot) in chain.into_iter().enumerate() {
                nodes[o].push(snapshot);
            }
        }

        let fresh = if has_retained { n - 1 } else { n };
        for _ in 0..fresh {
            pool.submit(Particle::root(model.clone(), Erp::with_seed(erp.fork_seed())));
        }

        // The finishers of this sweep, as selection candidates.
        let mut finishers: Vec<Particle<M>> = Vec::with_capacity(n);

        for o in 0..num_steps {
            let sentinel = o + 1 == num_steps;
            let mut batch = Vec::with_capacity(fresh);
            for (mut particle, step) in pool.collect(fresh) {
                match step {
                    Step::Observe(_) if !sentinel => {
                        if particle.trace.current_observe() != o + 1 {
                            return Err(Error::TraceShape(format!(
                                "particle arrived at observe {} while the sweep is at observe {}",
                                particle.trace.current_observe() - 1,
                                o,
                            )));
                        }
                    }
                    Step::Done if sentinel => particle.trace.apply_observe(0.0),
                    Step::Observe(_) => {
                        return Err(Error::TraceShape(format!(
                            "particle observed a {}th time, but the pre-run counted {}",
                            observes + 1,
                            observes,
                        )))
                    }
                    Step::Done => {
                        return Err(Error::TraceShape(format!(
                            "particle completed after {} observes, but the pre-run counted {}",
                            particle.trace.current_observe(),
                            observes,
                        )))
                    }
                }
                particle.ancestry.push(nodes[o].len());
                nodes[o].push(particle.clone());
                batch.push(particle);
            }

            // Slot layout matches the arrival barrier: fresh arrivals in
            // completion order, the retained trace pinned to the last slot.
            let mut log_weights: Vec<f64> =
                batch.iter().map(|p| p.trace.log_weight()).collect();
            if has_retained {
                log_weights.push(nodes[o][0].trace.log_weight());
            }
            let counts = if has_retained {
                resample::multinomial_pinned(&mut erp, &log_weights)
            } else {
                resample::multinomial(&mut erp, &log_weights, n)
            };
            assert_eq!(counts.iter().sum::<usize>(), n);

            if !sentinel {
                for (slot, mut particle) in batch.into_iter().enumerate() {
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
                if has_retained {
                    // Branch the retained lineage: its own continuation is
                    // the snapshot at the next observe, so only k - 1 new
                    // offspring fork from here.
                    for _ in 1..counts[n - 1] {
                        let mut child = nodes[o][0].fork();
                        child.trace.log_weight = 0.0;
                        pool.submit(child);
                    }
                }
            } else {
                // The retained trace re-emits its completed output each
                // iteration, before the fresh finishers.
                if has_retained {
                    sink.write_all(&nodes[o][0].trace.predict);
                }
                for (slot, particle) in batch.into_iter().enumerate() {
                    for _ in 0..counts[slot] {
                        sink.write_all(&particle.trace.predict);
                        finishers.push(particle.clone());
                    }
                }
                if has_retained {
                    for _ in 1..counts[n - 1] {
                        let clone = nodes[o][0].clone();
                        sink.write_all(&clone.trace.predict);
                        finishers.push(clone);
                    }
                }
            }
        }

        // Draw the next retained trace uniformly from the N finishers; the
        // last index designates the previously retained trace itself.
        assert_eq!(finishers.len(), if has_retained { n - 1 } else { n });
        let pick = erp.uniform_discrete(n);
        let ancestry: Vec<usize> = if has_retained && pick >= finishers.len() {
            vec![0; num_steps]
        } else {
            finishers[pick].ancestry.clone()
        };
        let chain: Vec<Particle<M>> = ancestry
            .iter()
            .enumerate()
            .map(|(o, &idx)| {
                let mut snapshot = nodes[o][idx].clone();
                snapshot.ancestry = vec![0; o + 1];
                snapshot
            })
            .collect();
        retained_chain.push(chain[num_steps - 1].trace.predict.clone());
        retained = Some(chain);

        if config.timeit {
            sink.write_walltime(start.elapsed(), iter as u64);
        }
    }

    Ok(PgReport {
        particles: n,
        iterations: config.iterations,
        observes,
        retained_chain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Trace;

    /// A coin with evidence strongly favoring heads.
    #[derive(Clone)]
    struct OneFlip {
        x: Option<bool>,
    }

    impl Model for OneFlip {
        fn resume(&mut self, trace: &mut Trace) -> Step {
            match self.x {
                None => {
                    let x = trace.erp().flip(0.5);
                    self.x = Some(x);
                    Step::Observe(ppl_erp::flip_lnp(x, 0.95))
                }
                Some(x) => {
                    trace.predict("x", u8::from(x));
                    Step::Done
                }
            }
        }
    }

    #[test]
    fn emits_n_lines_per_iteration_and_builds_a_chain() {
        let config = PgConfig {
            particles: 6,
            iterations: 20,
            rng_seed: Some(3),
            workers: 2,
            ..Default::default()
        };
        let (sink, capture) = OutputSink::capture();
        let report = run(config, OneFlip { x: None }, &sink).unwrap();
        assert_eq!(report.observes, 1);
        assert_eq!(report.retained_chain.len(), 20);
        // Every iteration flushes exactly N single-line buffers.
        assert_eq!(capture.contents().lines().count(), 6 * 20);
        // The chain should settle mostly on the high-evidence outcome.
        let heads = report
            .retained_chain
            .iter()
            .filter(|b| b.as_str() == "x,1\n")
            .count();
        assert!(heads > 10, "heads = {}", heads);
    }

    /// No observes at all.
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
    fn zero_observe_program_runs_all_iterations() {
        let config = PgConfig {
            particles: 4,
            iterations: 5,
            rng_seed: Some(8),
            workers: 2,
            ..Default::default()
        };
        let (sink, capture) = OutputSink::capture();
        let report = run(config, PriorOnly, &sink).unwrap();
        assert_eq!(report.observes, 0);
        assert_eq!(capture.contents().lines().count(), 4 * 5);
    }
}
