// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Scheduler configuration.
//!
//! Everything the original engines kept in per-scheduler statics — particle
//! counts, iteration counts, thresholds, caps, flags — is an explicit
//! configuration value here, threaded into the scheduler entry points.

use crate::error::Error;

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

/// Which offspring-count resampler the SMC-family schedulers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampler {
    /// Independent categorical draws.
    Multinomial,
    /// Deterministic integer parts plus multinomial remainder.
    Residual,
}

/// Configuration for the SMC scheduler.
#[derive(Debug, Clone)]
pub struct SmcConfig {
    /// Number of particles (default 100).
    pub particles: usize,
    /// Resampling triggers when `ESS < ess_threshold * particles`.
    pub ess_threshold: f64,
    /// Offspring-count resampler.
    pub resampler: Resampler,
    /// Emit each particle's output weighted by its terminal weight instead
    /// of resampling down to an unweighted set.
    pub weighted_output: bool,
    /// Accumulate and emit a marginal-likelihood estimate.
    pub estimate_marginal_likelihood: bool,
    /// Emit wall-clock timing lines.
    pub timeit: bool,
    /// Seed for the engine generator; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Worker threads executing particle segments.
    pub workers: usize,
}

impl Default for SmcConfig {
    fn default() -> SmcConfig {
        SmcConfig {
            particles: 100,
            ess_threshold: 0.5,
            resampler: Resampler::Multinomial,
            weighted_output: false,
            estimate_marginal_likelihood: false,
            timeit: false,
            rng_seed: None,
            workers: default_workers(),
        }
    }
}

impl SmcConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.particles == 0 {
            return Err(Error::InvalidConfig("particles must be positive".into()));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration for the particle Gibbs scheduler.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Number of particles per conditional SMC sweep (default 10).
    pub particles: usize,
    /// Number of MCMC iterations (default 100).
    pub iterations: usize,
    /// Emit wall-clock timing lines (one per iteration).
    pub timeit: bool,
    /// Seed for the engine generator; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Worker threads executing particle segments.
    pub workers: usize,
}

impl Default for PgConfig {
    fn default() -> PgConfig {
        PgConfig {
            particles: 10,
            iterations: 100,
            timeit: false,
            rng_seed: None,
            workers: default_workers(),
        }
    }
}

impl PgConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        // Conditional SMC needs at least one non-retained particle.
        if self.particles < 2 {
            return Err(Error::InvalidConfig(
                "particle Gibbs requires at least two particles".into(),
            ));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration for the particle-independent Metropolis–Hastings scheduler.
#[derive(Debug, Clone)]
pub struct PimhConfig {
    /// Number of particles per SMC sweep (default 10).
    pub particles: usize,
    /// Number of MCMC iterations (default 100).
    pub iterations: usize,
    /// Emit wall-clock timing lines (one per iteration).
    pub timeit: bool,
    /// Seed for the engine generator; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Worker threads executing particle segments.
    pub workers: usize,
}

impl Default for PimhConfig {
    fn default() -> PimhConfig {
        PimhConfig {
            particles: 10,
            iterations: 100,
            timeit: false,
            rng_seed: None,
            workers: default_workers(),
        }
    }
}

impl PimhConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.particles == 0 {
            return Err(Error::InvalidConfig("particles must be positive".into()));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration for the particle cascade scheduler.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Soft limit on completed traces (default 100000): once this many
    /// particles have finished, no new root particles are started.
    pub particle_soft_limit: u64,
    /// Maximum number of live particles (default 500). Offspring that would
    /// exceed the cap are collapsed into their parent's pseudocount.
    pub max_leaf_nodes: usize,
    /// Use the random offspring rule (`floor(ratio) + Bernoulli(frac)`)
    /// instead of the deterministic ceil/floor rule.
    pub random_offspring_rule: bool,
    /// Emit running marginal-likelihood estimates with each completed trace.
    pub estimate_marginal_likelihood: bool,
    /// Emit wall-clock timing lines (one per completed trace).
    pub timeit: bool,
    /// Seed for the engine generator; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Worker threads executing particle segments.
    pub workers: usize,
}

impl Default for CascadeConfig {
    fn default() -> CascadeConfig {
        CascadeConfig {
            particle_soft_limit: 100_000,
            max_leaf_nodes: 500,
            random_offspring_rule: false,
            estimate_marginal_likelihood: false,
            timeit: false,
            rng_seed: None,
            workers: default_workers(),
        }
    }
}

impl CascadeConfig {
    /// The root loop keeps spawning fresh particles while the live count is
    /// at or below this target, and pauses otherwise.
    pub fn target_execution_count(&self) -> usize {
        self.max_leaf_nodes / 2
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.particle_soft_limit == 0 {
            return Err(Error::InvalidConfig(
                "particle_soft_limit must be positive".into(),
            ));
        }
        if self.max_leaf_nodes < 2 {
            return Err(Error::InvalidConfig(
                "max_leaf_nodes must allow at least two live particles".into(),
            ));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be positive".into()));
        }
        Ok(())
    }
}
