// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Command-line plumbing for model binaries.
//!
//! A model binary exposes one subcommand per scheduler (`smc`, `pg`, `pimh`,
//! `cascade`), each carrying that scheduler's engine options. A lone `--`
//! separates engine options from program options: everything to its right is
//! handed to the model constructor untouched.

use std::panic;
use std::process;

use clap::Parser;
use tracing_subscriber::filter::EnvFilter;

use crate::cascade::{self, CascadeReport};
use crate::config::{CascadeConfig, PgConfig, PimhConfig, SmcConfig};
use crate::model::Model;
use crate::output::OutputSink;
use crate::pg::{self, PgReport};
use crate::pimh::{self, PimhReport};
use crate::smc::{self, SmcReport};

/// Engine options common to every scheduler.
#[derive(Debug, clap::Args)]
pub struct CommonArgs {
    /// Seed the engine's random number generator.
    #[clap(short = 'r', long = "rng_seed", value_name = "N")]
    pub rng_seed: Option<u64>,
    /// Emit wall-clock timing lines.
    #[clap(short = 't', long = "timeit")]
    pub timeit: bool,
    /// Arguments after `--` are passed to the program.
    #[clap(last = true, value_name = "PROGRAM ARGS")]
    pub program_args: Vec<String>,
}

/// Sequential Monte Carlo with adaptive resampling.
#[derive(Debug, clap::Args)]
pub struct SmcArgs {
    /// Number of particles.
    #[clap(short = 'p', long = "particles", value_name = "N", default_value_t = 100)]
    pub particles: usize,
    /// Emit weighted output per particle instead of an unweighted sample.
    #[clap(short = 'w', long = "weighted")]
    pub weighted: bool,
    /// Emit a marginal-likelihood estimate.
    #[clap(short = 'e', long = "evidence")]
    pub evidence: bool,
    #[clap(flatten)]
    pub common: CommonArgs,
}

/// Particle Gibbs (iterated conditional SMC).
#[derive(Debug, clap::Args)]
pub struct PgArgs {
    /// Number of particles.
    #[clap(short = 'p', long = "particles", value_name = "N", default_value_t = 10)]
    pub particles: usize,
    /// Number of MCMC iterations.
    #[clap(short = 'i', long = "iterations", value_name = "K", default_value_t = 100)]
    pub iterations: usize,
    #[clap(flatten)]
    pub common: CommonArgs,
}

/// Particle-independent Metropolis–Hastings.
#[derive(Debug, clap::Args)]
pub struct PimhArgs {
    /// Number of particles.
    #[clap(short = 'p', long = "particles", value_name = "N", default_value_t = 10)]
    pub particles: usize,
    /// Number of MCMC iterations.
    #[clap(short = 'i', long = "iterations", value_name = "K", default_value_t = 100)]
    pub iterations: usize,
    #[clap(flatten)]
    pub common: CommonArgs,
}

/// Particle cascade with a live-particle throttle.
#[derive(Debug, clap::Args)]
pub struct CascadeArgs {
    /// Soft limit on completed traces.
    #[clap(
        short = 'p',
        long = "particles",
        value_name = "N",
        default_value_t = 100_000
    )]
    pub particles: u64,
    /// Maximum number of live particles.
    #[clap(
        short = 'c',
        long = "process_cap",
        value_name = "N",
        default_value_t = 500
    )]
    pub process_cap: usize,
    /// Emit running marginal-likelihood estimates.
    #[clap(short = 'e', long = "evidence")]
    pub evidence: bool,
    #[clap(flatten)]
    pub common: CommonArgs,
}

/// The scheduler to run, with its engine options.
#[derive(Debug, clap::Subcommand)]
pub enum Scheduler {
    Smc(SmcArgs),
    Pg(PgArgs),
    Pimh(PimhArgs),
    Cascade(CascadeArgs),
}

/// Command line of a model binary.
#[derive(Debug, clap::Parser)]
pub struct Args {
    #[clap(subcommand)]
    pub scheduler: Scheduler,
}

impl Args {
    /// The program arguments (everything after `--`).
    pub fn program_args(&self) -> &[String] {
        match &self.scheduler {
            Scheduler::Smc(args) => &args.common.program_args,
            Scheduler::Pg(args) => &args.common.program_args,
            Scheduler::Pimh(args) => &args.common.program_args,
            Scheduler::Cascade(args) => &args.common.program_args,
        }
    }
}

/// The report of whichever scheduler ran.
#[derive(Debug)]
pub enum Report {
    Smc(SmcReport),
    Pg(PgReport),
    Pimh(PimhReport),
    Cascade(CascadeReport),
}

/// Runs the scheduler selected on the command line over `model`.
pub fn dispatch<M: Model>(args: &Args, model: M, sink: &OutputSink) -> Result<Report, crate::Error> {
    match &args.scheduler {
        Scheduler::Smc(smc_args) => {
            let config = SmcConfig {
                particles: smc_args.particles,
                weighted_output: smc_args.weighted,
                estimate_marginal_likelihood: smc_args.evidence,
                timeit: smc_args.common.timeit,
                rng_seed: smc_args.common.rng_seed,
                ..Default::default()
            };
            smc::run(config, model, sink).map(Report::Smc)
        }
        Scheduler::Pg(pg_args) => {
            let config = PgConfig {
                particles: pg_args.particles,
                iterations: pg_args.iterations,
                timeit: pg_args.common.timeit,
                rng_seed: pg_args.common.rng_seed,
                ..Default::default()
            };
            pg::run(config, model, sink).map(Report::Pg)
        }
        Scheduler::Pimh(pimh_args) => {
            let config = PimhConfig {
                particles: pimh_args.particles,
                iterations: pimh_args.iterations,
                timeit: pimh_args.common.timeit,
                rng_seed: pimh_args.common.rng_seed,
                ..Default::default()
            };
            pimh::run(config, model, sink).map(Report::Pimh)
        }
        Scheduler::Cascade(cascade_args) => {
            let config = CascadeConfig {
                particle_soft_limit: cascade_args.particles,
                max_leaf_nodes: cascade_args.process_cap,
                estimate_marginal_likelihood: cascade_args.evidence,
                timeit: cascade_args.common.timeit,
                rng_seed: cascade_args.common.rng_seed,
                ..Default::default()
            };
            cascade::run(config, model, sink).map(Report::Cascade)
        }
    }
}

/// The entry point for a model binary: parses the command line, builds the
/// model from the program arguments, runs the selected scheduler against
/// standard output, and exits.
///
/// Exits 0 on success and 1 on an unrecoverable failure, reporting the
/// failure on standard error.
pub fn run_program<M, F>(name: &str, build: F) -> !
where
    M: Model,
    F: FnOnce(&[String]) -> Result<M, anyhow::Error>,
{
    set_abort_on_panic();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    let model = match build(args.program_args()) {
        Ok(model) => model,
        Err(err) => {
            eprintln!("{}: fatal: {:#}", name, err);
            process::exit(1);
        }
    };
    let sink = OutputSink::stdout();
    match dispatch(&args, model, &sink) {
        Ok(_) => process::exit(0),
        Err(err) => {
            eprintln!("{}: fatal: {}", name, err);
            process::exit(1);
        }
    }
}

/// Particles run user code on pool threads; a panic there is a programmer
/// bug that must not leave the engine wedged at a barrier. Abort instead.
fn set_abort_on_panic() {
    let old_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        old_hook(info);
        process::abort();
    }));
}
