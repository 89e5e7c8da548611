// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The inference engine core of a probabilistic-programming runtime.
//!
//! A user program is a [`Model`]: a clonable state machine whose
//! [`resume`](Model::resume) method runs the program forward from one
//! synchronizing observe to the next. The engine executes many *particles*
//! (replicas of the program, each with its own [`Trace`]) in parallel on a
//! worker pool and periodically resamples them, so that surviving traces
//! approximate the posterior distribution encoded by the program and its
//! observations.
//!
//! Four interchangeable particle schedulers share this substrate:
//!
//! * [`smc`] — sequential Monte Carlo with adaptive, ESS-triggered
//!   resampling over a fixed particle count;
//! * [`pg`] — particle Gibbs (conditional SMC with a retained trace across
//!   MCMC iterations);
//! * [`pimh`] — particle-independent Metropolis–Hastings over whole SMC
//!   sweeps;
//! * [`cascade`] — an asymptotically unbiased particle cascade with
//!   unbounded, asynchronous offspring generation.
//!
//! Coordination is a supervisor loop per scheduler (the hub) that owns all
//! shared state — per-slot weights, offspring counts, the retained-trace
//! table, per-observation running averages — and exchanges particles with
//! the workers over channels. There are no cross-thread locks beyond the
//! standard-output sink.

mod particle;
mod pool;

pub mod bnp;
pub mod cascade;
pub mod cli;
pub mod config;
pub mod error;
pub mod mem;
pub mod model;
pub mod output;
pub mod pg;
pub mod pimh;
pub mod resample;
pub mod smc;
pub mod trace;

pub use config::{CascadeConfig, PgConfig, PimhConfig, SmcConfig};
pub use error::Error;
pub use model::{simulate, Model, Simulation, Step};
pub use output::OutputSink;
pub use trace::Trace;
