// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The user-program contract.

use ppl_erp::Erp;

use crate::trace::Trace;

/// The outcome of running a program segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// The program reached a synchronizing observe, contributing the given
    /// log-probability to the trace weight. The scheduler will suspend the
    /// particle here, and may clone or discard it before resuming.
    Observe(f64),
    /// The program ran to completion.
    Done,
}

/// A probabilistic program, expressed as a resumable computation.
///
/// The engine calls [`resume`](Model::resume) repeatedly. Each call runs the
/// program from its last synchronizing observe (or from the beginning) up to
/// the next one, returning [`Step::Observe`] with that observation's
/// log-probability, or [`Step::Done`] once the program has finished. All
/// state the program carries across observes lives in the model value
/// itself: a model is its own continuation, and cloning it at an observe is
/// what lets one in-flight trace branch into several offspring.
///
/// Within a segment the program may draw random values from
/// [`Trace::erp`], accumulate *unsynchronized* weight with
/// [`Trace::weight_trace`], and record output with [`Trace::predict`].
/// Unsynchronized weight is folded into the particle weight at the next
/// synchronization point, so it never changes which observations
/// synchronize.
///
/// Every trace of the program must yield the same number of synchronizing
/// observes: the schedulers barrier all particles at each observe in turn,
/// and verify this invariant at runtime. Randomizing the number of
/// `resume` calls (for example, observing inside a stochastic loop) is a
/// programmer error and aborts inference with a diagnostic.
pub trait Model: Clone + Send + 'static {
    /// Runs the program up to its next synchronizing observe, or to
    /// completion.
    fn resume(&mut self, trace: &mut Trace) -> Step;
}

/// The outcome of a single forward execution of a program, with no
/// inference: observations weight the trace but never suspend it.
#[derive(Debug, Clone)]
pub struct Simulation {
    /// Synchronizing observes the program yielded.
    pub observes: usize,
    /// The trace's cumulative log-likelihood.
    pub log_likelihood: f64,
    /// The predict buffer.
    pub predict: String,
}

/// Runs `model` once, straight through, and returns what it produced.
///
/// Useful for forward simulation from the prior and for checking a program's
/// observe structure without standing up a scheduler.
pub fn simulate<M: Model>(model: M, erp: Erp) -> Simulation {
    let mut particle = crate::particle::Particle::root(model, erp);
    let mut observes = 0;
    while let Step::Observe(_) = particle.advance() {
        observes += 1;
    }
    Simulation {
        observes,
        log_likelihood: particle.trace.log_likelihood(),
        predict: particle.trace.predict,
    }
}
