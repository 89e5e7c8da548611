// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! In-flight particles.

use ppl_erp::Erp;

use crate::model::{Model, Step};
use crate::trace::Trace;

/// One concurrently executing replica of the user program: the model value
/// (which is its own continuation) plus its trace.
#[derive(Debug, Clone)]
pub(crate) struct Particle<M> {
    pub model: M,
    pub trace: Trace,
    /// For particle Gibbs: one snapshot-table index per synchronizing
    /// observe this lineage has passed (the ancestry chain).
    pub ancestry: Vec<usize>,
}

impl<M: Model> Particle<M> {
    pub fn root(model: M, erp: Erp) -> Particle<M> {
        Particle {
            model,
            trace: Trace::root(erp),
            ancestry: Vec::new(),
        }
    }

    /// Runs the particle up to its next synchronizing observe or to
    /// completion, folding the observation into the trace weight.
    pub fn advance(&mut self) -> Step {
        let step = self.model.resume(&mut self.trace);
        if let Step::Observe(ln_p) = step {
            self.trace.apply_observe(ln_p);
        }
        step
    }

    /// Clones this particle as a resampling offspring.
    ///
    /// The child inherits the full model and trace state, including the
    /// predict buffer and current weight; its generator is reseeded from a
    /// draw on the parent's stream so the lineages diverge immediately.
    pub fn fork(&mut self) -> Particle<M> {
        let seed = self.trace.erp.fork_seed();
        let mut child = self.clone();
        child.trace.erp = Erp::with_seed(seed);
        child
    }
}
