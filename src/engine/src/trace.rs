// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-particle trace state.

use std::fmt;
use std::fmt::Write;

use ppl_erp::Erp;

/// The particle-local state a program manipulates while it runs: the random
/// number generator, the accumulated weights, and the predict buffer.
///
/// A trace travels with its particle. When a particle is cloned at a
/// resampling point the trace is cloned too, except that the child's
/// generator is reseeded from a parent draw so the lineages diverge.
#[derive(Debug, Clone)]
pub struct Trace {
    pub(crate) erp: Erp,
    /// Weight accumulated since the last resampling point.
    pub(crate) log_weight: f64,
    /// Weight accumulated since the last synchronizing observe; folded into
    /// `log_weight` at each synchronization point.
    pub(crate) log_weight_increment: f64,
    /// Cumulative log-likelihood of the trace. Never reset.
    pub(crate) log_likelihood: f64,
    /// Index of the next synchronizing observe this particle will encounter.
    pub(crate) current_observe: usize,
    /// Collapsed-offspring multiplicity (cascade only; 1 elsewhere).
    pub(crate) pseudocount: u64,
    /// Ordinal of the root initialization that produced this particle
    /// (cascade only).
    pub(crate) initial_index: u64,
    pub(crate) predict: String,
    /// During a pre-run, predict output is suppressed.
    pub(crate) prerun: bool,
}

impl Trace {
    pub(crate) fn root(erp: Erp) -> Trace {
        Trace {
            erp,
            log_weight: 0.0,
            log_weight_increment: 0.0,
            log_likelihood: 0.0,
            current_observe: 0,
            pseudocount: 1,
            initial_index: 0,
            predict: String::new(),
            prerun: false,
        }
    }

    /// The random number generator backing this trace's lineage.
    pub fn erp(&mut self) -> &mut Erp {
        &mut self.erp
    }

    /// Accumulates an unsynchronized log-probability contribution.
    ///
    /// This is the non-barrier half of `observe`: the weight is recorded but
    /// the particle keeps running. It is folded into the particle weight at
    /// the next synchronizing observe, so the result of inference is the
    /// same as if the contribution had been made there.
    pub fn weight_trace(&mut self, ln_p: f64) {
        self.log_likelihood += ln_p;
        self.log_weight_increment += ln_p;
    }

    /// Appends `name,value` to the predict buffer.
    ///
    /// Output is buffered per particle and flushed atomically when the
    /// particle completes, so lines from concurrent particles never
    /// interleave. During a scheduler pre-run this is a no-op.
    pub fn predict<V: fmt::Display>(&mut self, name: &str, value: V) {
        if self.prerun {
            return;
        }
        // Writing to a String cannot fail.
        let _ = writeln!(self.predict, "{},{}", name, value);
    }

    /// Appends a preformatted line (which must end in a newline) to the
    /// predict buffer.
    pub fn predict_raw(&mut self, line: &str) {
        if self.prerun {
            return;
        }
        debug_assert!(line.ends_with('\n'));
        self.predict.push_str(line);
    }

    /// The weight accumulated since the last resampling point.
    pub fn log_weight(&self) -> f64 {
        self.log_weight
    }

    /// The cumulative log-likelihood of this trace.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// The index of the next synchronizing observe.
    pub fn current_observe(&self) -> usize {
        self.current_observe
    }

    /// Registers a synchronizing observe: folds the observation and any
    /// pending unsynchronized weight into the particle weight and advances
    /// the observe index.
    pub(crate) fn apply_observe(&mut self, ln_p: f64) {
        self.log_likelihood += ln_p;
        self.log_weight_increment += ln_p;
        self.fold_pending();
        self.current_observe += 1;
    }

    /// Folds pending unsynchronized weight into the particle weight without
    /// counting an observe.
    pub(crate) fn fold_pending(&mut self) {
        self.log_weight += self.log_weight_increment;
        self.log_weight_increment = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace() -> Trace {
        Trace::root(Erp::with_seed(0))
    }

    #[test]
    fn unsynchronized_weight_folds_at_observe() {
        let mut t = trace();
        t.weight_trace(-1.5);
        assert_eq!(t.log_weight(), 0.0);
        t.apply_observe(-2.0);
        assert_eq!(t.log_weight(), -3.5);
        assert_eq!(t.log_likelihood(), -3.5);
        assert_eq!(t.current_observe(), 1);
        // Resetting the weight does not touch the likelihood.
        t.log_weight = 0.0;
        t.apply_observe(-1.0);
        assert_eq!(t.log_weight(), -1.0);
        assert_eq!(t.log_likelihood(), -4.5);
    }

    #[test]
    fn predict_buffers_lines_in_order() {
        let mut t = trace();
        t.predict("a", 1);
        t.predict("b", 2.5);
        t.predict_raw("c,free form\n");
        assert_eq!(t.predict, "a,1\nb,2.5\nc,free form\n");
    }

    #[test]
    fn prerun_suppresses_predict() {
        let mut t = trace();
        t.prerun = true;
        t.predict("a", 1);
        t.predict_raw("b,2\n");
        assert!(t.predict.is_empty());
    }
}
