// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The particle worker pool.
//!
//! A fixed set of OS threads executes particle *segments*: a worker receives
//! a particle, runs it to its next synchronizing observe (or to completion),
//! and sends it back with the resulting [`Step`]. All scheduling decisions
//! stay with the scheduler hub that owns the pool; workers never touch
//! shared state. The operating system arbitrates which segments run when,
//! which is why arrival order at a barrier is not deterministic even under a
//! fixed seed.

use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::warn;

use crate::error::Error;
use crate::model::{Model, Step};
use crate::particle::Particle;

pub(crate) struct Pool<M: Model> {
    jobs_tx: Option<Sender<Particle<M>>>,
    results_rx: Receiver<(Particle<M>, Step)>,
    workers: Vec<JoinHandle<()>>,
}

impl<M: Model> Pool<M> {
    /// Starts `workers` particle workers.
    pub fn new(workers: usize) -> Result<Pool<M>, Error> {
        assert!(workers > 0);
        let (jobs_tx, jobs_rx) = unbounded::<Particle<M>>();
        let (results_tx, results_rx) = unbounded();
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let jobs_rx = jobs_rx.clone();
            let results_tx = results_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("particle-{}", i))
                .spawn(move || worker(jobs_rx, results_tx))
                .map_err(Error::PoolInit)?;
            handles.push(handle);
        }
        Ok(Pool {
            jobs_tx: Some(jobs_tx),
            results_rx,
            workers: handles,
        })
    }

    /// Submits a particle for execution of its next segment.
    pub fn submit(&self, particle: Particle<M>) {
        self.jobs_tx
            .as_ref()
            .expect("pool is running")
            .send(particle)
            .expect("workers alive while pool is running");
    }

    /// Waits for exactly `n` particles to finish their segments.
    ///
    /// The counterpart of a blocking child reap: returns in completion
    /// order, and never returns fewer than `n`.
    pub fn collect(&self, n: usize) -> Vec<(Particle<M>, Step)> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.recv());
        }
        out
    }

    /// Waits for one particle to finish its segment.
    pub fn recv(&self) -> (Particle<M>, Step) {
        self.results_rx
            .recv()
            .expect("workers alive while particles are in flight")
    }

    /// Sweeps up already-finished particles without blocking.
    pub fn collect_ready(&self) -> Vec<(Particle<M>, Step)> {
        let mut out = Vec::new();
        loop {
            match self.results_rx.try_recv() {
                Ok(result) => out.push(result),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return out,
            }
        }
    }
}

impl<M: Model> Drop for Pool<M> {
    fn drop(&mut self) {
        // Closing the job channel stops the workers; joining them guarantees
        // no thread outlives the scheduler on any exit path.
        drop(self.jobs_tx.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("particle worker panicked during shutdown");
            }
        }
    }
}

fn worker<M: Model>(jobs_rx: Receiver<Particle<M>>, results_tx: Sender<(Particle<M>, Step)>) {
    while let Ok(mut particle) = jobs_rx.recv() {
        let step = particle.advance();
        if results_tx.send((particle, step)).is_err() {
            // The scheduler hub has gone away; nothing left to do.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use ppl_erp::Erp;

    use super::*;
    use crate::trace::Trace;

    #[derive(Clone)]
    struct TwoObserves {
        seen: usize,
    }

    impl Model for TwoObserves {
        fn resume(&mut self, _trace: &mut Trace) -> Step {
            if self.seen == 2 {
                return Step::Done;
            }
            self.seen += 1;
            Step::Observe(-0.5)
        }
    }

    #[test]
    fn collect_returns_exactly_n() {
        let pool = Pool::new(3).unwrap();
        for i in 0..8 {
            pool.submit(Particle::root(TwoObserves { seen: 0 }, Erp::with_seed(i)));
        }
        let arrivals = pool.collect(8);
        assert_eq!(arrivals.len(), 8);
        assert!(arrivals.iter().all(|(_, s)| *s == Step::Observe(-0.5)));
        // Resubmitting drives the particles to completion.
        for (p, _) in arrivals {
            pool.submit(p);
        }
        let arrivals = pool.collect(8);
        for (p, _) in arrivals {
            pool.submit(p);
        }
        let done = pool.collect(8);
        assert!(done.iter().all(|(_, s)| *s == Step::Done));
    }

    #[test]
    fn collect_ready_never_blocks() {
        let pool: Pool<TwoObserves> = Pool::new(1).unwrap();
        assert!(pool.collect_ready().is_empty());
        pool.submit(Particle::root(TwoObserves { seen: 0 }, Erp::with_seed(1)));
        // Eventually the one in-flight particle shows up in a sweep.
        let mut swept = Vec::new();
        while swept.is_empty() {
            swept = pool.collect_ready();
        }
        assert_eq!(swept.len(), 1);
    }
}
