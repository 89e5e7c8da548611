// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Argument-keyed memoization for stochastic functions.
//!
//! A memoized random function draws its value once per distinct argument and
//! replays it thereafter, which is how probabilistic programs express
//! exchangeable random functions (for example, the class assignment of the
//! n-th customer in a CRP mixture). The cache is part of particle state: it
//! clones with the particle, so each lineage keeps its own draws.

use std::collections::HashMap;
use std::hash::Hash;

/// An argument-keyed cache over a stochastic function.
#[derive(Debug, Clone, Default)]
pub struct Memo<A, R> {
    cache: HashMap<A, R>,
}

impl<A: Eq + Hash + Clone, R: Clone> Memo<A, R> {
    pub fn new() -> Memo<A, R> {
        Memo {
            cache: HashMap::new(),
        }
    }

    /// Returns the cached value for `arg`, computing and caching it with `f`
    /// on first use.
    ///
    /// The closure receives the argument; any state it needs beyond that
    /// (typically the particle's trace) is captured by the caller. The
    /// closure runs only on a cache miss, so its random draws happen at most
    /// once per argument per lineage.
    pub fn invoke<F>(&mut self, arg: A, f: F) -> R
    where
        F: FnOnce(&A) -> R,
    {
        if let Some(cached) = self.cache.get(&arg) {
            return cached.clone();
        }
        let value = f(&arg);
        self.cache.insert(arg, value.clone());
        value
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drops every cached entry.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_computes_once_per_argument() {
        let mut calls = 0;
        let mut memo = Memo::new();
        for _ in 0..3 {
            let v = memo.invoke(7, |&a| {
                calls += 1;
                a * 2
            });
            assert_eq!(v, 14);
        }
        assert_eq!(calls, 1);
        memo.invoke(8, |&a| {
            calls += 1;
            a * 2
        });
        assert_eq!(calls, 2);
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn clones_are_independent() {
        let mut memo = Memo::new();
        memo.invoke("a", |_| 1);
        let mut copy = memo.clone();
        copy.invoke("b", |_| 2);
        assert_eq!(memo.len(), 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn clear_resets_the_cache() {
        let mut memo = Memo::new();
        memo.invoke(1, |_| 1);
        memo.clear();
        assert!(memo.is_empty());
    }
}
