// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Engine error types.

use std::io;

/// Errors surfaced by the particle schedulers.
///
/// Initialization failures are fatal: binaries report them on standard error
/// and exit with status 1. Trace-shape violations indicate a program whose
/// count of synchronizing observes varies across traces, which no scheduler
/// can execute correctly; they are reported with enough context to identify
/// the offending observation. Internal invariant violations (offspring-count
/// mismatches, retained-slot inconsistencies) are asserts, not errors: they
/// are bugs in the engine, and abort.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The worker pool could not be started.
    #[error("failed to start worker pool")]
    PoolInit(#[source] io::Error),

    /// A scheduler was configured with unusable parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The program's synchronizing-observe structure varies across traces.
    #[error("trace shape violation: {0}")]
    TraceShape(String),
}
