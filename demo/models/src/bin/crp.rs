// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use anyhow::Context;

use ppl_models::Crp;

/// Program options (after `--`): an optional concentration parameter for
/// the Pólya urn, default 1.0.
fn main() {
    ppl_engine::cli::run_program("crp", |args| {
        let concentration = match args {
            [] => 1.0,
            [alpha] => alpha
                .parse()
                .with_context(|| format!("invalid concentration {:?}", alpha))?,
            _ => anyhow::bail!("usage: crp <scheduler options> [-- CONCENTRATION]"),
        };
        Ok(Crp::new(concentration))
    })
}
