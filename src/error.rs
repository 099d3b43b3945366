// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for building a pool and submitting tasks.

use std::io;
use thiserror::Error;

/// Errors returned by [`ThreadPoolBuilder::build()`](crate::ThreadPoolBuilder::build).
#[derive(Debug, Error)]
pub enum BuildError {
    /// The OS failed to create a worker thread. The workers spawned before
    /// the failure have been shut down and joined.
    #[error("failed to spawn worker thread {worker}")]
    Spawn {
        /// Index of the worker that failed to spawn.
        worker: usize,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Errors returned by [`ThreadPool::submit()`](crate::ThreadPool::submit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The pool has begun shutting down; no new task is admitted, even when
    /// queue slots are free.
    #[error("task submission cancelled: the pool is shutting down")]
    Cancelled,
}
