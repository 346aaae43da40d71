// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Executor
//!
//! Work-submission abstraction used by the execution serializer to run the first job of a drain
//! loop away from the caller's thread.
//!

use tokio::runtime::Handle;

/// Unit of work submitted to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs, usually on a thread pool.
pub trait Executor: Send + Sync + 'static {
    /// Submits a job. Must not run the job on the calling thread.
    fn execute(&self, job: Job);
}

/// Executor backed by a tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Creates an executor on the given runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates an executor on the runtime the caller is running in.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    ///
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}
