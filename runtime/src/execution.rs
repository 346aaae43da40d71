// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Execution serializer
//!
//! Non-blocking, per-key mutual exclusion over a thread pool. Jobs submitted to one
//! [`ExecutionSerializer`] run one at a time and in submission order, no matter how many threads
//! submit them. No thread ever waits for the exclusive right to run jobs: a submitter either
//! claims the drain loop or leaves the queued job to whoever currently holds it.
//!
//! # Drain loop
//!
//! While the queue is not empty the loop claims ownership (`false -> true`), pops one job and
//! runs it:
//!
//! - the first job pulled by an external caller runs on the [`Executor`] (*remote* mode), so user
//!   code never runs on the submitter's thread;
//! - later jobs run on the thread that finished the previous one (*local* mode).
//!
//! After a job returns its [`Task`], the thread that ran it checks whether the task is already
//! done. If so, ownership is released and draining continues. Otherwise ownership is kept and a
//! continuation on the task releases it and resumes draining in local mode. Doing the check on the
//! thread that ran the job, after the job returned, is what keeps a task that resolves
//! synchronously from racing with the continuation path.
//!

use crate::{
    Error,
    executor::Executor,
    task::Task,
};

use parking_lot::Mutex;
use tracing::{debug, error};

use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Queued job: runs the user supplier and returns a task that completes when the job is over.
type QueueItem = Box<dyn FnOnce() -> Task<()> + Send + 'static>;

/// Per-key execution serializer.
///
/// Serializers are shared through `Arc`; the drain loop keeps a clone alive while a job is in
/// flight.
///
pub struct ExecutionSerializer {
    /// Pool used for the first job of a drain loop started by an external caller.
    executor: Arc<dyn Executor>,
    /// Ownership of the drain loop.
    locked: AtomicBool,
    /// Pending jobs, FIFO.
    queue: Mutex<VecDeque<QueueItem>>,
    /// Approximate number of pending jobs. Only used for backpressure.
    size: AtomicUsize,
}

impl Debug for ExecutionSerializer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSerializer")
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .field("size", &self.size.load(Ordering::Relaxed))
            .finish()
    }
}

impl ExecutionSerializer {
    /// Creates an idle serializer.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            locked: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Schedules `supplier` to run after every job previously submitted to this serializer.
    ///
    /// # Arguments
    ///
    /// * `supplier` - Produces the job's task. It is invoked at most once.
    /// * `max_queue_size` - Backlog bound. The job currently running does not count.
    ///
    /// # Returns
    ///
    /// Returns a task linked to the task the supplier produces. If the supplier panics, the
    /// returned task fails with [`Error::Invocation`] and the queue keeps draining.
    ///
    /// # Errors
    ///
    /// The returned task is already failed with [`Error::QueueFull`] when the backlog reached
    /// `max_queue_size`. Nothing is queued in that case.
    ///
    pub fn execute_serialized<R, F>(
        self: &Arc<Self>,
        supplier: F,
        max_queue_size: usize,
    ) -> Task<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Task<R> + Send + 'static,
    {
        let result = Task::new();
        let size = self.size.load(Ordering::Acquire);
        if size >= max_queue_size {
            debug!("Rejecting job, execution queue is full ({} pending).", size);
            result.fail(Error::QueueFull { size });
            return result;
        }

        let handle = result.clone();
        let item: QueueItem = Box::new(move || {
            match catch_unwind(AssertUnwindSafe(supplier)) {
                Ok(task) => {
                    task.propagate_to(&handle);
                    task.map(|_| ())
                }
                Err(_) => {
                    error!("Serialized job panicked!");
                    handle.fail(Error::Invocation("job panicked".to_owned()));
                    Task::completed(())
                }
            }
        });
        // Count before publishing so a concurrent drain never decrements below zero.
        self.size.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().push_back(item);
        self.try_execute(false);
        result
    }

    /// True while a job is running or queued.
    pub fn is_busy(&self) -> bool {
        self.locked.load(Ordering::Acquire) || self.has_pending()
    }

    /// Approximate number of queued jobs.
    pub fn pending(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn has_pending(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Drain loop.
    ///
    /// # Arguments
    ///
    /// * `local` - Run the next job on the current thread instead of the executor.
    ///
    fn try_execute(self: &Arc<Self>, local: bool) {
        while self.has_pending() {
            if !self.try_lock() {
                // Someone else owns the loop and will see our job.
                return;
            }
            let Some(item) = self.queue.lock().pop_front() else {
                self.unlock();
                continue;
            };
            self.size.fetch_sub(1, Ordering::AcqRel);

            if local {
                if !self.run(item) {
                    return;
                }
            } else {
                let this = self.clone();
                self.executor.execute(Box::new(move || {
                    if this.run(item) {
                        this.try_execute(true);
                    }
                }));
                return;
            }
        }
    }

    /// Runs one job while holding ownership.
    ///
    /// # Returns
    ///
    /// Returns `true` when the job's task was already done and ownership has been released, so the
    /// caller may keep draining. Returns `false` when ownership moved to the task's continuation.
    ///
    fn run(self: &Arc<Self>, item: QueueItem) -> bool {
        let task = item();
        if task.is_done() {
            self.unlock();
            return true;
        }
        let this = self.clone();
        task.on_complete(move |_| {
            this.unlock();
            this.try_execute(true);
        });
        false
    }
}
