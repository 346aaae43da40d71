// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Task
//!
//! Single-assignment, cloneable completion handle. A [`Task`] is either pending or done with a
//! `Result<T, Error>`. Continuations registered with [`Task::on_complete`] run synchronously on
//! the thread that completes the task, or immediately on the registering thread when the task is
//! already done. This is what lets the execution serializer hand ownership of a drain loop to
//! "whatever thread finishes the current job" without any thread ever waiting on a lock.
//!
//! Tasks can also be awaited: `Task<T>` implements [`IntoFuture`].
//!

use crate::Error;

use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use std::{
    fmt::{Debug, Formatter},
    future::{Future, IntoFuture},
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Continuation invoked once with the final result.
type Continuation<T> = Box<dyn FnOnce(&Result<T, Error>) + Send + 'static>;

enum State<T> {
    Pending(Vec<Continuation<T>>),
    Done(Arc<Result<T, Error>>),
}

/// Asynchronous completion handle.
///
/// Cloning a task yields another handle to the same completion. The first call to
/// [`complete`](Task::complete) wins; later calls are ignored and return `false`.
///
/// # Examples
///
/// ```ignore
/// use runtime::Task;
///
/// let task = Task::new();
/// let doubled = task.map(|value: &u32| value * 2);
/// task.succeed(21);
/// assert_eq!(doubled.result(), Some(Ok(42)));
/// ```
///
pub struct Task<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Debug for Task<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let status = match &*self.state.lock() {
            State::Pending(_) => "pending",
            State::Done(result) if result.is_ok() => "succeeded",
            State::Done(_) => "failed",
        };
        f.debug_struct("Task").field("status", &status).finish()
    }
}

impl<T> Default for Task<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Task<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a pending task.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    /// Creates a task already completed with `value`.
    pub fn completed(value: T) -> Self {
        Self::done(Ok(value))
    }

    /// Creates a task already failed with `error`.
    pub fn failed(error: Error) -> Self {
        Self::done(Err(error))
    }

    fn done(result: Result<T, Error>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Done(Arc::new(result)))),
        }
    }

    /// Completes the task and runs every registered continuation on the current thread.
    ///
    /// # Returns
    ///
    /// Returns `false` if the task was already done.
    ///
    pub fn complete(&self, result: Result<T, Error>) -> bool {
        let result = Arc::new(result);
        let previous = {
            let mut state = self.state.lock();
            if let State::Done(_) = &*state {
                return false;
            }
            std::mem::replace(&mut *state, State::Done(result.clone()))
        };
        if let State::Pending(continuations) = previous {
            for continuation in continuations {
                continuation(&result);
            }
        }
        true
    }

    /// Completes the task successfully.
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Completes the task with an error.
    pub fn fail(&self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Cancels the task. Cancellation is an ordinary failure carrying [`Error::Cancelled`]; work
    /// already scheduled to produce the result is not interrupted.
    pub fn cancel(&self) -> bool {
        self.complete(Err(Error::Cancelled))
    }

    /// True once a result is available.
    pub fn is_done(&self) -> bool {
        matches!(&*self.state.lock(), State::Done(_))
    }

    /// True if the task completed with an error (cancellation included).
    pub fn is_failed(&self) -> bool {
        matches!(&*self.state.lock(), State::Done(result) if result.is_err())
    }

    /// True if the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.state.lock(),
            State::Done(result) if matches!(result.as_ref(), Err(Error::Cancelled))
        )
    }

    /// Registers a continuation.
    ///
    /// The continuation runs exactly once: on the completing thread if the task is pending, or
    /// right away on the calling thread if it is already done.
    ///
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(&Result<T, Error>) + Send + 'static,
    {
        let result = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(continuations) => {
                    continuations.push(Box::new(continuation));
                    return;
                }
                State::Done(result) => result.clone(),
            }
        };
        continuation(&result);
    }

    /// Derives a task whose value is `f` applied to this task's value. Errors pass through.
    pub fn map<U, F>(&self, f: F) -> Task<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let mapped = Task::new();
        let target = mapped.clone();
        self.on_complete(move |result| {
            target.complete(match result {
                Ok(value) => Ok(f(value)),
                Err(error) => Err(error.clone()),
            });
        });
        mapped
    }

    /// Runs `future` on the current tokio runtime and resolves a new task with its output.
    ///
    /// A panicking future fails the task with [`Error::Invocation`] instead of leaving it pending.
    ///
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let task = Task::new();
        let target = task.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Invocation("task panicked".to_owned()))
                });
            target.complete(result);
        });
        task
    }

    /// Fails the task with [`Error::Timeout`] if it is still pending after `duration`.
    ///
    /// The timer stops as soon as the task completes. Must be called from within a tokio runtime.
    ///
    pub fn with_timeout(&self, duration: Duration) -> Self {
        let (sender, completed) = oneshot::channel::<()>();
        self.on_complete(move |_| {
            let _ = sender.send(());
        });
        let target = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = completed => {}
                _ = tokio::time::sleep(duration) => {
                    if target.complete(Err(Error::Timeout)) {
                        debug!("Task expired after {:?}.", duration);
                    }
                }
            }
        });
        self.clone()
    }
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Snapshot of the result, `None` while pending.
    pub fn result(&self) -> Option<Result<T, Error>> {
        match &*self.state.lock() {
            State::Pending(_) => None,
            State::Done(result) => Some(result.as_ref().clone()),
        }
    }

    /// Links `other` to this task: when this task completes, `other` completes with the same
    /// result.
    pub fn propagate_to(&self, other: &Task<T>) {
        let other = other.clone();
        self.on_complete(move |result| {
            other.complete(result.clone());
        });
    }

    /// Completes when every task has succeeded, or fails with the first error.
    pub fn all_of(tasks: Vec<Task<T>>) -> Task<Vec<T>> {
        let all = Task::new();
        if tasks.is_empty() {
            all.succeed(Vec::new());
            return all;
        }
        let remaining = Arc::new(AtomicUsize::new(tasks.len()));
        let slots: Arc<Mutex<Vec<Option<T>>>> =
            Arc::new(Mutex::new((0..tasks.len()).map(|_| None).collect()));
        for (index, task) in tasks.into_iter().enumerate() {
            let all = all.clone();
            let remaining = remaining.clone();
            let slots = slots.clone();
            task.on_complete(move |result| match result {
                Ok(value) => {
                    slots.lock()[index] = Some(value.clone());
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        let values =
                            slots.lock().drain(..).flatten().collect::<Vec<T>>();
                        all.succeed(values);
                    }
                }
                Err(error) => {
                    all.fail(error.clone());
                }
            });
        }
        all
    }

    /// Completes with the result of whichever task completes first.
    pub fn any_of(tasks: Vec<Task<T>>) -> Task<T> {
        let any = Task::new();
        if tasks.is_empty() {
            any.fail(Error::Invocation("any_of over an empty set".to_owned()));
            return any;
        }
        for task in tasks {
            task.propagate_to(&any);
        }
        any
    }
}

impl<T> IntoFuture for Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, Error>;
    type IntoFuture = BoxFuture<'static, Result<T, Error>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let (sender, receiver) = oneshot::channel();
            self.on_complete(move |result| {
                let _ = sender.send(result.clone());
            });
            receiver.await.map_err(|_| Error::Closed)?
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_first_completion_wins() {
        let task = Task::new();
        assert!(!task.is_done());
        assert!(task.succeed(1));
        assert!(!task.fail(Error::Timeout));
        assert!(!task.cancel());
        assert_eq!(task.result(), Some(Ok(1)));
        assert!(!task.is_failed());
    }

    #[test]
    fn test_continuations_run_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task: Task<u32> = Task::new();
        let c = counter.clone();
        task.on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.succeed(5);
        task.succeed(6);
        // Registered after completion: runs immediately.
        let c = counter.clone();
        task.on_complete(move |result| {
            assert_eq!(result, &Ok(5));
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel() {
        let task: Task<()> = Task::new();
        assert!(task.cancel());
        assert!(task.is_cancelled());
        assert!(task.is_failed());
        assert_eq!(task.result(), Some(Err(Error::Cancelled)));
    }

    #[test]
    fn test_map_and_propagate() {
        let source: Task<u32> = Task::new();
        let mapped = source.map(|value| value.to_string());
        let linked = Task::new();
        source.propagate_to(&linked);
        source.succeed(7);
        assert_eq!(mapped.result(), Some(Ok("7".to_owned())));
        assert_eq!(linked.result(), Some(Ok(7)));

        let failing: Task<u32> = Task::failed(Error::Closed);
        assert_eq!(failing.map(|v| v + 1).result(), Some(Err(Error::Closed)));
    }

    #[test]
    fn test_all_of_and_any_of() {
        let a = Task::new();
        let b = Task::new();
        let all = Task::all_of(vec![a.clone(), b.clone()]);
        let any = Task::any_of(vec![a.clone(), b.clone()]);
        b.succeed(2);
        assert_eq!(any.result(), Some(Ok(2)));
        assert!(!all.is_done());
        a.succeed(1);
        assert_eq!(all.result(), Some(Ok(vec![1, 2])));

        let c: Task<u8> = Task::new();
        let all = Task::all_of(vec![c.clone(), Task::failed(Error::Timeout)]);
        assert_eq!(all.result(), Some(Err(Error::Timeout)));
        assert_eq!(Task::<u8>::all_of(vec![]).result(), Some(Ok(vec![])));
    }

    #[tokio::test]
    async fn test_await_spawned_task() {
        let task = Task::spawn(async { Ok::<_, Error>(40 + 2) });
        assert_eq!(task.await, Ok(42));

        let explode = true;
        let panicking: Task<u8> = Task::spawn(async move {
            if explode {
                panic!("boom");
            }
            Ok(0)
        });
        assert!(matches!(panicking.await, Err(Error::Invocation(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let task: Task<u8> = Task::new();
        let timed = task.with_timeout(Duration::from_millis(20));
        assert_eq!(timed.await, Err(Error::Timeout));
        assert!(task.is_failed());

        let fast = Task::completed(1u8).with_timeout(Duration::from_millis(20));
        assert_eq!(fast.await, Ok(1));
    }

    #[tokio::test]
    async fn test_timer_stops_when_task_completes() {
        let metrics = tokio::runtime::Handle::current().metrics();
        let task: Task<u8> = Task::new();
        let _timed = task.with_timeout(Duration::from_secs(3600));
        assert_eq!(metrics.num_alive_tasks(), 1);

        task.succeed(3);
        for _ in 0..100 {
            if metrics.num_alive_tasks() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(metrics.num_alive_tasks(), 0);
        assert_eq!(task.result(), Some(Ok(3)));
    }
}
