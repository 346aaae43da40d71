// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Multi-execution serializer
//!
//! Keyed registry of [`ExecutionSerializer`]s. Jobs offered under the same key are serialized;
//! jobs under different keys run in parallel. Serializers are created lazily and kept in an
//! explicit arena; [`MultiExecutionSerializer::sweep`] drops the ones that are idle and no longer
//! held by anyone else.
//!

use crate::{
    execution::ExecutionSerializer,
    executor::Executor,
    task::Task,
};

use parking_lot::Mutex;
use tracing::debug;

use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};

/// Registry of per-key execution serializers.
pub struct MultiExecutionSerializer<K> {
    executor: Arc<dyn Executor>,
    serializers: Mutex<HashMap<K, Arc<ExecutionSerializer>>>,
}

impl<K> MultiExecutionSerializer<K>
where
    K: Clone + Debug + Eq + Hash + Send + 'static,
{
    /// Creates an empty registry whose serializers run on `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            serializers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the serializer for `key`, creating it on first use.
    pub fn serializer(&self, key: &K) -> Arc<ExecutionSerializer> {
        let mut serializers = self.serializers.lock();
        if let Some(serializer) = serializers.get(key) {
            return serializer.clone();
        }
        debug!("Creating execution serializer for {:?}.", key);
        let serializer =
            Arc::new(ExecutionSerializer::new(self.executor.clone()));
        serializers.insert(key.clone(), serializer.clone());
        serializer
    }

    /// Offers a job to the serializer of `key`.
    ///
    /// # Returns
    ///
    /// The job's task, already failed with [`Error::QueueFull`](crate::Error::QueueFull) when
    /// the key's backlog reached `max_queue_size`.
    ///
    pub fn offer_job<R, F>(&self, key: &K, job: F, max_queue_size: usize) -> Task<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Task<R> + Send + 'static,
    {
        self.serializer(key).execute_serialized(job, max_queue_size)
    }

    /// True if any serializer has a running or queued job.
    pub fn is_busy(&self) -> bool {
        self.serializers
            .lock()
            .values()
            .any(|serializer| serializer.is_busy())
    }

    /// Drops idle serializers that nobody outside the registry holds.
    ///
    /// # Returns
    ///
    /// Number of serializers removed.
    ///
    pub fn sweep(&self) -> usize {
        let mut serializers = self.serializers.lock();
        let before = serializers.len();
        serializers.retain(|_, serializer| {
            Arc::strong_count(serializer) > 1 || serializer.is_busy()
        });
        let removed = before - serializers.len();
        if removed > 0 {
            debug!("Swept {} idle execution serializers.", removed);
        }
        removed
    }

    /// Number of live serializers.
    pub fn len(&self) -> usize {
        self.serializers.lock().len()
    }

    /// True when no serializer is live.
    pub fn is_empty(&self) -> bool {
        self.serializers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{Error, execution::tests::wait_idle, executor::TokioExecutor};

    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    fn registry() -> MultiExecutionSerializer<String> {
        MultiExecutionSerializer::new(Arc::new(TokioExecutor::current()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_keys_run_in_parallel() {
        let registry = registry();
        let a: Task<()> = Task::new();
        let blocked = a.clone();
        let first = registry.offer_job(&"a".to_owned(), move || blocked, 10);
        // Key "b" is not held back by the blocked key "a".
        let other = registry.offer_job(&"b".to_owned(), || Task::completed(1), 10);
        assert_eq!(other.await, Ok(1));
        assert!(registry.is_busy());
        a.succeed(());
        first.await.unwrap();
        wait_idle(&registry.serializer(&"a".to_owned())).await;
        wait_idle(&registry.serializer(&"b".to_owned())).await;
        assert!(!registry.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_exclusive() {
        let registry = Arc::new(registry());
        let running = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let running = running.clone();
            tasks.push(registry.offer_job(
                &"key".to_owned(),
                move || {
                    Task::spawn(async move {
                        assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_micros(200)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                },
                100,
            ));
        }
        Task::all_of(tasks).await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_offer_job_backpressure() {
        let registry = registry();
        let key = "k".to_owned();
        let blocker: Task<()> = Task::new();
        let pending = blocker.clone();
        let first = registry.offer_job(&key, move || pending, 1);
        let queued = registry.offer_job(&key, || Task::completed(()), 1);
        let rejected = registry.offer_job(&key, || Task::completed(()), 1);
        assert_eq!(rejected.result(), Some(Err(Error::QueueFull { size: 1 })));
        blocker.succeed(());
        first.await.unwrap();
        queued.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_keeps_busy_and_held_serializers() {
        let registry = registry();
        let blocker: Task<()> = Task::new();
        let pending = blocker.clone();
        let busy = registry.offer_job(&"busy".to_owned(), move || pending, 10);
        registry
            .offer_job(&"idle".to_owned(), || Task::completed(()), 10)
            .await
            .unwrap();
        wait_idle(&registry.serializer(&"idle".to_owned())).await;
        // Let the executor job that ran the idle key drop its handle.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let held = registry.serializer(&"held".to_owned());

        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 2);

        blocker.succeed(());
        busy.await.unwrap();
        wait_idle(&registry.serializer(&"busy".to_owned())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert_eq!(registry.sweep(), 2);
        assert!(registry.is_empty());
    }
}
