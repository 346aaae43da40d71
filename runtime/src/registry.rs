// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Local activation registry
//!
//! Explicit arena of the activations hosted by this process, keyed by reference. Each entry owns
//! its instance, a private [`ExecutionSerializer`] and a last-access timestamp. A reference is
//! local exactly when it has an entry here.
//!
//! Entries are removed explicitly, either one by one with
//! [`remove`](LocalActivationRegistry::remove) or by the idle sweep
//! [`reap_idle`](LocalActivationRegistry::reap_idle). Both refuse busy entries, and both run the
//! deactivation hook through the entry's serializer so it never overlaps an invocation.
//!

use crate::{
    Error,
    actor::Activation,
    execution::ExecutionSerializer,
    executor::Executor,
    invocation::Value,
    multi_execution::MultiExecutionSerializer,
    reference::AddressableReference,
    task::Task,
};

use parking_lot::Mutex;
use tracing::{debug, error};

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// One hosted activation.
pub struct LocalActivation {
    reference: AddressableReference,
    object: Arc<dyn Activation>,
    serializer: Arc<ExecutionSerializer>,
    last_access: Mutex<Instant>,
    /// Set by the deactivation job. Jobs queued behind it must not reach the instance.
    deactivated: AtomicBool,
}

impl LocalActivation {
    /// Reference this entry is registered under.
    pub fn reference(&self) -> &AddressableReference {
        &self.reference
    }

    /// The in-memory instance.
    pub fn object(&self) -> &Arc<dyn Activation> {
        &self.object
    }

    /// The entry's private serializer.
    pub fn serializer(&self) -> &Arc<ExecutionSerializer> {
        &self.serializer
    }

    /// Last time a job of this entry started.
    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    /// Records an access.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// True while the entry has running or queued work.
    pub fn is_busy(&self) -> bool {
        self.serializer.is_busy()
    }

    /// True once the deactivation hook has been scheduled to run. The entry is no longer
    /// registered and its instance must not serve invocations.
    pub fn is_deactivated(&self) -> bool {
        self.deactivated.load(Ordering::Acquire)
    }

    /// Schedules a lifecycle hook behind every queued invocation. Hooks are never rejected by
    /// backpressure.
    fn lifecycle(self: &Arc<Self>, deactivate: bool) -> Task<Value> {
        let entry = self.clone();
        let object = self.object.clone();
        let reference = self.reference.clone();
        self.serializer.execute_serialized(
            move || {
                if deactivate {
                    entry.deactivated.store(true, Ordering::Release);
                }
                Task::spawn(async move {
                    let result = if deactivate {
                        object.deactivate().await
                    } else {
                        object.activate().await
                    };
                    if let Err(e) = &result {
                        error!("Lifecycle hook of {} failed: {}", reference, e);
                    }
                    result.map(|_| Value::Unit)
                })
            },
            usize::MAX,
        )
    }
}

/// Registry of the activations hosted by this process.
pub struct LocalActivationRegistry {
    entries: Mutex<HashMap<AddressableReference, Arc<LocalActivation>>>,
    serializers: MultiExecutionSerializer<AddressableReference>,
}

impl LocalActivationRegistry {
    /// Creates an empty registry whose serializers run on `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            serializers: MultiExecutionSerializer::new(executor),
        }
    }

    /// Registers `object` under `reference`, or returns the entry already registered there.
    ///
    /// A new entry gets its activation hook queued as its first job, so it runs before any
    /// invocation. When the reference is already registered, `object` is dropped.
    ///
    /// # Returns
    ///
    /// The entry for `reference`.
    ///
    pub fn get_or_add_local_object_reference(
        &self,
        reference: AddressableReference,
        object: Arc<dyn Activation>,
    ) -> Arc<LocalActivation> {
        let entry = {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(&reference) {
                return entry.clone();
            }
            let entry = Arc::new(LocalActivation {
                serializer: self.serializers.serializer(&reference),
                reference: reference.clone(),
                object,
                last_access: Mutex::new(Instant::now()),
                deactivated: AtomicBool::new(false),
            });
            entries.insert(reference, entry.clone());
            entry
        };
        debug!("Registered local activation {}.", entry.reference);
        entry.lifecycle(false);
        entry
    }

    /// Looks up the entry for `reference`.
    pub fn find_by_reference(
        &self,
        reference: &AddressableReference,
    ) -> Option<Arc<LocalActivation>> {
        self.entries.lock().get(reference).cloned()
    }

    /// Removes the entry for `reference` and runs its deactivation hook.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if nothing was registered under `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while the entry has running or queued work; the entry stays
    /// registered.
    ///
    pub async fn remove(&self, reference: &AddressableReference) -> Result<bool, Error> {
        let entry = {
            let mut entries = self.entries.lock();
            let busy = match entries.get(reference) {
                None => return Ok(false),
                Some(entry) => entry.is_busy(),
            };
            if busy {
                debug!("Refusing to remove busy activation {}.", reference);
                return Err(Error::Busy(reference.clone()));
            }
            entries.remove(reference)
        };
        if let Some(entry) = entry {
            Self::deactivate(entry).await;
        }
        self.serializers.sweep();
        Ok(true)
    }

    /// Removes every entry that is not busy and was last accessed at least `idle_timeout` ago,
    /// running the deactivation hook of each.
    ///
    /// # Returns
    ///
    /// The references removed.
    ///
    pub async fn reap_idle(&self, idle_timeout: Duration) -> Vec<AddressableReference> {
        let reaped: Vec<Arc<LocalActivation>> = {
            let mut entries = self.entries.lock();
            let idle: Vec<AddressableReference> = entries
                .values()
                .filter(|entry| {
                    !entry.is_busy() && entry.last_access().elapsed() >= idle_timeout
                })
                .map(|entry| entry.reference.clone())
                .collect();
            idle.iter().filter_map(|reference| entries.remove(reference)).collect()
        };
        let mut references = Vec::with_capacity(reaped.len());
        for entry in reaped {
            references.push(entry.reference.clone());
            Self::deactivate(entry).await;
        }
        if !references.is_empty() {
            debug!("Reaped {} idle activations.", references.len());
        }
        self.serializers.sweep();
        references
    }

    async fn deactivate(entry: Arc<LocalActivation>) {
        // Failures are already logged by the hook job.
        let _ = entry.lifecycle(true).await;
    }

    /// Number of registered activations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no activation is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True if any activation has running or queued work.
    pub fn is_busy(&self) -> bool {
        self.serializers.is_busy()
    }

    /// Per-reference serializers backing the entries.
    pub fn serializers(&self) -> &MultiExecutionSerializer<AddressableReference> {
        &self.serializers
    }
}
