// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Runtime
//!
//! The `runtime` module provides the [`Runtime`] type, the explicit context object that owns
//! everything a process needs to host actors: the activation registry, the response cache, the
//! handler pipeline and the dispatch tables of the registered actor types.
//!
//! The default pipeline is `cache -> execution`. Transports are appended with
//! [`Pipeline::add_last`], so invocations that are not served by the cache or by a local
//! activation reach them.
//!

use crate::{
    Error,
    actor::{Actor, ActorCell, DispatchTable},
    cache::ResponseCache,
    config::RuntimeConfig,
    executor::{Executor, TokioExecutor},
    framing::LengthFieldFramer,
    handler::Message,
    invocation::{Invocation, MethodId, Reply, Value},
    pipeline::Pipeline,
    reference::AddressableReference,
    registry::{LocalActivation, LocalActivationRegistry},
    router::ExecutionRouter,
    task::Task,
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

/// Name of the response cache stage.
pub const CACHE_HANDLER: &str = "cache";

/// Name of the execution routing stage.
pub const EXECUTION_HANDLER: &str = "execution";

/// Actor runtime of one process.
pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<LocalActivationRegistry>,
    cache: Arc<ResponseCache>,
    pipeline: Arc<Pipeline>,
    /// Dispatch tables by actor type.
    tables: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    token: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Creates a runtime whose serializers run on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    ///
    pub fn new(config: RuntimeConfig) -> Result<Self, Error> {
        Self::with_executor(config, Arc::new(TokioExecutor::current()))
    }

    /// Creates a runtime whose serializers run on `executor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the default pipeline cannot be built.
    ///
    pub fn with_executor(
        config: RuntimeConfig,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, Error> {
        let registry = Arc::new(LocalActivationRegistry::new(executor));
        let cache = Arc::new(ResponseCache::new());
        let pipeline = Arc::new(Pipeline::new());
        pipeline.add_last(CACHE_HANDLER, cache.clone())?;
        pipeline.add_last(
            EXECUTION_HANDLER,
            Arc::new(ExecutionRouter::new(
                registry.clone(),
                config.max_queue_size,
                config.invocation_timeout,
            )),
        )?;
        Ok(Self {
            config,
            registry,
            cache,
            pipeline,
            tables: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
            reaper: Mutex::new(None),
        })
    }

    /// Runtime settings.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The handler pipeline.
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The activations hosted by this process.
    pub fn registry(&self) -> &Arc<LocalActivationRegistry> {
        &self.registry
    }

    /// The response cache stage.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// A framing stage sized by [`RuntimeConfig::max_frame_length`]. Each connection needs its
    /// own framer.
    pub fn framer(&self) -> LengthFieldFramer {
        LengthFieldFramer::new(self.config.max_frame_length)
    }

    /// Dispatch table of `A`, built on first use. Building it registers the cacheable methods of
    /// `A` with the response cache.
    fn table<A: Actor>(&self) -> Arc<DispatchTable<A>> {
        let mut tables = self.tables.lock();
        if let Some(table) = tables
            .get(&TypeId::of::<A>())
            .and_then(|any| any.clone().downcast::<DispatchTable<A>>().ok())
        {
            return table;
        }

        let table = Arc::new(A::dispatch_table());
        for (method, descriptor) in table.descriptors().filter(|(_, d)| d.cacheable) {
            self.cache.register(
                A::interface(),
                method,
                descriptor.cache.unwrap_or(self.config.cache),
            );
        }
        debug!("Built dispatch table of {}: {:?}", A::interface(), table);
        tables.insert(TypeId::of::<A>(), table.clone());
        table
    }

    /// Hosts `actor` under `reference`.
    ///
    /// Registration is idempotent: if `reference` is already hosted, the existing activation is
    /// returned and `actor` is dropped.
    ///
    pub fn register_actor<A: Actor>(
        &self,
        reference: AddressableReference,
        actor: A,
    ) -> Arc<LocalActivation> {
        let cell = Arc::new(ActorCell::new(actor, self.table::<A>()));
        self.registry
            .get_or_add_local_object_reference(reference, cell)
    }

    /// Invokes `method` on `reference` through the pipeline.
    ///
    /// # Returns
    ///
    /// The task that completes with the reply.
    ///
    pub fn invoke(
        &self,
        reference: AddressableReference,
        method: MethodId,
        args: Vec<Value>,
    ) -> Task<Reply> {
        let completion = Task::new();
        let invocation =
            Invocation::new(reference, method, args).with_completion(completion.clone());
        self.pipeline
            .write(Message::Invocation(invocation))
            .propagate_to(&completion);
        completion
    }

    /// Invokes a fire-and-forget method on `reference` through the pipeline.
    pub fn invoke_one_way(
        &self,
        reference: AddressableReference,
        method: MethodId,
        args: Vec<Value>,
    ) {
        let invocation = Invocation::new(reference, method, args).one_way();
        self.pipeline
            .write(Message::Invocation(invocation))
            .on_complete(|result| {
                if let Err(e) = result {
                    debug!("One-way invocation failed: {}", e);
                }
            });
    }

    /// Invalidates every cached reply of `reference`.
    pub fn flush(&self, reference: &AddressableReference) -> usize {
        self.cache.flush(reference)
    }

    /// Activates the pipeline and starts the idle reaper.
    pub fn start(&self) {
        self.pipeline.fire_active();

        let registry = self.registry.clone();
        let token = self.token.clone();
        let idle_timeout = self.config.idle_timeout;
        let period = self.config.reap_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.reap_idle(idle_timeout).await;
                    }
                }
            }
            debug!("Idle reaper stopped.");
        });
        if let Some(previous) = self.reaper.lock().replace(handle) {
            previous.abort();
        }
        debug!("Runtime started.");
    }

    /// Stops the reaper, deactivates every idle activation and closes the pipeline.
    ///
    /// Activations that are still busy stay registered.
    ///
    pub async fn stop(&self) {
        debug!("Stopping runtime...");
        self.token.cancel();
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            if let Err(e) = reaper.await {
                error!("Idle reaper failed: {}", e);
            }
        }
        let deactivated = self.registry.reap_idle(Duration::ZERO).await;
        debug!("Deactivated {} activations.", deactivated.len());
        self.pipeline.fire_inactive();
        if let Err(e) = self.pipeline.close().await {
            error!("Pipeline close failed: {}", e);
        }
        debug!("Runtime stopped.");
    }
}
