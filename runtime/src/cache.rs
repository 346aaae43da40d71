// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Response cache
//!
//! Pipeline handler that memoizes the replies of cacheable methods per target and parameters.
//!
//! Each cacheable method has its own bounded LRU cache whose entries also expire after the
//! method's time to live. Entries hold the [`Task`] of the call, not its value, so concurrent
//! identical calls share one in-flight execution. Failed or cancelled entries are treated as
//! misses.
//!
//! Callers never share a mutable reply: unless the reply is immutable per the [`Immutability`]
//! policy, every caller receives its own deep copy through the configured [`DeepCloner`].
//!

use crate::{
    Error,
    codec,
    context::HandlerContext,
    handler::{Handler, Message},
    invocation::{MethodId, Reply, Value},
    reference::{AddressableReference, InterfaceId},
    task::Task,
};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

/// Caching policy of one method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Time an entry stays valid after it was stored.
    pub ttl: Duration,
    /// Maximum number of entries kept for the method.
    pub max_entries: usize,
}

impl Default for CacheSpec {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

/// Produces an independent copy of a value.
pub trait DeepCloner: Send + Sync + 'static {
    /// Clones `value`.
    fn deep_clone(&self, value: &Value) -> Result<Value, Error>;
}

/// Clones values structurally.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralCloner;

impl DeepCloner for StructuralCloner {
    fn deep_clone(&self, value: &Value) -> Result<Value, Error> {
        Ok(value.clone())
    }
}

/// Clones values through the canonical encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCloner;

impl DeepCloner for BincodeCloner {
    fn deep_clone(&self, value: &Value) -> Result<Value, Error> {
        codec::decode(&codec::encode(value)?)
    }
}

/// Decides which replies can be shared between callers without copying.
///
/// Primitives, strings and enum constants are immutable. Lists, maps and byte buffers are
/// mutable. Objects are immutable only when their type name was registered.
///
#[derive(Clone, Debug, Default)]
pub struct Immutability {
    types: Arc<RwLock<HashSet<String>>>,
}

impl Immutability {
    /// Declares a record type immutable.
    pub fn register(&self, type_name: &str) {
        self.types.write().insert(type_name.to_owned());
    }

    /// True if `value` can be shared.
    pub fn is_immutable(&self, value: &Value) -> bool {
        match value {
            Value::Unit
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Enum { .. } => true,
            Value::Bytes(_) | Value::List(_) | Value::Map(_) => false,
            Value::Object { type_name, .. } => self.types.read().contains(type_name),
        }
    }
}

type MethodKey = (InterfaceId, MethodId);
type EntryKey = (AddressableReference, u64);

struct CacheEntry {
    stored: Instant,
    task: Task<Reply>,
}

/// Response cache handler.
pub struct ResponseCache {
    specs: RwLock<HashMap<MethodKey, CacheSpec>>,
    caches: Mutex<HashMap<MethodKey, LruCache<EntryKey, CacheEntry>>>,
    cloner: Arc<dyn DeepCloner>,
    immutability: Immutability,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    /// Creates a cache that copies replies with [`StructuralCloner`].
    pub fn new() -> Self {
        Self::with_cloner(Arc::new(StructuralCloner))
    }

    /// Creates a cache that copies replies with `cloner`.
    pub fn with_cloner(cloner: Arc<dyn DeepCloner>) -> Self {
        Self {
            specs: RwLock::new(HashMap::new()),
            caches: Mutex::new(HashMap::new()),
            cloner,
            immutability: Immutability::default(),
        }
    }

    /// Marks a method cacheable.
    pub fn register(&self, interface: InterfaceId, method: MethodId, spec: CacheSpec) {
        debug!("Caching method {} of '{}' with {:?}.", method, interface, spec);
        self.specs.write().insert((interface, method), spec);
    }

    /// Immutability policy applied to replies.
    pub fn immutability(&self) -> &Immutability {
        &self.immutability
    }

    /// Invalidates every entry of `reference`, across all methods.
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    ///
    pub fn flush(&self, reference: &AddressableReference) -> usize {
        let mut caches = self.caches.lock();
        let mut removed = 0;
        for cache in caches.values_mut() {
            let keys: Vec<EntryKey> = cache
                .iter()
                .filter(|(key, _)| &key.0 == reference)
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                cache.pop(&key);
                removed += 1;
            }
        }
        debug!("Flushed {} cache entries of {}.", removed, reference);
        removed
    }

    /// Invalidates every entry.
    pub fn flush_all(&self) {
        self.caches.lock().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.caches.lock().values().map(LruCache::len).sum()
    }

    /// True if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the entry for `key`, storing a fresh pending task on a miss.
    ///
    /// # Returns
    ///
    /// The shared task and `true` when the caller must compute it.
    ///
    fn lookup(&self, method: MethodKey, spec: CacheSpec, key: EntryKey) -> (Task<Reply>, bool) {
        let mut caches = self.caches.lock();
        let cache = caches.entry(method).or_insert_with(|| {
            LruCache::new(NonZeroUsize::new(spec.max_entries).unwrap_or(NonZeroUsize::MIN))
        });
        if let Some(entry) = cache.get(&key) {
            if entry.stored.elapsed() < spec.ttl && !entry.task.is_failed() {
                return (entry.task.clone(), false);
            }
        }
        let task = Task::new();
        cache.put(
            key,
            CacheEntry {
                stored: Instant::now(),
                task: task.clone(),
            },
        );
        (task, true)
    }

    /// Derives the caller's view of a shared reply.
    fn isolate(&self, shared: &Task<Reply>) -> Task<Reply> {
        let isolated = Task::new();
        let target = isolated.clone();
        let cloner = self.cloner.clone();
        let immutability = self.immutability.clone();
        shared.on_complete(move |result| {
            target.complete(match result {
                Ok(reply) if immutability.is_immutable(reply) => Ok(reply.clone()),
                Ok(reply) => cloner.deep_clone(reply).map(Arc::new),
                Err(e) => Err(e.clone()),
            });
        });
        isolated
    }
}

impl Handler for ResponseCache {
    fn write(&self, ctx: &HandlerContext, message: Message) -> Result<Task<Reply>, Error> {
        let mut invocation = match message {
            Message::Invocation(invocation) if !invocation.is_one_way() => invocation,
            other => return Ok(ctx.write(other)),
        };
        let method = (
            invocation.reference().interface().clone(),
            invocation.method(),
        );
        let Some(spec) = self.specs.read().get(&method).copied() else {
            return Ok(ctx.write(Message::Invocation(invocation)));
        };

        let key = (
            invocation.reference().clone(),
            codec::parameter_hash(invocation.args())?,
        );
        let completion = invocation.take_completion();
        let (shared, miss) = self.lookup(method, spec, key);
        if miss {
            debug!(
                "Cache miss for method {} of {}.",
                invocation.method(),
                invocation.reference()
            );
            ctx.write(Message::Invocation(invocation)).propagate_to(&shared);
        } else {
            debug!(
                "Cache hit for method {} of {}.",
                invocation.method(),
                invocation.reference()
            );
        }

        let reply = self.isolate(&shared);
        if let Some(completion) = completion {
            reply.propagate_to(&completion);
        }
        Ok(reply)
    }
}
