// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the [`Actor`] trait, the per-type [`DispatchTable`] that maps
//! interface-scoped method identifiers to typed closures, and the type-erased [`Activation`] the
//! registry keeps for every in-memory instance.
//!
//! A dispatch table is built once per actor type and shared by every activation of that type, so
//! routing a call is a single hash lookup followed by a direct closure call.
//!

use crate::{
    Error,
    cache::CacheSpec,
    invocation::{MethodId, Value},
    reference::InterfaceId,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, error};

use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::Arc,
};

/// Typed method body. Receives the actor and the decoded parameters.
pub type MethodFn<A> = Box<
    dyn for<'a> Fn(&'a mut A, Vec<Value>) -> BoxFuture<'a, Result<Value, Error>>
        + Send
        + Sync
        + 'static,
>;

/// Static description of one remote-callable method.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodDescriptor {
    /// Method name, for logs.
    pub name: String,
    /// True if callers never expect a response.
    pub one_way: bool,
    /// True if replies may be served from the response cache.
    pub cacheable: bool,
    /// Method-specific caching policy. Cacheable methods without one use the runtime default.
    pub cache: Option<CacheSpec>,
}

struct MethodEntry<A> {
    descriptor: MethodDescriptor,
    body: MethodFn<A>,
}

/// Method table of an actor type.
///
/// # Examples
///
/// ```ignore
/// use runtime::{DispatchTable, Value};
///
/// let table = DispatchTable::<Account>::new()
///     .method(1, "balance", |account, _args| {
///         Box::pin(async move { Ok(Value::Int(account.balance)) })
///     })
///     .one_way_method(2, "touch", |account, _args| {
///         Box::pin(async move {
///             account.touched += 1;
///             Ok(Value::Unit)
///         })
///     });
/// ```
///
pub struct DispatchTable<A> {
    methods: HashMap<MethodId, MethodEntry<A>>,
}

impl<A> Debug for DispatchTable<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|(id, entry)| (*id, entry.descriptor.name.as_str()))
            .collect();
        methods.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("methods", &methods)
            .finish()
    }
}

impl<A> Default for DispatchTable<A>
where
    A: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> DispatchTable<A>
where
    A: Send + 'static,
{
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Adds a request-response method. A later entry with the same id replaces the earlier one.
    pub fn method<F>(self, id: MethodId, name: &str, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut A, Vec<Value>) -> BoxFuture<'a, Result<Value, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.insert(id, name, false, Box::new(body))
    }

    /// Adds a fire-and-forget method.
    pub fn one_way_method<F>(self, id: MethodId, name: &str, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut A, Vec<Value>) -> BoxFuture<'a, Result<Value, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.insert(id, name, true, Box::new(body))
    }

    fn insert(mut self, id: MethodId, name: &str, one_way: bool, body: MethodFn<A>) -> Self {
        self.methods.insert(
            id,
            MethodEntry {
                descriptor: MethodDescriptor {
                    name: name.to_owned(),
                    one_way,
                    cacheable: false,
                    cache: None,
                },
                body,
            },
        );
        self
    }

    /// Marks an already added method as cacheable with the runtime's default policy. Unknown
    /// ids are ignored.
    pub fn cacheable(mut self, id: MethodId) -> Self {
        if let Some(entry) = self.methods.get_mut(&id) {
            entry.descriptor.cacheable = true;
        }
        self
    }

    /// Marks an already added method as cacheable with its own policy. Unknown ids are ignored.
    pub fn cached(mut self, id: MethodId, spec: CacheSpec) -> Self {
        if let Some(entry) = self.methods.get_mut(&id) {
            entry.descriptor.cacheable = true;
            entry.descriptor.cache = Some(spec);
        }
        self
    }

    /// Descriptor of a method.
    pub fn descriptor(&self, id: MethodId) -> Option<&MethodDescriptor> {
        self.methods.get(&id).map(|entry| &entry.descriptor)
    }

    /// Every method id with its descriptor.
    pub fn descriptors(&self) -> impl Iterator<Item = (MethodId, &MethodDescriptor)> {
        self.methods.iter().map(|(id, entry)| (*id, &entry.descriptor))
    }

    /// Number of methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if the table has no methods.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Runs the body of `method` against `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMethod`] if the table has no entry for `method`, or whatever error
    /// the method body returns.
    ///
    pub async fn dispatch(
        &self,
        interface: &InterfaceId,
        actor: &mut A,
        method: MethodId,
        args: Vec<Value>,
    ) -> Result<Value, Error> {
        let Some(entry) = self.methods.get(&method) else {
            error!("Unknown method {} on interface '{}'!", method, interface);
            return Err(Error::UnknownMethod {
                interface: interface.to_string(),
                method,
            });
        };
        (entry.body)(actor, args).await
    }
}

/// Virtual actor.
///
/// An actor exposes one remote-callable interface described by its dispatch table. The runtime
/// guarantees that at most one method or lifecycle hook of a given activation runs at a time.
///
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static {
    /// Interface identifier this actor implements.
    fn interface() -> InterfaceId;

    /// Builds the method table of this actor type. Called once per type and runtime.
    fn dispatch_table() -> DispatchTable<Self>;

    /// Called before the first invocation of a new activation.
    ///
    /// # Errors
    ///
    /// A failing hook is logged; the activation stays registered.
    ///
    async fn on_activate(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Called once the activation has been removed from the registry.
    async fn on_deactivate(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Type-erased in-memory actor instance.
#[async_trait]
pub trait Activation: Send + Sync + 'static {
    /// Interface the instance implements.
    fn interface(&self) -> InterfaceId;

    /// Invokes a method.
    async fn invoke(&self, method: MethodId, args: Vec<Value>) -> Result<Value, Error>;

    /// Runs the activation hook.
    async fn activate(&self) -> Result<(), Error>;

    /// Runs the deactivation hook.
    async fn deactivate(&self) -> Result<(), Error>;
}

/// An actor instance bound to its shared dispatch table.
pub struct ActorCell<A: Actor> {
    actor: Mutex<A>,
    table: Arc<DispatchTable<A>>,
}

impl<A: Actor> ActorCell<A> {
    /// Wraps `actor`.
    pub fn new(actor: A, table: Arc<DispatchTable<A>>) -> Self {
        Self {
            actor: Mutex::new(actor),
            table,
        }
    }
}

#[async_trait]
impl<A: Actor> Activation for ActorCell<A> {
    fn interface(&self) -> InterfaceId {
        A::interface()
    }

    async fn invoke(&self, method: MethodId, args: Vec<Value>) -> Result<Value, Error> {
        let mut actor = self.actor.lock().await;
        self.table
            .dispatch(&A::interface(), &mut actor, method, args)
            .await
    }

    async fn activate(&self) -> Result<(), Error> {
        debug!("Activating {} instance.", A::interface());
        self.actor.lock().await.on_activate().await
    }

    async fn deactivate(&self) -> Result<(), Error> {
        debug!("Deactivating {} instance.", A::interface());
        self.actor.lock().await.on_deactivate().await
    }
}

#[cfg(test)]
pub(crate) mod tests {

    use super::*;

    use std::time::Duration;

    /// Test actor shared by the crate's unit tests.
    #[derive(Debug, Default)]
    pub(crate) struct Counter {
        pub(crate) value: i64,
        pub(crate) activations: u32,
        pub(crate) deactivations: u32,
    }

    pub(crate) const GET: MethodId = 1;
    pub(crate) const ADD: MethodId = 2;
    pub(crate) const FAIL: MethodId = 3;
    pub(crate) const LIFECYCLE: MethodId = 4;

    #[async_trait]
    impl Actor for Counter {
        fn interface() -> InterfaceId {
            InterfaceId::new("Counter")
        }

        fn dispatch_table() -> DispatchTable<Self> {
            DispatchTable::new()
                .method(GET, "get", |counter: &mut Counter, _args| {
                    Box::pin(async move { Ok(Value::Int(counter.value)) })
                })
                .method(ADD, "add", |counter: &mut Counter, args| {
                    Box::pin(async move {
                        let delta = args.first().and_then(Value::as_int).unwrap_or(1);
                        let before = counter.value;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        counter.value = before + delta;
                        Ok(Value::Int(counter.value))
                    })
                })
                .method(FAIL, "fail", |_counter: &mut Counter, _args| {
                    Box::pin(async move { Err(Error::Invocation("refused".to_owned())) })
                })
                .method(LIFECYCLE, "lifecycle", |counter: &mut Counter, _args| {
                    Box::pin(async move {
                        Ok(Value::List(vec![
                            Value::Int(counter.activations as i64),
                            Value::Int(counter.deactivations as i64),
                        ]))
                    })
                })
                .cacheable(GET)
        }

        async fn on_activate(&mut self) -> Result<(), Error> {
            self.activations += 1;
            Ok(())
        }

        async fn on_deactivate(&mut self) -> Result<(), Error> {
            self.deactivations += 1;
            Ok(())
        }
    }

    pub(crate) fn counter_cell() -> Arc<dyn Activation> {
        Arc::new(ActorCell::new(
            Counter::default(),
            Arc::new(Counter::dispatch_table()),
        ))
    }

    #[tokio::test]
    async fn test_dispatch_through_table() {
        let cell = counter_cell();
        assert_eq!(cell.interface(), InterfaceId::new("Counter"));
        assert_eq!(cell.invoke(ADD, vec![Value::Int(5)]).await, Ok(Value::Int(5)));
        assert_eq!(cell.invoke(GET, vec![]).await, Ok(Value::Int(5)));
        assert_eq!(
            cell.invoke(FAIL, vec![]).await,
            Err(Error::Invocation("refused".to_owned()))
        );
        assert_eq!(
            cell.invoke(99, vec![]).await,
            Err(Error::UnknownMethod {
                interface: "Counter".to_owned(),
                method: 99
            })
        );
    }

    #[tokio::test]
    async fn test_lifecycle_hooks() {
        let cell = counter_cell();
        cell.activate().await.unwrap();
        cell.deactivate().await.unwrap();
        assert_eq!(
            cell.invoke(LIFECYCLE, vec![]).await,
            Ok(Value::List(vec![Value::Int(1), Value::Int(1)]))
        );
    }

    #[test]
    fn test_descriptors() {
        let table = Counter::dispatch_table();
        assert_eq!(table.len(), 4);
        assert!(table.descriptor(GET).is_some_and(|d| d.cacheable && d.cache.is_none()));
        assert!(table.descriptor(ADD).is_some_and(|d| !d.cacheable && !d.one_way));
        assert_eq!(table.descriptors().filter(|(_, d)| d.cacheable).count(), 1);

        let spec = CacheSpec {
            ttl: Duration::from_secs(1),
            max_entries: 8,
        };
        let table = Counter::dispatch_table().cached(ADD, spec).cached(99, spec);
        assert_eq!(table.descriptor(ADD).and_then(|d| d.cache), Some(spec));
        assert_eq!(table.len(), 4);
    }
}
