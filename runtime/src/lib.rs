// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Virtual actor runtime core
//!
//! Routes method invocations to in-memory actor activations, gives every activation
//! single-threaded execution semantics over a shared thread pool, moves messages through a
//! configurable interceptor chain and memoizes the replies of idempotent methods.
//!
//! ## Overview
//!
//! Virtual actors are addressed by an [`AddressableReference`]: an interface, an identity and,
//! for objects hosted elsewhere, a node address. A call becomes an [`Invocation`] that enters the
//! [`Pipeline`] at its head and travels towards the network:
//!
//! ```text
//!  application                                                    network
//!     head -> cache -> execution -> [wire codec] -> [framing] -> [transport] -> tail
//! ```
//!
//! - The [`ResponseCache`] answers repeated calls to cacheable methods and collapses concurrent
//!   identical calls into one execution.
//! - The [`ExecutionRouter`] executes invocations whose target is hosted by this process and lets
//!   every other invocation through.
//! - Stages closer to the network are supplied by the embedding application; the
//!   [`LengthFieldFramer`] is provided for stream transports.
//!
//! Inbound traffic travels the opposite way and is routed to local activations by the same
//! router.
//!
//! ## Execution model
//!
//! Every activation owns an [`ExecutionSerializer`]. Jobs submitted to one serializer run one at
//! a time and in submission order; jobs of different activations run in parallel. No thread ever
//! blocks waiting for an activation: a submitter either drains the queue itself or leaves the
//! work to whoever is draining it. Backlogs are bounded, and a full backlog fails the call
//! immediately with [`Error::QueueFull`].
//!
//! Results travel through [`Task`]s, single-assignment completion handles that can be chained,
//! linked, cancelled and awaited.
//!
//! ## Getting Started
//!
//! ```ignore
//! use runtime::{
//!     Actor, AddressableReference, DispatchTable, Error, InterfaceId, Runtime, RuntimeConfig,
//!     Value,
//! };
//! use async_trait::async_trait;
//!
//! #[derive(Default)]
//! struct Account {
//!     balance: i64,
//! }
//!
//! const BALANCE: u32 = 1;
//! const DEPOSIT: u32 = 2;
//!
//! #[async_trait]
//! impl Actor for Account {
//!     fn interface() -> InterfaceId {
//!         InterfaceId::new("Account")
//!     }
//!
//!     fn dispatch_table() -> DispatchTable<Self> {
//!         DispatchTable::new()
//!             .method(BALANCE, "balance", |account: &mut Account, _args| {
//!                 Box::pin(async move { Ok(Value::Int(account.balance)) })
//!             })
//!             .method(DEPOSIT, "deposit", |account: &mut Account, args| {
//!                 Box::pin(async move {
//!                     account.balance += args.first().and_then(Value::as_int).unwrap_or(0);
//!                     Ok(Value::Unit)
//!                 })
//!             })
//!             .cacheable(BALANCE)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let runtime = Runtime::new(RuntimeConfig::default())?;
//!     runtime.start();
//!
//!     let alice = AddressableReference::new("Account", "alice");
//!     runtime.register_actor(alice.clone(), Account::default());
//!     runtime.invoke(alice.clone(), DEPOSIT, vec![Value::Int(10)]).await?;
//!     runtime.flush(&alice);
//!     let balance = runtime.invoke(alice, BALANCE, vec![]).await?;
//!     assert_eq!(*balance, Value::Int(10));
//!
//!     runtime.stop().await;
//!     Ok(())
//! }
//! ```
//!

// Private modules containing the implementation
mod actor;
mod cache;
mod codec;
mod config;
mod context;
mod error;
mod execution;
mod executor;
mod framing;
mod handler;
mod invocation;
mod multi_execution;
mod pipeline;
mod reference;
mod registry;
mod router;
mod runtime;
mod task;

//
// Actors
//

/// Virtual actor: an interface, a dispatch table and lifecycle hooks.
pub use actor::Actor;
/// Type-erased in-memory actor instance, as kept by the registry.
pub use actor::Activation;
/// An actor instance bound to its shared dispatch table.
pub use actor::ActorCell;
/// Method table of an actor type.
pub use actor::DispatchTable;
/// Static description of one remote-callable method.
pub use actor::MethodDescriptor;
/// Typed method body.
pub use actor::MethodFn;

//
// Addressing and invocations
//

/// Identifier of a remote-callable target.
pub use reference::AddressableReference;
/// Interface type identifier.
pub use reference::InterfaceId;
/// Identity of an actor within its interface.
pub use reference::Key;
/// Address of a node in the cluster.
pub use reference::NodeAddress;
/// One routed method call.
pub use invocation::Invocation;
/// Interface-scoped method identifier.
pub use invocation::MethodId;
/// Shared result of an invocation.
pub use invocation::Reply;
/// Dynamic parameter and result value.
pub use invocation::Value;

//
// Completion handles and execution
//

/// Single-assignment completion handle.
pub use task::Task;
/// Work-submission abstraction.
pub use executor::Executor;
/// Unit of work submitted to an executor.
pub use executor::Job;
/// Executor backed by a tokio runtime.
pub use executor::TokioExecutor;
/// Per-key, non-blocking mutual exclusion.
pub use execution::ExecutionSerializer;
/// Keyed registry of execution serializers.
pub use multi_execution::MultiExecutionSerializer;

//
// Pipeline
//

/// Pipeline interceptor.
pub use handler::Handler;
/// Message flowing through the pipeline.
pub use handler::Message;
/// User-defined pipeline event.
pub use handler::PipelineEvent;
/// Handler position within a pipeline snapshot.
pub use context::HandlerContext;
/// Bidirectional handler chain.
pub use pipeline::Pipeline;
/// Reserved name of the head sentinel.
pub use pipeline::HEAD;
/// Reserved name of the tail sentinel.
pub use pipeline::TAIL;

//
// Pipeline stages
//

/// Routes invocations to local activations.
pub use router::ExecutionRouter;
/// Response cache stage.
pub use cache::ResponseCache;
/// Caching policy of one method.
pub use cache::CacheSpec;
/// Produces independent copies of cached replies.
pub use cache::DeepCloner;
/// Clones replies structurally.
pub use cache::StructuralCloner;
/// Clones replies through the canonical encoding.
pub use cache::BincodeCloner;
/// Decides which replies are shared between callers.
pub use cache::Immutability;
/// Length-prefix framing for stream transports.
pub use framing::LengthFieldFramer;

//
// Activations
//

/// Registry of the activations hosted by this process.
pub use registry::LocalActivationRegistry;
/// One hosted activation.
pub use registry::LocalActivation;

//
// Runtime
//

/// Actor runtime of one process.
pub use runtime::Runtime;
/// Names of the default pipeline stages.
pub use runtime::{CACHE_HANDLER, EXECUTION_HANDLER};
/// Runtime settings.
pub use config::RuntimeConfig;
/// Canonical encoding and parameter hashing.
pub use codec::{decode, encode, parameter_hash};

//
// Error Handling
//

/// Error type for the runtime core.
pub use error::Error;
