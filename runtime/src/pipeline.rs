// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Handler pipeline
//!
//! Bidirectional chain of [`Handler`]s between two fixed sentinels: `head`, nearest the
//! application, and `tail`, nearest the network. Outbound operations start at the head, inbound
//! notifications start at the tail.
//!
//! The chain is an immutable snapshot replaced atomically on every mutation. A message traverses
//! the snapshot it started with, so inserting or removing handlers while messages flow never
//! exposes a half-spliced chain. Mutations are serialized by a single lock.
//!

use crate::{
    Error,
    context::{Chain, HandlerContext, Node},
    handler::{Handler, Message, PipelineEvent},
    invocation::{Reply, Value},
    task::Task,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error};

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Name of the head sentinel.
pub const HEAD: &str = "head";

/// Name of the tail sentinel.
pub const TAIL: &str = "tail";

/// Head sentinel: keeps the `active` flag and terminates inbound propagation.
struct HeadHandler {
    active: Arc<AtomicBool>,
}

impl Handler for HeadHandler {
    fn on_active(&self, _ctx: &HandlerContext) -> Result<(), Error> {
        debug!("Pipeline is active.");
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn on_inactive(&self, _ctx: &HandlerContext) -> Result<(), Error> {
        debug!("Pipeline is inactive.");
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    fn on_read(&self, _ctx: &HandlerContext, message: Message) -> Result<(), Error> {
        debug!("Inbound message reached the head of the pipeline: {:?}", message);
        Ok(())
    }

    fn on_event_triggered(
        &self,
        _ctx: &HandlerContext,
        _event: PipelineEvent,
    ) -> Result<(), Error> {
        debug!("Unhandled pipeline event.");
        Ok(())
    }

    fn on_exception_caught(
        &self,
        _ctx: &HandlerContext,
        error: Error,
    ) -> Result<(), Error> {
        error!("Unhandled exception in pipeline: {}", error);
        Ok(())
    }
}

/// Tail sentinel: terminates outbound propagation when no transport is installed.
struct TailHandler;

impl Handler for TailHandler {
    fn write(&self, _ctx: &HandlerContext, message: Message) -> Result<Task<Reply>, Error> {
        debug!("Outbound message reached the tail of the pipeline: {:?}", message);
        Ok(Task::failed(Error::Unhandled(
            "write reached the tail of the pipeline".to_owned(),
        )))
    }

    fn connect(&self, _ctx: &HandlerContext, _param: Value) -> Result<Task<Reply>, Error> {
        Ok(Task::completed(Arc::new(Value::Unit)))
    }

    fn disconnect(&self, _ctx: &HandlerContext) -> Result<Task<Reply>, Error> {
        Ok(Task::completed(Arc::new(Value::Unit)))
    }

    fn close(&self, _ctx: &HandlerContext) -> Result<Task<Reply>, Error> {
        Ok(Task::completed(Arc::new(Value::Unit)))
    }
}

enum Placement {
    Before,
    After,
}

/// Handler pipeline.
pub struct Pipeline {
    chain: ArcSwap<Chain>,
    mutation: Mutex<()>,
    active: Arc<AtomicBool>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates a pipeline holding only the two sentinels.
    pub fn new() -> Self {
        let active = Arc::new(AtomicBool::new(false));
        let chain = Chain {
            nodes: vec![
                Node {
                    name: HEAD.to_owned(),
                    handler: Arc::new(HeadHandler {
                        active: active.clone(),
                    }),
                },
                Node {
                    name: TAIL.to_owned(),
                    handler: Arc::new(TailHandler),
                },
            ],
        };
        Self {
            chain: ArcSwap::from_pointee(chain),
            mutation: Mutex::new(()),
            active,
        }
    }

    /// Inserts a handler right after the head sentinel.
    pub fn add_first(&self, name: &str, handler: Arc<dyn Handler>) -> Result<(), Error> {
        self.insert(HEAD, Placement::After, name, handler)
    }

    /// Inserts a handler right before the tail sentinel.
    pub fn add_last(&self, name: &str, handler: Arc<dyn Handler>) -> Result<(), Error> {
        self.insert(TAIL, Placement::Before, name, handler)
    }

    /// Inserts a handler before (towards the head of) `anchor`.
    pub fn add_handler_before(
        &self,
        anchor: &str,
        name: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), Error> {
        self.insert(anchor, Placement::Before, name, handler)
    }

    /// Inserts a handler after (towards the tail of) `anchor`.
    pub fn add_handler_after(
        &self,
        anchor: &str,
        name: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), Error> {
        self.insert(anchor, Placement::After, name, handler)
    }

    fn insert(
        &self,
        anchor: &str,
        placement: Placement,
        name: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), Error> {
        let _guard = self.mutation.lock();
        let current = self.chain.load_full();
        if current.position(name).is_some() {
            error!("Handler '{}' already exists!", name);
            return Err(Error::HandlerExists(name.to_owned()));
        }
        let anchor_index = current
            .position(anchor)
            .ok_or_else(|| Error::HandlerNotFound(anchor.to_owned()))?;
        let index = match placement {
            Placement::Before if anchor_index == 0 => {
                return Err(Error::Handler(format!(
                    "cannot insert '{}' before the head sentinel",
                    name
                )));
            }
            Placement::After if anchor_index + 1 == current.nodes.len() => {
                return Err(Error::Handler(format!(
                    "cannot insert '{}' after the tail sentinel",
                    name
                )));
            }
            Placement::Before => anchor_index,
            Placement::After => anchor_index + 1,
        };

        let mut nodes: Vec<Node> = current
            .nodes
            .iter()
            .map(|node| Node {
                name: node.name.clone(),
                handler: node.handler.clone(),
            })
            .collect();
        nodes.insert(
            index,
            Node {
                name: name.to_owned(),
                handler,
            },
        );
        self.chain.store(Arc::new(Chain { nodes }));
        debug!("Handler '{}' added to the pipeline.", name);
        Ok(())
    }

    /// Removes a user handler.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Handler>, Error> {
        if name == HEAD || name == TAIL {
            return Err(Error::Handler(format!("cannot remove the '{}' sentinel", name)));
        }
        let _guard = self.mutation.lock();
        let current = self.chain.load_full();
        let index = current
            .position(name)
            .ok_or_else(|| Error::HandlerNotFound(name.to_owned()))?;
        let handler = current.nodes[index].handler.clone();
        let nodes = current
            .nodes
            .iter()
            .enumerate()
            .filter(|(position, _)| *position != index)
            .map(|(_, node)| Node {
                name: node.name.clone(),
                handler: node.handler.clone(),
            })
            .collect();
        self.chain.store(Arc::new(Chain { nodes }));
        debug!("Handler '{}' removed from the pipeline.", name);
        Ok(handler)
    }

    /// Names of the user handlers, head to tail.
    pub fn names(&self) -> Vec<String> {
        let chain = self.chain.load();
        let last = chain.nodes.len() - 1;
        chain.nodes[1..last]
            .iter()
            .map(|node| node.name.clone())
            .collect()
    }

    /// True if a handler with this name is installed.
    pub fn contains(&self, name: &str) -> bool {
        self.chain.load().position(name).is_some()
    }

    /// True between `fire_active` and `fire_inactive`.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn head(&self) -> HandlerContext {
        HandlerContext::new(self.chain.load_full(), 0)
    }

    fn tail(&self) -> HandlerContext {
        let chain = self.chain.load_full();
        let last = chain.nodes.len() - 1;
        HandlerContext::new(chain, last)
    }

    //
    // Outbound, head to tail.
    //

    /// Writes a message.
    pub fn write(&self, message: Message) -> Task<Reply> {
        self.head().invoke_write(message)
    }

    /// Requests a connection.
    pub fn connect(&self, param: Value) -> Task<Reply> {
        self.head().invoke_connect(param)
    }

    /// Requests a disconnection.
    pub fn disconnect(&self) -> Task<Reply> {
        self.head().invoke_disconnect()
    }

    /// Requests the pipeline to close.
    pub fn close(&self) -> Task<Reply> {
        self.head().invoke_close()
    }

    //
    // Inbound, tail to head.
    //

    /// Notifies that the pipeline became active.
    pub fn fire_active(&self) {
        self.tail().invoke_active();
    }

    /// Notifies that the pipeline became inactive.
    pub fn fire_inactive(&self) {
        self.tail().invoke_inactive();
    }

    /// Delivers an inbound message.
    pub fn fire_read(&self, message: Message) {
        self.tail().invoke_read(message);
    }

    /// Delivers a user event.
    pub fn fire_event_triggered(&self, event: PipelineEvent) {
        self.tail().invoke_event_triggered(event);
    }

    /// Delivers an error.
    pub fn fire_exception_caught(&self, error: Error) {
        self.tail().invoke_exception_caught(error);
    }
}
