// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Handler context
//!
//! A [`HandlerContext`] is a handler's position in one snapshot of the pipeline chain. It knows
//! its inbound neighbour (towards the head) and its outbound neighbour (towards the tail) and is
//! the only way a handler forwards operations.
//!

use crate::{
    Error,
    handler::{Handler, Message, PipelineEvent},
    invocation::{Reply, Value},
    task::Task,
};

use tracing::error;

use std::sync::Arc;

/// One link of the chain.
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn Handler>,
}

/// Immutable chain snapshot. Index 0 is the head sentinel, the last index the tail sentinel.
pub(crate) struct Chain {
    pub(crate) nodes: Vec<Node>,
}

impl Chain {
    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }
}

/// Handler position within a pipeline snapshot.
#[derive(Clone)]
pub struct HandlerContext {
    chain: Arc<Chain>,
    index: usize,
}

impl HandlerContext {
    pub(crate) fn new(chain: Arc<Chain>, index: usize) -> Self {
        Self { chain, index }
    }

    /// Name of the handler this context belongs to.
    pub fn name(&self) -> &str {
        &self.chain.nodes[self.index].name
    }

    fn handler(&self) -> &Arc<dyn Handler> {
        &self.chain.nodes[self.index].handler
    }

    /// Neighbour towards the head.
    fn inbound(&self) -> Option<HandlerContext> {
        self.index
            .checked_sub(1)
            .map(|index| HandlerContext::new(self.chain.clone(), index))
    }

    /// Neighbour towards the tail.
    fn outbound(&self) -> Option<HandlerContext> {
        let index = self.index + 1;
        (index < self.chain.nodes.len())
            .then(|| HandlerContext::new(self.chain.clone(), index))
    }

    //
    // Inbound fan-out.
    //

    /// Forwards `on_active` to the next handler towards the head.
    pub fn fire_active(&self) {
        if let Some(next) = self.inbound() {
            next.invoke_active();
        }
    }

    /// Forwards `on_inactive` to the next handler towards the head.
    pub fn fire_inactive(&self) {
        if let Some(next) = self.inbound() {
            next.invoke_inactive();
        }
    }

    /// Forwards an inbound message to the next handler towards the head.
    pub fn fire_read(&self, message: Message) {
        if let Some(next) = self.inbound() {
            next.invoke_read(message);
        }
    }

    /// Forwards a user event to the next handler towards the head.
    pub fn fire_event_triggered(&self, event: PipelineEvent) {
        if let Some(next) = self.inbound() {
            next.invoke_event_triggered(event);
        }
    }

    /// Forwards an error to the next handler towards the head.
    pub fn fire_exception_caught(&self, error: Error) {
        if let Some(next) = self.inbound() {
            next.invoke_exception_caught(error);
        }
    }

    //
    // Outbound operations.
    //

    /// Writes a message through the next handler towards the tail.
    pub fn write(&self, message: Message) -> Task<Reply> {
        match self.outbound() {
            Some(next) => next.invoke_write(message),
            None => Task::failed(Error::Unhandled("write".to_owned())),
        }
    }

    /// Forwards a connect request towards the tail.
    pub fn connect(&self, param: Value) -> Task<Reply> {
        match self.outbound() {
            Some(next) => next.invoke_connect(param),
            None => Task::failed(Error::Unhandled("connect".to_owned())),
        }
    }

    /// Forwards a disconnect request towards the tail.
    pub fn disconnect(&self) -> Task<Reply> {
        match self.outbound() {
            Some(next) => next.invoke_disconnect(),
            None => Task::failed(Error::Unhandled("disconnect".to_owned())),
        }
    }

    /// Forwards a close request towards the tail.
    pub fn close(&self) -> Task<Reply> {
        match self.outbound() {
            Some(next) => next.invoke_close(),
            None => Task::failed(Error::Unhandled("close".to_owned())),
        }
    }

    //
    // Invocation of this context's handler, with errors redirected to the exception path.
    //

    fn guard(&self, result: Result<(), Error>) {
        if let Err(error) = result {
            self.invoke_exception_caught(error);
        }
    }

    fn guard_outbound(&self, result: Result<Task<Reply>, Error>) -> Task<Reply> {
        match result {
            Ok(task) => task,
            Err(error) => {
                self.invoke_exception_caught(error.clone());
                Task::failed(error)
            }
        }
    }

    pub(crate) fn invoke_active(&self) {
        self.guard(self.handler().on_active(self));
    }

    pub(crate) fn invoke_inactive(&self) {
        self.guard(self.handler().on_inactive(self));
    }

    pub(crate) fn invoke_read(&self, message: Message) {
        self.guard(self.handler().on_read(self, message));
    }

    pub(crate) fn invoke_event_triggered(&self, event: PipelineEvent) {
        self.guard(self.handler().on_event_triggered(self, event));
    }

    pub(crate) fn invoke_exception_caught(&self, error: Error) {
        if let Err(failure) = self.handler().on_exception_caught(self, error) {
            error!(
                "Handler '{}' failed while handling an exception: {}",
                self.name(),
                failure
            );
        }
    }

    pub(crate) fn invoke_write(&self, message: Message) -> Task<Reply> {
        self.guard_outbound(self.handler().write(self, message))
    }

    pub(crate) fn invoke_connect(&self, param: Value) -> Task<Reply> {
        self.guard_outbound(self.handler().connect(self, param))
    }

    pub(crate) fn invoke_disconnect(&self) -> Task<Reply> {
        self.guard_outbound(self.handler().disconnect(self))
    }

    pub(crate) fn invoke_close(&self) -> Task<Reply> {
        self.guard_outbound(self.handler().close(self))
    }
}
