// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Pipeline handlers
//!
//! A [`Handler`] is one interceptor in the [`Pipeline`](crate::Pipeline). Outbound operations
//! (`write`, `connect`, `disconnect`, `close`) travel from the head towards the tail, i.e. from the
//! application towards the network. Inbound notifications (`on_active`, `on_inactive`, `on_read`,
//! `on_event_triggered`, `on_exception_caught`) travel the opposite way.
//!
//! Every method has a default implementation that forwards to the next handler, so a handler only
//! overrides what it intercepts. Not calling the corresponding `ctx` method swallows the
//! operation; calling it with a different message transforms it.
//!
//! A handler that returns `Err` does not break the pipeline: the context catches the error and
//! hands it to the same handler's [`on_exception_caught`](Handler::on_exception_caught), from
//! where it travels inbound until someone handles it or the head sentinel logs it.
//!

use crate::{
    Error,
    context::HandlerContext,
    invocation::{Invocation, Reply, Value},
    task::Task,
};

use bytes::Bytes;

use std::{any::Any, sync::Arc};

/// Message flowing through the pipeline.
#[derive(Debug)]
pub enum Message {
    /// A routed method call.
    Invocation(Invocation),
    /// Raw bytes, on the transport side of the codec.
    Bytes(Bytes),
}

/// User-defined event delivered through `on_event_triggered`.
pub type PipelineEvent = Arc<dyn Any + Send + Sync>;

/// Pipeline interceptor.
///
/// Handlers are shared between every message traversing the pipeline; handlers that keep mutable
/// state are responsible for their own synchronization.
///
pub trait Handler: Send + Sync + 'static {
    /// The pipeline became active.
    fn on_active(&self, ctx: &HandlerContext) -> Result<(), Error> {
        ctx.fire_active();
        Ok(())
    }

    /// The pipeline became inactive.
    fn on_inactive(&self, ctx: &HandlerContext) -> Result<(), Error> {
        ctx.fire_inactive();
        Ok(())
    }

    /// An inbound message arrived.
    fn on_read(&self, ctx: &HandlerContext, message: Message) -> Result<(), Error> {
        ctx.fire_read(message);
        Ok(())
    }

    /// A user event was triggered.
    fn on_event_triggered(
        &self,
        ctx: &HandlerContext,
        event: PipelineEvent,
    ) -> Result<(), Error> {
        ctx.fire_event_triggered(event);
        Ok(())
    }

    /// A handler failed.
    fn on_exception_caught(
        &self,
        ctx: &HandlerContext,
        error: Error,
    ) -> Result<(), Error> {
        ctx.fire_exception_caught(error);
        Ok(())
    }

    /// An outbound message is written.
    ///
    /// # Returns
    ///
    /// The task that completes with the reply (for invocations) or when the write is done.
    ///
    fn write(&self, ctx: &HandlerContext, message: Message) -> Result<Task<Reply>, Error> {
        Ok(ctx.write(message))
    }

    /// Connection requested.
    fn connect(&self, ctx: &HandlerContext, param: Value) -> Result<Task<Reply>, Error> {
        Ok(ctx.connect(param))
    }

    /// Disconnection requested.
    fn disconnect(&self, ctx: &HandlerContext) -> Result<Task<Reply>, Error> {
        Ok(ctx.disconnect())
    }

    /// Close requested.
    fn close(&self, ctx: &HandlerContext) -> Result<Task<Reply>, Error> {
        Ok(ctx.close())
    }
}
