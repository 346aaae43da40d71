// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Execution router
//!
//! Pipeline handler that executes invocations for locally hosted activations and forwards every
//! other invocation unchanged. Outbound writes continue towards the network; inbound reads
//! continue towards the application.
//!

use crate::{
    Error,
    context::HandlerContext,
    handler::{Handler, Message},
    invocation::{Invocation, Reply},
    registry::{LocalActivation, LocalActivationRegistry},
    task::Task,
};

use tracing::debug;

use std::{sync::Arc, time::Duration};

/// Routes invocations to local activations.
pub struct ExecutionRouter {
    registry: Arc<LocalActivationRegistry>,
    max_queue_size: usize,
    invocation_timeout: Option<Duration>,
}

impl ExecutionRouter {
    /// Creates a router over `registry`.
    ///
    /// # Arguments
    ///
    /// * `registry` - The activations hosted by this process.
    /// * `max_queue_size` - Per-activation backlog bound.
    /// * `invocation_timeout` - Deadline applied to the caller's view of request-response
    ///   invocations. The job itself keeps running.
    ///
    pub fn new(
        registry: Arc<LocalActivationRegistry>,
        max_queue_size: usize,
        invocation_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            max_queue_size,
            invocation_timeout,
        }
    }

    /// Schedules `invocation` on the entry's serializer and links the result to its completion.
    fn execute(&self, entry: Arc<LocalActivation>, invocation: Invocation) -> Task<Reply> {
        let one_way = invocation.is_one_way();
        let (reference, method, args, completion) = invocation.into_parts();
        debug!("Executing method {} of {} locally.", method, reference);

        let activation = entry.clone();
        let task = entry.serializer().execute_serialized(
            move || {
                // The entry may have been reaped between the lookup and this job.
                if activation.is_deactivated() {
                    debug!(
                        "Activation {} was deactivated, rejecting method {}.",
                        activation.reference(),
                        method
                    );
                    return Task::failed(Error::Deactivated(activation.reference().clone()));
                }
                activation.touch();
                let object = activation.object().clone();
                Task::spawn(async move { object.invoke(method, args).await.map(Arc::new) })
            },
            self.max_queue_size,
        );
        let task = match self.invocation_timeout {
            Some(timeout) if !one_way && !task.is_done() => task.with_timeout(timeout),
            _ => task,
        };
        if one_way {
            task.on_complete(move |result| {
                if let Err(e) = result {
                    debug!("One-way invocation of {} failed: {}", reference, e);
                }
            });
        }
        if let Some(completion) = completion {
            task.propagate_to(&completion);
        }
        task
    }
}

impl Handler for ExecutionRouter {
    fn write(&self, ctx: &HandlerContext, message: Message) -> Result<Task<Reply>, Error> {
        match message {
            Message::Invocation(invocation) => {
                match self.registry.find_by_reference(invocation.reference()) {
                    Some(entry) => Ok(self.execute(entry, invocation)),
                    None => Ok(ctx.write(Message::Invocation(invocation))),
                }
            }
            other => Ok(ctx.write(other)),
        }
    }

    fn on_read(&self, ctx: &HandlerContext, message: Message) -> Result<(), Error> {
        match message {
            Message::Invocation(invocation) => {
                match self.registry.find_by_reference(invocation.reference()) {
                    Some(entry) => {
                        self.execute(entry, invocation);
                    }
                    None => ctx.fire_read(Message::Invocation(invocation)),
                }
            }
            other => ctx.fire_read(other),
        }
        Ok(())
    }
}
