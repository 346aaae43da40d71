// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Every failure the runtime core can report. Errors are `Clone` because a
//! completed [`Task`](crate::Task) hands the same result to every observer.
//!

use crate::{invocation::MethodId, reference::AddressableReference};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the runtime core.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The serializer backlog for a key reached its bound.
    #[error("Execution queue is full ({size} pending jobs).")]
    QueueFull {
        /// Approximate number of pending jobs when the job was rejected.
        size: usize,
    },
    /// A pipeline handler failed synchronously.
    #[error("Pipeline handler failed: {0}")]
    Handler(String),
    /// The target method completed exceptionally.
    #[error("Invocation failed: {0}")]
    Invocation(String),
    /// A length prefix implied an unreasonable frame size.
    #[error("Corrupted frame: length prefix {length} is out of bounds.")]
    FramingCorruption {
        /// The decoded length prefix.
        length: u64,
    },
    /// The completion handle was cancelled by its owner.
    #[error("Task was cancelled.")]
    Cancelled,
    /// The completion handle expired before a result arrived.
    #[error("Task timed out.")]
    Timeout,
    /// A handler with the same name is already part of the pipeline.
    #[error("Handler '{0}' already exists in the pipeline.")]
    HandlerExists(String),
    /// The anchor handler for an insertion was not found.
    #[error("Handler '{0}' not found in the pipeline.")]
    HandlerNotFound(String),
    /// The dispatch table has no entry for the method.
    #[error("Unknown method {method} on interface '{interface}'.")]
    UnknownMethod {
        /// Interface identifier of the target.
        interface: String,
        /// Method identifier that could not be resolved.
        method: MethodId,
    },
    /// An outbound operation ran off the tail of the pipeline.
    #[error("Unhandled pipeline operation: {0}")]
    Unhandled(String),
    /// The activation still has queued or running work.
    #[error("Activation {0} is busy.")]
    Busy(AddressableReference),
    /// The activation was deactivated before the invocation could run. Retrying resolves the
    /// reference again.
    #[error("Activation {0} was deactivated.")]
    Deactivated(AddressableReference),
    /// Canonical encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(String),
    /// The completion handle was dropped without a result.
    #[error("Completion handle closed without a result.")]
    Closed,
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Codec(error.to_string())
    }
}
