// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Runtime configuration
//!

use crate::{cache::CacheSpec, framing::DEFAULT_MAX_FRAME_LENGTH};

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Runtime settings. Every field has a default, so partial documents deserialize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Backlog bound of each activation's serializer.
    pub max_queue_size: usize,
    /// Deadline of request-response invocations executed locally. `None` waits forever.
    pub invocation_timeout: Option<Duration>,
    /// Activations idle for this long are deactivated by the reaper.
    pub idle_timeout: Duration,
    /// Period of the idle reaper.
    pub reap_interval: Duration,
    /// Largest frame body accepted by [`LengthFieldFramer`](crate::LengthFieldFramer).
    pub max_frame_length: usize,
    /// Policy of cacheable methods that do not declare their own.
    pub cache: CacheSpec,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            invocation_timeout: None,
            idle_timeout: Duration::from_secs(600),
            reap_interval: Duration::from_secs(60),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            cache: CacheSpec::default(),
        }
    }
}
