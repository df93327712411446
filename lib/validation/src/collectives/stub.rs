// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stub interconnect backend.
//!
//! Yields a scripted sequence of join results, then keeps succeeding. Used
//! by tests to drive the probe worker through its retry states, and by
//! builds without the `nccl` feature.
//!
//! A stub "success" proves nothing about the node's interconnect; production
//! deployments must enable the `nccl` feature.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::{error, Result};

use super::{CollectiveBackend, CollectiveGroup};

/// In-process stand-in for the interconnect.
pub struct StubBackend {
    script: Mutex<VecDeque<std::result::Result<(), String>>>,
}

impl StubBackend {
    /// Backend that plays back `script` one entry per join attempt, then
    /// succeeds once the script is exhausted.
    pub fn scripted(script: impl IntoIterator<Item = std::result::Result<(), String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    /// Backend whose joins always succeed.
    pub fn succeeding() -> Self {
        Self::scripted([])
    }
}

impl CollectiveBackend for StubBackend {
    fn join_group(
        &self,
        endpoint: &str,
        local_device: usize,
        rank: usize,
        world_size: usize,
        _timeout: Duration,
    ) -> Result<Box<dyn CollectiveGroup>> {
        tracing::warn!(
            %endpoint,
            local_device,
            rank,
            world_size,
            "stub backend joining group - no actual collective communication"
        );

        match self.script.lock().expect("stub script lock").pop_front() {
            None | Some(Ok(())) => Ok(Box::new(StubGroup)),
            Some(Err(message)) => Err(error!("{message}")),
        }
    }
}

struct StubGroup;

impl CollectiveGroup for StubGroup {
    fn all_reduce_one(&mut self) -> Result<()> {
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }
}
