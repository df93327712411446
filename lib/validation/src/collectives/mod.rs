// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interconnect backend boundary.
//!
//! The validator treats the collective-communication library as a black box
//! that can join a group, run one all-reduce, and tear down. This module
//! defines the [`CollectiveBackend`] trait and provides two implementations:
//!
//! - [`StubBackend`]: scriptable in-process implementation for tests and
//!   builds without GPU support
//! - [`NcclBackend`]: real NCCL groups via `cudarc` (requires the `nccl`
//!   feature)

mod stub;

#[cfg(feature = "nccl")]
mod nccl;

pub use stub::StubBackend;

#[cfg(feature = "nccl")]
pub use nccl::NcclBackend;

use std::time::Duration;

use crate::Result;

/// One joined collective group, scoped to a single probe attempt.
///
/// Dropping the handle tears down the group, so a retrying worker never
/// carries partially-initialized state into its next attempt.
pub trait CollectiveGroup {
    /// Run one all-reduce over a 1-element payload on the local device.
    fn all_reduce_one(&mut self) -> Result<()>;

    /// Wait for the device to finish everything queued so far.
    fn synchronize(&mut self) -> Result<()>;
}

/// Opaque handle to the collective-communication library.
pub trait CollectiveBackend {
    /// Join the distributed group at `rank` of `world_size`, coordinating
    /// through `endpoint` (`tcp://<addr>:<port>`), within `timeout`.
    fn join_group(
        &self,
        endpoint: &str,
        local_device: usize,
        rank: usize,
        world_size: usize,
        timeout: Duration,
    ) -> Result<Box<dyn CollectiveGroup>>;
}
