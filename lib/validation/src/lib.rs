// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pre-flight validation of the NCCL interconnect for multi-node GPU jobs.
//!
//! Before a distributed training job starts, every node runs the
//! [`Orchestrator`] to prove that each local GPU can join a collective group
//! and complete one all-reduce against the job's rank-0 coordinator. The
//! outcome is a small set of exit codes an external repair system acts on:
//! an interconnect-specific failure maps to a distinguished code so the node
//! can be cordoned, everything else that prevents a clean pass maps to a
//! generic unrecoverable code.

pub use anyhow::{Context as ErrorContext, Error, Result, anyhow as error, bail as raise};

pub mod classify;
pub mod collectives;
pub mod config;
pub mod gate;
pub mod logging;
pub mod orchestrator;
pub mod outcome;
pub mod probe;
pub mod resolve;

pub use config::ValidationConfig;
pub use orchestrator::Orchestrator;
pub use outcome::{ProbeOutcome, ValidationResult};
