// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration, read once at startup.
//!
//! The scheduler hands every container the same distributed-job environment
//! (`MASTER_ADDR`, `NODE_RANK`, ...). All of it is captured here into an
//! immutable [`ValidationConfig`] before any work starts; no other module
//! reads process environment directly.

use std::str::FromStr;
use std::time::Duration;

use crate::{raise, ErrorContext, Result};

/// Number of GPUs (and therefore probe workers) on this node.
pub const GPU_PER_NODE_COUNT_ENV: &str = "GPU_PER_NODE_COUNT";
/// This node's rank within the job.
pub const NODE_RANK_ENV: &str = "NODE_RANK";
/// Total number of nodes in the job.
pub const NODE_COUNT_ENV: &str = "NODE_COUNT";
/// Hostname of the rank-0 coordinator.
pub const MASTER_ADDR_ENV: &str = "MASTER_ADDR";
/// Rendezvous port on the rank-0 coordinator.
pub const MASTER_PORT_ENV: &str = "MASTER_PORT";

/// Set to `true` to skip validation unconditionally.
pub const SKIP_OVERRIDE_ENV: &str = "PREFLIGHT_SKIP_NCCL_VALIDATION";
/// Collective backend selected for the job; only `nccl` jobs are validated.
pub const BACKEND_ENV: &str = "BACKEND";
/// Only InfiniBand-enabled jobs exercise the interconnect worth validating.
pub const INFINIBAND_ENABLED_ENV: &str = "INFINIBAND_ENABLED";

/// Fixed port the local validation executor listens on.
pub const BOOTSTRAP_EXECUTOR_PORT: u16 = 10000;

/// Deadline for resolving the rank-0 address.
pub const MASTER_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(60);
/// Wall-clock budget for the whole validation run.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(300);
/// Window for the executor gate to produce a definitive answer.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(300);
/// Per-worker budget for joining the group; also the per-attempt timeout.
pub const GROUP_JOIN_TIMEOUT: Duration = Duration::from_secs(60);
/// Pause between gate reconnect attempts.
pub const GATE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Immutable configuration for one validation run.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub gpus_per_node: usize,
    pub node_rank: usize,
    pub node_count: usize,
    pub master_addr: String,
    pub master_port: u16,

    pub resolution_timeout: Duration,
    pub validation_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub join_timeout: Duration,
    pub gate_retry_interval: Duration,
    pub executor_port: u16,
}

impl ValidationConfig {
    /// Read the required variables; a missing or empty value is fatal, never
    /// a silent default.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gpus_per_node: require_parsed(GPU_PER_NODE_COUNT_ENV)?,
            node_rank: require_parsed(NODE_RANK_ENV)?,
            node_count: require_parsed(NODE_COUNT_ENV)?,
            master_addr: require(MASTER_ADDR_ENV)?,
            master_port: require_parsed(MASTER_PORT_ENV)?,

            resolution_timeout: MASTER_RESOLUTION_TIMEOUT,
            validation_timeout: VALIDATION_TIMEOUT,
            bootstrap_timeout: BOOTSTRAP_TIMEOUT,
            join_timeout: GROUP_JOIN_TIMEOUT,
            gate_retry_interval: GATE_RETRY_INTERVAL,
            executor_port: BOOTSTRAP_EXECUTOR_PORT,
        })
    }

    /// Total number of ranks in the collective group.
    pub fn world_size(&self) -> usize {
        self.gpus_per_node * self.node_count
    }
}

/// Decide whether this job shape needs interconnect validation at all.
///
/// Returns the reason to skip, or `None` when validation applies. Skipping
/// is a clean "not applicable" exit, not a failure.
pub fn skip_reason() -> Option<String> {
    if env_equals(SKIP_OVERRIDE_ENV, "true") {
        return Some("skipped by override".to_string());
    }
    if !env_equals(BACKEND_ENV, "nccl") || !env_equals(INFINIBAND_ENABLED_ENV, "true") {
        return Some("not an InfiniBand-enabled NCCL job".to_string());
    }
    let node_count = std::env::var(NODE_COUNT_ENV)
        .ok()
        .and_then(|v| v.parse::<usize>().ok());
    match node_count {
        Some(n) if n > 1 => None,
        _ => Some("not a multi-node job".to_string()),
    }
}

fn env_equals(name: &str, expected: &str) -> bool {
    std::env::var(name).as_deref() == Ok(expected)
}

fn require(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => raise!("{name} environment variable not defined"),
    }
}

fn require_parsed<T>(name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    require(name)?
        .parse()
        .with_context(|| format!("invalid value for {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment is process-global, so everything that touches it lives in
    // one test to keep the suite parallel-safe.
    #[test]
    fn env_round_trip() {
        std::env::set_var(GPU_PER_NODE_COUNT_ENV, "4");
        std::env::set_var(NODE_RANK_ENV, "1");
        std::env::set_var(NODE_COUNT_ENV, "3");
        std::env::set_var(MASTER_ADDR_ENV, "trainer-0.example");
        std::env::set_var(MASTER_PORT_ENV, "29500");

        let config = ValidationConfig::from_env().unwrap();
        assert_eq!(config.gpus_per_node, 4);
        assert_eq!(config.node_rank, 1);
        assert_eq!(config.node_count, 3);
        assert_eq!(config.master_addr, "trainer-0.example");
        assert_eq!(config.master_port, 29500);
        assert_eq!(config.world_size(), 12);

        // Empty counts as missing.
        std::env::set_var(NODE_RANK_ENV, "");
        assert!(ValidationConfig::from_env().is_err());
        std::env::set_var(NODE_RANK_ENV, "1");

        // Garbage is fatal, not defaulted.
        std::env::set_var(MASTER_PORT_ENV, "not-a-port");
        assert!(ValidationConfig::from_env().is_err());
        std::env::set_var(MASTER_PORT_ENV, "29500");

        std::env::remove_var(MASTER_ADDR_ENV);
        assert!(ValidationConfig::from_env().is_err());
        std::env::set_var(MASTER_ADDR_ENV, "trainer-0.example");

        // Gating: multi-node InfiniBand NCCL jobs run, everything else skips.
        std::env::set_var(BACKEND_ENV, "nccl");
        std::env::set_var(INFINIBAND_ENABLED_ENV, "true");
        std::env::remove_var(SKIP_OVERRIDE_ENV);
        assert_eq!(skip_reason(), None);

        std::env::set_var(SKIP_OVERRIDE_ENV, "true");
        assert!(skip_reason().is_some());
        std::env::remove_var(SKIP_OVERRIDE_ENV);

        std::env::set_var(BACKEND_ENV, "gloo");
        assert!(skip_reason().is_some());
        std::env::set_var(BACKEND_ENV, "nccl");

        std::env::set_var(NODE_COUNT_ENV, "1");
        assert!(skip_reason().is_some());
        std::env::set_var(NODE_COUNT_ENV, "3");
        assert_eq!(skip_reason(), None);
    }
}
