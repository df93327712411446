// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-device probe worker.
//!
//! One probe runs in its own OS process per local GPU, so a crash or hang
//! inside the backend cannot take down sibling probes or the orchestrator.
//! Each probe joins the collective group at its global rank, runs one
//! all-reduce, and reports exactly one terminal outcome - or nothing at all
//! when a retriable failure outlives the worker's budget.

use std::time::{Duration, Instant};

use crate::classify::classify;
use crate::collectives::CollectiveBackend;
use crate::outcome::ProbeOutcome;
use crate::Result;

/// Inputs for one probe, computed once by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub local_rank: usize,
    pub master_addr: String,
    pub master_port: u16,
    pub gpus_per_node: usize,
    pub node_rank: usize,
    pub world_size: usize,
    /// Per-attempt timeout for joining the group.
    pub attempt_timeout: Duration,
    /// Total retry budget for this worker.
    pub budget: Duration,
}

impl ProbeSpec {
    /// Global rank of this device's probe.
    pub fn rank(&self) -> usize {
        self.node_rank * self.gpus_per_node + self.local_rank
    }

    /// Rendezvous endpoint passed to the backend.
    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.master_addr, self.master_port)
    }
}

/// Run one probe to completion.
///
/// Returns the worker's terminal outcome, or `None` when a retriable error
/// outlived the budget - the silent path the orchestrator accounts for by
/// treating a missing outcome as a failure.
pub fn run_probe(spec: &ProbeSpec, backend: &dyn CollectiveBackend) -> Option<ProbeOutcome> {
    let rank = spec.rank();
    let endpoint = spec.endpoint();
    let started = Instant::now();

    tracing::info!(rank, world_size = spec.world_size, %endpoint, "initializing collective group");

    loop {
        match attempt(spec, backend, &endpoint, rank) {
            Ok(()) => {
                tracing::info!(rank, elapsed = ?started.elapsed(), "validated collective group");
                return Some(ProbeOutcome::Success);
            }
            Err(err) => {
                let message = format!("{err:#}");
                let (retriable, outcome) = classify(&message);

                if !retriable {
                    tracing::warn!(
                        rank,
                        elapsed = ?started.elapsed(),
                        %outcome,
                        "non-retriable failure: {message}"
                    );
                    return Some(outcome);
                }
                if started.elapsed() >= spec.budget {
                    tracing::warn!(
                        rank,
                        elapsed = ?started.elapsed(),
                        "retriable failure but budget exhausted, giving up: {message}"
                    );
                    return None;
                }
                tracing::info!(rank, elapsed = ?started.elapsed(), "retriable failure: {message}");
            }
        }
    }
}

/// One join-reduce-synchronize cycle; the group is torn down on return, so
/// every retry starts from a clean slate.
fn attempt(
    spec: &ProbeSpec,
    backend: &dyn CollectiveBackend,
    endpoint: &str,
    rank: usize,
) -> Result<()> {
    let mut group = backend.join_group(
        endpoint,
        spec.local_rank,
        rank,
        spec.world_size,
        spec.attempt_timeout,
    )?;
    group.all_reduce_one()?;
    group.synchronize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectives::StubBackend;

    fn spec() -> ProbeSpec {
        ProbeSpec {
            local_rank: 2,
            master_addr: "10.0.0.1".to_string(),
            master_port: 29500,
            gpus_per_node: 4,
            node_rank: 1,
            world_size: 12,
            attempt_timeout: Duration::from_secs(1),
            budget: Duration::from_secs(5),
        }
    }

    #[test]
    fn rank_and_endpoint_derivation() {
        let spec = spec();
        assert_eq!(spec.rank(), 6);
        assert_eq!(spec.endpoint(), "tcp://10.0.0.1:29500");
    }

    #[test]
    fn clean_join_reports_success() {
        let backend = StubBackend::succeeding();
        assert_eq!(run_probe(&spec(), &backend), Some(ProbeOutcome::Success));
    }

    #[test]
    fn nccl_failure_is_terminal() {
        let backend = StubBackend::scripted([Err("ncclSystemError during init".to_string())]);
        assert_eq!(
            run_probe(&spec(), &backend),
            Some(ProbeOutcome::InterconnectFailure)
        );
    }

    #[test]
    fn unknown_failure_is_terminal() {
        let backend = StubBackend::scripted([Err("device fell off the bus".to_string())]);
        assert_eq!(
            run_probe(&spec(), &backend),
            Some(ProbeOutcome::UnknownFailure)
        );
    }

    #[test]
    fn retriable_failure_recovers() {
        let backend = StubBackend::scripted([
            Err("Connection reset by peer".to_string()),
            Err("Socket Timeout".to_string()),
            Ok(()),
        ]);
        assert_eq!(run_probe(&spec(), &backend), Some(ProbeOutcome::Success));
    }

    #[test]
    fn exhausted_budget_gives_up_silently() {
        let mut spec = spec();
        spec.budget = Duration::ZERO;
        let backend = StubBackend::scripted([Err("Connection closed by peer".to_string())]);
        assert_eq!(run_probe(&spec, &backend), None);
    }
}
