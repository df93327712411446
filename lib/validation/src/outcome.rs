// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ordinal results exchanged between probe workers and the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Final result of a validation run, reported as the process exit status.
///
/// The numeric values are part of the contract with the fleet repair system:
/// 92 (`ENOPROTOOPT`) marks an interconnect-specific failure that can be
/// mitigated by disabling the node, 131 (`ENOTRECOVERABLE`) marks everything
/// else that prevented a clean pass. No other codes are defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Success,
    ProtocolUnavailable,
    Unrecoverable,
}

impl ValidationResult {
    pub fn exit_code(self) -> i32 {
        match self {
            ValidationResult::Success => 0,
            ValidationResult::ProtocolUnavailable => 92,
            ValidationResult::Unrecoverable => 131,
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Success => write!(f, "success"),
            ValidationResult::ProtocolUnavailable => write!(f, "protocol-unavailable"),
            ValidationResult::Unrecoverable => write!(f, "unrecoverable"),
        }
    }
}

/// Terminal result of a single probe worker.
///
/// Written at most once per worker into the outcome channel. A worker that
/// is force-killed, or that gives up after its retry budget expires, writes
/// nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success,
    InterconnectFailure,
    ConnectionFailure,
    UnknownFailure,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Success => write!(f, "success"),
            ProbeOutcome::InterconnectFailure => write!(f, "interconnect-failure"),
            ProbeOutcome::ConnectionFailure => write!(f, "connection-failure"),
            ProbeOutcome::UnknownFailure => write!(f, "unknown-failure"),
        }
    }
}

/// Reduce the outcomes received from all workers to one final result.
///
/// Precedence, highest first: any interconnect failure wins (it carries an
/// actionable remediation), then any other failure, then an exact count of
/// successes. Fewer outcomes than spawned workers means at least one worker
/// was killed or went silent; that is never conflated with success.
pub fn reduce(outcomes: &[ProbeOutcome], spawned: usize) -> ValidationResult {
    let mut failed = false;
    for outcome in outcomes {
        match outcome {
            ProbeOutcome::InterconnectFailure => return ValidationResult::ProtocolUnavailable,
            ProbeOutcome::Success => {}
            _ => failed = true,
        }
    }
    if failed || outcomes.len() != spawned {
        ValidationResult::Unrecoverable
    } else {
        ValidationResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interconnect_failure_takes_precedence() {
        let outcomes = [
            ProbeOutcome::InterconnectFailure,
            ProbeOutcome::Success,
            ProbeOutcome::Success,
        ];
        assert_eq!(reduce(&outcomes, 3), ValidationResult::ProtocolUnavailable);
    }

    #[test]
    fn interconnect_failure_wins_over_other_failures() {
        let outcomes = [ProbeOutcome::UnknownFailure, ProbeOutcome::InterconnectFailure];
        assert_eq!(reduce(&outcomes, 2), ValidationResult::ProtocolUnavailable);
    }

    #[test]
    fn connection_failure_is_unrecoverable() {
        let outcomes = [ProbeOutcome::ConnectionFailure, ProbeOutcome::Success];
        assert_eq!(reduce(&outcomes, 2), ValidationResult::Unrecoverable);
    }

    #[test]
    fn all_success_with_full_count_passes() {
        let outcomes = [ProbeOutcome::Success, ProbeOutcome::Success];
        assert_eq!(reduce(&outcomes, 2), ValidationResult::Success);
    }

    #[test]
    fn missing_outcome_is_unrecoverable() {
        let outcomes = [ProbeOutcome::Success];
        assert_eq!(reduce(&outcomes, 2), ValidationResult::Unrecoverable);
    }

    #[test]
    fn exit_codes_match_the_repair_contract() {
        assert_eq!(ValidationResult::Success.exit_code(), 0);
        assert_eq!(ValidationResult::ProtocolUnavailable.exit_code(), 92);
        assert_eq!(ValidationResult::Unrecoverable.exit_code(), 131);
    }

    #[test]
    fn outcome_wire_roundtrip() {
        let line = serde_json::to_string(&ProbeOutcome::InterconnectFailure).unwrap();
        assert_eq!(line, "\"interconnect_failure\"");
        let parsed: ProbeOutcome = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, ProbeOutcome::InterconnectFailure);
    }
}
