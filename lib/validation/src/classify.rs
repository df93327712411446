// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Maps backend failure text to a retriability verdict and outcome category.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::outcome::ProbeOutcome;

/// NCCL signatures that mark the interconnect itself as broken.
const INTERCONNECT_ERRORS: &[&str] = &[
    "ncclUnhandledCudaError",
    "ncclSystemError",
    "ncclInternalError",
];

/// Transient rendezvous/store failures worth retrying.
const CONNECTION_ERRORS: &[&str] = &[
    "connect() timed out.",
    "Socket Timeout",
    "Connection reset by peer",
    "Connection closed by peer",
];

static INTERCONNECT_RE: Lazy<Regex> = Lazy::new(|| alternation(INTERCONNECT_ERRORS));
static CONNECTION_RE: Lazy<Regex> = Lazy::new(|| alternation(CONNECTION_ERRORS));

fn alternation(patterns: &[&str]) -> Regex {
    let joined = patterns
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&joined).expect("escaped literal alternation always compiles")
}

/// Classify a backend failure message.
///
/// Returns whether the failure is worth retrying and the [`ProbeOutcome`] a
/// worker should report if it is not. Interconnect signatures are checked
/// before connection signatures, so a message carrying both is attributed to
/// the interconnect.
pub fn classify(message: &str) -> (bool, ProbeOutcome) {
    if INTERCONNECT_RE.is_match(message) {
        (false, ProbeOutcome::InterconnectFailure)
    } else if CONNECTION_RE.is_match(message) {
        (true, ProbeOutcome::ConnectionFailure)
    } else {
        (false, ProbeOutcome::UnknownFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nccl_signatures_are_terminal() {
        for message in [
            "NCCL error: ncclSystemError, unhandled system error",
            "ncclInternalError while initializing communicator",
            "CUDA failure: ncclUnhandledCudaError",
        ] {
            assert_eq!(classify(message), (false, ProbeOutcome::InterconnectFailure));
        }
    }

    #[test]
    fn nccl_signature_wins_over_connection_text() {
        let message = "ncclSystemError after Connection reset by peer";
        assert_eq!(classify(message), (false, ProbeOutcome::InterconnectFailure));
    }

    #[test]
    fn connection_errors_are_retriable() {
        for message in [
            "rendezvous failed: connect() timed out.",
            "Socket Timeout while waiting for store",
            "read error: Connection reset by peer (os error 104)",
            "Connection closed by peer before handshake",
        ] {
            assert_eq!(classify(message), (true, ProbeOutcome::ConnectionFailure));
        }
    }

    #[test]
    fn anything_else_is_unknown() {
        assert_eq!(
            classify("out of memory on device 3"),
            (false, ProbeOutcome::UnknownFailure)
        );
        assert_eq!(classify(""), (false, ProbeOutcome::UnknownFailure));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(
            classify("NCCLSYSTEMERROR"),
            (false, ProbeOutcome::UnknownFailure)
        );
    }

    #[test]
    fn store_timeout_literal_does_not_match_other_parens() {
        // "connect() timed out." is matched literally, not as a regex group.
        assert_eq!(
            classify("connectX timed outY"),
            (false, ProbeOutcome::UnknownFailure)
        );
    }
}
