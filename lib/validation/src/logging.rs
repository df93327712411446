// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide tracing setup.
//!
//! Logs go to stderr: a probe worker's stdout is reserved for its single
//! outcome line. The filter is configured via the `PREFLIGHT_LOG`
//! environment variable and defaults to `info`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// ENV used to set the log filter.
const FILTER_ENV: &str = "PREFLIGHT_LOG";

/// Default log level.
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the subscriber is only installed once.
static INIT: Once = Once::new();

/// Initialize the global tracing subscriber.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_LEVEL));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    });
}
