// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Rank-0 address resolution with bounded exponential backoff.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::{error, ErrorContext, Result};

/// Resolution kept failing for longer than the allowed budget.
#[derive(Debug, thiserror::Error)]
#[error("resolving {host} timed out after {retries} retries: {last_error}")]
pub struct ResolveTimeout {
    pub host: String,
    pub retries: u32,
    pub last_error: String,
}

/// Name-resolution primitive, a seam for tests.
#[async_trait]
pub trait ResolveHost: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr>;
}

/// Resolver backed by the system's DNS.
pub struct DnsResolver;

#[async_trait]
impl ResolveHost for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("unable to resolve {host}"))?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| error!("no addresses returned for {host}"))
    }
}

/// Resolve `host`, retrying with `10^n ms + jitter` backoff.
///
/// The budget counts only the intervals actually slept, not time spent in
/// the resolution attempts themselves; once it exceeds `timeout` the next
/// failure is returned as [`ResolveTimeout`]. The geometric growth reaches
/// multi-minute waits after about six attempts, so the timeout is the only
/// bound needed on the retry count.
pub async fn resolve_master_addr<R: ResolveHost + ?Sized>(
    resolver: &R,
    host: &str,
    timeout: Duration,
) -> Result<IpAddr> {
    let mut slept = Duration::ZERO;
    let mut retries: u32 = 0;

    loop {
        match resolver.resolve(host).await {
            Ok(addr) => {
                tracing::info!(%host, %addr, retries, "resolved rank-0 address");
                return Ok(addr);
            }
            Err(err) => {
                if slept > timeout {
                    return Err(ResolveTimeout {
                        host: host.to_string(),
                        retries,
                        last_error: format!("{err:#}"),
                    }
                    .into());
                }

                retries += 1;
                let backoff = Duration::from_millis(
                    10u64.saturating_pow(retries) + rand::thread_rng().gen_range(0..=100),
                );
                tracing::warn!(
                    %host,
                    retries,
                    backoff_ms = backoff.as_millis() as u64,
                    slept_ms = slept.as_millis() as u64,
                    "resolution failed, retrying: {err:#}"
                );
                tokio::time::sleep(backoff).await;
                slept += backoff;
            }
        }
    }
}
