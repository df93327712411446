// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client for the local validation executor's bootstrap gate.
//!
//! The executor on every node answers one question over a plain byte-stream
//! connection on loopback: has validation already run? The payload `"0"`
//! means done, anything else means pending. The client sends nothing.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::{ErrorContext, Result};

/// Answer from one connect-and-wait cycle against the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapState {
    ConnectionLost,
    Pending,
    Done,
}

/// Short-lived client for the executor's bootstrap gate.
///
/// Owns one connection at a time and is queried from a single caller.
#[derive(Debug, Clone)]
pub struct BootstrapGate {
    endpoint: String,
    bootstrap_timeout: Duration,
    retry_interval: Duration,
}

impl BootstrapGate {
    pub fn new(port: u16, bootstrap_timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            endpoint: format!("127.0.0.1:{port}"),
            bootstrap_timeout,
            retry_interval,
        }
    }

    /// Ask whether validation still needs to run on this node.
    ///
    /// Retries the whole connect-and-wait cycle until the executor gives a
    /// definitive answer or the bootstrap window closes. An indeterminate
    /// window means skip, never fail: running validation in an environment
    /// that cannot even answer the gate would only produce noise.
    pub async fn should_run(&self) -> bool {
        let started = Instant::now();

        loop {
            match self.query().await {
                Ok(BootstrapState::Done) => {
                    tracing::info!("validation already completed, skipping");
                    return false;
                }
                Ok(BootstrapState::Pending) => {
                    tracing::info!("executor reports validation pending");
                    return true;
                }
                Ok(BootstrapState::ConnectionLost) => {
                    tracing::warn!("connection to executor lost before a state arrived, retrying");
                }
                Err(err) => {
                    tracing::warn!("unable to fetch validation state: {err:#}");
                }
            }

            if started.elapsed() > self.bootstrap_timeout {
                tracing::warn!("no answer from executor within the bootstrap window, skipping");
                return false;
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// One cycle: open a connection, send nothing, read a single message.
    async fn query(&self) -> Result<BootstrapState> {
        let mut stream = TcpStream::connect(&self.endpoint)
            .await
            .with_context(|| format!("connecting to executor at {}", self.endpoint))?;

        let mut buf = [0u8; 64];
        let read = stream
            .read(&mut buf)
            .await
            .context("reading executor state")?;
        if read == 0 {
            return Ok(BootstrapState::ConnectionLost);
        }

        let message = String::from_utf8_lossy(&buf[..read]);
        tracing::debug!(%message, "received executor state");
        Ok(if message == "0" {
            BootstrapState::Done
        } else {
            BootstrapState::Pending
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn gate_for(listener: &TcpListener) -> BootstrapGate {
        let port = listener.local_addr().unwrap().port();
        BootstrapGate::new(port, Duration::from_secs(5), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn done_means_skip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gate = gate_for(&listener);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"0").await.unwrap();
        });

        assert!(!gate.should_run().await);
    }

    #[tokio::test]
    async fn pending_means_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gate = gate_for(&listener);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"1").await.unwrap();
        });

        assert!(gate.should_run().await);
    }

    #[tokio::test]
    async fn dropped_connection_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gate = gate_for(&listener);

        tokio::spawn(async move {
            // First cycle: close without sending a state.
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
            // Second cycle gets the real answer.
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"1").await.unwrap();
        });

        assert!(gate.should_run().await);
    }

    #[tokio::test]
    async fn expired_window_means_skip() {
        // Bind then drop, so the port exists but nothing answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let gate = BootstrapGate::new(port, Duration::from_millis(50), Duration::from_millis(10));
        assert!(!gate.should_run().await);
    }
}
