// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Validation orchestrator.
//!
//! Drives one run end to end: ask the bootstrap gate whether validation
//! should happen at all, resolve the rank-0 coordinator, launch one probe
//! process per local GPU, await them under a global deadline (killing
//! stragglers), and reduce whatever outcomes arrived.
//!
//! Probe processes hand their single outcome back as one JSON line on
//! stdout; a supervision task per child forwards it into an in-process
//! channel. The reduction only ever sees the channel, so it is independent
//! of how workers are spawned.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ValidationConfig;
use crate::gate::BootstrapGate;
use crate::outcome::{reduce, ProbeOutcome, ValidationResult};
use crate::resolve::{resolve_master_addr, DnsResolver};
use crate::{ErrorContext, Result};

pub struct Orchestrator {
    config: ValidationConfig,
}

impl Orchestrator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Drive one full validation run.
    ///
    /// `None` means the gate decided validation is not applicable; the
    /// process should exit 0 without reporting a result.
    pub async fn run(&self) -> Result<Option<ValidationResult>> {
        let gate = BootstrapGate::new(
            self.config.executor_port,
            self.config.bootstrap_timeout,
            self.config.gate_retry_interval,
        );
        if !gate.should_run().await {
            return Ok(None);
        }

        let master_ip = resolve_master_addr(
            &DnsResolver,
            &self.config.master_addr,
            self.config.resolution_timeout,
        )
        .await
        .context("resolving the rank-0 address")?;

        let commands = (0..self.config.gpus_per_node)
            .map(|local_rank| self.probe_command(local_rank, &master_ip.to_string()))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            workers = commands.len(),
            world_size = self.config.world_size(),
            budget = ?self.config.validation_timeout,
            "spawning probe workers"
        );

        let result = supervise(commands, self.config.validation_timeout).await?;
        Ok(Some(result))
    }

    /// Command line for one probe child: this binary re-executed with the
    /// hidden `probe` subcommand.
    fn probe_command(&self, local_rank: usize, master_ip: &str) -> Result<Command> {
        let exe = std::env::current_exe().context("locating the validator binary")?;
        let mut command = Command::new(exe);
        command
            .arg("probe")
            .arg("--local-rank")
            .arg(local_rank.to_string())
            .arg("--master-addr")
            .arg(master_ip)
            .arg("--master-port")
            .arg(self.config.master_port.to_string())
            .arg("--gpus-per-node")
            .arg(self.config.gpus_per_node.to_string())
            .arg("--node-rank")
            .arg(self.config.node_rank.to_string())
            .arg("--world-size")
            .arg(self.config.world_size().to_string());
        Ok(command)
    }
}

/// Launch the probe processes, await them under `budget`, and reduce
/// whatever outcomes made it onto the channel.
///
/// Workers are spawned in device-index order but may finish in any order.
/// When the deadline passes, every still-running worker is killed
/// best-effort and reduction proceeds regardless.
pub async fn supervise(commands: Vec<Command>, budget: Duration) -> Result<ValidationResult> {
    let spawned = commands.len();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let mut children = JoinSet::new();

    for (local_rank, mut command) in commands.into_iter().enumerate() {
        command.stdout(Stdio::piped()).kill_on_drop(true);
        let child = command
            .spawn()
            .with_context(|| format!("spawning probe worker {local_rank}"))?;
        children.spawn(watch_child(local_rank, child, tx.clone(), cancel.clone()));
    }
    drop(tx);

    let deadline = Instant::now() + budget;
    loop {
        tokio::select! {
            joined = children.join_next() => {
                if joined.is_none() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!("validation did not finish before the deadline, terminating workers");
                cancel.cancel();
                while children.join_next().await.is_some() {}
                break;
            }
        }
    }

    let mut outcomes = Vec::with_capacity(spawned);
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }

    let result = reduce(&outcomes, spawned);
    tracing::info!(received = outcomes.len(), spawned, %result, "validation finished");
    Ok(result)
}

/// Forward one child's outcome line into the channel, killing the child if
/// the run is cancelled.
async fn watch_child(
    local_rank: usize,
    mut child: Child,
    tx: mpsc::UnboundedSender<ProbeOutcome>,
    cancel: CancellationToken,
) {
    let Some(stdout) = child.stdout.take() else {
        tracing::error!(local_rank, "probe worker spawned without a stdout pipe");
        return;
    };
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match serde_json::from_str::<ProbeOutcome>(&line) {
                        Ok(outcome) => {
                            // A worker reports at most one outcome.
                            let _ = tx.send(outcome);
                            break;
                        }
                        Err(_) => tracing::debug!(local_rank, %line, "ignoring worker output"),
                    },
                    // Pipe closed: the worker exited (or gave up silently).
                    Ok(None) | Err(_) => break,
                }
            }
            _ = cancel.cancelled() => {
                // Termination is best-effort; failures are ignored and the
                // run proceeds to reduction either way.
                let _ = child.start_kill();
                break;
            }
        }
    }

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => tracing::debug!(local_rank, %status, "probe worker exited"),
            Err(err) => tracing::warn!(local_rank, "failed to reap probe worker: {err:#}"),
        },
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            tracing::debug!(local_rank, "probe worker terminated at the deadline");
        }
    }
}
