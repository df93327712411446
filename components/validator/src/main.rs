// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pre-flight NCCL validator.
//!
//! Run with no arguments on every node of a multi-node job before training
//! starts. Exit codes: 0 for success or "validation not applicable", 92 for
//! an interconnect-specific failure (the repair system disables the node),
//! 131 for anything else that prevented a clean pass.

use std::io::Write;

use clap::{Args, Parser, Subcommand};

use preflight_validation::collectives::CollectiveBackend;
use preflight_validation::config::{self, GROUP_JOIN_TIMEOUT};
use preflight_validation::probe::{run_probe, ProbeSpec};
use preflight_validation::{logging, Orchestrator, Result, ValidationConfig, ValidationResult};

#[derive(Parser)]
#[command(author, version, about = "Pre-flight NCCL interconnect validation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Probe one device; spawned internally, one process per local GPU.
    #[command(hide = true)]
    Probe(ProbeArgs),
}

#[derive(Args)]
struct ProbeArgs {
    #[arg(long)]
    local_rank: usize,
    #[arg(long)]
    master_addr: String,
    #[arg(long)]
    master_port: u16,
    #[arg(long)]
    gpus_per_node: usize,
    #[arg(long)]
    node_rank: usize,
    #[arg(long)]
    world_size: usize,
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Probe(args)) => run_worker(args),
        None => {
            let code = match orchestrate().await {
                Ok(None) => 0,
                Ok(Some(result)) => result.exit_code(),
                Err(err) => {
                    tracing::error!("validation failed: {err:#}");
                    ValidationResult::Unrecoverable.exit_code()
                }
            };
            std::process::exit(code);
        }
    }
}

async fn orchestrate() -> Result<Option<ValidationResult>> {
    if let Some(reason) = config::skip_reason() {
        tracing::info!("skipping NCCL validation: {reason}");
        return Ok(None);
    }
    let config = ValidationConfig::from_env()?;
    Orchestrator::new(config).run().await
}

/// Probe worker body: emit at most one outcome line on stdout, then exit 0
/// so the orchestrator can use process exit as the completion signal.
fn run_worker(args: ProbeArgs) -> ! {
    let spec = ProbeSpec {
        local_rank: args.local_rank,
        master_addr: args.master_addr,
        master_port: args.master_port,
        gpus_per_node: args.gpus_per_node,
        node_rank: args.node_rank,
        world_size: args.world_size,
        attempt_timeout: GROUP_JOIN_TIMEOUT,
        budget: GROUP_JOIN_TIMEOUT,
    };

    if let Some(outcome) = run_probe(&spec, backend().as_ref()) {
        match serde_json::to_string(&outcome) {
            Ok(line) => {
                let mut stdout = std::io::stdout();
                if let Err(err) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
                    tracing::error!("unable to report outcome: {err}");
                }
            }
            Err(err) => tracing::error!("unable to encode outcome: {err}"),
        }
    }
    std::process::exit(0);
}

fn backend() -> Box<dyn CollectiveBackend> {
    #[cfg(feature = "nccl")]
    {
        Box::new(preflight_validation::collectives::NcclBackend::new())
    }
    #[cfg(not(feature = "nccl"))]
    {
        Box::new(preflight_validation::collectives::StubBackend::succeeding())
    }
}
