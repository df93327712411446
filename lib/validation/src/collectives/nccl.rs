// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NCCL interconnect backend via `cudarc`.
//!
//! Joining a group is a two-step rendezvous: rank 0 generates the NCCL
//! unique id and serves it to every other rank over the job's `tcp://`
//! coordinator endpoint, then all ranks collectively call
//! `ncclCommInitRank`. The probe's collective operation is a single
//! all-reduce of one `f32` on the local device.
//!
//! Rendezvous timeouts are reported with the same wording the distributed
//! store uses (`connect() timed out.`), so the failure classifier treats
//! them as transient.

use std::io::{Read, Write};
use std::mem::MaybeUninit;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cudarc::driver::{CudaContext, CudaSlice, CudaStream};
use cudarc::nccl::sys::{
    ncclAllReduce, ncclComm_t, ncclCommDestroy, ncclCommInitRank, ncclDataType_t,
    ncclGetUniqueId, ncclRedOp_t, ncclResult_t, ncclUniqueId,
};

use crate::{error, raise, ErrorContext, Result};

use super::{CollectiveBackend, CollectiveGroup};

/// Size of the unique id blob exchanged during rendezvous.
const UNIQUE_ID_LEN: usize = 128;

/// Poll interval while waiting for peers or for the rank-0 listener.
const RENDEZVOUS_POLL: Duration = Duration::from_millis(50);

/// Real NCCL groups, one communicator per join.
pub struct NcclBackend;

impl NcclBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NcclBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectiveBackend for NcclBackend {
    fn join_group(
        &self,
        endpoint: &str,
        local_device: usize,
        rank: usize,
        world_size: usize,
        timeout: Duration,
    ) -> Result<Box<dyn CollectiveGroup>> {
        let deadline = Instant::now() + timeout;
        let addr = parse_endpoint(endpoint)?;

        let nccl_id = if rank == 0 {
            let id = generate_unique_id()?;
            serve_unique_id(addr.port(), &id, world_size - 1, deadline)?;
            id
        } else {
            fetch_unique_id(&addr, deadline)?
        };

        let context = CudaContext::new(local_device)
            .with_context(|| format!("creating CUDA context on device {local_device}"))?;
        let stream = context
            .new_stream()
            .context("creating CUDA stream for NCCL")?;
        let buffer = stream
            .clone_htod(&[1.0f32])
            .context("allocating device payload")?;

        let comm = init_communicator(&nccl_id, rank, world_size)?;
        tracing::debug!(rank, world_size, "NCCL communicator initialized");

        Ok(Box::new(NcclGroup {
            comm,
            stream,
            buffer,
            _context: context,
        }))
    }
}

struct NcclGroup {
    comm: ncclComm_t,
    stream: Arc<CudaStream>,
    buffer: CudaSlice<f32>,
    _context: Arc<CudaContext>,
}

impl CollectiveGroup for NcclGroup {
    fn all_reduce_one(&mut self) -> Result<()> {
        let (ptr, _guard) = self.buffer.device_ptr(&self.stream);
        let ptr = ptr as usize as *mut std::ffi::c_void;

        // SAFETY: in-place all-reduce over a live 1-element device buffer;
        // the stream cast bridges the identical CUstream types of the driver
        // and nccl sys modules.
        let result = unsafe {
            ncclAllReduce(
                ptr,
                ptr,
                1,
                ncclDataType_t::ncclFloat32,
                ncclRedOp_t::ncclSum,
                self.comm,
                self.stream.cu_stream().cast(),
            )
        };
        check_nccl(result).context("ncclAllReduce failed")
    }

    fn synchronize(&mut self) -> Result<()> {
        self.stream
            .synchronize()
            .context("synchronizing NCCL stream")
    }
}

impl Drop for NcclGroup {
    fn drop(&mut self) {
        // SAFETY: the communicator was created by this group and is only
        // destroyed here.
        let result = unsafe { ncclCommDestroy(self.comm) };
        if let Err(err) = check_nccl(result) {
            tracing::warn!("failed to destroy NCCL communicator: {err:#}");
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let host_port = endpoint
        .strip_prefix("tcp://")
        .ok_or_else(|| error!("endpoint {endpoint} is not a tcp:// address"))?;
    host_port
        .to_socket_addrs()
        .with_context(|| format!("invalid rendezvous endpoint {endpoint}"))?
        .next()
        .ok_or_else(|| error!("endpoint {endpoint} resolved to no address"))
}

fn generate_unique_id() -> Result<ncclUniqueId> {
    let mut nccl_id = MaybeUninit::<ncclUniqueId>::uninit();

    // SAFETY: ncclGetUniqueId initializes the ncclUniqueId struct.
    let result = unsafe { ncclGetUniqueId(nccl_id.as_mut_ptr()) };
    check_nccl(result).context("failed to generate NCCL unique id")?;

    // SAFETY: ncclGetUniqueId has initialized the struct.
    Ok(unsafe { nccl_id.assume_init() })
}

fn init_communicator(nccl_id: &ncclUniqueId, rank: usize, world_size: usize) -> Result<ncclComm_t> {
    let mut comm = MaybeUninit::<ncclComm_t>::uninit();

    // SAFETY: collective call; every rank passes the same unique id.
    let result = unsafe {
        ncclCommInitRank(
            comm.as_mut_ptr(),
            world_size as i32,
            *nccl_id,
            rank as i32,
        )
    };
    check_nccl(result).context("failed to initialize NCCL communicator")?;

    // SAFETY: ncclCommInitRank has initialized the communicator.
    Ok(unsafe { comm.assume_init() })
}

/// Rank 0's half of the rendezvous: serve the unique id to every peer.
fn serve_unique_id(
    port: u16,
    nccl_id: &ncclUniqueId,
    peers: usize,
    deadline: Instant,
) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .with_context(|| format!("binding rendezvous listener on port {port}"))?;
    listener
        .set_nonblocking(true)
        .context("configuring rendezvous listener")?;

    let blob: Vec<u8> = nccl_id.internal.iter().map(|&b| b as u8).collect();
    let mut served = 0;

    while served < peers {
        if Instant::now() >= deadline {
            raise!("rendezvous connect() timed out. served {served} of {peers} peers");
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                stream
                    .set_nonblocking(false)
                    .context("configuring rendezvous connection")?;
                stream
                    .write_all(&blob)
                    .with_context(|| format!("sending unique id to {peer}"))?;
                served += 1;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(RENDEZVOUS_POLL);
            }
            Err(err) => return Err(err).context("accepting rendezvous connection"),
        }
    }
    Ok(())
}

/// A non-zero rank's half of the rendezvous: fetch the unique id from rank 0.
fn fetch_unique_id(addr: &SocketAddr, deadline: Instant) -> Result<ncclUniqueId> {
    let mut stream = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            raise!("rendezvous connect() timed out. rank 0 at {addr} never came up");
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => break stream,
            // Rank 0 may not be listening yet; keep knocking until the deadline.
            Err(err) => {
                tracing::debug!(%addr, "rendezvous connect failed, retrying: {err}");
                std::thread::sleep(RENDEZVOUS_POLL);
            }
        }
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        raise!("rendezvous connect() timed out. no time left to read the unique id");
    }
    stream
        .set_read_timeout(Some(remaining))
        .context("configuring rendezvous read timeout")?;

    let mut blob = [0u8; UNIQUE_ID_LEN];
    stream
        .read_exact(&mut blob)
        .with_context(|| format!("reading unique id from rank 0 at {addr}"))?;

    let mut nccl_id = ncclUniqueId { internal: [0i8; UNIQUE_ID_LEN] };
    for (slot, &byte) in nccl_id.internal.iter_mut().zip(blob.iter()) {
        *slot = byte as i8;
    }
    Ok(nccl_id)
}

fn check_nccl(result: ncclResult_t) -> Result<()> {
    if result == ncclResult_t::ncclSuccess {
        Ok(())
    } else {
        raise!("NCCL error: {result:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parsing() {
        let addr = parse_endpoint("tcp://10.0.0.5:29500").unwrap();
        assert_eq!(addr.port(), 29500);
        assert!(parse_endpoint("10.0.0.5:29500").is_err());
    }

    #[test]
    #[ignore = "requires NCCL and at least 1 GPU - run with: cargo test -p preflight-validation --features nccl -- --ignored"]
    fn single_rank_group_round_trip() {
        let backend = NcclBackend::new();
        let mut group = backend
            .join_group("tcp://127.0.0.1:29511", 0, 0, 1, Duration::from_secs(30))
            .expect("join single-rank group");
        group.all_reduce_one().expect("all-reduce");
        group.synchronize().expect("synchronize");
    }
}
