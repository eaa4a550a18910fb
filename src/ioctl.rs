// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! insntrace operation surface
//!
//! The byte-level request/reply interface the device host hands
//! operations through. Requests must match their record size exactly;
//! replies must have room for the declared output. The worker parses,
//! dispatches to the device, and serializes the reply, returning how
//! many bytes it wrote.

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::device::InsntraceDevice;
use crate::intel_pt::{AssignThreadBuffer, BufferConfig, ChunkHandleReq};
use crate::mtrace::InsntraceConfig;
use crate::types::{Result, RX_ERR_BUFFER_TOO_SMALL, RX_ERR_INVALID_ARGS};

/// ============================================================================
/// Operation codes
/// ============================================================================

pub const IOCTL_FAMILY_INSNTRACE: u32 = 0x26;

const fn ioctl_op(number: u32) -> u32 {
    (IOCTL_FAMILY_INSNTRACE << 8) | number
}

pub const IOCTL_INSNTRACE_ALLOC_TRACE: u32 = ioctl_op(0);
pub const IOCTL_INSNTRACE_FREE_TRACE: u32 = ioctl_op(1);
pub const IOCTL_INSNTRACE_GET_TRACE_CONFIG: u32 = ioctl_op(2);
pub const IOCTL_INSNTRACE_ALLOC_BUFFER: u32 = ioctl_op(3);
pub const IOCTL_INSNTRACE_ASSIGN_THREAD_BUFFER: u32 = ioctl_op(4);
pub const IOCTL_INSNTRACE_RELEASE_THREAD_BUFFER: u32 = ioctl_op(5);
pub const IOCTL_INSNTRACE_GET_BUFFER_CONFIG: u32 = ioctl_op(6);
pub const IOCTL_INSNTRACE_GET_BUFFER_INFO: u32 = ioctl_op(7);
pub const IOCTL_INSNTRACE_GET_CHUNK_HANDLE: u32 = ioctl_op(8);
pub const IOCTL_INSNTRACE_FREE_BUFFER: u32 = ioctl_op(9);
pub const IOCTL_INSNTRACE_START: u32 = ioctl_op(10);
pub const IOCTL_INSNTRACE_STOP: u32 = ioctl_op(11);

/// Family of an operation code
pub const fn ioctl_family(op: u32) -> u32 {
    op >> 8
}

/// Serialize a reply record, reporting the bytes written
fn write_reply<T: IntoBytes + Immutable>(reply: &mut [u8], value: &T) -> Result<usize> {
    let bytes = value.as_bytes();
    if reply.len() < bytes.len() {
        return Err(RX_ERR_BUFFER_TOO_SMALL);
    }
    reply[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

fn require_empty(buf: &[u8]) -> Result {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(RX_ERR_INVALID_ARGS)
    }
}

/// Dispatch an operation to the device
pub fn ioctl(dev: &InsntraceDevice, op: u32, cmd: &[u8], reply: &mut [u8]) -> Result<usize> {
    match ioctl_family(op) {
        IOCTL_FAMILY_INSNTRACE => ioctl_worker(dev, op, cmd, reply),
        _ => Err(RX_ERR_INVALID_ARGS),
    }
}

fn ioctl_worker(dev: &InsntraceDevice, op: u32, cmd: &[u8], reply: &mut [u8]) -> Result<usize> {
    match op {
        IOCTL_INSNTRACE_ALLOC_TRACE => {
            require_empty(reply)?;
            let config =
                InsntraceConfig::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            dev.alloc_trace(config.mode, config.num_traces)?;
            Ok(0)
        }

        IOCTL_INSNTRACE_FREE_TRACE => {
            require_empty(cmd)?;
            require_empty(reply)?;
            dev.free_trace()?;
            Ok(0)
        }

        IOCTL_INSNTRACE_GET_TRACE_CONFIG => {
            require_empty(cmd)?;
            let config = dev.get_trace_config()?;
            write_reply(reply, &config)
        }

        IOCTL_INSNTRACE_ALLOC_BUFFER => {
            let config = BufferConfig::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            // Nothing is allocated unless the reply can carry the
            // descriptor back.
            if reply.len() < core::mem::size_of::<u32>() {
                return Err(RX_ERR_BUFFER_TOO_SMALL);
            }
            let descriptor = dev.alloc_buffer(&config)?;
            write_reply(reply, &descriptor)
        }

        IOCTL_INSNTRACE_ASSIGN_THREAD_BUFFER => {
            require_empty(reply)?;
            let assign =
                AssignThreadBuffer::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            dev.assign_thread_buffer(assign.descriptor, assign.thread)?;
            Ok(0)
        }

        IOCTL_INSNTRACE_RELEASE_THREAD_BUFFER => {
            require_empty(reply)?;
            let assign =
                AssignThreadBuffer::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            dev.release_thread_buffer(assign.descriptor, assign.thread)?;
            Ok(0)
        }

        IOCTL_INSNTRACE_GET_BUFFER_CONFIG => {
            let descriptor = u32::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            let config = dev.get_buffer_config(descriptor)?;
            write_reply(reply, &config)
        }

        IOCTL_INSNTRACE_GET_BUFFER_INFO => {
            let descriptor = u32::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            let info = dev.get_buffer_info(descriptor)?;
            write_reply(reply, &info)
        }

        IOCTL_INSNTRACE_GET_CHUNK_HANDLE => {
            let req = ChunkHandleReq::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            // Don't duplicate a handle the reply cannot return.
            if reply.len() < core::mem::size_of::<u32>() {
                return Err(RX_ERR_BUFFER_TOO_SMALL);
            }
            let handle = dev.get_chunk_handle(req.descriptor, req.chunk_num)?;
            write_reply(reply, &handle)
        }

        IOCTL_INSNTRACE_FREE_BUFFER => {
            require_empty(reply)?;
            let descriptor = u32::read_from_bytes(cmd).map_err(|_| RX_ERR_INVALID_ARGS)?;
            dev.free_buffer(descriptor)?;
            Ok(0)
        }

        IOCTL_INSNTRACE_START => {
            require_empty(cmd)?;
            require_empty(reply)?;
            dev.start()?;
            Ok(0)
        }

        IOCTL_INSNTRACE_STOP => {
            require_empty(cmd)?;
            require_empty(reply)?;
            dev.stop()?;
            Ok(0)
        }

        _ => Err(RX_ERR_INVALID_ARGS),
    }
}
