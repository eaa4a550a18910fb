// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Privileged trace-control bridge
//!
//! Typed wrappers over the kernel's mtrace control channel. Every call
//! forwards a (kind, action, options, payload) tuple; the payload is
//! the serialized register block or trace configuration.

use zerocopy::{FromZeros, IntoBytes};

use crate::ddk::Sys;
use crate::intel_pt::PtRegs;
use crate::types::Result;

/// MTrace kind identifiers
pub const MTRACE_KIND_INSNTRACE: u32 = 2;

/// Instruction Trace actions
pub const MTRACE_INSNTRACE_ALLOC_TRACE: u32 = 0;
pub const MTRACE_INSNTRACE_FREE_TRACE: u32 = 1;
pub const MTRACE_INSNTRACE_STAGE_TRACE_DATA: u32 = 2;
pub const MTRACE_INSNTRACE_GET_TRACE_DATA: u32 = 3;
pub const MTRACE_INSNTRACE_START: u32 = 4;
pub const MTRACE_INSNTRACE_STOP: u32 = 5;

/// Instruction Trace modes
pub const IPT_MODE_CPUS: u32 = 0;
pub const IPT_MODE_THREADS: u32 = 1;

/// Maximum number of instruction traces
pub const IPT_MAX_NUM_TRACES: u32 = 256;

/// Instruction trace configuration
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::Immutable,
    zerocopy::KnownLayout,
)]
pub struct InsntraceConfig {
    /// Trace mode (IPT_MODE_CPUS or IPT_MODE_THREADS)
    pub mode: u32,
    /// Number of traces
    pub num_traces: u32,
}

/// Allocate kernel-side trace resources
pub fn alloc_trace(sys: &dyn Sys, config: &InsntraceConfig) -> Result {
    let mut payload = *config;
    sys.mtrace_control(
        MTRACE_KIND_INSNTRACE,
        MTRACE_INSNTRACE_ALLOC_TRACE,
        0,
        payload.as_mut_bytes(),
    )
}

/// Free kernel-side trace resources
pub fn free_trace(sys: &dyn Sys) -> Result {
    sys.mtrace_control(MTRACE_KIND_INSNTRACE, MTRACE_INSNTRACE_FREE_TRACE, 0, &mut [])
}

/// Stage a trace's register block for its next start
pub fn stage_trace_data(sys: &dyn Sys, descriptor: u32, regs: &PtRegs) -> Result {
    let mut payload = *regs;
    sys.mtrace_control(
        MTRACE_KIND_INSNTRACE,
        MTRACE_INSNTRACE_STAGE_TRACE_DATA,
        descriptor,
        payload.as_mut_bytes(),
    )
}

/// Retrieve a trace's register block after a stop
pub fn get_trace_data(sys: &dyn Sys, descriptor: u32) -> Result<PtRegs> {
    let mut regs = PtRegs::new_zeroed();
    sys.mtrace_control(
        MTRACE_KIND_INSNTRACE,
        MTRACE_INSNTRACE_GET_TRACE_DATA,
        descriptor,
        regs.as_mut_bytes(),
    )?;
    Ok(regs)
}

/// Begin tracing on every staged trace
pub fn start(sys: &dyn Sys) -> Result {
    sys.mtrace_control(MTRACE_KIND_INSNTRACE, MTRACE_INSNTRACE_START, 0, &mut [])
}

/// Stop tracing
pub fn stop(sys: &dyn Sys) -> Result {
    sys.mtrace_control(MTRACE_KIND_INSNTRACE, MTRACE_INSNTRACE_STOP, 0, &mut [])
}
