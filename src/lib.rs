// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! insntrace: Intel Processor Trace driver, user-space side
//!
//! The control plane for hardware instruction tracing: discovers what
//! the processor supports, shapes DMA memory into the ToPA tables the
//! trace unit consumes, arbitrates the trace lifecycle, and proxies
//! register staging to the privileged mtrace channel. The kernel-side
//! MSR programming and the tracing itself live behind that channel.
//!
//! # Design
//!
//! - **One device, one lock**: every operation holds the device mutex
//!   end to end, privileged calls included
//! - **Capabilities are frozen**: probed once per process, then read
//!   without locking
//! - **Hardware owns active buffers**: while tracing runs, trace
//!   memory is shared read-only with the trace unit and nothing may
//!   free or reshape it
//!
//! # Usage
//!
//! ```ignore
//! let device = InsntraceDevice::bind(*ipt_capabilities()?, sys, bti);
//! device.alloc_trace(IPT_MODE_CPUS, num_cpus)?;
//! let descriptor = device.alloc_buffer(&config)?;
//! device.start()?;
//! device.stop()?;
//! let info = device.get_buffer_info(descriptor)?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bits;
pub mod caps;
pub mod ddk;
pub mod device;
pub mod intel_pt;
pub mod ioctl;
pub mod mtrace;
pub mod topa;
pub mod types;

#[cfg(test)]
mod testutil;

#[cfg(target_arch = "x86_64")]
pub use caps::ipt_capabilities;
pub use caps::{Capabilities, CpuidLeaf, CpuidSource};
pub use ddk::{Bti, IoBuffer, IoBufferFlags, Rights, Sys};
pub use device::{InsntraceDevice, Owner, TraceMode};
pub use intel_pt::{BufferConfig, BufferInfo, PtRegs};
pub use mtrace::{InsntraceConfig, IPT_MODE_CPUS, IPT_MODE_THREADS};
pub use types::{Handle, PAddr, Result, Status};
