// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Driver host seams
//!
//! Everything the driver needs from its environment: contiguous DMA
//! memory through a Bus Transaction Initiator, the privileged mtrace
//! control channel, the CPU count, and handle duplication with rights
//! reduction. The device host supplies implementations at bind time;
//! tests supply fakes.
//!
//! # Design
//!
//! - **IoBuffer**: one pinned, physically contiguous allocation with a
//!   kernel-visible VMO behind it; dropping it releases the memory
//! - **Bti**: the allocator handle the buffers are pinned through
//! - **Sys**: the thin syscall surface (mtrace, handles, topology)

use alloc::boxed::Box;

use crate::types::{Handle, PAddr, Result};

bitflags::bitflags! {
    /// io-buffer allocation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IoBufferFlags: u32 {
        /// CPU-readable mapping
        const READ = 0x01;
        /// CPU-writable mapping
        const WRITE = 0x02;
        /// Physically contiguous pages
        const CONTIG = 0x10;
    }
}

/// One DMA-suitable memory object
///
/// Carries both the CPU mapping and the physical address the hardware
/// uses. The underlying memory stays pinned for the buffer's lifetime.
pub trait IoBuffer: Send {
    /// CPU virtual address of the mapping
    fn virt(&self) -> *mut u8;

    /// Physical address of the first byte
    fn phys(&self) -> PAddr;

    /// Size of the allocation, in bytes
    fn size(&self) -> usize;

    /// Borrowed handle to the backing VMO
    fn vmo(&self) -> Handle;
}

/// Bus Transaction Initiator
///
/// The device's DMA allocator handle, owned from bind to release.
pub trait Bti: Send {
    /// Allocate a pinned buffer of `size` bytes aligned to
    /// `2^alignment_log2`
    ///
    /// An `alignment_log2` of 0 requests the default page alignment.
    fn io_buffer_allocate(
        &self,
        size: usize,
        alignment_log2: u32,
        flags: IoBufferFlags,
    ) -> Result<Box<dyn IoBuffer>>;
}

/// ============================================================================
/// Handle Rights
/// ============================================================================

/// Handle rights bitmask
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rights(pub u32);

impl Rights {
    /// No rights
    pub const NONE: Self = Self(0x00);

    /// Read state
    pub const READ: Self = Self(0x01);

    /// Modify state
    pub const WRITE: Self = Self(0x02);

    /// Map into an address space
    pub const MAP: Self = Self(0x10);

    /// Duplicate handle
    pub const DUPLICATE: Self = Self(0x20);

    /// Transfer to another process
    pub const TRANSFER: Self = Self(0x40);

    /// Wait on signals
    pub const WAIT: Self = Self(0x100);

    /// Inspect object state
    pub const INSPECT: Self = Self(0x200);

    /// Read object properties
    pub const GET_PROPERTY: Self = Self(0x400);

    /// Create a rights mask from raw value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get raw value
    pub const fn into_raw(self) -> u32 {
        self.0
    }

    /// Check if this rights mask contains the specified rights
    pub const fn contains(self, rights: Self) -> bool {
        (self.0 & rights.0) == rights.0
    }
}

impl core::ops::BitOr for Rights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for Rights {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

/// ============================================================================
/// System services
/// ============================================================================

/// Syscall surface the driver proxies through
pub trait Sys: Send {
    /// Number of CPUs online
    fn num_cpus(&self) -> u32;

    /// Privileged trace control
    ///
    /// Forwards (kind, action, options, payload) to the kernel. The
    /// payload is a fixed-layout block the kernel reads or fills
    /// depending on the action; empty for actions that carry none.
    fn mtrace_control(&self, kind: u32, action: u32, options: u32, payload: &mut [u8]) -> Result;

    /// Rights currently held by `handle`
    fn handle_basic_rights(&self, handle: Handle) -> Result<Rights>;

    /// Duplicate `handle` with the given rights mask
    fn handle_duplicate(&self, handle: Handle, rights: Rights) -> Result<Handle>;

    /// Close a handle received over the operation surface
    fn handle_close(&self, handle: Handle);
}
