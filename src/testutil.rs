// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Test doubles for the driver host seams
//!
//! Fake CPUID, a fake BTI handing out real heap memory with pretend
//! physical addresses, and a fake syscall surface that records mtrace
//! traffic and can inject failures per action.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use alloc::sync::Arc;
use spin::Mutex;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::caps::{Capabilities, CpuidLeaf, CpuidSource};
use crate::ddk::{Bti, IoBuffer, IoBufferFlags, Rights, Sys};
use crate::intel_pt::{PtRegs, PAGE_SIZE_SHIFT};
use crate::mtrace::{MTRACE_INSNTRACE_GET_TRACE_DATA, MTRACE_INSNTRACE_STAGE_TRACE_DATA};
use crate::types::{Handle, PAddr, Result, RX_ERR_INVALID_ARGS, RX_ERR_IO, RX_ERR_NO_MEMORY};

/// ============================================================================
/// CPUID
/// ============================================================================

pub(crate) struct FakeCpuid {
    leaves: BTreeMap<(u32, u32), CpuidLeaf>,
}

impl CpuidSource for FakeCpuid {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidLeaf {
        self.leaves
            .get(&(leaf, subleaf))
            .copied()
            .unwrap_or_default()
    }
}

impl FakeCpuid {
    /// A processor advertising every Intel PT feature the driver knows
    pub(crate) fn full_support() -> FakeCpuid {
        let mut cpuid = FakeCpuid {
            leaves: BTreeMap::new(),
        };
        cpuid.set(0, 0, CpuidLeaf { eax: 0x15, ..CpuidLeaf::default() });
        // Family 6, model 0x5e, stepping 3.
        cpuid.set(
            0x01,
            0,
            CpuidLeaf {
                eax: (5 << 16) | (6 << 8) | (0xe << 4) | 3,
                ..CpuidLeaf::default()
            },
        );
        cpuid.set(0x07, 0, CpuidLeaf { ebx: 1 << 25, ..CpuidLeaf::default() });
        cpuid.set(
            0x14,
            0,
            CpuidLeaf {
                eax: 1,
                ebx: 0x3f,
                ecx: 0x8000_000f,
                ..CpuidLeaf::default()
            },
        );
        cpuid.set(
            0x14,
            1,
            CpuidLeaf {
                eax: (0x249f << 16) | 2,
                ebx: (0x003f << 16) | 0x003f,
                ..CpuidLeaf::default()
            },
        );
        cpuid.set(0x15, 0, CpuidLeaf { eax: 2, ebx: 216, ..CpuidLeaf::default() });
        cpuid
    }

    /// A processor that predates the Intel PT CPUID leaf
    pub(crate) fn without_pt_leaf() -> FakeCpuid {
        let mut cpuid = FakeCpuid {
            leaves: BTreeMap::new(),
        };
        cpuid.set(0, 0, CpuidLeaf { eax: 0x13, ..CpuidLeaf::default() });
        cpuid
    }

    pub(crate) fn set(&mut self, leaf: u32, subleaf: u32, value: CpuidLeaf) {
        self.leaves.insert((leaf, subleaf), value);
    }
}

/// Capabilities as probed from the fully-featured fake processor
pub(crate) fn caps_full() -> Capabilities {
    Capabilities::probe(&FakeCpuid::full_support()).unwrap()
}

/// ============================================================================
/// DMA memory
/// ============================================================================

struct FakeIoBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    phys: PAddr,
    vmo: Handle,
    live: Arc<AtomicUsize>,
}

// The buffer owns its allocation exclusively.
unsafe impl Send for FakeIoBuffer {}

impl IoBuffer for FakeIoBuffer {
    fn virt(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn phys(&self) -> PAddr {
        self.phys
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn vmo(&self) -> Handle {
        self.vmo
    }
}

impl Drop for FakeIoBuffer {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fake BTI backed by the heap
///
/// Allocations are aligned as requested and their virtual address
/// doubles as the "physical" address, so natural alignment holds the
/// way a real contiguous allocator provides it.
#[derive(Clone)]
pub(crate) struct FakeBti {
    inner: Arc<FakeBtiInner>,
}

struct FakeBtiInner {
    live: Arc<AtomicUsize>,
    remaining: AtomicUsize,
    misalign: AtomicBool,
    next_vmo: AtomicU32,
}

impl FakeBti {
    pub(crate) fn new() -> FakeBti {
        FakeBti {
            inner: Arc::new(FakeBtiInner {
                live: Arc::new(AtomicUsize::new(0)),
                remaining: AtomicUsize::new(usize::MAX),
                misalign: AtomicBool::new(false),
                next_vmo: AtomicU32::new(0x100),
            }),
        }
    }

    /// Let the next `n` allocations succeed, then refuse
    pub(crate) fn fail_after(&self, n: usize) {
        self.inner.remaining.store(n, Ordering::Relaxed);
    }

    /// Report physical addresses that violate natural alignment
    pub(crate) fn misalign_phys(&self) {
        self.inner.misalign.store(true, Ordering::Relaxed);
    }

    /// Buffers currently allocated and not yet dropped
    pub(crate) fn live_buffers(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }
}

impl Bti for FakeBti {
    fn io_buffer_allocate(
        &self,
        size: usize,
        alignment_log2: u32,
        _flags: IoBufferFlags,
    ) -> Result<Box<dyn IoBuffer>> {
        let inner = &self.inner;

        let remaining = inner.remaining.load(Ordering::Relaxed);
        if remaining == 0 {
            return Err(RX_ERR_NO_MEMORY);
        }
        if remaining != usize::MAX {
            inner.remaining.store(remaining - 1, Ordering::Relaxed);
        }

        let align_log2 = if alignment_log2 == 0 {
            PAGE_SIZE_SHIFT
        } else {
            alignment_log2
        };
        let layout =
            Layout::from_size_align(size, 1 << align_log2).map_err(|_| RX_ERR_INVALID_ARGS)?;
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(RX_ERR_NO_MEMORY);
        };

        let mut phys = ptr.as_ptr() as PAddr;
        if inner.misalign.load(Ordering::Relaxed) {
            phys |= 1 << (align_log2 - 1);
        }

        inner.live.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(FakeIoBuffer {
            ptr,
            layout,
            phys,
            vmo: inner.next_vmo.fetch_add(1, Ordering::Relaxed),
            live: inner.live.clone(),
        }))
    }
}

/// ============================================================================
/// Syscall surface
/// ============================================================================

/// One recorded mtrace_control invocation
#[derive(Debug, Clone)]
pub(crate) struct MtraceCall {
    pub(crate) kind: u32,
    pub(crate) action: u32,
    pub(crate) options: u32,
    pub(crate) payload: Vec<u8>,
}

#[derive(Clone)]
pub(crate) struct FakeSys {
    inner: Arc<FakeSysInner>,
}

struct FakeSysInner {
    num_cpus: u32,
    calls: Mutex<Vec<MtraceCall>>,
    staged: Mutex<BTreeMap<u32, PtRegs>>,
    overrides: Mutex<BTreeMap<u32, PtRegs>>,
    capture_pos: Mutex<BTreeMap<u32, (u32, u32)>>,
    fail: Mutex<BTreeMap<u32, Vec<usize>>>,
    action_counts: Mutex<BTreeMap<u32, usize>>,
    duplicates: Mutex<Vec<(Handle, Rights)>>,
    closed: Mutex<Vec<Handle>>,
}

impl FakeSys {
    pub(crate) fn new(num_cpus: u32) -> FakeSys {
        FakeSys {
            inner: Arc::new(FakeSysInner {
                num_cpus,
                calls: Mutex::new(Vec::new()),
                staged: Mutex::new(BTreeMap::new()),
                overrides: Mutex::new(BTreeMap::new()),
                capture_pos: Mutex::new(BTreeMap::new()),
                fail: Mutex::new(BTreeMap::new()),
                action_counts: Mutex::new(BTreeMap::new()),
                duplicates: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fail the given per-action call indices with an I/O error
    pub(crate) fn fail_calls(&self, action: u32, indices: &[usize]) {
        self.inner.fail.lock().insert(action, indices.to_vec());
    }

    /// Fix the register block returned for a descriptor
    pub(crate) fn set_trace_data(&self, descriptor: u32, regs: PtRegs) {
        self.inner.overrides.lock().insert(descriptor, regs);
    }

    /// Report a capture position (entry index, byte offset) for a
    /// descriptor, keeping the rest of its staged registers
    pub(crate) fn set_capture_position(&self, descriptor: u32, entry: u32, offset: u32) {
        self.inner
            .capture_pos
            .lock()
            .insert(descriptor, (entry, offset));
    }

    pub(crate) fn calls(&self) -> Vec<MtraceCall> {
        self.inner.calls.lock().clone()
    }

    /// Register blocks most recently staged, by descriptor
    pub(crate) fn staged_regs(&self) -> BTreeMap<u32, PtRegs> {
        self.inner.staged.lock().clone()
    }

    pub(crate) fn last_duplicate(&self) -> Option<(Handle, Rights)> {
        self.inner.duplicates.lock().last().copied()
    }

    pub(crate) fn closed_handles(&self) -> Vec<Handle> {
        self.inner.closed.lock().clone()
    }
}

impl Sys for FakeSys {
    fn num_cpus(&self) -> u32 {
        self.inner.num_cpus
    }

    fn mtrace_control(&self, kind: u32, action: u32, options: u32, payload: &mut [u8]) -> Result {
        self.inner.calls.lock().push(MtraceCall {
            kind,
            action,
            options,
            payload: payload.to_vec(),
        });

        let index = {
            let mut counts = self.inner.action_counts.lock();
            let count = counts.entry(action).or_insert(0);
            let index = *count;
            *count += 1;
            index
        };
        if let Some(indices) = self.inner.fail.lock().get(&action) {
            if indices.contains(&index) {
                return Err(RX_ERR_IO);
            }
        }

        match action {
            MTRACE_INSNTRACE_STAGE_TRACE_DATA => {
                let regs =
                    PtRegs::read_from_bytes(payload).map_err(|_| RX_ERR_INVALID_ARGS)?;
                self.inner.staged.lock().insert(options, regs);
            }
            MTRACE_INSNTRACE_GET_TRACE_DATA => {
                if payload.len() != core::mem::size_of::<PtRegs>() {
                    return Err(RX_ERR_INVALID_ARGS);
                }
                let mut regs = self
                    .inner
                    .overrides
                    .lock()
                    .get(&options)
                    .copied()
                    .or_else(|| self.inner.staged.lock().get(&options).copied())
                    .unwrap_or_else(PtRegs::new_zeroed);
                if let Some(&(entry, offset)) = self.inner.capture_pos.lock().get(&options) {
                    regs.output_mask_ptrs = ((offset as u64) << 32) | ((entry as u64) << 7);
                }
                payload.copy_from_slice(regs.as_bytes());
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_basic_rights(&self, _handle: Handle) -> Result<Rights> {
        Ok(Rights::READ | Rights::WRITE | Rights::MAP | Rights::TRANSFER | Rights::DUPLICATE)
    }

    fn handle_duplicate(&self, handle: Handle, rights: Rights) -> Result<Handle> {
        self.inner.duplicates.lock().push((handle, rights));
        Ok(handle | 0x8000_0000)
    }

    fn handle_close(&self, handle: Handle) {
        self.inner.closed.lock().push(handle);
    }
}
