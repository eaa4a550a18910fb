// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The insntrace device
//!
//! Owns the per-trace slot table and arbitrates the trace lifecycle:
//! which operations are legal in which state, what gets staged to the
//! kernel at start, and what is read back at stop. One mutex covers
//! every operation end to end so preconditions cannot shift under a
//! privileged call.
//!
//! # Buffer lifecycle
//!
//! A slot moves Unallocated -> Allocated (alloc_buffer) -> Assigned
//! (start, cpu mode) -> Allocated (stop) -> Unallocated (free_buffer).
//! While the device is active the hardware owns the slot's memory;
//! nothing may free or reshape it until stop.

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;
use zerocopy::FromZeros;

use crate::caps::Capabilities;
use crate::ddk::{Bti, IoBuffer, Rights, Sys};
use crate::intel_pt::{
    ctl, status as pt_status, AddrRange, BufferConfig, BufferInfo, PtRegs,
    IPT_MAX_NUM_ADDR_RANGES,
};
use crate::mtrace::{self, InsntraceConfig, IPT_MAX_NUM_TRACES, IPT_MODE_CPUS, IPT_MODE_THREADS};
use crate::topa;
use crate::types::{
    Handle, Result, RX_ERR_ALREADY_BOUND, RX_ERR_BAD_STATE, RX_ERR_INVALID_ARGS,
    RX_ERR_NOT_SUPPORTED, RX_ERR_NO_RESOURCES,
};

/// Trace mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// One trace per cpu
    Cpus,
    /// One trace per thread
    Threads,
}

/// What a slot's buffer is assigned to, interpreted per trace mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Cpu(u32),
    Thread(Handle),
}

/// ============================================================================
/// Per-trace state
/// ============================================================================

/// One trace's buffers and saved register state
pub(crate) struct TraceSlot {
    /// The cpu or thread this buffer is assigned to
    #[allow(dead_code)] // Read back once thread-mode assignment lands
    pub(crate) owner: Option<Owner>,

    /// Number of chunks, each 2^chunk_order pages in size
    pub(crate) num_chunks: u32,
    /// Log2 size of each chunk, in pages
    pub(crate) chunk_order: u32,
    /// If true the buffer wraps, otherwise tracing stops when it fills
    pub(crate) is_circular: bool,
    pub(crate) allocated: bool,
    /// Buffer is assigned to a cpu/thread
    pub(crate) assigned: bool,
    /// Number of ToPA tables needed
    pub(crate) num_tables: u32,

    // Saved register state.
    pub(crate) ctl: u64,
    pub(crate) status: u64,
    pub(crate) output_base: u64,
    pub(crate) output_mask_ptrs: u64,
    pub(crate) cr3_match: u64,
    pub(crate) addr_ranges: [AddrRange; IPT_MAX_NUM_ADDR_RANGES],

    /// Trace chunks: the memory the hardware writes into
    pub(crate) chunks: Vec<Box<dyn IoBuffer>>,
    /// ToPA tables naming the chunks
    pub(crate) topas: Vec<Box<dyn IoBuffer>>,
}

impl TraceSlot {
    pub(crate) fn new() -> TraceSlot {
        TraceSlot {
            owner: None,
            num_chunks: 0,
            chunk_order: 0,
            is_circular: false,
            allocated: false,
            assigned: false,
            num_tables: 0,
            ctl: 0,
            status: 0,
            output_base: 0,
            output_mask_ptrs: 0,
            cr3_match: 0,
            addr_ranges: [AddrRange { a: 0, b: 0 }; IPT_MAX_NUM_ADDR_RANGES],
            chunks: Vec::new(),
            topas: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = TraceSlot::new();
    }

    /// The register block to stage for this slot
    fn regs(&self) -> PtRegs {
        PtRegs {
            ctl: self.ctl,
            status: self.status,
            output_base: self.output_base,
            output_mask_ptrs: self.output_mask_ptrs,
            cr3_match: self.cr3_match,
            addr_ranges: self.addr_ranges,
        }
    }

    /// Adopt a register block read back from the kernel
    fn set_regs(&mut self, regs: &PtRegs) {
        self.ctl = regs.ctl;
        self.status = regs.status;
        self.output_base = regs.output_base;
        self.output_mask_ptrs = regs.output_mask_ptrs;
        self.cr3_match = regs.cr3_match;
        self.addr_ranges = regs.addr_ranges;
    }
}

/// ============================================================================
/// Trace table
/// ============================================================================

/// The device's slot vector, one entry per trace
pub(crate) struct TraceTable {
    slots: Vec<TraceSlot>,
}

impl TraceTable {
    fn with_traces(num_traces: u32) -> TraceTable {
        let mut slots = Vec::with_capacity(num_traces as usize);
        for _ in 0..num_traces {
            slots.push(TraceSlot::new());
        }
        TraceTable { slots }
    }

    fn num_traces(&self) -> u32 {
        self.slots.len() as u32
    }

    /// First unallocated slot
    ///
    /// A linear scan keeps descriptor assignment deterministic, which
    /// aids debugging; the table is small.
    fn find_free(&self) -> Result<u32> {
        self.slots
            .iter()
            .position(|slot| !slot.allocated)
            .map(|idx| idx as u32)
            .ok_or(RX_ERR_NO_RESOURCES)
    }

    fn slot(&self, descriptor: u32) -> Result<&TraceSlot> {
        self.slots.get(descriptor as usize).ok_or(RX_ERR_INVALID_ARGS)
    }

    fn slot_mut(&mut self, descriptor: u32) -> Result<&mut TraceSlot> {
        self.slots.get_mut(descriptor as usize).ok_or(RX_ERR_INVALID_ARGS)
    }

    fn any_assigned(&self) -> bool {
        self.slots.iter().any(|slot| slot.assigned)
    }

    /// Release every slot's buffers
    ///
    /// Refused while any slot is still assigned.
    fn clear(&mut self) -> Result {
        // Don't make any changes until we know it's going to work.
        if self.any_assigned() {
            return Err(RX_ERR_BAD_STATE);
        }
        for slot in &mut self.slots {
            if slot.allocated {
                topa::free_buffers(slot);
            }
        }
        Ok(())
    }

    fn slots(&self) -> &[TraceSlot] {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut [TraceSlot] {
        &mut self.slots
    }
}

/// ============================================================================
/// Control-bit validation
/// ============================================================================

/// The ctl bits a caller may request on this processor
pub(crate) fn settable_ctl_mask(caps: &Capabilities) -> u64 {
    let mut mask =
        ctl::OS_ALLOWED | ctl::USER_ALLOWED | ctl::TSC_EN | ctl::DIS_RETC | ctl::BRANCH_EN;
    if caps.ptwrite {
        mask |= ctl::PTW_EN | ctl::FUP_ON_PTW;
    }
    if caps.cr3_filtering {
        mask |= ctl::CR3_FILTER;
    }
    if caps.mtc {
        mask |= ctl::MTC_EN | ctl::MTC_FREQ_MASK;
    }
    if caps.power_events {
        mask |= ctl::POWER_EVENT_EN;
    }
    if caps.ip_filtering {
        if caps.num_addr_ranges >= 1 {
            mask |= ctl::ADDR0_MASK;
        }
        if caps.num_addr_ranges >= 2 {
            mask |= ctl::ADDR1_MASK;
        }
        if caps.num_addr_ranges >= 3 {
            mask |= ctl::ADDR2_MASK;
        }
        if caps.num_addr_ranges >= 4 {
            mask |= ctl::ADDR3_MASK;
        }
    }
    if caps.psb {
        mask |= ctl::CYC_EN | ctl::PSB_FREQ_MASK | ctl::CYC_THRESH_MASK;
    }
    mask
}

/// Validate a requested ctl value against hardware support
pub(crate) fn validate_ctl(caps: &Capabilities, requested: u64) -> Result {
    let settable = settable_ctl_mask(caps);
    if requested & !settable != 0 {
        log::error!("bad ctl, requested {:#x}, valid {:#x}", requested, settable);
        return Err(RX_ERR_INVALID_ARGS);
    }

    let mtc_freq = ((requested & ctl::MTC_FREQ_MASK) >> ctl::MTC_FREQ_SHIFT) as u32;
    if mtc_freq != 0 && (1u32 << mtc_freq) & caps.mtc_freq_mask == 0 {
        log::error!(
            "bad mtc_freq value, requested {:#x}, valid mask {:#x}",
            mtc_freq,
            caps.mtc_freq_mask
        );
        return Err(RX_ERR_INVALID_ARGS);
    }
    let cyc_thresh = ((requested & ctl::CYC_THRESH_MASK) >> ctl::CYC_THRESH_SHIFT) as u32;
    if cyc_thresh != 0 && (1u32 << cyc_thresh) & caps.cyc_thresh_mask == 0 {
        log::error!(
            "bad cyc_thresh value, requested {:#x}, valid mask {:#x}",
            cyc_thresh,
            caps.cyc_thresh_mask
        );
        return Err(RX_ERR_INVALID_ARGS);
    }
    let psb_freq = ((requested & ctl::PSB_FREQ_MASK) >> ctl::PSB_FREQ_SHIFT) as u32;
    if psb_freq != 0 && (1u32 << psb_freq) & caps.psb_freq_mask == 0 {
        log::error!(
            "bad psb_freq value, requested {:#x}, valid mask {:#x}",
            psb_freq,
            caps.psb_freq_mask
        );
        return Err(RX_ERR_INVALID_ARGS);
    }

    Ok(())
}

/// ============================================================================
/// Device
/// ============================================================================

struct DeviceState {
    /// Only one open of this device is supported at a time
    opened: bool,
    mode: Option<TraceMode>,
    traces: Option<TraceTable>,
    /// Once tracing has started various things are not allowed until
    /// it stops
    active: bool,
    /// Teardown left kernel state in an unknown shape; every further
    /// operation is refused
    unusable: bool,
}

/// The insntrace device
///
/// One instance per device binding. All operations serialize on one
/// internal mutex held across any privileged call they make.
pub struct InsntraceDevice {
    caps: Capabilities,
    sys: Box<dyn Sys>,
    bti: Box<dyn Bti>,
    state: Mutex<DeviceState>,
}

impl InsntraceDevice {
    /// Create the device at bind time
    pub fn bind(caps: Capabilities, sys: Box<dyn Sys>, bti: Box<dyn Bti>) -> InsntraceDevice {
        InsntraceDevice {
            caps,
            sys,
            bti,
            state: Mutex::new(DeviceState {
                opened: false,
                mode: None,
                traces: None,
                active: false,
                unusable: false,
            }),
        }
    }

    pub fn open(&self) -> Result {
        let mut state = self.state.lock();
        if state.opened {
            return Err(RX_ERR_ALREADY_BOUND);
        }
        state.opened = true;
        Ok(())
    }

    pub fn close(&self) {
        self.state.lock().opened = false;
    }

    /// Allocate the trace vector and kernel-side trace resources
    pub fn alloc_trace(&self, mode: u32, num_traces: u32) -> Result {
        let mut state = self.state.lock();
        ready(&state)?;
        if !self.caps.supported {
            return Err(RX_ERR_NOT_SUPPORTED);
        }
        // Only ToPA output is supported, and there are no current plans
        // to support anything else.
        if !self.caps.output_topa {
            return Err(RX_ERR_NOT_SUPPORTED);
        }
        if state.traces.is_some() {
            return Err(RX_ERR_BAD_STATE);
        }

        // Thread tracing is still work-in-progress.
        if mode == IPT_MODE_THREADS {
            return Err(RX_ERR_NOT_SUPPORTED);
        }

        let internal_mode = match mode {
            IPT_MODE_CPUS => TraceMode::Cpus,
            IPT_MODE_THREADS => TraceMode::Threads,
            _ => return Err(RX_ERR_INVALID_ARGS),
        };

        if num_traces > IPT_MAX_NUM_TRACES {
            return Err(RX_ERR_INVALID_ARGS);
        }
        if internal_mode == TraceMode::Cpus && num_traces != self.sys.num_cpus() {
            return Err(RX_ERR_INVALID_ARGS);
        }

        let table = TraceTable::with_traces(num_traces);
        let config = InsntraceConfig { mode, num_traces };
        mtrace::alloc_trace(self.sys.as_ref(), &config)?;

        state.mode = Some(internal_mode);
        state.traces = Some(table);
        Ok(())
    }

    /// Free all trace buffers and kernel-side trace resources
    pub fn free_trace(&self) -> Result {
        let mut state = self.state.lock();
        ready(&state)?;
        self.free_trace_locked(&mut state)
    }

    fn free_trace_locked(&self, state: &mut DeviceState) -> Result {
        if state.traces.is_none() {
            return Err(RX_ERR_BAD_STATE);
        }
        if state.active {
            return Err(RX_ERR_BAD_STATE);
        }
        let Some(table) = state.traces.as_mut() else {
            return Err(RX_ERR_BAD_STATE);
        };
        table.clear()?;

        if let Err(err) = mtrace::free_trace(self.sys.as_ref()) {
            // The kernel still thinks the trace exists; refuse further
            // use rather than retry.
            log::error!("free_trace: trace-control free failed: {}", err);
            state.unusable = true;
        }

        state.traces = None;
        state.mode = None;
        Ok(())
    }

    /// Current trace mode and vector size
    pub fn get_trace_config(&self) -> Result<InsntraceConfig> {
        let state = self.state.lock();
        ready(&state)?;
        let table = state.traces.as_ref().ok_or(RX_ERR_BAD_STATE)?;
        let mode = match state.mode {
            Some(TraceMode::Cpus) => IPT_MODE_CPUS,
            Some(TraceMode::Threads) => IPT_MODE_THREADS,
            None => return Err(RX_ERR_BAD_STATE),
        };
        Ok(InsntraceConfig {
            mode,
            num_traces: table.num_traces(),
        })
    }

    /// Allocate one trace buffer, returning its descriptor
    pub fn alloc_buffer(&self, config: &BufferConfig) -> Result<u32> {
        let mut guard = self.state.lock();
        ready(&guard)?;
        let state = &mut *guard;
        let table = state.traces.as_mut().ok_or(RX_ERR_BAD_STATE)?;

        log::debug!(
            "alloc_buffer: num_chunks {}, chunk_order {}",
            config.num_chunks,
            config.chunk_order
        );

        topa::validate_buffer_shape(config.num_chunks, config.chunk_order)?;
        validate_ctl(&self.caps, config.ctl)?;

        let descriptor = table.find_free()?;
        let slot = table.slot_mut(descriptor)?;
        slot.reset();
        if let Err(err) = topa::allocate_buffers(
            slot,
            self.bti.as_ref(),
            &self.caps,
            config.num_chunks,
            config.chunk_order,
            config.circular(),
        ) {
            topa::free_buffers(slot);
            return Err(err);
        }

        slot.ctl = config.ctl;
        slot.status = 0;
        slot.output_base = slot.topas[0].phys();
        slot.output_mask_ptrs = 0;
        slot.cr3_match = config.cr3_match;
        slot.addr_ranges = config.addr_ranges;
        slot.allocated = true;
        Ok(descriptor)
    }

    /// Assign a buffer to a thread (thread tracing is work-in-progress)
    pub fn assign_thread_buffer(&self, _descriptor: u32, thread: Handle) -> Result {
        let state = self.state.lock();
        ready(&state)?;
        state.traces.as_ref().ok_or(RX_ERR_BAD_STATE)?;
        // The handle is ours either way; don't leak it.
        self.sys.handle_close(thread);
        Err(RX_ERR_NOT_SUPPORTED)
    }

    /// Release a thread's buffer (thread tracing is work-in-progress)
    pub fn release_thread_buffer(&self, _descriptor: u32, thread: Handle) -> Result {
        let state = self.state.lock();
        ready(&state)?;
        state.traces.as_ref().ok_or(RX_ERR_BAD_STATE)?;
        self.sys.handle_close(thread);
        Err(RX_ERR_NOT_SUPPORTED)
    }

    /// Read back a buffer's configuration
    pub fn get_buffer_config(&self, descriptor: u32) -> Result<BufferConfig> {
        let state = self.state.lock();
        ready(&state)?;
        let table = state.traces.as_ref().ok_or(RX_ERR_BAD_STATE)?;
        let slot = table.slot(descriptor)?;
        if !slot.allocated {
            return Err(RX_ERR_INVALID_ARGS);
        }
        Ok(BufferConfig {
            num_chunks: slot.num_chunks,
            chunk_order: slot.chunk_order,
            is_circular: slot.is_circular as u8,
            padding: [0; 7],
            ctl: slot.ctl,
            cr3_match: slot.cr3_match,
            addr_ranges: slot.addr_ranges,
        })
    }

    /// Where the last capture ended
    pub fn get_buffer_info(&self, descriptor: u32) -> Result<BufferInfo> {
        let state = self.state.lock();
        ready(&state)?;
        let table = state.traces.as_ref().ok_or(RX_ERR_BAD_STATE)?;
        // In thread-mode buffer info is needed while tracing is active.
        if state.mode == Some(TraceMode::Cpus) && state.active {
            return Err(RX_ERR_BAD_STATE);
        }
        let slot = table.slot(descriptor)?;
        if !slot.allocated {
            return Err(RX_ERR_INVALID_ARGS);
        }
        // For a circular buffer this is just where tracing stopped.
        Ok(BufferInfo {
            capture_end: topa::compute_capture_size(slot) as u64,
        })
    }

    /// Duplicate a chunk's VMO handle, read-only rights
    pub fn get_chunk_handle(&self, descriptor: u32, chunk_num: u32) -> Result<Handle> {
        let state = self.state.lock();
        ready(&state)?;
        let table = state.traces.as_ref().ok_or(RX_ERR_BAD_STATE)?;
        let slot = table.slot(descriptor)?;
        if !slot.allocated {
            return Err(RX_ERR_INVALID_ARGS);
        }
        if chunk_num >= slot.num_chunks {
            return Err(RX_ERR_INVALID_ARGS);
        }

        let vmo = slot.chunks[chunk_num as usize].vmo();
        let rights = match self.sys.handle_basic_rights(vmo) {
            Ok(rights) => rights,
            Err(err) => {
                // This could only fail if the vmo handle is invalid.
                log::warn!(
                    "get_chunk_handle: unexpected error reading vmo handle rights: {}",
                    err
                );
                return Err(err);
            }
        };
        let allowed = Rights::TRANSFER
            | Rights::WAIT
            | Rights::INSPECT
            | Rights::GET_PROPERTY
            | Rights::READ
            | Rights::MAP;
        self.sys.handle_duplicate(vmo, rights & allowed)
    }

    /// Free one trace buffer
    pub fn free_buffer(&self, descriptor: u32) -> Result {
        let mut guard = self.state.lock();
        ready(&guard)?;
        let state = &mut *guard;
        if state.traces.is_none() {
            return Err(RX_ERR_BAD_STATE);
        }
        if state.active {
            return Err(RX_ERR_BAD_STATE);
        }
        let Some(table) = state.traces.as_mut() else {
            return Err(RX_ERR_BAD_STATE);
        };
        let slot = table.slot_mut(descriptor)?;
        if !slot.allocated {
            return Err(RX_ERR_INVALID_ARGS);
        }
        if slot.assigned {
            return Err(RX_ERR_BAD_STATE);
        }
        topa::free_buffers(slot);
        Ok(())
    }

    /// Begin tracing
    pub fn start(&self) -> Result {
        let mut guard = self.state.lock();
        ready(&guard)?;
        let state = &mut *guard;
        let table = state.traces.as_mut().ok_or(RX_ERR_BAD_STATE)?;
        if state.active {
            return Err(RX_ERR_BAD_STATE);
        }
        if state.mode != Some(TraceMode::Cpus) {
            return Err(RX_ERR_BAD_STATE);
        }

        // Until tracing particular cpus is supported, buffers are
        // auto-assigned to each cpu. First verify a buffer has been
        // allocated for every cpu and none is assigned yet.
        for slot in table.slots() {
            if !slot.allocated {
                return Err(RX_ERR_BAD_STATE);
            }
            if slot.assigned {
                return Err(RX_ERR_BAD_STATE);
            }
        }

        let mut staged = 0;
        let mut stage_err = None;
        for (cpu, slot) in table.slots_mut().iter_mut().enumerate() {
            let cpu = cpu as u32;
            let mut regs = slot.regs();
            regs.ctl |= ctl::TOPA | ctl::TRACE_EN;
            if let Err(err) = mtrace::stage_trace_data(self.sys.as_ref(), cpu, &regs) {
                stage_err = Some(err);
                break;
            }
            slot.owner = Some(Owner::Cpu(cpu));
            slot.assigned = true;
            staged += 1;
        }

        if stage_err.is_none() {
            match mtrace::start(self.sys.as_ref()) {
                Ok(()) => {
                    state.active = true;
                    return Ok(());
                }
                Err(err) => stage_err = Some(err),
            }
        }

        // Unstage whatever was staged so nothing is left armed in the
        // kernel.
        let mut sealed = false;
        for cpu in 0..staged {
            let slot = &mut table.slots_mut()[cpu as usize];
            if mtrace::stage_trace_data(self.sys.as_ref(), cpu, &PtRegs::new_zeroed()).is_err() {
                sealed = true;
            }
            slot.owner = None;
            slot.assigned = false;
        }
        if sealed {
            log::error!("start: failed to unstage after error, sealing device");
            state.unusable = true;
        }
        Err(stage_err.unwrap_or(RX_ERR_BAD_STATE))
    }

    /// Stop tracing
    ///
    /// In cpu-mode also reads each trace's final register state back
    /// into its slot and releases the assignment.
    pub fn stop(&self) -> Result {
        let mut guard = self.state.lock();
        ready(&guard)?;
        let state = &mut *guard;
        self.stop_locked(state)
    }

    fn stop_locked(&self, state: &mut DeviceState) -> Result {
        let table = state.traces.as_mut().ok_or(RX_ERR_BAD_STATE)?;
        if !state.active {
            return Err(RX_ERR_BAD_STATE);
        }

        mtrace::stop(self.sys.as_ref())?;
        state.active = false;

        if state.mode == Some(TraceMode::Cpus) {
            for (cpu, slot) in table.slots_mut().iter_mut().enumerate() {
                let cpu = cpu as u32;
                let regs = mtrace::get_trace_data(self.sys.as_ref(), cpu)?;
                slot.set_regs(&regs);
                slot.assigned = false;
                slot.owner = None;
                // If there was an operational error, report it.
                if slot.status & pt_status::ERROR != 0 {
                    log::warn!("stop: operational error detected on cpu {}", cpu);
                }
            }
        }

        Ok(())
    }

    /// Device teardown
    ///
    /// Best-effort: tracing is stopped and everything freed even when
    /// subordinate calls fail; a failure seals the device but never
    /// keeps memory alive.
    pub fn release(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.active {
            if let Err(err) = self.stop_locked(state) {
                log::error!("release: stop failed: {}", err);
                state.unusable = true;
                state.active = false;
            }
        }

        if let Some(table) = state.traces.as_mut() {
            for slot in table.slots_mut() {
                slot.assigned = false;
                slot.owner = None;
            }
        }

        if state.traces.is_some() {
            if let Err(err) = self.free_trace_locked(state) {
                log::error!("release: free trace failed: {}", err);
                state.unusable = true;
            }
        }

        // Dropping the table releases any remaining buffers.
        state.traces = None;
        state.mode = None;
        state.opened = false;
    }

    /// Observable device state, for tests
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<u64> {
        let state = self.state.lock();
        let mut fields = Vec::new();
        fields.push(state.opened as u64);
        fields.push(state.active as u64);
        fields.push(state.unusable as u64);
        fields.push(match state.mode {
            None => 0,
            Some(TraceMode::Cpus) => 1,
            Some(TraceMode::Threads) => 2,
        });
        if let Some(table) = &state.traces {
            fields.push(table.num_traces() as u64);
            for slot in table.slots() {
                fields.push(match slot.owner {
                    None => 0,
                    Some(Owner::Cpu(cpu)) => 1 | ((cpu as u64) << 32),
                    Some(Owner::Thread(thread)) => 2 | ((thread as u64) << 32),
                });
                fields.push(slot.allocated as u64);
                fields.push(slot.assigned as u64);
                fields.push(slot.num_chunks as u64);
                fields.push(slot.num_tables as u64);
                fields.push(slot.chunk_order as u64);
                fields.push(slot.ctl);
                fields.push(slot.status);
                fields.push(slot.output_base);
                fields.push(slot.output_mask_ptrs);
                fields.push(slot.cr3_match);
            }
        }
        fields
    }
}

fn ready(state: &DeviceState) -> Result {
    if state.unusable {
        return Err(RX_ERR_BAD_STATE);
    }
    Ok(())
}
