// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! ToPA construction
//!
//! Builds the Table-of-Physical-Addresses rings the hardware streams
//! trace output through: allocates naturally-aligned contiguous
//! chunks, packs their entries into linked tables, and marks END and
//! STOP positions. Also walks a stopped trace's tables to compute how
//! much was captured.
//!
//! A circular collection of tables is always set up; the STOP bit on
//! the last data entry is what makes a buffer non-circular.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::caps::Capabilities;
use crate::ddk::{Bti, IoBuffer, IoBufferFlags};
use crate::device::TraceSlot;
use crate::intel_pt::{
    output_mask_entry_offset, output_mask_table_entry, topa_entry, PAGE_SIZE, PAGE_SIZE_SHIFT,
    TOPA_MAX_SHIFT, TOPA_MAX_TABLE_ENTRIES, TOPA_MIN_SHIFT,
};
use crate::types::{
    Result, RX_ERR_INTERNAL, RX_ERR_INVALID_ARGS, RX_ERR_NOT_SUPPORTED, RX_ERR_NO_MEMORY,
};

/// Maximum space, in bytes, for trace buffers (per trace)
///
/// This isn't necessarily MAX_NUM_CHUNKS * 2^(MAX_CHUNK_ORDER +
/// PAGE_SIZE_SHIFT). Chunks have to be naturally aligned contiguous
/// pages, but we can have a lot of them.
pub const MAX_PER_TRACE_SPACE: usize = 256 * 1024 * 1024;

/// Maximum number of chunks per trace
pub const MAX_NUM_CHUNKS: u32 = 4096;

/// Maximum size of each chunk, in log2 pages (1MB)
pub const MAX_CHUNK_ORDER: u32 = 8;

/// Times the capture walker exhausted the tables without finding the
/// hardware's stop position, indicating a corrupt register snapshot
pub static CAPTURE_WALK_MISSES: AtomicU64 = AtomicU64::new(0);

/// Check a requested buffer shape against the driver limits
pub(crate) fn validate_buffer_shape(num_chunks: u32, chunk_order: u32) -> Result {
    if num_chunks == 0 || num_chunks > MAX_NUM_CHUNKS {
        return Err(RX_ERR_INVALID_ARGS);
    }
    if chunk_order > MAX_CHUNK_ORDER {
        return Err(RX_ERR_INVALID_ARGS);
    }
    let total_per_trace = (num_chunks as u64) << (chunk_order + PAGE_SIZE_SHIFT);
    if total_per_trace > MAX_PER_TRACE_SPACE as u64 {
        return Err(RX_ERR_INVALID_ARGS);
    }
    Ok(())
}

/// Number of ToPA entries needed for `num_chunks` chunks
///
/// The count includes the END entries across all needed tables: each
/// table holds TOPA_MAX_TABLE_ENTRIES - 1 data entries plus its END.
pub(crate) fn compute_topa_entry_count(num_chunks: u32) -> u32 {
    let table_entries = TOPA_MAX_TABLE_ENTRIES as u32;
    let num_end_entries = (num_chunks + table_entries - 2) / (table_entries - 1);
    let total = num_chunks + num_end_entries;
    log::debug!(
        "compute_topa_entry_count: num_chunks {}, num_end_entries {}, total {}",
        num_chunks,
        num_end_entries,
        total
    );
    total
}

/// Number of tables needed to hold `entry_count` entries
pub(crate) fn compute_topa_table_count(entry_count: u32) -> u32 {
    let table_entries = TOPA_MAX_TABLE_ENTRIES as u32;
    (entry_count + table_entries - 1) / table_entries
}

/// Write one table entry
///
/// The tables are shared with hardware while tracing is active, so all
/// accesses go through volatile operations.
fn write_entry(table: &dyn IoBuffer, index: usize, value: u64) {
    debug_assert!(index < TOPA_MAX_TABLE_ENTRIES);
    unsafe {
        core::ptr::write_volatile((table.virt() as *mut u64).add(index), value);
    }
}

/// Read one table entry
fn read_entry(table: &dyn IoBuffer, index: usize) -> u64 {
    debug_assert!(index < TOPA_MAX_TABLE_ENTRIES);
    unsafe { core::ptr::read_volatile((table.virt() as *const u64).add(index)) }
}

/// Populate a slot's allocated tables with data and END entries
fn make_topa(slot: &TraceSlot) {
    let run_len_log2 = slot.chunk_order + PAGE_SIZE_SHIFT;
    debug_assert!(run_len_log2 <= TOPA_MAX_SHIFT);
    debug_assert!(run_len_log2 >= TOPA_MIN_SHIFT);

    let num_tables = slot.num_tables as usize;

    let mut curr_table = 0;
    let mut curr_idx = 0;
    let mut last_entry = None;

    for chunk in &slot.chunks {
        let value = topa_entry::phys_addr(chunk.phys()) | topa_entry::size(run_len_log2);
        write_entry(slot.topas[curr_table].as_ref(), curr_idx, value);
        last_entry = Some((curr_table, curr_idx));

        // Leave the last slot of each table for the END marker.
        if curr_idx >= TOPA_MAX_TABLE_ENTRIES - 2 {
            curr_idx = 0;
            curr_table += 1;
        } else {
            curr_idx += 1;
        }
    }

    debug_assert!(
        curr_table + 1 == num_tables || (curr_table == num_tables && curr_idx == 0)
    );

    // END entries for completed tables.
    for i in 0..curr_table {
        let next_table = if i == num_tables - 1 { 0 } else { i + 1 };
        let value = topa_entry::phys_addr(slot.topas[next_table].phys()) | topa_entry::END;
        write_entry(slot.topas[i].as_ref(), TOPA_MAX_TABLE_ENTRIES - 1, value);
    }

    // END entry for a possibly non-full last table, at the first free
    // slot.
    if curr_table < num_tables {
        let value = topa_entry::phys_addr(slot.topas[0].phys()) | topa_entry::END;
        write_entry(slot.topas[curr_table].as_ref(), curr_idx, value);
    }

    // Stop tracing when the last data entry fills, unless the buffer
    // wraps.
    if !slot.is_circular {
        if let Some((table, idx)) = last_entry {
            let value = read_entry(slot.topas[table].as_ref(), idx) | topa_entry::STOP;
            write_entry(slot.topas[table].as_ref(), idx, value);
        }
    }
}

/// Allocate a slot's chunks and ToPA tables and link them
///
/// On failure the slot keeps whatever was allocated so far; the caller
/// rolls it back with [`free_buffers`].
pub(crate) fn allocate_buffers(
    slot: &mut TraceSlot,
    bti: &dyn Bti,
    caps: &Capabilities,
    num_chunks: u32,
    chunk_order: u32,
    is_circular: bool,
) -> Result {
    let chunk_pages = 1usize << chunk_order;

    slot.reset();

    for _ in 0..num_chunks {
        // ToPA entries of size N must be aligned to N, too.
        let alignment_log2 = PAGE_SIZE_SHIFT + chunk_order;
        let chunk = bti.io_buffer_allocate(
            chunk_pages * PAGE_SIZE,
            alignment_log2,
            IoBufferFlags::READ | IoBufferFlags::WRITE | IoBufferFlags::CONTIG,
        )?;
        let pa = chunk.phys();
        // Count buffers as we go so a later failure can free exactly
        // what got allocated.
        slot.chunks.push(chunk);
        slot.num_chunks += 1;
        // A misaligned chunk would surface as an operational error once
        // the hardware reaches it. See Intel Vol3 36.2.6.2.
        let align_mask = (1u64 << alignment_log2) - 1;
        if pa & align_mask != 0 {
            log::error!(
                "allocate_buffers: chunk has bad alignment: alignment {}, got {:#x}",
                alignment_log2,
                pa
            );
            return Err(RX_ERR_INTERNAL);
        }
    }

    slot.chunk_order = chunk_order;
    slot.is_circular = is_circular;

    let entry_count = compute_topa_entry_count(num_chunks);
    let table_count = compute_topa_table_count(entry_count);

    if entry_count < 2 {
        log::info!("allocate_buffers: invalid ToPA entry count: {}", entry_count);
        return Err(RX_ERR_INVALID_ARGS);
    }

    // Some early Processor Trace implementations only supported having
    // a table with a single real entry and an END.
    if !caps.output_topa_multi && entry_count > 2 {
        return Err(RX_ERR_NOT_SUPPORTED);
    }

    for _ in 0..table_count {
        let table = bti
            .io_buffer_allocate(
                core::mem::size_of::<u64>() * TOPA_MAX_TABLE_ENTRIES,
                0,
                IoBufferFlags::READ | IoBufferFlags::WRITE | IoBufferFlags::CONTIG,
            )
            .map_err(|_| RX_ERR_NO_MEMORY)?;
        slot.topas.push(table);
        slot.num_tables += 1;
    }

    make_topa(slot);

    Ok(())
}

/// Release a slot's chunks and tables and zero its shape
pub(crate) fn free_buffers(slot: &mut TraceSlot) {
    debug_assert!(!slot.assigned);

    slot.topas.clear();
    slot.chunks.clear();
    slot.num_tables = 0;
    slot.num_chunks = 0;
    slot.chunk_order = 0;
    slot.is_circular = false;
    slot.allocated = false;
}

/// Walk a stopped trace's tables to find how much data was captured
///
/// The saved output_base names the in-progress table and
/// output_mask_ptrs the in-progress entry and its byte offset. For a
/// circular buffer the result is just where tracing stopped.
///
/// A snapshot that matches no table position is a data-quality problem
/// in the saved registers, not a driver failure: it is counted, logged
/// and reported as zero captured bytes.
pub(crate) fn compute_capture_size(slot: &TraceSlot) -> usize {
    let curr_table_paddr = slot.output_base;
    let curr_table_entry_idx = output_mask_table_entry(slot.output_mask_ptrs);
    let curr_entry_offset = output_mask_entry_offset(slot.output_mask_ptrs);

    log::debug!(
        "compute_capture_size: table {:#x}, entry {}, offset {}",
        curr_table_paddr,
        curr_table_entry_idx,
        curr_entry_offset
    );

    let mut total_size = 0usize;
    for table in &slot.topas {
        let table_paddr = table.phys();

        for entry in 0..TOPA_MAX_TABLE_ENTRIES - 1 {
            if table_paddr == curr_table_paddr && entry as u32 >= curr_table_entry_idx {
                return total_size + curr_entry_offset as usize;
            }
            let topa_entry = read_entry(table.as_ref(), entry);
            total_size += 1usize << topa_entry::extract_size(topa_entry);
        }
    }

    CAPTURE_WALK_MISSES.fetch_add(1, Ordering::Relaxed);
    log::error!("compute_capture_size: unexpectedly exited capture loop");
    0
}
