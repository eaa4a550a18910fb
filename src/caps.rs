// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Processor Trace capability discovery
//!
//! Decodes the CPUID leaves describing Intel PT support into an
//! immutable [`Capabilities`] record. The record is probed once per
//! process and read-only afterwards; operations receive it by shared
//! reference.

#[cfg(target_arch = "x86_64")]
use spin::Once;

use crate::bits::{bits_shift, is_bit_set};
use crate::types::{Result, RX_ERR_NOT_SUPPORTED};

/// One CPUID leaf's output registers
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuidLeaf {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Source of CPUID data
///
/// The hardware implementation executes the instruction; tests supply
/// canned leaves.
pub trait CpuidSource {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidLeaf;
}

/// CPUID through the instruction itself
#[cfg(target_arch = "x86_64")]
pub struct HardwareCpuid;

#[cfg(target_arch = "x86_64")]
impl CpuidSource for HardwareCpuid {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidLeaf {
        let r = unsafe { core::arch::x86_64::__cpuid_count(leaf, subleaf) };
        CpuidLeaf {
            eax: r.eax,
            ebx: r.ebx,
            ecx: r.ecx,
            edx: r.edx,
        }
    }
}

/// ============================================================================
/// Capabilities
/// ============================================================================

/// Intel PT support reported by the processor
///
/// Set once at probe time, then read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Processor Trace is present at all
    pub supported: bool,

    pub family: u32,
    pub model: u32,
    pub stepping: u32,

    /// Maximum address-range configuration value
    pub addr_cfg_max: u32,
    /// Bitmask of supported MTC frequency log2 values
    pub mtc_freq_mask: u32,
    /// Bitmask of supported CYC threshold log2 values
    pub cyc_thresh_mask: u32,
    /// Bitmask of supported PSB frequency log2 values
    pub psb_freq_mask: u32,
    /// Number of address ranges for IP filtering
    pub num_addr_ranges: u32,
    /// Bus clock frequency ratio
    pub bus_freq: u32,

    pub cr3_filtering: bool,
    pub psb: bool,
    pub ip_filtering: bool,
    pub mtc: bool,
    pub ptwrite: bool,
    pub power_events: bool,

    pub output_topa: bool,
    pub output_topa_multi: bool,
    pub output_single: bool,
    pub output_transport: bool,

    /// IP payloads are LIP (CS base included)
    pub lip: bool,
}

impl Capabilities {
    /// Decode Intel PT support from CPUID
    ///
    /// Reads leaves 0x01, 0x07/0, 0x14/0, 0x14/1 and 0x15. Fails with
    /// NotSupported when the processor predates leaf 0x14 or does not
    /// advertise the feature.
    pub fn probe(cpuid: &dyn CpuidSource) -> Result<Capabilities> {
        let max_leaf = cpuid.cpuid(0, 0).eax;
        if max_leaf < 0x14 {
            log::info!("IntelPT: no PT support");
            return Err(RX_ERR_NOT_SUPPORTED);
        }

        let mut caps = Capabilities::default();

        let leaf1 = cpuid.cpuid(0x01, 0);
        caps.stepping = (bits_shift(leaf1.eax, 3, 0)) as u32;
        caps.model = (bits_shift(leaf1.eax, 7, 4)) as u32;
        caps.family = (bits_shift(leaf1.eax, 11, 8)) as u32;
        if caps.family == 0xf {
            caps.family += bits_shift(leaf1.eax, 27, 20) as u32;
        }
        if caps.family == 6 || caps.family == 0xf {
            caps.model += (bits_shift(leaf1.eax, 19, 16) as u32) << 4;
        }

        let leaf7 = cpuid.cpuid(0x07, 0);
        if !is_bit_set(leaf7.ebx, 25) {
            log::info!("IntelPT: no PT support");
            return Err(RX_ERR_NOT_SUPPORTED);
        }

        caps.supported = true;

        let leaf14 = cpuid.cpuid(0x14, 0);
        if is_bit_set(leaf14.ebx, 2) {
            caps.addr_cfg_max = 2;
        }
        if is_bit_set(leaf14.ebx, 1) && leaf14.eax >= 1 {
            let leaf14_1 = cpuid.cpuid(0x14, 1);
            caps.mtc_freq_mask = bits_shift(leaf14_1.eax, 31, 16) as u32;
            caps.cyc_thresh_mask = bits_shift(leaf14_1.ebx, 15, 0) as u32;
            caps.psb_freq_mask = bits_shift(leaf14_1.ebx, 31, 16) as u32;
            caps.num_addr_ranges = bits_shift(leaf14_1.eax, 2, 0) as u32;
        }

        caps.cr3_filtering = is_bit_set(leaf14.ebx, 0);
        caps.psb = is_bit_set(leaf14.ebx, 1);
        caps.ip_filtering = is_bit_set(leaf14.ebx, 2);
        caps.mtc = is_bit_set(leaf14.ebx, 3);
        caps.ptwrite = is_bit_set(leaf14.ebx, 4);
        caps.power_events = is_bit_set(leaf14.ebx, 5);

        caps.output_topa = is_bit_set(leaf14.ecx, 0);
        caps.output_topa_multi = is_bit_set(leaf14.ecx, 1);
        caps.output_single = is_bit_set(leaf14.ecx, 2);
        caps.output_transport = is_bit_set(leaf14.ecx, 3);
        caps.lip = is_bit_set(leaf14.ecx, 31);

        if max_leaf >= 0x15 {
            let leaf15 = cpuid.cpuid(0x15, 0);
            if leaf15.eax != 0 && leaf15.ebx != 0 {
                caps.bus_freq = (1.0 / (leaf15.eax as f32 / leaf15.ebx as f32)) as u32;
            }
        }

        log::info!("Intel Processor Trace configuration for this chipset:");
        log::info!("mtc_freq_mask:   {:#x}", caps.mtc_freq_mask);
        log::info!("cyc_thresh_mask: {:#x}", caps.cyc_thresh_mask);
        log::info!("psb_freq_mask:   {:#x}", caps.psb_freq_mask);
        log::info!("num addr ranges: {}", caps.num_addr_ranges);

        Ok(caps)
    }
}

#[cfg(target_arch = "x86_64")]
static IPT_CAPABILITIES: Once<Result<Capabilities>> = Once::new();

/// Process-wide capability record
///
/// Probes the hardware on first call and caches the outcome; later
/// calls return the same result without re-executing CPUID.
#[cfg(target_arch = "x86_64")]
pub fn ipt_capabilities() -> Result<&'static Capabilities> {
    IPT_CAPABILITIES
        .call_once(|| Capabilities::probe(&HardwareCpuid))
        .as_ref()
        .map_err(|&err| err)
}
