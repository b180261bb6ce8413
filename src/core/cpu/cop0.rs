// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 rs161 contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! System coprocessor (cop0) register numbering and field layouts
//!
//! Coprocessor registers have a register number (0-31) and a "select"
//! number (0-7), essentially a bank index. The status register uses the
//! r2000/r3000 meaning of bits 0-7 (the KU/IE triple); the config
//! registers follow the later layout with a vintage MMU type reported.

/// Combine a register number and select into one lookup key
pub(super) const fn regsel(reg: u32, sel: u32) -> u32 {
    (reg << 3) | sel
}

pub(super) const C0_INDEX: u32 = regsel(0, 0);
pub(super) const C0_RANDOM: u32 = regsel(1, 0);
pub(super) const C0_TLBLO: u32 = regsel(2, 0);
pub(super) const C0_CONTEXT: u32 = regsel(4, 0);
pub(super) const C0_VADDR: u32 = regsel(8, 0);
pub(super) const C0_COUNT: u32 = regsel(9, 0);
pub(super) const C0_TLBHI: u32 = regsel(10, 0);
pub(super) const C0_COMPARE: u32 = regsel(11, 0);
pub(super) const C0_STATUS: u32 = regsel(12, 0);
pub(super) const C0_CAUSE: u32 = regsel(13, 0);
pub(super) const C0_EPC: u32 = regsel(14, 0);
pub(super) const C0_PRID: u32 = regsel(15, 0);
pub(super) const C0_CFEAT: u32 = regsel(15, 1);
pub(super) const C0_IFEAT: u32 = regsel(15, 2);
pub(super) const C0_CONFIG0: u32 = regsel(16, 0);
pub(super) const C0_CONFIG1: u32 = regsel(16, 1);
pub(super) const C0_CONFIG2: u32 = regsel(16, 2);
pub(super) const C0_CONFIG3: u32 = regsel(16, 3);
pub(super) const C0_CONFIG4: u32 = regsel(16, 4);
pub(super) const C0_CONFIG5: u32 = regsel(16, 5);
pub(super) const C0_CONFIG6: u32 = regsel(16, 6);
pub(super) const C0_CONFIG7: u32 = regsel(16, 7);

// Status register fields
pub(super) const STATUS_COPENABLE: u32 = 0xf000_0000;
pub(super) const STATUS_BOOTVECTORS: u32 = 0x0040_0000;
pub(super) const STATUS_ERRORCAUSES: u32 = 0x0038_0000;
pub(super) const STATUS_R3KCACHE: u32 = 0x0003_0000;
pub(super) const STATUS_HARDMASK_TIMER: u32 = 0x0000_8000;
pub(super) const STATUS_HARDMASK_UNUSED4: u32 = 0x0000_4000;
pub(super) const STATUS_HARDMASK_FPU: u32 = 0x0000_2000;
pub(super) const STATUS_HARDMASK_UNUSED2: u32 = 0x0000_1000;
pub(super) const STATUS_HARDMASK_IPI: u32 = 0x0000_0800;
pub(super) const STATUS_HARDMASK_LB: u32 = 0x0000_0400;
pub(super) const STATUS_SOFTMASK: u32 = 0x0000_0300;
pub(super) const STATUS_KUO: u32 = 0x0000_0020;
pub(super) const STATUS_IEO: u32 = 0x0000_0010;
pub(super) const STATUS_KUP: u32 = 0x0000_0008;
pub(super) const STATUS_IEP: u32 = 0x0000_0004;
pub(super) const STATUS_KUC: u32 = 0x0000_0002;
pub(super) const STATUS_IEC: u32 = 0x0000_0001;

// Cause register fields
pub(super) const CAUSE_BD: u32 = 0x8000_0000;
pub(super) const CAUSE_HARDIRQ_TIMER: u32 = 0x0000_8000;
pub(super) const CAUSE_HARDIRQ_IPI: u32 = 0x0000_0800;
pub(super) const CAUSE_HARDIRQ_LB: u32 = 0x0000_0400;
pub(super) const CAUSE_SOFTIRQ: u32 = 0x0000_0300;

// TLB random register bounds (the register ranges from 8 to 63)
pub(super) const RANDREG_MAX: u32 = 56;
pub(super) const RANDREG_OFFSET: u32 = 8;

// Config register composition
const CONFIG_NEXTSEL_PRESENT: u32 = 0x8000_0000;
const CONFIG0_ENDIAN_BIG: u32 = 0x0000_8000;
const CONFIG0_TYPE_MIPS32: u32 = 0x0000_0000;
const CONFIG0_REVISION_1: u32 = 0x0000_0000;
/// The vintage MIPS-I MMU type (implementation-specific value)
const CONFIG0_MMU_VINTAGE: u32 = 0x0000_03f0;
const CONFIG0_KSEG0_COHERE_CACHED: u32 = 3;

/// Power-on value of config register 0
pub(super) const CONFIG0_VALUE: u32 = CONFIG_NEXTSEL_PRESENT
    | CONFIG0_ENDIAN_BIG
    | CONFIG0_TYPE_MIPS32
    | CONFIG0_REVISION_1
    | CONFIG0_MMU_VINTAGE
    | CONFIG0_KSEG0_COHERE_CACHED;

const fn config1_mk_tlbsize(n: u32) -> u32 {
    (n - 1) << 25
}
const fn config1_mk_cache(sets: u32, line: u32, assoc: u32) -> u32 {
    (sets << 6) | (line << 3) | (assoc - 1)
}

/// Power-on value of config register 1: TLB size plus a 4K 4-way
/// 16-byte-line icache and dcache
pub(super) const CONFIG1_VALUE: u32 = config1_mk_tlbsize(super::NTLB as u32)
    | (config1_mk_cache(0 /* 64 sets */, 3 /* 16-byte line */, 4) << 16)
    | (config1_mk_cache(0, 3, 4) << 7);

/// Processor revision id reported in C0_PRID
pub(super) const PRID_VALUE: u32 = 0x00a1;

/// MIPS exception codes as stored in the cause register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExceptionCode {
    /// Interrupt
    Irq = 0,
    /// TLB entry is read-only
    Mod = 1,
    /// TLB miss on load
    TlbL = 2,
    /// TLB miss on store
    TlbS = 3,
    /// Address error on load
    AdEL = 4,
    /// Address error on store
    AdES = 5,
    /// Bus error on instruction fetch
    Ibe = 6,
    /// Bus error on data access
    Dbe = 7,
    /// System call
    Sys = 8,
    /// Breakpoint
    Bp = 9,
    /// Reserved (illegal) instruction
    Ri = 10,
    /// Coprocessor unusable
    CpU = 11,
    /// Arithmetic overflow
    Ovf = 12,
}

impl ExceptionCode {
    pub fn name(self) -> &'static str {
        match self {
            ExceptionCode::Irq => "interrupt",
            ExceptionCode::Mod => "TLB modify",
            ExceptionCode::TlbL => "TLB miss - load",
            ExceptionCode::TlbS => "TLB miss - store",
            ExceptionCode::AdEL => "Address error - load",
            ExceptionCode::AdES => "Address error - store",
            ExceptionCode::Ibe => "Bus error - code",
            ExceptionCode::Dbe => "Bus error - data",
            ExceptionCode::Sys => "System call",
            ExceptionCode::Bp => "Breakpoint",
            ExceptionCode::Ri => "Illegal instruction",
            ExceptionCode::CpU => "Coprocessor unusable",
            ExceptionCode::Ovf => "Arithmetic overflow",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regsel_packing() {
        assert_eq!(C0_STATUS, 12 << 3);
        assert_eq!(C0_CONFIG1, (16 << 3) | 1);
        assert_ne!(C0_CONFIG0, C0_CONFIG1);
    }

    #[test]
    fn test_config1_reports_tlb_size() {
        // top 7 bits below the sign: (NTLB - 1) << 25
        assert_eq!(CONFIG1_VALUE >> 25, (super::super::NTLB as u32) - 1);
    }

    #[test]
    fn test_exception_names() {
        assert_eq!(ExceptionCode::Irq.name(), "interrupt");
        assert_eq!(ExceptionCode::Ovf.name(), "Arithmetic overflow");
    }
}
