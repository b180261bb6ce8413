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

//! MIPS-I CPU core
//!
//! One `MipsCpu` per configured processor. Each simulated cycle: roll the
//! exception PC, check interrupt lines, fetch through the precomputed
//! page mapping, advance the PC pair, decode and dispatch, then run the
//! post-dispatch bookkeeping (on-chip timer, hi/lo stalls, TLB random
//! register, retirement accounting).
//!
//! # Address space
//!
//! - `0x00000000-0x7fffffff` kuseg: TLB-mapped, user-accessible
//! - `0x80000000-0x9fffffff` kseg0: kernel, direct-mapped, cached
//! - `0xa0000000-0xbfffffff` kseg1: kernel, direct-mapped, uncached
//! - `0xc0000000-0xffffffff` kseg2: kernel, TLB-mapped
//!
//! Since no cache is simulated, kseg0 and kseg1 behave identically; both
//! map their base to physical 0.

mod cop0;
mod decode;
mod instructions;
#[cfg(test)]
mod tests;
mod tlb;

pub use cop0::ExceptionCode;
pub use tlb::TlbEntry;

use crate::core::bus::{Bus, BusCtx, PageRef};
use crate::core::trace::TraceKind;

use cop0::{RANDREG_MAX, RANDREG_OFFSET};

/// Number of TLB entries
pub const NTLB: usize = 64;

/// Number of general registers
const NREGS: usize = 32;

/// MIPS hardwired memory segments
pub const KUSEG: u32 = 0x0000_0000;
pub const KSEG0: u32 = 0x8000_0000;
pub const KSEG1: u32 = 0xa000_0000;
pub const KSEG2: u32 = 0xc000_0000;

/// Complete encoding of RFE, which needs special-casing around jump
/// delay slots and page crossings
const FULLOP_RFE: u32 = 0x4200_0010;

// Primary opcode field values
const OPM_SPECIAL: u32 = 0;
const OPM_BCOND: u32 = 1;
const OPM_J: u32 = 2;
const OPM_JAL: u32 = 3;
const OPM_BEQ: u32 = 4;
const OPM_BNE: u32 = 5;
const OPM_BLEZ: u32 = 6;
const OPM_BGTZ: u32 = 7;
const OPM_ADDI: u32 = 8;
const OPM_ADDIU: u32 = 9;
const OPM_SLTI: u32 = 10;
const OPM_SLTIU: u32 = 11;
const OPM_ANDI: u32 = 12;
const OPM_ORI: u32 = 13;
const OPM_XORI: u32 = 14;
const OPM_LUI: u32 = 15;
const OPM_COP0: u32 = 16;
const OPM_COP3: u32 = 19;
const OPM_LB: u32 = 32;
const OPM_LH: u32 = 33;
const OPM_LWL: u32 = 34;
const OPM_LW: u32 = 35;
const OPM_LBU: u32 = 36;
const OPM_LHU: u32 = 37;
const OPM_LWR: u32 = 38;
const OPM_SB: u32 = 40;
const OPM_SH: u32 = 41;
const OPM_SWL: u32 = 42;
const OPM_SW: u32 = 43;
const OPM_SWR: u32 = 46;
const OPM_CACHE: u32 = 47;
const OPM_LWC0: u32 = 48;
const OPM_LWC3: u32 = 51;
const OPM_SWC0: u32 = 56;
const OPM_SWC3: u32 = 59;

// Function field values under OPM_SPECIAL
const OPS_SLL: u32 = 0;
const OPS_SRL: u32 = 2;
const OPS_SRA: u32 = 3;
const OPS_SLLV: u32 = 4;
const OPS_SRLV: u32 = 6;
const OPS_SRAV: u32 = 7;
const OPS_JR: u32 = 8;
const OPS_JALR: u32 = 9;
const OPS_SYSCALL: u32 = 12;
const OPS_BREAK: u32 = 13;
const OPS_SYNC: u32 = 15;
const OPS_MFHI: u32 = 16;
const OPS_MTHI: u32 = 17;
const OPS_MFLO: u32 = 18;
const OPS_MTLO: u32 = 19;
const OPS_MULT: u32 = 24;
const OPS_MULTU: u32 = 25;
const OPS_DIV: u32 = 26;
const OPS_DIVU: u32 = 27;
const OPS_ADD: u32 = 32;
const OPS_ADDU: u32 = 33;
const OPS_SUB: u32 = 34;
const OPS_SUBU: u32 = 35;
const OPS_AND: u32 = 36;
const OPS_OR: u32 = 37;
const OPS_XOR: u32 = 38;
const OPS_NOR: u32 = 39;
const OPS_SLT: u32 = 42;
const OPS_SLTU: u32 = 43;

/// Possible states for a CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    /// Powered off (secondary CPUs before CPUE enables them)
    Disabled,
    /// Waiting for an interrupt (after WAIT)
    Idle,
    Running,
}

/// What one cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle executed (possibly taking an exception)
    Ran,
    /// A builtin breakpoint fired: no state changed, no time passed
    Breakpoint,
}

/// Sub-word memory access styles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemStyle {
    SByte,
    UByte,
    SHalf,
    UHalf,
    WordL,
    WordR,
}

/// One MIPS-I processor
pub struct MipsCpu {
    pub state: CpuState,
    cpunum: usize,

    // general registers; r0 is hardwired to zero
    r: [u32; NREGS],

    // multiply/divide unit with pipeline-stall modeling
    lo: u32,
    hi: u32,
    lowait: u32,
    hiwait: u32,

    // "jumping" is set by a taken branch; "in_jumpdelay" while decoding
    // the instruction in the delay slot
    jumping: bool,
    in_jumpdelay: bool,

    // At decode time pc points at the delay slot and nextpc past it; a
    // branch alters nextpc. expc points at the executing instruction
    // (the branch itself while in its delay slot).
    expc: u32,
    pc: u32,
    nextpc: u32,
    pcoff: u32,
    nextpcoff: u32,
    pcpage: Option<PageRef>,
    nextpcpage: Option<PageRef>,

    // mmu
    tlb: [TlbEntry; NTLB],
    /// Staging entry: cop0 entryhi/entrylo
    tlbentry: TlbEntry,
    tlbindex: u32,
    tlbpf: bool,
    tlbrandom: u32,

    // status register, decomposed
    old_usermode: bool,
    old_irqon: bool,
    prev_usermode: bool,
    prev_irqon: bool,
    current_usermode: bool,
    current_irqon: bool,
    hardmask_lb: bool,
    hardmask_ipi: bool,
    hardmask_fpu: bool,
    hardmask_void: u32,
    hardmask_timer: bool,
    status_softmask: u32,
    status_bootvectors: bool,
    status_copenable: u32,

    // cause register, decomposed
    cause_bd: bool,
    cause_ce: u32,
    cause_softirq: u32,
    cause_code: u32,

    // other cop0 registers
    config0: u32,
    config1: u32,
    context: u32,
    epc: u32,
    vaddr: u32,
    prid: u32,
    cfeat: u32,
    ifeat: u32,
    count: u32,
    compare: u32,
    compare_used: bool,

    // interrupt input lines
    irq_lamebus: bool,
    irq_ipi: bool,
    irq_timer: bool,

    // LL/SC reservation
    ll_active: bool,
    ll_addr: u32,
    ll_value: u32,

    // debugger hook
    hit_breakpoint: bool,
}

impl MipsCpu {
    /// Create a CPU in its power-on state. The PC page cache is filled in
    /// lazily by [`MipsCpu::refetch_pc`] once the bus exists.
    pub fn new(cpunum: usize) -> Self {
        let mut tlb = [TlbEntry::reset(0); NTLB];
        for (i, e) in tlb.iter_mut().enumerate() {
            *e = TlbEntry::reset(i);
        }

        MipsCpu {
            state: CpuState::Disabled,
            cpunum,
            r: [0; NREGS],
            lo: 0,
            hi: 0,
            lowait: 0,
            hiwait: 0,
            jumping: false,
            in_jumpdelay: false,
            expc: 0,
            pc: 0xbfc0_0000,
            nextpc: 0xbfc0_0004,
            pcoff: 0,
            nextpcoff: 0,
            pcpage: None,
            nextpcpage: None,
            tlb,
            tlbentry: TlbEntry::reset(NTLB),
            tlbindex: 0,
            tlbpf: false,
            tlbrandom: RANDREG_MAX - 1,
            old_usermode: false,
            old_irqon: false,
            prev_usermode: false,
            prev_irqon: false,
            current_usermode: false,
            current_irqon: false,
            hardmask_lb: false,
            hardmask_ipi: false,
            hardmask_fpu: false,
            hardmask_void: 0,
            hardmask_timer: false,
            status_softmask: 0,
            status_bootvectors: true,
            status_copenable: 0,
            cause_bd: false,
            cause_ce: 0,
            cause_softirq: 0,
            cause_code: 0,
            config0: cop0::CONFIG0_VALUE,
            config1: cop0::CONFIG1_VALUE,
            context: 0,
            epc: 0,
            vaddr: 0,
            prid: cop0::PRID_VALUE,
            cfeat: 0,
            ifeat: 0,
            count: 1,
            compare: 0,
            compare_used: false,
            irq_lamebus: false,
            irq_ipi: false,
            irq_timer: false,
            ll_active: false,
            ll_addr: 0,
            ll_value: 0,
            hit_breakpoint: false,
        }
    }

    /// Recompute the pc/nextpc page mappings; must succeed (the reset
    /// vector and kernel entry point always map).
    pub fn refetch_pc(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        if self.precompute_pc(bus, ctx).is_err() || self.precompute_nextpc(bus, ctx).is_err() {
            panic!("internal error: pc precompute failed at reset");
        }
    }

    // --------------------------------------------------------------
    // Register file

    #[inline(always)]
    pub fn reg(&self, index: usize) -> u32 {
        self.r[index]
    }

    #[inline(always)]
    pub fn set_reg(&mut self, index: usize, value: u32) {
        if index != 0 {
            self.r[index] = value;
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn expc(&self) -> u32 {
        self.expc
    }

    pub fn cpunum(&self) -> usize {
        self.cpunum
    }

    pub fn hit_breakpoint(&self) -> bool {
        self.hit_breakpoint
    }

    pub fn in_usermode(&self) -> bool {
        self.current_usermode
    }

    // --------------------------------------------------------------
    // Interrupt lines

    /// Drive the external interrupt lines from the bus. Asserting either
    /// line wakes an idle CPU. (The on-chip timer line is internal and
    /// cannot be pending while idle.)
    pub fn set_irqs(&mut self, ctx: &mut BusCtx, lamebus: bool, ipi: bool) {
        self.irq_lamebus = lamebus;
        self.irq_ipi = ipi;
        if self.state == CpuState::Idle && (lamebus || ipi) {
            ctx.tracing.cpu(
                TraceKind::Irq,
                self.cpunum,
                format_args!("waking: LB {} IPI {}", lamebus as u32, ipi as u32),
            );
            self.state = CpuState::Running;
        }
    }

    /// WAIT instruction: idle unless an interrupt is already pending
    fn do_wait(&mut self) {
        if !self.irq_lamebus && !self.irq_ipi && !self.irq_timer {
            self.state = CpuState::Idle;
        }
    }

    // --------------------------------------------------------------
    // Status / cause composition

    fn get_status(&self) -> u32 {
        use cop0::*;
        let mut val = self.status_copenable;
        if self.status_bootvectors {
            val |= STATUS_BOOTVECTORS;
        }
        if self.hardmask_timer {
            val |= STATUS_HARDMASK_TIMER;
        }
        val |= self.hardmask_void;
        if self.hardmask_fpu {
            val |= STATUS_HARDMASK_FPU;
        }
        if self.hardmask_ipi {
            val |= STATUS_HARDMASK_IPI;
        }
        if self.hardmask_lb {
            val |= STATUS_HARDMASK_LB;
        }
        val |= self.status_softmask;
        if self.old_usermode {
            val |= STATUS_KUO;
        }
        if self.old_irqon {
            val |= STATUS_IEO;
        }
        if self.prev_usermode {
            val |= STATUS_KUP;
        }
        if self.prev_irqon {
            val |= STATUS_IEP;
        }
        if self.current_usermode {
            val |= STATUS_KUC;
        }
        if self.current_irqon {
            val |= STATUS_IEC;
        }
        val
    }

    fn set_status(&mut self, ctx: &mut BusCtx, val: u32) {
        use cop0::*;
        self.status_copenable = val & STATUS_COPENABLE;
        self.status_bootvectors = val & STATUS_BOOTVECTORS != 0;
        if val & STATUS_R3KCACHE != 0 {
            ctx.control.hang(
                ctx.clock,
                "Status register write attempted to use r2000/r3000 cache control",
            );
        }
        self.hardmask_timer = val & STATUS_HARDMASK_TIMER != 0;
        self.hardmask_void = val & (STATUS_HARDMASK_UNUSED2 | STATUS_HARDMASK_UNUSED4);
        self.hardmask_fpu = val & STATUS_HARDMASK_FPU != 0;
        self.hardmask_ipi = val & STATUS_HARDMASK_IPI != 0;
        self.hardmask_lb = val & STATUS_HARDMASK_LB != 0;
        self.status_softmask = val & STATUS_SOFTMASK;
        self.old_usermode = val & STATUS_KUO != 0;
        self.old_irqon = val & STATUS_IEO != 0;
        self.prev_usermode = val & STATUS_KUP != 0;
        self.prev_irqon = val & STATUS_IEP != 0;
        self.current_usermode = val & STATUS_KUC != 0;
        self.current_irqon = val & STATUS_IEC != 0;
    }

    fn get_cause(&self) -> u32 {
        use cop0::*;
        let mut val = self.cause_ce | self.cause_softirq | self.cause_code;
        if self.cause_bd {
            val |= CAUSE_BD;
        }
        if self.irq_lamebus {
            val |= CAUSE_HARDIRQ_LB;
        }
        if self.irq_ipi {
            val |= CAUSE_HARDIRQ_IPI;
        }
        if self.irq_timer {
            val |= CAUSE_HARDIRQ_TIMER;
        }
        val
    }

    fn set_cause(&mut self, val: u32) {
        // read-only except for the soft interrupt trigger bits
        self.cause_softirq = val & cop0::CAUSE_SOFTIRQ;
    }

    fn get_index(&self) -> u32 {
        let mut val = self.tlbindex << 8;
        if self.tlbpf {
            val |= 0x8000_0000;
        }
        val
    }

    fn set_index(&mut self, val: u32) {
        self.tlbindex = (val >> 8) & 63;
        self.tlbpf = val & 0x8000_0000 != 0;
    }

    fn get_random(&mut self) -> u32 {
        self.tlbrandom %= RANDREG_MAX;
        (self.tlbrandom + RANDREG_OFFSET) << 8
    }

    // --------------------------------------------------------------
    // Exceptions

    /// Restore the processor to re-execute the instruction at expc.
    ///
    /// Used for multiply-unit stalls and for builtin breakpoints, where
    /// the debugger should see execution stopped *at* the instruction.
    /// Does not invalidate the LL reservation.
    pub(crate) fn phony_exception(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        self.jumping = false;
        self.in_jumpdelay = false;
        self.pc = self.expc;
        self.nextpc = self.pc.wrapping_add(4);

        // These cannot fail: we were just executing with the same values.
        if self.precompute_pc(bus, ctx).is_err() || self.precompute_nextpc(bus, ctx).is_err() {
            panic!("internal error: pc precompute failed in phony_exception");
        }
    }

    /// Deliver an exception: save state, roll the status triple, pick a
    /// vector. `cn_or_user` is the coprocessor number for CpU, and the
    /// user-address flag selecting the fast UTLB vector for TLB misses.
    pub(crate) fn exception(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        code: ExceptionCode,
        cn_or_user: u32,
        vaddr: u32,
    ) {
        let boot = self.status_bootvectors;

        ctx.tracing.cpu(
            TraceKind::Exn,
            self.cpunum,
            format_args!(
                "exception: code {} ({}), expc {:x}, vaddr {:x}, sp {:x}",
                code as u32,
                code.name(),
                self.expc,
                vaddr,
                self.r[29]
            ),
        );

        if code == ExceptionCode::Irq {
            ctx.stats.irqs += 1;
        } else {
            ctx.stats.exns += 1;
        }

        self.cause_bd = self.in_jumpdelay;
        self.cause_ce = if code == ExceptionCode::CpU {
            cn_or_user << 28
        } else {
            0
        };
        self.cause_code = (code as u32) << 2;

        self.jumping = false;
        self.in_jumpdelay = false;
        self.ll_active = false;

        // roll the status mode/irq triple
        self.old_usermode = self.prev_usermode;
        self.old_irqon = self.prev_irqon;
        self.prev_usermode = self.current_usermode;
        self.prev_irqon = self.current_irqon;
        self.current_usermode = false;
        self.current_irqon = false;

        self.vaddr = vaddr;
        self.context &= 0xffe0_0000;
        self.context |= (vaddr & 0x7fff_f000) >> 10;

        self.epc = self.expc;

        let utlb = matches!(code, ExceptionCode::TlbL | ExceptionCode::TlbS) && cn_or_user != 0;
        self.pc = match (utlb, boot) {
            (true, true) => 0xbfc0_0100,
            (true, false) => 0x8000_0000,
            (false, true) => 0xbfc0_0180,
            (false, false) => 0x8000_0080,
        };
        self.nextpc = self.pc.wrapping_add(4);

        // If these fail they will likely recurse forever rather than
        // return, so the results are not checked.
        let _ = self.precompute_pc(bus, ctx);
        let _ = self.precompute_nextpc(bus, ctx);
    }

    /// RFE: rotate the status mode/irq triple back and re-lookup the pc
    /// mappings (we may have just dropped to user mode).
    pub(crate) fn do_rfe(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        if self.current_usermode {
            panic!("internal error: RFE in usermode not caught by decoder");
        }

        self.current_usermode = self.prev_usermode;
        self.current_irqon = self.prev_irqon;
        self.prev_usermode = self.old_usermode;
        self.prev_irqon = self.old_irqon;

        ctx.tracing.cpu(
            TraceKind::Exn,
            self.cpunum,
            format_args!(
                "Return from exception: {} mode, interrupts {}, sp {:x}",
                if self.current_usermode { "user" } else { "kernel" },
                if self.current_irqon { "on" } else { "off" },
                self.r[29]
            ),
        );

        // Arrange for any exception to point at the instruction after
        // the rfe, not the rfe itself.
        self.in_jumpdelay = false;
        self.expc = self.pc;

        let _ = self.precompute_pc(bus, ctx);
        let _ = self.precompute_nextpc(bus, ctx);
    }

    // --------------------------------------------------------------
    // Address translation

    /// Find a TLB entry matching a virtual page under the current ASID
    fn find_tlb(&self, vpage: u32) -> Option<usize> {
        self.tlb
            .iter()
            .position(|e| e.vpn == vpage && (e.pid == self.tlbentry.pid || e.global))
    }

    /// Translate a virtual address, raising the appropriate exception on
    /// failure. `Err` means an exception was delivered.
    fn translate(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        vaddr: u32,
        iswrite: bool,
    ) -> Result<u32, ()> {
        if (vaddr >= KSEG0 && self.current_usermode) || vaddr & 0x3 != 0 {
            let code = if iswrite {
                ExceptionCode::AdES
            } else {
                ExceptionCode::AdEL
            };
            self.exception(bus, ctx, code, 0, vaddr);
            return Err(());
        }

        // kseg0/kseg1 are direct-mapped
        if vaddr >> 30 == 2 {
            return Ok(vaddr & 0x1fff_ffff);
        }

        let vpage = vaddr & 0xffff_f000;
        let off = vaddr & 0x0000_0fff;

        self.tlbentry.vpn = vpage;
        let ix = match self.find_tlb(vpage) {
            Some(ix) => ix,
            None => {
                let code = if iswrite {
                    ExceptionCode::TlbS
                } else {
                    ExceptionCode::TlbL
                };
                let isuseraddr = vaddr < KSEG0;
                ctx.tracing.cpu(
                    TraceKind::Tlb,
                    self.cpunum,
                    format_args!("tlblookup: {:05x}/{:03x} MISS", vpage >> 12, self.tlbentry.pid),
                );
                self.exception(bus, ctx, code, isuseraddr as u32, vaddr);
                return Err(());
            }
        };

        if !self.tlb[ix].valid {
            let code = if iswrite {
                ExceptionCode::TlbS
            } else {
                ExceptionCode::TlbL
            };
            self.exception(bus, ctx, code, 0, vaddr);
            return Err(());
        }
        if iswrite && !self.tlb[ix].dirty {
            self.exception(bus, ctx, ExceptionCode::Mod, 0, vaddr);
            return Err(());
        }
        Ok(self.tlb[ix].pfn | off)
    }

    /// Debugger-side translation: no state change, no exceptions, always
    /// treated as supervisor mode.
    fn debug_translate(&self, vaddr: u32, iswrite: bool) -> Option<u32> {
        if vaddr & 0x3 != 0 {
            return None;
        }
        if vaddr >> 30 == 2 {
            return Some(vaddr & 0x1fff_ffff);
        }
        let vpage = vaddr & 0xffff_f000;
        let ix = self.find_tlb(vpage)?;
        if !self.tlb[ix].valid {
            return None;
        }
        if iswrite && !self.tlb[ix].dirty {
            return None;
        }
        Some(self.tlb[ix].pfn | (vaddr & 0xfff))
    }

    /// Access physical memory, turning a bus error into DBE
    fn access_read(&mut self, bus: &mut Bus, ctx: &mut BusCtx, paddr: u32) -> Result<u32, ()> {
        match bus.phys_fetch(self.cpunum, paddr, ctx) {
            Ok(val) => Ok(val),
            Err(_) => {
                self.exception(bus, ctx, ExceptionCode::Dbe, 0, 0);
                Err(())
            }
        }
    }

    fn access_write(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        paddr: u32,
        val: u32,
    ) -> Result<(), ()> {
        match bus.phys_store(self.cpunum, paddr, val, ctx) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.exception(bus, ctx, ExceptionCode::Dbe, 0, 0);
                Err(())
            }
        }
    }

    /// Translated read. `willbewrite` is true when this read is part of a
    /// read-modify-write (sub-word store), so translation faults report a
    /// store.
    pub(crate) fn mem_read(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        vaddr: u32,
        willbewrite: bool,
    ) -> Result<u32, ()> {
        let paddr = self.translate(bus, ctx, vaddr, willbewrite)?;
        self.access_read(bus, ctx, paddr)
    }

    /// Translated write
    pub(crate) fn mem_write(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        vaddr: u32,
        val: u32,
    ) -> Result<(), ()> {
        let paddr = self.translate(bus, ctx, vaddr, true)?;
        self.access_write(bus, ctx, paddr, val)
    }

    /// Sub-word and unaligned-word loads. Returns the new register value
    /// given the current one (LWL/LWR merge), or `Err` after an exception.
    fn do_load(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        style: MemStyle,
        addr: u32,
        cur: u32,
    ) -> Result<u32, ()> {
        match style {
            MemStyle::SByte | MemStyle::UByte => {
                let val = self.mem_read(bus, ctx, addr & 0xffff_fffc, false)?;
                let bval = match addr & 3 {
                    0 => (val >> 24) & 0xff,
                    1 => (val >> 16) & 0xff,
                    2 => (val >> 8) & 0xff,
                    _ => val & 0xff,
                };
                Ok(if style == MemStyle::SByte {
                    bval as u8 as i8 as i32 as u32
                } else {
                    bval
                })
            }
            MemStyle::SHalf | MemStyle::UHalf => {
                let val = self.mem_read(bus, ctx, addr & 0xffff_fffd, false)?;
                let hval = match addr & 2 {
                    0 => (val >> 16) & 0xffff,
                    _ => val & 0xffff,
                };
                Ok(if style == MemStyle::SHalf {
                    hval as u16 as i16 as i32 as u32
                } else {
                    hval
                })
            }
            MemStyle::WordL => {
                let val = self.mem_read(bus, ctx, addr & 0xffff_fffc, false)?;
                let (mask, shift) = match addr & 3 {
                    0 => (0xffff_ffffu32, 0),
                    1 => (0xffff_ff00u32, 8),
                    2 => (0xffff_0000u32, 16),
                    _ => (0xff00_0000u32, 24),
                };
                let val = val << shift;
                Ok((cur & !mask) | (val & mask))
            }
            MemStyle::WordR => {
                let val = self.mem_read(bus, ctx, addr & 0xffff_fffc, false)?;
                let (mask, shift) = match addr & 3 {
                    0 => (0x0000_00ffu32, 24),
                    1 => (0x0000_ffffu32, 16),
                    2 => (0x00ff_ffffu32, 8),
                    _ => (0xffff_ffffu32, 0),
                };
                let val = val >> shift;
                Ok((cur & !mask) | (val & mask))
            }
        }
    }

    /// Sub-word and unaligned-word stores (read-modify-write)
    fn do_store(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        style: MemStyle,
        addr: u32,
        val: u32,
    ) -> Result<(), ()> {
        match style {
            MemStyle::UByte => {
                let (mask, shift) = match addr & 3 {
                    0 => (0xff00_0000u32, 24),
                    1 => (0x00ff_0000u32, 16),
                    2 => (0x0000_ff00u32, 8),
                    _ => (0x0000_00ffu32, 0),
                };
                let wval = self.mem_read(bus, ctx, addr & 0xffff_fffc, true)?;
                let wval = (wval & !mask) | ((val & 0xff) << shift);
                self.mem_write(bus, ctx, addr & 0xffff_fffc, wval)
            }
            MemStyle::UHalf => {
                let (mask, shift) = match addr & 2 {
                    0 => (0xffff_0000u32, 16),
                    _ => (0x0000_ffffu32, 0),
                };
                let wval = self.mem_read(bus, ctx, addr & 0xffff_fffd, true)?;
                let wval = (wval & !mask) | ((val & 0xffff) << shift);
                self.mem_write(bus, ctx, addr & 0xffff_fffd, wval)
            }
            MemStyle::WordL => {
                let wval = self.mem_read(bus, ctx, addr & 0xffff_fffc, true)?;
                let (mask, shift) = match addr & 3 {
                    0 => (0xffff_ffffu32, 0),
                    1 => (0x00ff_ffffu32, 8),
                    2 => (0x0000_ffffu32, 16),
                    _ => (0x0000_00ffu32, 24),
                };
                let val = val >> shift;
                let wval = (wval & !mask) | (val & mask);
                self.mem_write(bus, ctx, addr & 0xffff_fffc, wval)
            }
            MemStyle::WordR => {
                let wval = self.mem_read(bus, ctx, addr & 0xffff_fffc, true)?;
                let (mask, shift) = match addr & 3 {
                    0 => (0xff00_0000u32, 24),
                    1 => (0xffff_0000u32, 16),
                    2 => (0xffff_ff00u32, 8),
                    _ => (0xffff_ffffu32, 0),
                };
                let val = val << shift;
                let wval = (wval & !mask) | (val & mask);
                self.mem_write(bus, ctx, addr & 0xffff_fffc, wval)
            }
            _ => panic!("internal error: bad store style"),
        }
    }

    // --------------------------------------------------------------
    // PC page precomputation

    fn precompute_pc(&mut self, bus: &mut Bus, ctx: &mut BusCtx) -> Result<(), ()> {
        let physpc = self.translate(bus, ctx, self.pc, false)?;
        match bus.map_page(physpc) {
            Some(page) => {
                self.pcpage = Some(page);
                self.pcoff = physpc & 0xfff;
                Ok(())
            }
            None => {
                self.exception(bus, ctx, ExceptionCode::Ibe, 0, 0);
                if self.pcpage.is_none() {
                    panic!("internal error: bus error invoking exception handler");
                }
                Err(())
            }
        }
    }

    fn precompute_nextpc(&mut self, bus: &mut Bus, ctx: &mut BusCtx) -> Result<(), ()> {
        let physnext = self.translate(bus, ctx, self.nextpc, false)?;
        match bus.map_page(physnext) {
            Some(page) => {
                self.nextpcpage = Some(page);
                self.nextpcoff = physnext & 0xfff;
                Ok(())
            }
            None => {
                self.exception(bus, ctx, ExceptionCode::Ibe, 0, 0);
                if self.nextpcpage.is_none() {
                    panic!("internal error: bus error invoking exception handler");
                }
                Err(())
            }
        }
    }

    // --------------------------------------------------------------
    // Branching

    /// Take a branch to an absolute address. Branches update nextpc,
    /// which points past the delay slot.
    pub(crate) fn abranch(&mut self, bus: &mut Bus, ctx: &mut BusCtx, addr: u32) {
        ctx.tracing.cpu(
            TraceKind::Jump,
            self.cpunum,
            format_args!("jump: {:x} -> {:x}", self.nextpc.wrapping_sub(8), addr),
        );

        if addr & 0x3 != 0 {
            self.exception(bus, ctx, ExceptionCode::AdEL, 0, addr);
            return;
        }

        self.nextpc = addr;
        self.jumping = true;

        // If the delay slot holds RFE, defer the nextpc precompute until
        // the RFE has switched modes; otherwise the new PC would be
        // fetched with the pre-RFE translation.
        let pcpage = self.pcpage.expect("pc page always precomputed here");
        if bus.use_map(pcpage, self.pcoff) == FULLOP_RFE {
            self.nextpcpage = None;
            self.nextpcoff = 0;
        } else {
            // if this fails, no special action is required
            let _ = self.precompute_nextpc(bus, ctx);
        }
    }

    /// Jump within the current 256 MiB region (J/JAL). The upper bits
    /// come from the delay slot's address, which pc aims at by now.
    pub(crate) fn ibranch(&mut self, bus: &mut Bus, ctx: &mut BusCtx, imm: u32) {
        let addr = (self.pc & 0xf000_0000) | imm;
        self.abranch(bus, ctx, addr);
    }

    /// PC-relative branch, relative to the delay slot's address
    pub(crate) fn rbranch(&mut self, bus: &mut Bus, ctx: &mut BusCtx, rel: i32) {
        let addr = self.pc.wrapping_add(rel as u32);
        self.abranch(bus, ctx, addr);
    }

    /// Link: save the address past the delay slot
    pub(crate) fn link(&mut self, reg: usize) {
        self.set_reg(reg, self.nextpc);
    }

    // --------------------------------------------------------------
    // The per-cycle algorithm

    /// Run one cycle. The caller has already synchronized the interrupt
    /// lines from the bus and checked `state == Running`.
    pub fn cycle(&mut self, bus: &mut Bus, ctx: &mut BusCtx) -> CycleOutcome {
        // Update the exception PC first; after this, exceptions taken in
        // this cycle report the right place. In a jump delay slot, expc
        // stays at the jump.
        if self.jumping {
            self.jumping = false;
            self.in_jumpdelay = true;
        } else {
            self.expc = self.pc;
        }

        // Check for interrupts.
        if self.current_irqon {
            let soft = self.status_softmask & self.cause_softirq;
            let lb = self.irq_lamebus && self.hardmask_lb;
            let ipi = self.irq_ipi && self.hardmask_ipi;
            let timer = self.irq_timer && self.hardmask_timer;
            if lb || ipi || timer || soft != 0 {
                ctx.tracing.cpu(
                    TraceKind::Irq,
                    self.cpunum,
                    format_args!(
                        "Taking interrupt:{}{}{}{}",
                        if lb { " bus" } else { "" },
                        if ipi { " IPI" } else { "" },
                        if timer { " timer" } else { "" },
                        if soft != 0 { " soft" } else { "" }
                    ),
                );
                self.exception(bus, ctx, ExceptionCode::Irq, 0, 0);
                // We are now at the first instruction of the handler,
                // which cannot be a jump delay slot.
                self.expc = self.pc;
            }
        }

        if self.current_usermode {
            ctx.stats.percpu[self.cpunum].ucycles += 1;
        } else {
            ctx.stats.percpu[self.cpunum].kcycles += 1;
        }

        // If the PC still equals this at the end of the cycle, no
        // exception redirected us and an instruction retired. Record the
        // mode now; an RFE mid-cycle would otherwise miscredit it.
        let retire_pc = self.nextpc;
        let retire_usermode = self.current_usermode;

        // Fetch through the precomputed page; the hot path does no
        // translation.
        let pcpage = self.pcpage.expect("pc page always precomputed at fetch");
        let insn = bus.use_map(pcpage, self.pcoff);

        // Advance the PC pair.
        self.pc = self.nextpc;
        self.pcoff = self.nextpcoff;
        self.pcpage = self.nextpcpage;
        self.nextpc = self.nextpc.wrapping_add(4);
        if self.nextpc & 0xfff == 0 {
            // crossed a page boundary
            if insn == FULLOP_RFE {
                self.nextpcpage = None;
                self.nextpcoff = 0;
            } else if self.precompute_nextpc(bus, ctx).is_err() {
                // exception delivered; skip the rest of this cycle
                return CycleOutcome::Ran;
            }
        } else {
            self.nextpcoff += 4;
        }

        if ctx.tracing.active(if retire_usermode {
            TraceKind::UserInsn
        } else {
            TraceKind::KernelInsn
        }) {
            let kind = if retire_usermode {
                TraceKind::UserInsn
            } else {
                TraceKind::KernelInsn
            };
            ctx.tracing
                .cpu(kind, self.cpunum, format_args!("at {:08x}: {:08x}", self.expc, insn));
        }

        self.hit_breakpoint = false;

        if self.dispatch(bus, ctx, insn) == CycleOutcome::Breakpoint {
            return CycleOutcome::Breakpoint;
        }

        // On-chip timer; the interrupt lands next cycle, call it a
        // pipeline effect.
        self.count = self.count.wrapping_add(1);
        if self.compare_used && self.count == self.compare {
            self.count = 0;
            self.irq_timer = true;
            ctx.tracing
                .cpu(TraceKind::Irq, self.cpunum, format_args!("Timer irq ON"));
        }

        if self.lowait > 0 {
            self.lowait -= 1;
        }
        if self.hiwait > 0 {
            self.hiwait -= 1;
        }

        self.in_jumpdelay = false;
        self.tlbrandom = self.tlbrandom.wrapping_add(1);

        // Claim progress only for retired instructions: livelocks can
        // start user instructions regularly without completing any.
        if self.pc == retire_pc {
            if retire_usermode {
                ctx.stats.percpu[self.cpunum].uretired += 1;
                ctx.clock.note_progress();
            } else {
                ctx.stats.percpu[self.cpunum].kretired += 1;
            }
        }

        CycleOutcome::Ran
    }

    /// Decode by primary opcode, then function or rt field, and dispatch
    fn dispatch(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) -> CycleOutcome {
        let op = (insn >> 26) & 0x3f;
        match op {
            OPM_SPECIAL => match insn & 0x3f {
                OPS_SLL => self.op_sll(insn),
                OPS_SRL => self.op_srl(insn),
                OPS_SRA => self.op_sra(insn),
                OPS_SLLV => self.op_sllv(insn),
                OPS_SRLV => self.op_srlv(insn),
                OPS_SRAV => self.op_srav(insn),
                OPS_JR => self.op_jr(bus, ctx, insn),
                OPS_JALR => self.op_jalr(bus, ctx, insn),
                OPS_SYSCALL => self.op_syscall(bus, ctx),
                OPS_BREAK => {
                    // In the debuggable (non-TLB-mapped) range, builtin
                    // breakpoints stop the machine without billing the
                    // cycle or touching any state.
                    if ctx.control.gdb_can_handle(self.expc) {
                        self.phony_exception(bus, ctx);
                        ctx.clock.stop_cycling = true;
                        ctx.control.enter_debugger(false);
                        self.hit_breakpoint = true;
                        return CycleOutcome::Breakpoint;
                    }
                    self.op_break(bus, ctx)
                }
                OPS_SYNC => self.op_sync(ctx),
                OPS_MFHI => self.op_mfhi(bus, ctx, insn),
                OPS_MTHI => self.op_mthi(bus, ctx, insn),
                OPS_MFLO => self.op_mflo(bus, ctx, insn),
                OPS_MTLO => self.op_mtlo(bus, ctx, insn),
                OPS_MULT => self.op_mult(bus, ctx, insn),
                OPS_MULTU => self.op_multu(bus, ctx, insn),
                OPS_DIV => self.op_div(bus, ctx, insn),
                OPS_DIVU => self.op_divu(bus, ctx, insn),
                OPS_ADD => self.op_add(bus, ctx, insn),
                OPS_ADDU => self.op_addu(insn),
                OPS_SUB => self.op_sub(bus, ctx, insn),
                OPS_SUBU => self.op_subu(insn),
                OPS_AND => self.op_and(insn),
                OPS_OR => self.op_or(insn),
                OPS_XOR => self.op_xor(insn),
                OPS_NOR => self.op_nor(insn),
                OPS_SLT => self.op_slt(insn),
                OPS_SLTU => self.op_sltu(insn),
                _ => self.op_ill(bus, ctx),
            },
            OPM_BCOND => match (insn >> 16) & 0x1f {
                0 => self.op_bltz(bus, ctx, insn),
                1 => self.op_bgez(bus, ctx, insn),
                16 => self.op_bltzal(bus, ctx, insn),
                17 => self.op_bgezal(bus, ctx, insn),
                _ => self.op_ill(bus, ctx),
            },
            OPM_J => self.op_j(bus, ctx, insn),
            OPM_JAL => self.op_jal(bus, ctx, insn),
            OPM_BEQ => self.op_beq(bus, ctx, insn),
            OPM_BNE => self.op_bne(bus, ctx, insn),
            OPM_BLEZ => self.op_blez(bus, ctx, insn),
            OPM_BGTZ => self.op_bgtz(bus, ctx, insn),
            OPM_ADDI => self.op_addi(bus, ctx, insn),
            OPM_ADDIU => self.op_addiu(insn),
            OPM_SLTI => self.op_slti(insn),
            OPM_SLTIU => self.op_sltiu(insn),
            OPM_ANDI => self.op_andi(insn),
            OPM_ORI => self.op_ori(insn),
            OPM_XORI => self.op_xori(insn),
            OPM_LUI => self.op_lui(insn),
            OPM_COP0..=OPM_COP3 => self.op_copz(bus, ctx, insn),
            OPM_LB => self.op_lb(bus, ctx, insn),
            OPM_LH => self.op_lh(bus, ctx, insn),
            OPM_LWL => self.op_lwl(bus, ctx, insn),
            OPM_LW => self.op_lw(bus, ctx, insn),
            OPM_LBU => self.op_lbu(bus, ctx, insn),
            OPM_LHU => self.op_lhu(bus, ctx, insn),
            OPM_LWR => self.op_lwr(bus, ctx, insn),
            OPM_SB => self.op_sb(bus, ctx, insn),
            OPM_SH => self.op_sh(bus, ctx, insn),
            OPM_SWL => self.op_swl(bus, ctx, insn),
            OPM_SW => self.op_sw(bus, ctx, insn),
            OPM_SWR => self.op_swr(bus, ctx, insn),
            OPM_CACHE => self.op_cache(bus, ctx, insn),
            OPM_LWC0 => self.op_ll(bus, ctx, insn), // LWC0 == LL
            x if (OPM_LWC0 + 1..=OPM_LWC3).contains(&x) => self.op_lwc(bus, ctx, insn),
            OPM_SWC0 => self.op_sc(bus, ctx, insn), // SWC0 == SC
            x if (OPM_SWC0 + 1..=OPM_SWC3).contains(&x) => self.op_swc(bus, ctx, insn),
            _ => self.op_ill(bus, ctx),
        }
        CycleOutcome::Ran
    }

    // --------------------------------------------------------------
    // Kernel load support

    /// Physical load address for a kernel segment placed in kseg0/kseg1
    pub fn load_paddr(vaddr: u32, size: u32) -> Option<u32> {
        let end = vaddr.checked_add(size)?;
        if vaddr < KSEG0 || end >= KSEG2 {
            return None;
        }
        if vaddr >= KSEG1 {
            Some(vaddr - KSEG1)
        } else {
            Some(vaddr - KSEG0)
        }
    }

    /// kseg0 virtual address for a physical address
    pub fn load_vaddr(paddr: u32, size: u32) -> Option<u32> {
        let end = paddr.checked_add(size)?;
        if end >= KSEG1 - KSEG0 {
            return None;
        }
        Some(paddr + KSEG0)
    }

    /// Point the CPU at a kernel entry point
    pub fn set_entrypoint(
        &mut self,
        bus: &mut Bus,
        ctx: &mut BusCtx,
        addr: u32,
    ) -> Result<(), String> {
        if addr & 0x3 != 0 {
            return Err("Kernel entry point is not properly aligned".into());
        }
        self.expc = addr;
        self.pc = addr;
        self.nextpc = addr.wrapping_add(4);
        if self.precompute_pc(bus, ctx).is_err() || self.precompute_nextpc(bus, ctx).is_err() {
            return Err("Kernel entry point is an invalid address".into());
        }
        Ok(())
    }

    /// Set the boot stack pointer and first argument
    pub fn set_stack(&mut self, stackaddr: u32, argument: u32) {
        self.r[29] = stackaddr; // stack pointer
        self.r[4] = argument; // first argument
    }

    /// Initial stack for a secondary CPU: the top of its CRAM, addressed
    /// through kseg0. `lboffset` is the offset from the I/O mapping base.
    pub fn secondary_start_stack(lboffset: u32) -> u32 {
        KSEG0 + 0x1fe0_0000 + lboffset
    }

    // --------------------------------------------------------------
    // Remote debugger access

    /// The range builtin breakpoints can be handled in
    pub fn debug_bp_region() -> (u32, u32) {
        (KSEG0, KSEG2)
    }

    pub fn debug_fetch_byte(&self, bus: &Bus, va: u32) -> Option<u8> {
        let aligned = va & 0xffff_fffc;
        let pa = self.debug_translate(aligned, false)?;
        bus.mem_fetch_byte(pa | (va & 3)).ok()
    }

    pub fn debug_fetch_word(&self, bus: &Bus, va: u32) -> Option<u32> {
        let pa = self.debug_translate(va, false)?;
        bus.mem_fetch(pa).ok()
    }

    pub fn debug_store_byte(&self, bus: &mut Bus, va: u32, byte: u8) -> Option<()> {
        let aligned = va & 0xffff_fffc;
        let pa = self.debug_translate(aligned, true)?;
        bus.mem_store_byte(pa | (va & 3), byte).ok()
    }

    pub fn debug_store_word(&self, bus: &mut Bus, va: u32, word: u32) -> Option<()> {
        let pa = self.debug_translate(va, true)?;
        bus.mem_store(pa, word).ok()
    }

    /// Register dump in the order the gdb remote protocol expects
    pub fn debug_registers(&mut self) -> Vec<u32> {
        let mut regs = Vec::with_capacity(NREGS + 17);
        regs.extend_from_slice(&self.r);
        regs.push(self.get_status());
        regs.push(self.lo);
        regs.push(self.hi);
        regs.push(self.vaddr);
        regs.push(self.get_cause());
        regs.push(self.pc);
        regs.push(0); // fp status
        regs.push(0);
        regs.push(0);
        regs.push(self.get_index());
        regs.push(self.get_random());
        regs.push(self.tlbentry.get_lo());
        regs.push(self.context);
        regs.push(self.tlbentry.get_hi());
        regs.push(self.epc);
        regs.push(self.prid);
        regs
    }

    /// Log the register and TLB state
    pub fn dump(&self) {
        log::info!("cpu {}: MIPS-I", self.cpunum);
        for i in (0..NREGS).step_by(4) {
            log::info!(
                "r{:<2} 0x{:08x}  r{:<2} 0x{:08x}  r{:<2} 0x{:08x}  r{:<2} 0x{:08x}",
                i,
                self.r[i],
                i + 1,
                self.r[i + 1],
                i + 2,
                self.r[i + 2],
                i + 3,
                self.r[i + 3]
            );
        }
        log::info!(
            "lo:  0x{:08x}  hi:  0x{:08x}  pc:  0x{:08x}  npc: 0x{:08x}",
            self.lo,
            self.hi,
            self.pc,
            self.nextpc
        );
        for (i, e) in self.tlb.iter().enumerate() {
            log::info!("TLB: index {:2}, {}", i, e.describe());
        }
        log::info!("TLB: entryhi/lo, {}", self.tlbentry.describe());
        log::info!(
            "tlb index: {}{}  tlb random: {}",
            self.tlbindex,
            if self.tlbpf { " [last probe failed]" } else { "" },
            (self.tlbrandom % RANDREG_MAX) + RANDREG_OFFSET
        );
        log::info!("Status register: 0x{:08x}", self.get_status());
        log::info!(
            "Cause register: 0x{:08x} [{}]",
            self.get_cause(),
            match self.cause_code >> 2 {
                0 => "interrupt",
                n => ExceptionCode::try_name(n),
            }
        );
        log::info!("VAddr register: 0x{:08x}", self.vaddr);
        log::info!("Context register: 0x{:08x}", self.context);
        log::info!("EPC register: 0x{:08x}", self.epc);
    }
}

impl ExceptionCode {
    fn try_name(code: u32) -> &'static str {
        match code {
            0 => "interrupt",
            1 => "TLB modify",
            2 => "TLB miss - load",
            3 => "TLB miss - store",
            4 => "Address error - load",
            5 => "Address error - store",
            6 => "Bus error - code",
            7 => "Bus error - data",
            8 => "System call",
            9 => "Breakpoint",
            10 => "Illegal instruction",
            11 => "Coprocessor unusable",
            12 => "Arithmetic overflow",
            _ => "???",
        }
    }
}
