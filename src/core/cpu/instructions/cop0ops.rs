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

//! Coprocessor instructions, traps, and system control
//!
//! Only coprocessor 0 exists. Anything touching coprocessors 1-3, or
//! touching cop0 from user mode, raises coprocessor-unusable. Unsupported
//! cop0 registers raise reserved-instruction; writes to read-only cop0
//! registers are silently ignored.

use super::super::cop0::*;
use super::super::decode::{copno, rd, rs, rt, sel, simm};
use super::super::{ExceptionCode, MipsCpu};
use crate::core::bus::{Bus, BusCtx};
use crate::core::trace::TraceKind;

impl MipsCpu {
    /// SYSCALL
    pub(crate) fn op_syscall(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        self.exception(bus, ctx, ExceptionCode::Sys, 0, 0);
    }

    /// BREAK (when not handled as a builtin breakpoint)
    pub(crate) fn op_break(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        self.exception(bus, ctx, ExceptionCode::Bp, 0, 0);
    }

    /// SYNC: flush pending memory accesses. Nothing to flush here, but
    /// the instruction is counted.
    pub(crate) fn op_sync(&mut self, ctx: &mut BusCtx) {
        ctx.stats.percpu[self.cpunum()].syncs += 1;
    }

    /// Reserved/illegal instruction
    pub(crate) fn op_ill(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        self.exception(bus, ctx, ExceptionCode::Ri, 0, 0);
    }

    /// LWC1-3: no such coprocessors
    pub(crate) fn op_lwc(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.exception(bus, ctx, ExceptionCode::CpU, copno(insn), 0);
    }

    /// SWC1-3: no such coprocessors
    pub(crate) fn op_swc(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.exception(bus, ctx, ExceptionCode::CpU, copno(insn), 0);
    }

    /// COPz dispatch: MFC/MTC/CFC/CTC/BCzF/BCzT plus the cop0 full ops
    pub(crate) fn op_copz(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let cn = copno(insn);
        if cn != 0 || self.in_usermode() {
            self.exception(bus, ctx, ExceptionCode::CpU, cn, 0);
            return;
        }

        let copop = (insn >> 21) & 0x1f;
        if copop & 0x10 != 0 {
            // a real coprocessor 0 operation
            match insn & 0x01ff_ffff {
                1 => self.op_tlbr(ctx),
                2 => self.op_tlbwi(bus, ctx),
                6 => self.op_tlbwr(bus, ctx),
                8 => self.op_tlbp(ctx),
                16 => self.do_rfe(bus, ctx),
                // WAIT isn't in the r2000/r3000 set, but spinning in an
                // idle loop is just plain stupid.
                32 => self.do_wait(),
                _ => self.op_ill(bus, ctx),
            }
        } else {
            match copop {
                0 => self.op_mfc0(bus, ctx, insn),
                2 => self.op_cfc(bus, ctx, insn),
                4 => self.op_mtc0(bus, ctx, insn),
                6 => self.op_ctc(bus, ctx, insn),
                8 | 12 => self.op_bc(bus, ctx, insn),
                _ => self.op_ill(bus, ctx),
            }
        }
    }

    /// CFC0: there are no cop0 control registers
    fn op_cfc(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.exception(bus, ctx, ExceptionCode::CpU, copno(insn), 0);
    }

    /// CTC0: likewise
    fn op_ctc(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.exception(bus, ctx, ExceptionCode::CpU, copno(insn), 0);
    }

    /// BC0F/BC0T: no cop0 condition line
    fn op_bc(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let _ = simm(insn);
        self.exception(bus, ctx, ExceptionCode::CpU, copno(insn), 0);
    }

    /// MFC0: read a system register
    fn op_mfc0(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let key = regsel(rd(insn) as u32, sel(insn));
        let val = match key {
            C0_INDEX => self.get_index(),
            C0_RANDOM => self.get_random(),
            C0_TLBLO => self.tlbentry.get_lo(),
            C0_CONTEXT => self.context,
            C0_VADDR => self.vaddr,
            C0_COUNT => self.count,
            C0_TLBHI => self.tlbentry.get_hi(),
            C0_COMPARE => self.compare,
            C0_STATUS => self.get_status(),
            C0_CAUSE => self.get_cause(),
            C0_EPC => self.epc,
            C0_PRID => self.prid,
            C0_CFEAT => self.cfeat,
            C0_IFEAT => self.ifeat,
            C0_CONFIG0 => self.config0,
            C0_CONFIG1 => self.config1,
            _ => {
                self.exception(bus, ctx, ExceptionCode::Ri, 0, 0);
                return;
            }
        };
        self.set_reg(rt(insn), val);
    }

    /// MTC0: write a system register
    fn op_mtc0(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let key = regsel(rd(insn) as u32, sel(insn));
        let val = self.reg(rt(insn));
        match key {
            C0_INDEX => self.set_index(val),
            C0_RANDOM => { /* read-only */ }
            C0_TLBLO => self.tlbentry.set_lo(val),
            C0_CONTEXT => self.context = val,
            C0_VADDR => self.vaddr = val,
            C0_COUNT => self.count = val,
            C0_TLBHI => self.tlbentry.set_hi(val),
            C0_COMPARE => {
                self.compare = val;
                self.compare_used = true;
                if self.count > self.compare {
                    self.count = 0;
                }
                if self.irq_timer {
                    ctx.tracing
                        .cpu(TraceKind::Irq, self.cpunum(), format_args!("Timer irq OFF"));
                }
                self.irq_timer = false;
            }
            C0_STATUS => self.set_status(ctx, val),
            C0_CAUSE => self.set_cause(val),
            C0_EPC | C0_PRID | C0_CFEAT | C0_IFEAT => { /* read-only */ }
            // The KSEG0 coherence field of config0 is nominally
            // read/write; it stays read-only here.
            C0_CONFIG0 => { /* ignored */ }
            C0_CONFIG1 | C0_CONFIG2 | C0_CONFIG3 | C0_CONFIG4 | C0_CONFIG5 | C0_CONFIG6
            | C0_CONFIG7 => { /* read-only */ }
            _ => self.exception(bus, ctx, ExceptionCode::Ri, 0, 0),
        }
    }

    // --------------------------------------------------------------
    // TLB maintenance

    /// TLBR: read the indexed entry into entryhi/lo
    pub(crate) fn op_tlbr(&mut self, ctx: &mut BusCtx) {
        self.tlbentry = self.tlb[self.tlbindex as usize];
        ctx.tracing.cpu(
            TraceKind::Tlb,
            self.cpunum(),
            format_args!("tlbr: [{}] {}", self.tlbindex, self.tlbentry.describe()),
        );
    }

    /// TLBWI: write entryhi/lo to the indexed entry
    pub(crate) fn op_tlbwi(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        let ix = self.tlbindex as usize;
        self.write_tlb(bus, ctx, ix, "tlbwi");
    }

    /// TLBWR: write entryhi/lo to the entry named by the random register
    pub(crate) fn op_tlbwr(&mut self, bus: &mut Bus, ctx: &mut BusCtx) {
        self.tlbrandom %= RANDREG_MAX;
        let ix = (self.tlbrandom + RANDREG_OFFSET) as usize;
        self.write_tlb(bus, ctx, ix, "tlbwr");
    }

    /// TLBP: probe for an entry matching entryhi
    pub(crate) fn op_tlbp(&mut self, ctx: &mut BusCtx) {
        let vpage = self.tlbentry.vpn;
        match self.find_tlb(vpage) {
            Some(ix) => {
                ctx.tracing.cpu(
                    TraceKind::Tlb,
                    self.cpunum(),
                    format_args!("tlbp: {:05x} -> [{}]", vpage >> 12, ix),
                );
                self.tlbindex = ix as u32;
                self.tlbpf = false;
            }
            None => {
                ctx.tracing.cpu(
                    TraceKind::Tlb,
                    self.cpunum(),
                    format_args!("tlbp: {:05x} NOT FOUND", vpage >> 12),
                );
                self.tlbpf = true;
            }
        }
    }

    /// Commit a TLB write, then verify no two entries can ever match at
    /// once. A duplicate wedges the machine: on the real chip it is
    /// irretrievable.
    fn write_tlb(&mut self, bus: &mut Bus, ctx: &mut BusCtx, ix: usize, how: &str) {
        ctx.tracing.cpu(
            TraceKind::Tlb,
            self.cpunum(),
            format_args!(
                "{}: [{}] {} ==> {}",
                how,
                ix,
                self.tlb[ix].describe(),
                self.tlbentry.describe()
            ),
        );
        self.tlb[ix] = self.tlbentry;

        for i in 0..self.tlb.len() {
            if i == ix {
                continue;
            }
            if self.tlb[ix].conflicts(&self.tlb[i]) {
                log::error!("Duplicate TLB entries!");
                log::error!("New entry: index {}, {}", ix, self.tlb[ix].describe());
                log::error!("Old entry: index {}, {}", i, self.tlb[i].describe());
                ctx.control.hang(
                    ctx.clock,
                    &format!(
                        "Duplicate TLB entries for vpage {:x}",
                        self.tlb[i].vpn
                    ),
                );
                break;
            }
        }

        // If the OS coder is a lunatic the mapping for the pc might have
        // changed; if recomputing it faults, the exception machinery has
        // already done the right thing.
        let _ = self.precompute_pc(bus, ctx);
        let _ = self.precompute_nextpc(bus, ctx);
    }

    // --------------------------------------------------------------
    // CACHE

    /// CACHE: cache control.
    ///
    /// No cache is simulated, so the index/tag operations do nothing, but
    /// the permission check and the address translation for the by-address
    /// forms (and their exceptions) are real.
    pub(crate) fn op_cache(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.in_usermode() {
            self.exception(bus, ctx, ExceptionCode::CpU, 0, 0);
            return;
        }

        let addr = self.reg(rs(insn)).wrapping_add(simm(insn) as u32);
        // the rt field is an operation code, not a register number
        let op = (rt(insn) as u32) & 7;

        match op {
            0..=3 => {
                // addressed by cache index: nothing to do without a cache
            }
            _ => {
                // addressed by memory address: translate, for the fault
                // behavior
                let _ = self.translate(bus, ctx, addr, false);
            }
        }
    }
}
