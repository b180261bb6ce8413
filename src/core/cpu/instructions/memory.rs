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

//! Loads and stores, including the unaligned LWL/LWR/SWL/SWR pairs and
//! the LL/SC synchronization pair.
//!
//! When a memory operation takes an exception the destination register
//! is left untouched; handlers only commit results on success.

use super::super::decode::{rs, rt, simm};
use super::super::{MemStyle, MipsCpu};
use crate::core::bus::{Bus, BusCtx};

impl MipsCpu {
    /// Effective address: base register plus sign-extended displacement
    #[inline(always)]
    fn ea(&self, insn: u32) -> u32 {
        self.reg(rs(insn)).wrapping_add(simm(insn) as u32)
    }

    /// LB: load byte, sign-extended
    pub(crate) fn op_lb(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        if let Ok(val) = self.do_load(bus, ctx, MemStyle::SByte, addr, 0) {
            self.set_reg(rt(insn), val);
        }
    }

    /// LBU: load byte, zero-extended
    pub(crate) fn op_lbu(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        if let Ok(val) = self.do_load(bus, ctx, MemStyle::UByte, addr, 0) {
            self.set_reg(rt(insn), val);
        }
    }

    /// LH: load halfword, sign-extended
    pub(crate) fn op_lh(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        if let Ok(val) = self.do_load(bus, ctx, MemStyle::SHalf, addr, 0) {
            self.set_reg(rt(insn), val);
        }
    }

    /// LHU: load halfword, zero-extended
    pub(crate) fn op_lhu(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        if let Ok(val) = self.do_load(bus, ctx, MemStyle::UHalf, addr, 0) {
            self.set_reg(rt(insn), val);
        }
    }

    /// LW: load word
    pub(crate) fn op_lw(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        if let Ok(val) = self.mem_read(bus, ctx, addr, false) {
            self.set_reg(rt(insn), val);
        }
    }

    /// LWL: load word left (merges the high-order part)
    pub(crate) fn op_lwl(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        let cur = self.reg(rt(insn));
        if let Ok(val) = self.do_load(bus, ctx, MemStyle::WordL, addr, cur) {
            self.set_reg(rt(insn), val);
        }
    }

    /// LWR: load word right (merges the low-order part)
    pub(crate) fn op_lwr(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        let cur = self.reg(rt(insn));
        if let Ok(val) = self.do_load(bus, ctx, MemStyle::WordR, addr, cur) {
            self.set_reg(rt(insn), val);
        }
    }

    /// SB: store byte
    pub(crate) fn op_sb(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        let val = self.reg(rt(insn));
        let _ = self.do_store(bus, ctx, MemStyle::UByte, addr, val);
    }

    /// SH: store halfword
    pub(crate) fn op_sh(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        let val = self.reg(rt(insn));
        let _ = self.do_store(bus, ctx, MemStyle::UHalf, addr, val);
    }

    /// SW: store word
    pub(crate) fn op_sw(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        let val = self.reg(rt(insn));
        let _ = self.mem_write(bus, ctx, addr, val);
    }

    /// SWL: store word left
    pub(crate) fn op_swl(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        let val = self.reg(rt(insn));
        let _ = self.do_store(bus, ctx, MemStyle::WordL, addr, val);
    }

    /// SWR: store word right
    pub(crate) fn op_swr(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        let val = self.reg(rt(insn));
        let _ = self.do_store(bus, ctx, MemStyle::WordR, addr, val);
    }

    /// LL: load linked. Records the address and the loaded value; SC
    /// checks both.
    pub(crate) fn op_ll(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);
        match self.mem_read(bus, ctx, addr, false) {
            Ok(val) => {
                self.set_reg(rt(insn), val);
                self.ll_active = true;
                self.ll_addr = addr;
                self.ll_value = val;
                ctx.stats.percpu[self.cpunum()].lls += 1;
            }
            Err(()) => { /* exception */ }
        }
    }

    /// SC: store conditional.
    ///
    /// Succeeds iff an LL is active, the address matches the LL, and the
    /// value at that address still equals what LL read. If the target
    /// still holds the LL'd value, execution is indistinguishable from an
    /// atomic read-modify-write performed now, even if the location was
    /// written in between; other ways of telling the difference make the
    /// SC formally unpredictable, so this check suffices.
    pub(crate) fn op_sc(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let addr = self.ea(insn);

        let ok = 'check: {
            if !self.ll_active || self.ll_addr != addr {
                break 'check false;
            }
            let temp = match self.mem_read(bus, ctx, addr, true) {
                Ok(v) => v,
                Err(()) => return, // exception
            };
            if temp != self.ll_value {
                break 'check false;
            }
            let val = self.reg(rt(insn));
            if self.mem_write(bus, ctx, addr, val).is_err() {
                return; // exception
            }
            true
        };

        if ok {
            self.set_reg(rt(insn), 1);
            ctx.stats.percpu[self.cpunum()].okscs += 1;
        } else {
            self.set_reg(rt(insn), 0);
            ctx.stats.percpu[self.cpunum()].badscs += 1;
        }
    }
}
