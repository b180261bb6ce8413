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

//! Multiply/divide unit and the hi/lo registers
//!
//! The unit runs decoupled from the main pipeline: results land in hi/lo
//! with a ready countdown, and touching a busy register stalls the
//! instruction (it re-executes next cycle until the countdown drains).

use super::super::decode::{rd, rs, rt};
use super::super::MipsCpu;
use crate::core::bus::{Bus, BusCtx};

impl MipsCpu {
    /// Stall on a busy hi or lo: back the PC up so this instruction
    /// re-executes next cycle.
    fn hilo_stall(&mut self, bus: &mut Bus, ctx: &mut BusCtx) -> bool {
        if self.hiwait > 0 || self.lowait > 0 {
            self.phony_exception(bus, ctx);
            return true;
        }
        false
    }

    fn hi_stall(&mut self, bus: &mut Bus, ctx: &mut BusCtx) -> bool {
        if self.hiwait > 0 {
            self.phony_exception(bus, ctx);
            return true;
        }
        false
    }

    fn lo_stall(&mut self, bus: &mut Bus, ctx: &mut BusCtx) -> bool {
        if self.lowait > 0 {
            self.phony_exception(bus, ctx);
            return true;
        }
        false
    }

    /// MULT: signed 32x32 -> 64 multiply into hi/lo
    pub(crate) fn op_mult(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.hilo_stall(bus, ctx) {
            return;
        }
        let t64 = (self.reg(rs(insn)) as i32 as i64) * (self.reg(rt(insn)) as i32 as i64);
        self.hi = (t64 as u64 >> 32) as u32;
        self.lo = t64 as u64 as u32;
        self.hiwait = 2;
        self.lowait = 2;
    }

    /// MULTU: unsigned multiply into hi/lo
    pub(crate) fn op_multu(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.hilo_stall(bus, ctx) {
            return;
        }
        let t64 = (self.reg(rs(insn)) as u64) * (self.reg(rt(insn)) as u64);
        self.hi = (t64 >> 32) as u32;
        self.lo = t64 as u32;
        self.hiwait = 2;
        self.lowait = 2;
    }

    /// DIV: signed divide, quotient in lo, remainder in hi.
    ///
    /// Divide-by-zero doesn't trap on MIPS (the assembler emits an
    /// explicit check that runs in parallel with the divide unit); the
    /// result registers get an excuse for machine infinity.
    pub(crate) fn op_div(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.hilo_stall(bus, ctx) {
            return;
        }
        let a = self.reg(rs(insn)) as i32;
        let b = self.reg(rt(insn)) as i32;
        if b == 0 {
            self.lo = if a < 0 { 0xffff_ffff } else { 0x7fff_ffff };
            self.hi = 0;
        } else {
            self.lo = a.wrapping_div(b) as u32;
            self.hi = a.wrapping_rem(b) as u32;
        }
        self.hiwait = 2;
        self.lowait = 2;
    }

    /// DIVU: unsigned divide
    pub(crate) fn op_divu(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.hilo_stall(bus, ctx) {
            return;
        }
        let a = self.reg(rs(insn));
        let b = self.reg(rt(insn));
        if b == 0 {
            self.lo = 0xffff_ffff;
            self.hi = 0;
        } else {
            self.lo = a / b;
            self.hi = a % b;
        }
        self.hiwait = 2;
        self.lowait = 2;
    }

    /// MFHI: move from hi (stalls while hi is busy, then busies it again
    /// briefly, as the hardware interlock does)
    pub(crate) fn op_mfhi(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.hi_stall(bus, ctx) {
            return;
        }
        self.set_reg(rd(insn), self.hi);
        self.hiwait = 2;
    }

    /// MTHI: move to hi
    pub(crate) fn op_mthi(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.hi_stall(bus, ctx) {
            return;
        }
        self.hi = self.reg(rs(insn));
        self.hiwait = 2;
    }

    /// MFLO: move from lo
    pub(crate) fn op_mflo(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.lo_stall(bus, ctx) {
            return;
        }
        self.set_reg(rd(insn), self.lo);
        self.lowait = 2;
    }

    /// MTLO: move to lo
    pub(crate) fn op_mtlo(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.lo_stall(bus, ctx) {
            return;
        }
        self.lo = self.reg(rs(insn));
        self.lowait = 2;
    }
}
