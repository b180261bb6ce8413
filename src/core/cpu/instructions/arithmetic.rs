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

//! Arithmetic and comparison instructions

use super::super::decode::{imm, rd, rs, rt, simm};
use super::super::{ExceptionCode, MipsCpu};
use crate::core::bus::{Bus, BusCtx};

impl MipsCpu {
    /// ADD: add with overflow trap
    ///
    /// The sum is formed in 64 bits; if it doesn't fit a signed 32-bit
    /// value the destination is left alone and an overflow exception is
    /// delivered.
    pub(crate) fn op_add(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let t64 = self.reg(rs(insn)) as i32 as i64 + self.reg(rt(insn)) as i32 as i64;
        if t64 != t64 as i32 as i64 {
            self.exception(bus, ctx, ExceptionCode::Ovf, 0, 0);
            return;
        }
        self.set_reg(rd(insn), t64 as i32 as u32);
    }

    /// ADDI: add sign-extended immediate with overflow trap
    pub(crate) fn op_addi(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let t64 = self.reg(rs(insn)) as i32 as i64 + simm(insn) as i64;
        if t64 != t64 as i32 as i64 {
            self.exception(bus, ctx, ExceptionCode::Ovf, 0, 0);
            return;
        }
        self.set_reg(rt(insn), t64 as i32 as u32);
    }

    /// ADDIU: add immediate, no trap. Must add as unsigned or the
    /// wraparound behavior would be undefined.
    pub(crate) fn op_addiu(&mut self, insn: u32) {
        let val = self.reg(rs(insn)).wrapping_add(simm(insn) as u32);
        self.set_reg(rt(insn), val);
    }

    /// ADDU: add, no trap
    pub(crate) fn op_addu(&mut self, insn: u32) {
        let val = self.reg(rs(insn)).wrapping_add(self.reg(rt(insn)));
        self.set_reg(rd(insn), val);
    }

    /// SUB: subtract with overflow trap
    pub(crate) fn op_sub(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let t64 = self.reg(rs(insn)) as i32 as i64 - self.reg(rt(insn)) as i32 as i64;
        if t64 != t64 as i32 as i64 {
            self.exception(bus, ctx, ExceptionCode::Ovf, 0, 0);
            return;
        }
        self.set_reg(rd(insn), t64 as i32 as u32);
    }

    /// SUBU: subtract, no trap
    pub(crate) fn op_subu(&mut self, insn: u32) {
        let val = self.reg(rs(insn)).wrapping_sub(self.reg(rt(insn)));
        self.set_reg(rd(insn), val);
    }

    /// SLT: set on less than, signed
    pub(crate) fn op_slt(&mut self, insn: u32) {
        let val = ((self.reg(rs(insn)) as i32) < (self.reg(rt(insn)) as i32)) as u32;
        self.set_reg(rd(insn), val);
    }

    /// SLTI: set on less than immediate, signed
    pub(crate) fn op_slti(&mut self, insn: u32) {
        let val = ((self.reg(rs(insn)) as i32) < simm(insn)) as u32;
        self.set_reg(rt(insn), val);
    }

    /// SLTIU: set on less than immediate, unsigned.
    ///
    /// Yes: the immediate is sign-extended and then treated as unsigned.
    pub(crate) fn op_sltiu(&mut self, insn: u32) {
        let val = (self.reg(rs(insn)) < simm(insn) as u32) as u32;
        self.set_reg(rt(insn), val);
    }

    /// SLTU: set on less than, unsigned
    pub(crate) fn op_sltu(&mut self, insn: u32) {
        let val = (self.reg(rs(insn)) < self.reg(rt(insn))) as u32;
        self.set_reg(rd(insn), val);
    }

    /// LUI: load upper immediate
    pub(crate) fn op_lui(&mut self, insn: u32) {
        self.set_reg(rt(insn), imm(insn) << 16);
    }
}
