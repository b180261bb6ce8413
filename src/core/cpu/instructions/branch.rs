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

//! Conditional branches
//!
//! Branch displacements are signed word offsets relative to the delay
//! slot. The and-link variants write the link register whether or not
//! the branch is taken.

use super::super::decode::{rs, rt, simm};
use super::super::MipsCpu;
use crate::core::bus::{Bus, BusCtx};

impl MipsCpu {
    /// BEQ: branch if equal
    pub(crate) fn op_beq(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.reg(rs(insn)) == self.reg(rt(insn)) {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }

    /// BNE: branch if not equal
    pub(crate) fn op_bne(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.reg(rs(insn)) != self.reg(rt(insn)) {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }

    /// BLEZ: branch if less than or equal to zero
    pub(crate) fn op_blez(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.reg(rs(insn)) as i32 <= 0 {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }

    /// BGTZ: branch if greater than zero
    pub(crate) fn op_bgtz(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.reg(rs(insn)) as i32 > 0 {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }

    /// BLTZ: branch if less than zero
    pub(crate) fn op_bltz(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if (self.reg(rs(insn)) as i32) < 0 {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }

    /// BGEZ: branch if greater than or equal to zero
    pub(crate) fn op_bgez(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        if self.reg(rs(insn)) as i32 >= 0 {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }

    /// BLTZAL: branch if less than zero and link
    pub(crate) fn op_bltzal(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.link(31);
        if (self.reg(rs(insn)) as i32) < 0 {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }

    /// BGEZAL: branch if greater than or equal to zero and link
    pub(crate) fn op_bgezal(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.link(31);
        if self.reg(rs(insn)) as i32 >= 0 {
            self.rbranch(bus, ctx, simm(insn) << 2);
        }
    }
}
