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

//! Shift instructions. The variable forms use only the low five bits of
//! the shift-amount register.

use super::super::decode::{rd, rs, rt, shamt};
use super::super::MipsCpu;

impl MipsCpu {
    pub(crate) fn op_sll(&mut self, insn: u32) {
        let val = self.reg(rt(insn)) << shamt(insn);
        self.set_reg(rd(insn), val);
    }

    pub(crate) fn op_srl(&mut self, insn: u32) {
        let val = self.reg(rt(insn)) >> shamt(insn);
        self.set_reg(rd(insn), val);
    }

    /// SRA: arithmetic right shift (sign bits shift in)
    pub(crate) fn op_sra(&mut self, insn: u32) {
        let val = ((self.reg(rt(insn)) as i32) >> shamt(insn)) as u32;
        self.set_reg(rd(insn), val);
    }

    pub(crate) fn op_sllv(&mut self, insn: u32) {
        let sh = self.reg(rs(insn)) & 31;
        let val = self.reg(rt(insn)) << sh;
        self.set_reg(rd(insn), val);
    }

    pub(crate) fn op_srlv(&mut self, insn: u32) {
        let sh = self.reg(rs(insn)) & 31;
        let val = self.reg(rt(insn)) >> sh;
        self.set_reg(rd(insn), val);
    }

    pub(crate) fn op_srav(&mut self, insn: u32) {
        let sh = self.reg(rs(insn)) & 31;
        let val = ((self.reg(rt(insn)) as i32) >> sh) as u32;
        self.set_reg(rd(insn), val);
    }
}
