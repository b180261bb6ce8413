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

//! Bitwise logical instructions

use super::super::decode::{imm, rd, rs, rt};
use super::super::MipsCpu;

impl MipsCpu {
    pub(crate) fn op_and(&mut self, insn: u32) {
        let val = self.reg(rs(insn)) & self.reg(rt(insn));
        self.set_reg(rd(insn), val);
    }

    /// ANDI: the immediate is zero-extended for the logical ops
    pub(crate) fn op_andi(&mut self, insn: u32) {
        let val = self.reg(rs(insn)) & imm(insn);
        self.set_reg(rt(insn), val);
    }

    pub(crate) fn op_or(&mut self, insn: u32) {
        let val = self.reg(rs(insn)) | self.reg(rt(insn));
        self.set_reg(rd(insn), val);
    }

    pub(crate) fn op_ori(&mut self, insn: u32) {
        let val = self.reg(rs(insn)) | imm(insn);
        self.set_reg(rt(insn), val);
    }

    pub(crate) fn op_xor(&mut self, insn: u32) {
        let val = self.reg(rs(insn)) ^ self.reg(rt(insn));
        self.set_reg(rd(insn), val);
    }

    pub(crate) fn op_xori(&mut self, insn: u32) {
        let val = self.reg(rs(insn)) ^ imm(insn);
        self.set_reg(rt(insn), val);
    }

    pub(crate) fn op_nor(&mut self, insn: u32) {
        let val = !(self.reg(rs(insn)) | self.reg(rt(insn)));
        self.set_reg(rd(insn), val);
    }
}
