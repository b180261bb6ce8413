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

//! Unconditional jumps, all with a delay slot

use super::super::decode::{rd, rs, target};
use super::super::MipsCpu;
use crate::core::bus::{Bus, BusCtx};

impl MipsCpu {
    /// J: jump within the current 256 MiB region
    pub(crate) fn op_j(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.ibranch(bus, ctx, target(insn) << 2);
    }

    /// JAL: jump and link through r31
    pub(crate) fn op_jal(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.link(31);
        self.ibranch(bus, ctx, target(insn) << 2);
    }

    /// JR: jump to register
    pub(crate) fn op_jr(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        self.abranch(bus, ctx, self.reg(rs(insn)));
    }

    /// JALR: jump to register and link through rd
    pub(crate) fn op_jalr(&mut self, bus: &mut Bus, ctx: &mut BusCtx, insn: u32) {
        let dest = self.reg(rs(insn));
        self.link(rd(insn));
        self.abranch(bus, ctx, dest);
    }
}
