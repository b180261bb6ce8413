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

//! Software-managed TLB entries
//!
//! Each of the 64 entries maps one 4 KiB virtual page to a physical page
//! for one address space (or globally). Entries are staged through the
//! entryhi/entrylo register pair and written with TLBWI/TLBWR.

const TLBLO_GLOBAL: u32 = 0x0000_0100;
const TLBLO_VALID: u32 = 0x0000_0200;
const TLBLO_DIRTY: u32 = 0x0000_0400;
const TLBLO_NOCACHE: u32 = 0x0000_0800;
const TLBHI_PID: u32 = 0x0000_0fc0;
const TLB_PAGEFRAME: u32 = 0xffff_f000;

/// One TLB entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// Translation matches regardless of address-space id
    pub global: bool,
    /// Translation is valid for use
    pub valid: bool,
    /// Write enable
    pub dirty: bool,
    /// Cache disable
    pub nocache: bool,
    /// Page number part of the physical address
    pub pfn: u32,
    /// Page number part of the virtual address
    pub vpn: u32,
    /// Address space id
    pub pid: u32,
}

impl TlbEntry {
    /// The MIPS doesn't clear the TLB on reset; initialize each entry to
    /// a distinct unmatchable page so no two entries collide.
    pub fn reset(index: usize) -> Self {
        TlbEntry {
            global: false,
            valid: false,
            dirty: false,
            nocache: false,
            pfn: 0,
            vpn: 0x8100_0000 + (index as u32) * 0x1000,
            pid: 0,
        }
    }

    /// Compose the entrylo register value
    pub fn get_lo(&self) -> u32 {
        let mut val = self.pfn;
        if self.global {
            val |= TLBLO_GLOBAL;
        }
        if self.valid {
            val |= TLBLO_VALID;
        }
        if self.dirty {
            val |= TLBLO_DIRTY;
        }
        if self.nocache {
            val |= TLBLO_NOCACHE;
        }
        val
    }

    /// Compose the entryhi register value
    pub fn get_hi(&self) -> u32 {
        self.vpn | (self.pid << 6)
    }

    pub fn set_lo(&mut self, val: u32) {
        self.global = val & TLBLO_GLOBAL != 0;
        self.valid = val & TLBLO_VALID != 0;
        self.dirty = val & TLBLO_DIRTY != 0;
        self.nocache = val & TLBLO_NOCACHE != 0;
        self.pfn = val & TLB_PAGEFRAME;
    }

    pub fn set_hi(&mut self, val: u32) {
        self.vpn = val & TLB_PAGEFRAME;
        self.pid = (val & TLBHI_PID) >> 6;
    }

    /// Would this entry and another ever match the same lookup at once?
    /// True if they name the same virtual page and either is global or
    /// they share an address-space id. Valid bits don't matter:
    /// translations that are not valid are still accessed.
    pub fn conflicts(&self, other: &TlbEntry) -> bool {
        self.vpn == other.vpn && (self.global || other.global || self.pid == other.pid)
    }

    /// One-line rendering for diagnostics
    pub fn describe(&self) -> String {
        format!(
            "vpn 0x{:08x}, {}, ppn 0x{:08x} ({}{}{})",
            self.vpn,
            if self.global {
                "global".to_string()
            } else {
                format!("pid {}", self.pid)
            },
            self.pfn,
            if self.valid { "V" } else { "-" },
            if self.dirty { "D" } else { "-" },
            if self.nocache { "N" } else { "-" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lo_roundtrip() {
        let mut e = TlbEntry::reset(0);
        e.set_lo(0x0001_2000 | TLBLO_VALID | TLBLO_DIRTY);
        assert!(e.valid);
        assert!(e.dirty);
        assert!(!e.global);
        assert_eq!(e.pfn, 0x0001_2000);
        assert_eq!(e.get_lo(), 0x0001_2000 | TLBLO_VALID | TLBLO_DIRTY);
    }

    #[test]
    fn test_hi_roundtrip() {
        let mut e = TlbEntry::reset(0);
        e.set_hi(0x4000_0000 | (3 << 6));
        assert_eq!(e.vpn, 0x4000_0000);
        assert_eq!(e.pid, 3);
        assert_eq!(e.get_hi(), 0x4000_0000 | (3 << 6));
    }

    #[test]
    fn test_sub_page_bits_masked() {
        let mut e = TlbEntry::reset(0);
        e.set_hi(0x4000_0abc);
        assert_eq!(e.vpn, 0x4000_0000);
        e.set_lo(0x0001_2fff);
        assert_eq!(e.pfn, 0x0001_2000);
    }

    #[test]
    fn test_reset_entries_do_not_conflict() {
        let a = TlbEntry::reset(0);
        let b = TlbEntry::reset(1);
        assert!(!a.conflicts(&b));
    }

    #[test]
    fn test_conflict_rules() {
        let mut a = TlbEntry::reset(0);
        let mut b = TlbEntry::reset(1);
        a.vpn = 0x4000_0000;
        b.vpn = 0x4000_0000;
        a.pid = 1;
        b.pid = 2;
        // same page, different pids, neither global: no conflict
        assert!(!a.conflicts(&b));
        // same pid: conflict
        b.pid = 1;
        assert!(a.conflicts(&b));
        // one global: conflict regardless of pid
        b.pid = 2;
        b.global = true;
        assert!(a.conflicts(&b));
        // invalid entries still conflict
        a.valid = false;
        b.valid = false;
        assert!(a.conflicts(&b));
    }
}
