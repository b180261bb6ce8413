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

//! Hardware counters reported at simulator exit and over the metering
//! socket.

/// Per-CPU execution counters
#[derive(Debug, Clone, Copy, Default)]
pub struct PerCpuStats {
    /// Kernel mode cycles
    pub kcycles: u64,
    /// User mode cycles
    pub ucycles: u64,
    /// Idle cycles
    pub icycles: u64,
    /// Kernel mode instructions retired
    pub kretired: u64,
    /// User mode instructions retired
    pub uretired: u64,
    /// LL instructions executed
    pub lls: u64,
    /// Successful SC instructions
    pub okscs: u64,
    /// Failed SC instructions
    pub badscs: u64,
    /// SYNC instructions
    pub syncs: u64,
}

/// Machine-wide counters
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Cycles with at least one CPU running
    pub tot_rcycles: u64,
    /// Cycles when fully idle
    pub tot_icycles: u64,
    /// Per-CPU counters
    pub percpu: Vec<PerCpuStats>,
    /// Total interrupts delivered
    pub irqs: u32,
    /// Total non-interrupt exceptions delivered
    pub exns: u32,
    /// Disk sectors read
    pub rsects: u32,
    /// Disk sectors written
    pub wsects: u32,
    /// Console characters read
    pub rchars: u32,
    /// Console characters written
    pub wchars: u32,
    /// Emufs reads
    pub remu: u32,
    /// Emufs writes
    pub wemu: u32,
    /// Emufs other operations
    pub memu: u32,
    /// Network packets received
    pub rpkts: u32,
    /// Network packets sent
    pub wpkts: u32,
    /// Network packets dropped (receiver overrun)
    pub dpkts: u32,
    /// Network framing/length errors
    pub epkts: u32,
}

impl Stats {
    /// Create counters for `ncpus` processors, all zeroed
    pub fn new(ncpus: usize) -> Self {
        Stats {
            percpu: vec![PerCpuStats::default(); ncpus],
            ..Default::default()
        }
    }

    /// Print the end-of-run report and return the total cycle count
    pub fn report(&self) -> u64 {
        let totcycles = self.tot_rcycles + self.tot_icycles;
        println!(
            "{} cycles ({} run, {} global-idle)",
            totcycles, self.tot_rcycles, self.tot_icycles
        );
        for (i, p) in self.percpu.iter().enumerate() {
            println!(
                "  cpu{}: {} kern, {} user, {} idle; {} ll, {}/{} sc, {} sync",
                i, p.kcycles, p.ucycles, p.icycles, p.lls, p.okscs, p.badscs, p.syncs
            );
        }
        println!(
            "{} irqs {} exns {}r/{}w disk {}r/{}w console {}r/{}w/{}m emufs {}r/{}w net",
            self.irqs,
            self.exns,
            self.rsects,
            self.wsects,
            self.rchars,
            self.wchars,
            self.remu,
            self.wemu,
            self.memu,
            self.rpkts,
            self.wpkts
        );
        totcycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new_sizes_percpu() {
        let s = Stats::new(4);
        assert_eq!(s.percpu.len(), 4);
        assert_eq!(s.tot_rcycles, 0);
    }

    #[test]
    fn test_stats_report_total() {
        let mut s = Stats::new(1);
        s.tot_rcycles = 100;
        s.tot_icycles = 50;
        assert_eq!(s.report(), 150);
    }
}
