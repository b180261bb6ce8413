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

//! Hardware tracing
//!
//! Nine boolean switches select which subsystems emit trace lines. They can
//! be set from the command line (`-t kujtxidne`), and toggled at run time by
//! the guest through the trace-control device.
//!
//! | Letter | Subsystem                     |
//! |--------|-------------------------------|
//! | `k`    | instructions in kernel mode   |
//! | `u`    | instructions in user mode     |
//! | `j`    | jump instructions             |
//! | `t`    | TLB operations                |
//! | `x`    | exceptions                    |
//! | `i`    | interrupts                    |
//! | `d`    | disk operations               |
//! | `n`    | network operations            |
//! | `e`    | emufs operations              |

use std::fs::File;
use std::io::{BufWriter, Write};

use crate::core::error::{EmulatorError, Result};

/// Trace subsystems, indexable by flag letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    KernelInsn,
    UserInsn,
    Jump,
    Tlb,
    Exn,
    Irq,
    Disk,
    Net,
    Emufs,
}

impl TraceKind {
    /// The flag letter naming this subsystem on the command line
    pub fn letter(self) -> char {
        match self {
            TraceKind::KernelInsn => 'k',
            TraceKind::UserInsn => 'u',
            TraceKind::Jump => 'j',
            TraceKind::Tlb => 't',
            TraceKind::Exn => 'x',
            TraceKind::Irq => 'i',
            TraceKind::Disk => 'd',
            TraceKind::Net => 'n',
            TraceKind::Emufs => 'e',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'k' => Some(TraceKind::KernelInsn),
            'u' => Some(TraceKind::UserInsn),
            'j' => Some(TraceKind::Jump),
            't' => Some(TraceKind::Tlb),
            'x' => Some(TraceKind::Exn),
            'i' => Some(TraceKind::Irq),
            'd' => Some(TraceKind::Disk),
            'n' => Some(TraceKind::Net),
            'e' => Some(TraceKind::Emufs),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            TraceKind::KernelInsn => 0,
            TraceKind::UserInsn => 1,
            TraceKind::Jump => 2,
            TraceKind::Tlb => 3,
            TraceKind::Exn => 4,
            TraceKind::Irq => 5,
            TraceKind::Disk => 6,
            TraceKind::Net => 7,
            TraceKind::Emufs => 8,
        }
    }
}

/// Trace flag state plus the output sink
///
/// With no `-f` option trace lines go to stderr; otherwise to the named
/// file. One instance is owned by the machine and threaded to the CPU and
/// devices through their context structs.
pub struct Tracing {
    flags: [bool; 9],
    sink: Option<BufWriter<File>>,
}

impl Tracing {
    pub fn new() -> Self {
        Tracing {
            flags: [false; 9],
            sink: None,
        }
    }

    /// Redirect trace output to a file
    pub fn set_tracefile(&mut self, path: &str) -> Result<()> {
        let f = File::create(path)
            .map_err(|e| EmulatorError::io(format!("Cannot open tracefile {}", path), e))?;
        self.sink = Some(BufWriter::new(f));
        Ok(())
    }

    /// Turn on the flags named by `letters` (command-line `-t`)
    pub fn set_flags(&mut self, letters: &str) -> Result<()> {
        for c in letters.chars() {
            let kind = TraceKind::from_letter(c)
                .ok_or_else(|| EmulatorError::Config(format!("Unknown trace flag `{}'", c)))?;
            self.flags[kind.index()] = true;
        }
        Ok(())
    }

    /// Turn one flag on or off; `Err` if the code is not a flag letter.
    ///
    /// This is the guest-facing interface used by the trace-control device,
    /// which passes the flag letter as a register value.
    pub fn adjust_flag(&mut self, code: u32, on: bool) -> std::result::Result<(), ()> {
        let c = char::from_u32(code).ok_or(())?;
        let kind = TraceKind::from_letter(c).ok_or(())?;
        self.flags[kind.index()] = on;
        Ok(())
    }

    /// Is this subsystem being traced?
    #[inline]
    pub fn active(&self, kind: TraceKind) -> bool {
        self.flags[kind.index()]
    }

    /// Emit one hardware trace line
    pub fn hw(&mut self, kind: TraceKind, args: std::fmt::Arguments<'_>) {
        if !self.active(kind) {
            return;
        }
        self.emit(format_args!("trace: {}", args));
    }

    /// Emit one per-CPU trace line
    pub fn cpu(&mut self, kind: TraceKind, cpunum: usize, args: std::fmt::Arguments<'_>) {
        if !self.active(kind) {
            return;
        }
        self.emit(format_args!("trace: cpu{}: {}", cpunum, args));
    }

    fn emit(&mut self, args: std::fmt::Arguments<'_>) {
        match &mut self.sink {
            Some(w) => {
                let _ = writeln!(w, "{}", args);
            }
            None => {
                eprintln!("{}", args);
            }
        }
    }

    /// Describe the current flag settings
    pub fn describe(&self) -> String {
        let all = [
            TraceKind::KernelInsn,
            TraceKind::UserInsn,
            TraceKind::Jump,
            TraceKind::Tlb,
            TraceKind::Exn,
            TraceKind::Irq,
            TraceKind::Disk,
            TraceKind::Net,
            TraceKind::Emufs,
        ];
        let mut s = String::new();
        for kind in all {
            if self.active(kind) {
                s.push(kind.letter());
            }
        }
        if s.is_empty() {
            "none".into()
        } else {
            s
        }
    }

    /// Flush the trace file, if any
    pub fn flush(&mut self) {
        if let Some(w) = &mut self.sink {
            let _ = w.flush();
        }
    }
}

impl Default for Tracing {
    fn default() -> Self {
        Self::new()
    }
}
