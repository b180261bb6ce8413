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

//! Bus controller registers (the "mainboard")
//!
//! The controller occupies slot 31. The low 32 KiB of its window is a
//! config region: 32 per-slot areas of 1 KiB each exposing vendor/device/
//! revision of the occupant, with the controller's own registers sitting
//! in its area. The high 32 KiB is 32 per-CPU areas of 1 KiB each, with
//! the CPU interrupt-enable mask, the IPI bit, and a 128-byte scratch area
//! (CRAM) used to hand the boot entry point and stack to secondary CPUs.
//!
//! The `oldmainboard` (`busctl`) variant is the uniprocessor controller:
//! it has no per-CPU region and no CPUS/CPUE/SELF registers, and reading
//! its power register wedges the machine like real broken hardware.

use super::{BusCtx, BusError, IrqController, CONTROLLER_SLOT};
use crate::core::clock::{EventKind, POWEROFF_NSECS};
use crate::core::system::CpuAction;

// Per-slot config registers
const CONFIG_VENDORID: u32 = 0x0;
const CONFIG_DEVICEID: u32 = 0x4;
const CONFIG_REVISION: u32 = 0x8;

// Controller registers, within the controller's own config area
const CTL_RAMSIZE: u32 = 0x200;
const CTL_IRQS: u32 = 0x204;
const CTL_POWER: u32 = 0x208;
const CTL_IRQE: u32 = 0x20c;
const CTL_CPUS: u32 = 0x210;
const CTL_CPUE: u32 = 0x214;
const CTL_SELF: u32 = 0x218;

// Per-CPU control registers
const CPU_CIRQE: u32 = 0x0;
const CPU_CIPI: u32 = 0x4;

// Per-CPU scratch area
pub const CRAM_START: u32 = 0x300;
pub const CRAM_END: u32 = 0x400;

/// Where the per-CPU regions start within the controller window
pub const PERCPU_BASE: u32 = 32768;

/// Split an offset into a 32 KiB half-window into (region, offset within
/// region). Works for both CPU regions and config regions, which are the
/// same size.
fn region_of(offset: u32) -> (usize, u32) {
    let region = (offset / super::CONFIG_SIZE) as usize;
    debug_assert!(region < super::NSLOTS);
    (region, offset % super::CONFIG_SIZE)
}

fn fetch_cpu(irq: &IrqController, offset: u32) -> Result<u32, BusError> {
    let (region, offset) = region_of(offset);
    if region >= irq.cpus.len() {
        return Err(BusError);
    }
    let cpu = &irq.cpus[region];

    if (CRAM_START..CRAM_END).contains(&offset) {
        let off = (offset - CRAM_START) as usize;
        return Ok(u32::from_be_bytes([
            cpu.cram[off],
            cpu.cram[off + 1],
            cpu.cram[off + 2],
            cpu.cram[off + 3],
        ]));
    }

    match offset {
        CPU_CIRQE => Ok(cpu.enabled_irqs),
        CPU_CIPI => Ok(if cpu.ipi { 0xffff_ffff } else { 0 }),
        _ => Err(BusError),
    }
}

fn store_cpu(irq: &mut IrqController, offset: u32, val: u32) -> Result<(), BusError> {
    let (region, offset) = region_of(offset);
    if region >= irq.cpus.len() {
        return Err(BusError);
    }

    if (CRAM_START..CRAM_END).contains(&offset) {
        let off = (offset - CRAM_START) as usize;
        irq.cpus[region].cram[off..off + 4].copy_from_slice(&val.to_be_bytes());
        return Ok(());
    }

    match offset {
        CPU_CIRQE => {
            irq.cpus[region].enabled_irqs = val;
            irq.set_enabled(irq.enabled()); // re-evaluate all lines
            Ok(())
        }
        CPU_CIPI => {
            irq.cpus[region].ipi = val != 0;
            Ok(())
        }
        _ => Err(BusError),
    }
}

fn fetch_config(
    old: bool,
    irq: &IrqController,
    ctx: &mut BusCtx,
    ramsize: u32,
    cpunum: usize,
    offset: u32,
    ids: impl Fn(usize) -> (u32, u32, u32),
) -> Result<u32, BusError> {
    let (region, offset) = region_of(offset);
    let (vendor, device, revision) = ids(region);

    match offset {
        CONFIG_VENDORID => return Ok(vendor),
        CONFIG_DEVICEID => return Ok(device),
        CONFIG_REVISION => return Ok(revision),
        _ => {}
    }

    if region != CONTROLLER_SLOT {
        return Err(BusError);
    }

    let ncpus = irq.cpus.len();
    match offset {
        CTL_RAMSIZE => Ok(ramsize),
        CTL_IRQS => Ok(irq.raised()),
        CTL_POWER => {
            if old {
                ctx.control.hang(
                    ctx.clock,
                    "Read from bus controller power register",
                );
                Ok(0)
            } else {
                Ok(0xffff_ffff)
            }
        }
        CTL_IRQE => Ok(irq.enabled()),
        CTL_CPUS => {
            if old {
                return Err(BusError);
            }
            if ncpus == 32 {
                Ok(0xffff_ffff)
            } else {
                Ok((1u32 << ncpus) - 1)
            }
        }
        CTL_CPUE => {
            if old {
                return Err(BusError);
            }
            let mut mask = 0;
            for (i, cpu) in irq.cpus.iter().enumerate() {
                if cpu.enabled {
                    mask |= 1u32 << i;
                }
            }
            Ok(mask)
        }
        CTL_SELF => {
            if old {
                return Err(BusError);
            }
            Ok(1u32 << cpunum)
        }
        _ => Err(BusError),
    }
}

fn store_config(
    old: bool,
    irq: &mut IrqController,
    ctx: &mut BusCtx,
    offset: u32,
    val: u32,
) -> Result<(), BusError> {
    let (region, offset) = region_of(offset);
    if region != CONTROLLER_SLOT {
        return Err(BusError);
    }

    match offset {
        CTL_POWER => {
            if val == 0 {
                ctx.clock
                    .schedule(POWEROFF_NSECS, 0, EventKind::Poweroff, "poweroff");
            } else if !old && (val & 0x8000_0000) == 0 {
                // switched off the mainboard but left other devices on
                ctx.control.hang(ctx.clock, "Invalid power state");
            }
            Ok(())
        }
        CTL_IRQE => {
            irq.set_enabled(val);
            Ok(())
        }
        CTL_CPUE => {
            if old {
                return Err(BusError);
            }
            set_cpue(irq, ctx, val);
            Ok(())
        }
        _ => Err(BusError),
    }
}

/// Apply a write to the CPU-enable register.
///
/// Turning a CPU off drops it in its tracks. Turning one on starts it
/// with the PC and argument loaded from the bottom of its CRAM and the
/// stack pointed at the top of CRAM; the CPU-side state change is queued
/// for the machine to apply at the cycle boundary.
fn set_cpue(irq: &mut IrqController, ctx: &mut BusCtx, val: u32) {
    for i in 0..irq.cpus.len() {
        let bit = val & (1u32 << i) != 0;
        let cpu = &mut irq.cpus[i];
        if cpu.enabled && !bit {
            cpu.enabled = false;
            ctx.control.cpu_actions.push(CpuAction::Disable(i));
        } else if !cpu.enabled && bit {
            cpu.enabled = true;
            ctx.control.cpu_actions.push(CpuAction::Enable(i));
        }
    }
}

/// Fetch from the controller window
pub fn fetch(
    old: bool,
    irq: &IrqController,
    ctx: &mut BusCtx,
    ramsize: u32,
    cpunum: usize,
    offset: u32,
    ids: impl Fn(usize) -> (u32, u32, u32),
) -> Result<u32, BusError> {
    if offset >= PERCPU_BASE {
        if old {
            return Err(BusError);
        }
        fetch_cpu(irq, offset - PERCPU_BASE)
    } else {
        fetch_config(old, irq, ctx, ramsize, cpunum, offset, ids)
    }
}

/// Store to the controller window
pub fn store(
    old: bool,
    irq: &mut IrqController,
    ctx: &mut BusCtx,
    offset: u32,
    val: u32,
) -> Result<(), BusError> {
    if offset >= PERCPU_BASE {
        if old {
            return Err(BusError);
        }
        store_cpu(irq, offset - PERCPU_BASE, val)
    } else {
        store_config(old, irq, ctx, offset, val)
    }
}

/// Dump controller state
pub fn dump(old: bool, irq: &IrqController, ramsize: u32) {
    use crate::core::devices::{MAINBOARD_REVISION, OLDMAINBOARD_REVISION};
    if old {
        log::info!("Uniprocessor bus controller rev {}", OLDMAINBOARD_REVISION);
    } else {
        log::info!("Multiprocessor bus controller rev {}", MAINBOARD_REVISION);
    }
    log::info!("    ramsize: {} ({}k)", ramsize, ramsize / 1024);
    log::info!("    irqs: 0x{:08x}", irq.raised());
    log::info!("    irqe: 0x{:08x}", irq.enabled());
    for (i, cpu) in irq.cpus.iter().enumerate() {
        log::info!(
            "    cpu {}: {} cirqe 0x{:08x} cipi {} interrupting {}",
            i,
            if cpu.enabled { "ENABLED" } else { "DISABLED" },
            cpu.enabled_irqs,
            cpu.ipi as u32,
            cpu.interrupting as u32
        );
    }
}
