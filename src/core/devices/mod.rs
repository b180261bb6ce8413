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

//! Slot devices
//!
//! Every device follows the same contract: it is created from its config
//! line, fields word-sized register accesses at offsets within its 64 KiB
//! slot window, may schedule timed events and raise or lower its (level
//! triggered) slot IRQ, and gets cleanup and state-dump hooks. The device
//! set is a closed enum dispatched by match; the shared "state" of the
//! original's operation table is each variant's payload.

pub mod disk;
pub mod emufs;
pub mod net;
pub mod random;
pub mod serial;
pub mod timer;
pub mod tracectl;

use crate::core::bus::{BusCtx, BusError, IrqController};
use crate::core::clock::{Clock, EventKind};
use crate::core::error::{EmulatorError, Result};
use crate::core::poll::PollTable;
use crate::core::trace::TraceKind;

pub use disk::DiskDevice;
pub use emufs::EmufsDevice;
pub use net::NetDevice;
pub use random::RandomDevice;
pub use serial::SerialDevice;
pub use timer::TimerDevice;
pub use tracectl::TraceDevice;

/// Vendor id shared by all stock devices
pub const VENDOR_SYS161: u32 = 1;

// Device ids
pub const DEVID_OLDMAINBOARD: u32 = 1;
pub const DEVID_TIMER: u32 = 2;
pub const DEVID_DISK: u32 = 3;
pub const DEVID_SERIAL: u32 = 4;
pub const DEVID_SCREEN: u32 = 5;
pub const DEVID_NET: u32 = 6;
pub const DEVID_EMUFS: u32 = 7;
pub const DEVID_TRACE: u32 = 8;
pub const DEVID_RANDOM: u32 = 9;
pub const DEVID_MAINBOARD: u32 = 10;

// Hardware revisions
pub const OLDMAINBOARD_REVISION: u32 = 2;
pub const MAINBOARD_REVISION: u32 = 1;
pub const TIMER_REVISION: u32 = 1;
pub const DISK_REVISION: u32 = 2;
pub const SERIAL_REVISION: u32 = 1;
pub const NET_REVISION: u32 = 1;
pub const EMUFS_REVISION: u32 = 1;
pub const TRACE_REVISION: u32 = 3;
pub const RANDOM_REVISION: u32 = 1;

/// Machine pieces available while devices are being created
pub struct SetupCtx<'a> {
    pub clock: &'a mut Clock,
    pub poll: &'a mut PollTable,
}

/// Context handed to a device for each register access or event
pub struct DeviceCtx<'a, 'b> {
    /// The slot being accessed
    pub slot: usize,
    /// The CPU performing the access (0 for event dispatch)
    pub cpunum: usize,
    pub irq: &'a mut IrqController,
    pub ext: &'a mut BusCtx<'b>,
}

impl DeviceCtx<'_, '_> {
    /// Assert this device's IRQ line
    pub fn raise_irq(&mut self) {
        self.irq.raise(self.slot);
        let slot = self.slot;
        self.ext
            .tracing
            .hw(TraceKind::Irq, format_args!("Slot {:2}: irq ON", slot));
    }

    /// Deassert this device's IRQ line
    pub fn lower_irq(&mut self) {
        self.irq.lower(self.slot);
        let slot = self.slot;
        self.ext
            .tracing
            .hw(TraceKind::Irq, format_args!("Slot {:2}: irq OFF", slot));
    }

    /// Is this device's line currently raised?
    pub fn check_irq(&self) -> bool {
        self.irq.check(self.slot)
    }

    /// The guest violated the device protocol: wedge, with a message, and
    /// drop to the debugger.
    pub fn hang(&mut self, msg: &str) {
        self.ext.control.hang(self.ext.clock, msg);
    }
}

/// One configured device
pub enum Device {
    /// Bus controller (slot 31); state lives on the bus itself
    Mainboard { old: bool },
    Timer(TimerDevice),
    Disk(DiskDevice),
    Serial(SerialDevice),
    Emufs(EmufsDevice),
    Net(NetDevice),
    Random(RandomDevice),
    Trace(TraceDevice),
}

impl Device {
    /// Create a device from its config-file name and arguments.
    ///
    /// The bus controller is constructed by the config code itself and
    /// never goes through here.
    pub fn init(name: &str, slot: usize, args: &[String], setup: &mut SetupCtx) -> Result<Device> {
        match name {
            "timer" => Ok(Device::Timer(TimerDevice::new(slot, args)?)),
            "disk" => Ok(Device::Disk(DiskDevice::new(slot, args, setup)?)),
            "serial" => Ok(Device::Serial(SerialDevice::new(slot, args)?)),
            "emufs" => Ok(Device::Emufs(EmufsDevice::new(slot, args)?)),
            "nic" => Ok(Device::Net(NetDevice::new(slot, args, setup)?)),
            "random" => Ok(Device::Random(RandomDevice::new(slot, args, setup)?)),
            "trace" => Ok(Device::Trace(TraceDevice::new(slot, args)?)),
            "screen" => Err(EmulatorError::Device {
                slot,
                msg: "Screen device not supported".into(),
            }),
            _ => Err(EmulatorError::Device {
                slot,
                msg: format!("No such hardware `{}'", name),
            }),
        }
    }

    /// (vendor, device, revision) for the controller's config space
    pub fn ids(&self) -> (u32, u32, u32) {
        let (dev, rev) = match self {
            Device::Mainboard { old: true } => (DEVID_OLDMAINBOARD, OLDMAINBOARD_REVISION),
            Device::Mainboard { old: false } => (DEVID_MAINBOARD, MAINBOARD_REVISION),
            Device::Timer(_) => (DEVID_TIMER, TIMER_REVISION),
            Device::Disk(_) => (DEVID_DISK, DISK_REVISION),
            Device::Serial(_) => (DEVID_SERIAL, SERIAL_REVISION),
            Device::Emufs(_) => (DEVID_EMUFS, EMUFS_REVISION),
            Device::Net(_) => (DEVID_NET, NET_REVISION),
            Device::Random(_) => (DEVID_RANDOM, RANDOM_REVISION),
            Device::Trace(_) => (DEVID_TRACE, TRACE_REVISION),
        };
        (VENDOR_SYS161, dev, rev)
    }

    /// Fetch a device register
    pub fn fetch(&mut self, ctx: &mut DeviceCtx, offset: u32) -> std::result::Result<u32, BusError> {
        match self {
            Device::Mainboard { .. } => unreachable!("controller handled by the bus"),
            Device::Timer(d) => d.fetch(ctx, offset),
            Device::Disk(d) => d.fetch(ctx, offset),
            Device::Serial(d) => d.fetch(ctx, offset),
            Device::Emufs(d) => d.fetch(ctx, offset),
            Device::Net(d) => d.fetch(ctx, offset),
            Device::Random(d) => d.fetch(ctx, offset),
            Device::Trace(d) => d.fetch(ctx, offset),
        }
    }

    /// Store to a device register
    pub fn store(
        &mut self,
        ctx: &mut DeviceCtx,
        offset: u32,
        val: u32,
    ) -> std::result::Result<(), BusError> {
        match self {
            Device::Mainboard { .. } => unreachable!("controller handled by the bus"),
            Device::Timer(d) => d.store(ctx, offset, val),
            Device::Disk(d) => d.store(ctx, offset, val),
            Device::Serial(d) => d.store(ctx, offset, val),
            Device::Emufs(d) => d.store(ctx, offset, val),
            Device::Net(d) => d.store(ctx, offset, val),
            Device::Random(d) => d.store(ctx, offset, val),
            Device::Trace(d) => d.store(ctx, offset, val),
        }
    }

    /// A timed event scheduled by this device has fired
    pub fn event(&mut self, ctx: &mut DeviceCtx, kind: EventKind, code: u32) {
        match (self, kind) {
            (Device::Timer(d), EventKind::TimerExpire { .. }) => d.expire(ctx, code),
            (Device::Disk(d), EventKind::DiskSeekDone { .. }) => d.seek_done(ctx, code),
            (Device::Disk(d), EventKind::DiskWaitDone { .. }) => d.wait_done(ctx, code),
            (Device::Serial(d), EventKind::SerialTxDone { .. }) => d.write_done(ctx),
            (Device::Serial(d), EventKind::SerialRxReady { .. }) => d.push_input(ctx),
            (Device::Emufs(d), EventKind::EmufsDone { .. }) => d.op_done(ctx),
            (Device::Net(d), EventKind::NetSend { .. }) => d.trigger_send(ctx),
            (Device::Net(d), EventKind::NetKeepalive { .. }) => d.keepalive(ctx),
            _ => panic!("internal error: event dispatched to wrong device"),
        }
    }

    /// Release host-side resources (poweroff path)
    pub fn cleanup(&mut self) {
        match self {
            Device::Disk(d) => d.cleanup(),
            Device::Emufs(d) => d.cleanup(),
            Device::Net(d) => d.cleanup(),
            _ => {}
        }
    }

    /// Log a state dump
    pub fn dump(&self, irq: &IrqController) {
        match self {
            Device::Mainboard { .. } => { /* dumped by the bus, which has the RAM size */ }
            Device::Timer(d) => d.dump(),
            Device::Disk(d) => d.dump(),
            Device::Serial(d) => d.dump(),
            Device::Emufs(d) => d.dump(),
            Device::Net(d) => d.dump(),
            Device::Random(_) => {
                log::info!("Random generator rev {}", RANDOM_REVISION);
            }
            Device::Trace(_) => {
                log::info!("Trace control device rev {}", TRACE_REVISION);
            }
        }
        let _ = irq;
    }
}
