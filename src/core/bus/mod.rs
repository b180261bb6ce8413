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

//! Bus fabric
//!
//! The bus owns physical memory, the boot ROM, the 32 device slots, and
//! the interrupt aggregation fabric. All guest memory is big-endian; the
//! byte-swapping accessors here are the only place that knows it, so
//! device code never re-implements endianness.
//!
//! # Physical address map
//!
//! | Range                       | Meaning            |
//! |-----------------------------|--------------------|
//! | `0x00000000 - 0x1fbfffff`   | RAM (low)          |
//! | `0x1fc00000 - 0x1fdfffff`   | Boot ROM           |
//! | `0x1fe00000 - 0x1fffffff`   | Bus I/O space      |
//! | `0x20000000 - 0xffffffff`   | RAM (continues)    |
//!
//! I/O space is carved into 32 fixed 64 KiB slot windows. Word accesses
//! within a window are dispatched to the owning device; the bus controller
//! itself occupies slot 31.

pub mod config;
pub mod mainboard;

use crate::core::clock::Clock;
use crate::core::console::Console;
use crate::core::devices::{Device, DeviceCtx};
use crate::core::stats::Stats;
use crate::core::system::Control;
use crate::core::trace::{TraceKind, Tracing};

/// Number of device slots
pub const NSLOTS: usize = 32;

/// The bus controller's hardwired slot
pub const CONTROLLER_SLOT: usize = 31;

/// Mapped memory per slot
pub const SLOT_MEM: u32 = 0x10000;

/// Size of one per-slot config register region
pub const CONFIG_SIZE: u32 = 1024;

/// Number of possible CPUs
pub const NCPUS_MAX: usize = 32;

/// Size of one per-CPU control register region
pub const PERCPU_SIZE: u32 = 1024;

/// Size of the per-CPU scratch area
pub const CRAM_SIZE: usize = 128;

/// Maximum physical memory
pub const MAX_RAMSIZE: u32 = 16 * 1024 * 1024;

/// Boot ROM placement
pub const ROM_BASE: u32 = 0x1fc0_0000;
pub const ROM_SIZE: u32 = 0x0020_0000;

/// I/O space placement
pub const IO_BASE: u32 = 0x1fe0_0000;

/// Where RAM resumes above the ROM + I/O hole
pub const HIGHRAM_BASE: u32 = 0x2000_0000;
const HIGHRAM_HOLE: u32 = 0x0040_0000;

/// A bus error: the access hit nothing, or something read-only
///
/// The CPU converts these into DBE/IBE exceptions; they are guest-visible
/// hardware behavior, not emulator errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError;

/// A precomputed reference to one 4 KiB page of fetchable memory.
///
/// The CPU's hot fetch path uses this instead of re-translating every
/// instruction: region tag plus page base offset, the safe translation of
/// the original's cached page pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRef {
    /// Page base offset into RAM (contiguous view)
    Ram(u32),
    /// Page base offset into the boot ROM
    Rom(u32),
}

/// Per-CPU interrupt plumbing on the bus side
#[derive(Debug, Clone)]
pub struct BusCpu {
    /// One bit of the CPUE register
    pub enabled: bool,
    /// Per-CPU interrupt enable mask (CIRQE)
    pub enabled_irqs: u32,
    /// Latched state of this CPU's external IRQ line
    pub interrupting: bool,
    /// Interprocessor interrupt bit (CIPI)
    pub ipi: bool,
    /// Per-CPU scratch area used to hand off boot info to secondary CPUs
    pub cram: [u8; CRAM_SIZE],
}

impl BusCpu {
    fn new() -> Self {
        BusCpu {
            enabled: false,
            enabled_irqs: 0xffff_ffff,
            interrupting: false,
            ipi: false,
            cram: [0; CRAM_SIZE],
        }
    }
}

/// Interrupt aggregation state
///
/// A CPU's external IRQ line is asserted exactly when
/// `(raised & enabled & per_cpu_enabled) != 0`. Every write to any of the
/// participating masks re-evaluates all lines.
pub struct IrqController {
    raised: u32,
    enabled: u32,
    pub cpus: Vec<BusCpu>,
}

impl IrqController {
    pub fn new(ncpus: usize) -> Self {
        IrqController {
            raised: 0,
            enabled: 0xffff_ffff,
            cpus: vec![BusCpu::new(); ncpus],
        }
    }

    /// Recompute every CPU's line after a mask change
    fn update(&mut self) {
        let mask = self.raised & self.enabled;
        for cpu in &mut self.cpus {
            cpu.interrupting = (mask & cpu.enabled_irqs) != 0;
        }
    }

    /// Assert a slot's (level-triggered) IRQ line
    pub fn raise(&mut self, slot: usize) {
        self.raised |= 1u32 << slot;
        self.update();
    }

    /// Deassert a slot's IRQ line
    pub fn lower(&mut self, slot: usize) {
        self.raised &= !(1u32 << slot);
        self.update();
    }

    /// Is this slot's line currently raised?
    pub fn check(&self, slot: usize) -> bool {
        (self.raised & (1u32 << slot)) != 0
    }

    /// The raised mask (controller IRQS register)
    pub fn raised(&self) -> u32 {
        self.raised
    }

    /// The global enable mask (controller IRQE register)
    pub fn enabled(&self) -> u32 {
        self.enabled
    }

    pub fn set_enabled(&mut self, mask: u32) {
        self.enabled = mask;
        self.update();
    }

    /// The (lamebus, ipi) line pair seen by one CPU
    #[inline]
    pub fn lines(&self, cpunum: usize) -> (bool, bool) {
        let cpu = &self.cpus[cpunum];
        (cpu.interrupting, cpu.ipi)
    }
}

/// Pieces of the machine outside the bus that device models need while
/// handling an access or a timed event.
pub struct BusCtx<'a> {
    pub clock: &'a mut Clock,
    pub stats: &'a mut Stats,
    pub control: &'a mut Control,
    pub tracing: &'a mut Tracing,
    pub console: &'a mut Console,
}

/// The bus: memory, ROM, slots, interrupt fabric
pub struct Bus {
    ram: Vec<u8>,
    rom: Vec<u8>,
    pub irq: IrqController,
    slots: Vec<Option<Device>>,
}

impl Bus {
    /// Build a bus with the given RAM size and CPU count. Devices are
    /// attached afterwards by the configuration code.
    pub fn new(ramsize: u32, ncpus: usize) -> Self {
        let mut slots = Vec::with_capacity(NSLOTS);
        slots.resize_with(NSLOTS, || None);
        Bus {
            ram: vec![0; ramsize as usize],
            rom: vec![0; ROM_SIZE as usize],
            irq: IrqController::new(ncpus),
            slots,
        }
    }

    /// Configured RAM size in bytes
    pub fn ramsize(&self) -> u32 {
        self.ram.len() as u32
    }

    /// Direct access to RAM for the kernel loader
    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Attach a device to a slot. Slot assignments are fixed for the life
    /// of the machine; double assignment is a configuration bug caught
    /// earlier.
    pub fn attach(&mut self, slot: usize, device: Device) {
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(device);
    }

    pub fn device(&self, slot: usize) -> Option<&Device> {
        self.slots[slot].as_ref()
    }

    pub fn device_mut(&mut self, slot: usize) -> Option<&mut Device> {
        self.slots[slot].as_mut()
    }

    // ------------------------------------------------------------------
    // Physical memory accessors (big-endian; RAM as one contiguous view)

    /// Fetch a word of physical memory
    #[inline]
    pub fn mem_fetch(&self, offset: u32) -> Result<u32, BusError> {
        let off = offset as usize;
        if off + 4 > self.ram.len() {
            return Err(BusError);
        }
        Ok(u32::from_be_bytes([
            self.ram[off],
            self.ram[off + 1],
            self.ram[off + 2],
            self.ram[off + 3],
        ]))
    }

    /// Store a word to physical memory
    #[inline]
    pub fn mem_store(&mut self, offset: u32, val: u32) -> Result<(), BusError> {
        let off = offset as usize;
        if off + 4 > self.ram.len() {
            return Err(BusError);
        }
        self.ram[off..off + 4].copy_from_slice(&val.to_be_bytes());
        Ok(())
    }

    /// Fetch one byte of physical memory
    #[inline]
    pub fn mem_fetch_byte(&self, offset: u32) -> Result<u8, BusError> {
        self.ram.get(offset as usize).copied().ok_or(BusError)
    }

    /// Store one byte to physical memory
    #[inline]
    pub fn mem_store_byte(&mut self, offset: u32, val: u8) -> Result<(), BusError> {
        match self.ram.get_mut(offset as usize) {
            Some(b) => {
                *b = val;
                Ok(())
            }
            None => Err(BusError),
        }
    }

    /// Fetch a word of boot ROM
    #[inline]
    pub fn rom_fetch(&self, offset: u32) -> Result<u32, BusError> {
        let off = offset as usize;
        if off + 4 > self.rom.len() {
            return Err(BusError);
        }
        Ok(u32::from_be_bytes([
            self.rom[off],
            self.rom[off + 1],
            self.rom[off + 2],
            self.rom[off + 3],
        ]))
    }

    /// Map a physical address to the page of memory containing it, for
    /// the CPU's instruction-fetch page cache. Executing from I/O space
    /// is not allowed.
    pub fn map_page(&self, paddr: u32) -> Option<PageRef> {
        let page = paddr & 0xffff_f000;
        if page < ROM_BASE {
            if page >= self.ramsize() {
                return None;
            }
            Some(PageRef::Ram(page))
        } else if page < IO_BASE {
            Some(PageRef::Rom(page - ROM_BASE))
        } else if page < HIGHRAM_BASE {
            None
        } else {
            let off = page - HIGHRAM_HOLE;
            if off >= self.ramsize() {
                return None;
            }
            Some(PageRef::Ram(off))
        }
    }

    /// Read one instruction word through a mapped page
    #[inline]
    pub fn use_map(&self, page: PageRef, pageoff: u32) -> u32 {
        let off = (pageoff & 0xfff) as usize;
        let region = match page {
            PageRef::Ram(base) => &self.ram[base as usize..],
            PageRef::Rom(base) => &self.rom[base as usize..],
        };
        u32::from_be_bytes([region[off], region[off + 1], region[off + 2], region[off + 3]])
    }

    // ------------------------------------------------------------------
    // I/O space dispatch

    /// Fetch a device register. `offset` is relative to the start of I/O
    /// space and must be word-aligned (the CPU guarantees it).
    pub fn io_fetch(
        &mut self,
        cpunum: usize,
        offset: u32,
        ctx: &mut BusCtx,
    ) -> Result<u32, BusError> {
        let slot = (offset / SLOT_MEM) as usize;
        let slotoffset = offset % SLOT_MEM;
        if slot >= NSLOTS {
            return Err(BusError);
        }
        debug_assert_eq!(offset & 0x3, 0);

        let Bus { slots, irq, ram, .. } = self;
        let ramsize = ram.len() as u32;
        if let Some(Device::Mainboard { old }) = &slots[slot] {
            let old = *old;
            return mainboard::fetch(old, irq, ctx, ramsize, cpunum, slotoffset, |s| {
                slots_ids(slots, s)
            });
        }
        match &mut slots[slot] {
            None => Err(BusError),
            Some(dev) => {
                let mut dctx = DeviceCtx {
                    slot,
                    cpunum,
                    irq,
                    ext: ctx,
                };
                dev.fetch(&mut dctx, slotoffset)
            }
        }
    }

    /// Store to a device register
    pub fn io_store(
        &mut self,
        cpunum: usize,
        offset: u32,
        val: u32,
        ctx: &mut BusCtx,
    ) -> Result<(), BusError> {
        let slot = (offset / SLOT_MEM) as usize;
        let slotoffset = offset % SLOT_MEM;
        if slot >= NSLOTS {
            return Err(BusError);
        }
        debug_assert_eq!(offset & 0x3, 0);

        let Bus { slots, irq, .. } = self;
        match &mut slots[slot] {
            None => Err(BusError),
            Some(Device::Mainboard { old }) => mainboard::store(*old, irq, ctx, slotoffset, val),
            Some(dev) => {
                let mut dctx = DeviceCtx {
                    slot,
                    cpunum,
                    irq,
                    ext: ctx,
                };
                dev.store(&mut dctx, slotoffset, val)
            }
        }
    }

    // ------------------------------------------------------------------
    // Whole-physical-space access used by the CPU's memory pipeline

    /// Fetch from anywhere in the physical address space
    pub fn phys_fetch(
        &mut self,
        cpunum: usize,
        paddr: u32,
        ctx: &mut BusCtx,
    ) -> Result<u32, BusError> {
        if paddr < ROM_BASE {
            self.mem_fetch(paddr)
        } else if paddr < IO_BASE {
            self.rom_fetch(paddr - ROM_BASE)
        } else if paddr < HIGHRAM_BASE {
            self.io_fetch(cpunum, paddr - IO_BASE, ctx)
        } else {
            self.mem_fetch(paddr - HIGHRAM_HOLE)
        }
    }

    /// Store to anywhere in the physical address space. The ROM is,
    /// after all, read-only.
    pub fn phys_store(
        &mut self,
        cpunum: usize,
        paddr: u32,
        val: u32,
        ctx: &mut BusCtx,
    ) -> Result<(), BusError> {
        if paddr < ROM_BASE {
            self.mem_store(paddr, val)
        } else if paddr < IO_BASE {
            Err(BusError)
        } else if paddr < HIGHRAM_BASE {
            self.io_store(cpunum, paddr - IO_BASE, val, ctx)
        } else {
            self.mem_store(paddr - HIGHRAM_HOLE, val)
        }
    }

    // ------------------------------------------------------------------
    // Event and input routing

    /// Dispatch a fired clock event to the owning device
    pub fn dispatch_event(&mut self, ev: crate::core::clock::Event, ctx: &mut BusCtx) {
        use crate::core::clock::EventKind;

        let slot = match ev.kind {
            EventKind::TimerExpire { slot }
            | EventKind::DiskSeekDone { slot }
            | EventKind::DiskWaitDone { slot }
            | EventKind::SerialTxDone { slot }
            | EventKind::SerialRxReady { slot }
            | EventKind::EmufsDone { slot }
            | EventKind::NetSend { slot }
            | EventKind::NetKeepalive { slot } => slot,
            EventKind::Poweroff => {
                // Never seen by a processor, but raising the controller
                // IRQ breaks the clock out of the idle wait.
                self.irq.raise(CONTROLLER_SLOT);
                ctx.tracing
                    .hw(TraceKind::Irq, format_args!("Slot {:2}: irq ON", CONTROLLER_SLOT));
                ctx.control.poweroff();
                return;
            }
            EventKind::MeterSample => {
                // handled by the machine, not a slot device
                return;
            }
        };

        let Bus { slots, irq, .. } = self;
        if let Some(dev) = &mut slots[slot] {
            let mut dctx = DeviceCtx {
                slot,
                cpunum: 0,
                irq,
                ext: ctx,
            };
            dev.event(&mut dctx, ev.kind, ev.code);
        }
    }

    /// Route one console input byte to the serial device, if present
    pub fn console_input(&mut self, ch: u8, ctx: &mut BusCtx) {
        let Bus { slots, irq, .. } = self;
        for (slot, entry) in slots.iter_mut().enumerate() {
            if let Some(Device::Serial(serial)) = entry {
                let mut dctx = DeviceCtx {
                    slot,
                    cpunum: 0,
                    irq,
                    ext: ctx,
                };
                serial.input(&mut dctx, ch);
                return;
            }
        }
    }

    /// Let a NIC pull a datagram off its readable socket
    pub fn net_receive(&mut self, slot: usize, ctx: &mut BusCtx) {
        let Bus { slots, irq, .. } = self;
        if let Some(Device::Net(net)) = &mut slots[slot] {
            let mut dctx = DeviceCtx {
                slot,
                cpunum: 0,
                irq,
                ext: ctx,
            };
            net.receive(&mut dctx);
        }
    }

    /// Run every device's cleanup hook (poweroff path)
    pub fn cleanup(&mut self) {
        for entry in &mut self.slots {
            if let Some(dev) = entry {
                dev.cleanup();
            }
        }
    }

    /// Dump the state of every configured device
    pub fn dump(&self) {
        for (i, entry) in self.slots.iter().enumerate() {
            match entry {
                None => {}
                Some(Device::Mainboard { old }) => {
                    log::info!("************ Slot {} ************", i);
                    mainboard::dump(*old, &self.irq, self.ramsize());
                }
                Some(dev) => {
                    log::info!("************ Slot {} ************", i);
                    dev.dump(&self.irq);
                }
            }
        }
    }
}

/// Vendor/device/revision of the device in a slot, or zeros when empty.
/// Used by the controller's per-slot config space.
fn slots_ids(slots: &[Option<Device>], slot: usize) -> (u32, u32, u32) {
    match &slots[slot] {
        Some(dev) => dev.ids(),
        None => (0, 0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_word_roundtrip_is_identity() {
        let mut bus = Bus::new(0x10000, 1);
        bus.mem_store(0x100, 0xdeadbeef).unwrap();
        assert_eq!(bus.mem_fetch(0x100).unwrap(), 0xdeadbeef);
        // storing the fetched value back changes nothing
        let v = bus.mem_fetch(0x100).unwrap();
        bus.mem_store(0x100, v).unwrap();
        assert_eq!(bus.mem_fetch(0x100).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn test_ram_is_big_endian() {
        let mut bus = Bus::new(0x10000, 1);
        bus.mem_store(0, 0x11223344).unwrap();
        // byte 0 is the high-order byte of the word
        assert_eq!(bus.mem_fetch_byte(0).unwrap(), 0x11);
        assert_eq!(bus.mem_fetch_byte(1).unwrap(), 0x22);
        assert_eq!(bus.mem_fetch_byte(2).unwrap(), 0x33);
        assert_eq!(bus.mem_fetch_byte(3).unwrap(), 0x44);
    }

    #[test]
    fn test_ram_byte_sequence_roundtrip() {
        let mut bus = Bus::new(0x1000, 1);
        for i in 0..=255u32 {
            bus.mem_store_byte(i, i as u8).unwrap();
        }
        for i in 0..=255u32 {
            assert_eq!(bus.mem_fetch_byte(i).unwrap(), i as u8);
        }
    }

    #[test]
    fn test_mem_out_of_range_is_bus_error() {
        let mut bus = Bus::new(0x1000, 1);
        assert_eq!(bus.mem_fetch(0x1000), Err(BusError));
        assert_eq!(bus.mem_store(0xffd, 0), Err(BusError));
        assert_eq!(bus.mem_fetch_byte(0x1000), Err(BusError));
    }

    #[test]
    fn test_map_page_regions() {
        let bus = Bus::new(0x100000, 1); // 1 MiB
        assert_eq!(bus.map_page(0x0000_1234), Some(PageRef::Ram(0x1000)));
        assert_eq!(bus.map_page(0x1fc0_0010), Some(PageRef::Rom(0)));
        // I/O space is not executable
        assert_eq!(bus.map_page(0x1fe0_0000), None);
        // RAM above the hole maps back into the contiguous view
        assert_eq!(
            bus.map_page(HIGHRAM_BASE + 0x1000),
            Some(PageRef::Ram(HIGHRAM_BASE + 0x1000 - HIGHRAM_HOLE))
        );
        // past the end of configured RAM
        assert_eq!(bus.map_page(0x0100_0000), None);
    }

    #[test]
    fn test_use_map_reads_instruction_words() {
        let mut bus = Bus::new(0x10000, 1);
        bus.mem_store(0x2008, 0x3c08dead).unwrap();
        let page = bus.map_page(0x2008).unwrap();
        assert_eq!(bus.use_map(page, 0x008), 0x3c08dead);
    }

    #[test]
    fn test_irq_aggregation_line_formula() {
        let mut irq = IrqController::new(2);
        assert_eq!(irq.lines(0), (false, false));

        irq.raise(5);
        assert!(irq.check(5));
        assert_eq!(irq.lines(0), (true, false));
        assert_eq!(irq.lines(1), (true, false));

        // globally mask slot 5: lines drop
        irq.set_enabled(!(1 << 5));
        assert_eq!(irq.lines(0), (false, false));

        // re-enable globally but mask it per-cpu on cpu 1
        irq.set_enabled(0xffff_ffff);
        irq.cpus[1].enabled_irqs = !(1 << 5);
        irq.update();
        assert_eq!(irq.lines(0), (true, false));
        assert_eq!(irq.lines(1), (false, false));

        irq.lower(5);
        assert_eq!(irq.lines(0), (false, false));
    }

    #[test]
    fn test_irq_ipi_is_separate_line() {
        let mut irq = IrqController::new(2);
        irq.cpus[1].ipi = true;
        assert_eq!(irq.lines(0), (false, false));
        assert_eq!(irq.lines(1), (false, true));
    }

    proptest::proptest! {
        /// A word read followed by a write of the same value is the
        /// identity on memory.
        #[test]
        fn prop_word_roundtrip(addr in 0u32..0x3ffc, val: u32) {
            let mut bus = Bus::new(0x4000, 1);
            let addr = addr & !3;
            bus.mem_store(addr, val).unwrap();
            proptest::prop_assert_eq!(bus.mem_fetch(addr).unwrap(), val);
            let v = bus.mem_fetch(addr).unwrap();
            bus.mem_store(addr, v).unwrap();
            proptest::prop_assert_eq!(bus.mem_fetch(addr).unwrap(), val);
        }

        /// A byte read at A returns byte (A % 4) of the big-endian word
        /// at A & !3.
        #[test]
        fn prop_byte_reads_decompose_word(addr in 0u32..0x3ffc, val: u32) {
            let mut bus = Bus::new(0x4000, 1);
            let base = addr & !3;
            bus.mem_store(base, val).unwrap();
            let bytes = val.to_be_bytes();
            for k in 0..4 {
                proptest::prop_assert_eq!(
                    bus.mem_fetch_byte(base + k).unwrap(),
                    bytes[k as usize]
                );
            }
        }
    }
}
