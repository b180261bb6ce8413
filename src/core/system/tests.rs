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

//! End-to-end machine scenarios: device timing through the virtual
//! clock, the poweroff protocol, and bus-level register behavior.

use super::*;
use crate::core::bus::{BusError, CONTROLLER_SLOT, SLOT_MEM};
use crate::core::devices::disk::{DiskStatus, HEADER_MESSAGE, SECTSIZE};
use std::io::Write as IoWrite;

fn make_system(conf: &str) -> System {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(conf.as_bytes()).unwrap();
    System::configure(f.path().to_str().unwrap(), &[], SystemOptions::default()).unwrap()
}

/// Perform one I/O-space register read as CPU 0 would
fn io_read(sys: &mut System, offset: u32) -> std::result::Result<u32, BusError> {
    let System {
        bus,
        clock,
        stats,
        control,
        tracing,
        console,
        ..
    } = sys;
    let mut ctx = BusCtx {
        clock,
        stats,
        control,
        tracing,
        console,
    };
    bus.io_fetch(0, offset, &mut ctx)
}

/// Perform one I/O-space register write as CPU 0 would
fn io_write(sys: &mut System, offset: u32, val: u32) -> std::result::Result<(), BusError> {
    let System {
        bus,
        clock,
        stats,
        control,
        tracing,
        console,
        ..
    } = sys;
    let mut ctx = BusCtx {
        clock,
        stats,
        control,
        tracing,
        console,
    };
    bus.io_store(0, offset, val, &mut ctx)
}

/// Advance virtual time (with no CPU work) until `done`, or panic
fn pump_until(sys: &mut System, max_ms: u64, mut done: impl FnMut(&mut System) -> bool) -> u64 {
    let t0 = sys.clock.now();
    for _ in 0..max_ms * 25 {
        if done(sys) {
            return sys.clock.now() - t0;
        }
        // 1000 cycles = 40 us of virtual time per step
        sys.clock.advance(40_000);
        sys.drain_events();
    }
    panic!("condition not reached within {} ms of virtual time", max_ms);
}

// ------------------------------------------------------------------
// Controller registers

const CTL_BASE: u32 = CONTROLLER_SLOT as u32 * SLOT_MEM + CONTROLLER_SLOT as u32 * 1024;

#[test]
fn test_controller_exposes_ramsize_and_cpus() {
    let mut sys = make_system("31 mainboard ramsize=1M cpus=4\n");
    assert_eq!(io_read(&mut sys, CTL_BASE + 0x200), Ok(1024 * 1024));
    // CPUS: 4 present
    assert_eq!(io_read(&mut sys, CTL_BASE + 0x210), Ok(0xf));
    // CPUE: only cpu 0 enabled at boot
    assert_eq!(io_read(&mut sys, CTL_BASE + 0x214), Ok(0x1));
    // SELF as seen from cpu 0
    assert_eq!(io_read(&mut sys, CTL_BASE + 0x218), Ok(0x1));
    // power reads all-ones on the multiprocessor board
    assert_eq!(io_read(&mut sys, CTL_BASE + 0x208), Ok(0xffff_ffff));
}

#[test]
fn test_config_space_reports_device_ids() {
    let mut sys = make_system("31 mainboard ramsize=512k\n2 timer\n");
    use crate::core::devices::{DEVID_TIMER, TIMER_REVISION, VENDOR_SYS161};
    let slot2 = CONTROLLER_SLOT as u32 * SLOT_MEM + 2 * 1024;
    assert_eq!(io_read(&mut sys, slot2), Ok(VENDOR_SYS161));
    assert_eq!(io_read(&mut sys, slot2 + 4), Ok(DEVID_TIMER));
    assert_eq!(io_read(&mut sys, slot2 + 8), Ok(TIMER_REVISION));
    // empty slot reads zeros
    let slot3 = CONTROLLER_SLOT as u32 * SLOT_MEM + 3 * 1024;
    assert_eq!(io_read(&mut sys, slot3), Ok(0));
}

#[test]
fn test_empty_slot_access_is_bus_error() {
    let mut sys = make_system("31 mainboard ramsize=512k\n");
    assert_eq!(io_read(&mut sys, 5 * SLOT_MEM), Err(BusError));
    assert_eq!(io_write(&mut sys, 5 * SLOT_MEM, 1), Err(BusError));
}

#[test]
fn test_cram_scratch_roundtrip() {
    let mut sys = make_system("31 mainboard ramsize=512k cpus=2\n");
    let cram1 = CONTROLLER_SLOT as u32 * SLOT_MEM + 32768 + 1024 + 0x300;
    io_write(&mut sys, cram1, 0x8000_2000).unwrap();
    io_write(&mut sys, cram1 + 4, 0x1234_5678).unwrap();
    assert_eq!(io_read(&mut sys, cram1), Ok(0x8000_2000));
    assert_eq!(io_read(&mut sys, cram1 + 4), Ok(0x1234_5678));
}

#[test]
fn test_cpue_write_starts_secondary_cpu() {
    let mut sys = make_system("31 mainboard ramsize=512k cpus=2\n");
    assert_eq!(sys.cpu(1).state, crate::core::cpu::CpuState::Disabled);

    // boot block: entry pc and argument at the bottom of CPU 1's CRAM
    let cram1 = CONTROLLER_SLOT as u32 * SLOT_MEM + 32768 + 1024 + 0x300;
    io_write(&mut sys, cram1, 0x8000_2000).unwrap();
    io_write(&mut sys, cram1 + 4, 0xcafe).unwrap();
    // something executable at the entry point
    sys.bus.mem_store(0x2000, 0).unwrap();
    sys.bus.mem_store(0x2004, 0).unwrap();

    // enable cpu 1 (keep cpu 0)
    io_write(&mut sys, CTL_BASE + 0x214, 0x3).unwrap();
    // actions apply at the next cycle boundary
    let went = sys.cpu_cycles(1);
    sys.clock_ticks(went);

    assert_eq!(sys.cpu(1).state, crate::core::cpu::CpuState::Running);
    assert_eq!(sys.cpu(1).pc(), 0x8000_2000);
    assert_eq!(sys.cpu(1).reg(4), 0xcafe);
    // stack at the kseg0 alias of the top of CPU 1's CRAM
    let cram1_end = CONTROLLER_SLOT as u32 * SLOT_MEM + 32768 + 1024 + 0x400;
    assert_eq!(sys.cpu(1).reg(29), 0x8000_0000 + 0x1fe0_0000 + cram1_end);
    assert_eq!(sys.running_mask(), 0b11);
}

// ------------------------------------------------------------------
// Poweroff protocol

#[test]
fn test_poweroff_after_five_milliseconds() {
    let mut sys = make_system("31 mainboard ramsize=512k\n");
    let t0 = sys.clock.now();
    io_write(&mut sys, CTL_BASE + 0x208, 0).unwrap();
    assert!(!sys.control.shutoff);

    let elapsed = pump_until(&mut sys, 20, |s| s.control.shutoff);
    // 5 ms plus at most 1% jitter, measured at pump granularity
    assert!(elapsed >= 5_000_000, "too early: {}", elapsed);
    assert!(elapsed < 5_200_000, "too late: {}", elapsed);
    // the controller IRQ was raised to break the idle wait
    assert!(sys.bus.irq.check(CONTROLLER_SLOT));
    let _ = t0;
}

#[test]
fn test_nonzero_power_write_without_high_bit_hangs() {
    let mut sys = make_system("31 mainboard ramsize=512k\n");
    io_write(&mut sys, CTL_BASE + 0x208, 0x1).unwrap();
    assert!(sys.control.stopped_in_debugger);
    assert!(sys.control.stop_is_lethal);
}

// ------------------------------------------------------------------
// Timer device

#[test]
fn test_timer_countdown_raises_irq() {
    let mut sys = make_system("31 mainboard ramsize=512k\n2 timer\n");
    let base = 2 * SLOT_MEM;

    // 10000 us countdown
    io_write(&mut sys, base + 0x10, 10_000).unwrap();
    assert!(!sys.bus.irq.check(2));

    let elapsed = pump_until(&mut sys, 30, |s| s.bus.irq.check(2));
    assert!(elapsed >= 10_000_000, "too early: {}", elapsed);
    assert!(elapsed < 10_300_000, "too late: {}", elapsed);

    // reading the IRQ register reports and clears the line
    assert_eq!(io_read(&mut sys, base + 0x0c), Ok(1));
    assert!(!sys.bus.irq.check(2));
    assert_eq!(io_read(&mut sys, base + 0x0c), Ok(0));
}

#[test]
fn test_timer_rewrite_discards_stale_expiry() {
    let mut sys = make_system("31 mainboard ramsize=512k\n2 timer\n");
    let base = 2 * SLOT_MEM;

    io_write(&mut sys, base + 0x10, 1_000).unwrap();
    // supersede it with a longer countdown before the first fires
    io_write(&mut sys, base + 0x10, 50_000).unwrap();

    // the stale 1 ms expiry must not raise the line
    sys.clock.advance(5_000_000);
    sys.drain_events();
    assert!(!sys.bus.irq.check(2));

    // the live one does
    sys.clock.advance(50_000_000);
    sys.drain_events();
    assert!(sys.bus.irq.check(2));
}

#[test]
fn test_timer_restart_flag_rearms() {
    let mut sys = make_system("31 mainboard ramsize=512k\n2 timer\n");
    let base = 2 * SLOT_MEM;

    io_write(&mut sys, base + 0x08, 1).unwrap(); // restart on expiry
    io_write(&mut sys, base + 0x10, 1_000).unwrap();

    pump_until(&mut sys, 10, |s| s.bus.irq.check(2));
    // acknowledge; the restarted countdown fires again
    assert_eq!(io_read(&mut sys, base + 0x0c), Ok(1));
    pump_until(&mut sys, 10, |s| s.bus.irq.check(2));
}

#[test]
fn test_timer_guest_settable_time_of_day() {
    let mut sys = make_system("31 mainboard ramsize=512k\n2 timer\n");
    let base = 2 * SLOT_MEM;

    io_write(&mut sys, base + 0x00, 1_000_000).unwrap();
    let secs = io_read(&mut sys, base + 0x00).unwrap();
    assert_eq!(secs, 1_000_000);

    sys.clock.advance(3_000_000_000);
    let secs = io_read(&mut sys, base + 0x00).unwrap();
    assert_eq!(secs, 1_000_003);
}

#[test]
fn test_timer_illegal_register_hangs() {
    let mut sys = make_system("31 mainboard ramsize=512k\n2 timer\n");
    let base = 2 * SLOT_MEM;
    // the beep register is write-only
    let _ = io_read(&mut sys, base + 0x14);
    assert!(sys.control.stopped_in_debugger);
    assert!(sys.control.stop_is_lethal);
}

// ------------------------------------------------------------------
// Disk device

fn disk_system() -> (System, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let img = dir.path().join("disk.img");
    let conf = format!(
        "31 mainboard ramsize=512k\n3 disk file={} sectors=8192\n",
        img.display()
    );
    (make_system(&conf), dir)
}

#[test]
fn test_disk_sector_write_read_roundtrip() {
    let (mut sys, _dir) = disk_system();
    let base = 3 * SLOT_MEM;
    let bufbase = base + 32768;

    // fill the transfer buffer with a pattern
    let pattern: Vec<u8> = (0..SECTSIZE).map(|i| (i * 7 + 3) as u8).collect();
    for i in (0..SECTSIZE).step_by(4) {
        let w = u32::from_be_bytes([pattern[i], pattern[i + 1], pattern[i + 2], pattern[i + 3]]);
        io_write(&mut sys, bufbase + i as u32, w).unwrap();
    }

    // write it to sector 17
    io_write(&mut sys, base + 8, 17).unwrap();
    io_write(&mut sys, base + 4, (DiskStatus::INPROGRESS | DiskStatus::ISWRITE).bits()).unwrap();

    let elapsed = pump_until(&mut sys, 2000, |s| {
        let st = DiskStatus::from_bits_truncate(
            io_read(s, base + 4).expect("disk status readable"),
        );
        st.contains(DiskStatus::COMPLETE)
    });
    let st = DiskStatus::from_bits_truncate(io_read(&mut sys, base + 4).unwrap());
    assert!(!st.contains(DiskStatus::MEDIAERR));
    assert!(!st.contains(DiskStatus::INVSECT));
    assert_eq!(sys.stats.wsects, 1);
    // geometry-predicted: nonzero, bounded by seek + a rotation + slack
    assert!(elapsed > 0);
    assert!(elapsed < 500_000_000, "write took {} ns", elapsed);

    // scrub the buffer, then read the sector back
    for i in (0..SECTSIZE).step_by(4) {
        io_write(&mut sys, bufbase + i as u32, 0).unwrap();
    }
    io_write(&mut sys, base + 4, 0).unwrap(); // idle (clears COMPLETE)
    io_write(&mut sys, base + 4, DiskStatus::INPROGRESS.bits()).unwrap();

    pump_until(&mut sys, 2000, |s| {
        let st = DiskStatus::from_bits_truncate(
            io_read(s, base + 4).expect("disk status readable"),
        );
        st.contains(DiskStatus::COMPLETE)
    });
    assert_eq!(sys.stats.rsects, 1);

    for i in (0..SECTSIZE).step_by(4) {
        let w = io_read(&mut sys, bufbase + i as u32).unwrap();
        let expect =
            u32::from_be_bytes([pattern[i], pattern[i + 1], pattern[i + 2], pattern[i + 3]]);
        assert_eq!(w, expect, "sector data mismatch at {}", i);
    }
}

#[test]
fn test_disk_invalid_sector_reports_invsect() {
    let (mut sys, _dir) = disk_system();
    let base = 3 * SLOT_MEM;

    io_write(&mut sys, base + 8, 0xffff_0000).unwrap();
    io_write(&mut sys, base + 4, DiskStatus::INPROGRESS.bits()).unwrap();

    pump_until(&mut sys, 100, |s| {
        let st =
            DiskStatus::from_bits_truncate(io_read(s, base + 4).expect("status readable"));
        st.contains(DiskStatus::COMPLETE)
    });
    let st = DiskStatus::from_bits_truncate(io_read(&mut sys, base + 4).unwrap());
    assert!(st.contains(DiskStatus::INVSECT));
}

#[test]
fn test_disk_reports_geometry_registers() {
    let (mut sys, _dir) = disk_system();
    let base = 3 * SLOT_MEM;
    assert_eq!(io_read(&mut sys, base + 0), Ok(8192));
    assert_eq!(io_read(&mut sys, base + 12), Ok(3600));
}

#[test]
fn test_disk_image_file_has_header() {
    let dir = tempfile::TempDir::new().unwrap();
    let img = dir.path().join("h.img");
    let conf = format!(
        "31 mainboard ramsize=512k\n3 disk file={} sectors=256\n",
        img.display()
    );
    let _sys = make_system(&conf);
    let data = std::fs::read(&img).unwrap();
    assert!(data.starts_with(HEADER_MESSAGE.as_bytes()));
}

#[test]
fn test_disk_bad_status_write_hangs() {
    let (mut sys, _dir) = disk_system();
    let base = 3 * SLOT_MEM;
    io_write(&mut sys, base + 4, 0xff).unwrap();
    assert!(sys.control.stopped_in_debugger);
}

// ------------------------------------------------------------------
// Serial device

#[test]
fn test_serial_write_paces_and_raises_ready() {
    let mut sys = make_system("31 mainboard ramsize=512k\n4 serial\n");
    let base = 4 * SLOT_MEM;

    // enable transmit interrupts
    io_write(&mut sys, base + 4, 0x1).unwrap();
    // send a character; the wire is busy for SERIAL_NSECS
    io_write(&mut sys, base + 0, b'\n' as u32).unwrap();
    assert!(!sys.bus.irq.check(4));

    let elapsed = pump_until(&mut sys, 5, |s| s.bus.irq.check(4));
    let wire = crate::core::clock::SERIAL_NSECS;
    assert!(elapsed >= wire, "ready too early: {}", elapsed);
    assert!(elapsed < wire + wire / 50 + 80_000, "ready too late: {}", elapsed);

    // ready bit visible in the control register
    let wirq = io_read(&mut sys, base + 4).unwrap();
    assert_eq!(wirq & 0x3, 0x3);
    assert_eq!(sys.stats.wchars, 1);
}

#[test]
fn test_serial_input_queues_through_ring() {
    let mut sys = make_system("31 mainboard ramsize=512k\n4 serial\n");
    let base = 4 * SLOT_MEM;

    {
        let System {
            bus,
            clock,
            stats,
            control,
            tracing,
            console,
            ..
        } = &mut sys;
        let mut ctx = BusCtx {
            clock,
            stats,
            control,
            tracing,
            console,
        };
        bus.console_input(b'a', &mut ctx);
        bus.console_input(b'b', &mut ctx);
    }

    // first character offered immediately
    assert_eq!(io_read(&mut sys, base + 0), Ok(b'a' as u32));
    // the second follows after one wire time
    pump_until(&mut sys, 5, |s| {
        io_read(s, base + 0).expect("char register readable") == b'b' as u32
    });
    assert_eq!(sys.stats.rchars > 0, true);
}

// ------------------------------------------------------------------
// Event ordering

#[test]
fn test_events_fire_in_deadline_order() {
    let mut sys = make_system("31 mainboard ramsize=512k\n2 timer\n");
    // two countdowns through the same timer would supersede; instead
    // verify clock-level ordering with distinct slots' worth of events
    sys.clock
        .schedule(2_000_000, 0, EventKind::MeterSample, "late");
    sys.clock
        .schedule(1_000_000, 0, EventKind::MeterSample, "early");

    let first = sys.clock.next_deadline().unwrap();
    sys.clock.advance(3_000_000);
    let ev1 = sys.clock.pop_due().unwrap();
    let ev2 = sys.clock.pop_due().unwrap();
    assert_eq!(ev1.deadline, first);
    assert!(ev1.deadline <= ev2.deadline);
    assert_eq!(ev1.desc, "early");
}

#[test]
fn test_running_mask_matches_states() {
    let mut sys = make_system("31 mainboard ramsize=512k cpus=3\n");
    assert_eq!(sys.running_mask(), 0b001);
    sys.cpu_mut(2).state = crate::core::cpu::CpuState::Running;
    assert_eq!(sys.running_mask(), 0b101);
    sys.cpu_mut(0).state = crate::core::cpu::CpuState::Idle;
    assert_eq!(sys.running_mask(), 0b100);
}
