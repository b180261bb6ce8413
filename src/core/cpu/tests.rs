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

//! CPU core scenario tests
//!
//! These run small hand-assembled programs on a real machine instance,
//! or drive the memory pipeline directly where that is clearer.

use super::*;
use crate::core::system::{System, SystemOptions};
use std::io::Write;

// ------------------------------------------------------------------
// Harness

fn make_system(cpus: usize) -> System {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "31 mainboard ramsize=1M cpus={}", cpus).unwrap();
    System::configure(f.path().to_str().unwrap(), &[], SystemOptions::default()).unwrap()
}

/// Write a program into RAM at a physical address and point CPU 0 at its
/// kseg0 alias.
fn boot(sys: &mut System, paddr: u32, program: &[u32]) {
    for (i, &insn) in program.iter().enumerate() {
        sys.bus.mem_store(paddr + 4 * i as u32, insn).unwrap();
    }
    sys.debug_set_entrypoint(0, KSEG0 + paddr);
}

// ------------------------------------------------------------------
// Tiny assembler

const NOP: u32 = 0;

fn rtype(rs: u32, rt: u32, rd: u32, sh: u32, funct: u32) -> u32 {
    (rs << 21) | (rt << 16) | (rd << 11) | (sh << 6) | funct
}

fn itype(op: u32, rs: u32, rt: u32, imm: u32) -> u32 {
    (op << 26) | (rs << 21) | (rt << 16) | (imm & 0xffff)
}

fn addiu(rt: u32, rs: u32, imm: i32) -> u32 {
    itype(9, rs, rt, imm as u32)
}

fn addu(rd: u32, rs: u32, rt: u32) -> u32 {
    rtype(rs, rt, rd, 0, 33)
}

fn add(rd: u32, rs: u32, rt: u32) -> u32 {
    rtype(rs, rt, rd, 0, 32)
}

fn lui(rt: u32, imm: u32) -> u32 {
    itype(15, 0, rt, imm)
}

fn ori(rt: u32, rs: u32, imm: u32) -> u32 {
    itype(13, rs, rt, imm)
}

fn lw(rt: u32, off: i32, base: u32) -> u32 {
    itype(35, base, rt, off as u32)
}

fn sw(rt: u32, off: i32, base: u32) -> u32 {
    itype(43, base, rt, off as u32)
}

fn ll(rt: u32, off: i32, base: u32) -> u32 {
    itype(48, base, rt, off as u32)
}

fn sc(rt: u32, off: i32, base: u32) -> u32 {
    itype(56, base, rt, off as u32)
}

fn beq(rs: u32, rt: u32, off: i32) -> u32 {
    itype(4, rs, rt, off as u32)
}

fn mtc0(rt: u32, rd: u32) -> u32 {
    (16 << 26) | (4 << 21) | (rt << 16) | (rd << 11)
}

const WAIT: u32 = 0x4200_0020;
const BREAK: u32 = 0x0000_000d;

/// Spin in place: beq $0, $0, -1 with a nop in the delay slot
fn spin() -> [u32; 2] {
    [beq(0, 0, -1), NOP]
}

// ------------------------------------------------------------------
// Straight-line execution

#[test]
fn test_simple_arithmetic_program() {
    let mut sys = make_system(1);
    let mut prog = vec![
        addiu(8, 0, 5),  // r8 = 5
        addiu(9, 0, 7),  // r9 = 7
        addu(10, 8, 9),  // r10 = 12
        lui(11, 0x1234), // r11 = 0x12340000
        ori(11, 11, 0x5678),
    ];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(32);
    sys.clock_ticks(went);

    assert_eq!(sys.cpu(0).reg(8), 5);
    assert_eq!(sys.cpu(0).reg(9), 7);
    assert_eq!(sys.cpu(0).reg(10), 12);
    assert_eq!(sys.cpu(0).reg(11), 0x1234_5678);
}

#[test]
fn test_loads_and_stores_roundtrip() {
    let mut sys = make_system(1);
    let mut prog = vec![
        lui(8, 0x8000),      // r8 = 0x80000000
        ori(8, 8, 0x4000),   // r8 = 0x80004000
        addiu(9, 0, 0x55),   // r9 = 0x55
        sw(9, 0, 8),         // [0x4000] = 0x55
        lw(10, 0, 8),        // r10 = 0x55
        addu(11, 10, 10),    // r11 = 0xaa
        sw(11, 4, 8),        // [0x4004] = 0xaa
    ];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(32);
    sys.clock_ticks(went);

    assert_eq!(sys.bus.mem_fetch(0x4000).unwrap(), 0x55);
    assert_eq!(sys.bus.mem_fetch(0x4004).unwrap(), 0xaa);
    assert_eq!(sys.cpu(0).reg(10), 0x55);
}

#[test]
fn test_jump_delay_slot_executes() {
    let mut sys = make_system(1);
    // j over a marker; the delay slot sets r8, the skipped slot would
    // set r9
    let target = (KSEG0 + 0x1014) >> 2;
    let mut prog = vec![
        (2 << 26) | (target & 0x03ff_ffff), // j 0x80001014
        addiu(8, 0, 1),                     // delay slot: runs
        addiu(9, 0, 1),                     // skipped
        NOP,
        NOP,
    ];
    prog.extend_from_slice(&spin()); // at 0x1014
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(16);
    sys.clock_ticks(went);

    assert_eq!(sys.cpu(0).reg(8), 1);
    assert_eq!(sys.cpu(0).reg(9), 0);
}

#[test]
fn test_retired_counts_bounded_by_cycles() {
    let mut sys = make_system(1);
    let mut prog = vec![addiu(8, 0, 1); 8];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(64);
    sys.clock_ticks(went);

    let p = &sys.stats.percpu[0];
    assert!(p.kretired <= p.kcycles);
    assert!(p.uretired <= p.ucycles);
    assert!(p.kretired > 0);
}

// ------------------------------------------------------------------
// Exceptions

#[test]
fn test_add_overflow_raises_exception() {
    let mut sys = make_system(1);
    let mut prog = vec![
        lui(8, 0x7fff),
        ori(8, 8, 0xffff), // r8 = 0x7fffffff
        addiu(9, 0, 1),
        add(10, 8, 9), // overflows
    ];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(16);
    sys.clock_ticks(went);

    // destination untouched, cause records overflow, epc at the add
    assert_eq!(sys.cpu(0).reg(10), 0);
    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::Ovf as u32);
    assert_eq!(cpu.epc, KSEG0 + 0x100c);
    // boot vectors are on at reset
    assert_eq!(cpu.pc & 0xffff_ff00, 0xbfc0_0100);
}

#[test]
fn test_syscall_rolls_status_triple() {
    let mut sys = make_system(1);
    let mut prog = vec![12]; // SPECIAL op, funct = syscall
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(8);
    sys.clock_ticks(went);

    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::Sys as u32);
    assert_eq!(cpu.epc, KSEG0 + 0x1000);
    // interrupts off, kernel mode after the roll
    assert!(!cpu.current_irqon);
    assert!(!cpu.current_usermode);
}

#[test]
fn test_unaligned_word_access_faults() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    let r = cpu.mem_read(bus, &mut ctx, 0x8000_4001, false);
    assert_eq!(r, Err(()));
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::AdEL as u32);
    assert_eq!(cpu.vaddr, 0x8000_4001);
}

#[test]
fn test_user_mode_cannot_touch_kernel_space() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    cpu.current_usermode = true;
    let r = cpu.mem_read(bus, &mut ctx, 0x8000_4000, false);
    assert_eq!(r, Err(()));
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::AdEL as u32);
}

#[test]
fn test_exception_from_memory_access_aborts_but_keeps_gprs() {
    let mut sys = make_system(1);
    let mut prog = vec![
        addiu(10, 0, 77), // r10 = 77
        lui(8, 0x00f0),   // r8 = 0x00f00000: unmapped kuseg
        lw(10, 0, 8),     // TLB miss; r10 must survive
    ];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(16);
    sys.clock_ticks(went);

    assert_eq!(sys.cpu(0).reg(10), 77);
    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::TlbL as u32);
}

// ------------------------------------------------------------------
// TLB

fn utlb_entry() -> TlbEntry {
    TlbEntry {
        global: false,
        valid: true,
        dirty: true,
        nocache: false,
        pfn: 0x0001_0000,
        vpn: 0x4000_0000,
        pid: 3,
    }
}

#[test]
fn test_tlb_hit_translates_user_address() {
    let mut sys = make_system(1);
    sys.bus.mem_store(0x0001_0010, 0x0a0b_0c0d).unwrap();

    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    cpu.tlb[0] = utlb_entry();
    cpu.tlbentry.pid = 3;
    cpu.current_usermode = true;

    // bytes 16..19 of physical page 0x10000
    let r = cpu.mem_read(bus, &mut ctx, 0x4000_0010, false);
    assert_eq!(r, Ok(0x0a0b_0c0d));
}

#[test]
fn test_tlb_miss_on_user_address_uses_utlb_vector() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    cpu.tlb[0] = utlb_entry();
    // different address space: no match
    cpu.tlbentry.pid = 4;
    cpu.current_usermode = true;

    let r = cpu.mem_read(bus, &mut ctx, 0x4000_0010, false);
    assert_eq!(r, Err(()));
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::TlbL as u32);
    assert_eq!(cpu.vaddr, 0x4000_0010);
    // user-range miss with boot vectors on: the fast UTLB vector
    assert_eq!(cpu.pc, 0xbfc0_0100);
}

#[test]
fn test_tlb_invalid_entry_uses_common_vector() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    let mut e = utlb_entry();
    e.valid = false;
    cpu.tlb[0] = e;
    cpu.tlbentry.pid = 3;

    let r = cpu.mem_read(bus, &mut ctx, 0x4000_0010, false);
    assert_eq!(r, Err(()));
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::TlbL as u32);
    assert_eq!(cpu.pc, 0xbfc0_0180);
}

#[test]
fn test_tlb_write_to_clean_page_is_modify_exception() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    let mut e = utlb_entry();
    e.dirty = false;
    cpu.tlb[0] = e;
    cpu.tlbentry.pid = 3;

    let r = cpu.mem_write(bus, &mut ctx, 0x4000_0010, 1);
    assert_eq!(r, Err(()));
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::Mod as u32);
}

#[test]
fn test_global_entry_matches_any_asid() {
    let mut sys = make_system(1);
    sys.bus.mem_store(0x0001_0000, 42).unwrap();
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    let mut e = utlb_entry();
    e.global = true;
    e.pid = 9;
    cpu.tlb[0] = e;
    cpu.tlbentry.pid = 3;

    let r = cpu.mem_read(bus, &mut ctx, 0x4000_0000, false);
    assert_eq!(r, Ok(42));
}

#[test]
fn test_duplicate_tlb_write_is_machine_check() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    cpu.tlb[0] = utlb_entry();
    // stage a conflicting entry and write it elsewhere
    cpu.tlbentry = utlb_entry();
    cpu.tlbindex = 5;
    cpu.op_tlbwi(bus, &mut ctx);

    assert!(ctx.control.stopped_in_debugger);
    assert!(ctx.control.stop_is_lethal);
}

#[test]
fn test_tlbp_finds_staged_match() {
    let mut sys = make_system(1);
    let (cpu, _bus, mut ctx) = sys.split_cpu(0);
    cpu.tlb[7] = utlb_entry();
    cpu.tlbentry.vpn = 0x4000_0000;
    cpu.tlbentry.pid = 3;
    cpu.op_tlbp(&mut ctx);
    assert!(!cpu.tlbpf);
    assert_eq!(cpu.tlbindex, 7);

    cpu.tlbentry.pid = 8;
    cpu.op_tlbp(&mut ctx);
    assert!(cpu.tlbpf);
}

// ------------------------------------------------------------------
// Unaligned load/store merge semantics

#[test]
fn test_lwl_lwr_assemble_unaligned_word() {
    let mut sys = make_system(1);
    // memory: 00 11 22 33 | 44 55 66 77
    sys.bus.mem_store(0x4000, 0x0011_2233).unwrap();
    sys.bus.mem_store(0x4004, 0x4455_6677).unwrap();

    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    // lwl/lwr pair for the word at unaligned address 0x80004001
    let left = cpu
        .do_load(bus, &mut ctx, MemStyle::WordL, 0x8000_4001, 0)
        .unwrap();
    let full = cpu
        .do_load(bus, &mut ctx, MemStyle::WordR, 0x8000_4004, left)
        .unwrap();
    assert_eq!(full, 0x1122_3344);
}

#[test]
fn test_byte_loads_are_big_endian() {
    let mut sys = make_system(1);
    sys.bus.mem_store(0x4000, 0x8899_aabb).unwrap();
    let (cpu, bus, mut ctx) = sys.split_cpu(0);

    // byte 0 of the word is the high-order byte
    let b0 = cpu
        .do_load(bus, &mut ctx, MemStyle::UByte, 0x8000_4000, 0)
        .unwrap();
    assert_eq!(b0, 0x88);
    let b3 = cpu
        .do_load(bus, &mut ctx, MemStyle::UByte, 0x8000_4003, 0)
        .unwrap();
    assert_eq!(b3, 0xbb);
    // signed byte load sign-extends
    let s0 = cpu
        .do_load(bus, &mut ctx, MemStyle::SByte, 0x8000_4000, 0)
        .unwrap();
    assert_eq!(s0, 0xffff_ff88);
}

#[test]
fn test_sub_word_store_preserves_neighbors() {
    let mut sys = make_system(1);
    sys.bus.mem_store(0x4000, 0x1122_3344).unwrap();
    let (cpu, bus, mut ctx) = sys.split_cpu(0);

    cpu.do_store(bus, &mut ctx, MemStyle::UByte, 0x8000_4002, 0xee)
        .unwrap();
    assert_eq!(bus.mem_fetch(0x4000).unwrap(), 0x1122_ee44);

    cpu.do_store(bus, &mut ctx, MemStyle::UHalf, 0x8000_4000, 0xbeef)
        .unwrap();
    assert_eq!(bus.mem_fetch(0x4000).unwrap(), 0xbeef_ee44);
}

// ------------------------------------------------------------------
// LL/SC

#[test]
fn test_ll_sc_success_and_cross_cpu_failure() {
    let mut sys = make_system(2);
    sys.bus.mem_store(0x4000, 0).unwrap();

    // CPU A: LL reads 0, SC writes 1 -> succeeds
    {
        let (a, bus, mut ctx) = sys.split_cpu(0);
        a.set_reg(9, 0x8000_4000);
        a.set_reg(10, 1);
        a.op_ll(bus, &mut ctx, ll(8, 0, 9));
        assert_eq!(a.reg(8), 0);
        a.op_sc(bus, &mut ctx, sc(10, 0, 9));
        assert_eq!(a.reg(10), 1, "SC should succeed");
    }
    assert_eq!(sys.bus.mem_fetch(0x4000).unwrap(), 1);

    // CPU B: LL reads 1
    {
        let (b, bus, mut ctx) = sys.split_cpu(1);
        b.set_reg(9, 0x8000_4000);
        b.op_ll(bus, &mut ctx, ll(8, 0, 9));
        assert_eq!(b.reg(8), 1);
    }

    // CPU A: second SC writing 2 fails (no matching LL: the value moved)
    {
        let (a, bus, mut ctx) = sys.split_cpu(0);
        a.set_reg(10, 2);
        a.op_sc(bus, &mut ctx, sc(10, 0, 9));
        assert_eq!(a.reg(10), 0, "SC should fail");
    }
    assert_eq!(sys.bus.mem_fetch(0x4000).unwrap(), 1);

    assert_eq!(sys.stats.percpu[0].lls, 1);
    assert_eq!(sys.stats.percpu[0].okscs, 1);
    assert_eq!(sys.stats.percpu[0].badscs, 1);
    assert_eq!(sys.stats.percpu[1].lls, 1);
}

#[test]
fn test_sc_fails_on_address_mismatch() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    cpu.set_reg(9, 0x8000_4000);
    cpu.op_ll(bus, &mut ctx, ll(8, 0, 9));
    cpu.set_reg(10, 1);
    // different address
    cpu.op_sc(bus, &mut ctx, sc(10, 4, 9));
    assert_eq!(cpu.reg(10), 0);
}

#[test]
fn test_exception_clears_ll_reservation() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);
    cpu.set_reg(9, 0x8000_4000);
    cpu.op_ll(bus, &mut ctx, ll(8, 0, 9));
    assert!(cpu.ll_active);
    cpu.exception(bus, &mut ctx, ExceptionCode::Sys, 0, 0);
    assert!(!cpu.ll_active);

    cpu.set_reg(10, 1);
    cpu.op_sc(bus, &mut ctx, sc(10, 0, 9));
    assert_eq!(cpu.reg(10), 0);
}

// ------------------------------------------------------------------
// Interrupts, WAIT, and the on-chip timer

#[test]
fn test_wait_idles_until_interrupt_line() {
    let mut sys = make_system(1);
    let mut prog = vec![WAIT];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(8);
    sys.clock_ticks(went);
    assert_eq!(sys.cpu(0).state, CpuState::Idle);
    assert_eq!(sys.running_mask(), 0);

    // raising a bus IRQ wakes it
    sys.bus.irq.raise(2);
    let went = sys.cpu_cycles(4);
    sys.clock_ticks(went);
    assert_eq!(sys.cpu(0).state, CpuState::Running);
    assert_eq!(sys.running_mask(), 1);
}

#[test]
fn test_count_compare_raises_onchip_timer() {
    let mut sys = make_system(1);
    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    cpu.count = 0;
    cpu.compare = 4;
    cpu.compare_used = true;

    let mut prog = vec![NOP; 8];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(8);
    sys.clock_ticks(went);

    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    assert!(cpu.irq_timer);
    assert_eq!(cpu.count, 0); // reset when it matched
}

#[test]
fn test_hardware_interrupt_delivery_and_epc() {
    let mut sys = make_system(1);
    // enable interrupts: IEc | lamebus hard mask, boot vectors off
    let status = 0x0000_0401;
    let mut prog = vec![
        lui(8, (status >> 16) as u32),
        ori(8, 8, status & 0xffff),
        mtc0(8, 12), // status
    ];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);
    // something at the common vector to land on
    let vec_prog = spin();
    sys.bus.mem_store(0x0080, vec_prog[0]).unwrap();
    sys.bus.mem_store(0x0084, vec_prog[1]).unwrap();

    // run into the spin loop
    let went = sys.cpu_cycles(8);
    sys.clock_ticks(went);

    // assert an external line
    sys.bus.irq.raise(3);
    let went = sys.cpu_cycles(4);
    sys.clock_ticks(went);

    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::Irq as u32);
    // interrupted inside the spin loop
    let epc = cpu.epc;
    assert!(
        (KSEG0 + 0x100c..=KSEG0 + 0x1010).contains(&epc),
        "epc {:x} not in spin loop",
        epc
    );
    assert_eq!(cpu.pc & 0xffff_ff00, 0x8000_0000);
    assert_eq!(sys.stats.irqs, 1);
}

#[test]
fn test_masked_interrupt_not_taken() {
    let mut sys = make_system(1);
    // IEc on but lamebus mask off
    let mut prog = vec![addiu(8, 0, 1), mtc0(8, 12)];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    sys.bus.irq.raise(3);
    let went = sys.cpu_cycles(16);
    sys.clock_ticks(went);

    // still spinning, no interrupt delivered
    assert_eq!(sys.stats.irqs, 0);
    let pc = sys.cpu(0).pc();
    assert!((KSEG0 + 0x1008..=KSEG0 + 0x1010).contains(&pc));
}

// ------------------------------------------------------------------
// Builtin breakpoints

#[test]
fn test_builtin_breakpoint_is_transparent() {
    let mut sys = make_system(1);
    sys.control.gdb_listening = true;

    let mut prog = vec![addiu(8, 0, 3), BREAK];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    // run up to the break
    sys.onecycle();
    let vnow = sys.clock.now();
    let retired = sys.stats.percpu[0].kretired;

    // the breakpoint cycle: no time passes, no state changes
    sys.onecycle();
    assert_eq!(sys.clock.now(), vnow);
    assert_eq!(sys.stats.percpu[0].kretired, retired);
    assert!(sys.control.stopped_in_debugger);
    assert!(sys.cpu(0).hit_breakpoint());
    assert_eq!(sys.cpu(0).expc(), KSEG0 + 0x1004);
    assert_eq!(sys.cpu(0).pc(), KSEG0 + 0x1004);
    assert_eq!(sys.break_cpu(), 0);
}

#[test]
fn test_break_without_debugger_is_guest_exception() {
    let mut sys = make_system(1);
    // gdb not listening: the guest's own trap fires
    let mut prog = vec![BREAK];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(4);
    sys.clock_ticks(went);

    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    assert_eq!(cpu.cause_code >> 2, ExceptionCode::Bp as u32);
    assert!(!sys.control.stopped_in_debugger);
}

// ------------------------------------------------------------------
// Multiply/divide unit

#[test]
fn test_mult_div_results() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);

    cpu.set_reg(8, 0xffff_fffb); // -5
    cpu.set_reg(9, 7);
    cpu.op_mult(bus, &mut ctx, rtype(8, 9, 0, 0, 24));
    assert_eq!(cpu.lo, (-35i64) as u64 as u32);
    assert_eq!(cpu.hi, ((-35i64) as u64 >> 32) as u32);

    cpu.hiwait = 0;
    cpu.lowait = 0;
    cpu.set_reg(8, 40);
    cpu.set_reg(9, 6);
    cpu.op_div(bus, &mut ctx, rtype(8, 9, 0, 0, 26));
    assert_eq!(cpu.lo, 6);
    assert_eq!(cpu.hi, 4);
}

#[test]
fn test_divide_by_zero_machine_infinity() {
    let mut sys = make_system(1);
    let (cpu, bus, mut ctx) = sys.split_cpu(0);

    cpu.set_reg(8, 5);
    cpu.set_reg(9, 0);
    cpu.op_div(bus, &mut ctx, rtype(8, 9, 0, 0, 26));
    assert_eq!(cpu.lo, 0x7fff_ffff);
    assert_eq!(cpu.hi, 0);

    cpu.hiwait = 0;
    cpu.lowait = 0;
    cpu.set_reg(8, 0xffff_fffb); // negative
    cpu.op_div(bus, &mut ctx, rtype(8, 9, 0, 0, 26));
    assert_eq!(cpu.lo, 0xffff_ffff);
}

#[test]
fn test_hilo_interlock_produces_result() {
    let mut sys = make_system(1);
    // mult; mflo immediately: the mflo must stall for the countdown and
    // still produce the right answer
    let mut prog = vec![
        addiu(8, 0, 3),
        addiu(9, 0, 5),
        rtype(8, 9, 0, 0, 24),  // mult
        rtype(0, 0, 10, 0, 18), // mflo r10
    ];
    prog.extend_from_slice(&spin());
    boot(&mut sys, 0x1000, &prog);

    let went = sys.cpu_cycles(32);
    sys.clock_ticks(went);
    assert_eq!(sys.cpu(0).reg(10), 15);
}

// ------------------------------------------------------------------
// Register conventions

#[test]
fn test_r0_is_hardwired_zero() {
    let mut sys = make_system(1);
    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    cpu.set_reg(0, 0xdead);
    assert_eq!(cpu.reg(0), 0);
}

#[test]
fn test_debug_registers_layout() {
    let mut sys = make_system(1);
    let (cpu, _bus, _ctx) = sys.split_cpu(0);
    cpu.set_reg(1, 0x1111);
    let regs = cpu.debug_registers();
    // 32 GPRs + 16 control values
    assert_eq!(regs.len(), 48);
    assert_eq!(regs[1], 0x1111);
    assert_eq!(regs[37], cpu.pc()); // pc slot
}

#[test]
fn test_debug_memory_access_through_kseg0() {
    let mut sys = make_system(1);
    sys.bus.mem_store(0x2000, 0xabcd_ef01).unwrap();
    let cpu = sys.cpu(0);
    assert_eq!(cpu.debug_fetch_word(&sys.bus, 0x8000_2000), Some(0xabcd_ef01));
    assert_eq!(cpu.debug_fetch_byte(&sys.bus, 0x8000_2001), Some(0xcd));
    // unmapped user address fails cleanly
    assert_eq!(cpu.debug_fetch_word(&sys.bus, 0x0040_0000), None);
}

// ------------------------------------------------------------------
// Kernel load helpers

#[test]
fn test_load_address_translation() {
    assert_eq!(MipsCpu::load_paddr(0x8000_1000, 0x100), Some(0x1000));
    assert_eq!(MipsCpu::load_paddr(0xa000_1000, 0x100), Some(0x1000));
    assert_eq!(MipsCpu::load_paddr(0x0000_1000, 0x100), None);
    assert_eq!(MipsCpu::load_vaddr(0x1000, 0x100), Some(0x8000_1000));
}

#[test]
fn test_secondary_start_stack_is_kseg0_cram() {
    let stack = MipsCpu::secondary_start_stack(0x1f_8000);
    assert_eq!(stack, 0x8000_0000 + 0x1fe0_0000 + 0x1f_8000);
}
