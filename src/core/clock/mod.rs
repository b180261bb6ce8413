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

//! Virtual-time scheduler
//!
//! The machine keeps two notions of time: physical time (on the host) and
//! virtual time (inside the emulated machine). They are nominally
//! synchronized but diverge in practice because the CPU core does not run
//! at its nominal speed.
//!
//! Virtual time advances as follows:
//! - when the main loop is stopped in the debugger: not at all
//! - when a CPU is running: [`NSECS_PER_CLOCK`] per CPU clock
//! - when no CPU is running and a timed event is pending: instantly
//! - when no CPU is running and no events are pending: synchronously with
//!   physical time
//!
//! Both kinds of time are 64-bit nanosecond counts with startup at zero.
//! The time the guest reads from the timer device adds a saved startup
//! offset.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Nanoseconds per CPU clock: 40 ns, i.e. 25 MHz
pub const NSECS_PER_CLOCK: u64 = 40;

/// Poweroff takes 5 ms
pub const POWEROFF_NSECS: u64 = 5_000_000;

/// Serial wire time per character: 19200 bps, sped up by a fixed fudge
/// factor so console output is not glacial at emulated CPU speeds.
pub const SERIAL_FUDGE: u64 = 25;
pub const SERIAL_NSECS: u64 = 1_000_000_000 / ((19200 * SERIAL_FUDGE) / 10);

/// All emufs operations take 5 ms
pub const EMUFS_NSECS: u64 = 5_000_000;

/// Emit metering data every 2/10 of a second
pub const METER_NSECS: u64 = 200_000_000;

const NSECS_PER_SEC: u64 = 1_000_000_000;

/// Most cycles a CPU batch may run before replanning: 5 ms of virtual time
const MAX_RUN_CYCLES: u32 = 125_000;

/// Event pool cap; running out means a device is leaking events
const MAX_EVENTS: usize = 1024;

/// What a scheduled event does when it fires
///
/// The original encoded these as function pointers with opaque user data;
/// here each producer gets a variant and the machine dispatches by match.
/// The 32-bit `code` riding along in [`Event`] carries the producer's
/// argument (a generation counter, a cylinder number, a completion code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Main-loop shutoff plus controller IRQ to break the idle wait
    Poweroff,
    /// Countdown timer expiry; `code` is the timer generation
    TimerExpire { slot: usize },
    /// Disk head arrived at the cylinder in `code`
    DiskSeekDone { slot: usize },
    /// Disk rotational/cache wait finished; `code` is the new I/O phase
    DiskWaitDone { slot: usize },
    /// Serial output character has cleared the wire
    SerialTxDone { slot: usize },
    /// Serial input pacing tick: offer the next queued character
    SerialRxReady { slot: usize },
    /// Emufs operation latency elapsed
    EmufsDone { slot: usize },
    /// NIC transmit latency elapsed
    NetSend { slot: usize },
    /// NIC keepalive to the hub
    NetKeepalive { slot: usize },
    /// Periodic metering report
    MeterSample,
}

/// One scheduled event
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// Absolute virtual-time deadline in nanoseconds
    pub deadline: u64,
    /// Producer-defined argument (generation counter etc.)
    pub code: u32,
    pub kind: EventKind,
    /// Human-readable description for state dumps
    pub desc: &'static str,
}

/// Action requested by the progress watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// No progress for one timeout period: print a caution
    Warn(u64),
    /// No progress for two periods: drop to the debugger, lethally
    Stop(u64),
}

/// The virtual clock and event queue
pub struct Clock {
    virtual_now: u64,
    start_secs: u32,
    start_nsecs: u32,

    /// Sorted ascending by deadline; ties keep insertion order
    queue: Vec<Event>,

    /// Deadline the CPU was told it may run until, if any. Scheduling an
    /// event before it must stop the current CPU batch so the main loop
    /// replans.
    running_to: Option<u64>,

    /// Set to break the current CPU batch; consumed by the cycle loop
    pub stop_cycling: bool,

    /// Cycles into the current CPU batch, included in `now()` so that
    /// events scheduled mid-batch land at the right virtual time
    pub cycles_count: u64,

    /// Wall time spent blocked in poll while dispatching external events,
    /// billed into `now()` for the duration of the dispatch
    pub extra_select_time: u64,

    /// Deterministic generator for event jitter, the boot offset, and the
    /// random device
    rng: StdRng,

    // progress watchdog
    progress: bool,
    check_progress: bool,
    progress_warned: bool,
    progress_timeout: u64,
    progress_deadline: u64,

    /// Sub-cycle remainder when billing idle wall time as cycles
    idle_slop: u64,
}

impl Clock {
    /// Create the clock, anchored to the current wall-clock second.
    ///
    /// Startup pretends to be at the exact start of the current second so
    /// the disk rotation model starts from a deterministic angular
    /// position. Virtual time is then shifted ahead by a random fraction
    /// of 10 ms so back-to-back runs don't all resonate identically.
    pub fn new() -> Self {
        let start_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let mut clock = Clock {
            virtual_now: 0,
            start_secs,
            start_nsecs: 0,
            queue: Vec::with_capacity(64),
            running_to: None,
            stop_cycling: false,
            cycles_count: 0,
            extra_select_time: 0,
            rng: StdRng::seed_from_u64(0),
            progress: false,
            check_progress: false,
            progress_warned: false,
            progress_timeout: 0,
            progress_deadline: 0,
            idle_slop: 0,
        };
        let offset = clock.rng.gen_range(0..10_000_000u64);
        clock.virtual_now += offset;
        clock
    }

    /// Reseed the deterministic generator (random device `seed=` option)
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Draw a random 32-bit value (random device register)
    pub fn random_u32(&mut self) -> u32 {
        self.rng.gen()
    }

    /// Current virtual time, accounting for being partway through a CPU
    /// batch and for time spent blocked in poll.
    #[inline]
    pub fn now(&self) -> u64 {
        self.virtual_now + NSECS_PER_CLOCK * self.cycles_count + self.extra_select_time
    }

    /// Advance virtual time by `nsecs`. Due events are drained by the
    /// machine via [`Clock::pop_due`] afterwards.
    pub fn advance(&mut self, nsecs: u64) {
        self.virtual_now += nsecs;
    }

    /// Pop the next event whose deadline has been reached, in strict
    /// deadline order (ties in insertion order).
    pub fn pop_due(&mut self) -> Option<Event> {
        if let Some(head) = self.queue.first() {
            if head.deadline <= self.now() {
                return Some(self.queue.remove(0));
            }
        }
        None
    }

    /// Deadline of the next pending event, if any
    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.first().map(|e| e.deadline)
    }

    /// Schedule an event `nsecs` from now.
    ///
    /// The delay is jittered upward by a pseudo-random fraction of up to
    /// 1%, deterministic given the seeded generator: real hardware is never
    /// exactly periodic, and guests that accidentally depend on exact
    /// periods should find out early.
    pub fn schedule(&mut self, nsecs: u64, code: u32, kind: EventKind, desc: &'static str) {
        if self.queue.len() >= MAX_EVENTS {
            panic!("internal error: too many pending hardware events");
        }

        let jitter = (nsecs as f64 * 0.01 * self.rng.gen::<f64>()) as u64;
        let deadline = self.now() + nsecs + jitter;

        // If this lands before the deadline the CPU was told it could run
        // until, break the batch so the main loop replans.
        if let Some(rt) = self.running_to {
            if deadline < rt {
                self.stop_cycling = true;
                self.running_to = None;
            }
        }

        let pos = self
            .queue
            .iter()
            .position(|e| deadline < e.deadline)
            .unwrap_or(self.queue.len());
        self.queue.insert(
            pos,
            Event {
                deadline,
                code,
                kind,
                desc,
            },
        );
    }

    /// How many CPU cycles may run before the next scheduled event.
    ///
    /// Rounded up: an event due less than one cycle in the future must
    /// still get a cycle to be dispatched after. Capped at 5 ms of virtual
    /// time so external input is serviced regularly.
    pub fn run_ticks(&mut self) -> u32 {
        if let Some(head) = self.queue.first() {
            let vnow = self.now();
            if head.deadline <= vnow {
                return 0;
            }
            if head.deadline < vnow + MAX_RUN_CYCLES as u64 * NSECS_PER_CLOCK {
                self.running_to = Some(head.deadline);
                let nsecs = head.deadline - vnow + NSECS_PER_CLOCK - 1;
                return (nsecs / NSECS_PER_CLOCK) as u32;
            }
        }
        MAX_RUN_CYCLES
    }

    /// How far `deadline` is ahead of physical wall time; zero if it is
    /// not ahead. If virtual time is already ahead of physical time, the
    /// report is limited to how far `deadline` is in the virtual future.
    pub fn ahead_of_wall(&self, vnow: u64, deadline: u64) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs() as i64 - self.start_secs as i64;
        if secs < 0 {
            return 0;
        }
        let pnsecs =
            (secs as u64 * NSECS_PER_SEC + now.subsec_nanos() as u64) - self.start_nsecs as u64;

        if deadline <= pnsecs {
            0
        } else if vnow <= pnsecs {
            deadline - pnsecs
        } else {
            deadline - vnow
        }
    }

    /// Bill wall time slept while fully idle as idle cycles, keeping the
    /// sub-cycle remainder for next time. Returns the whole cycles billed.
    pub fn bill_idle(&mut self, slept_nsecs: u64) -> u64 {
        let tmp = slept_nsecs + self.idle_slop;
        self.idle_slop = tmp % NSECS_PER_CLOCK;
        self.advance(slept_nsecs);
        tmp / NSECS_PER_CLOCK
    }

    // ------------------------------------------------------------------
    // Guest-visible time of day

    /// Current displayed time (seconds, nanoseconds), including the saved
    /// startup offset
    pub fn time(&self) -> (u32, u32) {
        let now = self.now();
        let mut secs = self.start_secs.wrapping_add((now / NSECS_PER_SEC) as u32);
        let mut nsecs = self.start_nsecs + (now % NSECS_PER_SEC) as u32;
        if nsecs as u64 > NSECS_PER_SEC {
            nsecs -= NSECS_PER_SEC as u32;
            secs = secs.wrapping_add(1);
        }
        (secs, nsecs)
    }

    /// Let the guest adjust the displayed seconds
    pub fn set_secs(&mut self, newsecs: u32) {
        let (oldsecs, _) = self.time();
        self.start_secs = self.start_secs.wrapping_add(newsecs.wrapping_sub(oldsecs));
    }

    /// Let the guest adjust the displayed nanoseconds
    pub fn set_nsecs(&mut self, newnsecs: u32) {
        let (_, oldnsecs) = self.time();
        self.start_nsecs = self
            .start_nsecs
            .wrapping_add(newnsecs.wrapping_sub(oldnsecs));
    }

    // ------------------------------------------------------------------
    // Progress watchdog

    /// Arm the watchdog with a timeout in seconds
    pub fn set_progress_timeout(&mut self, secs: u32) {
        self.check_progress = true;
        self.progress_timeout = secs as u64 * NSECS_PER_SEC;
        self.progress_deadline = self.now() + self.progress_timeout;
    }

    /// Record that a user-mode instruction retired this batch
    #[inline]
    pub fn note_progress(&mut self) {
        self.progress = true;
    }

    /// Called after each batch of billed ticks. Resets the deadline if
    /// progress happened; otherwise escalates warn → stop.
    pub fn check_watchdog(&mut self) -> Option<WatchdogAction> {
        if !self.check_progress {
            return None;
        }
        if self.progress {
            self.progress = false;
            self.progress_deadline = self.now() + self.progress_timeout;
            self.progress_warned = false;
            return None;
        }
        if self.now() < self.progress_deadline {
            return None;
        }
        let secs = self.progress_timeout / NSECS_PER_SEC;
        self.progress_deadline = self.now() + self.progress_timeout;
        if self.progress_warned {
            self.progress_warned = false;
            Some(WatchdogAction::Stop(secs * 2))
        } else {
            self.progress_warned = true;
            Some(WatchdogAction::Warn(secs))
        }
    }

    /// Describe clock state and pending events
    pub fn dump(&self) {
        let vnow = self.now();
        log::info!(
            "clock: {}.{:09} secs elapsed (start at {}.{:09})",
            vnow / NSECS_PER_SEC,
            vnow % NSECS_PER_SEC,
            self.start_secs,
            self.start_nsecs
        );
        if self.queue.is_empty() {
            log::info!("clock: No events pending");
            return;
        }
        for ev in &self.queue {
            log::info!("clock: at {:12}: {}", ev.deadline, ev.desc);
        }
    }

    /// Final elapsed-time report
    pub fn report(&self) {
        let vnow = self.now();
        println!(
            "Elapsed virtual time: {}.{:09} seconds ({} mhz)",
            vnow / NSECS_PER_SEC,
            vnow % NSECS_PER_SEC,
            1000 / NSECS_PER_CLOCK
        );
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_clock() -> Clock {
        let mut c = Clock::new();
        // pin virtual time for predictable assertions
        c.virtual_now = 0;
        c
    }

    #[test]
    fn test_now_includes_batch_cycles() {
        let mut c = quiet_clock();
        assert_eq!(c.now(), 0);
        c.cycles_count = 10;
        assert_eq!(c.now(), 10 * NSECS_PER_CLOCK);
        c.extra_select_time = 7;
        assert_eq!(c.now(), 10 * NSECS_PER_CLOCK + 7);
    }

    #[test]
    fn test_schedule_orders_by_deadline() {
        let mut c = quiet_clock();
        c.schedule(3000, 0, EventKind::MeterSample, "late");
        c.schedule(1000, 0, EventKind::MeterSample, "early");
        c.schedule(2000, 0, EventKind::MeterSample, "middle");
        let deadlines: Vec<u64> = c.queue.iter().map(|e| e.deadline).collect();
        let mut sorted = deadlines.clone();
        sorted.sort_unstable();
        assert_eq!(deadlines, sorted);
        assert_eq!(c.queue[0].desc, "early");
    }

    #[test]
    fn test_schedule_ties_keep_insertion_order() {
        let mut c = quiet_clock();
        // zero delay has zero jitter, so both land at the same deadline
        c.schedule(0, 1, EventKind::MeterSample, "first");
        c.schedule(0, 2, EventKind::MeterSample, "second");
        assert_eq!(c.queue[0].code, 1);
        assert_eq!(c.queue[1].code, 2);
    }

    #[test]
    fn test_jitter_bounded_at_one_percent() {
        let mut c = quiet_clock();
        for _ in 0..50 {
            c.schedule(1_000_000, 0, EventKind::MeterSample, "jitter");
        }
        for ev in &c.queue {
            assert!(ev.deadline >= 1_000_000);
            assert!(ev.deadline <= 1_010_000);
        }
    }

    #[test]
    fn test_pop_due_only_when_reached() {
        let mut c = quiet_clock();
        c.schedule(1000, 42, EventKind::MeterSample, "ev");
        assert!(c.pop_due().is_none());
        let deadline = c.queue[0].deadline;
        c.advance(deadline);
        let ev = c.pop_due().expect("event should be due");
        assert_eq!(ev.code, 42);
        assert!(c.pop_due().is_none());
    }

    #[test]
    fn test_run_ticks_rounds_up() {
        let mut c = quiet_clock();
        // Force an exact deadline to dodge jitter
        c.queue.push(Event {
            deadline: 50,
            code: 0,
            kind: EventKind::MeterSample,
            desc: "t",
        });
        // 50 ns is more than one 40 ns cycle: must round up to 2
        assert_eq!(c.run_ticks(), 2);
    }

    #[test]
    fn test_run_ticks_zero_when_due() {
        let mut c = quiet_clock();
        c.queue.push(Event {
            deadline: 0,
            code: 0,
            kind: EventKind::MeterSample,
            desc: "t",
        });
        assert_eq!(c.run_ticks(), 0);
    }

    #[test]
    fn test_run_ticks_capped_without_events() {
        let mut c = quiet_clock();
        assert_eq!(c.run_ticks(), MAX_RUN_CYCLES);
    }

    #[test]
    fn test_schedule_before_running_target_stops_cpu() {
        let mut c = quiet_clock();
        c.queue.push(Event {
            deadline: 4_000_000,
            code: 0,
            kind: EventKind::MeterSample,
            desc: "far",
        });
        let _ = c.run_ticks();
        assert!(!c.stop_cycling);
        c.schedule(1000, 0, EventKind::MeterSample, "near");
        assert!(c.stop_cycling);
    }

    #[test]
    fn test_guest_time_adjustment() {
        let mut c = quiet_clock();
        c.set_secs(5000);
        let (secs, _) = c.time();
        assert_eq!(secs, 5000);
        c.set_nsecs(123);
        let (_, nsecs) = c.time();
        assert_eq!(nsecs, 123);
    }

    #[test]
    fn test_bill_idle_keeps_slop() {
        let mut c = quiet_clock();
        assert_eq!(c.bill_idle(100), 2); // 100/40 = 2 rem 20
        assert_eq!(c.idle_slop, 20);
        assert_eq!(c.bill_idle(20), 1); // 20+20 = 40
        assert_eq!(c.idle_slop, 0);
    }

    #[test]
    fn test_watchdog_warn_then_stop() {
        let mut c = quiet_clock();
        c.set_progress_timeout(1);
        assert!(c.check_watchdog().is_none());
        c.advance(2_000_000_000);
        assert_eq!(c.check_watchdog(), Some(WatchdogAction::Warn(1)));
        c.advance(2_000_000_000);
        assert_eq!(c.check_watchdog(), Some(WatchdogAction::Stop(2)));
    }

    #[test]
    fn test_watchdog_progress_resets() {
        let mut c = quiet_clock();
        c.set_progress_timeout(1);
        c.advance(2_000_000_000);
        c.note_progress();
        assert!(c.check_watchdog().is_none());
    }

    #[test]
    fn test_monotone_virtual_now() {
        let mut c = quiet_clock();
        let mut last = c.now();
        for _ in 0..10 {
            c.advance(37);
            assert!(c.now() >= last);
            last = c.now();
        }
    }

    #[test]
    fn test_deterministic_random_stream() {
        let mut a = Clock::new();
        let mut b = Clock::new();
        a.reseed(99);
        b.reseed(99);
        for _ in 0..16 {
            assert_eq!(a.random_u32(), b.random_u32());
        }
    }
}
