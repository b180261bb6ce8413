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

//! System integration
//!
//! The `System` owns every component of one emulated machine and runs the
//! main loop. The whole emulator is single-threaded and cooperative: the
//! loop alternates between running a bounded slice of CPU cycles,
//! advancing virtual time by the cycles actually retired, briefly polling
//! external descriptors, and, when every CPU is idle, sleeping until
//! either an event is due or external input arrives.
//!
//! Event model: external events (keystrokes, sockets) enter through the
//! poll dispatcher; internal events through the clock's queue; CPU-
//! triggered events (I/O starts, IPIs) happen during the cycle batch.
//! Any of them may request a poweroff or a debugger stop, which takes
//! effect when control returns to the main loop.

use std::time::Instant;

use crate::core::bus::{config::MainboardConfig, Bus, BusCtx, PERCPU_SIZE, SLOT_MEM};
use crate::core::clock::{Clock, EventKind, WatchdogAction, NSECS_PER_CLOCK};
use crate::core::console::Console;
use crate::core::cpu::{CpuState, CycleOutcome, MipsCpu};
use crate::core::devices::SetupCtx;
use crate::core::error::Result;
use crate::core::gdb::GdbServer;
use crate::core::meter::MeterServer;
use crate::core::poll::{PollSource, PollTable};
use crate::core::stats::Stats;
use crate::core::trace::{TraceKind, Tracing};
use crate::core::ExitCode;

/// Number of CPU cycles between external-descriptor polls
const ROTOR: u64 = 50_000;

/// CPU-side state changes queued by bus-controller register writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuAction {
    /// Start a CPU using the boot block in its CRAM
    Enable(usize),
    /// Drop a CPU in its tracks
    Disable(usize),
}

/// Main-loop control state, shared with devices and the CPU core.
///
/// Components request state transitions here; the transitions are enacted
/// only when execution returns to the main loop.
pub struct Control {
    /// Poweroff requested; takes effect at the next loop boundary
    pub shutoff: bool,
    /// Stopped in the debugger (whether one is attached is separate)
    pub stopped_in_debugger: bool,
    /// The current stop is lethal (the guest wedged the hardware)
    pub stop_is_lethal: bool,
    /// `-X`: exit rather than wait for a debugger on a lethal stop
    pub no_debugger_wait: bool,
    /// An explicit debugger request was seen (typically a guest panic)
    pub got_debugrequest: bool,
    /// A guest asked for a full state dump (trace device)
    pub dump_requested: bool,

    /// Remote debugging is initialized
    pub gdb_listening: bool,
    /// A debugger is currently attached
    pub gdb_connected: bool,

    /// Disk doom counter; zero when disarmed
    doom_counter: u32,

    /// Queued CPU enable/disable actions from CPUE writes
    pub cpu_actions: Vec<CpuAction>,
}

impl Control {
    pub fn new() -> Self {
        Control {
            shutoff: false,
            stopped_in_debugger: false,
            stop_is_lethal: false,
            no_debugger_wait: false,
            got_debugrequest: false,
            dump_requested: false,
            gdb_listening: false,
            gdb_connected: false,
            doom_counter: 0,
            cpu_actions: Vec::new(),
        }
    }

    pub fn poweroff(&mut self) {
        self.shutoff = true;
    }

    pub fn enter_debugger(&mut self, lethal: bool) {
        self.stopped_in_debugger = true;
        self.stop_is_lethal = lethal;
    }

    pub fn leave_debugger(&mut self) {
        self.stopped_in_debugger = false;
        self.stop_is_lethal = false;
    }

    pub fn note_debugrequest(&mut self) {
        self.got_debugrequest = true;
    }

    /// The guest did something illegal to the hardware: report it, and
    /// wedge into the debugger with the lethal flag.
    pub fn hang(&mut self, clock: &mut Clock, msg: &str) {
        log::error!("{}", msg);
        log::error!("You did something the hardware didn't like; dropping to the debugger");
        self.enter_debugger(true);
        clock.stop_cycling = true;
    }

    /// Can a builtin breakpoint at this address be handled?
    ///
    /// Only with remote debugging initialized, only in the directly
    /// mapped kernel range, and - with `-X` set and no debugger attached
    /// - not at all, so the guest's own breakpoint trap fires instead.
    pub fn gdb_can_handle(&self, pcaddr: u32) -> bool {
        if !self.gdb_listening {
            return false;
        }
        if !self.gdb_connected && self.no_debugger_wait {
            return false;
        }
        let (start, end) = MipsCpu::debug_bp_region();
        pcaddr >= start && pcaddr < end
    }

    /// Arm the doom counter
    pub fn arm_doom(&mut self, count: u32) {
        self.doom_counter = count;
    }

    /// Count down one write start; true when doom arrives
    pub fn doom_tick(&mut self) -> bool {
        if self.doom_counter > 0 {
            self.doom_counter -= 1;
            if self.doom_counter == 0 {
                return true;
            }
        }
        false
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

/// Options from the command line that shape machine construction
#[derive(Debug, Clone, Default)]
pub struct SystemOptions {
    /// Pass signal-generating characters through to the guest
    pub pass_signals: bool,
    /// Arm the disk doom counter
    pub doom: u32,
    /// Progress watchdog timeout in seconds
    pub progress_secs: Option<u32>,
    /// `-t` trace flag letters
    pub trace_flags: Option<String>,
    /// `-f` trace output file
    pub trace_file: Option<String>,
    /// `-X`: exit instead of waiting for a debugger
    pub no_debugger_wait: bool,
}

/// One emulated machine
pub struct System {
    cpus: Vec<MipsCpu>,
    pub bus: Bus,
    pub clock: Clock,
    pub stats: Stats,
    pub control: Control,
    pub tracing: Tracing,
    pub console: Console,
    pub poll: PollTable,
    gdb: Option<GdbServer>,
    meter: Option<MeterServer>,
}

impl System {
    /// Construct a machine from a configuration file.
    ///
    /// `extra` carries `-C SLOT:ARG` overrides.
    pub fn configure(config: &str, extra: &[String], options: SystemOptions) -> Result<System> {
        let mut tracing = Tracing::new();
        if let Some(flags) = &options.trace_flags {
            tracing.set_flags(flags)?;
        }
        if let Some(path) = &options.trace_file {
            tracing.set_tracefile(path)?;
        }

        let console = Console::init(options.pass_signals);
        let mut clock = Clock::new();
        let mut poll = PollTable::new();
        if console.has_input() {
            poll.watch(0, PollSource::Console);
        }

        let (bus, mb) = {
            let mut setup = SetupCtx {
                clock: &mut clock,
                poll: &mut poll,
            };
            crate::core::bus::config::configure(config, extra, &mut setup)?
        };

        let MainboardConfig { ncpus, .. } = mb;
        let mut cpus: Vec<MipsCpu> = (0..ncpus).map(MipsCpu::new).collect();
        cpus[0].state = CpuState::Running;

        let mut control = Control::new();
        control.no_debugger_wait = options.no_debugger_wait;
        if options.doom > 0 {
            control.arm_doom(options.doom);
        }
        if let Some(secs) = options.progress_secs {
            clock.set_progress_timeout(secs);
        }

        let mut sys = System {
            cpus,
            bus,
            clock,
            stats: Stats::new(ncpus),
            control,
            tracing,
            console,
            poll,
            gdb: None,
            meter: None,
        };

        // Fill in the reset-vector page mappings for every CPU.
        {
            let System {
                cpus,
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
            for cpu in cpus.iter_mut() {
                cpu.refetch_pc(bus, &mut ctx);
            }
        }

        Ok(sys)
    }

    /// Load an ELF kernel and point CPU 0 at it
    pub fn load_kernel(&mut self, image: &str, argument: &str) -> Result<()> {
        crate::core::loader::load_kernel(self, image, argument)
    }

    /// Attach the remote debugger listener
    pub fn attach_gdb(&mut self, gdb: GdbServer) {
        self.poll.watch(gdb.listener_fd(), PollSource::GdbListener);
        self.control.gdb_listening = true;
        self.gdb = Some(gdb);
    }

    /// Attach the metering socket listener
    pub fn attach_meter(&mut self, meter: MeterServer) {
        self.poll.watch(meter.listener_fd(), PollSource::MeterListener);
        self.meter = Some(meter);
    }

    pub fn ncpus(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, n: usize) -> &MipsCpu {
        &self.cpus[n]
    }

    pub fn cpu_mut(&mut self, n: usize) -> &mut MipsCpu {
        &mut self.cpus[n]
    }

    /// Split borrow of a single CPU and the bus, for debug stores that need both at once.
    pub fn cpu_and_bus(&mut self, n: usize) -> (&MipsCpu, &mut Bus) {
        (&self.cpus[n], &mut self.bus)
    }

    /// Borrow CPU 0, the bus, and a device context side by side (used by
    /// the kernel loader)
    pub fn split_cpu0(&mut self) -> (&mut MipsCpu, &mut Bus, BusCtx<'_>) {
        let System {
            cpus,
            bus,
            clock,
            stats,
            control,
            tracing,
            console,
            ..
        } = self;
        (
            &mut cpus[0],
            bus,
            BusCtx {
                clock,
                stats,
                control,
                tracing,
                console,
            },
        )
    }

    /// Bit k set iff cpus[k] is Running
    pub fn running_mask(&self) -> u32 {
        let mut mask = 0;
        for (i, cpu) in self.cpus.iter().enumerate() {
            if cpu.state == CpuState::Running {
                mask |= 1u32 << i;
            }
        }
        mask
    }

    /// Restart a CPU at a debugger-supplied address
    pub fn debug_set_entrypoint(&mut self, cpunum: usize, addr: u32) {
        let System {
            cpus,
            bus,
            clock,
            stats,
            control,
            tracing,
            console,
            ..
        } = self;
        let mut ctx = BusCtx {
            clock,
            stats,
            control,
            tracing,
            console,
        };
        if let Err(msg) = cpus[cpunum].set_entrypoint(bus, &mut ctx, addr) {
            ctx.control.hang(ctx.clock, &msg);
        }
    }

    /// Borrow an arbitrary CPU alongside the bus context (test support)
    #[cfg(test)]
    pub(crate) fn split_cpu(&mut self, n: usize) -> (&mut MipsCpu, &mut Bus, BusCtx<'_>) {
        let System {
            cpus,
            bus,
            clock,
            stats,
            control,
            tracing,
            console,
            ..
        } = self;
        (
            &mut cpus[n],
            bus,
            BusCtx {
                clock,
                stats,
                control,
                tracing,
                console,
            },
        )
    }

    /// The CPU that hit a breakpoint; the first if several did, CPU 0 if
    /// none did.
    pub fn break_cpu(&self) -> usize {
        self.cpus
            .iter()
            .position(|c| c.hit_breakpoint())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Cycle execution

    /// Run one cycle across all CPUs, in ascending index order. Returns
    /// false when the cycle must not be billed (a builtin breakpoint
    /// fired, or the clock slips on a mixed multiprocessor stop).
    fn cpu_cycle(&mut self) -> bool {
        let mut breakpoints = 0usize;

        let System {
            cpus,
            bus,
            clock,
            stats,
            control,
            tracing,
            console,
            ..
        } = self;

        for n in 0..cpus.len() {
            let mut ctx = BusCtx {
                clock: &mut *clock,
                stats: &mut *stats,
                control: &mut *control,
                tracing: &mut *tracing,
                console: &mut *console,
            };

            // Propagate the aggregated interrupt lines; this also wakes
            // an idle CPU whose line just came up.
            let (lb, ipi) = bus.irq.lines(n);
            let cpu = &mut cpus[n];
            cpu.set_irqs(&mut ctx, lb, ipi);

            if cpu.state != CpuState::Running {
                ctx.stats.percpu[n].icycles += 1;
                continue;
            }

            if cpu.cycle(bus, &mut ctx) == CycleOutcome::Breakpoint {
                breakpoints += 1;
            }

            // CPUE writes during this cycle take effect at the cycle
            // boundary.
            if !control.cpu_actions.is_empty() {
                let actions = std::mem::take(&mut control.cpu_actions);
                let mut ctx = BusCtx {
                    clock: &mut *clock,
                    stats: &mut *stats,
                    control: &mut *control,
                    tracing: &mut *tracing,
                    console: &mut *console,
                };
                apply_cpu_actions(cpus, bus, &mut ctx, &actions);
            }
        }

        breakpoints == 0
    }

    /// Run CPUs for up to `maxcycles` cycles; returns cycles actually
    /// spent. Scheduling a near event or hitting a breakpoint breaks the
    /// batch early. When every CPU goes idle the rest of the batch is
    /// billed as idle time in one step.
    pub fn cpu_cycles(&mut self, maxcycles: u64) -> u64 {
        self.clock.stop_cycling = false;
        let mut i = 0u64;
        while i < maxcycles && !self.clock.stop_cycling {
            if self.cpu_cycle() {
                i += 1;
                self.clock.cycles_count = i;
            }
            if self.running_mask() == 0 && !self.clock.stop_cycling {
                i = maxcycles;
            }
        }
        self.clock.cycles_count = 0;
        i
    }

    /// Bill a batch of executed cycles: advance virtual time, fire due
    /// events, feed the watchdog.
    pub fn clock_ticks(&mut self, nticks: u64) {
        self.stats.tot_rcycles += nticks;
        self.clock.advance(nticks * NSECS_PER_CLOCK);
        self.drain_events();

        match self.clock.check_watchdog() {
            None => {}
            Some(WatchdogAction::Warn(secs)) => {
                log::warn!("Caution: no progress in {} seconds", secs);
            }
            Some(WatchdogAction::Stop(secs)) => {
                log::error!("No progress in {} seconds; dropping to debugger", secs);
                self.control.enter_debugger(true);
            }
        }
    }

    /// Dispatch every event whose deadline has arrived, in order
    fn drain_events(&mut self) {
        while let Some(ev) = self.clock.pop_due() {
            if ev.kind == EventKind::MeterSample {
                self.meter_sample();
                continue;
            }
            let System {
                bus,
                clock,
                stats,
                control,
                tracing,
                console,
                ..
            } = self;
            let mut ctx = BusCtx {
                clock,
                stats,
                control,
                tracing,
                console,
            };
            bus.dispatch_event(ev, &mut ctx);
        }
        self.sync_irq_lines();
    }

    /// Refresh every CPU's view of its interrupt lines (waking idle ones)
    fn sync_irq_lines(&mut self) {
        let System {
            cpus,
            bus,
            clock,
            stats,
            control,
            tracing,
            console,
            ..
        } = self;
        for n in 0..cpus.len() {
            let mut ctx = BusCtx {
                clock: &mut *clock,
                stats: &mut *stats,
                control: &mut *control,
                tracing: &mut *tracing,
                console: &mut *console,
            };
            let (lb, ipi) = bus.irq.lines(n);
            cpus[n].set_irqs(&mut ctx, lb, ipi);
        }
    }

    /// Run a single cycle for the debugger. Only the time actually spent
    /// is billed; hitting a builtin breakpoint bills none, keeping
    /// breakpoints transparent down to single-cycle races.
    pub fn onecycle(&mut self) {
        let ticks = self.cpu_cycles(1);
        self.clock_ticks(ticks);
    }

    // ------------------------------------------------------------------
    // External event dispatch

    /// One multiplexed wait. `dotimeout` false blocks indefinitely.
    /// Returns the wall time slept.
    fn poll_io(&mut self, dotimeout: bool, nsecs: u64) -> u64 {
        let (slept, ready) = self.poll.wait(if dotimeout { Some(nsecs) } else { None });
        if ready.is_empty() {
            return slept;
        }
        self.clock.extra_select_time = slept;
        for src in ready {
            self.dispatch_source(src);
        }
        self.clock.extra_select_time = 0;
        slept
    }

    fn dispatch_source(&mut self, src: PollSource) {
        match src {
            PollSource::Console => {
                let bytes = self.console.read_input();
                if bytes.is_empty() {
                    // console input closed; stop watching it
                    self.poll.unwatch(0);
                    return;
                }
                let System {
                    bus,
                    clock,
                    stats,
                    control,
                    tracing,
                    console,
                    ..
                } = self;
                let mut ctx = BusCtx {
                    clock,
                    stats,
                    control,
                    tracing,
                    console,
                };
                for b in bytes {
                    bus.console_input(b, &mut ctx);
                }
                self.sync_irq_lines();
            }
            PollSource::Net { slot } => {
                let System {
                    bus,
                    clock,
                    stats,
                    control,
                    tracing,
                    console,
                    ..
                } = self;
                let mut ctx = BusCtx {
                    clock,
                    stats,
                    control,
                    tracing,
                    console,
                };
                bus.net_receive(slot, &mut ctx);
                self.sync_irq_lines();
            }
            PollSource::GdbListener => {
                if let Some(mut gdb) = self.gdb.take() {
                    gdb.accept_connection(self);
                    self.gdb = Some(gdb);
                }
            }
            PollSource::GdbConn => {
                if let Some(mut gdb) = self.gdb.take() {
                    gdb.handle_input(self);
                    self.gdb = Some(gdb);
                }
            }
            PollSource::MeterListener => {
                if let Some(mut meter) = self.meter.take() {
                    meter.accept_connection(self);
                    self.meter = Some(meter);
                }
            }
            PollSource::MeterConn => {
                if let Some(mut meter) = self.meter.take() {
                    meter.handle_input(self);
                    self.meter = Some(meter);
                }
            }
        }
    }

    /// Periodic metering report
    fn meter_sample(&mut self) {
        if let Some(mut meter) = self.meter.take() {
            meter.sample(self);
            self.meter = Some(meter);
        }
    }

    // ------------------------------------------------------------------
    // Main loop

    /// No CPU has work; sleep until an event is due or input arrives.
    ///
    /// If the next event is more than 10 ms ahead of wall-clock time,
    /// sleep in poll to sync virtual and physical time; otherwise snap
    /// virtual time straight to the event. With nothing pending, block
    /// until something external happens.
    fn wait_for_irq(&mut self) {
        while self.running_mask() == 0
            && !self.control.shutoff
            && !self.control.stopped_in_debugger
        {
            let slept = if let Some(deadline) = self.clock.next_deadline() {
                let vnow = self.clock.now();
                let ahead = self.clock.ahead_of_wall(vnow, deadline);
                if ahead > 10_000_000 {
                    let slept = self.poll_io(true, ahead);
                    slept.min(ahead)
                } else {
                    // not worth really sleeping; just snap
                    let snap = deadline - vnow;
                    self.poll_io(true, 0);
                    snap
                }
            } else {
                self.poll_io(false, 0)
            };

            let icycles = self.clock.bill_idle(slept);
            self.stats.tot_icycles += icycles;
            self.drain_events();
        }
    }

    /// Sit in the debugger until released
    fn stop_loop(&mut self) {
        if let Some(mut gdb) = self.gdb.take() {
            gdb.start_break(self);
            self.gdb = Some(gdb);
        } else if self.control.no_debugger_wait && self.control.stop_is_lethal {
            log::error!("Exiting instead of waiting for debugger...");
            self.console.cleanup();
            std::process::exit(ExitCode::Crash as i32);
        } else if self.control.no_debugger_wait {
            log::warn!("Not waiting for debugger...");
            self.control.leave_debugger();
        } else {
            log::info!("Waiting for debugger connection...");
        }

        while self.control.stopped_in_debugger && !self.control.shutoff {
            self.poll_io(false, 0);
        }
    }

    /// Wait for an initial debugger connection before executing (`-w`)
    pub fn wait_for_debugger(&mut self) {
        self.control.enter_debugger(false);
        self.stop_loop();
    }

    fn run_loop(&mut self) {
        let mut rotor = ROTOR;
        while !self.control.shutoff {
            let mut goticks = self.clock.run_ticks() as u64;
            if goticks > rotor {
                goticks = rotor;
            }
            let wentticks = self.cpu_cycles(goticks);
            self.clock_ticks(wentticks);

            rotor -= wentticks;
            if rotor == 0 {
                rotor = ROTOR;
                self.poll_io(true, 0);
            }

            if self.control.dump_requested {
                self.control.dump_requested = false;
                self.dump_state();
            }

            if self.control.stopped_in_debugger {
                self.stop_loop();
            }

            if self.running_mask() == 0 && !self.control.shutoff {
                self.tracing
                    .hw(TraceKind::Irq, format_args!("Waiting for interrupt"));
                self.wait_for_irq();
            }
        }
    }

    /// Run to completion: execute until poweroff, then report statistics
    /// and run the cleanup hooks. Returns the process exit code.
    pub fn run(&mut self) -> ExitCode {
        let start = Instant::now();
        self.run_loop();
        let elapsed = start.elapsed();

        let totcycles = self.stats.report();
        let secs = elapsed.as_secs_f64();
        println!(
            "Elapsed real time: {:.6} seconds ({:.6} mhz)",
            secs,
            if secs > 0.0 {
                totcycles as f64 / (secs * 1_000_000.0)
            } else {
                0.0
            }
        );

        self.bus.cleanup();
        self.clock.report();
        self.tracing.flush();
        self.console.cleanup();

        if self.control.got_debugrequest {
            ExitCode::Crash
        } else {
            ExitCode::Normal
        }
    }

    /// Dump the entire machine state
    pub fn dump_state(&mut self) {
        log::info!(
            "mainloop: shutoff {} stopped_in_debugger {}",
            self.control.shutoff as u32,
            self.control.stopped_in_debugger as u32
        );
        log::info!("trace flags: {}", self.tracing.describe());
        self.stats.report();
        self.clock.dump();
        for cpu in &self.cpus {
            cpu.dump();
        }
        self.bus.dump();
    }
}

/// Enact queued CPUE transitions. Enabling a CPU loads its PC and first
/// argument from the bottom of its CRAM and points the stack at the top
/// of the CRAM, addressed through kseg0.
fn apply_cpu_actions(
    cpus: &mut [MipsCpu],
    bus: &mut Bus,
    ctx: &mut BusCtx,
    actions: &[CpuAction],
) {
    use crate::core::bus::mainboard::{CRAM_END, PERCPU_BASE};
    use crate::core::bus::CONTROLLER_SLOT;

    for &action in actions {
        match action {
            CpuAction::Disable(n) => {
                cpus[n].state = CpuState::Disabled;
            }
            CpuAction::Enable(n) => {
                let cram = &bus.irq.cpus[n].cram;
                let pcva = u32::from_be_bytes([cram[0], cram[1], cram[2], cram[3]]);
                let arg = u32::from_be_bytes([cram[4], cram[5], cram[6], cram[7]]);

                let cramoffset = SLOT_MEM * CONTROLLER_SLOT as u32
                    + PERCPU_BASE
                    + n as u32 * PERCPU_SIZE
                    + CRAM_END;
                let stackva = MipsCpu::secondary_start_stack(cramoffset);

                if let Err(msg) = cpus[n].set_entrypoint(bus, ctx, pcva) {
                    ctx.control.hang(ctx.clock, &msg);
                    continue;
                }
                cpus[n].set_stack(stackva, arg);
                cpus[n].state = CpuState::Running;
            }
        }
    }
}

#[cfg(test)]
mod tests;
