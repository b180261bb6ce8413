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

//! Serial port
//!
//! One character register (reading pops input, writing sends output) and
//! one interrupt-control register per direction. Each direction's control
//! register carries enable/ready/force bits; the slot IRQ is asserted when
//! either direction is enabled and ready-or-forced.
//!
//! Characters take wire time: each one is paced at 19200 baud scaled by a
//! fudge factor (see [`crate::core::clock::SERIAL_NSECS`]), for both
//! output completion and the offering of queued input. Host keystrokes
//! land in a bounded ring; overruns are reported once per episode.

use bitflags::bitflags;

use super::{DeviceCtx, SERIAL_REVISION};
use crate::core::bus::BusError;
use crate::core::clock::{EventKind, SERIAL_NSECS};
use crate::core::error::{EmulatorError, Result};

const SERREG_CHAR: u32 = 0x0;
const SERREG_WIRQ: u32 = 0x4;
const SERREG_RIRQ: u32 = 0x8;

const INBUF_SIZE: usize = 512;

bitflags! {
    /// Per-direction interrupt control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SerIrq: u32 {
        const ON = 0x1;
        const READY = 0x2;
        const FORCE = 0x4;
    }
}

impl SerIrq {
    fn asserted(self) -> bool {
        self.contains(SerIrq::ON) && self.intersects(SerIrq::READY | SerIrq::FORCE)
    }
}

/// Serial device state
pub struct SerialDevice {
    wbusy: bool,
    rbusy: bool,
    rirq: SerIrq,
    wirq: SerIrq,

    readch: u32,
    didread: bool,

    inbuf: [u8; INBUF_SIZE],
    /// characters are read from head, written at tail; empty when equal
    inbufhead: usize,
    inbuftail: usize,

    overrun_in_progress: bool,
}

impl SerialDevice {
    pub fn new(slot: usize, args: &[String]) -> Result<Self> {
        if let Some(arg) = args.first() {
            return Err(EmulatorError::Device {
                slot,
                msg: format!("invalid option {}", arg),
            });
        }
        Ok(SerialDevice {
            wbusy: false,
            rbusy: false,
            rirq: SerIrq::empty(),
            wirq: SerIrq::empty(),
            readch: 0,
            didread: true,
            inbuf: [0; INBUF_SIZE],
            inbufhead: 0,
            inbuftail: 0,
            overrun_in_progress: false,
        })
    }

    fn set_irq(&mut self, ctx: &mut DeviceCtx) {
        if self.rirq.asserted() || self.wirq.asserted() {
            ctx.raise_irq();
        } else {
            ctx.lower_irq();
        }
    }

    /// Output character cleared the wire
    pub fn write_done(&mut self, ctx: &mut DeviceCtx) {
        self.wbusy = false;
        self.wirq.insert(SerIrq::READY);
        self.set_irq(ctx);
    }

    /// Offer the next queued input character, if the guest consumed the
    /// last one; otherwise keep pacing until it does.
    pub fn push_input(&mut self, ctx: &mut DeviceCtx) {
        if self.inbufhead == self.inbuftail {
            self.rbusy = false;
        } else if !self.didread {
            log::warn!("Input character dropped");
            ctx.ext.clock.schedule(
                SERIAL_NSECS,
                0,
                EventKind::SerialRxReady { slot: ctx.slot },
                "serial read",
            );
        } else {
            let ch = self.inbuf[self.inbufhead] as u32;
            self.inbufhead = (self.inbufhead + 1) % INBUF_SIZE;

            self.readch = ch;
            self.didread = false;
            self.rirq.insert(SerIrq::READY);
            self.set_irq(ctx);

            self.rbusy = true;
            ctx.ext.clock.schedule(
                SERIAL_NSECS,
                0,
                EventKind::SerialRxReady { slot: ctx.slot },
                "serial read",
            );
        }
    }

    /// A keystroke arrived from the console
    pub fn input(&mut self, ctx: &mut DeviceCtx, ch: u8) {
        let nexttail = (self.inbuftail + 1) % INBUF_SIZE;
        if nexttail == self.inbufhead {
            if !self.overrun_in_progress {
                log::warn!("Input buffer overrun");
                self.overrun_in_progress = true;
            }
            return;
        }
        self.overrun_in_progress = false;

        self.inbuf[self.inbuftail] = ch;
        self.inbuftail = nexttail;

        if !self.rbusy {
            self.push_input(ctx);
        }
    }

    pub fn fetch(&mut self, ctx: &mut DeviceCtx, offset: u32) -> std::result::Result<u32, BusError> {
        match offset {
            SERREG_CHAR => {
                self.didread = true;
                ctx.ext.stats.rchars += 1;
                Ok(self.readch)
            }
            SERREG_RIRQ => Ok(self.rirq.bits()),
            SERREG_WIRQ => Ok(self.wirq.bits()),
            _ => Err(BusError),
        }
    }

    pub fn store(
        &mut self,
        ctx: &mut DeviceCtx,
        offset: u32,
        val: u32,
    ) -> std::result::Result<(), BusError> {
        match offset {
            SERREG_CHAR => {
                if !self.wbusy {
                    self.wbusy = true;
                    ctx.ext.stats.wchars += 1;
                    ctx.ext.console.putc(val as u8);
                    ctx.ext.clock.schedule(
                        SERIAL_NSECS,
                        0,
                        EventKind::SerialTxDone { slot: ctx.slot },
                        "serial write",
                    );
                }
                Ok(())
            }
            SERREG_RIRQ => {
                self.rirq = SerIrq::from_bits_truncate(val);
                self.set_irq(ctx);
                Ok(())
            }
            SERREG_WIRQ => {
                self.wirq = SerIrq::from_bits_truncate(val);
                self.set_irq(ctx);
                Ok(())
            }
            _ => Err(BusError),
        }
    }

    pub fn dump(&self) {
        log::info!("Serial port rev {}", SERIAL_REVISION);
        log::info!(
            "    Last character typed: {} ({}), which was {}read",
            if (0x20..0x7f).contains(&self.readch) {
                char::from_u32(self.readch).unwrap_or('?')
            } else {
                '?'
            },
            self.readch,
            if self.didread { "" } else { "not " }
        );
        log::info!(
            "    Read interrupts {}{}{}",
            if self.rirq.contains(SerIrq::ON) { "active" } else { "inactive" },
            if self.rirq.contains(SerIrq::READY) { " (asserted)" } else { "" },
            if self.rirq.contains(SerIrq::FORCE) { " (forced)" } else { "" }
        );
        if self.wbusy {
            log::info!("    Write in progress");
        } else {
            log::info!("    Ready for writing");
        }
        log::info!(
            "    Write interrupts {}{}{}",
            if self.wirq.contains(SerIrq::ON) { "active" } else { "inactive" },
            if self.wirq.contains(SerIrq::READY) { " (asserted)" } else { "" },
            if self.wirq.contains(SerIrq::FORCE) { " (forced)" } else { "" }
        );
    }
}
