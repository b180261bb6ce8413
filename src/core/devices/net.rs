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

//! Network interface card
//!
//! A datagram-socket-backed NIC. Every frame on the wire (an AF_UNIX
//! datagram socket shared with the hub daemon) begins with an 8-byte
//! header in network byte order: magic, source address, total length
//! including the header, destination address. Addresses are 16-bit;
//! 0x0000 is the hub and 0xffff is broadcast.
//!
//! Registers:
//!
//! | Offset | Register                         |
//! |--------|----------------------------------|
//! | 0      | Receive interrupt (DONE bit)     |
//! | 4      | Transmit interrupt (DONE bit)    |
//! | 8      | Control (PROMISC, START)         |
//! | 12     | Status (hardware address, r/o)   |
//!
//! The 4 KiB receive and transmit buffers are mapped at offsets 32768 and
//! 36864. Setting START sends one packet from the transmit buffer after
//! the fixed network latency. A header-only keepalive goes to the hub
//! every simulated second so the hub's forwarding table stays current;
//! its failure is reported once as loss of carrier.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use bitflags::bitflags;

use super::{DeviceCtx, SetupCtx, NET_REVISION};
use crate::core::bus::BusError;
use crate::core::clock::EventKind;
use crate::core::error::{EmulatorError, Result};
use crate::core::poll::PollSource;
use crate::core::trace::TraceKind;

const NETREG_READINTR: u32 = 0;
const NETREG_WRITEINTR: u32 = 4;
const NETREG_CONTROL: u32 = 8;
const NETREG_STATUS: u32 = 12;

const NET_READBUF: u32 = 32768;
pub const NET_BUFSIZE: usize = 4096;
const NET_WRITEBUF: u32 = NET_READBUF + NET_BUFSIZE as u32;

/// The hub's link-level address
pub const HUB_ADDR: u16 = 0x0000;
/// The broadcast link-level address
pub const BROADCAST_ADDR: u16 = 0xffff;
/// Magic opening every frame
pub const FRAME_MAGIC: u16 = 0xa4b3;

/// Transit time for every packet: 2 ms
pub const NETWORK_LATENCY: u64 = 2_000_000;

const KEEPALIVE_NSECS: u64 = 1_000_000_000;

bitflags! {
    /// Interrupt register bits (the rest must be written zero)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NetIrq: u32 {
        const DONE = 0x1;
    }
}

bitflags! {
    /// Control register bits (the rest must be written zero)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NetControl: u32 {
        const PROMISC = 0x1;
        const START = 0x2;
    }
}

/// The 8-byte link-level frame header, in network byte order on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub frame: u16,
    pub from: u16,
    pub packetlen: u16,
    pub to: u16,
}

impl LinkHeader {
    pub const SIZE: usize = 8;

    pub fn parse(buf: &[u8]) -> Option<LinkHeader> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(LinkHeader {
            frame: u16::from_be_bytes([buf[0], buf[1]]),
            from: u16::from_be_bytes([buf[2], buf[3]]),
            packetlen: u16::from_be_bytes([buf[4], buf[5]]),
            to: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.frame.to_be_bytes());
        buf[2..4].copy_from_slice(&self.from.to_be_bytes());
        buf[4..6].copy_from_slice(&self.packetlen.to_be_bytes());
        buf[6..8].copy_from_slice(&self.to.to_be_bytes());
    }
}

/// NIC device state
pub struct NetDevice {
    slot: usize,
    socket: UnixDatagram,
    sockpath: PathBuf,
    hubpath: PathBuf,
    hwaddr: u16,

    lost_carrier: bool,

    rirq: NetIrq,
    wirq: NetIrq,
    control: NetControl,

    rbuf: Vec<u8>,
    wbuf: Vec<u8>,
}

impl NetDevice {
    pub fn new(slot: usize, args: &[String], setup: &mut SetupCtx) -> Result<Self> {
        let mut hubname = ".sockets/hub".to_string();
        let mut hwaddr: u16 = HUB_ADDR;

        for arg in args {
            if let Some(v) = arg.strip_prefix("hub=") {
                hubname = v.to_string();
            } else if let Some(v) = arg.strip_prefix("hwaddr=") {
                hwaddr = v.parse().map_err(|_| EmulatorError::Device {
                    slot,
                    msg: format!("invalid hwaddr {}", v),
                })?;
            } else {
                return Err(EmulatorError::Device {
                    slot,
                    msg: format!("invalid option {}", arg),
                });
            }
        }

        if hwaddr == BROADCAST_ADDR || hwaddr == HUB_ADDR {
            return Err(EmulatorError::Device {
                slot,
                msg: "invalid hwaddr or hwaddr not set".into(),
            });
        }

        // The hub replies to whatever address the datagram came from, so
        // bind to an absolute path.
        let cwd = std::env::current_dir()
            .map_err(|e| EmulatorError::io(format!("nic: slot {}: getcwd", slot), e))?;
        let sockpath = cwd.join(format!(".sockets/net-{:04x}", hwaddr));
        let _ = std::fs::remove_file(&sockpath);

        let socket = UnixDatagram::bind(&sockpath).map_err(|e| {
            EmulatorError::io(format!("nic: slot {}: bind {}", slot, sockpath.display()), e)
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| EmulatorError::io(format!("nic: slot {}", slot), e))?;

        setup.poll.watch(socket.as_raw_fd(), PollSource::Net { slot });

        // First keepalive introduces us to the hub as soon as the machine
        // starts running.
        setup
            .clock
            .schedule(0, 0, EventKind::NetKeepalive { slot }, "net keepalive");

        Ok(NetDevice {
            slot,
            socket,
            sockpath,
            hubpath: PathBuf::from(hubname),
            hwaddr,
            lost_carrier: true,
            rirq: NetIrq::empty(),
            wirq: NetIrq::empty(),
            control: NetControl::empty(),
            rbuf: vec![0; NET_BUFSIZE],
            wbuf: vec![0; NET_BUFSIZE],
        })
    }

    fn chkint(&self, ctx: &mut DeviceCtx) {
        if !self.rirq.is_empty() || !self.wirq.is_empty() {
            ctx.raise_irq();
        } else {
            ctx.lower_irq();
        }
    }

    // --------------------------------------------------------------
    // Wire side

    /// Periodic hello to the hub. A connectionless socket means the hub
    /// doesn't know we exist until we send something; repeating it every
    /// simulated second also survives a hub restart.
    pub fn keepalive(&mut self, ctx: &mut DeviceCtx) {
        let header = LinkHeader {
            frame: FRAME_MAGIC,
            from: self.hwaddr,
            packetlen: LinkHeader::SIZE as u16,
            to: HUB_ADDR,
        };
        let mut pkt = [0u8; LinkHeader::SIZE];
        header.write_to(&mut pkt);

        match self.socket.send_to(&pkt, &self.hubpath) {
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::ECONNREFUSED) | Some(libc::ENOENT) | Some(libc::ENOTSOCK)
                ) =>
            {
                if !self.lost_carrier {
                    log::warn!("nic: slot {}: lost carrier", self.slot);
                    self.lost_carrier = true;
                }
                ctx.ext.tracing.hw(
                    TraceKind::Net,
                    format_args!("nic: slot {}: keepalive rejected: {}", self.slot, e),
                );
            }
            Err(e) => {
                log::warn!(
                    "nic: slot {}: keepalive to {} failed: {}",
                    self.slot,
                    self.hubpath.display(),
                    e
                );
            }
            Ok(_) => {
                if self.lost_carrier {
                    log::info!("nic: slot {}: carrier detected", self.slot);
                    self.lost_carrier = false;
                }
                ctx.ext.tracing.hw(
                    TraceKind::Net,
                    format_args!("nic: slot {}: keepalive succeeded", self.slot),
                );
            }
        }

        ctx.ext.clock.schedule(
            KEEPALIVE_NSECS,
            0,
            EventKind::NetKeepalive { slot: self.slot },
            "net keepalive",
        );
    }

    /// Network latency elapsed; put the frame on the wire
    pub fn trigger_send(&mut self, ctx: &mut DeviceCtx) {
        let mut header = match LinkHeader::parse(&self.wbuf) {
            Some(h) => h,
            None => unreachable!("transmit buffer shorter than a header"),
        };

        let len = header.packetlen as usize;
        if len > NET_BUFSIZE {
            ctx.hang("Packet size too long");
            return;
        }

        ctx.ext.tracing.hw(
            TraceKind::Net,
            format_args!("nic: slot {}: starting send ({} bytes)", self.slot, len),
        );

        // Force the link-level header to the right values
        header.frame = FRAME_MAGIC;
        header.from = self.hwaddr;
        header.write_to(&mut self.wbuf);

        if let Err(e) = self.socket.send_to(&self.wbuf[..len], &self.hubpath) {
            log::warn!("nic: slot {}: sendto: {}", self.slot, e);
        }
        ctx.ext.stats.wpkts += 1;

        ctx.ext.tracing.hw(
            TraceKind::Net,
            format_args!("nic: slot {}: packet sent", self.slot),
        );
        self.wirq = NetIrq::DONE;
        self.control.remove(NetControl::START);
        self.chkint(ctx);
    }

    /// Should a frame with this header land in our receive buffer?
    fn wants_frame(&self, header: &LinkHeader) -> bool {
        header.to == self.hwaddr
            || header.to == BROADCAST_ADDR
            || self.control.contains(NetControl::PROMISC)
    }

    /// The socket is readable; pull one datagram
    pub fn receive(&mut self, ctx: &mut DeviceCtx) {
        // If the last packet hasn't been acknowledged, this one is lost.
        let overrun = !self.rirq.is_empty();
        let mut junk = [0u8; LinkHeader::SIZE];

        let r = if overrun {
            self.socket.recv(&mut junk)
        } else {
            self.socket.recv(&mut self.rbuf)
        };

        let n = match r {
            Ok(n) => n,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::WouldBlock {
                    log::warn!("nic: slot {}: recv: {}", self.slot, e);
                }
                return;
            }
        };

        if n < LinkHeader::SIZE {
            ctx.ext.tracing.hw(
                TraceKind::Net,
                format_args!("nic: slot {}: runt packet", self.slot),
            );
            ctx.ext.stats.epkts += 1;
            return;
        }

        let header = if overrun {
            LinkHeader::parse(&junk).unwrap()
        } else {
            LinkHeader::parse(&self.rbuf).unwrap()
        };

        if header.frame != FRAME_MAGIC {
            ctx.ext.tracing.hw(
                TraceKind::Net,
                format_args!("nic: slot {}: framing error", self.slot),
            );
            ctx.ext.stats.epkts += 1;
            return;
        }
        if !self.wants_frame(&header) {
            ctx.ext.tracing.hw(
                TraceKind::Net,
                format_args!("nic: slot {}: packet not for us", self.slot),
            );
            return;
        }
        if header.packetlen as usize != n {
            ctx.ext.tracing.hw(
                TraceKind::Net,
                format_args!("nic: slot {}: bad length", self.slot),
            );
            ctx.ext.stats.epkts += 1;
            return;
        }
        if overrun {
            ctx.ext.tracing.hw(
                TraceKind::Net,
                format_args!("nic: slot {}: overrun", self.slot),
            );
            ctx.ext.stats.dpkts += 1;
            return;
        }

        ctx.ext.stats.rpkts += 1;
        ctx.ext.tracing.hw(
            TraceKind::Net,
            format_args!("nic: slot {}: packet received", self.slot),
        );
        self.rirq = NetIrq::DONE;
        self.chkint(ctx);
    }

    // --------------------------------------------------------------
    // Register side

    fn set_irq(&mut self, ctx: &mut DeviceCtx, val: u32, isread: bool) {
        match NetIrq::from_bits(val) {
            None => ctx.hang("Illegal network interrupt register write"),
            Some(bits) => {
                if isread {
                    self.rirq = bits;
                } else {
                    self.wirq = bits;
                }
                self.chkint(ctx);
            }
        }
    }

    fn set_ctl(&mut self, ctx: &mut DeviceCtx, val: u32) {
        let mut new = match NetControl::from_bits(val) {
            None => {
                ctx.hang("Illegal network control register write");
                return;
            }
            Some(bits) => bits,
        };

        if new.contains(NetControl::START) {
            if self.control.contains(NetControl::START) {
                ctx.hang("Network packet send started while send already in progress");
                return;
            }
            ctx.ext.clock.schedule(
                NETWORK_LATENCY,
                0,
                EventKind::NetSend { slot: self.slot },
                "packet send",
            );
        } else if self.control.contains(NetControl::START) {
            // cannot be turned off explicitly
            new.insert(NetControl::START);
        }
        self.control = new;
    }

    pub fn fetch(&mut self, _ctx: &mut DeviceCtx, offset: u32) -> std::result::Result<u32, BusError> {
        if (NET_READBUF..NET_READBUF + NET_BUFSIZE as u32).contains(&offset) {
            let off = (offset - NET_READBUF) as usize;
            return Ok(u32::from_be_bytes([
                self.rbuf[off],
                self.rbuf[off + 1],
                self.rbuf[off + 2],
                self.rbuf[off + 3],
            ]));
        }
        if (NET_WRITEBUF..NET_WRITEBUF + NET_BUFSIZE as u32).contains(&offset) {
            let off = (offset - NET_WRITEBUF) as usize;
            return Ok(u32::from_be_bytes([
                self.wbuf[off],
                self.wbuf[off + 1],
                self.wbuf[off + 2],
                self.wbuf[off + 3],
            ]));
        }
        match offset {
            NETREG_READINTR => Ok(self.rirq.bits()),
            NETREG_WRITEINTR => Ok(self.wirq.bits()),
            NETREG_CONTROL => Ok(self.control.bits()),
            NETREG_STATUS => Ok(self.hwaddr as u32),
            _ => Err(BusError),
        }
    }

    pub fn store(
        &mut self,
        ctx: &mut DeviceCtx,
        offset: u32,
        val: u32,
    ) -> std::result::Result<(), BusError> {
        if (NET_READBUF..NET_READBUF + NET_BUFSIZE as u32).contains(&offset) {
            let off = (offset - NET_READBUF) as usize;
            self.rbuf[off..off + 4].copy_from_slice(&val.to_be_bytes());
            return Ok(());
        }
        if (NET_WRITEBUF..NET_WRITEBUF + NET_BUFSIZE as u32).contains(&offset) {
            let off = (offset - NET_WRITEBUF) as usize;
            self.wbuf[off..off + 4].copy_from_slice(&val.to_be_bytes());
            return Ok(());
        }
        match offset {
            NETREG_READINTR => {
                self.set_irq(ctx, val, true);
                Ok(())
            }
            NETREG_WRITEINTR => {
                self.set_irq(ctx, val, false);
                Ok(())
            }
            NETREG_CONTROL => {
                self.set_ctl(ctx, val);
                Ok(())
            }
            NETREG_STATUS => Err(BusError),
            _ => Err(BusError),
        }
    }

    pub fn cleanup(&mut self) {
        let _ = std::fs::remove_file(&self.sockpath);
    }

    pub fn dump(&self) {
        log::info!("Network interface rev {}", NET_REVISION);
        log::info!("    Hub: {}", self.hubpath.display());
        log::info!(
            "    Carrier: {}",
            if self.lost_carrier { "none" } else { "detected" }
        );
        log::info!(
            "    rirq: {}  wirq: {}  control: {}  status: 0x{:04x}",
            self.rirq.bits(),
            self.wirq.bits(),
            self.control.bits(),
            self.hwaddr
        );
    }
}
