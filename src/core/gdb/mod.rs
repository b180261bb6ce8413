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

//! Remote debugger stub
//!
//! Speaks the gdb remote serial protocol over TCP (`-p PORT`) or an
//! AF_UNIX socket (`.sockets/gdb`). Packets are `$payload#cc` with a
//! checksum equal to the mod-256 sum of the payload bytes, acknowledged
//! with `+`/`-`.
//!
//! Supported packets: `?`, `g`, `m`, `M`, `c`, `D`, `k`, `s`, `Hc`/`Hg`,
//! `T`, `qC`, `qfThreadInfo`, `qsThreadInfo`, `qThreadExtraInfo`;
//! `z`/`Z` and everything else report not-supported. The thread id for
//! CPU N is N + 10.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};

use crate::core::error::{EmulatorError, Result};
use crate::core::poll::PollSource;
use crate::core::system::System;
use crate::core::ExitCode;

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    fn fd(&self) -> RawFd {
        match self {
            Stream::Tcp(s) => s.as_raw_fd(),
            Stream::Unix(s) => s.as_raw_fd(),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) {
        let r = match self {
            Stream::Tcp(s) => s.write_all(buf),
            Stream::Unix(s) => s.write_all(buf),
        };
        if let Err(e) = r {
            log::warn!("gdbcomm: write: {}", e);
        }
    }
}

/// The remote debugger endpoint
pub struct GdbServer {
    listener: Listener,
    conn: Option<Stream>,
    inbuf: Vec<u8>,
    /// CPU that other operations apply to (`Hg`); reset to the CPU that
    /// stopped at each break
    debug_cpu: usize,
}

impl GdbServer {
    /// Listen on TCP (the `-p` option)
    pub fn listen_tcp(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| EmulatorError::io(format!("gdb: bind port {}", port), e))?;
        Ok(GdbServer {
            listener: Listener::Tcp(listener),
            conn: None,
            inbuf: Vec::new(),
            debug_cpu: 0,
        })
    }

    /// Listen on an AF_UNIX socket (the default)
    pub fn listen_unix(path: &str) -> Result<Self> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .map_err(|e| EmulatorError::io(format!("gdb: bind {}", path), e))?;
        Ok(GdbServer {
            listener: Listener::Unix(listener),
            conn: None,
            inbuf: Vec::new(),
            debug_cpu: 0,
        })
    }

    pub fn listener_fd(&self) -> RawFd {
        match &self.listener {
            Listener::Tcp(l) => l.as_raw_fd(),
            Listener::Unix(l) => l.as_raw_fd(),
        }
    }

    /// A debugger is connecting
    pub fn accept_connection(&mut self, sys: &mut System) {
        let stream = match &self.listener {
            Listener::Tcp(l) => l.accept().map(|(s, _)| Stream::Tcp(s)),
            Listener::Unix(l) => l.accept().map(|(s, _)| Stream::Unix(s)),
        };
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("gdb: accept: {}", e);
                return;
            }
        };

        if self.conn.is_some() {
            // one debugger at a time
            log::warn!("gdb: rejecting second debugger connection");
            return;
        }

        log::info!("New debugger connection");
        sys.poll.watch(stream.fd(), PollSource::GdbConn);
        self.conn = Some(stream);
        sys.control.gdb_connected = true;

        // A new connection implies the debugger wants us stopped.
        sys.clock.stop_cycling = true;
        sys.control.enter_debugger(false);
    }

    fn drop_connection(&mut self, sys: &mut System) {
        if let Some(conn) = self.conn.take() {
            sys.poll.unwatch(conn.fd());
        }
        self.inbuf.clear();
        sys.control.gdb_connected = false;
        sys.control.leave_debugger();
    }

    /// Entering the stopped state: tell the debugger, or handle the
    /// dontwait cases when none is attached.
    pub fn start_break(&mut self, sys: &mut System) {
        self.debug_cpu = sys.break_cpu();
        if self.conn.is_some() {
            self.send_stopinfo();
        } else if sys.control.no_debugger_wait && sys.control.stop_is_lethal {
            log::error!("Exiting instead of waiting for debugger...");
            sys.console.cleanup();
            std::process::exit(ExitCode::Crash as i32);
        } else if sys.control.no_debugger_wait {
            log::warn!("Not waiting for debugger...");
            sys.control.leave_debugger();
        } else {
            log::info!("Waiting for debugger connection...");
        }
    }

    /// Data arrived on the debugger connection
    pub fn handle_input(&mut self, sys: &mut System) {
        let mut buf = [0u8; 512];
        let n = match self.conn.as_mut() {
            Some(conn) => match conn.read(&mut buf) {
                Ok(0) => {
                    log::info!("gdbcomm: EOF from debugger");
                    self.drop_connection(sys);
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    log::warn!("gdbcomm: read: {}", e);
                    self.drop_connection(sys);
                    return;
                }
            },
            None => return,
        };
        self.inbuf.extend_from_slice(&buf[..n]);

        // Extract complete $...#cc packets, tolerating acks and junk in
        // between.
        loop {
            let start = match self.inbuf.iter().position(|&b| b == b'$') {
                Some(ix) => ix,
                None => {
                    self.inbuf.clear();
                    return;
                }
            };
            let hash = match self.inbuf[start..].iter().position(|&b| b == b'#') {
                Some(ix) => start + ix,
                None => return, // incomplete; wait for more
            };
            if hash + 3 > self.inbuf.len() {
                return; // checksum incomplete
            }
            let packet: Vec<u8> = self.inbuf[start..hash + 3].to_vec();
            self.inbuf.drain(..hash + 3);
            self.execute(sys, &packet);
        }
    }

    // --------------------------------------------------------------
    // Packet I/O

    fn send(&mut self, payload: &str) {
        let check: u32 = payload.bytes().map(|b| b as u32).sum::<u32>() % 256;
        let msg = format!("${}#{:02x}", payload, check);
        if let Some(conn) = self.conn.as_mut() {
            conn.write_all(msg.as_bytes());
        }
    }

    fn send_notsupp(&mut self) {
        self.send("");
    }

    fn send_stopinfo(&mut self) {
        let payload = format!("T05thread:{:x};", mkthreadid(self.debug_cpu));
        self.send(&payload);
    }

    fn ack(&mut self, good: bool) {
        if let Some(conn) = self.conn.as_mut() {
            conn.write_all(if good { b"+" } else { b"-" });
        }
    }

    // --------------------------------------------------------------
    // Packet execution

    fn execute(&mut self, sys: &mut System, raw: &[u8]) {
        debug_assert_eq!(raw[0], b'$');
        let hashpos = raw.len() - 3;
        let payload = &raw[1..hashpos];
        let sum: u32 = payload.iter().map(|&b| b as u32).sum::<u32>() % 256;
        let sent = u32::from_str_radix(
            std::str::from_utf8(&raw[hashpos + 1..]).unwrap_or("zz"),
            16,
        )
        .unwrap_or(u32::MAX);

        if sum != sent {
            self.ack(false);
            return;
        }
        self.ack(true);

        let pkt = String::from_utf8_lossy(payload).into_owned();
        let mut chars = pkt.chars();
        match chars.next() {
            Some('?') => self.send_stopinfo(),
            Some('g') => self.packet_registers(sys),
            Some('m') => self.packet_read_mem(sys, &pkt[1..]),
            Some('M') => self.packet_write_mem(sys, &pkt[1..]),
            Some('c') => {
                self.packet_restart(sys, &pkt[1..]);
                sys.control.leave_debugger();
            }
            Some('D') => {
                // detach: resume and drop the connection
                self.send("OK");
                self.drop_connection(sys);
            }
            Some('k') => {
                log::info!("Debugger requested kill");
                sys.console.cleanup();
                std::process::exit(ExitCode::Requested as i32);
            }
            Some('s') => {
                self.packet_restart(sys, &pkt[1..]);
                sys.onecycle();
                self.send_stopinfo();
            }
            Some('H') => match chars.next() {
                Some('g') => {
                    let cpunum = getthreadid(&pkt[2..]);
                    if cpunum >= sys.ncpus() {
                        self.send("E00");
                    } else {
                        self.debug_cpu = cpunum;
                        self.send("OK");
                    }
                }
                Some('c') => self.send_notsupp(),
                _ => self.send("OK"),
            },
            Some('T') => self.packet_checkthread(sys, &pkt[1..]),
            Some('q') => self.packet_query(sys, &pkt[1..]),
            Some('z') | Some('Z') => self.send_notsupp(),
            _ => self.send_notsupp(),
        }
    }

    /// `g`: all registers, as big-endian words
    fn packet_registers(&mut self, sys: &mut System) {
        let regs = sys.cpu_mut(self.debug_cpu).debug_registers();
        let mut buf = String::with_capacity(regs.len() * 8);
        for r in regs {
            buf.push_str(&format!("{:08x}", r));
        }
        self.send(&buf);
    }

    /// `mAAAA,LLL`: read memory
    fn packet_read_mem(&mut self, sys: &mut System, spec: &str) {
        let (vaddr, length) = match parse_addr_len(spec) {
            Some(v) => v,
            None => {
                self.send("E01");
                return;
            }
        };

        let mut buf = String::with_capacity(length as usize * 2);
        let mut i = 0u32;
        // leading bytes up to alignment, then whole words
        while i < length && (vaddr + i) % 4 != 0 {
            match sys.cpu(self.debug_cpu).debug_fetch_byte(&sys.bus, vaddr + i) {
                Some(b) => buf.push_str(&format!("{:02x}", b)),
                None => {
                    self.send("E03");
                    return;
                }
            }
            i += 1;
        }
        while i < length {
            match sys.cpu(self.debug_cpu).debug_fetch_word(&sys.bus, vaddr + i) {
                Some(w) => buf.push_str(&format!("{:08x}", w)),
                None => {
                    self.send("E03");
                    return;
                }
            }
            i += 4;
        }
        self.send(&buf);
    }

    /// `MAAAA,LLL:DDDD`: write memory
    fn packet_write_mem(&mut self, sys: &mut System, spec: &str) {
        let (addrlen, data) = match spec.split_once(':') {
            Some(v) => v,
            None => {
                self.send("E01");
                return;
            }
        };
        let (vaddr, length) = match parse_addr_len(addrlen) {
            Some(v) => v,
            None => {
                self.send("E01");
                return;
            }
        };

        let mut bytes = Vec::with_capacity(length as usize);
        let data = data.as_bytes();
        for i in 0..length as usize {
            if i * 2 + 2 > data.len() {
                self.send("E01");
                return;
            }
            let b = u8::from_str_radix(
                std::str::from_utf8(&data[i * 2..i * 2 + 2]).unwrap_or("zz"),
                16,
            );
            match b {
                Ok(b) => bytes.push(b),
                Err(_) => {
                    self.send("E01");
                    return;
                }
            }
        }

        let mut i = 0u32;
        while i < length && (vaddr + i) % 4 != 0 {
            let (cpu, bus) = sys.cpu_and_bus(self.debug_cpu);
            if cpu
                .debug_store_byte(bus, vaddr + i, bytes[i as usize])
                .is_none()
            {
                self.send("E03");
                return;
            }
            i += 1;
        }
        while i + 4 <= length {
            let w = u32::from_be_bytes([
                bytes[i as usize],
                bytes[i as usize + 1],
                bytes[i as usize + 2],
                bytes[i as usize + 3],
            ]);
            let (cpu, bus) = sys.cpu_and_bus(self.debug_cpu);
            if cpu.debug_store_word(bus, vaddr + i, w).is_none() {
                self.send("E03");
                return;
            }
            i += 4;
        }
        while i < length {
            let (cpu, bus) = sys.cpu_and_bus(self.debug_cpu);
            if cpu
                .debug_store_byte(bus, vaddr + i, bytes[i as usize])
                .is_none()
            {
                self.send("E03");
                return;
            }
            i += 1;
        }

        self.send("OK");
    }

    /// `c`/`s` may carry a restart address
    fn packet_restart(&mut self, sys: &mut System, addr: &str) {
        if addr.is_empty() {
            return;
        }
        if let Ok(realaddr) = u32::from_str_radix(addr, 16) {
            log::info!("gdb changed the restart address");
            sys.debug_set_entrypoint(self.debug_cpu, realaddr);
        }
    }

    /// `T<id>`: is the thread alive?
    fn packet_checkthread(&mut self, sys: &mut System, threadid: &str) {
        let cpunum = getthreadid(threadid);
        if cpunum >= sys.ncpus() {
            self.send("E00");
        } else if sys.cpu(cpunum).state == crate::core::cpu::CpuState::Disabled {
            self.send("E01");
        } else {
            self.send("OK");
        }
    }

    /// `q...`: general queries
    fn packet_query(&mut self, sys: &mut System, query: &str) {
        if query == "C" {
            let payload = format!("QC{:x}", mkthreadid(self.debug_cpu));
            self.send(&payload);
        } else if query == "fThreadInfo" {
            let mut buf = String::from("m");
            let mut first = true;
            for i in 0..sys.ncpus() {
                if sys.cpu(i).state == crate::core::cpu::CpuState::Disabled {
                    continue;
                }
                if !first {
                    buf.push(',');
                }
                first = false;
                buf.push_str(&format!("{:02x}", mkthreadid(i)));
            }
            self.send(&buf);
        } else if query == "sThreadInfo" {
            self.send("l");
        } else if let Some(id) = query.strip_prefix("ThreadExtraInfo,") {
            let cpunum = getthreadid(id);
            if cpunum >= sys.ncpus() {
                self.send("E00");
                return;
            }
            let info = format!("CPU {}", cpunum);
            let hex: String = info.bytes().map(|b| format!("{:02x}", b)).collect();
            self.send(&hex);
        } else {
            self.send_notsupp();
        }
    }

    pub fn dump(&self) {
        log::info!(
            "gdb support: {}active, listening",
            if self.conn.is_some() { "" } else { "not " }
        );
    }
}

fn mkthreadid(cpunum: usize) -> usize {
    cpunum + 10
}

fn getthreadid(s: &str) -> usize {
    usize::from_str_radix(s.trim(), 16)
        .unwrap_or(0)
        .wrapping_sub(10)
}

/// Parse an `AAAA,LLL` hex pair
fn parse_addr_len(spec: &str) -> Option<(u32, u32)> {
    let (a, l) = spec.split_once(',')?;
    let vaddr = u32::from_str_radix(a, 16).ok()?;
    let length = u32::from_str_radix(l, 16).ok()?;
    Some((vaddr, length))
}
