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

//! Metering socket
//!
//! A line-oriented (CRLF) status feed on an AF_UNIX stream socket. On
//! connect the server sends `HELLO <version>`, a `HEAD` line naming the
//! columns and a `WIDTH` line with display widths, then `DATA <vtime-ns>
//! <fields>` periodically. A client may send `interval <ns>` to adjust
//! the cadence, within bounds.

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};

use crate::core::clock::{EventKind, METER_NSECS};
use crate::core::error::{EmulatorError, Result};
use crate::core::poll::PollSource;
use crate::core::system::System;

const PROTOCOL_VERSION: u32 = 2;

/// Client-adjustable reporting interval bounds
const MIN_INTERVAL_NSECS: u64 = 1_000_000;
const MAX_INTERVAL_NSECS: u64 = 10_000_000_000;

/// The metering endpoint
pub struct MeterServer {
    listener: UnixListener,
    conns: Vec<UnixStream>,
    interval: u64,
    /// A sample event chain is scheduled
    running: bool,
}

impl MeterServer {
    pub fn listen(path: &str) -> Result<Self> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .map_err(|e| EmulatorError::io(format!("meter: bind {}", path), e))?;
        Ok(MeterServer {
            listener,
            conns: Vec::new(),
            interval: METER_NSECS,
            running: false,
        })
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// A monitoring client is connecting
    pub fn accept_connection(&mut self, sys: &mut System) {
        let mut stream = match self.listener.accept() {
            Ok((s, _)) => s,
            Err(e) => {
                log::warn!("meter: accept: {}", e);
                return;
            }
        };
        let _ = stream.set_nonblocking(true);

        let hello = format!(
            "HELLO {}\r\nHEAD kern user idle kinsns uinsns irqs exns disk con emu net\r\n\
             WIDTH 9 9 9 7 7 4 4 4 5 4 4\r\n",
            PROTOCOL_VERSION
        );
        if stream.write_all(hello.as_bytes()).is_err() {
            return;
        }

        sys.poll.watch(stream.as_raw_fd(), PollSource::MeterConn);
        self.conns.push(stream);

        if !self.running {
            self.running = true;
            sys.clock
                .schedule(self.interval, 0, EventKind::MeterSample, "meter");
        }
    }

    /// A client sent something (or hung up)
    pub fn handle_input(&mut self, sys: &mut System) {
        let mut closed = Vec::new();
        for (i, conn) in self.conns.iter_mut().enumerate() {
            let mut buf = [0u8; 256];
            match conn.read(&mut buf) {
                Ok(0) => closed.push(i),
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    for line in text.lines() {
                        if let Some(arg) = line.trim().strip_prefix("interval ") {
                            if let Ok(ns) = arg.trim().parse::<u64>() {
                                self.interval = ns.clamp(MIN_INTERVAL_NSECS, MAX_INTERVAL_NSECS);
                            }
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => closed.push(i),
            }
        }
        for &i in closed.iter().rev() {
            let conn = self.conns.remove(i);
            sys.poll.unwatch(conn.as_raw_fd());
        }
    }

    /// The periodic sample event fired: emit a DATA line to every client
    pub fn sample(&mut self, sys: &mut System) {
        if self.conns.is_empty() {
            // chain dies out; restarted on the next connection
            self.running = false;
            return;
        }

        let stats = &sys.stats;
        let (mut kcycles, mut ucycles, mut icycles) = (0u64, 0u64, 0u64);
        let (mut kretired, mut uretired) = (0u64, 0u64);
        for p in &stats.percpu {
            kcycles += p.kcycles;
            ucycles += p.ucycles;
            icycles += p.icycles;
            kretired += p.kretired;
            uretired += p.uretired;
        }
        icycles += stats.tot_icycles;

        let line = format!(
            "DATA {} {} {} {} {} {} {} {} {} {} {} {}\r\n",
            sys.clock.now(),
            kcycles,
            ucycles,
            icycles,
            kretired,
            uretired,
            stats.irqs,
            stats.exns,
            stats.rsects + stats.wsects,
            stats.rchars + stats.wchars,
            stats.remu + stats.wemu + stats.memu,
            stats.rpkts + stats.wpkts
        );

        let mut closed = Vec::new();
        for (i, conn) in self.conns.iter_mut().enumerate() {
            if conn.write_all(line.as_bytes()).is_err() {
                closed.push(i);
            }
        }
        for &i in closed.iter().rev() {
            let conn = self.conns.remove(i);
            sys.poll.unwatch(conn.as_raw_fd());
        }

        if self.conns.is_empty() {
            self.running = false;
        } else {
            sys.clock
                .schedule(self.interval, 0, EventKind::MeterSample, "meter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_bounds() {
        assert_eq!(
            5_000u64.clamp(MIN_INTERVAL_NSECS, MAX_INTERVAL_NSECS),
            MIN_INTERVAL_NSECS
        );
        assert_eq!(
            u64::MAX.clamp(MIN_INTERVAL_NSECS, MAX_INTERVAL_NSECS),
            MAX_INTERVAL_NSECS
        );
        assert_eq!(
            METER_NSECS.clamp(MIN_INTERVAL_NSECS, MAX_INTERVAL_NSECS),
            METER_NSECS
        );
    }

    #[test]
    fn test_listen_creates_socket() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("meter");
        let m = MeterServer::listen(path.to_str().unwrap()).unwrap();
        assert!(m.listener_fd() >= 0);
        assert!(path.exists());
    }
}
