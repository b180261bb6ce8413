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

//! External event dispatcher
//!
//! All externally caused events (console keystrokes, debugger and metering
//! connections, incoming network datagrams) enter the emulator through one
//! blocking multiplexed wait. Each watched descriptor is tagged with a
//! [`PollSource`] naming its owner; the machine dispatches readable sources
//! after each wait. The time spent blocked is returned so the caller can
//! bill it as virtual time when the machine is idle.

use std::os::unix::io::RawFd;
use std::time::Instant;

/// Who owns a watched file descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSource {
    /// Console stdin
    Console,
    /// The debugger listening socket
    GdbListener,
    /// An accepted debugger connection
    GdbConn,
    /// The metering listening socket
    MeterListener,
    /// An accepted metering connection
    MeterConn,
    /// A NIC datagram socket, by slot
    Net { slot: usize },
}

const MAX_WATCHED: usize = 64;

/// Table of watched descriptors
pub struct PollTable {
    entries: Vec<(RawFd, PollSource)>,
}

impl PollTable {
    pub fn new() -> Self {
        PollTable {
            entries: Vec::new(),
        }
    }

    /// Start watching a descriptor
    pub fn watch(&mut self, fd: RawFd, source: PollSource) {
        if self.entries.len() >= MAX_WATCHED {
            panic!("internal error: ran out of poll records in main loop");
        }
        self.entries.push((fd, source));
    }

    /// Stop watching a descriptor. Unknown descriptors are an internal
    /// error: nothing unwatches an fd it never watched.
    pub fn unwatch(&mut self, fd: RawFd) {
        let before = self.entries.len();
        self.entries.retain(|(f, _)| *f != fd);
        if self.entries.len() == before {
            panic!("internal error: unwatch of fd {} not in poll table", fd);
        }
    }

    /// Wait for any watched descriptor to become readable.
    ///
    /// `timeout_nsecs`: `None` blocks indefinitely; `Some(0)` polls without
    /// blocking. Returns the wall time actually slept (nanoseconds) and the
    /// sources that are readable.
    pub fn wait(&self, timeout_nsecs: Option<u64>) -> (u64, Vec<PollSource>) {
        let mut fds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|&(fd, _)| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms: libc::c_int = match timeout_nsecs {
            None => -1,
            Some(ns) => {
                // round up so a sub-millisecond sleep still sleeps
                let ms = (ns + 999_999) / 1_000_000;
                ms.min(i32::MAX as u64) as libc::c_int
            }
        };

        let measure = timeout_nsecs.map(|n| n > 0).unwrap_or(true);
        let before = measure.then(Instant::now);

        // One poll(2) call; EINTR is treated as "slept zero, nothing ready"
        // just like a failed select in the original.
        let r = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

        let slept = before
            .map(|t| t.elapsed().as_nanos() as u64)
            .unwrap_or(0);

        if r <= 0 {
            return (slept, Vec::new());
        }

        let ready = fds
            .iter()
            .zip(self.entries.iter())
            .filter(|(p, _)| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
            .map(|(_, &(_, src))| src)
            .collect();

        (slept, ready)
    }
}

impl Default for PollTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_watch_unwatch() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut t = PollTable::new();
        t.watch(a.as_raw_fd(), PollSource::Console);
        assert_eq!(t.entries.len(), 1);
        t.unwatch(a.as_raw_fd());
        assert!(t.entries.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_unwatch_unknown_panics() {
        let mut t = PollTable::new();
        t.unwatch(12345);
    }

    #[test]
    fn test_wait_reports_readable_source() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut t = PollTable::new();
        t.watch(b.as_raw_fd(), PollSource::GdbConn);
        a.write_all(b"x").unwrap();
        let (_slept, ready) = t.wait(Some(0));
        assert_eq!(ready, vec![PollSource::GdbConn]);
    }

    #[test]
    fn test_wait_zero_timeout_empty() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mut t = PollTable::new();
        t.watch(b.as_raw_fd(), PollSource::MeterConn);
        let (slept, ready) = t.wait(Some(0));
        assert_eq!(slept, 0);
        assert!(ready.is_empty());
    }
}
