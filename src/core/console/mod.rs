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

//! Console / TTY plumbing
//!
//! The host terminal stands in for the machine's serial console. Stdin is
//! put into raw (non-canonical, no-echo) mode so single keystrokes reach
//! the serial device; stdout carries guest output unbuffered. Signal
//! characters (^C and friends) keep their usual meaning unless the user
//! asked for them to pass through to the guest.
//!
//! Diagnostics from the emulator itself go through the `log` crate, never
//! through the guest console path.

use std::io::{self, Write};
use std::os::unix::io::RawFd;

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

const STDIN_FD: RawFd = 0;

/// Console state
pub struct Console {
    /// Saved termios to restore at exit; `None` when stdin is not a tty
    saved: Option<Termios>,
    /// True while our raw settings are active
    active: bool,
}

impl Console {
    /// Initialize the console.
    ///
    /// `pass_signals` disables signal generation on stdin so ^C etc. are
    /// delivered to the guest as input characters. SIGPIPE is always
    /// ignored so a vanished debugger or meter client cannot kill us.
    pub fn init(pass_signals: bool) -> Self {
        // A remote client hanging up must surface as a write error, not
        // SIGPIPE.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }

        let fd = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(STDIN_FD) };
        let saved = match termios::tcgetattr(fd) {
            Ok(t) => Some(t),
            Err(_) => {
                // Not a tty (input redirected); run cooked.
                return Console {
                    saved: None,
                    active: false,
                };
            }
        };

        let mut raw = saved.clone().unwrap();
        raw.local_flags &= !(LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHONL
            | LocalFlags::NOFLSH);
        if pass_signals {
            raw.local_flags &= !LocalFlags::ISIG;
        }
        let active = termios::tcsetattr(fd, SetArg::TCSADRAIN, &raw).is_ok();

        Console { saved, active }
    }

    /// True when stdin should be watched for input
    pub fn has_input(&self) -> bool {
        self.active || self.saved.is_none()
    }

    /// Nonblocking drain of available input bytes. Call only after poll
    /// reported stdin readable.
    pub fn read_input(&mut self) -> Vec<u8> {
        let mut buf = [0u8; 128];
        match nix::unistd::read(STDIN_FD, &mut buf) {
            Ok(n) => buf[..n].to_vec(),
            Err(_) => Vec::new(),
        }
    }

    /// Write one guest character to the terminal, unbuffered
    pub fn putc(&mut self, c: u8) {
        let mut out = io::stdout();
        let _ = out.write_all(&[c]);
        let _ = out.flush();
    }

    /// Ring the terminal bell
    pub fn beep(&mut self) {
        self.putc(0x07);
    }

    /// Restore the host terminal settings
    pub fn cleanup(&mut self) {
        if self.active {
            if let Some(saved) = &self.saved {
                let fd = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(STDIN_FD) };
                let _ = termios::tcsetattr(fd, SetArg::TCSADRAIN, saved);
            }
            self.active = false;
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_init_without_tty() {
        // Under the test harness stdin is rarely a tty; init must still
        // produce a usable console and cleanup must be a no-op.
        let mut c = Console::init(false);
        c.cleanup();
        c.beep();
    }
}
