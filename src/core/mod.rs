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

//! Core emulation components

pub mod bus;
pub mod clock;
pub mod console;
pub mod cpu;
pub mod devices;
pub mod error;
pub mod gdb;
pub mod loader;
pub mod meter;
pub mod poll;
pub mod stats;
pub mod system;
pub mod trace;

/// Exit codes reported by the emulator process.
///
/// These are part of the external interface: scripts driving the emulator
/// key off them to distinguish an orderly guest poweroff from a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Normal poweroff requested by the guest.
    Normal = 0,
    /// Watchdog timeout or guest software failure.
    Crash = 1,
    /// Configuration, user, or host runtime error.
    Error = 2,
    /// Explicit exit request (debugger kill, doom counter).
    Requested = 3,
}
