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

//! rs161: a deterministic MIPS-I machine emulator
//!
//! This crate emulates a small 32-bit big-endian MIPS-I machine (one to 32
//! processors) attached to a simple memory-mapped peripheral bus, accurately
//! enough to run unmodified ELF kernels built for that architecture. It is
//! a teaching platform: determinism and faithful observable behavior matter
//! as much as raw throughput.
//!
//! # Architecture
//!
//! The emulator is organized into the following modules:
//!
//! - [`core::cpu`]: MIPS-I CPU cores (decode, TLB, exceptions, LL/SC)
//! - [`core::bus`]: bus fabric, RAM, boot ROM, IRQ aggregation
//! - [`core::devices`]: slot devices (timer, disk, serial, emufs, nic, ...)
//! - [`core::clock`]: the virtual-time scheduler and event queue
//! - [`core::system`]: machine integration and the main loop
//! - [`core::loader`]: the ELF kernel loader
//! - [`core::gdb`]: the remote debugger stub
//!
//! # Error Handling
//!
//! All fallible setup operations return [`core::error::Result<T>`], an alias
//! for `Result<T, EmulatorError>`. Guest-triggered hardware faults are never
//! Rust errors; they are delivered to the guest as MIPS exceptions.

pub mod core;

// Re-export commonly used types
pub use core::error::{EmulatorError, Result};
