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

//! Error types for the emulator
//!
//! There are four distinct error surfaces, and only one of them lives here:
//!
//! 1. Guest-triggered hardware faults become MIPS exceptions in the CPU
//!    core and never surface as Rust errors.
//! 2. Guest protocol violations against a device make the device "hang":
//!    the emulator logs a message and drops to the debugger. See
//!    [`crate::core::system`].
//! 3. Host-side setup failures (config file, disk image, sockets) are
//!    [`EmulatorError`] values propagated with `?` to `main`, which exits
//!    with the config/user/runtime error code.
//! 4. Internal invariant violations panic with a distinctive message; they
//!    are always bugs in the emulator itself.

use thiserror::Error;

/// Result type alias used throughout the emulator
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Host-side emulator errors
///
/// All of these indicate that the machine could not be brought up or torn
/// down; none of them occur while the guest is executing.
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// Configuration file problem (missing, malformed, bad device args)
    #[error("{0}")]
    Config(String),

    /// Kernel image could not be loaded
    #[error("{0}")]
    Loader(String),

    /// A device could not set up its host-side backing resources
    #[error("slot {slot}: {msg}")]
    Device { slot: usize, msg: String },

    /// Underlying host I/O failure with context
    #[error("{what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },
}

impl EmulatorError {
    /// Wrap a host I/O error with a description of what was being done
    pub fn io(what: impl Into<String>, source: std::io::Error) -> Self {
        EmulatorError::Io {
            what: what.into(),
            source,
        }
    }
}
