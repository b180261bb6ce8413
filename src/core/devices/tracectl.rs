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

//! Trace control device
//!
//! Lets the guest turn trace flags on and off, print markers into the
//! trace stream, request a full machine-state dump, and stop into the
//! debugger, all by register writes. The profiling registers are accepted
//! for compatibility; profile collection itself is not wired up, so
//! enable reads back 0.

use super::DeviceCtx;
use crate::core::bus::BusError;
use crate::core::error::{EmulatorError, Result};

const TRACEREG_ON: u32 = 0;
const TRACEREG_OFF: u32 = 4;
const TRACEREG_PRINT: u32 = 8;
const TRACEREG_DUMP: u32 = 12;
const TRACEREG_STOP: u32 = 16;
const TRACEREG_PROFEN: u32 = 20;
const TRACEREG_PROFCL: u32 = 24;

/// Trace-control device state
pub struct TraceDevice;

impl TraceDevice {
    pub fn new(slot: usize, args: &[String]) -> Result<Self> {
        if let Some(arg) = args.first() {
            return Err(EmulatorError::Device {
                slot,
                msg: format!("invalid option {}", arg),
            });
        }
        Ok(TraceDevice)
    }

    pub fn fetch(&mut self, _ctx: &mut DeviceCtx, offset: u32) -> std::result::Result<u32, BusError> {
        match offset {
            TRACEREG_PROFEN => Ok(0),
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
            TRACEREG_ON => {
                if ctx.ext.tracing.adjust_flag(val, true).is_err() {
                    ctx.hang(&format!("Invalid trace code {}", val));
                }
                Ok(())
            }
            TRACEREG_OFF => {
                if ctx.ext.tracing.adjust_flag(val, false).is_err() {
                    ctx.hang(&format!("Invalid trace code {}", val));
                }
                Ok(())
            }
            TRACEREG_PRINT => {
                log::info!("trace: code {} (0x{:x})", val, val);
                Ok(())
            }
            TRACEREG_DUMP => {
                log::info!("trace: dump with code {} (0x{:x})", val, val);
                ctx.ext.control.dump_requested = true;
                Ok(())
            }
            TRACEREG_STOP => {
                // the usual path here is a guest kernel panic
                log::info!("trace: software-requested debugger stop");
                ctx.ext.control.note_debugrequest();
                ctx.ext.clock.stop_cycling = true;
                ctx.ext.control.enter_debugger(false);
                Ok(())
            }
            TRACEREG_PROFEN | TRACEREG_PROFCL => {
                // profiling sink not wired up
                Ok(())
            }
            _ => Err(BusError),
        }
    }
}
