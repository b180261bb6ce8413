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

//! Random number generator card
//!
//! Register 0 reads a 32-bit random value from the machine's seeded
//! generator. Configuring `seed=N` reseeds the generator, which also
//! drives event-delay jitter, so a fixed seed makes the whole machine's
//! timing reproducible; `autoseed` draws the seed from the host clock.

use std::time::{SystemTime, UNIX_EPOCH};

use super::DeviceCtx;
use crate::core::bus::BusError;
use crate::core::devices::SetupCtx;
use crate::core::error::{EmulatorError, Result};

/// RNG device state (the generator itself lives on the clock)
pub struct RandomDevice;

impl RandomDevice {
    pub fn new(slot: usize, args: &[String], setup: &mut SetupCtx) -> Result<Self> {
        let mut seed: Option<u64> = None;

        for arg in args {
            if let Some(v) = arg.strip_prefix("seed=") {
                seed = Some(v.parse().map_err(|_| EmulatorError::Device {
                    slot,
                    msg: format!("invalid seed {}", v),
                })?);
            } else if arg == "autoseed" {
                let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
                seed = Some(now.as_secs() ^ ((now.subsec_micros() as u64) << 8));
            } else {
                return Err(EmulatorError::Device {
                    slot,
                    msg: format!("invalid option {}", arg),
                });
            }
        }

        if let Some(seed) = seed {
            setup.clock.reseed(seed);
        }
        Ok(RandomDevice)
    }

    pub fn fetch(&mut self, ctx: &mut DeviceCtx, offset: u32) -> std::result::Result<u32, BusError> {
        if offset == 0 {
            Ok(ctx.ext.clock.random_u32())
        } else {
            Err(BusError)
        }
    }

    pub fn store(
        &mut self,
        _ctx: &mut DeviceCtx,
        _offset: u32,
        _val: u32,
    ) -> std::result::Result<(), BusError> {
        Err(BusError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::Clock;
    use crate::core::poll::PollTable;

    #[test]
    fn test_seed_option_reseeds_clock() {
        let mut clock_a = Clock::new();
        let mut clock_b = Clock::new();
        {
            let mut poll = PollTable::new();
            let mut setup = SetupCtx {
                clock: &mut clock_a,
                poll: &mut poll,
            };
            RandomDevice::new(5, &["seed=42".into()], &mut setup).unwrap();
        }
        {
            let mut poll = PollTable::new();
            let mut setup = SetupCtx {
                clock: &mut clock_b,
                poll: &mut poll,
            };
            RandomDevice::new(5, &["seed=42".into()], &mut setup).unwrap();
        }
        assert_eq!(clock_a.random_u32(), clock_b.random_u32());
    }

    #[test]
    fn test_rejects_bad_options() {
        let mut clock = Clock::new();
        let mut poll = PollTable::new();
        let mut setup = SetupCtx {
            clock: &mut clock,
            poll: &mut poll,
        };
        assert!(RandomDevice::new(5, &["entropy=max".into()], &mut setup).is_err());
        assert!(RandomDevice::new(5, &["seed=banana".into()], &mut setup).is_err());
    }
}
