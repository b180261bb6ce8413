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

//! Machine configuration file
//!
//! One device per line: `SLOT DEVICE ARG=VAL ...`. `#` begins a comment.
//! Slot 31 must hold the bus controller (`mainboard`, or `oldmainboard`/
//! `busctl` for the uniprocessor back-compat variant), which also carries
//! the RAM size and CPU count. Extra per-slot arguments can be injected
//! from the command line (`-C SLOT:ARG`).

use std::fs;

use super::{Bus, CONTROLLER_SLOT, MAX_RAMSIZE, NSLOTS};
use crate::core::devices::{Device, SetupCtx};
use crate::core::error::{EmulatorError, Result};

/// One parsed config line
#[derive(Debug, Clone)]
struct ConfigLine {
    slot: usize,
    device: String,
    args: Vec<String>,
}

/// Controller settings extracted from the slot-31 line
#[derive(Debug, Clone, Copy)]
pub struct MainboardConfig {
    pub ramsize: u32,
    pub ncpus: usize,
    pub old: bool,
}

/// Parse a size argument with an optional K/M suffix
pub fn parse_size(s: &str) -> Result<u32> {
    let (digits, mult) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1024u64),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| EmulatorError::Config(format!("Invalid size `{}'", s)))?;
    let bytes = n * mult;
    if bytes > u32::MAX as u64 {
        return Err(EmulatorError::Config(format!("Size `{}' too large", s)));
    }
    Ok(bytes as u32)
}

fn is_controller(name: &str) -> bool {
    matches!(name, "mainboard" | "oldmainboard" | "busctl")
}

fn known_device(name: &str) -> bool {
    is_controller(name)
        || matches!(
            name,
            "timer" | "disk" | "serial" | "screen" | "nic" | "emufs" | "trace" | "random"
        )
}

fn parse_lines(path: &str, text: &str) -> Result<Vec<ConfigLine>> {
    let mut lines = Vec::new();
    let mut used = [false; NSLOTS];

    for (lineno, raw) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let line = match raw.find('#') {
            Some(ix) => &raw[..ix],
            None => raw,
        };
        let mut words = line.split_whitespace();
        let slotword = match words.next() {
            Some(w) => w,
            None => continue,
        };

        let slot: usize = slotword.parse().map_err(|_| {
            EmulatorError::Config(format!(
                "config {}: line {}: Invalid slot `{}' (should be 0-{})",
                path,
                lineno,
                slotword,
                NSLOTS - 1
            ))
        })?;
        if slot >= NSLOTS {
            return Err(EmulatorError::Config(format!(
                "config {}: line {}: Invalid slot `{}' (should be 0-{})",
                path,
                lineno,
                slotword,
                NSLOTS - 1
            )));
        }

        let device = words.next().ok_or_else(|| {
            EmulatorError::Config(format!(
                "config {}: line {}: slot {}: No device",
                path, lineno, slot
            ))
        })?;

        if used[slot] {
            return Err(EmulatorError::Config(format!(
                "config {}: line {}: slot {}: Already in use",
                path, lineno, slot
            )));
        }
        used[slot] = true;

        if !known_device(device) {
            return Err(EmulatorError::Config(format!(
                "config {}: line {}: slot {}: No such hardware `{}'",
                path, lineno, slot, device
            )));
        }

        let isbus = is_controller(device);
        let isbusslot = slot == CONTROLLER_SLOT;
        if isbus != isbusslot {
            return Err(EmulatorError::Config(format!(
                "config {}: line {}: slot {}: {}: Bus controller must go in slot {}",
                path, lineno, slot, device, CONTROLLER_SLOT
            )));
        }

        lines.push(ConfigLine {
            slot,
            device: device.to_string(),
            args: words.map(str::to_string).collect(),
        });
    }

    Ok(lines)
}

fn parse_mainboard(path: &str, line: &ConfigLine) -> Result<MainboardConfig> {
    let old = line.device != "mainboard";
    let myname = &line.device;
    let mut ramsize = 0u32;
    let mut ncpus = 1usize;
    let mut ncores = 1usize;

    for arg in &line.args {
        if let Some(v) = arg.strip_prefix("ramsize=") {
            ramsize = parse_size(v)?;
        } else if !old && arg.strip_prefix("cpus=").is_some() {
            ncpus = arg[5..]
                .parse()
                .map_err(|_| EmulatorError::Config(format!("{}: invalid cpus count", myname)))?;
        } else if !old && arg.strip_prefix("cores=").is_some() {
            ncores = arg[6..]
                .parse()
                .map_err(|_| EmulatorError::Config(format!("{}: invalid cores count", myname)))?;
        } else {
            return Err(EmulatorError::Config(format!(
                "{}: invalid option `{}'",
                myname, arg
            )));
        }
    }

    if ncpus == 0 || ncores == 0 {
        return Err(EmulatorError::Config(format!(
            "{}: give me no CPUs and I'll give you no lies",
            myname
        )));
    }
    if ncores > 1 {
        return Err(EmulatorError::Config(format!(
            "{}: no support for multicore CPUs yet",
            myname
        )));
    }
    if ncpus > 32 {
        return Err(EmulatorError::Config(format!("{}: too many CPUs", myname)));
    }

    if ramsize == 0 {
        return Err(EmulatorError::Config(format!(
            "config {}: No system memory",
            path
        )));
    }
    if ramsize & 0xfff != 0 {
        return Err(EmulatorError::Config(format!(
            "config {}: System memory size not page-aligned",
            path
        )));
    }
    if ramsize > MAX_RAMSIZE {
        return Err(EmulatorError::Config(format!(
            "config {}: System memory too large",
            path
        )));
    }

    Ok(MainboardConfig {
        ramsize,
        ncpus,
        old,
    })
}

/// Read the config file and build the bus with its devices attached.
///
/// `extra` carries `-C SLOT:ARG` injections. Returns the bus and the
/// number of CPUs to construct.
pub fn configure(
    path: &str,
    extra: &[String],
    setup: &mut SetupCtx,
) -> Result<(Bus, MainboardConfig)> {
    // Validate -C syntax before anything else
    let mut extra_parsed: Vec<(usize, &str)> = Vec::new();
    for e in extra {
        let (slotstr, arg) = e
            .split_once(':')
            .ok_or_else(|| EmulatorError::Config(format!("-C {}: Invalid syntax", e)))?;
        let slot: usize = slotstr.parse().map_err(|_| {
            EmulatorError::Config(format!("-C {}: Invalid slot number (0-31 allowed)", e))
        })?;
        if slot >= NSLOTS {
            return Err(EmulatorError::Config(format!(
                "-C {}: Invalid slot number (0-31 allowed)",
                e
            )));
        }
        extra_parsed.push((slot, arg));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| EmulatorError::io(format!("Cannot open config file {}", path), e))?;

    let mut lines = parse_lines(path, &text)?;

    // Inject -C arguments into their slots
    for (slot, arg) in &extra_parsed {
        let line = lines.iter_mut().find(|l| l.slot == *slot).ok_or_else(|| {
            EmulatorError::Config(format!("-C {}:{}: No device in that slot", slot, arg))
        })?;
        line.args.push(arg.to_string());
    }

    let mbline = lines
        .iter()
        .find(|l| l.slot == CONTROLLER_SLOT)
        .ok_or_else(|| {
            EmulatorError::Config(format!("config {}: No bus controller in slot 31", path))
        })?
        .clone();
    let mb = parse_mainboard(path, &mbline)?;

    let mut bus = Bus::new(mb.ramsize, mb.ncpus);
    bus.irq.cpus[0].enabled = true;
    bus.attach(CONTROLLER_SLOT, Device::Mainboard { old: mb.old });

    for line in &lines {
        if line.slot == CONTROLLER_SLOT {
            continue;
        }
        let dev = Device::init(&line.device, line.slot, &line.args, setup)?;
        bus.attach(line.slot, dev);
    }

    Ok((bus, mb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::Clock;
    use crate::core::poll::PollTable;
    use std::io::Write;

    fn try_configure(text: &str) -> Result<(Bus, MainboardConfig)> {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        let mut clock = Clock::new();
        let mut poll = PollTable::new();
        let mut setup = SetupCtx {
            clock: &mut clock,
            poll: &mut poll,
        };
        configure(f.path().to_str().unwrap(), &[], &mut setup)
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_minimal_config() {
        let (bus, mb) = try_configure("31 mainboard ramsize=512k cpus=1\n").unwrap();
        assert_eq!(bus.ramsize(), 512 * 1024);
        assert_eq!(mb.ncpus, 1);
        assert!(!mb.old);
        assert!(bus.irq.cpus[0].enabled);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let (_, mb) = try_configure(
            "# a machine\n\n31 mainboard ramsize=1M cpus=4 # four-way\n",
        )
        .unwrap();
        assert_eq!(mb.ncpus, 4);
    }

    #[test]
    fn test_oldmainboard_accepted() {
        let (_, mb) = try_configure("31 oldmainboard ramsize=512k\n").unwrap();
        assert!(mb.old);
        let (_, mb) = try_configure("31 busctl ramsize=512k\n").unwrap();
        assert!(mb.old);
    }

    #[test]
    fn test_controller_must_be_slot_31() {
        assert!(try_configure("3 mainboard ramsize=512k\n").is_err());
        assert!(try_configure("31 timer\n").is_err());
    }

    #[test]
    fn test_ramsize_validation() {
        // missing
        assert!(try_configure("31 mainboard cpus=1\n").is_err());
        // not page aligned
        assert!(try_configure("31 mainboard ramsize=1000\n").is_err());
        // too large
        assert!(try_configure("31 mainboard ramsize=32M\n").is_err());
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let text = "31 mainboard ramsize=512k\n2 timer\n2 serial\n";
        assert!(try_configure(text).is_err());
    }

    #[test]
    fn test_unknown_device_rejected() {
        assert!(try_configure("31 mainboard ramsize=512k\n4 flubber\n").is_err());
    }

    #[test]
    fn test_devices_attached() {
        let (bus, _) = try_configure("31 mainboard ramsize=512k\n2 timer\n3 serial\n").unwrap();
        assert!(bus.device(2).is_some());
        assert!(bus.device(3).is_some());
        assert!(bus.device(4).is_none());
    }
}
