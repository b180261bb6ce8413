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

//! ELF kernel loader
//!
//! Loads a 32-bit big-endian MIPS ELF executable into RAM: each PT_LOAD
//! segment is placed at its physical address (derived from the kseg0/
//! kseg1 virtual address), zero-extended from filesz to memsz, and CPU 0
//! is pointed at the entry point. The kernel argument string is copied to
//! the top of RAM with the boot stack just below it.

use std::fs;

use crate::core::cpu::MipsCpu;
use crate::core::error::{EmulatorError, Result};
use crate::core::system::System;

// ELF identification
const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const EV_CURRENT: u32 = 1;
const ET_EXEC: u16 = 2;
const EM_MIPS: u16 = 8;

// Program header types
const PT_NULL: u32 = 0;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const PT_PHDR: u32 = 6;
const PT_MIPS_REGINFO: u32 = 0x7000_0000;

fn be16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn be32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

struct Phdr {
    p_type: u32,
    offset: u32,
    vaddr: u32,
    filesz: u32,
    memsz: u32,
}

fn load_elf(sys: &mut System, image: &[u8]) -> Result<u32> {
    let bad = |msg: &str| EmulatorError::Loader(msg.to_string());

    if image.len() < 52 {
        return Err(bad("Boot image too short for an ELF header"));
    }
    if image[0..4] != ELFMAG {
        return Err(bad("Boot image is not an ELF executable"));
    }
    if image[4] != ELFCLASS32 {
        return Err(bad("Boot image is not a 32-bit executable"));
    }
    if image[5] != ELFDATA2MSB {
        return Err(bad("Boot image is not a big-endian executable"));
    }
    if image[6] as u32 != EV_CURRENT || be32(image, 20) != EV_CURRENT {
        return Err(bad("Boot image is wrong ELF version"));
    }
    if be16(image, 16) != ET_EXEC {
        return Err(bad("Boot image is ELF but not an executable"));
    }
    if be16(image, 18) != EM_MIPS {
        return Err(bad("Boot image is for wrong processor type"));
    }

    let entry = be32(image, 24);
    let phoff = be32(image, 28) as usize;
    let phentsize = be16(image, 42) as usize;
    let phnum = be16(image, 44) as usize;

    for i in 0..phnum {
        let base = phoff + i * phentsize;
        if base + 32 > image.len() {
            return Err(bad("Boot image program header out of range"));
        }
        let ph = Phdr {
            p_type: be32(image, base),
            offset: be32(image, base + 4),
            vaddr: be32(image, base + 8),
            filesz: be32(image, base + 16),
            memsz: be32(image, base + 20),
        };

        match ph.p_type {
            PT_NULL | PT_PHDR | PT_MIPS_REGINFO | PT_NOTE => continue,
            PT_LOAD => {}
            other => {
                return Err(EmulatorError::Loader(format!(
                    "Boot image contained unknown segment type {}",
                    other
                )))
            }
        }

        let paddr = MipsCpu::load_paddr(ph.vaddr, ph.memsz).ok_or_else(|| {
            EmulatorError::Loader(format!(
                "Invalidly placed segment in boot image (load address {}, size {})",
                ph.vaddr, ph.memsz
            ))
        })?;

        if paddr.saturating_add(ph.memsz) >= sys.bus.ramsize() {
            return Err(bad("Boot image contained segment that did not fit in RAM"));
        }

        let filesz = ph.filesz.min(ph.memsz) as usize;
        let fileoff = ph.offset as usize;
        if fileoff + filesz > image.len() {
            return Err(bad("Boot image segment data out of range"));
        }

        let ram = sys.bus.ram_mut();
        let dst = paddr as usize;
        ram[dst..dst + filesz].copy_from_slice(&image[fileoff..fileoff + filesz]);
        ram[dst + filesz..dst + ph.memsz as usize].fill(0);
    }

    Ok(entry)
}

/// Place the kernel argument string at the top of RAM and aim the boot
/// stack just below it. The argument's kseg0 address is passed in a0.
fn set_stack(sys: &mut System, argument: &str) -> Result<()> {
    let bytes = argument.as_bytes();
    // include the terminator, aligned up to a word
    let size = ((bytes.len() as u32 + 1) + 3) & !3u32;
    let paddr = sys.bus.ramsize() - size;

    let ram = sys.bus.ram_mut();
    let dst = paddr as usize;
    ram[dst..dst + bytes.len()].copy_from_slice(bytes);
    ram[dst + bytes.len()..dst + size as usize].fill(0);

    let vaddr = MipsCpu::load_vaddr(paddr, size)
        .ok_or_else(|| EmulatorError::Loader("could not get initial stack vaddr".to_string()))?;

    sys.cpu_mut(0).set_stack(vaddr.wrapping_sub(4), vaddr);
    Ok(())
}

/// Load a kernel image and prepare CPU 0 to run it
pub fn load_kernel(sys: &mut System, image: &str, argument: &str) -> Result<()> {
    let data = fs::read(image)
        .map_err(|e| EmulatorError::io(format!("Cannot open boot image {}", image), e))?;

    let entry = load_elf(sys, &data)?;

    // Point CPU 0 at the entry point
    {
        let (cpu0, bus, mut ctx) = sys.split_cpu0();
        cpu0.set_entrypoint(bus, &mut ctx, entry)
            .map_err(EmulatorError::Loader)?;
    }

    set_stack(sys, argument)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::system::{System, SystemOptions};
    use std::io::Write;

    fn test_system() -> System {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"31 mainboard ramsize=1M cpus=1\n").unwrap();
        System::configure(f.path().to_str().unwrap(), &[], SystemOptions::default()).unwrap()
    }

    /// Build a minimal big-endian MIPS ELF with one PT_LOAD segment
    fn make_elf(entry: u32, vaddr: u32, payload: &[u8], memsz: u32) -> Vec<u8> {
        let mut img = Vec::new();
        // e_ident
        img.extend_from_slice(&ELFMAG);
        img.push(ELFCLASS32);
        img.push(ELFDATA2MSB);
        img.push(1); // EI_VERSION
        img.extend_from_slice(&[0; 9]);
        img.extend_from_slice(&ET_EXEC.to_be_bytes()); // e_type
        img.extend_from_slice(&EM_MIPS.to_be_bytes()); // e_machine
        img.extend_from_slice(&1u32.to_be_bytes()); // e_version
        img.extend_from_slice(&entry.to_be_bytes()); // e_entry
        img.extend_from_slice(&52u32.to_be_bytes()); // e_phoff
        img.extend_from_slice(&0u32.to_be_bytes()); // e_shoff
        img.extend_from_slice(&0u32.to_be_bytes()); // e_flags
        img.extend_from_slice(&52u16.to_be_bytes()); // e_ehsize
        img.extend_from_slice(&32u16.to_be_bytes()); // e_phentsize
        img.extend_from_slice(&1u16.to_be_bytes()); // e_phnum
        img.extend_from_slice(&[0u8; 6]); // shentsize/shnum/shstrndx
        assert_eq!(img.len(), 52);

        let dataoff = 52 + 32;
        // program header
        img.extend_from_slice(&PT_LOAD.to_be_bytes());
        img.extend_from_slice(&(dataoff as u32).to_be_bytes()); // p_offset
        img.extend_from_slice(&vaddr.to_be_bytes()); // p_vaddr
        img.extend_from_slice(&vaddr.to_be_bytes()); // p_paddr
        img.extend_from_slice(&(payload.len() as u32).to_be_bytes()); // p_filesz
        img.extend_from_slice(&memsz.to_be_bytes()); // p_memsz
        img.extend_from_slice(&0u32.to_be_bytes()); // p_flags
        img.extend_from_slice(&0x1000u32.to_be_bytes()); // p_align

        img.extend_from_slice(payload);
        img
    }

    #[test]
    fn test_load_places_segment_bit_exact() {
        let mut sys = test_system();
        let payload: Vec<u8> = (0u8..=255).collect();
        let img = make_elf(0x8000_1000, 0x8000_1000, &payload, 512);

        let entry = load_elf(&mut sys, &img).unwrap();
        assert_eq!(entry, 0x8000_1000);

        // verify RAM against the file, bit-exact, and zero-extension
        let ram = sys.bus.ram();
        assert_eq!(&ram[0x1000..0x1100], &payload[..]);
        assert!(ram[0x1100..0x1200].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_wrong_endian() {
        let mut sys = test_system();
        let mut img = make_elf(0x8000_1000, 0x8000_1000, b"x", 4);
        img[5] = 1; // ELFDATA2LSB
        assert!(load_elf(&mut sys, &img).is_err());
    }

    #[test]
    fn test_rejects_wrong_machine() {
        let mut sys = test_system();
        let mut img = make_elf(0x8000_1000, 0x8000_1000, b"x", 4);
        img[18..20].copy_from_slice(&62u16.to_be_bytes()); // x86-64
        assert!(load_elf(&mut sys, &img).is_err());
    }

    #[test]
    fn test_rejects_segment_outside_ram() {
        let mut sys = test_system();
        // 1 MiB of RAM; place at 2 MiB
        let img = make_elf(0x8020_0000, 0x8020_0000, b"x", 4);
        assert!(load_elf(&mut sys, &img).is_err());
    }

    #[test]
    fn test_rejects_non_kseg_segment() {
        let mut sys = test_system();
        let img = make_elf(0x0000_1000, 0x0000_1000, b"x", 4);
        assert!(load_elf(&mut sys, &img).is_err());
    }

    #[test]
    fn test_argument_at_top_of_ram() {
        let mut sys = test_system();
        set_stack(&mut sys, "root=emu0:").unwrap();
        let ramsize = sys.bus.ramsize() as usize;
        let ram = sys.bus.ram();
        // 11 bytes total (incl terminator) rounds up to 12
        let base = ramsize - 12;
        assert_eq!(&ram[base..base + 10], b"root=emu0:");
        assert_eq!(ram[base + 10], 0);
        // sp just below, a0 at the string
        assert_eq!(sys.cpu(0).reg(29), 0x8000_0000 + base as u32 - 4);
        assert_eq!(sys.cpu(0).reg(4), 0x8000_0000 + base as u32);
    }
}
