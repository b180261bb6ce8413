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

//! Disk image tool
//!
//! Creates, inspects, and resizes emulator disk images: a 512-byte
//! header beginning with the magic string, followed by sector data. An
//! image must hold a whole number of 512-byte sectors, at least 128 of
//! them and less than 4 GiB of data.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;

use clap::{Parser, Subcommand};

const SECTSIZE: u64 = 512;
const HEADERSIZE: u64 = SECTSIZE;
const HEADER_MESSAGE: &str = "System/161 Disk Image";
const MINSIZE: u64 = 128 * SECTSIZE;
const MAXSIZE: u64 = 0x1_0000_0000;

#[derive(Parser)]
#[command(name = "disk161", version, about = "Disk image tool for the emulator")]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Create a new disk image
    Create {
        /// Overwrite an existing file
        #[arg(short = 'f')]
        force: bool,
        filename: String,
        /// Data size, e.g. 5M or 10240K (rounded down to whole sectors)
        size: String,
    },
    /// Print information about images
    Info { filenames: Vec<String> },
    /// Grow or shrink an image (+SIZE / -SIZE adjusts relative)
    Resize { filename: String, size: String },
}

fn parse_size(s: &str) -> Result<u64, String> {
    let (digits, mult) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1024u64),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("Invalid size `{}'", s))?;
    Ok(n * mult)
}

fn check_size(datasize: u64) -> Result<u64, String> {
    let datasize = datasize - datasize % SECTSIZE;
    if datasize < MINSIZE {
        return Err(format!(
            "Size too small (minimum {} sectors)",
            MINSIZE / SECTSIZE
        ));
    }
    if datasize >= MAXSIZE {
        return Err("Size too large (must be under 4G)".to_string());
    }
    Ok(datasize)
}

fn lock(file: &std::fs::File, filename: &str) -> Result<(), String> {
    use nix::fcntl::{flock, FlockArg};
    flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|e| {
        if e == nix::errno::Errno::EAGAIN {
            format!("{}: Locked by another process", filename)
        } else {
            format!("{}: flock: {}", filename, e)
        }
    })
}

fn write_header(file: &mut std::fs::File) -> Result<(), String> {
    let mut header = [0u8; HEADERSIZE as usize];
    header[..HEADER_MESSAGE.len()].copy_from_slice(HEADER_MESSAGE.as_bytes());
    file.seek(SeekFrom::Start(0)).map_err(|e| e.to_string())?;
    file.write_all(&header).map_err(|e| e.to_string())
}

fn read_header(file: &mut std::fs::File, filename: &str) -> Result<(), String> {
    let mut header = [0u8; HEADERSIZE as usize];
    file.seek(SeekFrom::Start(0)).map_err(|e| e.to_string())?;
    file.read_exact(&mut header)
        .map_err(|_| format!("{}: No header block", filename))?;
    let ok = header.starts_with(HEADER_MESSAGE.as_bytes())
        && header[HEADER_MESSAGE.len()] == 0;
    if !ok {
        return Err(format!("{} is not a disk image", filename));
    }
    Ok(())
}

fn cmd_create(force: bool, filename: &str, size: &str) -> Result<(), String> {
    let datasize = check_size(parse_size(size)?)?;

    let mut open = OpenOptions::new();
    open.read(true).write(true).create(true);
    if !force {
        open.create_new(true);
    }
    let mut file = open
        .open(filename)
        .map_err(|e| format!("{}: {}", filename, e))?;
    lock(&file, filename)?;

    write_header(&mut file)?;
    file.set_len(HEADERSIZE + datasize)
        .map_err(|e| format!("{}: {}", filename, e))?;

    println!(
        "{}: {} sectors ({}K)",
        filename,
        datasize / SECTSIZE,
        datasize / 1024
    );
    Ok(())
}

fn cmd_info(filenames: &[String]) -> Result<(), String> {
    for filename in filenames {
        let mut file = OpenOptions::new()
            .read(true)
            .open(filename)
            .map_err(|e| format!("{}: {}", filename, e))?;
        read_header(&mut file, filename)?;
        let len = file
            .metadata()
            .map_err(|e| format!("{}: {}", filename, e))?
            .len();
        let datasize = len.saturating_sub(HEADERSIZE);
        println!(
            "{}: {} sectors ({}K); {} bytes with header",
            filename,
            datasize / SECTSIZE,
            datasize / 1024,
            len
        );
        if datasize % SECTSIZE != 0 {
            println!("{}: warning: not a whole number of sectors", filename);
        }
    }
    Ok(())
}

fn cmd_resize(filename: &str, size: &str) -> Result<(), String> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(filename)
        .map_err(|e| format!("{}: {}", filename, e))?;
    lock(&file, filename)?;
    read_header(&mut file, filename)?;

    let cur = file
        .metadata()
        .map_err(|e| e.to_string())?
        .len()
        .saturating_sub(HEADERSIZE);

    let newsize = if let Some(rest) = size.strip_prefix('+') {
        cur + parse_size(rest)?
    } else if let Some(rest) = size.strip_prefix('-') {
        cur.saturating_sub(parse_size(rest)?)
    } else {
        parse_size(size)?
    };
    let newsize = check_size(newsize)?;

    file.set_len(HEADERSIZE + newsize)
        .map_err(|e| format!("{}: {}", filename, e))?;
    println!(
        "{}: now {} sectors ({}K)",
        filename,
        newsize / SECTSIZE,
        newsize / 1024
    );
    Ok(())
}

fn main() {
    let args = Args::parse();
    let result = match &args.action {
        Action::Create {
            force,
            filename,
            size,
        } => cmd_create(*force, filename, size),
        Action::Info { filenames } => cmd_info(filenames),
        Action::Resize { filename, size } => cmd_resize(filename, size),
    };
    if let Err(msg) = result {
        eprintln!("disk161: {}", msg);
        std::process::exit(1);
    }
}
