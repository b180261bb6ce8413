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

//! Network hub daemon
//!
//! Listens on an AF_UNIX datagram socket and redistributes every frame
//! it receives to all the senders it knows about. NICs introduce
//! themselves with periodic keepalive frames addressed to the hub;
//! receivers do their own destination filtering.

use std::collections::HashMap;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use clap::Parser;

use rs161::core::devices::net::{LinkHeader, BROADCAST_ADDR, FRAME_MAGIC, HUB_ADDR, NET_BUFSIZE};

const DEFAULT_SOCKET: &str = ".sockets/hub";

/// Drop a sender after this many consecutive delivery failures
const MAX_ERRORS: u32 = 5;

#[derive(Parser)]
#[command(name = "hub161", version, about = "Hub for emulator network devices")]
struct Args {
    /// Socket to listen on
    #[arg(default_value = DEFAULT_SOCKET)]
    socket: String,
}

struct Sender {
    path: PathBuf,
    errors: u32,
}

fn open_socket(sockname: &str) -> std::io::Result<UnixDatagram> {
    // Only unlink things that are actually sockets, so "hub161 source.c"
    // doesn't eat someone's source file.
    if let Ok(md) = std::fs::symlink_metadata(sockname) {
        use std::os::unix::fs::FileTypeExt;
        if md.file_type().is_socket() {
            let _ = std::fs::remove_file(sockname);
        } else {
            eprintln!("hub161: {}: File exists", sockname);
            std::process::exit(1);
        }
    }
    UnixDatagram::bind(sockname)
}

fn main() {
    let args = Args::parse();

    let sock = match open_socket(&args.socket) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("hub161: bind {}: {}", args.socket, e);
            std::process::exit(1);
        }
    };
    println!("hub161: Listening on {}", args.socket);

    let mut senders: HashMap<u16, Sender> = HashMap::new();
    let mut packet = [0u8; NET_BUFSIZE];

    loop {
        let (len, from) = match sock.recv_from(&mut packet) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("hub161: recvfrom: {}", e);
                continue;
            }
        };

        let header = match LinkHeader::parse(&packet[..len]) {
            Some(h) => h,
            None => {
                eprintln!("hub161: runt packet (size {})", len);
                continue;
            }
        };

        if header.frame != FRAME_MAGIC {
            eprintln!("hub161: frame error [{:04x}]", header.frame);
            continue;
        }
        if header.packetlen as usize != len {
            eprintln!(
                "hub161: bad size [{:04x} {:04x}]",
                header.packetlen, len
            );
            continue;
        }
        if header.from == BROADCAST_ADDR {
            eprintln!("hub161: packet came from broadcast addr (dropped)");
            continue;
        }

        // Learn (or refresh) the sender's return address
        if let Some(path) = from.as_pathname() {
            let entry = senders.entry(header.from).or_insert_with(|| {
                println!("hub161: adding {:04x} from {}", header.from, path.display());
                if !path.is_absolute() {
                    println!("hub161: (not absolute pathname, may not work)");
                }
                Sender {
                    path: path.to_path_buf(),
                    errors: 0,
                }
            });
            entry.path = path.to_path_buf();
        }

        if header.to == HUB_ADDR {
            // keepalive to us; nothing to forward
            continue;
        }

        // Forward to everyone; receivers filter
        for (addr, sender) in senders.iter_mut() {
            if let Err(e) = sock.send_to(&packet[..len], &sender.path) {
                eprintln!("hub161: sendto {:04x}: {}", addr, e);
                sender.errors += 1;
            }
        }
        senders.retain(|addr, s| {
            if s.errors > MAX_ERRORS {
                println!("hub161: dropping {:04x}", addr);
                false
            } else {
                true
            }
        });
    }
}
