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

//! The emulator entry point
//!
//! Builds a machine from the configuration file, loads the kernel, and
//! runs the main loop until poweroff.

use clap::Parser;

use rs161::core::gdb::GdbServer;
use rs161::core::meter::MeterServer;
use rs161::core::system::{System, SystemOptions};
use rs161::core::ExitCode;

#[derive(Parser)]
#[command(
    name = "rs161",
    version,
    about = "Emulator for a small MIPS-I machine with a slot-addressed peripheral bus",
    override_usage = "rs161 [options] kernel [kernel args...]"
)]
struct Args {
    /// Use an alternate config file
    #[arg(short = 'c', value_name = "PATH", default_value = "sys161.conf")]
    config: String,

    /// Override a config file argument for one slot (SLOT:ARG)
    #[arg(short = 'C', value_name = "SLOT:ARG")]
    configextra: Vec<String>,

    /// Set the disk I/O doom counter
    #[arg(short = 'D', value_name = "COUNT", default_value_t = 0)]
    doom: u32,

    /// Trace to the specified file
    #[arg(short = 'f', value_name = "FILE")]
    tracefile: Option<String>,

    /// Listen for gdb over TCP on the specified port
    #[arg(short = 'p', value_name = "PORT")]
    port: Option<u16>,

    /// Collect a kernel execution profile
    #[arg(short = 'P')]
    profiling: bool,

    /// Pass signal-generating characters through to the guest
    #[arg(short = 's')]
    pass_signals: bool,

    /// Set tracing flags (letters from kujtxidne)
    #[arg(short = 't', value_name = "FLAGS")]
    traceflags: Option<String>,

    /// Wait for a debugger before starting
    #[arg(short = 'w')]
    debugwait: bool,

    /// Don't wait for a debugger on breakpoint; exit instead
    #[arg(short = 'X')]
    no_debugger_wait: bool,

    /// Set the progress watchdog to the specified number of seconds
    #[arg(short = 'Z', value_name = "SECONDS")]
    timeout: Option<u32>,

    /// Kernel image to boot
    #[arg(required = true)]
    kernel: String,

    /// Arguments passed through to the kernel
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    kernel_args: Vec<String>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    if let Some(timeout) = args.timeout {
        if timeout <= 1 {
            eprintln!("rs161: Invalid timeout (must be at least 2)");
            std::process::exit(ExitCode::Error as i32);
        }
    }
    if args.profiling {
        log::warn!("Kernel profiling is not supported in this build");
    }

    // AF_UNIX endpoints (gdb, meter, NICs) live here; a NIC may need it
    // during device configuration.
    if let Err(e) = std::fs::create_dir_all(".sockets") {
        eprintln!("rs161: mkdir .sockets: {}", e);
        std::process::exit(ExitCode::Error as i32);
    }

    let options = SystemOptions {
        pass_signals: args.pass_signals,
        doom: args.doom,
        progress_secs: args.timeout,
        trace_flags: args.traceflags.clone(),
        trace_file: args.tracefile.clone(),
        no_debugger_wait: args.no_debugger_wait,
    };

    let mut sys = match System::configure(&args.config, &args.configextra, options) {
        Ok(sys) => sys,
        Err(e) => {
            eprintln!("rs161: {}", e);
            std::process::exit(ExitCode::Error as i32);
        }
    };

    let gdb = match args.port {
        Some(port) => GdbServer::listen_tcp(port),
        None => GdbServer::listen_unix(".sockets/gdb"),
    };
    match gdb {
        Ok(gdb) => sys.attach_gdb(gdb),
        Err(e) => {
            eprintln!("rs161: {}", e);
            std::process::exit(ExitCode::Error as i32);
        }
    }

    match MeterServer::listen(".sockets/meter") {
        Ok(meter) => sys.attach_meter(meter),
        Err(e) => {
            eprintln!("rs161: {}", e);
            std::process::exit(ExitCode::Error as i32);
        }
    }

    let argstr = args.kernel_args.join(" ");
    if let Err(e) = sys.load_kernel(&args.kernel, &argstr) {
        eprintln!("rs161: {}", e);
        std::process::exit(ExitCode::Error as i32);
    }

    println!("rs161 {}", env!("CARGO_PKG_VERSION"));

    if args.debugwait {
        sys.wait_for_debugger();
    }

    let code = sys.run();
    std::process::exit(code as i32);
}
