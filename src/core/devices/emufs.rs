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

//! Emulator filesystem passthrough
//!
//! Register-driven access to a host directory tree. Registers, mapped at
//! the bottom of the slot window:
//!
//! | Offset | Register                                      |
//! |--------|-----------------------------------------------|
//! | 0      | RFH: file handle                              |
//! | 4      | ROFF: seek address                            |
//! | 8      | RLEN: length                                  |
//! | 12     | ROP: operation code (writing triggers the op) |
//! | 16     | RRES: result (0 nothing, 1 complete, 2+ error)|
//!
//! A 16 KiB I/O buffer is mapped at offset 32768. Handle 0 is the root
//! directory. Operations: OPEN(1) CREATE(2) EXCLCREATE(3) CLOSE(4)
//! READ(5) READDIR(6) WRITE(7) GETSIZE(8) TRUNC(9). Every operation
//! completes after a fixed latency and then raises the slot IRQ with the
//! result register holding the outcome.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use super::{DeviceCtx, EMUFS_REVISION};
use crate::core::bus::BusError;
use crate::core::clock::{EventKind, EMUFS_NSECS};
use crate::core::error::{EmulatorError, Result};
use crate::core::trace::TraceKind;

const MAXHANDLES: usize = 64;
const ROOTHANDLE: u32 = 0;

const EMU_BUF_START: u32 = 32768;
const EMU_BUF_SIZE: u32 = 16384;
const EMU_BUF_END: u32 = EMU_BUF_START + EMU_BUF_SIZE;

const EMUREG_HANDLE: u32 = 0;
const EMUREG_OFFSET: u32 = 4;
const EMUREG_IOLEN: u32 = 8;
const EMUREG_OPER: u32 = 12;
const EMUREG_RESULT: u32 = 16;

const OP_OPEN: u32 = 1;
const OP_CREATE: u32 = 2;
const OP_EXCLCREATE: u32 = 3;
const OP_CLOSE: u32 = 4;
const OP_READ: u32 = 5;
const OP_READDIR: u32 = 6;
const OP_WRITE: u32 = 7;
const OP_GETSIZE: u32 = 8;
const OP_TRUNC: u32 = 9;

// Result codes
const RES_SUCCESS: u32 = 1;
const RES_BADHANDLE: u32 = 2;
const RES_BADOP: u32 = 3;
const RES_BADPATH: u32 = 4;
const RES_BADSIZE: u32 = 5;
const RES_EXISTS: u32 = 6;
const RES_ISDIR: u32 = 7;
const RES_MEDIA: u32 = 8;
const RES_NOHANDLES: u32 = 9;
const RES_NOSPACE: u32 = 10;
const RES_NOTDIR: u32 = 11;
const RES_UNKNOWN: u32 = 12;

/// Map a host errno onto the fixed result-code table
fn errno_to_code(err: &std::io::Error) -> u32 {
    match err.raw_os_error() {
        Some(libc::EBADF) => RES_BADHANDLE,
        Some(libc::EINVAL) => RES_BADSIZE,
        Some(libc::ENOENT) => RES_BADPATH,
        Some(libc::EIO) => RES_MEDIA,
        Some(libc::ENOTDIR) => RES_NOTDIR,
        Some(libc::EISDIR) => RES_ISDIR,
        Some(libc::EEXIST) => RES_EXISTS,
        Some(libc::ENOSPC) => RES_NOSPACE,
        _ => RES_UNKNOWN,
    }
}

struct EmufsHandle {
    file: File,
    /// Directory handles keep their path so relative opens and readdir
    /// work without changing the host working directory
    path: PathBuf,
    is_dir: bool,
}

/// Emufs device state
pub struct EmufsDevice {
    slot: usize,
    buf: Vec<u8>,
    handle: u32,
    offset: u32,
    iolen: u32,
    result: u32,
    handles: Vec<Option<EmufsHandle>>,
    busy: bool,
    busyresult: u32,
}

impl EmufsDevice {
    pub fn new(slot: usize, args: &[String]) -> Result<Self> {
        let mut dir = ".".to_string();
        for arg in args {
            if let Some(v) = arg.strip_prefix("dir=") {
                dir = v.to_string();
            } else {
                return Err(EmulatorError::Device {
                    slot,
                    msg: format!("invalid option {}", arg),
                });
            }
        }

        let rootpath = PathBuf::from(&dir);
        let rootfile = File::open(&rootpath)
            .map_err(|e| EmulatorError::io(format!("emufs: slot {}: {}", slot, dir), e))?;

        let mut handles: Vec<Option<EmufsHandle>> = Vec::with_capacity(MAXHANDLES);
        handles.resize_with(MAXHANDLES, || None);
        handles[ROOTHANDLE as usize] = Some(EmufsHandle {
            file: rootfile,
            path: rootpath,
            is_dir: true,
        });

        Ok(EmufsDevice {
            slot,
            buf: vec![0; EMU_BUF_SIZE as usize],
            handle: 0,
            offset: 0,
            iolen: 0,
            result: 0,
            handles,
            busy: false,
            busyresult: 0,
        })
    }

    fn set_result(&mut self, ctx: &mut DeviceCtx, result: u32) {
        self.result = result;
        if result > 0 {
            ctx.raise_irq();
        } else {
            ctx.lower_irq();
        }
    }

    fn pick_handle(&self) -> Option<usize> {
        self.handles.iter().position(|h| h.is_none())
    }

    // --------------------------------------------------------------
    // Operations

    fn op_open(&mut self, ctx: &mut DeviceCtx, create: bool, excl: bool) -> u32 {
        if self.iolen >= EMU_BUF_SIZE {
            return RES_BADSIZE;
        }

        let pathbytes = &self.buf[..self.iolen as usize];
        let pathstr = match std::str::from_utf8(pathbytes) {
            Ok(s) => s,
            Err(_) => return RES_BADPATH,
        };

        ctx.ext.tracing.hw(
            TraceKind::Emufs,
            format_args!("emufs: slot {}: open {}", self.slot, pathstr),
        );

        let newhandle = match self.pick_handle() {
            Some(h) => h,
            None => return RES_NOHANDLES,
        };

        if self.handle as usize >= MAXHANDLES {
            return RES_BADHANDLE;
        }
        let base = match &self.handles[self.handle as usize] {
            Some(h) if h.is_dir => h.path.clone(),
            Some(_) => return RES_NOTDIR,
            None => return RES_BADHANDLE,
        };
        let full: PathBuf = base.join(pathstr);

        let (file, is_dir) = match std::fs::metadata(&full) {
            Err(e) if !create => return errno_to_code(&e),
            Err(_) => {
                // creating something that doesn't exist yet
                let r = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .create_new(excl)
                    .open(&full);
                match r {
                    Ok(f) => (f, false),
                    Err(e) => return errno_to_code(&e),
                }
            }
            Ok(md) => {
                let is_dir = md.is_dir();
                let r = if is_dir && !create {
                    File::open(&full)
                } else {
                    OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(create)
                        .create_new(excl)
                        .open(&full)
                };
                match r {
                    Ok(f) => (f, is_dir),
                    Err(e) => return errno_to_code(&e),
                }
            }
        };

        self.handles[newhandle] = Some(EmufsHandle {
            file,
            path: full,
            is_dir,
        });
        self.handle = newhandle as u32;
        self.iolen = is_dir as u32;
        ctx.ext.stats.memu += 1;
        RES_SUCCESS
    }

    fn op_close(&mut self, ctx: &mut DeviceCtx) -> u32 {
        self.handles[self.handle as usize] = None;
        ctx.ext.tracing.hw(
            TraceKind::Emufs,
            format_args!("emufs: slot {}: close handle {}", self.slot, self.handle),
        );
        ctx.ext.stats.memu += 1;
        RES_SUCCESS
    }

    fn op_read(&mut self, ctx: &mut DeviceCtx) -> u32 {
        if self.iolen > EMU_BUF_SIZE {
            return RES_BADSIZE;
        }
        let h = self.handles[self.handle as usize].as_mut().unwrap();
        if let Err(e) = h.file.seek(SeekFrom::Start(self.offset as u64)) {
            return errno_to_code(&e);
        }
        match h.file.read(&mut self.buf[..self.iolen as usize]) {
            Ok(len) => {
                self.offset += len as u32;
                self.iolen = len as u32;
                ctx.ext.stats.remu += 1;
                RES_SUCCESS
            }
            Err(e) => errno_to_code(&e),
        }
    }

    fn op_readdir(&mut self, ctx: &mut DeviceCtx) -> u32 {
        if self.iolen > EMU_BUF_SIZE {
            return RES_BADSIZE;
        }
        let h = self.handles[self.handle as usize].as_ref().unwrap();
        if !h.is_dir {
            return RES_NOTDIR;
        }

        // Entry number `offset`, with the dot entries first and the rest
        // in a stable (sorted) order.
        let mut names = vec![".".to_string(), "..".to_string()];
        let mut rest: Vec<String> = match std::fs::read_dir(&h.path) {
            Ok(it) => it
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => return errno_to_code(&e),
        };
        rest.sort();
        names.extend(rest);

        match names.get(self.offset as usize) {
            Some(name) => {
                ctx.ext.tracing.hw(
                    TraceKind::Emufs,
                    format_args!("emufs: slot {}: readdir got {}", self.slot, name),
                );
                let len = name.len().min(self.iolen as usize);
                self.buf[..len].copy_from_slice(&name.as_bytes()[..len]);
                self.iolen = len as u32;
                self.offset += 1;
                ctx.ext.stats.remu += 1;
            }
            None => {
                self.iolen = 0;
            }
        }
        RES_SUCCESS
    }

    fn op_write(&mut self, ctx: &mut DeviceCtx) -> u32 {
        if self.iolen > EMU_BUF_SIZE {
            return RES_BADSIZE;
        }
        let h = self.handles[self.handle as usize].as_mut().unwrap();
        if let Err(e) = h.file.seek(SeekFrom::Start(self.offset as u64)) {
            return errno_to_code(&e);
        }
        match h.file.write(&self.buf[..self.iolen as usize]) {
            Ok(len) => {
                self.offset += len as u32;
                self.iolen = len as u32;
                ctx.ext.stats.wemu += 1;
                RES_SUCCESS
            }
            Err(e) => errno_to_code(&e),
        }
    }

    fn op_getsize(&mut self, ctx: &mut DeviceCtx) -> u32 {
        let h = self.handles[self.handle as usize].as_ref().unwrap();
        match h.file.metadata() {
            Ok(md) => {
                self.iolen = md.len() as u32;
                ctx.ext.stats.memu += 1;
                RES_SUCCESS
            }
            Err(e) => errno_to_code(&e),
        }
    }

    fn op_trunc(&mut self, ctx: &mut DeviceCtx) -> u32 {
        let h = self.handles[self.handle as usize].as_ref().unwrap();
        match h.file.set_len(self.iolen as u64) {
            Ok(()) => {
                ctx.ext.stats.wemu += 1;
                RES_SUCCESS
            }
            Err(e) => errno_to_code(&e),
        }
    }

    fn run_op(&mut self, ctx: &mut DeviceCtx, op: u32) -> u32 {
        match op {
            OP_OPEN => return self.op_open(ctx, false, false),
            OP_CREATE => return self.op_open(ctx, true, false),
            OP_EXCLCREATE => return self.op_open(ctx, true, true),
            _ => {}
        }

        if self.handle as usize >= MAXHANDLES || self.handles[self.handle as usize].is_none() {
            return RES_BADHANDLE;
        }

        match op {
            OP_CLOSE => self.op_close(ctx),
            OP_READ => self.op_read(ctx),
            OP_READDIR => self.op_readdir(ctx),
            OP_WRITE => self.op_write(ctx),
            OP_GETSIZE => self.op_getsize(ctx),
            OP_TRUNC => self.op_trunc(ctx),
            _ => RES_BADOP,
        }
    }

    /// The guest wrote the operation register
    fn start_op(&mut self, ctx: &mut DeviceCtx, op: u32) {
        if self.busy {
            ctx.hang("emufs operation started while an operation was already in progress");
            return;
        }

        let res = self.run_op(ctx, op);
        self.busy = true;
        self.busyresult = res;
        ctx.ext.clock.schedule(
            EMUFS_NSECS,
            0,
            EventKind::EmufsDone { slot: self.slot },
            "emufs",
        );
    }

    /// Operation latency elapsed; post the result
    pub fn op_done(&mut self, ctx: &mut DeviceCtx) {
        if !self.busy {
            panic!("internal error: spurious emufs completion");
        }
        let res = self.busyresult;
        self.set_result(ctx, res);
        self.busy = false;
        self.busyresult = 0;
        ctx.ext.tracing.hw(
            TraceKind::Emufs,
            format_args!("emufs: slot {}: Operation complete", self.slot),
        );
    }

    // --------------------------------------------------------------
    // Register interface

    pub fn fetch(&mut self, _ctx: &mut DeviceCtx, offset: u32) -> std::result::Result<u32, BusError> {
        if (EMU_BUF_START..EMU_BUF_END).contains(&offset) {
            let off = (offset - EMU_BUF_START) as usize;
            return Ok(u32::from_be_bytes([
                self.buf[off],
                self.buf[off + 1],
                self.buf[off + 2],
                self.buf[off + 3],
            ]));
        }
        match offset {
            EMUREG_HANDLE => Ok(self.handle),
            EMUREG_OFFSET => Ok(self.offset),
            EMUREG_IOLEN => Ok(self.iolen),
            EMUREG_OPER => Ok(0),
            EMUREG_RESULT => Ok(self.result),
            _ => Err(BusError),
        }
    }

    pub fn store(
        &mut self,
        ctx: &mut DeviceCtx,
        offset: u32,
        val: u32,
    ) -> std::result::Result<(), BusError> {
        if (EMU_BUF_START..EMU_BUF_END).contains(&offset) {
            let off = (offset - EMU_BUF_START) as usize;
            self.buf[off..off + 4].copy_from_slice(&val.to_be_bytes());
            return Ok(());
        }
        match offset {
            EMUREG_HANDLE => {
                self.handle = val;
                Ok(())
            }
            EMUREG_OFFSET => {
                self.offset = val;
                Ok(())
            }
            EMUREG_IOLEN => {
                self.iolen = val;
                Ok(())
            }
            EMUREG_OPER => {
                self.start_op(ctx, val);
                Ok(())
            }
            EMUREG_RESULT => {
                self.set_result(ctx, val);
                Ok(())
            }
            _ => Err(BusError),
        }
    }

    pub fn cleanup(&mut self) {
        for h in &mut self.handles {
            *h = None;
        }
    }

    pub fn dump(&self) {
        log::info!("Emufs rev {}", EMUFS_REVISION);
        log::info!(
            "    Registers: handle {}  result {}  offset {} (0x{:x})  iolen {} (0x{:x})",
            self.handle,
            self.result,
            self.offset,
            self.offset,
            self.iolen,
            self.iolen
        );
        if self.busy {
            log::info!("    Presently working; result will be {}", self.busyresult);
        } else {
            log::info!("    Presently idle");
        }
    }

    /// Root directory path (for tests)
    #[cfg(test)]
    fn root_path(&self) -> &std::path::Path {
        &self.handles[ROOTHANDLE as usize].as_ref().unwrap().path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::{BusCtx, IrqController};
    use crate::core::clock::Clock;
    use crate::core::console::Console;
    use crate::core::stats::Stats;
    use crate::core::system::Control;
    use crate::core::trace::Tracing;
    use tempfile::TempDir;

    struct TestRig {
        clock: Clock,
        stats: Stats,
        control: Control,
        tracing: Tracing,
        console: Console,
        irq: IrqController,
    }

    impl TestRig {
        fn new() -> Self {
            TestRig {
                clock: Clock::new(),
                stats: Stats::new(1),
                control: Control::new(),
                tracing: Tracing::new(),
                console: Console::init(false),
                irq: IrqController::new(1),
            }
        }

        fn with_ctx<R>(&mut self, f: impl FnOnce(&mut DeviceCtx) -> R) -> R {
            let mut ext = BusCtx {
                clock: &mut self.clock,
                stats: &mut self.stats,
                control: &mut self.control,
                tracing: &mut self.tracing,
                console: &mut self.console,
            };
            let mut ctx = DeviceCtx {
                slot: 1,
                cpunum: 0,
                irq: &mut self.irq,
                ext: &mut ext,
            };
            f(&mut ctx)
        }
    }

    fn make_emufs(dir: &TempDir) -> EmufsDevice {
        let args = vec![format!("dir={}", dir.path().display())];
        EmufsDevice::new(1, &args).unwrap()
    }

    #[test]
    fn test_root_handle_is_dir() {
        let dir = TempDir::new().unwrap();
        let fs = make_emufs(&dir);
        assert_eq!(fs.root_path(), dir.path());
        assert!(fs.handles[0].as_ref().unwrap().is_dir);
    }

    #[test]
    fn test_open_missing_file_is_badpath() {
        let dir = TempDir::new().unwrap();
        let mut fs = make_emufs(&dir);
        let mut rig = TestRig::new();

        fs.handle = 0;
        let name = b"nonesuch";
        fs.buf[..name.len()].copy_from_slice(name);
        fs.iolen = name.len() as u32;
        let res = rig.with_ctx(|ctx| fs.op_open(ctx, false, false));
        assert_eq!(res, RES_BADPATH);
    }

    #[test]
    fn test_create_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut fs = make_emufs(&dir);
        let mut rig = TestRig::new();

        // create "hello"
        fs.handle = 0;
        let name = b"hello";
        fs.buf[..name.len()].copy_from_slice(name);
        fs.iolen = name.len() as u32;
        let res = rig.with_ctx(|ctx| fs.op_open(ctx, true, false));
        assert_eq!(res, RES_SUCCESS);
        assert_eq!(fs.iolen, 0); // a file, not a directory
        let handle = fs.handle;
        assert_ne!(handle, 0);

        // write some bytes
        let payload = b"emufs payload";
        fs.buf[..payload.len()].copy_from_slice(payload);
        fs.iolen = payload.len() as u32;
        fs.offset = 0;
        let res = rig.with_ctx(|ctx| fs.op_write(ctx));
        assert_eq!(res, RES_SUCCESS);
        assert_eq!(fs.offset, payload.len() as u32);

        // read them back
        fs.buf.iter_mut().for_each(|b| *b = 0);
        fs.offset = 0;
        fs.iolen = payload.len() as u32;
        let res = rig.with_ctx(|ctx| fs.op_read(ctx));
        assert_eq!(res, RES_SUCCESS);
        assert_eq!(&fs.buf[..payload.len()], payload);

        // getsize agrees
        let res = rig.with_ctx(|ctx| fs.op_getsize(ctx));
        assert_eq!(res, RES_SUCCESS);
        assert_eq!(fs.iolen, payload.len() as u32);
    }

    #[test]
    fn test_exclcreate_of_existing_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("present"), b"x").unwrap();
        let mut fs = make_emufs(&dir);
        let mut rig = TestRig::new();

        fs.handle = 0;
        let name = b"present";
        fs.buf[..name.len()].copy_from_slice(name);
        fs.iolen = name.len() as u32;
        let res = rig.with_ctx(|ctx| fs.op_open(ctx, true, true));
        assert_eq!(res, RES_EXISTS);
    }

    #[test]
    fn test_readdir_walks_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("aaa"), b"").unwrap();
        std::fs::write(dir.path().join("bbb"), b"").unwrap();
        let mut fs = make_emufs(&dir);
        let mut rig = TestRig::new();

        fs.handle = 0;
        let mut seen = Vec::new();
        loop {
            fs.iolen = 64;
            let res = rig.with_ctx(|ctx| fs.op_readdir(ctx));
            assert_eq!(res, RES_SUCCESS);
            if fs.iolen == 0 {
                break;
            }
            seen.push(String::from_utf8_lossy(&fs.buf[..fs.iolen as usize]).into_owned());
        }
        assert_eq!(seen, vec![".", "..", "aaa", "bbb"]);
    }

    #[test]
    fn test_bad_handle_checked() {
        let dir = TempDir::new().unwrap();
        let mut fs = make_emufs(&dir);
        let mut rig = TestRig::new();

        fs.handle = 17; // never opened
        let res = rig.with_ctx(|ctx| fs.run_op(ctx, OP_READ));
        assert_eq!(res, RES_BADHANDLE);
        fs.handle = 9999; // out of range
        let res = rig.with_ctx(|ctx| fs.run_op(ctx, OP_CLOSE));
        assert_eq!(res, RES_BADHANDLE);
    }

    #[test]
    fn test_close_frees_handle() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let mut fs = make_emufs(&dir);
        let mut rig = TestRig::new();

        fs.handle = 0;
        fs.buf[..1].copy_from_slice(b"f");
        fs.iolen = 1;
        let res = rig.with_ctx(|ctx| fs.op_open(ctx, false, false));
        assert_eq!(res, RES_SUCCESS);
        let h = fs.handle;

        let res = rig.with_ctx(|ctx| fs.run_op(ctx, OP_CLOSE));
        assert_eq!(res, RES_SUCCESS);
        assert!(fs.handles[h as usize].is_none());
    }

    #[test]
    fn test_trunc_changes_size() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("t"), b"0123456789").unwrap();
        let mut fs = make_emufs(&dir);
        let mut rig = TestRig::new();

        fs.handle = 0;
        fs.buf[..1].copy_from_slice(b"t");
        fs.iolen = 1;
        assert_eq!(rig.with_ctx(|ctx| fs.op_open(ctx, false, false)), RES_SUCCESS);

        fs.iolen = 4;
        assert_eq!(rig.with_ctx(|ctx| fs.op_trunc(ctx)), RES_SUCCESS);
        assert_eq!(
            std::fs::metadata(dir.path().join("t")).unwrap().len(),
            4
        );
    }
}
