// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Transport over the Rockchip `mpp_service` kernel driver.
//!
//! Every interaction is a chain of requests passed to a single ioctl. The
//! driver collects register writes and read-back windows at submission time
//! and fills the read-back windows when the task is polled, so the status
//! window has to be known up front: it is given to [`MppService::open`] and
//! [`Transport::reg_read`] only serves reads within it.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;

use anyhow::anyhow;
use anyhow::Context;
use nix::ioctl_write_ptr;

use crate::device::Transport;
use crate::platform::ClientType;
use crate::utils::handle_eintr;

pub const MPP_SERVICE_NODE: &str = "/dev/mpp_service";

const MPP_IOC_MAGIC: u8 = b'v';
const MPP_IOC_CFG_V1: u8 = 1;
// The request chain is passed by pointer; the encoded size is the driver's.
ioctl_write_ptr!(mpp_ioc_cfg_v1, MPP_IOC_MAGIC, MPP_IOC_CFG_V1, u32);

const MPP_FLAGS_MULTI_MSG: u32 = 0x1;
const MPP_FLAGS_LAST_MSG: u32 = 0x2;

const MPP_CMD_INIT_CLIENT_TYPE: u32 = 0x100;
const MPP_CMD_SET_REG_WRITE: u32 = 0x200;
const MPP_CMD_SET_REG_READ: u32 = 0x201;
const MPP_CMD_POLL_HW_FINISH: u32 = 0x300;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
struct MppReqV1 {
    cmd: u32,
    flag: u32,
    size: u32,
    offset: u32,
    data_ptr: u64,
}

pub struct MppService {
    file: File,
    writes: Vec<(u32, Vec<u32>)>,
    readback_offset: u32,
    readback: Box<[u32]>,
}

impl MppService {
    /// Opens the driver node at `path` as a client of type `client`. The
    /// `readback_len` registers starting at byte offset `readback_offset` are
    /// read back after each task.
    pub fn open<P: AsRef<Path>>(
        path: P,
        client: ClientType,
        readback_offset: u32,
        readback_len: usize,
    ) -> anyhow::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))?;

        let service = Self {
            file,
            writes: Vec::new(),
            readback_offset,
            readback: vec![0; readback_len].into_boxed_slice(),
        };

        let client_type = client as u32;
        let mut req = [MppReqV1 {
            cmd: MPP_CMD_INIT_CLIENT_TYPE,
            flag: 0,
            size: std::mem::size_of::<u32>() as u32,
            offset: 0,
            data_ptr: &client_type as *const u32 as u64,
        }];
        service
            .send(&mut req)
            .with_context(|| format!("registering as {client:?} client"))?;

        log::debug!(
            "Opened {} as {:?} client",
            path.as_ref().display(),
            client
        );

        Ok(service)
    }

    fn send(&self, reqs: &mut [MppReqV1]) -> anyhow::Result<()> {
        let count = reqs.len();
        for (i, req) in reqs.iter_mut().enumerate() {
            req.flag |= MPP_FLAGS_MULTI_MSG;
            if i + 1 == count {
                req.flag |= MPP_FLAGS_LAST_MSG;
            }
        }

        // SAFETY: `reqs` is a live array of `count` requests whose payload
        // pointers are kept valid by the caller until the ioctl returns.
        handle_eintr(&mut || unsafe {
            mpp_ioc_cfg_v1(self.file.as_raw_fd(), reqs.as_ptr() as *const u32)
        })?;

        Ok(())
    }
}

impl Transport for MppService {
    fn reg_write(&mut self, offset: u32, regs: &[u32]) -> anyhow::Result<()> {
        self.writes.push((offset, regs.to_vec()));
        Ok(())
    }

    fn reg_read(&mut self, offset: u32, regs: &mut [u32]) -> anyhow::Result<()> {
        let start = offset
            .checked_sub(self.readback_offset)
            .filter(|delta| delta % 4 == 0)
            .map(|delta| (delta / 4) as usize)
            .ok_or_else(|| anyhow!("register 0x{offset:x} is outside the read-back window"))?;
        let window = self
            .readback
            .get(start..start + regs.len())
            .ok_or_else(|| anyhow!("read of {} registers overruns the window", regs.len()))?;

        regs.copy_from_slice(window);
        Ok(())
    }

    fn submit(&mut self) -> anyhow::Result<()> {
        let mut reqs: Vec<MppReqV1> = self
            .writes
            .iter()
            .map(|(offset, regs)| MppReqV1 {
                cmd: MPP_CMD_SET_REG_WRITE,
                flag: 0,
                size: std::mem::size_of_val(regs.as_slice()) as u32,
                offset: *offset,
                data_ptr: regs.as_ptr() as u64,
            })
            .collect();
        reqs.push(MppReqV1 {
            cmd: MPP_CMD_SET_REG_READ,
            flag: 0,
            size: std::mem::size_of_val(&*self.readback) as u32,
            offset: self.readback_offset,
            data_ptr: self.readback.as_mut_ptr() as u64,
        });

        let ret = self.send(&mut reqs).context("submitting task");
        self.writes.clear();
        ret
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        let mut req = [MppReqV1 {
            cmd: MPP_CMD_POLL_HW_FINISH,
            ..Default::default()
        }];

        self.send(&mut req).context("polling task")
    }
}
