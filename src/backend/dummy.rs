// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy allocator and transport whose only purpose is
//! to let the decoding context run so we can test it in isolation.

use std::cell::Ref;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::anyhow;

use crate::buffer::BufferAllocator;
use crate::buffer::HwBuffer;
use crate::device::Transport;

pub struct DummyBuffer {
    fd: u32,
    data: Vec<u8>,
    mappable: bool,
}

impl DummyBuffer {
    pub fn new(fd: u32, size: usize) -> Self {
        Self {
            fd,
            data: vec![0; size],
            mappable: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl HwBuffer for DummyBuffer {
    fn fd(&self) -> u32 {
        self.fd
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn map(&mut self) -> Option<&mut [u8]> {
        if self.mappable {
            Some(self.data.as_mut_slice())
        } else {
            None
        }
    }
}

/// Hands out heap-backed buffers with increasing descriptors.
pub struct DummyAllocator {
    next_fd: u32,
    live: Rc<RefCell<BTreeSet<u32>>>,
    remaining: Option<usize>,
    mappable: bool,
    failing_puts: bool,
}

impl Default for DummyAllocator {
    fn default() -> Self {
        Self {
            next_fd: 1,
            live: Default::default(),
            remaining: None,
            mappable: true,
            failing_puts: false,
        }
    }
}

impl DummyAllocator {
    /// Makes every allocation after the first `count` fail.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    /// Makes every buffer impossible to map.
    pub fn unmappable(mut self) -> Self {
        self.mappable = false;
        self
    }

    /// Makes every release fail after the buffer has been taken back.
    pub fn failing_puts(mut self) -> Self {
        self.failing_puts = true;
        self
    }

    /// Number of buffers handed out and not returned yet.
    pub fn live(&self) -> usize {
        self.live.borrow().len()
    }

    /// Shared view of the live descriptors, usable once the allocator has
    /// been moved into a context.
    pub fn live_set(&self) -> Rc<RefCell<BTreeSet<u32>>> {
        Rc::clone(&self.live)
    }
}

impl BufferAllocator for DummyAllocator {
    type Buffer = DummyBuffer;

    fn get(&mut self, size: usize) -> anyhow::Result<DummyBuffer> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(anyhow!("allocation of {} bytes failed", size));
            }
            *remaining -= 1;
        }

        let mut buffer = DummyBuffer::new(self.next_fd, size);
        buffer.mappable = self.mappable;
        self.live.borrow_mut().insert(self.next_fd);
        self.next_fd += 1;

        Ok(buffer)
    }

    fn put(&mut self, buffer: DummyBuffer) -> anyhow::Result<()> {
        if !self.live.borrow_mut().remove(&buffer.fd) {
            Err(anyhow!("buffer {} was not allocated here", buffer.fd))
        } else if self.failing_puts {
            Err(anyhow!("release of buffer {} failed", buffer.fd))
        } else {
            Ok(())
        }
    }
}

/// What the accelerator would have seen.
#[derive(Default)]
pub struct TransportLog {
    /// Last value written to every register, by register number.
    pub regs: BTreeMap<u32, u32>,
    /// Byte offsets of the register writes, in order.
    pub writes: Vec<u32>,
    pub submits: usize,
    pub polls: usize,
    /// Values returned by register reads, by register number.
    pub status: BTreeMap<u32, u32>,
    /// Operation ("write", "read", "submit" or "poll") made to fail.
    pub fail_on: Option<&'static str>,
}

impl TransportLog {
    pub fn reg(&self, reg: u32) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }
}

/// Transport recording the register writes. Clones share the same log so a
/// test can keep one while the context owns another.
#[derive(Clone, Default)]
pub struct DummyTransport(Rc<RefCell<TransportLog>>);

impl DummyTransport {
    pub fn log(&self) -> Ref<TransportLog> {
        self.0.borrow()
    }

    pub fn set_status(&self, reg: u32, value: u32) {
        self.0.borrow_mut().status.insert(reg, value);
    }

    pub fn fail_on(&self, op: Option<&'static str>) {
        self.0.borrow_mut().fail_on = op;
    }

    fn check(&self, op: &'static str) -> anyhow::Result<()> {
        if self.0.borrow().fail_on == Some(op) {
            Err(anyhow!("injected {} failure", op))
        } else {
            Ok(())
        }
    }
}

impl Transport for DummyTransport {
    fn reg_write(&mut self, offset: u32, regs: &[u32]) -> anyhow::Result<()> {
        self.check("write")?;
        let mut log = self.0.borrow_mut();
        log.writes.push(offset);
        for (i, value) in regs.iter().enumerate() {
            log.regs.insert(offset / 4 + i as u32, *value);
        }
        Ok(())
    }

    fn reg_read(&mut self, offset: u32, regs: &mut [u32]) -> anyhow::Result<()> {
        self.check("read")?;
        let log = self.0.borrow();
        for (i, value) in regs.iter_mut().enumerate() {
            *value = log.status.get(&(offset / 4 + i as u32)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn submit(&mut self) -> anyhow::Result<()> {
        self.check("submit")?;
        self.0.borrow_mut().submits += 1;
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        self.check("poll")?;
        self.0.borrow_mut().polls += 1;
        Ok(())
    }
}
