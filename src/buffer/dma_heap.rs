// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Allocator backed by the kernel's dma-heap interface.

use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::slice;

use anyhow::anyhow;
use anyhow::Context;
use nix::fcntl::OFlag;
use nix::ioctl_readwrite;
use nix::libc;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;

use crate::buffer::BufferAllocator;
use crate::buffer::HwBuffer;
use crate::utils::handle_eintr;

pub const DEFAULT_HEAP: &str = "/dev/dma_heap/system";

// Defined in include/uapi/linux/dma-heap.h
const DMA_HEAP_IOC_MAGIC: u8 = b'H';
const DMA_HEAP_IOCTL_ALLOC: u8 = 0;
#[repr(C)]
struct dma_heap_allocation_data {
    len: u64,
    fd: u32,
    fd_flags: u32,
    heap_flags: u64,
}
ioctl_readwrite!(
    dma_heap_ioctl_alloc,
    DMA_HEAP_IOC_MAGIC,
    DMA_HEAP_IOCTL_ALLOC,
    dma_heap_allocation_data
);

/// A dma-buf allocated from a heap and mapped for the lifetime of the buffer.
#[derive(Debug)]
pub struct DmaHeapBuffer {
    file: File,
    addr: NonNull<libc::c_void>,
    size: usize,
}

impl HwBuffer for DmaHeapBuffer {
    fn fd(&self) -> u32 {
        self.file.as_raw_fd() as u32
    }

    fn size(&self) -> usize {
        self.size
    }

    fn map(&mut self) -> Option<&mut [u8]> {
        // SAFETY: `addr` maps `size` bytes until the buffer is dropped, and the
        // returned slice borrows the buffer mutably.
        Some(unsafe { slice::from_raw_parts_mut(self.addr.as_ptr() as *mut u8, self.size) })
    }
}

impl Drop for DmaHeapBuffer {
    fn drop(&mut self) {
        // SAFETY: `addr` and `size` describe the mapping created in `get`, and
        // no slice of it can outlive `self`.
        if let Err(e) = unsafe { munmap(self.addr, self.size) } {
            log::error!("Unable to unmap dma-heap buffer: {e}");
        }
    }
}

pub struct DmaHeapAllocator {
    heap: File,
}

impl DmaHeapAllocator {
    /// Opens the dma-heap at `path`, usually [`DEFAULT_HEAP`].
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let heap = File::options()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .with_context(|| format!("opening dma-heap {}", path.as_ref().display()))?;

        Ok(Self { heap })
    }
}

impl BufferAllocator for DmaHeapAllocator {
    type Buffer = DmaHeapBuffer;

    fn get(&mut self, size: usize) -> anyhow::Result<DmaHeapBuffer> {
        let len = NonZeroUsize::new(size).ok_or_else(|| anyhow!("zero-sized allocation"))?;
        let mut data = dma_heap_allocation_data {
            len: size as u64,
            fd: 0,
            fd_flags: (OFlag::O_RDWR | OFlag::O_CLOEXEC).bits() as u32,
            heap_flags: 0,
        };
        // SAFETY: `data` is a valid `dma_heap_allocation_data` for the whole
        // call.
        handle_eintr(&mut || unsafe { dma_heap_ioctl_alloc(self.heap.as_raw_fd(), &mut data) })
            .with_context(|| format!("allocating {size} bytes from dma-heap"))?;
        // SAFETY: the kernel handed us ownership of a fresh descriptor.
        let file = unsafe { File::from_raw_fd(data.fd as i32) };

        // SAFETY: a fresh shared mapping of a dma-buf we own, aliasing no Rust
        // memory.
        let addr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .context("mapping dma-heap buffer")?;

        log::debug!("Allocated {} bytes dma-buf fd {}", size, data.fd);

        Ok(DmaHeapBuffer { file, addr, size })
    }

    fn put(&mut self, buffer: DmaHeapBuffer) -> anyhow::Result<()> {
        drop(buffer);
        Ok(())
    }
}
