// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Accelerator-visible memory.
//!
//! The accelerator addresses memory through buffer descriptors: the low 10
//! bits of every address register hold the descriptor and the upper 22 bits
//! an offset into the buffer, which the kernel driver translates before the
//! task runs.

#[cfg(feature = "mpp-service")]
pub mod dma_heap;

/// A buffer the accelerator can address.
pub trait HwBuffer {
    /// Descriptor the accelerator uses as the buffer's address.
    fn fd(&self) -> u32;
    /// Size of the buffer in bytes.
    fn size(&self) -> usize;
    /// CPU mapping of the whole buffer, or `None` if it cannot be mapped.
    fn map(&mut self) -> Option<&mut [u8]>;
}

/// Source of the buffers owned by a decoding context.
pub trait BufferAllocator {
    type Buffer: HwBuffer;

    /// Allocates a zero-initialized buffer of at least `size` bytes.
    fn get(&mut self, size: usize) -> anyhow::Result<Self::Buffer>;
    /// Returns `buffer` to the allocator.
    fn put(&mut self, buffer: Self::Buffer) -> anyhow::Result<()>;
}

/// Combines a buffer descriptor and a byte offset into the packed address
/// format used by the accelerator's address registers.
pub fn packed_address(fd: u32, offset: u32) -> u32 {
    fd.wrapping_add(offset << 10)
}
