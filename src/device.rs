// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command channel to the accelerator.

#[cfg(feature = "mpp-service")]
pub mod mpp_service;

/// Synchronous request/response channel to the kernel driver of the
/// accelerator.
///
/// Offsets are byte offsets into the accelerator's register space, i.e. the
/// register number times four.
pub trait Transport {
    /// Queues `regs` to be written starting at `offset` when the task is
    /// submitted.
    fn reg_write(&mut self, offset: u32, regs: &[u32]) -> anyhow::Result<()>;
    /// Reads `regs.len()` registers starting at `offset` as they were when the
    /// last polled task completed.
    fn reg_read(&mut self, offset: u32, regs: &mut [u32]) -> anyhow::Result<()>;
    /// Submits the queued register writes as one task.
    fn submit(&mut self) -> anyhow::Result<()>;
    /// Blocks until the oldest submitted task completes or times out.
    fn poll(&mut self) -> anyhow::Result<()>;
}
