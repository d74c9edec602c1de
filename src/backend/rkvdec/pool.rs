// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-task buffers.
//!
//! Every task in flight needs its own scaling list, parameter-set and
//! reference-set buffers as well as its own register image, since the
//! accelerator reads them while the host prepares the next task. The pool
//! holds a fixed number of such slots, allocated once for the lifetime of the
//! decoding context.

use crate::backend::rkvdec::regs::RegisterImage;
use crate::backend::rkvdec::HwGeneration;
use crate::backend::rkvdec::RPS_SIZE;
use crate::backend::rkvdec::SCALING_LIST_SIZE;
use crate::buffer::BufferAllocator;
use crate::buffer::HwBuffer;
use crate::decoder::BackendError;
use crate::decoder::BackendResult;

pub struct BufferSlot<B: HwBuffer> {
    pub scaling_list: B,
    pub pps: B,
    pub rps: B,
    pub regs: RegisterImage,
    in_use: bool,
}

impl<B: HwBuffer> BufferSlot<B> {
    pub fn in_use(&self) -> bool {
        self.in_use
    }
}

pub struct BufferPool<B: HwBuffer> {
    slots: Vec<BufferSlot<B>>,
}

fn get_buffer<A: BufferAllocator>(
    allocator: &mut A,
    size: usize,
    what: &str,
) -> BackendResult<A::Buffer> {
    allocator.get(size).map_err(|e| {
        log::error!("Failed to allocate {} buffer of {} bytes: {:#}", what, size, e);
        BackendError::OutOfResources
    })
}

fn put_buffer<A: BufferAllocator>(allocator: &mut A, buffer: A::Buffer, what: &str) {
    if let Err(e) = allocator.put(buffer) {
        log::warn!("Failed to release {} buffer: {:#}", what, e);
    }
}

impl<B: HwBuffer> BufferPool<B> {
    /// Allocates `count` slots sized for `generation`. Buffers allocated
    /// before a failure are returned to `allocator`.
    pub fn acquire_resources<A: BufferAllocator<Buffer = B>>(
        allocator: &mut A,
        generation: HwGeneration,
        count: usize,
    ) -> BackendResult<Self> {
        let mut pool = Self {
            slots: Vec::with_capacity(count),
        };

        for _ in 0..count {
            match Self::allocate_slot(allocator, generation) {
                Ok(slot) => pool.slots.push(slot),
                Err(e) => {
                    if let Err(release_err) = pool.release_resources(allocator) {
                        log::error!("Failed to release partial pool: {}", release_err);
                    }
                    return Err(e);
                }
            }
        }

        log::debug!("Allocated {} buffer slots for {:?}", count, generation);
        Ok(pool)
    }

    fn allocate_slot<A: BufferAllocator<Buffer = B>>(
        allocator: &mut A,
        generation: HwGeneration,
    ) -> BackendResult<BufferSlot<B>> {
        let scaling_list = get_buffer(allocator, SCALING_LIST_SIZE, "scaling list")?;
        let pps = match get_buffer(allocator, generation.pps_size(), "parameter set") {
            Ok(pps) => pps,
            Err(e) => {
                put_buffer(allocator, scaling_list, "scaling list");
                return Err(e);
            }
        };
        let rps = match get_buffer(allocator, RPS_SIZE, "reference set") {
            Ok(rps) => rps,
            Err(e) => {
                put_buffer(allocator, pps, "parameter set");
                put_buffer(allocator, scaling_list, "scaling list");
                return Err(e);
            }
        };

        Ok(BufferSlot {
            scaling_list,
            pps,
            rps,
            regs: Default::default(),
            in_use: false,
        })
    }

    /// Returns every buffer of the pool to `allocator`, last slot first. All
    /// buffers are returned even if some fail; the first error is reported.
    pub fn release_resources<A: BufferAllocator<Buffer = B>>(
        &mut self,
        allocator: &mut A,
    ) -> BackendResult<()> {
        let mut ret = Ok(());
        while let Some(slot) = self.slots.pop() {
            if slot.in_use {
                log::warn!("Releasing buffer slot {} while in use", self.slots.len());
            }
            for buffer in [slot.rps, slot.pps, slot.scaling_list] {
                if let Err(e) = allocator.put(buffer) {
                    if ret.is_ok() {
                        ret = Err(BackendError::Other(e.context("releasing pool buffer")));
                    }
                }
            }
        }

        ret
    }

    /// Marks the first free slot as used and returns its index.
    pub fn acquire_slot(&mut self) -> BackendResult<usize> {
        match self.slots.iter().position(|slot| !slot.in_use) {
            Some(index) => {
                self.slots[index].in_use = true;
                Ok(index)
            }
            None => {
                log::error!("All {} buffer slots are in use", self.slots.len());
                Err(BackendError::OutOfResources)
            }
        }
    }

    pub fn release_slot(&mut self, index: usize) {
        match self.slots.get_mut(index) {
            Some(slot) => slot.in_use = false,
            None => log::warn!("Releasing unknown buffer slot {}", index),
        }
    }

    pub fn slot(&self, index: usize) -> Option<&BufferSlot<B>> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut BufferSlot<B>> {
        self.slots.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots currently acquired.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }
}
