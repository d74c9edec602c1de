// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! HEVC decoding context for rkvdec accelerators.
//!
//! The context owns every buffer the accelerator reads besides the frames and
//! the slice data: the CABAC table, the per-task buffer slots and the
//! row-context buffer. For each task it assembles the register image
//! ([`DecodeContext::generate_registers`]), sends it to the transport
//! ([`DecodeContext::start`]) and collects the result
//! ([`DecodeContext::wait`]).
//!
//! In pipelined mode an errored frame stays errored and, once one has been
//! seen, any later frame referencing an errored frame is marked errored too,
//! until [`DecodeContext::reset`].

use crate::backend::rkvdec::pool::BufferPool;
use crate::backend::rkvdec::pps::pack_parameter_set;
use crate::backend::rkvdec::pps::write_replicated;
use crate::backend::rkvdec::rcb::RcbLayout;
use crate::backend::rkvdec::regs;
use crate::backend::rkvdec::regs::RegisterImage;
use crate::backend::rkvdec::rps::encode_hw_rps;
use crate::backend::rkvdec::rps::encode_sw_rps;
use crate::backend::rkvdec::HwGeneration;
use crate::backend::rkvdec::RpsMode;
use crate::buffer::packed_address;
use crate::buffer::BufferAllocator;
use crate::buffer::HwBuffer;
use crate::codec::h265::cabac::cabac_table;
use crate::codec::h265::picture::ScalingLists;
use crate::codec::h265::picture::Sps;
use crate::codec::h265::scaling_list::scaling_factors;
use crate::codec::h265::scaling_list::scaling_list_slot;
use crate::codec::h265::scaling_list::SCALING_FACTOR_SIZE;
use crate::decoder::BackendError;
use crate::decoder::BackendResult;
use crate::decoder::DecodeTask;
use crate::decoder::DecoderConfig;
use crate::decoder::TaskState;
use crate::device::Transport;
use crate::utils::align_up;
use crate::video_frame::FrameHandle;

/// Padding the accelerator may read past the end of the slice data.
const STREAM_GUARD: usize = 64;
const CABAC_ERR_EN_LOW: u32 = 0xffff_dfff;
const CABAC_ERR_EN_HIGH: u32 = 0x3ffb_f9ff;

/// Describes a task that failed, as given to the error callback of a serial
/// context.
#[derive(Clone, Debug)]
pub struct DecodeFailure {
    pub output: FrameHandle,
    pub parse_err: bool,
    pub ref_err: bool,
    /// Interrupt status read back from the accelerator, 0 if it did not run.
    pub status: u32,
}

pub type ErrorCallback = Box<dyn FnMut(&DecodeFailure)>;

/// Layout of a decoded picture in its frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PictureGeometry {
    stride_y: u32,
    stride_uv: u32,
    /// Size of the luma plane.
    virstride_y: u32,
    /// Size of both planes, where the colocated motion vectors start.
    virstride_yuv: u32,
}

impl PictureGeometry {
    fn new(sps: &Sps) -> Self {
        let width = align_up(sps.width(), 64);
        let height = align_up(sps.height(), 8);
        let stride_y = align_up((width * sps.bit_depth_luma()) >> 3, 16);
        let stride_uv = align_up((width * sps.bit_depth_chroma()) >> 3, 16);
        let virstride_y = height * stride_y;
        let virstride_yuv = virstride_y + stride_uv * height / 2;

        Self {
            stride_y,
            stride_uv,
            virstride_y,
            virstride_yuv,
        }
    }
}

fn transport_err(op: &'static str) -> impl FnOnce(anyhow::Error) -> BackendError {
    move |source| BackendError::Transport { op, source }
}

pub struct DecodeContext<A: BufferAllocator, T: Transport> {
    config: DecoderConfig,
    allocator: A,
    transport: T,
    cabac_table: Option<A::Buffer>,
    pool: Option<BufferPool<A::Buffer>>,
    /// Last scaling lists converted and their record.
    scaling_cache: Option<(ScalingLists, Box<[u8; SCALING_FACTOR_SIZE]>)>,
    /// Allocated by the first task, kept until the context is dropped.
    rcb: Option<(A::Buffer, RcbLayout)>,
    /// Set once a pipelined task has been marked errored.
    fast_mode_error: bool,
    error_callback: Option<ErrorCallback>,
}

impl<A: BufferAllocator, T: Transport> DecodeContext<A, T> {
    /// Creates a context and allocates its buffers through `allocator`. The
    /// CABAC table is generated by [`cabac_table`].
    pub fn new(config: DecoderConfig, allocator: A, transport: T) -> BackendResult<Self> {
        Self::with_cabac_table(config, allocator, transport, &cabac_table())
    }

    /// Like [`DecodeContext::new`], but uploads `table` as given instead of
    /// the generated CABAC table.
    pub fn with_cabac_table(
        config: DecoderConfig,
        allocator: A,
        transport: T,
        table: &[u8],
    ) -> BackendResult<Self> {
        config.validate()?;
        if table.is_empty() {
            return Err(BackendError::InvalidParams("empty CABAC table".into()));
        }

        let mut ctx = Self {
            config,
            allocator,
            transport,
            cabac_table: None,
            pool: None,
            scaling_cache: None,
            rcb: None,
            fast_mode_error: false,
            error_callback: None,
        };
        // On failure, dropping `ctx` returns whatever was allocated.
        ctx.acquire_resources(table)?;

        log::debug!(
            "Created HEVC decoding context {:?} with a {} byte CABAC table",
            config,
            table.len()
        );
        Ok(ctx)
    }

    fn acquire_resources(&mut self, table: &[u8]) -> BackendResult<()> {
        let mut buffer = self.allocator.get(table.len()).map_err(|e| {
            log::error!("Failed to allocate CABAC table: {:#}", e);
            BackendError::OutOfResources
        })?;

        let written = match buffer.map() {
            Some(map) if map.len() >= table.len() => {
                map[..table.len()].copy_from_slice(table);
                true
            }
            _ => false,
        };
        if !written {
            if let Err(e) = self.allocator.put(buffer) {
                log::error!("Failed to release CABAC table: {:#}", e);
            }
            return Err(BackendError::Unmapped("CABAC table"));
        }
        self.cabac_table = Some(buffer);

        self.pool = Some(BufferPool::acquire_resources(
            &mut self.allocator,
            self.config.generation,
            self.config.slot_count(),
        )?);

        Ok(())
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Sets the function called with every failed task in serial mode.
    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.error_callback = Some(callback);
    }

    /// Register image of buffer slot `slot`.
    pub fn registers(&self, slot: usize) -> Option<&RegisterImage> {
        self.pool.as_ref()?.slot(slot).map(|slot| &slot.regs)
    }

    /// Number of tasks holding a buffer slot.
    pub fn tasks_in_flight(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.in_flight())
    }

    /// Whether an errored frame has been seen since the last reset.
    pub fn sticky_error(&self) -> bool {
        self.fast_mode_error
    }

    /// Prepares the registers and buffers of `task`.
    ///
    /// A task flagged upstream is accepted without doing anything. In
    /// pipelined mode this fails with [`BackendError::OutOfResources`] when
    /// every slot is taken, leaving the task untouched so it can be retried
    /// after waiting for an earlier one.
    pub fn generate_registers<S: HwBuffer>(
        &mut self,
        task: &mut DecodeTask<S>,
    ) -> BackendResult<()> {
        if task.state != TaskState::Idle {
            return Err(BackendError::InvalidState);
        }

        if task.has_upstream_error() {
            log::debug!(
                "Task for POC {} flagged upstream, not generating registers",
                task.params.curr_pic_order_cnt_val
            );
            task.state = TaskState::RegistersGenerated;
            return Ok(());
        }

        let pool = self.pool.as_mut().ok_or(BackendError::InvalidState)?;
        let slot = if self.config.pipelined() {
            pool.acquire_slot()?
        } else {
            0
        };
        task.slot = Some(slot);

        if let Err(e) = self.fill_registers(task, slot) {
            log::error!("Failed to generate registers: {}", e);
            self.finish_task(task, TaskState::Aborted);
            return Err(e);
        }

        log::debug!(
            "Generated registers for POC {} in slot {}",
            task.params.curr_pic_order_cnt_val,
            slot
        );
        task.state = TaskState::RegistersGenerated;
        Ok(())
    }

    fn fill_registers<S: HwBuffer>(
        &mut self,
        task: &mut DecodeTask<S>,
        slot_index: usize,
    ) -> BackendResult<()> {
        let generation = self.config.generation;
        let cabac_fd = self
            .cabac_table
            .as_ref()
            .map(|table| table.fd())
            .ok_or(BackendError::InvalidState)?;
        let slot = self
            .pool
            .as_mut()
            .and_then(|pool| pool.slot_mut(slot_index))
            .ok_or(BackendError::InvalidState)?;
        let sps = &task.params.sps;
        let pps = &task.params.pps;
        let regs = &mut slot.regs;

        regs.clear();

        // Scaling lists and parameter set.
        let scaling_slot = scaling_list_slot(
            sps.scaling_list_enabled_flag,
            pps.pps_scaling_list_data_present_flag,
            sps.seq_parameter_set_id,
            pps.pic_parameter_set_id,
        );
        let scaling_offset = scaling_slot * SCALING_FACTOR_SIZE;
        let scaling_addr = packed_address(slot.scaling_list.fd(), scaling_offset as u32);

        if sps.scaling_list_enabled_flag {
            let lists = &task.params.scaling_lists;
            let stale = self
                .scaling_cache
                .as_ref()
                .map_or(true, |(cached, _)| cached != lists);
            if stale {
                self.scaling_cache = Some((lists.clone(), Box::new(scaling_factors(lists))));
            }

            if let Some((_, record)) = &self.scaling_cache {
                let map = slot
                    .scaling_list
                    .map()
                    .ok_or(BackendError::Unmapped("scaling list"))?;
                map.get_mut(scaling_offset..scaling_offset + SCALING_FACTOR_SIZE)
                    .ok_or_else(|| {
                        BackendError::InvalidParams(format!(
                            "scaling list slot {} is outside its buffer",
                            scaling_slot
                        ))
                    })?
                    .copy_from_slice(&record[..]);
            }
        }

        let record = pack_parameter_set(generation, &task.params, scaling_addr)?;
        let pps_map = slot
            .pps
            .map()
            .ok_or(BackendError::Unmapped("parameter set"))?;
        write_replicated(&record, pps_map)?;

        if generation == HwGeneration::Vdpu34x {
            regs.codec_addr.set(regs::SCANLIST_BASE, scaling_addr);
            regs.common.set(regs::SCANLIST_ADDR_VALID_EN, 1);
        }

        // Output frame.
        let geometry = PictureGeometry::new(sps);
        regs.common.set(regs::SLICE_NUM, task.slices.len() as u32);
        regs.common.set(regs::Y_HOR_VIRSTRIDE, geometry.stride_y >> 4);
        regs.common.set(regs::UV_HOR_VIRSTRIDE, geometry.stride_uv >> 4);
        regs.common.set(regs::Y_VIRSTRIDE, geometry.virstride_y >> 4);

        let out_fd = match task.output.fd() {
            Some(fd) if fd != 0 => fd,
            _ => {
                log::error!(
                    "Output frame of POC {} has no buffer",
                    task.params.curr_pic_order_cnt_val
                );
                return Err(BackendError::MissingOutputBuffer);
            }
        };
        regs.common_addr.set(regs::DECOUT_BASE, out_fd);
        regs.common_addr.set(
            regs::COLMV_CUR_BASE,
            packed_address(out_fd, geometry.virstride_yuv),
        );
        regs.params
            .set(regs::CUR_POC, task.params.curr_pic_order_cnt_val as u32);

        // Reference picture set.
        let rps_map = slot
            .rps
            .map()
            .ok_or(BackendError::Unmapped("reference set"))?;
        match (generation, self.config.rps_mode) {
            (HwGeneration::Vdpu34x, RpsMode::Hardware) => {
                regs.common.set(regs::WAIT_RESET_EN, 1);
                regs.params.set(regs::REF_PIC_LAYER_SAME_WITH_CUR, 0xffff);
                encode_hw_rps(sps, rps_map)?;
            }
            (HwGeneration::Vdpu34x, RpsMode::Software) => {
                regs.params.set(regs::H26X_RPS_MODE, 1);
                encode_sw_rps(&task.slices, &task.ref_pocs(), rps_map)?;
            }
            (HwGeneration::Legacy, _) => {
                encode_sw_rps(&task.slices, &task.ref_pocs(), rps_map)?;
            }
        }

        regs.codec_addr.set(regs::CABACTBL_BASE, cabac_fd);
        regs.codec_addr.set(regs::PPS_BASE, slot.pps.fd());
        regs.codec_addr.set(regs::RPS_BASE, slot.rps.fd());

        // Slice data, padded with zeros the accelerator may read.
        let stream_fd = task.bitstream.fd();
        let stream_size = task.bitstream_size;
        let stream_len = ((stream_size + 15) & !15) + STREAM_GUARD;
        let stream = task
            .bitstream
            .map()
            .ok_or(BackendError::Unmapped("bitstream"))?;
        let stream_len_buffer = stream.len();
        stream
            .get_mut(stream_size..stream_len)
            .ok_or_else(|| {
                BackendError::InvalidParams(format!(
                    "bitstream buffer of {} bytes cannot hold {} bytes of padded slice data",
                    stream_len_buffer, stream_len
                ))
            })?
            .fill(0);
        regs.common_addr.set(regs::STRM_RLC_BASE, stream_fd);
        regs.common_addr.set(regs::RLCWRITE_BASE, stream_fd);
        regs.common.set(regs::STREAM_LEN, stream_len as u32);

        regs.common.set(regs::DEC_E, 1);
        regs.common.set(regs::DEC_TIMEOUT_E, 1);
        regs.common
            .set(regs::WR_DDR_ALIGN_EN, !task.params.pps.tiles_enabled_flag as u32);
        regs.common.set(regs::CABAC_ERR_EN_LOWBITS, CABAC_ERR_EN_LOW);
        regs.common.set(regs::CABAC_ERR_EN_HIGHBITS, CABAC_ERR_EN_HIGH);

        // Reference frames. Absent entries point at the output frame; present
        // ones without a buffer at the last valid reference.
        regs.common_addr.set(regs::ERROR_REF_BASE, out_fd);
        let mut valid_ref = out_fd;
        let mut ref_valid = 0u32;
        for (i, entry) in task.refs.iter().enumerate() {
            let base = match entry {
                Some(reference) => {
                    regs.params.set(regs::ref_poc(i), reference.poc as u32);
                    match reference.frame.fd() {
                        Some(fd) if fd != 0 => valid_ref = fd,
                        _ => log::warn!(
                            "Reference {} (POC {}) has no buffer, using {}",
                            i,
                            reference.poc,
                            valid_ref
                        ),
                    }
                    if i < regs::REF_VALID_COUNT {
                        ref_valid |= 1 << i;
                    }
                    valid_ref
                }
                None => out_fd,
            };
            regs.codec_addr.set(regs::ref_base(i), base);
            regs.codec_addr.set(
                regs::ref_colmv_base(i),
                packed_address(base, geometry.virstride_yuv),
            );
        }
        regs.params.set(regs::REF_VALID, ref_valid);

        regs.common.set(regs::COLMV_ERROR_MODE, 1);
        regs.common.set(regs::TIMEOUT_MODE, 1);
        regs.common
            .set(regs::CUR_PIC_IS_IDR, task.params.idr_pic_flag as u32);
        regs.common.set(regs::H26X_ERROR_MODE, 1);
        regs.common.set(regs::BUF_EMPTY_EN, 1);

        // Row-context buffer.
        let (rcb_fd, offsets) = Self::ensure_rcb(
            &mut self.allocator,
            &mut self.rcb,
            task.params.sps.width(),
            task.params.sps.height(),
        )?;
        for (engine, offset) in offsets.iter().enumerate() {
            regs.common_addr
                .set(regs::rcb_base(engine), packed_address(rcb_fd, *offset));
        }

        regs.dump();
        Ok(())
    }

    /// Returns the descriptor and region offsets of the row-context buffer,
    /// allocating it on first use.
    fn ensure_rcb(
        allocator: &mut A,
        rcb: &mut Option<(A::Buffer, RcbLayout)>,
        width: u32,
        height: u32,
    ) -> BackendResult<(u32, [u32; 10])> {
        let layout = RcbLayout::new(width, height);

        match rcb {
            Some((buffer, current)) => {
                if current.dimensions() != layout.dimensions() {
                    if layout.size() as usize > buffer.size() {
                        log::error!(
                            "Row-context buffer of {} bytes is too small for {}x{}",
                            buffer.size(),
                            width,
                            height
                        );
                        return Err(BackendError::InvalidParams(format!(
                            "picture grew to {}x{} within the decoding session",
                            width, height
                        )));
                    }
                    log::warn!(
                        "Picture size changed from {:?} to {}x{}, reusing row-context buffer",
                        current.dimensions(),
                        width,
                        height
                    );
                    *current = layout;
                }

                Ok((buffer.fd(), *current.offsets()))
            }
            None => {
                let buffer = allocator.get(layout.size() as usize).map_err(|e| {
                    log::error!("Failed to allocate row-context buffer: {:#}", e);
                    BackendError::OutOfResources
                })?;
                log::debug!(
                    "Allocated {} bytes row-context buffer for {}x{}",
                    layout.size(),
                    width,
                    height
                );

                let ret = (buffer.fd(), *layout.offsets());
                *rcb = Some((buffer, layout));
                Ok(ret)
            }
        }
    }

    /// Sends the registers of `task` to the accelerator.
    pub fn start<S>(&mut self, task: &mut DecodeTask<S>) -> BackendResult<()> {
        if task.state != TaskState::RegistersGenerated {
            return Err(BackendError::InvalidState);
        }

        if task.has_upstream_error() {
            task.state = TaskState::Submitted;
            return Ok(());
        }

        let slot = task.slot.ok_or(BackendError::InvalidState)?;
        let regs = self
            .pool
            .as_ref()
            .and_then(|pool| pool.slot(slot))
            .map(|slot| &slot.regs)
            .ok_or(BackendError::InvalidState)?;

        if let Err(e) = Self::submit_registers(&mut self.transport, regs) {
            log::error!("Failed to start task in slot {}: {:#}", slot, e);
            self.finish_task(task, TaskState::Aborted);
            return Err(e);
        }

        task.state = TaskState::Submitted;
        Ok(())
    }

    fn submit_registers(transport: &mut T, regs: &RegisterImage) -> BackendResult<()> {
        for (offset, values) in regs.write_groups() {
            transport
                .reg_write(offset, values)
                .map_err(transport_err("register write"))?;
        }

        transport.submit().map_err(transport_err("submit"))
    }

    /// Waits for the accelerator to finish `task` and handles its errors.
    ///
    /// A failure to poll the accelerator is treated as a decoding error of
    /// the task and also returned.
    pub fn wait<S>(&mut self, task: &mut DecodeTask<S>) -> BackendResult<()> {
        let aborted = match task.state {
            TaskState::Submitted => false,
            TaskState::Aborted => true,
            _ => return Err(BackendError::InvalidState),
        };

        let mut ret = Ok(());
        let mut hw_error = false;
        let mut status = 0;
        if !aborted && !task.has_upstream_error() {
            match self.poll_status(task.slot) {
                Ok(sta_int) => {
                    status = sta_int;
                    hw_error = self
                        .pool
                        .as_ref()
                        .zip(task.slot)
                        .and_then(|(pool, slot)| pool.slot(slot))
                        .map_or(false, |slot| slot.regs.hw_error());
                }
                Err(e) => {
                    log::error!("Failed to wait for task: {:#}", e);
                    hw_error = true;
                    ret = Err(e);
                }
            }
        }

        if aborted || hw_error || task.has_upstream_error() {
            self.handle_error(task, status);
        } else if self.config.pipelined() && self.fast_mode_error {
            if let Some(reference) = task
                .refs
                .iter()
                .flatten()
                .find(|reference| reference.frame.is_errored())
            {
                log::debug!(
                    "POC {} references errored POC {}",
                    task.params.curr_pic_order_cnt_val,
                    reference.poc
                );
                task.output.set_errored();
            }
        }

        let state = if aborted {
            TaskState::Aborted
        } else {
            TaskState::Completed
        };
        self.finish_task(task, state);

        ret
    }

    /// Polls for completion and reads the status group back into the slot's
    /// register image. Returns the interrupt status.
    fn poll_status(&mut self, slot: Option<usize>) -> BackendResult<u32> {
        self.transport.poll().map_err(transport_err("poll"))?;

        let regs = slot
            .and_then(|slot| self.pool.as_mut()?.slot_mut(slot))
            .map(|slot| &mut slot.regs)
            .ok_or(BackendError::InvalidState)?;
        let offset = regs.status.offset();
        self.transport
            .reg_read(offset, regs.status.regs_mut())
            .map_err(transport_err("status read"))?;

        let status = regs.status.get(regs::STA_INT);
        log::debug!("Task done, status 0x{:08x}", status);
        Ok(status)
    }

    fn handle_error<S>(&mut self, task: &DecodeTask<S>, status: u32) {
        log::debug!(
            "POC {} failed: parse_err {}, ref_err {}, status 0x{:08x}",
            task.params.curr_pic_order_cnt_val,
            task.parse_err,
            task.ref_err,
            status
        );

        if self.config.pipelined() {
            task.output.set_errored();
            self.fast_mode_error = true;
        } else {
            let failure = DecodeFailure {
                output: task.output.clone(),
                parse_err: task.parse_err,
                ref_err: task.ref_err,
                status,
            };
            match self.error_callback.as_mut() {
                Some(callback) => callback(&failure),
                None => log::warn!("Decoding error with no callback to report it to"),
            }
        }
    }

    /// Releases the slot of `task` and moves it to `state`.
    fn finish_task<S>(&mut self, task: &mut DecodeTask<S>, state: TaskState) {
        if let Some(slot) = task.slot.take() {
            if self.config.pipelined() {
                if let Some(pool) = self.pool.as_mut() {
                    pool.release_slot(slot);
                }
            }
        }
        task.state = state;
    }

    /// Forgets errors seen so far. Tasks in flight are not affected.
    pub fn reset(&mut self) {
        log::debug!("Resetting decoding context");
        self.fast_mode_error = false;
    }

    /// Nothing is queued on the accelerator side, so there is nothing to
    /// flush.
    pub fn flush(&mut self) {}
}

impl<A: BufferAllocator, T: Transport> Drop for DecodeContext<A, T> {
    fn drop(&mut self) {
        if let Some((buffer, _)) = self.rcb.take() {
            if let Err(e) = self.allocator.put(buffer) {
                log::error!("Failed to release row-context buffer: {:#}", e);
            }
        }
        if let Some(mut pool) = self.pool.take() {
            if let Err(e) = pool.release_resources(&mut self.allocator) {
                log::error!("Failed to release buffer pool: {}", e);
            }
        }
        if let Some(buffer) = self.cabac_table.take() {
            if let Err(e) = self.allocator.put(buffer) {
                log::error!("Failed to release CABAC table: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::dummy::DummyAllocator;
    use crate::backend::dummy::DummyBuffer;
    use crate::backend::dummy::DummyTransport;
    use crate::backend::rkvdec::pps::tests::get_bits;
    use crate::backend::rkvdec::pps::tests::params_1080p;
    use crate::backend::rkvdec::rcb::RcbEngine;
    use crate::codec::h265::picture::RefPicListEntry;
    use crate::codec::h265::picture::SliceParams;
    use crate::decoder::PoolMode;
    use crate::decoder::RefFrame;

    type TestContext = DecodeContext<DummyAllocator, DummyTransport>;

    const OUT_FD: u32 = 50;
    const STREAM_FD: u32 = 100;
    const STREAM_SIZE: usize = 1000;
    // CABAC table, then three buffers per slot.
    const CABAC_FD: u32 = 1;
    const SLOT0_SCALING_FD: u32 = 2;
    const SLOT0_PPS_FD: u32 = 3;
    const SLOT0_RPS_FD: u32 = 4;

    fn context(config: DecoderConfig) -> (TestContext, DummyTransport) {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport = DummyTransport::default();
        let ctx = DecodeContext::new(config, DummyAllocator::default(), transport.clone())
            .unwrap();
        (ctx, transport)
    }

    fn serial() -> DecoderConfig {
        DecoderConfig {
            pool: PoolMode::Serial,
            ..Default::default()
        }
    }

    fn task(output: FrameHandle) -> DecodeTask<DummyBuffer> {
        let mut bitstream = DummyBuffer::new(STREAM_FD, 4096);
        bitstream.map().unwrap().fill(0xff);
        DecodeTask::new(
            params_1080p(),
            vec![SliceParams::default()],
            bitstream,
            STREAM_SIZE,
            output,
        )
    }

    fn reference(fd: Option<u32>, poc: i32) -> Option<RefFrame> {
        let frame = match fd {
            Some(fd) => FrameHandle::new(fd),
            None => FrameHandle::unbacked(),
        };
        Some(RefFrame { frame, poc })
    }

    fn decode(ctx: &mut TestContext, task: &mut DecodeTask<DummyBuffer>) {
        ctx.generate_registers(task).unwrap();
        ctx.start(task).unwrap();
        ctx.wait(task).unwrap();
    }

    fn colmv(fd: u32) -> u32 {
        // 1920x1080 8-bit: 1920 * 1080 luma bytes and half as much chroma.
        packed_address(fd, 1920 * 1080 * 3 / 2)
    }

    #[test]
    fn end_to_end_1080p() {
        let (mut ctx, transport) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task);

        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(ctx.tasks_in_flight(), 0);
        assert!(!task.output.is_errored());

        let log = transport.log();
        assert_eq!(log.writes, vec![8 * 4, 64 * 4, 128 * 4, 160 * 4]);
        assert_eq!(log.submits, 1);
        assert_eq!(log.polls, 1);

        assert_eq!(log.reg(10), 1);
        assert_eq!(log.reg(11), 0x60);
        // wr_ddr_align_en, wait_reset_en and scanlist_addr_valid_en.
        assert_eq!(log.reg(12), 0x181);
        assert_eq!(log.reg(13), (1 << 17) | (1 << 14) | 1);
        assert_eq!(log.reg(16), 1008 + 64);
        assert_eq!(log.reg(17), 1);
        assert_eq!(log.reg(18), 1920 >> 4);
        assert_eq!(log.reg(19), 1920 >> 4);
        assert_eq!(log.reg(20), (1920 * 1080) >> 4);
        assert_eq!(log.reg(22), 0xffff_dfff);
        assert_eq!(log.reg(23), 0x3ffb_f9ff);

        assert_eq!(log.reg(82), 0xffff);
        assert_eq!(log.reg(128), STREAM_FD);
        assert_eq!(log.reg(129), STREAM_FD);
        assert_eq!(log.reg(130), OUT_FD);
        assert_eq!(log.reg(131), colmv(OUT_FD));
        assert_eq!(log.reg(132), OUT_FD);
        assert_eq!(log.reg(161), SLOT0_PPS_FD);
        assert_eq!(log.reg(162), SLOT0_RPS_FD);
        assert_eq!(log.reg(163), CABAC_FD);
        assert_eq!(log.reg(180), packed_address(SLOT0_SCALING_FD, 80 * 1360));

        // The parameter set holds a single tile of 30x17 CTBs, 64 times.
        let pool = ctx.pool.as_mut().unwrap();
        let pps = pool.slot_mut(0).unwrap().pps.map().unwrap();
        let record = pps[..112].to_vec();
        assert!(pps.chunks_exact(112).all(|copy| copy == record.as_slice()));
        assert_eq!(get_bits(&record, 256, 12), 29);
        assert_eq!(get_bits(&record, 256 + 20 * 12, 12), 16);
        assert_eq!(
            get_bits(&record, 760, 32),
            packed_address(SLOT0_SCALING_FD, 80 * 1360) as u64
        );
    }

    #[test]
    fn stream_padding() {
        let (mut ctx, _) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        ctx.generate_registers(&mut task).unwrap();

        let data = task.bitstream.data();
        assert!(data[..STREAM_SIZE].iter().all(|b| *b == 0xff));
        assert!(data[STREAM_SIZE..1072].iter().all(|b| *b == 0));
        assert!(data[1072..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn bitstream_buffer_too_small() {
        let (mut ctx, _) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        task.bitstream_size = 4090;

        assert!(matches!(
            ctx.generate_registers(&mut task),
            Err(BackendError::InvalidParams(_))
        ));
        assert_eq!(task.state(), TaskState::Aborted);
        assert_eq!(ctx.tasks_in_flight(), 0);
    }

    #[test]
    fn absent_references_use_output_buffer() {
        let (mut ctx, transport) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task);

        let log = transport.log();
        for i in 0..16 {
            assert_eq!(log.reg(164 + i), OUT_FD);
            assert_eq!(log.reg(181 + i), colmv(OUT_FD));
        }
        assert_eq!(log.reg(99), 0);
    }

    #[test]
    fn present_references() {
        let (mut ctx, transport) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        task.refs[0] = reference(None, 2);
        task.refs[1] = reference(Some(60), 4);
        task.refs[2] = reference(None, 8);
        task.refs[4] = reference(Some(61), -2);
        decode(&mut ctx, &mut task);

        let log = transport.log();
        // A reference without a buffer falls back to the last valid one, or
        // the output frame before any.
        assert_eq!(log.reg(164), OUT_FD);
        assert_eq!(log.reg(165), 60);
        assert_eq!(log.reg(166), 60);
        assert_eq!(log.reg(167), OUT_FD);
        assert_eq!(log.reg(168), 61);
        assert_eq!(log.reg(182), colmv(60));
        assert_eq!(log.reg(183), colmv(60));
        assert_eq!(log.reg(185), colmv(61));

        assert_eq!(log.reg(66), 2);
        assert_eq!(log.reg(67), 4);
        assert_eq!(log.reg(68), 8);
        assert_eq!(log.reg(69), 0);
        assert_eq!(log.reg(70), -2i32 as u32);
        assert_eq!(log.reg(99), 0b10111);
    }

    #[test]
    fn last_reference_has_no_valid_bit() {
        let (mut ctx, transport) = context(Default::default());
        let mut last_only = task(FrameHandle::new(OUT_FD));
        last_only.refs[15] = reference(Some(62), 6);
        decode(&mut ctx, &mut last_only);

        {
            let log = transport.log();
            assert_eq!(log.reg(179), 62);
            assert_eq!(log.reg(66 + 15), 6);
            assert_eq!(log.reg(99), 0);
        }

        let mut last_two = task(FrameHandle::new(OUT_FD + 1));
        last_two.refs[14] = reference(Some(63), 5);
        last_two.refs[15] = reference(Some(62), 6);
        decode(&mut ctx, &mut last_two);
        assert_eq!(transport.log().reg(99), 1 << 14);
    }

    #[test]
    fn slot_exhaustion() {
        let (mut ctx, _) = context(DecoderConfig {
            pool: PoolMode::Pipelined(2),
            ..Default::default()
        });

        let mut first = task(FrameHandle::new(OUT_FD));
        let mut second = task(FrameHandle::new(OUT_FD + 1));
        let mut third = task(FrameHandle::new(OUT_FD + 2));

        ctx.generate_registers(&mut first).unwrap();
        ctx.start(&mut first).unwrap();
        ctx.generate_registers(&mut second).unwrap();
        assert_eq!(first.slot(), Some(0));
        assert_eq!(second.slot(), Some(1));

        assert!(matches!(
            ctx.generate_registers(&mut third),
            Err(BackendError::OutOfResources)
        ));
        assert_eq!(third.state(), TaskState::Idle);

        ctx.wait(&mut first).unwrap();
        ctx.generate_registers(&mut third).unwrap();
        assert_eq!(third.slot(), Some(0));
        assert_eq!(ctx.tasks_in_flight(), 2);
    }

    #[test]
    fn missing_output_buffer() {
        let (mut ctx, transport) = context(Default::default());
        let mut task = task(FrameHandle::unbacked());

        assert!(matches!(
            ctx.generate_registers(&mut task),
            Err(BackendError::MissingOutputBuffer)
        ));
        assert_eq!(task.state(), TaskState::Aborted);
        assert_eq!(ctx.tasks_in_flight(), 0);

        assert!(matches!(
            ctx.start(&mut task),
            Err(BackendError::InvalidState)
        ));
        ctx.wait(&mut task).unwrap();
        assert!(task.output.is_errored());
        assert!(ctx.sticky_error());
        assert_eq!(transport.log().submits, 0);
        assert_eq!(transport.log().polls, 0);
    }

    #[test]
    fn invalid_state() {
        let (mut ctx, _) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));

        assert!(matches!(
            ctx.start(&mut task),
            Err(BackendError::InvalidState)
        ));
        assert!(matches!(ctx.wait(&mut task), Err(BackendError::InvalidState)));

        ctx.generate_registers(&mut task).unwrap();
        assert!(matches!(
            ctx.generate_registers(&mut task),
            Err(BackendError::InvalidState)
        ));
    }

    #[test]
    fn error_propagation() {
        let (mut ctx, transport) = context(Default::default());

        // A fails in hardware.
        let frame_a = FrameHandle::new(OUT_FD);
        let mut task_a = task(frame_a.clone());
        transport.set_status(224, 1 << 4);
        decode(&mut ctx, &mut task_a);
        assert!(frame_a.is_errored());
        assert!(ctx.sticky_error());
        transport.set_status(224, 1 << 2);

        // B references A and inherits its error.
        let mut task_b = task(FrameHandle::new(OUT_FD + 1));
        task_b.refs[0] = Some(RefFrame {
            frame: frame_a.clone(),
            poc: 0,
        });
        decode(&mut ctx, &mut task_b);
        assert!(task_b.output.is_errored());

        // D only references a clean frame.
        let mut task_d = task(FrameHandle::new(OUT_FD + 2));
        task_d.refs[0] = reference(Some(70), 0);
        decode(&mut ctx, &mut task_d);
        assert!(!task_d.output.is_errored());

        // After a reset, C referencing nothing errored is unaffected.
        ctx.reset();
        assert!(!ctx.sticky_error());
        let mut task_c = task(FrameHandle::new(OUT_FD + 3));
        task_c.refs[0] = Some(RefFrame {
            frame: task_d.output.clone(),
            poc: 0,
        });
        decode(&mut ctx, &mut task_c);
        assert!(!task_c.output.is_errored());
        assert!(!ctx.sticky_error());
    }

    #[test]
    fn buffer_empty_is_an_error() {
        let (mut ctx, transport) = context(Default::default());
        transport.set_status(224, (1 << 6) | (1 << 2));
        let mut task = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task);

        assert!(task.output.is_errored());
        assert_eq!(ctx.registers(0).unwrap().status.get(regs::STA_INT), 0x44);
    }

    #[test]
    fn serial_error_callback() {
        let (mut ctx, transport) = context(serial());
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);
        ctx.set_error_callback(Box::new(move |failure: &DecodeFailure| {
            sink.borrow_mut().push(failure.clone())
        }));

        transport.set_status(224, 1 << 6);
        let mut task_a = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task_a);
        // Serial mode only reports the failure.
        assert!(!task_a.output.is_errored());
        assert!(!ctx.sticky_error());
        assert_eq!(task_a.slot(), None);

        // A task flagged by the parser never reaches the accelerator.
        transport.set_status(224, 0);
        let mut task_b = task(FrameHandle::new(OUT_FD + 1));
        task_b.parse_err = true;
        decode(&mut ctx, &mut task_b);
        assert_eq!(task_b.state(), TaskState::Completed);

        let log = transport.log();
        assert_eq!(log.submits, 1);
        assert_eq!(log.polls, 1);

        let failures = failures.borrow();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].status, 1 << 6);
        assert!(!failures[0].parse_err);
        assert!(failures[1].parse_err);
        assert_eq!(failures[1].status, 0);
        assert!(failures[1].output.same_frame(&task_b.output));
    }

    #[test]
    fn upstream_error_in_pipelined_mode() {
        let (mut ctx, transport) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        task.ref_err = true;
        decode(&mut ctx, &mut task);

        assert!(task.output.is_errored());
        assert!(ctx.sticky_error());
        assert!(transport.log().writes.is_empty());
        assert_eq!(ctx.tasks_in_flight(), 0);
    }

    #[test]
    fn write_failure_aborts_task() {
        let (mut ctx, transport) = context(Default::default());
        transport.fail_on(Some("write"));
        let mut task = task(FrameHandle::new(OUT_FD));
        ctx.generate_registers(&mut task).unwrap();

        assert!(matches!(
            ctx.start(&mut task),
            Err(BackendError::Transport {
                op: "register write",
                ..
            })
        ));
        assert_eq!(task.state(), TaskState::Aborted);
        assert_eq!(ctx.tasks_in_flight(), 0);
        assert_eq!(transport.log().submits, 0);

        ctx.wait(&mut task).unwrap();
        assert!(task.output.is_errored());
    }

    #[test]
    fn poll_failure_releases_slot() {
        let (mut ctx, transport) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        ctx.generate_registers(&mut task).unwrap();
        ctx.start(&mut task).unwrap();

        transport.fail_on(Some("poll"));
        assert!(matches!(
            ctx.wait(&mut task),
            Err(BackendError::Transport { op: "poll", .. })
        ));
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(ctx.tasks_in_flight(), 0);
        assert!(task.output.is_errored());
    }

    #[test]
    fn scaling_list_record() {
        let (mut ctx, transport) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        task.params.sps.scaling_list_enabled_flag = true;
        task.params.sps.seq_parameter_set_id = 2;
        task.params.scaling_lists.scaling_list_4x4[0] = [20; 16];
        decode(&mut ctx, &mut task);

        let expected = scaling_factors(&task.params.scaling_lists);
        assert_eq!(
            transport.log().reg(180),
            packed_address(SLOT0_SCALING_FD, 2 * 1360)
        );

        let pool = ctx.pool.as_mut().unwrap();
        let scaling = pool.slot_mut(0).unwrap().scaling_list.map().unwrap();
        assert_eq!(&scaling[2 * 1360..3 * 1360], &expected[..]);
        assert!(scaling[..2 * 1360].iter().all(|b| *b == 0));
        assert!(scaling[80 * 1360..].iter().all(|b| *b == 0));
    }

    #[test]
    fn scaling_list_disabled_writes_nothing() {
        let (mut ctx, _) = context(Default::default());
        let mut task = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task);

        let pool = ctx.pool.as_mut().unwrap();
        let scaling = pool.slot_mut(0).unwrap().scaling_list.map().unwrap();
        assert!(scaling.iter().all(|b| *b == 0));
        assert!(ctx.scaling_cache.is_none());
    }

    #[test]
    fn software_rps() {
        let (mut ctx, transport) = context(DecoderConfig {
            rps_mode: RpsMode::Software,
            ..Default::default()
        });
        let mut task = task(FrameHandle::new(OUT_FD));
        task.refs[5] = reference(Some(60), 3);
        task.slices[0].ref_pic_lists[0] = vec![RefPicListEntry {
            pic_order_cnt_val: 3,
            long_term: false,
        }];
        decode(&mut ctx, &mut task);

        let log = transport.log();
        assert_eq!(log.reg(65), 1 << 1);
        // No wait_reset_en, no layer bitmap.
        assert_eq!(log.reg(12), 0x101);
        assert_eq!(log.reg(82), 0);

        let pool = ctx.pool.as_mut().unwrap();
        let rps = pool.slot_mut(0).unwrap().rps.map().unwrap();
        assert_eq!(get_bits(rps, 24, 5), 5 << 1);
    }

    #[test]
    fn legacy_generation() {
        let (mut ctx, transport) = context(DecoderConfig {
            generation: HwGeneration::Legacy,
            rps_mode: RpsMode::Software,
            pool: PoolMode::Serial,
        });
        let mut task = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task);

        let log = transport.log();
        assert_eq!(log.reg(12), 1);
        assert_eq!(log.reg(65), 0);
        assert_eq!(log.reg(180), 0);

        let pool = ctx.pool.as_mut().unwrap();
        let pps = pool.slot_mut(0).unwrap().pps.map().unwrap();
        assert_eq!(pps.len(), 80 * 64);
        let record = pps[..80].to_vec();
        assert!(pps.chunks_exact(80).all(|copy| copy == record.as_slice()));
        assert_eq!(get_bits(&record, 256, 12), 29);
    }

    #[test]
    fn rcb_offsets() {
        let (mut ctx, transport) = context(Default::default());
        let mut first = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut first);

        // Allocated after the CABAC table and the three slots.
        let rcb_fd = 11;
        let layout = RcbLayout::new(1920, 1080);
        {
            let log = transport.log();
            assert_eq!(log.reg(133), rcb_fd);
            for (i, engine) in RcbEngine::ALL.iter().enumerate() {
                assert_eq!(
                    log.reg(133 + i as u32),
                    packed_address(rcb_fd, layout.offset(*engine))
                );
            }
        }

        // A smaller picture reuses the buffer with its own offsets.
        let mut smaller = task(FrameHandle::new(OUT_FD));
        smaller.params.sps.pic_width_in_min_cbs_y = 160;
        smaller.params.sps.pic_height_in_min_cbs_y = 90;
        decode(&mut ctx, &mut smaller);
        let layout = RcbLayout::new(1280, 720);
        assert_eq!(
            transport.log().reg(142),
            packed_address(rcb_fd, layout.offset(RcbEngine::FilterCol))
        );

        // A bigger one cannot be decoded.
        let mut bigger = task(FrameHandle::new(OUT_FD));
        bigger.params.sps.pic_width_in_min_cbs_y = 480;
        assert!(matches!(
            ctx.generate_registers(&mut bigger),
            Err(BackendError::InvalidParams(_))
        ));
        assert_eq!(ctx.tasks_in_flight(), 0);
    }

    #[test]
    fn deterministic_registers() {
        let (mut ctx, _) = context(serial());
        let mut first = task(FrameHandle::new(OUT_FD));
        ctx.generate_registers(&mut first).unwrap();
        let regs = ctx.registers(0).unwrap().clone();
        ctx.start(&mut first).unwrap();
        ctx.wait(&mut first).unwrap();

        let mut second = task(FrameHandle::new(OUT_FD));
        ctx.generate_registers(&mut second).unwrap();
        assert_eq!(ctx.registers(0).unwrap(), &regs);
    }

    #[test]
    fn resources_are_returned() {
        let allocator = DummyAllocator::default();
        let live = allocator.live_set();
        let mut ctx =
            DecodeContext::new(DecoderConfig::default(), allocator, DummyTransport::default())
                .unwrap();
        let mut task = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task);
        assert_eq!(live.borrow().len(), 11);

        drop(ctx);
        assert!(live.borrow().is_empty());
    }

    #[test]
    fn supplied_cabac_table() {
        let table: Vec<u8> = (0..27456u32).map(|i| (i % 251) as u8).collect();
        let transport = DummyTransport::default();
        let mut ctx = DecodeContext::with_cabac_table(
            DecoderConfig::default(),
            DummyAllocator::default(),
            transport.clone(),
            &table,
        )
        .unwrap();
        assert_eq!(ctx.cabac_table.as_ref().unwrap().data(), table.as_slice());

        let mut task = task(FrameHandle::new(OUT_FD));
        decode(&mut ctx, &mut task);
        assert_eq!(transport.log().reg(163), 1);

        let allocator = DummyAllocator::default();
        let live = allocator.live_set();
        assert!(matches!(
            DecodeContext::with_cabac_table(
                DecoderConfig::default(),
                allocator,
                DummyTransport::default(),
                &[],
            ),
            Err(BackendError::InvalidParams(_))
        ));
        assert!(live.borrow().is_empty());
    }

    #[test]
    fn failed_creation() {
        let allocator = DummyAllocator::default().fail_after(4);
        let live = allocator.live_set();
        assert!(matches!(
            DecodeContext::new(DecoderConfig::default(), allocator, DummyTransport::default()),
            Err(BackendError::OutOfResources)
        ));
        assert!(live.borrow().is_empty());

        let allocator = DummyAllocator::default().unmappable();
        let live = allocator.live_set();
        assert!(matches!(
            DecodeContext::new(DecoderConfig::default(), allocator, DummyTransport::default()),
            Err(BackendError::Unmapped("CABAC table"))
        ));
        assert!(live.borrow().is_empty());

        let config = DecoderConfig {
            generation: HwGeneration::Legacy,
            ..Default::default()
        };
        assert!(matches!(
            DecodeContext::new(config, DummyAllocator::default(), DummyTransport::default()),
            Err(BackendError::InvalidParams(_))
        ));
    }
}
