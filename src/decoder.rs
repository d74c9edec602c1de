// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoding contexts and the tasks they process.
//!
//! A task goes through [`TaskState::Idle`] → [`TaskState::RegistersGenerated`]
//! → [`TaskState::Submitted`] → [`TaskState::Completed`], driven by the
//! `generate_registers`, `start` and `wait` methods of its context. A task
//! whose preparation or submission fails ends up [`TaskState::Aborted`]
//! instead, and `wait` then only runs the error handling.

pub mod h265;

use thiserror::Error;

use crate::backend::rkvdec::HwGeneration;
use crate::backend::rkvdec::RpsMode;
use crate::backend::rkvdec::DEFAULT_POOL_SIZE;
use crate::bitstream_utils::BitPutError;
use crate::codec::h265::picture::PicParams;
use crate::codec::h265::picture::SliceParams;
use crate::video_frame::FrameHandle;

/// Number of entries of the reference frame list of a task.
pub const NUM_REF_FRAMES: usize = 16;

/// Error returned by decoding context methods.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("not enough resources to proceed with the operation now")]
    OutOfResources,
    #[error("cannot map the {0} buffer")]
    Unmapped(&'static str),
    #[error("output frame has no backing buffer")]
    MissingOutputBuffer,
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("operation not allowed in the current task state")]
    InvalidState,
    #[error("failed to pack record: {0}")]
    BitPut(#[from] BitPutError),
    #[error("transport {op} failed")]
    Transport {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// How many tasks may be in flight at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolMode {
    /// One task at a time, using a single set of buffers. Errors are
    /// reported through the context's error callback.
    Serial,
    /// Up to the given number of tasks in flight, each with its own buffers.
    /// Errors mark the output frame and propagate to frames referencing it.
    Pipelined(usize),
}

/// Configuration of a decoding context, fixed for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    pub generation: HwGeneration,
    pub rps_mode: RpsMode,
    pub pool: PoolMode,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            generation: HwGeneration::Vdpu34x,
            rps_mode: RpsMode::Hardware,
            pool: PoolMode::Pipelined(DEFAULT_POOL_SIZE),
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> BackendResult<()> {
        if self.generation == HwGeneration::Legacy && self.rps_mode == RpsMode::Hardware {
            return Err(BackendError::InvalidParams(
                "legacy accelerators cannot derive the reference picture set".into(),
            ));
        }
        if self.pool == PoolMode::Pipelined(0) {
            return Err(BackendError::InvalidParams(
                "a pipelined pool needs at least one slot".into(),
            ));
        }

        Ok(())
    }

    pub fn pipelined(&self) -> bool {
        matches!(self.pool, PoolMode::Pipelined(_))
    }

    /// Number of buffer slots to allocate.
    pub fn slot_count(&self) -> usize {
        match self.pool {
            PoolMode::Serial => 1,
            PoolMode::Pipelined(count) => count,
        }
    }
}

/// A reference frame of a task and its picture order count.
#[derive(Clone, Debug)]
pub struct RefFrame {
    pub frame: FrameHandle,
    pub poc: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    RegistersGenerated,
    Submitted,
    Completed,
    Aborted,
}

/// One picture to decode.
pub struct DecodeTask<S> {
    pub params: PicParams,
    pub slices: Vec<SliceParams>,
    /// Reference frames by DPB index, `None` where no frame is present.
    pub refs: [Option<RefFrame>; NUM_REF_FRAMES],
    /// Buffer holding the slice data. It must have room for the padding
    /// added after `bitstream_size` bytes.
    pub bitstream: S,
    pub bitstream_size: usize,
    pub output: FrameHandle,
    /// Set by the parser when the slice data could not be parsed.
    pub parse_err: bool,
    /// Set by the parser when a reference frame is missing.
    pub ref_err: bool,
    state: TaskState,
    slot: Option<usize>,
}

impl<S> DecodeTask<S> {
    pub fn new(
        params: PicParams,
        slices: Vec<SliceParams>,
        bitstream: S,
        bitstream_size: usize,
        output: FrameHandle,
    ) -> Self {
        Self {
            params,
            slices,
            refs: Default::default(),
            bitstream,
            bitstream_size,
            output,
            parse_err: false,
            ref_err: false,
            state: TaskState::Idle,
            slot: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Buffer slot used by the task while it is in flight.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Whether an upstream stage flagged the task, in which case the
    /// accelerator is never involved.
    pub fn has_upstream_error(&self) -> bool {
        self.parse_err || self.ref_err
    }

    /// POCs of the reference frames by DPB index.
    pub fn ref_pocs(&self) -> [Option<i32>; NUM_REF_FRAMES] {
        std::array::from_fn(|i| self.refs[i].as_ref().map(|r| r.poc))
    }
}
