// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware offload of HEVC picture decoding for Rockchip rkvdec
//! accelerators.
//!
//! The surrounding decoder parses the bitstream and manages the decoded
//! picture buffer. For every picture it hands a [`decoder::DecodeTask`] to a
//! [`decoder::h265::DecodeContext`], which packs the parameter sets, scaling
//! lists and reference picture sets in the layouts the accelerator expects,
//! fills its registers and runs it through a [`device::Transport`].
//!
//! Buffers shared with the accelerator come from a
//! [`buffer::BufferAllocator`]. With the `mpp-service` feature, the crate
//! provides a dma-heap allocator and a transport over the kernel MPP service.

pub mod backend;
pub mod bitstream_utils;
pub mod buffer;
pub mod codec;
pub mod decoder;
pub mod device;
pub mod platform;
pub mod utils;
pub mod video_frame;
