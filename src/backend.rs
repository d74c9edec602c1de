// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Accelerator-specific code.
//!
//! A backend knows the binary formats and register layout of one family of
//! accelerators. The decoding context in [`crate::decoder`] drives it through
//! the [`crate::buffer`] and [`crate::device`] abstractions.

#[cfg(test)]
pub(crate) mod dummy;
pub mod rkvdec;
