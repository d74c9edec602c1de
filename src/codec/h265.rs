// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.265 syntax elements and tables consumed by the accelerator.

pub mod cabac;
pub mod picture;
pub mod scaling_list;
