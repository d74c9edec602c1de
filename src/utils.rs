// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility functions used by several parts of this crate.

#[cfg(feature = "mpp-service")]
use nix::errno::Errno;

/// Rounds `value` up to the next multiple of `alignment`, which must be a
/// power of two.
pub fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Calls `cb` until it fails with something other than `EINTR`.
#[cfg(feature = "mpp-service")]
pub fn handle_eintr<T>(cb: &mut impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match cb() {
            Err(Errno::EINTR) => continue,
            ret => return ret,
        }
    }
}
