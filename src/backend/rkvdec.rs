// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Rockchip rkvdec HEVC accelerators.
//!
//! Two generations are supported. Both consume the same logical parameter
//! set, but the legacy one packs it into a shorter record and can only take a
//! reference picture set computed in software. The register image modelled in
//! [`regs`] is the vdpu34x one.

pub mod pool;
pub mod pps;
pub mod rcb;
pub mod regs;
pub mod rps;

use crate::codec::h265::scaling_list::SCALING_FACTOR_SIZE;
use crate::codec::h265::scaling_list::SCALING_LIST_SLOTS;

/// Number of copies of the parameter-set record the accelerator expects.
pub const PPS_RECORD_COPIES: usize = 64;
/// Maximum number of slices of a picture.
pub const MAX_SLICES: usize = 600;
/// Size of one per-slice record of the software reference picture set.
pub const RPS_RECORD_SIZE: usize = 32;
/// Size of the reference picture set buffer.
pub const RPS_SIZE: usize = MAX_SLICES * RPS_RECORD_SIZE;
/// Size of the scaling list buffer, one record per slot.
pub const SCALING_LIST_SIZE: usize = SCALING_LIST_SLOTS * SCALING_FACTOR_SIZE;
/// Number of slots of the pipelined buffer pool unless configured otherwise.
pub const DEFAULT_POOL_SIZE: usize = 3;

/// Hardware generation, which selects the parameter-set layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HwGeneration {
    /// rkvdec before vdpu34x: 10-word parameter-set records.
    Legacy,
    /// vdpu34x: 14-word parameter-set records and hardware RPS derivation.
    #[default]
    Vdpu34x,
}

impl HwGeneration {
    /// Size in bytes of one parameter-set record.
    pub const fn pps_record_size(self) -> usize {
        match self {
            HwGeneration::Legacy => 80,
            HwGeneration::Vdpu34x => 112,
        }
    }

    /// Size of the parameter-set buffer holding every copy of the record.
    pub const fn pps_size(self) -> usize {
        self.pps_record_size() * PPS_RECORD_COPIES
    }
}

/// Who derives the reference picture set of each slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RpsMode {
    /// The host writes one record per slice from the parsed slice headers.
    Software,
    /// The host writes the SPS candidate sets and the accelerator derives the
    /// set of each slice while parsing it.
    #[default]
    Hardware,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes() {
        assert_eq!(HwGeneration::Vdpu34x.pps_size(), 112 * 64);
        assert_eq!(HwGeneration::Legacy.pps_size(), 80 * 64);
        assert_eq!(RPS_SIZE, 19200);
        assert_eq!(SCALING_LIST_SIZE, 81 * 1360);
    }
}
