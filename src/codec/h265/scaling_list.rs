// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Conversion of parsed scaling lists into the scaling factor record read by
//! the rkvdec family of accelerators.
//!
//! A record is [`SCALING_FACTOR_SIZE`] bytes:
//!
//! * 1248 bytes of raster-order factors: six 4x4 lists, six 8x8 lists, six
//!   16x16 representative 8x8 lists, then two 32x32 representative 8x8 lists
//!   each followed by 128 zero bytes;
//! * 96 bytes holding the six 4x4 lists again, transposed;
//! * 12 bytes of DC coefficients: the six 16x16 ones, then each 32x32 one
//!   followed by two zero bytes;
//! * 4 reserved bytes keeping records 16-byte aligned.

use crate::codec::h265::picture::ScalingLists;

pub const SCALING_FACTOR_SIZE: usize = 1360;

const FACTOR0_SIZE: usize = 1248;
const FACTOR1_SIZE: usize = 96;
const DC_SIZE: usize = 12;

// See 6.5.3
const fn up_right_diagonal<const N: usize, const ROWS: usize>() -> [usize; N] {
    // Generics can't be used in const operations for now, so [0; ROWS * ROWS]
    // is rejected by the compiler
    assert!(ROWS * ROWS == N);

    let mut i = 0;
    let mut x = 0i32;
    let mut y = 0i32;
    let mut ret = [0; N];

    loop {
        while y >= 0 {
            if x < (ROWS as i32) && y < (ROWS as i32) {
                ret[i] = (x + ROWS as i32 * y) as usize;
                i += 1;
            }
            y -= 1;
            x += 1;
        }

        y = x;
        x = 0;
        if i >= N {
            break;
        }
    }

    ret
}

const UP_RIGHT_DIAGONAL_4X4: [usize; 16] = up_right_diagonal::<16, 4>();
const UP_RIGHT_DIAGONAL_8X8: [usize; 64] = up_right_diagonal::<64, 8>();

fn raster_4x4(coded: &[u8; 16]) -> [u8; 16] {
    let mut raster = [0u8; 16];
    for (i, value) in coded.iter().enumerate() {
        raster[UP_RIGHT_DIAGONAL_4X4[i]] = *value;
    }
    raster
}

fn raster_8x8(coded: &[u8; 64]) -> [u8; 64] {
    let mut raster = [0u8; 64];
    for (i, value) in coded.iter().enumerate() {
        raster[UP_RIGHT_DIAGONAL_8X8[i]] = *value;
    }
    raster
}

fn dc_coefficient(minus8: i16) -> u8 {
    (minus8 + 8).clamp(0, 255) as u8
}

/// Builds the accelerator record for `lists`.
pub fn scaling_factors(lists: &ScalingLists) -> [u8; SCALING_FACTOR_SIZE] {
    let mut out = [0u8; SCALING_FACTOR_SIZE];
    let (factor0, rest) = out.split_at_mut(FACTOR0_SIZE);
    let (factor1, rest) = rest.split_at_mut(FACTOR1_SIZE);
    let (dc, _reserved) = rest.split_at_mut(DC_SIZE);

    let mut pos = 0;
    for list in &lists.scaling_list_4x4 {
        factor0[pos..pos + 16].copy_from_slice(&raster_4x4(list));
        pos += 16;
    }
    for list in lists
        .scaling_list_8x8
        .iter()
        .chain(lists.scaling_list_16x16.iter())
    {
        factor0[pos..pos + 64].copy_from_slice(&raster_8x8(list));
        pos += 64;
    }
    for list in &lists.scaling_list_32x32 {
        factor0[pos..pos + 64].copy_from_slice(&raster_8x8(list));
        // The 32x32 entries are padded to 192 bytes.
        pos += 64 + 128;
    }
    debug_assert_eq!(pos, FACTOR0_SIZE);

    for (list_idx, list) in lists.scaling_list_4x4.iter().enumerate() {
        let raster = raster_4x4(list);
        let rotated = &mut factor1[list_idx * 16..(list_idx + 1) * 16];
        for i in 0..4 {
            for j in 0..4 {
                rotated[i * 4 + j] = raster[i + j * 4];
            }
        }
    }

    for (i, minus8) in lists.scaling_list_dc_coef_minus8_16x16.iter().enumerate() {
        dc[i] = dc_coefficient(*minus8);
    }
    for (i, minus8) in lists.scaling_list_dc_coef_minus8_32x32.iter().enumerate() {
        dc[6 + i * 3] = dc_coefficient(*minus8);
    }

    out
}

/// Index of the record slot used for a picture.
///
/// Explicit PPS lists live at `pps_id + 16`, SPS lists at `sps_id`, and
/// pictures without scaling lists point at the spare slot 80.
pub fn scaling_list_slot(
    scaling_list_enabled: bool,
    pps_data_present: bool,
    sps_id: u8,
    pps_id: u8,
) -> usize {
    if pps_data_present {
        pps_id as usize + 16
    } else if scaling_list_enabled {
        sps_id as usize
    } else {
        80
    }
}

/// Number of record slots in the scaling list table.
pub const SCALING_LIST_SLOTS: usize = 81;
