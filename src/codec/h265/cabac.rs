// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! CABAC context initialization table.
//!
//! The accelerator does not evaluate the context initialization process of
//! 9.3.2.2 itself: it reads the initial state of every context variable from
//! a table uploaded once per context. The table built here is laid out as
//! `[init_type][SliceQpY][context]`, one byte per context holding
//! `pStateIdx << 1 | valMps`, with contexts in syntax element order.
//!
//! This layout and its size have not been checked against the table the
//! vendor driver uploads, which is larger. Callers holding the vendor table
//! should pass it to [`DecodeContext::with_cabac_table`] instead.
//!
//! [`DecodeContext::with_cabac_table`]: crate::decoder::h265::DecodeContext::with_cabac_table

/// initValue of every context variable, for initType 0, 1 and 2, in syntax
/// element order.
const INIT_VALUES: &[[&[u8]; 3]] = &[
    // sao_merge_left_flag, sao_merge_up_flag
    [&[153], &[153], &[153]],
    // sao_type_idx_luma, sao_type_idx_chroma
    [&[200], &[185], &[160]],
    // split_cu_flag
    [&[139, 141, 157], &[107, 139, 126], &[107, 139, 126]],
    // cu_transquant_bypass_flag
    [&[154], &[154], &[154]],
    // cu_skip_flag
    [&[154, 154, 154], &[197, 185, 201], &[197, 185, 201]],
    // cu_qp_delta_abs
    [&[154, 154, 154], &[154, 154, 154], &[154, 154, 154]],
    // pred_mode_flag
    [&[154], &[149], &[134]],
    // part_mode
    [
        &[184, 154, 154, 154],
        &[154, 139, 154, 154],
        &[154, 139, 154, 154],
    ],
    // prev_intra_luma_pred_flag
    [&[184], &[154], &[183]],
    // intra_chroma_pred_mode
    [&[63, 139], &[152, 139], &[152, 139]],
    // merge_flag
    [&[154], &[110], &[154]],
    // merge_idx
    [&[154], &[122], &[137]],
    // inter_pred_idc
    [
        &[154, 154, 154, 154, 154],
        &[95, 79, 63, 31, 31],
        &[95, 79, 63, 31, 31],
    ],
    // ref_idx_l0, ref_idx_l1
    [&[154, 154], &[153, 153], &[153, 153]],
    // mvp_l0_flag, mvp_l1_flag
    [&[154], &[168], &[168]],
    // rqt_root_cbf
    [&[154], &[79], &[79]],
    // split_transform_flag
    [&[153, 138, 138], &[124, 138, 94], &[224, 167, 122]],
    // cbf_luma
    [&[111, 141], &[153, 111], &[153, 111]],
    // cbf_cb, cbf_cr
    [
        &[94, 138, 182, 154],
        &[149, 107, 167, 154],
        &[149, 92, 167, 154],
    ],
    // transform_skip_flag
    [&[139, 139], &[139, 139], &[139, 139]],
    // last_sig_coeff_x_prefix
    [
        &[
            110, 110, 124, 125, 140, 153, 125, 127, 140, 109, 111, 143, 127, 111, 79, 108, 123, 63,
        ],
        &[
            125, 110, 94, 110, 95, 79, 125, 111, 110, 78, 110, 111, 111, 95, 94, 108, 123, 108,
        ],
        &[
            125, 110, 124, 110, 95, 94, 125, 111, 111, 79, 125, 126, 111, 111, 79, 108, 123, 93,
        ],
    ],
    // last_sig_coeff_y_prefix
    [
        &[
            110, 110, 124, 125, 140, 153, 125, 127, 140, 109, 111, 143, 127, 111, 79, 108, 123, 63,
        ],
        &[
            125, 110, 94, 110, 95, 79, 125, 111, 110, 78, 110, 111, 111, 95, 94, 108, 123, 108,
        ],
        &[
            125, 110, 124, 110, 95, 94, 125, 111, 111, 79, 125, 126, 111, 111, 79, 108, 123, 93,
        ],
    ],
    // coded_sub_block_flag
    [&[91, 171, 134, 141], &[121, 140, 61, 154], &[121, 140, 61, 154]],
    // sig_coeff_flag
    [
        &[
            111, 111, 125, 110, 110, 94, 124, 108, 124, 107, 125, 141, 179, 153, 125, 107, 125,
            141, 179, 153, 125, 107, 125, 141, 179, 153, 125, 140, 139, 182, 182, 152, 136, 152,
            136, 153, 136, 139, 111, 136, 139, 111,
        ],
        &[
            155, 154, 139, 153, 139, 123, 123, 63, 153, 166, 183, 140, 136, 153, 154, 166, 183,
            140, 136, 153, 154, 166, 183, 140, 136, 153, 154, 170, 153, 123, 123, 107, 121, 107,
            121, 167, 151, 183, 140, 151, 183, 140,
        ],
        &[
            170, 154, 139, 153, 139, 123, 123, 63, 124, 166, 183, 140, 136, 153, 154, 166, 183,
            140, 136, 153, 154, 166, 183, 140, 136, 153, 154, 170, 153, 138, 138, 122, 121, 122,
            121, 167, 151, 183, 140, 151, 183, 140,
        ],
    ],
    // coeff_abs_level_greater1_flag
    [
        &[
            140, 92, 137, 138, 140, 152, 138, 139, 153, 74, 149, 92, 139, 107, 122, 152, 140, 179,
            166, 182, 140, 227, 122, 197,
        ],
        &[
            154, 196, 196, 167, 154, 152, 167, 182, 182, 134, 149, 136, 153, 121, 136, 137, 169,
            194, 166, 167, 154, 167, 137, 182,
        ],
        &[
            154, 196, 167, 167, 154, 152, 167, 182, 182, 134, 149, 136, 153, 121, 136, 122, 169,
            208, 166, 167, 154, 152, 167, 182,
        ],
    ],
    // coeff_abs_level_greater2_flag
    [
        &[138, 153, 136, 167, 152, 152],
        &[107, 167, 91, 122, 107, 167],
        &[107, 167, 91, 107, 107, 167],
    ],
];

/// Number of context variables per (initType, SliceQpY) row.
pub const NUM_CONTEXTS: usize = 154;
/// Number of SliceQpY values covered by the table.
pub const NUM_QPS: usize = 52;
/// Size in bytes of the whole table.
pub const CABAC_TABLE_SIZE: usize = 3 * NUM_QPS * NUM_CONTEXTS;

/// Initial state of one context variable for `qp`, see 9.3.2.2.
fn context_state(init_value: u8, qp: i32) -> u8 {
    let slope_idx = (init_value >> 4) as i32;
    let offset_idx = (init_value & 15) as i32;
    let m = slope_idx * 5 - 45;
    let n = (offset_idx << 3) - 16;
    let pre_ctx_state = (((m * qp.clamp(0, 51)) >> 4) + n).clamp(1, 126);
    let val_mps = pre_ctx_state > 63;
    let state = if val_mps {
        pre_ctx_state - 64
    } else {
        63 - pre_ctx_state
    };

    ((state as u8) << 1) | val_mps as u8
}

/// Builds the table uploaded once per decoding context.
pub fn cabac_table() -> Vec<u8> {
    let mut table = Vec::with_capacity(CABAC_TABLE_SIZE);
    for init_type in 0..3 {
        for qp in 0..NUM_QPS as i32 {
            for group in INIT_VALUES {
                table.extend(group[init_type].iter().map(|v| context_state(*v, qp)));
            }
        }
    }

    table
}
