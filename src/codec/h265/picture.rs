// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsed H.265 syntax as handed over by the bitstream parser.
//!
//! Field names follow the syntax element names of the H.265 specification.
//! Nothing in this crate parses raw bitstream; these structures are the
//! interface to whichever parser sits upstream.

/// Maximum number of short-term reference picture set candidates in an SPS.
pub const MAX_SHORT_TERM_REF_PIC_SETS: usize = 64;
/// Maximum number of long-term reference pictures signalled in an SPS.
pub const MAX_LONG_TERM_REF_PICS_SPS: usize = 32;
/// Maximum number of entries of one short-term reference picture set.
pub const MAX_DELTA_POCS: usize = 16;
/// Maximum number of tile columns the accelerator supports.
pub const MAX_TILE_COLUMNS: usize = 20;
/// Maximum number of tile rows the accelerator supports.
pub const MAX_TILE_ROWS: usize = 22;
/// Maximum number of entries in a slice reference picture list.
pub const MAX_REF_LIST_ENTRIES: usize = 15;

/// One candidate short-term reference picture set, with inter RPS prediction
/// already resolved by the parser.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShortTermRefPicSet {
    pub num_negative_pics: u8,
    pub num_positive_pics: u8,
    /// Same as DeltaPocS0 in the H.265 specification.
    pub delta_poc_s0: [i32; MAX_DELTA_POCS],
    /// Same as UsedByCurrPicS0 in the H.265 specification.
    pub used_by_curr_pic_s0: [bool; MAX_DELTA_POCS],
    /// Same as DeltaPocS1 in the H.265 specification.
    pub delta_poc_s1: [i32; MAX_DELTA_POCS],
    /// Same as UsedByCurrPicS1 in the H.265 specification.
    pub used_by_curr_pic_s1: [bool; MAX_DELTA_POCS],
}

impl ShortTermRefPicSet {
    /// Same as NumDeltaPocs in the H.265 specification.
    pub fn num_delta_pocs(&self) -> usize {
        self.num_negative_pics as usize + self.num_positive_pics as usize
    }
}

/// A long-term reference picture candidate from the SPS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LongTermRefPic {
    pub lt_ref_pic_poc_lsb_sps: u16,
    pub used_by_curr_pic_lt_sps_flag: bool,
}

/// The sequence-level fields the accelerator needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sps {
    pub video_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub chroma_format_idc: u8,
    /// Same as PicWidthInMinCbsY in the H.265 specification.
    pub pic_width_in_min_cbs_y: u16,
    /// Same as PicHeightInMinCbsY in the H.265 specification.
    pub pic_height_in_min_cbs_y: u16,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub sps_max_dec_pic_buffering_minus1: u8,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_luma_transform_block_size_minus2: u8,
    pub log2_diff_max_min_luma_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub scaling_list_enabled_flag: bool,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub pcm_loop_filter_disabled_flag: bool,
    /// The `num_short_term_ref_pic_sets` candidates, at most
    /// [`MAX_SHORT_TERM_REF_PIC_SETS`].
    pub short_term_ref_pic_sets: Vec<ShortTermRefPicSet>,
    pub long_term_ref_pics_present_flag: bool,
    /// The `num_long_term_ref_pics_sps` candidates, at most
    /// [`MAX_LONG_TERM_REF_PICS_SPS`].
    pub long_term_ref_pics: Vec<LongTermRefPic>,
    pub sps_temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
}

impl Sps {
    /// Same as MinCbLog2SizeY in the H.265 specification.
    pub fn min_cb_log2_size_y(&self) -> u32 {
        self.log2_min_luma_coding_block_size_minus3 as u32 + 3
    }

    /// Same as CtbLog2SizeY in the H.265 specification.
    pub fn ctb_log2_size_y(&self) -> u32 {
        self.min_cb_log2_size_y() + self.log2_diff_max_min_luma_coding_block_size as u32
    }

    /// Coded width in luma samples.
    pub fn width(&self) -> u32 {
        (self.pic_width_in_min_cbs_y as u32) << self.min_cb_log2_size_y()
    }

    /// Coded height in luma samples.
    pub fn height(&self) -> u32 {
        (self.pic_height_in_min_cbs_y as u32) << self.min_cb_log2_size_y()
    }

    pub fn bit_depth_luma(&self) -> u32 {
        self.bit_depth_luma_minus8 as u32 + 8
    }

    pub fn bit_depth_chroma(&self) -> u32 {
        self.bit_depth_chroma_minus8 as u32 + 8
    }
}

/// The picture-level fields the accelerator needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub init_qp_minus26: i8,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub pps_slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub uniform_spacing_flag: bool,
    /// column_width_minus1[ i ] plus 1 is the width of the i-th tile column
    /// in coding tree blocks. The last column is implicit.
    pub column_width_minus1: [u32; MAX_TILE_COLUMNS - 1],
    /// row_height_minus1[ i ] plus 1 is the height of the i-th tile row in
    /// coding tree blocks. The last row is implicit.
    pub row_height_minus1: [u32; MAX_TILE_ROWS - 1],
    pub loop_filter_across_tiles_enabled_flag: bool,
    pub pps_loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_override_enabled_flag: bool,
    pub pps_deblocking_filter_disabled_flag: bool,
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
    pub pps_scaling_list_data_present_flag: bool,
    pub lists_modification_present_flag: bool,
    pub log2_parallel_merge_level_minus2: u8,
    pub slice_segment_header_extension_present_flag: bool,
}

/// Scaling lists in coded (up-right diagonal) order, as parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalingLists {
    /// plus 8 specifies ScalingFactor[ 2 ][ matrixId ][ 0 ][ 0 ].
    pub scaling_list_dc_coef_minus8_16x16: [i16; 6],
    /// plus 8 specifies ScalingFactor[ 3 ][ matrixId ][ 0 ][ 0 ], for
    /// matrixId 0 and 3.
    pub scaling_list_dc_coef_minus8_32x32: [i16; 2],
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    pub scaling_list_32x32: [[u8; 64]; 2],
}

impl Default for ScalingLists {
    /// Flat lists, as used when `scaling_list_enabled_flag` is unset.
    fn default() -> Self {
        Self {
            scaling_list_dc_coef_minus8_16x16: [8; 6],
            scaling_list_dc_coef_minus8_32x32: [8; 2],
            scaling_list_4x4: [[16; 16]; 6],
            scaling_list_8x8: [[16; 64]; 6],
            scaling_list_16x16: [[16; 64]; 6],
            scaling_list_32x32: [[16; 64]; 2],
        }
    }
}

/// Everything the accelerator needs to know about the picture being decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicParams {
    pub sps: Sps,
    pub pps: Pps,
    /// Same as PicOrderCntVal in the H.265 specification.
    pub curr_pic_order_cnt_val: i32,
    /// Same as IdrPicFlag in the H.265 specification.
    pub idr_pic_flag: bool,
    /// The scaling lists in effect for this picture, either from the PPS or
    /// inherited from the SPS.
    pub scaling_lists: ScalingLists,
}

/// An entry of RefPicList0 or RefPicList1 of a slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefPicListEntry {
    pub pic_order_cnt_val: i32,
    pub long_term: bool,
}

/// Per-slice data consumed when the reference picture set is computed in
/// software.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceParams {
    /// Same as NoBackwardPredFlag in the H.265 specification.
    pub low_delay: bool,
    /// Number of slice header bits spent on short-term and long-term
    /// reference picture signalling.
    pub rps_bits: u16,
    /// Number of slice header bits spent on short_term_ref_pic_set().
    pub st_rps_bits: u16,
    /// Same as NumPicTotalCurr in the H.265 specification.
    pub num_pic_total_curr: u8,
    /// RefPicList0 and RefPicList1, at most [`MAX_REF_LIST_ENTRIES`] each.
    pub ref_pic_lists: [Vec<RefPicListEntry>; 2],
}
