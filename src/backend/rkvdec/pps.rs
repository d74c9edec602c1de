// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameter-set records.
//!
//! One record carries the SPS and PPS fields of the current picture, its tile
//! geometry and the address of its scaling list record, packed LSB first into
//! 64-bit words:
//!
//! | part    | legacy                       | vdpu34x                          |
//! |---------|------------------------------|----------------------------------|
//! | SPS     | 113 bits, aligned to 32      | 120 bits, aligned to 32          |
//! | PPS     | 96 bits, aligned to 64       | 98 bits, aligned to 64           |
//! | tiles   | 20 + 22 sizes of 12 bits     | 20 + 22 sizes of 12 bits         |
//! | scaling | 32-bit address, aligned to 64| 32-bit address, 70 zero bits, aligned to 64 |
//!
//! The vdpu34x record is 14 words. The legacy fields run to 13 words but the
//! record is cut to its first 10, so only the first 12 row heights survive
//! and the scaling list address is lost. The accelerator reads the record
//! from any of [`PPS_RECORD_COPIES`] positions of the buffer, so the record
//! is replicated.

use crate::backend::rkvdec::HwGeneration;
use crate::backend::rkvdec::PPS_RECORD_COPIES;
use crate::bitstream_utils::BitPutter;
use crate::codec::h265::picture::PicParams;
use crate::codec::h265::picture::Pps;
use crate::codec::h265::picture::Sps;
use crate::codec::h265::picture::MAX_TILE_COLUMNS;
use crate::codec::h265::picture::MAX_TILE_ROWS;
use crate::decoder::BackendError;
use crate::decoder::BackendResult;

/// Width of every tile size field.
const TILE_SIZE_BITS: u32 = 12;

/// Words the legacy fields occupy before the record is cut to size.
const LEGACY_PACKED_WORDS: usize = 13;

/// Sizes of the tile columns and rows of a picture, in coding tree blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileLayout {
    pub column_widths: Vec<u32>,
    pub row_heights: Vec<u32>,
}

/// Splits `extent` CTBs into `count` parts differing by at most one.
fn uniform_sizes(count: u32, extent: u32) -> Vec<u32> {
    (0..count)
        .map(|i| ((i + 1) * extent) / count - (i * extent) / count)
        .collect()
}

/// Sizes given explicitly for all parts but the last, which takes the
/// remainder of `extent`.
fn explicit_sizes(minus1: &[u32], extent: u32, what: &str) -> BackendResult<Vec<u32>> {
    let mut sizes = Vec::with_capacity(minus1.len() + 1);
    let mut sum = 0u32;
    for size in minus1.iter().map(|s| s.saturating_add(1)) {
        sum = sum.saturating_add(size);
        sizes.push(size);
    }

    if sum >= extent {
        return Err(BackendError::InvalidParams(format!(
            "explicit tile {} sizes sum to {} but the picture is {} CTBs",
            what, sum, extent
        )));
    }
    sizes.push(extent - sum);

    Ok(sizes)
}

impl TileLayout {
    pub fn new(sps: &Sps, pps: &Pps) -> BackendResult<Self> {
        let ctb_size = 1u32 << sps.ctb_log2_size_y();
        let width_in_ctbs = sps.width().div_ceil(ctb_size);
        let height_in_ctbs = sps.height().div_ceil(ctb_size);

        if !pps.tiles_enabled_flag {
            return Ok(Self {
                column_widths: vec![width_in_ctbs],
                row_heights: vec![height_in_ctbs],
            });
        }

        let columns = pps.num_tile_columns_minus1 as usize + 1;
        let rows = pps.num_tile_rows_minus1 as usize + 1;
        if columns > MAX_TILE_COLUMNS || rows > MAX_TILE_ROWS {
            return Err(BackendError::InvalidParams(format!(
                "{}x{} tiles exceed the {}x{} supported",
                columns, rows, MAX_TILE_COLUMNS, MAX_TILE_ROWS
            )));
        }

        if pps.uniform_spacing_flag {
            Ok(Self {
                column_widths: uniform_sizes(columns as u32, width_in_ctbs),
                row_heights: uniform_sizes(rows as u32, height_in_ctbs),
            })
        } else {
            Ok(Self {
                column_widths: explicit_sizes(
                    &pps.column_width_minus1[..columns - 1],
                    width_in_ctbs,
                    "column",
                )?,
                row_heights: explicit_sizes(
                    &pps.row_height_minus1[..rows - 1],
                    height_in_ctbs,
                    "row",
                )?,
            })
        }
    }

    /// Puts every size minus one into `bp`, padding with zeros up to the
    /// maximum number of columns and rows.
    fn put(&self, bp: &mut BitPutter) -> BackendResult<()> {
        let limit = (1u32 << TILE_SIZE_BITS) - 1;
        let padded = |sizes: &[u32], max: usize| {
            sizes
                .iter()
                .copied()
                .chain(std::iter::repeat(0))
                .take(max)
                .collect::<Vec<_>>()
        };

        for size in padded(&self.column_widths, MAX_TILE_COLUMNS)
            .into_iter()
            .chain(padded(&self.row_heights, MAX_TILE_ROWS))
        {
            // Zero only appears for unused entries and must not wrap.
            let minus1 = size.saturating_sub(1);
            if minus1 > limit {
                return Err(BackendError::InvalidParams(format!(
                    "tile of {} CTBs does not fit in {} bits",
                    size, TILE_SIZE_BITS
                )));
            }
            bp.put_bits(minus1 as u64, TILE_SIZE_BITS)?;
        }

        Ok(())
    }
}

fn put_sps(bp: &mut BitPutter, generation: HwGeneration, sps: &Sps) -> BackendResult<()> {
    bp.put_bits(sps.video_parameter_set_id as u64, 4)?;
    bp.put_bits(sps.seq_parameter_set_id as u64, 4)?;
    bp.put_bits(sps.chroma_format_idc as u64, 2)?;
    bp.put_bits(sps.width() as u64, 16)?;
    bp.put_bits(sps.height() as u64, 16)?;
    bp.put_bits(sps.bit_depth_luma() as u64, 4)?;
    bp.put_bits(sps.bit_depth_chroma() as u64, 4)?;
    bp.put_bits(sps.log2_max_pic_order_cnt_lsb_minus4 as u64 + 4, 5)?;
    bp.put_bits(sps.log2_diff_max_min_luma_coding_block_size as u64, 2)?;
    bp.put_bits(sps.min_cb_log2_size_y() as u64, 3)?;
    bp.put_bits(sps.log2_min_luma_transform_block_size_minus2 as u64 + 2, 3)?;
    bp.put_bits(sps.log2_diff_max_min_luma_transform_block_size as u64, 2)?;
    bp.put_bits(sps.max_transform_hierarchy_depth_inter as u64, 3)?;
    bp.put_bits(sps.max_transform_hierarchy_depth_intra as u64, 3)?;
    bp.put_flag(sps.scaling_list_enabled_flag)?;
    bp.put_flag(sps.amp_enabled_flag)?;
    bp.put_flag(sps.sample_adaptive_offset_enabled_flag)?;

    let pcm = sps.pcm_enabled_flag;
    bp.put_flag(pcm)?;
    bp.put_bits(if pcm { sps.pcm_sample_bit_depth_luma_minus1 as u64 + 1 } else { 0 }, 4)?;
    bp.put_bits(if pcm { sps.pcm_sample_bit_depth_chroma_minus1 as u64 + 1 } else { 0 }, 4)?;
    bp.put_flag(sps.pcm_loop_filter_disabled_flag)?;
    bp.put_bits(sps.log2_diff_max_min_pcm_luma_coding_block_size as u64, 3)?;
    bp.put_bits(if pcm { sps.log2_min_pcm_luma_coding_block_size_minus3 as u64 + 3 } else { 0 }, 3)?;

    bp.put_bits(sps.short_term_ref_pic_sets.len() as u64, 7)?;
    bp.put_flag(sps.long_term_ref_pics_present_flag)?;
    bp.put_bits(sps.long_term_ref_pics.len() as u64, 6)?;
    bp.put_flag(sps.sps_temporal_mvp_enabled_flag)?;
    bp.put_flag(sps.strong_intra_smoothing_enabled_flag)?;

    bp.put_zeros(7)?;
    if generation == HwGeneration::Vdpu34x {
        bp.put_bits(sps.sps_max_dec_pic_buffering_minus1 as u64, 4)?;
        bp.put_zeros(3)?;
    }
    // Every alignment of this record fills with ones, as MPP's
    // `mpp_put_align(&bp, n, 0xf)` is taken to do.
    bp.put_align(32, true)?;

    Ok(())
}

fn put_pps(
    bp: &mut BitPutter,
    generation: HwGeneration,
    sps: &Sps,
    pps: &Pps,
) -> BackendResult<()> {
    bp.put_bits(pps.pic_parameter_set_id as u64, 6)?;
    bp.put_bits(pps.seq_parameter_set_id as u64, 4)?;
    bp.put_flag(pps.dependent_slice_segments_enabled_flag)?;
    bp.put_flag(pps.output_flag_present_flag)?;
    bp.put_bits(pps.num_extra_slice_header_bits as u64, 13)?;
    bp.put_flag(pps.sign_data_hiding_enabled_flag)?;
    bp.put_flag(pps.cabac_init_present_flag)?;
    bp.put_bits(pps.num_ref_idx_l0_default_active_minus1 as u64 + 1, 4)?;
    bp.put_bits(pps.num_ref_idx_l1_default_active_minus1 as u64 + 1, 4)?;
    bp.put_signed(pps.init_qp_minus26 as i32, 7)?;
    bp.put_flag(pps.constrained_intra_pred_flag)?;
    bp.put_flag(pps.transform_skip_enabled_flag)?;
    bp.put_flag(pps.cu_qp_delta_enabled_flag)?;
    // Log2MinCuQpDeltaSize
    let min_cu_qp_delta_log2 =
        sps.ctb_log2_size_y().saturating_sub(pps.diff_cu_qp_delta_depth as u32);
    bp.put_bits(min_cu_qp_delta_log2 as u64, 3)?;
    bp.put_signed(pps.pps_cb_qp_offset as i32, 5)?;
    bp.put_signed(pps.pps_cr_qp_offset as i32, 5)?;
    bp.put_flag(pps.pps_slice_chroma_qp_offsets_present_flag)?;
    bp.put_flag(pps.weighted_pred_flag)?;
    bp.put_flag(pps.weighted_bipred_flag)?;
    bp.put_flag(pps.transquant_bypass_enabled_flag)?;
    bp.put_flag(pps.tiles_enabled_flag)?;
    bp.put_flag(pps.entropy_coding_sync_enabled_flag)?;
    bp.put_flag(pps.pps_loop_filter_across_slices_enabled_flag)?;
    bp.put_flag(pps.loop_filter_across_tiles_enabled_flag)?;
    bp.put_flag(pps.deblocking_filter_override_enabled_flag)?;
    bp.put_flag(pps.pps_deblocking_filter_disabled_flag)?;
    bp.put_signed(pps.pps_beta_offset_div2 as i32, 4)?;
    bp.put_signed(pps.pps_tc_offset_div2 as i32, 4)?;
    bp.put_flag(pps.lists_modification_present_flag)?;
    bp.put_bits(pps.log2_parallel_merge_level_minus2 as u64 + 2, 3)?;
    bp.put_flag(pps.slice_segment_header_extension_present_flag)?;
    bp.put_zeros(3)?;

    let columns = pps.num_tile_columns_minus1 as u64 + 1;
    let rows = pps.num_tile_rows_minus1 as u64 + 1;
    match generation {
        HwGeneration::Legacy => {
            bp.put_bits(columns, 5)?;
            bp.put_bits(rows, 5)?;
            // Parameter set mode.
            bp.put_bits(3, 2)?;
        }
        HwGeneration::Vdpu34x => {
            let tiles = pps.tiles_enabled_flag;
            bp.put_bits(if tiles { columns } else { 0 }, 5)?;
            bp.put_bits(if tiles { rows } else { 0 }, 5)?;
            bp.put_zeros(4)?;
        }
    }
    bp.put_align(64, true)?;

    Ok(())
}

/// Packs the record of `params` for `generation`. `scaling_list_addr` is the
/// packed address of the scaling list record the picture uses.
pub fn pack_parameter_set(
    generation: HwGeneration,
    params: &PicParams,
    scaling_list_addr: u32,
) -> BackendResult<Vec<u8>> {
    let sps = &params.sps;
    let pps = &params.pps;
    let tiles = TileLayout::new(sps, pps)?;

    let words = match generation {
        HwGeneration::Legacy => LEGACY_PACKED_WORDS,
        HwGeneration::Vdpu34x => generation.pps_record_size() / 8,
    };
    let mut bp = BitPutter::new(words);

    put_sps(&mut bp, generation, sps)?;
    put_pps(&mut bp, generation, sps, pps)?;

    tiles.put(&mut bp)?;
    bp.put_bits(scaling_list_addr as u64, 32)?;
    if generation == HwGeneration::Vdpu34x {
        bp.put_zeros(70)?;
    }
    bp.put_align(64, true)?;

    debug_assert_eq!(bp.position(), words * 64);
    let mut record = bp.to_le_bytes();
    record.truncate(generation.pps_record_size());
    Ok(record)
}

/// Clears `buffer` and fills it with [`PPS_RECORD_COPIES`] copies of `record`.
pub fn write_replicated(record: &[u8], buffer: &mut [u8]) -> BackendResult<()> {
    let total = record.len() * PPS_RECORD_COPIES;
    if buffer.len() < total {
        return Err(BackendError::InvalidParams(format!(
            "parameter set buffer of {} bytes cannot hold {} copies of {} bytes",
            buffer.len(),
            PPS_RECORD_COPIES,
            record.len()
        )));
    }

    buffer.fill(0);
    for copy in buffer[..total].chunks_exact_mut(record.len()) {
        copy.copy_from_slice(record);
    }

    Ok(())
}
