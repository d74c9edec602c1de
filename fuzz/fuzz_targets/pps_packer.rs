// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![no_main]

use hevc_hal::backend::rkvdec::pps::pack_parameter_set;
use hevc_hal::backend::rkvdec::pps::write_replicated;
use hevc_hal::backend::rkvdec::rps::encode_hw_rps;
use hevc_hal::backend::rkvdec::rps::encode_sw_rps;
use hevc_hal::backend::rkvdec::HwGeneration;
use hevc_hal::backend::rkvdec::RPS_SIZE;
use hevc_hal::codec::h265::picture::PicParams;
use hevc_hal::codec::h265::picture::RefPicListEntry;
use hevc_hal::codec::h265::picture::ShortTermRefPicSet;
use hevc_hal::codec::h265::picture::SliceParams;
use libfuzzer_sys::fuzz_target;

/// Hands out the fuzzer input one value at a time, then zeros.
struct Input<'a>(&'a [u8]);

impl Input<'_> {
    fn u8(&mut self) -> u8 {
        match self.0.split_first() {
            Some((first, rest)) => {
                self.0 = rest;
                *first
            }
            None => 0,
        }
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes([self.u8(), self.u8()])
    }

    fn flag(&mut self) -> bool {
        self.u8() & 1 != 0
    }

    fn i8(&mut self) -> i8 {
        self.u8() as i8
    }
}

fn params(input: &mut Input) -> PicParams {
    let mut params = PicParams::default();

    let sps = &mut params.sps;
    sps.seq_parameter_set_id = input.u8() % 16;
    sps.chroma_format_idc = input.u8() % 4;
    sps.pic_width_in_min_cbs_y = input.u16() % 1024 + 1;
    sps.pic_height_in_min_cbs_y = input.u16() % 1024 + 1;
    sps.bit_depth_luma_minus8 = input.u8() % 9;
    sps.bit_depth_chroma_minus8 = input.u8() % 9;
    sps.log2_max_pic_order_cnt_lsb_minus4 = input.u8() % 13;
    sps.log2_min_luma_coding_block_size_minus3 = input.u8() % 4;
    sps.log2_diff_max_min_luma_coding_block_size = input.u8() % 4;
    sps.scaling_list_enabled_flag = input.flag();
    sps.pcm_enabled_flag = input.flag();
    sps.long_term_ref_pics_present_flag = input.flag();
    for _ in 0..input.u8() % 66 {
        let mut set = ShortTermRefPicSet {
            num_negative_pics: input.u8() % 17,
            num_positive_pics: input.u8() % 17,
            ..Default::default()
        };
        for delta in set.delta_poc_s0.iter_mut() {
            *delta = -(input.u16() as i32);
        }
        sps.short_term_ref_pic_sets.push(set);
    }

    let pps = &mut params.pps;
    pps.pic_parameter_set_id = input.u8() % 64;
    pps.init_qp_minus26 = input.i8();
    pps.pps_cb_qp_offset = input.i8();
    pps.diff_cu_qp_delta_depth = input.u8() % 4;
    pps.tiles_enabled_flag = input.flag();
    pps.uniform_spacing_flag = input.flag();
    pps.num_tile_columns_minus1 = input.u8() % 24;
    pps.num_tile_rows_minus1 = input.u8() % 24;
    for width in pps.column_width_minus1.iter_mut() {
        *width = input.u16() as u32;
    }
    for height in pps.row_height_minus1.iter_mut() {
        *height = input.u16() as u32;
    }

    params
}

fn slices(input: &mut Input) -> Vec<SliceParams> {
    (0..input.u16() % 640)
        .map(|_| {
            let mut slice = SliceParams {
                low_delay: input.flag(),
                rps_bits: input.u16(),
                st_rps_bits: input.u16(),
                num_pic_total_curr: input.u8(),
                ..Default::default()
            };
            for list in slice.ref_pic_lists.iter_mut() {
                for _ in 0..input.u8() % 18 {
                    list.push(RefPicListEntry {
                        pic_order_cnt_val: input.u8() as i32,
                        long_term: input.flag(),
                    });
                }
            }
            slice
        })
        .collect()
}

fn run(data: &[u8]) -> anyhow::Result<()> {
    let mut input = Input(data);
    let params = params(&mut input);
    let slices = slices(&mut input);
    let ref_pocs: Vec<Option<i32>> = (0..16)
        .map(|_| input.flag().then(|| input.u8() as i32))
        .collect();

    for generation in [HwGeneration::Legacy, HwGeneration::Vdpu34x] {
        let record = pack_parameter_set(generation, &params, input.u16() as u32)?;
        assert_eq!(record.len(), generation.pps_record_size());
        write_replicated(&record, &mut vec![0; generation.pps_size()])?;
    }

    let mut rps = vec![0; RPS_SIZE];
    encode_hw_rps(&params.sps, &mut rps)?;
    encode_sw_rps(&slices, &ref_pocs, &mut rps)?;

    Ok(())
}

fuzz_target!(|data: &[u8]| {
    // Invalid parameters are expected to be rejected, never to panic.
    let _ = run(data);
});
