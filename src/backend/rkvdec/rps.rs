// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture set records.
//!
//! In software mode the host resolves the reference picture lists of every
//! slice and writes one [`RPS_RECORD_SIZE`] record per slice:
//!
//! * low delay flag (1), RPS bits (10), short-term RPS bits (9), number of
//!   POCs of the RPS (4);
//! * for list 0 then list 1, 15 entries of long-term flag (1) and DPB index
//!   (4), unused entries zeroed.
//!
//! In hardware mode the accelerator derives the lists while parsing the slice
//! headers and only needs the SPS candidates: 32 long-term entries of 32 bits
//! (POC LSBs (16), used flag (1)) followed by 64 short-term sets of 384 bits
//! (negative count (4), positive count (4), 15 entries of delta POC (16) and
//! used flag (1), negative entries first).

use crate::backend::rkvdec::MAX_SLICES;
use crate::backend::rkvdec::RPS_RECORD_SIZE;
use crate::bitstream_utils::BitPutter;
use crate::codec::h265::picture::ShortTermRefPicSet;
use crate::codec::h265::picture::SliceParams;
use crate::codec::h265::picture::Sps;
use crate::codec::h265::picture::MAX_LONG_TERM_REF_PICS_SPS;
use crate::codec::h265::picture::MAX_REF_LIST_ENTRIES;
use crate::codec::h265::picture::MAX_SHORT_TERM_REF_PIC_SETS;
use crate::decoder::BackendError;
use crate::decoder::BackendResult;

const ST_SET_BITS: usize = 384;
const LT_ENTRY_BITS: usize = 32;
/// Size in 64-bit words of the record written in hardware mode.
pub const HW_RPS_WORDS: usize =
    (MAX_LONG_TERM_REF_PICS_SPS * LT_ENTRY_BITS + MAX_SHORT_TERM_REF_PIC_SETS * ST_SET_BITS) / 64;

fn check_capacity(needed: usize, buffer: &[u8]) -> BackendResult<()> {
    if buffer.len() < needed {
        return Err(BackendError::InvalidParams(format!(
            "reference set buffer of {} bytes cannot hold {} bytes",
            buffer.len(),
            needed
        )));
    }

    Ok(())
}

/// Entries of `set` as `(delta_poc, used)`, negative ones first, limited to
/// what a record can hold.
fn st_entries(set: &ShortTermRefPicSet) -> (usize, usize, Vec<(i32, bool)>) {
    let num_negative = std::cmp::min(set.num_negative_pics as usize, MAX_REF_LIST_ENTRIES);
    let num_positive = std::cmp::min(
        set.num_positive_pics as usize,
        MAX_REF_LIST_ENTRIES - num_negative,
    );
    if num_negative + num_positive < set.num_delta_pocs() {
        log::warn!(
            "Short-term set with {} entries truncated to {}",
            set.num_delta_pocs(),
            MAX_REF_LIST_ENTRIES
        );
    }

    let negative = (0..num_negative).map(|i| (set.delta_poc_s0[i], set.used_by_curr_pic_s0[i]));
    let positive = (0..num_positive).map(|i| (set.delta_poc_s1[i], set.used_by_curr_pic_s1[i]));

    (num_negative, num_positive, negative.chain(positive).collect())
}

/// Writes the SPS candidate sets for the accelerator to derive the
/// reference picture set of each slice.
pub fn encode_hw_rps(sps: &Sps, buffer: &mut [u8]) -> BackendResult<()> {
    check_capacity(HW_RPS_WORDS * 8, buffer)?;

    if sps.long_term_ref_pics.len() > MAX_LONG_TERM_REF_PICS_SPS
        || sps.short_term_ref_pic_sets.len() > MAX_SHORT_TERM_REF_PIC_SETS
    {
        return Err(BackendError::InvalidParams(format!(
            "{} long-term and {} short-term candidates exceed the SPS limits",
            sps.long_term_ref_pics.len(),
            sps.short_term_ref_pic_sets.len()
        )));
    }

    let mut bp = BitPutter::new(HW_RPS_WORDS);

    for i in 0..MAX_LONG_TERM_REF_PICS_SPS {
        let lt = sps.long_term_ref_pics.get(i).copied().unwrap_or_default();
        bp.put_bits(lt.lt_ref_pic_poc_lsb_sps as u64, 16)?;
        bp.put_flag(lt.used_by_curr_pic_lt_sps_flag)?;
        bp.put_zeros(LT_ENTRY_BITS - 17)?;
    }

    for i in 0..MAX_SHORT_TERM_REF_PIC_SETS {
        let start = bp.position();
        if let Some(set) = sps.short_term_ref_pic_sets.get(i) {
            let (num_negative, num_positive, entries) = st_entries(set);
            bp.put_bits(num_negative as u64, 4)?;
            bp.put_bits(num_positive as u64, 4)?;
            for (delta_poc, used) in entries {
                bp.put_signed(delta_poc, 16)?;
                bp.put_flag(used)?;
            }
        }
        bp.put_zeros(start + ST_SET_BITS - bp.position())?;
    }

    let bytes = bp.to_le_bytes();
    buffer.fill(0);
    buffer[..bytes.len()].copy_from_slice(&bytes);

    Ok(())
}

/// Writes one record per slice. `ref_pocs` are the POCs of the picture's
/// reference frames, indexed by DPB position, `None` for absent entries.
pub fn encode_sw_rps(
    slices: &[SliceParams],
    ref_pocs: &[Option<i32>],
    buffer: &mut [u8],
) -> BackendResult<()> {
    if slices.len() > MAX_SLICES {
        return Err(BackendError::InvalidParams(format!(
            "{} slices exceed the {} supported",
            slices.len(),
            MAX_SLICES
        )));
    }
    check_capacity(slices.len() * RPS_RECORD_SIZE, buffer)?;

    buffer.fill(0);
    for (slice, record) in slices
        .iter()
        .zip(buffer.chunks_exact_mut(RPS_RECORD_SIZE))
    {
        let mut bp = BitPutter::new(RPS_RECORD_SIZE / 8);
        bp.put_flag(slice.low_delay)?;
        bp.put_bits(slice.rps_bits as u64, 10)?;
        bp.put_bits(slice.st_rps_bits as u64, 9)?;
        bp.put_bits(slice.num_pic_total_curr as u64, 4)?;

        for list in &slice.ref_pic_lists {
            if list.len() > MAX_REF_LIST_ENTRIES {
                log::warn!(
                    "Reference list of {} entries truncated to {}",
                    list.len(),
                    MAX_REF_LIST_ENTRIES
                );
            }

            for i in 0..MAX_REF_LIST_ENTRIES {
                let Some(entry) = list.get(i) else {
                    bp.put_zeros(5)?;
                    continue;
                };

                let dpb_index = ref_pocs
                    .iter()
                    .position(|poc| *poc == Some(entry.pic_order_cnt_val))
                    .unwrap_or_else(|| {
                        log::warn!(
                            "POC {} of the reference list is not in the DPB",
                            entry.pic_order_cnt_val
                        );
                        0
                    });
                bp.put_flag(entry.long_term)?;
                bp.put_bits(dpb_index as u64, 4)?;
            }
        }
        // Zero fill, like the unused entries above.
        bp.put_align(64, false)?;

        let bytes = bp.to_le_bytes();
        record.copy_from_slice(&bytes);
    }

    Ok(())
}
