// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

#[derive(Debug, PartialEq, Eq)]
pub enum BitPutError {
    InvalidBitCount(u32),
    Overflow { capacity: usize },
}

impl fmt::Display for BitPutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BitPutError::InvalidBitCount(bits) => {
                write!(f, "more than 64 ({}) bits were requested", bits)
            }
            BitPutError::Overflow { capacity } => {
                write!(f, "record of {} words is full", capacity)
            }
        }
    }
}

impl std::error::Error for BitPutError {}

pub type BitPutResult<T> = std::result::Result<T, BitPutError>;

/// Packs fields into a fixed number of 64-bit words, least significant bit
/// first. This is the layout the rkvdec family of accelerators expects for
/// its parameter-set and reference-set records: the first field lands in bit
/// 0 of word 0 and a field crossing a word boundary continues in the low bits
/// of the next word.
#[derive(Clone, Debug)]
pub struct BitPutter {
    words: Vec<u64>,
    /// Word currently being filled.
    index: usize,
    /// Next free bit in `words[index]`.
    bitpos: u32,
}

impl BitPutter {
    pub fn new(capacity_words: usize) -> Self {
        Self {
            words: vec![0; capacity_words],
            index: 0,
            bitpos: 0,
        }
    }

    /// Puts the `bits` low bits of `value`. Higher bits are discarded.
    pub fn put_bits(&mut self, value: u64, bits: u32) -> BitPutResult<()> {
        if bits > 64 {
            return Err(BitPutError::InvalidBitCount(bits));
        }
        if bits == 0 {
            return Ok(());
        }
        if self.position() + bits as usize > self.words.len() * 64 {
            return Err(BitPutError::Overflow {
                capacity: self.words.len(),
            });
        }

        let value = if bits == 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        };

        self.words[self.index] |= value << self.bitpos;
        if self.bitpos + bits >= 64 {
            let spill = self.bitpos + bits - 64;
            self.index += 1;
            if spill > 0 {
                self.words[self.index] |= value >> (bits - spill);
            }
            self.bitpos = spill;
        } else {
            self.bitpos += bits;
        }

        Ok(())
    }

    pub fn put_flag(&mut self, flag: bool) -> BitPutResult<()> {
        self.put_bits(flag as u64, 1)
    }

    /// Puts a two's complement value truncated to `bits`.
    pub fn put_signed(&mut self, value: i32, bits: u32) -> BitPutResult<()> {
        self.put_bits(value as i64 as u64, bits)
    }

    /// Puts `bits` zero bits, which may span several words.
    pub fn put_zeros(&mut self, bits: usize) -> BitPutResult<()> {
        self.put_fill(bits, false)
    }

    /// Pads up to the next multiple of `align` bits with zeros or ones. The
    /// parameter-set records pass `ones` where MPP calls
    /// `mpp_put_align(&bp, align, 0xf)`.
    pub fn put_align(&mut self, align: usize, ones: bool) -> BitPutResult<()> {
        let pad = (align - self.position() % align) % align;
        self.put_fill(pad, ones)
    }

    fn put_fill(&mut self, mut bits: usize, ones: bool) -> BitPutResult<()> {
        let pattern = if ones { u64::MAX } else { 0 };
        while bits > 0 {
            let n = std::cmp::min(bits, 64);
            self.put_bits(pattern, n as u32)?;
            bits -= n;
        }

        Ok(())
    }

    /// Number of bits written so far.
    pub fn position(&self) -> usize {
        self.index * 64 + self.bitpos as usize
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// The packed record as it must appear in accelerator memory.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.words.len() * 8];
        LittleEndian::write_u64_into(&self.words, &mut bytes);
        bytes
    }
}
