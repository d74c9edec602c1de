// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! vdpu34x register image.
//!
//! Registers are numbered as in the accelerator's address space; the byte
//! offset of register `n` is `n * 4`. The image is split into the groups the
//! driver accepts as separate writes, plus the status group read back once a
//! task completes.

/// A bit field inside one register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub reg: u32,
    pub shift: u32,
    pub width: u32,
}

impl Field {
    pub const fn new(reg: u32, shift: u32, width: u32) -> Self {
        Self { reg, shift, width }
    }

    /// A field spanning the whole of register `reg`.
    pub const fn reg(reg: u32) -> Self {
        Self::new(reg, 0, 32)
    }

    fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            ((1u32 << self.width) - 1) << self.shift
        }
    }
}

/// `N` consecutive registers starting at register `base`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegGroup<const N: usize> {
    base: u32,
    regs: [u32; N],
}

impl<const N: usize> RegGroup<N> {
    pub const fn new(base: u32) -> Self {
        Self { base, regs: [0; N] }
    }

    /// Number of the first register.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Byte offset of the group in the register space.
    pub fn offset(&self) -> u32 {
        self.base * 4
    }

    pub fn contains(&self, field: Field) -> bool {
        field.reg >= self.base && ((field.reg - self.base) as usize) < N
    }

    pub fn regs(&self) -> &[u32] {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut [u32] {
        &mut self.regs
    }

    pub fn clear(&mut self) {
        self.regs = [0; N];
    }

    /// Sets `field` to the low bits of `value`.
    ///
    /// Panics if `field` does not belong to this group. The fields of this
    /// module are checked against their groups by the tests below.
    pub fn set(&mut self, field: Field, value: u32) {
        let mask = field.mask();
        let reg = &mut self.regs[(field.reg - self.base) as usize];
        *reg = (*reg & !mask) | ((value << field.shift) & mask);
    }

    pub fn get(&self, field: Field) -> u32 {
        (self.regs[(field.reg - self.base) as usize] & field.mask()) >> field.shift
    }
}

pub const COMMON_BASE: u32 = 8;
pub const COMMON_LEN: usize = 25;
pub const PARAMS_BASE: u32 = 64;
pub const PARAMS_LEN: usize = 36;
pub const COMMON_ADDR_BASE: u32 = 128;
pub const COMMON_ADDR_LEN: usize = 32;
pub const CODEC_ADDR_BASE: u32 = 160;
pub const CODEC_ADDR_LEN: usize = 38;
pub const STATUS_BASE: u32 = 224;
pub const STATUS_LEN: usize = 14;

// Common control.
pub const DEC_E: Field = Field::new(10, 0, 1);
pub const DEC_TIMEOUT_E: Field = Field::new(11, 5, 1);
pub const BUF_EMPTY_EN: Field = Field::new(11, 6, 1);
pub const WR_DDR_ALIGN_EN: Field = Field::new(12, 0, 1);
pub const WAIT_RESET_EN: Field = Field::new(12, 7, 1);
pub const SCANLIST_ADDR_VALID_EN: Field = Field::new(12, 8, 1);
pub const TIMEOUT_MODE: Field = Field::new(13, 0, 1);
pub const COLMV_ERROR_MODE: Field = Field::new(13, 14, 1);
pub const H26X_ERROR_MODE: Field = Field::new(13, 17, 1);
pub const CUR_PIC_IS_IDR: Field = Field::new(13, 23, 1);
pub const STREAM_LEN: Field = Field::new(16, 0, 28);
pub const SLICE_NUM: Field = Field::new(17, 0, 24);
pub const Y_HOR_VIRSTRIDE: Field = Field::new(18, 0, 16);
pub const UV_HOR_VIRSTRIDE: Field = Field::new(19, 0, 16);
pub const Y_VIRSTRIDE: Field = Field::new(20, 0, 28);
pub const CABAC_ERR_EN_LOWBITS: Field = Field::reg(22);
pub const CABAC_ERR_EN_HIGHBITS: Field = Field::reg(23);

// Codec parameters.
pub const CUR_POC: Field = Field::reg(64);
pub const H26X_RPS_MODE: Field = Field::new(65, 1, 1);
pub const REF_PIC_LAYER_SAME_WITH_CUR: Field = Field::new(82, 0, 16);
/// One valid bit for each of the first [`REF_VALID_COUNT`] references. The
/// last reference has no bit.
pub const REF_VALID: Field = Field::new(99, 0, REF_VALID_COUNT as u32);
pub const REF_VALID_COUNT: usize = 15;

pub const fn ref_poc(index: usize) -> Field {
    Field::reg(66 + index as u32)
}

// Common addresses.
pub const STRM_RLC_BASE: Field = Field::reg(128);
pub const RLCWRITE_BASE: Field = Field::reg(129);
pub const DECOUT_BASE: Field = Field::reg(130);
pub const COLMV_CUR_BASE: Field = Field::reg(131);
pub const ERROR_REF_BASE: Field = Field::reg(132);

/// Base address of the row-context region of `engine`, numbered as in
/// [`crate::backend::rkvdec::rcb::RcbEngine`].
pub const fn rcb_base(engine: usize) -> Field {
    Field::reg(133 + engine as u32)
}

// Codec addresses.
pub const PPS_BASE: Field = Field::reg(161);
pub const RPS_BASE: Field = Field::reg(162);
pub const CABACTBL_BASE: Field = Field::reg(163);
pub const SCANLIST_BASE: Field = Field::reg(180);

pub const fn ref_base(index: usize) -> Field {
    Field::reg(164 + index as u32)
}

pub const fn ref_colmv_base(index: usize) -> Field {
    Field::reg(181 + index as u32)
}

// Status.
pub const STA_INT: Field = Field::reg(224);
pub const DEC_RDY_STA: Field = Field::new(224, 2, 1);
pub const DEC_ERROR_STA: Field = Field::new(224, 4, 1);
pub const DEC_TIMEOUT_STA: Field = Field::new(224, 5, 1);
pub const BUF_EMPTY_STA: Field = Field::new(224, 6, 1);

/// The full register set of one decoding task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterImage {
    pub common: RegGroup<COMMON_LEN>,
    pub params: RegGroup<PARAMS_LEN>,
    pub common_addr: RegGroup<COMMON_ADDR_LEN>,
    pub codec_addr: RegGroup<CODEC_ADDR_LEN>,
    pub status: RegGroup<STATUS_LEN>,
}

impl Default for RegisterImage {
    fn default() -> Self {
        Self {
            common: RegGroup::new(COMMON_BASE),
            params: RegGroup::new(PARAMS_BASE),
            common_addr: RegGroup::new(COMMON_ADDR_BASE),
            codec_addr: RegGroup::new(CODEC_ADDR_BASE),
            status: RegGroup::new(STATUS_BASE),
        }
    }
}

impl RegisterImage {
    pub fn clear(&mut self) {
        self.common.clear();
        self.params.clear();
        self.common_addr.clear();
        self.codec_addr.clear();
        self.status.clear();
    }

    /// The groups written to the accelerator, in submission order, as
    /// `(byte offset, registers)`.
    pub fn write_groups(&self) -> [(u32, &[u32]); 4] {
        [
            (self.common.offset(), self.common.regs()),
            (self.params.offset(), self.params.regs()),
            (self.common_addr.offset(), self.common_addr.regs()),
            (self.codec_addr.offset(), self.codec_addr.regs()),
        ]
    }

    /// Whether the status read back reports a decoding error or a stream
    /// buffer that ran out before the picture was complete.
    pub fn hw_error(&self) -> bool {
        self.status.get(DEC_ERROR_STA) != 0 || self.status.get(BUF_EMPTY_STA) != 0
    }

    pub(crate) fn dump(&self) {
        for (offset, regs) in self.write_groups() {
            for (i, value) in regs.iter().enumerate() {
                log::trace!("reg[{:03}] = 0x{:08x}", offset / 4 + i as u32, value);
            }
        }
    }
}
