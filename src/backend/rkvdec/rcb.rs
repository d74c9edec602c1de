// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Row-context buffer: scratch memory the accelerator engines use to carry
//! state between CTB rows (or columns) of a picture.

/// Engines owning a region of the row-context buffer, in buffer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RcbEngine {
    IntraRow,
    TransdRow,
    TransdCol,
    StreamdRow,
    InterRow,
    InterCol,
    DblkRow,
    SaoRow,
    FbcRow,
    FilterCol,
}

impl RcbEngine {
    pub const ALL: [RcbEngine; 10] = [
        RcbEngine::IntraRow,
        RcbEngine::TransdRow,
        RcbEngine::TransdCol,
        RcbEngine::StreamdRow,
        RcbEngine::InterRow,
        RcbEngine::InterCol,
        RcbEngine::DblkRow,
        RcbEngine::SaoRow,
        RcbEngine::FbcRow,
        RcbEngine::FilterCol,
    ];

    /// Bytes needed per pixel of the picture dimension the engine walks.
    const fn coefficient(self) -> u32 {
        match self {
            RcbEngine::IntraRow => 6,
            RcbEngine::TransdRow => 1,
            RcbEngine::TransdCol => 1,
            RcbEngine::StreamdRow => 6,
            RcbEngine::InterRow => 6,
            RcbEngine::InterCol => 3,
            RcbEngine::DblkRow => 21,
            RcbEngine::SaoRow => 5,
            RcbEngine::FbcRow => 10,
            RcbEngine::FilterCol => 67,
        }
    }

    /// Column engines scale with the picture height, row engines with its
    /// width.
    const fn is_column(self) -> bool {
        matches!(
            self,
            RcbEngine::TransdCol | RcbEngine::InterCol | RcbEngine::FilterCol
        )
    }

    fn size(self, width: u32, height: u32) -> u32 {
        self.coefficient() * if self.is_column() { height } else { width }
    }
}

/// Placement of every engine's region for a picture size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RcbLayout {
    width: u32,
    height: u32,
    offsets: [u32; 10],
    size: u32,
}

impl RcbLayout {
    pub fn new(width: u32, height: u32) -> Self {
        let mut offsets = [0; 10];
        let mut size = 0;
        for (offset, engine) in offsets.iter_mut().zip(RcbEngine::ALL) {
            *offset = size;
            size += engine.size(width, height);
        }

        Self {
            width,
            height,
            offsets,
            size,
        }
    }

    /// Picture dimensions the layout was computed for.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Total size of the buffer in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Byte offsets of every region, in [`RcbEngine::ALL`] order.
    pub fn offsets(&self) -> &[u32; 10] {
        &self.offsets
    }

    pub fn offset(&self, engine: RcbEngine) -> u32 {
        self.offsets[engine as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_sums() {
        let layout = RcbLayout::new(1920, 1080);
        assert_eq!(
            layout.offsets(),
            &[
                0,
                6 * 1920,
                7 * 1920,
                7 * 1920 + 1080,
                13 * 1920 + 1080,
                19 * 1920 + 1080,
                19 * 1920 + 4 * 1080,
                40 * 1920 + 4 * 1080,
                45 * 1920 + 4 * 1080,
                55 * 1920 + 4 * 1080,
            ]
        );
        assert_eq!(layout.size(), 55 * 1920 + 71 * 1080);
        assert_eq!(layout.offset(RcbEngine::DblkRow), 19 * 1920 + 4 * 1080);
        assert_eq!(layout.dimensions(), (1920, 1080));
    }
}
