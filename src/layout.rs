//! Packed buffer layout for a compressed mip chain
//!
//! All levels are written into one shared output buffer. Each level gets an
//! offset and a row stride; backends that require aligned buffer rows (the
//! compute backend) pass [`BYTES_PER_ROW_ALIGNMENT`], immediate-mode backends
//! pass `None` and get tightly packed rows.

/// Row alignment required for buffer/texture copies on WebGPU-style backends.
pub const BYTES_PER_ROW_ALIGNMENT: u32 = 256;

/// Mips are generated while either dimension is at least this size.
pub const MIN_MIP_SIZE: u32 = 4;

/// Block edge in pixels (all supported formats use 4x4 blocks).
pub const BLOCK_DIM: u32 = 4;

/// One level of the mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevel {
    /// Byte offset of the level in the packed buffer
    pub offset: u64,
    /// Bytes between consecutive block rows
    pub bytes_per_row: u32,
    /// Width in blocks
    pub block_width: u32,
    /// Height in blocks
    pub block_height: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl MipLevel {
    /// Size of the level in the packed buffer, including row padding.
    pub fn size(&self) -> u64 {
        self.bytes_per_row as u64 * self.block_height as u64
    }

    /// Byte range of the level within the packed buffer.
    pub fn range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.size()
    }
}

/// Layout of a compressed mip chain in one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLayoutPlan {
    levels: Vec<MipLevel>,
    total_size: u64,
}

impl MipLayoutPlan {
    pub fn mip_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn levels(&self) -> &[MipLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&MipLevel> {
        self.levels.get(index)
    }
}

/// Round a dimension up to a whole number of blocks.
pub fn round_to_block(value: u32) -> u32 {
    value.div_ceil(BLOCK_DIM) * BLOCK_DIM
}

/// Compute the packed layout for a `width` x `height` image.
///
/// Level 0 is always present. With `generate_mips`, dimensions are halved
/// (floor, min 1) and a level is added while either dimension is still at
/// least [`MIN_MIP_SIZE`].
pub fn plan_layout(
    width: u32,
    height: u32,
    block_bytes: u32,
    generate_mips: bool,
    row_alignment: Option<u32>,
) -> MipLayoutPlan {
    let mut levels = Vec::new();
    let mut offset = 0u64;
    let mut w = width.max(1);
    let mut h = height.max(1);

    loop {
        let block_width = w.div_ceil(BLOCK_DIM);
        let block_height = h.div_ceil(BLOCK_DIM);
        let raw_row = block_bytes * block_width;
        let bytes_per_row = match row_alignment {
            Some(align) if align > 1 => raw_row.div_ceil(align) * align,
            _ => raw_row,
        };

        let level = MipLevel {
            offset,
            bytes_per_row,
            block_width,
            block_height,
            width: w,
            height: h,
        };
        offset += level.size();
        levels.push(level);

        w = (w / 2).max(1);
        h = (h / 2).max(1);

        if !generate_mips || (w < MIN_MIP_SIZE && h < MIN_MIP_SIZE) {
            break;
        }
    }

    MipLayoutPlan {
        levels,
        total_size: offset,
    }
}
