//! Compressed format table
//!
//! Every format the encoder can produce is described by one immutable
//! [`FormatDescriptor`]. Ids follow a fixed numbering with gaps: the gaps are
//! reserved for variants that have no codec and can never be selected, so
//! [`FormatId::from_raw`] returns `None` for them.

use serde::{Deserialize, Serialize};
use wgpu::{AstcBlock, AstcChannel, TextureFormat};

/// Identifier of a compressed format variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum FormatId {
    Astc4x4Rgb = 0,
    Astc4x4Rgba = 1,
    EacR = 4,
    EacRg = 5,
    Etc2Rgb = 6,
    Etc2Rgba = 7,
    Bc1Rgb = 9,
    Bc3Rgba = 10,
    Bc4R = 13,
    Bc5Rg = 14,
    Bc7Rgb = 16,
    Bc7Rgba = 17,
}

impl FormatId {
    /// All selectable ids, in numeric order.
    pub const ALL: [FormatId; 12] = [
        FormatId::Astc4x4Rgb,
        FormatId::Astc4x4Rgba,
        FormatId::EacR,
        FormatId::EacRg,
        FormatId::Etc2Rgb,
        FormatId::Etc2Rgba,
        FormatId::Bc1Rgb,
        FormatId::Bc3Rgba,
        FormatId::Bc4R,
        FormatId::Bc5Rg,
        FormatId::Bc7Rgb,
        FormatId::Bc7Rgba,
    ];

    /// Map a raw numeric id to a format. Reserved ids yield `None`.
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| *id as u8 == raw)
    }

    /// Descriptor for this id.
    pub fn descriptor(self) -> &'static FormatDescriptor {
        // The table is indexed in the same order as ALL.
        let index = Self::ALL
            .iter()
            .position(|id| *id == self)
            .unwrap_or_default();
        &FORMATS[index]
    }

    /// Canonical display name, e.g. `"bc7-rgb"`.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Look up an exact name or alias.
    pub fn from_alias(alias: &str) -> Option<Self> {
        ALIASES
            .iter()
            .find(|(name, _)| *name == alias)
            .map(|(_, id)| *id)
    }
}

impl TryFrom<u8> for FormatId {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        FormatId::from_raw(raw).ok_or_else(|| format!("reserved or unknown format id {}", raw))
    }
}

impl From<FormatId> for u8 {
    fn from(id: FormatId) -> u8 {
        id as u8
    }
}

impl std::fmt::Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Uncompressed integer format the immediate-mode backend renders blocks into
/// before reading them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingFormat {
    /// One 8-byte block per texel.
    Rgba16Uint,
    /// One 16-byte block per texel.
    Rgba32Uint,
}

/// Immutable description of one compressed format.
#[derive(Debug, Clone, Copy)]
pub struct FormatDescriptor {
    pub id: FormatId,
    /// Canonical name
    pub name: &'static str,
    /// Bytes per 4x4 block (8 or 16)
    pub block_bytes: u32,
    /// Meaningful channels: 1 = R, 2 = RG, 3 = RGB, 4 = RGBA
    pub channels: u8,
    /// Whether an sRGB variant exists
    pub is_rgb: bool,
    /// Compression ratio against the smallest uncompressed equivalent
    pub ratio: u32,
    /// Compute kernel file for the wgpu backend
    pub wgsl_kernel: &'static str,
    /// Fragment kernel file for the GL backend, if one exists
    pub glsl_kernel: Option<&'static str>,
    /// wgpu texture formats (linear, sRGB)
    pub wgpu_formats: (TextureFormat, TextureFormat),
    /// GL internal formats (linear, sRGB), if the GL backend can produce it
    pub gl_formats: Option<(u32, u32)>,
    /// Render target format used for GL read-back
    pub staging: StagingFormat,
}

impl FormatDescriptor {
    /// wgpu format for the requested colour space. sRGB is ignored for
    /// formats without an sRGB variant.
    pub fn wgpu_format(&self, srgb: bool) -> TextureFormat {
        if srgb && self.is_rgb {
            self.wgpu_formats.1
        } else {
            self.wgpu_formats.0
        }
    }

    /// GL internal format for the requested colour space.
    pub fn gl_format(&self, srgb: bool) -> Option<u32> {
        self.gl_formats
            .map(|(linear, srgb_format)| if srgb && self.is_rgb { srgb_format } else { linear })
    }
}

const GL_COMPRESSED_RGBA_ASTC_4X4_KHR: u32 = 0x93b0;
const GL_COMPRESSED_SRGB8_ALPHA8_ASTC_4X4_KHR: u32 = 0x93d0;
const GL_COMPRESSED_RGBA_BPTC_UNORM: u32 = 0x8e8c;
const GL_COMPRESSED_SRGB_ALPHA_BPTC_UNORM: u32 = 0x8e8d;
const GL_COMPRESSED_RGB_S3TC_DXT1_EXT: u32 = 0x83f0;
const GL_COMPRESSED_SRGB_S3TC_DXT1_EXT: u32 = 0x8c4c;
const GL_COMPRESSED_RED_RGTC1: u32 = 0x8dbb;
const GL_COMPRESSED_RG_RGTC2: u32 = 0x8dbd;
const GL_COMPRESSED_RGB8_ETC2: u32 = 0x9274;
const GL_COMPRESSED_SRGB8_ETC2: u32 = 0x9275;
const GL_COMPRESSED_R11_EAC: u32 = 0x9270;
const GL_COMPRESSED_RG11_EAC: u32 = 0x9272;

const ASTC_4X4: TextureFormat = TextureFormat::Astc {
    block: AstcBlock::B4x4,
    channel: AstcChannel::Unorm,
};
const ASTC_4X4_SRGB: TextureFormat = TextureFormat::Astc {
    block: AstcBlock::B4x4,
    channel: AstcChannel::UnormSrgb,
};

/// The format table, same order as [`FormatId::ALL`].
pub static FORMATS: [FormatDescriptor; 12] = [
    FormatDescriptor {
        id: FormatId::Astc4x4Rgb,
        name: "astc-4x4-rgb",
        block_bytes: 16,
        channels: 3,
        is_rgb: true,
        ratio: 4,
        wgsl_kernel: "spark_astc_rgb.wgsl",
        glsl_kernel: Some("spark_astc_rgb.glsl"),
        wgpu_formats: (ASTC_4X4, ASTC_4X4_SRGB),
        gl_formats: Some((GL_COMPRESSED_RGBA_ASTC_4X4_KHR, GL_COMPRESSED_SRGB8_ALPHA8_ASTC_4X4_KHR)),
        staging: StagingFormat::Rgba32Uint,
    },
    FormatDescriptor {
        id: FormatId::Astc4x4Rgba,
        name: "astc-4x4-rgba",
        block_bytes: 16,
        channels: 4,
        is_rgb: true,
        ratio: 4,
        wgsl_kernel: "spark_astc_rgba.wgsl",
        glsl_kernel: Some("spark_astc_rgba.glsl"),
        wgpu_formats: (ASTC_4X4, ASTC_4X4_SRGB),
        gl_formats: Some((GL_COMPRESSED_RGBA_ASTC_4X4_KHR, GL_COMPRESSED_SRGB8_ALPHA8_ASTC_4X4_KHR)),
        staging: StagingFormat::Rgba32Uint,
    },
    FormatDescriptor {
        id: FormatId::EacR,
        name: "eac-r",
        block_bytes: 8,
        channels: 1,
        is_rgb: false,
        ratio: 2,
        wgsl_kernel: "spark_eac_r.wgsl",
        glsl_kernel: Some("spark_eac_r.glsl"),
        wgpu_formats: (TextureFormat::EacR11Unorm, TextureFormat::EacR11Unorm),
        gl_formats: Some((GL_COMPRESSED_R11_EAC, GL_COMPRESSED_R11_EAC)),
        staging: StagingFormat::Rgba16Uint,
    },
    FormatDescriptor {
        id: FormatId::EacRg,
        name: "eac-rg",
        block_bytes: 16,
        channels: 2,
        is_rgb: false,
        ratio: 2,
        wgsl_kernel: "spark_eac_rg.wgsl",
        glsl_kernel: Some("spark_eac_rg.glsl"),
        wgpu_formats: (TextureFormat::EacRg11Unorm, TextureFormat::EacRg11Unorm),
        gl_formats: Some((GL_COMPRESSED_RG11_EAC, GL_COMPRESSED_RG11_EAC)),
        staging: StagingFormat::Rgba32Uint,
    },
    FormatDescriptor {
        id: FormatId::Etc2Rgb,
        name: "etc2-rgb",
        block_bytes: 8,
        channels: 3,
        is_rgb: true,
        ratio: 8,
        wgsl_kernel: "spark_etc2_rgb.wgsl",
        glsl_kernel: Some("spark_etc2_rgb.glsl"),
        wgpu_formats: (TextureFormat::Etc2Rgb8Unorm, TextureFormat::Etc2Rgb8UnormSrgb),
        gl_formats: Some((GL_COMPRESSED_RGB8_ETC2, GL_COMPRESSED_SRGB8_ETC2)),
        staging: StagingFormat::Rgba16Uint,
    },
    FormatDescriptor {
        id: FormatId::Etc2Rgba,
        name: "etc2-rgba",
        block_bytes: 16,
        channels: 4,
        is_rgb: true,
        ratio: 4,
        wgsl_kernel: "spark_etc2_rgba.wgsl",
        glsl_kernel: None,
        wgpu_formats: (TextureFormat::Etc2Rgba8Unorm, TextureFormat::Etc2Rgba8UnormSrgb),
        gl_formats: None,
        staging: StagingFormat::Rgba32Uint,
    },
    FormatDescriptor {
        id: FormatId::Bc1Rgb,
        name: "bc1-rgb",
        block_bytes: 8,
        channels: 3,
        is_rgb: true,
        ratio: 8,
        wgsl_kernel: "spark_bc1_rgb.wgsl",
        glsl_kernel: Some("spark_bc1_rgb.glsl"),
        wgpu_formats: (TextureFormat::Bc1RgbaUnorm, TextureFormat::Bc1RgbaUnormSrgb),
        gl_formats: Some((GL_COMPRESSED_RGB_S3TC_DXT1_EXT, GL_COMPRESSED_SRGB_S3TC_DXT1_EXT)),
        staging: StagingFormat::Rgba16Uint,
    },
    FormatDescriptor {
        id: FormatId::Bc3Rgba,
        name: "bc3-rgba",
        block_bytes: 16,
        channels: 4,
        is_rgb: true,
        ratio: 4,
        wgsl_kernel: "spark_bc3_rgba.wgsl",
        glsl_kernel: None,
        wgpu_formats: (TextureFormat::Bc3RgbaUnorm, TextureFormat::Bc3RgbaUnormSrgb),
        gl_formats: None,
        staging: StagingFormat::Rgba32Uint,
    },
    FormatDescriptor {
        id: FormatId::Bc4R,
        name: "bc4-r",
        block_bytes: 8,
        channels: 1,
        is_rgb: false,
        ratio: 2,
        wgsl_kernel: "spark_bc4_r.wgsl",
        glsl_kernel: Some("spark_bc4_r.glsl"),
        wgpu_formats: (TextureFormat::Bc4RUnorm, TextureFormat::Bc4RUnorm),
        gl_formats: Some((GL_COMPRESSED_RED_RGTC1, GL_COMPRESSED_RED_RGTC1)),
        staging: StagingFormat::Rgba16Uint,
    },
    FormatDescriptor {
        id: FormatId::Bc5Rg,
        name: "bc5-rg",
        block_bytes: 16,
        channels: 2,
        is_rgb: false,
        ratio: 2,
        wgsl_kernel: "spark_bc5_rg.wgsl",
        glsl_kernel: Some("spark_bc5_rg.glsl"),
        wgpu_formats: (TextureFormat::Bc5RgUnorm, TextureFormat::Bc5RgUnorm),
        gl_formats: Some((GL_COMPRESSED_RG_RGTC2, GL_COMPRESSED_RG_RGTC2)),
        staging: StagingFormat::Rgba32Uint,
    },
    FormatDescriptor {
        id: FormatId::Bc7Rgb,
        name: "bc7-rgb",
        block_bytes: 16,
        channels: 3,
        is_rgb: true,
        ratio: 4,
        wgsl_kernel: "spark_bc7_rgb.wgsl",
        glsl_kernel: Some("spark_bc7_rgb.glsl"),
        wgpu_formats: (TextureFormat::Bc7RgbaUnorm, TextureFormat::Bc7RgbaUnormSrgb),
        gl_formats: Some((GL_COMPRESSED_RGBA_BPTC_UNORM, GL_COMPRESSED_SRGB_ALPHA_BPTC_UNORM)),
        staging: StagingFormat::Rgba32Uint,
    },
    FormatDescriptor {
        id: FormatId::Bc7Rgba,
        name: "bc7-rgba",
        block_bytes: 16,
        channels: 4,
        is_rgb: true,
        ratio: 4,
        wgsl_kernel: "spark_bc7_rgba.wgsl",
        glsl_kernel: Some("spark_bc7_rgba.glsl"),
        wgpu_formats: (TextureFormat::Bc7RgbaUnorm, TextureFormat::Bc7RgbaUnormSrgb),
        gl_formats: Some((GL_COMPRESSED_RGBA_BPTC_UNORM, GL_COMPRESSED_SRGB_ALPHA_BPTC_UNORM)),
        staging: StagingFormat::Rgba32Uint,
    },
];

/// Exact names and aliases. Canonical names come first so that reverse
/// lookups reproduce them.
pub static ALIASES: &[(&str, FormatId)] = &[
    ("astc-4x4-rgb", FormatId::Astc4x4Rgb),
    ("astc-4x4-rgba", FormatId::Astc4x4Rgba),
    ("eac-r", FormatId::EacR),
    ("eac-rg", FormatId::EacRg),
    ("etc2-rgb", FormatId::Etc2Rgb),
    ("etc2-rgba", FormatId::Etc2Rgba),
    ("bc1-rgb", FormatId::Bc1Rgb),
    ("bc3-rgba", FormatId::Bc3Rgba),
    ("bc4-r", FormatId::Bc4R),
    ("bc5-rg", FormatId::Bc5Rg),
    ("bc7-rgb", FormatId::Bc7Rgb),
    ("bc7-rgba", FormatId::Bc7Rgba),
    // Short ASTC names
    ("astc-rgb", FormatId::Astc4x4Rgb),
    ("astc-rgba", FormatId::Astc4x4Rgba),
    // WebGPU texture format names
    ("bc1-rgba-unorm", FormatId::Bc1Rgb),
    ("bc1-rgba-unorm-srgb", FormatId::Bc1Rgb),
    ("bc3-rgba-unorm", FormatId::Bc3Rgba),
    ("bc3-rgba-unorm-srgb", FormatId::Bc3Rgba),
    ("bc4-r-unorm", FormatId::Bc4R),
    ("bc5-rg-unorm", FormatId::Bc5Rg),
    ("bc7-rgba-unorm", FormatId::Bc7Rgba),
    ("bc7-rgba-unorm-srgb", FormatId::Bc7Rgba),
    ("etc2-rgb8unorm", FormatId::Etc2Rgb),
    ("etc2-rgb8unorm-srgb", FormatId::Etc2Rgb),
    ("etc2-rgba8unorm", FormatId::Etc2Rgba),
    ("etc2-rgba8unorm-srgb", FormatId::Etc2Rgba),
    ("eac-r11unorm", FormatId::EacR),
    ("eac-rg11unorm", FormatId::EacRg),
    ("astc-4x4-unorm", FormatId::Astc4x4Rgba),
    ("astc-4x4-unorm-srgb", FormatId::Astc4x4Rgba),
];
