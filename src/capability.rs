//! Format capability detection and selector resolution
//!
//! Devices report compression support as coarse features (one BC feature
//! unlocks several BC formats at once). [`CapabilitySet`] is computed once per
//! device from those features and then drives [`resolve`], which lets callers
//! ask for exact formats (`"bc7-rgba"`), coarse intents (`"rgb"`, `"astc"`) or
//! numeric ids.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::channels::ChannelCount;
use crate::error::{EncodeError, Result};
use crate::format::FormatId;

/// A device feature that unlocks a group of compressed formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFeature {
    /// All BC formats (WebGPU/wgpu `texture-compression-bc`)
    Bc,
    /// ETC2 + EAC (wgpu `texture-compression-etc2`, GL `WEBGL_compressed_texture_etc`)
    Etc2,
    /// ASTC LDR
    Astc,
    /// BC1 only (GL S3TC extension)
    S3tc,
    /// BC4 + BC5 (GL RGTC extension)
    Rgtc,
    /// BC7 (GL BPTC extension)
    Bptc,
}

impl CompressionFeature {
    /// Formats unlocked by this feature.
    pub fn formats(self) -> &'static [FormatId] {
        match self {
            CompressionFeature::Bc => &[
                FormatId::Bc1Rgb,
                FormatId::Bc3Rgba,
                FormatId::Bc4R,
                FormatId::Bc5Rg,
                FormatId::Bc7Rgb,
                FormatId::Bc7Rgba,
            ],
            CompressionFeature::Etc2 => &[
                FormatId::Etc2Rgb,
                FormatId::Etc2Rgba,
                FormatId::EacR,
                FormatId::EacRg,
            ],
            CompressionFeature::Astc => &[FormatId::Astc4x4Rgb, FormatId::Astc4x4Rgba],
            CompressionFeature::S3tc => &[FormatId::Bc1Rgb],
            CompressionFeature::Rgtc => &[FormatId::Bc4R, FormatId::Bc5Rg],
            CompressionFeature::Bptc => &[FormatId::Bc7Rgb, FormatId::Bc7Rgba],
        }
    }
}

/// Formats supported by one device/context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    formats: BTreeSet<FormatId>,
}

impl CapabilitySet {
    /// Build the set from the features a device reports.
    pub fn from_features<I>(features: I) -> Self
    where
        I: IntoIterator<Item = CompressionFeature>,
    {
        let formats = features
            .into_iter()
            .flat_map(|feature| feature.formats().iter().copied())
            .collect();
        Self { formats }
    }

    /// Drop formats a backend cannot produce (no kernel or no format token).
    pub fn retain<F>(mut self, keep: F) -> Self
    where
        F: Fn(FormatId) -> bool,
    {
        self.formats.retain(|id| keep(*id));
        self
    }

    pub fn contains(&self, id: FormatId) -> bool {
        self.formats.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Supported ids in numeric order.
    pub fn iter(&self) -> impl Iterator<Item = FormatId> + '_ {
        self.formats.iter().copied()
    }

    /// Canonical names of supported formats.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(FormatId::name).collect()
    }

    /// First supported format from a list of candidates.
    pub fn first_supported(&self, candidates: &[FormatId]) -> Option<FormatId> {
        candidates.iter().copied().find(|id| self.contains(*id))
    }
}

impl FromIterator<FormatId> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = FormatId>>(iter: T) -> Self {
        Self {
            formats: iter.into_iter().collect(),
        }
    }
}

/// How a caller chooses the output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatSelector {
    /// Explicit numeric id
    Id(FormatId),
    /// Exact name/alias, or a substring such as `"rgb"` or `"astc"`.
    /// The string `"auto"` is parsed into [`FormatSelector::Auto`] by
    /// [`FormatSelector::parse`].
    Name(String),
    /// Analyse the image and pick a format
    Auto,
}

impl FormatSelector {
    /// Parse a user string, recognising `"auto"`.
    pub fn parse(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        if value == "auto" {
            FormatSelector::Auto
        } else {
            FormatSelector::Name(value)
        }
    }

    pub fn is_auto(&self) -> bool {
        match self {
            FormatSelector::Auto => true,
            FormatSelector::Name(name) => name.eq_ignore_ascii_case("auto"),
            FormatSelector::Id(_) => false,
        }
    }

    /// Whether the selector itself asks for an sRGB variant.
    pub fn implies_srgb(&self) -> bool {
        matches!(self, FormatSelector::Name(name) if name.to_ascii_lowercase().ends_with("srgb"))
    }
}

impl From<FormatId> for FormatSelector {
    fn from(id: FormatId) -> Self {
        FormatSelector::Id(id)
    }
}

impl From<&str> for FormatSelector {
    fn from(value: &str) -> Self {
        FormatSelector::parse(value)
    }
}

/// Substring matching order: ascending channel count, then descending quality.
const PREFERENCE_ORDER: &[&str] = &[
    "bc4-r",
    "eac-r",
    "bc5-rg",
    "eac-rg",
    "bc7-rgb",
    "astc-rgb",
    "astc-4x4-rgb",
    "bc1-rgb",
    "etc2-rgb",
    "bc7-rgba",
    "astc-rgba",
    "astc-4x4-rgba",
    "bc3-rgba",
    "etc2-rgba",
];

/// Same as [`PREFERENCE_ORDER`] with the smaller 8-byte RGB formats first.
const LOW_QUALITY_PREFERENCE_ORDER: &[&str] = &[
    "bc4-r",
    "eac-r",
    "bc5-rg",
    "eac-rg",
    "bc1-rgb",
    "etc2-rgb",
    "bc7-rgb",
    "astc-rgb",
    "astc-4x4-rgb",
    "bc7-rgba",
    "astc-rgba",
    "astc-4x4-rgba",
    "bc3-rgba",
    "etc2-rgba",
];

const RGBA_CANDIDATES: &[FormatId] = &[
    FormatId::Bc7Rgba,
    FormatId::Astc4x4Rgba,
    FormatId::Bc3Rgba,
    FormatId::Etc2Rgba,
];
const RGB_CANDIDATES: &[FormatId] = &[
    FormatId::Bc7Rgb,
    FormatId::Astc4x4Rgb,
    FormatId::Bc1Rgb,
    FormatId::Etc2Rgb,
];
const RG_CANDIDATES: &[FormatId] = &[FormatId::Bc5Rg, FormatId::EacRg];
const R_CANDIDATES: &[FormatId] = &[FormatId::Bc4R, FormatId::EacR];

/// Resolve a non-auto selector against the device capabilities.
///
/// Order: explicit id, exact alias, then substring match over the preference
/// list. `Auto` must be resolved through [`select_for_channels`] by the caller.
pub fn resolve(
    selector: &FormatSelector,
    capabilities: &CapabilitySet,
    prefer_low_quality: bool,
) -> Result<FormatId> {
    match selector {
        FormatSelector::Id(id) => {
            if capabilities.contains(*id) {
                Ok(*id)
            } else {
                Err(EncodeError::UnsupportedFormat(id.name().to_string()))
            }
        }
        FormatSelector::Name(name) => resolve_name(name, capabilities, prefer_low_quality),
        FormatSelector::Auto => Err(EncodeError::UnsupportedFormat(
            "auto selection needs image analysis".to_string(),
        )),
    }
}

fn resolve_name(name: &str, capabilities: &CapabilitySet, prefer_low_quality: bool) -> Result<FormatId> {
    let name = name.trim().to_ascii_lowercase();

    if let Some(id) = FormatId::from_alias(&name) {
        if capabilities.contains(id) {
            return Ok(id);
        }
    }

    let order = if prefer_low_quality {
        LOW_QUALITY_PREFERENCE_ORDER
    } else {
        PREFERENCE_ORDER
    };

    let matched = order
        .iter()
        .filter(|key| key.contains(name.as_str()))
        .filter_map(|key| FormatId::from_alias(key))
        .find(|id| capabilities.contains(*id));

    matched.ok_or(EncodeError::UnsupportedFormat(name))
}

/// Best supported format for a detected or hinted channel count.
pub fn select_for_channels(channels: ChannelCount, capabilities: &CapabilitySet) -> Result<FormatId> {
    let candidates = match channels {
        ChannelCount::Rgba => RGBA_CANDIDATES,
        ChannelCount::Rgb => RGB_CANDIDATES,
        ChannelCount::Rg => RG_CANDIDATES,
        ChannelCount::R => R_CANDIDATES,
    };

    capabilities.first_supported(candidates).ok_or_else(|| {
        EncodeError::UnsupportedFormat(format!("no supported format for {} channels", channels.count()))
    })
}
