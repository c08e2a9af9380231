//! Encoder and per-call configuration
//!
//! Both structs deserialize from JSON with every field optional, using the
//! same camelCase keys hosts already pass around (`flipY`, `preferLowQuality`).

use serde::{Deserialize, Serialize};

use crate::capability::FormatSelector;

/// Which programs to compile when the encoder is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PreloadRepr", into = "PreloadRepr")]
pub enum Preload {
    #[default]
    None,
    /// Every format the device supports
    All,
    /// Only these selectors, resolved against the device capabilities
    Formats(Vec<String>),
}

/// JSON form: `true`/`false` or a list of format names.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PreloadRepr {
    Flag(bool),
    Formats(Vec<String>),
}

impl From<PreloadRepr> for Preload {
    fn from(repr: PreloadRepr) -> Self {
        match repr {
            PreloadRepr::Flag(true) => Preload::All,
            PreloadRepr::Flag(false) => Preload::None,
            PreloadRepr::Formats(formats) => Preload::Formats(formats),
        }
    }
}

impl From<Preload> for PreloadRepr {
    fn from(preload: Preload) -> Self {
        match preload {
            Preload::None => PreloadRepr::Flag(false),
            Preload::All => PreloadRepr::Flag(true),
            Preload::Formats(formats) => PreloadRepr::Formats(formats),
        }
    }
}

/// Options fixed for the lifetime of an encoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
    /// Programs to compile up front
    #[serde(default)]
    pub preload: Preload,

    /// Log per-encode details at info level instead of debug
    #[serde(default)]
    pub verbose: bool,

    /// Check compile/link status of immediate-mode programs
    #[serde(default)]
    pub validate_shaders: bool,
}

/// Texture addressing mode for the produced texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    #[default]
    Repeat,
    Mirror,
    Clamp,
}

impl std::str::FromStr for WrapMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "repeat" => Ok(WrapMode::Repeat),
            "mirror" => Ok(WrapMode::Mirror),
            "clamp" => Ok(WrapMode::Clamp),
            other => Err(format!("unknown wrap mode: {}", other)),
        }
    }
}

/// Per-call encode request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeOptions {
    /// Format id, name, channel mask (`"rgb"`) or `"auto"`. Defaults to
    /// `"rgb"`, or `"rgba"` with `alpha`.
    #[serde(default)]
    pub format: Option<FormatSelector>,

    /// Generate and encode a full mip chain
    #[serde(default, alias = "generateMipmaps")]
    pub mips: bool,

    /// Encode into the sRGB variant when the format has one
    #[serde(default)]
    pub srgb: bool,

    /// The image is a normal map (auto selection favours two-channel formats)
    #[serde(default)]
    pub normal: bool,

    /// Flip the image vertically before encoding
    #[serde(default)]
    pub flip_y: bool,

    #[serde(default)]
    pub wrap: WrapMode,

    /// Prefer smaller 8-byte RGB formats when matching coarse selectors
    #[serde(default)]
    pub prefer_low_quality: bool,

    /// The image has meaningful alpha (auto selection favours RGBA formats)
    #[serde(default)]
    pub alpha: bool,
}

impl EncodeOptions {
    /// The selector to resolve, applying the `"rgb"`/`"rgba"` default.
    pub fn selector(&self) -> FormatSelector {
        match &self.format {
            Some(FormatSelector::Name(name)) => FormatSelector::parse(name),
            Some(selector) => selector.clone(),
            None if self.alpha => FormatSelector::Name("rgba".to_string()),
            None => FormatSelector::Name("rgb".to_string()),
        }
    }

    /// Whether the format is missing or `"auto"`.
    pub fn wants_auto(&self) -> bool {
        self.format.as_ref().map_or(true, FormatSelector::is_auto)
    }
}
