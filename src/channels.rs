//! Channel count detection for automatic format selection
//!
//! Two producers feed the same [`ChannelCounters`]: a CPU sampler over decoded
//! RGBA8 pixels and a GPU counting pass (see the backends). Classification is
//! shared so both paths agree on thresholds.

/// Maximum number of pixels the CPU detector inspects.
pub const MAX_CPU_SAMPLES: usize = 1024 * 128;

/// A sample is a plausible normal if its length is within this of 1.0.
const NORMAL_LENGTH_TOLERANCE: f32 = 0.2;

/// Normals must not point away from the surface by more than this.
const NORMAL_MIN_Z: f32 = -0.1;

/// Effective channel count of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelCount {
    R,
    Rg,
    Rgb,
    Rgba,
}

impl ChannelCount {
    pub fn count(self) -> u8 {
        match self {
            ChannelCount::R => 1,
            ChannelCount::Rg => 2,
            ChannelCount::Rgb => 3,
            ChannelCount::Rgba => 4,
        }
    }
}

/// Raw statistics gathered over a set of pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCounters {
    /// Pixels inspected
    pub samples: u64,
    /// Pixels with alpha below 255
    pub non_opaque: u64,
    /// Pixels where R, G and B differ
    pub non_grayscale: u64,
    /// Pixels that do not decode to a unit vector with non-negative Z
    pub invalid_normals: u64,
}

impl ChannelCounters {
    /// Decide the channel count.
    ///
    /// Not opaque -> 4, grayscale -> 1, fewer than 1/16 invalid normals -> 2,
    /// otherwise 3.
    pub fn classify(&self) -> ChannelCount {
        if self.non_opaque > 0 {
            ChannelCount::Rgba
        } else if self.non_grayscale == 0 {
            ChannelCount::R
        } else if self.invalid_normals * 16 < self.samples {
            ChannelCount::Rg
        } else {
            ChannelCount::Rgb
        }
    }

    /// Fold one RGBA8 pixel into the counters.
    pub fn add_pixel(&mut self, pixel: [u8; 4]) {
        let [r, g, b, a] = pixel;
        self.samples += 1;
        if a < u8::MAX {
            self.non_opaque += 1;
        }
        if r != g || g != b {
            self.non_grayscale += 1;
        }
        if !is_plausible_normal(r, g, b) {
            self.invalid_normals += 1;
        }
    }
}

/// Whether an RGB triple, remapped to [-1, 1], is close to a unit vector
/// facing outwards.
pub fn is_plausible_normal(r: u8, g: u8, b: u8) -> bool {
    let unorm = |v: u8| 2.0 * (v as f32 / 255.0) - 1.0;
    let (x, y, z) = (unorm(r), unorm(g), unorm(b));
    let len = (x * x + y * y + z * z).sqrt();
    (len - 1.0).abs() <= NORMAL_LENGTH_TOLERANCE && z >= NORMAL_MIN_Z
}

/// Gather counters from tightly packed RGBA8 pixels.
///
/// Images larger than [`MAX_CPU_SAMPLES`] pixels are sampled at an even
/// stride so the whole image is covered.
pub fn count_channels_rgba8(pixels: &[u8]) -> ChannelCounters {
    let pixel_count = pixels.len() / 4;
    let stride = pixel_count.div_ceil(MAX_CPU_SAMPLES).max(1);

    let mut counters = ChannelCounters::default();
    for pixel in pixels.chunks_exact(4).step_by(stride) {
        counters.add_pixel([pixel[0], pixel[1], pixel[2], pixel[3]]);
    }
    counters
}

/// CPU detector: sample the pixels and classify.
pub fn detect_channels_rgba8(pixels: &[u8]) -> ChannelCount {
    count_channels_rgba8(pixels).classify()
}
