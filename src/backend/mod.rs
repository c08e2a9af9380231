//! GPU execution backends
//!
//! The orchestrator is written against [`GpuBackend`]. Two implementations
//! exist: [`webgpu::WgpuBackend`] records compute passes and needs no state
//! guard, [`gl::GlBackend`] renders through an immediate-mode context it shares
//! with the host and snapshots that context around every encode.

pub mod gl;
pub mod webgpu;

use futures::future::BoxFuture;
use image::RgbaImage;

use crate::capability::CapabilitySet;
use crate::channels::{ChannelCount, ChannelCounters};
use crate::error::Result;
use crate::format::FormatDescriptor;
use crate::layout::MipLevel;
use crate::options::WrapMode;
use crate::program_cache::ProgramCompiler;
use crate::state::StatefulDevice;

/// One mip level of an encode dispatch.
#[derive(Debug, Clone, Copy)]
pub struct LevelDispatch<'a> {
    /// Level index in the mip chain
    pub index: u32,
    /// Total number of levels being encoded
    pub count: u32,
    pub level: &'a MipLevel,
}

impl LevelDispatch<'_> {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }
}

/// Abstract execution interface used by the encoder.
///
/// Methods that record work take the backend's `Recorder`; nothing recorded
/// is guaranteed to execute before [`submit`](Self::submit). Temporary
/// resources are owned values and are released when dropped.
pub trait GpuBackend: ProgramCompiler + StatefulDevice {
    type Texture;
    type Buffer;
    type Recorder;

    /// Human-readable device/context description.
    fn describe(&self) -> String;

    /// Formats this device can produce, computed once at creation.
    fn capabilities(&self) -> &CapabilitySet;

    /// Buffer row alignment for block copies, `None` for tight packing.
    fn row_alignment(&self) -> Option<u32>;

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32);

    /// Channel count implied by the texture's own format (one- and
    /// two-channel formats only).
    fn texture_channel_hint(&self, texture: &Self::Texture) -> Option<ChannelCount>;

    fn texture_is_srgb(&self, texture: &Self::Texture) -> bool;

    /// Run the counting pass over a device texture and read back the counters.
    fn count_channels<'a>(
        &'a self,
        texture: &'a Self::Texture,
    ) -> BoxFuture<'a, Result<ChannelCounters>>;

    fn begin_commands(&self) -> Result<Self::Recorder>;

    /// Upload host pixels into a new RGBA8 texture with room for `mip_count`
    /// levels.
    fn upload_pixels(
        &self,
        recorder: &mut Self::Recorder,
        image: &RgbaImage,
        mip_count: u32,
        srgb: bool,
    ) -> Result<Self::Texture>;

    /// Blank RGBA8 texture that preprocessing and mip generation can write.
    fn create_work_texture(
        &self,
        width: u32,
        height: u32,
        mip_count: u32,
        srgb: bool,
    ) -> Result<Self::Texture>;

    /// Resample `src` into level 0 of `dst`, optionally flipping vertically.
    fn preprocess(
        &self,
        recorder: &mut Self::Recorder,
        src: &Self::Texture,
        dst: &Self::Texture,
        flip_y: bool,
        srgb: bool,
    ) -> Result<()>;

    /// Box-filter levels `1..mip_count` from level 0.
    fn generate_mipmaps(
        &self,
        recorder: &mut Self::Recorder,
        texture: &Self::Texture,
        mip_count: u32,
        srgb: bool,
    ) -> Result<()>;

    fn create_output_texture(
        &self,
        format: &FormatDescriptor,
        width: u32,
        height: u32,
        mip_count: u32,
        srgb: bool,
        wrap: WrapMode,
    ) -> Result<Self::Texture>;

    /// Shared buffer receiving every encoded level.
    fn create_packed_buffer(&self, size: u64) -> Result<Self::Buffer>;

    /// Encode one level of `input` into its range of `buffer`.
    fn encode_level(
        &self,
        recorder: &mut Self::Recorder,
        program: &Self::Program,
        input: &Self::Texture,
        buffer: &Self::Buffer,
        format: &FormatDescriptor,
        dispatch: LevelDispatch<'_>,
    ) -> Result<()>;

    /// Copy one level's range of `buffer` into the compressed texture.
    fn copy_level(
        &self,
        recorder: &mut Self::Recorder,
        buffer: &Self::Buffer,
        output: &Self::Texture,
        format: &FormatDescriptor,
        srgb: bool,
        dispatch: LevelDispatch<'_>,
    ) -> Result<()>;

    fn submit(&self, recorder: Self::Recorder) -> Result<()>;

    /// GPU time of the most recent encode dispatch, if the device records
    /// timestamps.
    fn read_elapsed_ms(&self) -> BoxFuture<'_, Result<Option<f64>>>;
}
