//! Encode orchestration
//!
//! [`Encoder`] owns one device session: the backend, its capability set and
//! the program cache. An encode resolves the format, plans the mip layout,
//! obtains the program and only then snapshots device state; everything
//! after the snapshot is recorded without suspending.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::backend::{GpuBackend, LevelDispatch};
use crate::capability::{resolve, select_for_channels, FormatSelector};
use crate::channels::{detect_channels_rgba8, ChannelCount};
use crate::error::{EncodeError, Result};
use crate::format::FormatId;
use crate::kernels::KernelSource;
use crate::layout::{plan_layout, round_to_block};
use crate::options::{EncodeOptions, EncoderConfig, Preload, WrapMode};
use crate::program_cache::ProgramCache;
use crate::source::{FileImageLoader, ImageLoader, ImageSource, ResolvedSource};
use crate::state::StateGuard;

/// A compressed texture and the metadata a host needs to sample it.
#[derive(Debug)]
pub struct CompressedTexture<T> {
    pub texture: T,
    pub format: FormatId,
    /// Canonical format name
    pub name: &'static str,
    /// Storage size, rounded up to whole blocks
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub srgb: bool,
    pub wrap: WrapMode,
}

impl<T> CompressedTexture<T> {
    /// Bytes of compressed data across all levels.
    pub fn byte_size(&self) -> u64 {
        let block_bytes = self.format.descriptor().block_bytes as u64;
        (0..self.mip_count)
            .map(|level| {
                let w = (self.width >> level).max(1).div_ceil(4) as u64;
                let h = (self.height >> level).max(1).div_ceil(4) as u64;
                w * h * block_bytes
            })
            .sum()
    }
}

/// Block-compression encoder bound to one device or context.
pub struct Encoder<B: GpuBackend> {
    backend: Arc<B>,
    programs: ProgramCache<B>,
    loader: Arc<dyn ImageLoader>,
    config: EncoderConfig,
}

impl<B: GpuBackend> Encoder<B> {
    /// Create an encoder that loads URL sources from local files.
    pub fn new(backend: B, kernels: Arc<dyn KernelSource>, config: EncoderConfig) -> Self {
        Self::with_loader(backend, kernels, Arc::new(FileImageLoader), config)
    }

    pub fn with_loader(
        backend: B,
        kernels: Arc<dyn KernelSource>,
        loader: Arc<dyn ImageLoader>,
        config: EncoderConfig,
    ) -> Self {
        let backend = Arc::new(backend);
        let programs = ProgramCache::new(Arc::clone(&backend), kernels);

        info!(
            "Encoder ready on {}: {}",
            backend.describe(),
            backend.capabilities().names().join(", ")
        );

        let encoder = Self {
            backend,
            programs,
            loader,
            config,
        };
        encoder.start_preload();
        encoder
    }

    fn start_preload(&self) {
        let capabilities = self.backend.capabilities();
        match &self.config.preload {
            Preload::None => {}
            Preload::All => {
                debug!("Preloading {} programs", capabilities.len());
                self.programs.preload(capabilities.iter());
            }
            Preload::Formats(names) => {
                let formats: Vec<FormatId> = names
                    .iter()
                    .filter_map(|name| {
                        match resolve(&FormatSelector::parse(name), capabilities, false) {
                            Ok(id) => Some(id),
                            Err(e) => {
                                warn!("Skipping preload of {}: {}", name, e);
                                None
                            }
                        }
                    })
                    .collect();
                debug!("Preloading {} programs", formats.len());
                self.programs.preload(formats);
            }
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn programs(&self) -> &ProgramCache<B> {
        &self.programs
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Names of every format this device can produce.
    pub fn supported_formats(&self) -> Vec<&'static str> {
        self.backend.capabilities().names()
    }

    /// `(name, compression ratio)` for every supported format.
    pub fn enumerate_supported_formats(&self) -> Vec<(&'static str, u32)> {
        self.backend
            .capabilities()
            .iter()
            .map(|id| {
                let desc = id.descriptor();
                (desc.name, desc.ratio)
            })
            .collect()
    }

    /// Whether an exact format name or alias is supported.
    pub fn is_format_supported(&self, name: &str) -> bool {
        FormatId::from_alias(&name.trim().to_ascii_lowercase())
            .is_some_and(|id| self.backend.capabilities().contains(id))
    }

    /// Resolve `"auto"` (or a missing format) into an explicit one, and fill
    /// in the hints a host would otherwise have to work out itself.
    pub async fn select_preferred_options(
        &self,
        source: &ImageSource<'_, B::Texture>,
        options: &EncodeOptions,
    ) -> Result<EncodeOptions> {
        let resolved = source.clone().resolve(self.loader.as_ref()).await?;
        let mut selected = options.clone();

        if let ResolvedSource::Texture(texture) = &resolved {
            if self.backend.texture_is_srgb(texture) {
                selected.srgb = true;
            }
        }

        if options.wants_auto() {
            let format = self.auto_format(&resolved, options).await?;
            selected.format = Some(FormatSelector::Name(format.name().to_string()));
            if format.descriptor().channels == 2 {
                selected.normal = true;
            }
        }
        Ok(selected)
    }

    /// Pick a format from the hints, the texture format or the pixels.
    async fn auto_format(
        &self,
        source: &ResolvedSource<'_, B::Texture>,
        options: &EncodeOptions,
    ) -> Result<FormatId> {
        let channels = if options.alpha {
            ChannelCount::Rgba
        } else if options.srgb {
            ChannelCount::Rgb
        } else if options.normal {
            ChannelCount::Rg
        } else {
            match source {
                ResolvedSource::Texture(texture) => match self.backend.texture_channel_hint(texture) {
                    Some(channels) => channels,
                    None => self.backend.count_channels(texture).await?.classify(),
                },
                ResolvedSource::Pixels(image) => detect_channels_rgba8(image.as_raw()),
            }
        };

        debug!("Auto selection: {} channels", channels.count());
        select_for_channels(channels, self.backend.capabilities())
    }

    /// Encode an image or texture into a new compressed texture.
    pub async fn encode(
        &self,
        source: ImageSource<'_, B::Texture>,
        options: &EncodeOptions,
    ) -> Result<CompressedTexture<B::Texture>> {
        let started = Instant::now();
        let kind = source.kind();
        let source = source.resolve(self.loader.as_ref()).await?;

        let (source_width, source_height) = match &source {
            ResolvedSource::Pixels(image) => image.dimensions(),
            ResolvedSource::Texture(texture) => self.backend.texture_size(texture),
        };
        if source_width == 0 || source_height == 0 {
            return Err(EncodeError::InvalidInput(format!(
                "{} has no pixels ({}x{})",
                kind, source_width, source_height
            )));
        }

        let selector = options.selector();
        let format = if selector.is_auto() {
            self.auto_format(&source, options).await?
        } else {
            resolve(&selector, self.backend.capabilities(), options.prefer_low_quality)?
        };
        let desc = format.descriptor();
        // Formats without an sRGB variant silently ignore the request
        let srgb = (options.srgb || selector.implies_srgb()) && desc.is_rgb;

        let width = round_to_block(source_width);
        let height = round_to_block(source_height);
        let plan = plan_layout(width, height, desc.block_bytes, options.mips, self.backend.row_alignment());
        let mip_count = plan.mip_count();

        let program = self.programs.get(format).await?;

        // Declared first so it drops last, after every temporary below.
        let _guard = StateGuard::new(self.backend.as_ref());
        let backend = self.backend.as_ref();

        let mut recorder = backend.begin_commands()?;
        let needs_processing = options.flip_y || (width, height) != (source_width, source_height);

        let mut staging = None;
        let work = match &source {
            ResolvedSource::Texture(_) if !needs_processing && mip_count == 1 => None,
            ResolvedSource::Texture(texture) => {
                let work = backend.create_work_texture(width, height, mip_count, srgb)?;
                backend.preprocess(&mut recorder, texture, &work, options.flip_y, srgb)?;
                Some(work)
            }
            ResolvedSource::Pixels(image) if needs_processing => {
                let uploaded = staging.insert(backend.upload_pixels(&mut recorder, image, 1, srgb)?);
                let work = backend.create_work_texture(width, height, mip_count, srgb)?;
                backend.preprocess(&mut recorder, uploaded, &work, options.flip_y, srgb)?;
                Some(work)
            }
            ResolvedSource::Pixels(image) => {
                Some(backend.upload_pixels(&mut recorder, image, mip_count, srgb)?)
            }
        };
        let input = match (&work, &source) {
            (Some(work), _) => work,
            (None, ResolvedSource::Texture(texture)) => *texture,
            (None, ResolvedSource::Pixels(_)) => {
                return Err(EncodeError::Backend("no input texture prepared".to_string()));
            }
        };

        if mip_count > 1 {
            backend.generate_mipmaps(&mut recorder, input, mip_count, srgb)?;
        }

        let output = backend.create_output_texture(desc, width, height, mip_count, srgb, options.wrap)?;
        let packed = backend.create_packed_buffer(plan.total_size())?;

        let dispatches: Vec<LevelDispatch<'_>> = plan
            .levels()
            .iter()
            .enumerate()
            .map(|(index, level)| LevelDispatch {
                index: index as u32,
                count: mip_count,
                level,
            })
            .collect();

        for dispatch in &dispatches {
            backend.encode_level(&mut recorder, &program, input, &packed, desc, *dispatch)?;
        }
        for dispatch in &dispatches {
            backend.copy_level(&mut recorder, &packed, &output, desc, srgb, *dispatch)?;
        }
        backend.submit(recorder)?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if self.config.verbose {
            info!(
                "Encoded {} {}x{} as {} ({}, {} mips) in {:.1} ms",
                kind,
                width,
                height,
                desc.name,
                if srgb { "sRGB" } else { "linear" },
                mip_count,
                elapsed_ms
            );
        } else {
            debug!(
                "Encoded {} {}x{} as {} ({}, {} mips) in {:.1} ms",
                kind,
                width,
                height,
                desc.name,
                if srgb { "sRGB" } else { "linear" },
                mip_count,
                elapsed_ms
            );
        }

        Ok(CompressedTexture {
            texture: output,
            format,
            name: desc.name,
            width,
            height,
            mip_count,
            srgb,
            wrap: options.wrap,
        })
    }

    /// GPU time of the most recent encode in milliseconds, if the device
    /// records timestamps.
    pub async fn time_elapsed(&self) -> Result<Option<f64>> {
        self.backend.read_elapsed_ms().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::gl::api::{self, BufferId, FramebufferId, GlApi, ProgramId};
    use crate::backend::gl::fake::FakeGl;
    use crate::backend::gl::state::SavedDeviceState;
    use crate::backend::gl::{GlBackend, GlTexture};
    use crate::kernels::StaticKernels;
    use image::{Rgba, RgbaImage};

    fn kernels(broken: Option<FormatId>) -> Arc<dyn KernelSource> {
        let mut kernels = StaticKernels::new();
        for id in FormatId::ALL {
            if let Some(name) = id.descriptor().glsl_kernel {
                let body = if Some(id) == broken { "broken" } else { "" };
                kernels.insert(name, format!("// {}\nvoid main() {{ {} }}\n", id, body));
            }
        }
        Arc::new(kernels)
    }

    fn encoder(gl: &Arc<FakeGl>) -> Encoder<GlBackend> {
        encoder_with(gl, EncoderConfig::default(), None)
    }

    fn encoder_with(gl: &Arc<FakeGl>, config: EncoderConfig, broken: Option<FormatId>) -> Encoder<GlBackend> {
        let backend = GlBackend::new(Arc::clone(gl) as Arc<dyn GlApi>, true);
        Encoder::new(backend, kernels(broken), config)
    }

    fn options(format: &str) -> EncodeOptions {
        EncodeOptions {
            format: Some(FormatSelector::parse(format)),
            ..Default::default()
        }
    }

    /// Leave the context in a state the encoder must not disturb.
    fn dirty_host_state(gl: &FakeGl) {
        gl.active_texture(api::TEXTURE0 + 2);
        gl.use_program(ProgramId(900));
        gl.bind_framebuffer(api::FRAMEBUFFER, FramebufferId(901));
        gl.viewport(10, 20, 640, 480);
        gl.enable(api::BLEND);
        gl.enable(api::DEPTH_TEST);
        gl.bind_buffer(api::PIXEL_UNPACK_BUFFER, BufferId(902));
    }

    #[tokio::test]
    async fn test_encode_restores_state_and_frees_temporaries() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        dirty_host_state(&gl);
        let before = SavedDeviceState::capture(gl.as_ref());

        let image = RgbaImage::from_pixel(10, 10, Rgba([200, 10, 10, 255]));
        let opts = EncodeOptions {
            mips: true,
            ..options("bc7-rgb")
        };
        let compressed = encoder.encode((&image).into(), &opts).await.unwrap();

        assert_eq!(SavedDeviceState::capture(gl.as_ref()), before);
        assert_eq!((compressed.width, compressed.height), (12, 12));
        assert_eq!(compressed.mip_count, 2);
        assert_eq!(compressed.name, "bc7-rgb");
        assert_eq!(compressed.byte_size(), 9 * 16 + 4 * 16);

        // Only the output texture survives
        assert_eq!(gl.live_textures(), 1);
        assert_eq!(gl.live_framebuffers(), 0);
        assert_eq!(gl.live_buffers(), 0);

        let uploads = gl.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!((uploads[0].offset, uploads[0].size), (0, 144));
        assert_eq!((uploads[1].offset, uploads[1].size), (144, 64));
        assert_eq!((uploads[1].width, uploads[1].height), (6, 6));
        assert!(uploads.iter().all(|u| u.texture == compressed.texture.id()));
    }

    #[tokio::test]
    async fn test_failed_encode_restores_state() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        dirty_host_state(&gl);
        let before = SavedDeviceState::capture(gl.as_ref());

        gl.raise_error(api::CONTEXT_LOST);
        let image = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        let err = encoder.encode((&image).into(), &options("bc1-rgb")).await.unwrap_err();

        assert!(matches!(err, EncodeError::DeviceLost(_)));
        assert_eq!(SavedDeviceState::capture(gl.as_ref()), before);
        assert_eq!(gl.live_textures(), 0);
        assert_eq!(gl.live_framebuffers(), 0);
        assert_eq!(gl.live_buffers(), 0);
    }

    #[tokio::test]
    async fn test_compile_failure_only_affects_that_format() {
        let gl = Arc::new(FakeGl::full().failing_on("broken"));
        let encoder = encoder_with(&gl, EncoderConfig::default(), Some(FormatId::Bc1Rgb));
        let image = RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]));

        let err = encoder.encode((&image).into(), &options("bc1-rgb")).await.unwrap_err();
        assert!(matches!(err, EncodeError::ShaderCompile { format: "bc1-rgb", .. }));

        let ok = encoder.encode((&image).into(), &options("bc7-rgb")).await.unwrap();
        assert_eq!(ok.format, FormatId::Bc7Rgb);
    }

    #[tokio::test]
    async fn test_auto_selection_from_pixels() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);

        let normal = RgbaImage::from_pixel(8, 8, Rgba([128, 128, 255, 255]));
        let gray = RgbaImage::from_pixel(8, 8, Rgba([77, 77, 77, 255]));
        let translucent = RgbaImage::from_pixel(8, 8, Rgba([77, 77, 77, 12]));

        let auto = options("auto");
        let mut picked = Vec::new();
        for image in [&normal, &gray, &translucent] {
            picked.push(encoder.encode(image.into(), &auto).await.unwrap().format);
        }
        assert_eq!(picked, vec![FormatId::Bc5Rg, FormatId::Bc4R, FormatId::Bc7Rgba]);

        // Hints win over detection
        let hinted = EncodeOptions { alpha: true, ..auto.clone() };
        let compressed = encoder.encode((&gray).into(), &hinted).await.unwrap();
        assert_eq!(compressed.format, FormatId::Bc7Rgba);
    }

    #[tokio::test]
    async fn test_missing_format_defaults_to_rgb() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        let image = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));

        let compressed = encoder.encode((&image).into(), &EncodeOptions::default()).await.unwrap();
        assert_eq!(compressed.format, FormatId::Bc7Rgb);

        let with_alpha = EncodeOptions {
            alpha: true,
            ..Default::default()
        };
        let compressed = encoder.encode((&image).into(), &with_alpha).await.unwrap();
        assert_eq!(compressed.format, FormatId::Bc7Rgba);
    }

    #[tokio::test]
    async fn test_device_texture_is_used_directly() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        let host = GlTexture::from_raw(gl.host_texture(api::R8), 8, 8, api::R8);

        let compressed = encoder
            .encode(ImageSource::DeviceTexture(&host), &options("auto"))
            .await
            .unwrap();
        assert_eq!(compressed.format, FormatId::Bc4R);
        // One encode draw, no preprocessing pass, host texture untouched
        assert_eq!(gl.draws(), 1);
        assert_eq!(gl.live_textures(), 2);
        assert_eq!(gl.texture_format(host.id()), Some(api::R8));
    }

    #[tokio::test]
    async fn test_flip_preprocesses_device_texture() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        let host = GlTexture::from_raw(gl.host_texture(api::RGBA8), 8, 8, api::RGBA8);

        let opts = EncodeOptions {
            flip_y: true,
            ..options("bc1-rgb")
        };
        encoder.encode(ImageSource::DeviceTexture(&host), &opts).await.unwrap();
        // Blit + encode
        assert_eq!(gl.draws(), 2);
        // Host texture + output; the work texture is gone
        assert_eq!(gl.live_textures(), 2);
    }

    #[tokio::test]
    async fn test_srgb_only_for_rgb_formats() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        let image = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));

        let srgb = EncodeOptions {
            srgb: true,
            ..options("bc7-rgb")
        };
        let compressed = encoder.encode((&image).into(), &srgb).await.unwrap();
        assert!(compressed.srgb);
        assert_eq!(gl.uploads()[0].format, 0x8e8d);

        let red = EncodeOptions {
            srgb: true,
            ..options("bc4-r")
        };
        assert!(!encoder.encode((&image).into(), &red).await.unwrap().srgb);
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let gl = Arc::new(FakeGl::new(&["WEBGL_compressed_texture_etc"]));
        let encoder = encoder(&gl);
        let image = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));

        let err = encoder.encode((&image).into(), &options("bc7-rgb")).await.unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedFormat(_)));
        // No kernel for ETC2 RGBA in this backend
        let err = encoder.encode((&image).into(), &options("rgba")).await.unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedFormat(_)));

        let rgb = encoder.encode((&image).into(), &options("rgb")).await.unwrap();
        assert_eq!(rgb.format, FormatId::Etc2Rgb);
        // Nothing touched the context for the failed calls
        assert_eq!(gl.draws(), 1);
    }

    #[tokio::test]
    async fn test_empty_image_is_invalid() {
        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        let image = RgbaImage::new(0, 0);
        let err = encoder.encode((&image).into(), &options("rgb")).await.unwrap_err();
        assert!(matches!(err, EncodeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_url_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sprite.png");
        RgbaImage::from_pixel(5, 3, Rgba([0, 0, 255, 128])).save(&path).unwrap();

        let gl = Arc::new(FakeGl::full());
        let encoder = encoder(&gl);
        let compressed = encoder
            .encode(ImageSource::url(path.display().to_string()), &options("auto"))
            .await
            .unwrap();
        assert_eq!((compressed.width, compressed.height), (8, 4));
        assert_eq!(compressed.format, FormatId::Bc7Rgba);
    }

    #[tokio::test]
    async fn test_select_preferred_options() {
        let gl = Arc::new(FakeGl::full().with_pixel([128, 128, 255, 255]));
        let encoder = encoder(&gl);

        let host = GlTexture::from_raw(gl.host_texture(api::RGBA8), 4, 4, api::RGBA8);
        let selected = encoder
            .select_preferred_options(&ImageSource::DeviceTexture(&host), &EncodeOptions::default())
            .await
            .unwrap();
        assert_eq!(selected.format, Some(FormatSelector::Name("bc5-rg".to_string())));
        assert!(selected.normal);
        assert!(!selected.srgb);

        let srgb_host = GlTexture::from_raw(gl.host_texture(api::SRGB8_ALPHA8), 4, 4, api::SRGB8_ALPHA8);
        let explicit = options("bc7-rgba");
        let selected = encoder
            .select_preferred_options(&ImageSource::DeviceTexture(&srgb_host), &explicit)
            .await
            .unwrap();
        assert_eq!(selected.format, explicit.format);
        assert!(selected.srgb);
    }

    #[tokio::test]
    async fn test_format_queries() {
        let gl = Arc::new(FakeGl::new(&[
            "EXT_texture_compression_bptc",
            "WEBGL_compressed_texture_s3tc",
        ]));
        let encoder = encoder(&gl);

        assert_eq!(encoder.supported_formats(), vec!["bc1-rgb", "bc7-rgb", "bc7-rgba"]);
        assert_eq!(
            encoder.enumerate_supported_formats(),
            vec![("bc1-rgb", 8), ("bc7-rgb", 4), ("bc7-rgba", 4)]
        );
        assert!(encoder.is_format_supported("BC7-RGB"));
        assert!(!encoder.is_format_supported("bc3-rgba"));
        assert_eq!(encoder.time_elapsed().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_preload_selected_formats() {
        let gl = Arc::new(FakeGl::full());
        let config = EncoderConfig {
            preload: Preload::Formats(vec!["bc7-rgb".to_string(), "nonsense".to_string()]),
            ..Default::default()
        };
        let encoder = encoder_with(&gl, config, None);

        assert_eq!(encoder.programs().len(), 1);
        assert!(encoder.programs().is_resolved(FormatId::Bc7Rgb));
    }

    #[tokio::test]
    async fn test_preload_all() {
        let gl = Arc::new(FakeGl::full());
        let config = EncoderConfig {
            preload: Preload::All,
            ..Default::default()
        };
        let encoder = encoder_with(&gl, config, None);
        assert_eq!(encoder.programs().len(), encoder.supported_formats().len());

        // Dropping the encoder releases every program
        drop(encoder);
        assert_eq!(gl.live_programs(), 0);
        assert_eq!(gl.live_shaders(), 0);
    }

}
