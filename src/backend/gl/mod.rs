//! Immediate-mode backend (GL ES 3.0 / WebGL2)
//!
//! Each level is encoded by drawing a fullscreen triangle into an unsigned
//! integer render target one texel per block, reading the target into a
//! pixel-pack buffer at the level's offset and then uploading that buffer
//! range into the compressed texture. The context is shared with the host,
//! so every encode runs inside a [`StateGuard`](crate::state::StateGuard).

pub mod api;
#[cfg(test)]
pub(crate) mod fake;
pub mod state;

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use image::RgbaImage;
use tracing::{debug, info, warn};

use self::api::{BufferId, FramebufferId, GlApi, ProgramId, ShaderId, TextureId, VertexArrayId};
use self::state::SavedDeviceState;
use super::{GpuBackend, LevelDispatch};
use crate::capability::{CapabilitySet, CompressionFeature};
use crate::channels::{count_channels_rgba8, ChannelCount, ChannelCounters};
use crate::error::{EncodeError, Result};
use crate::format::{FormatDescriptor, FormatId, StagingFormat};
use crate::options::WrapMode;
use crate::program_cache::ProgramCompiler;
use crate::state::{StateGuard, StatefulDevice};

const SHADER_PREFIX: &str = "#version 300 es\nprecision highp float;\nprecision highp int;\n";

const FULLSCREEN_VERTEX_SHADER: &str = "#version 300 es
void main() {
    vec2 uv = vec2((gl_VertexID << 1) & 2, gl_VertexID & 2);
    gl_Position = vec4(uv * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Nearest-neighbour resample with optional vertical flip. Uses `texelFetch`
/// so the host's sampler parameters are never touched.
const BLIT_FRAGMENT_SHADER: &str = "#version 300 es
precision highp float;
uniform sampler2D uTexture;
uniform ivec2 uTargetSize;
uniform int uFlipY;
out vec4 fragColor;
void main() {
    ivec2 srcSize = textureSize(uTexture, 0);
    ivec2 coord = ivec2(gl_FragCoord.xy) * srcSize / uTargetSize;
    if (uFlipY != 0) {
        coord.y = srcSize.y - 1 - coord.y;
    }
    fragColor = texelFetch(uTexture, clamp(coord, ivec2(0), srcSize - 1), 0);
}
";

/// Extension names (WebGL and desktop spellings) and the formats they unlock.
const EXTENSION_FEATURES: &[(&str, CompressionFeature)] = &[
    ("EXT_texture_compression_bptc", CompressionFeature::Bptc),
    ("WEBGL_texture_compression_bptc", CompressionFeature::Bptc),
    ("GL_ARB_texture_compression_bptc", CompressionFeature::Bptc),
    ("GL_EXT_texture_compression_bptc", CompressionFeature::Bptc),
    ("WEBGL_compressed_texture_s3tc", CompressionFeature::S3tc),
    ("GL_EXT_texture_compression_s3tc", CompressionFeature::S3tc),
    ("EXT_texture_compression_rgtc", CompressionFeature::Rgtc),
    ("GL_ARB_texture_compression_rgtc", CompressionFeature::Rgtc),
    ("GL_EXT_texture_compression_rgtc", CompressionFeature::Rgtc),
    ("WEBGL_compressed_texture_etc", CompressionFeature::Etc2),
    ("GL_ARB_ES3_compatibility", CompressionFeature::Etc2),
    ("WEBGL_compressed_texture_astc", CompressionFeature::Astc),
    ("GL_KHR_texture_compression_astc_ldr", CompressionFeature::Astc),
];

/// Map reported extensions to the formats this backend can produce.
pub fn detect_formats(extensions: &[String]) -> CapabilitySet {
    let features = EXTENSION_FEATURES
        .iter()
        .filter(|(name, _)| extensions.iter().any(|ext| ext == name))
        .map(|(_, feature)| *feature);

    CapabilitySet::from_features(features).retain(|id| {
        let desc = id.descriptor();
        desc.glsl_kernel.is_some() && desc.gl_formats.is_some()
    })
}

fn gl_error(context: &str, message: String) -> EncodeError {
    EncodeError::Backend(format!("{}: {}", context, message))
}

/// A GL texture. Textures created by the backend are deleted on drop; host
/// textures wrapped with [`GlTexture::from_raw`] are never deleted.
pub struct GlTexture {
    id: TextureId,
    width: u32,
    height: u32,
    internal_format: u32,
    levels: u32,
    owner: Option<Arc<dyn GlApi>>,
}

impl GlTexture {
    /// Wrap a host texture with immutable storage of the given format.
    pub fn from_raw(id: TextureId, width: u32, height: u32, internal_format: u32) -> Self {
        Self {
            id,
            width,
            height,
            internal_format,
            levels: 1,
            owner: None,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn internal_format(&self) -> u32 {
        self.internal_format
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Take ownership of the handle; it is no longer deleted on drop.
    pub fn into_raw(mut self) -> TextureId {
        self.owner = None;
        self.id
    }
}

impl fmt::Debug for GlTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlTexture")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("internal_format", &format_args!("{:#x}", self.internal_format))
            .field("levels", &self.levels)
            .field("owned", &self.owner.is_some())
            .finish()
    }
}

impl Drop for GlTexture {
    fn drop(&mut self) {
        if let Some(gl) = &self.owner {
            gl.delete_texture(self.id);
        }
    }
}

/// Pixel-pack/unpack buffer holding the packed mip chain.
pub struct GlBuffer {
    id: BufferId,
    size: u64,
    gl: Arc<dyn GlApi>,
}

impl GlBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for GlBuffer {
    fn drop(&mut self) {
        self.gl.delete_buffer(self.id);
    }
}

/// A linked encode program. Deleted when the last handle is dropped.
pub struct GlProgram {
    id: ProgramId,
    source_location: Option<i32>,
    gl: Arc<dyn GlApi>,
}

impl Drop for GlProgram {
    fn drop(&mut self) {
        self.gl.delete_program(self.id);
    }
}

/// Temporaries for one encode: the framebuffer and the block render target.
pub struct GlRecorder {
    gl: Arc<dyn GlApi>,
    framebuffer: FramebufferId,
    target: Option<(TextureId, u32, u32)>,
}

impl GlRecorder {
    /// Render target for block output, created on first use at the size of
    /// the largest (first) level, and attached to the framebuffer.
    fn attach_block_target(&mut self, staging: StagingFormat, width: u32, height: u32) -> Result<()> {
        let gl = &self.gl;
        let texture = match self.target {
            Some((texture, w, h)) if width <= w && height <= h => texture,
            Some((_, w, h)) => {
                return Err(EncodeError::Backend(format!(
                    "level {}x{} exceeds block target {}x{}",
                    width, height, w, h
                )));
            }
            None => {
                let texture = gl.create_texture().map_err(|e| gl_error("create block target", e))?;
                self.target = Some((texture, width, height));
                let internal_format = match staging {
                    StagingFormat::Rgba16Uint => api::RGBA16UI,
                    StagingFormat::Rgba32Uint => api::RGBA32UI,
                };
                gl.bind_texture(api::TEXTURE_2D, texture);
                gl.tex_storage_2d(api::TEXTURE_2D, 1, internal_format, width as i32, height as i32);
                texture
            }
        };

        gl.bind_framebuffer(api::FRAMEBUFFER, self.framebuffer);
        gl.framebuffer_texture_2d(api::FRAMEBUFFER, api::COLOR_ATTACHMENT0, api::TEXTURE_2D, texture, 0);
        gl.read_buffer(api::COLOR_ATTACHMENT0);
        check_framebuffer(gl.as_ref())
    }
}

impl Drop for GlRecorder {
    fn drop(&mut self) {
        if let Some((texture, _, _)) = self.target.take() {
            self.gl.delete_texture(texture);
        }
        self.gl.delete_framebuffer(self.framebuffer);
    }
}

fn check_framebuffer(gl: &dyn GlApi) -> Result<()> {
    let status = gl.check_framebuffer_status(api::FRAMEBUFFER);
    if status == api::FRAMEBUFFER_COMPLETE {
        Ok(())
    } else {
        Err(EncodeError::Backend(format!(
            "framebuffer incomplete: {:#x}",
            status
        )))
    }
}

fn wrap_param(wrap: WrapMode) -> i32 {
    match wrap {
        WrapMode::Repeat => api::REPEAT,
        WrapMode::Mirror => api::MIRRORED_REPEAT,
        WrapMode::Clamp => api::CLAMP_TO_EDGE,
    }
}

/// Shared objects created once per context.
struct Shared {
    vertex_shader: ShaderId,
    blit: ProgramId,
    vertex_array: VertexArrayId,
}

/// Encoder backend over a host GL context.
pub struct GlBackend {
    gl: Arc<dyn GlApi>,
    capabilities: CapabilitySet,
    validate: bool,
    shared: Mutex<Option<Shared>>,
}

impl GlBackend {
    /// Detect supported formats. Shared shaders are compiled on first use.
    pub fn new(gl: Arc<dyn GlApi>, validate_shaders: bool) -> Self {
        let extensions = gl.supported_extensions();
        debug!("GL extensions: {}", extensions.join(" "));

        let capabilities = detect_formats(&extensions);
        info!(
            "GL context supports {} compressed formats: {}",
            capabilities.len(),
            capabilities.names().join(", ")
        );

        Self {
            gl,
            capabilities,
            validate: validate_shaders,
            shared: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<dyn GlApi> {
        &self.gl
    }

    fn compile_shader(&self, kind: u32, source: &str, label: &'static str) -> Result<ShaderId> {
        let gl = &self.gl;
        let shader = gl.create_shader(kind).map_err(|e| gl_error("create shader", e))?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if self.validate && !gl.shader_compile_status(shader) {
            let log = gl.shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(EncodeError::ShaderCompile {
                format: label,
                message: log,
            });
        }
        Ok(shader)
    }

    fn link(&self, vertex: ShaderId, fragment: ShaderId, label: &'static str) -> Result<ProgramId> {
        let gl = &self.gl;
        let program = gl.create_program().map_err(|e| gl_error("create program", e))?;
        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        gl.link_program(program);

        if self.validate && !gl.program_link_status(program) {
            let log = gl.program_info_log(program);
            gl.delete_program(program);
            return Err(EncodeError::ShaderCompile {
                format: label,
                message: log,
            });
        }
        Ok(program)
    }

    /// Run `f` with the shared objects, creating them on first use.
    fn with_shared<R>(&self, f: impl FnOnce(&Shared) -> R) -> Result<R> {
        let mut shared = self.shared.lock().expect("GL shared state lock poisoned");
        if shared.is_none() {
            let vertex_shader =
                self.compile_shader(api::VERTEX_SHADER, FULLSCREEN_VERTEX_SHADER, "fullscreen")?;
            let blit_fragment =
                self.compile_shader(api::FRAGMENT_SHADER, BLIT_FRAGMENT_SHADER, "blit")?;
            let blit = self.link(vertex_shader, blit_fragment, "blit");
            self.gl.delete_shader(blit_fragment);
            let blit = blit?;
            let vertex_array = self
                .gl
                .create_vertex_array()
                .map_err(|e| gl_error("create vertex array", e))?;
            *shared = Some(Shared {
                vertex_shader,
                blit,
                vertex_array,
            });
        }
        match shared.as_ref() {
            Some(shared) => Ok(f(shared)),
            None => Err(EncodeError::Backend("GL shared objects unavailable".to_string())),
        }
    }

    fn new_texture(&self, width: u32, height: u32, levels: u32, internal_format: u32) -> Result<GlTexture> {
        let gl = &self.gl;
        let id = gl.create_texture().map_err(|e| gl_error("create texture", e))?;
        let texture = GlTexture {
            id,
            width,
            height,
            internal_format,
            levels,
            owner: Some(Arc::clone(gl)),
        };

        gl.bind_texture(api::TEXTURE_2D, id);
        gl.tex_storage_2d(
            api::TEXTURE_2D,
            levels as i32,
            internal_format,
            width as i32,
            height as i32,
        );
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MIN_FILTER, api::NEAREST);
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MAG_FILTER, api::NEAREST);
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MAX_LEVEL, levels as i32 - 1);
        Ok(texture)
    }

    fn prepare_draw_state(&self) {
        let gl = &self.gl;
        gl.active_texture(api::TEXTURE0);
        for cap in state::TOGGLES {
            gl.disable(cap);
        }
    }

    /// Read the texture back through a temporary framebuffer and sample the
    /// pixels on the host.
    fn read_channel_counters(&self, texture: &GlTexture) -> Result<ChannelCounters> {
        let _guard = StateGuard::new(self);
        let gl = &self.gl;
        let framebuffer = gl
            .create_framebuffer()
            .map_err(|e| gl_error("create framebuffer", e))?;

        gl.bind_buffer(api::PIXEL_PACK_BUFFER, BufferId::NONE);
        gl.bind_framebuffer(api::FRAMEBUFFER, framebuffer);
        gl.framebuffer_texture_2d(
            api::FRAMEBUFFER,
            api::COLOR_ATTACHMENT0,
            api::TEXTURE_2D,
            texture.id,
            0,
        );
        let status = check_framebuffer(gl.as_ref());

        let mut pixels = vec![0u8; texture.width as usize * texture.height as usize * 4];
        if status.is_ok() {
            gl.read_buffer(api::COLOR_ATTACHMENT0);
            gl.read_pixels(
                0,
                0,
                texture.width as i32,
                texture.height as i32,
                api::RGBA,
                api::UNSIGNED_BYTE,
                &mut pixels,
            );
        }
        gl.delete_framebuffer(framebuffer);
        status?;
        self.check_error()?;

        Ok(count_channels_rgba8(&pixels))
    }

    fn check_error(&self) -> Result<()> {
        match self.gl.get_error() {
            api::NO_ERROR => Ok(()),
            api::CONTEXT_LOST => Err(EncodeError::DeviceLost("GL context lost".to_string())),
            code => Err(EncodeError::Backend(format!("GL error {:#06x}", code))),
        }
    }
}

impl Drop for GlBackend {
    fn drop(&mut self) {
        let shared = match self.shared.get_mut() {
            Ok(shared) => shared.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(shared) = shared {
            self.gl.delete_program(shared.blit);
            self.gl.delete_shader(shared.vertex_shader);
            self.gl.delete_vertex_array(shared.vertex_array);
        }
    }
}

impl StatefulDevice for GlBackend {
    type SavedState = SavedDeviceState;

    fn snapshot_state(&self) -> Option<SavedDeviceState> {
        Some(SavedDeviceState::capture(self.gl.as_ref()))
    }

    fn restore_state(&self, state: SavedDeviceState) {
        state.apply(self.gl.as_ref());
    }
}

impl ProgramCompiler for GlBackend {
    type Program = GlProgram;

    fn kernel_name(&self, format: FormatId) -> Option<&'static str> {
        format.descriptor().glsl_kernel
    }

    fn background_compile(&self) -> bool {
        false
    }

    fn compile_program(
        &self,
        format: FormatId,
        source: String,
    ) -> BoxFuture<'static, Result<GlProgram>> {
        let label = format.name();
        let result = self
            .with_shared(|shared| shared.vertex_shader)
            .and_then(|vertex| {
                let fragment = self.compile_shader(
                    api::FRAGMENT_SHADER,
                    &format!("{}{}", SHADER_PREFIX, source),
                    label,
                )?;
                let program = self.link(vertex, fragment, label);
                self.gl.delete_shader(fragment);
                let id = program?;
                Ok(GlProgram {
                    id,
                    source_location: self.gl.uniform_location(id, "uTexture"),
                    gl: Arc::clone(&self.gl),
                })
            });
        futures::future::ready(result).boxed()
    }
}

impl GpuBackend for GlBackend {
    type Texture = GlTexture;
    type Buffer = GlBuffer;
    type Recorder = GlRecorder;

    fn describe(&self) -> String {
        "GL ES 3.0 context".to_string()
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn row_alignment(&self) -> Option<u32> {
        None
    }

    fn texture_size(&self, texture: &GlTexture) -> (u32, u32) {
        (texture.width, texture.height)
    }

    fn texture_channel_hint(&self, texture: &GlTexture) -> Option<ChannelCount> {
        match texture.internal_format {
            api::R8 | api::R16 => Some(ChannelCount::R),
            api::RG8 | api::RG16 => Some(ChannelCount::Rg),
            _ => None,
        }
    }

    fn texture_is_srgb(&self, texture: &GlTexture) -> bool {
        matches!(texture.internal_format, api::SRGB8 | api::SRGB8_ALPHA8)
    }

    fn count_channels<'a>(&'a self, texture: &'a GlTexture) -> BoxFuture<'a, Result<ChannelCounters>> {
        futures::future::ready(self.read_channel_counters(texture)).boxed()
    }

    fn begin_commands(&self) -> Result<GlRecorder> {
        self.with_shared(|_| ())?;
        self.prepare_draw_state();
        let framebuffer = self
            .gl
            .create_framebuffer()
            .map_err(|e| gl_error("create framebuffer", e))?;
        Ok(GlRecorder {
            gl: Arc::clone(&self.gl),
            framebuffer,
            target: None,
        })
    }

    fn upload_pixels(
        &self,
        _recorder: &mut GlRecorder,
        image: &RgbaImage,
        mip_count: u32,
        _srgb: bool,
    ) -> Result<GlTexture> {
        let (width, height) = image.dimensions();
        let texture = self.new_texture(width, height, mip_count, api::RGBA8)?;

        self.gl.bind_buffer(api::PIXEL_UNPACK_BUFFER, BufferId::NONE);
        self.gl.tex_sub_image_2d(
            api::TEXTURE_2D,
            0,
            0,
            0,
            width as i32,
            height as i32,
            api::RGBA,
            api::UNSIGNED_BYTE,
            image.as_raw(),
        );
        Ok(texture)
    }

    fn create_work_texture(&self, width: u32, height: u32, mip_count: u32, _srgb: bool) -> Result<GlTexture> {
        self.new_texture(width, height, mip_count, api::RGBA8)
    }

    fn preprocess(
        &self,
        recorder: &mut GlRecorder,
        src: &GlTexture,
        dst: &GlTexture,
        flip_y: bool,
        _srgb: bool,
    ) -> Result<()> {
        let gl = &self.gl;
        let (blit, vertex_array) = self.with_shared(|s| (s.blit, s.vertex_array))?;

        gl.bind_framebuffer(api::FRAMEBUFFER, recorder.framebuffer);
        gl.framebuffer_texture_2d(api::FRAMEBUFFER, api::COLOR_ATTACHMENT0, api::TEXTURE_2D, dst.id, 0);
        check_framebuffer(gl.as_ref())?;

        gl.use_program(blit);
        gl.bind_texture(api::TEXTURE_2D, src.id);
        if let Some(location) = gl.uniform_location(blit, "uTexture") {
            gl.uniform_1i(location, 0);
        }
        if let Some(location) = gl.uniform_location(blit, "uTargetSize") {
            gl.uniform_2i(location, dst.width as i32, dst.height as i32);
        }
        if let Some(location) = gl.uniform_location(blit, "uFlipY") {
            gl.uniform_1i(location, flip_y as i32);
        }

        gl.viewport(0, 0, dst.width as i32, dst.height as i32);
        gl.bind_vertex_array(vertex_array);
        gl.draw_arrays(api::TRIANGLES, 0, 3);

        if flip_y {
            debug!("Flipped {}x{} source vertically", src.width, src.height);
        }
        Ok(())
    }

    fn generate_mipmaps(
        &self,
        _recorder: &mut GlRecorder,
        texture: &GlTexture,
        mip_count: u32,
        _srgb: bool,
    ) -> Result<()> {
        let gl = &self.gl;
        gl.bind_texture(api::TEXTURE_2D, texture.id);
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_BASE_LEVEL, 0);
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MAX_LEVEL, mip_count as i32 - 1);
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MIN_FILTER, api::LINEAR_MIPMAP_LINEAR);
        gl.generate_mipmap(api::TEXTURE_2D);
        Ok(())
    }

    fn create_output_texture(
        &self,
        format: &FormatDescriptor,
        width: u32,
        height: u32,
        mip_count: u32,
        srgb: bool,
        wrap: WrapMode,
    ) -> Result<GlTexture> {
        let internal_format = format
            .gl_format(srgb)
            .ok_or_else(|| EncodeError::UnsupportedFormat(format.name.to_string()))?;
        let texture = self.new_texture(width, height, mip_count, internal_format)?;

        let gl = &self.gl;
        let min_filter = if mip_count > 1 {
            api::LINEAR_MIPMAP_LINEAR
        } else {
            api::LINEAR
        };
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MIN_FILTER, min_filter);
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MAG_FILTER, api::LINEAR);
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_WRAP_S, wrap_param(wrap));
        gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_WRAP_T, wrap_param(wrap));
        Ok(texture)
    }

    fn create_packed_buffer(&self, size: u64) -> Result<GlBuffer> {
        let gl = &self.gl;
        let id = gl.create_buffer().map_err(|e| gl_error("create buffer", e))?;
        let buffer = GlBuffer {
            id,
            size,
            gl: Arc::clone(gl),
        };
        gl.bind_buffer(api::PIXEL_PACK_BUFFER, id);
        gl.buffer_data_size(api::PIXEL_PACK_BUFFER, size as i64, api::STREAM_COPY);
        Ok(buffer)
    }

    fn encode_level(
        &self,
        recorder: &mut GlRecorder,
        program: &GlProgram,
        input: &GlTexture,
        buffer: &GlBuffer,
        format: &FormatDescriptor,
        dispatch: LevelDispatch<'_>,
    ) -> Result<()> {
        let level = dispatch.level;
        let vertex_array = self.with_shared(|s| s.vertex_array)?;
        recorder.attach_block_target(format.staging, level.block_width, level.block_height)?;

        let gl = &self.gl;
        gl.use_program(program.id);
        gl.bind_texture(api::TEXTURE_2D, input.id);
        if let Some(location) = program.source_location {
            gl.uniform_1i(location, 0);
        }
        // Host textures have a single level and keep their parameters
        if input.levels > 1 {
            gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_BASE_LEVEL, dispatch.index as i32);
            gl.tex_parameter_i(api::TEXTURE_2D, api::TEXTURE_MAX_LEVEL, dispatch.index as i32);
        }

        gl.viewport(0, 0, level.block_width as i32, level.block_height as i32);
        gl.bind_vertex_array(vertex_array);
        gl.draw_arrays(api::TRIANGLES, 0, 3);

        let ty = match format.staging {
            StagingFormat::Rgba32Uint => api::UNSIGNED_INT,
            StagingFormat::Rgba16Uint => api::UNSIGNED_SHORT,
        };
        gl.bind_buffer(api::PIXEL_PACK_BUFFER, buffer.id);
        gl.read_pixels_to_buffer(
            0,
            0,
            level.block_width as i32,
            level.block_height as i32,
            api::RGBA_INTEGER,
            ty,
            level.offset as i64,
        );
        Ok(())
    }

    fn copy_level(
        &self,
        _recorder: &mut GlRecorder,
        buffer: &GlBuffer,
        output: &GlTexture,
        format: &FormatDescriptor,
        srgb: bool,
        dispatch: LevelDispatch<'_>,
    ) -> Result<()> {
        let level = dispatch.level;
        if level.range().end > buffer.size {
            return Err(EncodeError::Backend(format!(
                "level {} range {:?} outside packed buffer of {} bytes",
                dispatch.index,
                level.range(),
                buffer.size
            )));
        }
        let internal_format = format
            .gl_format(srgb)
            .ok_or_else(|| EncodeError::UnsupportedFormat(format.name.to_string()))?;

        let gl = &self.gl;
        gl.bind_buffer(api::PIXEL_PACK_BUFFER, BufferId::NONE);
        gl.bind_buffer(api::PIXEL_UNPACK_BUFFER, buffer.id);
        gl.bind_texture(api::TEXTURE_2D, output.id);
        gl.compressed_tex_sub_image_2d(
            api::TEXTURE_2D,
            dispatch.index as i32,
            0,
            0,
            level.width as i32,
            level.height as i32,
            internal_format,
            level.size() as i32,
            level.offset as i64,
        );
        Ok(())
    }

    fn submit(&self, recorder: GlRecorder) -> Result<()> {
        drop(recorder);
        self.check_error().map_err(|e| {
            warn!("GL encode failed: {}", e);
            e
        })
    }

    fn read_elapsed_ms(&self) -> BoxFuture<'_, Result<Option<f64>>> {
        futures::future::ready(Ok(None)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeGl;
    use super::*;
    use crate::layout::plan_layout;

    fn backend(gl: &Arc<FakeGl>) -> GlBackend {
        GlBackend::new(Arc::clone(gl) as Arc<dyn GlApi>, true)
    }

    #[test]
    fn test_detect_formats_from_extensions() {
        let caps = detect_formats(&["WEBGL_compressed_texture_etc".to_string()]);
        // ETC2 RGBA has no fragment kernel
        assert_eq!(caps.names(), vec!["eac-r", "eac-rg", "etc2-rgb"]);

        let caps = detect_formats(&[
            "GL_ARB_texture_compression_bptc".to_string(),
            "EXT_texture_compression_rgtc".to_string(),
        ]);
        assert_eq!(caps.names(), vec!["bc4-r", "bc5-rg", "bc7-rgb", "bc7-rgba"]);

        assert!(detect_formats(&[]).is_empty());
    }

    #[test]
    fn test_full_context_excludes_bc3() {
        let gl = Arc::new(FakeGl::full());
        let backend = backend(&gl);
        assert!(!backend.capabilities().contains(FormatId::Bc3Rgba));
        assert!(backend.capabilities().contains(FormatId::Bc1Rgb));
        assert_eq!(backend.capabilities().len(), 10);
    }

    #[tokio::test]
    async fn test_compile_failure_reports_format() {
        let gl = Arc::new(FakeGl::full().failing_on("broken"));
        let backend = backend(&gl);
        let err = backend
            .compile_program(FormatId::Bc4R, "void main() { broken }".to_string())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EncodeError::ShaderCompile { format: "bc4-r", .. }));
        // The failed fragment shader is not leaked, the shared vertex shader stays
        assert_eq!(gl.live_shaders(), 1);
    }

    #[tokio::test]
    async fn test_programs_deleted_on_drop() {
        let gl = Arc::new(FakeGl::full());
        let backend = backend(&gl);
        let program = backend
            .compile_program(FormatId::Bc7Rgb, "void main() {}".to_string())
            .await
            .unwrap();
        // blit + encode program
        assert_eq!(gl.live_programs(), 2);
        drop(program);
        assert_eq!(gl.live_programs(), 1);
        drop(backend);
        assert_eq!(gl.live_programs(), 0);
        assert_eq!(gl.live_shaders(), 0);
        assert_eq!(gl.live_vertex_arrays(), 0);
    }

    #[tokio::test]
    async fn test_encode_levels_into_packed_buffer() {
        let gl = Arc::new(FakeGl::full());
        let backend = backend(&gl);
        let desc = FormatId::Bc1Rgb.descriptor();
        let program = backend
            .compile_program(FormatId::Bc1Rgb, "void main() {}".to_string())
            .await
            .unwrap();
        let plan = plan_layout(16, 8, desc.block_bytes, true, backend.row_alignment());

        let mut recorder = backend.begin_commands().unwrap();
        let input = backend.create_work_texture(16, 8, plan.mip_count(), false).unwrap();
        let output = backend
            .create_output_texture(desc, 16, 8, plan.mip_count(), false, WrapMode::Clamp)
            .unwrap();
        let buffer = backend.create_packed_buffer(plan.total_size()).unwrap();

        for (index, level) in plan.levels().iter().enumerate() {
            let dispatch = LevelDispatch {
                index: index as u32,
                count: plan.mip_count(),
                level,
            };
            backend
                .encode_level(&mut recorder, &program, &input, &buffer, desc, dispatch)
                .unwrap();
            backend
                .copy_level(&mut recorder, &buffer, &output, desc, false, dispatch)
                .unwrap();
        }
        backend.submit(recorder).unwrap();

        let reads = gl.packed_reads();
        assert_eq!(reads.len(), 3);
        assert_eq!((reads[0].width, reads[0].height), (4, 2));
        assert_eq!(reads[0].ty, api::UNSIGNED_SHORT);
        assert_eq!(reads[1].offset, 8 * 4 * 2);

        let uploads = gl.uploads();
        assert_eq!(uploads.len(), 3);
        assert!(uploads.iter().all(|u| u.texture == output.id()));
        assert_eq!(uploads[2].level, 2);
        assert_eq!((uploads[2].width, uploads[2].height), (4, 2));
        assert_eq!(uploads[0].format, 0x83f0);
    }

    #[tokio::test]
    async fn test_count_channels_restores_state() {
        let gl = Arc::new(FakeGl::full().with_pixel([128, 128, 255, 255]));
        let backend = backend(&gl);
        gl.bind_framebuffer(api::FRAMEBUFFER, FramebufferId(77));
        let host = GlTexture::from_raw(gl.host_texture(api::RGBA8), 8, 8, api::RGBA8);

        let counters = backend.count_channels(&host).await.unwrap();
        assert_eq!(counters.samples, 64);
        assert_eq!(counters.classify(), ChannelCount::Rg);
        assert_eq!(gl.get_integer(api::DRAW_FRAMEBUFFER_BINDING), 77);
        assert_eq!(gl.live_framebuffers(), 0);
    }

    #[test]
    fn test_host_texture_hints() {
        let gl = Arc::new(FakeGl::full());
        let backend = backend(&gl);
        let r = GlTexture::from_raw(TextureId(1), 4, 4, api::R8);
        let rg = GlTexture::from_raw(TextureId(2), 4, 4, api::RG16);
        let srgb = GlTexture::from_raw(TextureId(3), 4, 4, api::SRGB8_ALPHA8);
        assert_eq!(backend.texture_channel_hint(&r), Some(ChannelCount::R));
        assert_eq!(backend.texture_channel_hint(&rg), Some(ChannelCount::Rg));
        assert_eq!(backend.texture_channel_hint(&srgb), None);
        assert!(backend.texture_is_srgb(&srgb));
    }

    #[test]
    fn test_context_loss_surfaces() {
        let gl = Arc::new(FakeGl::full());
        let backend = backend(&gl);
        let recorder = backend.begin_commands().unwrap();
        gl.raise_error(api::CONTEXT_LOST);
        assert!(matches!(backend.submit(recorder), Err(EncodeError::DeviceLost(_))));
        assert_eq!(gl.live_framebuffers(), 0);
    }
}
