//! Minimal GL ES 3.0 / WebGL2 surface used by the immediate-mode backend
//!
//! Hosts implement [`GlApi`] over whatever binding they render with (a native
//! loader, a WebGL2 context, a test double). Object handles are typed; `0` is
//! the "nothing bound" handle for every kind.

use std::fmt;

macro_rules! gl_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: $name = $name(0);

            pub fn is_none(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

gl_handle!(ShaderId);
gl_handle!(ProgramId);
gl_handle!(TextureId);
gl_handle!(FramebufferId);
gl_handle!(BufferId);
gl_handle!(VertexArrayId);

// Errors
pub const NO_ERROR: u32 = 0;
pub const CONTEXT_LOST: u32 = 0x9242;

// Capabilities and state queries
pub const BLEND: u32 = 0x0be2;
pub const CULL_FACE: u32 = 0x0b44;
pub const DEPTH_TEST: u32 = 0x0b71;
pub const STENCIL_TEST: u32 = 0x0b90;
pub const SCISSOR_TEST: u32 = 0x0c11;
pub const VIEWPORT: u32 = 0x0ba2;
pub const CURRENT_PROGRAM: u32 = 0x8b8d;
pub const ACTIVE_TEXTURE: u32 = 0x84e0;
pub const TEXTURE_BINDING_2D: u32 = 0x8069;
pub const DRAW_FRAMEBUFFER_BINDING: u32 = 0x8ca6;
pub const READ_FRAMEBUFFER_BINDING: u32 = 0x8caa;
pub const ARRAY_BUFFER_BINDING: u32 = 0x8894;
pub const PIXEL_PACK_BUFFER_BINDING: u32 = 0x88ed;
pub const PIXEL_UNPACK_BUFFER_BINDING: u32 = 0x88ef;
pub const VERTEX_ARRAY_BINDING: u32 = 0x85b5;

// Shaders
pub const VERTEX_SHADER: u32 = 0x8b31;
pub const FRAGMENT_SHADER: u32 = 0x8b30;

// Textures
pub const TEXTURE_2D: u32 = 0x0de1;
pub const TEXTURE0: u32 = 0x84c0;
pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
pub const TEXTURE_WRAP_S: u32 = 0x2802;
pub const TEXTURE_WRAP_T: u32 = 0x2803;
pub const TEXTURE_BASE_LEVEL: u32 = 0x813c;
pub const TEXTURE_MAX_LEVEL: u32 = 0x813d;
pub const NEAREST: i32 = 0x2600;
pub const LINEAR: i32 = 0x2601;
pub const LINEAR_MIPMAP_LINEAR: i32 = 0x2703;
pub const REPEAT: i32 = 0x2901;
pub const MIRRORED_REPEAT: i32 = 0x8370;
pub const CLAMP_TO_EDGE: i32 = 0x812f;

// Internal formats
pub const R8: u32 = 0x8229;
pub const R16: u32 = 0x822a;
pub const RG8: u32 = 0x822b;
pub const RG16: u32 = 0x822c;
pub const RGBA8: u32 = 0x8058;
pub const SRGB8: u32 = 0x8c41;
pub const SRGB8_ALPHA8: u32 = 0x8c43;
pub const RGBA16UI: u32 = 0x8d76;
pub const RGBA32UI: u32 = 0x8d70;

// Pixel transfer
pub const RGBA: u32 = 0x1908;
pub const RGBA_INTEGER: u32 = 0x8d99;
pub const UNSIGNED_BYTE: u32 = 0x1401;
pub const UNSIGNED_SHORT: u32 = 0x1403;
pub const UNSIGNED_INT: u32 = 0x1405;

// Framebuffers
pub const FRAMEBUFFER: u32 = 0x8d40;
pub const READ_FRAMEBUFFER: u32 = 0x8ca8;
pub const DRAW_FRAMEBUFFER: u32 = 0x8ca9;
pub const COLOR_ATTACHMENT0: u32 = 0x8ce0;
pub const FRAMEBUFFER_COMPLETE: u32 = 0x8cd5;

// Buffers
pub const ARRAY_BUFFER: u32 = 0x8892;
pub const PIXEL_PACK_BUFFER: u32 = 0x88eb;
pub const PIXEL_UNPACK_BUFFER: u32 = 0x88ec;
pub const STREAM_COPY: u32 = 0x88e2;

// Drawing
pub const TRIANGLES: u32 = 0x0004;

/// The subset of GL the backend issues.
///
/// Object creation returns `Err` with a driver message when the context
/// cannot allocate (typically because it was lost).
pub trait GlApi: Send + Sync {
    /// Extension names as reported by the context (`GL_*` or WebGL names).
    fn supported_extensions(&self) -> Vec<String>;
    fn get_error(&self) -> u32;

    fn get_integer(&self, pname: u32) -> i32;
    fn get_viewport(&self) -> [i32; 4];
    fn is_enabled(&self, cap: u32) -> bool;
    fn enable(&self, cap: u32);
    fn disable(&self, cap: u32);
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);

    fn create_shader(&self, kind: u32) -> Result<ShaderId, String>;
    fn shader_source(&self, shader: ShaderId, source: &str);
    fn compile_shader(&self, shader: ShaderId);
    fn shader_compile_status(&self, shader: ShaderId) -> bool;
    fn shader_info_log(&self, shader: ShaderId) -> String;
    fn delete_shader(&self, shader: ShaderId);

    fn create_program(&self) -> Result<ProgramId, String>;
    fn attach_shader(&self, program: ProgramId, shader: ShaderId);
    fn link_program(&self, program: ProgramId);
    fn program_link_status(&self, program: ProgramId) -> bool;
    fn program_info_log(&self, program: ProgramId) -> String;
    fn delete_program(&self, program: ProgramId);
    fn use_program(&self, program: ProgramId);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<i32>;
    fn uniform_1i(&self, location: i32, value: i32);
    fn uniform_2i(&self, location: i32, x: i32, y: i32);

    fn create_texture(&self) -> Result<TextureId, String>;
    fn delete_texture(&self, texture: TextureId);
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: u32, texture: TextureId);
    fn tex_storage_2d(&self, target: u32, levels: i32, internal_format: u32, width: i32, height: i32);
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    );
    fn tex_parameter_i(&self, target: u32, pname: u32, value: i32);
    fn generate_mipmap(&self, target: u32);
    /// Upload compressed data from the bound pixel-unpack buffer at `offset`.
    #[allow(clippy::too_many_arguments)]
    fn compressed_tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        image_size: i32,
        offset: i64,
    );

    fn create_framebuffer(&self) -> Result<FramebufferId, String>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);
    fn bind_framebuffer(&self, target: u32, framebuffer: FramebufferId);
    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        tex_target: u32,
        texture: TextureId,
        level: i32,
    );
    fn check_framebuffer_status(&self, target: u32) -> u32;
    fn read_buffer(&self, source: u32);
    /// Read into host memory (no pixel-pack buffer bound).
    #[allow(clippy::too_many_arguments)]
    fn read_pixels(&self, x: i32, y: i32, width: i32, height: i32, format: u32, ty: u32, out: &mut [u8]);
    /// Read into the bound pixel-pack buffer at `offset`.
    #[allow(clippy::too_many_arguments)]
    fn read_pixels_to_buffer(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        offset: i64,
    );

    fn create_buffer(&self) -> Result<BufferId, String>;
    fn delete_buffer(&self, buffer: BufferId);
    fn bind_buffer(&self, target: u32, buffer: BufferId);
    fn buffer_data_size(&self, target: u32, size: i64, usage: u32);

    fn create_vertex_array(&self) -> Result<VertexArrayId, String>;
    fn delete_vertex_array(&self, vertex_array: VertexArrayId);
    fn bind_vertex_array(&self, vertex_array: VertexArrayId);
    fn draw_arrays(&self, mode: u32, first: i32, count: i32);
}
