//! Recording GL context for tests
//!
//! Tracks bindings, toggles and live objects closely enough for state
//! restoration and leak checks, and records every compressed upload.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::api::{self, *};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedUpload {
    pub texture: TextureId,
    pub level: i32,
    pub width: i32,
    pub height: i32,
    pub format: u32,
    pub size: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRead {
    pub buffer: BufferId,
    pub width: i32,
    pub height: i32,
    pub ty: u32,
    pub offset: i64,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    integers: HashMap<u32, i32>,
    texture_units: HashMap<u32, TextureId>,
    viewport: [i32; 4],
    enabled: BTreeSet<u32>,
    shader_sources: HashMap<ShaderId, String>,
    live_textures: BTreeSet<TextureId>,
    live_buffers: BTreeSet<BufferId>,
    live_framebuffers: BTreeSet<FramebufferId>,
    live_programs: BTreeSet<ProgramId>,
    live_shaders: BTreeSet<ShaderId>,
    live_vertex_arrays: BTreeSet<VertexArrayId>,
    texture_formats: HashMap<TextureId, u32>,
    draws: usize,
    compiles: usize,
    uploads: Vec<CompressedUpload>,
    packed_reads: Vec<PackedRead>,
    pending_error: u32,
}

impl Inner {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn active_unit(&self) -> u32 {
        self.integers
            .get(&api::ACTIVE_TEXTURE)
            .map(|v| *v as u32)
            .unwrap_or(api::TEXTURE0)
    }

    fn bound(&self, pname: u32) -> u32 {
        self.integers.get(&pname).copied().unwrap_or(0) as u32
    }
}

pub struct FakeGl {
    extensions: Vec<String>,
    /// Fragment sources containing this marker fail to compile
    fail_marker: Option<String>,
    /// RGBA8 value returned for every pixel by `read_pixels`
    pixel: [u8; 4],
    inner: Mutex<Inner>,
}

impl FakeGl {
    pub fn new(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            fail_marker: None,
            pixel: [0, 0, 0, 255],
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Every extension the backend knows about.
    pub fn full() -> Self {
        Self::new(&[
            "EXT_texture_compression_bptc",
            "WEBGL_compressed_texture_s3tc",
            "EXT_texture_compression_rgtc",
            "WEBGL_compressed_texture_etc",
            "WEBGL_compressed_texture_astc",
        ])
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn with_pixel(mut self, pixel: [u8; 4]) -> Self {
        self.pixel = pixel;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn raise_error(&self, error: u32) {
        self.lock().pending_error = error;
    }

    pub fn uploads(&self) -> Vec<CompressedUpload> {
        self.lock().uploads.clone()
    }

    pub fn packed_reads(&self) -> Vec<PackedRead> {
        self.lock().packed_reads.clone()
    }

    pub fn draws(&self) -> usize {
        self.lock().draws
    }

    /// Fragment/vertex shaders compiled so far.
    pub fn compiles(&self) -> usize {
        self.lock().compiles
    }

    pub fn live_textures(&self) -> usize {
        self.lock().live_textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.lock().live_buffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.lock().live_framebuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.lock().live_programs.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.lock().live_shaders.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.lock().live_vertex_arrays.len()
    }

    /// Pretend the host created a texture with the given storage format.
    pub fn host_texture(&self, internal_format: u32) -> TextureId {
        let mut inner = self.lock();
        let id = TextureId(inner.next());
        inner.live_textures.insert(id);
        inner.texture_formats.insert(id, internal_format);
        id
    }

    pub fn texture_format(&self, texture: TextureId) -> Option<u32> {
        self.lock().texture_formats.get(&texture).copied()
    }
}

impl GlApi for FakeGl {
    fn supported_extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn get_error(&self) -> u32 {
        std::mem::replace(&mut self.lock().pending_error, api::NO_ERROR)
    }

    fn get_integer(&self, pname: u32) -> i32 {
        let inner = self.lock();
        match pname {
            api::ACTIVE_TEXTURE => inner.active_unit() as i32,
            api::TEXTURE_BINDING_2D => inner
                .texture_units
                .get(&inner.active_unit())
                .map(|t| t.0 as i32)
                .unwrap_or(0),
            other => inner.integers.get(&other).copied().unwrap_or(0),
        }
    }

    fn get_viewport(&self) -> [i32; 4] {
        self.lock().viewport
    }

    fn is_enabled(&self, cap: u32) -> bool {
        self.lock().enabled.contains(&cap)
    }

    fn enable(&self, cap: u32) {
        self.lock().enabled.insert(cap);
    }

    fn disable(&self, cap: u32) {
        self.lock().enabled.remove(&cap);
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.lock().viewport = [x, y, width, height];
    }

    fn create_shader(&self, _kind: u32) -> Result<ShaderId, String> {
        let mut inner = self.lock();
        let id = ShaderId(inner.next());
        inner.live_shaders.insert(id);
        Ok(id)
    }

    fn shader_source(&self, shader: ShaderId, source: &str) {
        self.lock().shader_sources.insert(shader, source.to_string());
    }

    fn compile_shader(&self, _shader: ShaderId) {
        self.lock().compiles += 1;
    }

    fn shader_compile_status(&self, shader: ShaderId) -> bool {
        let inner = self.lock();
        match (&self.fail_marker, inner.shader_sources.get(&shader)) {
            (Some(marker), Some(source)) => !source.contains(marker.as_str()),
            _ => true,
        }
    }

    fn shader_info_log(&self, _shader: ShaderId) -> String {
        "ERROR: 0:1: syntax error".to_string()
    }

    fn delete_shader(&self, shader: ShaderId) {
        self.lock().live_shaders.remove(&shader);
    }

    fn create_program(&self) -> Result<ProgramId, String> {
        let mut inner = self.lock();
        let id = ProgramId(inner.next());
        inner.live_programs.insert(id);
        Ok(id)
    }

    fn attach_shader(&self, _program: ProgramId, _shader: ShaderId) {}

    fn link_program(&self, _program: ProgramId) {}

    fn program_link_status(&self, _program: ProgramId) -> bool {
        true
    }

    fn program_info_log(&self, _program: ProgramId) -> String {
        String::new()
    }

    fn delete_program(&self, program: ProgramId) {
        self.lock().live_programs.remove(&program);
    }

    fn use_program(&self, program: ProgramId) {
        self.lock().integers.insert(api::CURRENT_PROGRAM, program.0 as i32);
    }

    fn uniform_location(&self, _program: ProgramId, _name: &str) -> Option<i32> {
        Some(0)
    }

    fn uniform_1i(&self, _location: i32, _value: i32) {}

    fn uniform_2i(&self, _location: i32, _x: i32, _y: i32) {}

    fn create_texture(&self) -> Result<TextureId, String> {
        let mut inner = self.lock();
        let id = TextureId(inner.next());
        inner.live_textures.insert(id);
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut inner = self.lock();
        inner.live_textures.remove(&texture);
        for bound in inner.texture_units.values_mut() {
            if *bound == texture {
                *bound = TextureId::NONE;
            }
        }
    }

    fn active_texture(&self, unit: u32) {
        self.lock().integers.insert(api::ACTIVE_TEXTURE, unit as i32);
    }

    fn bind_texture(&self, _target: u32, texture: TextureId) {
        let mut inner = self.lock();
        let unit = inner.active_unit();
        inner.texture_units.insert(unit, texture);
    }

    fn tex_storage_2d(&self, _target: u32, _levels: i32, internal_format: u32, _width: i32, _height: i32) {
        let mut inner = self.lock();
        let unit = inner.active_unit();
        if let Some(texture) = inner.texture_units.get(&unit).copied() {
            inner.texture_formats.insert(texture, internal_format);
        }
    }

    fn tex_sub_image_2d(
        &self,
        _target: u32,
        _level: i32,
        _x: i32,
        _y: i32,
        width: i32,
        height: i32,
        _format: u32,
        _ty: u32,
        pixels: &[u8],
    ) {
        assert_eq!(pixels.len(), (width * height * 4) as usize);
        assert_eq!(
            self.lock().bound(api::PIXEL_UNPACK_BUFFER_BINDING),
            0,
            "client-memory upload with an unpack buffer bound"
        );
    }

    fn tex_parameter_i(&self, _target: u32, _pname: u32, _value: i32) {}

    fn generate_mipmap(&self, _target: u32) {}

    fn compressed_tex_sub_image_2d(
        &self,
        _target: u32,
        level: i32,
        _x: i32,
        _y: i32,
        width: i32,
        height: i32,
        format: u32,
        image_size: i32,
        offset: i64,
    ) {
        let mut inner = self.lock();
        let unit = inner.active_unit();
        let texture = inner.texture_units.get(&unit).copied().unwrap_or_default();
        inner.uploads.push(CompressedUpload {
            texture,
            level,
            width,
            height,
            format,
            size: image_size,
            offset,
        });
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, String> {
        let mut inner = self.lock();
        let id = FramebufferId(inner.next());
        inner.live_framebuffers.insert(id);
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        self.lock().live_framebuffers.remove(&framebuffer);
    }

    fn bind_framebuffer(&self, target: u32, framebuffer: FramebufferId) {
        let mut inner = self.lock();
        let value = framebuffer.0 as i32;
        if target == api::FRAMEBUFFER || target == api::DRAW_FRAMEBUFFER {
            inner.integers.insert(api::DRAW_FRAMEBUFFER_BINDING, value);
        }
        if target == api::FRAMEBUFFER || target == api::READ_FRAMEBUFFER {
            inner.integers.insert(api::READ_FRAMEBUFFER_BINDING, value);
        }
    }

    fn framebuffer_texture_2d(
        &self,
        _target: u32,
        _attachment: u32,
        _tex_target: u32,
        _texture: TextureId,
        _level: i32,
    ) {
    }

    fn check_framebuffer_status(&self, _target: u32) -> u32 {
        api::FRAMEBUFFER_COMPLETE
    }

    fn read_buffer(&self, _source: u32) {}

    fn read_pixels(&self, _x: i32, _y: i32, width: i32, height: i32, _format: u32, _ty: u32, out: &mut [u8]) {
        assert_eq!(out.len(), (width * height * 4) as usize);
        for chunk in out.chunks_exact_mut(4) {
            chunk.copy_from_slice(&self.pixel);
        }
    }

    fn read_pixels_to_buffer(
        &self,
        _x: i32,
        _y: i32,
        width: i32,
        height: i32,
        _format: u32,
        ty: u32,
        offset: i64,
    ) {
        let mut inner = self.lock();
        let buffer = BufferId(inner.bound(api::PIXEL_PACK_BUFFER_BINDING));
        inner.packed_reads.push(PackedRead {
            buffer,
            width,
            height,
            ty,
            offset,
        });
    }

    fn create_buffer(&self) -> Result<BufferId, String> {
        let mut inner = self.lock();
        let id = BufferId(inner.next());
        inner.live_buffers.insert(id);
        Ok(id)
    }

    fn delete_buffer(&self, buffer: BufferId) {
        let mut inner = self.lock();
        inner.live_buffers.remove(&buffer);
        for pname in [
            api::ARRAY_BUFFER_BINDING,
            api::PIXEL_PACK_BUFFER_BINDING,
            api::PIXEL_UNPACK_BUFFER_BINDING,
        ] {
            if inner.bound(pname) == buffer.0 {
                inner.integers.insert(pname, 0);
            }
        }
    }

    fn bind_buffer(&self, target: u32, buffer: BufferId) {
        let pname = match target {
            api::ARRAY_BUFFER => api::ARRAY_BUFFER_BINDING,
            api::PIXEL_PACK_BUFFER => api::PIXEL_PACK_BUFFER_BINDING,
            api::PIXEL_UNPACK_BUFFER => api::PIXEL_UNPACK_BUFFER_BINDING,
            _ => return,
        };
        self.lock().integers.insert(pname, buffer.0 as i32);
    }

    fn buffer_data_size(&self, _target: u32, _size: i64, _usage: u32) {}

    fn create_vertex_array(&self) -> Result<VertexArrayId, String> {
        let mut inner = self.lock();
        let id = VertexArrayId(inner.next());
        inner.live_vertex_arrays.insert(id);
        Ok(id)
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        self.lock().live_vertex_arrays.remove(&vertex_array);
    }

    fn bind_vertex_array(&self, vertex_array: VertexArrayId) {
        self.lock()
            .integers
            .insert(api::VERTEX_ARRAY_BINDING, vertex_array.0 as i32);
    }

    fn draw_arrays(&self, _mode: u32, _first: i32, _count: i32) {
        self.lock().draws += 1;
    }
}
