//! Ambient GL state captured around an encode

use super::api::{self, BufferId, FramebufferId, GlApi, ProgramId, TextureId, VertexArrayId};

/// Toggles the encoder disables while it draws.
pub const TOGGLES: [u32; 5] = [
    api::BLEND,
    api::DEPTH_TEST,
    api::STENCIL_TEST,
    api::CULL_FACE,
    api::SCISSOR_TEST,
];

/// Every binding and toggle the backend may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDeviceState {
    pub program: ProgramId,
    pub active_texture: u32,
    /// 2D binding of texture unit 0, the only unit the backend uses
    pub texture_unit0: TextureId,
    pub draw_framebuffer: FramebufferId,
    pub read_framebuffer: FramebufferId,
    pub viewport: [i32; 4],
    pub toggles: [bool; TOGGLES.len()],
    pub pixel_pack_buffer: BufferId,
    pub pixel_unpack_buffer: BufferId,
    pub array_buffer: BufferId,
    pub vertex_array: VertexArrayId,
}

fn handle(gl: &dyn GlApi, pname: u32) -> u32 {
    gl.get_integer(pname) as u32
}

impl SavedDeviceState {
    /// Query the current state.
    pub fn capture(gl: &dyn GlApi) -> Self {
        let active_texture = handle(gl, api::ACTIVE_TEXTURE);
        let texture_unit0 = if active_texture == api::TEXTURE0 {
            TextureId(handle(gl, api::TEXTURE_BINDING_2D))
        } else {
            gl.active_texture(api::TEXTURE0);
            let bound = TextureId(handle(gl, api::TEXTURE_BINDING_2D));
            gl.active_texture(active_texture);
            bound
        };

        Self {
            program: ProgramId(handle(gl, api::CURRENT_PROGRAM)),
            active_texture,
            texture_unit0,
            draw_framebuffer: FramebufferId(handle(gl, api::DRAW_FRAMEBUFFER_BINDING)),
            read_framebuffer: FramebufferId(handle(gl, api::READ_FRAMEBUFFER_BINDING)),
            viewport: gl.get_viewport(),
            toggles: TOGGLES.map(|cap| gl.is_enabled(cap)),
            pixel_pack_buffer: BufferId(handle(gl, api::PIXEL_PACK_BUFFER_BINDING)),
            pixel_unpack_buffer: BufferId(handle(gl, api::PIXEL_UNPACK_BUFFER_BINDING)),
            array_buffer: BufferId(handle(gl, api::ARRAY_BUFFER_BINDING)),
            vertex_array: VertexArrayId(handle(gl, api::VERTEX_ARRAY_BINDING)),
        }
    }

    /// Put the context back exactly as captured.
    pub fn apply(&self, gl: &dyn GlApi) {
        gl.bind_framebuffer(api::DRAW_FRAMEBUFFER, self.draw_framebuffer);
        gl.bind_framebuffer(api::READ_FRAMEBUFFER, self.read_framebuffer);

        gl.active_texture(api::TEXTURE0);
        gl.bind_texture(api::TEXTURE_2D, self.texture_unit0);
        gl.active_texture(self.active_texture);
        gl.use_program(self.program);

        let [x, y, w, h] = self.viewport;
        gl.viewport(x, y, w, h);

        for (cap, enabled) in TOGGLES.iter().zip(self.toggles) {
            if enabled {
                gl.enable(*cap);
            } else {
                gl.disable(*cap);
            }
        }

        gl.bind_buffer(api::PIXEL_PACK_BUFFER, self.pixel_pack_buffer);
        gl.bind_buffer(api::PIXEL_UNPACK_BUFFER, self.pixel_unpack_buffer);
        // VAO first: the array buffer binding is global, not per-VAO
        gl.bind_vertex_array(self.vertex_array);
        gl.bind_buffer(api::ARRAY_BUFFER, self.array_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::gl::fake::FakeGl;

    #[test]
    fn test_capture_apply_roundtrip() {
        let gl = FakeGl::new(&[]);
        gl.active_texture(api::TEXTURE0 + 3);
        gl.use_program(ProgramId(7));
        gl.bind_framebuffer(api::FRAMEBUFFER, FramebufferId(5));
        gl.bind_framebuffer(api::READ_FRAMEBUFFER, FramebufferId(6));
        gl.viewport(1, 2, 300, 200);
        gl.enable(api::BLEND);
        gl.enable(api::SCISSOR_TEST);
        gl.bind_buffer(api::PIXEL_UNPACK_BUFFER, BufferId(9));
        gl.bind_vertex_array(VertexArrayId(4));
        gl.bind_buffer(api::ARRAY_BUFFER, BufferId(11));

        let saved = SavedDeviceState::capture(&gl);
        assert_eq!(saved.active_texture, api::TEXTURE0 + 3);
        assert_eq!(saved.toggles, [true, false, false, false, true]);

        // Trash everything
        gl.use_program(ProgramId(99));
        gl.bind_framebuffer(api::FRAMEBUFFER, FramebufferId(42));
        gl.viewport(0, 0, 4, 4);
        gl.disable(api::BLEND);
        gl.enable(api::DEPTH_TEST);
        gl.bind_buffer(api::PIXEL_UNPACK_BUFFER, BufferId::NONE);
        gl.bind_texture(api::TEXTURE_2D, TextureId(77));
        gl.bind_vertex_array(VertexArrayId::NONE);

        saved.apply(&gl);
        assert_eq!(SavedDeviceState::capture(&gl), saved);
        assert_eq!(gl.get_integer(api::ACTIVE_TEXTURE) as u32, api::TEXTURE0 + 3);
    }
}
