// Texture render stage
//
// Owns the shader program, the external texture the camera writes into, and
// the static quad geometry. One `draw()` per captured frame.

use super::shaders::{
    CLEAR_COLOR, FRAGMENT_SHADER, MVP_UNIFORM, POSITION_ATTRIB, QUAD_POSITION_OFFSET,
    QUAD_STRIDE_BYTES, QUAD_UV_OFFSET, QUAD_VERTEX_COUNT, QUAD_VERTICES, ST_UNIFORM,
    TEX_COORD_ATTRIB, VERTEX_SHADER,
};
use super::{
    BufferId, GraphicsApi, GraphicsError, ProgramId, ShaderStage, TextureId, UniformLocation,
};
use crate::capture::{Frame, Transform, IDENTITY_TRANSFORM};

#[derive(Debug, Clone, Copy)]
struct ProgramHandles {
    program: ProgramId,
    position: u32,
    tex_coord: u32,
    mvp: UniformLocation,
    st: UniformLocation,
}

pub struct TextureRenderStage<G: GraphicsApi> {
    gl: G,
    fragment_source: String,
    handles: Option<ProgramHandles>,
    texture: Option<TextureId>,
    vertices: Option<BufferId>,
    mvp: Transform,
    frames_drawn: u64,
}

impl<G: GraphicsApi> TextureRenderStage<G> {
    pub fn new(gl: G) -> Self {
        Self {
            gl,
            fragment_source: FRAGMENT_SHADER.to_string(),
            handles: None,
            texture: None,
            vertices: None,
            mvp: IDENTITY_TRANSFORM,
            frames_drawn: 0,
        }
    }

    /// Build the program, the external texture and the quad buffer.
    ///
    /// Requires the encoder's render target to be current.
    pub fn configure(&mut self) -> Result<TextureId, GraphicsError> {
        let handles = self.build_program(&self.fragment_source.clone())?;
        self.replace_handles(handles);

        if self.vertices.is_none() {
            let buffer = self.gl.create_vertex_buffer(&QUAD_VERTICES)?;
            self.check("create vertex buffer")?;
            self.vertices = Some(buffer);
        }

        let texture = match self.texture {
            Some(texture) => texture,
            None => {
                let texture = self.gl.create_external_texture()?;
                self.check("glTexParameter")?;
                self.texture = Some(texture);
                texture
            }
        };

        log::debug!("[Render] Configured, program {} texture {}", handles.program.0, texture.0);
        Ok(texture)
    }

    /// Draw the latched camera frame onto the current render target.
    ///
    /// Every GL error raised along the way is turned into `GraphicsError::Gl`
    /// naming the call that failed.
    pub fn draw(&mut self, frame: &Frame) -> Result<(), GraphicsError> {
        let handles = self.handles.ok_or(GraphicsError::NotConfigured)?;
        let texture = self.texture.ok_or(GraphicsError::NotConfigured)?;
        let vertices = self.vertices.ok_or(GraphicsError::NotConfigured)?;

        self.check("onDrawFrame start")?;
        self.gl.clear(CLEAR_COLOR);

        self.gl.use_program(handles.program);
        self.check("glUseProgram")?;

        self.gl.bind_external_texture(texture);

        self.gl.vertex_attrib(vertices, handles.position, 3, QUAD_STRIDE_BYTES, QUAD_POSITION_OFFSET);
        self.check("glVertexAttribPointer maPosition")?;

        self.gl.vertex_attrib(vertices, handles.tex_coord, 2, QUAD_STRIDE_BYTES, QUAD_UV_OFFSET);
        self.check("glVertexAttribPointer maTextureHandle")?;

        self.gl.uniform_matrix4(handles.mvp, &self.mvp);
        self.gl.uniform_matrix4(handles.st, &frame.transform);

        self.gl.draw_triangle_strip(0, QUAD_VERTEX_COUNT);
        self.check("glDrawArrays")?;

        self.gl.finish();
        self.frames_drawn += 1;
        Ok(())
    }

    /// Swap the fragment stage. `None` restores the default shader.
    ///
    /// The new program is built before the old one is deleted, so a bad
    /// source leaves the stage drawing with the previous program.
    pub fn replace_shader(&mut self, fragment: Option<&str>) -> Result<(), GraphicsError> {
        let source = fragment.unwrap_or(FRAGMENT_SHADER);
        if source == self.fragment_source && self.handles.is_some() {
            return Ok(());
        }

        let handles = self.build_program(source)?;
        self.replace_handles(handles);
        self.fragment_source = source.to_string();
        log::debug!("[Render] Fragment shader replaced, program {}", handles.program.0);
        Ok(())
    }

    /// Re-create the program against a newly current render target.
    ///
    /// The texture and quad buffer are kept; only the program is rebuilt.
    pub fn rebind(&mut self) -> Result<(), GraphicsError> {
        if self.handles.is_none() {
            return Err(GraphicsError::NotConfigured);
        }
        let handles = self.build_program(&self.fragment_source.clone())?;
        self.replace_handles(handles);
        Ok(())
    }

    /// Delete every GL object owned by the stage. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(handles) = self.handles.take() {
            self.gl.delete_program(handles.program);
        }
        if let Some(buffer) = self.vertices.take() {
            self.gl.delete_vertex_buffer(buffer);
        }
        if let Some(texture) = self.texture.take() {
            self.gl.delete_texture(texture);
        }
    }

    pub fn is_configured(&self) -> bool {
        self.handles.is_some()
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn uses_default_shader(&self) -> bool {
        self.fragment_source == FRAGMENT_SHADER
    }

    pub fn graphics(&self) -> &G {
        &self.gl
    }

    pub fn graphics_mut(&mut self) -> &mut G {
        &mut self.gl
    }

    fn check(&mut self, op: &'static str) -> Result<(), GraphicsError> {
        match self.gl.take_error() {
            Some(code) => {
                log::error!("[Render] {}: glError 0x{:x}", op, code);
                Err(GraphicsError::Gl { op, code })
            }
            None => Ok(()),
        }
    }

    fn replace_handles(&mut self, handles: ProgramHandles) {
        if let Some(old) = self.handles.replace(handles) {
            if old.program != handles.program {
                self.gl.delete_program(old.program);
            }
        }
    }

    fn build_program(&mut self, fragment: &str) -> Result<ProgramHandles, GraphicsError> {
        let vs = self.gl.compile_shader(ShaderStage::Vertex, VERTEX_SHADER)?;
        let fs = match self.gl.compile_shader(ShaderStage::Fragment, fragment) {
            Ok(fs) => fs,
            Err(e) => {
                self.gl.delete_shader(vs);
                return Err(e);
            }
        };

        let linked = self.gl.link_program(vs, fs);
        self.gl.delete_shader(vs);
        self.gl.delete_shader(fs);
        let program = linked?;

        match self.resolve_handles(program) {
            Ok(handles) => Ok(handles),
            Err(e) => {
                self.gl.delete_program(program);
                Err(e)
            }
        }
    }

    fn resolve_handles(&mut self, program: ProgramId) -> Result<ProgramHandles, GraphicsError> {
        let position = self
            .gl
            .attrib_location(program, POSITION_ATTRIB)
            .ok_or(GraphicsError::MissingLocation(POSITION_ATTRIB))?;
        let tex_coord = self
            .gl
            .attrib_location(program, TEX_COORD_ATTRIB)
            .ok_or(GraphicsError::MissingLocation(TEX_COORD_ATTRIB))?;
        let mvp = self
            .gl
            .uniform_location(program, MVP_UNIFORM)
            .ok_or(GraphicsError::MissingLocation(MVP_UNIFORM))?;
        let st = self
            .gl
            .uniform_location(program, ST_UNIFORM)
            .ok_or(GraphicsError::MissingLocation(ST_UNIFORM))?;

        Ok(ProgramHandles { program, position, tex_coord, mvp, st })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::VERTICAL_FLIP_TRANSFORM;
    use crate::render::shaders::SWAPPED_FRAGMENT_SHADER;
    use crate::render::HeadlessGraphics;
    use crate::test_harness::fake_gl::{GlCall, RecordingGraphics};

    fn frame() -> Frame {
        Frame { sequence: 0, timestamp_nanos: 0, transform: VERTICAL_FLIP_TRANSFORM }
    }

    #[test]
    fn draw_before_configure_fails() {
        let mut stage = TextureRenderStage::new(HeadlessGraphics::new());
        assert!(matches!(stage.draw(&frame()), Err(GraphicsError::NotConfigured)));
    }

    #[test]
    fn draw_issues_quad_with_frame_transform() {
        let mut stage = TextureRenderStage::new(RecordingGraphics::new());
        stage.configure().unwrap();
        stage.draw(&frame()).unwrap();

        let calls = stage.graphics().calls();
        assert!(calls.contains(&GlCall::Clear(CLEAR_COLOR)));
        assert!(calls.contains(&GlCall::DrawStrip { first: 0, count: 4 }));
        assert!(calls.contains(&GlCall::UniformMatrix(VERTICAL_FLIP_TRANSFORM)));
        assert_eq!(calls.last(), Some(&GlCall::Finish));
        assert_eq!(stage.frames_drawn(), 1);
    }

    #[test]
    fn gl_error_after_draw_names_the_call() {
        let mut stage = TextureRenderStage::new(RecordingGraphics::new());
        stage.configure().unwrap();
        stage.graphics_mut().fail_after("draw_triangle_strip", 0x505);

        let err = stage.draw(&frame()).unwrap_err();
        assert!(matches!(err, GraphicsError::Gl { op: "glDrawArrays", code: 0x505 }));
    }

    #[test]
    fn broken_fragment_shader_keeps_previous_program() {
        let mut stage = TextureRenderStage::new(HeadlessGraphics::new());
        stage.configure().unwrap();

        let err = stage.replace_shader(Some("not a shader")).unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompile { stage: ShaderStage::Fragment, .. }));
        assert!(stage.uses_default_shader());
        stage.draw(&frame()).unwrap();
    }

    #[test]
    fn replace_shader_swaps_and_restores() {
        let mut stage = TextureRenderStage::new(HeadlessGraphics::new());
        stage.configure().unwrap();

        stage.replace_shader(Some(SWAPPED_FRAGMENT_SHADER)).unwrap();
        assert!(!stage.uses_default_shader());
        assert_eq!(stage.graphics().live_programs(), 1);

        stage.replace_shader(None).unwrap();
        assert!(stage.uses_default_shader());
        assert_eq!(stage.graphics().live_programs(), 1);
    }

    #[test]
    fn rebind_keeps_texture_and_release_frees_everything() {
        let mut stage = TextureRenderStage::new(HeadlessGraphics::new());
        let texture = stage.configure().unwrap();

        stage.rebind().unwrap();
        assert_eq!(stage.texture(), Some(texture));
        assert_eq!(stage.graphics().live_programs(), 1);

        stage.release();
        stage.release();
        assert_eq!(stage.graphics().live_programs(), 0);
        assert_eq!(stage.graphics().live_textures(), 0);
        assert_eq!(stage.graphics().live_shaders(), 0);
    }
}
