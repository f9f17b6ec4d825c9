// Call-recording graphics backend
//
// Wraps `HeadlessGraphics` and logs every call into a shared list, so a test
// can inspect what the render stage did after the recorder has taken ownership
// of the backend.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::capture::Transform;
use crate::render::{
    BufferId, GraphicsApi, GraphicsError, HeadlessGraphics, ProgramId, ShaderId, ShaderStage, TextureId,
    UniformLocation,
};

#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    CompileShader { stage: ShaderStage, source: String },
    DeleteShader(ShaderId),
    LinkProgram(ShaderId, ShaderId),
    DeleteProgram(ProgramId),
    CreateTexture,
    DeleteTexture(TextureId),
    CreateBuffer(usize),
    DeleteBuffer(BufferId),
    Clear([f32; 4]),
    UseProgram(ProgramId),
    BindTexture(TextureId),
    VertexAttrib { location: u32, components: i32, offset: i32 },
    UniformMatrix(Transform),
    DrawStrip { first: i32, count: i32 },
    Finish,
}

pub type GlCallLog = Arc<Mutex<Vec<GlCall>>>;

pub struct RecordingGraphics {
    inner: HeadlessGraphics,
    log: GlCallLog,
    fail_after: Option<(&'static str, u32)>,
}

impl RecordingGraphics {
    pub fn new() -> Self {
        Self { inner: HeadlessGraphics::new(), log: Arc::new(Mutex::new(Vec::new())), fail_after: None }
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.log.lock().clone()
    }

    pub fn log_handle(&self) -> GlCallLog {
        self.log.clone()
    }

    /// Raise `code` right after the next call to the method named `op`
    pub fn fail_after(&mut self, op: &'static str, code: u32) {
        self.fail_after = Some((op, code));
    }

    pub fn live_programs(&self) -> usize {
        self.inner.live_programs()
    }

    pub fn live_textures(&self) -> usize {
        self.inner.live_textures()
    }

    pub fn live_shaders(&self) -> usize {
        self.inner.live_shaders()
    }

    fn record(&mut self, op: &'static str, call: GlCall) {
        self.log.lock().push(call);
        if let Some((target, code)) = self.fail_after {
            if target == op {
                self.fail_after = None;
                self.inner.raise(code);
            }
        }
    }
}

impl Default for RecordingGraphics {
    fn default() -> Self {
        Self::new()
    }
}

/// Count compiled fragment shaders with exactly this source
pub fn fragment_compiles(calls: &[GlCall], source: &str) -> usize {
    calls
        .iter()
        .filter(|c| matches!(c, GlCall::CompileShader { stage: ShaderStage::Fragment, source: s } if s == source))
        .count()
}

impl GraphicsApi for RecordingGraphics {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GraphicsError> {
        self.record("compile_shader", GlCall::CompileShader { stage, source: source.to_string() });
        self.inner.compile_shader(stage, source)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.record("delete_shader", GlCall::DeleteShader(shader));
        self.inner.delete_shader(shader)
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GraphicsError> {
        self.record("link_program", GlCall::LinkProgram(vertex, fragment));
        self.inner.link_program(vertex, fragment)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.record("delete_program", GlCall::DeleteProgram(program));
        self.inner.delete_program(program)
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        self.inner.attrib_location(program, name)
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.inner.uniform_location(program, name)
    }

    fn create_external_texture(&mut self) -> Result<TextureId, GraphicsError> {
        self.record("create_external_texture", GlCall::CreateTexture);
        self.inner.create_external_texture()
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.record("delete_texture", GlCall::DeleteTexture(texture));
        self.inner.delete_texture(texture)
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, GraphicsError> {
        self.record("create_vertex_buffer", GlCall::CreateBuffer(data.len()));
        self.inner.create_vertex_buffer(data)
    }

    fn delete_vertex_buffer(&mut self, buffer: BufferId) {
        self.record("delete_vertex_buffer", GlCall::DeleteBuffer(buffer));
        self.inner.delete_vertex_buffer(buffer)
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        self.record("clear", GlCall::Clear(rgba));
        self.inner.clear(rgba)
    }

    fn use_program(&mut self, program: ProgramId) {
        self.record("use_program", GlCall::UseProgram(program));
        self.inner.use_program(program)
    }

    fn bind_external_texture(&mut self, texture: TextureId) {
        self.record("bind_external_texture", GlCall::BindTexture(texture));
        self.inner.bind_external_texture(texture)
    }

    fn vertex_attrib(&mut self, buffer: BufferId, location: u32, components: i32, stride: i32, offset: i32) {
        self.record("vertex_attrib", GlCall::VertexAttrib { location, components, offset });
        self.inner.vertex_attrib(buffer, location, components, stride, offset)
    }

    fn uniform_matrix4(&mut self, location: UniformLocation, matrix: &Transform) {
        self.record("uniform_matrix4", GlCall::UniformMatrix(*matrix));
        self.inner.uniform_matrix4(location, matrix)
    }

    fn draw_triangle_strip(&mut self, first: i32, count: i32) {
        self.record("draw_triangle_strip", GlCall::DrawStrip { first, count });
        self.inner.draw_triangle_strip(first, count)
    }

    fn finish(&mut self) {
        self.record("finish", GlCall::Finish);
        self.inner.finish()
    }

    fn take_error(&mut self) -> Option<u32> {
        self.inner.take_error()
    }
}
