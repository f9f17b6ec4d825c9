// GPU render stage
//
// Draws the camera's external texture onto the encoder's input surface with a
// textured full-screen quad. The GL calls go through `GraphicsApi` so the stage
// can run against a real GLES context (feature `glow`) or a headless one.

pub mod headless;
pub mod shaders;
pub mod texture;

#[cfg(feature = "glow")]
pub mod glow_backend;

pub use headless::HeadlessGraphics;
pub use texture::TextureRenderStage;

#[cfg(feature = "glow")]
pub use glow_backend::GlowGraphics;

use crate::capture::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Error type for the render stage
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("Could not compile {stage} shader: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("Could not link program: {0}")]
    ProgramLink(String),

    #[error("Could not get location for {0}")]
    MissingLocation(&'static str),

    #[error("{op}: glError 0x{code:x}")]
    Gl { op: &'static str, code: u32 },

    #[error("Render stage used before configure()")]
    NotConfigured,

    #[error("Graphics backend error: {0}")]
    Backend(String),
}

/// The subset of GLES 2 the render stage needs
///
/// Implementations are single-threaded and must only be used on the thread
/// that owns the current context.
pub trait GraphicsApi {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GraphicsError>;
    fn delete_shader(&mut self, shader: ShaderId);

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GraphicsError>;
    fn delete_program(&mut self, program: ProgramId);

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Create an external-image texture with nearest minification, linear
    /// magnification and clamp-to-edge wrapping
    fn create_external_texture(&mut self) -> Result<TextureId, GraphicsError>;
    fn delete_texture(&mut self, texture: TextureId);

    /// Upload static vertex data into a new array buffer
    fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, GraphicsError>;
    fn delete_vertex_buffer(&mut self, buffer: BufferId);

    fn clear(&mut self, rgba: [f32; 4]);
    fn use_program(&mut self, program: ProgramId);
    fn bind_external_texture(&mut self, texture: TextureId);

    /// Point `location` at `components` floats in `buffer`, strides and offsets in bytes
    fn vertex_attrib(&mut self, buffer: BufferId, location: u32, components: i32, stride: i32, offset: i32);
    fn uniform_matrix4(&mut self, location: UniformLocation, matrix: &Transform);

    fn draw_triangle_strip(&mut self, first: i32, count: i32);
    fn finish(&mut self);

    /// Pop the oldest pending GL error, if any
    fn take_error(&mut self) -> Option<u32>;
}
