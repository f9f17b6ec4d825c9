// Headless graphics backend
//
// Tracks GL objects in memory and validates usage the way a driver would
// (unknown names raise GL errors), without touching a GPU. Lets the recorder
// run on machines with no GLES context, with the encoder target doing its own
// pixel readback.

use std::collections::{HashMap, VecDeque};

use super::{
    BufferId, GraphicsApi, GraphicsError, ProgramId, ShaderId, ShaderStage, TextureId,
    UniformLocation,
};
use crate::capture::Transform;

const GL_INVALID_VALUE: u32 = 0x0501;
const GL_INVALID_OPERATION: u32 = 0x0502;

struct ShaderObject {
    stage: ShaderStage,
    attributes: Vec<String>,
    uniforms: Vec<String>,
}

struct ProgramObject {
    attributes: Vec<String>,
    uniforms: Vec<String>,
}

#[derive(Default)]
pub struct HeadlessGraphics {
    next_name: u32,
    shaders: HashMap<u32, ShaderObject>,
    programs: HashMap<u32, ProgramObject>,
    textures: HashMap<u32, ()>,
    buffers: HashMap<u32, usize>,
    current_program: Option<u32>,
    bound_texture: Option<u32>,
    errors: VecDeque<u32>,
    draws: u64,
}

impl HeadlessGraphics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    /// Queue an error for the next `take_error()`
    pub fn raise(&mut self, code: u32) {
        self.errors.push_back(code);
    }

    fn gen_name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }
}

/// Names declared with `keyword` at the start of a line, e.g. `uniform mat4 uMVPMatrix;`
fn declared_names(source: &str, keyword: &str) -> Vec<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(keyword))
        .filter_map(|line| line.trim_end_matches(';').split_whitespace().last())
        .map(str::to_string)
        .collect()
}

impl GraphicsApi for HeadlessGraphics {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GraphicsError> {
        if !source.contains("void main") {
            return Err(GraphicsError::ShaderCompile {
                stage,
                log: "ERROR: 'main' : function not defined".into(),
            });
        }

        let name = self.gen_name();
        let attributes = match stage {
            ShaderStage::Vertex => declared_names(source, "attribute"),
            ShaderStage::Fragment => Vec::new(),
        };
        self.shaders.insert(
            name,
            ShaderObject { stage, attributes, uniforms: declared_names(source, "uniform") },
        );
        Ok(ShaderId(name))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader.0).is_none() {
            self.raise(GL_INVALID_VALUE);
        }
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GraphicsError> {
        let (vs, fs) = match (self.shaders.get(&vertex.0), self.shaders.get(&fragment.0)) {
            (Some(vs), Some(fs)) => (vs, fs),
            _ => return Err(GraphicsError::ProgramLink("unknown shader object".into())),
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err(GraphicsError::ProgramLink("shader stages do not match".into()));
        }

        let attributes = vs.attributes.clone();
        let mut uniforms = vs.uniforms.clone();
        uniforms.extend(fs.uniforms.iter().cloned());

        let name = self.gen_name();
        self.programs.insert(name, ProgramObject { attributes, uniforms });
        Ok(ProgramId(name))
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program.0).is_none() {
            self.raise(GL_INVALID_VALUE);
        }
        if self.current_program == Some(program.0) {
            self.current_program = None;
        }
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let program = self.programs.get(&program.0)?;
        program.attributes.iter().position(|a| a == name).map(|i| i as u32)
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(&program.0)?;
        program
            .uniforms
            .iter()
            .position(|u| u == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn create_external_texture(&mut self) -> Result<TextureId, GraphicsError> {
        let name = self.gen_name();
        self.textures.insert(name, ());
        Ok(TextureId(name))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
        if self.bound_texture == Some(texture.0) {
            self.bound_texture = None;
        }
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, GraphicsError> {
        let name = self.gen_name();
        self.buffers.insert(name, data.len());
        Ok(BufferId(name))
    }

    fn delete_vertex_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer.0);
    }

    fn clear(&mut self, _rgba: [f32; 4]) {}

    fn use_program(&mut self, program: ProgramId) {
        if self.programs.contains_key(&program.0) {
            self.current_program = Some(program.0);
        } else {
            self.raise(GL_INVALID_VALUE);
        }
    }

    fn bind_external_texture(&mut self, texture: TextureId) {
        if self.textures.contains_key(&texture.0) {
            self.bound_texture = Some(texture.0);
        } else {
            self.raise(GL_INVALID_OPERATION);
        }
    }

    fn vertex_attrib(&mut self, buffer: BufferId, _location: u32, components: i32, stride: i32, offset: i32) {
        let Some(&floats) = self.buffers.get(&buffer.0) else {
            self.raise(GL_INVALID_OPERATION);
            return;
        };
        if components < 1 || components > 4 || stride < 0 || offset < 0 || offset as usize >= floats * 4 {
            self.raise(GL_INVALID_VALUE);
        }
    }

    fn uniform_matrix4(&mut self, _location: UniformLocation, _matrix: &Transform) {
        if self.current_program.is_none() {
            self.raise(GL_INVALID_OPERATION);
        }
    }

    fn draw_triangle_strip(&mut self, _first: i32, count: i32) {
        if self.current_program.is_none() {
            self.raise(GL_INVALID_OPERATION);
        } else if count < 0 {
            self.raise(GL_INVALID_VALUE);
        } else {
            self.draws += 1;
        }
    }

    fn finish(&mut self) {}

    fn take_error(&mut self) -> Option<u32> {
        self.errors.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::shaders::{FRAGMENT_SHADER, VERTEX_SHADER};

    #[test]
    fn program_exposes_declared_locations() {
        let mut gl = HeadlessGraphics::new();
        let vs = gl.compile_shader(ShaderStage::Vertex, VERTEX_SHADER).unwrap();
        let fs = gl.compile_shader(ShaderStage::Fragment, FRAGMENT_SHADER).unwrap();
        let program = gl.link_program(vs, fs).unwrap();

        assert_eq!(gl.attrib_location(program, "aPosition"), Some(0));
        assert_eq!(gl.attrib_location(program, "aTextureCoord"), Some(1));
        assert!(gl.uniform_location(program, "uSTMatrix").is_some());
        assert!(gl.uniform_location(program, "sTexture").is_some());
        assert_eq!(gl.uniform_location(program, "uMissing"), None);
    }

    #[test]
    fn link_rejects_swapped_stages() {
        let mut gl = HeadlessGraphics::new();
        let vs = gl.compile_shader(ShaderStage::Vertex, VERTEX_SHADER).unwrap();
        let fs = gl.compile_shader(ShaderStage::Fragment, FRAGMENT_SHADER).unwrap();
        assert!(matches!(gl.link_program(fs, vs), Err(GraphicsError::ProgramLink(_))));
    }

    #[test]
    fn drawing_without_program_raises_error() {
        let mut gl = HeadlessGraphics::new();
        gl.draw_triangle_strip(0, 4);
        assert_eq!(gl.take_error(), Some(GL_INVALID_OPERATION));
        assert_eq!(gl.take_error(), None);
    }
}
