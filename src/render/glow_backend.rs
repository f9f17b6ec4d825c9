// GLES backend on top of glow
//
// The context must already be current on the calling thread; making it
// current is the render target's job.

use glow::HasContext;
use std::collections::HashMap;

use super::{
    BufferId, GraphicsApi, GraphicsError, ProgramId, ShaderId, ShaderStage, TextureId,
    UniformLocation,
};
use crate::capture::Transform;

/// `GL_TEXTURE_EXTERNAL_OES` from OES_EGL_image_external
const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

pub struct GlowGraphics {
    gl: glow::Context,
    next_id: u32,
    shaders: HashMap<u32, glow::NativeShader>,
    programs: HashMap<u32, glow::NativeProgram>,
    textures: HashMap<u32, glow::NativeTexture>,
    buffers: HashMap<u32, glow::NativeBuffer>,
    uniforms: HashMap<u32, (u32, glow::NativeUniformLocation)>,
}

impl GlowGraphics {
    pub fn new(gl: glow::Context) -> Self {
        Self {
            gl,
            next_id: 0,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            uniforms: HashMap::new(),
        }
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl GraphicsApi for GlowGraphics {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GraphicsError> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };

        let shader = unsafe {
            let shader = self
                .gl
                .create_shader(kind)
                .map_err(|e| GraphicsError::Backend(format!("create_shader({}) failed: {}", stage, e)))?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(GraphicsError::ShaderCompile { stage, log });
            }
            shader
        };

        let id = self.next();
        self.shaders.insert(id, shader);
        Ok(ShaderId(id))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(native) = self.shaders.remove(&shader.0) {
            unsafe { self.gl.delete_shader(native) };
        }
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GraphicsError> {
        let (vs, fs) = match (self.shaders.get(&vertex.0), self.shaders.get(&fragment.0)) {
            (Some(vs), Some(fs)) => (*vs, *fs),
            _ => return Err(GraphicsError::ProgramLink("unknown shader object".into())),
        };

        let program = unsafe {
            let program = self
                .gl
                .create_program()
                .map_err(|e| GraphicsError::Backend(format!("create_program failed: {}", e)))?;
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            self.gl.link_program(program);
            self.gl.detach_shader(program, vs);
            self.gl.detach_shader(program, fs);

            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(GraphicsError::ProgramLink(log));
            }
            program
        };

        let id = self.next();
        self.programs.insert(id, program);
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(native) = self.programs.remove(&program.0) {
            unsafe { self.gl.delete_program(native) };
        }
        self.uniforms.retain(|_, (owner, _)| *owner != program.0);
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let native = *self.programs.get(&program.0)?;
        unsafe { self.gl.get_attrib_location(native, name) }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let native = *self.programs.get(&program.0)?;
        let location = unsafe { self.gl.get_uniform_location(native, name) }?;
        let id = self.next();
        self.uniforms.insert(id, (program.0, location));
        Some(UniformLocation(id))
    }

    fn create_external_texture(&mut self) -> Result<TextureId, GraphicsError> {
        let texture = unsafe {
            let texture = self
                .gl
                .create_texture()
                .map_err(|e| GraphicsError::Backend(format!("create_texture failed: {}", e)))?;
            self.gl.bind_texture(TEXTURE_EXTERNAL_OES, Some(texture));
            self.gl.tex_parameter_i32(TEXTURE_EXTERNAL_OES, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
            self.gl.tex_parameter_i32(TEXTURE_EXTERNAL_OES, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            self.gl.tex_parameter_i32(TEXTURE_EXTERNAL_OES, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.gl.tex_parameter_i32(TEXTURE_EXTERNAL_OES, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            texture
        };

        let id = self.next();
        self.textures.insert(id, texture);
        Ok(TextureId(id))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(native) = self.textures.remove(&texture.0) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, GraphicsError> {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let buffer = unsafe {
            let buffer = self
                .gl
                .create_buffer()
                .map_err(|e| GraphicsError::Backend(format!("create_buffer failed: {}", e)))?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            buffer
        };

        let id = self.next();
        self.buffers.insert(id, buffer);
        Ok(BufferId(id))
    }

    fn delete_vertex_buffer(&mut self, buffer: BufferId) {
        if let Some(native) = self.buffers.remove(&buffer.0) {
            unsafe { self.gl.delete_buffer(native) };
        }
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        unsafe {
            self.gl.clear_color(rgba[0], rgba[1], rgba[2], rgba[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        let native = self.programs.get(&program.0).copied();
        unsafe { self.gl.use_program(native) };
    }

    fn bind_external_texture(&mut self, texture: TextureId) {
        let native = self.textures.get(&texture.0).copied();
        unsafe {
            self.gl.active_texture(glow::TEXTURE0);
            self.gl.bind_texture(TEXTURE_EXTERNAL_OES, native);
        }
    }

    fn vertex_attrib(&mut self, buffer: BufferId, location: u32, components: i32, stride: i32, offset: i32) {
        let native = self.buffers.get(&buffer.0).copied();
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, native);
            self.gl.vertex_attrib_pointer_f32(location, components, glow::FLOAT, false, stride, offset);
            self.gl.enable_vertex_attrib_array(location);
        }
    }

    fn uniform_matrix4(&mut self, location: UniformLocation, matrix: &Transform) {
        let native = self.uniforms.get(&location.0).map(|(_, location)| location);
        unsafe { self.gl.uniform_matrix_4_f32_slice(native, false, matrix) };
    }

    fn draw_triangle_strip(&mut self, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(glow::TRIANGLE_STRIP, first, count) };
    }

    fn finish(&mut self) {
        unsafe { self.gl.finish() };
    }

    fn take_error(&mut self) -> Option<u32> {
        match unsafe { self.gl.get_error() } {
            glow::NO_ERROR => None,
            code => Some(code),
        }
    }
}

impl Drop for GlowGraphics {
    fn drop(&mut self) {
        unsafe {
            for (_, program) in self.programs.drain() {
                self.gl.delete_program(program);
            }
            for (_, shader) in self.shaders.drain() {
                self.gl.delete_shader(shader);
            }
            for (_, texture) in self.textures.drain() {
                self.gl.delete_texture(texture);
            }
            for (_, buffer) in self.buffers.drain() {
                self.gl.delete_buffer(buffer);
            }
        }
    }
}
