// Shader sources and quad geometry for the render stage

pub const VERTEX_SHADER: &str = "\
uniform mat4 uMVPMatrix;
uniform mat4 uSTMatrix;
attribute vec4 aPosition;
attribute vec4 aTextureCoord;
varying vec2 vTextureCoord;
void main() {
    gl_Position = uMVPMatrix * aPosition;
    vTextureCoord = (uSTMatrix * aTextureCoord).xy;
}
";

pub const FRAGMENT_SHADER: &str = "\
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 vTextureCoord;
uniform samplerExternalOES sTexture;
void main() {
    gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

/// Same as `FRAGMENT_SHADER` with the red and green channels rotated out,
/// used to make chunk boundaries visible when reviewing output
pub const SWAPPED_FRAGMENT_SHADER: &str = "\
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 vTextureCoord;
uniform samplerExternalOES sTexture;
void main() {
    gl_FragColor = texture2D(sTexture, vTextureCoord).gbra;
}
";

pub const POSITION_ATTRIB: &str = "aPosition";
pub const TEX_COORD_ATTRIB: &str = "aTextureCoord";
pub const MVP_UNIFORM: &str = "uMVPMatrix";
pub const ST_UNIFORM: &str = "uSTMatrix";

/// Full-screen quad as a triangle strip, X Y Z U V per vertex
#[rustfmt::skip]
pub const QUAD_VERTICES: [f32; 20] = [
    -1.0, -1.0, 0.0, 0.0, 0.0,
     1.0, -1.0, 0.0, 1.0, 0.0,
    -1.0,  1.0, 0.0, 0.0, 1.0,
     1.0,  1.0, 0.0, 1.0, 1.0,
];

pub const QUAD_VERTEX_COUNT: i32 = 4;

const FLOAT_SIZE_BYTES: i32 = 4;
pub const QUAD_STRIDE_BYTES: i32 = 5 * FLOAT_SIZE_BYTES;
pub const QUAD_POSITION_OFFSET: i32 = 0;
pub const QUAD_UV_OFFSET: i32 = 3 * FLOAT_SIZE_BYTES;

/// Background colour; green so missing texture content is obvious
pub const CLEAR_COLOR: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
