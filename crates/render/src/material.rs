use dusk_util::cache::Resource;
use dusk_util::handle::SharedHandle;

/// GLSL-style source pair handed to the backend for compilation and link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

/// Shader- and texture-level description shared between scene data and the
/// render thread's GPU mirrors.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub shader: ShaderSource,
    /// Texture names resolved by the backend, bound in declaration order.
    pub textures: Vec<String>,
}

pub type MaterialHandle = SharedHandle<Material>;

impl Resource for Material {}

/// Minimal pass-through material used when a mesh carries none.
/// The sources mirror the fixed attribute layout of the mesh vertex format.
pub fn default_material() -> Material {
    Material {
        name: "default".to_string(),
        shader: ShaderSource {
            vertex: DEFAULT_VS.to_string(),
            fragment: DEFAULT_FS.to_string(),
        },
        textures: Vec::new(),
    }
}

const DEFAULT_VS: &str = "\
layout(location = 0) in vec3 position;
layout(location = 1) in vec3 normal;
layout(location = 2) in vec2 texcoord0;

layout(std140) uniform Matrices {
    mat4 model;
    mat4 view;
    mat4 proj;
};

out vec2 v_uv;

void main() {
    gl_Position = proj * view * model * vec4(position, 1.0);
    v_uv = texcoord0;
}
";

const DEFAULT_FS: &str = "\
in vec2 v_uv;
out vec4 frag_color;

void main() {
    frag_color = vec4(v_uv, 0.0, 1.0);
}
";
