use crate::frame::UniformValue;
use crate::material::ShaderSource;
use crate::mesh::{IndexType, MeshId, PrimitiveGroup};
use bitflags::bitflags;
use glam::Vec4;
use thiserror::Error;

/// Pixel rectangle in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearMask: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// What `clear` wipes at the top of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClearState {
    pub mask: ClearMask,
    pub color: Vec4,
    pub depth: f32,
    pub stencil: i32,
}

impl Default for ClearState {
    fn default() -> Self {
        ClearState {
            mask: ClearMask::COLOR | ClearMask::DEPTH,
            color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            depth: 1.0,
            stencil: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    Disabled,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CullState {
    pub mode: CullMode,
    pub front_face: FrontFace,
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

opaque_handle!(
    /// Backend-defined framebuffer identity. `None` in binding positions
    /// means the default framebuffer.
    FramebufferId
);
opaque_handle!(BufferHandle);
opaque_handle!(VertexArrayHandle);
opaque_handle!(ShaderHandle);
opaque_handle!(TextureHandle);

/// Location of a named uniform inside a linked shader.
pub type UniformLocation = u32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("failed to create GPU context: {0}")]
    ContextCreationFailed(String),
    #[error("failed to link shader: {0}")]
    ShaderLinkFailed(String),
    #[error("invalid GPU object handle")]
    InvalidHandle,
}

/// Surface of the windowing system the core reads on renderer creation.
pub trait Window: Send + Sync {
    fn rect(&self) -> Rect;
    fn set_title(&self, title: &str);
    fn resize(&self, rect: Rect);
}

/// The complete GPU surface the core depends on. Everything the render
/// thread does with the device goes through this trait; concrete backends
/// (GL, low-level APIs, recording mocks) live in adapter crates.
///
/// All calls are made from the render thread only.
pub trait GpuBackend: Send + 'static {
    /// Establishes the device context against the given window surface.
    fn create_context(&mut self, window: &dyn Window) -> Result<(), GpuError>;
    fn destroy_context(&mut self);

    /// Routes backend debug output into the engine log, when the API
    /// supports it. Optional.
    fn install_log_sink(&mut self) {}

    fn set_viewport(&mut self, rect: Rect);
    fn clear(&mut self, state: &ClearState);
    fn set_cull_state(&mut self, cull: &CullState);

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderHandle, GpuError>;
    fn bind_shader(&mut self, shader: Option<ShaderHandle>);

    fn create_vertex_buffer(&mut self, bytes: &[u8]) -> BufferHandle;
    fn create_index_buffer(&mut self, bytes: &[u8], index_type: IndexType) -> BufferHandle;
    fn create_vertex_array(
        &mut self,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
    ) -> VertexArrayHandle;
    /// Re-uploads the full contents of an existing vertex buffer.
    fn upload_vertex_buffer(&mut self, buffer: BufferHandle, bytes: &[u8])
        -> Result<(), GpuError>;
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>);

    /// Per-batch uniform block holding the model/view/projection matrices.
    fn create_uniform_buffer(&mut self) -> BufferHandle;
    fn upload_uniform_buffer(&mut self, buffer: BufferHandle, bytes: &[u8]);
    fn bind_uniform_block(&mut self, shader: ShaderHandle, buffer: BufferHandle);

    /// Looks a named uniform up in a linked shader. `None` when the name is
    /// not bound by the shader.
    fn uniform_location(&mut self, shader: ShaderHandle, name: &str) -> Option<UniformLocation>;
    fn set_uniform(&mut self, shader: ShaderHandle, location: UniformLocation, value: &UniformValue);

    fn create_texture(&mut self, name: &str) -> TextureHandle;
    fn bind_texture(&mut self, texture: TextureHandle, unit: u32);

    fn draw(&mut self, group: &PrimitiveGroup);
    fn draw_instanced(&mut self, group: &PrimitiveGroup, instances: u32);

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn resize_framebuffer(&mut self, framebuffer: FramebufferId, rect: Rect)
        -> Result<(), GpuError>;

    /// Drops every GPU object created through this backend.
    fn release_all(&mut self);

    /// Swaps the presented image to the window.
    fn present(&mut self);
}

/// GPU-side mirror of one mesh, keyed by the application-side [`MeshId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshRecord {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_array: VertexArrayHandle,
    pub prim_groups: Vec<PrimitiveGroup>,
}

/// Lookup surface over the render thread's mesh mirrors.
pub trait MeshStore {
    fn resolve(&self, id: MeshId) -> Option<&MeshRecord>;
}
