//! Recording GPU backend and window stand-ins for the cross-thread tests.

use crate::backend::{
    BufferHandle, ClearState, CullState, FramebufferId, GpuBackend, GpuError, Rect, ShaderHandle,
    TextureHandle, UniformLocation, VertexArrayHandle, Window,
};
use crate::frame::UniformValue;
use crate::material::ShaderSource;
use crate::mesh::{IndexType, PrimitiveGroup};
use std::sync::{Arc, Mutex};

/// Every backend entry point, recorded in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateContext,
    DestroyContext,
    SetViewport(Rect),
    Clear,
    SetCullState,
    CompileShader,
    BindShader(Option<u64>),
    CreateVertexBuffer(usize),
    CreateIndexBuffer(usize),
    CreateVertexArray,
    UploadVertexBuffer { buffer: u64, size: usize },
    BindVertexArray(Option<u64>),
    CreateUniformBuffer,
    UploadUniformBuffer { buffer: u64, size: usize },
    BindUniformBlock,
    UniformLocation(String),
    SetUniform { location: u32 },
    CreateTexture(String),
    BindTexture { unit: u32 },
    Draw { start: usize, count: usize },
    DrawInstanced { count: usize, instances: u32 },
    BindFramebuffer(Option<u64>),
    ResizeFramebuffer(u64),
    ReleaseAll,
    Present,
}

pub type CallLog = Arc<Mutex<Vec<GpuCall>>>;

/// GPU backend that records every call instead of touching a device.
pub struct MockBackend {
    pub calls: CallLog,
    next_handle: u64,
    pub fail_context: bool,
    pub fail_shader: bool,
}

impl MockBackend {
    pub fn new() -> (Self, CallLog) {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        (
            MockBackend {
                calls: Arc::clone(&calls),
                next_handle: 1,
                fail_context: false,
                fail_shader: false,
            },
            calls,
        )
    }

    fn push(&self, call: GpuCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl GpuBackend for MockBackend {
    fn create_context(&mut self, _window: &dyn Window) -> Result<(), GpuError> {
        if self.fail_context {
            return Err(GpuError::ContextCreationFailed("mock".to_string()));
        }
        self.push(GpuCall::CreateContext);
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.push(GpuCall::DestroyContext);
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.push(GpuCall::SetViewport(rect));
    }

    fn clear(&mut self, _state: &ClearState) {
        self.push(GpuCall::Clear);
    }

    fn set_cull_state(&mut self, _cull: &CullState) {
        self.push(GpuCall::SetCullState);
    }

    fn compile_shader(&mut self, _source: &ShaderSource) -> Result<ShaderHandle, GpuError> {
        if self.fail_shader {
            return Err(GpuError::ShaderLinkFailed("mock".to_string()));
        }
        self.push(GpuCall::CompileShader);
        Ok(ShaderHandle(self.handle()))
    }

    fn bind_shader(&mut self, shader: Option<ShaderHandle>) {
        self.push(GpuCall::BindShader(shader.map(|s| s.0)));
    }

    fn create_vertex_buffer(&mut self, bytes: &[u8]) -> BufferHandle {
        self.push(GpuCall::CreateVertexBuffer(bytes.len()));
        BufferHandle(self.handle())
    }

    fn create_index_buffer(&mut self, bytes: &[u8], _index_type: IndexType) -> BufferHandle {
        self.push(GpuCall::CreateIndexBuffer(bytes.len()));
        BufferHandle(self.handle())
    }

    fn create_vertex_array(
        &mut self,
        _vertex_buffer: BufferHandle,
        _index_buffer: BufferHandle,
    ) -> VertexArrayHandle {
        self.push(GpuCall::CreateVertexArray);
        VertexArrayHandle(self.handle())
    }

    fn upload_vertex_buffer(
        &mut self,
        buffer: BufferHandle,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        self.push(GpuCall::UploadVertexBuffer {
            buffer: buffer.0,
            size: bytes.len(),
        });
        Ok(())
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>) {
        self.push(GpuCall::BindVertexArray(vertex_array.map(|v| v.0)));
    }

    fn create_uniform_buffer(&mut self) -> BufferHandle {
        self.push(GpuCall::CreateUniformBuffer);
        BufferHandle(self.handle())
    }

    fn upload_uniform_buffer(&mut self, buffer: BufferHandle, bytes: &[u8]) {
        self.push(GpuCall::UploadUniformBuffer {
            buffer: buffer.0,
            size: bytes.len(),
        });
    }

    fn bind_uniform_block(&mut self, _shader: ShaderHandle, _buffer: BufferHandle) {
        self.push(GpuCall::BindUniformBlock);
    }

    fn uniform_location(&mut self, _shader: ShaderHandle, name: &str) -> Option<UniformLocation> {
        self.push(GpuCall::UniformLocation(name.to_string()));
        Some(name.len() as u32)
    }

    fn set_uniform(
        &mut self,
        _shader: ShaderHandle,
        location: UniformLocation,
        _value: &UniformValue,
    ) {
        self.push(GpuCall::SetUniform { location });
    }

    fn create_texture(&mut self, name: &str) -> TextureHandle {
        self.push(GpuCall::CreateTexture(name.to_string()));
        TextureHandle(self.handle())
    }

    fn bind_texture(&mut self, _texture: TextureHandle, unit: u32) {
        self.push(GpuCall::BindTexture { unit });
    }

    fn draw(&mut self, group: &PrimitiveGroup) {
        self.push(GpuCall::Draw {
            start: group.start_index,
            count: group.index_count,
        });
    }

    fn draw_instanced(&mut self, group: &PrimitiveGroup, instances: u32) {
        self.push(GpuCall::DrawInstanced {
            count: group.index_count,
            instances,
        });
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.push(GpuCall::BindFramebuffer(framebuffer.map(|f| f.0)));
    }

    fn resize_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        _rect: Rect,
    ) -> Result<(), GpuError> {
        self.push(GpuCall::ResizeFramebuffer(framebuffer.0));
        Ok(())
    }

    fn release_all(&mut self) {
        self.push(GpuCall::ReleaseAll);
    }

    fn present(&mut self) {
        self.push(GpuCall::Present);
    }
}

/// Fixed-rectangle window stand-in.
pub struct MockWindow {
    pub rect: Rect,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(MockWindow {
            rect: Rect::new(0, 0, width, height),
        })
    }
}

impl Window for MockWindow {
    fn rect(&self) -> Rect {
        self.rect
    }

    fn set_title(&self, _title: &str) {}

    fn resize(&self, _rect: Rect) {}
}

/// Counts calls matching the predicate.
pub fn count_calls(log: &CallLog, predicate: impl Fn(&GpuCall) -> bool) -> usize {
    log.lock().unwrap().iter().filter(|call| predicate(call)).count()
}
