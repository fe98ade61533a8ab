use crate::backend::{CullState, FramebufferId};
use crate::mesh::{MeshHandle, MeshId};
use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3, Vec4};
use log::warn;

bitflags! {
    /// Per-batch record of what changed since the last commit. Cleared bit
    /// by bit as the matching submit commands are emitted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyMask: u32 {
        const MATRIX_BUFFER = 1 << 0;
        const UNIFORM_BUFFER = 1 << 1;
        const MESH = 1 << 2;
        const MESH_UPDATE = 1 << 3;
    }
}

bitflags! {
    /// What a [`FrameSubmitCmd`] instructs the render thread to update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubmitFlags: u32 {
        const ADD_RENDER_DATA = 1 << 0;
        const UPDATE_BUFFER = 1 << 1;
        const UPDATE_MATRICES = 1 << 2;
        const UPDATE_UNIFORMS = 1 << 3;
    }
}

/// Serialised size of the three-matrix block: 3 matrices of 16 f32 columns.
pub const MATRIX_BLOCK_SIZE: usize = 3 * 16 * 4;

/// Model/view/projection block attached to every batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixBuffer {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for MatrixBuffer {
    fn default() -> Self {
        MatrixBuffer {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

impl MatrixBuffer {
    /// Little-endian column-major dump, model then view then projection.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MATRIX_BLOCK_SIZE);
        for matrix in [&self.model, &self.view, &self.proj] {
            write_mat4(&mut bytes, matrix);
        }
        bytes
    }
}

fn write_mat4(out: &mut Vec<u8>, matrix: &Mat4) {
    for value in matrix.to_cols_array() {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn read_f32(bytes: &[u8], offset: usize) -> Option<f32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_mat4(bytes: &[u8], offset: usize) -> Option<Mat4> {
    let mut cols = [0.0f32; 16];
    for (i, col) in cols.iter_mut().enumerate() {
        *col = read_f32(bytes, offset + i * 4)?;
    }
    Some(Mat4::from_cols_array(&cols))
}

/// Typed value of a named shader uniform.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Mat4Array(Vec<Mat4>),
}

impl UniformValue {
    fn tag(&self) -> u8 {
        match self {
            UniformValue::Int(_) => 0,
            UniformValue::Float(_) => 1,
            UniformValue::Vec2(_) => 2,
            UniformValue::Vec3(_) => 3,
            UniformValue::Vec4(_) => 4,
            UniformValue::Mat4(_) => 5,
            UniformValue::Mat4Array(_) => 6,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            UniformValue::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Vec2(v) => {
                for c in v.to_array() {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            UniformValue::Vec3(v) => {
                for c in v.to_array() {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            UniformValue::Vec4(v) => {
                for c in v.to_array() {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            UniformValue::Mat4(m) => write_mat4(out, m),
            UniformValue::Mat4Array(ms) => {
                out.extend_from_slice(&(ms.len() as u32).to_le_bytes());
                for m in ms {
                    write_mat4(out, m);
                }
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<UniformValue> {
        let tag = *bytes.first()?;
        let body = &bytes[1..];
        Some(match tag {
            0 => UniformValue::Int(i32::from_le_bytes(body.get(0..4)?.try_into().ok()?)),
            1 => UniformValue::Float(read_f32(body, 0)?),
            2 => UniformValue::Vec2(Vec2::new(read_f32(body, 0)?, read_f32(body, 4)?)),
            3 => UniformValue::Vec3(Vec3::new(
                read_f32(body, 0)?,
                read_f32(body, 4)?,
                read_f32(body, 8)?,
            )),
            4 => UniformValue::Vec4(Vec4::new(
                read_f32(body, 0)?,
                read_f32(body, 4)?,
                read_f32(body, 8)?,
                read_f32(body, 12)?,
            )),
            5 => UniformValue::Mat4(read_mat4(body, 0)?),
            6 => {
                let count = u32::from_le_bytes(body.get(0..4)?.try_into().ok()?) as usize;
                let mut matrices = Vec::with_capacity(count);
                for i in 0..count {
                    matrices.push(read_mat4(body, 4 + i * 64)?);
                }
                UniformValue::Mat4Array(matrices)
            }
            _ => return None,
        })
    }
}

/// Uniform names longer than this are truncated in the wire encoding.
pub const MAX_UNIFORM_NAME: usize = 255;

/// A named uniform recorded on a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformVar {
    pub name: String,
    pub value: UniformValue,
}

impl UniformVar {
    pub fn new(name: &str, value: UniformValue) -> Self {
        UniformVar {
            name: name.to_string(),
            value,
        }
    }

    /// `{name_len:u8}{name}{value}` blob carried by `UpdateUniforms`
    /// commands. The name is truncated at 255 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let name_len = name.len().min(MAX_UNIFORM_NAME);
        if name.len() > MAX_UNIFORM_NAME {
            warn!("Uniform name {} truncated to 255 bytes", self.name);
        }

        let mut bytes = Vec::with_capacity(1 + name_len + 16);
        bytes.push(name_len as u8);
        bytes.extend_from_slice(&name[..name_len]);
        self.value.encode(&mut bytes);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<UniformVar> {
        let name_len = *bytes.first()? as usize;
        let name = bytes.get(1..1 + name_len)?;
        let value = UniformValue::decode(bytes.get(1 + name_len..)?)?;
        Some(UniformVar {
            name: String::from_utf8_lossy(name).into_owned(),
            value,
        })
    }
}

/// Write-append log of uniform values for one pass.
///
/// Storage is append-only; a later write of an already present name
/// supersedes the earlier one at read time.
#[derive(Debug, Clone, Default)]
pub struct UniformBuffer {
    vars: Vec<UniformVar>,
}

impl UniformBuffer {
    pub fn new() -> Self {
        UniformBuffer::default()
    }

    pub fn write(&mut self, var: UniformVar) {
        self.vars.push(var);
    }

    /// Latest value written under `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<&UniformVar> {
        self.vars.iter().rev().find(|var| var.name == name)
    }

    /// Raw log order, duplicates included.
    pub fn iter(&self) -> impl Iterator<Item = &UniformVar> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }
}

/// One mesh reference inside a batch, drawn `instances` times.
#[derive(Debug, Clone)]
pub struct MeshEntry {
    pub meshes: Vec<MeshHandle>,
    pub instances: u32,
}

/// A shader- and material-scoped group of meshes recorded by the
/// application.
#[derive(Debug, Clone)]
pub struct RenderBatchData {
    pub id: String,
    pub matrix_buffer: MatrixBuffer,
    pub uniforms: Vec<UniformVar>,
    pub mesh_entries: Vec<MeshEntry>,
    pub updated_meshes: Vec<MeshHandle>,
    pub dirty: DirtyMask,
}

impl RenderBatchData {
    pub fn new(id: &str) -> Self {
        RenderBatchData {
            id: id.to_string(),
            matrix_buffer: MatrixBuffer::default(),
            uniforms: Vec::new(),
            mesh_entries: Vec::new(),
            updated_meshes: Vec::new(),
            dirty: DirtyMask::empty(),
        }
    }

    pub fn uniform_mut(&mut self, name: &str) -> Option<&mut UniformVar> {
        self.uniforms.iter_mut().find(|var| var.name == name)
    }

    /// Adds the uniform or overwrites an existing one of the same name.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        match self.uniform_mut(name) {
            Some(var) => var.value = value,
            None => self.uniforms.push(UniformVar::new(name, value)),
        }
        self.dirty |= DirtyMask::UNIFORM_BUFFER;
    }
}

/// A framebuffer-scoped group of batches with shared view and projection.
#[derive(Debug, Clone)]
pub struct PassData {
    pub id: String,
    pub render_target: Option<FramebufferId>,
    pub view: Mat4,
    pub proj: Mat4,
    pub cull: CullState,
    pub batches: Vec<RenderBatchData>,
}

impl PassData {
    pub fn new(id: &str) -> Self {
        PassData {
            id: id.to_string(),
            render_target: None,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            cull: CullState::default(),
            batches: Vec::new(),
        }
    }

    pub fn batch(&self, id: &str) -> Option<&RenderBatchData> {
        self.batches.iter().find(|batch| batch.id == id)
    }

    /// Clone of this pass carrying only the given batch, as shipped inside
    /// `AddRenderData` commands.
    pub fn snapshot_with_batch(&self, batch: &RenderBatchData) -> PassData {
        PassData {
            id: self.id.clone(),
            render_target: self.render_target,
            view: self.view,
            proj: self.proj,
            cull: self.cull,
            batches: vec![batch.clone()],
        }
    }
}

/// One diff record consumed by the render thread.
#[derive(Debug, Clone, Default)]
pub struct FrameSubmitCmd {
    pub pass_id: String,
    pub batch_id: String,
    pub mesh_id: Option<MeshId>,
    pub flags: SubmitFlags,
    pub data: Vec<u8>,
    /// Pass snapshots for `ADD_RENDER_DATA`, empty otherwise.
    pub updated_passes: Vec<PassData>,
}

/// Double-buffered description of one frame.
///
/// Exactly two frames exist per service. The application fills the submit
/// frame, hands it to the render thread inside the commit event, and
/// receives the previously rendered frame back through the recycle channel.
/// The payload vectors are cleared, not deallocated, when a frame is
/// recycled, so steady-state frames allocate nothing.
#[derive(Debug, Default)]
pub struct Frame {
    /// Passes unseen by the render thread, delivered via `InitPasses`.
    pub passes: Vec<PassData>,
    /// Per-pass write-through uniform log, indexed like the service's pass
    /// list at commit time.
    pub uniform_buffers: Vec<UniformBuffer>,
    pub submit_cmds: Vec<FrameSubmitCmd>,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    /// Appends an empty command addressed to a pass/batch pair and hands it
    /// out for the caller to fill.
    pub fn enqueue(&mut self, pass_id: &str, batch_id: &str) -> &mut FrameSubmitCmd {
        self.submit_cmds.push(FrameSubmitCmd {
            pass_id: pass_id.to_string(),
            batch_id: batch_id.to_string(),
            ..FrameSubmitCmd::default()
        });
        self.submit_cmds.last_mut().unwrap()
    }

    /// Clears all recorded state, keeping allocations for reuse.
    pub fn reset(&mut self) {
        self.passes.clear();
        self.uniform_buffers.clear();
        self.submit_cmds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_block_is_192_bytes() {
        let block = MatrixBuffer::default().to_bytes();
        assert_eq!(block.len(), MATRIX_BLOCK_SIZE);
        assert_eq!(block.len(), 192);
    }

    #[test]
    fn uniform_var_roundtrip() {
        let var = UniformVar::new("light_dir", UniformValue::Vec3(Vec3::new(0.0, 1.0, 0.0)));
        let decoded = UniformVar::decode(&var.encode()).unwrap();
        assert_eq!(decoded, var);
    }

    #[test]
    fn long_uniform_name_truncated_to_255() {
        let long_name = "u".repeat(300);
        let var = UniformVar::new(&long_name, UniformValue::Float(1.0));

        let bytes = var.encode();
        assert_eq!(bytes[0] as usize, MAX_UNIFORM_NAME);

        let decoded = UniformVar::decode(&bytes).unwrap();
        assert_eq!(decoded.name.len(), MAX_UNIFORM_NAME);
        assert_eq!(decoded.value, UniformValue::Float(1.0));
    }

    #[test]
    fn uniform_buffer_last_write_wins() {
        let mut buffer = UniformBuffer::new();
        buffer.write(UniformVar::new("tint", UniformValue::Float(0.25)));
        buffer.write(UniformVar::new("other", UniformValue::Int(1)));
        buffer.write(UniformVar::new("tint", UniformValue::Float(0.75)));

        // Storage stays append-only, reads resolve to the newest write.
        assert_eq!(buffer.len(), 3);
        assert_eq!(
            buffer.resolve("tint").unwrap().value,
            UniformValue::Float(0.75)
        );
        assert!(buffer.resolve("missing").is_none());
    }

    #[test]
    fn batch_set_uniform_deduplicates_by_name() {
        let mut batch = RenderBatchData::new("b");
        batch.set_uniform("tint", UniformValue::Float(0.1));
        batch.set_uniform("tint", UniformValue::Float(0.9));

        assert_eq!(batch.uniforms.len(), 1);
        assert_eq!(batch.uniforms[0].value, UniformValue::Float(0.9));
        assert!(batch.dirty.contains(DirtyMask::UNIFORM_BUFFER));
    }

    #[test]
    fn frame_reset_keeps_nothing() {
        let mut frame = Frame::new();
        frame.passes.push(PassData::new("p"));
        frame.uniform_buffers.push(UniformBuffer::new());
        let cmd = frame.enqueue("p", "b");
        cmd.flags |= SubmitFlags::UPDATE_MATRICES;

        frame.reset();
        assert!(frame.passes.is_empty());
        assert!(frame.uniform_buffers.is_empty());
        assert!(frame.submit_cmds.is_empty());
    }

    #[test]
    fn mat4_array_roundtrip() {
        let value = UniformValue::Mat4Array(vec![Mat4::IDENTITY, Mat4::from_scale(Vec3::splat(2.0))]);
        let var = UniformVar::new("bones", value.clone());
        let decoded = UniformVar::decode(&var.encode()).unwrap();
        assert_eq!(decoded.value, value);
    }
}
