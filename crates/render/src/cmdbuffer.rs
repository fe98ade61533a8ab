use crate::backend::{
    BufferHandle, ClearState, CullState, FramebufferId, GpuBackend, MeshRecord, MeshStore, Rect,
    ShaderHandle, TextureHandle, UniformLocation, VertexArrayHandle,
};
use crate::error::RenderError;
use crate::frame::{Frame, PassData, SubmitFlags, UniformVar};
use crate::material::MaterialHandle;
use crate::mesh::{MeshHandle, MeshId, PrimitiveGroup};
use log::{debug, warn};
use std::mem;
use std::ops::AddAssign;

/// Additive per-frame execution counters fed to the render monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub calls: usize,
    pub primitives: usize,
}

impl AddAssign for RenderStats {
    fn add_assign(&mut self, other: Self) {
        self.calls += other.calls;
        self.primitives += other.primitives;
    }
}

/// One cached draw: a vertex array plus the primitive groups issued on it.
#[derive(Debug, Clone)]
struct DrawCall {
    vertex_array: VertexArrayHandle,
    groups: Vec<PrimitiveGroup>,
    instances: u32,
}

/// Render-thread mirror of one batch.
struct BatchMirror {
    id: String,
    shader: Option<ShaderHandle>,
    textures: Vec<TextureHandle>,
    /// GPU uniform block holding the three-matrix payload.
    matrix_block: BufferHandle,
    /// Named uniforms seen before the batch had a shader; flushed once one
    /// is bound.
    pending_uniforms: Vec<UniformVar>,
    draws: Vec<DrawCall>,
}

/// Render-thread mirror of one pass.
struct PassMirror {
    id: String,
    framebuffer: Option<FramebufferId>,
    cull: CullState,
    batches: Vec<BatchMirror>,
}

/// Interpreter of committed frames.
///
/// Owns the GPU mirrors keyed by stable ids and the cached draw-call
/// sequence per batch. `commit` folds submit commands into the mirrors,
/// `render_frame` replays the cached sequence in pass and batch insertion
/// order.
pub struct RenderCommandBuffer {
    clear_state: ClearState,
    viewport: Rect,
    passes: Vec<PassMirror>,
    meshes: foldhash::HashMap<MeshId, MeshRecord>,
    /// Compiled shaders keyed by material name.
    shaders: foldhash::HashMap<String, ShaderHandle>,
    textures: foldhash::HashMap<String, TextureHandle>,
    uniform_locations: foldhash::HashMap<(u64, String), UniformLocation>,
}

impl MeshStore for RenderCommandBuffer {
    fn resolve(&self, id: MeshId) -> Option<&MeshRecord> {
        self.meshes.get(&id)
    }
}

impl RenderCommandBuffer {
    pub fn new() -> Self {
        RenderCommandBuffer {
            clear_state: ClearState::default(),
            viewport: Rect::default(),
            passes: Vec::new(),
            meshes: foldhash::HashMap::default(),
            shaders: foldhash::HashMap::default(),
            textures: foldhash::HashMap::default(),
            uniform_locations: foldhash::HashMap::default(),
        }
    }

    pub fn set_clear_state(&mut self, state: ClearState) {
        self.clear_state = state;
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Seeds the shader cache with an already compiled program, so the
    /// default shader linked at renderer creation is not compiled twice.
    pub(crate) fn preload_shader(&mut self, name: &str, shader: ShaderHandle) {
        self.shaders.insert(name.to_string(), shader);
    }

    /// Registers mirrors for passes the render thread has not seen.
    /// Idempotent per pass id.
    pub fn init_passes(&mut self, passes: &[PassData], backend: &mut dyn GpuBackend) {
        for pass in passes {
            let pi = self.ensure_pass(pass);
            for batch in &pass.batches {
                self.ensure_batch_in(pi, &batch.id, backend);
            }
        }
    }

    /// Consumes the submit commands of a committed frame, updating the GPU
    /// mirrors. Errors are logged per command and the first one is
    /// returned; later commands still run so one bad upload cannot wedge
    /// the frame stream.
    pub fn commit(
        &mut self,
        frame: &Frame,
        backend: &mut dyn GpuBackend,
        default_material: &MaterialHandle,
    ) -> Result<(), RenderError> {
        let mut first_error = None;
        let record = |error: RenderError, first_error: &mut Option<RenderError>| {
            warn!("Submit command failed: {error}");
            if first_error.is_none() {
                *first_error = Some(error);
            }
        };

        for cmd in &frame.submit_cmds {
            if cmd.flags.contains(SubmitFlags::UPDATE_MATRICES) {
                let (pi, bi) = self.ensure_batch(&cmd.pass_id, &cmd.batch_id, backend);
                let block = self.passes[pi].batches[bi].matrix_block;
                backend.upload_uniform_buffer(block, &cmd.data);
            }

            if cmd.flags.contains(SubmitFlags::UPDATE_UNIFORMS) {
                match UniformVar::decode(&cmd.data) {
                    Some(var) => {
                        let (pi, bi) = self.ensure_batch(&cmd.pass_id, &cmd.batch_id, backend);
                        match self.passes[pi].batches[bi].shader {
                            Some(shader) => self.apply_uniform(backend, shader, &var),
                            None => self.passes[pi].batches[bi].pending_uniforms.push(var),
                        }
                    }
                    None => warn!(
                        "Malformed uniform payload for batch {}/{}",
                        cmd.pass_id, cmd.batch_id
                    ),
                }
            }

            if cmd.flags.contains(SubmitFlags::UPDATE_BUFFER) {
                match cmd.mesh_id {
                    Some(id) => match self.meshes.get(&id) {
                        Some(mesh_record) => {
                            if let Err(error) =
                                backend.upload_vertex_buffer(mesh_record.vertex_buffer, &cmd.data)
                            {
                                record(error.into(), &mut first_error);
                            }
                        }
                        None => record(RenderError::MeshNotFound(id), &mut first_error),
                    },
                    None => warn!("UpdateBuffer command without a mesh id"),
                }
            }

            if cmd.flags.contains(SubmitFlags::ADD_RENDER_DATA) {
                for snapshot in &cmd.updated_passes {
                    if let Err(error) = self.add_render_data(snapshot, backend, default_material) {
                        record(error, &mut first_error);
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Replays the cached draw sequence: clear, then every pass and batch in
    /// insertion order, then present.
    pub fn render_frame(&mut self, backend: &mut dyn GpuBackend) -> RenderStats {
        let mut stats = RenderStats::default();

        backend.clear(&self.clear_state);

        for pi in 0..self.passes.len() {
            backend.bind_framebuffer(self.passes[pi].framebuffer);
            backend.set_viewport(self.viewport);
            let cull = self.passes[pi].cull;
            backend.set_cull_state(&cull);

            for bi in 0..self.passes[pi].batches.len() {
                if let Some(shader) = self.passes[pi].batches[bi].shader {
                    backend.bind_shader(Some(shader));

                    let pending = mem::take(&mut self.passes[pi].batches[bi].pending_uniforms);
                    for var in &pending {
                        self.apply_uniform(backend, shader, var);
                    }

                    let block = self.passes[pi].batches[bi].matrix_block;
                    backend.bind_uniform_block(shader, block);

                    let textures = self.passes[pi].batches[bi].textures.clone();
                    for (unit, texture) in textures.iter().enumerate() {
                        backend.bind_texture(*texture, unit as u32);
                    }
                }

                for draw in &self.passes[pi].batches[bi].draws {
                    backend.bind_vertex_array(Some(draw.vertex_array));
                    for group in &draw.groups {
                        if draw.instances <= 1 {
                            backend.draw(group);
                            stats.primitives += group.primitives();
                        } else {
                            backend.draw_instanced(group, draw.instances);
                            stats.primitives += group.primitives() * draw.instances as usize;
                        }
                        stats.calls += 1;
                    }
                }
            }
        }

        backend.bind_shader(None);
        backend.bind_vertex_array(None);
        backend.present();

        stats
    }

    /// Resizes a named framebuffer and reassigns the viewport. Mirror
    /// caches are kept.
    pub fn resize(
        &mut self,
        target: Option<FramebufferId>,
        rect: Rect,
        backend: &mut dyn GpuBackend,
    ) -> Result<(), RenderError> {
        if let Some(framebuffer) = target {
            backend.resize_framebuffer(framebuffer, rect)?;
        }
        self.viewport = rect;
        backend.set_viewport(rect);
        Ok(())
    }

    /// Drops every mirror and releases the backing GPU objects.
    pub fn clear_scene(&mut self, backend: &mut dyn GpuBackend) {
        debug!(
            "Clearing scene: {} passes, {} mesh mirrors",
            self.passes.len(),
            self.meshes.len()
        );
        backend.release_all();
        self.passes.clear();
        self.meshes.clear();
        self.shaders.clear();
        self.textures.clear();
        self.uniform_locations.clear();
    }

    fn ensure_pass(&mut self, pass: &PassData) -> usize {
        match self.passes.iter().position(|mirror| mirror.id == pass.id) {
            Some(pi) => pi,
            None => {
                self.passes.push(PassMirror {
                    id: pass.id.clone(),
                    framebuffer: pass.render_target,
                    cull: pass.cull,
                    batches: Vec::new(),
                });
                self.passes.len() - 1
            }
        }
    }

    /// Pass mirror addressed only by id; submit commands may precede the
    /// snapshot that carries the pass attributes.
    fn ensure_pass_by_id(&mut self, pass_id: &str) -> usize {
        match self.passes.iter().position(|mirror| mirror.id == pass_id) {
            Some(pi) => pi,
            None => {
                self.passes.push(PassMirror {
                    id: pass_id.to_string(),
                    framebuffer: None,
                    cull: CullState::default(),
                    batches: Vec::new(),
                });
                self.passes.len() - 1
            }
        }
    }

    fn ensure_batch(
        &mut self,
        pass_id: &str,
        batch_id: &str,
        backend: &mut dyn GpuBackend,
    ) -> (usize, usize) {
        let pi = self.ensure_pass_by_id(pass_id);
        let bi = self.ensure_batch_in(pi, batch_id, backend);
        (pi, bi)
    }

    fn ensure_batch_in(&mut self, pi: usize, batch_id: &str, backend: &mut dyn GpuBackend) -> usize {
        let batches = &mut self.passes[pi].batches;
        match batches.iter().position(|mirror| mirror.id == batch_id) {
            Some(bi) => bi,
            None => {
                batches.push(BatchMirror {
                    id: batch_id.to_string(),
                    shader: None,
                    textures: Vec::new(),
                    matrix_block: backend.create_uniform_buffer(),
                    pending_uniforms: Vec::new(),
                    draws: Vec::new(),
                });
                batches.len() - 1
            }
        }
    }

    /// Builds or refreshes the mirrors for every batch in the snapshot and
    /// caches the draw-call sequence.
    fn add_render_data(
        &mut self,
        snapshot: &PassData,
        backend: &mut dyn GpuBackend,
        default_material: &MaterialHandle,
    ) -> Result<(), RenderError> {
        let pi = self.ensure_pass(snapshot);
        self.passes[pi].framebuffer = snapshot.render_target;
        self.passes[pi].cull = snapshot.cull;

        for batch_data in &snapshot.batches {
            let bi = self.ensure_batch_in(pi, &batch_data.id, backend);

            let material = batch_data
                .mesh_entries
                .iter()
                .flat_map(|entry| entry.meshes.iter())
                .find_map(|mesh| mesh.material().cloned())
                .unwrap_or_else(|| default_material.clone());

            let shader = self.lookup_shader(&material, backend)?;
            let textures: Vec<TextureHandle> = material
                .textures
                .iter()
                .map(|name| self.lookup_texture(name, backend))
                .collect();

            let mut draws = Vec::new();
            for entry in &batch_data.mesh_entries {
                for mesh in &entry.meshes {
                    let mesh_record = self.ensure_mesh(mesh, backend);
                    draws.push(DrawCall {
                        vertex_array: mesh_record.vertex_array,
                        groups: mesh_record.prim_groups,
                        instances: entry.instances,
                    });
                }
            }

            {
                let mirror = &mut self.passes[pi].batches[bi];
                mirror.shader = Some(shader);
                mirror.textures = textures;
                mirror.draws = draws;
                backend.upload_uniform_buffer(
                    mirror.matrix_block,
                    &batch_data.matrix_buffer.to_bytes(),
                );
            }

            // Uniforms recorded before the shader existed, plus the batch
            // state carried by the snapshot itself.
            let pending = mem::take(&mut self.passes[pi].batches[bi].pending_uniforms);
            for var in pending.iter().chain(batch_data.uniforms.iter()) {
                self.apply_uniform(backend, shader, var);
            }
        }

        Ok(())
    }

    fn lookup_shader(
        &mut self,
        material: &MaterialHandle,
        backend: &mut dyn GpuBackend,
    ) -> Result<ShaderHandle, RenderError> {
        if let Some(shader) = self.shaders.get(&material.name) {
            return Ok(*shader);
        }

        let shader = backend.compile_shader(&material.shader)?;
        debug!("Compiled shader for material {}", material.name);
        self.shaders.insert(material.name.clone(), shader);
        Ok(shader)
    }

    fn lookup_texture(&mut self, name: &str, backend: &mut dyn GpuBackend) -> TextureHandle {
        if let Some(texture) = self.textures.get(name) {
            return *texture;
        }

        let texture = backend.create_texture(name);
        self.textures.insert(name.to_string(), texture);
        texture
    }

    fn ensure_mesh(&mut self, mesh: &MeshHandle, backend: &mut dyn GpuBackend) -> MeshRecord {
        if let Some(mesh_record) = self.meshes.get(&mesh.id()) {
            return mesh_record.clone();
        }

        let vertex_buffer = backend.create_vertex_buffer(&mesh.vertices());
        let index_buffer = backend.create_index_buffer(mesh.indices(), mesh.index_type());
        let vertex_array = backend.create_vertex_array(vertex_buffer, index_buffer);

        let mesh_record = MeshRecord {
            vertex_buffer,
            index_buffer,
            vertex_array,
            prim_groups: mesh.prim_groups().to_vec(),
        };
        self.meshes.insert(mesh.id(), mesh_record.clone());
        debug!("Created GPU mirror for mesh {}", mesh.name());
        mesh_record
    }

    fn apply_uniform(&mut self, backend: &mut dyn GpuBackend, shader: ShaderHandle, var: &UniformVar) {
        let key = (shader.0, var.name.clone());
        let location = match self.uniform_locations.get(&key) {
            Some(location) => Some(*location),
            None => {
                let location = backend.uniform_location(shader, &var.name);
                if let Some(location) = location {
                    self.uniform_locations.insert(key, location);
                }
                location
            }
        };

        match location {
            Some(location) => backend.set_uniform(shader, location, &var.value),
            None => debug!("Uniform {} not bound by the active shader", var.name),
        }
    }
}

impl Default for RenderCommandBuffer {
    fn default() -> Self {
        RenderCommandBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{MeshEntry, RenderBatchData};
    use crate::material::default_material;
    use crate::mesh::{IndexType, Mesh, MeshHandle, PrimitiveTopology};
    use crate::test_support::{count_calls, GpuCall, MockBackend};
    use dusk_util::handle::SharedHandle;

    fn mesh_with_groups(name: &str, groups: &[(usize, usize)]) -> MeshHandle {
        let prim_groups = groups
            .iter()
            .map(|&(start_index, index_count)| PrimitiveGroup {
                topology: PrimitiveTopology::Triangles,
                start_index,
                index_count,
            })
            .collect();
        Mesh::new(name, vec![0u8; 24], vec![0u8; 12], IndexType::U16, prim_groups, None)
    }

    fn pass_with_batches(id: &str, batches: Vec<RenderBatchData>) -> PassData {
        let mut pass = PassData::new(id);
        pass.batches = batches;
        pass
    }

    fn batch_with_mesh(id: &str, mesh: &MeshHandle, instances: u32) -> RenderBatchData {
        let mut batch = RenderBatchData::new(id);
        batch.mesh_entries.push(MeshEntry {
            meshes: vec![mesh.clone()],
            instances,
        });
        batch
    }

    #[test]
    fn init_passes_is_idempotent() {
        let (mut backend, calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();

        let passes = vec![pass_with_batches(
            "p",
            vec![RenderBatchData::new("b")],
        )];

        cmds.init_passes(&passes, &mut backend);
        cmds.init_passes(&passes, &mut backend);

        assert_eq!(cmds.pass_count(), 1);
        assert_eq!(
            count_calls(&calls, |c| matches!(c, GpuCall::CreateUniformBuffer)),
            1
        );
    }

    #[test]
    fn batches_draw_in_insertion_order() {
        let (mut backend, calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();
        let default = SharedHandle::new(default_material());

        let first = mesh_with_groups("first", &[(0, 3)]);
        let second = mesh_with_groups("second", &[(0, 6)]);
        let snapshot = pass_with_batches(
            "p",
            vec![
                batch_with_mesh("b1", &first, 1),
                batch_with_mesh("b2", &second, 1),
            ],
        );

        cmds.add_render_data(&snapshot, &mut backend, &default).unwrap();
        cmds.render_frame(&mut backend);

        let log = calls.lock().unwrap();
        let b1 = log
            .iter()
            .position(|c| matches!(c, GpuCall::Draw { count: 3, .. }))
            .unwrap();
        let b2 = log
            .iter()
            .position(|c| matches!(c, GpuCall::Draw { count: 6, .. }))
            .unwrap();
        assert!(b1 < b2);
    }

    #[test]
    fn primitive_groups_draw_in_insertion_order() {
        let (mut backend, calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();
        let default = SharedHandle::new(default_material());

        let mesh = mesh_with_groups("m", &[(0, 3), (3, 6)]);
        let snapshot = pass_with_batches("p", vec![batch_with_mesh("b", &mesh, 1)]);

        cmds.add_render_data(&snapshot, &mut backend, &default).unwrap();
        let stats = cmds.render_frame(&mut backend);

        let log = calls.lock().unwrap();
        let g0 = log
            .iter()
            .position(|c| matches!(c, GpuCall::Draw { start: 0, count: 3 }))
            .unwrap();
        let g1 = log
            .iter()
            .position(|c| matches!(c, GpuCall::Draw { start: 3, count: 6 }))
            .unwrap();
        assert!(g0 < g1);
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.primitives, 1 + 2);
    }

    #[test]
    fn instanced_entries_use_instanced_draws() {
        let (mut backend, calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();
        let default = SharedHandle::new(default_material());

        let mesh = mesh_with_groups("m", &[(0, 3)]);
        let snapshot = pass_with_batches("p", vec![batch_with_mesh("b", &mesh, 8)]);

        cmds.add_render_data(&snapshot, &mut backend, &default).unwrap();
        let stats = cmds.render_frame(&mut backend);

        assert_eq!(
            count_calls(&calls, |c| matches!(
                c,
                GpuCall::DrawInstanced {
                    count: 3,
                    instances: 8
                }
            )),
            1
        );
        assert_eq!(count_calls(&calls, |c| matches!(c, GpuCall::Draw { .. })), 0);
        assert_eq!(stats.primitives, 8);
    }

    #[test]
    fn update_buffer_without_mirror_fails() {
        let (mut backend, _calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();
        let default = SharedHandle::new(default_material());

        let mesh = mesh_with_groups("m", &[(0, 3)]);
        let mut frame = Frame::new();
        let cmd = frame.enqueue("p", "b");
        cmd.flags |= SubmitFlags::UPDATE_BUFFER;
        cmd.mesh_id = Some(mesh.id());
        cmd.data = vec![0u8; 16];

        assert!(matches!(
            cmds.commit(&frame, &mut backend, &default),
            Err(RenderError::MeshNotFound(_))
        ));
    }

    #[test]
    fn commit_keeps_processing_after_an_error() {
        let (mut backend, calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();
        let default = SharedHandle::new(default_material());

        let missing = mesh_with_groups("missing", &[(0, 3)]);
        let present = mesh_with_groups("present", &[(0, 3)]);

        let mut frame = Frame::new();
        let bad = frame.enqueue("p", "b");
        bad.flags |= SubmitFlags::UPDATE_BUFFER;
        bad.mesh_id = Some(missing.id());
        bad.data = vec![0u8; 8];

        let good = frame.enqueue("p", "b");
        good.flags |= SubmitFlags::ADD_RENDER_DATA;
        good.updated_passes
            .push(pass_with_batches("p", vec![batch_with_mesh("b", &present, 1)]));

        assert!(cmds.commit(&frame, &mut backend, &default).is_err());

        // The batch after the failing command still went through.
        cmds.render_frame(&mut backend);
        assert_eq!(count_calls(&calls, |c| matches!(c, GpuCall::Draw { .. })), 1);
    }

    #[test]
    fn mesh_store_resolves_after_add_render_data() {
        let (mut backend, _calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();
        let default = SharedHandle::new(default_material());

        let mesh = mesh_with_groups("m", &[(0, 3)]);
        let snapshot = pass_with_batches("p", vec![batch_with_mesh("b", &mesh, 1)]);
        cmds.add_render_data(&snapshot, &mut backend, &default).unwrap();

        let record = cmds.resolve(mesh.id()).expect("mesh mirror missing");
        assert_eq!(record.prim_groups.len(), 1);
        assert!(cmds.resolve(mesh_with_groups("other", &[]).id()).is_none());
    }

    #[test]
    fn resize_does_not_clear_mirrors() {
        let (mut backend, calls) = MockBackend::new();
        let mut cmds = RenderCommandBuffer::new();
        let default = SharedHandle::new(default_material());

        let mesh = mesh_with_groups("m", &[(0, 3)]);
        let snapshot = pass_with_batches("p", vec![batch_with_mesh("b", &mesh, 1)]);
        cmds.add_render_data(&snapshot, &mut backend, &default).unwrap();

        cmds.resize(Some(FramebufferId(3)), Rect::new(0, 0, 300, 200), &mut backend)
            .unwrap();

        cmds.render_frame(&mut backend);
        assert_eq!(count_calls(&calls, |c| matches!(c, GpuCall::Draw { .. })), 1);
        assert!(count_calls(&calls, |c| matches!(
            c,
            GpuCall::SetViewport(Rect {
                width: 300,
                height: 200,
                ..
            })
        )) >= 1);
    }
}
