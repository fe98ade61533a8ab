use crate::backend::{ClearMask, ClearState, FramebufferId, GpuBackend, Rect, Window};
use crate::error::RenderError;
use crate::events::{CreateRendererData, RenderEvent, ResizeData};
use crate::frame::{
    DirtyMask, Frame, MeshEntry, PassData, RenderBatchData, SubmitFlags, UniformBuffer, UniformVar,
    UniformValue,
};
use crate::handler::RenderEventHandler;
use crate::mesh::MeshHandle;
use crate::monitor::RenderMonitorEvent;
use crossbeam_channel::{unbounded, Receiver};
use dusk_core::settings::{ConfigKey, Settings};
use dusk_tasks::SystemTask;
use glam::Mat4;
use log::{error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use web_time::Duration;

/// Which slot of the batch matrix block a `set_matrix` call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Model,
    View,
    Projection,
}

/// A pass or batch taken out of its parent list while it is being
/// recorded. `index` remembers where to put it back so insertion order
/// survives re-recording.
struct Recording<T> {
    index: Option<usize>,
    data: T,
}

/// Application-side frame-building facade.
///
/// All `begin_*`/`set_*`/`add_*` calls mutate the recorded pass list in
/// place and mark dirty bits; nothing crosses the thread boundary until
/// [`RenderBackendService::request_next_frame`], the commit barrier, which
/// diffs the dirty state into submit commands, hands the frame to the
/// render task and blocks until the render thread has drained its queue.
///
/// Misuse of the recording API is logged and returned as a typed error; the
/// offending call is a no-op and the submit frame stays coherent.
pub struct RenderBackendService {
    settings: Settings,
    task: SystemTask<RenderEvent>,

    passes: Vec<PassData>,
    current_pass: Option<Recording<PassData>>,
    current_batch: Option<Recording<RenderBatchData>>,

    submit: Option<Box<Frame>>,
    recycle_rx: Receiver<Box<Frame>>,
    monitor_rx: Receiver<RenderMonitorEvent>,
    render_failed: Arc<AtomicBool>,

    frames_initialized: bool,
    auto_resize: bool,
    active_pipeline: Option<String>,
}

impl RenderBackendService {
    /// Spawns the render task over the given backend and starts it.
    pub fn create(
        settings: Settings,
        backend: impl GpuBackend,
    ) -> Result<RenderBackendService, RenderError> {
        Self::create_with_report_interval(settings, backend, Duration::from_secs(1))
    }

    pub fn create_with_report_interval(
        settings: Settings,
        backend: impl GpuBackend,
        report_interval: Duration,
    ) -> Result<RenderBackendService, RenderError> {
        let (recycle_tx, recycle_rx) = unbounded();
        let (monitor_tx, monitor_rx) = unbounded();
        let render_failed = Arc::new(AtomicBool::new(false));

        // The second frame of the double buffer starts parked in the
        // recycle channel; the first request takes it as the new submit
        // frame while the render thread holds the committed one.
        recycle_tx
            .send(Box::new(Frame::new()))
            .expect("recycle channel cannot be closed yet");

        let handler = RenderEventHandler::with_report_interval(
            backend,
            recycle_tx,
            monitor_tx,
            Arc::clone(&render_failed),
            report_interval,
        );

        let mut task = SystemTask::new("render_task");
        task.attach_handler(Box::new(handler))?;
        task.start()?;

        Ok(RenderBackendService {
            settings,
            task,
            passes: Vec::new(),
            current_pass: None,
            current_batch: None,
            submit: Some(Box::new(Frame::new())),
            recycle_rx,
            monitor_rx,
            render_failed,
            frames_initialized: false,
            auto_resize: true,
            active_pipeline: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Asks the render thread to create the GPU context against `window`.
    /// Blocks until the render thread processed the request.
    pub fn create_renderer(&mut self, window: Arc<dyn Window>) -> Result<(), RenderError> {
        if !self.task.is_running() {
            return Err(RenderError::NotRunning);
        }

        let clear_state = self.clear_state_from_settings();
        self.task.send_event(RenderEvent::CreateRenderer(CreateRendererData {
            window,
            clear_state,
        }));
        self.task.await_quiescent();

        if self.render_failed.swap(false, Ordering::AcqRel) {
            return Err(RenderError::RenderThreadFailed);
        }
        Ok(())
    }

    /// Tears the GPU context down. A later `create_renderer` may bring the
    /// renderer back on the same task.
    pub fn destroy_renderer(&mut self) {
        self.task.send_event(RenderEvent::DestroyRenderer);
    }

    /// Forwards an arbitrary event to the render task, for collaborators
    /// that talk to the handler directly (view attachment, scene clears).
    pub fn send_event(&self, event: RenderEvent) {
        self.task.send_event(event);
    }

    fn clear_state_from_settings(&self) -> ClearState {
        let mut mask = ClearMask::COLOR;
        if self
            .settings
            .get(ConfigKey::DepthBufferDepth)
            .as_int()
            .unwrap_or(0)
            > 0
        {
            mask |= ClearMask::DEPTH;
        }
        if self
            .settings
            .get(ConfigKey::StencilBufferDepth)
            .as_int()
            .unwrap_or(0)
            > 0
        {
            mask |= ClearMask::STENCIL;
        }

        let mut state = ClearState::default();
        state.mask = mask;
        if let Some(color) = self.settings.get(ConfigKey::ClearColor).as_color() {
            state.color = color;
        }
        state
    }

    /// Opens a pass for recording. Reuses the pass recorded under the same
    /// id in an earlier frame instead of duplicating it.
    pub fn begin_pass(&mut self, id: &str) -> Result<&mut PassData, RenderError> {
        if self.current_pass.is_some() {
            warn!("Pass recording already active");
            return Err(RenderError::PassAlreadyActive);
        }

        let recording = match self.passes.iter().position(|pass| pass.id == id) {
            Some(index) => Recording {
                index: Some(index),
                data: self.passes.remove(index),
            },
            None => Recording {
                index: None,
                data: PassData::new(id),
            },
        };

        self.current_pass = Some(recording);
        Ok(&mut self.current_pass.as_mut().unwrap().data)
    }

    /// Opens a batch inside the active pass. An unclosed previous batch is
    /// closed implicitly.
    pub fn begin_render_batch(&mut self, id: &str) -> Result<&mut RenderBatchData, RenderError> {
        if self.current_pass.is_none() {
            error!("Pass recording not active");
            return Err(RenderError::NoActivePass);
        }

        if self.current_batch.is_some() {
            warn!("Batch recording already active, closing it");
            self.end_render_batch()?;
        }

        let pass = &mut self.current_pass.as_mut().unwrap().data;
        let recording = match pass.batches.iter().position(|batch| batch.id == id) {
            Some(index) => Recording {
                index: Some(index),
                data: pass.batches.remove(index),
            },
            None => Recording {
                index: None,
                data: RenderBatchData::new(id),
            },
        };

        self.current_batch = Some(recording);
        Ok(&mut self.current_batch.as_mut().unwrap().data)
    }

    /// Points the active pass at an offscreen framebuffer.
    pub fn set_render_target(&mut self, target: FramebufferId) -> Result<(), RenderError> {
        match &mut self.current_pass {
            Some(pass) => {
                pass.data.render_target = Some(target);
                Ok(())
            }
            None => {
                error!("No active pass, cannot set render target");
                Err(RenderError::NoActivePass)
            }
        }
    }

    /// Writes one slot of the batch matrix block. View and projection also
    /// refresh the pass-level cache shared by every batch of the pass.
    pub fn set_matrix(&mut self, kind: MatrixKind, matrix: Mat4) -> Result<(), RenderError> {
        let Some(batch) = &mut self.current_batch else {
            error!("No active batch");
            return Err(RenderError::NoActiveBatch);
        };

        match kind {
            MatrixKind::Model => batch.data.matrix_buffer.model = matrix,
            MatrixKind::View => {
                batch.data.matrix_buffer.view = matrix;
                if let Some(pass) = &mut self.current_pass {
                    pass.data.view = matrix;
                }
            }
            MatrixKind::Projection => {
                batch.data.matrix_buffer.proj = matrix;
                if let Some(pass) = &mut self.current_pass {
                    pass.data.proj = matrix;
                }
            }
        }
        batch.data.dirty |= DirtyMask::MATRIX_BUFFER;
        Ok(())
    }

    /// Adds or overwrites a named mat4 uniform on the active batch.
    pub fn set_matrix_by_name(&mut self, name: &str, matrix: Mat4) -> Result<(), RenderError> {
        let Some(batch) = &mut self.current_batch else {
            error!("No active batch");
            return Err(RenderError::NoActiveBatch);
        };
        batch.data.set_uniform(name, UniformValue::Mat4(matrix));
        Ok(())
    }

    /// Adds or overwrites a named mat4 array uniform on the active batch.
    pub fn set_matrix_array(&mut self, name: &str, matrices: &[Mat4]) -> Result<(), RenderError> {
        let Some(batch) = &mut self.current_batch else {
            error!("No active batch");
            return Err(RenderError::NoActiveBatch);
        };
        batch
            .data
            .set_uniform(name, UniformValue::Mat4Array(matrices.to_vec()));
        Ok(())
    }

    /// Appends a uniform to the active batch without name deduplication.
    pub fn add_uniform(&mut self, var: UniformVar) -> Result<(), RenderError> {
        let Some(batch) = &mut self.current_batch else {
            error!("No active batch");
            return Err(RenderError::NoActiveBatch);
        };
        batch.data.uniforms.push(var);
        batch.data.dirty |= DirtyMask::UNIFORM_BUFFER;
        Ok(())
    }

    /// Records a mesh to draw with the active batch.
    pub fn add_mesh(&mut self, mesh: &MeshHandle, instances: u32) -> Result<(), RenderError> {
        self.add_meshes(std::slice::from_ref(mesh), instances)
    }

    /// Records a group of meshes drawn together with one instance count.
    pub fn add_meshes(&mut self, meshes: &[MeshHandle], instances: u32) -> Result<(), RenderError> {
        if meshes.is_empty() {
            error!("Mesh array is empty");
            return Err(RenderError::EmptyMeshArray);
        }

        let Some(batch) = &mut self.current_batch else {
            error!("No active batch");
            return Err(RenderError::NoActiveBatch);
        };

        batch.data.mesh_entries.push(MeshEntry {
            meshes: meshes.to_vec(),
            instances,
        });
        batch.data.dirty |= DirtyMask::MESH;
        Ok(())
    }

    /// Flags a mesh whose vertex bytes changed; the new contents ship with
    /// the next commit.
    pub fn update_mesh(&mut self, mesh: &MeshHandle) -> Result<(), RenderError> {
        let Some(batch) = &mut self.current_batch else {
            error!("No active batch");
            return Err(RenderError::NoActiveBatch);
        };
        batch.data.updated_meshes.push(mesh.clone());
        batch.data.dirty |= DirtyMask::MESH_UPDATE;
        Ok(())
    }

    /// Closes the active batch, inserting it back into its pass.
    pub fn end_render_batch(&mut self) -> Result<(), RenderError> {
        let Some(batch) = self.current_batch.take() else {
            return Err(RenderError::NoActiveBatch);
        };
        let Some(pass) = &mut self.current_pass else {
            return Err(RenderError::NoActivePass);
        };

        match batch.index {
            Some(index) => pass.data.batches.insert(index, batch.data),
            None => pass.data.batches.push(batch.data),
        }
        Ok(())
    }

    /// Closes the active pass. Ending a pass with zero batches is legal and
    /// yields a no-op frame.
    pub fn end_pass(&mut self) -> Result<(), RenderError> {
        if self.current_batch.is_some() {
            warn!("Ending pass with an open batch, closing it");
            self.end_render_batch()?;
        }

        let Some(pass) = self.current_pass.take() else {
            return Err(RenderError::NoActivePass);
        };

        match pass.index {
            Some(index) => self.passes.insert(index, pass.data),
            None => self.passes.push(pass.data),
        }
        Ok(())
    }

    /// Number of recorded passes, active recordings excluded.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass(&self, id: &str) -> Option<&PassData> {
        self.passes.iter().find(|pass| pass.id == id)
    }

    /// The commit barrier. Diffs every dirty batch into submit commands,
    /// hands the frame to the render thread, swaps the double buffer and
    /// blocks until the render thread drained its queue.
    pub fn request_next_frame(&mut self) -> Result<(), RenderError> {
        if !self.task.is_running() {
            return Err(RenderError::NotRunning);
        }

        if !self.frames_initialized {
            self.task
                .send_event(RenderEvent::InitPasses(self.passes.clone()));
            self.frames_initialized = true;
        }

        let mut frame = self.submit.take().ok_or(RenderError::RenderThreadFailed)?;
        self.build_submit_cmds(&mut frame);

        self.task.send_event(RenderEvent::CommitFrame(frame));

        // The swap: the previously rendered frame comes back reset once the
        // render thread has taken ownership of the committed one.
        self.submit = Some(
            self.recycle_rx
                .recv()
                .map_err(|_| RenderError::RenderThreadFailed)?,
        );

        self.task.send_event(RenderEvent::RenderFrame);
        // Quiescence rather than a bare update wait: a pulse from the
        // commit drain could otherwise be mistaken for the render drain.
        self.task.await_quiescent();

        if self.render_failed.swap(false, Ordering::AcqRel) {
            return Err(RenderError::RenderThreadFailed);
        }
        Ok(())
    }

    /// Step 1 of the commit barrier: walk every dirty mask and synthesise
    /// submit commands. Each bit is cleared as its commands are emitted.
    fn build_submit_cmds(&mut self, frame: &mut Frame) {
        frame
            .uniform_buffers
            .resize_with(self.passes.len(), UniformBuffer::new);

        for (pass_idx, pass) in self.passes.iter_mut().enumerate() {
            let pass_id = pass.id.clone();
            let render_target = pass.render_target;
            let view = pass.view;
            let proj = pass.proj;
            let cull = pass.cull;

            for batch_idx in 0..pass.batches.len() {
                let batch = &mut pass.batches[batch_idx];

                if batch.dirty.contains(DirtyMask::MATRIX_BUFFER) {
                    batch.matrix_buffer.view = view;
                    batch.matrix_buffer.proj = proj;

                    let data = batch.matrix_buffer.to_bytes();
                    let cmd = frame.enqueue(&pass_id, &batch.id);
                    cmd.flags |= SubmitFlags::UPDATE_MATRICES;
                    cmd.data = data;

                    batch.dirty.remove(DirtyMask::MATRIX_BUFFER);
                }

                if batch.dirty.contains(DirtyMask::UNIFORM_BUFFER) {
                    for var in &batch.uniforms {
                        // Write-through into the per-pass uniform log; the
                        // batch list stays authoritative on conflicts.
                        frame.uniform_buffers[pass_idx].write(var.clone());

                        let cmd = frame.enqueue(&pass_id, &batch.id);
                        cmd.flags |= SubmitFlags::UPDATE_UNIFORMS;
                        cmd.data = var.encode();
                    }
                    batch.dirty.remove(DirtyMask::UNIFORM_BUFFER);
                }

                if batch.dirty.contains(DirtyMask::MESH_UPDATE) {
                    for mesh in batch.updated_meshes.drain(..) {
                        let cmd = frame.enqueue(&pass_id, &batch.id);
                        cmd.flags |= SubmitFlags::UPDATE_BUFFER;
                        cmd.mesh_id = Some(mesh.id());
                        cmd.data = mesh.vertices().clone();
                    }
                    batch.dirty.remove(DirtyMask::MESH_UPDATE);
                }

                if batch.dirty.contains(DirtyMask::MESH) {
                    let snapshot = PassData {
                        id: pass_id.clone(),
                        render_target,
                        view,
                        proj,
                        cull,
                        batches: vec![batch.clone()],
                    };

                    let cmd = frame.enqueue(&pass_id, &batch.id);
                    cmd.flags |= SubmitFlags::ADD_RENDER_DATA;
                    cmd.updated_passes.push(snapshot);

                    batch.dirty.remove(DirtyMask::MESH);
                }
            }
        }
    }

    /// Forwards a resize to the render thread when auto-resize is enabled.
    pub fn resize(&mut self, target: Option<FramebufferId>, rect: Rect) {
        if !self.auto_resize {
            return;
        }
        self.task
            .send_event(RenderEvent::Resize(ResizeData { target, rect }));
    }

    pub fn set_auto_resize(&mut self, enabled: bool) {
        self.auto_resize = enabled;
    }

    /// Drops every recorded pass. The next commit re-announces passes to
    /// the render thread.
    pub fn clear_passes(&mut self) {
        self.current_pass = None;
        self.current_batch = None;
        self.passes.clear();
        self.frames_initialized = false;
    }

    /// Scene reload: drops recorded passes and releases the render-thread
    /// mirrors.
    pub fn clear_scene(&mut self) {
        self.clear_passes();
        self.task.send_event(RenderEvent::ClearScene);
    }

    /// Label of the pipeline the application considers active. Opaque to
    /// the core, carried for diagnostics.
    pub fn set_active_pipeline(&mut self, name: Option<&str>) {
        self.active_pipeline = name.map(str::to_string);
    }

    pub fn active_pipeline(&self) -> Option<&str> {
        self.active_pipeline.as_deref()
    }

    /// Drains pending monitor events without blocking.
    pub fn poll_monitor(&self) -> Vec<RenderMonitorEvent> {
        self.monitor_rx.try_iter().collect()
    }

    pub fn queue_size(&self) -> usize {
        self.task.queue_size()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Stops the render task. Pending jobs, including the final frame, are
    /// dispatched before the worker exits.
    pub fn shutdown(&mut self) -> Result<(), RenderError> {
        self.task.stop()?;
        Ok(())
    }
}

/// Name under which the service registers itself in the service registry.
pub const RENDER_SERVICE_NAME: &str = "render-backend";
