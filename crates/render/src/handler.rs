use crate::backend::GpuBackend;
use crate::cmdbuffer::RenderCommandBuffer;
use crate::error::RenderError;
use crate::events::{CreateRendererData, RenderEvent};
use crate::frame::Frame;
use crate::material::{default_material, MaterialHandle};
use crate::monitor::{RenderMonitor, RenderMonitorEvent, DEFAULT_REPORT_INTERVAL};
use crossbeam_channel::Sender;
use dusk_tasks::{EventHandler, HandlerError};
use dusk_util::cache::ResourceCache;
use dusk_util::handle::SharedHandle;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use web_time::Duration;

/// Render-thread endpoint of the frame pipeline.
///
/// Receives every render event from the task queue and drives the
/// [`RenderCommandBuffer`] against the GPU backend. The handler owns the
/// frame it was last committed; the previous one is reset and returned to
/// the application through the recycle channel, which is how the
/// double-buffer swap crosses the thread boundary without locks.
///
/// Fatal errors (context creation, initial shader link) park the handler in
/// a disabled state: frames keep cycling so the application never blocks,
/// but no GPU call is issued until a later `CreateRenderer` succeeds.
pub struct RenderEventHandler<B: GpuBackend> {
    backend: B,
    cmds: RenderCommandBuffer,
    materials: Option<ResourceCache<String, MaterialEntry>>,
    default_material: MaterialHandle,

    renderer_ready: bool,
    running: bool,
    render_failed: Arc<AtomicBool>,

    recycle_tx: Sender<Box<Frame>>,
    current_frame: Option<Box<Frame>>,
    monitor: RenderMonitor,
}

/// Cache entry wrapper so material handles satisfy the cache's lifecycle
/// trait without leaking it into the material type itself.
struct MaterialEntry(MaterialHandle);

impl dusk_util::cache::Resource for MaterialEntry {}

impl<B: GpuBackend> RenderEventHandler<B> {
    pub fn new(
        backend: B,
        recycle_tx: Sender<Box<Frame>>,
        monitor_tx: Sender<RenderMonitorEvent>,
        render_failed: Arc<AtomicBool>,
    ) -> Self {
        Self::with_report_interval(
            backend,
            recycle_tx,
            monitor_tx,
            render_failed,
            DEFAULT_REPORT_INTERVAL,
        )
    }

    pub fn with_report_interval(
        backend: B,
        recycle_tx: Sender<Box<Frame>>,
        monitor_tx: Sender<RenderMonitorEvent>,
        render_failed: Arc<AtomicBool>,
        report_interval: Duration,
    ) -> Self {
        RenderEventHandler {
            backend,
            cmds: RenderCommandBuffer::new(),
            materials: None,
            default_material: SharedHandle::new(default_material()),
            renderer_ready: false,
            running: true,
            render_failed: Arc::clone(&render_failed),
            recycle_tx,
            current_frame: None,
            monitor: RenderMonitor::new(monitor_tx, report_interval),
        }
    }

    fn ensure_attached(&mut self) {
        if self.materials.is_some() {
            return;
        }

        // Seed the materials table with the built-in default; unknown
        // lookups fall back to it as well.
        let default = self.default_material.clone();
        let mut materials: ResourceCache<String, MaterialEntry> =
            ResourceCache::new(move |_name: &String| MaterialEntry(default.clone()));
        materials.set(
            "default".to_string(),
            MaterialEntry(self.default_material.clone()),
        );
        self.materials = Some(materials);
        debug!("Render handler attached, default materials table created");
    }

    fn create_renderer(&mut self, data: CreateRendererData) -> Result<(), RenderError> {
        self.backend.create_context(data.window.as_ref()).map_err(|e| {
            error!("GPU context creation failed: {e}");
            e
        })?;
        self.backend.install_log_sink();

        let viewport = data.window.rect();
        self.backend.set_viewport(viewport);
        self.cmds.set_viewport(viewport);
        self.cmds.set_clear_state(data.clear_state);

        // The renderer only counts as created once the default shader
        // links; a backend that cannot run it cannot draw anything we emit.
        let shader = self
            .backend
            .compile_shader(&self.default_material.shader)
            .map_err(|e| {
                error!("Initial shader link failed: {e}");
                self.backend.destroy_context();
                e
            })?;
        self.cmds.preload_shader(&self.default_material.name, shader);

        self.renderer_ready = true;
        self.render_failed.store(false, Ordering::Release);
        info!(
            "Renderer created, viewport {}x{}",
            viewport.width, viewport.height
        );
        Ok(())
    }

    fn destroy_renderer(&mut self) {
        if !self.renderer_ready {
            return;
        }
        self.cmds.clear_scene(&mut self.backend);
        self.backend.destroy_context();
        self.renderer_ready = false;
        info!("Renderer destroyed");
    }

    /// Takes ownership of the committed frame and hands the previous one
    /// back to the application. Always runs, even while disabled, so the
    /// recycle channel never dries up.
    fn swap_frames(&mut self, frame: Box<Frame>) {
        if let Some(mut previous) = self.current_frame.replace(frame) {
            previous.reset();
            let _ = self.recycle_tx.send(previous);
        }
    }

    fn record_failure(&self, error: &RenderError) {
        error!("Render thread failure: {error}");
        self.render_failed.store(true, Ordering::Release);
    }
}

impl<B: GpuBackend> EventHandler<RenderEvent> for RenderEventHandler<B> {
    fn on_attached(&mut self) -> Result<(), HandlerError> {
        self.ensure_attached();
        Ok(())
    }

    fn on_detached(&mut self) {
        // Give the frame back so a service waiting on the recycle channel
        // during teardown cannot deadlock.
        if let Some(mut frame) = self.current_frame.take() {
            frame.reset();
            let _ = self.recycle_tx.send(frame);
        }
        self.destroy_renderer();
        if let Some(materials) = &mut self.materials {
            materials.clear();
        }
        debug!("Render handler detached");
    }

    fn on_event(&mut self, event: RenderEvent) -> Result<(), HandlerError> {
        if !self.running {
            // Shut down: discard everything, but keep frames cycling.
            if let RenderEvent::CommitFrame(frame) = event {
                self.swap_frames(frame);
            }
            return Ok(());
        }

        match event {
            RenderEvent::StopTask => {}
            RenderEvent::Attach => self.ensure_attached(),
            RenderEvent::Detach => {
                self.destroy_renderer();
                if let Some(materials) = &mut self.materials {
                    materials.clear();
                }
                self.materials = None;
            }
            RenderEvent::CreateRenderer(data) => {
                if let Err(error) = self.create_renderer(data) {
                    self.renderer_ready = false;
                    self.record_failure(&error);
                    return Err(Box::new(error));
                }
            }
            RenderEvent::DestroyRenderer => self.destroy_renderer(),
            RenderEvent::AttachView => debug!("View attached"),
            RenderEvent::DetachView => debug!("View detached"),
            RenderEvent::ClearScene => {
                if self.renderer_ready {
                    self.cmds.clear_scene(&mut self.backend);
                }
            }
            RenderEvent::InitPasses(passes) => {
                if self.renderer_ready {
                    self.cmds.init_passes(&passes, &mut self.backend);
                }
            }
            RenderEvent::CommitFrame(frame) => {
                self.swap_frames(frame);
                if self.renderer_ready {
                    let default_material = self
                        .materials
                        .as_ref()
                        .and_then(|materials| materials.find(&"default".to_string()))
                        .map(|entry| entry.0.clone())
                        .unwrap_or_else(|| self.default_material.clone());
                    let frame = self
                        .current_frame
                        .as_ref()
                        .expect("commit frame was just stored");
                    if let Err(error) =
                        self.cmds.commit(frame, &mut self.backend, &default_material)
                    {
                        self.record_failure(&error);
                    }
                }
            }
            RenderEvent::RenderFrame => {
                if self.renderer_ready {
                    self.monitor.frame_start();
                    let stats = self.cmds.render_frame(&mut self.backend);
                    self.monitor.frame_end(stats);
                }
            }
            RenderEvent::Resize(data) => {
                if self.renderer_ready {
                    if let Err(error) = self.cmds.resize(data.target, data.rect, &mut self.backend)
                    {
                        self.record_failure(&error);
                    }
                }
            }
            RenderEvent::ShutdownRequest => {
                warn!("Render handler shutdown requested, discarding further events");
                self.running = false;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ResizeData;
    use crate::frame::SubmitFlags;
    use crate::mesh::{IndexType, Mesh, PrimitiveGroup, PrimitiveTopology};
    use crate::test_support::{count_calls, CallLog, GpuCall, MockBackend, MockWindow};
    use crossbeam_channel::{unbounded, Receiver};
    use dusk_tasks::EventHandler;

    fn handler_with_mock(
        fail_context: bool,
        fail_shader: bool,
    ) -> (
        RenderEventHandler<MockBackend>,
        CallLog,
        Receiver<Box<Frame>>,
    ) {
        let (mut backend, calls) = MockBackend::new();
        backend.fail_context = fail_context;
        backend.fail_shader = fail_shader;

        let (recycle_tx, recycle_rx) = unbounded();
        let (monitor_tx, _monitor_rx) = unbounded();
        let handler = RenderEventHandler::new(
            backend,
            recycle_tx,
            monitor_tx,
            Arc::new(AtomicBool::new(false)),
        );
        (handler, calls, recycle_rx)
    }

    fn created_handler() -> (
        RenderEventHandler<MockBackend>,
        CallLog,
        Receiver<Box<Frame>>,
    ) {
        let (mut handler, calls, recycle_rx) = handler_with_mock(false, false);
        handler.on_attached().unwrap();
        handler
            .on_event(RenderEvent::CreateRenderer(CreateRendererData {
                window: MockWindow::new(320, 240),
                clear_state: Default::default(),
            }))
            .unwrap();
        (handler, calls, recycle_rx)
    }

    #[test]
    fn commit_recycles_the_previous_frame() {
        let (mut handler, _calls, recycle_rx) = created_handler();

        handler
            .on_event(RenderEvent::CommitFrame(Box::new(Frame::new())))
            .unwrap();
        // First commit: nothing to give back yet.
        assert!(recycle_rx.try_recv().is_err());

        let mut second = Box::new(Frame::new());
        second.enqueue("p", "b").flags |= SubmitFlags::UPDATE_MATRICES;
        handler
            .on_event(RenderEvent::CommitFrame(second))
            .unwrap();

        let recycled = recycle_rx.try_recv().expect("previous frame not recycled");
        assert!(recycled.submit_cmds.is_empty(), "recycled frame must be reset");
    }

    #[test]
    fn shutdown_discards_events_but_keeps_frames_cycling() {
        let (mut handler, calls, recycle_rx) = created_handler();
        handler.on_event(RenderEvent::ShutdownRequest).unwrap();

        calls.lock().unwrap().clear();
        handler
            .on_event(RenderEvent::CommitFrame(Box::new(Frame::new())))
            .unwrap();
        handler.on_event(RenderEvent::RenderFrame).unwrap();

        // No GPU work after shutdown, but the frame keeps moving. The
        // handler held no frame before this commit, so nothing comes back
        // yet; a second commit returns the first frame.
        assert!(calls.lock().unwrap().is_empty());
        handler
            .on_event(RenderEvent::CommitFrame(Box::new(Frame::new())))
            .unwrap();
        assert!(recycle_rx.try_recv().is_ok());
    }

    #[test]
    fn failed_shader_link_destroys_the_context() {
        let (mut handler, calls, _recycle_rx) = handler_with_mock(false, true);
        handler.on_attached().unwrap();

        let result = handler.on_event(RenderEvent::CreateRenderer(CreateRendererData {
            window: MockWindow::new(320, 240),
            clear_state: Default::default(),
        }));
        assert!(result.is_err());
        assert_eq!(
            count_calls(&calls, |c| matches!(c, GpuCall::DestroyContext)),
            1
        );

        // Draw events are no-ops while disabled.
        calls.lock().unwrap().clear();
        handler.on_event(RenderEvent::RenderFrame).unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn resize_reaches_the_backend_between_frames() {
        let (mut handler, calls, _recycle_rx) = created_handler();

        handler
            .on_event(RenderEvent::Resize(ResizeData {
                target: Some(crate::backend::FramebufferId(9)),
                rect: crate::backend::Rect::new(0, 0, 64, 64),
            }))
            .unwrap();

        assert_eq!(
            count_calls(&calls, |c| matches!(c, GpuCall::ResizeFramebuffer(9))),
            1
        );
    }

    #[test]
    fn commit_then_render_draws_committed_mesh() {
        let (mut handler, calls, _recycle_rx) = created_handler();

        let mesh = Mesh::new(
            "quad",
            vec![0u8; 48],
            vec![0u8; 12],
            IndexType::U16,
            vec![PrimitiveGroup {
                topology: PrimitiveTopology::Triangles,
                start_index: 0,
                index_count: 6,
            }],
            None,
        );

        let mut frame = Box::new(Frame::new());
        let mut pass = crate::frame::PassData::new("p");
        let mut batch = crate::frame::RenderBatchData::new("b");
        batch.mesh_entries.push(crate::frame::MeshEntry {
            meshes: vec![mesh],
            instances: 1,
        });
        pass.batches.push(batch);
        let cmd = frame.enqueue("p", "b");
        cmd.flags |= SubmitFlags::ADD_RENDER_DATA;
        cmd.updated_passes.push(pass);

        handler.on_event(RenderEvent::CommitFrame(frame)).unwrap();
        handler.on_event(RenderEvent::RenderFrame).unwrap();

        assert_eq!(
            count_calls(&calls, |c| matches!(c, GpuCall::Draw { count: 6, .. })),
            1
        );
        assert_eq!(count_calls(&calls, |c| matches!(c, GpuCall::Present)), 1);
    }
}
