use crate::backend::{ClearState, FramebufferId, Rect, Window};
use crate::frame::{Frame, PassData};
use dusk_tasks::TaskEvent;
use std::sync::Arc;

/// Payload of `CreateRenderer`.
pub struct CreateRendererData {
    pub window: Arc<dyn Window>,
    pub clear_state: ClearState,
}

/// Payload of `Resize`. `target` of `None` addresses the default
/// framebuffer, which only moves the viewport.
#[derive(Debug, Clone, Copy)]
pub struct ResizeData {
    pub target: Option<FramebufferId>,
    pub rect: Rect,
}

/// Every event the render task understands. The payload travels inside the
/// variant, so the handler dispatches with a single `match`.
pub enum RenderEvent {
    /// Cooperative stop job for the task queue.
    StopTask,
    Attach,
    Detach,
    CreateRenderer(CreateRendererData),
    DestroyRenderer,
    AttachView,
    DetachView,
    ClearScene,
    /// Snapshots of passes the render thread has not seen yet.
    InitPasses(Vec<PassData>),
    /// The diffed submit frame, moved to the render thread. Ownership
    /// returns to the application through the recycle channel.
    CommitFrame(Box<Frame>),
    RenderFrame,
    Resize(ResizeData),
    ShutdownRequest,
}

impl TaskEvent for RenderEvent {
    fn kind(&self) -> &'static str {
        match self {
            RenderEvent::StopTask => "StopTask",
            RenderEvent::Attach => "Attach",
            RenderEvent::Detach => "Detach",
            RenderEvent::CreateRenderer(_) => "CreateRenderer",
            RenderEvent::DestroyRenderer => "DestroyRenderer",
            RenderEvent::AttachView => "AttachView",
            RenderEvent::DetachView => "DetachView",
            RenderEvent::ClearScene => "ClearScene",
            RenderEvent::InitPasses(_) => "InitPasses",
            RenderEvent::CommitFrame(_) => "CommitFrame",
            RenderEvent::RenderFrame => "RenderFrame",
            RenderEvent::Resize(_) => "Resize",
            RenderEvent::ShutdownRequest => "ShutdownRequest",
        }
    }

    fn is_stop(&self) -> bool {
        matches!(self, RenderEvent::StopTask)
    }

    fn stop() -> Self {
        RenderEvent::StopTask
    }
}
