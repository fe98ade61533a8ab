use crate::backend::GpuError;
use crate::mesh::MeshId;
use dusk_tasks::TaskError;
use thiserror::Error;

/// Errors produced by the frame-building API and the render thread.
///
/// Building-side kinds are returned to the caller and logged; the offending
/// call is a no-op and the submit frame stays coherent. Render-thread kinds
/// are recorded on the handler and surface as a failed
/// `request_next_frame`.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no active pass, call begin_pass first")]
    NoActivePass,
    #[error("no active batch, call begin_render_batch first")]
    NoActiveBatch,
    #[error("pass recording is already active")]
    PassAlreadyActive,
    #[error("mesh array is empty")]
    EmptyMeshArray,
    #[error("no GPU mirror for mesh {0:?}")]
    MeshNotFound(MeshId),
    #[error("render service is not running")]
    NotRunning,
    #[error("render thread reported a failure")]
    RenderThreadFailed,
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Task(#[from] TaskError),
}
