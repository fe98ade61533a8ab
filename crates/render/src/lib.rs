//! Frame-submission core of the engine.
//!
//! The application thread describes a frame declaratively through the
//! [`service::RenderBackendService`] recording API; a dedicated render task
//! consumes the description and talks to the GPU through the
//! [`backend::GpuBackend`] trait. Exactly two [`frame::Frame`]s exist per
//! service and are swapped at every commit barrier, so neither thread ever
//! observes the other's half of the double buffer.

pub mod backend;
pub mod cmdbuffer;
pub mod error;
pub mod events;
pub mod frame;
pub mod handler;
pub mod material;
pub mod mesh;
pub mod monitor;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::RenderError;
pub use service::{MatrixKind, RenderBackendService};
