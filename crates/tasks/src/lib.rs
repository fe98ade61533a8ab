//! Single-consumer worker tasks driven by typed event queues.
//!
//! A [`task::SystemTask`] owns one worker thread and one job queue. Senders
//! on any thread enqueue events; the worker drains the queue in FIFO order
//! and dispatches each job to the attached [`handler::EventHandler`]. The
//! worker pulses an update event every time the queue runs dry, which is the
//! per-frame barrier the render service blocks on.

pub mod handler;
pub mod queue;
pub mod task;
pub mod worker;

pub use handler::{EventHandler, HandlerError, TaskEvent};
pub use queue::{AsyncQueue, QueueError};
pub use task::{SystemTask, TaskError};
