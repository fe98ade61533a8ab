use crate::handler::{EventHandler, TaskEvent};
use crate::queue::AsyncQueue;
use crate::worker::{WorkerState, WorkerThread};
use log::{debug, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task is already running")]
    AlreadyRunning,
    #[error("task is not running")]
    NotRunning,
    #[error("task has terminated and cannot be restarted")]
    Terminated,
    #[error("no event handler attached")]
    NoHandler,
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(#[from] io::Error),
}

/// A long-lived service task: one worker thread plus one job queue.
///
/// `send_event` is callable from any thread and never blocks. The worker
/// pulses the update event each time it drains the queue dry, which is what
/// `await_update` blocks on. Stopping is cooperative: a stop job is queued
/// behind all pending work, so every job sent before `stop` is dispatched
/// exactly once.
pub struct SystemTask<E: TaskEvent> {
    name: String,
    queue: Arc<AsyncQueue<E>>,
    worker: WorkerThread<E>,
    handler: Option<Box<dyn EventHandler<E>>>,
    send_after_stop_logged: AtomicBool,
}

impl<E: TaskEvent> SystemTask<E> {
    pub fn new(name: &str) -> Self {
        let queue = Arc::new(AsyncQueue::new());
        SystemTask {
            name: name.to_string(),
            worker: WorkerThread::new(&format!("{name}.thread"), Arc::clone(&queue)),
            queue,
            handler: None,
            send_after_stop_logged: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches the handler that will receive every job.
    /// Legal only while the task is not running.
    pub fn attach_handler(
        &mut self,
        handler: Box<dyn EventHandler<E>>,
    ) -> Result<(), TaskError> {
        if self.is_running() {
            return Err(TaskError::AlreadyRunning);
        }
        self.handler = Some(handler);
        Ok(())
    }

    /// Spawns the worker thread. Fails when already running or when no
    /// handler has been attached yet.
    pub fn start(&mut self) -> Result<(), TaskError> {
        if self.is_running() {
            return Err(TaskError::AlreadyRunning);
        }

        let handler = self.handler.take().ok_or(TaskError::NoHandler)?;
        self.worker.start(handler)
    }

    pub fn is_running(&self) -> bool {
        self.worker.state() == WorkerState::Running
    }

    /// Enqueues a job. After `stop` the job is dropped; the first such drop
    /// is logged, later ones are silent.
    pub fn send_event(&self, event: E) {
        let kind = event.kind();
        if self.queue.enqueue(event).is_err() {
            if !self.send_after_stop_logged.swap(true, Ordering::Relaxed) {
                warn!("{}: event {} sent after stop, dropped", self.name, kind);
            }
        }
    }

    /// Blocks the caller until the worker's next empty-queue transition.
    pub fn await_update(&self) {
        self.worker.update_event().await_one();
    }

    /// Blocks until every job sent so far has been dispatched and the
    /// worker is parked again. Stronger than [`SystemTask::await_update`],
    /// which may observe a pulse from an earlier drain cycle.
    pub fn await_quiescent(&self) {
        loop {
            self.await_update();
            if self.queue.is_empty() && !self.worker.is_busy() {
                break;
            }
        }
    }

    /// Advisory number of queued jobs.
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    /// Cooperative shutdown: enqueues the stop job, waits for the worker to
    /// drain and exit, then closes the queue for producers.
    pub fn stop(&mut self) -> Result<(), TaskError> {
        if !self.is_running() {
            return Err(TaskError::NotRunning);
        }

        debug!("{}: stopping", self.name);
        // The stop job lines up behind pending work; everything sent before
        // this point is still dispatched.
        let _ = self.queue.enqueue(E::stop());
        self.worker.await_stop();
        self.queue.cancel();
        Ok(())
    }
}

impl<E: TaskEvent> Drop for SystemTask<E> {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
