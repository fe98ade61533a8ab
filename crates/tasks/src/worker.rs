use crate::handler::{EventHandler, TaskEvent};
use crate::queue::AsyncQueue;
use crate::task::TaskError;
use dusk_util::signal::ThreadEvent;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Default stack for worker threads. Advisory; the OS may round up.
pub const DEFAULT_STACK_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    New,
    Running,
    Terminated,
}

/// OS thread running a queue-drain loop.
///
/// The loop parks on the queue, drains everything that arrived, dispatches
/// each job to the handler and pulses the update event once the queue is
/// empty again. Observing the stop job ends the loop after the current
/// drain; the stop event is pulsed exactly once on the way out.
pub struct WorkerThread<E: TaskEvent> {
    name: String,
    stack_size: usize,
    queue: Arc<AsyncQueue<E>>,
    update_event: ThreadEvent,
    stop_event: ThreadEvent,
    // True while a drain cycle is dispatching jobs. Cleared before the
    // update pulse, so "not busy and queue empty" means all work so far
    // has completed.
    busy: Arc<AtomicBool>,
    state: WorkerState,
    join: Option<JoinHandle<()>>,
}

impl<E: TaskEvent> WorkerThread<E> {
    pub fn new(name: &str, queue: Arc<AsyncQueue<E>>) -> Self {
        WorkerThread {
            name: name.to_string(),
            stack_size: DEFAULT_STACK_SIZE,
            queue,
            update_event: ThreadEvent::new(),
            stop_event: ThreadEvent::new(),
            busy: Arc::new(AtomicBool::new(false)),
            state: WorkerState::New,
            join: None,
        }
    }

    pub fn set_stack_size(&mut self, bytes: usize) {
        self.stack_size = bytes;
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn update_event(&self) -> &ThreadEvent {
        &self.update_event
    }

    pub fn stop_event(&self) -> &ThreadEvent {
        &self.stop_event
    }

    /// True while the worker is inside a drain cycle.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Moves the handler onto a fresh OS thread and enters the drain loop.
    /// A terminated worker cannot be restarted.
    pub fn start(&mut self, handler: Box<dyn EventHandler<E>>) -> Result<(), TaskError> {
        match self.state {
            WorkerState::New => {}
            WorkerState::Running => return Err(TaskError::AlreadyRunning),
            WorkerState::Terminated => return Err(TaskError::Terminated),
        }

        let name = self.name.clone();
        let queue = Arc::clone(&self.queue);
        let update_event = self.update_event.clone();
        let stop_event = self.stop_event.clone();
        let busy = Arc::clone(&self.busy);

        let join = thread::Builder::new()
            .name(name.clone())
            .stack_size(self.stack_size)
            .spawn(move || {
                info!("Worker thread {} started", name);
                run_loop(&name, handler, &queue, &update_event, &stop_event, &busy);
                info!("Worker thread {} finished", name);
            })
            .map_err(TaskError::SpawnFailed)?;

        self.join = Some(join);
        self.state = WorkerState::Running;
        Ok(())
    }

    /// Blocks until the drain loop has exited, then joins the thread.
    pub fn await_stop(&mut self) {
        if self.state != WorkerState::Running {
            return;
        }

        self.stop_event.await_one();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Worker thread {} panicked", self.name);
            }
        }
        self.state = WorkerState::Terminated;
    }
}

fn run_loop<E: TaskEvent>(
    name: &str,
    mut handler: Box<dyn EventHandler<E>>,
    queue: &AsyncQueue<E>,
    update_event: &ThreadEvent,
    stop_event: &ThreadEvent,
    busy: &AtomicBool,
) {
    if let Err(err) = handler.on_attached() {
        error!("{}: handler attach failed: {}", name, err);
    }

    let mut running = true;
    while running {
        queue.await_nonempty();
        busy.store(true, Ordering::Release);

        while let Some(job) = queue.try_dequeue() {
            if job.is_stop() {
                debug!("{}: stop requested", name);
                running = false;
            }

            if let Err(err) = handler.on_event(job) {
                error!("{}: event dispatch failed: {}", name, err);
            }

            if !running {
                break;
            }
        }

        busy.store(false, Ordering::Release);
        update_event.signal();

        // Cancellation without a stop job also ends the loop, but only
        // after the backlog above has been drained.
        if queue.is_cancelled() && queue.is_empty() {
            running = false;
        }
    }

    handler.on_detached();
    stop_event.signal();
}
