use std::error::Error;

/// Errors escaping a handler callback. The worker logs them and keeps
/// draining; a handler that wants richer reporting keeps its own channel.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// A job flowing through a task queue.
///
/// Concrete tasks define one tagged enum covering every event kind they
/// understand; the payload travels inside the variant, so dispatch is a
/// plain `match` on the receiving side.
pub trait TaskEvent: Send + 'static {
    /// Stable name of the event kind, used for logging only.
    fn kind(&self) -> &'static str;

    /// True for the cooperative stop job that ends the drain loop.
    fn is_stop(&self) -> bool;

    /// Constructs the cooperative stop job.
    fn stop() -> Self;
}

/// Polymorphic receiver attached to a worker thread.
///
/// All callbacks run on the worker thread. `on_event` receives every job in
/// queue order, including the stop job, so handlers can flush state before
/// the loop exits.
pub trait EventHandler<E: TaskEvent>: Send {
    fn on_attached(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_detached(&mut self) {}

    fn on_event(&mut self, event: E) -> Result<(), HandlerError>;
}
