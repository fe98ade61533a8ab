use std::sync::{Arc, Condvar, Mutex};

/// Auto-reset synchronisation event shared between two threads.
///
/// `signal` marks the event as pending and wakes one waiter. `await_one`
/// consumes the pending signal, parking the caller if none arrived yet. A
/// signal that fires before anyone waits stays latched until consumed, and
/// repeated signals collapse into one while latched, which is what a worker
/// pulsing "queue drained" needs: the application thread may start waiting
/// a moment later and must still observe exactly one pulse.
#[derive(Clone)]
pub struct ThreadEvent(Arc<Inner>);

struct Inner {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl ThreadEvent {
    pub fn new() -> Self {
        ThreadEvent(Arc::new(Inner {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
        }))
    }

    /// Marks the event as signalled and wakes a waiting thread.
    pub fn signal(&self) {
        let mut pending = self.0.pending.lock().unwrap();
        *pending = true;
        self.0.condvar.notify_one();
    }

    /// Blocks until a signal is latched, then consumes it.
    pub fn await_one(&self) {
        let mut pending = self.0.pending.lock().unwrap();
        while !*pending {
            pending = self.0.condvar.wait(pending).unwrap();
        }
        *pending = false;
    }

    /// Consumes a latched signal without blocking.
    /// Returns false when none was pending.
    pub fn try_consume(&self) -> bool {
        let mut pending = self.0.pending.lock().unwrap();
        let was_pending = *pending;
        *pending = false;
        was_pending
    }
}

impl Default for ThreadEvent {
    fn default() -> Self {
        ThreadEvent::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_before_wait_is_latched() {
        let event = ThreadEvent::new();
        event.signal();
        // Must return immediately, the signal was latched.
        event.await_one();
        assert!(!event.try_consume());
    }

    #[test]
    fn wakes_parked_thread() {
        let event = ThreadEvent::new();
        let waiter = event.clone();

        let join = thread::spawn(move || {
            waiter.await_one();
        });

        thread::sleep(Duration::from_millis(20));
        event.signal();
        join.join().unwrap();
    }

    #[test]
    fn signals_collapse_while_latched() {
        let event = ThreadEvent::new();
        event.signal();
        event.signal();

        assert!(event.try_consume());
        assert!(!event.try_consume());
    }
}
