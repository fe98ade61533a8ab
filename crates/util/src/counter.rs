use std::sync::atomic::{AtomicIsize, Ordering};

/// Wait-free counter used for reference counting shared engine objects.
///
/// `dec` pairs release with the acquire fence performed by the caller that
/// observes zero, so a destructor running on the decrementing thread sees
/// every write made to the object before the last handle was dropped.
#[derive(Debug)]
pub struct AtomicCounter(AtomicIsize);

impl AtomicCounter {
    pub const fn new(value: isize) -> Self {
        AtomicCounter(AtomicIsize::new(value))
    }

    /// Increments by one and returns the new value.
    #[inline]
    pub fn inc(&self) -> isize {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements by one and returns the new value so callers may branch
    /// on having reached zero.
    #[inline]
    pub fn dec(&self) -> isize {
        self.0.fetch_sub(1, Ordering::Release) - 1
    }

    /// Adds `n` and returns the new value.
    #[inline]
    pub fn add(&self, n: isize) -> isize {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Subtracts `n` and returns the new value.
    #[inline]
    pub fn sub(&self, n: isize) -> isize {
        self.0.fetch_sub(n, Ordering::Release) - n
    }

    #[inline]
    pub fn get(&self) -> isize {
        self.0.load(Ordering::Relaxed)
    }

    /// Increments only while the current value is non-zero.
    /// Returns false once the counter has hit zero. Used by weak handle
    /// upgrades, which must not resurrect a dead object.
    pub fn inc_if_nonzero(&self) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        AtomicCounter::new(0)
    }
}
