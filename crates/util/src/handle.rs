use crate::counter::AtomicCounter;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

/// Control block shared by all handles observing one object.
///
/// `strong` counts owning handles and starts at one. `weak` counts observing
/// handles plus one collective reference held by the strong side, so the
/// block itself outlives every handle. The object is destroyed on the thread
/// that drops the last strong handle; the block is freed on the thread that
/// drops the last handle of either kind.
struct ControlBlock<T> {
    strong: AtomicCounter,
    weak: AtomicCounter,
    object: UnsafeCell<ManuallyDrop<T>>,
}

/// Reference-counted owning handle to a long-lived engine object.
///
/// Materials, textures and shaders are referenced both by scene data and by
/// the render thread's GPU mirrors; the handle keeps them alive until the
/// last side lets go.
pub struct SharedHandle<T> {
    block: NonNull<ControlBlock<T>>,
}

/// Non-owning observer of a [`SharedHandle`] target.
/// Used for parent back-references so scene graphs do not leak cycles.
pub struct WeakHandle<T> {
    block: NonNull<ControlBlock<T>>,
}

unsafe impl<T: Send + Sync> Send for SharedHandle<T> {}
unsafe impl<T: Send + Sync> Sync for SharedHandle<T> {}
unsafe impl<T: Send + Sync> Send for WeakHandle<T> {}
unsafe impl<T: Send + Sync> Sync for WeakHandle<T> {}

impl<T> SharedHandle<T> {
    pub fn new(object: T) -> Self {
        let block = Box::new(ControlBlock {
            strong: AtomicCounter::new(1),
            weak: AtomicCounter::new(1),
            object: UnsafeCell::new(ManuallyDrop::new(object)),
        });

        SharedHandle {
            block: NonNull::from(Box::leak(block)),
        }
    }

    fn block(&self) -> &ControlBlock<T> {
        unsafe { self.block.as_ref() }
    }

    /// Number of owning handles alive right now. Advisory under concurrency.
    pub fn strong_count(&self) -> isize {
        self.block().strong.get()
    }

    /// Number of weak observers alive right now. Advisory under concurrency.
    pub fn weak_count(&self) -> isize {
        self.block().weak.get() - 1
    }

    pub fn downgrade(&self) -> WeakHandle<T> {
        self.block().weak.inc();
        WeakHandle { block: self.block }
    }

    /// True when both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.block == other.block
    }
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        self.block().strong.inc();
        SharedHandle { block: self.block }
    }
}

impl<T> Deref for SharedHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.block().object.get() }
    }
}

impl<T> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        if self.block().strong.dec() != 0 {
            return;
        }

        // Pair with the releases of every earlier dec before running the
        // destructor on this thread.
        fence(Ordering::Acquire);
        unsafe {
            ManuallyDrop::drop(&mut *self.block().object.get());
        }

        if self.block().weak.dec() == 0 {
            fence(Ordering::Acquire);
            unsafe {
                drop(Box::from_raw(self.block.as_ptr()));
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedHandle").field(&**self).finish()
    }
}

impl<T> WeakHandle<T> {
    fn block(&self) -> &ControlBlock<T> {
        unsafe { self.block.as_ref() }
    }

    /// Recovers an owning handle, failing once the last strong handle is
    /// gone.
    pub fn upgrade(&self) -> Option<SharedHandle<T>> {
        if self.block().strong.inc_if_nonzero() {
            Some(SharedHandle { block: self.block })
        } else {
            None
        }
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        self.block().weak.inc();
        WeakHandle { block: self.block }
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        if self.block().weak.dec() == 0 {
            fence(Ordering::Acquire);
            unsafe {
                drop(Box::from_raw(self.block.as_ptr()));
            }
        }
    }
}
