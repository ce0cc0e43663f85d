use std::sync::atomic::{AtomicUsize, Ordering};

/// A statistics counter shared between threads.
#[derive(Default, Debug)]
pub struct SynchronizedCounter {
    count: AtomicUsize,
}

impl SynchronizedCounter {
    pub const fn new(value: usize) -> Self {
        Self {
            count: AtomicUsize::new(value),
        }
    }

    /// Reset to zero, returning the previous value.
    pub fn reset(&self) -> usize {
        self.count.swap(0, Ordering::Relaxed)
    }

    pub fn increment(&self) {
        self.add(1)
    }

    pub fn add(&self, n: usize) {
        debug_assert!(self.count.load(Ordering::Relaxed) <= usize::MAX - n);
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn peek(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}
