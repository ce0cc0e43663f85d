use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lets a fixed number of parallel workers agree that there is no work left.
///
/// A worker that runs out of work offers termination. It either returns `true` once every
/// worker has offered, or `false` if `peek` reports work that it should go back and help with.
pub struct ParallelTaskTerminator {
    n_threads: usize,
    offered: AtomicUsize,
}

impl ParallelTaskTerminator {
    pub fn new(n_threads: usize) -> Self {
        assert!(n_threads > 0);
        Self {
            n_threads,
            offered: AtomicUsize::new(0),
        }
    }

    pub fn offer_termination<F: Fn() -> bool>(&self, peek: F) -> bool {
        self.offered.fetch_add(1, Ordering::SeqCst);
        let backoff = Backoff::new();
        loop {
            let offered = self.offered.load(Ordering::SeqCst);
            if offered == self.n_threads {
                return true;
            }
            if peek() {
                // Withdraw the offer, unless everybody else has offered in the meantime.
                if self
                    .offered
                    .compare_exchange(offered, offered - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return false;
                }
                continue;
            }
            backoff.snooze();
        }
    }

    pub fn reset(&self) {
        self.offered.store(0, Ordering::SeqCst);
    }
}
