use crate::util::log;

/// Runs a task on a fixed number of scoped worker threads and waits for all of them.
///
/// Used for the parallel parts of pauses and cleanup. The gang owns no threads between
/// tasks.
pub struct WorkGang {
    name: &'static str,
    n_workers: usize,
}

impl WorkGang {
    pub fn new(name: &'static str, n_workers: usize) -> Self {
        assert!(n_workers > 0);
        Self { name, n_workers }
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Call `task(worker)` for every worker ordinal in parallel. Panics in a worker are
    /// propagated to the caller once all workers have finished.
    pub fn run_task<F>(&self, task: F)
    where
        F: Fn(usize) + Sync,
    {
        log::debug!("{}: running a task on {} workers", self.name, self.n_workers);
        if self.n_workers == 1 {
            task(0);
            return;
        }
        let task = &task;
        let result = crossbeam::scope(|s| {
            for worker in 0..self.n_workers {
                s.builder()
                    .name(format!("{} worker {}", self.name, worker))
                    .spawn(move |_| task(worker))
                    .unwrap_or_else(|e| panic!("Failed to spawn {} worker: {}", self.name, e));
            }
        });
        if let Err(e) = result {
            std::panic::resume_unwind(e);
        }
    }
}
