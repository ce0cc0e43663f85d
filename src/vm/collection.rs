use crate::plan::g1::concurrent_mark::MarkPhase;
use crate::util::error::Result;
use std::thread::JoinHandle;
use std::time::Duration;

/// VM-specific methods for thread management and safepoints.
pub trait Collection {
    /// Stop all mutators, run `op`, and resume them. `name` identifies the operation in logs.
    ///
    /// An `Err` is fatal to the concurrent mark thread.
    fn execute_at_safepoint(&self, name: &'static str, op: &mut dyn FnMut()) -> Result<()>;

    /// Spawn a GC thread (a refinement thread or the concurrent mark thread). The thread must
    /// run `body` to completion.
    fn spawn_gc_thread(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(body)
    }

    /// How long the concurrent mark thread should wait before entering `phase`. Lets the
    /// binding keep marking pauses apart.
    fn mark_pause_delay(&self, _phase: MarkPhase) -> Duration {
        Duration::ZERO
    }
}
