//! The concurrent mark thread.
//!
//! One background thread sequences a marking cycle:
//!
//! ```text
//! Idle -> InitialMark (STW) -> ConcurrentMark -> Remark (STW) -> Counting
//!      -> Cleanup (STW) -> BitmapClear -> Idle
//! ```
//!
//! Remark goes back to `ConcurrentMark` if the marker overflowed its mark stack. The
//! tracing itself is done by the binding's [`Marking`](crate::vm::Marking) implementation;
//! this module owns the phase order, the SATB activation, remembered set scrubbing and
//! the reclamation of old regions found empty.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use atomic::Atomic;
use bytemuck::NoUninit;
use enum_map::{Enum, EnumMap};
use strum::IntoEnumIterator;

use crate::policy::region::{RegionIndex, RegionState};
use crate::scheduler::WorkGang;
use crate::util::error::{G1Error, Result};
use crate::util::log;
use crate::util::options::Options;
use crate::vm::{LivenessMaps, MarkContext, VMBinding};
use crate::HeapCore;

#[repr(u8)]
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Debug,
    NoUninit,
    Enum,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::IntoStaticStr,
)]
pub enum MarkPhase {
    Idle,
    InitialMark,
    ConcurrentMark,
    Remark,
    Counting,
    Cleanup,
    BitmapClear,
}

impl MarkPhase {
    /// Phases run at a safepoint.
    pub fn is_pause(self) -> bool {
        matches!(self, MarkPhase::InitialMark | MarkPhase::Remark | MarkPhase::Cleanup)
    }
}

/// Counters of completed marking cycles, with a monitor for threads waiting on them.
#[derive(Default)]
struct CycleCounter {
    completed: Mutex<usize>,
    changed: Condvar,
}

pub struct ConcurrentMark {
    phase: Atomic<MarkPhase>,
    /// A cycle has been requested and not started yet.
    started: Mutex<bool>,
    started_cond: Condvar,
    in_progress: AtomicBool,
    /// Cleared at initial mark, set again once marking information is final or was
    /// abandoned.
    marking_complete: AtomicBool,
    aborted: AtomicBool,
    should_terminate: AtomicBool,
    /// Empty regions found at cleanup, waiting to be freed concurrently.
    cleanup_list: Mutex<Vec<RegionIndex>>,
    free_regions_coming: AtomicBool,
    full_collections: CycleCounter,
    restarts: AtomicUsize,
    aborts: AtomicUsize,
    regions_reclaimed: AtomicUsize,
    phase_times: Mutex<EnumMap<MarkPhase, Duration>>,
    max_mark_restarts: usize,
    rset_scrub: bool,
    n_workers: usize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConcurrentMark {
    pub fn new(options: &Options) -> Self {
        Self {
            phase: Atomic::new(MarkPhase::Idle),
            started: Mutex::new(false),
            started_cond: Condvar::new(),
            in_progress: AtomicBool::new(false),
            marking_complete: AtomicBool::new(true),
            aborted: AtomicBool::new(false),
            should_terminate: AtomicBool::new(false),
            cleanup_list: Mutex::new(vec![]),
            free_regions_coming: AtomicBool::new(false),
            full_collections: CycleCounter::default(),
            restarts: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            regions_reclaimed: AtomicUsize::new(0),
            phase_times: Mutex::new(EnumMap::default()),
            max_mark_restarts: options.max_mark_restarts,
            rset_scrub: options.rset_scrub,
            n_workers: options.threads.max(1),
            handle: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> MarkPhase {
        self.phase.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: MarkPhase) {
        log::debug!("Concurrent mark: {} -> {}", self.phase(), phase);
        self.phase.store(phase, Ordering::Release);
    }

    /// Is a marking cycle running? Readable from any thread without locking.
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn marking_complete(&self) -> bool {
        self.marking_complete.load(Ordering::Acquire)
    }

    pub fn free_regions_coming(&self) -> bool {
        self.free_regions_coming.load(Ordering::Acquire)
    }

    /// Ask for a marking cycle. Returns false if one is already requested or running.
    pub fn request_cycle(&self) -> bool {
        let mut started = self.started.lock().unwrap();
        if *started || self.in_progress() {
            return false;
        }
        *started = true;
        self.started_cond.notify_all();
        log::debug!("Concurrent mark cycle requested");
        true
    }

    /// Give up the current cycle. Remaining phases are skipped and the partial marking
    /// information is dropped.
    pub fn abort(&self) {
        if self.in_progress() {
            log::info!("Concurrent mark abort requested");
            self.aborted.store(true, Ordering::Release);
        }
    }

    pub fn has_aborted<VM: VMBinding>(&self, heap: &HeapCore<VM>) -> bool {
        self.aborted.load(Ordering::Acquire) || heap.vm().has_aborted()
    }

    /// Number of marking cycles run to the end, aborted ones included.
    pub fn full_collections_completed(&self) -> usize {
        *self.full_collections.completed.lock().unwrap()
    }

    /// Block until more than `count` cycles have completed. Returns the new count, or
    /// `None` if `timeout` elapsed first.
    pub fn wait_for_full_collections_completed(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Option<usize> {
        let completed = self.full_collections.completed.lock().unwrap();
        let (completed, result) = self
            .full_collections
            .changed
            .wait_timeout_while(completed, timeout, |c| *c <= count)
            .unwrap();
        (!result.timed_out() || *completed > count).then_some(*completed)
    }

    /// Times the remark restarted marking because of a mark stack overflow.
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::Relaxed)
    }

    /// Regions freed by cleanup so far.
    pub fn regions_reclaimed(&self) -> usize {
        self.regions_reclaimed.load(Ordering::Relaxed)
    }

    /// Time spent in `phase`, over all cycles.
    pub fn phase_time(&self, phase: MarkPhase) -> Duration {
        self.phase_times.lock().unwrap()[phase]
    }

    pub fn spawn_thread<VM: VMBinding>(&self, heap: &Arc<HeapCore<VM>>) -> Result<()> {
        let name = "G1 Main Concurrent Mark GC Thread".to_string();
        let h = heap.clone();
        let handle = heap
            .vm()
            .spawn_gc_thread(name.clone(), Box::new(move || run_mark_thread(&h)))
            .map_err(|source| G1Error::ThreadSpawn { name, source })?;
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Make the thread exit after the current cycle, which is aborted, and wait for it.
    pub fn stop(&self) {
        self.should_terminate.store(true, Ordering::Release);
        self.abort();
        {
            let _started = self.started.lock().unwrap();
            self.started_cond.notify_all();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("The concurrent mark thread panicked");
            }
        }
    }

    fn should_terminate(&self) -> bool {
        self.should_terminate.load(Ordering::Acquire)
    }

    /// Wait for a cycle to be requested. Returns false on termination.
    fn sleep_before_next_cycle(&self) -> bool {
        debug_assert!(!self.in_progress());
        let mut started = self.started.lock().unwrap();
        while !*started && !self.should_terminate() {
            started = self.started_cond.wait(started).unwrap();
        }
        if self.should_terminate() {
            return false;
        }
        *started = false;
        self.in_progress.store(true, Ordering::Release);
        true
    }

    fn record_phase_time(&self, phase: MarkPhase, start: Instant) {
        self.phase_times.lock().unwrap()[phase] += start.elapsed();
    }

    /// Enter `phase` and run `op` at a safepoint. The binding's pacing delay is honored
    /// first.
    fn pause<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        phase: MarkPhase,
        name: &'static str,
        op: &mut dyn FnMut(),
    ) {
        debug_assert!(phase.is_pause());
        let delay = heap.vm().mark_pause_delay(phase);
        if !delay.is_zero() {
            log::trace!("Delaying {} by {:?}", phase, delay);
            std::thread::sleep(delay);
        }
        self.set_phase(phase);
        let start = Instant::now();
        if let Err(e) = heap.vm().execute_at_safepoint(name, op) {
            crate::util::panic::fatal(format_args!("{}", e));
        }
        self.record_phase_time(phase, start);
    }

    fn concurrent_phase<VM: VMBinding>(
        &self,
        phase: MarkPhase,
        cx: &MarkContext,
        heap: &HeapCore<VM>,
        f: impl FnOnce(&VM, &MarkContext),
    ) {
        self.set_phase(phase);
        let start = Instant::now();
        f(heap.vm(), cx);
        self.record_phase_time(phase, start);
    }

    fn initial_mark<VM: VMBinding>(&self, heap: &HeapCore<VM>, cx: &MarkContext) {
        self.pause(heap, MarkPhase::InitialMark, "GC initial-mark", &mut || {
            self.aborted
                .store(self.should_terminate(), Ordering::Release);
            self.marking_complete.store(false, Ordering::Release);
            for region in heap.regions().iter().filter(|r| !r.is_free()) {
                region.note_start_of_marking();
            }
            heap.satb_queue_set().set_active_all_threads(true, false);
            heap.vm().checkpoint_roots_initial(cx);
        });
    }

    /// Trace and remark until remark no longer overflows. Returns false if the cycle was
    /// aborted, or overflowed more than `max_mark_restarts` times.
    fn mark_until_stable<VM: VMBinding>(&self, heap: &HeapCore<VM>, cx: &MarkContext) -> bool {
        let mut restarts = 0;
        loop {
            if self.has_aborted(heap) {
                return false;
            }
            self.concurrent_phase(MarkPhase::ConcurrentMark, cx, heap, |vm, cx| {
                vm.mark_from_roots(cx)
            });
            if self.has_aborted(heap) {
                return false;
            }
            let mut overflowed = false;
            self.pause(heap, MarkPhase::Remark, "GC remark", &mut || {
                heap.vm().checkpoint_roots_final(cx);
                overflowed = heap.vm().restart_for_overflow();
                if !overflowed {
                    heap.satb_queue_set().set_active_all_threads(false, true);
                }
            });
            if !overflowed {
                return true;
            }
            restarts += 1;
            self.restarts.fetch_add(1, Ordering::Relaxed);
            log::info!("Restarting concurrent marking because of mark stack overflow (restart #{})", restarts);
            if restarts > self.max_mark_restarts {
                log::warn!("Giving up marking after {} restarts", restarts - 1);
                self.aborted.store(true, Ordering::Release);
                return false;
            }
        }
    }

    /// Drop whatever the aborted cycle logged. Runs at a safepoint since SATB activation
    /// changes.
    fn abandon<VM: VMBinding>(&self, heap: &HeapCore<VM>) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
        let op: &mut dyn FnMut() = &mut || {
            let satb = heap.satb_queue_set();
            satb.abandon_partial_marking();
            if satb.is_active() {
                satb.set_active_all_threads(false, true);
            }
        };
        if let Err(e) = heap.vm().execute_at_safepoint("GC concurrent-mark-abort", op) {
            crate::util::panic::fatal(format_args!("{}", e));
        }
        self.marking_complete.store(true, Ordering::Release);
        log::info!("Concurrent mark cycle aborted");
    }

    fn cleanup<VM: VMBinding>(&self, heap: &HeapCore<VM>, cx: &MarkContext) {
        self.pause(heap, MarkPhase::Cleanup, "GC cleanup", &mut || {
            let Some(liveness) = heap.vm().cleanup(cx) else {
                self.marking_complete.store(true, Ordering::Release);
                return;
            };
            if self.rset_scrub {
                self.scrub(heap, &liveness);
            }
            let empty = self.find_empty_regions(heap, &liveness);
            if !empty.is_empty() {
                log::debug!("Cleanup found {} empty regions", empty.len());
                self.free_regions_coming.store(true, Ordering::Release);
                *self.cleanup_list.lock().unwrap() = empty;
            }
            self.marking_complete.store(true, Ordering::Release);
        });
    }

    fn scrub<VM: VMBinding>(&self, heap: &HeapCore<VM>, liveness: &LivenessMaps) {
        let claim_value = heap.regions().next_claim_value();
        let removed = AtomicUsize::new(0);
        heap.sts().synchronize();
        WorkGang::new("G1 Scrub", self.n_workers).run_task(|worker| {
            let n = heap.rem_set().scrub_par(
                heap,
                &liveness.region_bm,
                &liveness.card_bm,
                worker,
                self.n_workers,
                claim_value,
            );
            removed.fetch_add(n, Ordering::Relaxed);
        });
        heap.sts().desynchronize();
        log::debug!(
            "Scrubbed {} remembered set entries",
            removed.load(Ordering::Relaxed)
        );
    }

    /// Old and humongous regions that existed at initial mark and hold nothing live. A
    /// humongous continuation goes with its start region.
    fn find_empty_regions<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        liveness: &LivenessMaps,
    ) -> Vec<RegionIndex> {
        let mut empty = vec![];
        let mut humongous_dead = false;
        for region in heap.regions().iter() {
            let dead = !liveness.region_bm.is_set(region.index().as_usize())
                && !region.obj_allocated_since_next_marking(region.bottom());
            match region.state() {
                RegionState::Old => {
                    if dead && !region.in_collection_set() {
                        empty.push(region.index());
                    }
                }
                RegionState::HumongousStart => {
                    humongous_dead = dead && !region.in_collection_set();
                    if humongous_dead {
                        empty.push(region.index());
                    }
                }
                RegionState::HumongousCont => {
                    if humongous_dead {
                        empty.push(region.index());
                    }
                }
                _ => humongous_dead = false,
            }
        }
        empty
    }

    /// Free the regions found empty at cleanup. Refinement is suspended while their cards
    /// are cleared.
    fn complete_cleanup<VM: VMBinding>(&self, heap: &HeapCore<VM>, cx: &MarkContext) {
        let list = std::mem::take(&mut *self.cleanup_list.lock().unwrap());
        heap.sts().synchronize();
        for index in list.iter() {
            let region = heap.regions().get(*index);
            heap.card_table().clear_range(region.card_range());
            heap.regions().free_region(*index);
        }
        heap.sts().desynchronize();
        self.regions_reclaimed
            .fetch_add(list.len(), Ordering::Relaxed);
        log::debug!("Freed {} empty regions", list.len());
        heap.vm().complete_cleanup(cx);
        self.free_regions_coming.store(false, Ordering::Release);
    }

    fn increment_full_collections_completed(&self) {
        let mut completed = self.full_collections.completed.lock().unwrap();
        *completed += 1;
        self.full_collections.changed.notify_all();
    }

    fn run_cycle<VM: VMBinding>(&self, heap: &HeapCore<VM>) {
        let cx = MarkContext {
            regions: heap.regions(),
            satb: heap.satb_queue_set(),
            n_workers: self.n_workers,
        };
        log::info!("Concurrent mark cycle start");
        let start = Instant::now();

        self.initial_mark(heap, &cx);
        if self.mark_until_stable(heap, &cx) {
            let sts = heap.sts();
            sts.join();
            self.concurrent_phase(MarkPhase::Counting, &cx, heap, |vm, cx| {
                vm.calc_desired_regions(cx)
            });
            sts.leave();
        }
        if self.has_aborted(heap) {
            self.abandon(heap);
        } else {
            self.cleanup(heap, &cx);
        }
        if self.free_regions_coming() {
            self.complete_cleanup(heap, &cx);
        }

        let sts = heap.sts();
        sts.join();
        self.concurrent_phase(MarkPhase::BitmapClear, &cx, heap, |vm, cx| {
            vm.clear_next_bitmap(cx)
        });
        sts.leave();

        self.set_phase(MarkPhase::Idle);
        self.in_progress.store(false, Ordering::Release);
        self.increment_full_collections_completed();
        log::info!("Concurrent mark cycle end, {:?}", start.elapsed());
        for phase in MarkPhase::iter().filter(|p| *p != MarkPhase::Idle) {
            log::debug!("  {:<14} {:?} in total", phase, self.phase_time(phase));
        }
    }
}

fn run_mark_thread<VM: VMBinding>(heap: &HeapCore<VM>) {
    let cm = heap.concurrent_mark();
    while cm.sleep_before_next_cycle() {
        cm.run_cycle(heap);
    }
    log::debug!("Concurrent mark thread exits");
}
