//! Concurrent refinement threads and the zones that control them.
//!
//! The number of completed dirty card buffers decides who refines them:
//!
//! - below the green zone, nobody: the buffers are left for the next pause;
//! - between green and yellow, refinement threads are activated one at a time, every
//!   `threshold_step` buffers;
//! - between yellow and red, all refinement threads run;
//! - at red and above, mutators refine their own buffers as well.
//!
//! Thread 0 is woken through the monitor of the dirty card queue set, when enough buffers
//! have been completed. Each other thread is woken by its predecessor. The last thread also
//! wakes up periodically to flush the shared queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use super::dirty_card_queue::DirtyCardQueueSet;
use crate::policy::region::CardIndex;
use crate::util::error::{G1Error, Result};
use crate::util::log;
use crate::util::options::{Options, ZoneSetting};
use crate::vm::VMBinding;
use crate::HeapCore;

const GREEN_TO_YELLOW: usize = 3;
const GREEN_TO_RED: usize = 6;
const GREEN_ZONE_INCREASE: f64 = 1.1;
const GREEN_ZONE_DECREASE: f64 = 0.9;

/// Wakes a refinement thread other than thread 0.
#[derive(Default)]
struct RefineThreadMonitor {
    active: Mutex<bool>,
    wakeup: Condvar,
}

pub struct ConcurrentRefine {
    green_zone: AtomicUsize,
    yellow_zone: AtomicUsize,
    red_zone: AtomicUsize,
    thread_threshold_step: AtomicUsize,
    /// Whether the step is recomputed from the zones.
    ergonomic_step: bool,
    /// Threads with an id at or above this have been retired, or are not started yet.
    n_threads: AtomicUsize,
    /// One monitor for every thread id ever used. Kept when the pool shrinks.
    monitors: RwLock<Vec<Arc<RefineThreadMonitor>>>,
    /// Handles of the running threads, indexed by thread id.
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    should_terminate: AtomicBool,
    service_interval: Duration,
    use_adaptive: bool,
    update_rs_pause_goal: Duration,
}

impl ConcurrentRefine {
    pub fn new(options: &Options) -> Self {
        let green = options.green_zone.or_ergonomic(options.threads.max(1));
        let yellow = options
            .yellow_zone
            .or_ergonomic(green * GREEN_TO_YELLOW)
            .max(green);
        let red = options
            .red_zone
            .or_ergonomic(yellow * GREEN_TO_RED / GREEN_TO_YELLOW)
            .max(yellow);
        let n_threads = options.refinement_thread_count;
        let refine = Self {
            green_zone: AtomicUsize::new(green),
            yellow_zone: AtomicUsize::new(yellow),
            red_zone: AtomicUsize::new(red),
            thread_threshold_step: AtomicUsize::new(match options.refinement_threshold_step {
                ZoneSetting::Cards(n) => n,
                ZoneSetting::Ergonomic => 0,
            }),
            ergonomic_step: options.refinement_threshold_step.is_ergonomic(),
            n_threads: AtomicUsize::new(n_threads),
            monitors: RwLock::new((0..n_threads).map(|_| Default::default()).collect()),
            handles: Mutex::new(vec![]),
            started: AtomicBool::new(false),
            should_terminate: AtomicBool::new(false),
            service_interval: Duration::from_millis(options.refinement_service_interval_ms),
            use_adaptive: options.use_adaptive_refinement,
            update_rs_pause_goal: Duration::from_millis(options.update_rs_pause_goal_ms),
        };
        refine.update_threshold_step();
        log::info!(
            "Concurrent refinement: {} threads, zones green={} yellow={} red={}, step={}",
            n_threads,
            green,
            yellow,
            red,
            refine.thread_threshold_step()
        );
        refine
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads.load(Ordering::Acquire)
    }

    pub fn green_zone(&self) -> usize {
        self.green_zone.load(Ordering::Relaxed)
    }

    pub fn yellow_zone(&self) -> usize {
        self.yellow_zone.load(Ordering::Relaxed)
    }

    pub fn red_zone(&self) -> usize {
        self.red_zone.load(Ordering::Relaxed)
    }

    pub fn thread_threshold_step(&self) -> usize {
        self.thread_threshold_step.load(Ordering::Relaxed)
    }

    /// Set the green zone and pass the resulting thresholds on to `dcqs`.
    pub fn set_green_zone(&self, value: usize, dcqs: &DirtyCardQueueSet) {
        self.green_zone.store(value, Ordering::Relaxed);
        self.update_thresholds(dcqs);
    }

    /// Set the yellow zone and pass the resulting thresholds on to `dcqs`.
    pub fn set_yellow_zone(&self, value: usize, dcqs: &DirtyCardQueueSet) {
        self.yellow_zone.store(value, Ordering::Relaxed);
        self.update_thresholds(dcqs);
    }

    /// Set the red zone. From then on, mutators refine their own buffers once `dcqs` holds
    /// `value` completed buffers.
    pub fn set_red_zone(&self, value: usize, dcqs: &DirtyCardQueueSet) {
        self.red_zone.store(value, Ordering::Relaxed);
        self.update_thresholds(dcqs);
    }

    fn update_threshold_step(&self) {
        if self.ergonomic_step {
            let span = self.yellow_zone().saturating_sub(self.green_zone());
            self.thread_threshold_step
                .store(span / (self.n_threads() + 1), Ordering::Relaxed);
        }
    }

    /// Recompute the per-thread thresholds, and make `dcqs` wake thread 0 and stop mutators
    /// at the new zones.
    fn update_thresholds(&self, dcqs: &DirtyCardQueueSet) {
        self.update_threshold_step();
        dcqs.set_process_completed_threshold(self.activation_threshold(0));
        dcqs.set_max_completed_queue(self.red_zone());
        dcqs.notify_if_necessary();
    }

    /// Resize the pool to `n_threads` threads and recompute the thresholds for it. If the
    /// threads are running, new ones are started and retired ones are joined. Must not be
    /// called while refinement is suspended.
    pub fn reinitialize_threads<VM: VMBinding>(
        &self,
        heap: &Arc<HeapCore<VM>>,
        n_threads: usize,
    ) -> Result<()> {
        let dcqs = heap.dirty_card_queue_set();
        let old = {
            let mut monitors = self.monitors.write().unwrap();
            while monitors.len() < n_threads {
                monitors.push(Default::default());
            }
            let old = self.n_threads.swap(n_threads, Ordering::AcqRel);
            for monitor in monitors.iter().skip(n_threads.min(old)) {
                *monitor.active.lock().unwrap() = false;
            }
            old
        };
        self.update_thresholds(dcqs);
        log::info!(
            "Concurrent refinement: {} threads (was {}), step={}",
            n_threads,
            old,
            self.thread_threshold_step()
        );
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        // The last thread is the service thread now. Retired threads see their id is gone.
        self.notify_all_threads(dcqs);
        let retired = {
            let mut handles = self.handles.lock().unwrap();
            let keep = n_threads.min(handles.len());
            handles.split_off(keep)
        };
        for handle in retired {
            if handle.join().is_err() {
                log::error!("A refinement thread panicked");
            }
        }
        self.spawn_missing_threads(heap)
    }

    /// Completed buffers above which thread `id` is activated.
    pub fn activation_threshold(&self, id: usize) -> usize {
        (self.thread_threshold_step() * (id + 1) + self.green_zone()).min(self.yellow_zone())
    }

    /// Completed buffers at or below which thread `id` deactivates itself.
    pub fn deactivation_threshold(&self, id: usize) -> usize {
        self.activation_threshold(id)
            .saturating_sub(self.thread_threshold_step())
            .max(self.green_zone())
    }

    fn monitor(&self, id: usize) -> Arc<RefineThreadMonitor> {
        self.monitors.read().unwrap()[id].clone()
    }

    pub fn is_active(&self, id: usize, dcqs: &DirtyCardQueueSet) -> bool {
        if id == 0 {
            dcqs.process_completed_buffers()
        } else {
            *self.monitor(id).active.lock().unwrap()
        }
    }

    pub fn active_threads(&self, dcqs: &DirtyCardQueueSet) -> usize {
        (0..self.n_threads())
            .filter(|id| self.is_active(*id, dcqs))
            .count()
    }

    fn activate(&self, id: usize, dcqs: &DirtyCardQueueSet) {
        log::trace!("Activating refinement thread {}", id);
        if id == 0 {
            dcqs.set_process_completed(true);
        } else {
            let monitor = self.monitor(id);
            *monitor.active.lock().unwrap() = true;
            monitor.wakeup.notify_all();
        }
    }

    fn deactivate(&self, id: usize, dcqs: &DirtyCardQueueSet) {
        log::trace!("Deactivating refinement thread {}", id);
        if id == 0 {
            dcqs.set_process_completed(false);
        } else {
            *self.monitor(id).active.lock().unwrap() = false;
        }
    }

    fn is_service_thread(&self, id: usize) -> bool {
        id + 1 == self.n_threads()
    }

    /// Should thread `id` exit, because of shutdown or because the pool shrank?
    fn should_exit(&self, id: usize) -> bool {
        self.should_terminate() || id >= self.n_threads()
    }

    /// Block until thread `id` is activated. The service thread gives up after the service
    /// interval and returns false.
    fn wait_for_completed_buffers(&self, id: usize, dcqs: &DirtyCardQueueSet) -> bool {
        if id == 0 {
            loop {
                let service = self.is_service_thread(id);
                let timeout = service.then_some(self.service_interval);
                // A resize may make thread 0 the service thread, or stop it being one.
                let stop = || self.should_exit(id) || service != self.is_service_thread(id);
                let activated = dcqs.wait_for_process_completed(&stop, timeout);
                if self.should_exit(id) || service == self.is_service_thread(id) {
                    return activated;
                }
            }
        }
        let monitor = self.monitor(id);
        let mut active = monitor.active.lock().unwrap();
        while !*active && !self.should_exit(id) {
            if self.is_service_thread(id) {
                let (guard, result) = monitor
                    .wakeup
                    .wait_timeout(active, self.service_interval)
                    .unwrap();
                active = guard;
                if result.timed_out() {
                    return *active || self.should_exit(id);
                }
            } else {
                active = monitor.wakeup.wait(active).unwrap();
            }
        }
        true
    }

    fn notify_all_threads(&self, dcqs: &DirtyCardQueueSet) {
        dcqs.notify_all();
        for monitor in self.monitors.read().unwrap().iter() {
            let _active = monitor.active.lock().unwrap();
            monitor.wakeup.notify_all();
        }
    }

    pub fn should_terminate(&self) -> bool {
        self.should_terminate.load(Ordering::Relaxed)
    }

    /// Start the refinement threads.
    pub fn spawn_threads<VM: VMBinding>(&self, heap: &Arc<HeapCore<VM>>) -> Result<()> {
        self.started.store(true, Ordering::Release);
        self.spawn_missing_threads(heap)
    }

    /// Start a thread for every id below `n_threads` that has none. If a thread cannot be
    /// started, the pool is left at the threads that are running.
    fn spawn_missing_threads<VM: VMBinding>(&self, heap: &Arc<HeapCore<VM>>) -> Result<()> {
        let mut handles = self.handles.lock().unwrap();
        for id in handles.len()..self.n_threads() {
            let name = format!("G1 Refine#{}", id);
            let h = heap.clone();
            match heap
                .vm()
                .spawn_gc_thread(name.clone(), Box::new(move || run_refine_thread(&h, id)))
            {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    self.n_threads.store(handles.len(), Ordering::Release);
                    self.update_thresholds(heap.dirty_card_queue_set());
                    return Err(G1Error::ThreadSpawn { name, source });
                }
            }
        }
        Ok(())
    }

    /// Ask the refinement threads to exit and wait for them. Must not be called while
    /// refinement is suspended.
    pub fn stop(&self, dcqs: &DirtyCardQueueSet) {
        self.should_terminate.store(true, Ordering::Relaxed);
        self.notify_all_threads(dcqs);
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            if handle.join().is_err() {
                log::error!("A refinement thread panicked");
            }
        }
    }

    /// Adapt the zones to the last pause, which spent `update_rs_time` refining
    /// `processed_buffers` completed buffers.
    pub fn adjust(&self, dcqs: &DirtyCardQueueSet, update_rs_time: Duration, processed_buffers: usize) {
        if self.use_adaptive {
            let green = self.green_zone();
            let mut g = green as f64;
            if update_rs_time > self.update_rs_pause_goal {
                // May drop to zero, leaving all refinement to mutators.
                g *= GREEN_ZONE_DECREASE;
            } else if update_rs_time < self.update_rs_pause_goal && processed_buffers > green {
                g = (g * GREEN_ZONE_INCREASE).max(g + 1.0);
            }
            let g = g as usize;
            self.green_zone.store(g, Ordering::Relaxed);
            self.yellow_zone.store(g * GREEN_TO_YELLOW, Ordering::Relaxed);
            self.red_zone.store(g * GREEN_TO_RED, Ordering::Relaxed);
            self.update_threshold_step();

            let delta = (g / 2).max(1);
            dcqs.set_process_completed_threshold((g + delta).min(self.yellow_zone()));
            dcqs.set_max_completed_queue(self.red_zone());
            log::debug!(
                "Refinement zones adjusted: green={} yellow={} red={} (updateRS {:?}, {} buffers)",
                g,
                self.yellow_zone(),
                self.red_zone(),
                update_rs_time,
                processed_buffers
            );
        }

        let curr_queue_size = dcqs.completed_buffers_num();
        if curr_queue_size >= self.yellow_zone() {
            dcqs.set_completed_queue_padding(curr_queue_size);
        } else {
            dcqs.set_completed_queue_padding(0);
        }
        dcqs.notify_if_necessary();
    }
}

fn run_refine_thread<VM: VMBinding>(heap: &HeapCore<VM>, id: usize) {
    let refine = heap.refine();
    let dcqs = heap.dirty_card_queue_set();
    let sts = heap.sts();
    log::debug!("Refinement thread {} started", id);

    while !refine.should_exit(id) {
        if !refine.wait_for_completed_buffers(id, dcqs) {
            // Nothing to do for a whole service interval.
            if dcqs.shared_queue_len() > 0 {
                dcqs.concatenate_logs();
                dcqs.notify_if_necessary();
            }
            continue;
        }
        if refine.should_exit(id) {
            break;
        }

        loop {
            let n = dcqs.completed_buffers_num();
            // Once the backlog left by a pause is down to the yellow zone, mutators stop
            // getting extra slack.
            if dcqs.completed_queue_padding() > 0 && n <= refine.yellow_zone() {
                dcqs.set_completed_queue_padding(0);
            }
            if id > 0 && n <= refine.deactivation_threshold(id) {
                break;
            }
            let next = id + 1;
            if next < refine.n_threads()
                && !refine.is_active(next, dcqs)
                && n > refine.activation_threshold(next)
            {
                refine.activate(next, dcqs);
            }

            sts.join();
            let mut refine_card = |card: CardIndex, worker: usize| {
                heap.rem_set().refine_card(heap, card, worker, false);
                !sts.should_yield()
            };
            let processed =
                dcqs.apply_closure_to_completed_buffer(&mut refine_card, id, refine.green_zone(), false);
            sts.leave();
            if !processed || refine.should_exit(id) {
                break;
            }
        }
        if refine.is_active(id, dcqs) {
            refine.deactivate(id, dcqs);
        }
    }
    log::debug!("Refinement thread {} exits", id);
}
