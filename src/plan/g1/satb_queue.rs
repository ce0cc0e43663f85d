//! SATB logs: references overwritten while concurrent marking is active.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::ptr_queue::{PtrQueueSet, UNLIMITED_COMPLETED_QUEUE};
use crate::util::log;
use crate::util::ObjectReference;

/// A thread-local log of references overwritten while marking is active.
///
/// The queue remembers which marking activation its entries belong to. Entries left over from
/// an earlier activation are discarded the next time the queue is used.
#[derive(Default, Debug)]
pub struct ObjPtrQueue {
    buf: Vec<ObjectReference>,
    activation: usize,
}

impl ObjPtrQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Log `object` if marking is active. When the buffer fills up it is filtered with
    /// `retain`, which keeps the objects the marker still needs to see, and enqueued if enough
    /// of it survives.
    pub fn enqueue<F>(&mut self, object: ObjectReference, qset: &SATBMarkQueueSet, retain: F)
    where
        F: Fn(ObjectReference) -> bool,
    {
        if !qset.is_active() {
            return;
        }
        self.sync_activation(qset);
        if self.buf.capacity() == 0 {
            self.buf = qset
                .allocate_buffer()
                .unwrap_or_else(|| Vec::with_capacity(qset.buffer_size()));
        }
        self.buf.push(object);
        if self.buf.len() >= qset.buffer_size() && qset.should_enqueue_buffer(&mut self.buf, retain)
        {
            qset.enqueue_complete_buffer(std::mem::take(&mut self.buf));
        }
    }

    /// Hand a partially filled buffer to the completed list.
    pub fn flush(&mut self, qset: &SATBMarkQueueSet) {
        self.sync_activation(qset);
        if !self.buf.is_empty() {
            qset.enqueue_complete_buffer(std::mem::take(&mut self.buf));
        }
    }

    /// Apply `cl` to the logged entries and drop them.
    pub fn apply_closure_and_empty(&mut self, cl: &mut dyn FnMut(ObjectReference)) {
        for object in self.buf.drain(..) {
            cl(object);
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn sync_activation(&mut self, qset: &SATBMarkQueueSet) {
        let activation = qset.activation();
        if self.activation != activation {
            self.buf.clear();
            self.activation = activation;
        }
    }
}

/// The global set of SATB queues.
pub struct SATBMarkQueueSet {
    base: PtrQueueSet<ObjectReference>,
    shared_queue: Mutex<ObjPtrQueue>,
    all_active: AtomicBool,
    /// Bumped every time marking is activated.
    activation: AtomicUsize,
    /// A filtered buffer is enqueued only if more than this percentage of it is retained.
    enqueueing_threshold_percent: usize,
}

impl Deref for SATBMarkQueueSet {
    type Target = PtrQueueSet<ObjectReference>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl SATBMarkQueueSet {
    pub fn new(
        buffer_size: usize,
        process_completed_threshold: usize,
        enqueueing_threshold_percent: usize,
    ) -> Self {
        Self {
            base: PtrQueueSet::new(
                buffer_size,
                process_completed_threshold,
                UNLIMITED_COMPLETED_QUEUE,
            ),
            shared_queue: Mutex::new(ObjPtrQueue::new()),
            all_active: AtomicBool::new(false),
            activation: AtomicUsize::new(0),
            enqueueing_threshold_percent,
        }
    }

    pub fn is_active(&self) -> bool {
        self.all_active.load(Ordering::Acquire)
    }

    fn activation(&self) -> usize {
        self.activation.load(Ordering::Acquire)
    }

    /// Activate or deactivate every SATB queue. Must be called at a safepoint. `expected` is
    /// the state the queues are supposed to be in.
    pub fn set_active_all_threads(&self, active: bool, expected: bool) {
        let was = self.all_active.swap(active, Ordering::AcqRel);
        debug_assert_eq!(was, expected, "SATB queues in an unexpected state");
        if active && !was {
            self.activation.fetch_add(1, Ordering::AcqRel);
        }
        log::debug!("SATB queues {}", if active { "activated" } else { "deactivated" });
    }

    /// Filter a full buffer in place and decide whether it should be enqueued. A buffer that is
    /// not enqueued keeps its retained entries and continues filling up.
    pub fn should_enqueue_buffer<F>(&self, buf: &mut Vec<ObjectReference>, retain: F) -> bool
    where
        F: Fn(ObjectReference) -> bool,
    {
        if self.enqueueing_threshold_percent == 0 {
            return true;
        }
        let all_entries = buf.len();
        buf.retain(|o| retain(*o));
        let retained = buf.len();
        if retained == all_entries {
            // Nothing to compact; the buffer has to go.
            return true;
        }
        retained * 100 / all_entries > self.enqueueing_threshold_percent
    }

    /// Log an object on the shared queue, used by threads without a queue of their own.
    pub fn enqueue_shared<F>(&self, object: ObjectReference, retain: F)
    where
        F: Fn(ObjectReference) -> bool,
    {
        self.shared_queue
            .lock()
            .unwrap()
            .enqueue(object, self, retain);
    }

    /// Apply `cl` to the entries of the oldest completed buffer. Returns false if there was
    /// none.
    pub fn apply_closure_to_completed_buffer(&self, cl: &mut dyn FnMut(ObjectReference)) -> bool {
        match self.get_completed_buffer(0) {
            Some(buf) => {
                for object in buf.iter() {
                    cl(*object);
                }
                self.deallocate_buffer(buf);
                true
            }
            None => {
                self.set_process_completed(false);
                false
            }
        }
    }

    /// Apply `cl` to the partial buffer of the shared queue and empty it. Thread-local
    /// queues must have been flushed by their owners.
    pub fn iterate_closure_shared(&self, cl: &mut dyn FnMut(ObjectReference)) {
        let mut shared = self.shared_queue.lock().unwrap();
        shared.sync_activation(self);
        shared.apply_closure_and_empty(cl);
    }

    /// Drop every logged entry. Partial buffers of thread-local queues are discarded the next
    /// time the queue is used.
    pub fn abandon_partial_marking(&self) {
        self.clear();
        self.shared_queue.lock().unwrap().reset();
        self.activation.fetch_add(1, Ordering::AcqRel);
    }
}
