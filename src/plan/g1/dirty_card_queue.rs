//! Thread-local dirty card logs and the set of completed buffers that refinement consumes.

use std::ops::Deref;
use std::sync::Mutex;

use super::ptr_queue::{PtrQueueSet, UNLIMITED_COMPLETED_QUEUE};
use crate::policy::region::CardIndex;
use crate::util::log;
use crate::util::SynchronizedCounter;

/// Something that consumes dirty cards.
pub trait CardTableEntryClosure {
    /// Process `card`. Returning false asks the caller to stop after this card, for example
    /// because a pause wants the thread to yield.
    fn do_card(&mut self, card: CardIndex, worker: usize) -> bool;
}

impl<F: FnMut(CardIndex, usize) -> bool> CardTableEntryClosure for F {
    fn do_card(&mut self, card: CardIndex, worker: usize) -> bool {
        self(card, worker)
    }
}

/// A thread-local log of dirtied cards.
#[derive(Default, Debug)]
pub struct DirtyCardQueue {
    buf: Vec<CardIndex>,
}

impl DirtyCardQueue {
    pub fn new() -> Self {
        Self { buf: vec![] }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Log `card`. When the buffer fills up it is either handed to the completed list or, in
    /// the red zone, refined right here with `cl`.
    pub fn enqueue(
        &mut self,
        card: CardIndex,
        qset: &DirtyCardQueueSet,
        cl: &mut dyn CardTableEntryClosure,
    ) {
        if !self.ensure_buffer(qset) {
            // No memory for a log buffer. Refine the card right away instead.
            cl.do_card(card, 0);
            return;
        }
        self.buf.push(card);
        if self.buf.len() >= qset.buffer_size() {
            let full = std::mem::take(&mut self.buf);
            if let Some(reuse) = qset.process_or_enqueue_complete_buffer(full, cl) {
                self.buf = reuse;
            }
        }
    }

    /// Log `card` without ever processing a full buffer.
    pub fn enqueue_no_processing(&mut self, card: CardIndex, qset: &DirtyCardQueueSet) {
        if self.buf.capacity() == 0 {
            self.buf = qset
                .allocate_buffer()
                .unwrap_or_else(|| Vec::with_capacity(qset.buffer_size()));
        }
        self.buf.push(card);
        if self.buf.len() >= qset.buffer_size() {
            qset.enqueue_complete_buffer(std::mem::take(&mut self.buf));
        }
    }

    /// Hand a partially filled buffer to the completed list.
    pub fn flush(&mut self, qset: &DirtyCardQueueSet) {
        if !self.buf.is_empty() {
            qset.enqueue_complete_buffer(std::mem::take(&mut self.buf));
        }
    }

    /// Drop the logged cards.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn ensure_buffer(&mut self, qset: &DirtyCardQueueSet) -> bool {
        if self.buf.capacity() == 0 {
            match qset.allocate_buffer() {
                Some(buf) => self.buf = buf,
                None => return false,
            }
        }
        true
    }
}

/// The global set of dirty card queues: completed buffers waiting for refinement, the
/// shared queue used by threads without a queue of their own, and the statistics.
pub struct DirtyCardQueueSet {
    base: PtrQueueSet<CardIndex>,
    shared_queue: Mutex<DirtyCardQueue>,
    /// Buffers refined by mutators in the red zone.
    processed_buffers_mut: SynchronizedCounter,
    /// Buffers refined by refinement threads.
    processed_buffers_rs_thread: SynchronizedCounter,
    /// Cards handed to a closure by this set.
    processed_cards: SynchronizedCounter,
}

impl Deref for DirtyCardQueueSet {
    type Target = PtrQueueSet<CardIndex>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DirtyCardQueueSet {
    pub fn new(
        buffer_size: usize,
        process_completed_threshold: usize,
        max_completed_queue: usize,
    ) -> Self {
        Self {
            base: PtrQueueSet::new(buffer_size, process_completed_threshold, max_completed_queue),
            shared_queue: Mutex::new(DirtyCardQueue::new()),
            processed_buffers_mut: SynchronizedCounter::new(0),
            processed_buffers_rs_thread: SynchronizedCounter::new(0),
            processed_cards: SynchronizedCounter::new(0),
        }
    }

    /// A set whose buffers are only ever processed explicitly.
    pub fn unbounded(buffer_size: usize) -> Self {
        Self::new(buffer_size, usize::MAX, UNLIMITED_COMPLETED_QUEUE)
    }

    /// Apply `cl` to the entries of `buf`. Returns true if the whole buffer was consumed.
    /// Otherwise the consumed prefix has been removed from `buf`.
    pub fn apply_closure_to_buffer(
        &self,
        cl: &mut dyn CardTableEntryClosure,
        buf: &mut Vec<CardIndex>,
        worker: usize,
    ) -> bool {
        for i in 0..buf.len() {
            if !cl.do_card(buf[i], worker) {
                self.processed_cards.add(i + 1);
                buf.drain(..=i);
                return buf.is_empty();
            }
        }
        self.processed_cards.add(buf.len());
        true
    }

    /// Called by a mutator with a full buffer. In the red zone the mutator refines the buffer
    /// itself and gets it back, empty, for reuse. Otherwise the buffer is enqueued.
    pub fn process_or_enqueue_complete_buffer(
        &self,
        mut buf: Vec<CardIndex>,
        cl: &mut dyn CardTableEntryClosure,
    ) -> Option<Vec<CardIndex>> {
        if self.is_over_max_completed() {
            log::trace!(
                "Mutator refines its own buffer: {} completed buffers",
                self.completed_buffers_num()
            );
            if self.apply_closure_to_buffer(cl, &mut buf, 0) {
                self.processed_buffers_mut.increment();
                buf.clear();
                return Some(buf);
            }
        }
        if buf.is_empty() {
            return Some(buf);
        }
        self.enqueue_complete_buffer(buf);
        None
    }

    /// Refine one completed buffer, unless there are no more than `stop_at` of them. Returns
    /// true if a whole buffer was processed. A buffer that `cl` gave up on halfway is put back
    /// on the completed list and false is returned.
    pub fn apply_closure_to_completed_buffer(
        &self,
        cl: &mut dyn CardTableEntryClosure,
        worker: usize,
        stop_at: usize,
        during_pause: bool,
    ) -> bool {
        let Some(mut buf) = self.get_completed_buffer(stop_at) else {
            return false;
        };
        if self.apply_closure_to_buffer(cl, &mut buf, worker) {
            if !during_pause {
                self.processed_buffers_rs_thread.increment();
            }
            self.deallocate_buffer(buf);
            true
        } else {
            if buf.is_empty() {
                self.deallocate_buffer(buf);
            } else {
                self.enqueue_complete_buffer(buf);
            }
            false
        }
    }

    /// Refine every completed buffer with `cl`. Used at pauses.
    pub fn apply_closure_to_all_completed_buffers(
        &self,
        cl: &mut dyn CardTableEntryClosure,
        worker: usize,
    ) {
        while let Some(mut buf) = self.get_completed_buffer(0) {
            let done = self.apply_closure_to_buffer(cl, &mut buf, worker);
            debug_assert!(done, "closures used at a pause never yield");
            self.deallocate_buffer(buf);
        }
    }

    /// Log a card on the shared queue.
    pub fn enqueue_shared(&self, card: CardIndex) {
        self.shared_queue
            .lock()
            .unwrap()
            .enqueue_no_processing(card, self);
    }

    /// Move the partial buffer of the shared queue to the completed list.
    pub fn concatenate_logs(&self) {
        self.shared_queue.lock().unwrap().flush(self);
    }

    /// Entries on the shared queue that are not on the completed list yet.
    pub fn shared_queue_len(&self) -> usize {
        self.shared_queue.lock().unwrap().len()
    }

    /// Drop all completed buffers and the contents of the shared queue.
    pub fn abandon_logs(&self) {
        self.clear();
        self.shared_queue.lock().unwrap().reset();
    }

    pub fn processed_buffers_mut(&self) -> usize {
        self.processed_buffers_mut.peek()
    }

    pub fn processed_buffers_rs_thread(&self) -> usize {
        self.processed_buffers_rs_thread.peek()
    }

    pub fn processed_cards(&self) -> usize {
        self.processed_cards.peek()
    }
}
