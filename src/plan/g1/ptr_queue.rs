//! Buffers of pointer-sized entries, filled by one thread and handed as a whole to a shared
//! list of completed buffers.
//!
//! [`PtrQueueSet`] is the shared half: the completed buffer list, its monitor and a free list
//! of empty buffers. The per-thread half lives in the dirty card and SATB queue modules,
//! because the two differ in what happens when a buffer fills up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::util::log;

/// `max_completed_queue` value meaning that mutators never process buffers themselves.
pub const UNLIMITED_COMPLETED_QUEUE: usize = usize::MAX;

/// Empty buffers kept for reuse, at most.
const MAX_FREE_BUFFERS: usize = 64;

pub struct PtrQueueSet<T> {
    buffer_size: usize,
    completed: Mutex<VecDeque<Vec<T>>>,
    /// Waited on by the thread that processes completed buffers. Notified when
    /// `process_completed` becomes true, and on shutdown.
    cbl_monitor: Condvar,
    /// Length of `completed`, readable without the lock.
    n_completed: AtomicUsize,
    /// Set when the completed list reached `process_completed_threshold` and somebody should
    /// process it.
    process_completed: AtomicBool,
    process_completed_threshold: AtomicUsize,
    max_completed_queue: AtomicUsize,
    completed_queue_padding: AtomicUsize,
    free_list: Mutex<Vec<Vec<T>>>,
}

impl<T> PtrQueueSet<T> {
    pub fn new(
        buffer_size: usize,
        process_completed_threshold: usize,
        max_completed_queue: usize,
    ) -> Self {
        assert!(buffer_size > 0);
        Self {
            buffer_size,
            completed: Mutex::new(VecDeque::new()),
            cbl_monitor: Condvar::new(),
            n_completed: AtomicUsize::new(0),
            process_completed: AtomicBool::new(false),
            process_completed_threshold: AtomicUsize::new(process_completed_threshold),
            max_completed_queue: AtomicUsize::new(max_completed_queue),
            completed_queue_padding: AtomicUsize::new(0),
            free_list: Mutex::new(vec![]),
        }
    }

    /// Number of entries in a full buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Get an empty buffer with room for `buffer_size` entries. Returns `None` if the memory
    /// cannot be allocated.
    pub fn allocate_buffer(&self) -> Option<Vec<T>> {
        if let Some(buf) = self.free_list.lock().unwrap().pop() {
            return Some(buf);
        }
        let mut buf = Vec::new();
        match buf.try_reserve_exact(self.buffer_size) {
            Ok(()) => Some(buf),
            Err(e) => {
                log::warn!("Failed to allocate a queue buffer: {}", e);
                None
            }
        }
    }

    /// Return a buffer whose entries have been consumed.
    pub fn deallocate_buffer(&self, mut buf: Vec<T>) {
        buf.clear();
        if buf.capacity() < self.buffer_size {
            return;
        }
        let mut free = self.free_list.lock().unwrap();
        if free.len() < MAX_FREE_BUFFERS {
            free.push(buf);
        }
    }

    /// Append a buffer to the completed list. Partially filled buffers are fine.
    pub fn enqueue_complete_buffer(&self, buf: Vec<T>) {
        debug_assert!(!buf.is_empty());
        let mut completed = self.completed.lock().unwrap();
        completed.push_back(buf);
        let n = self.n_completed.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.process_completed.load(Ordering::Relaxed)
            && n >= self.process_completed_threshold.load(Ordering::Relaxed)
        {
            self.process_completed.store(true, Ordering::Relaxed);
            self.cbl_monitor.notify_all();
        }
    }

    /// Take the oldest completed buffer, unless there are no more than `stop_at` of them.
    pub fn get_completed_buffer(&self, stop_at: usize) -> Option<Vec<T>> {
        let mut completed = self.completed.lock().unwrap();
        if completed.len() <= stop_at {
            return None;
        }
        let buf = completed.pop_front();
        if buf.is_some() {
            self.n_completed.fetch_sub(1, Ordering::Relaxed);
        }
        buf
    }

    pub fn completed_buffers_num(&self) -> usize {
        self.n_completed.load(Ordering::Relaxed)
    }

    /// Entries held by completed buffers.
    pub fn completed_entries_num(&self) -> usize {
        self.completed.lock().unwrap().iter().map(Vec::len).sum()
    }

    pub fn process_completed_buffers(&self) -> bool {
        self.process_completed.load(Ordering::Relaxed)
    }

    pub fn set_process_completed(&self, value: bool) {
        let _completed = self.completed.lock().unwrap();
        self.process_completed.store(value, Ordering::Relaxed);
        if value {
            self.cbl_monitor.notify_all();
        }
    }

    pub fn process_completed_threshold(&self) -> usize {
        self.process_completed_threshold.load(Ordering::Relaxed)
    }

    pub fn set_process_completed_threshold(&self, value: usize) {
        self.process_completed_threshold
            .store(value, Ordering::Relaxed);
    }

    pub fn max_completed_queue(&self) -> usize {
        self.max_completed_queue.load(Ordering::Relaxed)
    }

    pub fn set_max_completed_queue(&self, value: usize) {
        self.max_completed_queue.store(value, Ordering::Relaxed);
    }

    pub fn completed_queue_padding(&self) -> usize {
        self.completed_queue_padding.load(Ordering::Relaxed)
    }

    pub fn set_completed_queue_padding(&self, value: usize) {
        self.completed_queue_padding
            .store(value, Ordering::Relaxed);
    }

    /// Is the completed list at or past the point where mutators must process their own
    /// buffers?
    pub fn is_over_max_completed(&self) -> bool {
        let max = self.max_completed_queue();
        max == 0
            || (max != UNLIMITED_COMPLETED_QUEUE
                && self.completed_buffers_num()
                    >= max.saturating_add(self.completed_queue_padding()))
    }

    /// Ask for processing if the completed list is over the threshold.
    pub fn notify_if_necessary(&self) {
        let completed = self.completed.lock().unwrap();
        if completed.len() >= self.process_completed_threshold() || self.max_completed_queue() == 0
        {
            self.process_completed.store(true, Ordering::Relaxed);
            self.cbl_monitor.notify_all();
        }
    }

    /// Block until `process_completed` is set or `stop` returns true. With a `timeout`,
    /// returns false if it elapsed first. Whoever makes `stop` true must call
    /// [`Self::notify_all`].
    pub fn wait_for_process_completed(
        &self,
        stop: &dyn Fn() -> bool,
        timeout: Option<Duration>,
    ) -> bool {
        let mut completed = self.completed.lock().unwrap();
        while !self.process_completed.load(Ordering::Relaxed) && !stop() {
            match timeout {
                Some(timeout) => {
                    let (guard, result) = self.cbl_monitor.wait_timeout(completed, timeout).unwrap();
                    completed = guard;
                    if result.timed_out() {
                        return self.process_completed.load(Ordering::Relaxed) || stop();
                    }
                }
                None => completed = self.cbl_monitor.wait(completed).unwrap(),
            }
        }
        true
    }

    /// Wake every thread blocked in [`Self::wait_for_process_completed`].
    pub fn notify_all(&self) {
        let _completed = self.completed.lock().unwrap();
        self.cbl_monitor.notify_all();
    }

    /// Move all completed buffers of `other` to the end of this list.
    pub fn merge_bufferlists(&self, other: &PtrQueueSet<T>) {
        let mut taken = other.take_completed_buffers();
        if taken.is_empty() {
            return;
        }
        {
            let mut completed = self.completed.lock().unwrap();
            self.n_completed.fetch_add(taken.len(), Ordering::Relaxed);
            completed.append(&mut taken);
        }
        self.notify_if_necessary();
    }

    /// Take the whole completed list.
    pub fn take_completed_buffers(&self) -> VecDeque<Vec<T>> {
        let mut completed = self.completed.lock().unwrap();
        self.n_completed.store(0, Ordering::Relaxed);
        std::mem::take(&mut *completed)
    }

    /// Drop every completed buffer.
    pub fn clear(&self) {
        for buf in self.take_completed_buffers() {
            self.deallocate_buffer(buf);
        }
    }
}
