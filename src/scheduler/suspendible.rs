//! This module contains `SuspendibleThreadSet`. Concurrent GC threads join it while they
//! touch the card table or remembered sets, and a pause synchronizes with it to make sure none
//! of them is in the middle of such work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::util::log;

/// The synchronized part of `SuspendibleThreadSet`.
#[derive(Default)]
struct SuspendibleSync {
    /// Threads currently between `join` and `leave`.
    joined: usize,
    /// Nesting depth of `synchronize`.
    suspend_count: usize,
}

pub struct SuspendibleThreadSet {
    sync: Mutex<SuspendibleSync>,
    /// Waited on by `synchronize` until no thread is joined, and by `join` until the set is
    /// resumed.
    changed: Condvar,
    /// Mirrors `suspend_count > 0` so that joined threads can poll it cheaply.
    should_yield: AtomicBool,
}

impl SuspendibleThreadSet {
    pub fn new() -> Self {
        Self {
            sync: Mutex::new(Default::default()),
            changed: Condvar::new(),
            should_yield: AtomicBool::new(false),
        }
    }

    /// Join the set. Blocks while the set is suspended.
    pub fn join(&self) {
        let mut sync = self.sync.lock().unwrap();
        while sync.suspend_count > 0 {
            sync = self.changed.wait(sync).unwrap();
        }
        sync.joined += 1;
    }

    pub fn leave(&self) {
        let mut sync = self.sync.lock().unwrap();
        debug_assert!(sync.joined > 0);
        sync.joined -= 1;
        if sync.joined == 0 && sync.suspend_count > 0 {
            self.changed.notify_all();
        }
    }

    /// Joined threads should poll this and `leave` soon when it is true.
    pub fn should_yield(&self) -> bool {
        self.should_yield.load(Ordering::Relaxed)
    }

    /// Suspend the set. Returns when no thread is joined. Calls nest: the set stays suspended
    /// until every `synchronize` has been matched by a `desynchronize`.
    pub fn synchronize(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.suspend_count += 1;
        self.should_yield.store(true, Ordering::Relaxed);
        while sync.joined > 0 {
            log::trace!("Waiting for {} suspendible threads to yield", sync.joined);
            sync = self.changed.wait(sync).unwrap();
        }
    }

    pub fn desynchronize(&self) {
        let mut sync = self.sync.lock().unwrap();
        debug_assert!(sync.suspend_count > 0, "desynchronize without synchronize");
        sync.suspend_count -= 1;
        if sync.suspend_count == 0 {
            self.should_yield.store(false, Ordering::Relaxed);
            self.changed.notify_all();
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.sync.lock().unwrap().suspend_count > 0
    }
}

impl Default for SuspendibleThreadSet {
    fn default() -> Self {
        Self::new()
    }
}
