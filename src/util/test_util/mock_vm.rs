//! A small in-memory VM for tests.
//!
//! The "heap" is a map from slot addresses to the references they hold. An object is
//! [`OBJECT_BYTES`] long, starts at its reference, and owns the slots inside it. Marking
//! is a plain transitive closure over that map.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::plan::g1::G1Mutator;
use crate::policy::region::{CardIndex, Region, RegionIndex, RegionState};
use crate::scheduler::WorkGang;
use crate::util::error::Result;
use crate::util::options::Options;
use crate::util::{Address, BitMap, ObjectReference};
use crate::vm::{CardScan, Collection, LivenessMaps, MarkContext, Marking, ObjectModel};
use crate::HeapCore;

/// Size of every mock object.
pub const OBJECT_BYTES: usize = 32;

/// Where mock heaps start. Region aligned for any region size we use.
pub const HEAP_START: Address = Address::from_usize(0x1_0000_0000);

#[derive(Default)]
pub struct MockVM {
    slots: Mutex<BTreeMap<Address, ObjectReference>>,
    /// Ranges where `scan_card` finds an object it cannot parse yet.
    unparsable: Mutex<Vec<Range<Address>>>,
    roots: Mutex<Vec<ObjectReference>>,
    marked: Mutex<HashSet<ObjectReference>>,
    /// Remarks that still have to overflow.
    overflows: AtomicUsize,
    restart: AtomicBool,
    abort: AtomicBool,
    /// Whether cleanup returns liveness maps.
    liveness: AtomicBool,
    /// Names of safepoint operations and marking calls, in order.
    events: Mutex<Vec<String>>,
    /// Runs once, at the start of the next `scan_card`.
    scan_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MockVM {
    pub fn new() -> Self {
        Self {
            liveness: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Write `value` into `slot`, without any barrier.
    pub fn store(&self, slot: Address, value: ObjectReference) {
        self.slots.lock().unwrap().insert(slot, value);
    }

    pub fn load(&self, slot: Address) -> ObjectReference {
        self.slots
            .lock()
            .unwrap()
            .get(&slot)
            .copied()
            .unwrap_or(ObjectReference::NULL)
    }

    pub fn add_unparsable(&self, range: Range<Address>) {
        self.unparsable.lock().unwrap().push(range);
    }

    pub fn clear_unparsable(&self) {
        self.unparsable.lock().unwrap().clear();
    }

    pub fn add_root(&self, object: ObjectReference) {
        self.roots.lock().unwrap().push(object);
    }

    pub fn mark(&self, object: ObjectReference) {
        self.marked.lock().unwrap().insert(object);
    }

    pub fn marked_objects(&self) -> usize {
        self.marked.lock().unwrap().len()
    }

    /// Make the next `n` remarks overflow.
    pub fn set_overflows(&self, n: usize) {
        self.overflows.store(n, Ordering::SeqCst);
    }

    pub fn set_aborted(&self, aborted: bool) {
        self.abort.store(aborted, Ordering::SeqCst);
    }

    pub fn set_liveness(&self, enabled: bool) {
        self.liveness.store(enabled, Ordering::SeqCst);
    }

    /// Run `hook` at the start of the next card scan, as if another thread acted while the
    /// card was being refined.
    pub fn on_next_scan(&self, hook: impl FnOnce() + Send + 'static) {
        *self.scan_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    /// The references held by `object`.
    fn children(&self, object: ObjectReference) -> Vec<ObjectReference> {
        let start = object.to_raw_address();
        self.slots
            .lock()
            .unwrap()
            .range(start..start + OBJECT_BYTES)
            .map(|(_, v)| *v)
            .filter(|v| !v.is_null())
            .collect()
    }

    /// Mark everything reachable from `pending`.
    fn trace(&self, mut pending: Vec<ObjectReference>) {
        while let Some(object) = pending.pop() {
            if self.marked.lock().unwrap().insert(object) {
                pending.extend(self.children(object));
            }
        }
    }

    fn drain_satb(&self, cx: &MarkContext, include_shared: bool) {
        let mut grey = vec![];
        while cx.satb.apply_closure_to_completed_buffer(&mut |o| grey.push(o)) {}
        if include_shared {
            cx.satb.iterate_closure_shared(&mut |o| grey.push(o));
        }
        self.trace(grey);
    }
}

impl ObjectModel for MockVM {
    fn scan_card(
        &self,
        range: Range<Address>,
        visitor: &mut dyn FnMut(Address, ObjectReference),
    ) -> CardScan {
        let hook = self.scan_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let stop = self
            .unparsable
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.start < range.end && u.end > range.start)
            .map(|u| u.start.max(range.start))
            .min();
        let end = stop.unwrap_or(range.end);
        let slots: Vec<(Address, ObjectReference)> = self
            .slots
            .lock()
            .unwrap()
            .range(range.start..end)
            .map(|(s, v)| (*s, *v))
            .collect();
        for (slot, value) in slots {
            visitor(slot, value);
        }
        match stop {
            Some(stop) => CardScan::Unparsable { stop },
            None => CardScan::Complete,
        }
    }
}

impl Marking for MockVM {
    fn is_object_live(&self, object: ObjectReference) -> bool {
        self.marked.lock().unwrap().contains(&object)
    }

    fn checkpoint_roots_initial(&self, _cx: &MarkContext) {
        self.record("checkpoint_roots_initial");
        self.marked.lock().unwrap().clear();
        let roots = self.roots.lock().unwrap().clone();
        self.marked.lock().unwrap().extend(roots);
    }

    fn mark_from_roots(&self, cx: &MarkContext) {
        self.record("mark_from_roots");
        let marked: Vec<ObjectReference> = self.marked.lock().unwrap().iter().copied().collect();
        let mut pending = vec![];
        for object in marked {
            pending.extend(self.children(object));
        }
        self.trace(pending);
        self.drain_satb(cx, false);
    }

    fn checkpoint_roots_final(&self, cx: &MarkContext) {
        self.record("checkpoint_roots_final");
        self.drain_satb(cx, true);
        let overflow = self
            .overflows
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.restart.store(overflow, Ordering::SeqCst);
    }

    fn restart_for_overflow(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    fn has_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn calc_desired_regions(&self, _cx: &MarkContext) {
        self.record("calc_desired_regions");
    }

    fn cleanup(&self, cx: &MarkContext) -> Option<LivenessMaps> {
        self.record("cleanup");
        if !self.liveness.load(Ordering::SeqCst) {
            return None;
        }
        let regions = cx.regions;
        let region_bm = BitMap::new(regions.num_regions());
        let card_bm = BitMap::new(regions.max_card_count_for_heap());
        let log_card_size = regions.log_card_size();
        for object in self.marked.lock().unwrap().iter() {
            let addr = object.to_raw_address();
            if let Some(region) = regions.region_containing(addr) {
                region_bm.set(region.index().as_usize());
                let first = (addr - regions.heap_start()) >> log_card_size;
                let last = (addr + (OBJECT_BYTES - 1) - regions.heap_start()) >> log_card_size;
                for card in first..=last.min(card_bm.len() - 1) {
                    card_bm.set(card);
                }
            }
        }
        Some(LivenessMaps { region_bm, card_bm })
    }

    fn complete_cleanup(&self, _cx: &MarkContext) {
        self.record("complete_cleanup");
    }

    fn clear_next_bitmap(&self, _cx: &MarkContext) {
        self.record("clear_next_bitmap");
    }
}

impl Collection for MockVM {
    /// Mutators in tests synchronize with pauses themselves, so the operation runs inline.
    fn execute_at_safepoint(&self, name: &'static str, op: &mut dyn FnMut()) -> Result<()> {
        self.record(name);
        op();
        Ok(())
    }
}

/// Options for a small heap: 1MB regions, 512 byte cards, few workers, no background
/// threads unless a test asks for them.
pub fn test_options() -> Options {
    let mut options = Options::without_env();
    options.threads = 2;
    options.refinement_thread_count = 0;
    options.update_buffer_size = 4;
    options.satb_buffer_size = 4;
    options
}

/// A heap of `regions` regions at [`HEAP_START`].
pub fn mock_heap(options: Options, regions: usize) -> Arc<HeapCore<MockVM>> {
    let bytes = regions * options.region_size;
    HeapCore::new(MockVM::new(), options, HEAP_START, bytes).unwrap()
}

/// Bump-allocate an object in `region`.
pub fn alloc_object(region: &Region) -> ObjectReference {
    let addr = region.allocate(OBJECT_BYTES).unwrap();
    ObjectReference::from_raw_address(addr)
}

/// The `n`th object slot of `region`.
pub fn object_at(region: &Region, n: usize) -> ObjectReference {
    ObjectReference::from_raw_address(region.bottom() + n * OBJECT_BYTES)
}

/// Take `n` regions from the free list as old regions, allocated up to their end.
pub fn old_regions(heap: &HeapCore<MockVM>, n: usize) -> Vec<RegionIndex> {
    (0..n)
        .map(|_| {
            let region = heap.regions().allocate_region(RegionState::Old).unwrap();
            region.allocate(region.end() - region.top()).unwrap();
            region.index()
        })
        .collect()
}

/// Store `new` into `slot` through the barriers of `mutator`.
pub fn write(mutator: &mut G1Mutator<MockVM>, slot: Address, new: ObjectReference) {
    let old = mutator.heap().vm().load(slot);
    mutator.object_reference_write_pre(old);
    mutator.heap().vm().store(slot, new);
    mutator.object_reference_write_post(slot, new);
}

/// Refine every completed buffer and the shared queue on the calling thread.
pub fn refine_all(heap: &HeapCore<MockVM>) {
    let dcqs = heap.dirty_card_queue_set();
    dcqs.concatenate_logs();
    let mut refine = |card: CardIndex, worker: usize| {
        heap.rem_set().refine_card(heap, card, worker, false);
        true
    };
    while dcqs.apply_closure_to_completed_buffer(&mut refine, 0, 0, false) {}
}

/// Run the remembered set part of an evacuation pause on `n_workers` workers, failing the
/// evacuation if asked to. Returns every slot handed to the pause closures.
pub fn evacuation_pause(heap: &HeapCore<MockVM>, n_workers: usize, fail: bool) -> Vec<Address> {
    let slots = Mutex::new(vec![]);
    heap.prepare_for_oops_into_collection_set_do(n_workers);
    WorkGang::new("test pause", n_workers).run_task(|worker| {
        let mut found = vec![];
        heap.oops_into_collection_set_do(&mut |slot, _| found.push(slot), worker);
        slots.lock().unwrap().extend(found);
    });
    if fail {
        heap.set_evacuation_failed();
    }
    heap.cleanup_after_oops_into_collection_set_do();
    slots.into_inner().unwrap()
}
