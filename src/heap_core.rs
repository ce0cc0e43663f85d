use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::plan::g1::concurrent_mark::ConcurrentMark;
use crate::plan::g1::concurrent_refine::ConcurrentRefine;
use crate::plan::g1::dirty_card_queue::DirtyCardQueueSet;
use crate::plan::g1::g1remset::{G1RemSet, IntoCSetClosure};
use crate::plan::g1::hot_card_cache::HotCardCache;
use crate::plan::g1::satb_queue::SATBMarkQueueSet;
use crate::policy::region::{CardIndex, CardTable, RegionTable};
use crate::scheduler::SuspendibleThreadSet;
use crate::util::error::{G1Error, Result};
use crate::util::log;
use crate::util::options::Options;
use crate::util::{Address, BitMap, ObjectReference};
use crate::vm::VMBinding;

/// An instance of the remembered-set subsystem for one heap.
///
/// The heap is a contiguous, region-aligned range of addresses reserved by the VM. All
/// data structures are sized for it once, at construction.
///
/// Background threads started by [`HeapCore::initialize_collection`] hold references to
/// the heap. [`HeapCore::stop`] must be called to shut them down.
pub struct HeapCore<VM: VMBinding> {
    options: Options,
    vm: VM,
    card_table: CardTable,
    regions: RegionTable,
    hot_card_cache: HotCardCache,
    dirty_card_queue_set: DirtyCardQueueSet,
    satb_queue_set: SATBMarkQueueSet,
    rem_set: G1RemSet,
    refine: ConcurrentRefine,
    concurrent_mark: ConcurrentMark,
    sts: SuspendibleThreadSet,
    initialized: AtomicBool,
}

impl<VM: VMBinding> HeapCore<VM> {
    pub fn new(vm: VM, options: Options, heap_start: Address, heap_bytes: usize) -> Result<Arc<Self>> {
        if options.region_size < options.card_size {
            return Err(G1Error::InvalidOption {
                name: "card_size".to_string(),
                value: options.card_size.to_string(),
            });
        }
        if !heap_start.is_aligned_to(options.region_size)
            || heap_bytes < options.region_size
            || heap_bytes % options.region_size != 0
        {
            return Err(G1Error::InvalidOption {
                name: "region_size".to_string(),
                value: format!(
                    "{} (heap {} bytes at {})",
                    options.region_size, heap_bytes, heap_start
                ),
            });
        }

        let card_table = CardTable::new(heap_start, heap_bytes, options.card_size);
        let regions = RegionTable::new(heap_start, heap_bytes, &options);
        let hot_card_cache = HotCardCache::new(
            options.use_hot_card_cache,
            regions.max_card_count_for_heap(),
            options.max_hot_card_count_size_percent,
            options.hot_card_cache_expand_threshold,
        );
        let refine = ConcurrentRefine::new(&options);
        let dirty_card_queue_set = DirtyCardQueueSet::new(
            options.update_buffer_size,
            refine.activation_threshold(0),
            refine.red_zone(),
        );
        let satb_queue_set = SATBMarkQueueSet::new(
            options.satb_buffer_size,
            options.satb_process_completed_threshold,
            options.satb_buffer_enqueueing_threshold_percent,
        );
        let rem_set = G1RemSet::new(&options);
        let concurrent_mark = ConcurrentMark::new(&options);
        log::info!(
            "Heap {}..{}: {} regions, {} cards",
            heap_start,
            heap_start + heap_bytes,
            regions.num_regions(),
            card_table.num_cards()
        );

        Ok(Arc::new(Self {
            options,
            vm,
            card_table,
            regions,
            hot_card_cache,
            dirty_card_queue_set,
            satb_queue_set,
            rem_set,
            refine,
            concurrent_mark,
            sts: SuspendibleThreadSet::new(),
            initialized: AtomicBool::new(false),
        }))
    }

    /// Start the refinement threads and the concurrent mark thread.
    pub fn initialize_collection(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            log::warn!("initialize_collection called twice");
            return Ok(());
        }
        self.refine.spawn_threads(self)?;
        self.concurrent_mark.spawn_thread(self)?;
        Ok(())
    }

    /// Stop and join all background threads. Must not be called from a pause.
    pub fn stop(&self) {
        self.concurrent_mark.stop();
        self.refine.stop(&self.dirty_card_queue_set);
        log::debug!("Background threads stopped");
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn vm(&self) -> &VM {
        &self.vm
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn hot_card_cache(&self) -> &HotCardCache {
        &self.hot_card_cache
    }

    pub fn dirty_card_queue_set(&self) -> &DirtyCardQueueSet {
        &self.dirty_card_queue_set
    }

    pub fn satb_queue_set(&self) -> &SATBMarkQueueSet {
        &self.satb_queue_set
    }

    pub fn rem_set(&self) -> &G1RemSet {
        &self.rem_set
    }

    pub fn refine(&self) -> &ConcurrentRefine {
        &self.refine
    }

    pub fn concurrent_mark(&self) -> &ConcurrentMark {
        &self.concurrent_mark
    }

    /// The threads that are suspended during pauses: refinement threads and parts of
    /// concurrent marking.
    pub fn sts(&self) -> &SuspendibleThreadSet {
        &self.sts
    }

    /// The card that a store of `new` into `slot` has to dirty, if any. Stores outside the
    /// heap, of null, within a region, or from a young region need no remembered set entry.
    #[inline(always)]
    pub(crate) fn card_to_log(&self, slot: Address, new: ObjectReference) -> Option<CardIndex> {
        if new.is_null() || self.regions.same_region(slot, new.to_raw_address()) {
            return None;
        }
        let region = self.regions.region_containing(slot)?;
        if region.is_young() {
            return None;
        }
        Some(self.card_table.card_index_for(slot))
    }

    /// Does the marker still need to see `object`? Objects outside the heap, allocated
    /// since marking started, or already marked do not.
    pub(crate) fn satb_needs_marking(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        match self.regions.region_containing(addr) {
            Some(region) => {
                !region.is_free()
                    && !region.obj_allocated_since_next_marking(addr)
                    && !self.vm.is_object_live(object)
            }
            None => false,
        }
    }

    /// The SATB barrier for threads without a [`G1Mutator`](crate::plan::g1::G1Mutator).
    pub fn object_reference_write_pre_shared(&self, old: ObjectReference) {
        if !old.is_null() && self.satb_queue_set.is_active() {
            self.satb_queue_set
                .enqueue_shared(old, |o| self.satb_needs_marking(o));
        }
    }

    /// The card marking barrier for threads without a
    /// [`G1Mutator`](crate::plan::g1::G1Mutator). Cards go to the shared queue.
    pub fn object_reference_write_post_shared(&self, slot: Address, new: ObjectReference) {
        if let Some(card) = self.card_to_log(slot, new) {
            if self.card_table.mark_dirty(card) {
                self.dirty_card_queue_set.enqueue_shared(card);
            }
        }
    }

    /// See [`G1RemSet::prepare_for_oops_into_collection_set_do`]. All mutators must have
    /// been flushed.
    pub fn prepare_for_oops_into_collection_set_do(&self, n_workers: usize) {
        self.rem_set
            .prepare_for_oops_into_collection_set_do(self, n_workers);
    }

    /// See [`G1RemSet::oops_into_collection_set_do`].
    pub fn oops_into_collection_set_do(&self, closure: &mut IntoCSetClosure, worker: usize) {
        self.rem_set
            .oops_into_collection_set_do(self, closure, worker);
    }

    /// See [`G1RemSet::cleanup_after_oops_into_collection_set_do`].
    pub fn cleanup_after_oops_into_collection_set_do(&self) {
        self.rem_set
            .cleanup_after_oops_into_collection_set_do(self);
    }

    pub fn set_evacuation_failed(&self) {
        self.rem_set.set_evacuation_failed();
    }

    pub fn scrub(&self, region_bm: &BitMap, card_bm: &BitMap) -> usize {
        self.rem_set.scrub(self, region_bm, card_bm)
    }

    pub fn scrub_par(
        &self,
        region_bm: &BitMap,
        card_bm: &BitMap,
        worker: usize,
        n_workers: usize,
        claim_value: usize,
    ) -> usize {
        self.rem_set
            .scrub_par(self, region_bm, card_bm, worker, n_workers, claim_value)
    }

    /// Check the remembered sets against the heap. A mismatch means live objects could be
    /// freed, and is fatal.
    pub fn verify_remembered_sets(&self) {
        if let Err(e) = self.rem_set.verify(self) {
            crate::util::panic::fatal(format_args!("{}", e));
        }
    }

    pub fn print_summary_info(&self) {
        self.rem_set.print_summary_info(self);
    }
}
