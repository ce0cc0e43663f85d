//! Card refinement and the remembered-set part of an evacuation pause.
//!
//! Outside of pauses, [`G1RemSet::refine_card`] turns dirty cards into remembered set entries.
//! During a pause the collector calls, in order:
//!
//! 1. [`G1RemSet::prepare_for_oops_into_collection_set_do`], once;
//! 2. [`G1RemSet::oops_into_collection_set_do`], once from each parallel worker;
//! 3. [`G1RemSet::cleanup_after_oops_into_collection_set_do`], once.
//!
//! Step 2 first refines every card still logged (updating remembered sets, "updateRS"), then
//! scans the remembered sets of the collection set ("scanRS"), handing every reference into
//! the collection set to the worker's closure.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;

use super::dirty_card_queue::{DirtyCardQueue, DirtyCardQueueSet};
use crate::policy::region::{CardIndex, Region, RegionIndex};
use crate::scheduler::ParallelTaskTerminator;
use crate::util::error::{G1Error, Result};
use crate::util::log;
use crate::util::options::Options;
use crate::util::{Address, BitMap, ObjectReference, SynchronizedCounter};
use crate::vm::{CardScan, VMBinding};
use crate::HeapCore;

/// Receives every reference into the collection set found during a pause: the slot and the
/// referent.
pub type IntoCSetClosure<'a> = dyn FnMut(Address, ObjectReference) + 'a;

/// Synchronization shared by the workers of one pause.
struct PauseSync {
    n_workers: usize,
    /// Every worker finishes updating remembered sets before any starts scanning them.
    update_rs_done: Barrier,
    terminator: ParallelTaskTerminator,
}

/// Per-pause timings, per worker.
#[derive(Default, Debug)]
struct PauseTimes {
    update_rs: Vec<Duration>,
    scan_rs: Vec<Duration>,
    update_rs_processed_buffers: usize,
}

impl PauseTimes {
    fn reset(&mut self, n_workers: usize) {
        self.update_rs = vec![Duration::ZERO; n_workers];
        self.scan_rs = vec![Duration::ZERO; n_workers];
        self.update_rs_processed_buffers = 0;
    }

    fn max(times: &[Duration]) -> Duration {
        times.iter().copied().max().unwrap_or_default()
    }
}

pub struct G1RemSet {
    max_workers: usize,
    rset_scan_block_size: usize,
    deferred_rs_update: bool,
    pause_sync: Mutex<Option<Arc<PauseSync>>>,
    cards_scanned: Box<[CachePadded<AtomicUsize>]>,
    total_cards_scanned: AtomicUsize,
    /// Cards refined during a pause that hold references into the collection set. Only
    /// needed if the evacuation fails.
    into_cset_dcqs: DirtyCardQueueSet,
    into_cset_queues: Box<[Mutex<DirtyCardQueue>]>,
    evacuation_failed: AtomicBool,
    conc_refined_cards: SynchronizedCounter,
    times: Mutex<PauseTimes>,
    last_update_rs_time: Mutex<Duration>,
    last_scan_rs_time: Mutex<Duration>,
}

impl G1RemSet {
    pub fn new(options: &Options) -> Self {
        let max_workers = options.threads;
        Self {
            max_workers,
            rset_scan_block_size: options.rset_scan_block_size,
            deferred_rs_update: options.deferred_rs_update,
            pause_sync: Mutex::new(None),
            cards_scanned: (0..max_workers)
                .map(|_| CachePadded::new(AtomicUsize::new(0)))
                .collect(),
            total_cards_scanned: AtomicUsize::new(0),
            into_cset_dcqs: DirtyCardQueueSet::unbounded(options.update_buffer_size),
            into_cset_queues: (0..max_workers)
                .map(|_| Mutex::new(DirtyCardQueue::new()))
                .collect(),
            evacuation_failed: AtomicBool::new(false),
            conc_refined_cards: SynchronizedCounter::new(0),
            times: Mutex::new(PauseTimes::default()),
            last_update_rs_time: Mutex::new(Duration::ZERO),
            last_scan_rs_time: Mutex::new(Duration::ZERO),
        }
    }

    /// Refine one dirty card: clean it, scan it, and add it to the remembered set of every
    /// other region it points into.
    ///
    /// Cards that are no longer dirty, or that lie in free, young or collection set regions,
    /// are skipped. Outside of pauses a card may be deferred by the hot card cache instead,
    /// and a card evicted from the cache may be refined in its place.
    ///
    /// With `check_for_refs_into_cset`, references into the collection set are not recorded,
    /// and the return value tells whether there were any.
    pub fn refine_card<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        card: CardIndex,
        worker: usize,
        check_for_refs_into_cset: bool,
    ) -> bool {
        self.refine_card_with(heap, card, worker, check_for_refs_into_cset, None)
    }

    fn refine_card_with<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        card: CardIndex,
        worker: usize,
        check_for_refs_into_cset: bool,
        mut into_cset: Option<&mut IntoCSetClosure>,
    ) -> bool {
        let card_table = heap.card_table();
        let mut consult_cache = !check_for_refs_into_cset && heap.hot_card_cache().use_cache();
        let mut has_refs_into_cset = false;
        let mut pending = Some(card);
        while let Some(card) = pending.take() {
            if !card_table.is_dirty(card) {
                continue;
            }
            let Some(region) = heap.regions().region_for_card(card) else {
                continue;
            };
            if region.is_free() || region.is_young() || region.in_collection_set() {
                continue;
            }
            if consult_cache {
                consult_cache = false;
                match heap.hot_card_cache().insert(card) {
                    None => continue,
                    Some(evicted) if evicted != card => {
                        // `card` stays deferred in the cache.
                        pending = Some(evicted);
                        continue;
                    }
                    Some(_) => {}
                }
            }
            log::trace!("Worker {} refines {:?} in {:?}", worker, card, region.index());
            has_refs_into_cset |= self.scan_dirty_card(
                heap,
                region,
                card,
                check_for_refs_into_cset,
                into_cset.as_deref_mut(),
            );
        }
        has_refs_into_cset
    }

    /// Clean and scan a card of `region`, whatever its state.
    fn scan_dirty_card<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        region: &Region,
        card: CardIndex,
        check_for_refs_into_cset: bool,
        mut into_cset: Option<&mut IntoCSetClosure>,
    ) -> bool {
        let card_table = heap.card_table();
        let regions = heap.regions();
        card_table.clean_for_refinement(card);
        let Some(range) = Self::parsable_part(heap, region, card) else {
            if !check_for_refs_into_cset {
                self.conc_refined_cards.increment();
            }
            return false;
        };

        let source = region.index();
        let mut has_refs_into_cset = false;
        let result = heap.vm().scan_card(range, &mut |slot, referent| {
            if referent.is_null() {
                return;
            }
            let Some(to) = regions.region_containing(referent.to_raw_address()) else {
                return;
            };
            if to.index() == source {
                return;
            }
            if check_for_refs_into_cset && to.in_collection_set() {
                has_refs_into_cset = true;
                if let Some(cl) = into_cset.as_mut() {
                    cl(slot, referent);
                }
            } else {
                to.rem_set().add_reference(card);
            }
        });

        match result {
            CardScan::Complete => {
                if check_for_refs_into_cset {
                    // Scanned in this pause. Keeps scanRS from visiting it again.
                    card_table.set_card_claimed(card);
                    regions.push_dirty_cards_region(source);
                } else {
                    self.conc_refined_cards.increment();
                }
            }
            CardScan::Unparsable { stop } => {
                log::trace!("{:?} is unparsable at {}, deferring it", card, stop);
                // A mutator that dirtied the card since it was cleaned has logged it already.
                if card_table.mark_dirty(card) {
                    heap.dirty_card_queue_set().enqueue_shared(card);
                }
            }
        }
        has_refs_into_cset
    }

    /// The part of `card` below the top of `region`, if any.
    fn parsable_part<VM: VMBinding>(
        heap: &HeapCore<VM>,
        region: &Region,
        card: CardIndex,
    ) -> Option<Range<Address>> {
        let range = heap.card_table().card_range(card);
        let end = range.end.min(region.top());
        (range.start < end).then_some(range.start..end)
    }

    /// Get ready for `n_workers` workers to call [`Self::oops_into_collection_set_do`].
    /// Concurrent refinement is suspended until
    /// [`Self::cleanup_after_oops_into_collection_set_do`].
    pub fn prepare_for_oops_into_collection_set_do<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        n_workers: usize,
    ) {
        assert!(
            n_workers > 0 && n_workers <= self.max_workers,
            "{} workers requested, at most {} supported",
            n_workers,
            self.max_workers
        );
        heap.sts().synchronize();
        self.evacuation_failed.store(false, Ordering::Relaxed);

        heap.dirty_card_queue_set().concatenate_logs();
        let hot_card_cache = heap.hot_card_cache();
        hot_card_cache.set_use_cache(false);
        hot_card_cache.reset_par_claim(n_workers);

        for c in self.cards_scanned.iter() {
            c.store(0, Ordering::Relaxed);
        }
        for r in heap.regions().collection_set() {
            heap.regions().get(r).rem_set().init_for_par_iteration();
        }
        self.times.lock().unwrap().reset(n_workers);
        *self.pause_sync.lock().unwrap() = Some(Arc::new(PauseSync {
            n_workers,
            update_rs_done: Barrier::new(n_workers),
            terminator: ParallelTaskTerminator::new(n_workers),
        }));
        log::debug!(
            "Remembered set pause work prepared: {} workers, {} collection set regions, {} completed buffers",
            n_workers,
            heap.regions().collection_set_len(),
            heap.dirty_card_queue_set().completed_buffers_num()
        );
    }

    /// The parallel part of the pause. Every worker in `0..n_workers` must call this exactly
    /// once. `closure` receives every reference into the collection set from outside of it,
    /// each exactly once across all workers.
    pub fn oops_into_collection_set_do<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        closure: &mut IntoCSetClosure,
        worker: usize,
    ) {
        let sync = self
            .pause_sync
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| panic!("oops_into_collection_set_do called outside of a pause"));
        assert!(worker < sync.n_workers);

        let start = Instant::now();
        let processed_buffers = self.update_rs(heap, closure, worker);
        let update_rs_time = start.elapsed();

        sync.update_rs_done.wait();

        let start = Instant::now();
        self.scan_rs(heap, closure, worker, sync.n_workers);
        while !sync
            .terminator
            .offer_termination(|| self.has_unclaimed_rset_blocks(heap))
        {
            self.scan_rs(heap, closure, worker, sync.n_workers);
        }
        let scan_rs_time = start.elapsed();

        self.into_cset_queues[worker]
            .lock()
            .unwrap()
            .flush(&self.into_cset_dcqs);

        let mut times = self.times.lock().unwrap();
        times.update_rs[worker] = update_rs_time;
        times.scan_rs[worker] = scan_rs_time;
        times.update_rs_processed_buffers += processed_buffers;
    }

    /// Refine the cards left in the hot card cache and in the dirty card queues. Returns the
    /// number of completed buffers processed.
    fn update_rs<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        closure: &mut IntoCSetClosure,
        worker: usize,
    ) -> usize {
        let mut into_cset_queue = self.into_cset_queues[worker].lock().unwrap();
        let mut refine = |card: CardIndex, worker: usize| {
            if self.refine_card_with(heap, card, worker, true, Some(&mut *closure)) {
                into_cset_queue.enqueue_no_processing(card, &self.into_cset_dcqs);
            }
            true
        };

        heap.hot_card_cache().drain_par(|card| {
            refine(card, worker);
        });

        let mut buffers = 0;
        let dcqs = heap.dirty_card_queue_set();
        while dcqs.apply_closure_to_completed_buffer(&mut refine, worker, 0, true) {
            buffers += 1;
        }
        buffers
    }

    /// Scan the remembered sets of the collection set. Workers start at different regions. A
    /// first pass visits only regions this worker claims; a second pass helps with regions
    /// claimed by others. Within a region, cards are claimed in blocks.
    fn scan_rs<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        closure: &mut IntoCSetClosure,
        worker: usize,
        n_workers: usize,
    ) {
        let regions = heap.regions();
        let cset = regions.collection_set();
        if cset.is_empty() {
            return;
        }
        let start = cset.len() / n_workers * worker;
        let block = self.rset_scan_block_size;
        let mut scanned = 0;
        for try_claimed in [false, true] {
            for i in 0..cset.len() {
                let rem_set = regions.get(cset[(start + i) % cset.len()]).rem_set();
                if rem_set.iter_is_complete() {
                    continue;
                }
                if !try_claimed && !rem_set.claim_iter() {
                    continue;
                }
                let cards = rem_set.par_iteration_snapshot();
                loop {
                    let first = rem_set.iter_claimed_next(block);
                    if first >= cards.len() {
                        break;
                    }
                    for card in &cards[first..(first + block).min(cards.len())] {
                        if self.scan_card(heap, *card, closure) {
                            scanned += 1;
                        }
                    }
                }
                if !try_claimed {
                    rem_set.set_iter_complete();
                }
            }
        }
        self.cards_scanned[worker].fetch_add(scanned, Ordering::Relaxed);
    }

    /// Scan a card from a remembered set of the collection set, unless it has been scanned
    /// in this pause already.
    fn scan_card<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        card: CardIndex,
        closure: &mut IntoCSetClosure,
    ) -> bool {
        let regions = heap.regions();
        let Some(region) = regions.region_for_card(card) else {
            return false;
        };
        if region.in_collection_set() || region.is_free() {
            return false;
        }
        if !heap.card_table().try_claim_card(card) {
            return false;
        }
        regions.push_dirty_cards_region(region.index());
        if let Some(range) = Self::parsable_part(heap, region, card) {
            let result = heap.vm().scan_card(range, &mut |slot, referent| {
                if referent.is_null() {
                    return;
                }
                if regions
                    .region_containing(referent.to_raw_address())
                    .is_some_and(|to| to.in_collection_set())
                {
                    closure(slot, referent);
                }
            });
            if let CardScan::Unparsable { stop } = result {
                log::warn!("{:?} is unparsable at {} during a pause", card, stop);
            }
        }
        true
    }

    fn has_unclaimed_rset_blocks<VM: VMBinding>(&self, heap: &HeapCore<VM>) -> bool {
        let regions = heap.regions();
        regions.collection_set().into_iter().any(|r| {
            let rem_set = regions.get(r).rem_set();
            !rem_set.iter_is_complete()
                && rem_set.iter_claimed() < rem_set.par_iteration_snapshot().len()
        })
    }

    /// Record that the evacuation of the current pause failed. Cards with references into the
    /// collection set then get their remembered set entries restored at cleanup.
    pub fn set_evacuation_failed(&self) {
        self.evacuation_failed.store(true, Ordering::Relaxed);
    }

    pub fn evacuation_failed(&self) -> bool {
        self.evacuation_failed.load(Ordering::Relaxed)
    }

    /// Finish the pause: reset per-pause state, clean claimed cards, and resume concurrent
    /// refinement. Called once, after all workers are done.
    pub fn cleanup_after_oops_into_collection_set_do<VM: VMBinding>(&self, heap: &HeapCore<VM>) {
        let total: usize = self
            .cards_scanned
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum();
        self.total_cards_scanned.store(total, Ordering::Relaxed);
        *self.pause_sync.lock().unwrap() = None;

        let regions = heap.regions();
        let card_table = heap.card_table();
        let dcqs = heap.dirty_card_queue_set();

        let hot_card_cache = heap.hot_card_cache();
        for card in hot_card_cache.clear_and_record_counts() {
            dcqs.enqueue_shared(card);
        }
        hot_card_cache.set_use_cache(true);

        for r in regions.collection_set() {
            regions.get(r).rem_set().init_for_par_iteration();
        }
        let mut cleaned = 0;
        for r in regions.take_dirty_cards_regions() {
            cleaned += card_table.clean_claimed_in_range(regions.get(r).card_range());
        }
        if cfg!(feature = "extreme_assertions") {
            card_table.assert_no_claimed_cards(
                CardIndex::new(0)..CardIndex::new(card_table.num_cards()),
            );
        }

        if self.evacuation_failed() {
            self.restore_remembered_sets(heap);
        } else {
            self.into_cset_dcqs.clear();
        }

        let (update_rs_time, scan_rs_time, processed_buffers) = {
            let times = self.times.lock().unwrap();
            (
                PauseTimes::max(&times.update_rs),
                PauseTimes::max(&times.scan_rs),
                times.update_rs_processed_buffers,
            )
        };
        *self.last_update_rs_time.lock().unwrap() = update_rs_time;
        *self.last_scan_rs_time.lock().unwrap() = scan_rs_time;
        log::debug!(
            "Remembered set pause work done: updateRS {:?} ({} buffers), scanRS {:?} ({} cards), {} claimed cards cleaned",
            update_rs_time,
            processed_buffers,
            scan_rs_time,
            total,
            cleaned
        );

        heap.refine().adjust(dcqs, update_rs_time, processed_buffers);
        heap.sts().desynchronize();
    }

    /// After a failed evacuation, the collection set regions stay in place and need entries
    /// for the references into them that were only handed to the pause closures.
    fn restore_remembered_sets<VM: VMBinding>(&self, heap: &HeapCore<VM>) {
        let buffers = self.into_cset_dcqs.take_completed_buffers();
        let n_cards: usize = buffers.iter().map(Vec::len).sum();
        log::info!(
            "Evacuation failed: restoring remembered set entries of {} cards ({})",
            n_cards,
            if self.deferred_rs_update { "deferred" } else { "immediate" }
        );
        let dcqs = heap.dirty_card_queue_set();
        for buf in buffers {
            if self.deferred_rs_update {
                for card in buf.iter() {
                    heap.card_table().dirty_card(*card);
                }
                dcqs.enqueue_complete_buffer(buf);
            } else {
                for card in buf.iter() {
                    if let Some(region) = heap.regions().region_for_card(*card) {
                        self.scan_dirty_card(heap, region, *card, false, None);
                    }
                }
                self.into_cset_dcqs.deallocate_buffer(buf);
            }
        }
        if self.deferred_rs_update {
            dcqs.notify_if_necessary();
        }
    }

    /// Remove remembered set entries for dead regions and cards from every region. Returns
    /// the number of entries removed. Concurrent refinement is suspended meanwhile.
    pub fn scrub<VM: VMBinding>(&self, heap: &HeapCore<VM>, region_bm: &BitMap, card_bm: &BitMap) -> usize {
        heap.sts().synchronize();
        let removed: usize = heap
            .regions()
            .iter()
            .filter(|r| !r.is_free() && !r.continues_humongous())
            .map(|r| r.rem_set().scrub(region_bm, card_bm))
            .sum();
        heap.sts().desynchronize();
        log::debug!("Scrubbed {} remembered set entries", removed);
        removed
    }

    /// The parallel version of [`Self::scrub`]. Every worker calls this with the same
    /// `claim_value`, and each region is scrubbed by exactly one of them. The caller is
    /// responsible for suspending concurrent refinement.
    pub fn scrub_par<VM: VMBinding>(
        &self,
        heap: &HeapCore<VM>,
        region_bm: &BitMap,
        card_bm: &BitMap,
        worker: usize,
        n_workers: usize,
        claim_value: usize,
    ) -> usize {
        let mut removed = 0;
        heap.regions()
            .par_iterate(worker, n_workers, claim_value, |r| {
                if !r.is_free() && !r.continues_humongous() {
                    removed += r.rem_set().scrub(region_bm, card_bm);
                }
            });
        removed
    }

    /// Cards refined outside of pauses so far.
    pub fn conc_refined_cards(&self) -> usize {
        self.conc_refined_cards.peek()
    }

    /// Cards scanned by scanRS in the last pause.
    pub fn total_cards_scanned(&self) -> usize {
        self.total_cards_scanned.load(Ordering::Relaxed)
    }

    pub fn summary<VM: VMBinding>(&self, heap: &HeapCore<VM>) -> RemSetSummary {
        let dcqs = heap.dirty_card_queue_set();
        let mut summary = RemSetSummary {
            conc_refined_cards: self.conc_refined_cards(),
            processed_buffers_mut: dcqs.processed_buffers_mut(),
            processed_buffers_rs_thread: dcqs.processed_buffers_rs_thread(),
            hot_card_cache: heap.hot_card_cache().stats(),
            last_update_rs_time: *self.last_update_rs_time.lock().unwrap(),
            last_scan_rs_time: *self.last_scan_rs_time.lock().unwrap(),
            last_cards_scanned: self.total_cards_scanned(),
            ..Default::default()
        };
        for r in heap.regions().iter().filter(|r| !r.is_free()) {
            let rem_set = r.rem_set();
            summary.rs_occupied += rem_set.occupied();
            summary.rs_mem_size += rem_set.mem_size();
            summary.rs_coarsenings += rem_set.n_coarsenings();
            if rem_set.occupied() > summary.max_rs_occupied {
                summary.max_rs_occupied = rem_set.occupied();
                summary.max_rs_region = Some(r.index());
            }
        }
        summary
    }

    pub fn print_summary_info<VM: VMBinding>(&self, heap: &HeapCore<VM>) {
        log::info!("{}", self.summary(heap));
    }

    /// Check that every reference between regions is covered: either the source card is in
    /// the remembered set of the target region, or it is still waiting for refinement. Only
    /// meaningful while no mutator runs.
    pub fn verify<VM: VMBinding>(&self, heap: &HeapCore<VM>) -> Result<()> {
        let regions = heap.regions();
        let card_table = heap.card_table();
        let mut missing: Option<String> = None;
        for region in regions.iter() {
            if region.is_free() || region.is_young() || region.is_empty() {
                continue;
            }
            let first = card_table.card_index_for(region.bottom());
            let last = card_table.card_index_for(region.top() - 1usize);
            for i in first.as_usize()..=last.as_usize() {
                let card = CardIndex::new(i);
                if card_table.is_dirty(card) || heap.hot_card_cache().contains(card) {
                    continue;
                }
                let Some(range) = Self::parsable_part(heap, region, card) else {
                    continue;
                };
                heap.vm().scan_card(range, &mut |slot, referent| {
                    if missing.is_some() || referent.is_null() {
                        return;
                    }
                    if let Some(to) = regions.region_containing(referent.to_raw_address()) {
                        if to.index() != region.index()
                            && !to.is_free()
                            && !to.rem_set().contains_reference(card)
                        {
                            missing = Some(format!(
                                "slot {} in {:?} of {:?} points to {} in {:?}, which does not remember it",
                                slot,
                                card,
                                region.index(),
                                referent,
                                to.index()
                            ));
                        }
                    }
                });
                if let Some(m) = missing.take() {
                    return Err(G1Error::Verification(m));
                }
            }
        }
        Ok(())
    }
}

/// Remembered set statistics, printed by [`G1RemSet::print_summary_info`].
#[derive(Clone, Debug, Default)]
pub struct RemSetSummary {
    pub conc_refined_cards: usize,
    pub processed_buffers_mut: usize,
    pub processed_buffers_rs_thread: usize,
    pub hot_card_cache: super::hot_card_cache::HotCardCacheStats,
    pub last_update_rs_time: Duration,
    pub last_scan_rs_time: Duration,
    pub last_cards_scanned: usize,
    pub rs_occupied: usize,
    pub rs_mem_size: usize,
    pub rs_coarsenings: usize,
    pub max_rs_occupied: usize,
    pub max_rs_region: Option<RegionIndex>,
}

impl std::fmt::Display for RemSetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let total_buffers = self.processed_buffers_mut + self.processed_buffers_rs_thread;
        let percent = |n: usize| {
            if total_buffers == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total_buffers as f64
            }
        };
        writeln!(f, "Concurrent RS processed {} cards", self.conc_refined_cards)?;
        writeln!(
            f,
            "  Of {} completed buffers: {} ({:.1}%) by RS threads, {} ({:.1}%) by mutator threads",
            total_buffers,
            self.processed_buffers_rs_thread,
            percent(self.processed_buffers_rs_thread),
            self.processed_buffers_mut,
            percent(self.processed_buffers_mut)
        )?;
        writeln!(
            f,
            "  Hot card cache: {} slots, {} inserts, {} hits, {} evictions, {} expansions",
            self.hot_card_cache.size,
            self.hot_card_cache.inserts,
            self.hot_card_cache.hits,
            self.hot_card_cache.evictions,
            self.hot_card_cache.expansions
        )?;
        writeln!(
            f,
            "  Last pause: updateRS {:?}, scanRS {:?}, {} cards scanned",
            self.last_update_rs_time, self.last_scan_rs_time, self.last_cards_scanned
        )?;
        write!(
            f,
            "  Remembered sets: {} entries, {} bytes, {} coarsenings, largest {} entries in {:?}",
            self.rs_occupied,
            self.rs_mem_size,
            self.rs_coarsenings,
            self.max_rs_occupied,
            self.max_rs_region
        )
    }
}
