use super::card::{CardIndex, RegionIndex};
use super::region::{Region, RegionState};
use super::remset::RemSetConfig;
use crate::util::log;
use crate::util::options::Options;
use crate::util::Address;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// The sequence of all regions in the reserved heap, plus the collection set.
///
/// This is the only place where addresses are turned into region indices.
pub struct RegionTable {
    heap_start: Address,
    log_region_size: usize,
    log_card_size: usize,
    regions: Box<[Region]>,
    free_list: Mutex<VecDeque<RegionIndex>>,
    collection_set: RwLock<Vec<RegionIndex>>,
    /// Regions with cards claimed during the current pause.
    dirty_cards_regions: Mutex<Vec<RegionIndex>>,
    /// Bumped for every parallel region iteration that uses claim values.
    claim_epoch: AtomicUsize,
}

impl RegionTable {
    pub fn new(heap_start: Address, heap_bytes: usize, options: &Options) -> Self {
        let region_size = options.region_size;
        assert!(heap_start.is_aligned_to(region_size));
        let num_regions = heap_bytes / region_size;
        assert!(num_regions > 0, "the heap is smaller than one region");
        let config = RemSetConfig::new(
            options.log_region_size(),
            options.log_card_size(),
            num_regions,
            options.rset_region_entries_base,
            options.rset_sparse_region_entries_base,
        );
        let regions: Box<[Region]> = (0..num_regions)
            .map(|i| {
                Region::new(
                    RegionIndex::new(i),
                    heap_start + (i * region_size),
                    region_size,
                    config,
                )
            })
            .collect();
        log::debug!(
            "Region table: {} regions of {} bytes from {}, rset config {:?}",
            num_regions,
            region_size,
            heap_start,
            config
        );
        Self {
            heap_start,
            log_region_size: options.log_region_size(),
            log_card_size: options.log_card_size(),
            regions,
            free_list: Mutex::new((0..num_regions).map(RegionIndex::new).collect()),
            collection_set: RwLock::new(vec![]),
            dirty_cards_regions: Mutex::new(vec![]),
            claim_epoch: AtomicUsize::new(0),
        }
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn region_size(&self) -> usize {
        1 << self.log_region_size
    }

    pub fn log_region_size(&self) -> usize {
        self.log_region_size
    }

    pub fn log_card_size(&self) -> usize {
        self.log_card_size
    }

    pub fn heap_start(&self) -> Address {
        self.heap_start
    }

    pub fn heap_end(&self) -> Address {
        self.heap_start + (self.num_regions() << self.log_region_size)
    }

    pub fn max_card_count_for_heap(&self) -> usize {
        self.num_regions() << (self.log_region_size - self.log_card_size)
    }

    pub fn get(&self, index: RegionIndex) -> &Region {
        &self.regions[index.as_usize()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn is_in_heap(&self, addr: Address) -> bool {
        addr >= self.heap_start && addr < self.heap_end()
    }

    /// The region containing `addr`, or `None` if `addr` is outside the heap.
    pub fn region_containing(&self, addr: Address) -> Option<&Region> {
        self.is_in_heap(addr)
            .then(|| &self.regions[(addr - self.heap_start) >> self.log_region_size])
    }

    pub fn region_for_card(&self, card: CardIndex) -> Option<&Region> {
        self.regions
            .get(card.as_usize() >> (self.log_region_size - self.log_card_size))
    }

    /// Are `a` and `b` in the same region? Both must be in the heap.
    pub fn same_region(&self, a: Address, b: Address) -> bool {
        (a ^ b) >> self.log_region_size == 0
    }

    pub fn is_in_collection_set(&self, index: RegionIndex) -> bool {
        self.get(index).in_collection_set()
    }

    pub fn is_young(&self, index: RegionIndex) -> bool {
        self.get(index).is_young()
    }

    /// Take a region from the free list.
    pub fn allocate_region(&self, state: RegionState) -> Option<&Region> {
        debug_assert!(state != RegionState::Free);
        let index = self.free_list.lock().unwrap().pop_front()?;
        let region = self.get(index);
        debug_assert!(region.is_free() && region.rem_set().is_empty());
        region.set_state(state);
        log::trace!("Allocated {:?}", region);
        Some(region)
    }

    /// Take `count` contiguous free regions for a humongous object. The first one becomes
    /// the start region. Returns `None` if there is no such run of free regions.
    pub fn allocate_humongous(&self, count: usize) -> Option<&Region> {
        if count == 0 || count > self.num_regions() {
            return None;
        }
        let mut free = self.free_list.lock().unwrap();
        let start = (0..=self.num_regions().saturating_sub(count))
            .find(|&s| (s..s + count).all(|i| self.regions[i].is_free()))?;
        free.retain(|r| !(start..start + count).contains(&r.as_usize()));
        for i in start..start + count {
            let r = &self.regions[i];
            r.set_state(if i == start {
                RegionState::HumongousStart
            } else {
                RegionState::HumongousCont
            });
            r.set_top(r.end());
        }
        Some(&self.regions[start])
    }

    /// Return a region to the free list. Its remembered set is cleared.
    pub fn free_region(&self, index: RegionIndex) {
        let region = self.get(index);
        debug_assert!(!region.is_free(), "{:?} is already free", region);
        region.release();
        self.free_list.lock().unwrap().push_back(index);
    }

    pub fn num_free_regions(&self) -> usize {
        self.free_list.lock().unwrap().len()
    }

    pub fn add_to_collection_set(&self, index: RegionIndex) {
        let region = self.get(index);
        debug_assert!(!region.is_free());
        if !region.in_collection_set() {
            region.set_in_collection_set(true);
            self.collection_set.write().unwrap().push(index);
        }
    }

    /// A snapshot of the collection set, in the order regions were added.
    pub fn collection_set(&self) -> Vec<RegionIndex> {
        self.collection_set.read().unwrap().clone()
    }

    pub fn collection_set_len(&self) -> usize {
        self.collection_set.read().unwrap().len()
    }

    /// Empty the collection set. Returns the regions that were in it.
    pub fn clear_collection_set(&self) -> Vec<RegionIndex> {
        let cset = std::mem::take(&mut *self.collection_set.write().unwrap());
        for r in cset.iter() {
            self.get(*r).set_in_collection_set(false);
        }
        cset
    }

    /// Remember that `index` has claimed cards that must be cleaned after this pause.
    pub(crate) fn push_dirty_cards_region(&self, index: RegionIndex) {
        if self.get(index).try_mark_on_dirty_cards_list() {
            self.dirty_cards_regions.lock().unwrap().push(index);
        }
    }

    pub(crate) fn take_dirty_cards_regions(&self) -> Vec<RegionIndex> {
        let regions = std::mem::take(&mut *self.dirty_cards_regions.lock().unwrap());
        for r in regions.iter() {
            self.get(*r).clear_on_dirty_cards_list();
        }
        regions
    }

    /// A fresh claim value for [`Self::par_iterate`].
    pub fn next_claim_value(&self) -> usize {
        self.claim_epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Apply `f` to every region not yet claimed with `claim_value`. Each worker starts at a
    /// different region and walks all regions circularly, so each region is visited by
    /// exactly one worker across all callers that use the same claim value.
    pub fn par_iterate<F: FnMut(&Region)>(
        &self,
        worker: usize,
        n_workers: usize,
        claim_value: usize,
        mut f: F,
    ) {
        let n = self.num_regions();
        let start = n / n_workers.max(1) * worker;
        for i in 0..n {
            let region = &self.regions[(start + i) % n];
            if region.claim(claim_value) {
                f(region);
            }
        }
    }

    /// Forget all claim values.
    pub fn reset_claim_values(&self) {
        for r in self.regions.iter() {
            r.reset_claim_value();
        }
    }
}
