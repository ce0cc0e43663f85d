//! Per-region remembered sets.
//!
//! A remembered set records which cards of *other* regions hold references into its owning
//! region. Entries are grouped by source region, and each source region is represented in
//! exactly one of three ways:
//!
//! * sparse: a short list of card offsets, for source regions with few referring cards;
//! * fine: a bitmap with one bit per card of the source region (a per-region table);
//! * coarse: a single bit meaning "any card of the source region may refer to us".
//!
//! A source region moves from sparse to fine once its list is full, and the most occupied
//! fine table is coarsened once the set holds too many fine tables.
//!
//! Lock order: the sparse table lock is taken before the fine table lock.

use super::card::{CardIndex, RegionIndex};
use crate::util::constants::*;
use crate::util::BitMap;
use atomic::Atomic;
use bytemuck::NoUninit;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Sizing of a remembered set. The same for every region in a heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RemSetConfig {
    pub log_cards_per_region: usize,
    pub num_regions: usize,
    /// Card offsets kept per source region before it gets a fine table.
    pub max_sparse_entries: usize,
    /// Fine tables kept before one is coarsened.
    pub max_fine_tables: usize,
}

impl RemSetConfig {
    /// Budgets scale with the region size: `base * (log2(region size in MB) + 1)`.
    pub fn new(
        log_region_size: usize,
        log_card_size: usize,
        num_regions: usize,
        region_entries_base: usize,
        sparse_entries_base: usize,
    ) -> Self {
        let scale = log_region_size - LOG_BYTES_IN_MBYTE as usize + 1;
        Self {
            log_cards_per_region: log_region_size - log_card_size,
            num_regions,
            max_sparse_entries: sparse_entries_base * scale,
            max_fine_tables: (region_entries_base * scale).max(1),
        }
    }

    pub fn cards_per_region(&self) -> usize {
        1 << self.log_cards_per_region
    }

    pub fn region_of(&self, card: CardIndex) -> RegionIndex {
        RegionIndex::new(card.as_usize() >> self.log_cards_per_region)
    }

    pub fn first_card_of(&self, region: RegionIndex) -> CardIndex {
        CardIndex::new(region.as_usize() << self.log_cards_per_region)
    }

    fn card_offset(&self, card: CardIndex) -> usize {
        card.as_usize() & (self.cards_per_region() - 1)
    }
}

/// Claim state of a remembered set during a pause.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum IterState {
    Unclaimed,
    Claimed,
    Complete,
}

/// One bit per card of a source region.
struct PerRegionTable {
    cards: BitMap,
}

impl PerRegionTable {
    fn new(cards_per_region: usize) -> Self {
        Self {
            cards: BitMap::new(cards_per_region),
        }
    }

    fn add_card(&self, offset: usize) -> bool {
        self.cards.set(offset)
    }

    fn contains_card(&self, offset: usize) -> bool {
        self.cards.is_set(offset)
    }

    fn occupied(&self) -> usize {
        self.cards.count_ones()
    }
}

pub struct RememberedSet {
    owner: RegionIndex,
    config: RemSetConfig,
    sparse: Mutex<BTreeMap<RegionIndex, Vec<u32>>>,
    fine: RwLock<BTreeMap<RegionIndex, Arc<PerRegionTable>>>,
    coarse: BitMap,
    n_coarsenings: AtomicUsize,
    iter_state: Atomic<IterState>,
    iter_claimed: AtomicUsize,
    /// The entries as seen by the scanning workers of the current pause. Every worker must
    /// see the same order for block claiming to work.
    par_snapshot: Mutex<Option<Arc<[CardIndex]>>>,
}

impl RememberedSet {
    pub fn new(owner: RegionIndex, config: RemSetConfig) -> Self {
        Self {
            owner,
            config,
            sparse: Mutex::new(BTreeMap::new()),
            fine: RwLock::new(BTreeMap::new()),
            coarse: BitMap::new(config.num_regions),
            n_coarsenings: AtomicUsize::new(0),
            iter_state: Atomic::new(IterState::Unclaimed),
            iter_claimed: AtomicUsize::new(0),
            par_snapshot: Mutex::new(None),
        }
    }

    pub fn owner(&self) -> RegionIndex {
        self.owner
    }

    pub fn config(&self) -> &RemSetConfig {
        &self.config
    }

    pub(crate) fn owner_first_card(&self) -> CardIndex {
        self.config.first_card_of(self.owner)
    }

    /// Record that `from_card` holds a reference into the owning region.
    /// Returns true if the entry was not there before.
    pub fn add_reference(&self, from_card: CardIndex) -> bool {
        let from = self.config.region_of(from_card);
        debug_assert_ne!(from, self.owner, "{:?} refers to its own region", from_card);
        let offset = self.config.card_offset(from_card);

        if self.coarse.is_set(from.as_usize()) {
            return false;
        }
        if let Some(prt) = self.fine.read().unwrap().get(&from) {
            return prt.add_card(offset);
        }

        let mut sparse = self.sparse.lock().unwrap();
        // Another thread may have moved this source region to the fine or coarse table
        // while we waited for the lock.
        if self.coarse.is_set(from.as_usize()) {
            return false;
        }
        if let Some(prt) = self.fine.read().unwrap().get(&from) {
            return prt.add_card(offset);
        }
        let entries = sparse.entry(from).or_default();
        if entries.contains(&(offset as u32)) {
            return false;
        }
        if entries.len() < self.config.max_sparse_entries {
            entries.push(offset as u32);
            return true;
        }

        let prt = PerRegionTable::new(self.config.cards_per_region());
        for e in sparse.remove(&from).unwrap_or_default() {
            prt.add_card(e as usize);
        }
        prt.add_card(offset);
        let mut fine = self.fine.write().unwrap();
        if fine.len() >= self.config.max_fine_tables {
            self.coarsen_most_occupied(&mut fine);
        }
        fine.insert(from, Arc::new(prt));
        true
    }

    fn coarsen_most_occupied(&self, fine: &mut BTreeMap<RegionIndex, Arc<PerRegionTable>>) {
        let victim = fine
            .iter()
            .max_by_key(|(_, prt)| prt.occupied())
            .map(|(r, _)| *r);
        if let Some(victim) = victim {
            // The coarse bit must be visible before the table goes away, so that a
            // concurrent writer still holding the table loses nothing.
            self.coarse.set(victim.as_usize());
            fine.remove(&victim);
            self.n_coarsenings.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn contains_reference(&self, from_card: CardIndex) -> bool {
        let from = self.config.region_of(from_card);
        let offset = self.config.card_offset(from_card);
        if self.coarse.is_set(from.as_usize()) {
            return true;
        }
        let sparse = self.sparse.lock().unwrap();
        if let Some(entries) = sparse.get(&from) {
            return entries.contains(&(offset as u32));
        }
        self.fine
            .read()
            .unwrap()
            .get(&from)
            .is_some_and(|prt| prt.contains_card(offset))
    }

    /// Number of cards this set refers to. A coarsened source region counts all its cards.
    pub fn occupied(&self) -> usize {
        let sparse = self.sparse.lock().unwrap();
        let fine = self.fine.read().unwrap();
        sparse.values().map(|e| e.len()).sum::<usize>()
            + fine.values().map(|prt| prt.occupied()).sum::<usize>()
            + self.coarse.count_ones() * self.config.cards_per_region()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    pub fn n_coarsenings(&self) -> usize {
        self.n_coarsenings.load(Ordering::Relaxed)
    }

    /// Number of source regions in each representation, as (sparse, fine, coarse).
    pub fn representation_counts(&self) -> (usize, usize, usize) {
        let sparse = self.sparse.lock().unwrap();
        let fine = self.fine.read().unwrap();
        (sparse.len(), fine.len(), self.coarse.count_ones())
    }

    pub fn mem_size(&self) -> usize {
        let sparse = self.sparse.lock().unwrap();
        let fine = self.fine.read().unwrap();
        std::mem::size_of::<Self>()
            + self.coarse.mem_size()
            + sparse
                .values()
                .map(|e| e.capacity() * std::mem::size_of::<u32>())
                .sum::<usize>()
            + fine.values().map(|prt| prt.cards.mem_size()).sum::<usize>()
    }

    pub fn clear(&self) {
        let mut sparse = self.sparse.lock().unwrap();
        let mut fine = self.fine.write().unwrap();
        sparse.clear();
        fine.clear();
        self.coarse.clear_all();
        self.init_for_par_iteration();
    }

    /// Remove entries from dead source regions and dead source cards. A set bit in
    /// `region_bm` (indexed by region) or `card_bm` (indexed by card) means live.
    /// Returns the number of entries removed, counted the same way as [`Self::occupied`].
    pub fn scrub(&self, region_bm: &BitMap, card_bm: &BitMap) -> usize {
        let mut removed = 0;
        let cards_per_region = self.config.cards_per_region();
        let mut sparse = self.sparse.lock().unwrap();
        let mut fine = self.fine.write().unwrap();

        sparse.retain(|from, entries| {
            if !region_bm.is_set(from.as_usize()) {
                removed += entries.len();
                return false;
            }
            let first = self.config.first_card_of(*from).as_usize();
            let before = entries.len();
            entries.retain(|&offset| card_bm.is_set(first + offset as usize));
            removed += before - entries.len();
            !entries.is_empty()
        });

        fine.retain(|from, prt| {
            let occupied = prt.occupied();
            if !region_bm.is_set(from.as_usize()) {
                removed += occupied;
                return false;
            }
            let first = self.config.first_card_of(*from).as_usize();
            for offset in prt.cards.iter_set().collect::<Vec<_>>() {
                if !card_bm.is_set(first + offset) && prt.cards.clear(offset) {
                    removed += 1;
                }
            }
            occupied != 0 && prt.occupied() != 0
        });

        for region in self.coarse.iter_set().collect::<Vec<_>>() {
            if !region_bm.is_set(region) && self.coarse.clear(region) {
                removed += cards_per_region;
            }
        }

        *self.par_snapshot.lock().unwrap() = None;
        removed
    }

    /// All entries, in a deterministic order: sparse entries, then fine, then coarse, each
    /// ordered by source region.
    fn collect_entries(&self) -> Vec<CardIndex> {
        let sparse = self.sparse.lock().unwrap();
        let fine = self.fine.read().unwrap();
        let mut cards = Vec::new();
        for (from, entries) in sparse.iter() {
            let first = self.config.first_card_of(*from);
            let mut offsets = entries.clone();
            offsets.sort_unstable();
            cards.extend(offsets.into_iter().map(|o| first.offset(o as usize)));
        }
        for (from, prt) in fine.iter() {
            let first = self.config.first_card_of(*from);
            cards.extend(prt.cards.iter_set().map(|o| first.offset(o)));
        }
        for region in self.coarse.iter_set() {
            let first = self.config.first_card_of(RegionIndex::new(region));
            cards.extend((0..self.config.cards_per_region()).map(|o| first.offset(o)));
        }
        cards
    }

    /// An iterator over a snapshot of the current entries. Entries added later are not
    /// visited.
    pub fn init_iterator(&self) -> RSetIterator {
        RSetIterator {
            cards: self.collect_entries().into(),
            pos: 0,
        }
    }

    /// The snapshot shared by all workers scanning this set in the current pause.
    pub fn par_iteration_snapshot(&self) -> Arc<[CardIndex]> {
        let mut snapshot = self.par_snapshot.lock().unwrap();
        snapshot
            .get_or_insert_with(|| self.collect_entries().into())
            .clone()
    }

    /// Claim this set for scanning. Returns true if this call claimed it.
    pub fn claim_iter(&self) -> bool {
        self.iter_state
            .compare_exchange(
                IterState::Unclaimed,
                IterState::Claimed,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    pub fn set_iter_complete(&self) {
        self.iter_state.store(IterState::Complete, Ordering::Release);
    }

    pub fn iter_is_complete(&self) -> bool {
        self.iter_state.load(Ordering::Acquire) == IterState::Complete
    }

    pub fn iter_state(&self) -> IterState {
        self.iter_state.load(Ordering::Acquire)
    }

    /// Claim the next `block_size` entries. Returns the index of the first claimed entry
    /// in the iteration order.
    pub fn iter_claimed_next(&self, block_size: usize) -> usize {
        self.iter_claimed.fetch_add(block_size, Ordering::AcqRel)
    }

    pub fn iter_claimed(&self) -> usize {
        self.iter_claimed.load(Ordering::Acquire)
    }

    /// Reset the claim state for the next pause.
    pub fn init_for_par_iteration(&self) {
        self.iter_state.store(IterState::Unclaimed, Ordering::Release);
        self.iter_claimed.store(0, Ordering::Release);
        *self.par_snapshot.lock().unwrap() = None;
    }
}

impl std::fmt::Debug for RememberedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (sparse, fine, coarse) = self.representation_counts();
        write!(
            f,
            "RememberedSet(owner={}, occupied={}, sparse={}, fine={}, coarse={})",
            self.owner,
            self.occupied(),
            sparse,
            fine,
            coarse
        )
    }
}

/// A restartable iterator over a remembered set snapshot.
pub struct RSetIterator {
    cards: Arc<[CardIndex]>,
    pos: usize,
}

impl RSetIterator {
    /// Store the next entry in `card` and return true, or return false at the end.
    pub fn has_next(&mut self, card: &mut CardIndex) -> bool {
        match self.next() {
            Some(c) => {
                *card = c;
                true
            }
            None => false,
        }
    }

    /// Start again from the first entry.
    pub fn restart(&mut self) {
        self.pos = 0;
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

impl Iterator for RSetIterator {
    type Item = CardIndex;

    fn next(&mut self) -> Option<CardIndex> {
        let card = self.cards.get(self.pos).copied();
        if card.is_some() {
            self.pos += 1;
        }
        card
    }
}
