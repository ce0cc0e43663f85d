//! The hot card cache defers the refinement of cards that are dirtied over and over again.
//!
//! The cache is a hash table indexed by card. A card inserted into an empty slot is deferred.
//! Inserting a card that is already cached only bumps its count. Inserting a card into a slot
//! taken by another card evicts the old one, which the caller must refine now. All cards still
//! in the cache are drained and refined during the next pause.
//!
//! Each slot stores the card together with the epoch it was inserted in, packed in one `u64`,
//! so that the whole cache is invalidated at once by bumping the epoch.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::policy::region::CardIndex;
use crate::util::log;
use crate::util::SynchronizedCounter;

/// Table sizes. Each is a prime about twice the previous one.
const CACHE_SIZES: [usize; 14] = [
    16381, 32771, 76831, 150001, 307261, 614563, 1228891, 2457733, 4915219, 9830479, 19660831,
    39321619, 78643219, 157286461,
];

const EMPTY_SLOT: u64 = 0;

fn pack(card: CardIndex, epoch: u32) -> u64 {
    ((card.as_usize() as u64) << 32) | epoch as u64
}

fn unpack(entry: u64) -> (CardIndex, u32) {
    (CardIndex::new((entry >> 32) as usize), entry as u32)
}

/// Hit count in the low byte, eviction count in the high byte.
fn pack_counts(count: u8, evictions: u8) -> u16 {
    count as u16 | (evictions as u16) << 8
}

fn unpack_counts(counts: u16) -> (u8, u8) {
    (counts as u8, (counts >> 8) as u8)
}

struct CacheTable {
    entries: Box<[AtomicU64]>,
    counts: Box<[AtomicU16]>,
}

impl CacheTable {
    fn try_new(size: usize) -> Result<Self, std::collections::TryReserveError> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(size)?;
        let mut counts = Vec::new();
        counts.try_reserve_exact(size)?;
        entries.extend((0..size).map(|_| AtomicU64::new(EMPTY_SLOT)));
        counts.extend((0..size).map(|_| AtomicU16::new(0)));
        Ok(Self {
            entries: entries.into_boxed_slice(),
            counts: counts.into_boxed_slice(),
        })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn slot(&self, card: CardIndex) -> usize {
        card.as_usize() % self.len()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HotCardCacheStats {
    pub size: usize,
    pub inserts: usize,
    pub hits: usize,
    pub evictions: usize,
    pub periods: usize,
    pub expansions: usize,
}

pub struct HotCardCache {
    /// Whether the cache is used at all.
    enabled: bool,
    /// Turned off during pauses.
    use_cache: AtomicBool,
    /// Only resized by `clear_and_record_counts`, which runs while nothing else uses the
    /// cache.
    table: RwLock<CacheTable>,
    /// Index into `CACHE_SIZES` of the current table size.
    size_index: AtomicUsize,
    max_size: usize,
    epoch: AtomicU32,
    expand_threshold: u8,
    expand_requested: AtomicBool,
    /// Next slot to be claimed by `drain_par`.
    par_claim: AtomicUsize,
    par_chunk: AtomicUsize,
    inserts: SynchronizedCounter,
    hits: SynchronizedCounter,
    evictions: SynchronizedCounter,
    periods: SynchronizedCounter,
    expansions: SynchronizedCounter,
}

impl HotCardCache {
    /// A cache for a heap of `max_cards` cards. The cache never grows beyond
    /// `max_size_percent` of that.
    pub fn new(enabled: bool, max_cards: usize, max_size_percent: usize, expand_threshold: u8) -> Self {
        assert!(
            max_cards <= u32::MAX as usize,
            "card indices must fit in 32 bits"
        );
        let max_size = (max_cards * max_size_percent / 100).max(1);
        let size = CACHE_SIZES[0].min(max_size);
        let table = if enabled {
            CacheTable::try_new(size).unwrap_or_else(|e| {
                panic!("Failed to allocate the hot card cache of {} entries: {}", size, e)
            })
        } else {
            CacheTable {
                entries: Box::new([]),
                counts: Box::new([]),
            }
        };
        log::debug!(
            "Hot card cache: enabled={}, size={}, max size={}",
            enabled,
            table.len(),
            max_size
        );
        Self {
            enabled,
            use_cache: AtomicBool::new(enabled),
            table: RwLock::new(table),
            size_index: AtomicUsize::new(0),
            max_size,
            epoch: AtomicU32::new(1),
            expand_threshold,
            expand_requested: AtomicBool::new(false),
            par_claim: AtomicUsize::new(0),
            par_chunk: AtomicUsize::new(1),
            inserts: SynchronizedCounter::new(0),
            hits: SynchronizedCounter::new(0),
            evictions: SynchronizedCounter::new(0),
            periods: SynchronizedCounter::new(0),
            expansions: SynchronizedCounter::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache.load(Ordering::Acquire)
    }

    pub fn set_use_cache(&self, value: bool) {
        self.use_cache
            .store(self.enabled && value, Ordering::Release);
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.table.read().unwrap().len()
    }

    /// Offer `card` to the cache. Returns the card the caller must refine now, if any: the
    /// card itself if the cache is off, a card evicted to make room for it, or `None` if
    /// `card` has been deferred.
    pub fn insert(&self, card: CardIndex) -> Option<CardIndex> {
        if !self.use_cache() {
            return Some(card);
        }
        let table = self.table.read().unwrap();
        let epoch = self.epoch.load(Ordering::Acquire);
        let slot = table.slot(card);
        let entry = &table.entries[slot];
        let new_entry = pack(card, epoch);
        self.inserts.increment();
        let mut old = entry.load(Ordering::Acquire);
        loop {
            let (old_card, old_epoch) = unpack(old);
            if old_epoch != epoch {
                // Empty, or left over from an earlier period.
                match entry.compare_exchange(old, new_entry, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        table.counts[slot].store(pack_counts(1, 0), Ordering::Relaxed);
                        return None;
                    }
                    Err(x) => old = x,
                }
            } else if old_card == card {
                self.hits.increment();
                let _ = table.counts[slot].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                    let (count, evictions) = unpack_counts(c);
                    Some(pack_counts(count.saturating_add(1), evictions))
                });
                return None;
            } else {
                match entry.compare_exchange(old, new_entry, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        self.record_eviction(&table, slot);
                        log::trace!("Hot card cache: {:?} evicts {:?}", card, old_card);
                        return Some(old_card);
                    }
                    Err(x) => old = x,
                }
            }
        }
    }

    fn record_eviction(&self, table: &CacheTable, slot: usize) {
        self.evictions.increment();
        let mut evictions = 0;
        let _ = table.counts[slot].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
            let (_, e) = unpack_counts(c);
            evictions = e.saturating_add(1);
            Some(pack_counts(1, evictions))
        });
        if evictions > self.expand_threshold && !self.expand_requested.load(Ordering::Relaxed) {
            log::debug!("Hot card cache slot {} evicted {} cards, requesting expansion", slot, evictions);
            self.expand_requested.store(true, Ordering::Relaxed);
        }
    }

    /// Is `card` in the cache for the current period?
    pub fn contains(&self, card: CardIndex) -> bool {
        if !self.enabled {
            return false;
        }
        let table = self.table.read().unwrap();
        let epoch = self.epoch.load(Ordering::Acquire);
        table.entries[table.slot(card)].load(Ordering::Acquire) == pack(card, epoch)
    }

    /// Number of cards cached in the current period.
    pub fn cached_cards(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let table = self.table.read().unwrap();
        let epoch = self.epoch.load(Ordering::Acquire);
        table
            .entries
            .iter()
            .filter(|e| {
                let entry = e.load(Ordering::Relaxed);
                entry != EMPTY_SLOT && unpack(entry).1 == epoch
            })
            .count()
    }

    /// Prepare for `n_workers` workers to call `drain_par`.
    pub fn reset_par_claim(&self, n_workers: usize) {
        self.par_claim.store(0, Ordering::Relaxed);
        self.par_chunk
            .store((self.size() / n_workers.max(1)).max(1), Ordering::Relaxed);
    }

    /// Take cached cards out of the cache and hand them to `f`. Workers claim chunks of
    /// slots, so that every cached card is handed out exactly once.
    pub fn drain_par<F: FnMut(CardIndex)>(&self, mut f: F) {
        if !self.enabled {
            return;
        }
        let table = self.table.read().unwrap();
        let epoch = self.epoch.load(Ordering::Acquire);
        let chunk = self.par_chunk.load(Ordering::Relaxed);
        loop {
            let start = self.par_claim.fetch_add(chunk, Ordering::Relaxed);
            if start >= table.len() {
                break;
            }
            for slot in start..(start + chunk).min(table.len()) {
                let entry = table.entries[slot].swap(EMPTY_SLOT, Ordering::AcqRel);
                let (card, card_epoch) = unpack(entry);
                if entry != EMPTY_SLOT && card_epoch == epoch {
                    f(card);
                }
            }
        }
    }

    /// Called once per pause, after the cache has been drained: start a new period and grow
    /// the table if a slot asked for it. Returns the cards that were still cached, which the
    /// caller must get refined.
    pub fn clear_and_record_counts(&self) -> Vec<CardIndex> {
        if !self.enabled {
            return vec![];
        }
        let mut table = self.table.write().unwrap();
        let epoch = self.epoch.load(Ordering::Acquire);
        let leftover: Vec<CardIndex> = table
            .entries
            .iter()
            .filter_map(|e| {
                let entry = e.load(Ordering::Relaxed);
                let (card, card_epoch) = unpack(entry);
                (entry != EMPTY_SLOT && card_epoch == epoch).then_some(card)
            })
            .collect();

        self.periods.increment();
        let mut next_epoch = epoch.wrapping_add(1);
        if next_epoch == 0 {
            // Zero is the epoch of empty slots.
            next_epoch = 1;
            for e in table.entries.iter() {
                e.store(EMPTY_SLOT, Ordering::Relaxed);
            }
        }
        self.epoch.store(next_epoch, Ordering::Release);

        if self.expand_requested.swap(false, Ordering::Relaxed) {
            self.expand(&mut table);
        }
        leftover
    }

    fn expand(&self, table: &mut CacheTable) {
        let next_index = self.size_index.load(Ordering::Relaxed) + 1;
        let Some(&new_size) = CACHE_SIZES.get(next_index) else {
            return;
        };
        if new_size > self.max_size {
            log::debug!(
                "Hot card cache not expanded: {} entries would exceed the limit of {}",
                new_size,
                self.max_size
            );
            return;
        }
        match CacheTable::try_new(new_size) {
            Ok(new_table) => {
                log::debug!("Hot card cache expanded from {} to {} entries", table.len(), new_size);
                *table = new_table;
                self.size_index.store(next_index, Ordering::Relaxed);
                self.expansions.increment();
            }
            Err(e) => {
                log::warn!("Failed to expand the hot card cache to {} entries: {}", new_size, e);
            }
        }
    }

    /// The hit count of `card`, or 0 if it is not cached.
    pub fn count(&self, card: CardIndex) -> u8 {
        if !self.contains(card) {
            return 0;
        }
        let table = self.table.read().unwrap();
        unpack_counts(table.counts[table.slot(card)].load(Ordering::Relaxed)).0
    }

    pub fn stats(&self) -> HotCardCacheStats {
        HotCardCacheStats {
            size: self.size(),
            inserts: self.inserts.peek(),
            hits: self.hits.peek(),
            evictions: self.evictions.peek(),
            periods: self.periods.peek(),
            expansions: self.expansions.peek(),
        }
    }
}
