use super::card::{CardIndex, RegionIndex};
use super::remset::{RemSetConfig, RememberedSet};
use crate::util::Address;
use atomic::Atomic;
use bytemuck::NoUninit;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit, strum_macros::IntoStaticStr)]
pub enum RegionState {
    Free,
    Eden,
    Survivor,
    Old,
    HumongousStart,
    HumongousCont,
}

impl RegionState {
    pub fn is_young(self) -> bool {
        matches!(self, RegionState::Eden | RegionState::Survivor)
    }

    pub fn is_humongous(self) -> bool {
        matches!(self, RegionState::HumongousStart | RegionState::HumongousCont)
    }
}

/// A fixed-size chunk of the heap, and the unit of collection.
///
/// Regions are created once, when the [`super::RegionTable`] is built for the maximum heap,
/// and are recycled through the free state. Each region owns exactly one remembered set,
/// which is cleared when the region is freed.
pub struct Region {
    index: RegionIndex,
    bottom: Address,
    end: Address,
    /// Bump pointer. Everything below `top` is parsable by the VM.
    top: AtomicUsize,
    state: Atomic<RegionState>,
    in_cset: AtomicBool,
    /// Whether the region is on the list of regions with cards claimed in this pause.
    on_dirty_cards_list: AtomicBool,
    /// Next top at mark start. Objects above it are allocated during marking and are
    /// implicitly live.
    ntams: AtomicUsize,
    /// Claim value for parallel region iteration.
    claim_value: AtomicUsize,
    rem_set: RememberedSet,
}

impl Region {
    pub(crate) fn new(
        index: RegionIndex,
        bottom: Address,
        bytes: usize,
        config: RemSetConfig,
    ) -> Self {
        Self {
            index,
            bottom,
            end: bottom + bytes,
            top: AtomicUsize::new(bottom.as_usize()),
            state: Atomic::new(RegionState::Free),
            in_cset: AtomicBool::new(false),
            on_dirty_cards_list: AtomicBool::new(false),
            ntams: AtomicUsize::new(bottom.as_usize()),
            claim_value: AtomicUsize::new(0),
            rem_set: RememberedSet::new(index, config),
        }
    }

    pub fn index(&self) -> RegionIndex {
        self.index
    }

    pub fn bottom(&self) -> Address {
        self.bottom
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn top(&self) -> Address {
        Address::from_usize(self.top.load(Ordering::Acquire))
    }

    pub fn used(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.bottom <= addr && addr < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// Bump-allocate `bytes` in this region. Safe to call from multiple threads.
    pub fn allocate(&self, bytes: usize) -> Option<Address> {
        let mut old = self.top.load(Ordering::Relaxed);
        loop {
            let new = old + bytes;
            if new > self.end.as_usize() {
                return None;
            }
            match self
                .top
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(Address::from_usize(old)),
                Err(x) => old = x,
            }
        }
    }

    pub(crate) fn set_top(&self, top: Address) {
        debug_assert!(self.bottom <= top && top <= self.end);
        self.top.store(top.as_usize(), Ordering::Release);
    }

    pub fn state(&self) -> RegionState {
        self.state.load(Ordering::Acquire)
    }

    pub fn set_state(&self, state: RegionState) {
        self.state.store(state, Ordering::Release);
    }

    pub fn is_free(&self) -> bool {
        self.state() == RegionState::Free
    }

    pub fn is_young(&self) -> bool {
        self.state().is_young()
    }

    pub fn is_humongous(&self) -> bool {
        self.state().is_humongous()
    }

    pub fn continues_humongous(&self) -> bool {
        self.state() == RegionState::HumongousCont
    }

    pub fn in_collection_set(&self) -> bool {
        self.in_cset.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_collection_set(&self, value: bool) {
        self.in_cset.store(value, Ordering::Release);
    }

    pub fn rem_set(&self) -> &RememberedSet {
        &self.rem_set
    }

    pub fn next_top_at_mark_start(&self) -> Address {
        Address::from_usize(self.ntams.load(Ordering::Acquire))
    }

    /// Record the current top as the next top at mark start. Called at initial mark.
    pub fn note_start_of_marking(&self) {
        self.ntams
            .store(self.top.load(Ordering::Acquire), Ordering::Release);
    }

    /// Everything allocated since `note_start_of_marking` is above NTAMS.
    pub fn obj_allocated_since_next_marking(&self, addr: Address) -> bool {
        addr >= self.next_top_at_mark_start()
    }

    pub fn claim_value(&self) -> usize {
        self.claim_value.load(Ordering::Relaxed)
    }

    /// Claim this region for an iteration identified by `value`. Returns true if this
    /// call claimed it.
    pub fn claim(&self, value: usize) -> bool {
        let current = self.claim_value.load(Ordering::Relaxed);
        current != value
            && self
                .claim_value
                .compare_exchange(current, value, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    pub(crate) fn reset_claim_value(&self) {
        self.claim_value.store(0, Ordering::Relaxed);
    }

    /// Returns true if this call put the region on the dirty cards region list.
    pub(crate) fn try_mark_on_dirty_cards_list(&self) -> bool {
        !self.on_dirty_cards_list.load(Ordering::Relaxed)
            && self
                .on_dirty_cards_list
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    pub(crate) fn clear_on_dirty_cards_list(&self) {
        self.on_dirty_cards_list.store(false, Ordering::Release);
    }

    /// Cards covering `bottom..end`.
    pub fn card_range(&self) -> Range<CardIndex> {
        let first = self.rem_set.owner_first_card();
        first..first.offset(self.rem_set.config().cards_per_region())
    }

    /// Return the region to the free state. The remembered set is emptied.
    pub(crate) fn release(&self) {
        self.set_state(RegionState::Free);
        self.set_in_collection_set(false);
        self.top.store(self.bottom.as_usize(), Ordering::Release);
        self.ntams.store(self.bottom.as_usize(), Ordering::Release);
        self.rem_set.clear();
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let state: &'static str = self.state().into();
        write!(
            f,
            "Region({}, {}..{}, top={}, {}{})",
            self.index,
            self.bottom,
            self.end,
            self.top(),
            state,
            if self.in_collection_set() { ", cset" } else { "" }
        )
    }
}
