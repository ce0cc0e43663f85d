use super::card::CardIndex;
use crate::util::Address;
use std::ops::Range;
use std::sync::atomic::{fence, AtomicU8, Ordering};

/// The card has not been written since it was last refined.
pub const CLEAN_CARD: u8 = 0;
/// The card was written by a mutator and is waiting for refinement.
pub const DIRTY_CARD: u8 = 1;
/// Set on a card that a pause has already scanned. Cleared at the end of the pause.
pub const CLAIMED_CARD: u8 = 1 << 1;

/// One byte per card for the whole reserved heap.
///
/// The table is allocated once for the maximum heap and never shrinks. Every entry is an
/// `AtomicU8`, and all writes are single byte stores: racing writers of the same value are
/// harmless because dirtying is idempotent.
pub struct CardTable {
    heap_start: Address,
    log_card_size: usize,
    table: Box<[AtomicU8]>,
}

impl CardTable {
    pub fn new(heap_start: Address, heap_bytes: usize, card_size: usize) -> Self {
        assert!(card_size.is_power_of_two());
        assert!(heap_start.is_aligned_to(card_size));
        let num_cards = heap_bytes.div_ceil(card_size);
        Self {
            heap_start,
            log_card_size: card_size.trailing_zeros() as usize,
            table: (0..num_cards).map(|_| AtomicU8::new(CLEAN_CARD)).collect(),
        }
    }

    pub fn card_size(&self) -> usize {
        1 << self.log_card_size
    }

    pub fn log_card_size(&self) -> usize {
        self.log_card_size
    }

    pub fn num_cards(&self) -> usize {
        self.table.len()
    }

    pub fn covers(&self, addr: Address) -> bool {
        addr >= self.heap_start && ((addr - self.heap_start) >> self.log_card_size) < self.num_cards()
    }

    /// The card containing `addr`. `addr` must be in the heap.
    pub fn card_index_for(&self, addr: Address) -> CardIndex {
        debug_assert!(self.covers(addr), "{} is not covered by the card table", addr);
        CardIndex::new((addr - self.heap_start) >> self.log_card_size)
    }

    /// The card containing `addr`, or `None` if the card table does not cover it.
    pub fn try_card_index_for(&self, addr: Address) -> Option<CardIndex> {
        self.covers(addr).then(|| self.card_index_for(addr))
    }

    /// The first address of a card.
    pub fn addr_for(&self, card: CardIndex) -> Address {
        debug_assert!(card.as_usize() < self.num_cards());
        self.heap_start + (card.as_usize() << self.log_card_size)
    }

    /// The address range covered by a card.
    pub fn card_range(&self, card: CardIndex) -> Range<Address> {
        let start = self.addr_for(card);
        start..start + self.card_size()
    }

    fn entry(&self, card: CardIndex) -> &AtomicU8 {
        &self.table[card.as_usize()]
    }

    /// Dirty the card containing `addr`.
    pub fn dirty(&self, addr: Address) {
        self.dirty_card(self.card_index_for(addr))
    }

    pub fn dirty_card(&self, card: CardIndex) {
        self.entry(card).store(DIRTY_CARD, Ordering::Relaxed);
    }

    /// Dirty a card. Returns false if it was already dirty, in which case the caller does not
    /// need to log it again. Of several threads racing to dirty a clean card, exactly one
    /// gets true.
    pub fn mark_dirty(&self, card: CardIndex) -> bool {
        let entry = self.entry(card);
        if entry.load(Ordering::Relaxed) == DIRTY_CARD {
            return false;
        }
        entry.swap(DIRTY_CARD, Ordering::Relaxed) != DIRTY_CARD
    }

    pub fn is_dirty(&self, card: CardIndex) -> bool {
        self.entry(card).load(Ordering::Relaxed) == DIRTY_CARD
    }

    pub fn is_clean(&self, card: CardIndex) -> bool {
        self.entry(card).load(Ordering::Relaxed) == CLEAN_CARD
    }

    pub fn clean(&self, card: CardIndex) {
        self.entry(card).store(CLEAN_CARD, Ordering::Relaxed);
    }

    /// Clean a card before scanning it. A mutator store that races with the scan must either
    /// be seen by the scan, or re-dirty the card after it has been cleaned.
    pub fn clean_for_refinement(&self, card: CardIndex) {
        self.entry(card).store(CLEAN_CARD, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    pub fn is_card_claimed(&self, card: CardIndex) -> bool {
        self.entry(card).load(Ordering::Relaxed) & CLAIMED_CARD != 0
    }

    pub fn set_card_claimed(&self, card: CardIndex) {
        self.entry(card).fetch_or(CLAIMED_CARD, Ordering::Relaxed);
    }

    /// Claim a card for scanning. Returns true if this thread claimed it. Dirty cards are
    /// never claimed: they are left for refinement.
    pub fn try_claim_card(&self, card: CardIndex) -> bool {
        let entry = self.entry(card);
        let mut old = entry.load(Ordering::Relaxed);
        loop {
            if old == DIRTY_CARD || old & CLAIMED_CARD != 0 {
                return false;
            }
            match entry.compare_exchange_weak(
                old,
                old | CLAIMED_CARD,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(v) => old = v,
            }
        }
    }

    /// Reset claimed cards in `cards` to clean. Returns the number of cards reset.
    pub fn clean_claimed_in_range(&self, cards: Range<CardIndex>) -> usize {
        let mut n = 0;
        for i in cards.start.as_usize()..cards.end.as_usize() {
            let entry = &self.table[i];
            if entry.load(Ordering::Relaxed) & CLAIMED_CARD != 0 {
                entry.store(CLEAN_CARD, Ordering::Relaxed);
                n += 1;
            }
        }
        n
    }

    /// Reset every card in `cards` to clean.
    pub fn clear_range(&self, cards: Range<CardIndex>) {
        for i in cards.start.as_usize()..cards.end.as_usize() {
            self.table[i].store(CLEAN_CARD, Ordering::Relaxed);
        }
    }

    pub fn count_dirty(&self) -> usize {
        self.table
            .iter()
            .filter(|e| e.load(Ordering::Relaxed) == DIRTY_CARD)
            .count()
    }

    /// Panics unless no card in `cards` is claimed.
    pub fn assert_no_claimed_cards(&self, cards: Range<CardIndex>) {
        for i in cards.start.as_usize()..cards.end.as_usize() {
            assert!(
                self.table[i].load(Ordering::Relaxed) & CLAIMED_CARD == 0,
                "card {} is still claimed",
                i
            );
        }
    }
}
