use std::sync::Arc;

use super::dirty_card_queue::DirtyCardQueue;
use super::satb_queue::ObjPtrQueue;
use crate::policy::region::CardIndex;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;
use crate::HeapCore;

/// The per-thread state of a mutator: its dirty card log and its SATB log.
///
/// The binding calls the write barrier methods around every reference store to the heap.
/// Before a pause that calls
/// [`G1RemSet::prepare_for_oops_into_collection_set_do`](super::g1remset::G1RemSet::prepare_for_oops_into_collection_set_do),
/// and before the remark pause, every mutator must be flushed.
pub struct G1Mutator<VM: VMBinding> {
    heap: Arc<HeapCore<VM>>,
    dirty_card_queue: DirtyCardQueue,
    satb_queue: ObjPtrQueue,
}

impl<VM: VMBinding> G1Mutator<VM> {
    pub fn new(heap: Arc<HeapCore<VM>>) -> Self {
        Self {
            heap,
            dirty_card_queue: DirtyCardQueue::new(),
            satb_queue: ObjPtrQueue::new(),
        }
    }

    pub fn heap(&self) -> &HeapCore<VM> {
        &self.heap
    }

    /// Store `new` into `slot`, which holds `old`, with both barriers. `store` performs the
    /// actual write.
    #[inline(always)]
    pub fn object_reference_write(
        &mut self,
        slot: Address,
        old: ObjectReference,
        new: ObjectReference,
        store: impl FnOnce(),
    ) {
        self.object_reference_write_pre(old);
        store();
        self.object_reference_write_post(slot, new);
    }

    /// The SATB barrier: while marking is active, log the value being overwritten.
    #[inline(always)]
    pub fn object_reference_write_pre(&mut self, old: ObjectReference) {
        let satb = self.heap.satb_queue_set();
        if old.is_null() || !satb.is_active() {
            return;
        }
        self.satb_enqueue_slow(old);
    }

    #[cold]
    fn satb_enqueue_slow(&mut self, old: ObjectReference) {
        let heap = &*self.heap;
        self.satb_queue
            .enqueue(old, heap.satb_queue_set(), |o| heap.satb_needs_marking(o));
    }

    /// The card marking barrier: log the card of `slot` if the store created a reference
    /// between two regions.
    #[inline(always)]
    pub fn object_reference_write_post(&mut self, slot: Address, new: ObjectReference) {
        let Some(card) = self.heap.card_to_log(slot, new) else {
            return;
        };
        if self.heap.card_table().mark_dirty(card) {
            self.log_card_slow(card);
        }
    }

    #[cold]
    fn log_card_slow(&mut self, card: CardIndex) {
        let heap = &*self.heap;
        let mut refine = |card: CardIndex, worker: usize| {
            heap.rem_set().refine_card(heap, card, worker, false);
            true
        };
        self.dirty_card_queue
            .enqueue(card, heap.dirty_card_queue_set(), &mut refine);
    }

    /// Dirty and log every card overlapping `range`, for bulk stores the barrier did not see,
    /// such as array copies.
    pub fn invalidate(&mut self, range: std::ops::Range<Address>) {
        if range.start >= range.end {
            return;
        }
        let heap = self.heap.clone();
        let card_table = heap.card_table();
        let first = card_table.card_index_for(range.start);
        let last = card_table.card_index_for(range.end - 1usize);
        for i in first.as_usize()..=last.as_usize() {
            let card = CardIndex::new(i);
            let young = heap
                .regions()
                .region_for_card(card)
                .map_or(true, |r| r.is_young());
            if !young && card_table.mark_dirty(card) {
                self.log_card_slow(card);
            }
        }
    }

    /// Hand both partially filled logs to their queue sets.
    pub fn flush(&mut self) {
        self.dirty_card_queue
            .flush(self.heap.dirty_card_queue_set());
        self.satb_queue.flush(self.heap.satb_queue_set());
    }

    /// Cards logged by this mutator and not flushed yet.
    pub fn pending_cards(&self) -> usize {
        self.dirty_card_queue.len()
    }
}

impl<VM: VMBinding> Drop for G1Mutator<VM> {
    fn drop(&mut self) {
        self.flush();
    }
}
