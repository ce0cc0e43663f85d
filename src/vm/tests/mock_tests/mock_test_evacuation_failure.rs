use super::mock_test_prelude::*;
use std::sync::Arc;

/// A heap with references from region 0 into region 3 on `cards` cards, logged but not
/// refined, and region 3 in the collection set.
fn pending_references_into_cset(deferred: bool, cards: usize) -> (Arc<HeapCore<MockVM>>, Vec<CardIndex>) {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    options.deferred_rs_update = deferred;
    let heap = mock_heap(options, 4);
    let regions = old_regions(&heap, 4);
    let from = heap.regions().get(regions[0]);
    let target = heap.regions().get(regions[3]);
    let card_size = heap.card_table().card_size();

    let logged = {
        let mut mutator = G1Mutator::new(heap.clone());
        for c in 0..cards {
            write(&mut mutator, from.bottom() + c * 2 * card_size, object_at(target, c));
        }
        (0..cards)
            .map(|c| heap.card_table().card_index_for(from.bottom() + c * 2 * card_size))
            .collect()
    };
    heap.regions().add_to_collection_set(target.index());
    (heap, logged)
}

#[test]
pub fn deferred_restore_after_failed_evacuation() {
    let (heap, cards) = pending_references_into_cset(true, 6);
    let target = heap.regions().get(heap.regions().collection_set()[0]);

    let slots = evacuation_pause(&heap, 2, true);
    assert_eq!(slots.len(), cards.len());
    assert!(heap.rem_set().evacuation_failed());
    for card in cards.iter() {
        assert!(heap.card_table().is_dirty(*card));
        assert!(!target.rem_set().contains_reference(*card));
    }
    assert!(heap.dirty_card_queue_set().completed_buffers_num() > 0);

    // The collection set region stays in place, and refinement restores its entries.
    heap.regions().clear_collection_set();
    refine_all(&heap);
    for card in cards.iter() {
        assert!(target.rem_set().contains_reference(*card));
    }
    assert!(heap.rem_set().verify(&heap).is_ok());
    heap.stop();
}

#[test]
pub fn immediate_restore_after_failed_evacuation() {
    let (heap, cards) = pending_references_into_cset(false, 6);
    let target = heap.regions().get(heap.regions().collection_set()[0]);

    let slots = evacuation_pause(&heap, 1, true);
    assert_eq!(slots.len(), cards.len());
    for card in cards.iter() {
        assert!(heap.card_table().is_clean(*card));
        assert!(target.rem_set().contains_reference(*card));
    }
    assert_eq!(heap.dirty_card_queue_set().completed_buffers_num(), 0);
    heap.regions().clear_collection_set();
    assert!(heap.rem_set().verify(&heap).is_ok());
    heap.stop();
}

#[test]
pub fn successful_evacuation_forgets_cset_cards() {
    let (heap, cards) = pending_references_into_cset(true, 3);
    let target_index = heap.regions().collection_set()[0];

    let slots = evacuation_pause(&heap, 2, false);
    assert_eq!(slots.len(), cards.len());
    assert!(!heap.rem_set().evacuation_failed());
    assert_eq!(heap.dirty_card_queue_set().completed_buffers_num(), 0);
    assert_eq!(heap.card_table().count_dirty(), 0);

    // The next pause starts from a clean slate.
    heap.regions().clear_collection_set();
    heap.regions().free_region(target_index);
    assert!(evacuation_pause(&heap, 2, false).is_empty());
    heap.stop();
}
