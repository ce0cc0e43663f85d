use super::mock_test_prelude::*;
use std::collections::BTreeSet;

const SOURCES: usize = 6;
const CARDS_PER_SOURCE: usize = 24;

#[test]
pub fn scan_rs_visits_each_reference_once() {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    let heap = mock_heap(options, 8);
    let regions = old_regions(&heap, 8);
    let cset = [regions[6], regions[7]];
    let card_size = heap.card_table().card_size();

    let mut mutator = G1Mutator::new(heap.clone());
    let mut expected = vec![];
    let mut refined_cards = BTreeSet::new();
    let mut logged_cards = BTreeSet::new();
    for (s, source) in regions[..SOURCES].iter().enumerate() {
        let bottom = heap.regions().get(*source).bottom();
        for c in 0..CARDS_PER_SOURCE {
            let card_start = bottom + (c * 3) * card_size;
            let card = heap.card_table().card_index_for(card_start);
            // Every fourth card is stored to without a barrier, and only logged when the
            // pause starts.
            let logged = c % 4 == 3;
            // Two slots per card, into either collection set region.
            for k in 0..2 {
                let slot = card_start + k * 64;
                let target = object_at(heap.regions().get(cset[(s + c + k) % 2]), c);
                if logged {
                    heap.vm().store(slot, target);
                } else {
                    write(&mut mutator, slot, target);
                }
                expected.push(slot);
            }
            if logged {
                logged_cards.insert(card);
            } else {
                refined_cards.insert(card);
            }
        }
    }
    mutator.flush();
    refine_all(&heap);
    for card in logged_cards.iter() {
        assert!(heap.card_table().is_clean(*card));
        heap.card_table().dirty_card(*card);
        heap.dirty_card_queue_set().enqueue_shared(*card);
    }
    for r in cset {
        heap.regions().add_to_collection_set(r);
    }

    let mut slots = evacuation_pause(&heap, 2, false);
    slots.sort();
    let n = slots.len();
    slots.dedup();
    assert_eq!(slots.len(), n, "a reference was handed out twice");
    expected.sort();
    assert_eq!(slots, expected);
    assert_eq!(heap.rem_set().total_cards_scanned(), refined_cards.len());

    for card in refined_cards.iter().chain(logged_cards.iter()) {
        assert!(heap.card_table().is_clean(*card));
        assert!(!heap.card_table().is_card_claimed(*card));
    }
    for r in heap.regions().clear_collection_set() {
        heap.regions().free_region(r);
    }
    assert!(heap.rem_set().verify(&heap).is_ok());
    heap.stop();
}

#[test]
pub fn parallel_scan_with_coarsened_sets() {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    // One fine table per set: a third source region coarsens.
    options.rset_region_entries_base = 1;
    options.rset_sparse_region_entries_base = 1;
    options.rset_scan_block_size = 3;
    let heap = mock_heap(options, 5);
    let regions = old_regions(&heap, 5);
    let target = heap.regions().get(regions[4]);
    let card_size = heap.card_table().card_size();

    let mut mutator = G1Mutator::new(heap.clone());
    let mut expected = vec![];
    for source in regions[..3].iter() {
        let bottom = heap.regions().get(*source).bottom();
        for c in 0..10 {
            let slot = bottom + c * 5 * card_size;
            write(&mut mutator, slot, object_at(target, c));
            expected.push(slot);
        }
    }
    mutator.flush();
    refine_all(&heap);
    assert!(target.rem_set().n_coarsenings() > 0);

    heap.regions().add_to_collection_set(target.index());
    let mut slots = evacuation_pause(&heap, 2, false);
    slots.sort();
    expected.sort();
    assert_eq!(slots, expected);
    heap.regions().clear_collection_set();
    heap.stop();
}
