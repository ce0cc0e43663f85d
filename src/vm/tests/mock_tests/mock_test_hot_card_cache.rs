use super::mock_test_prelude::*;

// 16 regions of 2048 cards, and a cache of a quarter of that: cards four regions apart share
// a slot.
const REGIONS: usize = 16;
const CARDS_APART: usize = 4 * 2048;

#[test]
pub fn evicted_cards_are_refined() {
    let heap = mock_heap(test_options(), REGIONS);
    let regions = old_regions(&heap, REGIONS);
    let cache = heap.hot_card_cache();
    assert!(cache.use_cache());
    assert_eq!(cache.size(), CARDS_APART);

    let target = heap.regions().get(regions[2]);
    let first = heap.regions().get(regions[1]).card_range().start.offset(10);
    let colliding: Vec<CardIndex> = (0..4).map(|i| first.offset(i * CARDS_APART)).collect();
    for card in colliding.iter() {
        let slot = heap.card_table().addr_for(*card);
        heap.vm().store(slot, object_at(target, 0));
        heap.card_table().dirty_card(*card);
    }

    // The first card is deferred.
    heap.rem_set().refine_card(&heap, colliding[0], 0, false);
    assert!(cache.contains(colliding[0]));
    assert!(heap.card_table().is_dirty(colliding[0]));
    assert_eq!(target.rem_set().occupied(), 0);

    // Every later card evicts exactly the previous one, which gets refined.
    for i in 1..colliding.len() {
        heap.rem_set().refine_card(&heap, colliding[i], 0, false);
        assert!(cache.contains(colliding[i]));
        assert!(!cache.contains(colliding[i - 1]));
        assert!(heap.card_table().is_clean(colliding[i - 1]));
        assert!(target.rem_set().contains_reference(colliding[i - 1]));
        assert!(!target.rem_set().contains_reference(colliding[i]));
    }
    assert_eq!(cache.stats().evictions, colliding.len() - 1);
    assert_eq!(cache.cached_cards(), 1);

    // A deferred card is not missing from the remembered sets as far as verification goes.
    assert!(heap.rem_set().verify(&heap).is_ok());

    // The pause drains the cache.
    let slots = evacuation_pause(&heap, 1, false);
    assert!(slots.is_empty());
    assert_eq!(cache.cached_cards(), 0);
    assert!(cache.use_cache());
    for card in colliding.iter() {
        assert!(target.rem_set().contains_reference(*card));
        assert!(heap.card_table().is_clean(*card));
    }
    heap.stop();
}

#[test]
pub fn repeated_cards_stay_cached() {
    let heap = mock_heap(test_options(), 4);
    let regions = old_regions(&heap, 2);
    let cache = heap.hot_card_cache();
    let target = heap.regions().get(regions[1]);
    let card = heap.regions().get(regions[0]).card_range().start;
    heap.vm()
        .store(heap.card_table().addr_for(card), object_at(target, 0));

    for _ in 0..3 {
        heap.card_table().dirty_card(card);
        heap.rem_set().refine_card(&heap, card, 0, false);
    }
    assert!(cache.contains(card));
    assert_eq!(cache.count(card), 3);
    assert_eq!(cache.stats().hits, 2);
    assert_eq!(target.rem_set().occupied(), 0);
    heap.stop();
}

#[test]
pub fn disabled_cache_refines_immediately() {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    let heap = mock_heap(options, 4);
    let regions = old_regions(&heap, 2);
    let target = heap.regions().get(regions[1]);
    let card = heap.regions().get(regions[0]).card_range().start;
    heap.vm()
        .store(heap.card_table().addr_for(card), object_at(target, 0));
    heap.card_table().dirty_card(card);

    heap.rem_set().refine_card(&heap, card, 0, false);
    assert!(!heap.hot_card_cache().contains(card));
    assert!(target.rem_set().contains_reference(card));
    heap.stop();
}
