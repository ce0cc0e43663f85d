use super::mock_test_prelude::*;

fn heap_without_cache() -> std::sync::Arc<HeapCore<MockVM>> {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    mock_heap(options, 16)
}

#[test]
pub fn refine_cross_region_store() {
    let heap = heap_without_cache();
    let regions = old_regions(&heap, 10);
    let from = heap.regions().get(regions[5]);
    let to = heap.regions().get(regions[9]);
    let slot = from.bottom() + 1000 * heap.card_table().card_size();
    let card = heap.card_table().card_index_for(slot);

    let mut mutator = G1Mutator::new(heap.clone());
    write(&mut mutator, slot, object_at(to, 3));
    assert!(heap.card_table().is_dirty(card));
    assert_eq!(mutator.pending_cards(), 1);
    mutator.flush();
    assert_eq!(mutator.pending_cards(), 0);

    refine_all(&heap);

    assert!(heap.card_table().is_clean(card));
    assert_eq!(to.rem_set().occupied(), 1);
    assert!(to.rem_set().contains_reference(card));
    let mut iter = to.rem_set().init_iterator();
    let mut entry = CardIndex::new(0);
    assert!(iter.has_next(&mut entry));
    assert_eq!(entry, card);
    assert_eq!(
        heap.regions().region_for_card(entry).unwrap().index(),
        regions[5]
    );
    assert!(!iter.has_next(&mut entry));
    assert_eq!(heap.rem_set().conc_refined_cards(), 1);
    assert!(heap.rem_set().verify(&heap).is_ok());
    heap.verify_remembered_sets();
    heap.stop();
}

#[test]
pub fn stores_that_need_no_entry() {
    let heap = heap_without_cache();
    let regions = old_regions(&heap, 2);
    let old = heap.regions().get(regions[0]);
    let other = heap.regions().get(regions[1]);
    let young = heap.regions().allocate_region(RegionState::Eden).unwrap();
    young.allocate(OBJECT_BYTES * 4).unwrap();

    let mut mutator = G1Mutator::new(heap.clone());
    // Within a region.
    write(&mut mutator, old.bottom(), object_at(old, 7));
    // Null.
    write(&mut mutator, old.bottom() + 8usize, ObjectReference::NULL);
    // From a young region.
    write(&mut mutator, young.bottom(), object_at(other, 0));
    // Outside of the heap.
    write(&mut mutator, HEAP_START - 4096usize, object_at(other, 0));

    assert_eq!(mutator.pending_cards(), 0);
    assert_eq!(heap.card_table().count_dirty(), 0);
    heap.stop();
}

#[test]
pub fn repeated_stores_log_a_card_once() {
    let heap = heap_without_cache();
    let regions = old_regions(&heap, 2);
    let from = heap.regions().get(regions[0]);
    let to = heap.regions().get(regions[1]);

    let mut mutator = G1Mutator::new(heap.clone());
    for i in 0..10 {
        write(&mut mutator, from.bottom() + (i % 4) * 8, object_at(to, i));
    }
    assert_eq!(mutator.pending_cards(), 1);
    assert_eq!(heap.card_table().count_dirty(), 1);

    // A thread without a mutator goes through the shared queue.
    let slot = from.bottom() + heap.card_table().card_size();
    heap.vm().store(slot, object_at(to, 0));
    heap.object_reference_write_post_shared(slot, object_at(to, 0));
    assert_eq!(heap.dirty_card_queue_set().shared_queue_len(), 1);

    drop(mutator);
    refine_all(&heap);
    assert_eq!(to.rem_set().occupied(), 2);
    assert_eq!(heap.card_table().count_dirty(), 0);
    heap.stop();
}

#[test]
pub fn invalidate_dirties_covered_cards() {
    let heap = heap_without_cache();
    let regions = old_regions(&heap, 1);
    let old = heap.regions().get(regions[0]);
    let young = heap.regions().allocate_region(RegionState::Eden).unwrap();
    let card_size = heap.card_table().card_size();

    let mut mutator = G1Mutator::new(heap.clone());
    mutator.invalidate(old.bottom() + 8usize..old.bottom() + (2 * card_size + 8));
    assert_eq!(mutator.pending_cards(), 3);
    mutator.invalidate(young.bottom()..young.bottom() + card_size);
    mutator.invalidate(old.bottom()..old.bottom());
    assert_eq!(mutator.pending_cards(), 3);
    assert_eq!(heap.card_table().count_dirty(), 3);
    heap.stop();
}

#[test]
pub fn summary_counts_entries() {
    let heap = heap_without_cache();
    let regions = old_regions(&heap, 3);
    let from = heap.regions().get(regions[0]);
    let card_size = heap.card_table().card_size();

    let mut mutator = G1Mutator::new(heap.clone());
    for i in 0..3 {
        write(
            &mut mutator,
            from.bottom() + i * card_size,
            object_at(heap.regions().get(regions[1]), 0),
        );
    }
    write(
        &mut mutator,
        from.bottom() + 8usize,
        object_at(heap.regions().get(regions[2]), 0),
    );
    mutator.flush();
    refine_all(&heap);

    let summary = heap.rem_set().summary(&heap);
    assert_eq!(summary.rs_occupied, 4);
    assert_eq!(summary.max_rs_occupied, 3);
    assert_eq!(summary.max_rs_region, Some(regions[1]));
    assert_eq!(summary.conc_refined_cards, 3);
    assert!(summary.to_string().contains("Concurrent RS processed 3 cards"));
    heap.print_summary_info();
    heap.stop();
}
