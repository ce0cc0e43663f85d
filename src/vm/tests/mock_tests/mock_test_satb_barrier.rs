use super::mock_test_prelude::*;

fn completed_entries(heap: &HeapCore<MockVM>) -> Vec<ObjectReference> {
    let mut entries = vec![];
    while heap
        .satb_queue_set()
        .apply_closure_to_completed_buffer(&mut |o| entries.push(o))
    {}
    entries
}

#[test]
pub fn satb_logs_overwritten_values_while_marking() {
    let heap = mock_heap(test_options(), 4);
    let regions = old_regions(&heap, 1);
    let old = heap.regions().get(regions[0]);
    let slot = old.bottom();
    let objects: Vec<ObjectReference> = (1..=8).map(|i| object_at(old, i)).collect();

    let mut mutator = G1Mutator::new(heap.clone());
    // Not marking: nothing is logged.
    write(&mut mutator, slot, objects[0]);
    write(&mut mutator, slot, objects[1]);
    mutator.flush();
    assert!(completed_entries(&heap).is_empty());

    old.note_start_of_marking();
    heap.satb_queue_set().set_active_all_threads(true, false);
    heap.vm().mark(objects[2]);
    heap.vm().mark(objects[4]);

    // Half of the first full buffer is already marked. What is left is too little to hand
    // over, so the buffer keeps filling.
    for o in &objects[2..6] {
        write(&mut mutator, slot, *o);
    }
    write(&mut mutator, slot, ObjectReference::NULL);
    assert_eq!(heap.satb_queue_set().completed_buffers_num(), 0);

    // Overwriting null logs nothing. The next store fills the buffer.
    write(&mut mutator, slot, objects[6]);
    write(&mut mutator, slot, objects[7]);
    assert_eq!(heap.satb_queue_set().completed_buffers_num(), 1);
    assert_eq!(
        completed_entries(&heap),
        vec![objects[1], objects[3], objects[5], objects[6]]
    );

    heap.satb_queue_set().set_active_all_threads(false, true);
    write(&mut mutator, slot, objects[0]);
    mutator.flush();
    assert!(completed_entries(&heap).is_empty());
    heap.stop();
}

#[test]
pub fn objects_allocated_during_marking_are_filtered() {
    let heap = mock_heap(test_options(), 4);
    let region = heap.regions().allocate_region(RegionState::Old).unwrap();
    let before = alloc_object(region);
    region.note_start_of_marking();
    heap.satb_queue_set().set_active_all_threads(true, false);
    let after = alloc_object(region);

    heap.object_reference_write_pre_shared(after);
    for _ in 0..3 {
        heap.object_reference_write_pre_shared(before);
    }
    assert_eq!(completed_entries(&heap), vec![before, before, before]);

    // Values outside the heap are never interesting.
    let outside = ObjectReference::from_raw_address(HEAP_START - 64usize);
    for _ in 0..4 {
        heap.object_reference_write_pre_shared(outside);
    }
    assert!(completed_entries(&heap).is_empty());
    heap.stop();
}

#[test]
pub fn abandoned_marking_drops_partial_buffers() {
    let heap = mock_heap(test_options(), 4);
    let regions = old_regions(&heap, 1);
    let old = heap.regions().get(regions[0]);
    old.note_start_of_marking();
    heap.satb_queue_set().set_active_all_threads(true, false);

    let mut mutator = G1Mutator::new(heap.clone());
    write(&mut mutator, old.bottom(), object_at(old, 1));
    write(&mut mutator, old.bottom(), object_at(old, 2));

    heap.satb_queue_set().abandon_partial_marking();
    mutator.flush();
    assert!(completed_entries(&heap).is_empty());
    heap.satb_queue_set().set_active_all_threads(false, true);
    heap.stop();
}
