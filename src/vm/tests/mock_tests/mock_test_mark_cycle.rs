use super::mock_test_prelude::*;
use crate::util::options::Options;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Region 0 holds a root that refers to region 2. Region 1 is garbage that also refers to
/// region 2.
fn heap_with_garbage(mut options: Options) -> (Arc<HeapCore<MockVM>>, Vec<RegionIndex>) {
    options.use_hot_card_cache = false;
    let heap = mock_heap(options, 8);
    let regions = old_regions(&heap, 3);
    let live = heap.regions().get(regions[0]);
    let dead = heap.regions().get(regions[1]);
    let child = object_at(heap.regions().get(regions[2]), 0);
    heap.vm().add_root(object_at(live, 0));

    let mut mutator = G1Mutator::new(heap.clone());
    write(&mut mutator, live.bottom() + 8usize, child);
    write(&mut mutator, dead.bottom() + 8usize, child);
    drop(mutator);
    refine_all(&heap);
    assert_eq!(heap.regions().get(regions[2]).rem_set().occupied(), 2);

    heap.initialize_collection().unwrap();
    (heap, regions)
}

fn run_one_cycle(heap: &HeapCore<MockVM>) {
    let cm = heap.concurrent_mark();
    let before = cm.full_collections_completed();
    assert!(cm.request_cycle());
    assert_eq!(
        cm.wait_for_full_collections_completed(before, TIMEOUT),
        Some(before + 1)
    );
}

#[test]
pub fn mark_cycle_reclaims_garbage() {
    serial_test(|| {
        let (heap, regions) = heap_with_garbage(test_options());
        let cm = heap.concurrent_mark();
        assert_eq!(cm.phase(), MarkPhase::Idle);

        run_one_cycle(&heap);

        assert_eq!(
            heap.vm().events(),
            vec![
                "GC initial-mark",
                "checkpoint_roots_initial",
                "mark_from_roots",
                "GC remark",
                "checkpoint_roots_final",
                "calc_desired_regions",
                "GC cleanup",
                "cleanup",
                "complete_cleanup",
                "clear_next_bitmap",
            ]
        );
        wait_until(1000, || !cm.in_progress());
        assert_eq!(cm.phase(), MarkPhase::Idle);
        assert!(cm.marking_complete());
        assert!(!cm.free_regions_coming());
        assert!(!heap.satb_queue_set().is_active());
        assert_eq!(cm.restarts(), 0);
        assert_eq!(cm.aborts(), 0);
        assert_eq!(heap.vm().marked_objects(), 2);

        // Region 1 was freed, and region 2 forgot about it.
        assert_eq!(cm.regions_reclaimed(), 1);
        assert!(heap.regions().get(regions[1]).is_free());
        assert!(!heap.regions().get(regions[0]).is_free());
        assert!(!heap.regions().get(regions[2]).is_free());
        let rem_set = heap.regions().get(regions[2]).rem_set();
        assert_eq!(rem_set.occupied(), 1);
        assert!(rem_set.contains_reference(
            heap.card_table()
                .card_index_for(heap.regions().get(regions[0]).bottom())
        ));
        assert!(heap.rem_set().verify(&heap).is_ok());
        assert_eq!(cm.phase_time(MarkPhase::Idle), Duration::ZERO);

        heap.stop();
    })
}

#[test]
pub fn mark_stack_overflow_restarts_marking() {
    serial_test(|| {
        let (heap, _) = heap_with_garbage(test_options());
        heap.vm().set_overflows(2);

        run_one_cycle(&heap);

        let events = heap.vm().events();
        assert_eq!(events.iter().filter(|e| *e == "GC remark").count(), 3);
        assert_eq!(events.iter().filter(|e| *e == "mark_from_roots").count(), 3);
        assert!(events.iter().any(|e| e == "GC cleanup"));
        assert_eq!(heap.concurrent_mark().restarts(), 2);
        assert_eq!(heap.concurrent_mark().aborts(), 0);
        assert!(!heap.satb_queue_set().is_active());
        heap.stop();
    })
}

#[test]
pub fn too_many_overflows_abort_the_cycle() {
    serial_test(|| {
        let mut options = test_options();
        options.max_mark_restarts = 1;
        let (heap, regions) = heap_with_garbage(options);
        heap.vm().set_overflows(5);

        run_one_cycle(&heap);

        let events = heap.vm().events();
        assert_eq!(events.iter().filter(|e| *e == "GC remark").count(), 2);
        assert!(events.iter().any(|e| e == "GC concurrent-mark-abort"));
        assert!(!events.iter().any(|e| e == "GC cleanup"));
        assert_eq!(events.last().map(String::as_str), Some("clear_next_bitmap"));
        let cm = heap.concurrent_mark();
        assert_eq!(cm.restarts(), 2);
        assert_eq!(cm.aborts(), 1);
        assert!(cm.marking_complete());
        assert_eq!(cm.regions_reclaimed(), 0);
        assert!(!heap.regions().get(regions[1]).is_free());
        assert!(!heap.satb_queue_set().is_active());

        // The next cycle starts afresh.
        heap.vm().set_overflows(0);
        run_one_cycle(&heap);
        assert_eq!(cm.aborts(), 1);
        assert_eq!(cm.full_collections_completed(), 2);
        assert!(heap.regions().get(regions[1]).is_free());
        heap.stop();
    })
}

#[test]
pub fn binding_can_abort_the_cycle() {
    serial_test(|| {
        let (heap, _) = heap_with_garbage(test_options());
        heap.vm().set_aborted(true);

        run_one_cycle(&heap);

        assert_eq!(
            heap.vm().events(),
            vec![
                "GC initial-mark",
                "checkpoint_roots_initial",
                "GC concurrent-mark-abort",
                "clear_next_bitmap",
            ]
        );
        assert_eq!(heap.concurrent_mark().aborts(), 1);
        assert!(!heap.satb_queue_set().is_active());
        heap.stop();
    })
}

#[test]
pub fn cleanup_without_liveness_keeps_regions() {
    serial_test(|| {
        let (heap, regions) = heap_with_garbage(test_options());
        heap.vm().set_liveness(false);

        run_one_cycle(&heap);

        let events = heap.vm().events();
        assert!(events.iter().any(|e| e == "GC cleanup"));
        assert!(!events.iter().any(|e| e == "complete_cleanup"));
        assert_eq!(heap.concurrent_mark().regions_reclaimed(), 0);
        assert!(!heap.regions().get(regions[1]).is_free());
        assert_eq!(heap.regions().get(regions[2]).rem_set().occupied(), 2);
        heap.stop();
    })
}

#[test]
pub fn stop_without_a_cycle() {
    serial_test(|| {
        let heap = mock_heap(test_options(), 2);
        heap.initialize_collection().unwrap();
        // A second call is ignored.
        heap.initialize_collection().unwrap();
        heap.stop();
        assert_eq!(heap.concurrent_mark().full_collections_completed(), 0);
        assert!(heap.vm().events().is_empty());
    })
}
