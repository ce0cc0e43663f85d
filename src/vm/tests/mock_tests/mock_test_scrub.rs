use super::mock_test_prelude::*;

/// Region 0 refers to region 3 from `live_cards` cards, region 1 from `dead_cards` cards.
fn two_sources(live_cards: usize, dead_cards: usize) -> std::sync::Arc<HeapCore<MockVM>> {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    let heap = mock_heap(options, 4);
    let regions = old_regions(&heap, 4);
    let target = heap.regions().get(regions[3]);
    let card_size = heap.card_table().card_size();

    let mut mutator = G1Mutator::new(heap.clone());
    for (source, n) in [(regions[0], live_cards), (regions[1], dead_cards)] {
        let bottom = heap.regions().get(source).bottom();
        for c in 0..n {
            write(&mut mutator, bottom + c * card_size, object_at(target, 0));
        }
    }
    drop(mutator);
    refine_all(&heap);
    assert_eq!(target.rem_set().occupied(), live_cards + dead_cards);
    heap
}

fn liveness(heap: &HeapCore<MockVM>) -> (BitMap, BitMap) {
    let region_bm = BitMap::new(heap.regions().num_regions());
    let card_bm = BitMap::new(heap.regions().max_card_count_for_heap());
    (region_bm, card_bm)
}

#[test]
pub fn scrub_removes_dead_source_region() {
    let heap = two_sources(3, 5);
    let target = heap.regions().get(RegionIndex::new(3));
    let (region_bm, card_bm) = liveness(&heap);
    for r in [0, 2, 3] {
        region_bm.set(r);
        let cards = heap.regions().get(RegionIndex::new(r)).card_range();
        card_bm.set_range(cards.start.as_usize(), cards.end.as_usize());
    }

    let before = target.rem_set().occupied();
    let removed = heap.scrub(&region_bm, &card_bm);
    assert_eq!(removed, 5);
    assert_eq!(target.rem_set().occupied(), before - removed);
    let dead = heap.regions().get(RegionIndex::new(1)).card_range();
    for i in dead.start.as_usize()..dead.end.as_usize() {
        assert!(!target.rem_set().contains_reference(CardIndex::new(i)));
    }
    heap.stop();
}

#[test]
pub fn scrub_removes_dead_cards() {
    // Enough cards from region 0 to need a fine table.
    let heap = two_sources(10, 0);
    let target = heap.regions().get(RegionIndex::new(3));
    let first = heap.regions().get(RegionIndex::new(0)).card_range().start;
    let (region_bm, card_bm) = liveness(&heap);
    region_bm.set(0);
    // Only the even cards hold live objects.
    for c in (0..10).step_by(2) {
        card_bm.set(first.offset(c).as_usize());
    }

    assert_eq!(heap.scrub(&region_bm, &card_bm), 5);
    assert_eq!(target.rem_set().occupied(), 5);
    assert!(target.rem_set().contains_reference(first.offset(4)));
    assert!(!target.rem_set().contains_reference(first.offset(5)));
    heap.stop();
}

#[test]
pub fn parallel_scrub_visits_each_region_once() {
    let heap = two_sources(4, 6);
    let (region_bm, card_bm) = liveness(&heap);
    region_bm.set(0);
    let live = heap.regions().get(RegionIndex::new(0)).card_range();
    card_bm.set_range(live.start.as_usize(), live.end.as_usize());

    let claim_value = heap.regions().next_claim_value();
    let removed = std::sync::atomic::AtomicUsize::new(0);
    crate::scheduler::WorkGang::new("test scrub", 3).run_task(|worker| {
        let n = heap.scrub_par(&region_bm, &card_bm, worker, 3, claim_value);
        removed.fetch_add(n, std::sync::atomic::Ordering::SeqCst);
    });
    assert_eq!(removed.into_inner(), 6);
    assert_eq!(
        heap.regions().get(RegionIndex::new(3)).rem_set().occupied(),
        4
    );
    heap.stop();
}
