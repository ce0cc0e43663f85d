use super::mock_test_prelude::*;
use crate::util::options::ZoneSetting;

// The refinement thread is never started, so nothing drains the completed buffers except
// the mutator itself.
#[test]
pub fn mutator_refines_in_red_zone() {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    options.refinement_thread_count = 1;
    options.green_zone = ZoneSetting::Cards(0);
    options.yellow_zone = ZoneSetting::Cards(5);
    options.red_zone = ZoneSetting::Cards(10);
    let heap = mock_heap(options, 4);
    let regions = old_regions(&heap, 2);
    let from = heap.regions().get(regions[0]);
    let to = heap.regions().get(regions[1]);
    let card_size = heap.card_table().card_size();
    let buffer_size = heap.options().update_buffer_size;
    let dcqs = heap.dirty_card_queue_set();

    assert_eq!(heap.refine().activation_threshold(0), 2);
    assert_eq!(dcqs.max_completed_queue(), 10);

    let mut mutator = G1Mutator::new(heap.clone());
    let mut next_card = 0;
    let mut fill_buffers = |mutator: &mut G1Mutator<MockVM>, n: usize| {
        for _ in 0..n * buffer_size {
            write(mutator, from.bottom() + next_card * card_size, object_at(to, 0));
            next_card += 1;
        }
    };

    fill_buffers(&mut mutator, 6);
    assert_eq!(dcqs.completed_buffers_num(), 6);
    assert!(dcqs.process_completed_buffers());
    assert!(heap.refine().active_threads(dcqs) >= 1);
    assert_eq!(to.rem_set().occupied(), 0);

    fill_buffers(&mut mutator, 4);
    assert_eq!(dcqs.completed_buffers_num(), 10);
    assert_eq!(dcqs.processed_buffers_mut(), 0);

    // The next full buffer is over the red zone and is refined by the mutator.
    fill_buffers(&mut mutator, 1);
    assert_eq!(dcqs.completed_buffers_num(), 10);
    assert_eq!(dcqs.processed_buffers_mut(), 1);
    assert_eq!(to.rem_set().occupied(), buffer_size);
    assert_eq!(mutator.pending_cards(), 0);

    // The buffer came back empty and is reused.
    fill_buffers(&mut mutator, 1);
    assert_eq!(dcqs.processed_buffers_mut(), 2);
    assert_eq!(to.rem_set().occupied(), 2 * buffer_size);

    refine_all(&heap);
    assert_eq!(to.rem_set().occupied(), 12 * buffer_size);
    assert_eq!(heap.card_table().count_dirty(), 0);
    heap.stop();
}

#[test]
pub fn padding_gives_mutators_slack() {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    options.use_adaptive_refinement = false;
    options.green_zone = ZoneSetting::Cards(1);
    options.yellow_zone = ZoneSetting::Cards(2);
    options.red_zone = ZoneSetting::Cards(3);
    let heap = mock_heap(options, 4);
    let regions = old_regions(&heap, 2);
    let from = heap.regions().get(regions[0]);
    let to = heap.regions().get(regions[1]);
    let card_size = heap.card_table().card_size();
    let dcqs = heap.dirty_card_queue_set();

    // A backlog left for the pause by threads without a mutator.
    for i in 0..5 * heap.options().update_buffer_size {
        let slot = from.bottom() + i * card_size;
        heap.vm().store(slot, object_at(to, 0));
        heap.object_reference_write_post_shared(slot, object_at(to, 0));
    }
    dcqs.concatenate_logs();
    assert_eq!(dcqs.completed_buffers_num(), 5);
    assert!(dcqs.is_over_max_completed());

    heap.refine().adjust(dcqs, std::time::Duration::ZERO, 0);
    assert_eq!(dcqs.completed_queue_padding(), 5);
    assert!(!dcqs.is_over_max_completed());
    heap.stop();
}

#[test]
pub fn lowering_red_zone_at_runtime() {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    options.use_adaptive_refinement = false;
    options.green_zone = ZoneSetting::Cards(0);
    options.yellow_zone = ZoneSetting::Cards(5);
    options.red_zone = ZoneSetting::Cards(1000);
    let heap = mock_heap(options, 4);
    let regions = old_regions(&heap, 2);
    let from = heap.regions().get(regions[0]);
    let to = heap.regions().get(regions[1]);
    let card_size = heap.card_table().card_size();
    let buffer_size = heap.options().update_buffer_size;
    let dcqs = heap.dirty_card_queue_set();
    let refine = heap.refine();

    let mut mutator = G1Mutator::new(heap.clone());
    let mut next_card = 0;
    let mut fill_buffers = |mutator: &mut G1Mutator<MockVM>, n: usize| {
        for _ in 0..n * buffer_size {
            write(mutator, from.bottom() + next_card * card_size, object_at(to, 0));
            next_card += 1;
        }
    };

    fill_buffers(&mut mutator, 3);
    assert_eq!(dcqs.completed_buffers_num(), 3);
    assert_eq!(dcqs.process_completed_threshold(), 5);
    assert!(!dcqs.process_completed_buffers());
    assert_eq!(dcqs.processed_buffers_mut(), 0);

    refine.set_green_zone(0, dcqs);
    refine.set_yellow_zone(1, dcqs);
    refine.set_red_zone(2, dcqs);
    assert_eq!(dcqs.max_completed_queue(), 2);
    assert_eq!(refine.activation_threshold(0), 1);
    assert_eq!(dcqs.process_completed_threshold(), 1);
    // Already past the new threshold.
    assert!(dcqs.process_completed_buffers());

    fill_buffers(&mut mutator, 1);
    assert_eq!(dcqs.completed_buffers_num(), 3);
    assert_eq!(dcqs.processed_buffers_mut(), 1);
    assert_eq!(to.rem_set().occupied(), buffer_size);

    // Raising it again hands buffers back to the completed list.
    refine.set_red_zone(1000, dcqs);
    fill_buffers(&mut mutator, 1);
    assert_eq!(dcqs.completed_buffers_num(), 4);
    assert_eq!(dcqs.processed_buffers_mut(), 1);
    heap.stop();
}
