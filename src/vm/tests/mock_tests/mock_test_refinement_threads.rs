use super::mock_test_prelude::*;
use crate::util::options::ZoneSetting;

#[test]
pub fn refinement_threads_drain_completed_buffers() {
    serial_test(|| {
        let mut options = test_options();
        options.use_hot_card_cache = false;
        options.refinement_thread_count = 2;
        options.green_zone = ZoneSetting::Cards(0);
        options.yellow_zone = ZoneSetting::Cards(6);
        options.red_zone = ZoneSetting::Cards(1000);
        options.refinement_service_interval_ms = 10;
        let heap = mock_heap(options, 4);
        heap.initialize_collection().unwrap();

        let regions = old_regions(&heap, 2);
        let from = heap.regions().get(regions[0]);
        let target = heap.regions().get(regions[1]);
        let card_size = heap.card_table().card_size();
        let cards = 40;

        let mut mutator = G1Mutator::new(heap.clone());
        for c in 0..cards {
            write(&mut mutator, from.bottom() + c * card_size, object_at(target, 0));
        }
        mutator.flush();

        wait_until(5000, || target.rem_set().occupied() == cards);
        wait_until(5000, || {
            heap.refine().active_threads(heap.dirty_card_queue_set()) == 0
        });
        assert_eq!(heap.dirty_card_queue_set().completed_buffers_num(), 0);
        assert_eq!(heap.card_table().count_dirty(), 0);
        assert!(heap.dirty_card_queue_set().processed_buffers_rs_thread() > 0);
        assert_eq!(heap.dirty_card_queue_set().processed_buffers_mut(), 0);
        assert!(heap.rem_set().verify(&heap).is_ok());

        heap.stop();
    })
}

#[test]
pub fn service_thread_flushes_shared_queue() {
    serial_test(|| {
        let mut options = test_options();
        options.use_hot_card_cache = false;
        options.refinement_thread_count = 1;
        options.green_zone = ZoneSetting::Cards(0);
        options.yellow_zone = ZoneSetting::Cards(2);
        options.red_zone = ZoneSetting::Cards(1000);
        options.refinement_service_interval_ms = 5;
        let heap = mock_heap(options, 4);
        heap.initialize_collection().unwrap();

        let regions = old_regions(&heap, 2);
        let from = heap.regions().get(regions[0]);
        let target = heap.regions().get(regions[1]);

        // A single card on the shared queue never fills a buffer by itself.
        heap.vm().store(from.bottom(), object_at(target, 0));
        heap.object_reference_write_post_shared(from.bottom(), object_at(target, 0));

        wait_until(5000, || target.rem_set().occupied() == 1);
        assert_eq!(heap.dirty_card_queue_set().shared_queue_len(), 0);
        heap.stop();
    })
}

#[test]
pub fn pauses_suspend_refinement() {
    serial_test(|| {
        let mut options = test_options();
        options.use_hot_card_cache = false;
        options.refinement_thread_count = 1;
        options.green_zone = ZoneSetting::Cards(0);
        options.yellow_zone = ZoneSetting::Cards(2);
        options.red_zone = ZoneSetting::Cards(1000);
        let heap = mock_heap(options, 4);
        heap.initialize_collection().unwrap();
        let regions = old_regions(&heap, 2);
        let from = heap.regions().get(regions[0]);
        let target = heap.regions().get(regions[1]);
        let card_size = heap.card_table().card_size();

        heap.prepare_for_oops_into_collection_set_do(1);
        assert!(heap.sts().is_suspended());
        // Buffers completed during the pause are left alone.
        for c in 0..8 {
            let slot = from.bottom() + c * card_size;
            heap.vm().store(slot, object_at(target, 0));
            heap.object_reference_write_post_shared(slot, object_at(target, 0));
        }
        heap.dirty_card_queue_set().notify_if_necessary();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(target.rem_set().occupied(), 0);

        heap.oops_into_collection_set_do(&mut |_, _| {}, 0);
        heap.cleanup_after_oops_into_collection_set_do();
        assert!(!heap.sts().is_suspended());
        assert_eq!(target.rem_set().occupied(), 8);
        heap.stop();
    })
}

/// Dirty `n` cards of `from` that point into `target`, and put them in full buffers on
/// the side. Returns the buffers' set, ready to be merged.
fn side_buffers(
    heap: &HeapCore<MockVM>,
    from: &Region,
    target: &Region,
    first_card: usize,
    n: usize,
) -> DirtyCardQueueSet {
    let buffer_size = heap.options().update_buffer_size;
    let card_size = heap.card_table().card_size();
    let side = DirtyCardQueueSet::unbounded(buffer_size);
    let cards: Vec<CardIndex> = (first_card..first_card + n * buffer_size)
        .map(|c| {
            let slot = from.bottom() + c * card_size;
            heap.vm().store(slot, object_at(target, 0));
            let card = heap.card_table().card_index_for(slot);
            heap.card_table().dirty_card(card);
            card
        })
        .collect();
    for buf in cards.chunks(buffer_size) {
        side.enqueue_complete_buffer(buf.to_vec());
    }
    side
}

#[test]
pub fn active_threads_follow_queue_length() {
    serial_test(|| {
        let mut options = test_options();
        options.use_hot_card_cache = false;
        options.use_adaptive_refinement = false;
        options.refinement_thread_count = 3;
        options.green_zone = ZoneSetting::Cards(0);
        options.yellow_zone = ZoneSetting::Cards(8);
        options.red_zone = ZoneSetting::Cards(1000);
        options.refinement_service_interval_ms = 10;
        let heap = mock_heap(options, 4);
        let refine = heap.refine();
        let dcqs = heap.dirty_card_queue_set();
        assert_eq!(refine.thread_threshold_step(), 2);
        assert_eq!(refine.activation_threshold(0), 2);
        assert_eq!(refine.activation_threshold(1), 4);
        assert_eq!(refine.activation_threshold(2), 6);
        heap.initialize_collection().unwrap();

        let regions = old_regions(&heap, 2);
        let from = heap.regions().get(regions[0]);
        let target = heap.regions().get(regions[1]);
        let buffer_size = heap.options().update_buffer_size;

        // While suspended, activated threads wait to join and hold on to their state.
        heap.sts().synchronize();
        dcqs.merge_bufferlists(&side_buffers(&heap, from, target, 0, 5));
        assert_eq!(dcqs.completed_buffers_num(), 5);
        // 5 is above the threshold of thread 1 but not of thread 2.
        wait_until(5000, || refine.active_threads(dcqs) == 2);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(refine.active_threads(dcqs), 2);
        assert!(refine.is_active(0, dcqs));
        assert!(refine.is_active(1, dcqs));
        assert!(!refine.is_active(2, dcqs));
        heap.sts().desynchronize();

        wait_until(5000, || {
            dcqs.completed_buffers_num() == 0 && refine.active_threads(dcqs) == 0
        });
        assert_eq!(target.rem_set().occupied(), 5 * buffer_size);

        // 7 is above every threshold.
        heap.sts().synchronize();
        dcqs.merge_bufferlists(&side_buffers(&heap, from, target, 5 * buffer_size, 7));
        wait_until(5000, || refine.active_threads(dcqs) == 3);
        heap.sts().desynchronize();

        wait_until(5000, || {
            dcqs.completed_buffers_num() == 0 && refine.active_threads(dcqs) == 0
        });
        assert_eq!(target.rem_set().occupied(), 12 * buffer_size);
        assert_eq!(heap.card_table().count_dirty(), 0);
        assert_eq!(dcqs.processed_buffers_mut(), 0);
        heap.stop();
    })
}

#[test]
pub fn resize_refinement_pool() {
    serial_test(|| {
        let mut options = test_options();
        options.use_hot_card_cache = false;
        options.use_adaptive_refinement = false;
        options.refinement_thread_count = 1;
        options.green_zone = ZoneSetting::Cards(0);
        options.yellow_zone = ZoneSetting::Cards(8);
        options.red_zone = ZoneSetting::Cards(1000);
        options.refinement_service_interval_ms = 10;
        let heap = mock_heap(options, 4);
        let refine = heap.refine();
        let dcqs = heap.dirty_card_queue_set();
        heap.initialize_collection().unwrap();
        assert_eq!(refine.activation_threshold(0), 4);

        let regions = old_regions(&heap, 2);
        let from = heap.regions().get(regions[0]);
        let target = heap.regions().get(regions[1]);
        let buffer_size = heap.options().update_buffer_size;

        refine.reinitialize_threads(&heap, 3).unwrap();
        assert_eq!(refine.n_threads(), 3);
        assert_eq!(refine.thread_threshold_step(), 2);
        assert_eq!(dcqs.process_completed_threshold(), 2);

        heap.sts().synchronize();
        dcqs.merge_bufferlists(&side_buffers(&heap, from, target, 0, 7));
        // The threads started by the resize take part.
        wait_until(5000, || refine.active_threads(dcqs) == 3);
        heap.sts().desynchronize();
        wait_until(5000, || target.rem_set().occupied() == 7 * buffer_size);
        wait_until(5000, || refine.active_threads(dcqs) == 0);

        // Without threads, buffers stay on the completed list.
        refine.reinitialize_threads(&heap, 0).unwrap();
        assert_eq!(refine.n_threads(), 0);
        assert_eq!(dcqs.process_completed_threshold(), 8);
        dcqs.merge_bufferlists(&side_buffers(&heap, from, target, 7 * buffer_size, 3));
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(dcqs.completed_buffers_num(), 3);
        assert_eq!(target.rem_set().occupied(), 7 * buffer_size);

        refine.reinitialize_threads(&heap, 1).unwrap();
        assert_eq!(dcqs.process_completed_threshold(), 4);
        dcqs.merge_bufferlists(&side_buffers(&heap, from, target, 10 * buffer_size, 2));
        wait_until(5000, || target.rem_set().occupied() == 12 * buffer_size);
        assert_eq!(dcqs.processed_buffers_mut(), 0);
        heap.stop();
    })
}
