use super::mock_test_prelude::*;
use crate::util::options::ZoneSetting;
use rand::{Rng, SeedableRng};

const THREADS: usize = 4;
const STORES_PER_THREAD: usize = 2000;

// Every card newly dirtied by a barrier sits in exactly one buffer until it is consumed.
#[test]
pub fn no_card_is_lost_or_duplicated() {
    let mut options = test_options();
    options.use_hot_card_cache = false;
    options.red_zone = ZoneSetting::Cards(usize::MAX / 2);
    let heap = mock_heap(options, 8);
    let regions = old_regions(&heap, 8);
    let cards_per_region = 1 << (heap.regions().log_region_size() - heap.regions().log_card_size());
    let card_size = heap.card_table().card_size();

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let heap = heap.clone();
            let regions = regions.clone();
            s.spawn(move || {
                let mut rng = rand::rngs::StdRng::seed_from_u64(t as u64);
                let mut mutator = G1Mutator::new(heap.clone());
                for i in 0..STORES_PER_THREAD {
                    let from = heap.regions().get(regions[rng.random_range(0..4)]);
                    let to = heap.regions().get(regions[rng.random_range(4..8)]);
                    let slot = from.bottom() + rng.random_range(0..cards_per_region) * card_size;
                    let target = object_at(to, i % 64);
                    if i % 10 == 0 {
                        heap.vm().store(slot, target);
                        heap.object_reference_write_post_shared(slot, target);
                    } else {
                        write(&mut mutator, slot, target);
                    }
                }
                // Dropping the mutator flushes its partial buffer.
            });
        }
    });

    let dcqs = heap.dirty_card_queue_set();
    let dirty = heap.card_table().count_dirty();
    assert!(dirty > 0);
    assert_eq!(dcqs.processed_buffers_mut(), 0);
    assert_eq!(dcqs.completed_entries_num() + dcqs.shared_queue_len(), dirty);

    let processed_before = dcqs.processed_cards();
    let mut seen = vec![];
    dcqs.concatenate_logs();
    dcqs.apply_closure_to_all_completed_buffers(
        &mut |card: CardIndex, _worker: usize| {
            seen.push(card);
            true
        },
        0,
    );
    assert_eq!(dcqs.processed_cards() - processed_before, dirty);
    assert_eq!(dcqs.completed_buffers_num(), 0);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), dirty);
    for card in seen {
        assert!(heap.card_table().is_dirty(card));
    }
    heap.stop();
}
