use crate::plan::g1::satb_queue::SATBMarkQueueSet;
use crate::policy::region::RegionTable;
use crate::util::{BitMap, ObjectReference};

/// What the concurrent mark thread hands to the binding's marker in each phase.
pub struct MarkContext<'a> {
    pub regions: &'a RegionTable,
    pub satb: &'a SATBMarkQueueSet,
    /// Number of parallel workers the marker may use.
    pub n_workers: usize,
}

/// Liveness computed by marking, used to scrub remembered sets and reclaim empty regions.
///
/// A set bit means live. `region_bm` has one bit per region, `card_bm` one bit per card of
/// the whole heap.
pub struct LivenessMaps {
    pub region_bm: BitMap,
    pub card_bm: BitMap,
}

/// The marking algorithm. The concurrent mark thread only sequences these phases; tracing
/// itself is up to the binding.
pub trait Marking {
    /// Is `object` marked in the bitmap being built by the current cycle?
    fn is_object_live(&self, object: ObjectReference) -> bool;

    /// Mark the roots. Called at a safepoint, after SATB has been activated.
    fn checkpoint_roots_initial(&self, cx: &MarkContext);

    /// Trace concurrently with the mutators. SATB buffers should be drained as they complete.
    fn mark_from_roots(&self, cx: &MarkContext);

    /// Finish marking at a safepoint. All SATB buffers must be drained.
    fn checkpoint_roots_final(&self, cx: &MarkContext);

    /// Did the last remark overflow the mark stack, so that marking has to start over?
    fn restart_for_overflow(&self) -> bool {
        false
    }

    /// Has the binding aborted this cycle, for example because of a full collection?
    fn has_aborted(&self) -> bool {
        false
    }

    /// Count live data per region, concurrently.
    fn calc_desired_regions(&self, _cx: &MarkContext) {}

    /// Called at the cleanup safepoint. Returning maps enables scrubbing of remembered sets
    /// and reclamation of old regions with nothing live.
    fn cleanup(&self, cx: &MarkContext) -> Option<LivenessMaps>;

    /// Called concurrently after empty regions have been freed.
    fn complete_cleanup(&self, _cx: &MarkContext) {}

    /// Clear the bitmap for the next cycle, concurrently.
    fn clear_next_bitmap(&self, cx: &MarkContext);
}
