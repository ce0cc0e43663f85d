// Mock tests should have the prefix 'mock_test_' in their file name.

// Common includes for mock tests.
pub(crate) mod mock_test_prelude {
    pub use crate::plan::g1::*;
    pub use crate::policy::region::*;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::test_util::*;
    pub use crate::util::{Address, BitMap, ObjectReference};
    pub use crate::vm::*;
    pub use crate::HeapCore;
}

mod mock_test_evacuation_failure;
mod mock_test_hot_card_cache;
mod mock_test_mark_cycle;
mod mock_test_queue_conservation;
mod mock_test_red_zone;
mod mock_test_refine_cross_region_store;
mod mock_test_refinement_threads;
mod mock_test_satb_barrier;
mod mock_test_scan_rs_exactly_once;
mod mock_test_scrub;
