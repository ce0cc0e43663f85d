//! The G1 remembered-set machinery: write barriers, the queues they feed, refinement, the
//! remembered-set part of evacuation pauses, and concurrent marking control.

pub mod concurrent_mark;
pub mod concurrent_refine;
pub mod dirty_card_queue;
pub mod g1remset;
pub mod hot_card_cache;
mod mutator;
pub mod ptr_queue;
pub mod satb_queue;

pub use self::concurrent_mark::{ConcurrentMark, MarkPhase};
pub use self::concurrent_refine::ConcurrentRefine;
pub use self::dirty_card_queue::{CardTableEntryClosure, DirtyCardQueue, DirtyCardQueueSet};
pub use self::g1remset::{G1RemSet, IntoCSetClosure, RemSetSummary};
pub use self::hot_card_cache::{HotCardCache, HotCardCacheStats};
pub use self::mutator::G1Mutator;
pub use self::satb_queue::{ObjPtrQueue, SATBMarkQueueSet};
