//! Concurrent remembered-set maintenance for a region-based, generational collector in the
//! style of G1.
//!
//! Mutators dirty cards in a [`CardTable`](policy::region::CardTable) through the write
//! barrier of [`G1Mutator`](plan::G1Mutator). Dirty cards are logged in buffers, and
//! concurrent refinement threads turn them into entries of per-region remembered sets. An
//! evacuation pause finishes refinement and scans the remembered sets of the collection set
//! to find every reference into it. A concurrent mark thread drives marking cycles, which
//! the binding implements.
//!
//! A language runtime implements the traits in [`vm`] and builds a [`HeapCore`] for its
//! reserved heap:
//!
//! ```ignore
//! let heap = HeapCore::new(MyVM::new(), Options::default(), heap_start, heap_bytes)?;
//! heap.initialize_collection()?;
//! let mut mutator = G1Mutator::new(heap.clone());
//! ```

mod heap_core;
pub mod plan;
pub mod policy;
pub mod scheduler;
pub mod util;
pub mod vm;

pub use crate::heap_core::HeapCore;
