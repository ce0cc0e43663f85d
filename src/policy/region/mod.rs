//! Heap regions, the card table, and the per-region remembered sets.

mod card;
pub mod cardtable;
mod region;
mod regiontable;
pub mod remset;

pub use self::card::*;
pub use self::cardtable::CardTable;
pub use self::region::*;
pub use self::regiontable::*;
pub use self::remset::{RSetIterator, RemSetConfig, RememberedSet};
