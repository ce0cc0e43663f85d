use crate::util::{Address, ObjectReference};
use std::ops::Range;

/// The outcome of [`ObjectModel::scan_card`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CardScan {
    /// Every object overlapping the range was parsed.
    Complete,
    /// Parsing stopped at `stop` because the object there is not yet initialized, for example
    /// an allocation buffer being filled by a mutator. The card must be refined again later.
    Unparsable { stop: Address },
}

/// VM-specific methods for parsing the heap.
pub trait ObjectModel {
    /// Visit every reference slot that lies in `range` and belongs to an object overlapping
    /// `range`. `visitor` receives the slot address and the reference currently stored in it.
    ///
    /// `range` never extends past the top of the region it is in. The binding may visit null
    /// references; they are ignored.
    fn scan_card(
        &self,
        range: Range<Address>,
        visitor: &mut dyn FnMut(Address, ObjectReference),
    ) -> CardScan;
}
