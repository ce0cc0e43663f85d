use std::fmt;

/// The index of a card, relative to the start of the heap.
///
/// Card and region indices are the only currency the remembered-set code deals in. Raw
/// addresses are turned into indices by [`super::CardTable`] and [`super::RegionTable`].
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CardIndex(usize);

impl CardIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// The card `n` cards after this one.
    pub const fn offset(self, n: usize) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Debug for CardIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "card#{}", self.0)
    }
}

impl fmt::Display for CardIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The index of a region in the [`super::RegionTable`].
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RegionIndex(usize);

impl RegionIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for RegionIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

impl fmt::Display for RegionIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
