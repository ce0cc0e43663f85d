use crate::util::constants::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-size bitmap that can be updated concurrently.
///
/// Used for the fine-grain and coarse tables of remembered sets, and for the region and
/// card liveness maps handed to the scrubbing code.
pub struct BitMap {
    words: Box<[AtomicUsize]>,
    len: usize,
}

impl BitMap {
    pub fn new(len: usize) -> Self {
        let nwords = len.div_ceil(BITS_IN_ADDRESS);
        Self {
            words: (0..nwords).map(|_| AtomicUsize::new(0)).collect(),
            len,
        }
    }

    /// Number of bits in this bitmap.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    fn get_entry(&self, index: usize) -> (&AtomicUsize, usize) {
        debug_assert!(index < self.len, "bit {} out of {}", index, self.len);
        (
            &self.words[index >> LOG_BITS_IN_ADDRESS],
            1 << (index & (BITS_IN_ADDRESS - 1)),
        )
    }

    /// Set a bit. Returns true if this call changed it.
    pub fn set(&self, index: usize) -> bool {
        let (entry, mask) = self.get_entry(index);
        entry.fetch_or(mask, Ordering::SeqCst) & mask == 0
    }

    /// Clear a bit. Returns true if this call changed it.
    pub fn clear(&self, index: usize) -> bool {
        let (entry, mask) = self.get_entry(index);
        entry.fetch_and(!mask, Ordering::SeqCst) & mask != 0
    }

    pub fn is_set(&self, index: usize) -> bool {
        let (entry, mask) = self.get_entry(index);
        entry.load(Ordering::SeqCst) & mask != 0
    }

    /// Set every bit in `start..end`.
    pub fn set_range(&self, start: usize, end: usize) {
        for i in start..end {
            self.set(i);
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    pub fn clear_all(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::SeqCst);
        }
    }

    /// Indices of set bits, in ascending order. Bits set or cleared concurrently may or may
    /// not be observed.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, w)| {
            let mut word = w.load(Ordering::Relaxed);
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                Some((i << LOG_BITS_IN_ADDRESS) + bit)
            })
        })
    }

    /// Bytes used by the bitmap.
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.words.len() * BYTES_IN_ADDRESS
    }
}

impl std::fmt::Debug for BitMap {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BitMap({} of {} set)", self.count_ones(), self.len)
    }
}
