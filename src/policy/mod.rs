//! Heap-side policy: how the heap is divided into regions and cards, and how references
//! between regions are remembered.

pub mod region;
