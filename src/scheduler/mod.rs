//! Thread coordination shared by refinement, pauses and concurrent marking.

mod suspendible;
mod terminator;
mod work_gang;

pub use suspendible::SuspendibleThreadSet;
pub use terminator::ParallelTaskTerminator;
pub use work_gang::WorkGang;
