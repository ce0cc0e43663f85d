//! Utilities used by the rest of the crate.

pub mod address;
pub mod bitmap;
pub mod constants;
pub mod error;
pub(crate) mod log;
pub mod logger;
pub mod options;
pub(crate) mod panic;
mod synchronized_counter;

#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
pub use self::bitmap::BitMap;
pub use self::synchronized_counter::SynchronizedCounter;
