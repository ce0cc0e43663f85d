//! The interface between this crate and a language runtime.
//!
//! The binding implements [`ObjectModel`], [`Marking`] and [`Collection`] on one type, which
//! then is a [`VMBinding`] and can be used to build a [`crate::HeapCore`].

mod collection;
mod marking;
mod object_model;

pub use self::collection::Collection;
pub use self::marking::{LivenessMaps, MarkContext, Marking};
pub use self::object_model::{CardScan, ObjectModel};

/// A language runtime that hosts the collector.
pub trait VMBinding: ObjectModel + Marking + Collection + Sized + Send + Sync + 'static {}

impl<T> VMBinding for T where T: ObjectModel + Marking + Collection + Sized + Send + Sync + 'static {}

#[cfg(test)]
mod tests;
