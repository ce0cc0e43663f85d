pub mod g1;

pub use self::g1::G1Mutator;
