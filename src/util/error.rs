//! Errors surfaced to the VM.
//!
//! Most of the remembered-set machinery cannot fail: redundant work caused by races is
//! harmless, and transient resource shortages are absorbed locally. What is left is either
//! propagated to the caller as [`G1Error`] (startup) or treated as fatal (see
//! [`crate::util::panic`]).

use thiserror::Error;

/// Result type used by fallible operations in this crate.
pub type Result<T> = std::result::Result<T, G1Error>;

#[derive(Error, Debug)]
pub enum G1Error {
    /// A collector thread could not be created.
    #[error("failed to spawn {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// The VM failed to execute a stop-the-world operation on behalf of the collector.
    #[error("safepoint operation '{operation}' failed: {reason}")]
    Safepoint {
        operation: &'static str,
        reason: String,
    },
    /// A configuration value was rejected.
    #[error("invalid option {name}={value}")]
    InvalidOption { name: String, value: String },
    /// The card table or a remembered set disagrees with the heap.
    #[error("verification failed: {0}")]
    Verification(String),
}

impl G1Error {
    pub fn safepoint(operation: &'static str, reason: impl Into<String>) -> Self {
        G1Error::Safepoint {
            operation,
            reason: reason.into(),
        }
    }
}
