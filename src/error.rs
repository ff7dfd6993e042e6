//! Errors surfaced by container operations.
//!
//! Failures that are a normal domain outcome (a missing key) are expressed as
//! `Option` on the operation itself; the variants here are reserved for calls
//! the caller asked to be fallible: indexed access out of range, popping an
//! empty vector, and overflowing the fixed capacity of an [`ArrayMap`].
//!
//! [`ArrayMap`]: crate::ArrayMap

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("cannot pop an empty vector")]
    EmptyPop,

    #[error("array map holds at most {cap} entries")]
    CapacityExceeded { cap: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
