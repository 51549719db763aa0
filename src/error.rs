//! Error taxonomy for the hybrid table and string intern pool.
//!
//! Every failure the core can produce is non-recoverable by the core itself:
//! it is surfaced as a `Result` and left to the host runtime to translate into
//! whatever abort mechanism the embedding interpreter uses.

use thiserror::Error;

/// Failures from the allocation facade (see [`crate::alloc`]).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The underlying allocator could not satisfy the request.
    #[error("allocator ran out of memory")]
    OutOfMemory,

    /// The requested size would overflow the maximum representable
    /// allocation size.
    #[error("requested allocation exceeds the maximum representable size")]
    TooBig,
}

/// Errors raised by [`crate::table::Table`] and [`crate::intern::Intern`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// A growth operation could not allocate the memory it needed.
    #[error("allocation failed: {0}")]
    Memory(#[from] AllocError),

    /// A `set` was attempted with a nil key or a NaN number key.
    #[error("table key cannot be nil or NaN")]
    InvalidKey,

    /// `next` was called with a key that is neither nil nor present in the
    /// table.
    #[error("next called with a key that is neither nil nor present in the table")]
    InvalidNext,

    /// A rehash would need a hash region larger than the maximum
    /// representable size.
    #[error("requested hash region size exceeds the maximum representable size")]
    Overflow,
}
