//! Error types for the **spv-core** crate.
//!
//! All fallible operations in this crate return [`crate::Result`], a
//! convenient alias for `core::result::Result<T, Error>`. Variants map
//! directly onto the abstract error kinds of the error-handling design:
//! codec failures, chain-validation failures, and storage failures all live
//! here since `spv-core` owns the codec, the header store, and the chain.

use thiserror::Error;

/// Core crate error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Buffer ran out of bytes before a value could be fully decoded.
    #[error("truncated input: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    /// A VarInt was not encoded in its minimal form and strict decoding was
    /// requested.
    #[error("non-minimal varint encoding")]
    MalformedVarInt,

    /// A compact difficulty field failed one of the canonicalization checks.
    #[error("malformed difficulty: {0}")]
    MalformedDifficulty(&'static str),

    /// Declared message length exceeds the 32 MiB hard cap.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(u32),

    /// Magic bytes at the start of a frame did not match the expected
    /// network.
    #[error("bad magic bytes")]
    BadMagic,

    /// Payload checksum did not match the first four bytes of the double
    /// SHA-256 of the payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A header's fingerprint exceeded its declared difficulty target.
    #[error("proof of work not met")]
    BadProofOfWork,

    /// A header's declared target did not match the retarget rule.
    #[error("bad difficulty transition")]
    BadDifficultyTransition,

    /// A header's timestamp did not exceed the median of the previous 11.
    #[error("timestamp not after median of last 11 headers")]
    TimestampTooEarly,

    /// The header's previous fingerprint is not present in the store and
    /// could not be resolved within the orphan buffer's capacity.
    #[error("orphan buffer full, dropping header")]
    OrphanBufferFull,

    /// The header store detected a structural invariant violation.
    #[error("header store corrupt: {0}")]
    StorageCorrupt(String),

    /// Another process (or handle) already holds the store's advisory lock.
    #[error("header store already locked")]
    AlreadyLocked,

    /// The header store's capacity cannot be decreased.
    #[error("cannot shrink header store capacity from {current} to {requested}")]
    CannotShrink { current: u32, requested: u32 },

    /// A lookup by fingerprint found nothing in the store.
    #[error("header not found")]
    HeaderNotFound,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
