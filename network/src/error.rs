//! Error types for the **spv-net** crate.

use spv_core::fingerprint::Fingerprint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("core error: {0}")]
    Core(#[from] spv_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer disconnected")]
    Disconnected,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("peer sent protocol version {actual}, below the minimum {minimum}")]
    ProtocolVersionTooLow { actual: i32, minimum: i32 },

    #[error("peer's version nonce matched one of our own outstanding nonces (self-connection)")]
    SelfConnection,

    #[error("handshake message received out of order")]
    HandshakeOutOfOrder,

    #[error("no peers available to dial")]
    NoAddressesAvailable,

    #[error("fewer than the minimum required peers acknowledged the broadcast (got {acked}, needed {needed})")]
    BroadcastFailed { acked: usize, needed: usize },

    #[error("peer rejected broadcast of {txid}: {reason}")]
    RejectedTransaction { txid: Fingerprint, reason: String },

    #[error("merkle block's partial tree did not reconstruct the header's merkle root")]
    BadMerkleProof,
}

pub type Result<T> = core::result::Result<T, Error>;
