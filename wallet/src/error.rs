//! Error types for the **spv-wallet** crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("core error: {0}")]
    Core(#[from] spv_core::Error),

    #[error("insufficient funds: needed {needed} units, available {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("no key controls the requested output")]
    UnknownKey,

    #[error("wallet is encrypted; unlock before performing this operation")]
    Locked,

    #[error("wallet is not encrypted")]
    NotEncrypted,

    #[error("incorrect passphrase")]
    BadPassphrase,

    #[error("snapshot is corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
