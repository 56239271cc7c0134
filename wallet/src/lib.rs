//! `spv-wallet`: the key-managed transaction graph, coin selection, signing,
//! and encrypted snapshot persistence layer for an embeddable Bitcoin SPV
//! node.
//!
//! This crate has no network I/O of its own — see `spv-net` for the peer
//! protocol engine and peer group controller that feed it transactions and
//! confirmation events. What lives here is everything a caller needs to
//! turn "a set of keys plus a stream of observed transactions" into a
//! spendable balance and signed outgoing transactions: the four-pool
//! transaction graph (§4.6), coin selection, signature production, and
//! at-rest wallet encryption.

pub mod confidence;
pub mod encryption;
pub mod error;
pub mod key;
pub mod pool;
pub mod selection;
pub mod signing;
pub mod snapshot;
pub mod wallet;

pub use confidence::{Confidence, Source};
pub use error::{Error, Result};
pub use key::EcKey;
pub use pool::{Pool, TrackedTransaction, TransactionGraph};
pub use selection::{CoinSelector, LargestFirstSelector, Selection, Utxo};
pub use wallet::{Wallet, WalletChainListener};
