//! Codec, header chain, and transaction primitives for an embeddable
//! Bitcoin SPV node.
//!
//! This crate has no network I/O of its own — see `spv-net` for the peer
//! protocol engine built on top of it, and `spv-wallet` for the
//! transaction-graph and signing layer. What lives here is everything
//! those two crates (and any other consumer wanting to speak the wire
//! protocol or validate a header chain) share: the P2P wire codec, the
//! header store and chain-acceptance state machine, script/transaction
//! types, Merkle proofs, and a Bloom filter implementation.

pub mod amount;
pub mod bloom;
pub mod chain;
pub mod codec;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod fingerprint;
pub mod header;
pub mod header_store;
pub mod merkle;
pub mod messages;
pub mod network_params;
pub mod promise;
pub mod script;
pub mod sighash;
pub mod transaction;

pub use amount::Amount;
pub use chain::{AcceptOutcome, BlockChain, ChainListener};
pub use codec::{Encodable, Reader, Writer};
pub use config::{Config, ConfigBuilder};
pub use difficulty::Target;
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, Hash160};
pub use header::{CumulativeWork, Header, StoredHeader};
pub use header_store::HeaderStore;
pub use network_params::{Network, NetworkParams};
pub use script::{Script, ScriptVariant};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};
