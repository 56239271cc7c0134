//! `spv-net`: the peer-to-peer protocol engine and peer group controller
//! for an embeddable Bitcoin SPV node.
//!
//! This crate owns every bit of network I/O: framing the wire protocol
//! (§4.1/§4.4), driving a single peer connection's handshake/keepalive/sync
//! state machine (§4.4), and coordinating a fleet of such connections —
//! discovery, dialing policy, download-peer election, transaction
//! broadcast, and Bloom filter distribution (§4.5). `spv-core` supplies the
//! codec and header chain; `spv-wallet` supplies the transaction graph this
//! crate feeds and broadcasts from, reached only through the [`WalletSink`]
//! trait so a [`peer_group::PeerGroup`] can hold wallets of differing coin
//! selection strategies side by side.

pub mod discovery;
pub mod error;
pub mod peer;
pub mod peer_group;
pub mod transport;

use spv_core::fingerprint::Hash160;
use spv_core::transaction::Transaction;
use spv_wallet::confidence::Source;
use spv_wallet::pool::Pool;
use spv_wallet::selection::CoinSelector;
use spv_wallet::Wallet;

pub use error::{Error, Result};
pub use peer::{PeerEvent, PeerHandle};
pub use peer_group::{PeerGroup, PeerGroupBuilder};

/// The narrow view of a wallet the peer group needs: which hashes to watch
/// for, where to file observed transactions, and how to advance
/// confirmation bookkeeping. Kept separate from [`spv_wallet::Wallet`]'s
/// full API (and its `CoinSelector` type parameter) so a peer group can
/// hold a heterogeneous set of wallets behind one trait object.
#[async_trait::async_trait]
pub trait WalletSink: Send + Sync {
    async fn owned_hashes(&self) -> Vec<Hash160>;
    async fn observe_transaction(&self, tx: Transaction, source: Source) -> bool;
    async fn confirm_transaction(&self, txid: &spv_core::fingerprint::Fingerprint, height: u32);
    /// Transactions this wallet has broadcast or observed but that are not
    /// yet confirmed, used to drive periodic rebroadcast (§4.5).
    async fn pending_transactions(&self) -> Vec<Transaction>;
}

#[async_trait::async_trait]
impl<S: CoinSelector + Send + Sync + 'static> WalletSink for Wallet<S> {
    async fn owned_hashes(&self) -> Vec<Hash160> {
        self.owned_hashes().await
    }

    async fn observe_transaction(&self, tx: Transaction, source: Source) -> bool {
        self.observe_transaction(tx, source).await
    }

    async fn confirm_transaction(&self, txid: &spv_core::fingerprint::Fingerprint, height: u32) {
        self.confirm_transaction(txid, height).await
    }

    async fn pending_transactions(&self) -> Vec<Transaction> {
        self.transactions()
            .await
            .into_iter()
            .filter(|t| t.pool == Pool::Pending)
            .map(|t| t.transaction)
            .collect()
    }
}
