//! The `Wallet`: ties together key storage, the transaction graph, coin
//! selection, signing, and persistence into the surface most callers use.

use crate::confidence::Source;
use crate::encryption::ScryptCost;
use crate::error::{Error, Result};
use crate::key::EcKey;
use crate::pool::{Pool, TrackedTransaction, TransactionGraph};
use crate::selection::{CoinSelector, LargestFirstSelector, Selection, Utxo};
use crate::signing::sign_input;
use crate::snapshot::{spawn_autosave, Snapshot};
use spv_core::amount::Amount;
use spv_core::chain::ChainListener;
use spv_core::fingerprint::{Fingerprint, Hash160};
use spv_core::header::StoredHeader;
use spv_core::script::{Script, ScriptVariant};
use spv_core::transaction::{OutPoint, Transaction, TxOutput};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How the wallet's keys are persisted at rest.
enum KeyGuard {
    Plain,
    Encrypted { passphrase: String, cost: ScryptCost },
}

/// A key-managed, chain-aware Bitcoin SPV wallet.
///
/// Holds a set of [`EcKey`]s, tracks every transaction that touches them in
/// a [`TransactionGraph`], and can be registered as a [`ChainListener`] so
/// its confidence bookkeeping advances automatically as the header chain
/// grows.
pub struct Wallet<S: CoinSelector = LargestFirstSelector> {
    keys: Arc<Mutex<Vec<EcKey>>>,
    graph: Arc<Mutex<TransactionGraph>>,
    selector: S,
    snapshot_path: PathBuf,
    guard: KeyGuard,
}

impl Wallet<LargestFirstSelector> {
    /// Creates an empty, unencrypted wallet that persists to `snapshot_path`.
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Wallet {
            keys: Arc::new(Mutex::new(Vec::new())),
            graph: Arc::new(Mutex::new(TransactionGraph::new())),
            selector: LargestFirstSelector,
            snapshot_path: snapshot_path.into(),
            guard: KeyGuard::Plain,
        }
    }

    /// Loads a wallet from an existing unencrypted snapshot.
    pub fn load(snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let (keys, graph) = Snapshot::read(&snapshot_path, None)?;
        Ok(Wallet {
            keys: Arc::new(Mutex::new(keys)),
            graph: Arc::new(Mutex::new(graph)),
            selector: LargestFirstSelector,
            snapshot_path,
            guard: KeyGuard::Plain,
        })
    }

    /// Loads a wallet whose snapshot key material is encrypted under
    /// `passphrase`, keeping the passphrase in memory so later autosaves
    /// stay encrypted.
    pub fn load_encrypted(snapshot_path: impl Into<PathBuf>, passphrase: &str, cost: ScryptCost) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let (keys, graph) = Snapshot::read(&snapshot_path, Some((passphrase, cost)))?;
        Ok(Wallet {
            keys: Arc::new(Mutex::new(keys)),
            graph: Arc::new(Mutex::new(graph)),
            selector: LargestFirstSelector,
            snapshot_path,
            guard: KeyGuard::Encrypted { passphrase: passphrase.to_string(), cost },
        })
    }
}

impl<S: CoinSelector> Wallet<S> {
    /// Replaces the coin selection strategy.
    pub fn with_selector<S2: CoinSelector>(self, selector: S2) -> Wallet<S2> {
        Wallet {
            keys: self.keys,
            graph: self.graph,
            selector,
            snapshot_path: self.snapshot_path,
            guard: self.guard,
        }
    }

    /// Enables passphrase encryption for future saves of this wallet.
    pub async fn encrypt_with(&mut self, passphrase: &str, cost: ScryptCost) {
        self.guard = KeyGuard::Encrypted { passphrase: passphrase.to_string(), cost };
    }

    /// Generates a new keypair, adds it to the wallet, and returns its
    /// P2WPKH receive script.
    pub async fn new_receive_address(&self) -> Script {
        let key = EcKey::generate();
        let script = key.p2wpkh_script();
        self.keys.lock().await.push(key);
        script
    }

    /// Returns every HASH160 this wallet holds a key for.
    pub async fn owned_hashes(&self) -> Vec<Hash160> {
        self.keys.lock().await.iter().map(|k| k.hash160()).collect()
    }

    /// Submits a transaction observed from the network or created locally
    /// into the transaction graph.
    pub async fn observe_transaction(&self, tx: Transaction, source: Source) -> bool {
        self.graph.lock().await.insert(tx, source)
    }

    /// Marks a tracked transaction confirmed at `height`.
    pub async fn confirm_transaction(&self, txid: &Fingerprint, height: u32) {
        self.graph.lock().await.confirm(txid, height);
    }

    /// Returns the wallet's available (unspent, not yet known-spent) coins,
    /// restricted to outputs whose script this wallet can sign for.
    pub async fn spendable_utxos(&self) -> Vec<Utxo> {
        let keys = self.keys.lock().await;
        let graph = self.graph.lock().await;
        let owned: Vec<Hash160> = keys.iter().map(|k| k.hash160()).collect();

        let mut utxos = Vec::new();
        for tracked in graph.iter_pool(Pool::Unspent) {
            let txid = tracked.transaction.txid();
            for (index, output) in tracked.transaction.outputs.iter().enumerate() {
                if output_is_owned(output, &owned) {
                    utxos.push(Utxo { outpoint: OutPoint { txid, index: index as u32 }, output: output.clone() });
                }
            }
        }
        utxos
    }

    /// Total confirmed balance across every owned, unspent output.
    pub async fn balance(&self) -> Amount {
        self.spendable_utxos()
            .await
            .iter()
            .fold(Amount::ZERO, |acc, u| (acc + u.output.value).unwrap_or(acc))
    }

    /// Builds and signs a transaction paying `target` to `destination`,
    /// selecting inputs via this wallet's [`CoinSelector`] and returning
    /// change (if any) to a freshly generated address.
    pub async fn create_transaction(
        &self,
        destination: Script,
        target: Amount,
        fee: Amount,
    ) -> Result<Transaction> {
        let available = self.spendable_utxos().await;
        let total_available: i64 = available.iter().map(|u| u.output.value.as_units()).sum();

        let Selection { inputs, change } = self
            .selector
            .select(&available, target, fee)
            .ok_or(Error::InsufficientFunds { needed: (target + fee).map(|a| a.as_units()).unwrap_or(i64::MAX), available: total_available })?;

        let mut outputs = vec![TxOutput { value: target, script_pubkey: destination }];
        if change.as_units() > 0 {
            let change_script = self.new_receive_address().await;
            outputs.push(TxOutput { value: change, script_pubkey: change_script });
        }

        let mut tx = Transaction {
            version: 2,
            inputs: inputs
                .iter()
                .map(|u| spv_core::transaction::TxInput {
                    previous_output: u.outpoint,
                    script_sig: Script::new(Vec::new()),
                    sequence: spv_core::transaction::TxInput::FINAL_SEQUENCE,
                    witness: Vec::new(),
                })
                .collect(),
            outputs,
            lock_time: 0,
        };

        let keys = self.keys.lock().await;
        for (index, utxo) in inputs.iter().enumerate() {
            let key = key_for_output(&keys, &utxo.output)?;
            sign_input(&mut tx, index, &utxo.output, key)?;
        }

        Ok(tx)
    }

    /// Writes the wallet's current state to its snapshot file.
    pub async fn save(&self) -> Result<()> {
        let keys = self.keys.lock().await;
        let graph = self.graph.lock().await;
        match &self.guard {
            KeyGuard::Plain => Snapshot::write_plain(&self.snapshot_path, &keys, &graph),
            KeyGuard::Encrypted { passphrase, cost } => {
                Snapshot::write_encrypted(&self.snapshot_path, &keys, &graph, passphrase, *cost)
            }
        }
    }

    /// Starts a background task that calls [`Wallet::save`]-equivalent logic
    /// every `interval`, for as long as the returned handle is kept alive.
    pub fn spawn_autosave(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        // Encrypted autosave is intentionally not supported by the
        // background task (it would need to hold the passphrase across an
        // unbounded lifetime); encrypted wallets save explicitly via
        // `save()` instead.
        if matches!(self.guard, KeyGuard::Encrypted { .. }) {
            warn!("autosave is disabled for encrypted wallets; call save() explicitly");
            return tokio::spawn(async {});
        }
        spawn_autosave(self.snapshot_path.clone(), self.keys.clone(), self.graph.clone(), interval)
    }

    pub async fn transactions(&self) -> Vec<TrackedTransaction> {
        self.graph.lock().await.iter().cloned().collect()
    }
}

fn output_is_owned(output: &TxOutput, owned: &[Hash160]) -> bool {
    match output.script_pubkey.classify() {
        ScriptVariant::PayToPubkeyHash(hash) => owned.contains(&hash),
        ScriptVariant::PayToWitnessPubkeyHash(hash) => owned.iter().any(|h| h.0 == hash),
        _ => false,
    }
}

fn key_for_output<'a>(keys: &'a [EcKey], output: &TxOutput) -> Result<&'a EcKey> {
    match output.script_pubkey.classify() {
        ScriptVariant::PayToPubkeyHash(hash) => keys.iter().find(|k| k.hash160() == hash).ok_or(Error::UnknownKey),
        ScriptVariant::PayToWitnessPubkeyHash(hash) => keys.iter().find(|k| k.hash160().0 == hash).ok_or(Error::UnknownKey),
        _ => Err(Error::UnknownKey),
    }
}

/// A [`ChainListener`] that keeps a wallet's confidence bookkeeping current
/// as the header chain advances. Reorg handling here is limited to
/// advancing `Building` depths on a new tip; invalidating transactions
/// confirmed in disconnected blocks would require the wallet to track which
/// block each transaction confirmed in, which it does not do yet.
pub struct WalletChainListener {
    graph: Arc<Mutex<TransactionGraph>>,
}

impl WalletChainListener {
    pub fn new<S: CoinSelector>(wallet: &Wallet<S>) -> Self {
        WalletChainListener { graph: wallet.graph.clone() }
    }
}

impl ChainListener for WalletChainListener {
    fn on_new_best_tip(&self, tip: &StoredHeader) {
        let graph = self.graph.clone();
        let height = tip.height;
        tokio::spawn(async move {
            graph.lock().await.extend_depth(height);
        });
    }

    fn on_reorg(&self, disconnected: &[Fingerprint], connected: &[Fingerprint]) {
        info!(disconnected = disconnected.len(), connected = connected.len(), "chain reorganized");
    }
}
