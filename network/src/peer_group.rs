//! The peer group fleet controller (C5, §4.5): discovery, dialing policy,
//! download-peer election, header-chain synchronization, Bloom filter
//! distribution, transaction broadcast with acknowledgement quorum, and
//! periodic rebroadcast of unconfirmed pending transactions.

use crate::discovery::{resolve_dns_seeds, AddressBook};
use crate::error::{Error, Result};
use crate::peer::{self, PeerEvent, PeerHandle};
use crate::WalletSink;
use spv_core::bloom::{BloomFilter, BloomUpdate};
use spv_core::chain::{AcceptOutcome, BlockChain};
use spv_core::config::Config;
use spv_core::fingerprint::Fingerprint;
use spv_core::header::Header;
use spv_core::messages::{InventoryItem, InventoryKind};
use spv_core::network_params::NetworkParams;
use spv_core::transaction::Transaction;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// How long a dial failure keeps an address off the candidate list.
const DIAL_BACKOFF: Duration = Duration::from_secs(60 * 60);
/// How often the maintenance loop re-evaluates connection count and peer
/// silence.
const MAINTENANCE_TICK: Duration = Duration::from_secs(10);
/// How often unconfirmed pending transactions are re-announced.
const REBROADCAST_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct PeerState {
    handle: PeerHandle,
    connected_since: Instant,
}

/// Builds a [`PeerGroup`] before it starts driving connections.
pub struct PeerGroupBuilder {
    params: NetworkParams,
    config: Config,
    static_seeds: Vec<SocketAddr>,
    wallets: Vec<Arc<dyn WalletSink>>,
}

impl PeerGroupBuilder {
    pub fn new(params: NetworkParams, config: Config) -> Self {
        PeerGroupBuilder { params, config, static_seeds: Vec::new(), wallets: Vec::new() }
    }

    pub fn static_seed(mut self, addr: SocketAddr) -> Self {
        self.static_seeds.push(addr);
        self
    }

    pub fn wallet(mut self, wallet: Arc<dyn WalletSink>) -> Self {
        self.wallets.push(wallet);
        self
    }

    pub fn build(self, chain: Arc<Mutex<BlockChain>>) -> Arc<PeerGroup> {
        Arc::new(PeerGroup {
            params: self.params,
            config: self.config,
            chain,
            peers: Mutex::new(HashMap::new()),
            address_book: Mutex::new(AddressBook::new(self.static_seeds)),
            blacklist: Mutex::new(HashMap::new()),
            wallets: Mutex::new(self.wallets),
            filter_epoch: AtomicU64::new(0),
        })
    }
}

/// A running fleet of peer connections, coordinated to keep a header chain
/// and any registered wallets in sync with the network.
pub struct PeerGroup {
    params: NetworkParams,
    config: Config,
    chain: Arc<Mutex<BlockChain>>,
    peers: Mutex<HashMap<SocketAddr, PeerState>>,
    address_book: Mutex<AddressBook>,
    blacklist: Mutex<HashMap<SocketAddr, Instant>>,
    wallets: Mutex<Vec<Arc<dyn WalletSink>>>,
    /// Bumped every time the combined Bloom filter changes so stale
    /// in-flight work can be told apart from current work.
    filter_epoch: AtomicU64,
}

impl PeerGroup {
    /// Seeds the address book from DNS and starts the background
    /// maintenance loop. Returns once the loop has been spawned; peers are
    /// dialed asynchronously as the loop runs.
    pub async fn start(self: &Arc<Self>) {
        let seeds = resolve_dns_seeds(&self.params).await;
        info!(found = seeds.len(), "resolved DNS seeds");
        self.address_book.lock().await.extend(seeds);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let group = self.clone();
        tokio::spawn(async move { group.run_event_loop(events_rx).await });

        let group = self.clone();
        tokio::spawn(async move { group.run_maintenance_loop(events_tx).await });
    }

    /// Accepts inbound connections on `listener` for as long as this
    /// future is polled.
    pub async fn serve_inbound(self: &Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let group = self.clone();
                    tokio::spawn(async move { group.accept_connection(stream, addr).await });
                }
                Err(error) => warn!(%error, "inbound accept failed"),
            }
        }
    }

    async fn our_height(&self) -> i32 {
        self.chain.lock().await.tip().map(|t| t.height as i32).unwrap_or(0)
    }

    async fn run_maintenance_loop(self: Arc<Self>, events_tx: mpsc::UnboundedSender<(SocketAddr, PeerEvent)>) {
        let mut maintenance = tokio::time::interval(MAINTENANCE_TICK);
        let mut rebroadcast = tokio::time::interval(REBROADCAST_INTERVAL);
        loop {
            tokio::select! {
                _ = maintenance.tick() => {
                    self.maintain_connection_count(&events_tx).await;
                    self.enforce_silence_timeout().await;
                }
                _ = rebroadcast.tick() => {
                    self.rebroadcast_pending().await;
                }
            }
        }
    }

    async fn maintain_connection_count(self: &Arc<Self>, events_tx: &mpsc::UnboundedSender<(SocketAddr, PeerEvent)>) {
        self.expire_blacklist().await;
        let current = self.peers.lock().await.len();
        if current >= self.config.max_peers {
            return;
        }
        let excluded: Vec<SocketAddr> = {
            let peers = self.peers.lock().await;
            let blacklist = self.blacklist.lock().await;
            peers.keys().copied().chain(blacklist.keys().copied()).collect()
        };
        let candidate = self.address_book.lock().await.next_candidate(&excluded);
        let Some(addr) = candidate else {
            if current == 0 {
                debug!("no dial candidates available");
            }
            return;
        };

        let group = self.clone();
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            if let Err(error) = group.dial(addr, events_tx).await {
                warn!(%addr, %error, "dial failed");
                group.blacklist.lock().await.insert(addr, Instant::now());
            }
        });
    }

    async fn dial(self: &Arc<Self>, addr: SocketAddr, events_tx: mpsc::UnboundedSender<(SocketAddr, PeerEvent)>) -> Result<()> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let our_height = self.our_height().await;
        let (handle, _reader, _writer) = peer::connect(addr, &self.params, &self.config, our_height, raw_tx).await?;
        self.register_peer(addr, handle, raw_rx, events_tx).await;
        Ok(())
    }

    async fn accept_connection(self: &Arc<Self>, stream: tokio::net::TcpStream, addr: SocketAddr) {
        if self.peers.lock().await.len() >= self.config.max_peers {
            return;
        }
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let our_height = self.our_height().await;
        match peer::accept(stream, addr, &self.params, &self.config, our_height, raw_tx).await {
            Ok((handle, _reader, _writer)) => {
                // Inbound connections feed the same event loop as outbound
                // ones; route through a throwaway channel relayed into it.
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let group = self.clone();
                tokio::spawn(async move { group.run_event_loop(events_rx).await });
                self.register_peer(addr, handle, raw_rx, events_tx).await;
            }
            Err(error) => debug!(%addr, %error, "inbound handshake failed"),
        }
    }

    async fn register_peer(
        self: &Arc<Self>,
        addr: SocketAddr,
        handle: PeerHandle,
        mut raw_rx: mpsc::UnboundedReceiver<PeerEvent>,
        events_tx: mpsc::UnboundedSender<(SocketAddr, PeerEvent)>,
    ) {
        self.peers.lock().await.insert(addr, PeerState { handle: handle.clone(), connected_since: Instant::now() });
        info!(%addr, "peer connected");
        self.sync_filter_for(&handle).await;

        tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                if events_tx.send((addr, event)).is_err() {
                    break;
                }
            }
        });
    }

    async fn expire_blacklist(&self) {
        let mut blacklist = self.blacklist.lock().await;
        blacklist.retain(|_, banned_at| banned_at.elapsed() < DIAL_BACKOFF);
    }

    async fn enforce_silence_timeout(&self) {
        let mut peers = self.peers.lock().await;
        let timeout = self.config.peer_silence_timeout;
        let stale: Vec<SocketAddr> =
            peers.iter().filter(|(_, state)| state.handle.idle_for() > timeout).map(|(addr, _)| *addr).collect();
        for addr in stale {
            warn!(%addr, "dropping peer for silence");
            peers.remove(&addr);
        }
    }

    async fn run_event_loop(self: Arc<Self>, mut events_rx: mpsc::UnboundedReceiver<(SocketAddr, PeerEvent)>) {
        while let Some((addr, event)) = events_rx.recv().await {
            self.handle_event(addr, event).await;
        }
    }

    async fn handle_event(self: &Arc<Self>, addr: SocketAddr, event: PeerEvent) {
        match event {
            PeerEvent::Handshook { best_height, .. } => {
                debug!(%addr, best_height, "peer handshook");
                self.request_headers_from(addr).await;
            }
            PeerEvent::Headers(headers) => self.accept_headers(addr, headers).await,
            PeerEvent::InventoryAnnounced(items) => self.request_unknown_transactions(addr, items).await,
            PeerEvent::Transaction(tx) => self.dispatch_to_wallets(tx, None).await,
            PeerEvent::MerkleBlock { header, total_transactions, hashes, flags } => {
                self.accept_merkle_block(header, total_transactions, hashes, flags).await;
            }
            PeerEvent::Reject(payload) => debug!(%addr, reason = %payload.reason, "peer sent reject"),
            PeerEvent::Disconnected => {
                self.peers.lock().await.remove(&addr);
                info!(%addr, "peer disconnected");
            }
        }
    }

    async fn request_headers_from(&self, addr: SocketAddr) {
        let locator = match self.chain.lock().await.locator() {
            Ok(locator) => locator,
            Err(error) => {
                warn!(%error, "failed to build block locator");
                return;
            }
        };
        if let Some(state) = self.peers.lock().await.get(&addr) {
            if let Err(error) = state.handle.request_headers(locator, Fingerprint::ZERO) {
                debug!(%addr, %error, "failed to request headers");
            }
        }
    }

    async fn accept_headers(&self, addr: SocketAddr, headers: Vec<Header>) {
        if headers.is_empty() {
            return;
        }
        let count = headers.len();
        let mut chain = self.chain.lock().await;
        let mut advanced = false;
        for header in headers {
            match chain.accept_header(header) {
                Ok(AcceptOutcome::Extended { .. }) | Ok(AcceptOutcome::Reorg { .. }) => advanced = true,
                Ok(_) => {}
                Err(error) => {
                    warn!(%addr, %error, "rejected header");
                    return;
                }
            }
        }
        drop(chain);
        // A full batch likely means more headers follow; a short or
        // one-header batch means we have caught up to this peer's tip for
        // now, but we still ask again to pick up anything announced since.
        if advanced || count > 1 {
            self.request_headers_from(addr).await;
        }
    }

    async fn request_unknown_transactions(&self, addr: SocketAddr, items: Vec<InventoryItem>) {
        let wanted: Vec<InventoryItem> = items
            .into_iter()
            .filter(|item| matches!(item.kind, InventoryKind::Transaction | InventoryKind::WitnessTransaction))
            .collect();
        if wanted.is_empty() {
            return;
        }
        if let Some(state) = self.peers.lock().await.get(&addr) {
            if let Err(error) = state.handle.request_data(wanted) {
                debug!(%addr, %error, "failed to request announced transaction");
            }
        }
    }

    async fn accept_merkle_block(&self, header: Header, total_transactions: u32, hashes: Vec<Fingerprint>, flags: Vec<u8>) {
        let expected_root = header.merkle_root;
        let flags = spv_core::messages::unpack_flag_bits(&flags, flags.len() * 8);
        let tree = spv_core::merkle::PartialMerkleTree { total_transactions, hashes, flags };
        let Some(matched) = tree.extract_matches(&expected_root) else {
            warn!("discarding merkleblock with a bad partial Merkle proof");
            return;
        };
        let height = self.chain.lock().await.get(&header.fingerprint()).ok().flatten().map(|h| h.height);
        for txid in matched {
            if let Some(height) = height {
                let wallets = self.wallets.lock().await;
                for wallet in wallets.iter() {
                    wallet.confirm_transaction(&txid, height).await;
                }
            }
        }
    }

    async fn dispatch_to_wallets(&self, tx: Transaction, confirmed_height: Option<u32>) {
        let wallets = self.wallets.lock().await;
        let txid = tx.txid();
        for wallet in wallets.iter() {
            wallet.observe_transaction(tx.clone(), spv_wallet::confidence::Source::Network).await;
            if let Some(height) = confirmed_height {
                wallet.confirm_transaction(&txid, height).await;
            }
        }
    }

    /// Recomputes the combined Bloom filter across every registered
    /// wallet's owned hashes and installs it on every connected peer.
    /// Called whenever a wallet's key set changes; callers observe this
    /// indirectly by calling [`PeerGroup::refresh_filters`].
    pub async fn refresh_filters(self: &Arc<Self>) {
        self.filter_epoch.fetch_add(1, Ordering::SeqCst);
        let filter = self.build_combined_filter().await;
        let peers = self.peers.lock().await;
        for state in peers.values() {
            if let Err(error) = state.handle.load_filter(filter.clone()) {
                debug!(%error, "failed to load filter on peer");
            }
        }
    }

    async fn sync_filter_for(&self, handle: &PeerHandle) {
        let filter = self.build_combined_filter().await;
        if let Err(error) = handle.load_filter(filter) {
            debug!(%error, "failed to load initial filter on peer");
        }
    }

    async fn build_combined_filter(&self) -> BloomFilter {
        let wallets = self.wallets.lock().await;
        let mut hashes = Vec::new();
        for wallet in wallets.iter() {
            hashes.extend(wallet.owned_hashes().await);
        }
        let mut filter = BloomFilter::new(
            hashes.len().max(1) as u32,
            self.config.bloom_false_positive_rate,
            rand::random(),
            BloomUpdate::All,
        );
        for hash in &hashes {
            filter.insert(&hash.0);
        }
        filter
    }

    /// Announces `tx` to up to `max_broadcast_peers` connected peers and
    /// waits for a majority of them to `getdata` it back, failing with
    /// [`Error::BroadcastFailed`] if too few do within the configured
    /// acknowledgement window.
    pub async fn broadcast_transaction(&self, tx: Transaction) -> Result<()> {
        let targets: Vec<PeerHandle> = {
            let peers = self.peers.lock().await;
            peers.values().take(self.config.max_broadcast_peers).map(|s| s.handle.clone()).collect()
        };
        if targets.is_empty() {
            return Err(Error::NoAddressesAvailable);
        }

        let needed = targets.len().div_ceil(2).max(1);
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<bool>();
        for handle in &targets {
            let promise = handle.announce_transaction(&tx)?;
            let ack_tx = ack_tx.clone();
            tokio::spawn(async move {
                let acked = promise.await_result().await.is_ok();
                let _ = ack_tx.send(acked);
            });
        }
        drop(ack_tx);

        let mut acked = 0usize;
        let deadline = tokio::time::sleep(self.config.broadcast_ack_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                received = ack_rx.recv() => {
                    match received {
                        Some(true) => {
                            acked += 1;
                            if acked >= needed {
                                return Ok(());
                            }
                        }
                        Some(false) => {}
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        if acked >= needed {
            Ok(())
        } else {
            Err(Error::BroadcastFailed { acked, needed })
        }
    }

    async fn rebroadcast_pending(&self) {
        let wallets = self.wallets.lock().await.clone();
        for wallet in wallets {
            for tx in wallet.pending_transactions().await {
                if let Err(error) = self.broadcast_transaction(tx).await {
                    debug!(%error, "rebroadcast attempt did not reach quorum");
                }
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn register_wallet(&self, wallet: Arc<dyn WalletSink>) {
        self.wallets.lock().await.push(wallet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_core::network_params::Network;

    fn test_group() -> Arc<PeerGroup> {
        let params = Network::Regtest.params();
        let config = Config::builder(Network::Regtest).build();
        let store = Arc::new(
            spv_core::header_store::HeaderStore::open(
                tempfile::NamedTempFile::new().unwrap().path(),
                config.header_store_capacity,
            )
            .unwrap(),
        );
        let chain = Arc::new(Mutex::new(BlockChain::new(store, params.clone()).unwrap()));
        PeerGroupBuilder::new(params, config).build(chain)
    }

    #[tokio::test]
    async fn broadcast_with_no_peers_fails_immediately() {
        let group = test_group();
        let tx = Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        };
        let result = group.broadcast_transaction(tx).await;
        assert!(matches!(result, Err(Error::NoAddressesAvailable)));
    }

    #[tokio::test]
    async fn peer_count_starts_at_zero() {
        let group = test_group();
        assert_eq!(group.peer_count().await, 0);
    }
}
