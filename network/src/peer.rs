//! The per-connection protocol engine (§4.4): handshake, keepalive, header
//! sync, transaction relay, and Bloom-filtered merkle block validation for
//! a single peer.
//!
//! A [`PeerHandle`] is cheap to clone and hands every request off to a pair
//! of background tasks — one draining an outbound queue onto the socket,
//! one decoding frames off it — so callers never block on peer I/O. Both
//! tasks exit, and every outstanding [`Promise`] fails with
//! [`Error::Disconnected`], the moment either half of the socket closes.

use crate::error::{Error, Result};
use crate::transport::FrameCodec;
use parking_lot::Mutex as SyncMutex;
use spv_core::bloom::BloomFilter;
use spv_core::config::Config;
use spv_core::fingerprint::Fingerprint;
use spv_core::header::Header;
use spv_core::messages::{
    FilterAddPayload, FilterClearPayload, FilterLoadPayload, GetDataPayload, GetHeadersPayload,
    InventoryItem, InventoryKind, Message, MemPoolPayload, PingPayload, PongPayload, RejectPayload,
    VerAckPayload, VersionPayload,
};
use spv_core::network_params::NetworkParams;
use spv_core::promise::{promise, Completer, Promise};
use spv_core::transaction::Transaction;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: i32 = 70016;
const MIN_PEER_VERSION: i32 = 70001;
const NODE_NETWORK: u64 = 1;
const NODE_BLOOM: u64 = 1 << 2;

/// Events a peer's reader task delivers to whoever is driving this
/// connection (ordinarily the peer group, §4.5).
#[derive(Debug)]
pub enum PeerEvent {
    Handshook { best_height: i32, services: u64, user_agent: String },
    Headers(Vec<Header>),
    Transaction(Transaction),
    MerkleBlock { header: Header, total_transactions: u32, hashes: Vec<Fingerprint>, flags: Vec<u8> },
    InventoryAnnounced(Vec<InventoryItem>),
    Reject(RejectPayload),
    Disconnected,
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// State shared between a peer's tasks and its [`PeerHandle`]s.
struct PeerShared {
    best_height: AtomicI32,
    services: AtomicU64,
    user_agent: SyncMutex<String>,
    handshook: AtomicBool,
    last_activity_millis: AtomicU64,
    started_at: Instant,
    pending_tx_acks: SyncMutex<HashMap<Fingerprint, Completer<(), Error>>>,
}

impl PeerShared {
    fn touch(&self) {
        self.last_activity_millis.store(self.started_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity_millis.load(Ordering::Relaxed);
        self.started_at.elapsed().saturating_sub(Duration::from_millis(last))
    }
}

/// A lightweight, cloneable reference to a live peer connection.
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    shared: Arc<PeerShared>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl PeerHandle {
    pub fn best_height(&self) -> i32 {
        self.shared.best_height.load(Ordering::Relaxed)
    }

    pub fn services(&self) -> u64 {
        self.shared.services.load(Ordering::Relaxed)
    }

    pub fn user_agent(&self) -> String {
        self.shared.user_agent.lock().clone()
    }

    pub fn is_handshook(&self) -> bool {
        self.shared.handshook.load(Ordering::Relaxed)
    }

    /// Time elapsed since this peer last sent anything, used by the silence
    /// watchdog (§5).
    pub fn idle_for(&self) -> Duration {
        self.shared.idle_for()
    }

    fn send(&self, message: Message) -> Result<()> {
        self.outbound.send(message).map_err(|_| Error::Disconnected)
    }

    pub fn request_headers(&self, locator: Vec<Fingerprint>, stop_hash: Fingerprint) -> Result<()> {
        self.send(Message::GetHeaders(GetHeadersPayload { version: PROTOCOL_VERSION, locator_hashes: locator, stop_hash }))
    }

    pub fn send_inv(&self, items: Vec<InventoryItem>) -> Result<()> {
        self.send(Message::Inv(spv_core::messages::InvPayload(items)))
    }

    pub fn request_data(&self, items: Vec<InventoryItem>) -> Result<()> {
        self.send(Message::GetData(GetDataPayload(items)))
    }

    pub fn send_transaction(&self, tx: Transaction) -> Result<()> {
        self.send(Message::Tx(spv_core::messages::TxPayload(tx)))
    }

    pub fn load_filter(&self, filter: BloomFilter) -> Result<()> {
        self.send(Message::FilterLoad(FilterLoadPayload(filter)))
    }

    pub fn add_filter_element(&self, element: Vec<u8>) -> Result<()> {
        self.send(Message::FilterAdd(FilterAddPayload(element)))
    }

    pub fn clear_filter(&self) -> Result<()> {
        self.send(Message::FilterClear(FilterClearPayload))
    }

    pub fn request_mempool(&self) -> Result<()> {
        self.send(Message::MemPool(MemPoolPayload))
    }

    /// Announces `tx` to this peer and returns a promise that resolves once
    /// the peer `getdata`s it back (accepted) or `reject`s it (refused).
    /// Dropped along with the connection if neither happens.
    pub fn announce_transaction(&self, tx: &Transaction) -> Result<Promise<(), Error>> {
        let txid = tx.txid();
        let (completer, promise) = promise::<(), Error>();
        self.shared.pending_tx_acks.lock().insert(txid, completer);
        self.send_inv(vec![InventoryItem { kind: InventoryKind::Transaction, hash: txid }])?;
        Ok(promise)
    }
}

/// Performs the outbound (dialing) handshake and spawns the connection's
/// background tasks, returning once `verack` has been exchanged both ways.
pub async fn connect(
    addr: SocketAddr,
    params: &NetworkParams,
    config: &Config,
    our_height: i32,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> Result<(PeerHandle, tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)> {
    let stream = time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout("connect"))??;
    handshake_and_spawn(stream, addr, params, config, our_height, events, true).await
}

/// Performs the inbound (listening) handshake and spawns the connection's
/// background tasks.
pub async fn accept(
    stream: TcpStream,
    addr: SocketAddr,
    params: &NetworkParams,
    config: &Config,
    our_height: i32,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> Result<(PeerHandle, tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)> {
    handshake_and_spawn(stream, addr, params, config, our_height, events, false).await
}

fn version_payload(addr: SocketAddr, our_height: i32, config: &Config) -> VersionPayload {
    let nonce: u64 = rand::random();
    VersionPayload {
        version: PROTOCOL_VERSION,
        services: NODE_NETWORK | NODE_BLOOM,
        timestamp: now_secs(),
        receiver_services: 0,
        receiver_ip: match addr.ip() {
            std::net::IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            std::net::IpAddr::V6(v6) => v6.octets(),
        },
        receiver_port: addr.port(),
        sender_services: NODE_NETWORK | NODE_BLOOM,
        sender_ip: [0u8; 16],
        sender_port: 0,
        nonce,
        user_agent: config.user_agent.clone(),
        start_height: our_height,
        relay: true,
    }
}

async fn handshake_and_spawn(
    stream: TcpStream,
    addr: SocketAddr,
    params: &NetworkParams,
    config: &Config,
    our_height: i32,
    events: mpsc::UnboundedSender<PeerEvent>,
    initiator: bool,
) -> Result<(PeerHandle, tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)> {
    stream.set_nodelay(true).ok();
    let codec = FrameCodec::new(params.magic);
    let (mut read_half, mut write_half) = stream.into_split();

    let our_version = version_payload(addr, our_height, config);
    time::timeout(config.handshake_timeout, codec.write_message(&mut write_half, &Message::Version(our_version)))
        .await
        .map_err(|_| Error::Timeout("handshake"))??;

    let mut peer_version: Option<VersionPayload> = None;
    let mut sent_verack = false;
    let mut received_verack = false;
    while peer_version.is_none() || !sent_verack || !received_verack {
        let message = time::timeout(config.handshake_timeout, codec.read_message(&mut read_half))
            .await
            .map_err(|_| Error::Timeout("handshake"))??;
        match message {
            Message::Version(v) => {
                if v.version < MIN_PEER_VERSION {
                    return Err(Error::ProtocolVersionTooLow { actual: v.version, minimum: MIN_PEER_VERSION });
                }
                peer_version = Some(v);
                if !sent_verack {
                    codec.write_message(&mut write_half, &Message::VerAck(VerAckPayload)).await?;
                    sent_verack = true;
                }
            }
            Message::VerAck(_) => received_verack = true,
            other => {
                debug!(command = other.command(), "ignoring non-handshake message during handshake");
            }
        }
    }
    let peer_version = peer_version.expect("loop only exits once set");
    let _ = initiator;

    debug!(%addr, version = peer_version.version, user_agent = %peer_version.user_agent, "handshake complete");

    let shared = Arc::new(PeerShared {
        best_height: AtomicI32::new(peer_version.start_height),
        services: AtomicU64::new(peer_version.services),
        user_agent: SyncMutex::new(peer_version.user_agent.clone()),
        handshook: AtomicBool::new(true),
        last_activity_millis: AtomicU64::new(0),
        started_at: Instant::now(),
        pending_tx_acks: SyncMutex::new(HashMap::new()),
    });

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let handle = PeerHandle { addr, shared: shared.clone(), outbound: outbound_tx.clone() };

    let _ = events.send(PeerEvent::Handshook {
        best_height: peer_version.start_height,
        services: peer_version.services,
        user_agent: peer_version.user_agent,
    });

    let writer_codec = FrameCodec::new(params.magic);
    let writer_task = tokio::spawn(run_writer(writer_codec, write_half, outbound_rx));

    let reader_codec = FrameCodec::new(params.magic);
    let reader_task = tokio::spawn(run_reader(
        reader_codec,
        read_half,
        shared,
        outbound_tx,
        events,
        config.keepalive_interval,
        config.peer_silence_timeout,
    ));

    Ok((handle, reader_task, writer_task))
}

async fn run_writer<W: AsyncWrite + Unpin>(codec: FrameCodec, mut write_half: W, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Err(error) = codec.write_message(&mut write_half, &message).await {
            warn!(%error, "peer write failed, closing connection");
            break;
        }
    }
}

async fn run_reader<R: AsyncRead + Unpin>(
    codec: FrameCodec,
    mut read_half: R,
    shared: Arc<PeerShared>,
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<PeerEvent>,
    keepalive_interval: Duration,
    silence_timeout: Duration,
) {
    let mut ticker = time::interval(keepalive_interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if shared.idle_for() > silence_timeout {
                    warn!("peer silent past timeout, closing connection");
                    break;
                }
                let nonce: u64 = rand::random();
                if outbound.send(Message::Ping(PingPayload(nonce))).is_err() {
                    break;
                }
            }
            result = codec.read_message(&mut read_half) => {
                match result {
                    Ok(message) => {
                        shared.touch();
                        if !handle_message(message, &shared, &outbound, &events) {
                            break;
                        }
                    }
                    Err(error) => {
                        debug!(%error, "peer read failed, closing connection");
                        break;
                    }
                }
            }
        }
    }

    let _ = events.send(PeerEvent::Disconnected);
    // Fail every transaction broadcast still waiting on this peer rather
    // than leaving its promise abandoned silently.
    for (_, completer) in shared.pending_tx_acks.lock().drain() {
        completer.fail(Error::Disconnected);
    }
}

/// Returns `false` to signal the reader loop should stop (peer sent
/// something that ends the connection, or the connection itself is done).
fn handle_message(
    message: Message,
    shared: &Arc<PeerShared>,
    outbound: &mpsc::UnboundedSender<Message>,
    events: &mpsc::UnboundedSender<PeerEvent>,
) -> bool {
    match message {
        Message::Ping(PingPayload(nonce)) => {
            let _ = outbound.send(Message::Pong(PongPayload(nonce)));
            true
        }
        Message::Pong(_) => true,
        Message::Headers(payload) => {
            let _ = events.send(PeerEvent::Headers(payload.headers));
            true
        }
        Message::Inv(payload) => {
            let tracked: Vec<InventoryItem> = payload
                .0
                .iter()
                .filter(|item| matches!(item.kind, InventoryKind::Transaction | InventoryKind::WitnessTransaction))
                .copied()
                .collect();
            for item in &tracked {
                if let Some(completer) = shared.pending_tx_acks.lock().remove(&item.hash) {
                    completer.succeed(());
                }
            }
            let _ = events.send(PeerEvent::InventoryAnnounced(payload.0));
            true
        }
        Message::GetData(payload) => {
            for item in payload.0 {
                if let Some(completer) = shared.pending_tx_acks.lock().remove(&item.hash) {
                    completer.succeed(());
                }
            }
            true
        }
        Message::Tx(payload) => {
            let _ = events.send(PeerEvent::Transaction(payload.0));
            true
        }
        Message::MerkleBlock(payload) => {
            let _ = events.send(PeerEvent::MerkleBlock {
                header: payload.header,
                total_transactions: payload.total_transactions,
                hashes: payload.hashes,
                flags: payload.flags,
            });
            true
        }
        Message::Reject(payload) => {
            if payload.message == "tx" && payload.data.len() == 32 {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&payload.data);
                if let Some(completer) = shared.pending_tx_acks.lock().remove(&Fingerprint(raw)) {
                    completer.fail(Error::RejectedTransaction {
                        txid: Fingerprint(raw),
                        reason: payload.reason.clone(),
                    });
                }
            }
            let _ = events.send(PeerEvent::Reject(payload));
            true
        }
        Message::Version(_) | Message::VerAck(_) => {
            debug!("ignoring repeated handshake message after handshake");
            true
        }
        Message::GetHeaders(_) | Message::GetBlocks(_) | Message::Block(_) | Message::MemPool(_)
        | Message::FilterLoad(_) | Message::FilterAdd(_) | Message::FilterClear(_)
        | Message::SendHeaders(_) | Message::FeeFilter(_) | Message::NotFound(_) | Message::Addr(_)
        | Message::AddrV2(_) => true,
        Message::Unknown { command, .. } => {
            debug!(%command, "ignoring unknown message");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_core::network_params::Network;
    use tokio::net::TcpListener;

    async fn handshake_pair() -> (PeerHandle, PeerHandle) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let params = Network::Regtest.params();
        let config = Config::builder(Network::Regtest).handshake_timeout(Duration::from_secs(5)).build();

        let (client_events_tx, _client_events_rx) = mpsc::unbounded_channel();
        let (server_events_tx, _server_events_rx) = mpsc::unbounded_channel();

        let server_params = params.clone();
        let server_config = config.clone();
        let server = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            accept(stream, peer_addr, &server_params, &server_config, 0, server_events_tx).await.unwrap()
        });

        let (client_handle, _client_reader, _client_writer) =
            connect(addr, &params, &config, 0, client_events_tx).await.unwrap();
        let (server_handle, _server_reader, _server_writer) = server.await.unwrap();

        (client_handle, server_handle)
    }

    #[tokio::test]
    async fn handshake_completes_and_exposes_peer_version_info() {
        let (client, server) = handshake_pair().await;
        assert!(client.is_handshook());
        assert!(server.is_handshook());
    }
}
