//! End-to-end broadcast-quorum scenario (§8 scenario 6): a transaction is
//! announced to several peers and the broadcast succeeds once a majority
//! `getdata` it, regardless of what a straggling peer does afterward.

use spv_core::amount::Amount;
use spv_core::config::Config;
use spv_core::fingerprint::{Fingerprint, Hash160};
use spv_core::header_store::HeaderStore;
use spv_core::messages::{
    GetDataPayload, InvPayload, InventoryItem, InventoryKind, Message, RejectPayload, VerAckPayload, VersionPayload,
};
use spv_core::network_params::Network;
use spv_core::script::Script;
use spv_core::transaction::{OutPoint, Transaction, TxInput, TxOutput};
use spv_core::chain::BlockChain;
use spv_net::peer_group::PeerGroupBuilder;
use spv_net::transport::FrameCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

fn one_in_one_out_transaction() -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint { txid: Fingerprint::hash(b"some confirmed parent"), index: 0 },
            script_sig: Script::new(Vec::new()),
            sequence: TxInput::FINAL_SEQUENCE,
            witness: Vec::new(),
        }],
        outputs: vec![TxOutput {
            value: Amount::from_units(40_000),
            script_pubkey: Script::new_p2wpkh(&Hash160::hash(b"recipient")),
        }],
        lock_time: 0,
    }
}

/// A bare-socket stand-in for a peer that speaks just enough of the wire
/// protocol to complete the version handshake and then read/write whatever
/// messages the test drives it with directly, bypassing `PeerHandle` (which
/// has no way to emit a `reject`).
struct MockPeer {
    codec: FrameCodec,
    stream: TcpStream,
}

impl MockPeer {
    async fn connect(addr: SocketAddr, magic: [u8; 4]) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let codec = FrameCodec::new(magic);
        let mut mock = MockPeer { codec, stream };
        mock.handshake().await;
        mock
    }

    async fn handshake(&mut self) {
        let version = Message::Version(VersionPayload {
            version: 70016,
            services: 0,
            timestamp: 0,
            receiver_services: 0,
            receiver_ip: [0u8; 16],
            receiver_port: 0,
            sender_services: 0,
            sender_ip: [0u8; 16],
            sender_port: 0,
            nonce: rand::random(),
            user_agent: "/mock:0.1/".to_string(),
            start_height: 0,
            relay: true,
        });
        self.codec.write_message(&mut self.stream, &version).await.unwrap();

        let mut got_version = false;
        let mut got_verack = false;
        let mut sent_verack = false;
        while !got_version || !got_verack {
            let message = self.codec.read_message(&mut self.stream).await.unwrap();
            match message {
                Message::Version(_) => {
                    got_version = true;
                    if !sent_verack {
                        self.codec.write_message(&mut self.stream, &Message::VerAck(VerAckPayload)).await.unwrap();
                        sent_verack = true;
                    }
                }
                Message::VerAck(_) => got_verack = true,
                _ => {}
            }
        }
    }

    /// Reads messages until an `inv` announcing `txid` arrives.
    async fn await_announcement(&mut self, txid: Fingerprint) {
        loop {
            match self.codec.read_message(&mut self.stream).await.unwrap() {
                Message::Inv(InvPayload(items)) if items.iter().any(|i| i.hash == txid) => return,
                Message::Ping(p) => {
                    self.codec.write_message(&mut self.stream, &Message::Pong(spv_core::messages::PongPayload(p.0))).await.unwrap();
                }
                _ => {}
            }
        }
    }

    async fn ack(&mut self, txid: Fingerprint) {
        let getdata = Message::GetData(GetDataPayload(vec![InventoryItem { kind: InventoryKind::Transaction, hash: txid }]));
        self.codec.write_message(&mut self.stream, &getdata).await.unwrap();
    }

    async fn reject(&mut self, txid: Fingerprint) {
        let reject = Message::Reject(RejectPayload {
            message: "tx".to_string(),
            code: 0x12,
            reason: "mock refusal".to_string(),
            data: txid.0.to_vec(),
        });
        self.codec.write_message(&mut self.stream, &reject).await.unwrap();
    }
}

#[tokio::test]
async fn broadcast_succeeds_once_majority_ack_and_a_late_reject_does_not_undo_it() {
    let params = Network::Regtest.params();
    let config = Config::builder(Network::Regtest)
        .max_broadcast_peers(4)
        .broadcast_ack_timeout(Duration::from_secs(5))
        .build();

    let store = Arc::new(HeaderStore::open(tempfile::NamedTempFile::new().unwrap().path(), config.header_store_capacity).unwrap());
    let chain = Arc::new(Mutex::new(BlockChain::new(store, params.clone()).unwrap()));
    let group = PeerGroupBuilder::new(params.clone(), config).build(chain);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving_group = group.clone();
    tokio::spawn(async move { serving_group.serve_inbound(listener).await });

    let mut mocks = Vec::new();
    for _ in 0..4 {
        mocks.push(MockPeer::connect(addr, params.magic).await);
    }

    while group.peer_count().await < 4 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let tx = one_in_one_out_transaction();
    let txid = tx.txid();

    let broadcast_group = group.clone();
    let broadcast_tx = tx.clone();
    let broadcast = tokio::spawn(async move { broadcast_group.broadcast_transaction(broadcast_tx).await });

    let mut stragler = mocks.pop().unwrap();
    for mock in &mut mocks {
        mock.await_announcement(txid).await;
        mock.ack(txid).await;
    }

    let result = broadcast.await.unwrap();
    assert!(result.is_ok(), "broadcast should succeed once 3 of 4 peers ack: {result:?}");

    // The fourth peer's reject arrives only after the broadcast has already
    // resolved; it must not be able to turn a completed success into a
    // failure.
    stragler.await_announcement(txid).await;
    stragler.reject(txid).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(result.is_ok());
}
