//! End-to-end scenarios for the header chain and difficulty codec (§8).

use spv_core::chain::{AcceptOutcome, ChainListener};
use spv_core::difficulty::Target;
use spv_core::header::{Header, StoredHeader};
use spv_core::{BlockChain, Fingerprint, HeaderStore, Network};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn open_chain(network: Network) -> BlockChain {
    let dir = tempdir().unwrap();
    let store = Arc::new(HeaderStore::open(dir.path().join("headers.dat"), 16).unwrap());
    std::mem::forget(dir);
    BlockChain::new(store, network.params()).unwrap()
}

/// Scenario 1: a freshly opened mainnet chain has only the genesis header.
#[test]
fn genesis_only_chain_has_height_zero_and_genesis_work() {
    let chain = open_chain(Network::Mainnet);
    let tip = chain.tip().unwrap();
    assert_eq!(tip.height, 0);

    let genesis = Network::Mainnet.params().genesis;
    let expected = StoredHeader::genesis(genesis).unwrap();
    assert_eq!(tip.cumulative_work, expected.cumulative_work);
    assert_eq!(tip.fingerprint(), expected.fingerprint());
}

#[derive(Default)]
struct RecordingListener {
    calls: Mutex<Vec<u32>>,
}

impl ChainListener for RecordingListener {
    fn on_new_best_tip(&self, tip: &StoredHeader) {
        self.calls.lock().unwrap().push(tip.height);
    }
}

/// Scenario 2: the real mainnet block 1 header, accepted atop genesis,
/// extends the tip to height 1 and notifies a registered listener exactly
/// once.
#[test]
fn mainnet_block_one_header_extends_tip_and_notifies_listener_once() {
    let mut chain = open_chain(Network::Mainnet);
    let listener = Arc::new(RecordingListener::default());
    chain.add_listener(listener.clone());

    let genesis_fingerprint = chain.tip().unwrap().fingerprint();

    let block_one = Header {
        version: 1,
        prev_fingerprint: genesis_fingerprint,
        merkle_root: "0e3e2357e806b6cdb1f70b54c3a3a17b6714ee1f0e68bebb44a74b1efd512098"
            .parse()
            .unwrap(),
        timestamp: 1_231_469_665,
        bits: 0x1d00ffff,
        nonce: 2_573_394_689,
    };

    let expected_fingerprint: Fingerprint =
        "00000000839a8e6886ab5951d76f411475428afc90947ee320161bbf18eb6048".parse().unwrap();
    assert_eq!(block_one.fingerprint(), expected_fingerprint);

    let outcome = chain.accept_header(block_one).unwrap();
    assert_eq!(outcome, AcceptOutcome::Extended { height: 1 });
    assert_eq!(chain.tip().unwrap().height, 1);
    assert_eq!(listener.calls.lock().unwrap().as_slice(), &[1]);
}

/// Scenario 3: compact difficulty forms decode to the expected 256-bit
/// targets and round-trip back through `to_compact`.
#[test]
fn compact_difficulty_forms_decode_to_expected_targets() {
    let max_mainnet_target = Target::from_compact(0x1d00ffff).unwrap();
    let mut expected = [0u8; 32];
    expected[4] = 0xff;
    expected[5] = 0xff;
    assert_eq!(*max_mainnet_target.as_be_bytes(), expected);
    assert_eq!(max_mainnet_target.to_compact(), 0x1d00ffff);

    let easiest_regtest_target = Target::from_compact(0x207fffff).unwrap();
    let mut expected_easiest = [0u8; 32];
    expected_easiest[0] = 0x7f;
    expected_easiest[1] = 0xff;
    expected_easiest[2] = 0xff;
    assert_eq!(*easiest_regtest_target.as_be_bytes(), expected_easiest);
    assert_eq!(easiest_regtest_target.to_compact(), 0x207fffff);
}
