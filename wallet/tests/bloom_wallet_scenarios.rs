//! End-to-end wallet scenarios: Bloom filter soundness over a wallet's own
//! keys, and the confirmed-deposit lifecycle through the transaction graph
//! (§8).

use spv_core::bloom::{BloomFilter, BloomUpdate};
use spv_core::fingerprint::{Fingerprint, Hash160};
use spv_core::script::{Script, ScriptVariant};
use spv_core::transaction::{OutPoint, Transaction, TxInput, TxOutput};
use spv_core::amount::Amount;
use spv_wallet::confidence::{Confidence, Source};
use spv_wallet::pool::Pool;
use spv_wallet::wallet::Wallet;
use tempfile::tempdir;

fn deposit_to(hash: Hash160, amount: Amount) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint { txid: Fingerprint::hash(b"funding coinbase"), index: 0 },
            script_sig: Script::new(Vec::new()),
            sequence: TxInput::FINAL_SEQUENCE,
            witness: Vec::new(),
        }],
        outputs: vec![TxOutput { value: amount, script_pubkey: Script::new_p2wpkh(&hash) }],
        lock_time: 0,
    }
}

/// Scenario 5: a wallet with one key, loaded with a Bloom filter over that
/// key, is fed a block containing a payment to it; after chain-accept the
/// payment lands in `unspent` with `Building` confidence at the tip height.
#[tokio::test]
async fn bloom_wallet_round_trip_lands_deposit_in_unspent() {
    let dir = tempdir().unwrap();
    let wallet = Wallet::new(dir.path().join("w.snap"));
    let receive_script = wallet.new_receive_address().await;
    let owned = wallet.owned_hashes().await;
    assert_eq!(owned.len(), 1);
    let owned_hash = owned[0];

    let mut filter = BloomFilter::new(owned.len() as u32, 0.0001, 0, BloomUpdate::All);
    for hash in &owned {
        filter.insert(&hash.0);
    }
    // Filter soundness: the wallet's own key must never be a false negative.
    assert!(filter.contains(&owned_hash.0));

    let deposit = deposit_to(owned_hash, Amount::from_units(75_000));
    let txid = deposit.txid();

    match receive_script.classify() {
        ScriptVariant::PayToWitnessPubkeyHash(h) => assert_eq!(Hash160(h), owned_hash),
        other => panic!("expected a P2WPKH receive script, got {other:?}"),
    }

    assert!(wallet.observe_transaction(deposit, Source::Network).await);

    let tip_height = 712_345;
    wallet.confirm_transaction(&txid, tip_height).await;

    let tracked = wallet.transactions().await;
    assert_eq!(tracked.len(), 1);
    let entry = &tracked[0];
    assert_eq!(entry.transaction.txid(), txid);
    assert_eq!(entry.pool, Pool::Unspent);
    assert_eq!(entry.confidence, Confidence::Building { height: tip_height, depth: 1 });

    let utxos = wallet.spendable_utxos().await;
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].outpoint, OutPoint { txid, index: 0 });
    assert_eq!(wallet.balance().await, Amount::from_units(75_000));
}
