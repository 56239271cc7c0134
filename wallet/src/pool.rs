//! The four-pool transaction graph (§4.5 / §4.6's data model): every
//! transaction the wallet knows about lives in exactly one of four pools at
//! any time, and moves between them as confidence changes and as its
//! outputs are spent.

use crate::confidence::{Confidence, Source};
use serde::{Deserialize, Serialize};
use spv_core::fingerprint::Fingerprint;
use spv_core::transaction::{OutPoint, Transaction};
use std::collections::HashMap;

/// Which pool a tracked transaction currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pool {
    /// Known to the wallet, not yet confirmed, none of its own outputs
    /// spent.
    Pending,
    /// Confirmed, and every output either still unspent or spent only by
    /// other transactions also in `Unspent`/`Spent` (i.e. believed final).
    Unspent,
    /// Confirmed, and at least one output has been spent by another
    /// transaction the wallet also tracks.
    Spent,
    /// Conflicts with a transaction that is `Unspent` or `Spent` (a double
    /// spend was observed), or its confirming block was reorganized out and
    /// it did not reappear.
    Dead,
}

/// A transaction tracked by the wallet, alongside its pool membership and
/// confidence.
#[derive(Debug, Clone)]
pub struct TrackedTransaction {
    pub transaction: Transaction,
    pub pool: Pool,
    pub confidence: Confidence,
    pub source: Source,
}

/// The wallet's view of every transaction it has ever seen touch one of its
/// own keys, indexed by txid.
#[derive(Debug, Default)]
pub struct TransactionGraph {
    transactions: HashMap<Fingerprint, TrackedTransaction>,
    /// Index from an outpoint to the txid of whichever tracked transaction
    /// spends it, used to detect double spends and to move a tracked
    /// transaction from `Unspent` to `Spent`.
    spends: HashMap<OutPoint, Fingerprint>,
}

impl TransactionGraph {
    pub fn new() -> Self {
        TransactionGraph { transactions: HashMap::new(), spends: HashMap::new() }
    }

    pub fn get(&self, txid: &Fingerprint) -> Option<&TrackedTransaction> {
        self.transactions.get(txid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedTransaction> {
        self.transactions.values()
    }

    pub fn iter_pool(&self, pool: Pool) -> impl Iterator<Item = &TrackedTransaction> {
        self.transactions.values().filter(move |t| t.pool == pool)
    }

    /// Records a newly observed transaction, starting it in `Pending`
    /// unless one of its inputs already conflicts with a confirmed spend
    /// (in which case it starts `Dead`). Returns `false` if this txid was
    /// already tracked.
    ///
    /// If an input spends an output of a transaction we already track, that
    /// parent moves to `Spent` immediately rather than waiting for this
    /// transaction's own confirmation: the parent's output is no longer
    /// ours to spend the moment a spend of it is observed, confirmed or not.
    pub fn insert(&mut self, tx: Transaction, source: Source) -> bool {
        let txid = tx.txid();
        if self.transactions.contains_key(&txid) {
            return false;
        }

        let conflicts = tx.inputs.iter().any(|input| {
            self.spends
                .get(&input.previous_output)
                .map(|existing| existing != &txid)
                .unwrap_or(false)
        });

        let pool = if conflicts { Pool::Dead } else { Pool::Pending };
        if !conflicts {
            for input in &tx.inputs {
                self.spends.insert(input.previous_output, txid);
                if let Some(parent) = self.transactions.get_mut(&input.previous_output.txid) {
                    if parent.pool == Pool::Unspent {
                        parent.pool = Pool::Spent;
                    }
                }
            }
        }

        self.transactions.insert(
            txid,
            TrackedTransaction { transaction: tx, pool, confidence: Confidence::Pending { seen_by_peers: 1 }, source },
        );
        true
    }

    /// Moves a pending transaction into `Unspent`/`Spent` once it is
    /// confirmed in a block at `height`. A transaction is placed in `Spent`
    /// immediately if the wallet already tracks a transaction spending one
    /// of its outputs.
    pub fn confirm(&mut self, txid: &Fingerprint, height: u32) {
        let is_spent = self.output_is_already_spent(txid);
        if let Some(entry) = self.transactions.get_mut(txid) {
            entry.confidence = Confidence::Building { height, depth: 1 };
            entry.pool = if is_spent { Pool::Spent } else { Pool::Unspent };
        }
    }

    fn output_is_already_spent(&self, txid: &Fingerprint) -> bool {
        let Some(entry) = self.transactions.get(txid) else { return false };
        (0..entry.transaction.outputs.len() as u32).any(|i| {
            self.spends.contains_key(&OutPoint { txid: *txid, index: i })
                && self.spends.get(&OutPoint { txid: *txid, index: i }) != Some(txid)
        })
    }

    /// Advances every `Building` transaction's depth as new blocks arrive
    /// on top of the one it confirmed in.
    pub fn extend_depth(&mut self, new_tip_height: u32) {
        for entry in self.transactions.values_mut() {
            if let Confidence::Building { height, .. } = entry.confidence {
                if new_tip_height >= height {
                    entry.confidence = Confidence::Building { height, depth: new_tip_height - height + 1 };
                }
            }
        }
    }

    /// Marks a transaction (and transitively, anything that spent its
    /// outputs) `Dead`, as happens when its confirming block is
    /// disconnected by a reorg and it does not reappear.
    pub fn mark_dead(&mut self, txid: &Fingerprint) {
        let mut to_kill = vec![*txid];
        while let Some(current) = to_kill.pop() {
            if let Some(entry) = self.transactions.get_mut(&current) {
                entry.pool = Pool::Dead;
                entry.confidence = Confidence::Dead;
                let count = entry.transaction.outputs.len() as u32;
                for i in 0..count {
                    if let Some(spender) = self.spends.get(&OutPoint { txid: current, index: i }) {
                        to_kill.push(*spender);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_core::amount::Amount;
    use spv_core::fingerprint::Hash160;
    use spv_core::script::Script;
    use spv_core::transaction::{TxInput, TxOutput};

    fn tx_spending(prev: Fingerprint) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: prev, index: 0 },
                script_sig: Script::new(Vec::new()),
                sequence: TxInput::FINAL_SEQUENCE,
                witness: Vec::new(),
            }],
            outputs: vec![TxOutput {
                value: Amount::from_units(1000),
                script_pubkey: Script::new_p2pkh(&Hash160::hash(b"x")),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn newly_inserted_transaction_starts_pending() {
        let mut graph = TransactionGraph::new();
        let tx = tx_spending(Fingerprint::hash(b"coinbase"));
        let txid = tx.txid();
        graph.insert(tx, Source::Network);
        assert_eq!(graph.get(&txid).unwrap().pool, Pool::Pending);
    }

    #[test]
    fn confirm_moves_to_unspent() {
        let mut graph = TransactionGraph::new();
        let tx = tx_spending(Fingerprint::hash(b"coinbase"));
        let txid = tx.txid();
        graph.insert(tx, Source::Network);
        graph.confirm(&txid, 100);
        assert_eq!(graph.get(&txid).unwrap().pool, Pool::Unspent);
        assert!(graph.get(&txid).unwrap().confidence.is_confirmed(1));
    }

    #[test]
    fn spending_transaction_moves_parent_to_spent() {
        let mut graph = TransactionGraph::new();
        let parent = tx_spending(Fingerprint::hash(b"coinbase"));
        let parent_txid = parent.txid();
        graph.insert(parent, Source::Network);
        graph.confirm(&parent_txid, 100);

        let child = tx_spending(parent_txid);
        graph.insert(child, Source::Self_);
        assert_eq!(graph.get(&parent_txid).unwrap().pool, Pool::Spent);
    }

    #[test]
    fn spend_observed_before_parent_confirms_still_confirms_spent() {
        let mut graph = TransactionGraph::new();
        let parent = tx_spending(Fingerprint::hash(b"coinbase"));
        let parent_txid = parent.txid();
        graph.insert(parent, Source::Network);

        let child = tx_spending(parent_txid);
        graph.insert(child, Source::Self_);
        assert_eq!(graph.get(&parent_txid).unwrap().pool, Pool::Pending);

        graph.confirm(&parent_txid, 100);
        assert_eq!(graph.get(&parent_txid).unwrap().pool, Pool::Spent);
    }

    #[test]
    fn conflicting_transaction_starts_dead() {
        let mut graph = TransactionGraph::new();
        let parent_txid = Fingerprint::hash(b"coinbase");
        let a = tx_spending(parent_txid);
        graph.insert(a, Source::Network);

        let b = tx_spending(parent_txid);
        // same previous_output, different output script -> different txid
        let mut b = b;
        b.lock_time = 1;
        graph.insert(b.clone(), Source::Network);
        assert_eq!(graph.get(&b.txid()).unwrap().pool, Pool::Dead);
    }

    #[test]
    fn mark_dead_propagates_to_spender() {
        let mut graph = TransactionGraph::new();
        let parent = tx_spending(Fingerprint::hash(b"coinbase"));
        let parent_txid = parent.txid();
        graph.insert(parent, Source::Network);
        graph.confirm(&parent_txid, 100);

        let child = tx_spending(parent_txid);
        let child_txid = child.txid();
        graph.insert(child, Source::Self_);
        graph.confirm(&child_txid, 101);

        graph.mark_dead(&parent_txid);
        assert_eq!(graph.get(&parent_txid).unwrap().pool, Pool::Dead);
        assert_eq!(graph.get(&child_txid).unwrap().pool, Pool::Dead);
    }

    #[test]
    fn extend_depth_increases_building_depth() {
        let mut graph = TransactionGraph::new();
        let tx = tx_spending(Fingerprint::hash(b"coinbase"));
        let txid = tx.txid();
        graph.insert(tx, Source::Network);
        graph.confirm(&txid, 100);
        graph.extend_depth(105);
        assert!(graph.get(&txid).unwrap().confidence.is_confirmed(6));
    }
}
