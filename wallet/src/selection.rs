//! Coin selection: choosing which unspent outputs fund a new spend.
//!
//! The trait lets a caller substitute their own strategy; [`LargestFirstSelector`]
//! is the default, chosen for simplicity and predictability over fee
//! optimality (§4.6 design notes: this library does not attempt
//! privacy-preserving or fee-minimizing selection, that is left to callers
//! who need it).

use spv_core::amount::Amount;
use spv_core::transaction::{OutPoint, TxOutput};

/// A candidate input available for spending: the identity of the output
/// plus its value and locking script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub output: TxOutput,
}

/// The result of a successful selection: which UTXOs to spend and how much
/// change (if any) to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub change: Amount,
}

/// A pluggable coin selection strategy.
pub trait CoinSelector {
    /// Chooses inputs from `available` totaling at least `target + fee`,
    /// returning `None` if `available` cannot cover it.
    fn select(&self, available: &[Utxo], target: Amount, fee: Amount) -> Option<Selection>;
}

/// Selects the largest-value outputs first until the target is met. Simple
/// and minimizes the number of inputs (and therefore transaction size) at
/// the cost of generally leaving behind usable change and accelerating
/// UTXO consolidation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirstSelector;

impl CoinSelector for LargestFirstSelector {
    fn select(&self, available: &[Utxo], target: Amount, fee: Amount) -> Option<Selection> {
        let needed = (target + fee)?;
        let mut sorted: Vec<&Utxo> = available.iter().collect();
        sorted.sort_by(|a, b| b.output.value.cmp(&a.output.value));

        let mut total = Amount::ZERO;
        let mut chosen = Vec::new();
        for utxo in sorted {
            if total >= needed {
                break;
            }
            total = (total + utxo.output.value)?;
            chosen.push(utxo.clone());
        }

        if total < needed {
            return None;
        }
        let change = (total - needed)?;
        Some(Selection { inputs: chosen, change })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_core::fingerprint::{Fingerprint, Hash160};
    use spv_core::script::Script;

    fn utxo(value: i64) -> Utxo {
        Utxo {
            outpoint: OutPoint { txid: Fingerprint::hash(&value.to_le_bytes()), index: 0 },
            output: TxOutput { value: Amount::from_units(value), script_pubkey: Script::new_p2pkh(&Hash160::hash(b"x")) },
        }
    }

    #[test]
    fn selects_fewest_largest_inputs_covering_target() {
        let available = vec![utxo(1000), utxo(5000), utxo(2000)];
        let selection = LargestFirstSelector
            .select(&available, Amount::from_units(4000), Amount::ZERO)
            .unwrap();
        assert_eq!(selection.inputs.len(), 1);
        assert_eq!(selection.change, Amount::from_units(1000));
    }

    #[test]
    fn combines_inputs_when_single_is_insufficient() {
        let available = vec![utxo(1000), utxo(2000)];
        let selection = LargestFirstSelector
            .select(&available, Amount::from_units(2500), Amount::ZERO)
            .unwrap();
        assert_eq!(selection.inputs.len(), 2);
        assert_eq!(selection.change, Amount::from_units(500));
    }

    #[test]
    fn insufficient_funds_returns_none() {
        let available = vec![utxo(1000)];
        assert!(LargestFirstSelector.select(&available, Amount::from_units(5000), Amount::ZERO).is_none());
    }

    #[test]
    fn fee_is_added_to_the_target() {
        let available = vec![utxo(1000)];
        let selection = LargestFirstSelector
            .select(&available, Amount::from_units(500), Amount::from_units(400))
            .unwrap();
        assert_eq!(selection.change, Amount::from_units(100));
    }
}
