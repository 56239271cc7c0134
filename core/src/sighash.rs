//! Signature hash algorithms: the message a signature actually commits to.
//!
//! Two algorithms are implemented, selected by whichever script variant is
//! being satisfied: the original whole-previous-transactions-rehashed
//! algorithm (§4.7, still required for P2PKH/P2PK/P2SH inputs) and the
//! witness algorithm introduced with segregated witness (BIP 143), which
//! avoids the legacy algorithm's quadratic hashing cost and is used for
//! P2WPKH/P2WSH inputs.

use crate::amount::Amount;
use crate::codec::Writer;
use crate::fingerprint::Fingerprint;
use crate::script::Script;
use crate::transaction::{OutPoint, Transaction, TxOutput};

/// Standard sighash type flags.
pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

fn base_type(sighash_type: u32) -> u32 {
    sighash_type & 0x1f
}

fn anyone_can_pay(sighash_type: u32) -> bool {
    sighash_type & SIGHASH_ANYONECANPAY != 0
}

/// Computes the legacy signature hash for input `input_index`, as described
/// in §4.7: every input's script is blanked except the one being signed,
/// which is substituted with `script_code` (normally the previous output's
/// `scriptPubKey`, or the redeem script for P2SH); outputs and inputs are
/// then pruned according to the sighash type before double-hashing.
pub fn legacy_sighash(tx: &Transaction, input_index: usize, script_code: &Script, sighash_type: u32) -> Fingerprint {
    let mut working = tx.clone();
    for (i, input) in working.inputs.iter_mut().enumerate() {
        input.script_sig = if i == input_index { script_code.clone() } else { Script::new(Vec::new()) };
        input.witness = Vec::new();
    }

    let base = base_type(sighash_type);
    if base == SIGHASH_NONE {
        working.outputs.clear();
        for (i, input) in working.inputs.iter_mut().enumerate() {
            if i != input_index {
                input.sequence = 0;
            }
        }
    } else if base == SIGHASH_SINGLE {
        if input_index >= working.outputs.len() {
            // mirrors the historical "SIGHASH_SINGLE bug": signing an index
            // beyond the output list hashes the fixed value `0x01` repeated
            // across 32 bytes instead of crashing.
            let mut bytes = [0u8; 32];
            bytes[0] = 1;
            return Fingerprint(bytes);
        }
        working.outputs.truncate(input_index + 1);
        for output in working.outputs.iter_mut().take(input_index) {
            output.value = Amount(-1);
            output.script_pubkey = Script::new(Vec::new());
        }
        for (i, input) in working.inputs.iter_mut().enumerate() {
            if i != input_index {
                input.sequence = 0;
            }
        }
    }

    if anyone_can_pay(sighash_type) {
        working.inputs = vec![working.inputs[input_index].clone()];
    }

    let mut w = Writer::new();
    let mut tx_w = Writer::new();
    working_encode_legacy(&working, &mut tx_w);
    w.write_bytes(tx_w.as_bytes());
    w.write_u32_le(sighash_type);
    Fingerprint::hash(w.as_bytes())
}

fn working_encode_legacy(tx: &Transaction, w: &mut Writer) {
    // Transaction::encode already omits the witness section when no input
    // carries one; clearing every input's witness above guarantees that.
    tx.encode(w);
}

/// Computes the BIP 143 witness signature hash for input `input_index`
/// spending an output of `value`, locked by `script_code`.
pub fn segwit_sighash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: Amount,
    sighash_type: u32,
) -> Fingerprint {
    let base = base_type(sighash_type);
    let anyone = anyone_can_pay(sighash_type);

    let hash_prevouts = if anyone {
        Fingerprint::ZERO
    } else {
        let mut w = Writer::new();
        for input in &tx.inputs {
            write_outpoint(&mut w, &input.previous_output);
        }
        Fingerprint::hash(w.as_bytes())
    };

    let hash_sequence = if !anyone && base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        let mut w = Writer::new();
        for input in &tx.inputs {
            w.write_u32_le(input.sequence);
        }
        Fingerprint::hash(w.as_bytes())
    } else {
        Fingerprint::ZERO
    };

    let hash_outputs = if base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        let mut w = Writer::new();
        for output in &tx.outputs {
            write_output(&mut w, output);
        }
        Fingerprint::hash(w.as_bytes())
    } else if base == SIGHASH_SINGLE && input_index < tx.outputs.len() {
        let mut w = Writer::new();
        write_output(&mut w, &tx.outputs[input_index]);
        Fingerprint::hash(w.as_bytes())
    } else {
        Fingerprint::ZERO
    };

    let input = &tx.inputs[input_index];
    let mut w = Writer::new();
    w.write_i32_le(tx.version);
    w.write_bytes(&hash_prevouts.0);
    w.write_bytes(&hash_sequence.0);
    write_outpoint(&mut w, &input.previous_output);
    w.write_var_bytes(script_code.as_bytes());
    w.write_i64_le(value.as_units());
    w.write_u32_le(input.sequence);
    w.write_bytes(&hash_outputs.0);
    w.write_u32_le(tx.lock_time);
    w.write_u32_le(sighash_type);
    Fingerprint::hash(w.as_bytes())
}

fn write_outpoint(w: &mut Writer, op: &OutPoint) {
    w.write_bytes(&op.txid.0);
    w.write_u32_le(op.index);
}

fn write_output(w: &mut Writer, out: &TxOutput) {
    w.write_i64_le(out.value.as_units());
    w.write_var_bytes(out.script_pubkey.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Hash160;
    use crate::transaction::TxInput;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: Fingerprint::hash(b"prev"), index: 0 },
                script_sig: Script::new(Vec::new()),
                sequence: TxInput::FINAL_SEQUENCE,
                witness: Vec::new(),
            }],
            outputs: vec![TxOutput {
                value: Amount::from_units(50_000),
                script_pubkey: Script::new_p2pkh(&Hash160::hash(b"recipient")),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn legacy_sighash_is_deterministic() {
        let tx = sample_tx();
        let script_code = Script::new_p2pkh(&Hash160::hash(b"owner"));
        let a = legacy_sighash(&tx, 0, &script_code, SIGHASH_ALL);
        let b = legacy_sighash(&tx, 0, &script_code, SIGHASH_ALL);
        assert_eq!(a, b);
    }

    #[test]
    fn legacy_sighash_varies_by_type() {
        let tx = sample_tx();
        let script_code = Script::new_p2pkh(&Hash160::hash(b"owner"));
        let all = legacy_sighash(&tx, 0, &script_code, SIGHASH_ALL);
        let none = legacy_sighash(&tx, 0, &script_code, SIGHASH_NONE);
        assert_ne!(all, none);
    }

    #[test]
    fn single_sighash_out_of_range_returns_fixed_value() {
        let tx = sample_tx();
        let script_code = Script::new_p2pkh(&Hash160::hash(b"owner"));
        let h = legacy_sighash(&tx, 5, &script_code, SIGHASH_SINGLE);
        let mut expected = [0u8; 32];
        expected[0] = 1;
        assert_eq!(h, Fingerprint(expected));
    }

    #[test]
    fn segwit_sighash_is_deterministic_and_differs_from_legacy() {
        let tx = sample_tx();
        let script_code = Script::new_p2pkh(&Hash160::hash(b"owner"));
        let legacy = legacy_sighash(&tx, 0, &script_code, SIGHASH_ALL);
        let segwit = segwit_sighash(&tx, 0, &script_code, Amount::from_units(100_000), SIGHASH_ALL);
        assert_ne!(legacy, segwit);
        let segwit2 = segwit_sighash(&tx, 0, &script_code, Amount::from_units(100_000), SIGHASH_ALL);
        assert_eq!(segwit, segwit2);
    }
}
