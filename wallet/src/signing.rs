//! Satisfying the script of a spent output: given the key that controls an
//! output and the transaction spending it, produce the `scriptSig` and/or
//! witness stack that unlocks it.

use crate::error::{Error, Result};
use crate::key::EcKey;
use spv_core::script::{Script, ScriptVariant};
use spv_core::sighash::{legacy_sighash, segwit_sighash, SIGHASH_ALL};
use spv_core::transaction::{Transaction, TxOutput};

/// Appends the sighash type byte to a DER signature, as every script
/// variant here requires.
fn sig_with_hash_type(der: &[u8], sighash_type: u32) -> Vec<u8> {
    let mut sig = der.to_vec();
    sig.push(sighash_type as u8);
    sig
}

/// Produces the unlocking data for input `input_index` of `tx`, which spends
/// `previous_output` controlled by `key`. Supports the standard P2PKH and
/// P2WPKH variants; any other script shape is rejected since this wallet
/// does not construct multisig or custom scripts (§1 Non-goals).
pub fn sign_input(
    tx: &mut Transaction,
    input_index: usize,
    previous_output: &TxOutput,
    key: &EcKey,
) -> Result<()> {
    match previous_output.script_pubkey.classify() {
        ScriptVariant::PayToPubkeyHash(hash) if hash == key.hash160() => {
            let script_code = previous_output.script_pubkey.clone();
            let sighash = legacy_sighash(tx, input_index, &script_code, SIGHASH_ALL);
            let sig = sig_with_hash_type(&key.sign(&sighash.0), SIGHASH_ALL);
            tx.inputs[input_index].script_sig = Script::new_p2pkh_sig(&sig, &key.public_key_bytes());
            Ok(())
        }
        ScriptVariant::PayToWitnessPubkeyHash(hash) if hash == key.hash160().0 => {
            let script_code = Script::new_p2pkh(&key.hash160());
            let sighash = segwit_sighash(tx, input_index, &script_code, previous_output.value, SIGHASH_ALL);
            let sig = sig_with_hash_type(&key.sign(&sighash.0), SIGHASH_ALL);
            tx.inputs[input_index].script_sig = Script::new(Vec::new());
            tx.inputs[input_index].witness = vec![sig, key.public_key_bytes().to_vec()];
            Ok(())
        }
        ScriptVariant::PayToPubkeyHash(_) | ScriptVariant::PayToWitnessPubkeyHash(_) => Err(Error::UnknownKey),
        _ => Err(Error::Signing("unsupported script variant".to_string())),
    }
}
