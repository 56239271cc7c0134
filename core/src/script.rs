//! Scripts: the byte-code carried by transaction outputs (`scriptPubKey`)
//! and inputs (`scriptSig`), plus the witness-stack sidecar for segregated
//! witness inputs.
//!
//! This module only implements what the wallet needs to recognize and
//! spend its own outputs: classification of the standard output variants
//! and a small builder for constructing the scripts those variants require.
//! It is not a general script interpreter (§1 Non-goals: no script
//! execution for non-wallet transactions).

use crate::fingerprint::Hash160;
use serde::{Deserialize, Serialize};

/// A small subset of opcodes, named as in the reference client.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_CHECKSIG: u8 = 0xac;
}

/// Raw script bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Builds a standard pay-to-pubkey-hash `scriptPubKey`:
    /// `OP_DUP OP_HASH160 <20-byte hash> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn new_p2pkh(hash: &Hash160) -> Self {
        use opcodes::*;
        let mut b = Vec::with_capacity(25);
        b.push(OP_DUP);
        b.push(OP_HASH160);
        b.push(20);
        b.extend_from_slice(&hash.0);
        b.push(OP_EQUALVERIFY);
        b.push(OP_CHECKSIG);
        Script(b)
    }

    /// Builds a pay-to-pubkey `scriptPubKey`: `<pubkey> OP_CHECKSIG`.
    pub fn new_p2pk(pubkey: &[u8]) -> Self {
        let mut b = Vec::with_capacity(pubkey.len() + 2);
        push_data(&mut b, pubkey);
        b.push(opcodes::OP_CHECKSIG);
        Script(b)
    }

    /// Builds a pay-to-script-hash `scriptPubKey`:
    /// `OP_HASH160 <20-byte hash> OP_EQUAL`.
    pub fn new_p2sh(hash: &Hash160) -> Self {
        let mut b = Vec::with_capacity(23);
        b.push(opcodes::OP_HASH160);
        b.push(20);
        b.extend_from_slice(&hash.0);
        b.push(opcodes::OP_EQUAL);
        Script(b)
    }

    /// Builds a pay-to-witness-pubkey-hash `scriptPubKey`:
    /// `OP_0 <20-byte hash>`.
    pub fn new_p2wpkh(hash: &Hash160) -> Self {
        let mut b = Vec::with_capacity(22);
        b.push(opcodes::OP_0);
        b.push(20);
        b.extend_from_slice(&hash.0);
        Script(b)
    }

    /// Builds a pay-to-witness-script-hash `scriptPubKey`:
    /// `OP_0 <32-byte hash>`.
    pub fn new_p2wsh(hash: &[u8; 32]) -> Self {
        let mut b = Vec::with_capacity(34);
        b.push(opcodes::OP_0);
        b.push(32);
        b.extend_from_slice(hash);
        Script(b)
    }

    /// Builds a legacy `scriptSig` for a P2PKH input:
    /// `<sig> <pubkey>`.
    pub fn new_p2pkh_sig(signature: &[u8], pubkey: &[u8]) -> Self {
        let mut b = Vec::new();
        push_data(&mut b, signature);
        push_data(&mut b, pubkey);
        Script(b)
    }

    /// Classifies this script as one of the standard output variants.
    pub fn classify(&self) -> ScriptVariant {
        let b = &self.0;
        if b.len() == 25
            && b[0] == opcodes::OP_DUP
            && b[1] == opcodes::OP_HASH160
            && b[2] == 20
            && b[23] == opcodes::OP_EQUALVERIFY
            && b[24] == opcodes::OP_CHECKSIG
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&b[3..23]);
            return ScriptVariant::PayToPubkeyHash(Hash160(hash));
        }
        if b.len() == 23 && b[0] == opcodes::OP_HASH160 && b[1] == 20 && b[22] == opcodes::OP_EQUAL {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&b[2..22]);
            return ScriptVariant::PayToScriptHash(Hash160(hash));
        }
        if b.len() == 22 && b[0] == opcodes::OP_0 && b[1] == 20 {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&b[2..22]);
            return ScriptVariant::PayToWitnessPubkeyHash(hash);
        }
        if b.len() == 34 && b[0] == opcodes::OP_0 && b[1] == 32 {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&b[2..34]);
            return ScriptVariant::PayToWitnessScriptHash(hash);
        }
        if b.len() >= 35 && b.last() == Some(&opcodes::OP_CHECKSIG) {
            let len = b[0] as usize;
            if (len == 33 || len == 65) && b.len() == 1 + len + 1 {
                return ScriptVariant::PayToPubkey(b[1..1 + len].to_vec());
            }
        }
        ScriptVariant::NonStandard
    }
}

fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() < opcodes::OP_PUSHDATA1 as usize {
        out.push(data.len() as u8);
    } else if data.len() <= 0xff {
        out.push(opcodes::OP_PUSHDATA1);
        out.push(data.len() as u8);
    } else if data.len() <= 0xffff {
        out.push(opcodes::OP_PUSHDATA2);
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    } else {
        out.push(opcodes::OP_PUSHDATA4);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// The recognized shapes of a `scriptPubKey`, as named in the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptVariant {
    PayToPubkey(Vec<u8>),
    PayToPubkeyHash(Hash160),
    PayToScriptHash(Hash160),
    PayToWitnessPubkeyHash([u8; 20]),
    PayToWitnessScriptHash([u8; 32]),
    NonStandard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_p2pkh() {
        let hash = Hash160::hash(b"owner");
        let script = Script::new_p2pkh(&hash);
        assert_eq!(script.classify(), ScriptVariant::PayToPubkeyHash(hash));
    }

    #[test]
    fn classifies_p2sh() {
        let hash = Hash160::hash(b"redeem");
        let script = Script::new_p2sh(&hash);
        assert_eq!(script.classify(), ScriptVariant::PayToScriptHash(hash));
    }

    #[test]
    fn classifies_p2wpkh() {
        let hash = Hash160::hash(b"witness-owner");
        let script = Script::new_p2wpkh(&hash);
        assert_eq!(script.classify(), ScriptVariant::PayToWitnessPubkeyHash(hash.0));
    }

    #[test]
    fn classifies_p2wsh() {
        let mut hash = [0u8; 32];
        hash[0] = 7;
        let script = Script::new_p2wsh(&hash);
        assert_eq!(script.classify(), ScriptVariant::PayToWitnessScriptHash(hash));
    }

    #[test]
    fn classifies_p2pk_compressed() {
        let pubkey = vec![0x02; 33];
        let script = Script::new_p2pk(&pubkey);
        assert_eq!(script.classify(), ScriptVariant::PayToPubkey(pubkey));
    }

    #[test]
    fn unrecognized_script_is_non_standard() {
        let script = Script::new(vec![0x6a, 0x04, 1, 2, 3, 4]); // OP_RETURN push
        assert_eq!(script.classify(), ScriptVariant::NonStandard);
    }

    #[test]
    fn p2pkh_sig_pushes_signature_then_pubkey() {
        let sig = vec![0x30, 0x44, 0xAA];
        let pubkey = vec![0x02; 33];
        let script = Script::new_p2pkh_sig(&sig, &pubkey);
        assert_eq!(script.0[0] as usize, sig.len());
        assert_eq!(&script.0[1..1 + sig.len()], &sig[..]);
    }
}
