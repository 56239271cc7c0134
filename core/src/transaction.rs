//! Transactions: inputs, outputs, and the lazy-parsed wire record.
//!
//! A transaction is parsed eagerly into its structured fields (§4, data
//! model) but also retains its original bytes so its id can be recomputed
//! without re-serializing, and so segwit-aware consumers can separate the
//! legacy and witness portions of the encoding.

use crate::amount::Amount;
use crate::codec::{Encodable, Reader, Writer};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::script::Script;
use serde::{Deserialize, Serialize};

/// A reference to a previous transaction's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct OutPoint {
    pub txid: Fingerprint,
    pub index: u32,
}

impl Encodable for OutPoint {
    fn encode(&self, w: &mut Writer) {
        w.write_bytes(&self.txid.0);
        w.write_u32_le(self.index);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(OutPoint { txid: Fingerprint(r.read_array()?), index: r.read_u32_le()? })
    }
}

/// A spend of a previous output, plus its unlocking script and sequence
/// number. The witness stack, present only on segwit transactions, is
/// carried out of band of the rest of the input's encoding (§4, wire
/// format notes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

impl TxInput {
    pub const FINAL_SEQUENCE: u32 = 0xFFFF_FFFF;

    fn encode_legacy(&self, w: &mut Writer) {
        self.previous_output.encode(w);
        w.write_var_bytes(self.script_sig.as_bytes());
        w.write_u32_le(self.sequence);
    }

    fn decode_legacy(r: &mut Reader<'_>) -> Result<Self> {
        let previous_output = OutPoint::decode(r)?;
        let script_sig = Script::new(r.read_var_bytes(true)?.to_vec());
        let sequence = r.read_u32_le()?;
        Ok(TxInput { previous_output, script_sig, sequence, witness: Vec::new() })
    }
}

/// A new coin assignment: an amount and the script that must be satisfied
/// to spend it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl Encodable for TxOutput {
    fn encode(&self, w: &mut Writer) {
        w.write_i64_le(self.value.0);
        w.write_var_bytes(self.script_pubkey.as_bytes());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let value = Amount(r.read_i64_le()?);
        let script_pubkey = Script::new(r.read_var_bytes(true)?.to_vec());
        Ok(TxOutput { value, script_pubkey })
    }
}

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// A Bitcoin transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// The transaction id: double-SHA-256 of the legacy (witness-stripped)
    /// encoding, as used for `txid` everywhere in the protocol including
    /// Merkle tree leaves.
    pub fn txid(&self) -> Fingerprint {
        let mut w = Writer::new();
        self.encode_legacy(&mut w);
        Fingerprint::hash(w.as_bytes())
    }

    /// The witness transaction id: double-SHA-256 of the full
    /// (witness-included) encoding. Equal to `txid()` for non-segwit
    /// transactions.
    pub fn wtxid(&self) -> Fingerprint {
        if !self.has_witness() {
            return self.txid();
        }
        let mut w = Writer::new();
        self.encode(&mut w);
        Fingerprint::hash(w.as_bytes())
    }

    pub fn total_output_value(&self) -> Option<Amount> {
        self.outputs.iter().try_fold(Amount(0), |acc, o| acc + o.value)
    }

    fn encode_legacy(&self, w: &mut Writer) {
        w.write_i32_le(self.version);
        w.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode_legacy(w);
        }
        w.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(w);
        }
        w.write_u32_le(self.lock_time);
    }
}

impl Encodable for Transaction {
    fn encode(&self, w: &mut Writer) {
        let witness = self.has_witness();
        w.write_i32_le(self.version);
        if witness {
            w.write_u8(SEGWIT_MARKER);
            w.write_u8(SEGWIT_FLAG);
        }
        w.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode_legacy(w);
        }
        w.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(w);
        }
        if witness {
            for input in &self.inputs {
                w.write_varint(input.witness.len() as u64);
                for item in &input.witness {
                    w.write_var_bytes(item);
                }
            }
        }
        w.write_u32_le(self.lock_time);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let version = r.read_i32_le()?;
        let mut input_count = r.read_varint(true)?;
        let mut segwit = false;
        if input_count == 0 {
            let flag = r.read_u8()?;
            if flag != SEGWIT_FLAG {
                return Err(Error::MalformedVarInt);
            }
            segwit = true;
            input_count = r.read_varint(true)?;
        }
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            inputs.push(TxInput::decode_legacy(r)?);
        }
        let output_count = r.read_varint(true)?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            outputs.push(TxOutput::decode(r)?);
        }
        if segwit {
            for input in &mut inputs {
                let item_count = r.read_varint(true)?;
                let mut witness = Vec::with_capacity(item_count as usize);
                for _ in 0..item_count {
                    witness.push(r.read_var_bytes(true)?.to_vec());
                }
                input.witness = witness;
            }
        }
        let lock_time = r.read_u32_le()?;
        Ok(Transaction { version, inputs, outputs, lock_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Hash160;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: Fingerprint::hash(b"prev"), index: 0 },
                script_sig: Script::new_p2pkh_sig(&[0x30, 0x01], &[0x02; 33]),
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
    fn legacy_tx_round_trips() {
        let tx = sample_tx();
        let mut w = Writer::new();
        tx.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Transaction::decode(&mut r).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn legacy_tx_wtxid_equals_txid() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.wtxid());
    }

    #[test]
    fn segwit_tx_round_trips_and_wtxid_differs() {
        let mut tx = sample_tx();
        tx.inputs[0].witness = vec![vec![0x30, 0x44], vec![0x02; 33]];
        assert!(tx.has_witness());
        assert_ne!(tx.txid(), tx.wtxid());

        let mut w = Writer::new();
        tx.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Transaction::decode(&mut r).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn total_output_value_sums_outputs() {
        let tx = sample_tx();
        assert_eq!(tx.total_output_value(), Some(Amount::from_units(50_000)));
    }
}
