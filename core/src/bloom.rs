//! Bloom filters: the probabilistic set membership structure a wallet loads
//! onto its peers so they can forward only transactions of interest
//! (`filterload`/`filteradd`/`filterclear`, §4.4 and §5).
//!
//! This is the same construction as BIP 37: a bit array sized from a false
//! positive rate and element count, `n_hash_funcs` independent double-hash
//! probes per inserted element using the murmur3 family seeded by a per-hash
//! tweak, and a small set of update-behavior flags controlling whether a
//! matched output's outpoint is automatically added back (needed so a
//! wallet can track its own change outputs without a round trip).

use crate::codec::{Encodable, Reader, Writer};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

const MAX_BLOOM_FILTER_SIZE: usize = 36_000;
const MAX_HASH_FUNCS: u32 = 50;
const SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// How a peer should behave when a filter element matches data found in a
/// transaction's outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BloomUpdate {
    /// Never add outpoints of matched outputs.
    None,
    /// Add the outpoint of any matched output.
    All,
    /// Add the outpoint only for P2PKH/P2WPKH/multisig-like outputs (the
    /// common case for a wallet tracking its own change).
    PubkeyOnly,
}

impl BloomUpdate {
    fn to_u8(self) -> u8 {
        match self {
            BloomUpdate::None => 0,
            BloomUpdate::All => 1,
            BloomUpdate::PubkeyOnly => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => BloomUpdate::All,
            2 => BloomUpdate::PubkeyOnly,
            _ => BloomUpdate::None,
        }
    }
}

/// A Bloom filter over arbitrary byte strings (public key hashes, outpoints,
/// script data elements).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u8>,
    n_hash_funcs: u32,
    tweak: u32,
    pub update_flag: BloomUpdate,
}

impl BloomFilter {
    /// Builds an empty filter sized for `expected_elements` at the given
    /// false positive rate, as in BIP 37's sizing formula.
    pub fn new(expected_elements: u32, false_positive_rate: f64, tweak: u32, update_flag: BloomUpdate) -> Self {
        let n = expected_elements.max(1) as f64;
        let fp = false_positive_rate.clamp(f64::MIN_POSITIVE, 1.0);

        let num_bits = (-1.0 / LN_2.powi(2) * n * fp.ln()).max(8.0);
        let num_bytes = ((num_bits / 8.0).ceil() as usize).clamp(1, MAX_BLOOM_FILTER_SIZE);

        let n_hash_funcs = ((num_bytes * 8) as f64 / n * LN_2).max(1.0) as u32;
        let n_hash_funcs = n_hash_funcs.min(MAX_HASH_FUNCS);

        BloomFilter { bits: vec![0u8; num_bytes], n_hash_funcs, tweak, update_flag }
    }

    fn hash(&self, hash_num: u32, data: &[u8]) -> u32 {
        let seed = hash_num.wrapping_mul(SEED_MULTIPLIER).wrapping_add(self.tweak);
        murmur3_32(data, seed) % (self.bits.len() as u32 * 8)
    }

    fn set_bit(&mut self, index: u32) {
        let byte = (index / 8) as usize;
        let bit = (index % 8) as u8;
        self.bits[byte] |= 1 << bit;
    }

    fn bit_is_set(&self, index: u32) -> bool {
        let byte = (index / 8) as usize;
        let bit = (index % 8) as u8;
        self.bits[byte] & (1 << bit) != 0
    }

    /// Adds `element` to the filter.
    pub fn insert(&mut self, element: &[u8]) {
        for i in 0..self.n_hash_funcs {
            let idx = self.hash(i, element);
            self.set_bit(idx);
        }
    }

    /// Tests whether `element` may be a member (false positives are
    /// possible; false negatives are not).
    pub fn contains(&self, element: &[u8]) -> bool {
        (0..self.n_hash_funcs).all(|i| self.bit_is_set(self.hash(i, element)))
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }
}

impl Encodable for BloomFilter {
    fn encode(&self, w: &mut Writer) {
        w.write_var_bytes(&self.bits);
        w.write_u32_le(self.n_hash_funcs);
        w.write_u32_le(self.tweak);
        w.write_u8(self.update_flag.to_u8());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let bits = r.read_var_bytes(true)?.to_vec();
        let n_hash_funcs = r.read_u32_le()?;
        let tweak = r.read_u32_le()?;
        let update_flag = BloomUpdate::from_u8(r.read_u8()?);
        Ok(BloomFilter { bits, n_hash_funcs, tweak, update_flag })
    }
}

/// MurmurHash3 (x86, 32-bit variant), as specified by BIP 37.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let mut k1 = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let mut k1 = 0u32;
    for (i, &byte) in tail.iter().enumerate().rev() {
        k1 ^= (byte as u32) << (8 * i);
        if i == 0 {
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_after_insert() {
        let mut filter = BloomFilter::new(10, 0.001, 0, BloomUpdate::None);
        filter.insert(b"hello");
        assert!(filter.contains(b"hello"));
    }

    #[test]
    fn empty_filter_reports_empty() {
        let filter = BloomFilter::new(10, 0.001, 0, BloomUpdate::None);
        assert!(filter.is_empty());
    }

    #[test]
    fn insert_clears_empty_flag() {
        let mut filter = BloomFilter::new(10, 0.001, 0, BloomUpdate::None);
        filter.insert(b"hello");
        assert!(!filter.is_empty());
    }

    #[test]
    fn round_trips_through_wire_encoding() {
        let mut filter = BloomFilter::new(5, 0.01, 42, BloomUpdate::All);
        filter.insert(b"abc");
        let mut w = Writer::new();
        filter.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = BloomFilter::decode(&mut r).unwrap();
        assert!(decoded.contains(b"abc"));
    }

    #[test]
    fn murmur3_matches_known_vector() {
        // "" with seed 0 hashes to 0 under murmur3_x86_32.
        assert_eq!(murmur3_32(b"", 0), 0);
    }
}
