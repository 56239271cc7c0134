//! 256-bit fingerprints: transaction ids, block ids, Merkle roots, and
//! generic double-SHA-256 digests.
//!
//! The wire byte order and the conventional display order are reversed from
//! one another — this type stores the *internal* (wire) order and only
//! reverses when formatting or parsing a hex string, so codec code never has
//! to think about it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A 32-byte double-SHA-256 fingerprint, stored in internal (wire) byte
/// order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub const ZERO: Fingerprint = Fingerprint([0u8; 32]);

    /// Computes the double-SHA-256 fingerprint of `data`.
    pub fn hash(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&second);
        Fingerprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Interprets the fingerprint as a big-endian 256-bit unsigned integer,
    /// for proof-of-work comparison against a target. The wire order is
    /// little-endian, so this reverses first.
    pub fn as_be_uint(&self) -> [u8; 32] {
        let mut be = self.0;
        be.reverse();
        be
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode(reversed))
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Fingerprint(bytes))
    }
}

/// A 20-byte HASH160 digest: RIPEMD-160(SHA-256(x)). Used for
/// pay-to-pubkey-hash and pay-to-script-hash outputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub fn hash(data: &[u8]) -> Self {
        let sha = Sha256::digest(data);
        let ripe = ripemd::Ripemd160::digest(sha);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&ripe);
        Hash160(bytes)
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash160({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reverses_wire_order() {
        let mut wire = [0u8; 32];
        wire[0] = 0xff;
        let fp = Fingerprint(wire);
        // last byte in display order is the first byte on the wire
        assert!(fp.to_string().ends_with("ff"));
    }

    #[test]
    fn round_trips_through_string() {
        let fp = Fingerprint::hash(b"hello world");
        let s = fp.to_string();
        let parsed: Fingerprint = s.parse().unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn hash160_is_deterministic_and_twenty_bytes() {
        let a = Hash160::hash(b"owned pubkey bytes");
        let b = Hash160::hash(b"owned pubkey bytes");
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 20);
        let c = Hash160::hash(b"different pubkey bytes");
        assert_ne!(a, c);
    }
}
