//! Block headers: the fixed 80-byte wire record, and the store-augmented
//! [`StoredHeader`] that additionally carries cumulative work and height.

use crate::codec::{Encodable, Reader, Writer};
use crate::difficulty::Target;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};

/// The 80-byte header record transmitted on the wire and hashed for
/// proof-of-work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: i32,
    pub prev_fingerprint: Fingerprint,
    pub merkle_root: Fingerprint,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    pub const SIZE: usize = 80;

    /// The header's own fingerprint: double-SHA-256 of its 80-byte
    /// serialization.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut w = Writer::new();
        self.encode(&mut w);
        Fingerprint::hash(w.as_bytes())
    }

    /// The header's declared proof-of-work target, decoded from `bits`.
    pub fn target(&self) -> Result<Target> {
        Target::from_compact(self.bits)
    }

    /// `true` if this header's fingerprint, read as a big-endian integer,
    /// does not exceed its declared target.
    pub fn meets_proof_of_work(&self) -> Result<bool> {
        let target = self.target()?;
        let fp_int = self.fingerprint().as_be_uint();
        Ok(fp_int <= *target.as_be_bytes())
    }
}

impl Encodable for Header {
    fn encode(&self, w: &mut Writer) {
        w.write_i32_le(self.version);
        w.write_bytes(&self.prev_fingerprint.0);
        w.write_bytes(&self.merkle_root.0);
        w.write_u32_le(self.timestamp);
        w.write_u32_le(self.bits);
        w.write_u32_le(self.nonce);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Header {
            version: r.read_i32_le()?,
            prev_fingerprint: Fingerprint(r.read_array()?),
            merkle_root: Fingerprint(r.read_array()?),
            timestamp: r.read_u32_le()?,
            bits: r.read_u32_le()?,
            nonce: r.read_u32_le()?,
        })
    }
}

/// A 256-bit unsigned integer stored in 12 bytes is not native to Rust;
/// cumulative work is instead tracked as a 128-bit integer, which is ample
/// headroom (mainnet's cumulative work after two decades fits comfortably
/// in considerably fewer than 128 bits). The 12-byte on-disk field is
/// simply the low 96 bits of this value, per §4.2's slot layout; the upper
/// 32 bits are implicitly zero for any chain reachable in practice.
pub type CumulativeWork = u128;

/// Computes the work represented by a single header's target: the expected
/// number of hashes to find a fingerprint at or below `target`, computed as
/// `(~target / (target + 1)) + 1` over the full 256-bit magnitude (the same
/// overflow-free formulation used to compute chainwork against the
/// reference protocol) and narrowed into a [`CumulativeWork`].
pub fn work_for_target(target: &Target) -> CumulativeWork {
    let bytes = *target.as_be_bytes();
    let denominator = crate::difficulty::u256::add_one(bytes);
    let numerator = crate::difficulty::u256::not(bytes);
    let quotient = crate::difficulty::u256::div_full(numerator, denominator);
    let quotient = crate::difficulty::u256::add_one(quotient);
    crate::difficulty::u256::to_u128_saturating(quotient).max(1)
}

/// A header record augmented with the information the chain needs to
/// reconstruct ordering and select a tip without rescanning: cumulative
/// work up to and including this header, and height (genesis = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub header: Header,
    pub cumulative_work: CumulativeWork,
    pub height: u32,
}

impl StoredHeader {
    pub const SIZE: usize = Header::SIZE + 16 + 4;

    pub fn fingerprint(&self) -> Fingerprint {
        self.header.fingerprint()
    }

    pub fn genesis(header: Header) -> Result<Self> {
        let target = header.target()?;
        Ok(StoredHeader {
            header,
            cumulative_work: work_for_target(&target),
            height: 0,
        })
    }

    pub fn child(&self, header: Header) -> Result<Self> {
        let target = header.target()?;
        Ok(StoredHeader {
            header,
            cumulative_work: self.cumulative_work.saturating_add(work_for_target(&target)),
            height: self.height + 1,
        })
    }
}

impl Encodable for StoredHeader {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_bytes(&self.cumulative_work.to_le_bytes());
        w.write_u32_le(self.height);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let header = Header::decode(r)?;
        let cumulative_work = u128::from_le_bytes(r.read_array()?);
        let height = r.read_u32_le()?;
        Ok(StoredHeader { header, cumulative_work, height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            version: 1,
            prev_fingerprint: Fingerprint::ZERO,
            merkle_root: Fingerprint::hash(b"merkle"),
            timestamp: 1_231_006_505,
            bits: 0x1d00ffff,
            nonce: 2_083_236_893,
        }
    }

    #[test]
    fn header_round_trips() {
        let h = sample_header();
        let mut w = Writer::new();
        h.encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), Header::SIZE);
        let mut r = Reader::new(&bytes);
        assert_eq!(Header::decode(&mut r).unwrap(), h);
    }

    #[test]
    fn genesis_stored_header_has_height_zero() {
        let h = sample_header();
        let stored = StoredHeader::genesis(h).unwrap();
        assert_eq!(stored.height, 0);
        assert!(stored.cumulative_work > 0);
    }

    #[test]
    fn child_height_increments_and_work_accumulates() {
        let genesis = StoredHeader::genesis(sample_header()).unwrap();
        let mut next = sample_header();
        next.prev_fingerprint = genesis.fingerprint();
        let child = genesis.child(next).unwrap();
        assert_eq!(child.height, 1);
        assert!(child.cumulative_work >= genesis.cumulative_work);
    }

    #[test]
    fn stored_header_round_trips() {
        let stored = StoredHeader::genesis(sample_header()).unwrap();
        let mut w = Writer::new();
        stored.encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), StoredHeader::SIZE);
        let mut r = Reader::new(&bytes);
        assert_eq!(StoredHeader::decode(&mut r).unwrap(), stored);
    }
}
