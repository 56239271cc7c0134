//! Merkle tree construction and partial Merkle tree (Merkle block) proof
//! verification.
//!
//! The full tree follows the historical Bitcoin convention: an odd number
//! of nodes at a level duplicates the last node rather than leaving it
//! unpaired. Partial trees (as used in `merkleblock` messages) encode a
//! pruned binary tree as a flag bitfield plus a list of hashes, authored for
//! a particular subset of "matched" leaves.

use crate::fingerprint::Fingerprint;

/// Computes the Merkle root of an ordered list of leaf fingerprints
/// (typically transaction ids).
pub fn compute_root(leaves: &[Fingerprint]) -> Fingerprint {
    if leaves.is_empty() {
        return Fingerprint::ZERO;
    }
    let mut level: Vec<Fingerprint> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("non-empty"));
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

fn hash_pair(a: &Fingerprint, b: &Fingerprint) -> Fingerprint {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&a.0);
    buf.extend_from_slice(&b.0);
    Fingerprint::hash(&buf)
}

/// A partial Merkle tree: the minimal set of hashes and a flag bitfield
/// needed to prove inclusion of a chosen subset of leaves, as carried by a
/// `merkleblock` message.
#[derive(Debug, Clone)]
pub struct PartialMerkleTree {
    pub total_transactions: u32,
    pub hashes: Vec<Fingerprint>,
    pub flags: Vec<bool>,
}

impl PartialMerkleTree {
    /// Builds a partial tree authenticating exactly the leaves for which
    /// `matches[i]` is `true`.
    pub fn build(leaves: &[Fingerprint], matches: &[bool]) -> Self {
        assert_eq!(leaves.len(), matches.len());
        let mut hashes = Vec::new();
        let mut flags = Vec::new();
        let height = tree_height(leaves.len());
        traverse_build(leaves, matches, height, 0, 0, &mut hashes, &mut flags);
        PartialMerkleTree { total_transactions: leaves.len() as u32, hashes, flags }
    }

    /// Verifies the partial tree against an expected root, returning the
    /// fingerprints of the matched leaves in tree order if it is
    /// consistent, or `None` if the proof does not reconstruct the
    /// expected root.
    pub fn extract_matches(&self, expected_root: &Fingerprint) -> Option<Vec<Fingerprint>> {
        if self.total_transactions == 0 {
            return if *expected_root == Fingerprint::ZERO { Some(Vec::new()) } else { None };
        }
        let height = tree_height(self.total_transactions as usize);
        let mut hash_iter = self.hashes.iter();
        let mut flag_iter = self.flags.iter();
        let mut matched = Vec::new();
        let root = traverse_extract(
            self.total_transactions as usize,
            height,
            0,
            0,
            &mut hash_iter,
            &mut flag_iter,
            &mut matched,
        )?;
        if root == *expected_root {
            Some(matched)
        } else {
            None
        }
    }
}

fn tree_height(num_leaves: usize) -> u32 {
    let mut height = 0;
    let mut width = num_leaves;
    while width > 1 {
        width = width.div_ceil(2);
        height += 1;
    }
    height
}

fn level_width(num_leaves: usize, height: u32, level: u32) -> usize {
    let mut width = num_leaves;
    for _ in 0..(height - level) {
        width = width.div_ceil(2);
    }
    width
}

/// Computes the hash of the subtree rooted at (`level`, `pos`) without
/// recording any flags or hashes — used both to seed a pruned node's
/// recorded hash and, transitively, by [`compute_root`]'s equivalent logic.
fn node_hash(leaves: &[Fingerprint], height: u32, level: u32, pos: usize) -> Fingerprint {
    if level == height {
        return leaves[pos.min(leaves.len() - 1)];
    }
    let left = node_hash(leaves, height, level + 1, pos * 2);
    let width = level_width(leaves.len(), height, level + 1);
    let right = if pos * 2 + 1 < width {
        node_hash(leaves, height, level + 1, pos * 2 + 1)
    } else {
        left
    };
    hash_pair(&left, &right)
}

/// Pre-order traversal: a node's match flag is recorded before descending.
/// A node is "pruned" (its hash recorded directly, no further descent) when
/// it is a leaf or when none of its descendants match.
fn traverse_build(
    leaves: &[Fingerprint],
    matches: &[bool],
    height: u32,
    level: u32,
    pos: usize,
    hashes: &mut Vec<Fingerprint>,
    flags: &mut Vec<bool>,
) -> Fingerprint {
    let any_match = subtree_has_match(matches, height, level, pos);
    flags.push(any_match);
    if level == height || !any_match {
        let h = node_hash(leaves, height, level, pos);
        hashes.push(h);
        return h;
    }
    let left = traverse_build(leaves, matches, height, level + 1, pos * 2, hashes, flags);
    let width = level_width(leaves.len(), height, level + 1);
    let right = if pos * 2 + 1 < width {
        traverse_build(leaves, matches, height, level + 1, pos * 2 + 1, hashes, flags)
    } else {
        left
    };
    hash_pair(&left, &right)
}

fn subtree_has_match(matches: &[bool], height: u32, level: u32, pos: usize) -> bool {
    let leaves_per_node = 1usize << (height - level);
    let start = pos * leaves_per_node;
    let end = ((pos + 1) * leaves_per_node).min(matches.len());
    matches[start.min(matches.len())..end].iter().any(|&m| m)
}

#[allow(clippy::too_many_arguments)]
fn traverse_extract<'a, H, F>(
    num_leaves: usize,
    height: u32,
    level: u32,
    pos: usize,
    hashes: &mut H,
    flags: &mut F,
    matched: &mut Vec<Fingerprint>,
) -> Option<Fingerprint>
where
    H: Iterator<Item = &'a Fingerprint>,
    F: Iterator<Item = &'a bool>,
{
    let flag = *flags.next()?;
    if level == height {
        let h = *hashes.next()?;
        if flag {
            matched.push(h);
        }
        return Some(h);
    }
    if !flag {
        return hashes.next().copied();
    }
    let left = traverse_extract(num_leaves, height, level + 1, pos * 2, hashes, flags, matched)?;
    let width = level_width(num_leaves, height, level + 1);
    let right = if pos * 2 + 1 < width {
        traverse_extract(num_leaves, height, level + 1, pos * 2 + 1, hashes, flags, matched)?
    } else {
        left
    };
    Some(hash_pair(&left, &right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Fingerprint {
        Fingerprint::hash(&[n])
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let l = leaf(1);
        assert_eq!(compute_root(&[l]), l);
    }

    #[test]
    fn odd_leaf_count_duplicates_last() {
        let leaves = vec![leaf(1), leaf(2), leaf(3)];
        let root_odd = compute_root(&leaves);
        let padded = vec![leaf(1), leaf(2), leaf(3), leaf(3)];
        assert_eq!(root_odd, compute_root(&padded));
    }

    #[test]
    fn partial_tree_round_trips_single_match() {
        let leaves: Vec<_> = (0..7u8).map(leaf).collect();
        let root = compute_root(&leaves);
        let mut matches = vec![false; 7];
        matches[3] = true;
        let partial = PartialMerkleTree::build(&leaves, &matches);
        let extracted = partial.extract_matches(&root).expect("valid proof");
        assert_eq!(extracted, vec![leaves[3]]);
    }

    #[test]
    fn partial_tree_round_trips_no_matches() {
        let leaves: Vec<_> = (0..4u8).map(leaf).collect();
        let root = compute_root(&leaves);
        let matches = vec![false; 4];
        let partial = PartialMerkleTree::build(&leaves, &matches);
        let extracted = partial.extract_matches(&root).expect("valid proof");
        assert!(extracted.is_empty());
    }

    #[test]
    fn partial_tree_rejects_wrong_root() {
        let leaves: Vec<_> = (0..4u8).map(leaf).collect();
        let matches = vec![true, false, false, false];
        let partial = PartialMerkleTree::build(&leaves, &matches);
        assert!(partial.extract_matches(&Fingerprint::ZERO).is_none());
    }
}
