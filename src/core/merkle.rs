//! Merkle commitment over an ordered list of transaction ids
//!
//! Levels are built bottom-up by double-hashing `left || right`. A level with
//! an odd number of nodes pairs its last node with itself. That is the
//! historical Bitcoin rule and it lets `[a, b, c]` and `[a, b, c, c]` share a
//! root (CVE-2012-2459). The root check alone cannot tell those lists apart,
//! so block validation also rejects any block listing the same txid twice
//! (`ValidationError::DuplicateTransaction`).

use crate::core::{Hash256, hash256, hash256_pair};
use serde::{Deserialize, Serialize};

/// Root committed to by a block with no transactions
pub fn empty_root() -> Hash256 {
    hash256(b"")
}

/// Which side of the running hash a proof sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Sibling path from a leaf up to the root
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MerkleProof {
    pub steps: Vec<(Hash256, Side)>,
}

impl MerkleProof {
    /// Recompute the root from `leaf` and compare
    pub fn verify(&self, leaf: &Hash256, root: &Hash256) -> bool {
        let computed = self
            .steps
            .iter()
            .fold(*leaf, |acc, (sibling, side)| match side {
                Side::Left => hash256_pair(sibling, &acc),
                Side::Right => hash256_pair(&acc, sibling),
            });
        computed == *root
    }
}

/// All levels of the tree, leaves first
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    pub fn build(leaves: &[Hash256]) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Hash256> = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash256_pair(left, right),
                    [only] => hash256_pair(only, only),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    pub fn root(&self) -> Hash256 {
        self.levels
            .last()
            .and_then(|top| top.first().copied())
            .unwrap_or_else(empty_root)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Inclusion proof for the leaf at `index`
    pub fn prove(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if position % 2 == 0 {
                // Unpaired last node is hashed with itself
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                (*sibling, Side::Right)
            } else {
                (level[position - 1], Side::Left)
            };
            steps.push(step);
            position /= 2;
        }

        Some(MerkleProof { steps })
    }
}

/// Root over `leaves` without keeping the tree
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    MerkleTree::build(leaves).root()
}

/// Free-standing verification entry point
pub fn verify(leaf: &Hash256, proof: &MerkleProof, root: &Hash256) -> bool {
    proof.verify(leaf, root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Hash256> {
        (0..n).map(|i| hash256(format!("tx{i}").as_bytes())).collect()
    }

    #[test]
    fn test_empty_tree_has_sentinel_root() {
        let tree = MerkleTree::build(&[]);
        assert_eq!(tree.root(), hash256(b""));
        assert_eq!(tree.leaf_count(), 0);
        assert!(tree.prove(0).is_none());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let l = leaves(1);
        let tree = MerkleTree::build(&l);
        assert_eq!(tree.root(), l[0]);

        let proof = tree.prove(0).unwrap();
        assert!(proof.steps.is_empty());
        assert!(verify(&l[0], &proof, &tree.root()));
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        assert_eq!(merkle_root(&l), hash256_pair(&l[0], &l[1]));
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let l = leaves(3);
        let expected = hash256_pair(&hash256_pair(&l[0], &l[1]), &hash256_pair(&l[2], &l[2]));
        assert_eq!(merkle_root(&l), expected);

        // Known weakness: duplicating the trailing leaf yields the same root
        let mut padded = l.clone();
        padded.push(l[2]);
        assert_eq!(merkle_root(&padded), expected);
    }

    #[test]
    fn test_every_leaf_proves() {
        for n in [1usize, 2, 3, 5, 8] {
            let l = leaves(n);
            let tree = MerkleTree::build(&l);
            let root = tree.root();
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.prove(i).unwrap();
                assert!(verify(leaf, &proof, &root), "leaf {i} of {n}");
            }
            assert!(tree.prove(n).is_none());
        }
    }

    #[test]
    fn test_proof_rejects_wrong_leaf_or_root() {
        let l = leaves(8);
        let tree = MerkleTree::build(&l);
        let proof = tree.prove(3).unwrap();

        assert_eq!(proof.steps.len(), 3);
        assert!(!verify(&l[4], &proof, &tree.root()));
        assert!(!verify(&l[3], &proof, &hash256(b"bogus")));
    }
}
