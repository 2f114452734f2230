//! Merkle-proof verification (spec §4.7): a worker proves its output was
//! derived from a specific leaf/subtree of a Merkle-committed input.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: [u8; 32],
    pub siblings: Vec<[u8; 32]>,
    /// Bit `i` set means the sibling at depth `i` is the right child.
    pub path_bits: Vec<bool>,
}

impl MerkleProof {
    pub fn verify(&self, committed_root: &[u8; 32]) -> bool {
        if self.siblings.len() != self.path_bits.len() {
            return false;
        }
        let mut current = self.leaf_hash;
        for (sibling, is_right) in self.siblings.iter().zip(self.path_bits.iter()) {
            current = if *is_right {
                hash_pair(&current, sibling)
            } else {
                hash_pair(sibling, &current)
            };
        }
        &current == committed_root
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sibling_proof_verifies() {
        let leaf = [1u8; 32];
        let sibling = [2u8; 32];
        let root = hash_pair(&leaf, &sibling);
        let proof = MerkleProof { leaf_hash: leaf, siblings: vec![sibling], path_bits: vec![false] };
        assert!(proof.verify(&root));
    }

    #[test]
    fn wrong_root_fails() {
        let leaf = [1u8; 32];
        let sibling = [2u8; 32];
        let proof = MerkleProof { leaf_hash: leaf, siblings: vec![sibling], path_bits: vec![false] };
        assert!(!proof.verify(&[9u8; 32]));
    }

    #[test]
    fn mismatched_lengths_reject() {
        let proof = MerkleProof { leaf_hash: [0u8; 32], siblings: vec![[1u8; 32]], path_bits: vec![] };
        assert!(!proof.verify(&[0u8; 32]));
    }
}
