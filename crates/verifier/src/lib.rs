//! Verifier (spec §4.7): decides whether a chunk result is acceptable.
//! Stateless per decision for hash-only and Merkle-proof; redundant-execution
//! needs to tally votes across replicas, so it carries its own tracker.
//!
//! Each strategy implements `neuro_scheduler::ChunkVerifier` so any of them
//! can be plugged into `JobScheduler` without it knowing which is active.

pub mod merkle;
pub mod redundant;

use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::DashMap;
use neuro_protocol::Attestation;
use neuro_scheduler::{ChunkVerifier, VerifyOutcome};
use sha2::{Digest, Sha256};

pub use merkle::MerkleProof;
pub use redundant::{RedundantOutcome, RedundantVerifier};

/// Trust the worker; accept iff `sha256(result) == attestation.outputHash`
/// and the attestation's Ed25519 signature checks out.
pub struct HashOnlyVerifier;

impl ChunkVerifier for HashOnlyVerifier {
    fn verify(&self, _job_id: &[u8; 16], _chunk_index: u32, result_bytes: &[u8], attestation: &Attestation) -> VerifyOutcome {
        let hash: [u8; 32] = Sha256::digest(result_bytes).into();
        if hash == attestation.output_hash && attestation.verify() {
            VerifyOutcome::Accept
        } else {
            VerifyOutcome::Reject
        }
    }
}

/// Requires `r` independent results per chunk and accepts the majority hash.
/// A result with an invalid signature never casts a vote.
pub struct RedundantExecutionVerifier {
    tracker: RedundantVerifier,
}

impl RedundantExecutionVerifier {
    pub fn new(replicas_required: u32, escalation_cap: u32) -> Self {
        Self { tracker: RedundantVerifier::new(replicas_required, escalation_cap) }
    }
}

impl ChunkVerifier for RedundantExecutionVerifier {
    fn verify(&self, job_id: &[u8; 16], chunk_index: u32, result_bytes: &[u8], attestation: &Attestation) -> VerifyOutcome {
        if !attestation.verify() {
            return VerifyOutcome::Reject;
        }
        let hash: [u8; 32] = Sha256::digest(result_bytes).into();
        if hash != attestation.output_hash {
            return VerifyOutcome::Reject;
        }
        match self.tracker.record(*job_id, chunk_index, hash) {
            RedundantOutcome::Accept(_) => {
                self.tracker.forget(*job_id, chunk_index);
                VerifyOutcome::Accept
            }
            RedundantOutcome::NeedMoreReplicas => VerifyOutcome::NeedMoreReplicas,
            RedundantOutcome::Inconclusive => {
                self.tracker.forget(*job_id, chunk_index);
                VerifyOutcome::Reject
            }
        }
    }
}

/// For jobs computing over a Merkle-committed input: the worker's result
/// bytes are the raw output followed by a length-prefixed bincode-encoded
/// `MerkleProof`. Accepted iff the proof verifies under the job's committed
/// root and the attestation covers the raw output.
pub struct MerkleVerifier {
    committed_roots: DashMap<[u8; 16], [u8; 32]>,
}

impl MerkleVerifier {
    pub fn new() -> Self {
        Self { committed_roots: DashMap::new() }
    }

    pub fn commit_root(&self, job_id: [u8; 16], root: [u8; 32]) {
        self.committed_roots.insert(job_id, root);
    }

    fn split_payload(result_bytes: &[u8]) -> Option<(&[u8], MerkleProof)> {
        if result_bytes.len() < 4 {
            return None;
        }
        let split_at = result_bytes.len() - 4;
        let len_bytes: [u8; 4] = result_bytes[split_at..].try_into().ok()?;
        let proof_len = u32::from_be_bytes(len_bytes) as usize;
        if proof_len > split_at {
            return None;
        }
        let output_end = split_at - proof_len;
        let output = &result_bytes[..output_end];
        let proof: MerkleProof = bincode::deserialize(&result_bytes[output_end..split_at]).ok()?;
        Some((output, proof))
    }
}

impl Default for MerkleVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkVerifier for MerkleVerifier {
    fn verify(&self, job_id: &[u8; 16], _chunk_index: u32, result_bytes: &[u8], attestation: &Attestation) -> VerifyOutcome {
        let Some(root) = self.committed_roots.get(job_id).map(|r| *r) else {
            return VerifyOutcome::Reject;
        };
        let Some((output, proof)) = Self::split_payload(result_bytes) else {
            return VerifyOutcome::Reject;
        };
        let hash: [u8; 32] = Sha256::digest(output).into();
        if hash != attestation.output_hash || !attestation.verify() {
            return VerifyOutcome::Reject;
        }
        if proof.verify(&root) {
            VerifyOutcome::Accept
        } else {
            VerifyOutcome::Reject
        }
    }
}

/// Encodes an output + its Merkle proof into the wire layout `MerkleVerifier`
/// expects, for use by the sandboxed executor when assembling a worker's
/// response.
pub fn encode_merkle_result(output: &[u8], proof: &MerkleProof) -> Vec<u8> {
    let encoded = bincode::serialize(proof).expect("MerkleProof serializes");
    let mut out = Vec::with_capacity(output.len() + encoded.len() + 4);
    out.extend_from_slice(output);
    out.extend_from_slice(&encoded);
    out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_attestation(job_id: [u8; 16], chunk_index: u32, output: &[u8]) -> (Attestation, libp2p_identity::Keypair) {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let output_hash: [u8; 32] = Sha256::digest(output).into();
        let payload = Attestation::payload(&job_id, chunk_index, &output_hash);
        let signature = keypair.sign(&payload).unwrap();
        (
            Attestation {
                job_id,
                chunk_index,
                output_hash,
                signature,
                public_key: keypair.public().encode_protobuf(),
            },
            keypair,
        )
    }

    #[test]
    fn hash_only_accepts_matching_signed_result() {
        let output = b"chunk result".to_vec();
        let (attestation, _kp) = signed_attestation([1u8; 16], 0, &output);
        let outcome = HashOnlyVerifier.verify(&[1u8; 16], 0, &output, &attestation);
        assert!(matches!(outcome, VerifyOutcome::Accept));
    }

    #[test]
    fn hash_only_rejects_tampered_result() {
        let output = b"chunk result".to_vec();
        let (attestation, _kp) = signed_attestation([1u8; 16], 0, &output);
        let outcome = HashOnlyVerifier.verify(&[1u8; 16], 0, b"tampered", &attestation);
        assert!(matches!(outcome, VerifyOutcome::Reject));
    }

    #[test]
    fn redundant_execution_accepts_after_majority() {
        let verifier = RedundantExecutionVerifier::new(3, 1);
        let job_id = [2u8; 16];
        let output = b"same result".to_vec();
        let (a1, _) = signed_attestation(job_id, 0, &output);
        let (a2, _) = signed_attestation(job_id, 0, &output);
        assert!(matches!(verifier.verify(&job_id, 0, &output, &a1), VerifyOutcome::NeedMoreReplicas));
        assert!(matches!(verifier.verify(&job_id, 0, &output, &a2), VerifyOutcome::Accept));
    }

    #[test]
    fn merkle_verifier_accepts_valid_proof() {
        let job_id = [3u8; 16];
        let output = b"leaf data".to_vec();
        let leaf_hash: [u8; 32] = Sha256::digest(&output).into();
        let sibling = [7u8; 32];
        let mut hasher = Sha256::new();
        hasher.update(leaf_hash);
        hasher.update(sibling);
        let root: [u8; 32] = hasher.finalize().into();

        let proof = MerkleProof { leaf_hash, siblings: vec![sibling], path_bits: vec![false] };
        let result_bytes = encode_merkle_result(&output, &proof);

        let output_hash: [u8; 32] = Sha256::digest(&output).into();
        let payload = Attestation::payload(&job_id, 0, &output_hash);
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let signature = keypair.sign(&payload).unwrap();
        let attestation = Attestation { job_id, chunk_index: 0, output_hash, signature, public_key: keypair.public().encode_protobuf() };

        let verifier = MerkleVerifier::new();
        verifier.commit_root(job_id, root);
        let outcome = verifier.verify(&job_id, 0, &result_bytes, &attestation);
        assert!(matches!(outcome, VerifyOutcome::Accept));
    }
}
