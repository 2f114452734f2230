//! The narrow contract the scheduler needs from the Verifier (spec §4.7):
//! accept or reject a chunk result. The concrete strategies live in
//! `neuro-verifier`; kept as a trait here so the two crates don't form a
//! dependency cycle.

use neuro_protocol::Attestation;

pub enum VerifyOutcome {
    Accept,
    Reject,
    /// Redundant-execution is still waiting on more replicas.
    NeedMoreReplicas,
}

pub trait ChunkVerifier: Send + Sync {
    fn verify(
        &self,
        job_id: &[u8; 16],
        chunk_index: u32,
        result_bytes: &[u8],
        attestation: &Attestation,
    ) -> VerifyOutcome;
}

/// The simplest strategy (spec §4.7 "hash-only"): trust the worker, accept
/// iff the attestation's signature and hash both check out. Used as the
/// scheduler's default so tests don't need the full verifier crate wired in.
pub struct HashOnlyVerifier;

impl ChunkVerifier for HashOnlyVerifier {
    fn verify(&self, _job_id: &[u8; 16], _chunk_index: u32, result_bytes: &[u8], attestation: &Attestation) -> VerifyOutcome {
        use sha2::{Digest, Sha256};
        let hash: [u8; 32] = Sha256::digest(result_bytes).into();
        if hash == attestation.output_hash && attestation.verify() {
            VerifyOutcome::Accept
        } else {
            VerifyOutcome::Reject
        }
    }
}
