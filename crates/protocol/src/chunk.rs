//! Shard transfer protocol carried over the Transport Adapter's
//! request/response channel: store, retrieve, audit (proof-of-possession
//! without transfer), and delete a single shard.

use libp2p_identity::PublicKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreChunkRequest {
    pub file_hash: [u8; 32],
    pub shard_index: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveChunkRequest {
    pub file_hash: [u8; 32],
    pub shard_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChunkRequest {
    pub file_hash: [u8; 32],
    pub shard_index: u32,
    pub challenge_hex: String,
    pub nonce_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkRequest {
    pub file_hash: [u8; 32],
    pub shard_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreChunkResponse {
    pub stored: bool,
    pub timestamp_ms: u64,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveChunkResponse {
    pub found: bool,
    pub data: Vec<u8>,
    pub timestamp_ms: u64,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChunkResponse {
    pub found: bool,
    pub accepted: bool,
    pub response_hash: String,
    pub timestamp_ms: u64,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkResponse {
    pub deleted: bool,
    pub timestamp_ms: u64,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChunkCommand {
    Store(StoreChunkRequest),
    Retrieve(RetrieveChunkRequest),
    Audit(AuditChunkRequest),
    Delete(DeleteChunkRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChunkReply {
    Store(StoreChunkResponse),
    Retrieve(RetrieveChunkResponse),
    Audit(AuditChunkResponse),
    Delete(DeleteChunkResponse),
}

fn shard_key(file_hash: &[u8; 32], shard_index: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(file_hash);
    out.extend_from_slice(&shard_index.to_be_bytes());
    out
}

impl StoreChunkResponse {
    pub fn receipt_payload(file_hash: &[u8; 32], shard_index: u32, len: usize, timestamp_ms: u64) -> Vec<u8> {
        let mut payload = shard_key(file_hash, shard_index);
        payload.extend_from_slice(b":store:");
        payload.extend_from_slice(&(len as u64).to_be_bytes());
        payload.extend_from_slice(&timestamp_ms.to_be_bytes());
        payload
    }

    pub fn verify_receipt(&self, file_hash: &[u8; 32], shard_index: u32, len: usize) -> bool {
        verify_signature(
            &self.public_key,
            &self.signature,
            &Self::receipt_payload(file_hash, shard_index, len, self.timestamp_ms),
        )
    }

    pub fn is_fresh(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) <= max_age_ms
    }
}

impl RetrieveChunkResponse {
    pub fn proof_payload(file_hash: &[u8; 32], shard_index: u32, len: usize, timestamp_ms: u64) -> Vec<u8> {
        let mut payload = shard_key(file_hash, shard_index);
        payload.extend_from_slice(b":retrieve:");
        payload.extend_from_slice(&(len as u64).to_be_bytes());
        payload.extend_from_slice(&timestamp_ms.to_be_bytes());
        payload
    }

    pub fn verify_proof(&self, file_hash: &[u8; 32], shard_index: u32) -> bool {
        if !self.found {
            return false;
        }
        verify_signature(
            &self.public_key,
            &self.signature,
            &Self::proof_payload(file_hash, shard_index, self.data.len(), self.timestamp_ms),
        )
    }

    pub fn is_fresh(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) <= max_age_ms
    }
}

impl AuditChunkResponse {
    pub fn audit_payload(
        file_hash: &[u8; 32],
        shard_index: u32,
        challenge_hex: &str,
        nonce_hex: &str,
        response_hash: &str,
        timestamp_ms: u64,
    ) -> Vec<u8> {
        let mut payload = shard_key(file_hash, shard_index);
        payload.extend_from_slice(
            format!(":audit:{challenge_hex}:{nonce_hex}:{response_hash}:{timestamp_ms}").as_bytes(),
        );
        payload
    }

    pub fn verify_audit(
        &self,
        file_hash: &[u8; 32],
        shard_index: u32,
        challenge_hex: &str,
        nonce_hex: &str,
    ) -> bool {
        if !self.found || !self.accepted {
            return false;
        }
        verify_signature(
            &self.public_key,
            &self.signature,
            &Self::audit_payload(
                file_hash,
                shard_index,
                challenge_hex,
                nonce_hex,
                &self.response_hash,
                self.timestamp_ms,
            ),
        )
    }

    pub fn is_fresh(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) <= max_age_ms
    }
}

pub(crate) fn verify_signature(public_key: &[u8], signature: &[u8], payload: &[u8]) -> bool {
    let Ok(public_key) = PublicKey::try_decode_protobuf(public_key) else {
        return false;
    };
    public_key.verify(payload, signature)
}
