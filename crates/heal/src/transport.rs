//! The narrow transport contract the heal loop depends on: presence probes
//! (no shard transfer) and best-effort shard fetch. The concrete adapter
//! lives in `neuro-transport`; tests exercise the loop against a fake.

use async_trait::async_trait;
use neuro_peerstore::PeerId;

pub type FileHash = [u8; 32];

#[async_trait]
pub trait ShardTransport: Send + Sync {
    /// Lightweight "do you have shard i for file F?" query. No payload
    /// transfer; callers apply their own timeout around this call.
    async fn probe_shard(&self, peer_id: &PeerId, file_hash: FileHash, shard_index: u32) -> bool;

    /// Fetches the shard payload, or `None` on any failure.
    async fn fetch_shard(&self, peer_id: &PeerId, file_hash: FileHash, shard_index: u32) -> Option<Vec<u8>>;
}
