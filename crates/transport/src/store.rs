//! What the transport needs from local shard storage, kept as a trait so
//! this crate doesn't pull in the node daemon's storage engine directly.

pub trait LocalShardStore: Send + Sync {
    fn save(&self, file_hash: [u8; 32], shard_index: u32, data: &[u8]) -> bool;
    fn load(&self, file_hash: [u8; 32], shard_index: u32) -> Option<Vec<u8>>;
    fn has(&self, file_hash: [u8; 32], shard_index: u32) -> bool;
    fn delete(&self, file_hash: [u8; 32], shard_index: u32) -> bool;
}
