//! Adapts the Shard Cache to the Transport Adapter's `LocalShardStore`
//! contract, so the façade answers other peers' `storeShard`/`retrieveShard`
//! requests out of the same cache it uses for its own uploads/downloads.

use std::sync::Arc;

use neuro_cache::ShardCache;
use neuro_transport::LocalShardStore;

pub struct CacheShardStore(pub Arc<ShardCache>);

impl LocalShardStore for CacheShardStore {
    fn save(&self, file_hash: [u8; 32], shard_index: u32, data: &[u8]) -> bool {
        self.0.put_shard((file_hash, shard_index), data.to_vec()).is_ok()
    }

    fn load(&self, file_hash: [u8; 32], shard_index: u32) -> Option<Vec<u8>> {
        self.0.get_shard(&(file_hash, shard_index)).map(|v| v.as_ref().clone())
    }

    fn has(&self, file_hash: [u8; 32], shard_index: u32) -> bool {
        self.0.get_shard(&(file_hash, shard_index)).is_some()
    }

    fn delete(&self, file_hash: [u8; 32], shard_index: u32) -> bool {
        let existed = self.0.get_shard(&(file_hash, shard_index)).is_some();
        self.0.remove_shard(&(file_hash, shard_index));
        existed
    }
}
