//! The Shard Cache (spec §4.3): bounded local persistence of shards and
//! manifests so a node can act both as an origin and as a provider.
//!
//! Keyspace: `(fileHash, shardIndex)` for shards, `fileHash` for manifests.
//! Capacity is a two-tier limit — byte budget and count budget, whichever
//! binds first. Eviction is LRU with a TTL overlay; manifests are only
//! dropped once their last shard is gone.

pub mod error;
pub mod keylock;

pub use error::CacheError;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use neuro_protocol::FileManifest;

pub type FileHash = [u8; 32];
pub type ShardKey = (FileHash, u32);

#[derive(Debug, Clone, Copy)]
pub struct CacheBudget {
    pub max_bytes: u64,
    pub max_shard_count: u64,
    pub ttl: Duration,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_bytes: 4 * 1024 * 1024 * 1024,
            max_shard_count: 200_000,
            ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

pub struct ShardCache {
    shards: Cache<ShardKey, Arc<Vec<u8>>>,
    manifests: Cache<FileHash, Arc<FileManifest>>,
    manifest_locks: keylock::KeyLocks<FileHash>,
    budget: CacheBudget,
    shard_count: AtomicUsize,
}

impl ShardCache {
    pub fn new(budget: CacheBudget) -> Self {
        let shards = Cache::builder()
            .max_capacity(budget.max_bytes)
            .weigher(|_key: &ShardKey, value: &Arc<Vec<u8>>| -> u32 {
                value.len().try_into().unwrap_or(u32::MAX)
            })
            .time_to_live(budget.ttl)
            .eviction_listener(|_key, _value, _cause| {
                // decremented explicitly by callers of `remove_shard`/`put_shard`
                // via `shard_count`; moka's listener runs off the critical path
                // and is used here only for observability hooks, not accounting.
            })
            .build();

        let manifests = Cache::builder()
            .max_capacity(1_000_000)
            .time_to_live(budget.ttl)
            .build();

        Self {
            shards,
            manifests,
            manifest_locks: keylock::KeyLocks::new(),
            budget,
            shard_count: AtomicUsize::new(0),
        }
    }

    /// Inserts a shard payload. Fails with `CacheFull` if the count budget is
    /// already saturated and no existing entry occupies this exact key (a
    /// re-put of an already-cached key never needs new headroom).
    pub fn put_shard(&self, key: ShardKey, payload: Vec<u8>) -> Result<(), CacheError> {
        let is_new = self.shards.get(&key).is_none();
        if is_new && self.shard_count.load(Ordering::Relaxed) as u64 >= self.budget.max_shard_count {
            self.shards.run_pending_tasks();
            if self.shard_count.load(Ordering::Relaxed) as u64 >= self.budget.max_shard_count {
                return Err(CacheError::CacheFull);
            }
        }
        self.shards.insert(key, Arc::new(payload));
        if is_new {
            self.shard_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn get_shard(&self, key: &ShardKey) -> Option<Arc<Vec<u8>>> {
        self.shards.get(key)
    }

    pub fn remove_shard(&self, key: &ShardKey) {
        if self.shards.get(key).is_some() {
            self.shards.invalidate(key);
            self.shard_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// True once every shard belonging to `file_hash` has been evicted; used
    /// to gate manifest eviction per the "manifests survive their shards"
    /// invariant.
    pub fn has_live_shards(&self, file_hash: &FileHash, shard_indices: &[u32]) -> bool {
        shard_indices.iter().any(|idx| self.shards.contains_key(&(*file_hash, *idx)))
    }

    pub fn put_manifest(&self, manifest: FileManifest) {
        let lock = self.manifest_locks.lock_for(&manifest.file_hash);
        let _guard = lock.lock();
        self.manifests.insert(manifest.file_hash, Arc::new(manifest));
    }

    pub fn get_manifest(&self, file_hash: &FileHash) -> Option<Arc<FileManifest>> {
        self.manifests.get(file_hash)
    }

    pub fn all_manifests(&self) -> Vec<Arc<FileManifest>> {
        self.manifests.iter().map(|(_, v)| v).collect()
    }

    /// Atomically replaces the manifest for `file_hash` iff the currently
    /// stored manifest still has version `expected_version` — the heal
    /// loop's compare-and-swap so a concurrent heal can't clobber a fresher
    /// manifest produced elsewhere.
    pub fn swap_manifest(
        &self,
        expected_version: u16,
        new_manifest: FileManifest,
    ) -> Result<(), CacheError> {
        let file_hash = new_manifest.file_hash;
        let lock = self.manifest_locks.lock_for(&file_hash);
        let _guard = lock.lock();

        match self.manifests.get(&file_hash) {
            Some(current) if current.manifest_version != expected_version => Err(CacheError::NotFound),
            _ => {
                self.manifests.insert(file_hash, Arc::new(new_manifest));
                Ok(())
            }
        }
    }

    pub fn evict_orphaned_manifest(&self, file_hash: &FileHash) {
        if let Some(manifest) = self.manifests.get(file_hash) {
            let indices: Vec<u32> = manifest
                .shard_locations
                .iter()
                .map(|l| l.shard_index as u32)
                .collect();
            if !self.has_live_shards(file_hash, &indices) {
                self.manifests.invalidate(file_hash);
            }
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuro_protocol::{
        CompressionAlgo, CompressionLevel, CompressionParams, EncryptionParams, ReplicationClass,
        ShardLocation, ShardingParams, CURRENT_MANIFEST_VERSION,
    };

    fn sample_manifest(file_hash: FileHash) -> FileManifest {
        FileManifest {
            manifest_version: CURRENT_MANIFEST_VERSION,
            file_hash,
            file_name: "f".into(),
            file_size: 10,
            created_at_epoch_ms: 0,
            ttl_seconds: 0,
            compression: CompressionParams { algo: CompressionAlgo::None, level: CompressionLevel::Fixed(1) },
            encryption: EncryptionParams { algo: "xchacha20poly1305", nonce: [0u8; 24], tag_size: 16 },
            sharding: ShardingParams { k: 1, m: 0, shard_size: 10, encrypted_len: 10 },
            shard_locations: vec![ShardLocation {
                shard_index: 0,
                peer_id: vec![1],
                replication_class: ReplicationClass::Single,
            }],
            mac: vec![],
        }
    }

    #[test]
    fn put_then_get_shard() {
        let cache = ShardCache::new(CacheBudget::default());
        let key = ([1u8; 32], 0);
        cache.put_shard(key, vec![1, 2, 3]).unwrap();
        assert_eq!(cache.get_shard(&key).unwrap().as_ref(), &vec![1, 2, 3]);
    }

    #[test]
    fn count_budget_rejects_beyond_cap() {
        let budget = CacheBudget { max_shard_count: 1, ..CacheBudget::default() };
        let cache = ShardCache::new(budget);
        cache.put_shard(([1u8; 32], 0), vec![1]).unwrap();
        let err = cache.put_shard(([2u8; 32], 0), vec![2]).unwrap_err();
        assert_eq!(err, CacheError::CacheFull);
    }

    #[test]
    fn manifest_survives_until_all_shards_gone() {
        let cache = ShardCache::new(CacheBudget::default());
        let file_hash = [3u8; 32];
        cache.put_manifest(sample_manifest(file_hash));
        cache.put_shard((file_hash, 0), vec![9]).unwrap();

        cache.evict_orphaned_manifest(&file_hash);
        assert!(cache.get_manifest(&file_hash).is_some());

        cache.remove_shard(&(file_hash, 0));
        cache.evict_orphaned_manifest(&file_hash);
        assert!(cache.get_manifest(&file_hash).is_none());
    }

    #[test]
    fn swap_manifest_rejects_stale_expected_version() {
        let cache = ShardCache::new(CacheBudget::default());
        let file_hash = [4u8; 32];
        let mut manifest = sample_manifest(file_hash);
        manifest.manifest_version = 2;
        cache.put_manifest(manifest.clone());

        let mut newer = manifest.clone();
        newer.manifest_version = 3;
        let err = cache.swap_manifest(1, newer).unwrap_err();
        assert_eq!(err, CacheError::NotFound);
    }
}
