use neuro_transport::LocalShardStore;
use sled::Db;
use std::path::Path;

const USED_BYTES_KEY: &[u8] = b"__meta:used_bytes";

pub struct SecureBlockStore {
    db: Db,
    max_bytes: u64,
}

impl SecureBlockStore {
    pub fn new(storage_path: &str, max_gb: u64) -> Self {
        let db = sled::open(Path::new(storage_path)).expect("failed to open local shard store");
        let max_bytes = max_gb.saturating_mul(1024).saturating_mul(1024).saturating_mul(1024);
        let used_bytes = read_used_bytes(&db).unwrap_or(0);
        tracing::info!(storage_path, max_gb, used_bytes, "storage node allocation configured");
        Self { db, max_bytes }
    }

    fn save_shard(&self, key: Vec<u8>, data: &[u8]) -> Result<bool, sled::Error> {
        let existing_len = self.db.get(&key)?.map(|v| v.len() as u64).unwrap_or(0);
        let used_bytes = read_used_bytes(&self.db).unwrap_or(0);
        let projected = used_bytes.saturating_sub(existing_len).saturating_add(data.len() as u64);
        if projected > self.max_bytes {
            return Ok(false);
        }
        self.db.insert(key, data)?;
        write_used_bytes(&self.db, projected)?;
        self.db.flush()?;
        Ok(true)
    }
}

impl LocalShardStore for SecureBlockStore {
    fn save(&self, file_hash: [u8; 32], shard_index: u32, data: &[u8]) -> bool {
        self.save_shard(shard_key(file_hash, shard_index), data).unwrap_or(false)
    }

    fn load(&self, file_hash: [u8; 32], shard_index: u32) -> Option<Vec<u8>> {
        self.db.get(shard_key(file_hash, shard_index)).ok().flatten().map(|v| v.to_vec())
    }

    fn has(&self, file_hash: [u8; 32], shard_index: u32) -> bool {
        self.db.contains_key(shard_key(file_hash, shard_index)).unwrap_or(false)
    }

    fn delete(&self, file_hash: [u8; 32], shard_index: u32) -> bool {
        let key = shard_key(file_hash, shard_index);
        let Ok(Some(removed)) = self.db.remove(&key) else {
            return false;
        };
        let used_bytes = read_used_bytes(&self.db).unwrap_or(0);
        let _ = write_used_bytes(&self.db, used_bytes.saturating_sub(removed.len() as u64));
        let _ = self.db.flush();
        true
    }
}

fn shard_key(file_hash: [u8; 32], shard_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(&file_hash);
    key.extend_from_slice(&shard_index.to_be_bytes());
    key
}

fn read_used_bytes(db: &Db) -> Result<u64, sled::Error> {
    let Some(v) = db.get(USED_BYTES_KEY)? else {
        return Ok(0);
    };
    if v.len() != 8 {
        return Ok(0);
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&v);
    Ok(u64::from_le_bytes(arr))
}

fn write_used_bytes(db: &Db, bytes: u64) -> Result<(), sled::Error> {
    db.insert(USED_BYTES_KEY, bytes.to_le_bytes().to_vec())?;
    Ok(())
}
