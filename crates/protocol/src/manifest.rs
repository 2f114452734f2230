//! `FileManifest` and its constituent parameter blocks (spec §3, §6).
//!
//! The manifest is the sole authoritative description of how a file's bytes
//! were transformed and where the resulting shards were placed. It is
//! immutable once created; healing produces a new version that supersedes
//! the old one atomically (see `neuro-cache`).

use serde::{Deserialize, Serialize};

pub const CURRENT_MANIFEST_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgo {
    Zstd,
    Brotli,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionLevel {
    Fixed(u8),
    Adaptive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompressionParams {
    pub algo: CompressionAlgo,
    pub level: CompressionLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EncryptionParams {
    pub algo: &'static str,
    pub nonce: [u8; 24],
    pub tag_size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingParams {
    pub k: u8,
    pub m: u8,
    pub shard_size: u64,
    /// True length of the encrypted payload before zero-padding to a
    /// multiple of `k`. Needed on decode: `k * shard_size` is the padded
    /// length, not the real ciphertext length, so truncating to it instead
    /// of this field would feed AEAD padding into the cipher and fail tag
    /// verification whenever the ciphertext length isn't already a
    /// multiple of `k`.
    pub encrypted_len: u64,
}

impl ShardingParams {
    pub fn total_shards(&self) -> u16 {
        self.k as u16 + self.m as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationClass {
    /// One distinct peer per shard index (the nominal case).
    Single,
    /// More than `k+m` distinct peers hold copies of this shard because the
    /// candidate pool was too small to reach the floor with single placement.
    Overplaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLocation {
    pub shard_index: u16,
    pub peer_id: Vec<u8>,
    pub replication_class: ReplicationClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifest {
    pub manifest_version: u16,
    pub file_hash: [u8; 32],
    pub file_name: String,
    pub file_size: u64,
    pub created_at_epoch_ms: u64,
    pub ttl_seconds: u64,
    pub compression: CompressionParams,
    pub encryption: EncryptionParams,
    pub sharding: ShardingParams,
    pub shard_locations: Vec<ShardLocation>,
    pub mac: Vec<u8>,
}

impl FileManifest {
    /// Canonical serialisation of every field except `mac`, the exact input
    /// the manifest MAC is computed over and verified against.
    pub fn mac_input(&self) -> Vec<u8> {
        let unsigned = UnsignedManifest {
            manifest_version: self.manifest_version,
            file_hash: self.file_hash,
            file_name: &self.file_name,
            file_size: self.file_size,
            created_at_epoch_ms: self.created_at_epoch_ms,
            ttl_seconds: self.ttl_seconds,
            compression: self.compression,
            encryption: self.encryption,
            sharding: self.sharding,
            shard_locations: &self.shard_locations,
        };
        bincode::serialize(&unsigned).expect("manifest fields are always serializable")
    }

    pub fn reachable_shard_count(&self, reachable_peer_ids: &[Vec<u8>]) -> usize {
        self.shard_locations
            .iter()
            .filter(|loc| reachable_peer_ids.iter().any(|p| p == &loc.peer_id))
            .map(|loc| loc.shard_index)
            .collect::<std::collections::HashSet<_>>()
            .len()
    }
}

#[derive(Serialize)]
struct UnsignedManifest<'a> {
    manifest_version: u16,
    file_hash: [u8; 32],
    file_name: &'a str,
    file_size: u64,
    created_at_epoch_ms: u64,
    ttl_seconds: u64,
    compression: CompressionParams,
    encryption: EncryptionParams,
    sharding: ShardingParams,
    shard_locations: &'a [ShardLocation],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileManifest {
        FileManifest {
            manifest_version: CURRENT_MANIFEST_VERSION,
            file_hash: [7u8; 32],
            file_name: "report.pdf".into(),
            file_size: 4096,
            created_at_epoch_ms: 1000,
            ttl_seconds: 0,
            compression: CompressionParams {
                algo: CompressionAlgo::Zstd,
                level: CompressionLevel::Adaptive,
            },
            encryption: EncryptionParams {
                algo: "xchacha20poly1305",
                nonce: [1u8; 24],
                tag_size: 16,
            },
            sharding: ShardingParams { k: 4, m: 2, shard_size: 1024, encrypted_len: 4090 },
            shard_locations: vec![ShardLocation {
                shard_index: 0,
                peer_id: vec![1, 2, 3],
                replication_class: ReplicationClass::Single,
            }],
            mac: vec![0xaa; 32],
        }
    }

    #[test]
    fn mac_input_excludes_mac_field_and_is_deterministic() {
        let m1 = sample();
        let mut m2 = sample();
        m2.mac = vec![0xff; 4]; // different mac bytes, same logical manifest
        assert_eq!(m1.mac_input(), m2.mac_input());
    }

    #[test]
    fn mac_input_changes_when_a_field_changes() {
        let m1 = sample();
        let mut m2 = sample();
        m2.file_size += 1;
        assert_ne!(m1.mac_input(), m2.mac_input());
    }

    #[test]
    fn reachable_shard_count_dedups_by_index() {
        let mut m = sample();
        m.shard_locations.push(ShardLocation {
            shard_index: 0,
            peer_id: vec![9, 9, 9],
            replication_class: ReplicationClass::Overplaced,
        });
        let reachable = vec![vec![1, 2, 3], vec![9, 9, 9]];
        assert_eq!(m.reachable_shard_count(&reachable), 1);
    }
}
