//! The CES codec: Compress -> Encrypt -> Shard, and its inverse.
//!
//! `process` takes raw file bytes plus a symmetric key and produces a signed
//! `FileManifest` (minus shard placement, which the placement engine fills
//! in afterwards) together with the shard payloads ready for placement.
//! `reconstruct` takes a manifest, a matching presence mask of shard bytes,
//! and the same key, and recovers the original file bytes end to end.

pub mod compression;
pub mod config;
pub mod encryption;
pub mod error;
pub mod sharding;

pub use config::{CesConfig, PipelineConfig};
pub use error::CesError;

use hmac::{Hmac, Mac};
use neuro_protocol::{
    CompressionParams, EncryptionParams, FileManifest, ReplicationClass, ShardLocation,
    ShardingParams, CURRENT_MANIFEST_VERSION,
};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// A single shard payload, framed as `fileHash(32) || shardIndex(u32 be) ||
/// payload` per the wire format the Transport Adapter and Shard Cache share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub file_hash: [u8; 32],
    pub shard_index: u32,
    pub payload: Vec<u8>,
}

impl Shard {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 4 + self.payload.len());
        out.extend_from_slice(&self.file_hash);
        out.extend_from_slice(&self.shard_index.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, CesError> {
        if bytes.len() < 36 {
            return Err(CesError::IntegrityCheckFailed);
        }
        let mut file_hash = [0u8; 32];
        file_hash.copy_from_slice(&bytes[..32]);
        let shard_index = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
        Ok(Self { file_hash, shard_index, payload: bytes[36..].to_vec() })
    }
}

fn compute_mac(key: &[u8], input: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(input);
    mac.finalize().into_bytes().to_vec()
}

/// Runs the full encode-side pipeline: compress, encrypt, shard, and
/// assemble an unplaced manifest (`shard_locations` is empty; the placement
/// engine appends entries once it has chosen peers).
pub fn process(
    data: &[u8],
    file_name: &str,
    cfg: &PipelineConfig,
    cipher_key: &[u8; encryption::KEY_SIZE],
    mac_key: &[u8],
    created_at_epoch_ms: u64,
    ttl_seconds: u64,
) -> Result<(FileManifest, Vec<Shard>), CesError> {
    cfg.validate()?;

    let file_hash: [u8; 32] = Sha256::digest(data).into();

    let compressed = compression::compress(data, cfg.compression_algo, cfg.compression_level)?;

    let nonce = encryption::Cipher::generate_nonce();
    let cipher = encryption::Cipher::new(cipher_key);
    let encrypted = cipher.encrypt(&compressed, &nonce)?;

    let encoded = sharding::encode(&encrypted, cfg.k, cfg.m)?;

    let shards: Vec<Shard> = encoded
        .shards
        .into_iter()
        .enumerate()
        .map(|(i, payload)| Shard { file_hash, shard_index: i as u32, payload })
        .collect();

    let mut manifest = FileManifest {
        manifest_version: CURRENT_MANIFEST_VERSION,
        file_hash,
        file_name: file_name.to_string(),
        file_size: data.len() as u64,
        created_at_epoch_ms,
        ttl_seconds,
        compression: CompressionParams {
            algo: cfg.compression_algo,
            level: cfg.compression_level,
        },
        encryption: EncryptionParams {
            algo: "xchacha20poly1305",
            nonce,
            tag_size: 16,
        },
        sharding: ShardingParams {
            k: cfg.k,
            m: cfg.m,
            shard_size: encoded.shard_size as u64,
            encrypted_len: encoded.original_len as u64,
        },
        shard_locations: Vec::new(),
        mac: Vec::new(),
    };
    manifest.mac = compute_mac(mac_key, &manifest.mac_input());

    Ok((manifest, shards))
}

/// (Re)computes and stamps a manifest's MAC. Callers must invoke this any
/// time they mutate a manifest returned by `process` — most commonly after
/// the placement engine fills in `shard_locations`, which `mac_input`
/// covers, so a manifest signed before placement no longer verifies once
/// locations are attached.
pub fn sign_manifest(manifest: &mut FileManifest, mac_key: &[u8]) {
    manifest.mac = compute_mac(mac_key, &manifest.mac_input());
}

/// Verifies a manifest's MAC against `mac_key`.
pub fn verify_manifest_mac(manifest: &FileManifest, mac_key: &[u8]) -> Result<(), CesError> {
    let expected = compute_mac(mac_key, &manifest.mac_input());
    if expected.len() != manifest.mac.len()
        || !bool::from(subtle_eq(&expected, &manifest.mac))
    {
        return Err(CesError::ManifestMacMismatch);
    }
    Ok(())
}

fn subtle_eq(a: &[u8], b: &[u8]) -> subtle_bool::Choice {
    subtle_bool::ct_eq(a, b)
}

/// A tiny constant-time byte-slice comparator so manifest MAC checks don't
/// leak timing information, without pulling in the full `subtle` crate for
/// a single comparison.
mod subtle_bool {
    pub struct Choice(bool);
    impl From<Choice> for bool {
        fn from(c: Choice) -> bool {
            c.0
        }
    }
    pub fn ct_eq(a: &[u8], b: &[u8]) -> Choice {
        if a.len() != b.len() {
            return Choice(false);
        }
        let mut diff = 0u8;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        Choice(diff == 0)
    }
}

/// Runs the full decode-side pipeline: reconstructs shards, decrypts,
/// decompresses, and verifies the recovered bytes hash to `manifest.file_hash`.
pub fn reconstruct(
    shard_payloads: Vec<Option<Vec<u8>>>,
    manifest: &FileManifest,
    cipher_key: &[u8; encryption::KEY_SIZE],
    mac_key: &[u8],
) -> Result<Vec<u8>, CesError> {
    verify_manifest_mac(manifest, mac_key)?;

    let encrypted = sharding::decode(
        shard_payloads,
        manifest.sharding.k,
        manifest.sharding.m,
        manifest.sharding.encrypted_len as usize,
    )?;

    let cipher = encryption::Cipher::new(cipher_key);
    let compressed = cipher.decrypt(&encrypted, &manifest.encryption.nonce)?;

    let data = compression::decompress(&compressed, manifest.compression.algo)?;

    let actual_hash: [u8; 32] = Sha256::digest(&data).into();
    if actual_hash != manifest.file_hash {
        return Err(CesError::IntegrityCheckFailed);
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuro_protocol::{CompressionAlgo, CompressionLevel};

    fn cfg(k: u8, m: u8) -> PipelineConfig {
        PipelineConfig {
            compression_algo: CompressionAlgo::Zstd,
            compression_level: CompressionLevel::Fixed(3),
            k,
            m,
            max_shard_size_hint: None,
        }
    }

    fn to_presence(shards: Vec<Shard>) -> Vec<Option<Vec<u8>>> {
        shards.into_iter().map(|s| Some(s.payload)).collect()
    }

    #[test]
    fn full_round_trip() {
        let data = b"a rather ordinary file full of text data, repeated for bulk".repeat(10);
        let cipher_key = [1u8; encryption::KEY_SIZE];
        let mac_key = b"a-mac-key";
        let (manifest, shards) = process(&data, "bulk.txt", &cfg(4, 2), &cipher_key, mac_key, 1000, 0).unwrap();

        let presence = to_presence(shards);
        let back = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn survives_parity_loss() {
        let data = b"survive losing up to m shards without any issue at all".to_vec();
        let cipher_key = [2u8; encryption::KEY_SIZE];
        let mac_key = b"another-key";
        let (manifest, shards) = process(&data, "f.bin", &cfg(4, 2), &cipher_key, mac_key, 1000, 0).unwrap();

        let mut presence = to_presence(shards);
        presence[0] = None;
        presence[4] = None;
        let back = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn tampered_manifest_fails_mac() {
        let data = b"tamper test".to_vec();
        let cipher_key = [3u8; encryption::KEY_SIZE];
        let mac_key = b"key3";
        let (mut manifest, shards) = process(&data, "f.bin", &cfg(4, 2), &cipher_key, mac_key, 1000, 0).unwrap();
        manifest.file_size += 1;

        let presence = to_presence(shards);
        let err = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap_err();
        assert_eq!(err, CesError::ManifestMacMismatch);
    }

    #[test]
    fn insufficient_shards_fails() {
        let data = b"not enough shards remain to reconstruct this one".to_vec();
        let cipher_key = [4u8; encryption::KEY_SIZE];
        let mac_key = b"key4";
        let (manifest, shards) = process(&data, "f.bin", &cfg(4, 2), &cipher_key, mac_key, 1000, 0).unwrap();

        let mut presence = to_presence(shards);
        presence[0] = None;
        presence[1] = None;
        presence[2] = None;
        let err = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap_err();
        assert_eq!(err, CesError::InsufficientShards { needed: 4, have: 3 });
    }

    #[test]
    fn empty_file_is_legal() {
        let cipher_key = [5u8; encryption::KEY_SIZE];
        let mac_key = b"key5";
        let (manifest, shards) = process(&[], "empty.bin", &cfg(4, 2), &cipher_key, mac_key, 1000, 0).unwrap();
        let presence = to_presence(shards);
        let back = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn k1_m0_boundary_works_end_to_end() {
        let data = b"single data shard no parity whatsoever here".to_vec();
        let cipher_key = [6u8; encryption::KEY_SIZE];
        let mac_key = b"key6";
        let (manifest, shards) = process(&data, "f.bin", &cfg(1, 0), &cipher_key, mac_key, 1000, 0).unwrap();
        let presence = to_presence(shards);
        let back = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn wrong_cipher_key_fails_decryption() {
        let data = b"secret payload".to_vec();
        let cipher_key = [7u8; encryption::KEY_SIZE];
        let wrong_key = [8u8; encryption::KEY_SIZE];
        let mac_key = b"key7";
        let (manifest, shards) = process(&data, "f.bin", &cfg(4, 2), &cipher_key, mac_key, 1000, 0).unwrap();
        let presence = to_presence(shards);
        let err = reconstruct(presence, &manifest, &wrong_key, mac_key).unwrap_err();
        assert_eq!(err, CesError::DecryptionError);
    }
}
