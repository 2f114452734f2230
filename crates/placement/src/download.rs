//! Download placement: builds a prioritised fetch plan from a manifest
//! (spec §4.2) — enough `(shardIndex, peerId)` tuples to obtain any `k`
//! shards, with alternates for each index, ordered by peer health so the
//! best-known holder for each index is tried first.

use std::collections::HashMap;

use neuro_peerstore::{PeerId, PeerStore};
use neuro_protocol::FileManifest;

#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub shard_index: u16,
    /// Alternates ordered best-first; the caller tries them in order until
    /// one returns a shard with a valid integrity tag.
    pub alternates: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub targets: Vec<FetchTarget>,
    pub concurrency_cap: usize,
}

pub fn build_fetch_plan(manifest: &FileManifest, peer_store: &PeerStore, concurrency_cap: usize) -> FetchPlan {
    let mut by_index: HashMap<u16, Vec<PeerId>> = HashMap::new();
    for loc in &manifest.shard_locations {
        by_index.entry(loc.shard_index).or_default().push(loc.peer_id.clone());
    }

    let mut targets: Vec<FetchTarget> = by_index
        .into_iter()
        .map(|(shard_index, mut peers)| {
            peers.sort_by(|a, b| {
                let ha = peer_store.get(a).map(|r| r.health_score).unwrap_or(0.0);
                let hb = peer_store.get(b).map(|r| r.health_score).unwrap_or(0.0);
                hb.partial_cmp(&ha).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.cmp(b))
            });
            FetchTarget { shard_index, alternates: peers }
        })
        .collect();
    targets.sort_by_key(|t| t.shard_index);

    FetchPlan { targets, concurrency_cap: concurrency_cap.max(1) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuro_peerstore::{ConnectionQuality, HealthWeights};
    use neuro_protocol::{
        CompressionAlgo, CompressionLevel, CompressionParams, EncryptionParams, ReplicationClass,
        ShardLocation, ShardingParams, CURRENT_MANIFEST_VERSION,
    };

    fn manifest_with(locations: Vec<ShardLocation>) -> FileManifest {
        FileManifest {
            manifest_version: CURRENT_MANIFEST_VERSION,
            file_hash: [1u8; 32],
            file_name: "f".into(),
            file_size: 1,
            created_at_epoch_ms: 0,
            ttl_seconds: 0,
            compression: CompressionParams { algo: CompressionAlgo::None, level: CompressionLevel::Fixed(1) },
            encryption: EncryptionParams { algo: "x", nonce: [0u8; 24], tag_size: 16 },
            sharding: ShardingParams { k: 2, m: 1, shard_size: 1, encrypted_len: 2 },
            shard_locations: locations,
            mac: vec![],
        }
    }

    #[test]
    fn orders_alternates_by_health_then_peer_id() {
        let store = PeerStore::new(HealthWeights::default());
        store.register(vec![1], vec![], 0);
        store.record_rtt_sample(&vec![1], ConnectionQuality { latency_ms: 10.0, jitter_ms: 5.0, packet_loss_ratio: 0.0, bandwidth_mbps: 100.0, last_seen_epoch_ms: 0 }, 0);
        store.register(vec![2], vec![], 0);
        store.record_rtt_sample(&vec![2], ConnectionQuality { latency_ms: 900.0, jitter_ms: 500.0, packet_loss_ratio: 0.9, bandwidth_mbps: 1.0, last_seen_epoch_ms: 0 }, 0);

        let manifest = manifest_with(vec![
            ShardLocation { shard_index: 0, peer_id: vec![2], replication_class: ReplicationClass::Single },
            ShardLocation { shard_index: 0, peer_id: vec![1], replication_class: ReplicationClass::Overplaced },
        ]);
        let plan = build_fetch_plan(&manifest, &store, 4);
        assert_eq!(plan.targets.len(), 1);
        assert_eq!(plan.targets[0].alternates, vec![vec![1], vec![2]]);
    }
}
