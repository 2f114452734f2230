//! Candidate scoring for upload placement (spec §4.2): a weighted
//! combination of health, latency, remaining storage, and a diversity bonus
//! that penalises co-locating shards for the same file on related peers.

use neuro_peerstore::PeerId;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub peer_id: PeerId,
    pub health: f64,
    pub latency_ms: f64,
    pub storage_free_bytes: u64,
    /// Known AS/region identifier, when available from the transport layer.
    pub region: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub w_health: f64,
    pub w_latency: f64,
    pub w_storage: f64,
    pub w_diversity: f64,
    pub latency_midpoint_ms: f64,
    pub storage_midpoint_bytes: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_health: 0.40,
            w_latency: 0.25,
            w_storage: 0.20,
            w_diversity: 0.15,
            latency_midpoint_ms: 200.0,
            storage_midpoint_bytes: 50.0 * 1024.0 * 1024.0 * 1024.0,
        }
    }
}

fn saturating(x: f64, midpoint: f64) -> f64 {
    if midpoint <= 0.0 {
        return 0.0;
    }
    let t = x / midpoint;
    1.0 / (1.0 + (-4.0 * (t - 1.0)).exp())
}

/// Co-location key: real AS/region when known, else a stable hash-partition
/// fallback derived from the peer id so the diversity bonus still means
/// something when region metadata is unavailable.
fn colocation_key(candidate: &Candidate) -> u64 {
    match candidate.region {
        Some(region) => region,
        None => {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            candidate.peer_id.hash(&mut hasher);
            hasher.finish() % 16
        }
    }
}

/// Raw score ignoring diversity — used for the data-shard phase, where raw
/// quality dominates.
pub fn raw_score(candidate: &Candidate, weights: &ScoringWeights) -> f64 {
    let latency_term = 1.0 - saturating(candidate.latency_ms, weights.latency_midpoint_ms);
    let storage_term = saturating(candidate.storage_free_bytes as f64, weights.storage_midpoint_bytes);
    weights.w_health * candidate.health + weights.w_latency * latency_term + weights.w_storage * storage_term
}

/// Score with the diversity bonus folded in — used for the parity-shard
/// phase, where spreading shards across distinct regions matters as much as
/// raw quality.
pub fn diversity_score(
    candidate: &Candidate,
    weights: &ScoringWeights,
    already_placed_keys: &[u64],
) -> f64 {
    let key = colocation_key(candidate);
    let collisions = already_placed_keys.iter().filter(|&&k| k == key).count();
    let diversity_bonus = if collisions == 0 { 1.0 } else { 1.0 / (1.0 + collisions as f64) };
    raw_score(candidate, weights) * (1.0 - weights.w_diversity) + weights.w_diversity * diversity_bonus
}

pub fn colocation_key_of(candidate: &Candidate) -> u64 {
    colocation_key(candidate)
}
