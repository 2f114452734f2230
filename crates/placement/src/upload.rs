//! Upload placement: two-phase greedy selection of `k+m` targets (spec
//! §4.2). Phase one picks the top `k` candidates by raw score to hold data
//! shards; phase two picks `m` more favouring diversity for parity shards.
//! Falls back to over-placement down to a floor of `k` distinct peers, and
//! fails with `InsufficientPeers` below that floor.

use neuro_peerstore::PeerId;
use neuro_protocol::ReplicationClass;

use crate::error::PlacementError;
use crate::scoring::{self, Candidate, ScoringWeights};

#[derive(Debug, Clone)]
pub struct PlacementAssignment {
    pub shard_index: u16,
    pub peer_id: PeerId,
    pub replication_class: ReplicationClass,
}

/// Deterministic tie-break: by score descending, then lexicographically on
/// peer id ascending — the same inputs always produce the same plan.
fn sort_candidates(candidates: &mut Vec<(Candidate, f64)>) {
    candidates.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.peer_id.cmp(&b.peer_id))
    });
}

pub fn plan_upload(
    candidates: &[Candidate],
    k: u8,
    m: u8,
    weights: &ScoringWeights,
) -> Result<Vec<PlacementAssignment>, PlacementError> {
    let k = k as usize;
    let m = m as usize;
    let n = k + m;

    if candidates.len() < k {
        return Err(PlacementError::InsufficientPeers { needed: k, have: candidates.len() });
    }

    let mut by_raw: Vec<(Candidate, f64)> = candidates
        .iter()
        .map(|c| (c.clone(), scoring::raw_score(c, weights)))
        .collect();
    sort_candidates(&mut by_raw);

    let data_phase: Vec<Candidate> = by_raw.iter().take(k).map(|(c, _)| c.clone()).collect();
    let mut placed_keys: Vec<u64> = data_phase.iter().map(scoring::colocation_key_of).collect();

    let remaining: Vec<Candidate> = by_raw
        .iter()
        .skip(k)
        .map(|(c, _)| c.clone())
        .collect();

    let parity_target = m.min(remaining.len());
    let mut parity_phase = Vec::with_capacity(parity_target);
    let mut pool = remaining;
    for _ in 0..parity_target {
        let mut scored: Vec<(usize, f64)> = pool
            .iter()
            .enumerate()
            .map(|(i, c)| (i, scoring::diversity_score(c, weights, &placed_keys)))
            .collect();
        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pool[*ia].peer_id.cmp(&pool[*ib].peer_id))
        });
        let Some((idx, _)) = scored.into_iter().next() else { break };
        let chosen = pool.remove(idx);
        placed_keys.push(scoring::colocation_key_of(&chosen));
        parity_phase.push(chosen);
    }

    let mut assignments = Vec::with_capacity(n);
    for (i, c) in data_phase.iter().enumerate() {
        assignments.push(PlacementAssignment {
            shard_index: i as u16,
            peer_id: c.peer_id.clone(),
            replication_class: ReplicationClass::Single,
        });
    }
    for (i, c) in parity_phase.iter().enumerate() {
        assignments.push(PlacementAssignment {
            shard_index: (k + i) as u16,
            peer_id: c.peer_id.clone(),
            replication_class: ReplicationClass::Single,
        });
    }

    let distinct_peers = assignments.len();
    if distinct_peers < n {
        // Over-place: reuse already-chosen peers (best first) to cover the
        // remaining shard indices so every index has a holder, down to the
        // floor of `k` distinct peers already guaranteed above.
        let fallback_pool: Vec<PeerId> = assignments.iter().map(|a| a.peer_id.clone()).collect();
        if fallback_pool.is_empty() {
            return Err(PlacementError::InsufficientPeers { needed: k, have: candidates.len() });
        }
        let mut cursor = 0usize;
        for shard_index in distinct_peers..n {
            let peer_id = fallback_pool[cursor % fallback_pool.len()].clone();
            cursor += 1;
            assignments.push(PlacementAssignment {
                shard_index: shard_index as u16,
                peer_id,
                replication_class: ReplicationClass::Overplaced,
            });
        }
    }

    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u8, health: f64, latency: f64) -> Candidate {
        Candidate {
            peer_id: vec![id],
            health,
            latency_ms: latency,
            storage_free_bytes: 100 * 1024 * 1024 * 1024,
            region: Some(id as u64 % 3),
        }
    }

    #[test]
    fn selects_k_plus_m_distinct_peers_when_enough_candidates() {
        let candidates: Vec<Candidate> = (0..8).map(|i| candidate(i, 0.9 - i as f64 * 0.01, 50.0)).collect();
        let plan = plan_upload(&candidates, 4, 2, &ScoringWeights::default()).unwrap();
        assert_eq!(plan.len(), 6);
        let distinct: std::collections::HashSet<_> = plan.iter().map(|a| a.peer_id.clone()).collect();
        assert_eq!(distinct.len(), 6);
        assert!(plan.iter().all(|a| a.replication_class == ReplicationClass::Single));
    }

    #[test]
    fn falls_back_to_overplacement_below_n_candidates() {
        let candidates: Vec<Candidate> = (0..5).map(|i| candidate(i, 0.9, 50.0)).collect();
        let plan = plan_upload(&candidates, 4, 2, &ScoringWeights::default()).unwrap();
        assert_eq!(plan.len(), 6);
        assert!(plan.iter().any(|a| a.replication_class == ReplicationClass::Overplaced));
    }

    #[test]
    fn fails_below_floor_of_k_distinct_peers() {
        let candidates: Vec<Candidate> = (0..3).map(|i| candidate(i, 0.9, 50.0)).collect();
        let err = plan_upload(&candidates, 4, 2, &ScoringWeights::default()).unwrap_err();
        assert_eq!(err, PlacementError::InsufficientPeers { needed: 4, have: 3 });
    }

    #[test]
    fn deterministic_across_repeated_calls() {
        let candidates: Vec<Candidate> = (0..8).map(|i| candidate(i, 0.5, 100.0)).collect();
        let plan1 = plan_upload(&candidates, 4, 2, &ScoringWeights::default()).unwrap();
        let plan2 = plan_upload(&candidates, 4, 2, &ScoringWeights::default()).unwrap();
        let ids1: Vec<_> = plan1.iter().map(|a| a.peer_id.clone()).collect();
        let ids2: Vec<_> = plan2.iter().map(|a| a.peer_id.clone()).collect();
        assert_eq!(ids1, ids2);
    }
}
