//! The Peer Store itself: an in-memory `peerId -> record` map (spec §4.8).
//!
//! `DashMap` gives us exactly the concurrency shape the spec asks for —
//! reads proceed without blocking writers touching a different peer's shard,
//! and every mutation to a single record serializes behind that shard's
//! lock, so "copy-on-update reads, fine-grained per-peer writes" falls out
//! of the data structure rather than anything bespoke.

use dashmap::DashMap;

use crate::health::{self, HealthWeights};
use crate::model::{CapacityHint, ConnectionQuality, PeerId, PeerRecord};

pub struct PeerStore {
    peers: DashMap<PeerId, PeerRecord>,
    weights: HealthWeights,
    /// Health points removed per fetch-miss failure, decaying transiently
    /// toward the neutral baseline rather than collapsing the score.
    failure_demotion_step: f64,
    /// Consecutive failures after which a shard location is marked stale
    /// and Auto-Heal is notified (spec §4.6).
    pub stale_after_failures: u32,
}

impl PeerStore {
    pub fn new(weights: HealthWeights) -> Self {
        Self {
            peers: DashMap::new(),
            weights,
            failure_demotion_step: 0.1,
            stale_after_failures: 3,
        }
    }

    pub fn register(&self, peer_id: PeerId, addresses: Vec<String>, now_ms: u64) {
        self.peers
            .entry(peer_id.clone())
            .or_insert_with(|| PeerRecord::new(peer_id, addresses, now_ms));
    }

    /// Applied on every RTT sample from the transport adapter: merges the
    /// fresh sample into the record, recomputes the pure `healthScore`, and
    /// runs it through the adaptive reputation model (spec §4.8).
    pub fn record_rtt_sample(&self, peer_id: &PeerId, quality: ConnectionQuality, now_ms: u64) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.quality = quality;
            entry.health_score = health::health_score(&entry.quality, now_ms, &self.weights);
            entry.consecutive_failures = 0;
            self.update_reputation(&mut entry, now_ms);
        }
    }

    /// Feeds a chunk-audit verification outcome into the peer's verify-success
    /// EMA, which gates the composite reputation score the same way the
    /// teacher's `neuro-sentinel` treats `verify_success_pct`.
    pub fn record_verification_outcome(&self, peer_id: &PeerId, success: bool, now_ms: u64) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            let sample = if success { 1.0 } else { 0.0 };
            entry.model.verify_stat.update(sample, self.weights.ema_alpha);
            entry.verify_success_ratio = entry.model.verify_stat.mean.clamp(0.0, 1.0);
            self.update_reputation(&mut entry, now_ms);
        }
    }

    /// Recomputes non-linear factor scores, anomaly/trend state, and the
    /// confidence-weighted reputation EMA from the record's current quality
    /// and verify-success ratio. Called after every observation.
    fn update_reputation(&self, entry: &mut PeerRecord, now_ms: u64) {
        let w = &self.weights;
        let q = entry.quality;

        let factors = health::ScoreFactors {
            latency_score: health::score_latency_nonlinear(q.latency_ms, w.slo_latency_ms),
            loss_score: health::score_loss_nonlinear(q.packet_loss_ratio),
            bandwidth_score: health::score_bandwidth_nonlinear(q.bandwidth_mbps, w.slo_bandwidth_mbps),
            recency_score: health::health_score(&q, now_ms, w).min(1.0),
            verify_score: health::score_verify_nonlinear(entry.verify_success_ratio),
        };
        let instant_score = health::compute_composite(&factors);

        let anomaly_magnitude = health::compute_anomaly_score(
            &entry.model.latency_stat,
            &entry.model.loss_stat,
            &entry.model.bandwidth_stat,
            &entry.model.verify_stat,
            q.latency_ms,
            q.packet_loss_ratio,
            q.bandwidth_mbps,
            entry.verify_success_ratio,
        );
        let anomaly_lvl = health::anomaly_level(anomaly_magnitude, w.anomaly_threshold);

        entry.model.latency_stat.update(q.latency_ms, w.ema_alpha);
        entry.model.loss_stat.update(q.packet_loss_ratio, w.ema_alpha);
        entry.model.bandwidth_stat.update(q.bandwidth_mbps, w.ema_alpha);
        entry.model.score_stat.update(instant_score, w.ema_alpha);
        entry.observations += 1;

        entry.model.trend_tracker.update(instant_score, w.ema_alpha);
        let trend_label = entry.model.trend_tracker.label(w.trend_threshold);

        entry.consecutive_anomalies = if anomaly_lvl != health::AnomalyLevel::None { entry.consecutive_anomalies + 1 } else { 0 };

        let slo_ok = q.latency_ms <= w.slo_latency_ms && q.bandwidth_mbps >= w.slo_bandwidth_mbps;
        if !slo_ok {
            entry.slo_violations += 1;
        }

        let confidence = health::compute_confidence(entry.observations, w.min_observations, entry.model.score_stat.var);

        let anomaly_penalty = match anomaly_lvl {
            health::AnomalyLevel::Critical => 0.5,
            health::AnomalyLevel::Warn => 0.75,
            health::AnomalyLevel::None => 1.0,
        };
        let trend_penalty = if trend_label == health::Trend::Degrading { 0.9 } else { 1.0 };
        let target = instant_score * anomaly_penalty * trend_penalty;

        entry.reputation = if entry.observations <= 1 {
            target
        } else {
            let effective_alpha = w.ema_alpha * (0.5 + 0.5 * confidence);
            (1.0 - effective_alpha) * entry.reputation + effective_alpha * target
        }
        .clamp(0.0, 100.0);

        entry.factors = factors;
        entry.anomaly_level = anomaly_lvl;
        entry.anomaly_score = anomaly_magnitude;
        entry.trend = trend_label;
        entry.trend_velocity = entry.model.trend_tracker.velocity;
        entry.confidence = confidence;
    }

    pub fn set_capacity(&self, peer_id: &PeerId, capacity: CapacityHint) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.capacity = Some(capacity);
        }
    }

    /// A fetch miss: demotes health transiently and tracks consecutive
    /// failures. Returns `true` once the location should be marked stale.
    pub fn record_fetch_failure(&self, peer_id: &PeerId) -> bool {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.health_score = health::decay_toward_baseline(entry.health_score, self.failure_demotion_step);
            entry.consecutive_failures += 1;
            entry.consecutive_failures >= self.stale_after_failures
        } else {
            false
        }
    }

    /// Periodic decay tick: peers not heard from recently drift toward the
    /// neutral baseline instead of keeping a stale high score.
    pub fn decay_tick(&self, now_ms: u64, idle_threshold_ms: u64, step: f64) {
        for mut entry in self.peers.iter_mut() {
            let idle = now_ms.saturating_sub(entry.quality.last_seen_epoch_ms);
            if idle >= idle_threshold_ms {
                entry.health_score = health::decay_toward_baseline(entry.health_score, step);
            }
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.get(peer_id).map(|r| r.clone())
    }

    pub fn list_peers(&self) -> Vec<PeerRecord> {
        self.peers.iter().map(|r| r.clone()).collect()
    }

    pub fn connection_quality(&self, peer_id: &PeerId) -> Option<ConnectionQuality> {
        self.peers.get(peer_id).map(|r| r.quality)
    }

    pub fn capacity(&self, peer_id: &PeerId) -> Option<CapacityHint> {
        self.peers.get(peer_id).and_then(|r| r.capacity)
    }

    pub fn remove(&self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Evicts the peer with the longest idle time among those with health
    /// below `health_floor`, the "longest-idle + lowest-health" policy.
    pub fn evict_one(&self, now_ms: u64, health_floor: f64) -> Option<PeerId> {
        let candidate = self
            .peers
            .iter()
            .filter(|r| r.health_score < health_floor)
            .max_by_key(|r| now_ms.saturating_sub(r.quality.last_seen_epoch_ms))
            .map(|r| r.peer_id.clone());

        if let Some(ref id) = candidate {
            self.peers.remove(id);
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(latency: f64, last_seen: u64) -> ConnectionQuality {
        ConnectionQuality {
            latency_ms: latency,
            jitter_ms: 10.0,
            packet_loss_ratio: 0.0,
            bandwidth_mbps: 100.0,
            last_seen_epoch_ms: last_seen,
        }
    }

    #[test]
    fn register_then_sample_computes_health() {
        let store = PeerStore::new(HealthWeights::default());
        let peer = vec![1, 2, 3];
        store.register(peer.clone(), vec!["/ip4/127.0.0.1/tcp/4001".into()], 0);
        store.record_rtt_sample(&peer, quality(50.0, 0), 0);
        let record = store.get(&peer).unwrap();
        assert!(record.health_score > 0.5);
    }

    #[test]
    fn three_consecutive_failures_marks_stale() {
        let store = PeerStore::new(HealthWeights::default());
        let peer = vec![9];
        store.register(peer.clone(), vec![], 0);
        assert!(!store.record_fetch_failure(&peer));
        assert!(!store.record_fetch_failure(&peer));
        assert!(store.record_fetch_failure(&peer));
    }

    #[test]
    fn decay_tick_pulls_idle_peers_toward_baseline() {
        let store = PeerStore::new(HealthWeights::default());
        let peer = vec![4];
        store.register(peer.clone(), vec![], 0);
        store.record_rtt_sample(&peer, quality(10.0, 0), 0);
        let before = store.get(&peer).unwrap().health_score;
        assert!(before > 0.5);

        store.decay_tick(1_000_000, 1_000, 0.05);
        let after = store.get(&peer).unwrap().health_score;
        assert!(after < before);
    }

    fn bad_quality(last_seen: u64) -> ConnectionQuality {
        ConnectionQuality {
            latency_ms: 900.0,
            jitter_ms: 900.0,
            packet_loss_ratio: 0.9,
            bandwidth_mbps: 0.0,
            last_seen_epoch_ms: last_seen,
        }
    }

    #[test]
    fn good_samples_raise_reputation_above_baseline() {
        let store = PeerStore::new(HealthWeights::default());
        let peer = vec![5];
        store.register(peer.clone(), vec![], 0);
        for i in 0..5 {
            store.record_rtt_sample(&peer, quality(20.0, i * 1_000), i * 1_000);
        }
        let record = store.get(&peer).unwrap();
        assert!(record.reputation > 50.0);
        assert_eq!(record.anomaly_level, crate::health::AnomalyLevel::None);
        assert_eq!(record.observations, 5);
    }

    #[test]
    fn failed_audits_gate_reputation_down() {
        let store = PeerStore::new(HealthWeights::default());
        let peer = vec![6];
        store.register(peer.clone(), vec![], 0);
        store.record_rtt_sample(&peer, quality(20.0, 0), 0);
        let before = store.get(&peer).unwrap().reputation;

        for i in 1..8 {
            store.record_verification_outcome(&peer, false, i * 1_000);
        }
        let after = store.get(&peer).unwrap();
        assert!(after.reputation < before);
        assert!(after.verify_success_ratio < 0.5);
    }

    #[test]
    fn sudden_latency_spike_is_flagged_anomalous() {
        let store = PeerStore::new(HealthWeights::default());
        let peer = vec![7];
        store.register(peer.clone(), vec![], 0);
        for i in 0..15 {
            store.record_rtt_sample(&peer, quality(15.0, i * 1_000), i * 1_000);
        }
        store.record_rtt_sample(&peer, quality(5_000.0, 16_000), 16_000);
        let record = store.get(&peer).unwrap();
        assert_ne!(record.anomaly_level, crate::health::AnomalyLevel::None);
    }

    #[test]
    fn eviction_prefers_longest_idle_low_health_peer() {
        let store = PeerStore::new(HealthWeights::default());
        store.register(vec![1], vec![], 0);
        store.record_rtt_sample(&vec![1], bad_quality(100), 100);
        store.register(vec![2], vec![], 0);
        store.record_rtt_sample(&vec![2], bad_quality(0), 0);

        let evicted = store.evict_one(1_000, 0.6);
        assert_eq!(evicted, Some(vec![2]));
    }
}
