//! The peer record and its constituent quality/capacity blocks (spec §3, §4.8).

use serde::{Deserialize, Serialize};

use crate::health::{AnomalyLevel, RunningStat, ScoreFactors, Trend, TrendTracker};

pub type PeerId = Vec<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQuality {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_ratio: f64,
    pub bandwidth_mbps: f64,
    pub last_seen_epoch_ms: u64,
}

impl Default for ConnectionQuality {
    fn default() -> Self {
        Self {
            latency_ms: 0.0,
            jitter_ms: 0.0,
            packet_loss_ratio: 0.0,
            bandwidth_mbps: 0.0,
            last_seen_epoch_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityHint {
    pub cpu_cores: u32,
    pub free_mem_bytes: u64,
    pub storage_free_bytes: u64,
}

/// Running EMA/z-score state behind the adaptive reputation model (spec
/// §4.8, grounded in the teacher's `neuro-sentinel` `PeerModel`). Kept out
/// of serialization: it's a derived cache over observed samples, not
/// durable state, and starts fresh on restart same as the teacher's
/// in-process-only CLI model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveModel {
    pub latency_stat: RunningStat,
    pub loss_stat: RunningStat,
    pub bandwidth_stat: RunningStat,
    pub verify_stat: RunningStat,
    pub score_stat: RunningStat,
    pub trend_tracker: TrendTracker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addresses: Vec<String>,
    pub quality: ConnectionQuality,
    pub health_score: f64,
    pub capacity: Option<CapacityHint>,
    pub consecutive_failures: u32,
    pub created_at_epoch_ms: u64,

    /// Confidence-weighted EMA of the composite reputation score (0..100),
    /// distinct from `health_score`: this one smooths across samples and
    /// factors in chunk-audit outcomes, the teacher's `PolicyOutput.reputation`.
    pub reputation: f64,
    pub confidence: f64,
    pub anomaly_level: AnomalyLevel,
    pub anomaly_score: f64,
    pub trend: Trend,
    pub trend_velocity: f64,
    pub observations: u64,
    pub consecutive_anomalies: u32,
    pub slo_violations: u32,
    pub factors: ScoreFactors,
    pub verify_success_ratio: f64,

    #[serde(skip)]
    pub(crate) model: AdaptiveModel,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId, addresses: Vec<String>, now_ms: u64) -> Self {
        Self {
            peer_id,
            addresses,
            quality: ConnectionQuality { last_seen_epoch_ms: now_ms, ..Default::default() },
            health_score: 0.5,
            capacity: None,
            consecutive_failures: 0,
            created_at_epoch_ms: now_ms,
            reputation: 50.0,
            confidence: 0.05,
            anomaly_level: AnomalyLevel::None,
            anomaly_score: 0.0,
            trend: Trend::Stable,
            trend_velocity: 0.0,
            observations: 0,
            consecutive_anomalies: 0,
            slo_violations: 0,
            factors: ScoreFactors::default(),
            verify_success_ratio: 1.0,
            model: AdaptiveModel::default(),
        }
    }
}
