//! The pure health-score function (spec §4.8):
//!
//! `health = w1*(1 - normalize(latencyMs)) + w2*(1 - normalize(jitterMs))
//!         + w3*(1 - packetLossRatio) + w4*normalize(bandwidthMbps)
//!         + w5*recency(lastSeen)`, clamped to `[0,1]`.
//!
//! No default weight set is prescribed by production history, so these are
//! documented tunables rather than a faithfully-recovered constant.

use serde::{Deserialize, Serialize};

use crate::model::ConnectionQuality;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub w_latency: f64,
    pub w_jitter: f64,
    pub w_loss: f64,
    pub w_bandwidth: f64,
    pub w_recency: f64,
    /// Midpoint (ms) of the latency saturating-logistic normalization.
    pub latency_midpoint_ms: f64,
    /// Midpoint (ms) of the jitter saturating-logistic normalization.
    pub jitter_midpoint_ms: f64,
    /// Midpoint (Mbps) of the bandwidth saturating-logistic normalization.
    pub bandwidth_midpoint_mbps: f64,
    /// Time (ms) after which `recency` has decayed to ~0.5.
    pub recency_half_life_ms: f64,
    /// Target latency SLO (ms) for the non-linear reputation curve.
    pub slo_latency_ms: f64,
    /// Target bandwidth floor (Mbps) for the non-linear reputation curve.
    pub slo_bandwidth_mbps: f64,
    /// Composite anomaly-score threshold (warn tier; critical is 1.5x this).
    pub anomaly_threshold: f64,
    /// Trend-velocity threshold for the improving/degrading labels.
    pub trend_threshold: f64,
    /// EMA smoothing factor for the adaptive reputation model.
    pub ema_alpha: f64,
    /// Observations required before confidence ramps to 1.0.
    pub min_observations: u64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            w_latency: 0.25,
            w_jitter: 0.15,
            w_loss: 0.25,
            w_bandwidth: 0.15,
            w_recency: 0.20,
            latency_midpoint_ms: 200.0,
            jitter_midpoint_ms: 50.0,
            bandwidth_midpoint_mbps: 20.0,
            recency_half_life_ms: 60_000.0,
            slo_latency_ms: 400.0,
            slo_bandwidth_mbps: 10.0,
            anomaly_threshold: 2.5,
            trend_threshold: 0.15,
            ema_alpha: 0.10,
            min_observations: 10,
        }
    }
}

/// Saturating logistic normalization into `[0,1]`, centered on `midpoint`:
/// values at the midpoint map to 0.5, and extreme values saturate instead of
/// letting a single outlier sample dominate the composite score.
fn normalize(x: f64, midpoint: f64) -> f64 {
    if midpoint <= 0.0 {
        return 0.0;
    }
    let t = x / midpoint;
    1.0 / (1.0 + (-4.0 * (t - 1.0)).exp())
}

/// Recency decays exponentially from 1.0 (just seen) toward 0.0 as time since
/// `last_seen` grows, reaching ~0.5 at `half_life_ms`.
fn recency(now_ms: u64, last_seen_epoch_ms: u64, half_life_ms: f64) -> f64 {
    if half_life_ms <= 0.0 {
        return if now_ms == last_seen_epoch_ms { 1.0 } else { 0.0 };
    }
    let elapsed = now_ms.saturating_sub(last_seen_epoch_ms) as f64;
    0.5f64.powf(elapsed / half_life_ms)
}

/// Pure function of a quality record and the current time. Calling this
/// twice with identical inputs always yields the identical score.
pub fn health_score(quality: &ConnectionQuality, now_ms: u64, weights: &HealthWeights) -> f64 {
    let lat_term = 1.0 - normalize(quality.latency_ms, weights.latency_midpoint_ms);
    let jitter_term = 1.0 - normalize(quality.jitter_ms, weights.jitter_midpoint_ms);
    let loss_term = 1.0 - quality.packet_loss_ratio.clamp(0.0, 1.0);
    let bw_term = normalize(quality.bandwidth_mbps, weights.bandwidth_midpoint_mbps);
    let recency_term = recency(now_ms, quality.last_seen_epoch_ms, weights.recency_half_life_ms);

    let raw = weights.w_latency * lat_term
        + weights.w_jitter * jitter_term
        + weights.w_loss * loss_term
        + weights.w_bandwidth * bw_term
        + weights.w_recency * recency_term;

    raw.clamp(0.0, 1.0)
}

/// Non-linear factor curves, EMA smoothing, anomaly z-scoring, trend
/// tracking and confidence weighting, grounded in the teacher's
/// `neuro-sentinel` `score_latency`/`score_uptime`/`score_verify`/
/// `score_bandwidth`/`RunningStat`/`TrendTracker`/`compute_confidence`.
/// Promoted here so both the façade and the standalone sentinel CLI share
/// one scoring engine instead of duplicating it. `health_score` above
/// remains the pure instantaneous connectivity score used for eviction
/// thresholds; `reputation` is the smoothed, confidence-weighted signal
/// this module derives on top of it.

/// Quadratic-over-SLO latency penalty: excellent under half the SLO,
/// linear dropoff to the SLO, quadratic beyond it.
pub fn score_latency_nonlinear(latency_ms: f64, slo_ms: f64) -> f64 {
    if latency_ms <= 0.0 {
        return 1.0;
    }
    if latency_ms <= slo_ms * 0.5 {
        1.0
    } else if latency_ms <= slo_ms {
        1.0 - 0.3 * ((latency_ms - slo_ms * 0.5) / (slo_ms * 0.5))
    } else {
        let over = (latency_ms - slo_ms) / slo_ms;
        (0.7 * (1.0 - over * over)).max(0.0)
    }
}

/// Non-linear uptime-percentage curve (used by the standalone sentinel CLI,
/// which receives a reported `uptime_pct` directly rather than deriving
/// recency from a last-seen timestamp the way the in-process Peer Store does).
pub fn score_uptime_nonlinear(uptime_pct: f64, slo_pct: f64) -> f64 {
    let u = uptime_pct.clamp(0.0, 100.0);
    if u >= slo_pct {
        0.95 + 0.05 * ((u - slo_pct) / (100.0 - slo_pct)).min(1.0)
    } else if u >= 95.0 {
        0.95 * ((u - 95.0) / (slo_pct - 95.0))
    } else {
        let ratio = u / 95.0;
        (ratio * ratio * 0.6).max(0.0)
    }
}

/// Cubic penalty on packet loss — loss is treated as severe, the same way
/// the teacher's verify-success curve punishes failures disproportionately.
pub fn score_loss_nonlinear(loss_ratio: f64) -> f64 {
    let v = 1.0 - loss_ratio.clamp(0.0, 1.0);
    v * v * v
}

/// Cubic penalty on chunk-audit success ratio, used as the composite's
/// multiplicative gate below (a peer that fails audits cannot buy back
/// reputation with good latency/bandwidth alone).
pub fn score_verify_nonlinear(verify_success_ratio: f64) -> f64 {
    let v = verify_success_ratio.clamp(0.0, 1.0);
    v * v * v
}

/// Saturating bandwidth curve: excellent at 3x the SLO floor, linear down
/// to the floor, steep penalty below it.
pub fn score_bandwidth_nonlinear(bandwidth_mbps: f64, slo_mbps: f64) -> f64 {
    if bandwidth_mbps <= 0.0 {
        return 0.0;
    }
    if bandwidth_mbps >= slo_mbps * 3.0 {
        1.0
    } else if bandwidth_mbps >= slo_mbps {
        0.7 + 0.3 * ((bandwidth_mbps - slo_mbps) / (slo_mbps * 2.0)).min(1.0)
    } else {
        0.7 * (bandwidth_mbps / slo_mbps)
    }
}

/// The per-factor breakdown exposed on `PeerRecord` for observability,
/// mirroring the teacher's `ScoreFactors`/`PolicyOutput`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub latency_score: f64,
    pub loss_score: f64,
    pub bandwidth_score: f64,
    pub recency_score: f64,
    pub verify_score: f64,
}

/// Weighted combination with the audit-verify score acting as a gate, same
/// shape as the teacher's `compute_composite_score`.
pub fn compute_composite(factors: &ScoreFactors) -> f64 {
    let raw = factors.latency_score * 0.30
        + factors.recency_score * 0.35
        + factors.loss_score * 0.20
        + factors.bandwidth_score * 0.15;
    let verify_gate = (factors.verify_score * 1.2).min(1.0);
    (raw * verify_gate * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyLevel {
    None,
    Warn,
    Critical,
}

impl Default for AnomalyLevel {
    fn default() -> Self {
        AnomalyLevel::None
    }
}

pub fn anomaly_level(score: f64, threshold: f64) -> AnomalyLevel {
    if score >= threshold * 1.5 {
        AnomalyLevel::Critical
    } else if score >= threshold {
        AnomalyLevel::Warn
    } else {
        AnomalyLevel::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Stable,
    Improving,
    Degrading,
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Stable
    }
}

/// Exponential moving average + variance, used both for z-score anomaly
/// detection and for the variance term in `compute_confidence`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningStat {
    pub mean: f64,
    pub var: f64,
    pub initialized: bool,
}

impl Default for RunningStat {
    fn default() -> Self {
        Self { mean: 0.0, var: 1e-6, initialized: false }
    }
}

impl RunningStat {
    pub fn update(&mut self, x: f64, alpha: f64) {
        if !self.initialized {
            self.mean = x;
            self.var = 1e-6;
            self.initialized = true;
            return;
        }
        let delta = x - self.mean;
        self.mean += alpha * delta;
        self.var = (1.0 - alpha) * self.var + alpha * delta * delta;
        self.var = self.var.max(1e-9);
    }

    pub fn zscore(&self, x: f64) -> f64 {
        if !self.initialized {
            return 0.0;
        }
        let std = self.var.sqrt();
        if std <= 1e-9 {
            return 0.0;
        }
        (x - self.mean) / std
    }
}

/// First- and second-derivative tracker over the composite score, flags
/// gradual degradation a single-sample threshold would miss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendTracker {
    pub velocity: f64,
    pub acceleration: f64,
    prev_score: f64,
    initialized: bool,
}

impl TrendTracker {
    pub fn update(&mut self, score: f64, alpha: f64) {
        if !self.initialized {
            self.prev_score = score;
            self.velocity = 0.0;
            self.acceleration = 0.0;
            self.initialized = true;
            return;
        }
        let new_velocity = score - self.prev_score;
        self.acceleration = (1.0 - alpha) * self.acceleration + alpha * (new_velocity - self.velocity);
        self.velocity = (1.0 - alpha) * self.velocity + alpha * new_velocity;
        self.prev_score = score;
    }

    pub fn label(&self, threshold: f64) -> Trend {
        if self.velocity > threshold {
            Trend::Improving
        } else if self.velocity < -threshold {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }
}

/// Composite anomaly magnitude: high latency, high loss, low bandwidth, and
/// low verify-success are all penalized; only the "bad" tail of each
/// distribution contributes.
pub fn compute_anomaly_score(
    latency_stat: &RunningStat,
    loss_stat: &RunningStat,
    bandwidth_stat: &RunningStat,
    verify_stat: &RunningStat,
    latency_ms: f64,
    loss_ratio: f64,
    bandwidth_mbps: f64,
    verify_success_ratio: f64,
) -> f64 {
    let lat_penalty = latency_stat.zscore(latency_ms).max(0.0);
    let loss_penalty = loss_stat.zscore(loss_ratio).max(0.0);
    let bw_penalty = (-bandwidth_stat.zscore(bandwidth_mbps)).max(0.0);
    let verify_penalty = (-verify_stat.zscore(verify_success_ratio)).max(0.0);
    (lat_penalty * lat_penalty + loss_penalty * loss_penalty + bw_penalty * bw_penalty + verify_penalty * verify_penalty).sqrt()
}

/// Observation-count ramp blended with a variance-based term: few samples
/// or a volatile score history both lower confidence.
pub fn compute_confidence(observations: u64, min_observations: u64, score_var: f64) -> f64 {
    let obs_confidence = if observations >= min_observations {
        1.0
    } else {
        observations as f64 / min_observations.max(1) as f64
    };
    let var_confidence = (1.0 - (score_var.sqrt() / 50.0)).clamp(0.05, 1.0);
    (obs_confidence * 0.6 + var_confidence * 0.4).clamp(0.05, 0.99)
}

/// Baseline health a peer drifts toward when not heard from for a long time
/// (the periodic decay tick), rather than remaining artificially healthy.
pub const NEUTRAL_BASELINE: f64 = 0.5;

/// Linear decay of `current` toward `NEUTRAL_BASELINE` by `step`, used both
/// by the decay tick and by transient fetch-miss demotion (spec §4.6).
pub fn decay_toward_baseline(current: f64, step: f64) -> f64 {
    if current > NEUTRAL_BASELINE {
        (current - step).max(NEUTRAL_BASELINE)
    } else if current < NEUTRAL_BASELINE {
        (current + step).min(NEUTRAL_BASELINE)
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_is_pure() {
        let q = ConnectionQuality {
            latency_ms: 150.0,
            jitter_ms: 20.0,
            packet_loss_ratio: 0.01,
            bandwidth_mbps: 40.0,
            last_seen_epoch_ms: 1_000,
        };
        let w = HealthWeights::default();
        let a = health_score(&q, 2_000, &w);
        let b = health_score(&q, 2_000, &w);
        assert_eq!(a, b);
    }

    #[test]
    fn health_is_clamped_to_unit_interval() {
        let w = HealthWeights::default();
        let terrible = ConnectionQuality {
            latency_ms: 1_000_000.0,
            jitter_ms: 1_000_000.0,
            packet_loss_ratio: 1.0,
            bandwidth_mbps: 0.0,
            last_seen_epoch_ms: 0,
        };
        let score = health_score(&terrible, 1_000_000_000, &w);
        assert!((0.0..=1.0).contains(&score));

        let perfect = ConnectionQuality {
            latency_ms: 0.0,
            jitter_ms: 0.0,
            packet_loss_ratio: 0.0,
            bandwidth_mbps: 10_000.0,
            last_seen_epoch_ms: 1_000,
        };
        let score = health_score(&perfect, 1_000, &w);
        assert!((0.0..=1.0).contains(&score));
        assert!(score > 0.9);
    }

    #[test]
    fn recency_decays_toward_half_at_half_life() {
        let w = HealthWeights::default();
        let r = recency(w.recency_half_life_ms as u64, 0, w.recency_half_life_ms);
        assert!((r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn decay_step_moves_toward_baseline_and_clamps() {
        assert_eq!(decay_toward_baseline(0.9, 0.1), 0.8);
        assert_eq!(decay_toward_baseline(0.52, 0.1), NEUTRAL_BASELINE);
        assert_eq!(decay_toward_baseline(0.1, 0.1), 0.2);
        assert_eq!(decay_toward_baseline(0.48, 0.1), NEUTRAL_BASELINE);
    }

    #[test]
    fn latency_nonlinear_penalizes_beyond_slo_quadratically() {
        let w = HealthWeights::default();
        let at_slo = score_latency_nonlinear(w.slo_latency_ms, w.slo_latency_ms);
        let double_slo = score_latency_nonlinear(w.slo_latency_ms * 2.0, w.slo_latency_ms);
        assert!(double_slo < at_slo);
        assert_eq!(score_latency_nonlinear(w.slo_latency_ms * 2.0, w.slo_latency_ms), 0.0);
    }

    #[test]
    fn verify_gate_drags_composite_down_even_with_good_factors() {
        let good = ScoreFactors { latency_score: 1.0, loss_score: 1.0, bandwidth_score: 1.0, recency_score: 1.0, verify_score: 1.0 };
        let bad_verify = ScoreFactors { verify_score: 0.1, ..good };
        assert!(compute_composite(&bad_verify) < compute_composite(&good));
    }

    #[test]
    fn running_stat_zscore_flags_outliers() {
        let mut stat = RunningStat::default();
        for _ in 0..20 {
            stat.update(50.0, 0.2);
        }
        assert!(stat.zscore(50.0).abs() < 1e-6);
        assert!(stat.zscore(500.0) > 2.0);
    }

    #[test]
    fn trend_tracker_labels_sustained_degradation() {
        let mut trend = TrendTracker::default();
        let mut score = 90.0;
        for _ in 0..10 {
            trend.update(score, 0.3);
            score -= 5.0;
        }
        assert_eq!(trend.label(0.15), Trend::Degrading);
    }

    #[test]
    fn confidence_ramps_with_observation_count() {
        let low = compute_confidence(2, 10, 1.0);
        let high = compute_confidence(50, 10, 1.0);
        assert!(high > low);
    }
}
