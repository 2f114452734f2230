//! neuro-sentinel — standalone reputation/anomaly filter over NDJSON node
//! metrics. Delegates all scoring to `neuro-peerstore` (spec §4.8) instead
//! of keeping its own copy of the model, so this CLI and the façade's
//! in-process Peer Store can never drift apart.

use clap::{Parser, ValueEnum};
use neuro_peerstore::health::{self, AnomalyLevel, HealthWeights, RunningStat, ScoreFactors, Trend, TrendTracker};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, BufRead};

#[derive(Parser, Debug)]
#[command(name = "neuro-sentinel", version, about = "Peer reputation and anomaly policy filter")]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Adaptive)]
    mode: Mode,
    #[arg(long, default_value_t = 0.10)]
    alpha: f64,
    #[arg(long, default_value_t = 2.5)]
    anomaly_threshold: f64,
    #[arg(long, default_value_t = 0.15)]
    trend_threshold: f64,
    #[arg(long, default_value_t = 400.0)]
    slo_latency_ms: f64,
    #[arg(long, default_value_t = 99.95)]
    slo_uptime_pct: f64,
    #[arg(long, default_value_t = 10.0)]
    slo_bandwidth_mbps: f64,
    #[arg(long, default_value_t = 10)]
    min_observations: u64,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Instantaneous score, no per-peer history.
    Static,
    /// Full EMA/anomaly/trend/confidence engine.
    Adaptive,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    JsonPretty,
}

#[derive(Debug, Clone, Deserialize)]
struct NodeMetrics {
    peer: String,
    latency_ms: f64,
    uptime_pct: f64,
    verify_success_pct: f64,
    #[serde(default = "default_bandwidth")]
    bandwidth_mbps: f64,
}

fn default_bandwidth() -> f64 {
    50.0
}

#[derive(Debug, Clone, Serialize)]
struct PolicyOutput {
    peer: String,
    score: f64,
    reputation: f64,
    anomaly_level: String,
    anomaly_score: f64,
    trend: String,
    trend_velocity: f64,
    action: String,
    confidence: f64,
    observations: u64,
    slo_violations: SloStatus,
    factors: ScoreFactors,
}

#[derive(Debug, Clone, Serialize)]
struct SloStatus {
    latency_ok: bool,
    uptime_ok: bool,
    bandwidth_ok: bool,
    violations_count: u32,
}

#[derive(Debug, Clone, Default)]
struct PeerModel {
    latency_stat: RunningStat,
    uptime_stat: RunningStat,
    verify_stat: RunningStat,
    bandwidth_stat: RunningStat,
    score_stat: RunningStat,
    trend: TrendTracker,
    reputation: f64,
    observations: u64,
    consecutive_anomalies: u32,
    slo_violation_count: u32,
}

fn anomaly_str(level: AnomalyLevel) -> &'static str {
    match level {
        AnomalyLevel::None => "none",
        AnomalyLevel::Warn => "warn",
        AnomalyLevel::Critical => "critical",
    }
}

fn trend_str(trend: Trend) -> &'static str {
    match trend {
        Trend::Stable => "stable",
        Trend::Improving => "improving",
        Trend::Degrading => "degrading",
    }
}

/// 5-tier remediation decision, unchanged from the teacher's ops playbook.
fn decide_action(reputation: f64, anomaly: AnomalyLevel, trend: Trend, consecutive_anomalies: u32, confidence: f64, slo_violations: u32) -> &'static str {
    if anomaly == AnomalyLevel::Critical && consecutive_anomalies >= 3 && confidence > 0.6 {
        return "evict";
    }
    if anomaly == AnomalyLevel::Critical || reputation < 20.0 {
        return "quarantine";
    }
    if anomaly == AnomalyLevel::Warn || (trend == Trend::Degrading && reputation < 60.0) {
        return "probation";
    }
    if slo_violations >= 3 && reputation < 70.0 {
        return "probation";
    }
    if reputation >= 80.0 && anomaly == AnomalyLevel::None && confidence > 0.5 {
        return "promote";
    }
    "hold"
}

fn weights_from(args: &Args) -> HealthWeights {
    HealthWeights {
        slo_latency_ms: args.slo_latency_ms,
        slo_bandwidth_mbps: args.slo_bandwidth_mbps,
        anomaly_threshold: args.anomaly_threshold,
        trend_threshold: args.trend_threshold,
        ema_alpha: args.alpha.clamp(0.01, 0.5),
        min_observations: args.min_observations,
        ..HealthWeights::default()
    }
}

fn factors_for(metrics: &NodeMetrics, w: &HealthWeights) -> ScoreFactors {
    ScoreFactors {
        latency_score: health::score_latency_nonlinear(metrics.latency_ms, w.slo_latency_ms),
        recency_score: health::score_uptime_nonlinear(metrics.uptime_pct, w.slo_uptime_pct),
        loss_score: 1.0,
        bandwidth_score: health::score_bandwidth_nonlinear(metrics.bandwidth_mbps, w.slo_bandwidth_mbps),
        verify_score: health::score_verify_nonlinear(metrics.verify_success_pct / 100.0),
    }
}

fn process_static(metrics: &NodeMetrics, w: &HealthWeights) -> PolicyOutput {
    let factors = factors_for(metrics, w);
    let score = health::compute_composite(&factors);
    let action = if score >= 80.0 { "promote" } else { "hold" };

    PolicyOutput {
        peer: metrics.peer.clone(),
        score,
        reputation: score,
        anomaly_level: "none".into(),
        anomaly_score: 0.0,
        trend: "stable".into(),
        trend_velocity: 0.0,
        action: action.into(),
        confidence: 0.5,
        observations: 1,
        slo_violations: SloStatus {
            latency_ok: metrics.latency_ms <= w.slo_latency_ms,
            uptime_ok: metrics.uptime_pct >= w.slo_uptime_pct,
            bandwidth_ok: metrics.bandwidth_mbps >= w.slo_bandwidth_mbps,
            violations_count: 0,
        },
        factors,
    }
}

fn process_adaptive(model: &mut PeerModel, metrics: &NodeMetrics, w: &HealthWeights) -> PolicyOutput {
    let alpha = w.ema_alpha;
    let factors = factors_for(metrics, w);
    let score = health::compute_composite(&factors);

    // `uptime_stat` tracks (100 - uptime_pct) so its "high value = bad"
    // slot in `compute_anomaly_score` lines up with lower uptime being bad.
    let anomaly_magnitude = health::compute_anomaly_score(
        &model.latency_stat,
        &model.uptime_stat,
        &model.bandwidth_stat,
        &model.verify_stat,
        metrics.latency_ms,
        100.0 - metrics.uptime_pct,
        metrics.bandwidth_mbps,
        metrics.verify_success_pct / 100.0,
    );
    let anomaly_lvl = health::anomaly_level(anomaly_magnitude, w.anomaly_threshold);

    model.latency_stat.update(metrics.latency_ms, alpha);
    model.uptime_stat.update(100.0 - metrics.uptime_pct, alpha);
    model.verify_stat.update(metrics.verify_success_pct / 100.0, alpha);
    model.bandwidth_stat.update(metrics.bandwidth_mbps, alpha);
    model.score_stat.update(score, alpha);
    model.observations += 1;

    model.trend.update(score, alpha);
    let trend_label = model.trend.label(w.trend_threshold);

    model.consecutive_anomalies = if anomaly_lvl != AnomalyLevel::None { model.consecutive_anomalies + 1 } else { 0 };

    let lat_ok = metrics.latency_ms <= w.slo_latency_ms;
    let up_ok = metrics.uptime_pct >= w.slo_uptime_pct;
    let bw_ok = metrics.bandwidth_mbps >= w.slo_bandwidth_mbps;
    if !lat_ok || !up_ok || !bw_ok {
        model.slo_violation_count += 1;
    }

    let confidence = health::compute_confidence(model.observations, w.min_observations, model.score_stat.var);

    let anomaly_penalty = match anomaly_lvl {
        AnomalyLevel::Critical => 0.5,
        AnomalyLevel::Warn => 0.75,
        AnomalyLevel::None => 1.0,
    };
    let trend_penalty = if trend_label == Trend::Degrading { 0.9 } else { 1.0 };
    let target = score * anomaly_penalty * trend_penalty;

    model.reputation = if model.reputation <= 0.0 {
        target
    } else {
        let effective_alpha = alpha * (0.5 + 0.5 * confidence);
        (1.0 - effective_alpha) * model.reputation + effective_alpha * target
    }
    .clamp(0.0, 100.0);

    let action = decide_action(model.reputation, anomaly_lvl, trend_label, model.consecutive_anomalies, confidence, model.slo_violation_count);

    PolicyOutput {
        peer: metrics.peer.clone(),
        score,
        reputation: (model.reputation * 100.0).round() / 100.0,
        anomaly_level: anomaly_str(anomaly_lvl).into(),
        anomaly_score: (anomaly_magnitude * 1000.0).round() / 1000.0,
        trend: trend_str(trend_label).into(),
        trend_velocity: (model.trend.velocity * 1000.0).round() / 1000.0,
        action: action.into(),
        confidence: (confidence * 1000.0).round() / 1000.0,
        observations: model.observations,
        slo_violations: SloStatus { latency_ok: lat_ok, uptime_ok: up_ok, bandwidth_ok: bw_ok, violations_count: model.slo_violation_count },
        factors,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let weights = weights_from(&args);
    let stdin = io::stdin();
    let mut models: HashMap<String, PeerModel> = HashMap::new();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let metrics: NodeMetrics = serde_json::from_str(&line)?;
        let output = match args.mode {
            Mode::Static => process_static(&metrics, &weights),
            Mode::Adaptive => {
                let model = models.entry(metrics.peer.clone()).or_default();
                process_adaptive(model, &metrics, &weights)
            }
        };

        let json = match args.output {
            OutputFormat::Json => serde_json::to_string(&output)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&output)?,
        };
        println!("{}", json);
    }

    Ok(())
}
