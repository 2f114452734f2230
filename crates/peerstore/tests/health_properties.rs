//! `healthScore` must be a pure function of the final quality record (spec
//! invariant: "order-independence is explicitly not required, but replaying
//! updates in the same order yields the same score on any node").

use neuro_peerstore::{health_score, ConnectionQuality, HealthWeights};
use proptest::prelude::*;

proptest! {
    #[test]
    fn health_score_is_deterministic_given_final_state(
        latency in 0.0f64..2000.0,
        jitter in 0.0f64..500.0,
        loss in 0.0f64..1.0,
        bandwidth in 0.0f64..1000.0,
        last_seen in 0u64..1_000_000,
        now in 0u64..2_000_000,
    ) {
        let q = ConnectionQuality {
            latency_ms: latency,
            jitter_ms: jitter,
            packet_loss_ratio: loss,
            bandwidth_mbps: bandwidth,
            last_seen_epoch_ms: last_seen,
        };
        let w = HealthWeights::default();
        let a = health_score(&q, now, &w);
        let b = health_score(&q, now, &w);
        prop_assert_eq!(a, b);
        prop_assert!((0.0..=1.0).contains(&a));
    }
}
