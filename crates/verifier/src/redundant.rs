//! Redundant-execution verification (spec §4.7): collect `r` independent
//! results for the same chunk, accept the majority hash once it reaches
//! `ceil(r/2)+1` matches. Ties escalate by asking the scheduler to dispatch
//! one more replica, up to `escalation_cap`.

use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::DashMap;

type ChunkKey = ([u8; 16], u32);

#[derive(Default)]
struct Tally {
    votes: HashMap<[u8; 32], u32>,
    total: u32,
    escalations: u32,
}

pub struct RedundantVerifier {
    replicas_required: u32,
    escalation_cap: u32,
    tallies: DashMap<ChunkKey, Mutex<Tally>>,
}

pub enum RedundantOutcome {
    Accept([u8; 32]),
    NeedMoreReplicas,
    /// Majority never formed even after escalating to the cap.
    Inconclusive,
}

impl RedundantVerifier {
    pub fn new(replicas_required: u32, escalation_cap: u32) -> Self {
        Self { replicas_required: replicas_required.max(1), escalation_cap, tallies: DashMap::new() }
    }

    fn majority_threshold(&self) -> u32 {
        self.replicas_required / 2 + 1
    }

    /// Registers one worker's result hash for `(job_id, chunk_index)`.
    /// Invalid attestations should be filtered out by the caller before
    /// calling this — a bad signature does not get a vote.
    pub fn record(&self, job_id: [u8; 16], chunk_index: u32, output_hash: [u8; 32]) -> RedundantOutcome {
        let entry = self.tallies.entry((job_id, chunk_index)).or_insert_with(|| Mutex::new(Tally::default()));
        let mut tally = entry.lock().unwrap();
        *tally.votes.entry(output_hash).or_insert(0) += 1;
        tally.total += 1;

        let threshold = self.majority_threshold();
        if let Some((&hash, &count)) = tally.votes.iter().max_by_key(|(_, c)| **c) {
            if count >= threshold {
                return RedundantOutcome::Accept(hash);
            }
        }

        if tally.total >= self.replicas_required {
            if tally.escalations < self.escalation_cap {
                tally.escalations += 1;
                return RedundantOutcome::NeedMoreReplicas;
            }
            return RedundantOutcome::Inconclusive;
        }

        RedundantOutcome::NeedMoreReplicas
    }

    pub fn forget(&self, job_id: [u8; 16], chunk_index: u32) {
        self.tallies.remove(&(job_id, chunk_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_accepts_once_threshold_reached() {
        let v = RedundantVerifier::new(3, 1);
        let job = [1u8; 16];
        let a = [0xAA; 32];
        assert!(matches!(v.record(job, 0, a), RedundantOutcome::NeedMoreReplicas));
        assert!(matches!(v.record(job, 0, a), RedundantOutcome::Accept(h) if h == a));
    }

    #[test]
    fn tie_escalates_then_inconclusive_past_cap() {
        let v = RedundantVerifier::new(2, 1);
        let job = [2u8; 16];
        let a = [0xAA; 32];
        let b = [0xBB; 32];
        let c = [0xCC; 32];
        assert!(matches!(v.record(job, 0, a), RedundantOutcome::NeedMoreReplicas));
        // two distinct hashes at total=2=replicas_required, no majority: escalate
        assert!(matches!(v.record(job, 0, b), RedundantOutcome::NeedMoreReplicas));
        // escalation cap is 1 and we've used it; a third distinct vote still has no
        // majority, so the outcome is inconclusive rather than escalating again
        assert!(matches!(v.record(job, 0, c), RedundantOutcome::Inconclusive));
    }
}
