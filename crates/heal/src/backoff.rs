//! Per-file healing backoff: doubles on consecutive failures up to a
//! ceiling, reset on success.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::transport::FileHash;

#[derive(Default)]
pub struct BackoffTracker {
    state: HashMap<FileHash, BackoffState>,
}

struct BackoffState {
    consecutive_failures: u32,
    until: Instant,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self { state: HashMap::new() }
    }

    pub fn is_backed_off(&self, file_hash: &FileHash, now: Instant) -> bool {
        self.state.get(file_hash).map(|s| now < s.until).unwrap_or(false)
    }

    pub fn record_failure(&mut self, file_hash: FileHash, now: Instant, base: Duration, ceiling: Duration) {
        let entry = self.state.entry(file_hash).or_insert_with(|| BackoffState { consecutive_failures: 0, until: now });
        entry.consecutive_failures += 1;
        let shift = entry.consecutive_failures.min(20) - 1;
        let delay = base.checked_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX)).unwrap_or(ceiling).min(ceiling);
        entry.until = now + delay;
    }

    pub fn record_success(&mut self, file_hash: &FileHash) {
        self.state.remove(file_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_ceiling() {
        let mut tracker = BackoffTracker::new();
        let fh = [1u8; 32];
        let base = Duration::from_secs(10);
        let ceiling = Duration::from_secs(100);
        let t0 = Instant::now();

        tracker.record_failure(fh, t0, base, ceiling);
        assert!(tracker.is_backed_off(&fh, t0));

        for _ in 0..10 {
            tracker.record_failure(fh, t0, base, ceiling);
        }
        let delay = tracker.state.get(&fh).unwrap().until - t0;
        assert!(delay <= ceiling);
    }

    #[test]
    fn success_clears_backoff() {
        let mut tracker = BackoffTracker::new();
        let fh = [2u8; 32];
        let t0 = Instant::now();
        tracker.record_failure(fh, t0, Duration::from_secs(1), Duration::from_secs(10));
        tracker.record_success(&fh);
        assert!(!tracker.is_backed_off(&fh, t0));
    }
}
