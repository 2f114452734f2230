use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_attempts: u32,
    /// Multiplier applied to `limits.wallMs` when deriving a chunk deadline.
    pub backoff_factor: f64,
    /// Consecutive chunk failures across the job before it trips to `Failed`.
    pub per_job_failure_threshold: u32,
    pub age_interval: Duration,
    pub default_num_workers: usize,
    pub max_inflight_per_peer: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_factor: 1.5,
            per_job_failure_threshold: 10,
            age_interval: Duration::from_secs(30),
            default_num_workers: 8,
            max_inflight_per_peer: 1,
        }
    }
}
