use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct HealConfig {
    pub heal_interval: Duration,
    /// Shards above `k` a file must retain reachability to before healing
    /// is skipped this round.
    pub healing_buffer: u16,
    pub max_concurrent_healings: usize,
    pub probe_timeout: Duration,
    pub sample_size: usize,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            heal_interval: Duration::from_secs(300),
            healing_buffer: 1,
            max_concurrent_healings: 4,
            probe_timeout: Duration::from_millis(800),
            sample_size: 50,
            backoff_base: Duration::from_secs(30),
            backoff_ceiling: Duration::from_secs(3600),
        }
    }
}
