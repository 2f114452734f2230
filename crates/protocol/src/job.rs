//! Compute job data model (spec §3, §4.5): `JobManifest`, the `JobState`
//! state machine, and `ChunkAssignment`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitStrategy {
    None,
    FixedChunks(u32),
    ByRecord { delim: u8, drop_empty: bool },
    ByKey { max_chunks: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    Concat,
    Sum,
    MapReduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Redundancy {
    None,
    KOfN { k: u32, n: u32 },
    Triple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_instructions: u64,
    pub mem_bytes: u64,
    pub wall_ms: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    pub job_id: [u8; 16],
    pub wasm_module_hash: [u8; 32],
    pub wasm_module_bytes: Option<Vec<u8>>,
    pub module_ref: Option<String>,
    pub input: Vec<u8>,
    pub split_strategy: SplitStrategy,
    pub merge_strategy: MergeStrategy,
    pub resource_limits: ResourceLimits,
    pub priority: u8,
    pub redundancy: Redundancy,
    pub deadline_epoch_ms: u64,
    /// Non-deterministic imports (RNG, wall-clock) were explicitly requested
    /// for this module. Mutually exclusive with redundant-execution
    /// verification (spec §9 open question).
    pub allow_nondeterminism: bool,
    /// Caller acknowledged non-determinism and requests hash-only
    /// verification in that case.
    pub acknowledge_nondeterminism: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Planning,
    Dispatched,
    Running,
    Merging,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    /// Partial order from spec §8: `Submitted < Planning < ... < Completed`,
    /// with `Failed`/`Cancelled`/`TimedOut` absorbing (reachable from any
    /// non-terminal state, but never left).
    fn rank(self) -> Option<u8> {
        match self {
            JobState::Submitted => Some(0),
            JobState::Planning => Some(1),
            JobState::Dispatched => Some(2),
            JobState::Running => Some(3),
            JobState::Merging => Some(4),
            JobState::Completed => Some(5),
            JobState::Failed | JobState::TimedOut | JobState::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::TimedOut | JobState::Cancelled)
    }

    /// Whether `self -> next` is a legal transition: terminal states are
    /// absorbing, and non-terminal progression must not regress.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(a), Some(b)) => b > a,
            (Some(_), None) => true, // any non-terminal can fail/cancel/time out
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkState {
    Pending,
    Inflight,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAssignment {
    pub job_id: [u8; 16],
    pub chunk_index: u32,
    pub worker_peer_id: Vec<u8>,
    pub input_slice_start: u64,
    pub input_slice_end: u64,
    pub assigned_at_epoch_ms: u64,
    pub attempt_number: u32,
    pub state: ChunkState,
    pub result_hash: Option<[u8; 32]>,
    pub result_bytes: Option<Vec<u8>>,
    pub attestation: Option<Attestation>,
}

/// Signed tuple asserting a specific worker produced a specific output for a
/// specific chunk (spec Glossary: "Attestation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub job_id: [u8; 16],
    pub chunk_index: u32,
    pub output_hash: [u8; 32],
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl Attestation {
    pub fn payload(job_id: &[u8; 16], chunk_index: u32, output_hash: &[u8; 32]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 4 + 32);
        buf.extend_from_slice(job_id);
        buf.extend_from_slice(&chunk_index.to_be_bytes());
        buf.extend_from_slice(output_hash);
        buf
    }

    pub fn verify(&self) -> bool {
        crate::chunk::verify_signature(
            &self.public_key,
            &self.signature,
            &Self::payload(&self.job_id, self.chunk_index, &self.output_hash),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_progression_is_monotonic() {
        assert!(JobState::Submitted.can_transition_to(JobState::Planning));
        assert!(JobState::Planning.can_transition_to(JobState::Dispatched));
        assert!(!JobState::Dispatched.can_transition_to(JobState::Submitted));
        assert!(!JobState::Running.can_transition_to(JobState::Running));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(!JobState::Completed.can_transition_to(JobState::Running));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Completed));
        assert!(!JobState::Failed.can_transition_to(JobState::Failed));
    }

    #[test]
    fn any_non_terminal_state_can_fail_or_cancel() {
        for s in [
            JobState::Submitted,
            JobState::Planning,
            JobState::Dispatched,
            JobState::Running,
            JobState::Merging,
        ] {
            assert!(s.can_transition_to(JobState::Failed));
            assert!(s.can_transition_to(JobState::Cancelled));
            assert!(s.can_transition_to(JobState::TimedOut));
        }
    }
}
