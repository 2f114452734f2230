//! The Compute Scheduler (spec §4.5): takes a `JobManifest` from
//! `Submitted` to a terminal state through planning, dispatch, tracking,
//! and merge.

pub mod config;
pub mod error;
pub mod job_store;
pub mod merge;
pub mod queue;
pub mod split;
pub mod verify;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use job_store::{InMemoryJobStore, JobRecord, JobStore};
pub use verify::{ChunkVerifier, HashOnlyVerifier, VerifyOutcome};

use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use neuro_peerstore::{PeerId, PeerStore};
use neuro_placement::Candidate;
use neuro_protocol::{
    Attestation, ChunkAssignment, ChunkState, JobManifest, JobState, MergeStrategy, Redundancy,
};
use tracing::{info, warn};

use merge::MergeOutcome;
use queue::{DispatchQueue, QueueEntry};

pub struct JobScheduler<S: JobStore> {
    store: Arc<S>,
    peer_store: Arc<PeerStore>,
    dispatch_queue: Mutex<DispatchQueue>,
    worker_inflight: DashMap<PeerId, u32>,
    config: SchedulerConfig,
    verifier: Arc<dyn ChunkVerifier>,
}

impl<S: JobStore> JobScheduler<S> {
    pub fn new(store: Arc<S>, peer_store: Arc<PeerStore>, config: SchedulerConfig, verifier: Arc<dyn ChunkVerifier>) -> Self {
        Self {
            store,
            peer_store,
            dispatch_queue: Mutex::new(DispatchQueue::new(config.age_interval)),
            worker_inflight: DashMap::new(),
            config,
            verifier,
        }
    }

    /// Planning: validate, split, select initial workers, transition
    /// Submitted -> Planning -> Dispatched, and persist before returning.
    pub fn submit(&self, manifest: JobManifest) -> Result<[u8; 16], SchedulerError> {
        if manifest.wasm_module_bytes.is_none() && manifest.module_ref.is_none() {
            return Err(SchedulerError::InvalidJob("module bytes or module_ref required".into()));
        }

        let job_id = manifest.job_id;
        let ranges = split::split(&manifest.input, manifest.split_strategy, self.config.default_num_workers)?;

        let candidates = self.candidates();
        let replicas = match manifest.redundancy {
            Redundancy::None => 1,
            Redundancy::Triple => 3,
            Redundancy::KOfN { n, .. } => n.max(1) as usize,
        };
        let workers_needed = ranges.len() * replicas;
        if candidates.is_empty() {
            return Err(SchedulerError::InsufficientPeers { needed: workers_needed, have: 0 });
        }

        let now = now_ms();
        let mut chunks = Vec::with_capacity(ranges.len());
        let mut queue = self.dispatch_queue.lock().unwrap();
        for (chunk_index, range) in ranges.iter().enumerate() {
            for _ in 0..replicas {
                chunks.push(ChunkAssignment {
                    job_id,
                    chunk_index: chunk_index as u32,
                    worker_peer_id: Vec::new(),
                    input_slice_start: range.0,
                    input_slice_end: range.1,
                    assigned_at_epoch_ms: now,
                    attempt_number: 0,
                    state: ChunkState::Pending,
                    result_hash: None,
                    result_bytes: None,
                    attestation: None,
                });
                queue.push(QueueEntry {
                    job_id,
                    chunk_index: chunk_index as u32,
                    attempt_number: 0,
                    base_priority: manifest.priority,
                    enqueued_at: Instant::now(),
                });
            }
        }
        drop(queue);

        self.store.put(JobRecord {
            manifest,
            state: JobState::Planning,
            chunks,
            consecutive_failures: 0,
            merged_result: None,
        });
        self.transition(job_id, JobState::Dispatched)?;
        Ok(job_id)
    }

    fn candidates(&self) -> Vec<Candidate> {
        self.peer_store
            .list_peers()
            .into_iter()
            .map(|p| Candidate {
                peer_id: p.peer_id,
                health: p.health_score,
                latency_ms: p.quality.latency_ms,
                storage_free_bytes: p.capacity.map(|c| c.storage_free_bytes).unwrap_or(0),
                region: None,
            })
            .collect()
    }

    /// Pops the next dispatch-queue entry and assigns it to the best
    /// candidate that isn't already at its per-peer in-flight cap.
    pub fn dispatch_next(&self) -> Option<(ChunkAssignment, PeerId)> {
        let mut queue = self.dispatch_queue.lock().unwrap();
        let entry = queue.pop(Instant::now())?;
        drop(queue);

        let mut candidates = self.candidates();
        candidates.sort_by(|a, b| b.health.partial_cmp(&a.health).unwrap_or(std::cmp::Ordering::Equal));

        let cap = self.config.max_inflight_per_peer;
        let chosen = candidates.into_iter().find(|c| {
            self.worker_inflight.get(&c.peer_id).map(|v| *v).unwrap_or(0) < cap
        })?;

        *self.worker_inflight.entry(chosen.peer_id.clone()).or_insert(0) += 1;

        let mut record = self.store.get(&entry.job_id)?;
        if let Some(chunk) = record
            .chunks
            .iter_mut()
            .find(|c| c.chunk_index == entry.chunk_index && c.state == ChunkState::Pending)
        {
            chunk.worker_peer_id = chosen.peer_id.clone();
            chunk.state = ChunkState::Inflight;
            chunk.assigned_at_epoch_ms = now_ms();
            chunk.attempt_number = entry.attempt_number;
            let assignment = chunk.clone();
            if record.state == JobState::Dispatched {
                record.state = JobState::Running;
            }
            self.store.put(record);
            Some((assignment, chosen.peer_id))
        } else {
            None
        }
    }

    /// Deadline for a freshly-dispatched chunk, per spec §4.5:
    /// `now + min(jobDeadlineSlack, limits.wallMs * backoffFactor)`.
    fn chunk_deadline_ms(&self, manifest: &JobManifest, now: u64) -> u64 {
        let slack = manifest.deadline_epoch_ms.saturating_sub(now);
        let wall_budget = (manifest.resource_limits.wall_ms as f64 * self.config.backoff_factor) as u64;
        now + slack.min(wall_budget)
    }

    pub fn record_result(
        &self,
        job_id: &[u8; 16],
        chunk_index: u32,
        worker_peer_id: &[u8],
        result_bytes: Vec<u8>,
        attestation: Attestation,
    ) -> Result<JobState, SchedulerError> {
        self.worker_inflight.entry(worker_peer_id.to_vec()).and_modify(|v| *v = v.saturating_sub(1));

        let mut record = self.store.get(job_id).ok_or(SchedulerError::JobNotFound)?;
        let outcome = self.verifier.verify(job_id, chunk_index, &result_bytes, &attestation);

        match outcome {
            VerifyOutcome::Accept => {
                self.peer_store.record_verification_outcome(&worker_peer_id.to_vec(), true, now_ms());
                if let Some(chunk) = record.chunks.iter_mut().find(|c| c.chunk_index == chunk_index && c.worker_peer_id == worker_peer_id) {
                    chunk.state = ChunkState::Done;
                    chunk.result_hash = Some(attestation.output_hash);
                    chunk.result_bytes = Some(result_bytes);
                    chunk.attestation = Some(attestation);
                }
            }
            VerifyOutcome::Reject => {
                self.peer_store.record_fetch_failure(&worker_peer_id.to_vec());
                self.peer_store.record_verification_outcome(&worker_peer_id.to_vec(), false, now_ms());
                if let Some(chunk) = record.chunks.iter_mut().find(|c| c.chunk_index == chunk_index && c.worker_peer_id == worker_peer_id) {
                    chunk.state = ChunkState::Failed;
                }
                record.consecutive_failures += 1;
            }
            VerifyOutcome::NeedMoreReplicas => {}
        }

        let job_id = record.manifest.job_id;
        let merge_strategy = record.manifest.merge_strategy;
        self.store.put(record.clone());

        if record.consecutive_failures >= self.config.per_job_failure_threshold {
            return self.transition(job_id, JobState::Failed);
        }

        if all_required_chunks_done(&record) {
            self.transition(job_id, JobState::Merging)?;
            return self.run_merge(job_id, merge_strategy);
        }

        Ok(record.state)
    }

    fn run_merge(&self, job_id: [u8; 16], strategy: MergeStrategy) -> Result<JobState, SchedulerError> {
        let mut record = self.store.get(&job_id).ok_or(SchedulerError::JobNotFound)?;
        let mut by_index: Vec<&ChunkAssignment> = record
            .chunks
            .iter()
            .filter(|c| c.state == ChunkState::Done)
            .collect();
        by_index.sort_by_key(|c| c.chunk_index);

        let mut seen = std::collections::HashSet::new();
        let results: Vec<Vec<u8>> = by_index
            .into_iter()
            .filter(|c| seen.insert(c.chunk_index))
            .map(|c| c.result_bytes.clone().unwrap_or_default())
            .collect();

        match merge::merge(strategy, results) {
            Ok(MergeOutcome::Bytes(bytes)) => {
                record.state = JobState::Completed;
                record.merged_result = Some(bytes);
                self.store.put(record);
                info!(job_id = %hex::encode(job_id), "job completed");
                Ok(JobState::Completed)
            }
            Ok(MergeOutcome::ReducerInputs(_inputs)) => {
                // mapReduce's actual reduction runs inside the sandboxed
                // executor; the caller invokes it and reports completion.
                record.state = JobState::Merging;
                self.store.put(record);
                Ok(JobState::Merging)
            }
            Err(e) => {
                record.state = JobState::Failed;
                self.store.put(record);
                warn!(job_id = %hex::encode(job_id), error = %e, "merge failed");
                Err(e)
            }
        }
    }

    /// Checks a single job's in-flight chunks for missed deadlines, requeuing
    /// retriable chunks at a higher effective priority and failing the job
    /// once a chunk exhausts `max_attempts`. Callers (node/gateway) iterate
    /// their own job index and call this per active job.
    pub fn check_job_deadlines(&self, job_id: &[u8; 16], now_epoch_ms: u64) -> Result<(), SchedulerError> {
        let mut record = self.store.get(job_id).ok_or(SchedulerError::JobNotFound)?;
        let deadline_slack = self.chunk_deadline_ms(&record.manifest, now_epoch_ms) - now_epoch_ms;

        let mut requeue = Vec::new();
        for chunk in record.chunks.iter_mut() {
            if chunk.state != ChunkState::Inflight {
                continue;
            }
            let deadline = chunk.assigned_at_epoch_ms + deadline_slack;
            if now_epoch_ms > deadline {
                chunk.state = ChunkState::Failed;
                self.worker_inflight.entry(chunk.worker_peer_id.clone()).and_modify(|v| *v = v.saturating_sub(1));
                record.consecutive_failures += 1;
                if chunk.attempt_number + 1 < self.config.max_attempts {
                    requeue.push((chunk.chunk_index, chunk.attempt_number + 1));
                }
            }
        }

        let job_failed = record.consecutive_failures >= self.config.per_job_failure_threshold
            || (requeue.is_empty() && record.chunks.iter().any(|c| c.state == ChunkState::Failed)
                && !record.chunks.iter().any(|c| c.state == ChunkState::Done || c.state == ChunkState::Pending || c.state == ChunkState::Inflight));

        let priority = record.manifest.priority;
        self.store.put(record);

        if job_failed {
            self.transition(*job_id, JobState::Failed)?;
            return Ok(());
        }

        let mut queue = self.dispatch_queue.lock().unwrap();
        for (chunk_index, attempt_number) in requeue {
            queue.push(QueueEntry {
                job_id: *job_id,
                chunk_index,
                attempt_number,
                base_priority: priority.saturating_add(1),
                enqueued_at: Instant::now(),
            });
        }
        Ok(())
    }

    fn transition(&self, job_id: [u8; 16], next: JobState) -> Result<JobState, SchedulerError> {
        let mut record = self.store.get(&job_id).ok_or(SchedulerError::JobNotFound)?;
        if !record.state.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition { from: record.state, to: next });
        }
        record.state = next;
        self.store.put(record);
        Ok(next)
    }

    pub fn job_state(&self, job_id: &[u8; 16]) -> Option<JobState> {
        self.store.get(job_id).map(|r| r.state)
    }

    /// The merged output of a `Completed` job, if any. `None` for jobs that
    /// aren't complete yet and for `mapReduce` jobs whose reduction hasn't
    /// been run and reported back yet.
    pub fn job_result(&self, job_id: &[u8; 16]) -> Option<Vec<u8>> {
        self.store.get(job_id).and_then(|r| r.merged_result)
    }

    /// The submitted manifest for a job, so a caller driving `dispatch_next`
    /// can look up the wasm module and input bytes a returned assignment
    /// refers to (spec §4.5: "callers own chunk execution, the scheduler
    /// only tracks state").
    pub fn job_manifest(&self, job_id: &[u8; 16]) -> Option<JobManifest> {
        self.store.get(job_id).map(|r| r.manifest)
    }

    pub fn cancel(&self, job_id: &[u8; 16]) -> Result<JobState, SchedulerError> {
        self.transition(*job_id, JobState::Cancelled)
    }
}

fn all_required_chunks_done(record: &JobRecord) -> bool {
    let distinct_indices: std::collections::HashSet<u32> =
        record.chunks.iter().map(|c| c.chunk_index).collect();

    match record.manifest.redundancy {
        Redundancy::None => distinct_indices
            .iter()
            .all(|idx| record.chunks.iter().any(|c| c.chunk_index == *idx && c.state == ChunkState::Done)),
        Redundancy::Triple => distinct_indices.iter().all(|idx| {
            record.chunks.iter().filter(|c| c.chunk_index == *idx && c.state == ChunkState::Done).count() >= 2
        }),
        Redundancy::KOfN { k, .. } => distinct_indices.iter().all(|idx| {
            record.chunks.iter().filter(|c| c.chunk_index == *idx && c.state == ChunkState::Done).count() >= k as usize
        }),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuro_peerstore::{ConnectionQuality, HealthWeights};
    use neuro_protocol::{ResourceLimits, SplitStrategy};

    fn sample_manifest(job_id: [u8; 16], n: u32) -> JobManifest {
        JobManifest {
            job_id,
            wasm_module_hash: [1u8; 32],
            wasm_module_bytes: Some(vec![0u8; 8]),
            module_ref: None,
            input: vec![0u8; 100],
            split_strategy: SplitStrategy::FixedChunks(n),
            merge_strategy: MergeStrategy::Concat,
            resource_limits: ResourceLimits { cpu_instructions: 1_000_000, mem_bytes: 1 << 20, wall_ms: 1_000, io_read_bytes: 1 << 20, io_write_bytes: 1 << 20 },
            priority: 5,
            redundancy: Redundancy::None,
            deadline_epoch_ms: now_ms() + 60_000,
            allow_nondeterminism: false,
            acknowledge_nondeterminism: false,
        }
    }

    fn scheduler_with_peers(n: usize) -> JobScheduler<InMemoryJobStore> {
        let peer_store = Arc::new(PeerStore::new(HealthWeights::default()));
        for i in 0..n {
            let id = vec![i as u8];
            peer_store.register(id.clone(), vec![], 0);
            peer_store.record_rtt_sample(&id, ConnectionQuality { latency_ms: 20.0, jitter_ms: 5.0, packet_loss_ratio: 0.0, bandwidth_mbps: 100.0, last_seen_epoch_ms: 0 }, 0);
        }
        JobScheduler::new(Arc::new(InMemoryJobStore::new()), peer_store, SchedulerConfig::default(), Arc::new(HashOnlyVerifier))
    }

    #[test]
    fn submit_splits_and_dispatches() {
        let scheduler = scheduler_with_peers(4);
        let job_id = [7u8; 16];
        scheduler.submit(sample_manifest(job_id, 4)).unwrap();
        assert_eq!(scheduler.job_state(&job_id), Some(JobState::Dispatched));
    }

    #[test]
    fn dispatch_next_assigns_a_worker_and_moves_to_running() {
        let scheduler = scheduler_with_peers(4);
        let job_id = [8u8; 16];
        scheduler.submit(sample_manifest(job_id, 2)).unwrap();
        let (assignment, peer) = scheduler.dispatch_next().unwrap();
        assert_eq!(assignment.worker_peer_id, peer);
        assert_eq!(scheduler.job_state(&job_id), Some(JobState::Running));
    }

    #[test]
    fn rejects_job_with_no_module_reference() {
        let scheduler = scheduler_with_peers(2);
        let mut manifest = sample_manifest([9u8; 16], 1);
        manifest.wasm_module_bytes = None;
        manifest.module_ref = None;
        let err = scheduler.submit(manifest).unwrap_err();
        assert_eq!(err, SchedulerError::InvalidJob("module bytes or module_ref required".into()));
    }
}
