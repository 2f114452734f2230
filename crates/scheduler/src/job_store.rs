//! Job/chunk persistence. "All transitions are persisted to the cache
//! before user-visible acknowledgement" (spec §4.5) — modelled here as a
//! trait so the in-process scheduler can be tested against an in-memory
//! store while the node binary wires up a durable one.

use dashmap::DashMap;
use neuro_protocol::{ChunkAssignment, JobManifest, JobState};

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub manifest: JobManifest,
    pub state: JobState,
    pub chunks: Vec<ChunkAssignment>,
    pub consecutive_failures: u32,
    /// Final merged output, set once `state` reaches `Completed` via
    /// `MergeStrategy::Concat`/`Sum`. `mapReduce` jobs complete through the
    /// executor's reduction step instead and set this the same way.
    pub merged_result: Option<Vec<u8>>,
}

pub trait JobStore: Send + Sync {
    fn put(&self, record: JobRecord);
    fn get(&self, job_id: &[u8; 16]) -> Option<JobRecord>;
    fn remove(&self, job_id: &[u8; 16]);
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<[u8; 16], JobRecord>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self { jobs: DashMap::new() }
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, record: JobRecord) {
        self.jobs.insert(record.manifest.job_id, record);
    }

    fn get(&self, job_id: &[u8; 16]) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|r| r.clone())
    }

    fn remove(&self, job_id: &[u8; 16]) {
        self.jobs.remove(job_id);
    }
}
