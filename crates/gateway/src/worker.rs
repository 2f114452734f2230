//! Background tasks the façade drives alongside the HTTP server: the
//! compute dispatch loop, the deadline sweep, and the auto-heal loop.
//!
//! Chunk execution itself runs in-process, on this binary's own
//! `neuro-executor`. The façade registers its own peer id in the Peer
//! Store as a compute candidate, so `JobScheduler::dispatch_next` always
//! has somewhere to send work even with no other compute-capable peers
//! connected; storage placement and healing remain fully peer-distributed
//! over the Transport Adapter regardless. Dispatching a chunk to a genuine
//! remote worker would need a wire verb the shard transfer protocol
//! doesn't carry yet (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use neuro_protocol::JobState;
use tracing::{info, warn};

use crate::state::AppState;

pub fn spawn_background_tasks(state: Arc<AppState>) {
    tokio::spawn(dispatch_loop(state.clone()));
    tokio::spawn(deadline_sweep_loop(state.clone()));
    tokio::spawn(heal_loop(state));
}

async fn dispatch_loop(state: Arc<AppState>) {
    loop {
        match state.scheduler.dispatch_next() {
            Some((assignment, peer_id)) => {
                let state = state.clone();
                tokio::spawn(async move { run_chunk(state, assignment, peer_id).await });
            }
            None => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}

async fn run_chunk(state: Arc<AppState>, assignment: neuro_protocol::ChunkAssignment, peer_id: Vec<u8>) {
    let Some(manifest) = state.scheduler.job_manifest(&assignment.job_id) else { return };
    let Some(wasm_bytes) = manifest.wasm_module_bytes.clone() else {
        warn!(job_id = %hex::encode(assignment.job_id), "module_ref resolution is not implemented, chunk left inflight to time out");
        return;
    };
    let start = assignment.input_slice_start as usize;
    let end = assignment.input_slice_end as usize;
    let Some(input) = manifest.input.get(start..end) else { return };

    let outcome = state
        .executor
        .execute_chunk(assignment.job_id, assignment.chunk_index, wasm_bytes, input.to_vec(), manifest.resource_limits)
        .await;

    match outcome {
        Ok(outcome) => {
            if let Err(e) = state.scheduler.record_result(&assignment.job_id, assignment.chunk_index, &peer_id, outcome.output, outcome.attestation) {
                warn!(error = %e, "record_result failed");
            }
        }
        Err(e) => {
            // Left Inflight: `check_job_deadlines` requeues it once its
            // deadline passes, same as a worker that never replied.
            warn!(job_id = %hex::encode(assignment.job_id), chunk_index = assignment.chunk_index, error = %e, "chunk execution failed, awaiting deadline requeue");
        }
    }
}

async fn deadline_sweep_loop(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = now_ms();
        let mut active = state.active_jobs.lock().await;
        let mut finished = Vec::new();
        for job_id in active.iter() {
            match state.scheduler.job_state(job_id) {
                Some(s) if s.is_terminal() => finished.push(*job_id),
                Some(JobState::Dispatched | JobState::Running) => {
                    if let Err(e) = state.scheduler.check_job_deadlines(job_id, now) {
                        warn!(job_id = %hex::encode(job_id), error = %e, "deadline sweep failed");
                    }
                }
                _ => {}
            }
        }
        for job_id in finished {
            active.remove(&job_id);
        }
    }
}

async fn heal_loop(state: Arc<AppState>) {
    info!("auto-heal monitor started");
    state.heal.run().await;
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
