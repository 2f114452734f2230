//! `submitJob` / `jobStatus` / `jobResult` / `cancelJob` (spec §4.9).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use neuro_protocol::{JobManifest, JobState, MergeStrategy, Redundancy, ResourceLimits, SplitStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubmitJobRequest {
    /// Hex-encoded wasm module bytes. `moduleRef` resolution over the
    /// Transport Adapter isn't implemented by this façade; submit the
    /// module inline.
    wasm_module_hex: String,
    input_hex: String,
    split_strategy: SplitStrategy,
    merge_strategy: MergeStrategy,
    resource_limits: ResourceLimits,
    #[serde(default)]
    priority: u8,
    redundancy: Redundancy,
    deadline_ms_from_now: u64,
    #[serde(default)]
    allow_nondeterminism: bool,
    #[serde(default)]
    acknowledge_nondeterminism: bool,
}

#[derive(Serialize)]
pub struct SubmitJobResponse {
    job_id: String,
}

/// `jobId` is derived from the request's own content so a retried, byte-
/// identical submission yields the same id and `submit_job` treats it as
/// idempotent (spec §4.9: "submitJob keyed by jobId").
fn derive_job_id(wasm_hash: &[u8; 32], input: &[u8], limits: &ResourceLimits, merge: MergeStrategy, split: SplitStrategy) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(wasm_hash);
    hasher.update(input);
    hasher.update(limits.cpu_instructions.to_be_bytes());
    hasher.update(limits.mem_bytes.to_be_bytes());
    hasher.update(limits.wall_ms.to_be_bytes());
    hasher.update([merge as u8]);
    if let SplitStrategy::FixedChunks(n) = split {
        hasher.update(n.to_be_bytes());
    }
    let digest = hasher.finalize();
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    id
}

pub async fn submit_job(State(state): State<Arc<AppState>>, Json(req): Json<SubmitJobRequest>) -> Result<Json<SubmitJobResponse>, ApiError> {
    let wasm_module_bytes = hex::decode(&req.wasm_module_hex).map_err(|_| ApiError::BadRequest("wasmModuleHex must be hex".into()))?;
    let input = hex::decode(&req.input_hex).map_err(|_| ApiError::BadRequest("inputHex must be hex".into()))?;
    let wasm_module_hash: [u8; 32] = Sha256::digest(&wasm_module_bytes).into();

    let job_id = derive_job_id(&wasm_module_hash, &input, &req.resource_limits, req.merge_strategy, req.split_strategy);

    if state.scheduler.job_state(&job_id).is_some() {
        return Ok(Json(SubmitJobResponse { job_id: hex::encode(job_id) }));
    }

    let manifest = JobManifest {
        job_id,
        wasm_module_hash,
        wasm_module_bytes: Some(wasm_module_bytes),
        module_ref: None,
        input,
        split_strategy: req.split_strategy,
        merge_strategy: req.merge_strategy,
        resource_limits: req.resource_limits,
        priority: req.priority,
        redundancy: req.redundancy,
        deadline_epoch_ms: now_ms() + req.deadline_ms_from_now,
        allow_nondeterminism: req.allow_nondeterminism,
        acknowledge_nondeterminism: req.acknowledge_nondeterminism,
    };

    let job_id = state.scheduler.submit(manifest).map_err(ApiError::Scheduler)?;
    state.active_jobs.lock().await.insert(job_id);
    Ok(Json(SubmitJobResponse { job_id: hex::encode(job_id) }))
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    state: JobState,
}

pub async fn job_status(State(state): State<Arc<AppState>>, Path(job_id_hex): Path<String>) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = parse_job_id(&job_id_hex)?;
    let job_state = state.scheduler.job_state(&job_id).ok_or(ApiError::NotFound)?;
    Ok(Json(JobStatusResponse { state: job_state }))
}

pub async fn job_result(State(state): State<Arc<AppState>>, Path(job_id_hex): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id_hex)?;
    match state.scheduler.job_state(&job_id) {
        None => Err(ApiError::NotFound),
        Some(JobState::Completed) => match state.scheduler.job_result(&job_id) {
            Some(bytes) => Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()),
            None => Ok(StatusCode::ACCEPTED.into_response()),
        },
        Some(_) => Ok(StatusCode::CONFLICT.into_response()),
    }
}

#[derive(Serialize)]
pub struct CancelJobResponse {
    state: JobState,
}

pub async fn cancel_job(State(state): State<Arc<AppState>>, Path(job_id_hex): Path<String>) -> Result<Json<CancelJobResponse>, ApiError> {
    let job_id = parse_job_id(&job_id_hex)?;
    let job_state = state.scheduler.cancel(&job_id).map_err(ApiError::Scheduler)?;
    Ok(Json(CancelJobResponse { state: job_state }))
}

fn parse_job_id(hex_str: &str) -> Result<[u8; 16], ApiError> {
    let bytes = hex::decode(hex_str).map_err(|_| ApiError::BadRequest("jobId must be hex".into()))?;
    bytes.try_into().map_err(|_| ApiError::BadRequest("jobId must be 16 bytes".into()))
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
