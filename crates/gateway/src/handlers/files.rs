//! `upload` / `download` / `listManifests` / `manifestOf` (spec §4.9).

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use neuro_ces::CesConfig;
use neuro_peerstore::PeerId;
use neuro_placement::{Candidate, ScoringWeights};
use neuro_protocol::{FileManifest, ShardLocation};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

fn candidates(state: &AppState) -> Vec<Candidate> {
    state
        .peer_store
        .list_peers()
        .into_iter()
        .map(|p| Candidate {
            peer_id: p.peer_id,
            health: p.health_score,
            latency_ms: p.quality.latency_ms,
            storage_free_bytes: p.capacity.map(|c| c.storage_free_bytes).unwrap_or(u64::MAX),
            region: None,
        })
        .collect()
}

async fn place_shard(state: &Arc<AppState>, peer_id: &PeerId, file_hash: [u8; 32], shard_index: u32, payload: Vec<u8>) -> bool {
    if *peer_id == state.local_peer_id {
        return state.cache.put_shard((file_hash, shard_index), payload).is_ok();
    }
    match libp2p::PeerId::from_bytes(peer_id) {
        Ok(peer) => state.transport.store_shard(peer, file_hash, shard_index, payload).await,
        Err(_) => false,
    }
}

async fn fetch_shard(state: &Arc<AppState>, peer_id: &PeerId, file_hash: [u8; 32], shard_index: u32) -> Option<Vec<u8>> {
    if *peer_id == state.local_peer_id {
        return state.cache.get_shard(&(file_hash, shard_index)).map(|v| v.as_ref().clone());
    }
    let peer = libp2p::PeerId::from_bytes(peer_id).ok()?;
    state.transport.fetch_shard(peer, file_hash, shard_index).await
}

pub async fn upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let mut file_name = String::from("upload.bin");
    let mut data: Option<Vec<u8>> = None;
    let mut cfg = CesConfig::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "file" => {
                file_name = field.file_name().unwrap_or("upload.bin").to_string();
                data = Some(field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?.to_vec());
            }
            "config" => {
                let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                cfg = serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid config: {e}")))?;
            }
            _ => {}
        }
    }
    let data = data.ok_or_else(|| ApiError::BadRequest("missing \"file\" field".into()))?;
    cfg.validate().map_err(ApiError::Ces)?;

    let file_hash: [u8; 32] = Sha256::digest(&data).into();
    // Idempotency (spec §4.9): re-uploading bytes already sharded under this
    // config returns the existing manifest rather than re-placing shards.
    if let Some(existing) = state.cache.get_manifest(&file_hash) {
        return Ok(Json(summarize(&existing)));
    }

    let now = now_ms();
    let (mut manifest, shards) = neuro_ces::process(&data, &file_name, &cfg.pipeline_config(), &state.keys.cipher_key, &state.keys.mac_key, now, cfg.ttl_seconds)
        .map_err(ApiError::Ces)?;

    let candidates = candidates(&state);
    let assignments = neuro_placement::plan_upload(&candidates, cfg.shards_data, cfg.shards_parity, &ScoringWeights::default()).map_err(ApiError::Placement)?;

    let mut locations = Vec::with_capacity(assignments.len());
    for assignment in &assignments {
        let shard = &shards[assignment.shard_index as usize];
        let stored = place_shard(&state, &assignment.peer_id, file_hash, shard.shard_index, shard.payload.clone()).await;
        if !stored {
            state.peer_store.record_fetch_failure(&assignment.peer_id);
            continue;
        }
        locations.push(ShardLocation { shard_index: assignment.shard_index, peer_id: assignment.peer_id.clone(), replication_class: assignment.replication_class });
    }
    manifest.shard_locations = locations;
    neuro_ces::sign_manifest(&mut manifest, &state.keys.mac_key);

    state.cache.put_manifest(manifest.clone());
    Ok(Json(summarize(&manifest)))
}

pub async fn download(State(state): State<Arc<AppState>>, Path(file_hash_hex): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let manifest = manifest_by_hex(&state, &file_hash_hex)?;

    let plan = neuro_placement::build_fetch_plan(&manifest, &state.peer_store, manifest.sharding.total_shards() as usize);
    let mut shard_payloads: Vec<Option<Vec<u8>>> = vec![None; manifest.sharding.total_shards() as usize];
    for target in &plan.targets {
        for peer_id in &target.alternates {
            if let Some(payload) = fetch_shard(&state, peer_id, manifest.file_hash, target.shard_index as u32).await {
                shard_payloads[target.shard_index as usize] = Some(payload);
                break;
            }
            state.peer_store.record_fetch_failure(peer_id);
        }
    }

    let data = neuro_ces::reconstruct(shard_payloads, &manifest, &state.keys.cipher_key, &state.keys.mac_key).map_err(ApiError::Ces)?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream".to_string()), (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", manifest.file_name))],
        data,
    ))
}

pub async fn list_manifests(State(state): State<Arc<AppState>>) -> Json<Vec<ManifestSummary>> {
    Json(state.cache.all_manifests().iter().map(|m| summarize(m)).collect())
}

pub async fn manifest_of(State(state): State<Arc<AppState>>, Path(file_hash_hex): Path<String>) -> Result<Json<FileManifest>, ApiError> {
    Ok(Json(manifest_by_hex(&state, &file_hash_hex)?))
}

fn manifest_by_hex(state: &AppState, file_hash_hex: &str) -> Result<FileManifest, ApiError> {
    let bytes = hex::decode(file_hash_hex).map_err(|_| ApiError::BadRequest("fileHash must be hex".into()))?;
    let file_hash: [u8; 32] = bytes.try_into().map_err(|_| ApiError::BadRequest("fileHash must be 32 bytes".into()))?;
    state.cache.get_manifest(&file_hash).map(|m| (*m).clone()).ok_or(ApiError::NotFound)
}

#[derive(Serialize)]
pub struct ManifestSummary {
    file_hash: String,
    file_name: String,
    file_size: u64,
    manifest_version: u16,
    shards: u16,
    k: u8,
    m: u8,
}

fn summarize(m: &FileManifest) -> ManifestSummary {
    ManifestSummary {
        file_hash: hex::encode(m.file_hash),
        file_name: m.file_name.clone(),
        file_size: m.file_size,
        manifest_version: m.manifest_version,
        shards: m.sharding.total_shards(),
        k: m.sharding.k,
        m: m.sharding.m,
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
