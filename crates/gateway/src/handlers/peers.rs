//! `listPeers` / `connectionQuality` / `capacity` (spec §4.9).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use neuro_peerstore::{CapacityHint, ConnectionQuality};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PeerSummary {
    peer_id: String,
    health_score: f64,
    reputation: f64,
    quality: ConnectionQuality,
    capacity: Option<CapacityHint>,
}

pub async fn list_peers(State(state): State<Arc<AppState>>) -> Json<Vec<PeerSummary>> {
    let peers = state
        .peer_store
        .list_peers()
        .into_iter()
        .map(|p| PeerSummary {
            peer_id: hex::encode(&p.peer_id),
            health_score: p.health_score,
            reputation: p.reputation,
            quality: p.quality,
            capacity: p.capacity,
        })
        .collect();
    Json(peers)
}

pub async fn connection_quality(State(state): State<Arc<AppState>>, Path(peer_id_hex): Path<String>) -> Result<Json<ConnectionQuality>, ApiError> {
    let peer_id = parse_peer_id(&peer_id_hex)?;
    state.peer_store.connection_quality(&peer_id).map(Json).ok_or(ApiError::NotFound)
}

pub async fn capacity(State(state): State<Arc<AppState>>, Path(peer_id_hex): Path<String>) -> Result<Json<CapacityHint>, ApiError> {
    let peer_id = parse_peer_id(&peer_id_hex)?;
    state.peer_store.capacity(&peer_id).map(Json).ok_or(ApiError::NotFound)
}

fn parse_peer_id(peer_id_hex: &str) -> Result<Vec<u8>, ApiError> {
    hex::decode(peer_id_hex).map_err(|_| ApiError::BadRequest("peerId must be hex".into()))
}
