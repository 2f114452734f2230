//! End-to-end smoke coverage over the façade's own library stack: a file
//! survives encode/place/fetch/reconstruct through a simulated peer fabric,
//! and a compute job survives submit/dispatch/verify/merge, without
//! standing up the HTTP server or a real libp2p swarm.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use libp2p_identity::Keypair;
use neuro_ces::{encryption, CesConfig};
use neuro_peerstore::{ConnectionQuality, HealthWeights, PeerId, PeerStore};
use neuro_placement::Candidate;
use neuro_protocol::{Attestation, JobManifest, JobState, MergeStrategy, Redundancy, ResourceLimits, ShardLocation, SplitStrategy};
use neuro_scheduler::{HashOnlyVerifier, InMemoryJobStore, JobScheduler, SchedulerConfig};

const CIPHER_KEY: [u8; encryption::KEY_SIZE] = [7u8; encryption::KEY_SIZE];
const MAC_KEY: &[u8] = b"integration-smoke-mac-key-0000000";

/// Toy stand-in for the Transport Adapter: shards keyed by the peer that
/// "holds" them, same addressing the real `LocalShardStore` uses.
#[derive(Default)]
struct FakeFabric {
    shards: Mutex<HashMap<(PeerId, [u8; 32], u32), Vec<u8>>>,
}

impl FakeFabric {
    fn store(&self, peer: &PeerId, file_hash: [u8; 32], shard_index: u32, data: Vec<u8>) {
        self.shards.lock().unwrap().insert((peer.clone(), file_hash, shard_index), data);
    }

    fn fetch(&self, peer: &PeerId, file_hash: [u8; 32], shard_index: u32) -> Option<Vec<u8>> {
        self.shards.lock().unwrap().get(&(peer.clone(), file_hash, shard_index)).cloned()
    }
}

fn register_peer(peer_store: &PeerStore, id: u8, free_bytes: u64) -> PeerId {
    let peer_id = vec![id];
    peer_store.register(peer_id.clone(), vec![], 0);
    peer_store.record_rtt_sample(
        &peer_id,
        ConnectionQuality { latency_ms: 20.0, jitter_ms: 2.0, packet_loss_ratio: 0.0, bandwidth_mbps: 500.0, last_seen_epoch_ms: 0 },
        0,
    );
    peer_store.set_capacity(&peer_id, neuro_peerstore::CapacityHint { cpu_cores: 4, free_mem_bytes: 1 << 30, storage_free_bytes: free_bytes });
    peer_id
}

#[test]
fn upload_then_download_round_trips_through_a_simulated_fabric() {
    let peer_store = PeerStore::new(HealthWeights::default());
    for i in 0..6u8 {
        register_peer(&peer_store, i, 1 << 20);
    }
    let fabric = FakeFabric::default();

    let original = b"the quick brown fox jumps over the lazy dog".repeat(200);
    let cfg = CesConfig::default();
    let (mut manifest, shards) = neuro_ces::process(&original, "fox.txt", &cfg.pipeline_config(), &CIPHER_KEY, MAC_KEY, 1, 0).unwrap();

    let candidates: Vec<Candidate> = peer_store
        .list_peers()
        .into_iter()
        .map(|p| Candidate { peer_id: p.peer_id, health: p.health_score, latency_ms: p.quality.latency_ms, storage_free_bytes: p.capacity.unwrap().storage_free_bytes, region: None })
        .collect();
    let assignments = neuro_placement::plan_upload(&candidates, cfg.shards_data, cfg.shards_parity, &neuro_placement::ScoringWeights::default()).unwrap();

    let mut locations = Vec::new();
    for assignment in &assignments {
        let shard = &shards[assignment.shard_index as usize];
        fabric.store(&assignment.peer_id, manifest.file_hash, shard.shard_index, shard.payload.clone());
        locations.push(ShardLocation { shard_index: assignment.shard_index, peer_id: assignment.peer_id.clone(), replication_class: assignment.replication_class });
    }
    manifest.shard_locations = locations;
    neuro_ces::sign_manifest(&mut manifest, MAC_KEY);

    let plan = neuro_placement::build_fetch_plan(&manifest, &peer_store, manifest.sharding.total_shards() as usize);
    let mut shard_payloads: Vec<Option<Vec<u8>>> = vec![None; manifest.sharding.total_shards() as usize];
    for target in &plan.targets {
        for peer_id in &target.alternates {
            if let Some(payload) = fabric.fetch(peer_id, manifest.file_hash, target.shard_index as u32) {
                shard_payloads[target.shard_index as usize] = Some(payload);
                break;
            }
        }
    }

    let recovered = neuro_ces::reconstruct(shard_payloads, &manifest, &CIPHER_KEY, MAC_KEY).unwrap();
    assert_eq!(recovered, original);
}

#[test]
fn download_survives_losing_up_to_m_shards() {
    let peer_store = PeerStore::new(HealthWeights::default());
    for i in 0..6u8 {
        register_peer(&peer_store, i, 1 << 20);
    }
    let fabric = FakeFabric::default();

    let original = vec![42u8; 50_000];
    let mut cfg = CesConfig::default();
    cfg.shards_data = 4;
    cfg.shards_parity = 2;
    let (mut manifest, shards) = neuro_ces::process(&original, "blob.bin", &cfg.pipeline_config(), &CIPHER_KEY, MAC_KEY, 1, 0).unwrap();

    let candidates: Vec<Candidate> = peer_store
        .list_peers()
        .into_iter()
        .map(|p| Candidate { peer_id: p.peer_id, health: p.health_score, latency_ms: p.quality.latency_ms, storage_free_bytes: p.capacity.unwrap().storage_free_bytes, region: None })
        .collect();
    let assignments = neuro_placement::plan_upload(&candidates, cfg.shards_data, cfg.shards_parity, &neuro_placement::ScoringWeights::default()).unwrap();

    let mut locations = Vec::new();
    for assignment in &assignments {
        let shard = &shards[assignment.shard_index as usize];
        // Drop the first two placements entirely, simulating two dead peers.
        if assignment.shard_index >= 2 {
            fabric.store(&assignment.peer_id, manifest.file_hash, shard.shard_index, shard.payload.clone());
        }
        locations.push(ShardLocation { shard_index: assignment.shard_index, peer_id: assignment.peer_id.clone(), replication_class: assignment.replication_class });
    }
    manifest.shard_locations = locations;
    neuro_ces::sign_manifest(&mut manifest, MAC_KEY);

    let plan = neuro_placement::build_fetch_plan(&manifest, &peer_store, manifest.sharding.total_shards() as usize);
    let mut shard_payloads: Vec<Option<Vec<u8>>> = vec![None; manifest.sharding.total_shards() as usize];
    for target in &plan.targets {
        for peer_id in &target.alternates {
            if let Some(payload) = fabric.fetch(peer_id, manifest.file_hash, target.shard_index as u32) {
                shard_payloads[target.shard_index as usize] = Some(payload);
                break;
            }
        }
    }

    let recovered = neuro_ces::reconstruct(shard_payloads, &manifest, &CIPHER_KEY, MAC_KEY).unwrap();
    assert_eq!(recovered, original);
}

fn sample_manifest(job_id: [u8; 16], n: u32) -> JobManifest {
    JobManifest {
        job_id,
        wasm_module_hash: [3u8; 32],
        wasm_module_bytes: Some(b"\0asm\x01\x00\x00\x00".to_vec()),
        module_ref: None,
        input: vec![5u8; 64],
        split_strategy: SplitStrategy::FixedChunks(n),
        merge_strategy: MergeStrategy::Concat,
        resource_limits: ResourceLimits { cpu_instructions: 1_000_000, mem_bytes: 1 << 20, wall_ms: 1_000, io_read_bytes: 1 << 20, io_write_bytes: 1 << 20 },
        priority: 5,
        redundancy: Redundancy::None,
        deadline_epoch_ms: 60_000,
        allow_nondeterminism: false,
        acknowledge_nondeterminism: false,
    }
}

/// Builds an `Attestation` the way a legitimate worker's `neuro-executor`
/// would, without actually running wasmtime, so `HashOnlyVerifier` accepts it.
fn attest(keypair: &Keypair, job_id: [u8; 16], chunk_index: u32, output: &[u8]) -> Attestation {
    use sha2::{Digest, Sha256};
    let output_hash: [u8; 32] = Sha256::digest(output).into();
    let payload = Attestation::payload(&job_id, chunk_index, &output_hash);
    let signature = keypair.sign(&payload).unwrap();
    Attestation { job_id, chunk_index, output_hash, signature, public_key: keypair.public().encode_protobuf() }
}

#[test]
fn job_completes_once_every_chunk_is_verified_and_merged() {
    let peer_store = Arc::new(PeerStore::new(HealthWeights::default()));
    for i in 0..4u8 {
        register_peer(&peer_store, i, 1 << 20);
    }
    let scheduler = JobScheduler::new(Arc::new(InMemoryJobStore::new()), peer_store, SchedulerConfig::default(), Arc::new(HashOnlyVerifier));

    let job_id = [11u8; 16];
    scheduler.submit(sample_manifest(job_id, 2)).unwrap();
    assert_eq!(scheduler.job_state(&job_id), Some(JobState::Dispatched));

    let keypair = Keypair::generate_ed25519();
    for _ in 0..2 {
        let (assignment, peer_id) = scheduler.dispatch_next().expect("a chunk should be dispatchable");
        let output = format!("chunk-{}-output", assignment.chunk_index).into_bytes();
        let attestation = attest(&keypair, job_id, assignment.chunk_index, &output);
        scheduler.record_result(&job_id, assignment.chunk_index, &peer_id, output, attestation).unwrap();
    }

    assert_eq!(scheduler.job_state(&job_id), Some(JobState::Completed));
    let merged = scheduler.job_result(&job_id).expect("concat merge should produce bytes");
    assert_eq!(merged, b"chunk-0-outputchunk-1-output".to_vec());
}

#[test]
fn a_forged_attestation_is_rejected_and_the_chunk_stays_retriable() {
    let peer_store = Arc::new(PeerStore::new(HealthWeights::default()));
    for i in 0..4u8 {
        register_peer(&peer_store, i, 1 << 20);
    }
    let scheduler = JobScheduler::new(Arc::new(InMemoryJobStore::new()), peer_store, SchedulerConfig::default(), Arc::new(HashOnlyVerifier));

    let job_id = [22u8; 16];
    scheduler.submit(sample_manifest(job_id, 1)).unwrap();
    let (assignment, peer_id) = scheduler.dispatch_next().unwrap();

    let honest_keypair = Keypair::generate_ed25519();
    let attacker_keypair = Keypair::generate_ed25519();
    let mut forged = attest(&honest_keypair, job_id, assignment.chunk_index, b"real-output");
    forged.public_key = attacker_keypair.public().encode_protobuf();

    let state = scheduler.record_result(&job_id, assignment.chunk_index, &peer_id, b"real-output".to_vec(), forged).unwrap();
    assert_eq!(state, JobState::Running);
}
