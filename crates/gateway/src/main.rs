use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use neuro_cache::{CacheBudget, ShardCache};
use neuro_executor::Executor;
use neuro_heal::HealMonitor;
use neuro_peerstore::{CapacityHint, ConnectionQuality, HealthWeights, PeerStore};
use neuro_scheduler::{InMemoryJobStore, JobScheduler, SchedulerConfig};
use neuro_verifier::HashOnlyVerifier;

mod error;
mod handlers;
mod state;
mod store;
mod worker;

use state::{AppState, KeySource};
use store::CacheShardStore;

#[derive(Parser, Debug)]
#[command(name = "neuro-gateway", version, about = "NeuroStore RPC Façade")]
struct Args {
    #[arg(long, default_value = "./gateway-data")]
    storage_path: String,

    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/9100")]
    listen: String,

    #[arg(long, num_args = 0..)]
    bootstrap: Vec<String>,

    #[arg(long, num_args = 0..)]
    allow_peer: Vec<String>,

    #[arg(long, default_value_t = 8080)]
    http_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();
    fs::create_dir_all(&args.storage_path)?;

    let keys = KeySource::from_env()?;
    let keypair = load_or_create_identity(&args.storage_path)?;
    let executor_keypair = keypair.clone();

    let cache = Arc::new(ShardCache::new(CacheBudget::default()));
    let peer_store = Arc::new(PeerStore::new(HealthWeights::default()));
    let local_store = Arc::new(CacheShardStore(cache.clone()));

    let listen_addr: libp2p::Multiaddr = args.listen.parse()?;
    let bootstrap_addrs = args.bootstrap.iter().map(|s| s.parse()).collect::<Result<Vec<libp2p::Multiaddr>, _>>()?;
    let allowlist = args.allow_peer.iter().map(|s| libp2p::PeerId::from_str(s)).collect::<Result<HashSet<libp2p::PeerId>, _>>()?;

    let (transport, _swarm_task) = neuro_transport::spawn(keypair, listen_addr, bootstrap_addrs, allowlist, peer_store.clone(), local_store).await?;
    let transport = Arc::new(transport);
    let local_peer_id = transport.local_peer_id.to_bytes();

    info!(peer_id = %transport.local_peer_id, "gateway identity loaded");

    // The façade registers itself as a compute candidate so `dispatch_next`
    // always has somewhere to send chunks (see worker.rs).
    peer_store.register(local_peer_id.clone(), vec![], now_ms());
    peer_store.record_rtt_sample(
        &local_peer_id,
        ConnectionQuality { latency_ms: 1.0, jitter_ms: 0.0, packet_loss_ratio: 0.0, bandwidth_mbps: 10_000.0, last_seen_epoch_ms: now_ms() },
        now_ms(),
    );
    peer_store.set_capacity(&local_peer_id, CapacityHint { cpu_cores: num_cpus(), free_mem_bytes: 1 << 32, storage_free_bytes: CacheBudget::default().max_bytes });

    let scheduler = Arc::new(JobScheduler::new(Arc::new(InMemoryJobStore::new()), peer_store.clone(), SchedulerConfig::default(), Arc::new(HashOnlyVerifier)));
    let executor = Arc::new(Executor::new(executor_keypair));
    let heal = Arc::new(HealMonitor::new(cache.clone(), peer_store.clone(), transport.clone(), neuro_heal::HealConfig::default(), keys.cipher_key, keys.mac_key.clone()));

    let state = Arc::new(AppState {
        cache,
        peer_store,
        transport,
        scheduler,
        executor,
        heal,
        keys,
        local_peer_id,
        active_jobs: Mutex::new(HashSet::new()),
    });

    worker::spawn_background_tasks(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(parse_allowed_origins())
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .expose_headers([axum::http::header::CONTENT_TYPE, axum::http::header::CONTENT_DISPOSITION]);

    let app = Router::new()
        .route("/readyz", get(health_check))
        .route("/api/files", post(handlers::files::upload).get(handlers::files::list_manifests))
        .route("/api/files/:file_hash", get(handlers::files::download))
        .route("/api/manifests/:file_hash", get(handlers::files::manifest_of))
        .route("/api/heal/now", post(handlers::heal::heal_now))
        .route("/api/jobs", post(handlers::jobs::submit_job))
        .route("/api/jobs/:job_id", get(handlers::jobs::job_status).delete(handlers::jobs::cancel_job))
        .route("/api/jobs/:job_id/result", get(handlers::jobs::job_result))
        .route("/api/peers", get(handlers::peers::list_peers))
        .route("/api/peers/:peer_id/quality", get(handlers::peers::connection_quality))
        .route("/api/peers/:peer_id/capacity", get(handlers::peers::capacity))
        .layer(cors)
        .layer(from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    info!(%addr, "NeuroStore RPC Façade listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "neurostore-gateway", "version": env!("CARGO_PKG_VERSION") }))
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("strict-origin-when-cross-origin"));
    response
}

fn parse_allowed_origins() -> AllowOrigin {
    match std::env::var("ALLOWED_ORIGINS") {
        Ok(raw) => {
            let parsed: Vec<HeaderValue> = raw.split(',').map(|v| v.trim()).filter(|v| !v.is_empty()).filter_map(|v| v.parse().ok()).collect();
            AllowOrigin::list(parsed)
        }
        Err(_) => AllowOrigin::list([HeaderValue::from_static("http://localhost:5173")]),
    }
}

fn load_or_create_identity(storage_path: &str) -> anyhow::Result<libp2p_identity::Keypair> {
    let key_path = PathBuf::from(storage_path).join("gateway_identity.key");
    if key_path.exists() {
        let bytes = fs::read(&key_path)?;
        return Ok(libp2p_identity::Keypair::from_protobuf_encoding(&bytes)?);
    }
    let keypair = libp2p_identity::Keypair::generate_ed25519();
    fs::write(&key_path, keypair.to_protobuf_encoding()?)?;
    Ok(keypair)
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
