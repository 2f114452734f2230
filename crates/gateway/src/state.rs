//! Shared façade state: one instance per process, wired together once at
//! startup and handed to every handler through axum's `State` extractor.

use std::collections::HashSet;
use std::sync::Arc;

use neuro_cache::ShardCache;
use neuro_ces::encryption;
use neuro_executor::Executor;
use neuro_heal::HealMonitor;
use neuro_peerstore::PeerStore;
use neuro_scheduler::{InMemoryJobStore, JobScheduler};
use neuro_transport::TransportHandle;
use tokio::sync::Mutex;

/// The façade never persists plaintext or keys itself (spec §4.1: "the core
/// never persists keys"); it is the sole component trusted with the
/// symmetric keys that `neuro-ces` needs to run the codec.
pub struct KeySource {
    pub cipher_key: [u8; encryption::KEY_SIZE],
    pub mac_key: Vec<u8>,
}

impl KeySource {
    pub fn from_env() -> anyhow::Result<Self> {
        let cipher_hex = std::env::var("NEURO_CIPHER_KEY")
            .map_err(|_| anyhow::anyhow!("NEURO_CIPHER_KEY environment variable is required"))?;
        let cipher_bytes = hex::decode(cipher_hex.trim())?;
        let cipher_key: [u8; encryption::KEY_SIZE] = cipher_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("NEURO_CIPHER_KEY must decode to {} bytes of hex", encryption::KEY_SIZE))?;

        let mac_key = std::env::var("NEURO_MAC_KEY")
            .map_err(|_| anyhow::anyhow!("NEURO_MAC_KEY environment variable is required"))?
            .into_bytes();
        if mac_key.len() < 16 {
            anyhow::bail!("NEURO_MAC_KEY must be at least 16 bytes");
        }

        Ok(Self { cipher_key, mac_key })
    }
}

pub struct AppState {
    pub cache: Arc<ShardCache>,
    pub peer_store: Arc<PeerStore>,
    pub transport: Arc<TransportHandle>,
    pub scheduler: Arc<JobScheduler<InMemoryJobStore>>,
    pub executor: Arc<Executor>,
    pub heal: Arc<HealMonitor<TransportHandle>>,
    pub keys: KeySource,
    pub local_peer_id: Vec<u8>,
    /// Job ids submitted through this process, tracked so the deadline
    /// sweep (spec §4.5) has something to iterate — the scheduler
    /// deliberately doesn't keep its own index (see `JobScheduler::
    /// check_job_deadlines`'s doc comment).
    pub active_jobs: Mutex<HashSet<[u8; 16]>>,
}
