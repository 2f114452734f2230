//! Drives the libp2p swarm and exposes the Transport Adapter surface the
//! rest of the fabric depends on: `send`, `fetchShard`, `storeShard`,
//! `subscribe` (spec §2). One task owns the `Swarm`; callers talk to it
//! through a command channel, mirroring the teacher's gateway `P2pNode`
//! pattern generalized from an S3-upload relay to the shard protocol.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use libp2p::{
    gossipsub::{self, IdentTopic},
    identify, kad, noise, ping,
    request_response::{self, OutboundRequestId, ProtocolSupport},
    swarm::SwarmEvent,
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use libp2p_identity::Keypair;
use neuro_peerstore::{ConnectionQuality, PeerStore};
use neuro_protocol::{
    AuditChunkRequest, AuditChunkResponse, ChunkCommand, ChunkReply, DeleteChunkRequest,
    DeleteChunkResponse, RetrieveChunkRequest, RetrieveChunkResponse, StoreChunkRequest,
    StoreChunkResponse,
};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::behaviour::{chunk_protocol, NeuroTransportBehaviour, NeuroTransportEvent};
use crate::codec::ChunkCodec;
use crate::store::LocalShardStore;

enum Command {
    Request { peer: PeerId, command: ChunkCommand, reply: oneshot::Sender<Option<ChunkReply>> },
    Subscribe { topic: String, reply: oneshot::Sender<broadcast::Receiver<Vec<u8>>> },
    Publish { topic: String, bytes: Vec<u8> },
}

#[derive(Clone)]
pub struct TransportHandle {
    cmd_tx: mpsc::Sender<Command>,
    pub local_peer_id: PeerId,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

pub async fn spawn(
    keypair: Keypair,
    listen_addr: Multiaddr,
    bootstrap_addrs: Vec<Multiaddr>,
    allowlist: HashSet<PeerId>,
    peer_store: Arc<PeerStore>,
    local_store: Arc<dyn LocalShardStore>,
) -> Result<(TransportHandle, tokio::task::JoinHandle<()>)> {
    let peer_id = PeerId::from(keypair.public());

    let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
        .upgrade(libp2p::core::upgrade::Version::V1Lazy)
        .authenticate(noise::Config::new(&keypair).map_err(|e| anyhow!("noise init: {e}"))?)
        .multiplex(yamux::Config::default())
        .boxed();

    let gossipsub_cfg = gossipsub::ConfigBuilder::default()
        .validation_mode(gossipsub::ValidationMode::Strict)
        .build()
        .map_err(|e| anyhow!("gossipsub config: {e}"))?;
    let gossipsub = gossipsub::Behaviour::new(gossipsub::MessageAuthenticity::Signed(keypair.clone()), gossipsub_cfg)
        .map_err(|e| anyhow!("gossipsub init: {e}"))?;

    let identify = identify::Behaviour::new(identify::Config::new("/neurostore/1.0.0".into(), keypair.public()));
    let ping = ping::Behaviour::new(ping::Config::new().with_interval(Duration::from_secs(20)));
    let kademlia = kad::Behaviour::new(peer_id, kad::store::MemoryStore::new(peer_id));
    let (protocol, support) = chunk_protocol();
    let chunk = request_response::Behaviour::<ChunkCodec>::new(std::iter::once((protocol, support)), request_response::Config::default());

    let behaviour = NeuroTransportBehaviour { kademlia, gossipsub, identify, ping, chunk };
    let mut swarm = Swarm::new(
        transport,
        behaviour,
        peer_id,
        libp2p::swarm::Config::with_tokio_executor().with_idle_connection_timeout(Duration::from_secs(60)),
    );

    swarm.listen_on(listen_addr)?;
    for addr in &bootstrap_addrs {
        let _ = swarm.dial(addr.clone());
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let handle = TransportHandle { cmd_tx, local_peer_id: peer_id };

    let join = tokio::spawn(drive(swarm, cmd_rx, allowlist, peer_store, local_store, keypair));
    Ok((handle, join))
}

async fn drive(
    mut swarm: Swarm<NeuroTransportBehaviour>,
    mut cmd_rx: mpsc::Receiver<Command>,
    allowlist: HashSet<PeerId>,
    peer_store: Arc<PeerStore>,
    local_store: Arc<dyn LocalShardStore>,
    keypair: Keypair,
) {
    let mut pending: HashMap<OutboundRequestId, oneshot::Sender<Option<ChunkReply>>> = HashMap::new();
    let mut topics: HashMap<String, broadcast::Sender<Vec<u8>>> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => match cmd {
                Command::Request { peer, command, reply } => {
                    let request_id = swarm.behaviour_mut().chunk.send_request(&peer, command);
                    pending.insert(request_id, reply);
                }
                Command::Subscribe { topic, reply } => {
                    let sender = topics.entry(topic.clone()).or_insert_with(|| broadcast::channel(256).0).clone();
                    if let Err(e) = swarm.behaviour_mut().gossipsub.subscribe(&IdentTopic::new(&topic)) {
                        warn!(topic, error = %e, "gossipsub subscribe failed");
                    }
                    let _ = reply.send(sender.subscribe());
                }
                Command::Publish { topic, bytes } => {
                    if let Err(e) = swarm.behaviour_mut().gossipsub.publish(IdentTopic::new(&topic), bytes) {
                        warn!(topic, error = %e, "gossipsub publish failed");
                    }
                }
            },
            event = swarm.select_next_some() => {
                match event {
                    SwarmEvent::Behaviour(NeuroTransportEvent::Chunk(ev)) => {
                        handle_chunk_event(ev, &mut swarm, &mut pending, &allowlist, &local_store, &keypair);
                    }
                    SwarmEvent::Behaviour(NeuroTransportEvent::Ping(ping::Event { peer, result, .. })) => {
                        if let Ok(rtt) = result {
                            peer_store.register(peer.to_bytes(), vec![], now_ms());
                            peer_store.record_rtt_sample(
                                &peer.to_bytes(),
                                ConnectionQuality {
                                    latency_ms: rtt.as_secs_f64() * 1000.0,
                                    jitter_ms: 0.0,
                                    packet_loss_ratio: 0.0,
                                    bandwidth_mbps: 0.0,
                                    last_seen_epoch_ms: now_ms(),
                                },
                                now_ms(),
                            );
                        } else {
                            peer_store.record_fetch_failure(&peer.to_bytes());
                        }
                    }
                    SwarmEvent::Behaviour(NeuroTransportEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
                        if let Some(sender) = topics.get(&message.topic.to_string()) {
                            let _ = sender.send(message.data);
                        }
                    }
                    SwarmEvent::NewListenAddr { address, .. } => info!(address = %address, "transport listening"),
                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        peer_store.register(peer_id.to_bytes(), vec![], now_ms());
                    }
                    SwarmEvent::OutgoingConnectionError { peer_id: Some(peer_id), error, .. } => {
                        warn!(peer = %peer_id, error = %error, "dial failed");
                        peer_store.record_fetch_failure(&peer_id.to_bytes());
                    }
                    _ => {}
                }
            }
        }
    }
}

fn handle_chunk_event(
    ev: request_response::Event<ChunkCommand, ChunkReply>,
    swarm: &mut Swarm<NeuroTransportBehaviour>,
    pending: &mut HashMap<OutboundRequestId, oneshot::Sender<Option<ChunkReply>>>,
    allowlist: &HashSet<PeerId>,
    local_store: &Arc<dyn LocalShardStore>,
    keypair: &Keypair,
) {
    match ev {
        request_response::Event::Message { peer, message, .. } => match message {
            request_response::Message::Request { request, channel, .. } => {
                let response = if allowlist.is_empty() || allowlist.contains(&peer) {
                    serve(local_store, keypair, request)
                } else {
                    deny(request)
                };
                let _ = swarm.behaviour_mut().chunk.send_response(channel, response);
            }
            request_response::Message::Response { request_id, response } => {
                if let Some(reply) = pending.remove(&request_id) {
                    let _ = reply.send(Some(response));
                }
            }
        },
        request_response::Event::OutboundFailure { request_id, error, .. } => {
            debug!(error = %error, "chunk outbound failure");
            if let Some(reply) = pending.remove(&request_id) {
                let _ = reply.send(None);
            }
        }
        request_response::Event::InboundFailure { error, .. } => {
            debug!(error = %error, "chunk inbound failure");
        }
        request_response::Event::ResponseSent { .. } => {}
    }
}

fn serve(local_store: &Arc<dyn LocalShardStore>, keypair: &Keypair, cmd: ChunkCommand) -> ChunkReply {
    let timestamp_ms = now_ms();
    let public_key = keypair.public().encode_protobuf();
    match cmd {
        ChunkCommand::Store(StoreChunkRequest { file_hash, shard_index, data }) => {
            let stored = local_store.save(file_hash, shard_index, &data);
            let payload = StoreChunkResponse::receipt_payload(&file_hash, shard_index, data.len(), timestamp_ms);
            let signature = keypair.sign(&payload).unwrap_or_default();
            ChunkReply::Store(StoreChunkResponse { stored, timestamp_ms, signature, public_key })
        }
        ChunkCommand::Retrieve(RetrieveChunkRequest { file_hash, shard_index }) => {
            let data = local_store.load(file_hash, shard_index).unwrap_or_default();
            let found = !data.is_empty();
            let payload = RetrieveChunkResponse::proof_payload(&file_hash, shard_index, data.len(), timestamp_ms);
            let signature = keypair.sign(&payload).unwrap_or_default();
            ChunkReply::Retrieve(RetrieveChunkResponse { found, data, timestamp_ms, signature, public_key })
        }
        ChunkCommand::Audit(AuditChunkRequest { file_hash, shard_index, challenge_hex, nonce_hex }) => {
            let found = local_store.has(file_hash, shard_index);
            let response_hash = if found {
                local_store.load(file_hash, shard_index).map(|d| audit_hash(&challenge_hex, &d)).unwrap_or_default()
            } else {
                String::new()
            };
            let accepted = found;
            let payload = AuditChunkResponse::audit_payload(&file_hash, shard_index, &challenge_hex, &nonce_hex, &response_hash, timestamp_ms);
            let signature = keypair.sign(&payload).unwrap_or_default();
            ChunkReply::Audit(AuditChunkResponse { found, accepted, response_hash, timestamp_ms, signature, public_key })
        }
        ChunkCommand::Delete(DeleteChunkRequest { file_hash, shard_index }) => {
            let deleted = local_store.delete(file_hash, shard_index);
            let payload = format!("delete:{}:{}:{}", hex::encode(file_hash), shard_index, timestamp_ms);
            let signature = keypair.sign(payload.as_bytes()).unwrap_or_default();
            ChunkReply::Delete(DeleteChunkResponse { deleted, timestamp_ms, signature, public_key })
        }
    }
}

fn audit_hash(challenge_hex: &str, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hex::decode(challenge_hex).unwrap_or_default());
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn deny(cmd: ChunkCommand) -> ChunkReply {
    let timestamp_ms = now_ms();
    match cmd {
        ChunkCommand::Store(_) => ChunkReply::Store(StoreChunkResponse { stored: false, timestamp_ms, signature: vec![], public_key: vec![] }),
        ChunkCommand::Retrieve(_) => ChunkReply::Retrieve(RetrieveChunkResponse { found: false, data: vec![], timestamp_ms, signature: vec![], public_key: vec![] }),
        ChunkCommand::Audit(_) => ChunkReply::Audit(AuditChunkResponse { found: false, accepted: false, response_hash: String::new(), timestamp_ms, signature: vec![], public_key: vec![] }),
        ChunkCommand::Delete(_) => ChunkReply::Delete(DeleteChunkResponse { deleted: false, timestamp_ms, signature: vec![], public_key: vec![] }),
    }
}

#[async_trait::async_trait]
impl neuro_heal::ShardTransport for TransportHandle {
    async fn probe_shard(&self, peer_id: &Vec<u8>, file_hash: [u8; 32], shard_index: u32) -> bool {
        match PeerId::from_bytes(peer_id) {
            Ok(peer) => self.probe_shard(peer, file_hash, shard_index).await,
            Err(_) => false,
        }
    }

    async fn fetch_shard(&self, peer_id: &Vec<u8>, file_hash: [u8; 32], shard_index: u32) -> Option<Vec<u8>> {
        let peer = PeerId::from_bytes(peer_id).ok()?;
        self.fetch_shard(peer, file_hash, shard_index).await
    }
}

impl TransportHandle {
    pub async fn send(&self, peer: PeerId, command: ChunkCommand) -> Option<ChunkReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx.send(Command::Request { peer, command, reply: reply_tx }).await.ok()?;
        reply_rx.await.ok().flatten()
    }

    pub async fn fetch_shard(&self, peer: PeerId, file_hash: [u8; 32], shard_index: u32) -> Option<Vec<u8>> {
        match self.send(peer, ChunkCommand::Retrieve(RetrieveChunkRequest { file_hash, shard_index })).await? {
            ChunkReply::Retrieve(resp) if resp.found && resp.verify_proof(&file_hash, shard_index) => Some(resp.data),
            _ => None,
        }
    }

    pub async fn store_shard(&self, peer: PeerId, file_hash: [u8; 32], shard_index: u32, data: Vec<u8>) -> bool {
        matches!(
            self.send(peer, ChunkCommand::Store(StoreChunkRequest { file_hash, shard_index, data })).await,
            Some(ChunkReply::Store(resp)) if resp.stored
        )
    }

    pub async fn probe_shard(&self, peer: PeerId, file_hash: [u8; 32], shard_index: u32) -> bool {
        matches!(
            self.send(peer, ChunkCommand::Retrieve(RetrieveChunkRequest { file_hash, shard_index })).await,
            Some(ChunkReply::Retrieve(resp)) if resp.found
        )
    }

    pub async fn subscribe(&self, topic: impl Into<String>) -> Result<broadcast::Receiver<Vec<u8>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx.send(Command::Subscribe { topic: topic.into(), reply: reply_tx }).await.map_err(|_| anyhow!("transport task gone"))?;
        reply_rx.await.map_err(|_| anyhow!("subscribe dropped"))
    }

    pub async fn publish(&self, topic: impl Into<String>, bytes: Vec<u8>) -> Result<()> {
        self.cmd_tx.send(Command::Publish { topic: topic.into(), bytes }).await.map_err(|_| anyhow!("transport task gone"))
    }
}
