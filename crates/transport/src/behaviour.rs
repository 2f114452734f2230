//! The swarm's behaviour set (spec: Transport Adapter exposes `send`,
//! `fetchShard`, `storeShard`, `subscribe`). Kademlia for peer discovery,
//! gossipsub for `subscribe(topic)`, identify/ping for liveness and RTT
//! sampling into the Peer Store, request-response for the shard protocol.

use libp2p::{
    gossipsub, identify, kad, ping,
    request_response::{self, Behaviour as RequestResponse},
    swarm::NetworkBehaviour,
    StreamProtocol,
};

use crate::codec::ChunkCodec;
use neuro_protocol::{ChunkCommand, ChunkReply};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "NeuroTransportEvent")]
pub struct NeuroTransportBehaviour {
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub chunk: RequestResponse<ChunkCodec>,
}

#[allow(dead_code)]
#[derive(Debug)]
pub enum NeuroTransportEvent {
    Kademlia(kad::Event),
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    Ping(ping::Event),
    Chunk(request_response::Event<ChunkCommand, ChunkReply>),
}

impl From<kad::Event> for NeuroTransportEvent {
    fn from(v: kad::Event) -> Self {
        Self::Kademlia(v)
    }
}
impl From<gossipsub::Event> for NeuroTransportEvent {
    fn from(v: gossipsub::Event) -> Self {
        Self::Gossipsub(v)
    }
}
impl From<identify::Event> for NeuroTransportEvent {
    fn from(v: identify::Event) -> Self {
        Self::Identify(v)
    }
}
impl From<ping::Event> for NeuroTransportEvent {
    fn from(v: ping::Event) -> Self {
        Self::Ping(v)
    }
}
impl From<request_response::Event<ChunkCommand, ChunkReply>> for NeuroTransportEvent {
    fn from(v: request_response::Event<ChunkCommand, ChunkReply>) -> Self {
        Self::Chunk(v)
    }
}

pub fn chunk_protocol() -> (StreamProtocol, request_response::ProtocolSupport) {
    (StreamProtocol::new("/neurostore/chunk/1.0.0"), request_response::ProtocolSupport::Full)
}
