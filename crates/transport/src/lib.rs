//! The Transport Adapter (spec §2): an opaque, authenticated message bus
//! over libp2p. Exposes `send`, `fetchShard`, `storeShard`, `subscribe` to
//! the rest of the fabric without leaking swarm/codec details past this
//! crate's boundary. One task owns the `Swarm`; everything else talks to
//! it through `TransportHandle`.

pub mod behaviour;
pub mod codec;
pub mod node;
pub mod store;

pub use node::{spawn, TransportHandle};
pub use store::LocalShardStore;
