//! Wire types shared between every NeuroStore fabric crate: the shard
//! transfer protocol carried over the Transport Adapter, the `FileManifest`
//! data model, the compute job/chunk data model, and the cross-crate error
//! taxonomy.

pub mod chunk;
pub mod error;
pub mod job;
pub mod manifest;

pub use chunk::{
    AuditChunkRequest, AuditChunkResponse, ChunkCommand, ChunkReply, DeleteChunkRequest,
    DeleteChunkResponse, RetrieveChunkRequest, RetrieveChunkResponse, StoreChunkRequest,
    StoreChunkResponse,
};
pub use error::FabricError;
pub use job::{
    Attestation, ChunkAssignment, ChunkState, JobManifest, JobState, MergeStrategy, Redundancy,
    ResourceLimits, SplitStrategy,
};
pub use manifest::{
    CompressionAlgo, CompressionLevel, CompressionParams, EncryptionParams, FileManifest,
    ReplicationClass, ShardLocation, ShardingParams, CURRENT_MANIFEST_VERSION,
};
