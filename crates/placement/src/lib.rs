//! The Shard Placement Engine (spec §4.2): decides which peers receive
//! which shards at upload time, and which peers to query at download time.
//! Reads peer quality from the Peer Store; never mutates it directly —
//! quality callbacks flow back through the transport adapter instead.

pub mod download;
pub mod error;
pub mod scoring;
pub mod upload;

pub use download::{build_fetch_plan, FetchPlan, FetchTarget};
pub use error::PlacementError;
pub use scoring::{Candidate, ScoringWeights};
pub use upload::{plan_upload, PlacementAssignment};
