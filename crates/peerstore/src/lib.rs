//! The Peer Store: a pure health-score model plus the in-memory registry
//! that applies it (spec §4.8). Placement, the scheduler, and the verifier
//! all read snapshots from here and push quality callbacks back in; none of
//! them own peer state directly.

pub mod health;
pub mod model;
pub mod store;

pub use health::{health_score, AnomalyLevel, HealthWeights, RunningStat, ScoreFactors, Trend, TrendTracker, NEUTRAL_BASELINE};
pub use model::{CapacityHint, ConnectionQuality, PeerId, PeerRecord};
pub use store::PeerStore;
