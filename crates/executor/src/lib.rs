//! The Sandboxed Executor (spec §4.6): runs one compute chunk's WASM module
//! to completion inside a wasmtime sandbox with no ambient filesystem,
//! network, clock, or environment access, enforces CPU/memory/wall-time/IO
//! budgets, and signs an attestation binding the output to this worker's
//! identity.

pub mod error;
pub mod host;
pub mod vm;

pub use error::ExecError;
pub use vm::{ChunkOutcome, Executor};
