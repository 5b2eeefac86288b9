//! mesh-core: shared contracts for the Mesh transport substrate.
//!
//! This crate has no async runtime logic of its own beyond cancellation
//! primitives; it is the vocabulary every other `mesh-*` crate builds on —
//! the numeric error model (§4.7), Terminal/Operation/Crane ID allocation
//! (§3 invariants 1-3), the varint codec used at every layer of the wire
//! format (§6), and process-wide configuration knobs (§4.1, §4.2, §4.3).

pub mod cancel;
pub mod config;
pub mod error;
pub mod ids;
pub mod time;
pub mod varint;

pub use cancel::CancellationToken;
pub use error::{ErrorId, MeshError, Result};
pub use ids::{AllocatorRole, CraneId, IdAllocator};
