//! mesh-crane: the duplex transport owning one physical stream (spec.md
//! §4.4). Runs the init handshake, then the four steady-state loops for as
//! long as the stream lives; hands out Terminals to the layer above.

mod crane;
mod error;
mod handshake;
mod identity;
pub mod test_support;

pub use crane::{compute_target_load, derive_terminal_key, establish_terminal, Crane, CraneConfig, Role, MIN_TARGET_LOAD};
pub use error::CraneError;
pub use handshake::HandshakeOutcome;
pub use identity::{HubIdentity, StaticHubIdentity};
