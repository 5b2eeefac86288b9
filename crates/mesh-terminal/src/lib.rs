//! mesh-terminal: the multiplexed logical channel (spec.md §4.3) running
//! inside one Crane — framing/batching, the inner crypto session, Operation
//! hosting and the type registry, idle timeout, and Session/rate-limit.

pub mod crypto;
pub mod error;
pub mod operation;
pub mod session;
pub mod terminal;

pub use crypto::{ChaChaSession, CryptoSession, NullSession};
pub use error::TerminalError;
pub use operation::{FactoryOutcome, Operation, OperationContext, Permissions, Registry};
pub use session::Session;
pub use terminal::Terminal;
