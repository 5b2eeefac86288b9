//! mesh-flow: the Duplex Flow Queue (spec.md §4.2), a symmetric credit
//! system layered on whatever hands framed bytes to a Crane, plus the
//! no-flow-control passthrough variant a Terminal can negotiate instead.

pub mod dfq;
pub mod error;
pub mod flow_control;
pub mod passthrough;

pub use dfq::{Dfq, Shipped};
pub use error::FlowError;
pub use flow_control::FlowControl;
pub use passthrough::Passthrough;
