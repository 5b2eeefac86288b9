//! mesh-wire: the Mesh wire contract (spec.md §6) — outer frames, shipments,
//! segments, `TerminalOpts`, and the `Msg` carrier that rides through
//! Terminal send/recv loops.
//!
//! Layering, outside in:
//! `outer_frame` (physical stream) → `shipment` (one frame's payload) →
//! `segment` (one ID's worth of one frame) → `msg`/`terminal_opts` (typed
//! content of a segment's payload).

pub mod error;
pub mod msg;
pub mod msg_type;
pub mod outer_frame;
pub mod segment;
pub mod shipment;
pub mod stream;
pub mod terminal_opts;

pub use error::WireError;
pub use msg::{Msg, MsgBuffer};
pub use msg_type::MsgType;
pub use outer_frame::MAX_OUTER_FRAME;
pub use segment::MAX_SEGMENT_LEN;
pub use shipment::ShipmentSegments;
pub use stream::{read_frame, write_frame, PhysicalStream};
pub use terminal_opts::{FlowControlKind, TerminalOpts, SUPPORTED_VERSION};
