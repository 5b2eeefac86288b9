//! mesh-transport-tcp: the `tokio::net::TcpStream` physical-stream adapter
//! (spec.md §A/§C4). Not itself required for `Crane::launch` — a bare
//! `TcpStream` already satisfies `mesh_wire::PhysicalStream` — but gives a
//! real deployment socket configuration (`SO_LINGER`) and graceful
//! half-close on top of it.

pub mod channel;
pub mod error;

pub use channel::{ShutdownDirection, TcpChannel, TcpServerChannel, TcpSocketConfig};
pub use error::TcpTransportError;
