use mesh_core::{ErrorId, MeshError};
use thiserror::Error;

/// Leaf errors produced while parsing or building wire structures. Every
/// variant maps onto a stable [`ErrorId`] via [`From`] so call sites can
/// `?`-propagate straight into a [`MeshError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer ended before the structure was fully read")]
    Truncated,

    #[error("outer frame length {0} exceeds the 16384-byte ceiling")]
    OversizeFrame(usize),

    #[error("segment length {0} exceeds the 16384-byte ceiling")]
    OversizeSegment(usize),

    #[error("unsupported TerminalOpts version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown flow-control code {0}")]
    UnknownFlowControlCode(u8),

    #[error("combined id/type varint did not fit in 32 bits")]
    IdOverflow,
}

impl From<WireError> for MeshError {
    fn from(value: WireError) -> Self {
        let id = match value {
            WireError::UnsupportedVersion(_) => ErrorId::UnsupportedVersion,
            WireError::UnknownFlowControlCode(_) => ErrorId::InvalidOptions,
            WireError::Truncated
            | WireError::OversizeFrame(_)
            | WireError::OversizeSegment(_)
            | WireError::IdOverflow => ErrorId::MalformedData,
        };
        MeshError::new(id, value.to_string())
    }
}
