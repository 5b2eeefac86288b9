use mesh_core::{ErrorId, MeshError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CraneError {
    #[error("init handshake byte {0} does not match any known frame type")]
    UnknownFrameType(u8),
    #[error("peer closed the stream before a Start frame arrived")]
    HandshakeIncomplete,
    #[error("dialer received a StartEncrypted/StartUnencrypted frame, which only a listener sends")]
    UnexpectedStartFrame,
    #[error("no identity configured, but the stream is not already secure")]
    IdentityRequired,
    #[error("could not resolve the peer's announced hub identity")]
    UnresolvedPeer,
}

impl From<CraneError> for MeshError {
    fn from(value: CraneError) -> Self {
        let id = match value {
            CraneError::UnknownFrameType(_) | CraneError::HandshakeIncomplete | CraneError::UnexpectedStartFrame => {
                ErrorId::MalformedData
            }
            CraneError::IdentityRequired | CraneError::UnresolvedPeer => ErrorId::ConnectionError,
        };
        MeshError::new(id, value.to_string())
    }
}
