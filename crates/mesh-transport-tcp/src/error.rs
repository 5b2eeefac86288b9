use mesh_core::{ErrorId, MeshError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TcpTransportError {
    #[error("connect to {0} failed: {1}")]
    Connect(std::net::SocketAddr, std::io::Error),
    #[error("bind to {0} failed: {1}")]
    Bind(std::net::SocketAddr, std::io::Error),
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
    #[error("socket option failed: {0}")]
    Configure(std::io::Error),
    #[error("shutdown failed: {0}")]
    Shutdown(std::io::Error),
}

impl From<TcpTransportError> for MeshError {
    fn from(value: TcpTransportError) -> Self {
        let id = match value {
            TcpTransportError::Connect(..) => ErrorId::ConnectionError,
            TcpTransportError::Bind(..) | TcpTransportError::Accept(..) => ErrorId::HubNotReady,
            TcpTransportError::Configure(..) | TcpTransportError::Shutdown(..) => ErrorId::Internal,
        };
        MeshError::new(id, value.to_string())
    }
}
