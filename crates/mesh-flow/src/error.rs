use mesh_core::{ErrorId, MeshError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("send queue did not drain within the requested timeout")]
    SendTimeout,
    #[error("flush did not complete within the requested timeout")]
    FlushTimeout,
    #[error("the flow channel has been closed")]
    Closed,
}

impl From<FlowError> for MeshError {
    fn from(value: FlowError) -> Self {
        let id = match value {
            FlowError::SendTimeout | FlowError::FlushTimeout => ErrorId::Timeout,
            FlowError::Closed => ErrorId::AbandonedTerminal,
        };
        MeshError::new(id, value.to_string())
    }
}
