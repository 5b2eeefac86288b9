use mesh_core::{ErrorId, MeshError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerminalError {
    #[error("terminal is abandoning; no new operations or sends are accepted")]
    Abandoning,
    #[error("operation type {0:?} is not registered")]
    UnknownOpType(String),
    #[error("operation id {0} is not active on this terminal")]
    UnknownOpId(u32),
    #[error("caller lacks the permission required for this operation type")]
    PermissionDenied,
    #[error("wait for the scheduler slot or send queue exceeded its timeout")]
    Timeout,
}

impl From<TerminalError> for MeshError {
    fn from(value: TerminalError) -> Self {
        let id = match value {
            TerminalError::Abandoning => ErrorId::AbandonedTerminal,
            TerminalError::UnknownOpType(_) => ErrorId::UnknownOpType,
            TerminalError::UnknownOpId(_) => ErrorId::UnknownOpId,
            TerminalError::PermissionDenied => ErrorId::PermissionDenied,
            TerminalError::Timeout => ErrorId::Timeout,
        };
        MeshError::new(id, value.to_string())
    }
}
