//! The numeric error model (spec.md §4.7, §7).
//!
//! Every error that can cross a Terminal boundary reduces to a single byte
//! on the wire: the [`ErrorId`]. Everything else about an error — the
//! human-readable message, the wrapped cause, whether it originated locally
//! or was reconstructed from a peer's `Stop` frame — lives only on the side
//! that produced it and is never serialized.

use alloc_shim::BoxError;
use core::fmt;

/// Stable, wire-transmitted error identifiers.
///
/// IDs 1-7 are "OK-like": they terminate an operation or Terminal without
/// indicating a fault. IDs 8 and above are real failures. The enum is
/// `#[repr(u8)]` so `as u8` gives the wire value directly; unknown IDs
/// received from a peer are preserved via [`ErrorId::Unknown`] rather than
/// dropped, so a future error code doesn't get silently reinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorId {
    Stopping = 2,
    ExplicitAck = 3,
    NoActivity = 4,
    Internal = 8,
    MalformedData = 9,
    UnexpectedMsgType = 10,
    UnknownOpType = 11,
    UnknownOpId = 12,
    PermissionDenied = 13,
    Integrity = 14,
    InvalidOptions = 15,
    HubNotReady = 16,
    RateLimited = 24,
    Timeout = 62,
    UnsupportedVersion = 93,
    HubUnavailable = 101,
    AbandonedTerminal = 102,
    ShipSunk = 108,
    DestinationUnavailable = 113,
    TryAgainLater = 114,
    ConnectionError = 121,
    QueueOverflow = 122,
    Canceled = 125,
    /// A numeric ID this build doesn't recognize. Preserves round-trip
    /// fidelity for a `Stop` frame coming from a newer peer.
    Unknown(u8),
}

impl ErrorId {
    pub fn code(self) -> u8 {
        match self {
            ErrorId::Stopping => 2,
            ErrorId::ExplicitAck => 3,
            ErrorId::NoActivity => 4,
            ErrorId::Internal => 8,
            ErrorId::MalformedData => 9,
            ErrorId::UnexpectedMsgType => 10,
            ErrorId::UnknownOpType => 11,
            ErrorId::UnknownOpId => 12,
            ErrorId::PermissionDenied => 13,
            ErrorId::Integrity => 14,
            ErrorId::InvalidOptions => 15,
            ErrorId::HubNotReady => 16,
            ErrorId::RateLimited => 24,
            ErrorId::Timeout => 62,
            ErrorId::UnsupportedVersion => 93,
            ErrorId::HubUnavailable => 101,
            ErrorId::AbandonedTerminal => 102,
            ErrorId::ShipSunk => 108,
            ErrorId::DestinationUnavailable => 113,
            ErrorId::TryAgainLater => 114,
            ErrorId::ConnectionError => 121,
            ErrorId::QueueOverflow => 122,
            ErrorId::Canceled => 125,
            ErrorId::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u8) -> ErrorId {
        match code {
            2 => ErrorId::Stopping,
            3 => ErrorId::ExplicitAck,
            4 => ErrorId::NoActivity,
            8 => ErrorId::Internal,
            9 => ErrorId::MalformedData,
            10 => ErrorId::UnexpectedMsgType,
            11 => ErrorId::UnknownOpType,
            12 => ErrorId::UnknownOpId,
            13 => ErrorId::PermissionDenied,
            14 => ErrorId::Integrity,
            15 => ErrorId::InvalidOptions,
            16 => ErrorId::HubNotReady,
            24 => ErrorId::RateLimited,
            62 => ErrorId::Timeout,
            93 => ErrorId::UnsupportedVersion,
            101 => ErrorId::HubUnavailable,
            102 => ErrorId::AbandonedTerminal,
            108 => ErrorId::ShipSunk,
            113 => ErrorId::DestinationUnavailable,
            114 => ErrorId::TryAgainLater,
            121 => ErrorId::ConnectionError,
            122 => ErrorId::QueueOverflow,
            125 => ErrorId::Canceled,
            other => ErrorId::Unknown(other),
        }
    }

    /// True for IDs 1-7: normal completion, not a fault.
    pub fn is_ok_like(self) -> bool {
        let code = self.code();
        (1..=7).contains(&code)
    }

    /// Mirror of the spec's `is_error()`: true only for IDs >= 8.
    pub fn is_error(self) -> bool {
        !self.is_ok_like()
    }

    fn human(self) -> &'static str {
        match self {
            ErrorId::Stopping => "peer or local side is stopping",
            ErrorId::ExplicitAck => "explicit acknowledgement, not a fault",
            ErrorId::NoActivity => "idle timeout, no activity observed",
            ErrorId::Internal => "internal failure",
            ErrorId::MalformedData => "malformed protocol data",
            ErrorId::UnexpectedMsgType => "unexpected message type",
            ErrorId::UnknownOpType => "unknown operation type",
            ErrorId::UnknownOpId => "unknown operation id",
            ErrorId::PermissionDenied => "permission denied",
            ErrorId::Integrity => "integrity check failed",
            ErrorId::InvalidOptions => "invalid options",
            ErrorId::HubNotReady => "hub not ready",
            ErrorId::RateLimited => "rate limited",
            ErrorId::Timeout => "timed out",
            ErrorId::UnsupportedVersion => "unsupported protocol version",
            ErrorId::HubUnavailable => "hub unavailable",
            ErrorId::AbandonedTerminal => "terminal abandoned",
            ErrorId::ShipSunk => "underlying stream failed",
            ErrorId::DestinationUnavailable => "destination unavailable",
            ErrorId::TryAgainLater => "try again later",
            ErrorId::ConnectionError => "connection error",
            ErrorId::QueueOverflow => "queue overflow",
            ErrorId::Canceled => "canceled",
            ErrorId::Unknown(_) => "unrecognized error id",
        }
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.human(), self.code())
    }
}

/// A Mesh error: a wire-stable [`ErrorId`], a local-only human message, an
/// optional wrapped cause, and whether this instance was reconstructed from
/// a peer's `Stop` frame.
///
/// Peers never see `message` or `cause`; they reconstruct their own message
/// from `id` alone (spec.md §4.7: "human message (not transmitted — peer
/// reconstructs from its own registry)").
#[derive(Debug)]
pub struct MeshError {
    id: ErrorId,
    message: String,
    cause: Option<BoxError>,
    external: bool,
}

impl MeshError {
    pub fn new(id: ErrorId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            cause: None,
            external: false,
        }
    }

    /// Build a local error whose message is the registry's canonical text.
    pub fn local(id: ErrorId) -> Self {
        Self::new(id, id.human())
    }

    /// Reconstruct an error that arrived on the wire as a `Stop` frame.
    /// Always `external = true`.
    pub fn from_wire(id: ErrorId) -> Self {
        Self {
            id,
            message: id.human().to_string(),
            cause: None,
            external: true,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn id(&self) -> ErrorId {
        self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }

    /// True if this instance was built from a peer's `Stop` frame rather
    /// than raised locally. Per §7, a locally-wrapped error whose cause is
    /// external must never itself turn into a fresh `Stop` (no ping-pong).
    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn is_ok_like(&self) -> bool {
        self.id.is_ok_like()
    }

    /// Serialize just the wire-stable part: a varint of the error ID.
    pub fn to_wire(&self) -> Vec<u8> {
        crate::varint::encode(self.id.code() as u64)
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

impl std::error::Error for MeshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause()
    }
}

pub type Result<T> = core::result::Result<T, MeshError>;

mod alloc_shim {
    pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_like_range_is_1_through_7() {
        assert!(ErrorId::Stopping.is_ok_like());
        assert!(ErrorId::ExplicitAck.is_ok_like());
        assert!(ErrorId::NoActivity.is_ok_like());
        assert!(!ErrorId::Internal.is_ok_like());
        assert!(ErrorId::Internal.is_error());
    }

    #[test]
    fn code_round_trips_through_from_code() {
        for code in [2u8, 3, 4, 8, 9, 10, 11, 12, 13, 14, 15, 16, 24, 62, 93, 101, 102, 108, 113,
            114, 121, 122, 125]
        {
            assert_eq!(ErrorId::from_code(code).code(), code);
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let id = ErrorId::from_code(200);
        assert_eq!(id, ErrorId::Unknown(200));
        assert!(id.is_error());
    }

    #[test]
    fn wire_serialization_is_just_the_varint() {
        let err = MeshError::local(ErrorId::RateLimited);
        assert_eq!(err.to_wire(), crate::varint::encode(24));
    }
}
