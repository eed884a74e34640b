//! # Error Types
//!
//! Comprehensive error handling for the object messaging protocol.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level I/O errors to remote invocation faults.
//!
//! ## Error Categories
//! - **Connection Errors**: TCP/TLS establishment, broken streams, disposal
//! - **Protocol Errors**: framing invariant violations
//! - **Serialization Errors**: per-frame encode/decode failures, carrying the
//!   frame's correlation ids so they can be routed to a single RMI exchange
//! - **Invocation Errors**: remote method invocation faults with the remote
//!   message and the full remote error text
//!
//! Fatality is part of the contract: [`LinkError::ConnectionBroken`] and
//! [`LinkError::ProtocolViolation`] terminate the connection, everything else
//! surfaces only to the initiator of the failing operation.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection lifecycle errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_OBJECT_DISPOSED: &str = "Connection already disposed";
    pub const ERR_LISTENING_ACTIVE: &str =
        "read_value cannot be used while background listening is enabled";

    /// Protocol validation errors
    pub const ERR_INVALID_TYPE_CODE: &str = "Unknown frame type code";
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length field in frame";
    pub const ERR_OVERSIZED_FRAME: &str = "Frame exceeds maximum payload size";

    /// Handshake errors
    pub const ERR_NOT_CREDENTIALS: &str = "First frame was not a credentials object";
    pub const ERR_AUTH_REJECTED: &str = "Server rejected the credential exchange";
    pub const ERR_AUTH_NO_ACK: &str = "Server closed the connection before acknowledging";
}

/// Substates of a failed remote method invocation.
///
/// The numeric value is the wire `exception_code` of an invoke result;
/// `0` on the wire means success and has no variant here.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The connection shut down while the call was outstanding.
    OperationCancelled = 1,
    /// The peer failed to decode the request (or we failed to decode a
    /// frame attributable to this exchange).
    DataReceivingError = 2,
    /// No controller is registered under the requested identifier.
    ControllerNotFound = 3,
    /// The controller has no method matching name and parameter types.
    MethodNotFound = 4,
    /// The method itself raised an error.
    MethodInvokeException = 5,
}

impl FaultKind {
    /// Convert from a wire `exception_code`. Returns `None` for `0` (success)
    /// and for unknown codes.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => FaultKind::OperationCancelled,
            2 => FaultKind::DataReceivingError,
            3 => FaultKind::ControllerNotFound,
            4 => FaultKind::MethodNotFound,
            5 => FaultKind::MethodInvokeException,
            _ => return None,
        })
    }

    /// The wire `exception_code` for this fault.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn description(self) -> &'static str {
        match self {
            FaultKind::OperationCancelled => "operation cancelled",
            FaultKind::DataReceivingError => "data receiving error",
            FaultKind::ControllerNotFound => "controller not found",
            FaultKind::MethodNotFound => "method not found",
            FaultKind::MethodInvokeException => "method invocation raised an error",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// LinkError is the primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum LinkError {
    /// TCP or TLS establishment failed before the credential exchange.
    #[error("Connection open failed: {0}")]
    ConnectionOpen(#[source] io::Error),

    /// The credential exchange was rejected.
    #[error("Client authentication failed: {0}")]
    ClientAuthentication(String),

    /// The remote end closed the stream, or a mid-frame I/O error occurred.
    /// Fatal to the connection.
    #[error("Connection broken")]
    ConnectionBroken,

    /// A framing invariant was violated (unreadable header, inconsistent
    /// lengths, unknown type code). Fatal to the connection.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A specific frame's payload could not be encoded or decoded.
    /// Non-fatal; the ids identify the RMI exchange it belongs to (both zero
    /// for a plain application message).
    #[error("Serialization of '{type_name}' failed: {reason}")]
    Serialization {
        type_name: String,
        message_id: i32,
        in_response_to_id: i32,
        reason: String,
    },

    /// A received frame named a type this peer's registry does not know.
    /// Non-fatal; correlated like [`LinkError::Serialization`].
    #[error("Serialization type not found: '{type_name}'")]
    SerializationTypeNotFound {
        type_name: String,
        message_id: i32,
        in_response_to_id: i32,
    },

    /// A remote method invocation failed. Carries the short remote message
    /// and the full remote error text.
    #[error("Controller invocation failed ({kind}): {message}")]
    ControllerInvocation {
        kind: FaultKind,
        message: String,
        remote_detail: String,
    },

    /// Operation attempted after the connection entered `Closed` or `Broken`.
    #[error("Connection already disposed")]
    ObjectDisposed,

    /// Operation not valid in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LinkError {
    /// Whether this error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::ConnectionBroken | LinkError::ProtocolViolation(_)
        )
    }

    /// The correlation ids of the frame this error belongs to, when it is a
    /// per-frame serialization error.
    pub fn correlation_ids(&self) -> Option<(i32, i32)> {
        match self {
            LinkError::Serialization {
                message_id,
                in_response_to_id,
                ..
            }
            | LinkError::SerializationTypeNotFound {
                message_id,
                in_response_to_id,
                ..
            } => Some((*message_id, *in_response_to_id)),
            _ => None,
        }
    }

    /// Shorthand for a cancelled-by-shutdown invocation error.
    pub fn cancelled() -> Self {
        LinkError::ControllerInvocation {
            kind: FaultKind::OperationCancelled,
            message: constants::ERR_CONNECTION_CLOSED.into(),
            remote_detail: String::new(),
        }
    }
}

/// Type alias for Results using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_kind_roundtrip() {
        for kind in [
            FaultKind::OperationCancelled,
            FaultKind::DataReceivingError,
            FaultKind::ControllerNotFound,
            FaultKind::MethodNotFound,
            FaultKind::MethodInvokeException,
        ] {
            assert_eq!(FaultKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(FaultKind::from_code(0), None);
        assert_eq!(FaultKind::from_code(42), None);
    }

    #[test]
    fn fatality_classification() {
        assert!(LinkError::ConnectionBroken.is_fatal());
        assert!(LinkError::ProtocolViolation("x".into()).is_fatal());
        assert!(!LinkError::ObjectDisposed.is_fatal());
        assert!(!LinkError::SerializationTypeNotFound {
            type_name: "a.B, a".into(),
            message_id: 0,
            in_response_to_id: 7,
        }
        .is_fatal());
    }

    #[test]
    fn correlation_ids_exposed() {
        let err = LinkError::Serialization {
            type_name: "a.B, a".into(),
            message_id: 3,
            in_response_to_id: 0,
            reason: "bad json".into(),
        };
        assert_eq!(err.correlation_ids(), Some((3, 0)));
        assert_eq!(LinkError::ConnectionBroken.correlation_ids(), None);
    }
}
