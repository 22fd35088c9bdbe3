//! Shared error type for the proximate runtime.

use thiserror::Error;

/// Top-level error type for proximate operations.
#[derive(Debug, Error)]
pub enum ProximateError {
    /// The peer referenced a receiver id not (or no longer) in our registry.
    #[error("Unknown receiver: {0}")]
    UnknownReceiver(String),

    /// An incoming payload names a protocol key not registered at this peer.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// A call resolved to something that is not a function.
    #[error("Not callable: {0}")]
    NotCallable(String),

    /// A member walk stepped through a value that has no members.
    #[error("Cannot walk '{member}' on a {kind} value")]
    NotWalkable {
        /// The member name that could not be read.
        member: String,
        /// Kind of the value the walk stopped at.
        kind: &'static str,
    },

    /// An assignment targeted a value that cannot be mutated in place.
    #[error("Cannot assign '{member}' on a {kind} value")]
    NotAssignable {
        /// The member name that could not be written.
        member: String,
        /// Kind of the value the assignment stopped at.
        kind: &'static str,
    },

    /// An error raised on the peer side, re-raised here.
    /// Only message and stack survive the wire.
    #[error("{message}")]
    Remote {
        /// The original error message.
        message: String,
        /// The original stack trace, if one was captured.
        stack: Option<String>,
    },

    /// The connection has been closed; the operation cannot complete.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The handle was released and can no longer be used.
    #[error("Handle already released")]
    Released,

    /// The closing handshake can only be initiated from the primary handle.
    #[error("Close is only available on the primary handle")]
    NotPrimary,

    /// The value contains live objects, handles, or buffers that no
    /// registered protocol claimed; it cannot be structurally cloned.
    #[error("Value cannot be structurally cloned")]
    NotCloneable,

    /// A protocol payload did not have the expected shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint rejected a message.
    #[error("Endpoint error: {0}")]
    Endpoint(String),
}

impl ProximateError {
    /// Build a remote-style error for raising from a receiver body.
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            stack: None,
        }
    }
}

/// Alias for Result with ProximateError.
pub type ProximateResult<T> = Result<T, ProximateError>;
