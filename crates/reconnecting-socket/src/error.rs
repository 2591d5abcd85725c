use thiserror::Error;

use crate::state::ReadyState;

/// Errors reported by a raw transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O failure while talking to the peer.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport refused the request (bad URL scheme, blocked port, ...).
    #[error("transport rejected the request: {0}")]
    Rejected(String),

    /// The transport is not in a state that accepts payloads.
    #[error("transport is not connected")]
    NotConnected,
}

/// Errors returned by socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// No raw connection exists, so the operation cannot be performed.
    #[error("socket is in invalid state {state} for this operation")]
    InvalidState {
        /// State at the time of the call.
        state: ReadyState,
    },

    /// The raw transport reported a failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The endpoint did not resolve to an absolute URL.
    #[error("invalid socket url {url:?}: {source}")]
    InvalidUrl {
        /// The string that failed to parse.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// The task driving the socket is gone.
    #[error("socket task has shut down")]
    Shutdown,
}

impl SocketError {
    /// Returns `true` if the error means "not connected right now".
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SocketError::InvalidState { .. })
    }
}
