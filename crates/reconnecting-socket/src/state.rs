//! Externally visible connection state.

use std::fmt;

/// Ready state of a socket, mirroring the states of the underlying transport.
///
/// A reconnecting socket reports [`ReadyState::Connecting`] while it waits
/// out a backoff delay, even though no raw connection exists at that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// A connection attempt is in progress or scheduled
    Connecting,

    /// Connected; payloads can be sent
    Open,

    /// A close was requested and is in progress
    Closing,

    /// Closed for good
    Closed,
}

impl ReadyState {
    /// Numeric encoding used by browsers and by the `socket_ready_state` gauge.
    pub fn as_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    /// Returns `true` for [`ReadyState::Connecting`] and [`ReadyState::Open`].
    pub fn is_live(self) -> bool {
        matches!(self, ReadyState::Connecting | ReadyState::Open)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Connecting => "CONNECTING",
            ReadyState::Open => "OPEN",
            ReadyState::Closing => "CLOSING",
            ReadyState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// How binary payloads are handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryType {
    /// Opaque blob handle
    #[default]
    Blob,

    /// Contiguous byte buffer
    ArrayBuffer,
}
