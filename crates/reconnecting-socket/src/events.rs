//! Socket lifecycle events.
//!
//! Every event carries the name of the socket that emitted it and the
//! instant it was emitted, exposed through [`ConnectionEvent`] as well.

use std::time::Instant;

use reconnecting_socket_core::events::ConnectionEvent;

use crate::transport::{CloseInfo, Payload};

/// Events emitted by a reconnecting socket.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A connection attempt is starting.
    ///
    /// `close` is set when the attempt follows an unintended disconnect and
    /// carries why the previous connection went away.
    Connecting {
        /// Name of the emitting socket.
        socket_name: String,
        /// When the event was emitted.
        timestamp: Instant,
        /// Why the previous connection closed, if it was lost.
        close: Option<CloseInfo>,
    },
    /// The connection is established.
    Open {
        /// Name of the emitting socket.
        socket_name: String,
        /// When the event was emitted.
        timestamp: Instant,
        /// `true` when this open recovers from a drop or failed attempt.
        is_reconnect: bool,
    },
    /// A payload arrived.
    Message {
        /// Name of the emitting socket.
        socket_name: String,
        /// When the event was emitted.
        timestamp: Instant,
        /// The received payload.
        data: Payload,
    },
    /// The transport reported an error.
    Error {
        /// Name of the emitting socket.
        socket_name: String,
        /// When the event was emitted.
        timestamp: Instant,
    },
    /// The connection closed: terminal after an explicit close, otherwise the
    /// first-loss notification ahead of a reconnect.
    Close {
        /// Name of the emitting socket.
        socket_name: String,
        /// When the event was emitted.
        timestamp: Instant,
        /// Close code, reason and whether the handshake completed.
        info: CloseInfo,
    },
    /// The reconnect attempt limit was exceeded; no further attempts are made.
    Exhausted {
        /// Name of the emitting socket.
        socket_name: String,
        /// When the event was emitted.
        timestamp: Instant,
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },
}

impl SocketEvent {
    pub(crate) fn connecting(socket_name: &str, close: Option<CloseInfo>) -> Self {
        SocketEvent::Connecting {
            socket_name: socket_name.to_string(),
            timestamp: Instant::now(),
            close,
        }
    }

    pub(crate) fn open(socket_name: &str, is_reconnect: bool) -> Self {
        SocketEvent::Open {
            socket_name: socket_name.to_string(),
            timestamp: Instant::now(),
            is_reconnect,
        }
    }

    pub(crate) fn message(socket_name: &str, data: Payload) -> Self {
        SocketEvent::Message {
            socket_name: socket_name.to_string(),
            timestamp: Instant::now(),
            data,
        }
    }

    pub(crate) fn error(socket_name: &str) -> Self {
        SocketEvent::Error {
            socket_name: socket_name.to_string(),
            timestamp: Instant::now(),
        }
    }

    pub(crate) fn close(socket_name: &str, info: CloseInfo) -> Self {
        SocketEvent::Close {
            socket_name: socket_name.to_string(),
            timestamp: Instant::now(),
            info,
        }
    }

    pub(crate) fn exhausted(socket_name: &str, attempts: u32) -> Self {
        SocketEvent::Exhausted {
            socket_name: socket_name.to_string(),
            timestamp: Instant::now(),
            attempts,
        }
    }
}

impl ConnectionEvent for SocketEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SocketEvent::Connecting { .. } => "connecting",
            SocketEvent::Open { .. } => "open",
            SocketEvent::Message { .. } => "message",
            SocketEvent::Error { .. } => "error",
            SocketEvent::Close { .. } => "close",
            SocketEvent::Exhausted { .. } => "exhausted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            SocketEvent::Connecting { timestamp, .. }
            | SocketEvent::Open { timestamp, .. }
            | SocketEvent::Message { timestamp, .. }
            | SocketEvent::Error { timestamp, .. }
            | SocketEvent::Close { timestamp, .. }
            | SocketEvent::Exhausted { timestamp, .. } => *timestamp,
        }
    }

    fn connection_name(&self) -> &str {
        match self {
            SocketEvent::Connecting { socket_name, .. }
            | SocketEvent::Open { socket_name, .. }
            | SocketEvent::Message { socket_name, .. }
            | SocketEvent::Error { socket_name, .. }
            | SocketEvent::Close { socket_name, .. }
            | SocketEvent::Exhausted { socket_name, .. } => socket_name,
        }
    }
}
