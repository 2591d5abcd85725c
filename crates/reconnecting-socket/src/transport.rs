//! Collaborator interfaces for the raw connection.
//!
//! A [`TransportFactory`] creates one [`Transport`] per connection attempt.
//! The transport reports what happens to it through the [`SignalSink`] it
//! was created with. Signals are tagged with the attempt they belong to, so
//! the socket can drop anything reported by a connection it already
//! replaced.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::TransportError;
use crate::state::{BinaryType, ReadyState};

/// A payload carried by the connection, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame
    Text(String),

    /// Binary frame
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Binary(bytes.to_vec())
    }
}

/// Why a raw connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code as reported by the transport.
    pub code: u16,
    /// Close reason as reported by the transport.
    pub reason: String,
    /// Whether the closing handshake completed.
    pub was_clean: bool,
}

impl CloseInfo {
    /// Normal closure.
    pub const NORMAL_CLOSURE: u16 = 1000;
    /// No close frame was received.
    pub const ABNORMAL_CLOSURE: u16 = 1006;

    /// Creates close information.
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// A clean, normal closure.
    pub fn normal() -> Self {
        Self::new(Self::NORMAL_CLOSURE, "", true)
    }

    /// An abnormal closure, used when the connection died without a handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(Self::ABNORMAL_CLOSURE, reason, false)
    }
}

/// Identifies one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Something that happened to a raw connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The connection is established.
    Opened {
        /// Sub-protocol selected by the peer, if any.
        protocol: Option<String>,
    },

    /// A payload arrived.
    Message(Payload),

    /// The transport hit an error. A fatal error is followed by `Closed`.
    Error,

    /// The connection is gone.
    Closed(CloseInfo),
}

/// Delivers signals from the environment back to the socket.
///
/// Implementations must queue: a signal must never be handed to the socket
/// while one of its own methods is still running.
pub type SignalRouter = Arc<dyn Fn(AttemptId, TransportSignal) + Send + Sync>;

/// Handle a transport uses to report its signals.
#[derive(Clone)]
pub struct SignalSink {
    attempt: AttemptId,
    router: SignalRouter,
}

impl SignalSink {
    /// Creates a sink reporting on behalf of `attempt`.
    pub fn new(attempt: AttemptId, router: SignalRouter) -> Self {
        Self { attempt, router }
    }

    /// Returns the attempt this sink reports for.
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Reports an arbitrary signal.
    pub fn signal(&self, signal: TransportSignal) {
        (self.router)(self.attempt, signal);
    }

    /// Reports that the connection is established.
    pub fn opened(&self, protocol: Option<String>) {
        self.signal(TransportSignal::Opened { protocol });
    }

    /// Reports an incoming payload.
    pub fn message(&self, payload: impl Into<Payload>) {
        self.signal(TransportSignal::Message(payload.into()));
    }

    /// Reports a transport error.
    pub fn error(&self) {
        self.signal(TransportSignal::Error);
    }

    /// Reports that the connection closed.
    pub fn closed(&self, info: CloseInfo) {
        self.signal(TransportSignal::Closed(info));
    }
}

impl fmt::Debug for SignalSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSink")
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// A raw, single-use duplex connection.
pub trait Transport: Send {
    /// Sends a payload.
    fn send(&mut self, payload: Payload) -> Result<(), TransportError>;

    /// Requests the connection to close. Completion is reported through
    /// [`SignalSink::closed`].
    fn close(&mut self, code: Option<u16>, reason: Option<&str>);

    /// Returns the transport's own view of its state.
    fn ready_state(&self) -> ReadyState;

    /// Selects how binary payloads are represented.
    fn set_binary_type(&mut self, binary_type: BinaryType) {
        let _ = binary_type;
    }
}

/// Creates raw connections.
pub trait TransportFactory: Send {
    /// The connection type produced.
    type Transport: Transport;

    /// Starts connecting to `url`.
    ///
    /// Returning `Err` means the attempt failed before any connection
    /// existed; the socket treats it like an abnormal close.
    fn connect(
        &mut self,
        url: &Url,
        protocols: &[String],
        signals: SignalSink,
    ) -> Result<Self::Transport, TransportError>;
}
