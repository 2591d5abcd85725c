//! A socket that reconnects on its own.
//!
//! [`ReconnectingSocket`] wraps a raw, single-use duplex connection and
//! presents it as one long-lived connection. When the underlying connection
//! drops it is replaced after an exponentially growing delay, without the
//! caller having to notice anything beyond a `Connecting` event.
//!
//! # Features
//!
//! - **Exponential backoff**: `min(interval * decay^n, max)` between attempts
//! - **Connect timeout**: attempts that hang are aborted and retried
//! - **Attempt limit**: optionally stop retrying after N reconnects
//! - **Event system**: typed listeners for connecting/open/message/error/close
//! - **Pluggable I/O**: bring any transport through [`TransportFactory`]
//! - **Tokio driver**: [`SocketHandle`] runs the socket on a task
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use reconnecting_socket::SocketConfig;
//!
//! let config = SocketConfig::builder()
//!     .name("market-feed")
//!     .reconnect_interval(Duration::from_millis(250))
//!     .reconnect_decay(2.0)
//!     .max_reconnect_interval(Duration::from_secs(10))
//!     .connect_timeout(Duration::from_secs(3))
//!     .on_open(|is_reconnect| {
//!         println!("open, reconnect: {}", is_reconnect);
//!     })
//!     .on_close(|info| {
//!         println!("closed with {}", info.code);
//!     })
//!     .build();
//!
//! assert_eq!(config.name(), "market-feed");
//! ```
//!
//! ## State machine vs. driver
//!
//! The socket itself never spawns or blocks. It is driven by whoever owns
//! it, feeding transport signals and timer expiries back in one at a time.
//! Use [`SocketHandle::spawn`] to let a tokio task do that.
//!
//! ## Feature Flags
//!
//! - `tracing` (default): lifecycle logging; verbose logging per instance
//!   with [`SocketConfigBuilder::debug`] or globally with [`set_debug_all`]
//! - `metrics`: counters and a ready state gauge via the `metrics` crate

/// Logs at debug level when verbose logging is on for the instance.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::debug!($($arg)+);
        }
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($enabled:expr, $($arg:tt)+) => {{
        let _ = $enabled;
    }};
}

mod backoff;
mod config;
mod endpoint;
mod error;
mod events;
mod runtime;
mod socket;
mod state;
mod timer;
mod transport;

pub use backoff::Backoff;
pub use config::{SocketConfig, SocketConfigBuilder};
pub use endpoint::UrlSource;
pub use error::{SocketError, TransportError};
pub use events::SocketEvent;
pub use runtime::{SocketHandle, SocketStatus};
pub use socket::ReconnectingSocket;
pub use state::{BinaryType, ReadyState};
pub use timer::{Timer, TimerCallback, TimerToken, TokioTimer};
pub use transport::{
    AttemptId, CloseInfo, Payload, SignalRouter, SignalSink, Transport, TransportFactory,
    TransportSignal,
};

pub use reconnecting_socket_core::{
    debug_all, set_debug_all, ConnectionEvent, EventListener, FnListener, ListenerId,
};
