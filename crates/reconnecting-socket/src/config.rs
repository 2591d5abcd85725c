use std::fmt;
use std::time::Duration;

use reconnecting_socket_core::events::{EventListeners, FnListener};

use crate::backoff::Backoff;
use crate::events::SocketEvent;
use crate::state::BinaryType;
use crate::transport::{CloseInfo, Payload};

/// Configuration for a reconnecting socket.
///
/// Every setting can be changed while the socket runs. Changes take effect
/// on the next connection attempt; an attempt already in flight keeps the
/// timeout it was started with.
#[derive(Clone)]
pub struct SocketConfig {
    pub(crate) name: String,
    pub(crate) debug: bool,
    pub(crate) automatic_open: bool,
    pub(crate) backoff: Backoff,
    pub(crate) connect_timeout: Duration,
    pub(crate) max_reconnect_attempts: Option<u32>,
    pub(crate) binary_type: BinaryType,
    pub(crate) event_listeners: EventListeners<SocketEvent>,
}

impl SocketConfig {
    /// Creates a new builder for configuring a socket.
    pub fn builder() -> SocketConfigBuilder {
        SocketConfigBuilder::new()
    }

    /// Returns the instance name used in events, logs and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether verbose tracing is enabled for this instance.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Returns whether the socket connects as soon as it is created.
    pub fn automatic_open(&self) -> bool {
        self.automatic_open
    }

    /// Returns the backoff schedule.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Returns the base reconnect delay.
    pub fn reconnect_interval(&self) -> Duration {
        self.backoff.interval()
    }

    /// Returns the reconnect delay ceiling.
    pub fn max_reconnect_interval(&self) -> Duration {
        self.backoff.max_interval()
    }

    /// Returns the backoff growth base.
    pub fn reconnect_decay(&self) -> f64 {
        self.backoff.decay()
    }

    /// Returns how long a connection attempt may take before it is aborted.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the reconnect attempt limit. `None` means unlimited.
    pub fn max_reconnect_attempts(&self) -> Option<u32> {
        self.max_reconnect_attempts
    }

    /// Returns how binary payloads are represented.
    pub fn binary_type(&self) -> BinaryType {
        self.binary_type
    }

    /// Enables or disables verbose tracing for this instance.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Sets whether the socket connects as soon as it is created.
    pub fn set_automatic_open(&mut self, automatic_open: bool) {
        self.automatic_open = automatic_open;
    }

    /// Sets the base reconnect delay.
    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.backoff.set_interval(interval);
    }

    /// Sets the reconnect delay ceiling.
    pub fn set_max_reconnect_interval(&mut self, max_interval: Duration) {
        self.backoff.set_max_interval(max_interval);
    }

    /// Sets the backoff growth base.
    pub fn set_reconnect_decay(&mut self, decay: f64) {
        self.backoff.set_decay(decay);
    }

    /// Sets the connect timeout.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// Sets the reconnect attempt limit. `None` means unlimited.
    pub fn set_max_reconnect_attempts(&mut self, max: Option<u32>) {
        self.max_reconnect_attempts = max;
    }

    /// Sets how binary payloads are represented.
    pub fn set_binary_type(&mut self, binary_type: BinaryType) {
        self.binary_type = binary_type;
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfigBuilder::new().build()
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConfig")
            .field("name", &self.name)
            .field("debug", &self.debug)
            .field("automatic_open", &self.automatic_open)
            .field("backoff", &self.backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("binary_type", &self.binary_type)
            .field("event_listeners", &self.event_listeners.len())
            .finish()
    }
}

/// Builder for configuring and constructing a [`SocketConfig`].
pub struct SocketConfigBuilder {
    name: String,
    debug: bool,
    automatic_open: bool,
    backoff: Backoff,
    connect_timeout: Duration,
    max_reconnect_attempts: Option<u32>,
    binary_type: BinaryType,
    event_listeners: EventListeners<SocketEvent>,
}

impl SocketConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            debug: false,
            automatic_open: true,
            backoff: Backoff::default(),
            connect_timeout: Duration::from_millis(5000),
            max_reconnect_attempts: None,
            binary_type: BinaryType::default(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name of this socket instance for observability.
    ///
    /// Default: `"<unnamed>"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables verbose tracing for this instance.
    ///
    /// Default: false
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets whether the socket starts connecting as soon as it is created.
    ///
    /// Default: true
    pub fn automatic_open(mut self, automatic_open: bool) -> Self {
        self.automatic_open = automatic_open;
        self
    }

    /// Sets the delay before the first reconnect attempt.
    ///
    /// Default: 1 second
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.backoff.set_interval(interval);
        self
    }

    /// Sets the maximum delay between reconnect attempts.
    ///
    /// Default: 30 seconds
    pub fn max_reconnect_interval(mut self, max_interval: Duration) -> Self {
        self.backoff.set_max_interval(max_interval);
        self
    }

    /// Sets the rate at which the reconnect delay grows.
    ///
    /// Default: 1.5
    pub fn reconnect_decay(mut self, decay: f64) -> Self {
        self.backoff.set_decay(decay);
        self
    }

    /// Replaces the whole backoff schedule.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use reconnecting_socket::{Backoff, SocketConfig};
    ///
    /// let config = SocketConfig::builder()
    ///     .backoff(Backoff::new(
    ///         Duration::from_millis(100),
    ///         Duration::from_secs(10),
    ///         2.0,
    ///     ))
    ///     .build();
    ///
    /// assert_eq!(config.reconnect_interval(), Duration::from_millis(100));
    /// ```
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets how long a connection attempt may take before it is aborted.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the maximum number of reconnect attempts.
    ///
    /// # Examples
    ///
    /// ```
    /// use reconnecting_socket::SocketConfig;
    ///
    /// let config = SocketConfig::builder()
    ///     .max_reconnect_attempts(5)
    ///     .build();
    ///
    /// assert_eq!(config.max_reconnect_attempts(), Some(5));
    /// ```
    pub fn max_reconnect_attempts(mut self, max: u32) -> Self {
        self.max_reconnect_attempts = Some(max);
        self
    }

    /// Removes the reconnect attempt limit.
    ///
    /// Default: unlimited
    pub fn unlimited_reconnect_attempts(mut self) -> Self {
        self.max_reconnect_attempts = None;
        self
    }

    /// Sets how binary payloads are represented.
    ///
    /// Default: [`BinaryType::Blob`]
    pub fn binary_type(mut self, binary_type: BinaryType) -> Self {
        self.binary_type = binary_type;
        self
    }

    /// Registers a callback for every socket event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback invoked when a connection attempt starts.
    ///
    /// The argument carries why the previous connection closed, if this
    /// attempt follows an unintended disconnect.
    pub fn on_connecting<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&CloseInfo>) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &SocketEvent| {
            if let SocketEvent::Connecting { close, .. } = event {
                f(close.as_ref());
            }
        }));
        self
    }

    /// Registers a callback invoked when the connection opens.
    ///
    /// The argument is `true` when the open recovers from a drop.
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &SocketEvent| {
            if let SocketEvent::Open { is_reconnect, .. } = event {
                f(*is_reconnect);
            }
        }));
        self
    }

    /// Registers a callback invoked for every incoming payload.
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &SocketEvent| {
            if let SocketEvent::Message { data, .. } = event {
                f(data);
            }
        }));
        self
    }

    /// Registers a callback invoked when the transport reports an error.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &SocketEvent| {
            if matches!(event, SocketEvent::Error { .. }) {
                f();
            }
        }));
        self
    }

    /// Registers a callback invoked when the connection closes.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &SocketEvent| {
            if let SocketEvent::Close { info, .. } = event {
                f(info);
            }
        }));
        self
    }

    /// Registers a callback invoked when the reconnect attempt limit is hit.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &SocketEvent| {
            if let SocketEvent::Exhausted { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Builds the socket configuration.
    pub fn build(self) -> SocketConfig {
        SocketConfig {
            name: self.name,
            debug: self.debug,
            automatic_open: self.automatic_open,
            backoff: self.backoff,
            connect_timeout: self.connect_timeout,
            max_reconnect_attempts: self.max_reconnect_attempts,
            binary_type: self.binary_type,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for SocketConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SocketConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConfigBuilder")
            .field("name", &self.name)
            .field("backoff", &self.backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish()
    }
}
