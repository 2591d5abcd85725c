//! The reconnection state machine.

use std::fmt;
use std::mem;
use std::sync::Arc;

use reconnecting_socket_core::debug_enabled;
use reconnecting_socket_core::events::{BoxedEventListener, EventListener, ListenerId};
use url::Url;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::config::SocketConfig;
use crate::endpoint::UrlSource;
use crate::error::SocketError;
use crate::events::SocketEvent;
use crate::state::ReadyState;
use crate::timer::{Timer, TimerToken};
use crate::transport::{
    AttemptId, CloseInfo, Payload, SignalRouter, SignalSink, Transport, TransportFactory,
    TransportSignal,
};

/// Why the socket asked the current raw connection to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseCause {
    /// Explicit `close()`; terminal.
    Forced,
    /// The connect timeout expired before the connection opened.
    Timeout,
    /// `refresh()` or `open()` on a live connection; reconnects.
    Recycle,
}

/// One raw connection and the bookkeeping that belongs to it.
struct Attempt<C> {
    id: AttemptId,
    transport: C,
    /// Set for automatic reconnect attempts until they open.
    is_reconnect: bool,
    close_cause: Option<CloseCause>,
    /// What `close()` asked for, reported if the confirmation never arrives.
    forced_close: Option<CloseInfo>,
    timeout: Option<TimerToken>,
}

impl<C: Transport> Attempt<C> {
    /// Asks the transport to close unless it is already on its way out.
    fn request_close(&mut self, code: Option<u16>, reason: Option<&str>) {
        if self.transport.ready_state().is_live() {
            self.transport.close(code, reason);
        }
    }
}

enum Phase<C> {
    /// Created with `automatic_open` off and never opened.
    Idle,
    Connecting(Attempt<C>),
    Open(Attempt<C>),
    /// `close()` was called; waiting for the transport to confirm.
    ClosingForced(Attempt<C>),
    /// Waiting out the backoff delay.
    Reconnecting { timer: TimerToken },
    /// The reconnect attempt limit was exceeded.
    Exhausted,
    Closed,
}

impl<C> Phase<C> {
    fn attempt(&self) -> Option<&Attempt<C>> {
        match self {
            Phase::Connecting(attempt) | Phase::Open(attempt) | Phase::ClosingForced(attempt) => {
                Some(attempt)
            }
            _ => None,
        }
    }

    fn attempt_mut(&mut self) -> Option<&mut Attempt<C>> {
        match self {
            Phase::Connecting(attempt) | Phase::Open(attempt) | Phase::ClosingForced(attempt) => {
                Some(attempt)
            }
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connecting(_) => "connecting",
            Phase::Open(_) => "open",
            Phase::ClosingForced(_) => "closing",
            Phase::Reconnecting { .. } => "reconnecting",
            Phase::Exhausted => "exhausted",
            Phase::Closed => "closed",
        }
    }
}

/// What a fired timer token refers to.
enum Expired {
    Backoff,
    ConnectTimeout,
    Stale,
}

/// A socket that transparently reconnects with exponential backoff.
///
/// The socket is a plain state machine: it never blocks and never spawns.
/// It calls out to a [`TransportFactory`] and a [`Timer`], and it is driven
/// by feeding transport signals into [`handle_signal`](Self::handle_signal)
/// and timer expiries into [`handle_timer`](Self::handle_timer), one at a
/// time. [`SocketHandle`](crate::SocketHandle) does that on a tokio task.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
/// use url::Url;
/// use reconnecting_socket::{
///     AttemptId, Payload, ReadyState, ReconnectingSocket, SignalSink, SocketConfig, Timer,
///     TimerToken, Transport, TransportError, TransportFactory, TransportSignal,
/// };
///
/// struct Loopback;
///
/// impl Transport for Loopback {
///     fn send(&mut self, _payload: Payload) -> Result<(), TransportError> {
///         Ok(())
///     }
///     fn close(&mut self, _code: Option<u16>, _reason: Option<&str>) {}
///     fn ready_state(&self) -> ReadyState {
///         ReadyState::Connecting
///     }
/// }
///
/// struct LoopbackFactory;
///
/// impl TransportFactory for LoopbackFactory {
///     type Transport = Loopback;
///
///     fn connect(
///         &mut self,
///         _url: &Url,
///         _protocols: &[String],
///         signals: SignalSink,
///     ) -> Result<Loopback, TransportError> {
///         signals.opened(None);
///         Ok(Loopback)
///     }
/// }
///
/// struct NoTimer(u64);
///
/// impl Timer for NoTimer {
///     fn schedule(&mut self, _delay: Duration) -> TimerToken {
///         self.0 += 1;
///         TimerToken::new(self.0)
///     }
///     fn cancel(&mut self, _token: TimerToken) {}
/// }
///
/// let queue = Arc::new(Mutex::new(Vec::new()));
/// let q = Arc::clone(&queue);
/// let mut socket = ReconnectingSocket::new(
///     "ws://localhost:9000",
///     Vec::new(),
///     SocketConfig::default(),
///     LoopbackFactory,
///     NoTimer(0),
///     Arc::new(move |attempt: AttemptId, signal: TransportSignal| {
///         q.lock().unwrap().push((attempt, signal));
///     }),
/// );
///
/// let pending: Vec<_> = queue.lock().unwrap().drain(..).collect();
/// for (attempt, signal) in pending {
///     socket.handle_signal(attempt, signal);
/// }
/// assert_eq!(socket.ready_state(), ReadyState::Open);
/// ```
pub struct ReconnectingSocket<F, T>
where
    F: TransportFactory,
    T: Timer,
{
    url: UrlSource,
    protocols: Vec<String>,
    config: SocketConfig,
    factory: F,
    timer: T,
    router: SignalRouter,
    phase: Phase<F::Transport>,
    protocol: Option<String>,
    reconnect_attempts: u32,
    next_attempt: u64,
}

impl<F, T> ReconnectingSocket<F, T>
where
    F: TransportFactory,
    T: Timer,
{
    /// Creates a socket, connecting immediately if `automatic_open` is set.
    ///
    /// `router` is how transports created by `factory` report back; it must
    /// queue signals for later delivery through
    /// [`handle_signal`](Self::handle_signal).
    pub fn new(
        url: impl Into<UrlSource>,
        protocols: Vec<String>,
        config: SocketConfig,
        factory: F,
        timer: T,
        router: SignalRouter,
    ) -> Self {
        let automatic_open = config.automatic_open;
        let mut socket = Self {
            url: url.into(),
            protocols,
            config,
            factory,
            timer,
            router,
            phase: Phase::Idle,
            protocol: None,
            reconnect_attempts: 0,
            next_attempt: 0,
        };

        socket.record_ready_state(socket.ready_state());
        if automatic_open {
            socket.open();
        }
        socket
    }

    /// Returns the current ready state.
    pub fn ready_state(&self) -> ReadyState {
        match &self.phase {
            Phase::Idle | Phase::Connecting(_) | Phase::Reconnecting { .. } | Phase::Exhausted => {
                ReadyState::Connecting
            }
            Phase::Open(_) => ReadyState::Open,
            Phase::ClosingForced(_) => ReadyState::Closing,
            Phase::Closed => ReadyState::Closed,
        }
    }

    /// Returns the sub-protocol selected by the peer on the last open.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Returns the number of reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Resolves the URL the next attempt will connect to.
    pub fn url(&self) -> Result<Url, SocketError> {
        self.url.resolve()
    }

    /// Returns the requested sub-protocols.
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Returns the configuration for modification.
    ///
    /// Changes apply from the next connection attempt on.
    pub fn config_mut(&mut self) -> &mut SocketConfig {
        &mut self.config
    }

    /// Returns `true` once the socket was closed explicitly.
    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    /// Returns `true` after the reconnect attempt limit stopped retries.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.phase, Phase::Exhausted)
    }

    /// Subscribes to socket events.
    pub fn subscribe<L>(&mut self, listener: L) -> ListenerId
    where
        L: EventListener<SocketEvent> + 'static,
    {
        self.config.event_listeners.add(listener)
    }

    /// Subscribes an already shared listener.
    pub fn subscribe_shared(&mut self, listener: BoxedEventListener<SocketEvent>) -> ListenerId {
        self.config.event_listeners.add_shared(listener)
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.config.event_listeners.remove(id)
    }

    /// Opens the socket.
    ///
    /// Resets the reconnect counter and clears an earlier explicit close. If
    /// a connection is still live it is closed first and a fresh one is
    /// established through the regular reconnect path.
    pub fn open(&mut self) {
        let before = self.ready_state();
        self.open_attempt(false);
        self.note_transition(before);
    }

    /// Sends a payload over the current connection.
    ///
    /// Fails with [`SocketError::InvalidState`] when no raw connection
    /// exists. Nothing is ever queued.
    pub fn send(&mut self, payload: impl Into<Payload>) -> Result<(), SocketError> {
        let state = self.ready_state();
        match self.phase.attempt_mut() {
            Some(attempt) => attempt.transport.send(payload.into()).map_err(SocketError::from),
            None => Err(SocketError::InvalidState { state }),
        }
    }

    /// Closes the socket for good.
    ///
    /// `code` defaults to 1000 (normal closure). No reconnect is attempted
    /// after this. Calling it again is a no-op.
    pub fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        let before = self.ready_state();
        let code = code.unwrap_or(CloseInfo::NORMAL_CLOSURE);

        match mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Connecting(mut attempt) | Phase::Open(mut attempt) => {
                self.cancel_timeout(&mut attempt);
                attempt.close_cause = Some(CloseCause::Forced);
                attempt.forced_close =
                    Some(CloseInfo::new(code, reason.unwrap_or_default(), true));
                attempt.request_close(Some(code), reason);
                self.phase = Phase::ClosingForced(attempt);
            }
            Phase::ClosingForced(attempt) => {
                self.phase = Phase::ClosingForced(attempt);
            }
            Phase::Reconnecting { timer } => {
                self.timer.cancel(timer);
                self.emit(SocketEvent::close(
                    &self.config.name,
                    CloseInfo::new(code, reason.unwrap_or_default(), true),
                ));
            }
            Phase::Idle | Phase::Exhausted => {
                self.emit(SocketEvent::close(
                    &self.config.name,
                    CloseInfo::new(code, reason.unwrap_or_default(), true),
                ));
            }
            Phase::Closed => {}
        }

        self.note_transition(before);
    }

    /// Closes with a normal closure code and no reason.
    pub fn close_normal(&mut self) {
        self.close(None, None);
    }

    /// Drops the current connection and transparently establishes a new one.
    ///
    /// Useful when the connection is suspected to be stale. Does nothing when
    /// no live connection exists.
    pub fn refresh(&mut self) {
        let debug = self.debug_enabled();
        if let Phase::Connecting(attempt) | Phase::Open(attempt) = &mut self.phase {
            if attempt.transport.ready_state().is_live() {
                debug_log!(debug, attempt = %attempt.id, "refreshing connection");
                attempt.close_cause.get_or_insert(CloseCause::Recycle);
                attempt.transport.close(None, None);
            }
        }
    }

    /// Feeds a signal reported by a transport.
    ///
    /// Signals from attempts that were already replaced are ignored.
    pub fn handle_signal(&mut self, attempt: AttemptId, signal: TransportSignal) {
        if self.phase.attempt().map(|current| current.id) != Some(attempt) {
            debug_log!(
                self.debug_enabled(),
                attempt = %attempt,
                signal = ?signal,
                "ignoring signal from a replaced connection"
            );
            return;
        }

        let before = self.ready_state();
        match signal {
            TransportSignal::Opened { protocol } => self.on_opened(protocol),
            TransportSignal::Message(data) => {
                #[cfg(feature = "metrics")]
                counter!("socket_messages_received_total", "socket" => self.config.name.clone())
                    .increment(1);

                debug_log!(self.debug_enabled(), bytes = data.len(), "message received");
                self.emit(SocketEvent::message(&self.config.name, data));
            }
            TransportSignal::Error => {
                debug_log!(self.debug_enabled(), attempt = %attempt, "transport error");
                self.emit(SocketEvent::error(&self.config.name));
            }
            TransportSignal::Closed(info) => self.on_closed(info),
        }
        self.note_transition(before);
    }

    /// Feeds the expiry of a timer scheduled through the socket's [`Timer`].
    ///
    /// Tokens that were cancelled or belong to an earlier attempt are ignored.
    pub fn handle_timer(&mut self, token: TimerToken) {
        let expired = match &self.phase {
            Phase::Reconnecting { timer } if *timer == token => Expired::Backoff,
            Phase::Connecting(attempt) if attempt.timeout == Some(token) => {
                Expired::ConnectTimeout
            }
            _ => Expired::Stale,
        };

        let before = self.ready_state();
        match expired {
            Expired::Backoff => {
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);

                #[cfg(feature = "metrics")]
                counter!("socket_reconnects_total", "socket" => self.config.name.clone())
                    .increment(1);

                self.open_attempt(true);
            }
            Expired::ConnectTimeout => self.on_connect_timeout(),
            Expired::Stale => {
                debug_log!(
                    self.debug_enabled(),
                    token = token.as_u64(),
                    phase = self.phase.name(),
                    "ignoring stale timer"
                );
            }
        }
        self.note_transition(before);
    }

    fn open_attempt(&mut self, is_reconnect: bool) {
        let previous = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Reconnecting { timer } => {
                self.timer.cancel(timer);
                None
            }
            Phase::Connecting(attempt) | Phase::ClosingForced(attempt) => Some((attempt, false)),
            Phase::Open(attempt) => Some((attempt, true)),
            Phase::Idle | Phase::Exhausted | Phase::Closed => None,
        };

        if let Some((mut attempt, was_open)) = previous {
            self.cancel_timeout(&mut attempt);

            if attempt.transport.ready_state() != ReadyState::Closed {
                // The close signal of this connection drives the next attempt.
                debug_log!(
                    self.debug_enabled(),
                    attempt = %attempt.id,
                    "closing live connection before opening a new one"
                );
                attempt.request_close(None, None);
                if attempt.close_cause != Some(CloseCause::Timeout) {
                    attempt.close_cause = Some(CloseCause::Recycle);
                }
                self.phase = if was_open {
                    Phase::Open(attempt)
                } else {
                    Phase::Connecting(attempt)
                };
                return;
            }

            // The transport is gone but its close signal is now stale, so the
            // forced close has to be announced here.
            if attempt.close_cause == Some(CloseCause::Forced) {
                let info = attempt.forced_close.take().unwrap_or_else(CloseInfo::normal);
                self.emit(SocketEvent::close(&self.config.name, info));
            }
        }

        if is_reconnect {
            if let Some(max) = self.config.max_reconnect_attempts {
                if self.reconnect_attempts > max {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        socket = %self.config.name,
                        attempts = self.reconnect_attempts,
                        max,
                        "reconnect attempts exhausted"
                    );

                    self.phase = Phase::Exhausted;
                    self.emit(SocketEvent::exhausted(
                        &self.config.name,
                        self.reconnect_attempts,
                    ));
                    return;
                }
            }
        } else {
            self.emit(SocketEvent::connecting(&self.config.name, None));
            self.reconnect_attempts = 0;
        }

        self.connect(is_reconnect);
    }

    fn connect(&mut self, is_reconnect: bool) {
        let id = AttemptId::new(self.next_attempt);
        self.next_attempt += 1;

        #[cfg(feature = "metrics")]
        counter!("socket_connect_attempts_total", "socket" => self.config.name.clone())
            .increment(1);

        let debug = self.debug_enabled();
        let sink = SignalSink::new(id, Arc::clone(&self.router));
        let connected = match self.url.resolve() {
            Ok(url) => {
                debug_log!(
                    debug,
                    attempt = %id,
                    url = %url,
                    reconnect = is_reconnect,
                    "connecting"
                );
                self.factory
                    .connect(&url, &self.protocols, sink)
                    .map_err(SocketError::from)
            }
            Err(error) => Err(error),
        };

        match connected {
            Ok(mut transport) => {
                transport.set_binary_type(self.config.binary_type);
                let timeout = self.timer.schedule(self.config.connect_timeout);
                self.phase = Phase::Connecting(Attempt {
                    id,
                    transport,
                    is_reconnect,
                    close_cause: None,
                    forced_close: None,
                    timeout: Some(timeout),
                });
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    socket = %self.config.name,
                    attempt = %id,
                    error = %error,
                    "connection attempt failed"
                );

                self.emit(SocketEvent::error(&self.config.name));
                self.schedule_reconnect(
                    is_reconnect,
                    None,
                    CloseInfo::abnormal(error.to_string()),
                );
            }
        }
    }

    fn on_opened(&mut self, protocol: Option<String>) {
        let mut attempt = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(attempt) if attempt.close_cause.is_none() => attempt,
            other => {
                // Already being torn down; its close signal is on the way.
                self.phase = other;
                return;
            }
        };

        self.cancel_timeout(&mut attempt);
        self.protocol = protocol;
        self.reconnect_attempts = 0;

        let is_reconnect = attempt.is_reconnect;
        attempt.is_reconnect = false;
        self.phase = Phase::Open(attempt);

        self.emit(SocketEvent::open(&self.config.name, is_reconnect));
    }

    fn on_closed(&mut self, info: CloseInfo) {
        let mut attempt = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(attempt) | Phase::Open(attempt) | Phase::ClosingForced(attempt) => {
                attempt
            }
            other => {
                self.phase = other;
                return;
            }
        };
        self.cancel_timeout(&mut attempt);
        let is_reconnect = attempt.is_reconnect;
        let close_cause = attempt.close_cause;
        drop(attempt);

        if close_cause == Some(CloseCause::Forced) {
            self.phase = Phase::Closed;
            self.emit(SocketEvent::close(&self.config.name, info));
            return;
        }

        self.schedule_reconnect(is_reconnect, close_cause, info);
    }

    /// Unintended-disconnect path: announce the reconnect, then back off.
    fn schedule_reconnect(
        &mut self,
        is_reconnect: bool,
        close_cause: Option<CloseCause>,
        info: CloseInfo,
    ) {
        let delay = self
            .config
            .backoff
            .delay_for_attempt(self.reconnect_attempts);
        let timer = self.timer.schedule(delay);
        self.phase = Phase::Reconnecting { timer };

        #[cfg(feature = "tracing")]
        tracing::info!(
            socket = %self.config.name,
            code = info.code,
            reason = %info.reason,
            attempts = self.reconnect_attempts,
            delay = ?delay,
            "connection lost, reconnect scheduled"
        );

        self.emit(SocketEvent::connecting(&self.config.name, Some(info.clone())));

        // A failed reconnect attempt or a timed out one is not a fresh loss.
        if !is_reconnect && close_cause != Some(CloseCause::Timeout) {
            self.emit(SocketEvent::close(&self.config.name, info));
        }
    }

    fn on_connect_timeout(&mut self) {
        let Phase::Connecting(attempt) = &mut self.phase else {
            return;
        };
        attempt.timeout = None;
        attempt.close_cause = Some(CloseCause::Timeout);
        attempt.request_close(None, None);

        #[cfg(feature = "metrics")]
        counter!("socket_connect_timeouts_total", "socket" => self.config.name.clone())
            .increment(1);

        #[cfg(feature = "tracing")]
        tracing::warn!(
            socket = %self.config.name,
            attempt = %attempt.id,
            timeout = ?self.config.connect_timeout,
            "connection attempt timed out"
        );
    }

    fn cancel_timeout(&mut self, attempt: &mut Attempt<F::Transport>) {
        if let Some(token) = attempt.timeout.take() {
            self.timer.cancel(token);
        }
    }

    fn emit(&self, event: SocketEvent) {
        self.config.event_listeners.emit(&event);
    }

    fn debug_enabled(&self) -> bool {
        debug_enabled(self.config.debug)
    }

    fn note_transition(&self, before: ReadyState) {
        let after = self.ready_state();
        if before == after {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            socket = %self.config.name,
            from = %before,
            to = %after,
            phase = self.phase.name(),
            "socket state transition"
        );

        self.record_ready_state(after);
    }

    fn record_ready_state(&self, state: ReadyState) {
        #[cfg(feature = "metrics")]
        gauge!("socket_ready_state", "socket" => self.config.name.clone())
            .set(f64::from(state.as_u8()));

        #[cfg(not(feature = "metrics"))]
        let _ = state;
    }
}

impl<F, T> Drop for ReconnectingSocket<F, T>
where
    F: TransportFactory,
    T: Timer,
{
    fn drop(&mut self) {
        if let Phase::Reconnecting { timer } = self.phase {
            self.timer.cancel(timer);
        }
        if let Some(attempt) = self.phase.attempt_mut() {
            if let Some(token) = attempt.timeout.take() {
                self.timer.cancel(token);
            }
            attempt.request_close(Some(CloseInfo::NORMAL_CLOSURE), None);
        }
    }
}

impl<F, T> fmt::Debug for ReconnectingSocket<F, T>
where
    F: TransportFactory,
    T: Timer,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingSocket")
            .field("url", &self.url)
            .field("protocols", &self.protocols)
            .field("phase", &self.phase.name())
            .field("ready_state", &self.ready_state())
            .field("protocol", &self.protocol)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish()
    }
}
