//! Deterministic doubles for driving a socket by hand.
//!
//! `ManualTimer` only fires when a test advances its clock, and the mock
//! transport queues every signal instead of delivering it, so tests decide
//! exactly when each input reaches the socket.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reconnecting_socket::{
    AttemptId, BinaryType, CloseInfo, Payload, ReadyState, ReconnectingSocket, SignalSink,
    SocketConfigBuilder, SocketEvent, Timer, TimerToken, Transport, TransportError,
    TransportFactory, TransportSignal,
};
use url::Url;

pub const URL: &str = "ws://example.test/feed";

/// Simplified view of a `SocketEvent` for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connecting(Option<u16>),
    Open(bool),
    Message(Payload),
    Error,
    Close(u16),
    Exhausted(u32),
}

impl From<&SocketEvent> for Seen {
    fn from(event: &SocketEvent) -> Self {
        match event {
            SocketEvent::Connecting { close, .. } => {
                Seen::Connecting(close.as_ref().map(|info| info.code))
            }
            SocketEvent::Open { is_reconnect, .. } => Seen::Open(*is_reconnect),
            SocketEvent::Message { data, .. } => Seen::Message(data.clone()),
            SocketEvent::Error { .. } => Seen::Error,
            SocketEvent::Close { info, .. } => Seen::Close(info.code),
            SocketEvent::Exhausted { attempts, .. } => Seen::Exhausted(*attempts),
        }
    }
}

#[derive(Default)]
struct TimerState {
    now: Duration,
    next_id: u64,
    pending: Vec<(Duration, TimerToken)>,
    history: Vec<Duration>,
}

/// Timer whose clock only moves when a test says so.
#[derive(Clone, Default)]
pub struct ManualTimer {
    inner: Arc<Mutex<TimerState>>,
}

impl ManualTimer {
    pub fn now(&self) -> Duration {
        self.inner.lock().unwrap().now
    }

    /// Number of timers scheduled and neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn pending_tokens(&self) -> Vec<TimerToken> {
        let state = self.inner.lock().unwrap();
        state.pending.iter().map(|(_, token)| *token).collect()
    }

    /// Every delay ever scheduled, in order.
    pub fn history(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().history.clone()
    }

    /// Removes the earliest timer due at or before `deadline` and moves the
    /// clock to its expiry.
    fn pop_due(&self, deadline: Duration) -> Option<TimerToken> {
        let mut state = self.inner.lock().unwrap();
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (due, _))| *due <= deadline)
            .min_by_key(|(_, (due, token))| (*due, *token))
            .map(|(index, _)| index)?;
        let (due, token) = state.pending.remove(index);
        state.now = due;
        Some(token)
    }

    fn set_now(&self, now: Duration) {
        self.inner.lock().unwrap().now = now;
    }
}

impl Timer for ManualTimer {
    fn schedule(&mut self, delay: Duration) -> TimerToken {
        let mut state = self.inner.lock().unwrap();
        let token = TimerToken::new(state.next_id);
        state.next_id += 1;
        let due = state.now + delay;
        state.pending.push((due, token));
        state.history.push(delay);
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        let mut state = self.inner.lock().unwrap();
        state.pending.retain(|(_, pending)| *pending != token);
    }
}

/// What the next connection attempt does.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Opens right away, negotiating the given sub-protocol.
    Open(Option<&'static str>),
    /// `connect` itself fails.
    Refuse,
    /// The connection closes (1006) before it ever opens.
    Fail,
    /// Nothing happens until the test acts on the connection.
    Hang,
}

#[derive(Default)]
struct ConnState {
    ready_state: Option<ReadyState>,
    sent: Vec<Payload>,
    closes: Vec<(Option<u16>, Option<String>)>,
    binary_type: Option<BinaryType>,
    /// Close requests leave the connection in `Closing` until confirmed.
    linger: bool,
}

/// One raw connection as seen from the "server" side.
#[derive(Clone)]
pub struct Conn {
    pub attempt: AttemptId,
    pub url: Url,
    pub protocols: Vec<String>,
    /// Clock time at which the connection was requested.
    pub at: Duration,
    sink: SignalSink,
    state: Arc<Mutex<ConnState>>,
}

impl Conn {
    pub fn ready_state(&self) -> ReadyState {
        self.state
            .lock()
            .unwrap()
            .ready_state
            .unwrap_or(ReadyState::Connecting)
    }

    fn set_ready_state(&self, ready_state: ReadyState) {
        self.state.lock().unwrap().ready_state = Some(ready_state);
    }

    pub fn sent(&self) -> Vec<Payload> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Close requests issued by the socket, as `(code, reason)`.
    pub fn closes(&self) -> Vec<(Option<u16>, Option<String>)> {
        self.state.lock().unwrap().closes.clone()
    }

    pub fn binary_type(&self) -> Option<BinaryType> {
        self.state.lock().unwrap().binary_type
    }

    /// Makes later close requests wait for [`Conn::server_close`].
    pub fn linger_on_close(&self) {
        self.state.lock().unwrap().linger = true;
    }

    pub fn server_open(&self, protocol: Option<&str>) {
        self.set_ready_state(ReadyState::Open);
        self.sink.opened(protocol.map(str::to_string));
    }

    pub fn server_message(&self, payload: impl Into<Payload>) {
        self.sink.message(payload);
    }

    pub fn server_error(&self) {
        self.sink.error();
    }

    pub fn server_close(&self, info: CloseInfo) {
        self.set_ready_state(ReadyState::Closed);
        self.sink.closed(info);
    }
}

pub struct MockTransport {
    conn: Conn,
}

impl Transport for MockTransport {
    fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        if self.conn.ready_state() != ReadyState::Open {
            return Err(TransportError::NotConnected);
        }
        self.conn.state.lock().unwrap().sent.push(payload);
        Ok(())
    }

    fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        let was = self.conn.ready_state();
        self.conn
            .state
            .lock()
            .unwrap()
            .closes
            .push((code, reason.map(str::to_string)));

        if !was.is_live() {
            return;
        }
        if self.conn.state.lock().unwrap().linger {
            self.conn.set_ready_state(ReadyState::Closing);
            return;
        }
        let info = if was == ReadyState::Open {
            CloseInfo::new(
                code.unwrap_or(CloseInfo::NORMAL_CLOSURE),
                reason.unwrap_or_default(),
                true,
            )
        } else {
            CloseInfo::abnormal("")
        };
        self.conn.server_close(info);
    }

    fn ready_state(&self) -> ReadyState {
        self.conn.ready_state()
    }

    fn set_binary_type(&mut self, binary_type: BinaryType) {
        self.conn.state.lock().unwrap().binary_type = Some(binary_type);
    }
}

pub type Connections = Arc<Mutex<Vec<Conn>>>;

pub struct MockFactory {
    script: VecDeque<Behavior>,
    fallback: Behavior,
    clock: ManualTimer,
    connections: Connections,
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn connect(
        &mut self,
        url: &Url,
        protocols: &[String],
        signals: SignalSink,
    ) -> Result<MockTransport, TransportError> {
        let behavior = self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let conn = Conn {
            attempt: signals.attempt(),
            url: url.clone(),
            protocols: protocols.to_vec(),
            at: self.clock.now(),
            sink: signals,
            state: Arc::new(Mutex::new(ConnState::default())),
        };
        self.connections.lock().unwrap().push(conn.clone());

        match behavior {
            Behavior::Open(protocol) => conn.server_open(protocol),
            Behavior::Refuse => {
                conn.set_ready_state(ReadyState::Closed);
                return Err(TransportError::Rejected("connection refused".to_string()));
            }
            Behavior::Fail => conn.server_close(CloseInfo::abnormal("")),
            Behavior::Hang => {}
        }
        Ok(MockTransport { conn })
    }
}

type Queue = Arc<Mutex<VecDeque<(AttemptId, TransportSignal)>>>;

/// A socket wired to the doubles above.
pub struct Harness {
    pub socket: ReconnectingSocket<MockFactory, ManualTimer>,
    pub timer: ManualTimer,
    queue: Queue,
    connections: Connections,
    events: Arc<Mutex<Vec<Seen>>>,
}

impl Harness {
    /// Builds a socket on [`URL`] with the `chat` sub-protocol requested.
    ///
    /// Attempts follow `script`, then `fallback` forever. Signals queued
    /// during construction are delivered before this returns.
    pub fn new(
        builder: SocketConfigBuilder,
        script: impl IntoIterator<Item = Behavior>,
        fallback: Behavior,
    ) -> Self {
        Self::with_url(URL, builder, script, fallback)
    }

    pub fn with_url(
        url: impl Into<reconnecting_socket::UrlSource>,
        builder: SocketConfigBuilder,
        script: impl IntoIterator<Item = Behavior>,
        fallback: Behavior,
    ) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        let config = builder
            .on_event(move |event: &SocketEvent| {
                e.lock().unwrap().push(Seen::from(event));
            })
            .build();

        let queue: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let q = Arc::clone(&queue);
        let timer = ManualTimer::default();
        let connections: Connections = Arc::new(Mutex::new(Vec::new()));

        let factory = MockFactory {
            script: script.into_iter().collect(),
            fallback,
            clock: timer.clone(),
            connections: Arc::clone(&connections),
        };

        let socket = ReconnectingSocket::new(
            url,
            vec!["chat".to_string()],
            config,
            factory,
            timer.clone(),
            Arc::new(move |attempt: AttemptId, signal: TransportSignal| {
                q.lock().unwrap().push_back((attempt, signal));
            }),
        );

        let mut harness = Self {
            socket,
            timer,
            queue,
            connections,
            events,
        };
        harness.pump();
        harness
    }

    /// Delivers every queued signal.
    pub fn pump(&mut self) {
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some((attempt, signal)) => self.socket.handle_signal(attempt, signal),
                None => break,
            }
        }
    }

    /// Moves the clock forward, firing due timers in order and delivering
    /// the signals each of them causes.
    pub fn advance(&mut self, by: Duration) {
        let target = self.timer.now() + by;
        while let Some(token) = self.timer.pop_due(target) {
            self.socket.handle_timer(token);
            self.pump();
        }
        self.timer.set_now(target);
    }

    /// Advances in large steps until nothing is scheduled any more.
    pub fn settle(&mut self) {
        for _ in 0..1000 {
            if self.timer.pending() == 0 {
                return;
            }
            self.advance(Duration::from_secs(60));
        }
    }

    pub fn connections(&self) -> Vec<Conn> {
        self.connections.lock().unwrap().clone()
    }

    pub fn conn(&self, index: usize) -> Conn {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn last_conn(&self) -> Conn {
        self.connections
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection was created")
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Drains the events recorded so far.
    pub fn take_events(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn events(&self) -> Vec<Seen> {
        self.events.lock().unwrap().clone()
    }
}
