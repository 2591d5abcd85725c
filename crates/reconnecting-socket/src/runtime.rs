//! Runs a [`ReconnectingSocket`] on a tokio task.

use std::sync::Arc;

use reconnecting_socket_core::events::{EventListener, ListenerId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::SocketConfig;
use crate::endpoint::UrlSource;
use crate::error::SocketError;
use crate::events::SocketEvent;
use crate::socket::ReconnectingSocket;
use crate::state::ReadyState;
use crate::timer::{TimerToken, TokioTimer};
use crate::transport::{AttemptId, Payload, SignalRouter, TransportFactory, TransportSignal};

/// Snapshot of a driven socket, published after every input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketStatus {
    /// Current ready state.
    pub ready_state: ReadyState,
    /// Sub-protocol negotiated on the last open.
    pub protocol: Option<String>,
    /// Reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Whether the reconnect attempt limit stopped retries.
    pub exhausted: bool,
}

impl SocketStatus {
    fn of<F: TransportFactory>(socket: &ReconnectingSocket<F, TokioTimer>) -> Self {
        Self {
            ready_state: socket.ready_state(),
            protocol: socket.protocol().map(str::to_string),
            reconnect_attempts: socket.reconnect_attempts(),
            exhausted: socket.is_exhausted(),
        }
    }
}

/// Signals and timer expiries coming back from the environment.
enum Input {
    Signal(AttemptId, TransportSignal),
    Timer(TimerToken),
}

enum Command {
    Open,
    Send(Payload, oneshot::Sender<Result<(), SocketError>>),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
    Refresh,
    Subscribe(
        Arc<dyn EventListener<SocketEvent>>,
        oneshot::Sender<ListenerId>,
    ),
    Unsubscribe(ListenerId, oneshot::Sender<bool>),
}

/// Handle to a socket running on a tokio task.
///
/// Handles are cheap to clone. The socket is force-closed once the last
/// handle is dropped.
///
/// # Examples
///
/// ```no_run
/// # use reconnecting_socket::{SocketConfig, SocketHandle, TransportFactory};
/// # async fn run<F: TransportFactory + 'static>(factory: F) -> Result<(), reconnecting_socket::SocketError> {
/// let socket = SocketHandle::spawn(
///     "wss://example.com/feed",
///     vec!["v1.feed".to_string()],
///     SocketConfig::builder().name("feed").build(),
///     factory,
/// );
///
/// socket.wait_for(|status| status.ready_state.is_live()).await?;
/// socket.send("subscribe:btc").await?;
/// socket.close(None, Some("done"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SocketHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SocketStatus>,
}

impl SocketHandle {
    /// Creates the socket and spawns the task driving it.
    ///
    /// Must be called from within a tokio runtime. With `automatic_open`
    /// set, the first connection attempt starts before this returns.
    pub fn spawn<F>(
        url: impl Into<UrlSource>,
        protocols: Vec<String>,
        config: SocketConfig,
        factory: F,
    ) -> Self
    where
        F: TransportFactory + 'static,
    {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let signals = input_tx.clone();
        let router: SignalRouter = Arc::new(move |attempt: AttemptId, signal: TransportSignal| {
            let _ = signals.send(Input::Signal(attempt, signal));
        });
        let timer = TokioTimer::new(Arc::new(move |token: TimerToken| {
            let _ = input_tx.send(Input::Timer(token));
        }));

        let socket = ReconnectingSocket::new(url, protocols, config, factory, timer, router);
        let (status_tx, status_rx) = watch::channel(SocketStatus::of(&socket));

        tokio::spawn(drive(socket, input_rx, command_rx, status_tx));

        Self {
            commands: command_tx,
            status: status_rx,
        }
    }

    /// Opens the socket, or restarts it after a close or exhausted retries.
    pub fn open(&self) -> Result<(), SocketError> {
        self.command(Command::Open)
    }

    /// Sends a payload over the current connection.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), SocketError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Send(payload.into(), tx))?;
        rx.await.map_err(|_| SocketError::Shutdown)?
    }

    /// Closes the socket; no reconnect follows.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<(), SocketError> {
        self.command(Command::Close {
            code,
            reason: reason.map(str::to_string),
        })
    }

    /// Replaces the current connection with a fresh one.
    pub fn refresh(&self) -> Result<(), SocketError> {
        self.command(Command::Refresh)
    }

    /// Subscribes to socket events.
    pub async fn subscribe<L>(&self, listener: L) -> Result<ListenerId, SocketError>
    where
        L: EventListener<SocketEvent> + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Subscribe(Arc::new(listener), tx))?;
        rx.await.map_err(|_| SocketError::Shutdown)
    }

    /// Removes a subscription.
    pub async fn unsubscribe(&self, id: ListenerId) -> Result<bool, SocketError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Unsubscribe(id, tx))?;
        rx.await.map_err(|_| SocketError::Shutdown)
    }

    /// Returns the latest status snapshot.
    pub fn status(&self) -> SocketStatus {
        self.status.borrow().clone()
    }

    /// Returns the latest ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.status.borrow().ready_state
    }

    /// Waits until the status satisfies `predicate`.
    pub async fn wait_for<P>(&self, mut predicate: P) -> Result<SocketStatus, SocketError>
    where
        P: FnMut(&SocketStatus) -> bool,
    {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(|current| predicate(current))
            .await
            .map_err(|_| SocketError::Shutdown)?;
        Ok(snapshot.clone())
    }

    /// Returns a receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<SocketStatus> {
        self.status.clone()
    }

    fn command(&self, command: Command) -> Result<(), SocketError> {
        self.commands
            .send(command)
            .map_err(|_| SocketError::Shutdown)
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

async fn drive<F>(
    mut socket: ReconnectingSocket<F, TokioTimer>,
    mut inputs: mpsc::UnboundedReceiver<Input>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<SocketStatus>,
) where
    F: TransportFactory,
{
    loop {
        tokio::select! {
            biased;

            Some(input) = inputs.recv() => apply_input(&mut socket, input),
            command = commands.recv() => match command {
                Some(command) => apply_command(&mut socket, command),
                None => break,
            },
        }
        publish(&status, &socket);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(socket = %socket.config().name(), "all handles dropped, closing");

    socket.close(None, None);
    publish(&status, &socket);

    // Give the transport a chance to confirm so listeners see the final close.
    let grace = socket.config().connect_timeout();
    let _ = tokio::time::timeout(grace, async {
        while !socket.is_terminated() {
            match inputs.recv().await {
                Some(input) => apply_input(&mut socket, input),
                None => break,
            }
            publish(&status, &socket);
        }
    })
    .await;
}

fn apply_input<F: TransportFactory>(socket: &mut ReconnectingSocket<F, TokioTimer>, input: Input) {
    match input {
        Input::Signal(attempt, signal) => socket.handle_signal(attempt, signal),
        Input::Timer(token) => socket.handle_timer(token),
    }
}

fn apply_command<F: TransportFactory>(
    socket: &mut ReconnectingSocket<F, TokioTimer>,
    command: Command,
) {
    match command {
        Command::Open => socket.open(),
        Command::Send(payload, reply) => {
            let _ = reply.send(socket.send(payload));
        }
        Command::Close { code, reason } => socket.close(code, reason.as_deref()),
        Command::Refresh => socket.refresh(),
        Command::Subscribe(listener, reply) => {
            let _ = reply.send(socket.subscribe_shared(listener));
        }
        Command::Unsubscribe(id, reply) => {
            let _ = reply.send(socket.unsubscribe(id));
        }
    }
}

fn publish<F: TransportFactory>(
    status: &watch::Sender<SocketStatus>,
    socket: &ReconnectingSocket<F, TokioTimer>,
) {
    let next = SocketStatus::of(socket);
    status.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}
