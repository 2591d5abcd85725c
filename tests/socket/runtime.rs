//! Tests for the tokio driver against an in-memory network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reconnecting_socket::{
    CloseInfo, Payload, ReadyState, SignalSink, SocketConfig, SocketConfigBuilder, SocketEvent,
    SocketHandle, Transport, TransportError, TransportFactory,
};
use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;
use url::Url;

/// Shared switches for every connection made through a [`NetworkFactory`].
#[derive(Clone, Default)]
struct Network {
    refusing: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    reset: Arc<Notify>,
}

struct NetworkFactory {
    network: Network,
}

struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Payload>,
    state: Arc<Mutex<ReadyState>>,
    sink: SignalSink,
    peer: AbortHandle,
}

impl TransportFactory for NetworkFactory {
    type Transport = ChannelTransport;

    fn connect(
        &mut self,
        _url: &Url,
        _protocols: &[String],
        signals: SignalSink,
    ) -> Result<ChannelTransport, TransportError> {
        self.network.connects.fetch_add(1, Ordering::SeqCst);

        let (outbound, mut inbound) = mpsc::unbounded_channel::<Payload>();
        let state = Arc::new(Mutex::new(ReadyState::Connecting));
        let refusing = self.network.refusing.load(Ordering::SeqCst);
        let reset = Arc::clone(&self.network.reset);

        let sink = signals.clone();
        let peer_state = Arc::clone(&state);
        let peer = tokio::spawn(async move {
            // Handshake latency.
            tokio::time::sleep(Duration::from_millis(10)).await;
            if refusing {
                *peer_state.lock().unwrap() = ReadyState::Closed;
                sink.closed(CloseInfo::abnormal("refused"));
                return;
            }

            *peer_state.lock().unwrap() = ReadyState::Open;
            sink.opened(None);

            loop {
                tokio::select! {
                    payload = inbound.recv() => match payload {
                        Some(payload) => sink.message(payload),
                        None => return,
                    },
                    _ = reset.notified() => {
                        *peer_state.lock().unwrap() = ReadyState::Closed;
                        sink.closed(CloseInfo::abnormal("connection reset"));
                        return;
                    }
                }
            }
        });

        Ok(ChannelTransport {
            outbound,
            state,
            sink: signals,
            peer: peer.abort_handle(),
        })
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        if *self.state.lock().unwrap() != ReadyState::Open {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::NotConnected)
    }

    fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if !state.is_live() {
            return;
        }
        *state = ReadyState::Closed;
        self.peer.abort();
        self.sink.closed(CloseInfo::new(
            code.unwrap_or(CloseInfo::NORMAL_CLOSURE),
            reason.unwrap_or_default(),
            true,
        ));
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }
}

fn recorded_config(builder: SocketConfigBuilder) -> (SocketConfig, Arc<Mutex<Vec<SocketEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&events);
    let config = builder
        .on_event(move |event: &SocketEvent| {
            e.lock().unwrap().push(event.clone());
        })
        .build();
    (config, events)
}

fn spawn(
    network: &Network,
    builder: SocketConfigBuilder,
) -> (SocketHandle, Arc<Mutex<Vec<SocketEvent>>>) {
    let (config, events) =
        recorded_config(builder.reconnect_interval(Duration::from_millis(100)));
    let handle = SocketHandle::spawn(
        "ws://in-memory.test/",
        Vec::new(),
        config,
        NetworkFactory {
            network: network.clone(),
        },
    );
    (handle, events)
}

fn opens(events: &Mutex<Vec<SocketEvent>>) -> Vec<bool> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            SocketEvent::Open { is_reconnect, .. } => Some(*is_reconnect),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn driver_reconnects_after_reset() {
    let network = Network::default();
    let (socket, events) = spawn(&network, SocketConfig::builder().name("reset"));

    socket
        .wait_for(|status| status.ready_state == ReadyState::Open)
        .await
        .unwrap();

    network.reset.notify_waiters();
    socket
        .wait_for(|status| status.ready_state == ReadyState::Connecting)
        .await
        .unwrap();
    let status = socket
        .wait_for(|status| status.ready_state == ReadyState::Open)
        .await
        .unwrap();

    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(network.connects.load(Ordering::SeqCst), 2);
    assert_eq!(opens(&events), vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn driver_echoes_messages() {
    let network = Network::default();
    let (socket, events) = spawn(&network, SocketConfig::builder());

    socket
        .wait_for(|status| status.ready_state == ReadyState::Open)
        .await
        .unwrap();
    socket.send("ping").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let messages: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            SocketEvent::Message { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec![Payload::from("ping")]);
}

#[tokio::test(start_paused = true)]
async fn driver_reports_exhaustion() {
    let network = Network::default();
    network.refusing.store(true, Ordering::SeqCst);
    let (socket, events) = spawn(&network, SocketConfig::builder().max_reconnect_attempts(2));

    let status = socket.wait_for(|status| status.exhausted).await.unwrap();

    assert_eq!(status.ready_state, ReadyState::Connecting);
    assert_eq!(status.reconnect_attempts, 3);
    assert_eq!(network.connects.load(Ordering::SeqCst), 3);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|event| matches!(event, SocketEvent::Exhausted { attempts: 3, .. })));

    // Reopening through the handle starts a fresh cycle.
    network.refusing.store(false, Ordering::SeqCst);
    socket.open().unwrap();
    socket
        .wait_for(|status| status.ready_state == ReadyState::Open)
        .await
        .unwrap();
    assert_eq!(opens(&events), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn close_from_any_clone_is_seen_by_all() {
    let network = Network::default();
    let (socket, events) = spawn(&network, SocketConfig::builder());
    let other = socket.clone();

    socket
        .wait_for(|status| status.ready_state == ReadyState::Open)
        .await
        .unwrap();

    other.close(Some(4000), Some("done")).unwrap();
    socket
        .wait_for(|status| status.ready_state == ReadyState::Closed)
        .await
        .unwrap();

    assert!(socket.send("late").await.unwrap_err().is_invalid_state());
    assert_eq!(network.connects.load(Ordering::SeqCst), 1);

    let last = events.lock().unwrap().last().cloned();
    match last {
        Some(SocketEvent::Close { info, .. }) => {
            assert_eq!(info, CloseInfo::new(4000, "done", true));
        }
        other => panic!("expected a close event, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn refresh_through_handle_swaps_the_connection() {
    let network = Network::default();
    let (socket, events) = spawn(&network, SocketConfig::builder());

    socket
        .wait_for(|status| status.ready_state == ReadyState::Open)
        .await
        .unwrap();
    socket.refresh().unwrap();
    socket
        .wait_for(|status| status.ready_state == ReadyState::Connecting)
        .await
        .unwrap();
    socket
        .wait_for(|status| status.ready_state == ReadyState::Open)
        .await
        .unwrap();

    assert_eq!(network.connects.load(Ordering::SeqCst), 2);
    assert_eq!(opens(&events), vec![false, true]);
}
