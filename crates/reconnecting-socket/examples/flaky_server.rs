//! Reconnecting socket against a flaky in-memory server.
//!
//! The server refuses every other connection attempt and resets each
//! connection after a few messages, so the socket keeps walking through
//! its reconnect cycle while the caller just sends.
//!
//! Run with: cargo run --example flaky_server -p reconnecting-socket

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reconnecting_socket::{
    CloseInfo, Payload, ReadyState, SignalSink, SocketConfig, SocketHandle, Transport,
    TransportError, TransportFactory,
};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use url::Url;

/// Messages a connection echoes before the server resets it.
const MESSAGES_PER_CONNECTION: usize = 3;

struct FlakyServer {
    connects: Arc<AtomicUsize>,
}

struct FlakyConnection {
    outbound: mpsc::UnboundedSender<Payload>,
    state: Arc<Mutex<ReadyState>>,
    sink: SignalSink,
    peer: AbortHandle,
}

impl TransportFactory for FlakyServer {
    type Transport = FlakyConnection;

    fn connect(
        &mut self,
        url: &Url,
        _protocols: &[String],
        signals: SignalSink,
    ) -> Result<FlakyConnection, TransportError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        println!("  [server] connection #{} to {}", n + 1, url);

        let (outbound, mut inbound) = mpsc::unbounded_channel::<Payload>();
        let state = Arc::new(Mutex::new(ReadyState::Connecting));

        let sink = signals.clone();
        let peer_state = Arc::clone(&state);
        let peer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if n % 2 == 1 {
                set(&peer_state, ReadyState::Closed);
                sink.closed(CloseInfo::abnormal("refused"));
                return;
            }

            set(&peer_state, ReadyState::Open);
            sink.opened(None);

            let mut echoed = 0;
            while let Some(payload) = inbound.recv().await {
                sink.message(payload);
                echoed += 1;
                if echoed == MESSAGES_PER_CONNECTION {
                    set(&peer_state, ReadyState::Closed);
                    sink.closed(CloseInfo::abnormal("connection reset"));
                    return;
                }
            }
        });

        Ok(FlakyConnection {
            outbound,
            state,
            sink: signals,
            peer: peer.abort_handle(),
        })
    }
}

fn set(state: &Mutex<ReadyState>, next: ReadyState) {
    if let Ok(mut state) = state.lock() {
        *state = next;
    }
}

impl FlakyConnection {
    fn current(&self) -> ReadyState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(ReadyState::Closed)
    }
}

impl Transport for FlakyConnection {
    fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        if self.current() != ReadyState::Open {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::NotConnected)
    }

    fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        if !self.current().is_live() {
            return;
        }
        set(&self.state, ReadyState::Closed);
        self.peer.abort();
        self.sink.closed(CloseInfo::new(
            code.unwrap_or(CloseInfo::NORMAL_CLOSURE),
            reason.unwrap_or_default(),
            true,
        ));
    }

    fn ready_state(&self) -> ReadyState {
        self.current()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Reconnecting Socket - Flaky Server Example\n");

    let config = SocketConfig::builder()
        .name("flaky-feed")
        .debug(true)
        .reconnect_interval(Duration::from_millis(100))
        .reconnect_decay(2.0)
        .max_reconnect_interval(Duration::from_secs(1))
        .max_reconnect_attempts(5)
        .on_connecting(|close| match close {
            Some(info) => println!("  [socket] reconnecting after {} ({})", info.code, info.reason),
            None => println!("  [socket] connecting"),
        })
        .on_open(|is_reconnect| println!("  [socket] open (reconnect: {})", is_reconnect))
        .on_message(|data| println!("  [socket] received {:?}", data))
        .on_close(|info| println!("  [socket] closed with {} clean={}", info.code, info.was_clean))
        .on_exhausted(|attempts| println!("  [socket] gave up after {} attempts", attempts))
        .build();

    let connects = Arc::new(AtomicUsize::new(0));
    let socket = SocketHandle::spawn(
        "ws://flaky.example/feed",
        vec!["echo".to_string()],
        config,
        FlakyServer {
            connects: Arc::clone(&connects),
        },
    );

    let mut sent = 0;
    while sent < 10 {
        socket
            .wait_for(|status| status.ready_state == ReadyState::Open)
            .await?;
        match socket.send(format!("message-{}", sent)).await {
            Ok(()) => sent += 1,
            Err(e) => println!("  [client] send failed: {}", e),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    socket.close(None, Some("done"))?;
    let status = socket
        .wait_for(|status| status.ready_state == ReadyState::Closed)
        .await?;

    println!("\nSummary");
    println!("  Messages sent: {}", sent);
    println!("  Connections made: {}", connects.load(Ordering::SeqCst));
    println!("  Final state: {:?}", status.ready_state);

    Ok(())
}
