//! Outbound connection to the telemetry collector.
//!
//! One WebSocket, opened once. A single task owns the socket: it writes
//! queued records in submission order and reads control messages. Nothing
//! here ever returns an error to the caller; failures are logged and the
//! connection moves to the terminal `Failed` state.
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Connected
//!                             Connecting --error--> Failed
//!                             Connected  --error/close--> Failed
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use crate::config::MetricsConfig;
use crate::error::TransportError;
use crate::metrics::{DeliveryStats, DropReason, MetricsRecord};

/// Where finished records go. `send` must not block and must not fail.
pub trait RecordSink: Send + Sync + 'static {
    fn send(&self, record: MetricsRecord);

    /// Sinks without a connection report `None`.
    fn connection_state(&self) -> Option<ConnectionState> {
        None
    }

    /// Whether the collector has greeted us with `WELCOME`.
    fn is_authenticated(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Inbound control message from the collector.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
}

const WELCOME: &str = "WELCOME";

/// Cloneable handle to the collector connection.
#[derive(Clone)]
pub struct Transport {
    gateway_url: Arc<str>,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<MetricsRecord>,
    /// Handed to the connection task by the first `connect()`.
    pending: Arc<Mutex<Option<mpsc::Receiver<MetricsRecord>>>>,
}

/// State shared with the connection task.
struct Shared {
    state: watch::Sender<ConnectionState>,
    authenticated: AtomicBool,
    stats: Arc<DeliveryStats>,
}

impl Transport {
    pub fn new(config: &MetricsConfig, stats: Arc<DeliveryStats>) -> Self {
        let (outbound, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            gateway_url: Arc::from(config.gateway_url.as_str()),
            shared: Arc::new(Shared {
                state,
                authenticated: AtomicBool::new(false),
                stats,
            }),
            outbound,
            pending: Arc::new(Mutex::new(Some(rx))),
        }
    }

    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Set once the collector sends `WELCOME`. Purely informational:
    /// records flow as soon as the socket is open.
    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::Acquire)
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Start the single connection attempt in the background.
    ///
    /// Only the first call has an effect. Must be called from within a
    /// tokio runtime.
    pub fn connect(&self) {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(state = ?self.state(), "connect() ignored, already attempted");
            return;
        }

        let Some(outbound) = self.pending.lock().take() else {
            return;
        };

        let shared = self.shared.clone();
        let url = self.gateway_url.to_string();
        debug!(%url, "connecting to metrics gateway");
        tokio::spawn(run_connection(shared, url, outbound));
    }
}

impl RecordSink for Transport {
    fn send(&self, record: MetricsRecord) {
        if self.state() != ConnectionState::Connected {
            debug!(path = %record.req.path, "not connected, dropping metrics record");
            self.shared.stats.record_dropped(DropReason::NotConnected);
            return;
        }

        match self.outbound.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                debug!(path = %record.req.path, "outbound queue full, dropping metrics record");
                self.shared.stats.record_dropped(DropReason::QueueFull);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.stats.record_dropped(DropReason::NotConnected);
            }
        }
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(self.state())
    }

    fn is_authenticated(&self) -> bool {
        Transport::is_authenticated(self)
    }
}

impl Shared {
    /// Transition unless already `Failed`, which is terminal.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Failed || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn fail(&self, err: TransportError) {
        error!(error = %err, "metrics gateway connection failed");
        self.set_state(ConnectionState::Failed);
    }

    fn on_message(&self, msg: Message) -> Result<(), TransportError> {
        match msg {
            Message::Text(text) => {
                self.stats.record_control_message();
                match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(control) if control.kind == WELCOME => {
                        self.authenticated.store(true, Ordering::Release);
                        debug!("Successfully authenticated");
                    }
                    Ok(control) => {
                        debug!(kind = %control.kind, "ignoring control message");
                    }
                    Err(err) => {
                        debug!(error = %err, "ignoring malformed control message");
                    }
                }
                Ok(())
            }
            Message::Close(_) => Err(TransportError::Closed),
            // Pongs are queued by tungstenite itself
            _ => Ok(()),
        }
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    url: String,
    mut outbound: mpsc::Receiver<MetricsRecord>,
) {
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(source) => {
            shared.fail(TransportError::Connect { url, source });
            return;
        }
    };

    shared.set_state(ConnectionState::Connected);
    debug!(%url, "Successfully connected");

    let (mut sink, mut stream) = ws.split();

    let result: Result<(), TransportError> = loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(record) => {
                    let json = match serde_json::to_string(&record) {
                        Ok(json) => json,
                        Err(err) => {
                            error!(error = %TransportError::from(err), "skipping metrics record");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::Text(json)).await {
                        break Err(err.into());
                    }
                    shared.stats.record_sent();
                }
                // Every Transport handle is gone
                None => {
                    let _ = sink.close().await;
                    break Ok(());
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(msg)) => {
                    if let Err(err) = shared.on_message(msg) {
                        break Err(err);
                    }
                }
                Some(Err(err)) => break Err(err.into()),
                None => break Err(TransportError::Closed),
            },
        }
    };

    if let Err(err) = result {
        shared.fail(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Delay;
    use crate::metrics::{RequestSample, ResponseSample};
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn record(path: &str) -> MetricsRecord {
        MetricsRecord::new(
            RequestSample {
                host: Some("example.com".into()),
                delay: Delay::from_nanos(1_000),
                href: format!("http://example.com{path}"),
                path: path.into(),
            },
            ResponseSample {
                status_code: 200,
                content_length: Some(2),
                delay: Delay::from_nanos(2_000),
            },
        )
    }

    fn transport(url: &str) -> (Transport, Arc<DeliveryStats>) {
        let stats = Arc::new(DeliveryStats::new());
        let config = MetricsConfig::default().with_gateway_url(url);
        (Transport::new(&config, stats.clone()), stats)
    }

    async fn wait_for(transport: &Transport, want: ConnectionState) {
        let mut rx = transport.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("state sender dropped");
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..250 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not met within 5s");
    }

    /// Accepts one client, greets it, then forwards `frames` text frames.
    async fn collector(
        greeting: Vec<&'static str>,
        frames: usize,
    ) -> (String, oneshot::Receiver<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            for text in greeting {
                ws.send(Message::Text(text.to_owned())).await.unwrap();
            }
            let mut received = Vec::new();
            while received.len() < frames {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => received.push(text),
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            let _ = tx.send(received);
            // Keep the socket open until the test is done
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        (url, rx)
    }

    #[tokio::test]
    async fn send_before_connect_is_dropped() {
        let (transport, stats) = transport("ws://127.0.0.1:1");
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        transport.send(record("/foo"));

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(stats.snapshot().dropped_not_connected, 1);
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_quietly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (transport, stats) = transport(&format!("ws://{addr}"));
        transport.connect();
        wait_for(&transport, ConnectionState::Failed).await;

        transport.send(record("/a"));
        transport.send(record("/b"));
        assert_eq!(stats.snapshot().dropped_not_connected, 2);
        assert_eq!(stats.snapshot().records_sent, 0);

        // Failed is terminal
        transport.connect();
        assert_eq!(transport.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn streams_records_as_json() {
        let (url, received) = collector(vec![r#"{"type":"WELCOME"}"#], 2).await;
        let (transport, _) = transport(&url);

        transport.connect();
        wait_for(&transport, ConnectionState::Connected).await;

        transport.send(record("/first"));
        transport.send(record("/second"));

        let frames = tokio::time::timeout(Duration::from_secs(5), received)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frames.len(), 2);

        let first: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(first["req"]["path"], "/first");
        assert_eq!(first["meta"]["host"], "example.com");
        assert_eq!(first["res"]["contentLength"], 2);
        let second: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(second["req"]["path"], "/second");

        assert_eq!(transport.state(), ConnectionState::Connected);
        assert!(transport.is_authenticated());
    }

    #[tokio::test]
    async fn welcome_marks_transport_authenticated() {
        let (url, _received) = collector(vec![r#"{"type":"WELCOME"}"#], 0).await;
        let (transport, stats) = transport(&url);
        assert!(!transport.is_authenticated());

        transport.connect();
        wait_for(&transport, ConnectionState::Connected).await;
        eventually(|| transport.is_authenticated()).await;

        assert_eq!(stats.snapshot().control_messages, 1);
        assert!(RecordSink::is_authenticated(&transport));
        assert_eq!(transport.connection_state(), Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn full_queue_drops_newest_without_blocking() {
        // Completes the handshake, then never reads
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let stats = Arc::new(DeliveryStats::new());
        let config = MetricsConfig::default()
            .with_gateway_url(url)
            .with_queue_capacity(1);
        let transport = Transport::new(&config, stats.clone());
        transport.connect();
        wait_for(&transport, ConnectionState::Connected).await;

        // The writer task cannot run between these sends
        let started = Instant::now();
        for i in 0..100 {
            transport.send(record(&format!("/flood/{i}")));
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        let snap = stats.snapshot();
        assert_eq!(snap.dropped_queue_full, 99);
        assert_eq!(snap.dropped_not_connected, 0);
        assert_eq!(transport.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn unknown_control_messages_are_ignored() {
        let (url, received) =
            collector(vec![r#"{"type":"SOMETHING_ELSE"}"#, "not json"], 1).await;
        let (transport, stats) = transport(&url);

        transport.connect();
        wait_for(&transport, ConnectionState::Connected).await;
        transport.send(record("/still-works"));

        let frames = tokio::time::timeout(Duration::from_secs(5), received)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(transport.state(), ConnectionState::Connected);

        eventually(|| stats.snapshot().control_messages == 2).await;
        assert!(!transport.is_authenticated());
    }

    #[tokio::test]
    async fn peer_close_is_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let _ = ws.close(None).await;
        });

        let (transport, stats) = transport(&url);
        transport.connect();
        wait_for(&transport, ConnectionState::Failed).await;

        transport.send(record("/after-close"));
        assert_eq!(stats.snapshot().dropped_not_connected, 1);
    }

    #[tokio::test]
    async fn second_connect_is_ignored() {
        let (url, _received) = collector(vec![], 0).await;
        let (transport, _) = transport(&url);

        transport.connect();
        transport.connect();
        wait_for(&transport, ConnectionState::Connected).await;
        assert!(transport.pending.lock().is_none());
    }
}
