//! WebSocket transport seam.
//!
//! The runtime talks to the central system through the [`Transport`] trait;
//! [`WebsocketClient`] is the production implementation on
//! `tokio-tungstenite`. Connection lifecycle events flow back through an
//! `mpsc` channel handed over at construction, which is also what lets tests
//! drive the whole charge point through [`testing::MockTransport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::errors::TransportError;

/// WebSocket close code for an ordinary reconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code sent when the charge point stops.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code sent when switching security profiles.
pub const CLOSE_SERVICE_RESTART: u16 = 1012;

/// Connection parameters for one (re)connect cycle.
#[derive(Debug, Clone)]
pub struct WebsocketOptions {
    /// Base URI of the central system; the charge-point id is appended.
    pub central_system_uri: String,
    pub charge_point_id: String,
    pub security_profile: u8,
    /// Pre-shared key for HTTP basic auth on profiles 1 and 2.
    pub authorization_key: Option<String>,
    pub reconnect_interval: Duration,
    /// TLS 1.2 / 1.3 cipher lists, forwarded to the TLS backend.
    pub supported_ciphers_12: Vec<String>,
    pub supported_ciphers_13: Vec<String>,
}

/// Events the transport reports to the charge point.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected { security_profile: u8 },
    Disconnected,
    Message(String),
}

/// Transport contract consumed by the protocol runtime.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish (and keep re-establishing) a connection. With `one_shot`
    /// a single attempt is made and failure is reported as `Disconnected`
    /// without retrying; this backs the security-profile switch.
    async fn connect(&self, options: WebsocketOptions, one_shot: bool);

    async fn send(&self, message: String) -> Result<(), TransportError>;

    async fn disconnect(&self, close_code: u16);

    fn is_connected(&self) -> bool;
}

pub type SharedTransport = Arc<dyn Transport>;

// ── Production implementation ──────────────────────────────────

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// `tokio-tungstenite` client with automatic reconnect.
pub struct WebsocketClient {
    events: mpsc::UnboundedSender<TransportEvent>,
    sink: Arc<Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    connect_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebsocketClient {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            sink: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            connect_task: Mutex::new(None),
        }
    }

    fn build_request(options: &WebsocketOptions) -> Result<Request<()>, TransportError> {
        let uri = format!(
            "{}/{}",
            options.central_system_uri.trim_end_matches('/'),
            options.charge_point_id
        );
        let parsed: tokio_tungstenite::tungstenite::http::Uri = uri
            .parse()
            .map_err(|_| TransportError::ConnectFailed(format!("invalid URI: {uri}")))?;
        let host = parsed
            .host()
            .ok_or_else(|| TransportError::ConnectFailed("URI has no host".to_string()))?
            .to_string();

        let mut builder = Request::builder()
            .uri(&uri)
            .header("Sec-WebSocket-Protocol", "ocpp1.6");

        // Security profiles 1 and 2 authenticate with basic auth; the key is
        // the password, the charge-point id the user name.
        if matches!(options.security_profile, 1 | 2) {
            if let Some(key) = &options.authorization_key {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", options.charge_point_id, key));
                builder = builder.header("Authorization", format!("Basic {token}"));
            }
        }

        builder
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))
    }

    async fn run_connection(
        options: WebsocketOptions,
        one_shot: bool,
        events: mpsc::UnboundedSender<TransportEvent>,
        sink_slot: Arc<Mutex<Option<WsSink>>>,
        connected: Arc<AtomicBool>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            let request = match Self::build_request(&options) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Invalid websocket request");
                    let _ = events.send(TransportEvent::Disconnected);
                    return;
                }
            };

            match tokio_tungstenite::connect_async(request).await {
                Ok((stream, _response)) => {
                    info!(
                        security_profile = options.security_profile,
                        "Websocket connected"
                    );
                    let (sink, mut source) = stream.split();
                    *sink_slot.lock().await = Some(sink);
                    connected.store(true, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Connected {
                        security_profile: options.security_profile,
                    });

                    while let Some(frame) = source.next().await {
                        match frame {
                            Ok(Message::Text(text)) => {
                                let _ = events.send(TransportEvent::Message(text));
                            }
                            Ok(Message::Ping(payload)) => {
                                let mut sink = sink_slot.lock().await;
                                if let Some(sink) = sink.as_mut() {
                                    let _ = sink.send(Message::Pong(payload)).await;
                                }
                            }
                            Ok(Message::Close(frame)) => {
                                debug!(?frame, "Websocket closed by peer");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "Websocket read error");
                                break;
                            }
                        }
                    }

                    connected.store(false, Ordering::SeqCst);
                    *sink_slot.lock().await = None;
                    let _ = events.send(TransportEvent::Disconnected);
                }
                Err(e) => {
                    warn!(error = %e, "Websocket connect failed");
                    let _ = events.send(TransportEvent::Disconnected);
                }
            }

            if one_shot || shutdown.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(options.reconnect_interval).await;
        }
    }
}

#[async_trait]
impl Transport for WebsocketClient {
    async fn connect(&self, options: WebsocketOptions, one_shot: bool) {
        self.shutdown.store(false, Ordering::SeqCst);
        let task = tokio::spawn(Self::run_connection(
            options,
            one_shot,
            self.events.clone(),
            self.sink.clone(),
            self.connected.clone(),
            self.shutdown.clone(),
        ));
        if let Some(previous) = self.connect_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn send(&self, message: String) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink
                .send(Message::Text(message))
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string())),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn disconnect(&self, close_code: u16) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut sink = self.sink.lock().await;
        if let Some(sink) = sink.as_mut() {
            let frame = CloseFrame {
                code: CloseCode::from(close_code),
                reason: "".into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
        }
        *sink = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── Test double ────────────────────────────────────────────────

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex as StdMutex;

    use super::*;

    /// Records outbound frames and lets tests script connection events.
    pub struct MockTransport {
        events: mpsc::UnboundedSender<TransportEvent>,
        connected: AtomicBool,
        pub sent: StdMutex<Vec<String>>,
        pub disconnect_codes: StdMutex<Vec<u16>>,
        pub connect_attempts: StdMutex<Vec<(u8, bool)>>,
        /// When set, the next connect attempt fails (used for the
        /// security-profile fallback path).
        pub fail_next_connect: AtomicBool,
    }

    impl MockTransport {
        pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Arc<Self> {
            Arc::new(Self {
                events,
                connected: AtomicBool::new(false),
                sent: StdMutex::new(Vec::new()),
                disconnect_codes: StdMutex::new(Vec::new()),
                connect_attempts: StdMutex::new(Vec::new()),
                fail_next_connect: AtomicBool::new(false),
            })
        }

        pub fn sent_frames(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn clear_sent(&self) {
            self.sent.lock().unwrap().clear();
        }

        /// Outbound CALL frames matching `action`, parsed.
        pub fn sent_calls(&self, action: &str) -> Vec<(String, serde_json::Value)> {
            self.sent_frames()
                .iter()
                .filter_map(|raw| {
                    let arr: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
                    if arr.first()?.as_u64()? == 2 && arr.get(2)?.as_str()? == action {
                        Some((arr[1].as_str()?.to_string(), arr[3].clone()))
                    } else {
                        None
                    }
                })
                .collect()
        }

        /// All outbound CALL actions in send order.
        pub fn sent_actions(&self) -> Vec<String> {
            self.sent_frames()
                .iter()
                .filter_map(|raw| {
                    let arr: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
                    if arr.first()?.as_u64()? == 2 {
                        Some(arr.get(2)?.as_str()?.to_string())
                    } else {
                        None
                    }
                })
                .collect()
        }

        pub fn inject(&self, event: TransportEvent) {
            let _ = self.events.send(event);
        }

        pub fn drop_link(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.inject(TransportEvent::Disconnected);
        }

        /// Simulate the automatic reconnect of the production client.
        pub fn reconnect_link(&self, security_profile: u8) {
            self.connected.store(true, Ordering::SeqCst);
            self.inject(TransportEvent::Connected { security_profile });
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, options: WebsocketOptions, one_shot: bool) {
            self.connect_attempts
                .lock()
                .unwrap()
                .push((options.security_profile, one_shot));
            if self.fail_next_connect.swap(false, Ordering::SeqCst) {
                let _ = self.events.send(TransportEvent::Disconnected);
                return;
            }
            self.connected.store(true, Ordering::SeqCst);
            let _ = self.events.send(TransportEvent::Connected {
                security_profile: options.security_profile,
            });
        }

        async fn send(&self, message: String) -> Result<(), TransportError> {
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn disconnect(&self, close_code: u16) {
            self.disconnect_codes.lock().unwrap().push(close_code);
            if self.connected.swap(false, Ordering::SeqCst) {
                let _ = self.events.send(TransportEvent::Disconnected);
            }
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }
}
