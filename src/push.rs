//! Push channel: persistent WebSocket with bounded reconnect.
//!
//! The gateway's push channel is optional; when configured, it delivers the
//! same lifecycle events as polling, just sooner. The manager owns the
//! connection state machine:
//!
//! `disconnected --connect--> connecting --open--> connected`
//! `connected --close/error--> disconnected` (reconnect attempt)
//! `connecting --error--> disconnected` (reconnect attempt)
//!
//! Reconnection is bounded: after the configured number of consecutive
//! failures the manager emits a terminal give-up event and stays down until
//! `connect()` is called again, which resets the attempt counter.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::config::{ReconnectBackoff, SyncConfig};
use crate::error::SyncError;

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// Transient connection bookkeeping, readable by embedders.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connection.
    pub attempts: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            last_failure: None,
        }
    }
}

/// Events fanned out to subscribers. Frames carrying a `type` tag are
/// re-emitted both as [`PushEvent::Message`] and [`PushEvent::Typed`] so
/// subscribers can listen broadly or narrowly.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Connected,
    Disconnected,
    /// Every successfully parsed inbound frame.
    Message(serde_json::Value),
    /// Frames with a `type` tag, re-emitted under that tag.
    Typed {
        kind: String,
        payload: serde_json::Value,
    },
    /// An inbound frame that was not valid JSON; dropped, never fatal.
    Malformed { detail: String },
    /// Reconnect bound exhausted; no further attempts until `connect()`.
    GaveUp { attempts: u32 },
}

// =============================================================================
// DIAL SEAM
// =============================================================================

pub type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type WsSource = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Produces a fresh connection per attempt. The reconnect loop only sees
/// this seam, so tests drive it with scripted streams.
#[async_trait]
pub trait PushDialer: Send + Sync {
    async fn dial(&self) -> Result<(WsSink, WsSource), SyncError>;
}

/// Dials the gateway's WebSocket endpoint.
pub struct WebSocketDialer {
    url: String,
}

impl WebSocketDialer {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl PushDialer for WebSocketDialer {
    async fn dial(&self) -> Result<(WsSink, WsSource), SyncError> {
        let (ws_stream, response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| SyncError::Transport {
                    status: None,
                    detail: e.to_string(),
                })?;
        debug!(status = %response.status(), "push channel websocket upgraded");
        let (sink, stream) = ws_stream.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// =============================================================================
// RECONNECT DELAY
// =============================================================================

/// Delay schedule between reconnect attempts. Fixed interval by default;
/// exponential mode adds ±20% jitter so a fleet of clients does not
/// thundering-herd the gateway after an outage.
struct ReconnectPolicy {
    base_ms: u64,
    mode: ReconnectBackoff,
    rng_state: u64,
}

impl ReconnectPolicy {
    fn new(config: &SyncConfig) -> Self {
        Self {
            base_ms: config.reconnect_delay_ms,
            mode: config.reconnect_backoff,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(12345),
        }
    }

    /// Fast PRNG for jitter (xorshift64).
    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    /// Delay before the dial following `attempt` consecutive failures.
    fn delay(&mut self, attempt: u32) -> Duration {
        match self.mode {
            ReconnectBackoff::Fixed => Duration::from_millis(self.base_ms),
            ReconnectBackoff::Exponential {
                multiplier,
                max_delay_ms,
            } => {
                let raw = (self.base_ms as f64)
                    * multiplier.powi(attempt.saturating_sub(1) as i32);
                let capped = raw.min(max_delay_ms as f64);
                let jitter = (self.next_random() * 2.0 - 1.0) * capped * 0.2;
                Duration::from_millis((capped + jitter).max(1.0) as u64)
            }
        }
    }
}

// =============================================================================
// CONNECTION MANAGER
// =============================================================================

enum SessionEnd {
    Closed,
    Errored,
    Manual,
}

pub struct ConnectionManager {
    dialer: Arc<dyn PushDialer>,
    config: SyncConfig,
    info: RwLock<ConnectionInfo>,
    events: broadcast::Sender<PushEvent>,
    outbound: RwLock<Option<mpsc::UnboundedSender<serde_json::Value>>>,
    shutdown: RwLock<watch::Sender<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(dialer: Arc<dyn PushDialer>, config: SyncConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            dialer,
            config,
            info: RwLock::new(ConnectionInfo::default()),
            events,
            outbound: RwLock::new(None),
            shutdown: RwLock::new(shutdown),
            task: Mutex::new(None),
        })
    }

    /// Convenience constructor for the real gateway endpoint.
    pub fn websocket(url: &str, config: SyncConfig) -> Arc<Self> {
        Self::new(Arc::new(WebSocketDialer::new(url)), config)
    }

    pub fn state(&self) -> ConnectionState {
        self.info.read().state
    }

    pub fn info(&self) -> ConnectionInfo {
        *self.info.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// Start (or restart) the connection loop. Resets the attempt counter;
    /// a no-op while a loop is already running.
    pub fn connect(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("push channel loop already running");
                return;
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.write() = shutdown_tx;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.outbound.write() = Some(out_tx);

        self.info.write().attempts = 0;

        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(manager.run(out_rx, shutdown_rx)));
    }

    /// Stop the connection loop. An in-flight read or write completes; no
    /// further reconnect attempts are made.
    pub fn disconnect(&self) {
        let _ = self.shutdown.read().send(true);
    }

    /// Queue a payload for the current connection. Fails immediately when
    /// not connected — nothing is queued for later, and the caller always
    /// hears about it.
    pub fn send(&self, payload: serde_json::Value) -> Result<(), SyncError> {
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::NotConnected);
        }
        match self.outbound.read().as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| SyncError::NotConnected),
            None => Err(SyncError::NotConnected),
        }
    }

    fn emit(&self, event: PushEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        self.info.write().state = state;
    }

    async fn run(
        self: Arc<Self>,
        mut outbound_rx: mpsc::UnboundedReceiver<serde_json::Value>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut policy = ReconnectPolicy::new(&self.config);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            info!("🔌 connecting push channel");

            match self.dialer.dial().await {
                Ok((sink, stream)) => {
                    {
                        let mut info = self.info.write();
                        info.state = ConnectionState::Connected;
                        info.attempts = 0;
                    }
                    self.emit(PushEvent::Connected);
                    info!("✅ push channel connected");

                    let end = self
                        .stream_session(sink, stream, &mut outbound_rx, &mut shutdown_rx)
                        .await;

                    self.set_state(ConnectionState::Disconnected);
                    self.emit(PushEvent::Disconnected);

                    if matches!(end, SessionEnd::Manual) {
                        info!("push channel closed on request");
                        break;
                    }
                    warn!("push channel lost, reconnecting");

                    // Same pacing as a failed dial before trying again.
                    let delay = policy.delay(1);
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Err(e) => {
                    let attempts = {
                        let mut info = self.info.write();
                        info.state = ConnectionState::Disconnected;
                        info.attempts += 1;
                        info.last_failure = Some(Utc::now());
                        info.attempts
                    };
                    warn!(attempt = attempts, error = %e, "push channel connect failed");
                    self.emit(PushEvent::Disconnected);

                    if attempts >= self.config.reconnect_max_attempts {
                        error!(attempts, "push channel reconnect attempts exhausted");
                        self.emit(PushEvent::GaveUp { attempts });
                        break;
                    }

                    let delay = policy.delay(attempts);
                    debug!(delay_ms = delay.as_millis() as u64, "reconnect backoff");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }

        *self.outbound.write() = None;
    }

    async fn stream_session(
        &self,
        mut sink: WsSink,
        mut stream: WsSource,
        outbound_rx: &mut mpsc::UnboundedReceiver<serde_json::Value>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return SessionEnd::Errored;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "push channel closed by server");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {
                        debug!("ignoring non-text push frame");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "push channel read error");
                        return SessionEnd::Errored;
                    }
                    None => return SessionEnd::Closed,
                },
                out = outbound_rx.recv() => match out {
                    Some(value) => {
                        if sink.send(Message::Text(value.to_string())).await.is_err() {
                            return SessionEnd::Errored;
                        }
                    }
                    // The manager holds the sender for the lifetime of the
                    // loop, so this only fires on teardown.
                    None => return SessionEnd::Closed,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Manual;
                    }
                }
            }
        }
    }

    /// Parse one inbound frame and fan it out. Malformed frames are reported
    /// and dropped; they never take the connection down.
    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                let kind = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .map(str::to_string);
                match kind {
                    Some(kind) => {
                        self.emit(PushEvent::Message(value.clone()));
                        self.emit(PushEvent::Typed {
                            kind,
                            payload: value,
                        });
                    }
                    None => self.emit(PushEvent::Message(value)),
                }
            }
            Err(e) => {
                warn!(error = %e, "malformed push frame dropped");
                self.emit(PushEvent::Malformed {
                    detail: e.to_string(),
                });
            }
        }
    }
}
