//! Reconnecting channel connection.
//!
//! A [`ConnectionManager`] keeps one logical channel open over a WebSocket:
//! it reconnects with jittered exponential backoff, detects dead peers with
//! an application-level ping, and queues outbound messages while the socket
//! is down. Decoded server envelopes are delivered on the receiver returned
//! by [`ConnectionManager::new`].
//!
//! Every lifecycle task carries the epoch it was started with and re-checks
//! it under the lock before touching shared state, so work completing after
//! [`ConnectionManager::close`] or `set_enabled(false)` is discarded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use shared::{ws_types, ClientMessage, Envelope};

const INBOUND_BUFFER: usize = 256;

/// Connection tuning. Defaults match the hub's expectations.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Connect as soon as the manager is created.
    pub enabled: bool,
    /// Consecutive failed connects tolerated before giving up.
    pub max_reconnect_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    /// Outbound messages held while disconnected.
    pub queue_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_reconnect_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            heartbeat_interval: Duration::from_millis(25_000),
            pong_timeout: Duration::from_millis(10_000),
            queue_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// Reconnect attempts exhausted. Only [`ConnectionManager::open`] leaves it.
    Error,
}

/// What happened to a message handed to [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// Held until the next successful connect.
    Queued,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Delay before reconnect attempt `attempt` (0-based): `base * 2^attempt`
/// capped at `max`, then scaled by `jitter`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: f64) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(max).mul_f64(jitter)
}

/// Multiplicative jitter in [0.75, 1.25].
fn jitter() -> f64 {
    rand::thread_rng().gen_range(0.75..=1.25)
}

struct Inner {
    url: String,
    options: ConnectionOptions,
    enabled: bool,
    epoch: u64,
    queue: VecDeque<String>,
    /// Writer of the live socket; present only while connected.
    writer: Option<mpsc::UnboundedSender<String>>,
    /// Running lifecycle. Cleared under the lock by whoever ends it.
    task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    state: watch::Sender<ConnectionState>,
    inbound: mpsc::Sender<Envelope>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    /// Publish `state` unless the lifecycle that asks has been superseded.
    fn set_state(&self, epoch: u64, state: ConnectionState) -> bool {
        let inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    /// Enter [`ConnectionState::Error`] and forget the lifecycle task in the
    /// same critical section, so an `open` that sees the error starts anew.
    fn give_up(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        inner.task = None;
        self.state.send_replace(ConnectionState::Error);
    }
}

/// One logical channel to the hub.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager for `url`. Connects right away when
    /// `options.enabled` is set; must be called inside a Tokio runtime.
    pub fn new(url: impl Into<String>, options: ConnectionOptions) -> (Self, mpsc::Receiver<Envelope>) {
        let (inbound, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let enabled = options.enabled;
        let manager = Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    url: url.into(),
                    options,
                    enabled: false,
                    epoch: 0,
                    queue: VecDeque::new(),
                    writer: None,
                    task: None,
                }),
                state,
                inbound,
            }),
        };
        if enabled {
            manager.open();
        }
        (manager, inbound_rx)
    }

    /// Enable auto-reconnect and connect if no lifecycle is running. Also the
    /// way out of [`ConnectionState::Error`].
    pub fn open(&self) {
        let mut inner = self.shared.lock();
        inner.enabled = true;
        if inner.task.is_some() {
            return;
        }
        inner.epoch += 1;
        let epoch = inner.epoch;
        let shared = self.shared.clone();
        inner.task = Some(tokio::spawn(run_lifecycle(shared, epoch)));
        self.shared.state.send_replace(ConnectionState::Connecting);
    }

    /// Toggle the connection. Disabling tears the socket down but keeps
    /// queued messages for the next connect.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.open();
        } else {
            let mut inner = self.shared.lock();
            inner.enabled = false;
            self.teardown(&mut inner);
        }
    }

    /// Close the socket, cancel every timer and clear the queue. Stays
    /// closed until [`ConnectionManager::open`].
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        inner.enabled = false;
        inner.queue.clear();
        self.teardown(&mut inner);
    }

    fn teardown(&self, inner: &mut Inner) {
        inner.epoch += 1;
        inner.writer = None;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    /// Transmit `message` if connected, otherwise queue it. Never drops a
    /// message without saying so.
    pub fn send(&self, message: &ClientMessage) -> Result<SendStatus, SendError> {
        let text = message.encode()?;
        let mut inner = self.shared.lock();
        let text = match &inner.writer {
            Some(writer) => match writer.send(text) {
                Ok(()) => return Ok(SendStatus::Sent),
                Err(mpsc::error::SendError(text)) => text,
            },
            None => text,
        };
        if inner.queue.len() >= inner.options.queue_capacity {
            return Err(SendError::QueueFull);
        }
        inner.queue.push_back(text);
        Ok(SendStatus::Queued)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.lock().enabled
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.epoch += 1;
        inner.writer = None;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
    }
}

enum SessionEnd {
    /// Superseded by close/disable; leave shared state alone.
    Cancelled,
    Lost(String),
}

async fn run_lifecycle(shared: Arc<Shared>, epoch: u64) {
    let mut attempt: u32 = 0;
    loop {
        if !shared.set_state(epoch, ConnectionState::Connecting) {
            return;
        }
        let (url, options) = {
            let inner = shared.lock();
            (inner.url.clone(), inner.options.clone())
        };

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                attempt = 0;
                tracing::info!(url = %url, "connected");
                match run_session(&shared, epoch, &options, ws).await {
                    SessionEnd::Cancelled => return,
                    SessionEnd::Lost(reason) => {
                        tracing::warn!(url = %url, reason = %reason, "connection lost");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, attempt, error = %e, "connect failed");
            }
        }

        if attempt >= options.max_reconnect_attempts {
            tracing::error!(url = %url, attempts = attempt, "giving up reconnecting");
            shared.give_up(epoch);
            return;
        }
        let delay = backoff_delay(attempt, options.base_delay, options.max_delay, jitter());
        attempt += 1;
        if !shared.set_state(epoch, ConnectionState::Disconnected) {
            return;
        }
        tracing::debug!(delay_ms = delay.as_millis() as u64, attempt, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_session(
    shared: &Shared,
    epoch: u64,
    options: &ConnectionOptions,
    ws: Socket,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (writer, mut outbound) = mpsc::unbounded_channel::<String>();

    // Install the writer and take the backlog in one step: anything sent
    // after this lands behind the backlog.
    let backlog: Vec<String> = {
        let mut inner = shared.lock();
        if inner.epoch != epoch {
            return SessionEnd::Cancelled;
        }
        inner.writer = Some(writer);
        shared.state.send_replace(ConnectionState::Connected);
        inner.queue.drain(..).collect()
    };

    let mut backlog = backlog.into_iter();
    while let Some(text) = backlog.next() {
        if let Err(e) = ws_tx.send(Message::Text(text.clone())).await {
            let unsent = std::iter::once(text).chain(backlog).collect();
            return end_session(shared, epoch, unsent, &mut outbound, e.to_string());
        }
    }

    let stale_after = options.heartbeat_interval + options.pong_timeout;
    let mut ping = tokio::time::interval_at(
        Instant::now() + options.heartbeat_interval,
        options.heartbeat_interval,
    );
    let mut last_ack = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match Envelope::decode(&text) {
                    Ok(envelope) if envelope.r#type == ws_types::PONG => last_ack = Instant::now(),
                    Ok(envelope) => {
                        if !shared.is_current(epoch) {
                            return SessionEnd::Cancelled;
                        }
                        // receiver gone means nobody is watching; keep the link up
                        let _ = shared.inbound.send(envelope).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "discarding server frame"),
                },
                Some(Ok(Message::Pong(_))) => last_ack = Instant::now(),
                Some(Ok(Message::Close(_))) | None => {
                    return end_session(shared, epoch, Vec::new(), &mut outbound, "closed by peer".to_string());
                }
                Some(Err(e)) => {
                    return end_session(shared, epoch, Vec::new(), &mut outbound, e.to_string());
                }
                Some(Ok(_)) => {}
            },
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.clone())).await {
                        return end_session(shared, epoch, vec![text], &mut outbound, e.to_string());
                    }
                }
                // writer removed by close/disable
                None => return SessionEnd::Cancelled,
            },
            _ = tokio::time::sleep_until(last_ack + stale_after) => {
                return end_session(shared, epoch, Vec::new(), &mut outbound, "heartbeat timeout".to_string());
            }
            _ = ping.tick() => {
                match ClientMessage::Ping.encode() {
                    Ok(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            return end_session(shared, epoch, Vec::new(), &mut outbound, e.to_string());
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to encode ping"),
                }
            }
        }
    }
}

/// Drop the writer and put undelivered messages back at the head of the
/// queue, ahead of anything queued meanwhile.
fn end_session(
    shared: &Shared,
    epoch: u64,
    mut unsent: Vec<String>,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    reason: String,
) -> SessionEnd {
    let mut inner = shared.lock();
    if inner.epoch != epoch {
        return SessionEnd::Cancelled;
    }
    inner.writer = None;
    while let Ok(text) = outbound.try_recv() {
        unsent.push(text);
    }
    for text in unsent.into_iter().rev() {
        inner.queue.push_front(text);
    }
    SessionEnd::Lost(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Clone, Copy)]
    enum Peer {
        /// Answers pings with pongs.
        Responsive,
        /// Reads everything, answers nothing.
        Silent,
    }

    struct TestServer {
        url: String,
        accepts: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<String>>>,
    }

    async fn test_server(peer: Peer) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let accepts = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let (accepts_c, received_c) = (accepts.clone(), received.clone());
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                accepts_c.fetch_add(1, Ordering::SeqCst);
                let received = received_c.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let Message::Text(text) = msg else { continue };
                        let Ok(env) = Envelope::decode(&text) else { continue };
                        if env.r#type == ws_types::PING {
                            if let Peer::Responsive = peer {
                                let pong = r#"{"type":"pong","payload":{}}"#.to_string();
                                if ws.send(Message::Text(pong)).await.is_err() {
                                    return;
                                }
                            }
                        } else {
                            received.lock().unwrap().push(text);
                        }
                    }
                });
            }
        });
        TestServer {
            url,
            accepts,
            received,
        }
    }

    fn fast_options() -> ConnectionOptions {
        ConnectionOptions {
            enabled: true,
            max_reconnect_attempts: 5,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(100),
            pong_timeout: Duration::from_millis(100),
            queue_capacity: 10,
        }
    }

    async fn wait_for_state(manager: &ConnectionManager, want: ConnectionState) {
        let mut rx = manager.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn chat(text: &str) -> ClientMessage {
        ClientMessage::Chat(shared::ChatPayload {
            session_id: "s1".to_string(),
            text: text.to_string(),
        })
    }

    #[test]
    fn backoff_doubles_within_jitter_bounds() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        for n in 0..4u32 {
            let nominal = 1000.0 * 2f64.powi(n as i32);
            for _ in 0..50 {
                let d = backoff_delay(n, base, max, jitter()).as_secs_f64() * 1000.0;
                assert!(d >= nominal * 0.75 - 1e-6 && d <= nominal * 1.25 + 1e-6, "{} ms", d);
            }
        }
    }

    #[test]
    fn backoff_is_capped_before_jitter() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        assert_eq!(backoff_delay(10, base, max, 1.0), max);
        assert_eq!(backoff_delay(40, base, max, 0.75), max.mul_f64(0.75));
        assert_eq!(backoff_delay(0, base, max, 1.25), Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn disabled_manager_never_connects_until_enabled() {
        let server = test_server(Peer::Responsive).await;
        let options = ConnectionOptions {
            enabled: false,
            ..fast_options()
        };
        let (manager, _inbound) = ConnectionManager::new(server.url.clone(), options);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.accepts.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.set_enabled(true);
        wait_for_state(&manager, ConnectionState::Connected).await;
        manager.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn queued_messages_flush_in_order_on_connect() {
        let server = test_server(Peer::Responsive).await;
        let options = ConnectionOptions {
            enabled: false,
            queue_capacity: 3,
            ..fast_options()
        };
        let (manager, _inbound) = ConnectionManager::new(server.url.clone(), options);

        for text in ["one", "two", "three"] {
            assert_eq!(manager.send(&chat(text)).unwrap(), SendStatus::Queued);
        }
        assert!(matches!(manager.send(&chat("four")), Err(SendError::QueueFull)));

        manager.open();
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(manager.send(&chat("live")).unwrap(), SendStatus::Sent);

        let received = server.received.clone();
        wait_until(|| received.lock().unwrap().len() == 4).await;
        let texts: Vec<String> = received
            .lock()
            .unwrap()
            .iter()
            .map(|raw| match ClientMessage::decode(raw).unwrap() {
                ClientMessage::Chat(c) => c.text,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["one", "two", "three", "live"]);
        assert_eq!(manager.queued(), 0);
    }

    #[tokio::test]
    async fn silent_peer_triggers_reconnect() {
        let server = test_server(Peer::Silent).await;
        let (manager, _inbound) = ConnectionManager::new(server.url.clone(), fast_options());

        wait_for_state(&manager, ConnectionState::Connected).await;
        let accepts = server.accepts.clone();
        // the server never closes; only the missing pong can cause this
        wait_until(|| accepts.load(Ordering::SeqCst) >= 2).await;
    }

    #[tokio::test]
    async fn responsive_peer_keeps_one_connection() {
        let server = test_server(Peer::Responsive).await;
        let (manager, _inbound) = ConnectionManager::new(server.url.clone(), fast_options());
        wait_for_state(&manager, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn exhausted_attempts_end_in_error_until_reopened() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let options = ConnectionOptions {
            max_reconnect_attempts: 2,
            ..fast_options()
        };
        let (manager, _inbound) = ConnectionManager::new(url, options);
        wait_for_state(&manager, ConnectionState::Error).await;

        // terminal: nothing happens on its own
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.state(), ConnectionState::Error);

        manager.open();
        assert_ne!(manager.state(), ConnectionState::Error);
        wait_for_state(&manager, ConnectionState::Error).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_right_after_error_always_restarts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let options = ConnectionOptions {
            max_reconnect_attempts: 0,
            ..fast_options()
        };
        let (manager, _inbound) = ConnectionManager::new(url, options);
        for _ in 0..200 {
            wait_for_state(&manager, ConnectionState::Error).await;
            let state = manager.watch_state();
            manager.open();
            assert!(state.has_changed().unwrap(), "open ignored after error");
        }
    }

    #[tokio::test]
    async fn disable_during_backoff_cancels_the_next_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let options = ConnectionOptions {
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(300),
            ..fast_options()
        };
        let (manager, _inbound) = ConnectionManager::new(format!("ws://{}", addr), options);
        assert_eq!(manager.send(&chat("held")).unwrap(), SendStatus::Queued);
        // first attempt refused; the lifecycle now sleeps before retrying
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        manager.set_enabled(false);
        let state = manager.watch_state();
        let listener = TcpListener::bind(addr).await.unwrap();
        let accepted = tokio::time::timeout(Duration::from_millis(800), listener.accept()).await;
        assert!(accepted.is_err(), "reconnected after disable");
        assert!(!state.has_changed().unwrap());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.queued(), 1);
    }

    #[tokio::test]
    async fn close_during_handshake_discards_the_late_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts_c = accepts.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                accepts_c.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    // hold the upgrade response back
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while ws.next().await.is_some() {}
                    }
                });
            }
        });

        let (manager, _inbound) = ConnectionManager::new(url, fast_options());
        let accepted = accepts.clone();
        wait_until(|| accepted.load(Ordering::SeqCst) == 1).await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.close();
        let state = manager.watch_state();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!state.has_changed().unwrap());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_clears_queue_and_stops_reconnecting() {
        let server = test_server(Peer::Responsive).await;
        let (manager, _inbound) = ConnectionManager::new(server.url.clone(), fast_options());
        wait_for_state(&manager, ConnectionState::Connected).await;

        manager.close();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_enabled());
        assert_eq!(manager.send(&chat("later")).unwrap(), SendStatus::Queued);
        manager.close();
        assert_eq!(manager.queued(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn server_frames_are_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("garbage".to_string())).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"presence_update","payload":{"count":3}}"#.to_string(),
            ))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        });

        let (_manager, mut inbound) = ConnectionManager::new(url, fast_options());
        let envelope = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.r#type, "presence_update");
        assert_eq!(envelope.payload["count"], 3);
    }
}
