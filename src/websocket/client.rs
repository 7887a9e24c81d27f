//! Public client facade.
//!
//! [`WebSocketClient`] wraps a [`ClientCore`] in a mutex and runs one
//! background driver task that feeds it session events and timer
//! expirations. Connect attempts (token fetch plus transport handshake) run
//! in their own task so `connect()` never blocks the caller. Handlers are
//! always invoked after the core lock is released, so they may call back
//! into the client.
//!
//! # Example
//!
//! ```ignore
//! use relay_link::prelude::*;
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WebSocketError> {
//!     let config = WebSocketConfig::new("wss://relay.example.com", "/ws");
//!     let client = WebSocketClient::new(config, TokenSource::new_static("secret"))?;
//!
//!     client.on("price_update", |data| println!("price: {}", data));
//!     client.connect();
//!     client.send("subscribe", serde_json::json!({ "channel": "BTC" }));
//!
//!     let mut events = client.events().expect("first subscriber");
//!     while let Some(event) = events.next().await {
//!         if let WsEvent::AuthRejected { .. } = event {
//!             break;
//!         }
//!     }
//!     client.destroy();
//!     Ok(())
//! }
//! ```

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::TokenSource;
use crate::websocket::config::WebSocketConfig;
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::handlers::{HandlerId, MessageRouter};
use crate::websocket::machine::{ClientCore, CoreEvent, Effect};
use crate::websocket::session::{build_url, ConnectionSession, SessionEvent, SessionEventKind, SessionSink};
use crate::websocket::types::{ConnectionState, WsEvent};

/// Resilient WebSocket client. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct WebSocketClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: WebSocketConfig,
    token: TokenSource,
    runtime: Handle,
    core: Mutex<ClientCore>,
    router: MessageRouter,
    wake: Arc<Notify>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    event_tx: Mutex<Option<mpsc::Sender<WsEvent>>>,
    event_rx: Mutex<Option<mpsc::Receiver<WsEvent>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    connect_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketClient {
    /// Create a client. Nothing connects until [`connect`](Self::connect).
    ///
    /// Must be called within a tokio runtime; the client keeps a handle to
    /// it, so later calls may come from any thread.
    ///
    /// # Errors
    ///
    /// [`WebSocketError::InvalidConfig`] if `config` fails validation or no
    /// runtime is available.
    pub fn new(config: WebSocketConfig, token: TokenSource) -> WsResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| WebSocketError::InvalidConfig(format!("no tokio runtime: {}", e)))?;

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let wake = Arc::new(Notify::new());

        let inner = Arc::new(Inner {
            core: Mutex::new(ClientCore::new(&config)),
            router: MessageRouter::new(),
            config,
            token,
            runtime,
            wake: wake.clone(),
            session_tx,
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(Some(event_rx)),
            driver: Mutex::new(None),
            connect_task: Mutex::new(None),
        });

        let driver = inner
            .runtime
            .spawn(run_driver(Arc::downgrade(&inner), wake, session_rx));
        *lock(&inner.driver) = Some(driver);

        Ok(Self { inner })
    }

    /// Start connecting. A no-op while open or connecting, and after
    /// [`destroy`](Self::destroy). Otherwise the reconnect budget is reset.
    pub fn connect(&self) {
        let effects = self.inner.core().connect();
        self.inner.apply(effects);
        self.inner.wake.notify_one();
    }

    /// Send `{action, data}`. Returns `true` if the frame was handed to an
    /// open session, `false` if it was queued for the next session (or
    /// dropped because the client is destroyed).
    pub fn send(&self, action: &str, data: Value) -> bool {
        self.inner.core().send(action, data, Instant::now())
    }

    /// Register a handler for frames whose action is `action`. Handlers
    /// registered under `"message"` see every frame.
    pub fn on<F>(&self, action: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.router.on(action, handler)
    }

    pub fn off(&self, action: &str, id: HandlerId) -> bool {
        self.inner.router.off(action, id)
    }

    /// Register a callback for internal failures (transport errors,
    /// malformed frames, heartbeat timeouts).
    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&WebSocketError) + Send + Sync + 'static,
    {
        self.inner.router.on_error(handler)
    }

    pub fn off_error(&self, id: HandlerId) -> bool {
        self.inner.router.off_error(id)
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.core().status()
    }

    /// Number of messages waiting for the next session
    pub fn queued_messages(&self) -> usize {
        self.inner.core().queued_messages()
    }

    /// Whether the last failure was an authentication rejection or a
    /// missing token. No automatic reconnect is pending in that case.
    pub fn is_auth_rejected(&self) -> bool {
        self.inner.core().is_auth_rejected()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.core().is_destroyed()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core().reconnect_attempts()
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    /// Lifecycle event stream. Only the first call gets it; events that
    /// arrive while the channel is full are dropped.
    pub fn events(&self) -> Option<EventStream> {
        lock(&self.inner.event_rx)
            .take()
            .map(|rx| EventStream { rx })
    }

    /// Close the session, cancel timers, clear the queue and all handlers.
    /// Terminal and idempotent; every later call is a no-op.
    pub fn destroy(&self) {
        self.inner.core().destroy();
        self.inner.router.clear();
        if let Some(task) = lock(&self.inner.connect_task).take() {
            task.abort();
        }
        // Ends the event stream once buffered events are read
        lock(&self.inner.event_tx).take();
        if let Some(driver) = lock(&self.inner.driver).take() {
            driver.abort();
        }
    }

    /// Whether two handles refer to the same client
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("base_url", &self.inner.config.base_url)
            .field("path", &self.inner.config.path)
            .field("core", &*self.inner.core())
            .finish()
    }
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, ClientCore> {
        lock(&self.core)
    }

    /// Feed one event to the core, then carry out its effects.
    fn process(self: &Arc<Self>, event: CoreEvent) {
        let effects = self.core().handle(event, Instant::now());
        self.apply(effects);
    }

    fn apply(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartConnect { generation } => self.spawn_connect(generation),
                Effect::Dispatch(frame) => {
                    self.router.dispatch(&frame);
                }
                Effect::Notify(event) => self.publish(event),
            }
        }
    }

    fn publish(&self, event: WsEvent) {
        if let WsEvent::Error { error } = &event {
            self.router.report_error(error);
        }
        let tx = lock(&self.event_tx);
        let Some(tx) = tx.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!("Event channel full, dropping event: {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn spawn_connect(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let token = self.token.clone();
        let config = self.config.clone();
        let session_tx = self.session_tx.clone();

        let task = self.runtime.spawn(async move {
            let result = open_session(&config, &token, generation, session_tx).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let event = match result {
                Ok(sink) => CoreEvent::Opened {
                    generation,
                    sink: Box::new(sink),
                },
                Err(error) => CoreEvent::ConnectFailed { generation, error },
            };
            inner.process(event);
            inner.wake.notify_one();
        });

        if let Some(previous) = lock(&self.connect_task).replace(task) {
            previous.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.core
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .destroy();
        if let Some(task) = self.connect_task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        if let Some(driver) = self.driver.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            driver.abort();
        }
    }
}

/// Fetch a token, build the URL and open a transport.
async fn open_session(
    config: &WebSocketConfig,
    token: &TokenSource,
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> WsResult<SessionSink> {
    let token = token.fetch().await?;
    let url = build_url(&config.base_url, &config.path, token.as_deref())?;
    tracing::debug!("Opening session {} to {}{}", generation, config.base_url, config.path);
    ConnectionSession::open(&url, config.connect_timeout(), generation, events).await
}

/// Background task: session events and timers into the core.
async fn run_driver(
    inner: Weak<Inner>,
    wake: Arc<Notify>,
    mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
) {
    loop {
        let deadline = match inner.upgrade() {
            Some(inner) => inner.core().next_deadline(),
            None => break,
        };

        let timer = async {
            match deadline {
                Some((_, at)) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = session_rx.recv() => {
                let Some(SessionEvent { generation, kind }) = event else {
                    break;
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let event = match kind {
                    SessionEventKind::Message(text) => CoreEvent::Frame { generation, text },
                    SessionEventKind::Closed(info) => CoreEvent::Closed { generation, info },
                };
                inner.process(event);
            }
            _ = wake.notified() => {}
            _ = timer => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if let Some((kind, _)) = deadline {
                    inner.process(CoreEvent::TimerFired(kind));
                }
            }
        }
    }
    tracing::debug!("Client driver stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pin_project! {
    /// Stream of [`WsEvent`]s from [`WebSocketClient::events`].
    pub struct EventStream {
        #[pin]
        rx: mpsc::Receiver<WsEvent>,
    }
}

impl Stream for EventStream {
    type Item = WsEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        this.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn unreachable_config() -> WebSocketConfig {
        WebSocketConfig {
            // Nothing listens on the discard port
            base_url: "ws://127.0.0.1:9".to_string(),
            reconnect_interval_ms: 50,
            max_reconnect_attempts: 2,
            connect_timeout_ms: 1_000,
            ..WebSocketConfig::default()
        }
    }

    #[test]
    fn test_new_without_runtime_is_error() {
        let result = WebSocketClient::new(WebSocketConfig::default(), TokenSource::Anonymous);
        assert!(matches!(result, Err(WebSocketError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = WebSocketConfig {
            heartbeat_timeout_ms: 1_000,
            heartbeat_interval_ms: 1_000,
            ..WebSocketConfig::default()
        };
        assert!(WebSocketClient::new(config, TokenSource::Anonymous).is_err());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_queued() {
        let client = WebSocketClient::new(unreachable_config(), TokenSource::Anonymous).unwrap();
        assert_eq!(client.status(), ConnectionState::Idle);
        assert!(!client.send("ping_test", serde_json::json!({"n": 1})));
        assert!(!client.send("ping_test", serde_json::json!({"n": 1})));
        assert_eq!(client.queued_messages(), 1);
    }

    #[tokio::test]
    async fn test_blank_token_is_auth_rejection() {
        let client =
            WebSocketClient::new(unreachable_config(), TokenSource::new_static("   ")).unwrap();
        let mut events = client.events().unwrap();
        client.connect();

        let rejected = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.next().await {
                if matches!(event, WsEvent::AuthRejected { .. }) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();

        assert!(rejected);
        assert!(client.is_auth_rejected());
        assert_eq!(client.status(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_unreachable_server_exhausts_attempts() {
        let client = WebSocketClient::new(unreachable_config(), TokenSource::Anonymous).unwrap();
        let mut events = client.events().unwrap();
        client.connect();

        let attempts = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = events.next().await {
                if let WsEvent::MaxReconnectReached { attempts } = event {
                    return attempts;
                }
            }
            0
        })
        .await
        .unwrap();

        assert_eq!(attempts, 2);
        assert_eq!(client.status(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_coalesced_while_token_pending() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let token = TokenSource::from_async(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        });
        let client = WebSocketClient::new(unreachable_config(), token).unwrap();
        let mut events = client.events().unwrap();

        client.connect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.connect();
        client.connect();
        assert_eq!(client.status(), ConnectionState::Connecting);

        // The blank token resolves after the sleep: one fetch, no retry
        loop {
            match events.next().await {
                Some(WsEvent::AuthRejected { .. }) => break,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(client.is_auth_rejected());
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let client = WebSocketClient::new(unreachable_config(), TokenSource::Anonymous).unwrap();
        assert!(client.events().is_some());
        assert!(client.events().is_none());
    }

    #[tokio::test]
    async fn test_destroy_ends_event_stream() {
        let client = WebSocketClient::new(unreachable_config(), TokenSource::Anonymous).unwrap();
        let mut events = client.events().unwrap();
        client.on("tick", |_| {});
        client.destroy();
        client.destroy();

        assert!(client.is_destroyed());
        client.connect();
        assert_eq!(client.status(), ConnectionState::Closed);
        assert!(!client.send("tick", serde_json::json!(1)));
        assert_eq!(client.queued_messages(), 0);

        let next = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let client = WebSocketClient::new(unreachable_config(), TokenSource::Anonymous).unwrap();
        let other = client.clone();
        other.send("x", serde_json::json!(1));
        assert!(client.ptr_eq(&other));
        assert_eq!(client.queued_messages(), 1);
    }
}
