//! One physical WebSocket connection.
//!
//! A session is opened once and never retries on its own. Its reader task
//! reports every inbound text frame and exactly one close through the event
//! channel handed to [`ConnectionSession::open`]; its writer task drains
//! outbound frames queued through the [`FrameSink`] half.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::types::{CloseInfo, CLOSE_ABNORMAL};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Outbound half of an open session, as seen by the state machine.
pub trait FrameSink: Send {
    /// Queue a text frame. Returns `false` if the session is no longer open.
    fn send_raw(&mut self, text: String) -> bool;

    /// Start a local close. Further `send_raw` calls return `false`.
    fn close(&mut self, code: u16, reason: &str);

    fn is_open(&self) -> bool;
}

/// Something observed on a session, tagged with the session's generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub generation: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    Message(String),
    Closed(CloseInfo),
}

/// Build the connection URL: `base` + `path`, with `token` set as the
/// `token` query parameter. `http(s)` schemes are rewritten to `ws(s)`.
pub fn build_url(base: &str, path: &str, token: Option<&str>) -> WsResult<String> {
    let base = base.trim();
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };

    if !base.starts_with("ws://") && !base.starts_with("wss://") {
        return Err(WebSocketError::InvalidUrl(format!(
            "unsupported scheme in '{}'",
            base
        )));
    }

    let (base_path, base_query) = match base.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (base, None),
    };

    let (path, path_query) = match path.trim().split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path.trim(), None),
    };
    let mut url = if path.is_empty() {
        base_path
    } else {
        format!(
            "{}/{}",
            base_path.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let mut params: Vec<String> = base_query
        .as_deref()
        .into_iter()
        .chain(path_query)
        .flat_map(|q| q.split('&'))
        .filter(|p| !p.is_empty())
        .filter(|p| token.is_none() || !p.starts_with("token="))
        .map(str::to_string)
        .collect();

    if let Some(token) = token {
        params.push(format!("token={}", urlencoding::encode(token)));
    }

    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }

    url.as_str()
        .into_client_request()
        .map_err(|e| WebSocketError::InvalidUrl(e.to_string()))?;

    Ok(url)
}

/// Opens sessions.
#[derive(Debug)]
pub struct ConnectionSession;

impl ConnectionSession {
    /// Open the transport and start the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// [`WebSocketError::InvalidUrl`] if no request can be built from `url`,
    /// [`WebSocketError::Timeout`] if the handshake exceeds
    /// `connect_timeout`, and the mapped transport error otherwise
    /// (including [`WebSocketError::HandshakeRejected`] for HTTP refusals).
    pub async fn open(
        url: &str,
        connect_timeout: Duration,
        generation: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> WsResult<SessionSink> {
        let request = url
            .into_client_request()
            .map_err(|e| WebSocketError::InvalidUrl(e.to_string()))?;

        let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| WebSocketError::Timeout)?
            .map_err(WebSocketError::from)?;

        let (sink, source) = stream.split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        // Detached: exits after flushing a close frame or once the sink half is dropped
        tokio::spawn(write_loop(sink, writer_rx, open.clone()));
        let reader = tokio::spawn(read_loop(
            source,
            writer_tx.clone(),
            open.clone(),
            generation,
            events,
        ));

        tracing::info!("Session {} opened", generation);

        Ok(SessionSink {
            generation,
            writer_tx,
            open,
            reader,
        })
    }
}

/// Tokio-backed [`FrameSink`] for an open session.
#[derive(Debug)]
pub struct SessionSink {
    generation: u64,
    writer_tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SessionSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl FrameSink for SessionSink {
    fn send_raw(&mut self, text: String) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        self.writer_tx.send(Message::Text(text.into())).is_ok()
    }

    fn close(&mut self, code: u16, reason: &str) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.writer_tx.send(Message::Close(Some(frame)));
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for SessionSink {
    fn drop(&mut self) {
        // Otherwise the reader lingers until the remote side hangs up
        self.reader.abort();
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut rx: mpsc::UnboundedReceiver<Message>,
    open: Arc<AtomicBool>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            tracing::warn!("Failed to write frame: {}", e);
            open.store(false, Ordering::SeqCst);
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut source: WsSource,
    writer_tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let emit = |kind: SessionEventKind| {
        let _ = events.send(SessionEvent { generation, kind });
    };

    let close = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                emit(SessionEventKind::Message(text.to_string()));
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => emit(SessionEventKind::Message(text)),
                Err(_) => tracing::warn!("Ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = writer_tx.send(Message::Pong(data));
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = extract_close(frame.as_ref());
                tracing::info!("WebSocket closed: code {}, reason: {}", code, reason);
                break CloseInfo::new(code, reason, true);
            }
            Some(Err(e)) => {
                tracing::error!("WebSocket error: {}", e);
                break CloseInfo::abnormal(e.to_string());
            }
            None => {
                tracing::info!("WebSocket stream ended");
                break CloseInfo::abnormal("Stream ended");
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    emit(SessionEventKind::Closed(close));
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (CLOSE_ABNORMAL, "No close frame".into()),
    }
}
