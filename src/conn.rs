use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Result, WebshotError};
use crate::protocol::{self, Command, Message};

type Sink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// A pending command awaiting its response.
type Pending = oneshot::Sender<std::result::Result<Value, WebshotError>>;

/// Events routed to a tab's event worker by `sessionId`.
pub type EventSender = mpsc::UnboundedSender<protocol::Event>;

/// The single duplex channel to the browser: one reader task (the event
/// pump), serialized writes, a pending-id map, and session fan-out.
/// Corresponds to `webcap.browser.Browser`'s websocket plumbing plus
/// `_message_handler`.
pub struct Connection {
    sink: Mutex<Sink>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    sessions: RwLock<HashMap<String, EventSender>>,
    closed: Arc<tokio::sync::Notify>,
}

impl Connection {
    pub async fn connect(ws_url: &str) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>)> {
        let (stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = stream.split();

        let conn = Arc::new(Connection {
            sink: Mutex::new(sink),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            closed: Arc::new(tokio::sync::Notify::new()),
        });

        let pump_conn = conn.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text.to_string(),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                };
                pump_conn.dispatch(&text).await;
            }
            pump_conn.teardown().await;
        });

        Ok((conn, handle))
    }

    async fn dispatch(&self, text: &str) {
        let message: Message = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to parse frame");
                return;
            }
        };
        match message {
            Message::Response(resp) => {
                let waiter = self.pending.lock().await.remove(&resp.id);
                let Some(waiter) = waiter else {
                    trace!(id = resp.id, "response for unknown/already-completed id");
                    return;
                };
                let result = if let Some(error) = resp.error {
                    let retry = error.message.to_lowercase().contains("not available")
                        || error.message.to_lowercase().contains("no resource");
                    Err(if retry {
                        WebshotError::protocol_retryable(error.message)
                    } else {
                        WebshotError::protocol(error.message)
                    })
                } else {
                    Ok(resp.result.unwrap_or(Value::Null))
                };
                let _ = waiter.send(result);
            }
            Message::Event(event) => {
                let Some(session_id) = &event.session_id else {
                    debug!(method = %event.method, "event with no sessionId");
                    return;
                };
                let sessions = self.sessions.read().await;
                match sessions.get(session_id) {
                    Some(sender) => {
                        let _ = sender.send(event);
                    }
                    None if protocol::is_benign_unmatched_event(&event.method) => {}
                    None => {
                        debug!(method = %event.method, session_id, "event for unregistered session");
                    }
                }
            }
        }
    }

    async fn teardown(&self) {
        let mut pending = self.pending.lock().await;
        for (_, waiter) in pending.drain() {
            let _ = waiter.send(Err(WebshotError::BrowserStopped));
        }
        self.sessions.write().await.clear();
        self.closed.notify_waiters();
    }

    pub async fn register_session(&self, session_id: String, sender: EventSender) {
        self.sessions.write().await.insert(session_id, sender);
    }

    pub async fn unregister_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Sends a single request frame and awaits its matching response,
    /// without any capability check or retry — those live in `Browser`.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<String>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let command = Command {
            id,
            method: method.to_string(),
            params,
            session_id,
        };
        let frame = serde_json::to_string(&command)?;
        {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                self.pending.lock().await.remove(&id);
                return Err(WebshotError::Ws(e));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WebshotError::BrowserStopped),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(WebshotError::Timeout(timeout))
            }
        }
    }

    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
        self.sessions.write().await.clear();
    }
}
