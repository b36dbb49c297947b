//! WebSocket JSON-RPC client with subscription routing.
//!
//! A background task owns the socket. Callers talk to it over a command
//! channel; responses come back on per-request oneshots and subscription
//! notifications are routed through the [`SubscriptionManager`]. The
//! connection is not re-established: when it ends every pending request and
//! every subscription fails with [`SourceError::Disconnected`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainrelay_core::{SourceError, Subscription};

use crate::request::{JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::subscriptions::{SubscriptionId, SubscriptionManager};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply<T> = oneshot::Sender<Result<T, SourceError>>;

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Deadline for a single request/response round trip. `None` waits
    /// until the connection ends.
    pub request_timeout: Option<Duration>,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Where a response should be delivered.
enum Pending {
    Call(Reply<Value>),
    /// `eth_subscribe`: registered with the manager before any later frame
    /// is read, so no notification can race the registration.
    Subscribe(Reply<(SubscriptionId, Subscription<Value>)>),
}

impl Pending {
    fn fail(self, err: SourceError) {
        match self {
            Self::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Subscribe(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send { req: JsonRpcRequest, reply: Pending },
    /// The caller gave up on request `id`; drop its entry.
    Forget(u64),
    Close,
}

/// WebSocket JSON-RPC client multiplexing requests and subscriptions over
/// one connection.
pub struct WsRpcClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subscriptions: SubscriptionManager,
    connected: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    next_id: AtomicU64,
    config: WsClientConfig,
}

impl WsRpcClient {
    /// Open the socket and start the background task. The task stops when
    /// `cancel` fires, the client is dropped, or the node closes the
    /// connection.
    pub async fn connect(
        url: impl Into<String>,
        config: WsClientConfig,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let url = url.into();
        info!(url = %url, "connecting via WebSocket");
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SourceError::Disconnected(format!("connect to {url}: {e}")))?;
        info!(url = %url, "WebSocket connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new();
        let connected = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(AtomicUsize::new(0));

        tokio::spawn(ws_task(
            url.clone(),
            ws,
            cmd_rx,
            subscriptions.clone(),
            Arc::clone(&connected),
            Arc::clone(&in_flight),
            cancel,
        ));

        Ok(Self {
            url,
            cmd_tx,
            subscriptions,
            connected,
            in_flight,
            next_id: AtomicU64::new(1),
            config,
        })
    }

    /// Call `method` and decode its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, SourceError> {
        let (tx, rx) = oneshot::channel();
        let id = self.send(method, params, Pending::Call(tx))?;
        let value = self.await_reply(id, rx).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Open an `eth_subscribe` stream of raw notification payloads.
    ///
    /// `kind` is the subscription type (e.g. `"newHeads"`, `"logs"`).
    pub async fn subscribe(
        &self,
        kind: &str,
        params: Vec<Value>,
    ) -> Result<(SubscriptionId, Subscription<Value>), SourceError> {
        let params = std::iter::once(Value::String(kind.to_string()))
            .chain(params)
            .collect();
        let (tx, rx) = oneshot::channel();
        let request_id = self.send("eth_subscribe", params, Pending::Subscribe(tx))?;
        let (id, sub) = self.await_reply(request_id, rx).await?;
        debug!(kind, subscription = %id, "subscribed");
        Ok((id, sub))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions on this connection.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Requests sent and still waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn send(&self, method: &str, params: Vec<Value>, reply: Pending) -> Result<u64, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        self.cmd_tx
            .send(WsCommand::Send { req, reply })
            .map_err(|_| SourceError::Disconnected("WS task closed".into()))?;
        Ok(id)
    }

    async fn await_reply<T>(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        let reply = match self.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    debug!(id, "request timed out");
                    let _ = self.cmd_tx.send(WsCommand::Forget(id));
                    return Err(SourceError::Timeout {
                        ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };
        reply.map_err(|_| SourceError::Disconnected("WS response dropped".into()))?
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
    connected: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break "shutting down".to_string();
            }
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break "client closed".to_string();
                }
                Some(WsCommand::Send { req, reply }) => {
                    let text = match serde_json::to_string(&req) {
                        Ok(text) => text,
                        Err(e) => {
                            reply.fail(SourceError::Decode(e));
                            continue;
                        }
                    };
                    pending.insert(req.id, reply);
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break format!("send failed: {e}");
                    }
                }
                Some(WsCommand::Forget(id)) => {
                    pending.remove(&id);
                }
            },
            msg = stream.next() => match msg {
                None => break "stream ended".to_string(),
                Some(Err(e)) => break format!("receive error: {e}"),
                Some(Ok(Message::Text(text))) => {
                    handle_message(&text, &mut pending, &subscriptions);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!("closed by node: {}", frame.reason),
                        None => "closed by node".to_string(),
                    };
                }
                Some(Ok(_)) => {}
            },
        }
        in_flight.store(pending.len(), Ordering::Relaxed);
    };

    connected.store(false, Ordering::Relaxed);
    if cancel.is_cancelled() {
        info!(url = %url, "WebSocket closed");
    } else {
        warn!(url = %url, reason = %reason, "WebSocket connection ended");
    }
    for (_, reply) in pending.drain() {
        reply.fail(SourceError::Disconnected(reason.clone()));
    }
    in_flight.store(0, Ordering::Relaxed);
    subscriptions.fail_all(&reason);
}

fn handle_message(
    text: &str,
    pending: &mut HashMap<u64, Pending>,
    subscriptions: &SubscriptionManager,
) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
        if let Some(params) = val.get("params") {
            if let Some(id) = params["subscription"].as_str() {
                subscriptions.dispatch(&SubscriptionId(id.to_string()), params["result"].clone());
            }
        }
        return;
    }

    let resp: JsonRpcResponse = match serde_json::from_value(val) {
        Ok(resp) => resp,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognised WS message");
            return;
        }
    };
    let RpcId::Number(id) = resp.id else {
        debug!(id = ?resp.id, "response with foreign id");
        return;
    };
    let Some(reply) = pending.remove(&id) else {
        debug!(id, "response for unknown or expired request");
        return;
    };

    match reply {
        Pending::Call(tx) => {
            let _ = tx.send(resp.into_result().map_err(SourceError::from));
        }
        Pending::Subscribe(tx) => {
            let result = resp
                .into_result()
                .map_err(SourceError::from)
                .and_then(|value| match value {
                    Value::String(id) => Ok(SubscriptionId(id)),
                    other => Err(SourceError::Other(format!(
                        "eth_subscribe returned a non-string id: {other}"
                    ))),
                })
                .map(|id| {
                    let sub = subscriptions.register(id.clone());
                    (id, sub)
                });
            if let Err(Ok((id, _))) = tx.send(result) {
                subscriptions.remove(&id);
            }
        }
    }
}
