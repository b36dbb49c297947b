//! `WsChainSource`: [`ChainEventSource`] over a node's WebSocket endpoint.
//!
//! | Stream                 | Node calls                                                     |
//! |------------------------|----------------------------------------------------------------|
//! | headers                | `eth_subscribe("newHeads")`                                    |
//! | logs                   | `eth_subscribe("logs", filter)`                                |
//! | pending transactions   | `eth_subscribe("newPendingTransactions")` + `eth_getTransactionByHash` |
//! | trace calls            | `newHeads` + `debug_traceBlockByHash(hash, callTracer)`        |
//! | block transactions     | `newHeads` + `eth_getBlockByHash(hash, true)`                  |
//!
//! Every typed stream is fed by its own task. Payloads that fail to decode
//! are logged and skipped; a failure of the underlying subscription is
//! passed through as the stream's terminal error.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainrelay_core::{
    Block, BlockTransaction, ChainEventSource, Delivery, Header, Log, LogFilter,
    PooledTransaction, SourceError, StreamKind, Subscription, SubscriptionSender, TraceCall,
};

use crate::client::{WsClientConfig, WsRpcClient};

/// Chain event source backed by one WebSocket connection.
#[derive(Clone)]
pub struct WsChainSource {
    client: Arc<WsRpcClient>,
    cancel: CancellationToken,
}

impl WsChainSource {
    /// Connect to `url`. Feeder tasks and the socket stop when `cancel`
    /// fires.
    pub async fn connect(
        url: impl Into<String>,
        config: WsClientConfig,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let client = WsRpcClient::connect(url, config, cancel.clone()).await?;
        Ok(Self::new(Arc::new(client), cancel))
    }

    pub fn new(client: Arc<WsRpcClient>, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    pub fn client(&self) -> &WsRpcClient {
        &self.client
    }

    /// Subscribe to `newHeads` and feed `T`s produced per header by `fetch`.
    /// A failed fetch skips that block.
    fn follow_heads<T, F, Fut>(&self, kind: StreamKind, fetch: F) -> Subscription<T>
    where
        T: Send + 'static,
        F: Fn(Arc<WsRpcClient>, Header) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<T>, SourceError>> + Send,
    {
        let (mut tx, sub) = Subscription::channel();
        let client = Arc::clone(&self.client);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let subscribed =
                subscribe_typed::<Header>(&client, "newHeads", vec![], kind, &cancel).await;
            let mut headers = match subscribed {
                Ok(headers) => headers,
                Err(e) => {
                    tx.fail(e);
                    return;
                }
            };
            info!(%kind, "following new heads");

            loop {
                let Some(header) = next_event(&mut headers, &mut tx, &cancel).await else {
                    return;
                };
                let hash = header.hash.clone();
                match fetch(Arc::clone(&client), header).await {
                    Ok(items) => {
                        debug!(%kind, hash = %hash, count = items.len(), "block expanded");
                        for item in items {
                            if !tx.send(item) {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(%kind, hash = %hash, error = %e, "block fetch failed, skipping"),
                }
            }
        });
        sub
    }
}

#[async_trait]
impl ChainEventSource for WsChainSource {
    async fn subscribe_headers(&self) -> Result<Subscription<Header>, SourceError> {
        subscribe_typed(&self.client, "newHeads", vec![], StreamKind::Headers, &self.cancel).await
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<Log>, SourceError> {
        subscribe_typed(
            &self.client,
            "logs",
            vec![filter.to_params()],
            StreamKind::Logs,
            &self.cancel,
        )
        .await
    }

    fn monitor_pending_transactions(&self) -> Subscription<PooledTransaction> {
        let (mut tx, sub) = Subscription::channel();
        let client = Arc::clone(&self.client);
        let cancel = self.cancel.clone();
        let kind = StreamKind::PendingTransactions;

        tokio::spawn(async move {
            let subscribed = client.subscribe("newPendingTransactions", vec![]).await;
            let mut pending = match subscribed {
                Ok((_, sub)) => sub,
                Err(e) => {
                    tx.fail(subscribe_failed(kind, e));
                    return;
                }
            };
            info!("monitoring pending transactions");

            loop {
                let Some(value) = next_event(&mut pending, &mut tx, &cancel).await else {
                    return;
                };
                let fetched = match value {
                    // Some nodes push full transaction objects.
                    Value::Object(_) => serde_json::from_value(value)
                        .map(Some)
                        .map_err(SourceError::from),
                    Value::String(hash) => {
                        client
                            .call::<Option<PooledTransaction>>(
                                "eth_getTransactionByHash",
                                vec![json!(hash)],
                            )
                            .await
                    }
                    other => {
                        debug!(payload = %other, "unexpected pending transaction payload");
                        continue;
                    }
                };
                match fetched {
                    Ok(Some(pooled)) => {
                        if !tx.send(pooled) {
                            return;
                        }
                    }
                    Ok(None) => debug!("pending transaction already gone"),
                    Err(e) => warn!(error = %e, "fetching pending transaction failed"),
                }
            }
        });
        sub
    }

    fn stream_trace_calls(&self) -> Subscription<TraceCall> {
        self.follow_heads(StreamKind::TraceCalls, trace_block)
    }

    fn stream_block_transactions(&self) -> Subscription<BlockTransaction> {
        self.follow_heads(StreamKind::BlockTransactions, block_transactions)
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, SourceError> {
        self.client
            .call("eth_getBlockByHash", vec![json!(hash), json!(true)])
            .await
    }
}

/// One entry of a `debug_traceBlockByHash` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockTraceEntry {
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    result: Value,
}

async fn trace_block(
    client: Arc<WsRpcClient>,
    header: Header,
) -> Result<Vec<TraceCall>, SourceError> {
    let entries: Vec<BlockTraceEntry> = client
        .call(
            "debug_traceBlockByHash",
            vec![json!(header.hash), json!({ "tracer": "callTracer" })],
        )
        .await?;
    Ok(into_trace_calls(entries))
}

async fn block_transactions(
    client: Arc<WsRpcClient>,
    header: Header,
) -> Result<Vec<BlockTransaction>, SourceError> {
    let block: Option<Block> = client
        .call("eth_getBlockByHash", vec![json!(header.hash), json!(true)])
        .await?;
    Ok(block.map(|b| b.full_transactions()).unwrap_or_default())
}

/// Entries without a transaction hash (older node versions) are dropped.
fn into_trace_calls(entries: Vec<BlockTraceEntry>) -> Vec<TraceCall> {
    entries
        .into_iter()
        .filter_map(|entry| {
            Some(TraceCall {
                tx_hash: entry.tx_hash?,
                result: entry.result,
            })
        })
        .collect()
}

fn subscribe_failed(kind: StreamKind, err: SourceError) -> SourceError {
    match err {
        err @ (SourceError::Disconnected(_) | SourceError::Timeout { .. }) => err,
        other => SourceError::Subscribe {
            kind,
            reason: other.to_string(),
        },
    }
}

/// `eth_subscribe` and decode each notification as `T`.
async fn subscribe_typed<T>(
    client: &WsRpcClient,
    method: &str,
    params: Vec<Value>,
    kind: StreamKind,
    cancel: &CancellationToken,
) -> Result<Subscription<T>, SourceError>
where
    T: DeserializeOwned + Send + 'static,
{
    let (id, raw) = client
        .subscribe(method, params)
        .await
        .map_err(|e| subscribe_failed(kind, e))?;
    info!(%kind, subscription = %id, "subscribed");
    Ok(decode_stream(kind, raw, cancel.clone()))
}

fn decode_stream<T>(
    kind: StreamKind,
    mut raw: Subscription<Value>,
    cancel: CancellationToken,
) -> Subscription<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let (mut tx, sub) = Subscription::channel();
    tokio::spawn(async move {
        while let Some(value) = next_event(&mut raw, &mut tx, &cancel).await {
            match serde_json::from_value::<T>(value) {
                Ok(event) => {
                    if !tx.send(event) {
                        return;
                    }
                }
                Err(e) => warn!(%kind, error = %e, "skipping undecodable notification"),
            }
        }
    });
    sub
}

/// Next raw event from `upstream`, or `None` once the feeder should stop.
/// Upstream failure is forwarded downstream before returning `None`.
async fn next_event<U, D>(
    upstream: &mut Subscription<U>,
    downstream: &mut SubscriptionSender<D>,
    cancel: &CancellationToken,
) -> Option<U> {
    let delivery = tokio::select! {
        _ = cancel.cancelled() => return None,
        delivery = upstream.recv() => delivery,
    };
    match delivery {
        Delivery::Event(event) => Some(event),
        Delivery::Failed(err) => {
            downstream.fail(err);
            None
        }
        Delivery::Closed => {
            downstream.fail(SourceError::Closed);
            None
        }
    }
}
