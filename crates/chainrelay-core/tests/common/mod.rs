//! In-memory chain event source shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use chainrelay_core::{
    Block, BlockTransaction, ChainEventSource, Header, Log, LogFilter, PooledTransaction,
    SourceError, StreamKind, Subscription, SubscriptionSender, TraceCall,
};

/// Test-side senders for every stream of a [`FakeSource`].
pub struct Feeds {
    pub headers: SubscriptionSender<Header>,
    pub logs: SubscriptionSender<Log>,
    pub pending: SubscriptionSender<PooledTransaction>,
    pub traces: SubscriptionSender<TraceCall>,
    pub block_txs: SubscriptionSender<BlockTransaction>,
}

#[derive(Default)]
struct Slots {
    headers: Option<Subscription<Header>>,
    logs: Option<Subscription<Log>>,
    pending: Option<Subscription<PooledTransaction>>,
    traces: Option<Subscription<TraceCall>>,
    block_txs: Option<Subscription<BlockTransaction>>,
}

pub struct FakeSource {
    slots: Mutex<Slots>,
    subscribe_failures: Mutex<HashMap<StreamKind, SourceError>>,
    blocks: Mutex<HashMap<String, Block>>,
    block_fetch_failure: Mutex<Option<SourceError>>,
    block_lookups: AtomicUsize,
    /// Number of non-subscribe streams handed out.
    pub streams_requested: AtomicUsize,
    pub log_filters: Mutex<Vec<LogFilter>>,
}

impl FakeSource {
    pub fn new() -> (Arc<Self>, Feeds) {
        let (headers_tx, headers) = Subscription::channel();
        let (logs_tx, logs) = Subscription::channel();
        let (pending_tx, pending) = Subscription::channel();
        let (traces_tx, traces) = Subscription::channel();
        let (block_txs_tx, block_txs) = Subscription::channel();

        let source = Arc::new(Self {
            slots: Mutex::new(Slots {
                headers: Some(headers),
                logs: Some(logs),
                pending: Some(pending),
                traces: Some(traces),
                block_txs: Some(block_txs),
            }),
            subscribe_failures: Mutex::new(HashMap::new()),
            blocks: Mutex::new(HashMap::new()),
            block_fetch_failure: Mutex::new(None),
            block_lookups: AtomicUsize::new(0),
            streams_requested: AtomicUsize::new(0),
            log_filters: Mutex::new(Vec::new()),
        });
        let feeds = Feeds {
            headers: headers_tx,
            logs: logs_tx,
            pending: pending_tx,
            traces: traces_tx,
            block_txs: block_txs_tx,
        };
        (source, feeds)
    }

    pub fn fail_subscribe(&self, kind: StreamKind, err: SourceError) {
        self.subscribe_failures.lock().unwrap().insert(kind, err);
    }

    pub fn fail_block_fetch(&self, err: SourceError) {
        *self.block_fetch_failure.lock().unwrap() = Some(err);
    }

    /// Serve `block` for lookups of its own hash.
    pub fn insert_block(&self, block: Block) {
        let hash = block.hash.clone();
        self.insert_block_at(&hash, block);
    }

    /// Serve `block` for lookups of `hash`, whatever the block's own hash.
    pub fn insert_block_at(&self, hash: &str, block: Block) {
        self.blocks.lock().unwrap().insert(hash.to_string(), block);
    }

    pub fn block_lookups(&self) -> usize {
        self.block_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainEventSource for FakeSource {
    async fn subscribe_headers(&self) -> Result<Subscription<Header>, SourceError> {
        if let Some(err) = self.subscribe_failures.lock().unwrap().remove(&StreamKind::Headers) {
            return Err(err);
        }
        Ok(self.slots.lock().unwrap().headers.take().expect("headers subscribed twice"))
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<Log>, SourceError> {
        self.log_filters.lock().unwrap().push(filter.clone());
        if let Some(err) = self.subscribe_failures.lock().unwrap().remove(&StreamKind::Logs) {
            return Err(err);
        }
        Ok(self.slots.lock().unwrap().logs.take().expect("logs subscribed twice"))
    }

    fn monitor_pending_transactions(&self) -> Subscription<PooledTransaction> {
        self.streams_requested.fetch_add(1, Ordering::SeqCst);
        self.slots.lock().unwrap().pending.take().expect("pending requested twice")
    }

    fn stream_trace_calls(&self) -> Subscription<TraceCall> {
        self.streams_requested.fetch_add(1, Ordering::SeqCst);
        self.slots.lock().unwrap().traces.take().expect("traces requested twice")
    }

    fn stream_block_transactions(&self) -> Subscription<BlockTransaction> {
        self.streams_requested.fetch_add(1, Ordering::SeqCst);
        self.slots.lock().unwrap().block_txs.take().expect("block txs requested twice")
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, SourceError> {
        self.block_lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.block_fetch_failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.blocks.lock().unwrap().get(hash).cloned())
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

pub fn header(number: u64, hash: &str) -> Header {
    serde_json::from_value(json!({
        "hash": hash,
        "parentHash": "0x00",
        "number": format!("{number:#x}"),
        "timestamp": "0x65000000",
    }))
    .unwrap()
}

pub fn block(number: u64, hash: &str) -> Block {
    serde_json::from_value(json!({
        "hash": hash,
        "parentHash": "0x00",
        "number": format!("{number:#x}"),
        "timestamp": "0x65000000",
        "transactions": [{"hash": "0xt1"}],
    }))
    .unwrap()
}

pub fn log(tx_hash: &str, removed: bool) -> Log {
    serde_json::from_value(json!({
        "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
        "data": "0x01",
        "blockNumber": "0x10",
        "transactionHash": tx_hash,
        "logIndex": "0x0",
        "removed": removed,
    }))
    .unwrap()
}

pub fn pooled(hash: &str) -> PooledTransaction {
    serde_json::from_value(json!({"hash": hash, "nonce": "0x1"})).unwrap()
}

pub fn trace(tx_hash: &str) -> TraceCall {
    TraceCall {
        tx_hash: tx_hash.to_string(),
        result: json!({"type": "CALL", "from": "0x1", "to": "0x2"}),
    }
}

pub fn block_tx(hash: &str) -> BlockTransaction {
    serde_json::from_value(json!({"hash": hash, "blockHash": "0xb", "blockNumber": "0x10"}))
        .unwrap()
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `fut`, panicking after two seconds.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}
