//! The `ChainEventSource` trait: the upstream side of the relay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;
use crate::stream::Subscription;
use crate::types::{Block, BlockTransaction, Header, Log, PooledTransaction, TraceCall};

/// Address filter for the log subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only deliver logs from these contracts (empty = all addresses).
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl LogFilter {
    /// A filter that matches every address.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, addr: impl Into<String>) -> Self {
        self.addresses.push(addr.into());
        self
    }

    /// The `eth_subscribe("logs", ...)` filter object.
    pub fn to_params(&self) -> Value {
        if self.addresses.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::json!({ "address": self.addresses })
        }
    }
}

/// Independent asynchronous event streams from a chain node.
///
/// Each returned [`Subscription`] fails on its own; the relay decides what a
/// failure means. Implementations own whatever background tasks feed the
/// streams and stop them when their connection is torn down.
#[async_trait]
pub trait ChainEventSource: Send + Sync + 'static {
    /// Subscribe to new block headers.
    async fn subscribe_headers(&self) -> Result<Subscription<Header>, SourceError>;

    /// Subscribe to new logs matching `filter`.
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<Log>, SourceError>;

    /// Start draining the pending transaction pool. Failures, including a
    /// rejected subscribe, surface on the stream's error signal.
    fn monitor_pending_transactions(&self) -> Subscription<PooledTransaction>;

    /// Stream call traces of newly mined transactions.
    fn stream_trace_calls(&self) -> Subscription<TraceCall>;

    /// Stream transactions of newly mined blocks.
    fn stream_block_transactions(&self) -> Subscription<BlockTransaction>;

    /// Fetch a full block by hash. `Ok(None)` if the node does not know it.
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, SourceError>;
}
