//! chainrelay-ws: WebSocket JSON-RPC chain event source.
//!
//! One connection carries every request and subscription. There is no
//! reconnect: a dropped connection fails every stream, which ends the relay
//! session that consumes them.
//!
//! ```no_run
//! # async fn demo() -> Result<(), chainrelay_core::SourceError> {
//! use chainrelay_ws::{WsChainSource, WsClientConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let source = WsChainSource::connect("wss://arb1.example/ws", WsClientConfig::default(), cancel).await?;
//! # let _ = source;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod request;
pub mod source;
pub mod subscriptions;

pub use client::{WsClientConfig, WsRpcClient};
pub use source::WsChainSource;
pub use subscriptions::{SubscriptionId, SubscriptionManager};
