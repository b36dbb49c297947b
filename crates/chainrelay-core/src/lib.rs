//! chainrelay-core: the event multiplexing and republishing pipeline.
//!
//! # Overview
//!
//! ChainRelay takes live event streams from a blockchain node and republishes
//! them onto a publish/subscribe bus under a deterministic subject layout.
//! The core crate defines:
//!
//! - [`ChainEventSource`]: the upstream contract (headers, logs, pending pool,
//!   trace calls, block transactions)
//! - [`Publisher`] / [`PublisherExt`]: the downstream bus contract
//! - [`Subjects`]: the subject namer
//! - [`Normalizer`]: raw event → canonical message
//! - [`Relay`]: the control loop that ties them together
//!
//! ## Architecture
//! ```text
//! ChainEventSource (one task per stream kind)
//!       │  Subscription<T>  (events + one terminal error)
//!       ▼
//! Relay control loop  ── select! over cancel / errors / events
//!       │
//!       ▼
//! Normalizer  (header → head + block, drop removed logs)
//!       │
//!       ▼
//! Publisher::publish(subject, bytes)
//! ```

pub mod error;
pub mod normalizer;
pub mod publisher;
pub mod relay;
pub mod source;
pub mod stream;
pub mod subjects;
pub mod types;

pub use error::{NormalizationError, PublishError, RelayError, SourceError};
pub use normalizer::Normalizer;
pub use publisher::{MemoryPublisher, Publisher, PublisherExt};
pub use relay::{Relay, RelayConfig, RelayHandle, RelayMetrics, RelayState};
pub use source::{ChainEventSource, LogFilter};
pub use stream::{Delivery, StreamKind, Subscription, SubscriptionSender};
pub use subjects::Subjects;
pub use types::{Block, BlockTransaction, Head, Header, Log, PooledTransaction, TraceCall};
