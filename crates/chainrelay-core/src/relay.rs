//! `Relay`: the control loop that fans every stream into one task.
//!
//! # Lifecycle
//! ```text
//! Starting ──subscribe ok──▶ Running ──cancel / fatal──▶ Draining ──▶ Stopped
//!     └──────────subscribe failed──────────────────────────────────────▲
//! ```
//!
//! Only the control task publishes. A stream failure ends the session and is
//! reported once on the fatal output; per-event failures (normalization,
//! publish) are logged and the event is dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PublishError, RelayError, SourceError};
use crate::normalizer::Normalizer;
use crate::publisher::{Publisher, PublisherExt};
use crate::source::{ChainEventSource, LogFilter};
use crate::stream::{Delivery, StreamKind, Subscription};
use crate::subjects::Subjects;
use crate::types::{BlockTransaction, Header, Log, PooledTransaction, TraceCall};

/// Relay session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// First subject segment, e.g. `"org"`.
    pub prefix: String,
    /// Second subject segment naming the publishing chain.
    #[serde(default = "default_publisher_id")]
    pub publisher_id: String,
    /// Optional network infix, e.g. `"mainnet"`.
    #[serde(default)]
    pub network: Option<String>,
    /// Log subscription filter (empty = all addresses).
    #[serde(default)]
    pub log_filter: LogFilter,
    /// Upper bound on a single publish call. `None` waits indefinitely.
    #[serde(default)]
    pub publish_timeout_ms: Option<u64>,
}

fn default_publisher_id() -> String {
    "arbitrum".into()
}

impl RelayConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            publisher_id: default_publisher_id(),
            network: None,
            log_filter: LogFilter::all(),
            publish_timeout_ms: None,
        }
    }

    pub fn with_publisher_id(mut self, id: impl Into<String>) -> Self {
        self.publisher_id = id.into();
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn publish_timeout(&self) -> Option<Duration> {
        self.publish_timeout_ms.map(Duration::from_millis)
    }

    pub fn subjects(&self) -> Subjects {
        Subjects::new(&self.prefix, &self.publisher_id, self.network.as_deref())
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Metrics snapshot for a relay session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayMetrics {
    pub events_received: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub normalization_failures: u64,
    pub removed_logs: u64,
}

/// The streams a running session multiplexes.
struct Streams {
    headers: Subscription<Header>,
    logs: Subscription<Log>,
    pending: Subscription<PooledTransaction>,
    traces: Subscription<TraceCall>,
    block_txs: Subscription<BlockTransaction>,
}

/// A relay session. Construct once, then [`Relay::spawn`] it.
pub struct Relay {
    source: Arc<dyn ChainEventSource>,
    publisher: Arc<dyn Publisher>,
    normalizer: Normalizer,
    subjects: Subjects,
    config: RelayConfig,
    metrics: Arc<Mutex<RelayMetrics>>,
    state: watch::Sender<RelayState>,
}

impl Relay {
    pub fn new(
        config: RelayConfig,
        source: Arc<dyn ChainEventSource>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let (state, _) = watch::channel(RelayState::Starting);
        Self {
            normalizer: Normalizer::new(Arc::clone(&source)),
            subjects: config.subjects(),
            source,
            publisher,
            config,
            metrics: Arc::new(Mutex::new(RelayMetrics::default())),
            state,
        }
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    /// Start the control loop on its own task.
    ///
    /// The returned handle's fatal output yields at most one error and closes
    /// when the loop has exited.
    pub fn spawn(self, cancel: CancellationToken) -> RelayHandle {
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let state = self.state.subscribe();
        let metrics = Arc::clone(&self.metrics);
        let task = tokio::spawn(self.run(cancel, fatal_tx));
        RelayHandle {
            errors: fatal_rx,
            state,
            metrics,
            task,
        }
    }

    async fn run(self, cancel: CancellationToken, fatal: mpsc::Sender<RelayError>) {
        self.set_state(RelayState::Starting);

        let started = tokio::select! {
            _ = cancel.cancelled() => None,
            started = self.start() => Some(started),
        };
        let streams = match started {
            None => {
                info!("relay cancelled during startup");
                self.set_state(RelayState::Stopped);
                return;
            }
            Some(Err(err)) => {
                error!(kind = %err.kind(), error = %err, "relay startup failed");
                self.set_state(RelayState::Stopped);
                report(&fatal, err);
                return;
            }
            Some(Ok(streams)) => streams,
        };

        self.set_state(RelayState::Running);
        info!(
            header = %self.subjects.header,
            log_event = %self.subjects.log_event,
            "relay running"
        );

        let outcome = self.steady_state(streams, &cancel).await;
        self.set_state(RelayState::Draining);

        let metrics = self.metrics();
        info!(
            published = metrics.published,
            publish_failures = metrics.publish_failures,
            normalization_failures = metrics.normalization_failures,
            removed_logs = metrics.removed_logs,
            "relay stopped"
        );
        self.set_state(RelayState::Stopped);

        if let Err(err) = outcome {
            error!(kind = %err.kind(), error = %err, "relay stream failed");
            report(&fatal, err);
        }
        // `fatal` is dropped here, closing the output.
    }

    async fn start(&self) -> Result<Streams, RelayError> {
        let headers = self
            .source
            .subscribe_headers()
            .await
            .map_err(|source| RelayError::Subscribe {
                kind: StreamKind::Headers,
                source,
            })?;
        info!("subscribed to new headers");

        let logs = self
            .source
            .subscribe_logs(&self.config.log_filter)
            .await
            .map_err(|source| RelayError::Subscribe {
                kind: StreamKind::Logs,
                source,
            })?;
        info!(
            addresses = self.config.log_filter.addresses.len(),
            "subscribed to new logs"
        );

        Ok(Streams {
            headers,
            logs,
            pending: self.source.monitor_pending_transactions(),
            traces: self.source.stream_trace_calls(),
            block_txs: self.source.stream_block_transactions(),
        })
    }

    async fn steady_state(
        &self,
        mut streams: Streams,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("relay cancelled");
                    return Ok(());
                }
                delivery = streams.headers.recv() => {
                    let Some(header) = accept(cancel, StreamKind::Headers, delivery)? else {
                        return Ok(());
                    };
                    self.on_header(header, cancel).await;
                }
                delivery = streams.logs.recv() => {
                    let Some(log) = accept(cancel, StreamKind::Logs, delivery)? else {
                        return Ok(());
                    };
                    self.on_log(log).await;
                }
                delivery = streams.pending.recv() => {
                    let Some(tx) = accept(cancel, StreamKind::PendingTransactions, delivery)? else {
                        return Ok(());
                    };
                    self.record_event();
                    self.publish_json(&self.subjects.mempool, &tx).await;
                }
                delivery = streams.traces.recv() => {
                    let Some(trace) = accept(cancel, StreamKind::TraceCalls, delivery)? else {
                        return Ok(());
                    };
                    self.record_event();
                    self.publish_json(&self.subjects.trace_call, &trace).await;
                }
                delivery = streams.block_txs.recv() => {
                    let Some(tx) = accept(cancel, StreamKind::BlockTransactions, delivery)? else {
                        return Ok(());
                    };
                    self.record_event();
                    self.publish_json(&self.subjects.tx, &tx).await;
                }
            }
        }
    }

    async fn on_header(&self, header: Header, cancel: &CancellationToken) {
        self.record_event();
        let normalized = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(hash = %header.hash, "header dropped on shutdown");
                return;
            }
            normalized = self.normalizer.normalize_header(&header) => normalized,
        };
        // The head/block pair goes out whole or not at all.
        if cancel.is_cancelled() {
            return;
        }
        match normalized {
            Ok((head, block)) => {
                info!(number = head.number, hash = %head.hash, "captured head");
                self.publish_json(&self.subjects.header, &head).await;
                self.publish_json(&self.subjects.block, &block).await;
            }
            Err(err) => {
                warn!(hash = %header.hash, error = %err, "processing header failed");
                self.metrics.lock().unwrap().normalization_failures += 1;
            }
        }
    }

    async fn on_log(&self, log: Log) {
        self.record_event();
        let Some(log) = Normalizer::filter_log(log) else {
            self.metrics.lock().unwrap().removed_logs += 1;
            return;
        };
        if self.publish_json(&self.subjects.log_event, &log).await {
            debug!(
                tx_hash = log.transaction_hash.as_deref().unwrap_or_default(),
                "published log"
            );
        }
    }

    /// Publish one message, absorbing failures. Returns `true` on success.
    async fn publish_json<T: Serialize + Sync>(&self, subject: &str, value: &T) -> bool {
        let result = match self.config.publish_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, self.publisher.publish_json(subject, value)).await {
                    Ok(result) => result,
                    Err(_) => Err(PublishError::Timeout {
                        ms: limit.as_millis() as u64,
                    }),
                }
            }
            None => self.publisher.publish_json(subject, value).await,
        };

        match result {
            Ok(()) => {
                self.metrics.lock().unwrap().published += 1;
                true
            }
            Err(err) => {
                warn!(subject, error = %err, "publish failed, message dropped");
                self.metrics.lock().unwrap().publish_failures += 1;
                false
            }
        }
    }

    fn record_event(&self) {
        self.metrics.lock().unwrap().events_received += 1;
    }

    fn metrics(&self) -> RelayMetrics {
        self.metrics.lock().unwrap().clone()
    }

    fn set_state(&self, state: RelayState) {
        debug!(%state, "relay state");
        self.state.send_replace(state);
    }
}

fn into_event<T>(kind: StreamKind, delivery: Delivery<T>) -> Result<T, RelayError> {
    match delivery {
        Delivery::Event(event) => Ok(event),
        Delivery::Failed(source) => Err(RelayError::Stream { kind, source }),
        Delivery::Closed => Err(RelayError::Stream {
            kind,
            source: SourceError::Closed,
        }),
    }
}

/// Gate a delivery on cancellation. Once cancelled nothing is dispatched, and
/// streams that close because the source shut down with us are not fatal.
fn accept<T>(
    cancel: &CancellationToken,
    kind: StreamKind,
    delivery: Delivery<T>,
) -> Result<Option<T>, RelayError> {
    if cancel.is_cancelled() {
        return Ok(None);
    }
    into_event(kind, delivery).map(Some)
}

/// The output holds one slot and only ever receives one error, so this never
/// has to wait.
fn report(fatal: &mpsc::Sender<RelayError>, err: RelayError) {
    if let Err(e) = fatal.try_send(err) {
        warn!(error = %e, "fatal error not delivered, owner has gone away");
    }
}

/// Owner-side handle to a spawned relay session.
pub struct RelayHandle {
    errors: mpsc::Receiver<RelayError>,
    state: watch::Receiver<RelayState>,
    metrics: Arc<Mutex<RelayMetrics>>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Wait for the fatal output. `None` once the session ended without a
    /// fatal error (or after the error has been taken).
    pub async fn fatal_error(&mut self) -> Option<RelayError> {
        self.errors.recv().await
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`.
    pub async fn wait_for_state(&mut self, target: RelayState) -> RelayState {
        let reached = self.state.wait_for(|s| *s == target).await.map(|s| *s);
        match reached {
            Ok(state) => state,
            Err(_) => *self.state.borrow(),
        }
    }

    pub fn metrics(&self) -> RelayMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Wait for the control task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "relay task panicked");
        }
    }
}
