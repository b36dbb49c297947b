//! Subscription streams handed from a chain event source to the relay.
//!
//! A [`Subscription`] pairs an unbounded event queue with a one-shot error
//! signal. The source side keeps the matching [`SubscriptionSender`]; calling
//! [`SubscriptionSender::fail`] delivers the single terminal error and closes
//! the event queue.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::SourceError;

/// The kinds of stream the relay consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Headers,
    Logs,
    PendingTransactions,
    TraceCalls,
    BlockTransactions,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        Self::Headers,
        Self::Logs,
        Self::PendingTransactions,
        Self::TraceCalls,
        Self::BlockTransactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::Logs => "logs",
            Self::PendingTransactions => "pending_transactions",
            Self::TraceCalls => "trace_calls",
            Self::BlockTransactions => "block_transactions",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiving half of a stream: raw events plus at most one terminal error.
#[derive(Debug)]
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<T>,
    errors: Option<oneshot::Receiver<SourceError>>,
}

impl<T> Subscription<T> {
    /// Create a connected sender/subscription pair.
    pub fn channel() -> (SubscriptionSender<T>, Subscription<T>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = oneshot::channel();
        (
            SubscriptionSender {
                events: Some(event_tx),
                error: Some(error_tx),
            },
            Subscription {
                events: event_rx,
                errors: Some(error_rx),
            },
        )
    }

    /// Wait for whatever the stream delivers next.
    ///
    /// A pending terminal error wins over buffered events. When the event
    /// queue closes without an error having been signalled the stream is
    /// reported as [`Delivery::Closed`].
    pub async fn recv(&mut self) -> Delivery<T> {
        let event = tokio::select! {
            biased;
            err = wait_error(&mut self.errors) => return Delivery::Failed(err),
            event = self.events.recv() => event,
        };
        match event {
            Some(event) => Delivery::Event(event),
            None => match self.try_error() {
                Some(err) => Delivery::Failed(err),
                None => Delivery::Closed,
            },
        }
    }

    /// Take the terminal error if it has already been delivered.
    pub fn try_error(&mut self) -> Option<SourceError> {
        let err = self.errors.as_mut()?.try_recv().ok()?;
        self.errors = None;
        Some(err)
    }
}

/// What a [`Subscription`] yielded.
#[derive(Debug)]
pub enum Delivery<T> {
    Event(T),
    Failed(SourceError),
    Closed,
}

/// Resolves once with the terminal error. Never resolves if the sender was
/// dropped without failing the stream or the error was already taken.
async fn wait_error(slot: &mut Option<oneshot::Receiver<SourceError>>) -> SourceError {
    if let Some(rx) = slot.as_mut() {
        let result = rx.await;
        *slot = None;
        if let Ok(err) = result {
            return err;
        }
    }
    std::future::pending().await
}

/// Sending half of a stream, owned by the source task that feeds it.
#[derive(Debug)]
pub struct SubscriptionSender<T> {
    events: Option<mpsc::UnboundedSender<T>>,
    error: Option<oneshot::Sender<SourceError>>,
}

impl<T> SubscriptionSender<T> {
    /// Forward one event. Returns `false` if the stream is closed or the
    /// subscriber has gone away.
    pub fn send(&self, event: T) -> bool {
        match &self.events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver the terminal error and close the stream. Only the first call
    /// has any effect.
    pub fn fail(&mut self, err: SourceError) {
        if let Some(tx) = self.error.take() {
            let _ = tx.send(err);
        }
        self.events = None;
    }

    /// Returns `true` once the stream failed or the subscriber was dropped.
    pub fn is_closed(&self) -> bool {
        match &self.events {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}
