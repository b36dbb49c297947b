//! Error types for the relay pipeline.

use thiserror::Error;

use crate::stream::StreamKind;

/// Errors raised by a chain event source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The subscribe call itself was rejected.
    #[error("subscribe to {kind} failed: {reason}")]
    Subscribe { kind: StreamKind, reason: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node connection dropped.
    #[error("connection to node lost: {0}")]
    Disconnected(String),

    /// The stream ended without reporting an error.
    #[error("stream closed unexpectedly")]
    Closed,

    /// A request did not complete in time.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A node response could not be deserialized.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from turning a raw event into a canonical message.
#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("block {hash} not found")]
    BlockNotFound { hash: String },

    #[error("block hash mismatch: header {expected}, fetched {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("header {field} is not a hex quantity: {value:?}")]
    InvalidQuantity { field: &'static str, value: String },

    #[error("block fetch failed: {0}")]
    Source(#[from] SourceError),
}

/// Errors from delivering a message to the bus.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// Session-ending errors delivered on the relay's fatal output.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("subscribe to {kind} failed: {source}")]
    Subscribe {
        kind: StreamKind,
        #[source]
        source: SourceError,
    },

    #[error("{kind} stream failed: {source}")]
    Stream {
        kind: StreamKind,
        #[source]
        source: SourceError,
    },
}

impl RelayError {
    /// The stream whose failure ended the session.
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Subscribe { kind, .. } | Self::Stream { kind, .. } => *kind,
        }
    }

    /// Returns `true` if the session never reached steady state.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Subscribe { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_error_reports_kind() {
        let err = RelayError::Stream {
            kind: StreamKind::Logs,
            source: SourceError::Closed,
        };
        assert_eq!(err.kind(), StreamKind::Logs);
        assert!(!err.is_startup());
        assert_eq!(err.to_string(), "logs stream failed: stream closed unexpectedly");
    }

    #[test]
    fn subscribe_error_is_startup() {
        let err = RelayError::Subscribe {
            kind: StreamKind::Headers,
            source: SourceError::Rpc {
                code: -32601,
                message: "method not found".into(),
            },
        };
        assert!(err.is_startup());
        assert!(err.to_string().contains("method not found"));
    }
}
