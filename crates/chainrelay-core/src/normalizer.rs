//! Raw event → canonical message.

use std::sync::Arc;

use tracing::debug;

use crate::error::NormalizationError;
use crate::source::ChainEventSource;
use crate::types::{Block, Head, Header, Log};

/// Turns raw chain events into publish-ready messages.
///
/// Headers need the source to fetch their block; every other kind is handled
/// without I/O.
#[derive(Clone)]
pub struct Normalizer {
    source: Arc<dyn ChainEventSource>,
}

impl Normalizer {
    pub fn new(source: Arc<dyn ChainEventSource>) -> Self {
        Self { source }
    }

    /// Derive the head summary and fetch the matching block.
    ///
    /// Both halves succeed together or the whole header is rejected.
    pub async fn normalize_header(
        &self,
        header: &Header,
    ) -> Result<(Head, Block), NormalizationError> {
        let head = Head::try_from(header)?;
        let block = self
            .source
            .block_by_hash(&header.hash)
            .await?
            .ok_or_else(|| NormalizationError::BlockNotFound {
                hash: header.hash.clone(),
            })?;

        if !block.hash.eq_ignore_ascii_case(&header.hash) {
            return Err(NormalizationError::HashMismatch {
                expected: header.hash.clone(),
                actual: block.hash,
            });
        }

        Ok((head, block))
    }

    /// Drop logs reverted by a reorg. Not an error.
    pub fn filter_log(log: Log) -> Option<Log> {
        if log.removed {
            debug!(
                tx_hash = log.transaction_hash.as_deref().unwrap_or_default(),
                "dropping removed log"
            );
            return None;
        }
        Some(log)
    }
}
