//! Subject naming.
//!
//! ```text
//! <prefix>.<publisher>[.<network>].header
//! <prefix>.<publisher>[.<network>].block
//! <prefix>.<publisher>[.<network>].tx
//! <prefix>.<publisher>[.<network>].log-event
//! <prefix>.<publisher>[.<network>].mempool
//! <prefix>.<publisher>[.<network>].trace_call
//! ```

use serde::{Deserialize, Serialize};

use crate::stream::StreamKind;

pub const HEADER: &str = "header";
pub const BLOCK: &str = "block";
pub const TX: &str = "tx";
pub const LOG_EVENT: &str = "log-event";
pub const MEMPOOL: &str = "mempool";
pub const TRACE_CALL: &str = "trace_call";

/// The six subjects a relay session publishes on. Derived once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subjects {
    pub header: String,
    pub block: String,
    pub tx: String,
    pub log_event: String,
    pub mempool: String,
    pub trace_call: String,
}

impl Subjects {
    /// Build the subject set. An empty or absent `network` drops that segment
    /// entirely.
    pub fn new(prefix: &str, publisher_id: &str, network: Option<&str>) -> Self {
        let base = match network.filter(|n| !n.is_empty()) {
            Some(network) => format!("{prefix}.{publisher_id}.{network}"),
            None => format!("{prefix}.{publisher_id}"),
        };
        let subject = |suffix: &str| format!("{base}.{suffix}");
        Self {
            header: subject(HEADER),
            block: subject(BLOCK),
            tx: subject(TX),
            log_event: subject(LOG_EVENT),
            mempool: subject(MEMPOOL),
            trace_call: subject(TRACE_CALL),
        }
    }

    /// The subject a stream kind's events are republished on. Headers map to
    /// the head subject; their blocks go to [`Subjects::block`].
    pub fn for_kind(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Headers => &self.header,
            StreamKind::Logs => &self.log_event,
            StreamKind::PendingTransactions => &self.mempool,
            StreamKind::TraceCalls => &self.trace_call,
            StreamKind::BlockTransactions => &self.tx,
        }
    }

    /// `(suffix, subject)` pairs in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (HEADER, self.header.as_str()),
            (BLOCK, self.block.as_str()),
            (TX, self.tx.as_str()),
            (LOG_EVENT, self.log_event.as_str()),
            (MEMPOOL, self.mempool.as_str()),
            (TRACE_CALL, self.trace_call.as_str()),
        ]
        .into_iter()
    }
}
