//! Raw chain events and the canonical messages published downstream.
//!
//! Raw types mirror Ethereum JSON-RPC objects (camelCase, hex quantities kept
//! as strings). Fields the relay does not inspect are preserved in a flattened
//! map so that passthrough kinds republish exactly what the node sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NormalizationError;

// ─── Raw events ───────────────────────────────────────────────────────────────

/// A new block header as delivered by `eth_subscribe("newHeads")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub hash: String,
    pub parent_hash: String,
    pub number: String,
    pub timestamp: String,
    /// Arbitrum headers carry the L1 block they were sequenced against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_block_number: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Header {
    pub fn number_u64(&self) -> u64 {
        parse_hex_u64(&self.number)
    }
}

/// A contract log as delivered by `eth_subscribe("logs")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<String>,
    /// Set when the log was reverted by a chain reorganisation.
    #[serde(default)]
    pub removed: bool,
}

/// A transaction sitting in the node's pending pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledTransaction {
    pub hash: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A transaction already included in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTransaction {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// The call trace of one transaction (`callTracer` frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceCall {
    pub tx_hash: String,
    pub result: Value,
}

// ─── Canonical messages ───────────────────────────────────────────────────────

/// A full block as returned by `eth_getBlockByHash(hash, true)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub parent_hash: String,
    pub number: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Block {
    pub fn number_u64(&self) -> u64 {
        parse_hex_u64(&self.number)
    }

    /// Transactions decoded as [`BlockTransaction`]s. Hash-only entries
    /// (blocks fetched without full transactions) are skipped.
    pub fn full_transactions(&self) -> Vec<BlockTransaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.is_object())
            .filter_map(|tx| serde_json::from_value(tx.clone()).ok())
            .collect()
    }
}

/// Minimal summary of a new chain head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Head {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_block_number: Option<u64>,
}

impl TryFrom<&Header> for Head {
    type Error = NormalizationError;

    /// Malformed quantities reject the header instead of publishing zeros.
    fn try_from(header: &Header) -> Result<Self, Self::Error> {
        Ok(Self {
            number: quantity("number", &header.number)?,
            hash: header.hash.clone(),
            parent_hash: header.parent_hash.clone(),
            timestamp: quantity("timestamp", &header.timestamp)?,
            l1_block_number: header
                .l1_block_number
                .as_deref()
                .map(|n| quantity("l1BlockNumber", n))
                .transpose()?,
        })
    }
}

fn quantity(field: &'static str, value: &str) -> Result<u64, NormalizationError> {
    try_parse_hex_u64(value).ok_or_else(|| NormalizationError::InvalidQuantity {
        field,
        value: value.to_string(),
    })
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64. `None` if
/// it is empty, not hex, or overflows.
pub fn try_parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

/// Lenient [`try_parse_hex_u64`] for diagnostics: malformed input reads as 0.
pub fn parse_hex_u64(s: &str) -> u64 {
    try_parse_hex_u64(s).unwrap_or(0)
}
