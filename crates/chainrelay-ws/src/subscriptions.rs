//! Routing of `eth_subscription` notifications to their subscribers.
//!
//! Connections are not re-established, so a disconnect fails every live
//! subscription instead of re-subscribing it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use chainrelay_core::{SourceError, Subscription, SubscriptionSender};

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live subscriptions on one connection, keyed by node-assigned ID.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionId, SubscriptionSender<Value>>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start routing notifications for `id`.
    pub fn register(&self, id: SubscriptionId) -> Subscription<Value> {
        let (tx, sub) = Subscription::channel();
        self.entries.lock().unwrap().insert(id, tx);
        sub
    }

    /// Forward a notification. Entries whose subscriber has gone away are
    /// pruned. Returns `false` if nobody received the message.
    pub fn dispatch(&self, id: &SubscriptionId, message: Value) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(sender) = entries.get(id) else {
            tracing::debug!(subscription = %id, "notification for unknown subscription");
            return false;
        };
        if sender.send(message) {
            return true;
        }
        entries.remove(id);
        false
    }

    pub fn remove(&self, id: &SubscriptionId) {
        self.entries.lock().unwrap().remove(id);
    }

    /// Fail and forget every subscription.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = self.entries.lock().unwrap().drain().collect();
        for (_, mut sender) in drained {
            sender.fail(SourceError::Disconnected(reason.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
