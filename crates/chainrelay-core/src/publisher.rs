//! The `Publisher` trait: the downstream side of the relay.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::PublishError;

/// Delivers a payload to the bus under a subject.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Publisher>`.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError>;
}

/// JSON convenience on top of any [`Publisher`].
#[async_trait]
pub trait PublisherExt: Publisher {
    /// Serialize `value` to JSON and publish it.
    async fn publish_json<T: Serialize + Sync>(
        &self,
        subject: &str,
        value: &T,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(value)?;
        self.publish(subject, Bytes::from(payload)).await
    }
}

impl<P: Publisher + ?Sized> PublisherExt for P {}

/// A published message captured by [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub subject: String,
    pub payload: Bytes,
}

impl Message {
    /// The payload parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

#[derive(Default)]
struct MemoryState {
    messages: Vec<Message>,
    failures: VecDeque<PublishError>,
}

/// In-memory publisher that records every message.
///
/// Failures can be queued with [`MemoryPublisher::fail_next`]; each queued
/// error is returned by one subsequent `publish` call instead of recording.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `publish` call fail with `err`.
    pub fn fail_next(&self, err: PublishError) {
        self.state.lock().unwrap().failures.push_back(err);
    }

    /// Snapshot of everything published so far.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    /// Messages published on `subject`.
    pub fn on_subject(&self, subject: &str) -> Vec<Message> {
        self.messages()
            .into_iter()
            .filter(|m| m.subject == subject)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        state.messages.push(Message {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }
}
