//! chainrelay-nats: [`Publisher`] over a NATS connection.
//!
//! Messages are fire-and-forget core NATS publishes; the relay treats any
//! error as a dropped message.

use std::sync::Arc;

use async_nats::{AuthError, ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use chainrelay_core::{PublishError, Publisher};

pub mod jwt;

pub const DEFAULT_SERVERS: &str = "nats://127.0.0.1:4222";

/// NATS connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// Comma-separated server URLs.
    #[serde(default = "default_servers")]
    pub servers: String,
    /// NKey seed used to authenticate, if the server requires it.
    #[serde(default, skip_serializing)]
    pub nkey_seed: Option<String>,
    /// How the seed is presented to the server.
    #[serde(default)]
    pub auth: NatsAuth,
    /// Connection name reported to the server.
    #[serde(default = "default_name")]
    pub name: String,
}

/// Authentication scheme used when an NKey seed is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatsAuth {
    /// A user JWT issued from the seed, with nonces signed by its key.
    #[default]
    Jwt,
    /// Bare NKey challenge signing, for servers configured with `nkey` users.
    Nkey,
}

fn default_servers() -> String {
    DEFAULT_SERVERS.into()
}

fn default_name() -> String {
    "chainrelay".into()
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            nkey_seed: None,
            auth: NatsAuth::default(),
            name: default_name(),
        }
    }
}

impl NatsConfig {
    fn options(&self) -> Result<ConnectOptions, NatsError> {
        let options = ConnectOptions::new()
            .name(self.name.as_str())
            .event_callback(|event| async move {
                match event {
                    Event::Connected => info!("NATS connected"),
                    Event::Disconnected => warn!("NATS disconnected"),
                    other => debug!(event = %other, "NATS event"),
                }
            });
        let Some(seed) = self.nkey_seed.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(options);
        };
        Ok(match self.auth {
            NatsAuth::Nkey => options.nkey(seed.to_string()),
            NatsAuth::Jwt => {
                let (token, key_pair) = jwt::issue(seed, &self.name)?;
                debug!(user = %key_pair.public_key(), "issued NATS user JWT");
                let key_pair = Arc::new(key_pair);
                options.jwt(token, move |nonce| {
                    let key_pair = Arc::clone(&key_pair);
                    async move { key_pair.sign(&nonce).map_err(AuthError::new) }
                })
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum NatsError {
    #[error("connect to NATS at {servers} failed: {reason}")]
    Connect { servers: String, reason: String },

    #[error("NATS flush failed: {0}")]
    Flush(String),

    #[error("NATS credentials: {0}")]
    Credentials(String),

    #[error("encoding user JWT: {0}")]
    Claims(#[from] serde_json::Error),
}

/// Publishes relay messages to NATS.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub async fn connect(config: &NatsConfig) -> Result<Self, NatsError> {
        info!(servers = %config.servers, name = %config.name, "connecting to NATS");
        let client = config
            .options()?
            .connect(config.servers.as_str())
            .await
            .map_err(|e| NatsError::Connect {
                servers: config.servers.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(client))
    }

    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// Push buffered messages to the server.
    pub async fn flush(&self) -> Result<(), NatsError> {
        self.client
            .flush()
            .await
            .map_err(|e| NatsError::Flush(e.to_string()))
    }
}

#[async_trait]
impl Publisher for NatsPublisher {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: NatsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.servers, DEFAULT_SERVERS);
        assert_eq!(config.name, "chainrelay");
        assert!(config.nkey_seed.is_none());
        assert_eq!(config.auth, NatsAuth::Jwt);
    }

    #[test]
    fn auth_modes_accept_a_valid_seed() {
        let seed = nkeys::KeyPair::new_user().seed().unwrap();
        for auth in [NatsAuth::Jwt, NatsAuth::Nkey] {
            let config = NatsConfig {
                nkey_seed: Some(seed.clone()),
                auth,
                ..NatsConfig::default()
            };
            assert!(config.options().is_ok(), "{auth:?}");
        }
        let config: NatsConfig = serde_json::from_str(r#"{"auth":"nkey"}"#).unwrap();
        assert_eq!(config.auth, NatsAuth::Nkey);
    }

    #[tokio::test]
    async fn malformed_seed_fails_before_connecting() {
        let config = NatsConfig {
            servers: "nats://127.0.0.1:1".into(),
            nkey_seed: Some("not-a-seed".into()),
            ..NatsConfig::default()
        };
        let err = NatsPublisher::connect(&config).await.err().expect("connect must fail");
        assert!(matches!(err, NatsError::Credentials(_)));
    }

    #[test]
    fn seed_is_never_serialized() {
        let config = NatsConfig {
            nkey_seed: Some("SUAEXAMPLESEED".into()),
            ..NatsConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("SUAEXAMPLESEED"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        let config = NatsConfig {
            servers: "nats://127.0.0.1:1".into(),
            ..NatsConfig::default()
        };
        let err = NatsPublisher::connect(&config).await.err().expect("connect must fail");
        assert!(matches!(err, NatsError::Connect { .. }));
        assert!(err.to_string().contains("127.0.0.1:1"));
    }
}
