//! `chainrelay run`: connect to the node and NATS, then relay until
//! interrupted or a stream fails.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::{Args, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chainrelay_core::{PublishError, Publisher, Relay};
use chainrelay_nats::{NatsAuth, NatsConfig, NatsPublisher, DEFAULT_SERVERS};
use chainrelay_ws::{WsChainSource, WsClientConfig};

use crate::StreamArgs;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Node WebSocket endpoint, e.g. `wss://arb1.example/ws`
    #[arg(long, env = "CHAINRELAY_SOCKET")]
    pub socket: Option<String>,

    /// NATS server URLs (comma separated)
    #[arg(long, env = "CHAINRELAY_NATS", default_value = DEFAULT_SERVERS)]
    pub nats: String,

    /// NATS NKey seed
    #[arg(long, env = "CHAINRELAY_NATS_NKEY", hide_env_values = true)]
    pub nats_nkey: Option<String>,

    /// Present the seed as a user JWT or as a bare NKey
    #[arg(long, env = "CHAINRELAY_NATS_AUTH", value_enum, default_value_t = AuthMode::Jwt)]
    pub nats_auth: AuthMode,

    #[command(flatten)]
    pub stream: StreamArgs,

    /// Drop a publish that takes longer than this
    #[arg(long, env = "CHAINRELAY_PUBLISH_TIMEOUT_MS")]
    pub publish_timeout_ms: Option<u64>,

    /// Deadline for a single node request
    #[arg(long, env = "CHAINRELAY_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    /// Print messages to stdout instead of publishing to NATS
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Jwt,
    Nkey,
}

impl From<AuthMode> for NatsAuth {
    fn from(mode: AuthMode) -> Self {
        match mode {
            AuthMode::Jwt => NatsAuth::Jwt,
            AuthMode::Nkey => NatsAuth::Nkey,
        }
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let socket = args
        .socket
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("socket URI is required (--socket or CHAINRELAY_SOCKET)"))?;

    let cancel = CancellationToken::new();

    let nats = if args.dry_run {
        info!("dry run, messages go to stdout");
        None
    } else {
        let config = NatsConfig {
            servers: args.nats.clone(),
            nkey_seed: args.nats_nkey.clone(),
            auth: args.nats_auth.into(),
            ..NatsConfig::default()
        };
        Some(NatsPublisher::connect(&config).await.context("connecting to NATS")?)
    };
    let publisher: Arc<dyn Publisher> = match &nats {
        Some(nats) => Arc::new(nats.clone()),
        None => Arc::new(StdoutPublisher),
    };

    let ws_config = WsClientConfig {
        request_timeout: Some(Duration::from_millis(args.request_timeout_ms)),
    };
    let source = WsChainSource::connect(socket, ws_config, cancel.child_token())
        .await
        .context("connecting to node")?;

    let mut config = args.stream.relay_config();
    if let Some(ms) = args.publish_timeout_ms {
        config = config.with_publish_timeout(Duration::from_millis(ms));
    }
    let relay = Relay::new(config, Arc::new(source), publisher);
    for (suffix, subject) in relay.subjects().iter() {
        info!(suffix, subject, "publishing");
    }
    let mut handle = relay.spawn(cancel.clone());

    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            None
        }
        err = handle.fatal_error() => err,
    };
    cancel.cancel();
    handle.join().await;

    if let Some(nats) = &nats {
        if let Err(e) = nats.flush().await {
            warn!(error = %e, "flushing NATS on shutdown failed");
        }
    }

    match fatal {
        Some(err) => Err(err).context("relay stopped"),
        None => Ok(()),
    }
}

/// Writes each message as `<subject> <json>` on one line.
struct StdoutPublisher;

#[async_trait]
impl Publisher for StdoutPublisher {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        println!("{subject} {}", String::from_utf8_lossy(&payload));
        Ok(())
    }
}
