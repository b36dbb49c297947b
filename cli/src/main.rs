//! ChainRelay CLI: relay node events onto NATS subjects.
//!
//! # Commands
//! ```text
//! chainrelay run      --socket <ws-url> --nats <urls> --stream-prefix <org> [--stream-network-infix <net>]
//! chainrelay subjects --stream-prefix <org> [--stream-publisher <id>] [--stream-network-infix <net>]
//! ```

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use tracing::error;

use chainrelay_core::RelayConfig;

mod cmd_run;
mod logging;

#[derive(Parser)]
#[command(
    name = "chainrelay",
    about = "Relay Arbitrum node events onto NATS subjects",
    long_about = "
ChainRelay subscribes to a node's headers, logs, pending transactions, call
traces and block transactions, and republishes them as JSON on six subjects:

  <prefix>.<publisher>[.<network>].{header|block|tx|log-event|mempool|trace_call}

Every flag can also be set through the CHAINRELAY_* environment variable
shown in its help.
",
    version
)]
struct Cli {
    /// Log level or filter directive
    #[arg(long, global = true, env = "CHAINRELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Per-crate log level override, e.g. `chainrelay_ws=debug` (repeatable)
    #[arg(long = "log-component", global = true, value_parser = parse_component)]
    log_components: Vec<(String, String)>,

    /// Emit JSON structured logs
    #[arg(long, global = true, env = "CHAINRELAY_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the node and NATS and relay until interrupted
    Run(cmd_run::RunArgs),

    /// Print the subjects a relay with these settings publishes on
    Subjects {
        #[command(flatten)]
        stream: StreamArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Subject naming flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// First subject segment
    #[arg(long, env = "CHAINRELAY_STREAM_PREFIX")]
    pub stream_prefix: String,

    /// Second subject segment naming the publishing chain
    #[arg(long, env = "CHAINRELAY_STREAM_PUBLISHER", default_value = "arbitrum")]
    pub stream_publisher: String,

    /// Network subject infix, e.g. `mainnet`; omitted from subjects when empty
    #[arg(long, env = "CHAINRELAY_STREAM_NETWORK_INFIX")]
    pub stream_network_infix: Option<String>,
}

impl StreamArgs {
    pub fn relay_config(&self) -> RelayConfig {
        let config =
            RelayConfig::new(&self.stream_prefix).with_publisher_id(&self.stream_publisher);
        match self.stream_network_infix.as_deref().filter(|n| !n.is_empty()) {
            Some(network) => config.with_network(network),
            None => config,
        }
    }
}

fn parse_component(s: &str) -> Result<(String, String)> {
    let (component, level) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected <component>=<level>, got `{s}`"))?;
    Ok((component.to_string(), level.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_tracing(&logging::LogConfig {
        level: cli.log_level.clone(),
        components: cli.log_components.iter().cloned().collect::<HashMap<_, _>>(),
        json: cli.log_json,
    });

    if let Err(e) = dispatch(cli.command).await {
        error!("chainrelay failed: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => cmd_run::run(args).await,
        Commands::Subjects { stream, json } => print_subjects(&stream, json),
    }
}

fn print_subjects(stream: &StreamArgs, json: bool) -> Result<()> {
    let subjects = stream.relay_config().subjects();
    if json {
        println!("{}", serde_json::to_string_pretty(&subjects)?);
    } else {
        for (suffix, subject) in subjects.iter() {
            println!("{suffix:<12} {subject}");
        }
    }
    Ok(())
}
