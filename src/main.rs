mod backoff;
mod bridge;
mod channel;
mod config;
mod lifecycle;
mod protocol;
mod sandbox;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backoff::Backoff;
use crate::bridge::BridgeRuntime;
use crate::config::{Config, TransportConfig};
use crate::sandbox::local::LocalSandbox;

/// Consecutive refused connects to the relay before giving up.
const MAX_CONNECT_ATTEMPTS: u32 = 10;

fn print_help() {
    println!(
        "\
sandbox-bridge v{}

Lets a parent application drive an ephemeral code sandbox through
cross-document messages relayed by the host page.

USAGE:
    sandbox-bridge [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/bridge.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, sandbox_bridge=debug,warn)

FRAMING:
    One JSON object per line.
    inbound:  {{\"origin\": \"https://parent.example.com\", \"data\": {{...}}}}
    outbound: {{\"targetOrigin\": \"*\", \"data\": {{...}}}}

EXAMPLES:
    sandbox-bridge                           # uses config/bridge.toml
    sandbox-bridge /etc/sandbox/bridge.toml  # custom config path
    RUST_LOG=debug sandbox-bridge            # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sandbox-bridge v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // stdout carries frames in stdio mode, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sandbox_bridge=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/bridge.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("sandbox-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Self origin: {}", config.bridge.self_origin);
    info!(
        "Allowed origins: {}",
        config.bridge.allowed_origins.join(", ")
    );
    info!("Transport: {}", config.transport.mode_description());
    match &config.sandbox.workdir {
        Some(dir) => info!("Sandbox workdir: {}", dir.display()),
        None => info!("Sandbox workdir: temporary"),
    }

    let (event_rx, cmd_tx) = connect_with_retry(&config.transport).await?;

    let sandbox = Arc::new(LocalSandbox::new(config.sandbox.clone()));
    let runtime = BridgeRuntime::new(config, sandbox);
    runtime
        .run(event_rx, cmd_tx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Bridge stopped");
    Ok(())
}

/// Opens the transport, retrying while the relay refuses connections.
async fn connect_with_retry(
    transport: &TransportConfig,
) -> Result<(
    tokio::sync::mpsc::Receiver<channel::ChannelEvent>,
    tokio::sync::mpsc::Sender<channel::ChannelCommand>,
)> {
    let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(15), 2);
    loop {
        match channel::connect(transport).await {
            Ok(pair) => return Ok(pair),
            Err(e) if !e.is_retriable() => {
                error!("Permanent connection error: {e}");
                return Err(anyhow!("Cannot connect: {e}"));
            }
            Err(e) => {
                if backoff.exhausted(MAX_CONNECT_ATTEMPTS) {
                    error!("Giving up after {MAX_CONNECT_ATTEMPTS} attempts: {e}");
                    return Err(anyhow!(
                        "Max connection attempts ({MAX_CONNECT_ATTEMPTS}) exceeded"
                    ));
                }
                let delay = backoff.next_delay();
                warn!(
                    "Connection failed: {e}. Retrying in {}ms (attempt {})...",
                    delay.as_millis(),
                    backoff.attempt + 1
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received while reconnecting, exiting");
                        std::process::exit(0);
                    }
                }
            }
        }
    }
}
