pub mod frame;
pub mod stream;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::TransportConfig;

/// Target origin meaning "whoever is listening".
pub const ANY_ORIGIN: &str = "*";

/// Events emitted by the channel layer to the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A cross-document message, with the origin the host page observed.
    Message { origin: String, data: Value },
    /// The peer side went away (EOF or write failure).
    Closed,
}

/// Commands sent by the runtime to the channel layer
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCommand {
    Post { target_origin: String, data: Value },
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
}

impl ChannelError {
    /// True when the relay may simply not be listening yet.
    pub fn is_retriable(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            ChannelError::Connect { source, .. } => matches!(
                source.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
            ),
        }
    }
}

/// Opens the transport specified in config.
/// Returns the same channel pair regardless of mode.
pub async fn connect(
    config: &TransportConfig,
) -> Result<(mpsc::Receiver<ChannelEvent>, mpsc::Sender<ChannelCommand>), ChannelError> {
    match config {
        TransportConfig::Stdio => {
            info!("Relaying frames over stdin/stdout");
            Ok(stream::spawn(tokio::io::stdin(), tokio::io::stdout()))
        }
        TransportConfig::Tcp { host, port } => {
            let addr = format!("{host}:{port}");
            info!("Connecting to relay at {addr}...");
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|source| ChannelError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            info!("TCP connected to {addr}");
            let (reader, writer) = tcp.into_split();
            Ok(stream::spawn(reader, writer))
        }
    }
}
