//! Frame exchange over any async byte stream (stdio, TCP).
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::frame;
use super::{ChannelCommand, ChannelEvent};

/// Spawns the read/write event loop and returns communication channels.
///
/// - `event_rx`: receives inbound messages, then `Closed` once
/// - `cmd_tx`: posts outbound frames
pub fn spawn<R, W>(
    reader: R,
    writer: W,
) -> (mpsc::Receiver<ChannelEvent>, mpsc::Sender<ChannelCommand>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(100);
    let (cmd_tx, cmd_rx) = mpsc::channel::<ChannelCommand>(100);
    tokio::spawn(run_event_loop(reader, writer, event_tx, cmd_rx));
    (event_rx, cmd_tx)
}

async fn run_event_loop<R, W>(
    reader: R,
    writer: W,
    event_tx: mpsc::Sender<ChannelEvent>,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let read_tx = event_tx.clone();
    let mut read_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match frame::decode_inbound(&line) {
                    Ok(Some(event)) => {
                        if read_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Malformed inbound frame ({e}), ignoring"),
                },
                Ok(None) => {
                    debug!("Inbound stream closed");
                    break;
                }
                Err(e) => {
                    error!("Read error: {e}");
                    break;
                }
            }
        }
    });

    let mut write_handle = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(cmd) = cmd_rx.recv().await {
            let mut line = frame::encode_outbound(&cmd);
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                error!("Write error: {e}");
                break;
            }
            if let Err(e) = writer.flush().await {
                error!("Flush error: {e}");
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_handle => write_handle.abort(),
        _ = &mut write_handle => read_handle.abort(),
    }
    let _ = event_tx.send(ChannelEvent::Closed).await;
}
