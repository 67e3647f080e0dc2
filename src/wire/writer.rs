//! Single-owner NDJSON writer task.
//!
//! Every outbound line for a stream goes through one task that owns the
//! sink, so concurrent producers can never interleave bytes mid-line. Each
//! value is serialized compactly, terminated with `\n`, written, and flushed
//! before the next one is taken.

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Serialize one value as an NDJSON line.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the value cannot be serialized.
pub fn to_line(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writer task: drains `msg_rx` into `sink` one flushed line at a time.
///
/// Exits cleanly when `cancel` fires or every sender is dropped. Messages
/// already queued when the channel closes are still written.
///
/// # Errors
///
/// Returns `AppError::Io` when a write or flush fails (e.g. the peer closed
/// its end).
pub async fn run_writer<W>(
    stream: &'static str,
    mut sink: W,
    mut msg_rx: mpsc::Receiver<Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(stream, "writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(stream, "writer: message channel closed, stopping");
                    break;
                };

                let bytes = match to_line(&value) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(stream, error = %e, "writer: dropping unserialisable message");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut sink, &bytes).await {
                    warn!(stream, error = %e, "writer: write failed");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

async fn write_line<W>(sink: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(bytes).await?;
    sink.flush().await?;
    Ok(())
}
