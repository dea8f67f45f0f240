use super::{WorkerMessage, WorkerReply};
use crate::authority::Authority;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Answers one worker's requests until its pipe closes.
///
/// Each line is decoded, dispatched to `authority` and answered with the same id.
/// Undecodable lines, invalid UTF-8 included, are logged and skipped.
///
/// # Errors
///
/// Returns the I/O error that ended the exchange; a clean end of stream is `Ok`.
pub async fn serve_worker_channel<R, W>(
    reader: R,
    writer: W,
    authority: Arc<Authority>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut writer = writer;
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if line.trim_ascii().is_empty() {
            continue;
        }

        let message = match serde_json::from_slice::<WorkerMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed worker message");
                continue;
            }
        };

        let reply = WorkerReply { id: message.id, result: authority.handle(&message.request) };
        let mut bytes = serde_json::to_vec(&reply)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}
