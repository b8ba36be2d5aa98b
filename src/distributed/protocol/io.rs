use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult, DistributedError};

use super::types::WireMessage;

/// Frame cap, newline excluded.
pub(in crate::distributed) const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

fn io_error(context: &'static str) -> impl FnOnce(std::io::Error) -> AppError {
    move |err| AppError::distributed(DistributedError::Io {
        context,
        source: err,
    })
}

/// Reads one newline-delimited JSON message. Never buffers more than one
/// frame past the cap.
pub(in crate::distributed) async fn read_message<R>(reader: &mut R) -> AppResult<WireMessage>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(MAX_MESSAGE_BYTES.saturating_add(2)).unwrap_or(u64::MAX);
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let bytes = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buffer)
        .await
        .map_err(io_error("read wire message"))?;
    if bytes == 0 {
        return Err(AppError::distributed(DistributedError::ConnectionClosed));
    }
    let frame = strip_line_ending(&buffer);
    if frame.len() > MAX_MESSAGE_BYTES {
        return Err(AppError::distributed(
            DistributedError::WireMessageTooLarge {
                max_bytes: MAX_MESSAGE_BYTES,
            },
        ));
    }
    let line = std::str::from_utf8(frame).map_err(|err| {
        AppError::distributed(DistributedError::WireMessageInvalidUtf8 { source: err })
    })?;
    serde_json::from_str::<WireMessage>(line).map_err(|err| {
        AppError::distributed(DistributedError::Deserialize {
            context: "wire message",
            source: err,
        })
    })
}

fn strip_line_ending(buffer: &[u8]) -> &[u8] {
    let line = buffer.strip_suffix(b"\n").unwrap_or(buffer);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub(in crate::distributed) async fn send_message<W>(
    writer: &mut W,
    message: &WireMessage,
) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = serde_json::to_vec(message).map_err(|err| {
        AppError::distributed(DistributedError::Serialize {
            context: "wire message",
            source: err,
        })
    })?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(io_error("send wire message"))?;
    writer.flush().await.map_err(io_error("flush wire message"))
}
