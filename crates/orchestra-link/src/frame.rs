//! Newline-delimited JSON framing
//!
//! One JSON value per line. Readers are bounded so a misbehaving peer
//! cannot make us buffer without limit.

use crate::error::LinkError;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound for a single frame (4 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Read exactly one frame
///
/// # Errors
/// - `LinkError::Closed` on EOF (including EOF in the middle of a frame)
/// - `LinkError::FrameTooLarge` if the line exceeds `max_bytes`
/// - `LinkError::Malformed` if the line is not valid JSON
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Value, LinkError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let limit = u64::try_from(max_bytes)
        .unwrap_or(u64::MAX)
        .saturating_add(1);
    let mut buf = Vec::new();
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if read == 0 {
        return Err(LinkError::Closed);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max_bytes {
        return Err(LinkError::FrameTooLarge { limit: max_bytes });
    } else {
        return Err(LinkError::Closed);
    }

    Ok(serde_json::from_slice(&buf)?)
}

/// Write one frame and flush it
///
/// # Errors
/// Returns `LinkError::Io` if the write fails
pub async fn write_frame<W>(writer: &mut W, value: &Value) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reads_consecutive_frames() {
        let mut input: &[u8] = b"{\"a\":1}\n{\"b\":2}\n";

        assert_eq!(read_frame(&mut input, 64).await.unwrap(), json!({"a": 1}));
        assert_eq!(read_frame(&mut input, 64).await.unwrap(), json!({"b": 2}));
        assert!(matches!(read_frame(&mut input, 64).await, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn truncated_frame_is_closed() {
        let mut input: &[u8] = b"{\"a\":1";
        assert!(matches!(read_frame(&mut input, 64).await, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let mut input: &[u8] = b"{\"payload\":\"aaaaaaaaaaaaaaaaaaaaaaaa\"}\n";
        let result = read_frame(&mut input, 8).await;
        assert!(matches!(result, Err(LinkError::FrameTooLarge { limit: 8 })));
    }

    #[tokio::test]
    async fn frame_at_exact_limit_is_accepted() {
        let mut input: &[u8] = b"[1,2,3]\n";
        assert_eq!(read_frame(&mut input, 7).await.unwrap(), json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let mut input: &[u8] = b"not json\n";
        assert!(matches!(read_frame(&mut input, 64).await, Err(LinkError::Malformed(_))));
    }

    #[tokio::test]
    async fn written_frame_is_newline_terminated() {
        let mut out = Vec::new();
        write_frame(&mut out, &json!({"action": "ping"})).await.unwrap();
        assert_eq!(out, b"{\"action\":\"ping\"}\n");
    }
}
