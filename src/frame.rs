//! Length-prefixed framing.
//!
//! Every envelope travels as
//!
//! ```text
//! | length: u32 little-endian | encoded envelope: <length> bytes |
//! ```
//!
//! repeated back to back on one stream. Readers are expected to be
//! buffered; the framer itself never reads past the end of a frame.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, RpcError};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound for a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Write one frame.
///
/// Prefix and body go out in a single `write_all` followed by a flush, so
/// a caller holding the connection's write lock never leaves half a frame
/// behind on success.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    // ---
    let len = u32::try_from(body.len()).map_err(|_| RpcError::FrameTooLarge {
        len: u32::MAX,
        max: u32::MAX,
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32_le(len);
    buf.put_slice(body);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body.
///
/// Blocks until a complete frame is available.
///
/// # Errors
///
/// - `RpcError::StreamClosed` if the stream ends cleanly before a new frame
/// - `RpcError::FrameTooLarge` if the prefix exceeds `max_frame_size`
/// - `RpcError::Io` for any other read failure, including EOF mid-frame
pub async fn read_frame<R>(reader: &mut R, max_frame_size: Option<u32>) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    // ---
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RpcError::StreamClosed
        } else {
            RpcError::Io(e)
        }
    })?;

    let len = u32::from_le_bytes(header);
    if let Some(max) = max_frame_size {
        if len > max {
            return Err(RpcError::FrameTooLarge { len, max });
        }
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_prefix_is_little_endian() {
        // ---
        let mut out = Vec::new();
        write_frame(&mut out, b"abc").await.unwrap();
        assert_eq!(out, [3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        // ---
        let (mut a, b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for body in [&b"one"[..], b"", b"three"] {
                write_frame(&mut a, body).await.unwrap();
            }
        });

        let mut reader = BufReader::new(b);
        assert_eq!(&read_frame(&mut reader, None).await.unwrap()[..], b"one");
        assert_eq!(&read_frame(&mut reader, None).await.unwrap()[..], b"");
        assert_eq!(&read_frame(&mut reader, None).await.unwrap()[..], b"three");
        writer.await.unwrap();

        assert!(matches!(
            read_frame(&mut reader, None).await,
            Err(RpcError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        // ---
        let mut buf = Vec::new();
        write_frame(&mut buf, &[0u8; 32]).await.unwrap();
        let mut reader = &buf[..];
        assert!(matches!(
            read_frame(&mut reader, Some(16)).await,
            Err(RpcError::FrameTooLarge { len: 32, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        // ---
        let buf = [10u8, 0, 0, 0, 1, 2];
        let mut reader = &buf[..];
        assert!(matches!(
            read_frame(&mut reader, None).await,
            Err(RpcError::Io(_))
        ));
    }
}
