//! TCP wire format for upload requests.
//!
//! # Wire format
//!
//! ```text
//! FRAME (either direction):
//!   [4 bytes BE: header_len]
//!   [header_len bytes: JSON envelope, UTF-8]
//!   [8 bytes BE: body_len]
//!   [body_len bytes: raw body]
//! ```
//!
//! The body holds chunk bytes on `store_chunk` requests, and on replies
//! the lists a payload detaches (see `BodyPayload`). A connection closed
//! between frames is a clean end of stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use chunkload_protocol::Message;
use chunkload_protocol::constants::{MAX_BODY_SIZE, MAX_HEADER_SIZE};

use crate::error::ChannelError;

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message: Message,
    pub body: Vec<u8>,
}

/// Writes one frame and flushes the writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
    body: &[u8],
) -> Result<(), ChannelError> {
    let header = serde_json::to_vec(message)?;
    if header.len() > MAX_HEADER_SIZE {
        return Err(ChannelError::Protocol(format!(
            "header too large: {} bytes (max {MAX_HEADER_SIZE})",
            header.len()
        )));
    }
    let body_len = body.len() as u64;
    if body_len > MAX_BODY_SIZE {
        return Err(ChannelError::Protocol(format!(
            "body too large: {body_len} bytes (max {MAX_BODY_SIZE})"
        )));
    }

    writer.write_u32(header.len() as u32).await?;
    writer.write_all(&header).await?;
    writer.write_u64(body_len).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `None` if the peer closed the connection before the next frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, ChannelError> {
    let mut len_buf = [0u8; 4];
    let first = reader.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[first..]).await?;

    let header_len = u32::from_be_bytes(len_buf) as usize;
    if header_len == 0 || header_len > MAX_HEADER_SIZE {
        return Err(ChannelError::Protocol(format!(
            "invalid header length: {header_len} (max {MAX_HEADER_SIZE})"
        )));
    }
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).await?;

    let body_len = reader.read_u64().await?;
    if body_len > MAX_BODY_SIZE {
        return Err(ChannelError::Protocol(format!(
            "body too large: {body_len} bytes (max {MAX_BODY_SIZE})"
        )));
    }
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).await?;

    let message = serde_json::from_slice(&header)?;
    Ok(Some(Frame { message, body }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkload_protocol::MessageType;
    use chunkload_protocol::messages::VerifyRequest;

    fn verify_message() -> Message {
        let req = VerifyRequest {
            file_hash: "abc".into(),
            file_name: "a.bin".into(),
        };
        Message::request("req-1", MessageType::Verify, Some(&req)).unwrap()
    }

    #[tokio::test]
    async fn frame_with_body() {
        let msg = verify_message();
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg, b"chunk bytes").await.unwrap();

        let mut cursor = &buf[..];
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame.message.id, "req-1");
        assert_eq!(frame.message.msg_type, MessageType::Verify);
        assert_eq!(frame.body, b"chunk bytes");

        let req: VerifyRequest = frame.message.payload_as().unwrap().unwrap();
        assert_eq!(req.file_hash, "abc");
    }

    #[tokio::test]
    async fn layout_is_length_prefixed() {
        let msg = Message::request::<()>("p", MessageType::Ping, None).unwrap();
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg, &[]).await.unwrap();

        let header_len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        let json: serde_json::Value = serde_json::from_slice(&buf[4..4 + header_len]).unwrap();
        assert_eq!(json["type"], "ping");
        let body_len = u64::from_be_bytes(buf[4 + header_len..12 + header_len].try_into().unwrap());
        assert_eq!(body_len, 0);
        assert_eq!(buf.len(), 12 + header_len);
    }

    #[tokio::test]
    async fn consecutive_frames_then_eof() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &verify_message(), b"one").await.unwrap();
        write_frame(&mut buf, &verify_message(), b"").await.unwrap();

        let mut cursor = &buf[..];
        assert_eq!(read_frame(&mut cursor).await.unwrap().unwrap().body, b"one");
        assert!(read_frame(&mut cursor).await.unwrap().unwrap().body.is_empty());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &verify_message(), b"payload").await.unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(ChannelError::Io(_))
        ));
    }

    #[tokio::test]
    async fn oversized_header_rejected_on_read() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_HEADER_SIZE as u32) + 1).to_be_bytes());

        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(ChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn oversized_body_rejected_on_read() {
        let header = serde_json::to_vec(&verify_message()).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(header.len() as u32).to_be_bytes());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&(MAX_BODY_SIZE + 1).to_be_bytes());

        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(ChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn oversized_header_rejected_on_write() {
        let big = "x".repeat(MAX_HEADER_SIZE);
        let msg = verify_message().reply_error(500, big);
        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, &msg, &[]).await,
            Err(ChannelError::Protocol(_))
        ));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_header() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(b"{nope");
        buf.extend_from_slice(&0u64.to_be_bytes());

        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(ChannelError::Json(_))
        ));
    }
}
