//! Message wire format
//!
//! A message travels as the UTF-8 text `<sender>#<body>`. How that text is
//! delimited on the stream depends on [`WireFormat`]:
//!
//! - `ReadBoundary` sends the bare text and treats each read (at most
//!   `read_buffer_size` bytes) as one message. Peers running the classic
//!   protocol speak this. Two messages written back to back can arrive as one
//!   read, and a message longer than the buffer arrives split. A multi-byte
//!   character cut by the buffer edge makes both halves invalid UTF-8, which
//!   fails the read and ends the session.
//! - `LengthPrefixed` prepends a 4-byte big-endian length. Frames are exact,
//!   but both ends must opt in. Only a stream that ends before the first
//!   header byte is a clean close; one cut off inside a header or payload is a
//!   transfer failure.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{ChatError, ChatResult};
use crate::types::ChatMessage;

/// Separator between sender label and body in the payload text
pub const SENDER_SEPARATOR: char = '#';

const LEN_SIZE: usize = 4;

// ----------------------------------------------------------------------------
// Wire Format
// ----------------------------------------------------------------------------

/// How messages are delimited on the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// One read is one message (classic, no header)
    #[default]
    ReadBoundary,
    /// 4-byte big-endian length, then the payload
    LengthPrefixed,
}

// ----------------------------------------------------------------------------
// Payload Text
// ----------------------------------------------------------------------------

/// Render a message as payload text
pub fn encode_payload(message: &ChatMessage) -> String {
    format!("{}{}{}", message.sender_label, SENDER_SEPARATOR, message.body)
}

/// Parse payload text received from a peer
///
/// Splits at the first separator. Text without one is all body and takes
/// `fallback_sender` as its label.
pub fn decode_payload(text: &str, fallback_sender: &str) -> ChatMessage {
    match text.split_once(SENDER_SEPARATOR) {
        Some((sender, body)) => ChatMessage::remote(sender, body),
        None => ChatMessage::remote(fallback_sender, text),
    }
}

// ----------------------------------------------------------------------------
// Codec
// ----------------------------------------------------------------------------

/// Frames payload text for one session
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    format: WireFormat,
    read_buffer_size: usize,
    max_frame_len: usize,
}

impl WireCodec {
    pub fn new(format: WireFormat, read_buffer_size: usize, max_frame_len: usize) -> Self {
        Self {
            format,
            read_buffer_size: read_buffer_size.max(1),
            max_frame_len,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Bytes to write for one message
    pub fn encode(&self, message: &ChatMessage) -> ChatResult<Vec<u8>> {
        let payload = encode_payload(message).into_bytes();
        match self.format {
            WireFormat::ReadBoundary => Ok(payload),
            WireFormat::LengthPrefixed => {
                if payload.len() > self.max_frame_len {
                    return Err(ChatError::FrameTooLarge {
                        size: payload.len(),
                        max: self.max_frame_len,
                    });
                }
                let mut frame = Vec::with_capacity(LEN_SIZE + payload.len());
                frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                frame.extend_from_slice(&payload);
                Ok(frame)
            }
        }
    }

    /// Read one frame of payload text; `None` when the peer closed the stream
    pub async fn read_frame<R>(&self, reader: &mut R) -> ChatResult<Option<String>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match self.format {
            WireFormat::ReadBoundary => {
                let mut buffer = vec![0u8; self.read_buffer_size];
                let count = reader.read(&mut buffer).await?;
                if count == 0 {
                    return Ok(None);
                }
                Ok(Some(std::str::from_utf8(&buffer[..count])?.to_owned()))
            }
            WireFormat::LengthPrefixed => {
                let mut header = [0u8; LEN_SIZE];
                if reader.read(&mut header[..1]).await? == 0 {
                    return Ok(None);
                }
                reader.read_exact(&mut header[1..]).await?;
                let len = u32::from_be_bytes(header) as usize;
                if len > self.max_frame_len {
                    return Err(ChatError::FrameTooLarge {
                        size: len,
                        max: self.max_frame_len,
                    });
                }
                let mut payload = vec![0u8; len];
                reader.read_exact(&mut payload).await?;
                Ok(Some(std::str::from_utf8(&payload)?.to_owned()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_payload_split_at_first_separator() {
        let message = decode_payload("alice#see you at #5", "peer");
        assert_eq!(message.sender_label, "alice");
        assert_eq!(message.body, "see you at #5");
        assert!(!message.originated_locally);
    }

    #[test]
    fn test_payload_without_separator_uses_fallback() {
        let message = decode_payload("just text", "Pixel 7");
        assert_eq!(message.sender_label, "Pixel 7");
        assert_eq!(message.body, "just text");
    }

    #[test]
    fn test_encode_read_boundary_is_bare_text() {
        let codec = WireCodec::new(WireFormat::ReadBoundary, 1024, 64);
        let bytes = codec.encode(&ChatMessage::local("bob", "hi")).unwrap();
        assert_eq!(bytes, b"bob#hi");
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let codec = WireCodec::new(WireFormat::LengthPrefixed, 1024, 4);
        let result = codec.encode(&ChatMessage::local("bob", "hello"));
        assert!(matches!(result, Err(ChatError::FrameTooLarge { size: 9, max: 4 })));
    }

    #[tokio::test]
    async fn test_read_boundary_one_read_one_frame() {
        let codec = WireCodec::new(WireFormat::ReadBoundary, 1024, 64);
        let mut reader = Builder::new().read(b"a#one").read(b"a#two").build();

        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("a#one"));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("a#two"));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_boundary_truncates_at_buffer_size() {
        let codec = WireCodec::new(WireFormat::ReadBoundary, 4, 64);
        let mut reader = Builder::new().read(b"abcdefgh").build();

        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("abcd"));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("efgh"));
    }

    #[tokio::test]
    async fn test_read_boundary_invalid_utf8_fails() {
        let codec = WireCodec::new(WireFormat::ReadBoundary, 1024, 64);
        let mut reader = Builder::new().read(&[0xff, 0xfe]).build();

        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(err.is_transfer_failure());
    }

    #[tokio::test]
    async fn test_length_prefixed_frames_split_reads() {
        let codec = WireCodec::new(WireFormat::LengthPrefixed, 1024, 64);
        let mut reader = Builder::new()
            .read(&[0, 0, 0, 4, b'a', b'#'])
            .read(b"hi")
            .read(&[0, 0])
            .read(&[0, 3, b'b', b'#', b'!'])
            .build();

        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("a#hi"));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("b#!"));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_length_prefixed_cut_header_fails() {
        let codec = WireCodec::new(WireFormat::LengthPrefixed, 1024, 64);
        let mut reader = Builder::new().read(&[0, 0]).build();

        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChatError::TransferFailed(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_length_prefixed_cut_payload_fails() {
        let codec = WireCodec::new(WireFormat::LengthPrefixed, 1024, 64);
        let mut reader = Builder::new().read(&[0, 0, 0, 5, b'a', b'#']).build();

        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChatError::TransferFailed(_)));
    }

    #[tokio::test]
    async fn test_read_boundary_split_character_fails() {
        let codec = WireCodec::new(WireFormat::ReadBoundary, 4, 64);
        // "a#xé": the buffer ends after the first byte of é
        let mut reader = Builder::new().read(&[b'a', b'#', b'x', 0xc3, 0xa9]).build();

        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidText(_)));
        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidText(_)));
    }

    #[tokio::test]
    async fn test_length_prefixed_rejects_large_header() {
        let codec = WireCodec::new(WireFormat::LengthPrefixed, 1024, 8);
        let mut reader = Builder::new().read(&[0, 0, 1, 0]).build();

        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ChatError::FrameTooLarge { size: 256, max: 8 }));
    }
}
