//! Length-prefixed JSON envelopes shared by the daemon and its clients.
//!
//! ```text
//! +----------------------+---------------------------+
//! | u32 length (big end) | UTF-8 JSON, `length` bytes |
//! +----------------------+---------------------------+
//! ```
//!
//! Frames larger than [`MAX_FRAME_BYTES`] are refused in both directions
//! before any payload byte is read or written; a bad length almost always
//! means the two ends have lost sync.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one encoded message (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const HEADER_BYTES: usize = 4;

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Client → daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Daemon → client. Command-specific fields are flattened beside
/// `success` / `error` / `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            message: Some(message.into()),
            fields: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: None,
            fields: Map::new(),
        }
    }

    /// A verified hardware result: `success` reflects the readback check and
    /// `message` is chosen accordingly.
    pub fn verified(success: bool, ok_message: &str, failed_message: &str) -> Self {
        Self {
            success,
            error: None,
            message: Some(if success { ok_message } else { failed_message }.to_string()),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Human-readable summary: the message on success, the error otherwise.
    pub fn summary(&self) -> &str {
        if self.success {
            self.message.as_deref().unwrap_or("Command completed")
        } else {
            self.error
                .as_deref()
                .or(self.message.as_deref())
                .unwrap_or("Unknown error")
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("connection closed mid-frame")]
    UnexpectedEof,

    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Whether the connection can no longer be trusted to be frame-aligned.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooLarge { .. } | ProtocolError::UnexpectedEof
        )
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize `message` into one complete frame (header + payload).
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_BYTES + payload.len());
    // Bounded by MAX_FRAME_BYTES above, so the cast cannot truncate.
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn check_len(header: [u8; HEADER_BYTES]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(len)
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    let text = std::str::from_utf8(payload)?;
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

// ---------------------------------------------------------------------------
// Blocking I/O (client side)
// ---------------------------------------------------------------------------

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), ProtocolError> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, ProtocolError> {
    let mut header = [0u8; HEADER_BYTES];
    let mut filled = 0;
    while filled < HEADER_BYTES {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::UnexpectedEof),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let len = check_len(header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::UnexpectedEof
        } else {
            ProtocolError::Io(err)
        }
    })?;
    decode_payload(&payload).map(Some)
}

// ---------------------------------------------------------------------------
// Async I/O (daemon side)
// ---------------------------------------------------------------------------

pub async fn write_frame_async<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Async counterpart of [`read_frame`].
pub async fn read_frame_async<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_BYTES];
    let mut filled = 0;
    while filled < HEADER_BYTES {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(ProtocolError::UnexpectedEof),
            n => filled += n,
        }
    }
    let len = check_len(header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::UnexpectedEof
        } else {
            ProtocolError::Io(err)
        }
    })?;
    decode_payload(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn set_brightness_request_survives_framing() {
        let request = Request::new("set-brightness").with_param("level", 5);
        let frame = encode_frame(&request).expect("encode");

        assert_eq!(&frame[..4], &((frame.len() - 4) as u32).to_be_bytes());

        let decoded: Request = read_frame(&mut Cursor::new(frame))
            .expect("decode")
            .expect("one frame");
        assert_eq!(decoded.command, "set-brightness");
        assert_eq!(decoded.params.get("level"), Some(&json!(5)));
        assert_eq!(decoded, request);
    }

    #[test]
    fn missing_params_default_to_empty() {
        let payload = br#"{"command":"keepalive"}"#;
        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(payload);

        let decoded: Request = read_frame(&mut Cursor::new(frame)).unwrap().unwrap();
        assert!(decoded.params.is_empty());
    }

    #[test]
    fn response_fields_flatten_beside_success() {
        let response = Response::verified(true, "Frontlight enabled", "unused")
            .with_field("readback", "0x06");
        let value = serde_json::to_value(&response).expect("to value");
        assert_eq!(
            value,
            json!({"success": true, "message": "Frontlight enabled", "readback": "0x06"})
        );

        let back: Response = serde_json::from_value(value).expect("from value");
        assert_eq!(back.field("readback"), Some(&json!("0x06")));
    }

    #[test]
    fn oversized_outgoing_message_is_rejected_before_writing() {
        let huge = Request::new("keepalive").with_param("pad", "x".repeat(MAX_FRAME_BYTES));
        let mut sink = Vec::new();
        let err = write_frame(&mut sink, &huge).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }), "got: {err}");
        assert!(err.to_string().contains("too large"));
        assert!(sink.is_empty(), "nothing may reach the socket");
    }

    #[test]
    fn oversized_incoming_header_is_rejected_before_reading_payload() {
        let mut frame = ((MAX_FRAME_BYTES + 1) as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(b"{\"command\":\"keepalive\"}");
        let mut cursor = Cursor::new(frame);

        let err = read_frame::<_, Request>(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }), "got: {err}");
        assert!(err.is_desync());
        assert_eq!(cursor.position(), 4, "payload must not be consumed");
    }

    #[test]
    fn clean_eof_between_frames_is_none() {
        let decoded = read_frame::<_, Request>(&mut Cursor::new(Vec::new())).expect("eof");
        assert!(decoded.is_none());
    }

    #[test]
    fn truncated_frames_are_unexpected_eof() {
        let err = read_frame::<_, Request>(&mut Cursor::new(vec![0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof));

        let mut frame = 10u32.to_be_bytes().to_vec();
        frame.extend_from_slice(b"{}");
        let err = read_frame::<_, Request>(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof));
    }

    #[test]
    fn garbage_payload_is_a_decode_error_not_too_large() {
        let payload = b"not json";
        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(payload);
        let err = read_frame::<_, Request>(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)), "got: {err}");
        assert!(!err.is_desync());
    }

    #[tokio::test]
    async fn async_framing_matches_blocking_framing() {
        let request = Request::new("enable-frontlight").with_param("level", 2);
        let mut buf = Vec::new();
        write_frame_async(&mut buf, &request).await.expect("write");
        assert_eq!(buf, encode_frame(&request).unwrap());

        let mut reader = buf.as_slice();
        let decoded: Request = read_frame_async(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, request);
        let eof: Option<Request> = read_frame_async(&mut reader).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn async_reader_reassembles_split_header() {
        let frame = encode_frame(&Request::new("keepalive")).unwrap();
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame[..1])
            .read(&frame[1..3])
            .read(&frame[3..9])
            .read(&frame[9..])
            .build();

        let decoded: Request = read_frame_async(&mut mock).await.unwrap().unwrap();
        assert_eq!(decoded.command, "keepalive");
    }

    #[tokio::test]
    async fn async_reader_reports_mid_header_eof() {
        let mut mock = tokio_test::io::Builder::new().read(&[0, 0, 1]).build();
        let err = read_frame_async::<_, Request>(&mut mock).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof));
    }
}
