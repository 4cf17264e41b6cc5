//! Wire Codec (`SPEC_FULL.md` §4.1, C1): RFC 6455 handshake and frame
//! parsing/writing, implemented directly against `sha1`+`base64` and a raw
//! `hyper::upgrade::on` byte stream rather than a framework WebSocket
//! extractor, since this component is explicitly owned by the core (§1).

use base64::Engine;
use protocol::ErrorKind;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024;
const MAX_CONTROL_PAYLOAD: usize = 125;

/// Derives the `Sec-WebSocket-Accept` header value from the client's
/// `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Handshake headers pulled off the upgrade request. Validated per §4.1:
/// `Upgrade: websocket`, `Connection: upgrade`, version 13, and a
/// well-formed 16-byte base64 key.
pub struct HandshakeHeaders<'a> {
    pub upgrade: Option<&'a str>,
    pub connection: Option<&'a str>,
    pub version: Option<&'a str>,
    pub key: Option<&'a str>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HandshakeError {
    /// Not even an upgrade attempt; caller should respond 400.
    BadRequest,
    /// `Sec-WebSocket-Version` missing or not `13`; caller should respond 426.
    UnsupportedVersion,
}

pub fn validate_handshake(headers: &HandshakeHeaders) -> Result<String, HandshakeError> {
    let upgrade_ok = headers
        .upgrade
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection_ok = headers
        .connection
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    let key = headers.key.ok_or(HandshakeError::BadRequest)?;

    if !upgrade_ok || !connection_ok {
        return Err(HandshakeError::BadRequest);
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| HandshakeError::BadRequest)?;
    if decoded.len() != 16 {
        return Err(HandshakeError::BadRequest);
    }

    match headers.version {
        Some("13") => Ok(accept_key(key)),
        _ => Err(HandshakeError::UnsupportedVersion),
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// A close code + UTF-8 reason truncated per §4.1 (2-byte status, reason
/// truncated to 123 bytes so the whole close payload fits in 125 bytes).
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len().min(123));
    payload.extend_from_slice(&code.to_be_bytes());
    let mut reason = reason.as_bytes();
    if reason.len() > 123 {
        reason = &reason[..123];
    }
    payload.extend_from_slice(reason);
    payload
}

/// Reads and fully unmasks one frame from `reader`. Only FIN=1, masked
/// client frames are supported; anything else is reported as the matching
/// `ErrorKind` per §4.1 so the caller can close with the right reason.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_message_bytes: usize,
) -> Result<Frame, ErrorKind> {
    let mut header = [0u8; 2];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| ErrorKind::InvalidPayload)?;

    let fin = header[0] & 0x80 != 0;
    let opcode_bits = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let len_bits = header[1] & 0x7F;

    if !fin {
        return Err(ErrorKind::FragmentedFramesNotSupported);
    }
    if !masked {
        return Err(ErrorKind::ClientFrameNotMasked);
    }

    let opcode = Opcode::from_byte(opcode_bits).ok_or(ErrorKind::UnsupportedOpcode)?;

    let payload_len: u64 = match len_bits {
        126 => {
            let mut buf = [0u8; 2];
            reader
                .read_exact(&mut buf)
                .await
                .map_err(|_| ErrorKind::InvalidPayload)?;
            u16::from_be_bytes(buf) as u64
        }
        127 => {
            let mut buf = [0u8; 8];
            reader
                .read_exact(&mut buf)
                .await
                .map_err(|_| ErrorKind::InvalidPayload)?;
            u64::from_be_bytes(buf)
        }
        n => n as u64,
    };

    let control_frame = matches!(opcode, Opcode::Close | Opcode::Ping | Opcode::Pong);
    if control_frame && payload_len as usize > MAX_CONTROL_PAYLOAD {
        return Err(ErrorKind::InvalidPayload);
    }
    if payload_len as usize > max_message_bytes {
        return Err(ErrorKind::MessageTooLarge);
    }

    let mut mask_key = [0u8; 4];
    reader
        .read_exact(&mut mask_key)
        .await
        .map_err(|_| ErrorKind::InvalidPayload)?;

    let mut payload = vec![0u8; payload_len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| ErrorKind::InvalidPayload)?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }

    Ok(Frame { opcode, payload })
}

/// Writes one unmasked (server-to-client) frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: Opcode,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut header = vec![0x80 | opcode.to_byte()];
    let len = payload.len();
    if len < 126 {
        header.push(len as u8);
    } else if len <= u16::MAX as usize {
        header.push(126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub async fn write_text<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> std::io::Result<()> {
    write_frame(writer, Opcode::Text, text.as_bytes()).await
}

/// A pong's payload truncated to 125 bytes (§4.1) before echoing it back.
pub async fn write_pong<W: AsyncWrite + Unpin>(
    writer: &mut W,
    ping_payload: &[u8],
) -> std::io::Result<()> {
    let truncated = &ping_payload[..ping_payload.len().min(MAX_CONTROL_PAYLOAD)];
    write_frame(writer, Opcode::Pong, truncated).await
}

pub async fn write_close<W: AsyncWrite + Unpin>(
    writer: &mut W,
    code: u16,
    reason: &str,
) -> std::io::Result<()> {
    write_frame(writer, Opcode::Close, &close_payload(code, reason)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The canonical RFC 6455 §1.3 worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn validate_handshake_rejects_missing_key() {
        let headers = HandshakeHeaders {
            upgrade: Some("websocket"),
            connection: Some("Upgrade"),
            version: Some("13"),
            key: None,
        };
        assert_eq!(validate_handshake(&headers), Err(HandshakeError::BadRequest));
    }

    #[test]
    fn validate_handshake_rejects_bad_version() {
        let headers = HandshakeHeaders {
            upgrade: Some("websocket"),
            connection: Some("Upgrade"),
            version: Some("8"),
            key: Some("dGhlIHNhbXBsZSBub25jZQ=="),
        };
        assert_eq!(
            validate_handshake(&headers),
            Err(HandshakeError::UnsupportedVersion)
        );
    }

    #[test]
    fn validate_handshake_accepts_well_formed_request() {
        let headers = HandshakeHeaders {
            upgrade: Some("WebSocket"),
            connection: Some("keep-alive, Upgrade"),
            version: Some("13"),
            key: Some("dGhlIHNhbXBsZSBub25jZQ=="),
        };
        assert_eq!(
            validate_handshake(&headers).as_deref(),
            Ok("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
    }

    #[tokio::test]
    async fn read_frame_unmasks_client_text() {
        let mut raw = vec![0x81u8, 0x85]; // FIN+text, masked, len=5
        let mask = [1u8, 2, 3, 4];
        raw.extend_from_slice(&mask);
        for (i, b) in b"hello".iter().enumerate() {
            raw.push(b ^ mask[i % 4]);
        }
        let mut cursor = std::io::Cursor::new(raw);
        let frame = read_frame(&mut cursor, DEFAULT_MAX_MESSAGE_BYTES)
            .await
            .unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn read_frame_rejects_unmasked_client_frame() {
        let raw = vec![0x81u8, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut cursor = std::io::Cursor::new(raw);
        let err = read_frame(&mut cursor, DEFAULT_MAX_MESSAGE_BYTES)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::ClientFrameNotMasked);
    }

    #[tokio::test]
    async fn read_frame_rejects_fragmented_frames() {
        let raw = vec![0x01u8, 0x80, 0, 0, 0, 0]; // FIN=0, masked, len=0
        let mut cursor = std::io::Cursor::new(raw);
        let err = read_frame(&mut cursor, DEFAULT_MAX_MESSAGE_BYTES)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::FragmentedFramesNotSupported);
    }

    #[tokio::test]
    async fn read_frame_rejects_oversize_payload() {
        let raw = vec![0x81u8, 0xFE, 0xFF, 0xFF]; // len16 = 65535
        let mut cursor = std::io::Cursor::new(raw);
        let err = read_frame(&mut cursor, DEFAULT_MAX_MESSAGE_BYTES)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::MessageTooLarge);
    }
}
