//! Wire codec: an 8-byte little-endian length prefix followed by a JSON
//! envelope (§4.1, §6). Frozen wire choice — little-endian, exact-size
//! reads, JSON payloads.

use crate::error::{TunnelError, TunnelResult};
use crate::message::{Envelope, MsgType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A generous ceiling on a single frame's payload size, guarding against a
/// corrupt or hostile length prefix turning into an unbounded allocation.
const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// Serialize `msg` to its wire bytes: 8-byte LE length, then the JSON body.
pub fn encode_frame(msg: &Envelope) -> TunnelResult<Vec<u8>> {
    let body = serde_json::to_vec(msg).map_err(|e| TunnelError::Decode(e.to_string()))?;
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a single JSON envelope from an already length-delimited buffer.
///
/// The `type` tag is checked against the eight known variants before the
/// payload is decoded, so a genuinely unrecognized tag surfaces as
/// `UnknownType` rather than being folded into `DecodeError`, which is
/// reserved for a *known* tag whose payload doesn't match its schema
/// (§4.1).
pub fn decode_body(body: &[u8]) -> TunnelResult<Envelope> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| TunnelError::Decode(e.to_string()))?;
    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| TunnelError::Decode("envelope missing \"type\" field".to_string()))?;
    if MsgType::from_str(tag).is_none() {
        return Err(TunnelError::UnknownType(tag.to_string()));
    }
    serde_json::from_value(value).map_err(|e| TunnelError::Decode(e.to_string()))
}

/// Write one message: frame, then write length and body to the stream.
pub async fn write_msg<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Envelope) -> TunnelResult<()> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message: 8 LE length bytes, then exactly that many body bytes.
pub async fn read_msg<R: AsyncRead + Unpin>(reader: &mut R) -> TunnelResult<Envelope> {
    let mut len_buf = [0u8; 8];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(TunnelError::Io)?;
    let len = u64::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(TunnelError::TruncatedRead {
            expected: len,
            got: 0,
        });
    }
    let mut body = vec![0u8; len as usize];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TunnelError::TruncatedRead {
                expected: len,
                got: 0,
            });
        }
        Err(e) => return Err(TunnelError::Io(e)),
    }
    decode_body(&body)
}

/// Read one message and assert it is the `Response` matching `magic`/`request`
/// with an empty `message` (§4.1). Any mismatch surfaces as `ProtocolMismatch`.
pub async fn check_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    magic: &str,
    request: MsgType,
) -> TunnelResult<()> {
    match read_msg(reader).await? {
        Envelope::Response(resp) => {
            if resp.magic != magic {
                return Err(TunnelError::ProtocolMismatch(format!(
                    "response magic {} does not match request magic {}",
                    resp.magic, magic
                )));
            }
            if resp.request != request.as_str() {
                return Err(TunnelError::ProtocolMismatch(format!(
                    "response request tag {} does not match expected {}",
                    resp.request, request
                )));
            }
            if !resp.is_ok() {
                return Err(TunnelError::ProtocolMismatch(resp.message));
            }
            Ok(())
        }
        other => Err(TunnelError::ProtocolMismatch(format!(
            "expected Response, got {}",
            other.msg_type()
        ))),
    }
}
