use crate::protocol::error::{HormError, Result};
use crate::protocol::{RequestHeader, ResponseHeader};
use crate::transport::frame::{FrameHead, FrameType};
use crate::transport::wrap::{encrypt_frame, sign_frame, unwrap_frame};

/// How a request frame is protected on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encryption {
    #[default]
    None,
    Signature,
    Encrypt,
}

impl From<Encryption> for FrameType {
    fn from(value: Encryption) -> Self {
        match value {
            Encryption::None => FrameType::Plain,
            Encryption::Signature => FrameType::Signature,
            Encryption::Encrypt => FrameType::Encrypt,
        }
    }
}

/// Per-call parameters that shape the outgoing frame.
#[derive(Debug, Clone, Default)]
pub struct FrameParam {
    pub workspace_id: u32,
    pub encryption: Encryption,
    /// Workspace access token, the signing / encryption secret.
    pub token: String,
}

/// Turns request metadata and body into a frame and a response frame back
/// into metadata and body.
///
/// Bodies are opaque to the codec; only the headers have a fixed schema.
pub trait FrameCodec: Send + Sync {
    fn encode(&self, param: &FrameParam, head: &RequestHeader, body: &[u8]) -> Result<Vec<u8>>;

    fn decode(&self, frame: &[u8]) -> Result<(ResponseHeader, Vec<u8>)>;
}

/// Client side of the access protocol.
///
/// Request headers are postcard-encoded into the header segment of a plain
/// frame, which is then wrapped according to [`FrameParam::encryption`].
/// Responses must arrive as plain frames.
///
/// # Example
///
/// ```
/// use horm_common::transport::{ClientCodec, FrameCodec, FrameParam};
/// use horm_common::{CallerOptions, QueryMode, RequestHeader};
///
/// let head = RequestHeader::build(QueryMode::Single, &CallerOptions::default(), None);
/// let frame = ClientCodec.encode(&FrameParam::default(), &head, b"select 1").unwrap();
/// assert_eq!(frame[0], 0x48);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCodec;

impl FrameCodec for ClientCodec {
    fn encode(&self, param: &FrameParam, head: &RequestHeader, body: &[u8]) -> Result<Vec<u8>> {
        let header = postcard::to_stdvec(head)
            .map_err(|e| HormError::Encode(format!("request header encode: {}", e)))?;
        let frame = FrameHead::new(FrameType::Plain).construct(&header, body)?;

        match param.encryption {
            Encryption::None => Ok(frame),
            Encryption::Signature => sign_frame(param.workspace_id, &param.token, &frame),
            Encryption::Encrypt => encrypt_frame(param.workspace_id, &param.token, &frame),
        }
    }

    fn decode(&self, frame: &[u8]) -> Result<(ResponseHeader, Vec<u8>)> {
        let (head, header, body) = FrameHead::split(frame)?;
        if head.frame_type != FrameType::Plain {
            return Err(HormError::Decode(format!(
                "unexpected response frame type {}",
                head.frame_type.as_u8()
            )));
        }

        let rsp: ResponseHeader = postcard::from_bytes(header)
            .map_err(|e| HormError::Decode(format!("response header decode: {}", e)))?;
        Ok((rsp, body.to_vec()))
    }
}

/// Decodes a request frame the way the access service does.
///
/// Wrapped frames are verified or decrypted with `token` first. Used by
/// in-process peers in tests and tools.
pub fn decode_request(frame: &[u8], token: &str) -> Result<(RequestHeader, Vec<u8>)> {
    let unwrapped = unwrap_frame(frame, token)?;
    let (_, header, body) = FrameHead::split(&unwrapped.inner)?;

    let head: RequestHeader = postcard::from_bytes(header)
        .map_err(|e| HormError::Decode(format!("request header decode: {}", e)))?;
    Ok((head, body.to_vec()))
}

/// Builds a plain response frame.
pub fn encode_response(head: &ResponseHeader, body: &[u8]) -> Result<Vec<u8>> {
    let header = postcard::to_stdvec(head)
        .map_err(|e| HormError::Encode(format!("response header encode: {}", e)))?;
    FrameHead::new(FrameType::Plain).construct(&header, body)
}
