//! Outer signature and encryption frames.
//!
//! Workspaces that require it get their plain frame wrapped once more in a
//! frame of the same structure. The header segment of the wrapper carries the
//! workspace ID plus either an HMAC of the inner frame or the nonce used to
//! encrypt it:
//!
//! ```text
//! signature: [head type=1][workspace_id u32][hmac-sha256 32B][inner frame]
//! encrypt:   [head type=2][workspace_id u32][nonce 12B][aes-256-gcm(inner frame)]
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::protocol::error::{HormError, Result};
use crate::transport::frame::{FrameHead, FrameType};

type HmacSha256 = Hmac<Sha256>;

const WORKSPACE_ID_LEN: usize = 4;
const SIGNATURE_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// A frame with its outer wrapper removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrappedFrame {
    /// Type of the frame as received.
    pub frame_type: FrameType,
    /// Workspace ID carried by the wrapper, `None` for plain frames.
    pub workspace_id: Option<u32>,
    /// The plain frame.
    pub inner: Vec<u8>,
}

/// Wraps `inner` in a signature frame authenticated with `token`.
pub fn sign_frame(workspace_id: u32, token: &str, inner: &[u8]) -> Result<Vec<u8>> {
    let signature = hmac_of(token, inner)?;

    let mut header = Vec::with_capacity(WORKSPACE_ID_LEN + SIGNATURE_LEN);
    header.extend_from_slice(&workspace_id.to_be_bytes());
    header.extend_from_slice(&signature);

    FrameHead::new(FrameType::Signature).construct(&header, inner)
}

/// Wraps `inner` in an encrypt frame keyed by `token`.
pub fn encrypt_frame(workspace_id: u32, token: &str, inner: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(token)?;
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), inner)
        .map_err(|_| HormError::Encode("frame encryption failed".to_string()))?;

    let mut header = Vec::with_capacity(WORKSPACE_ID_LEN + NONCE_LEN);
    header.extend_from_slice(&workspace_id.to_be_bytes());
    header.extend_from_slice(&nonce_bytes);

    FrameHead::new(FrameType::Encrypt).construct(&header, &sealed)
}

/// Removes the outer wrapper of `buf`, verifying or decrypting it with `token`.
///
/// Plain frames are returned unchanged.
pub fn unwrap_frame(buf: &[u8], token: &str) -> Result<UnwrappedFrame> {
    let (head, header, payload) = FrameHead::split(buf)?;

    match head.frame_type {
        FrameType::Plain => Ok(UnwrappedFrame {
            frame_type: FrameType::Plain,
            workspace_id: None,
            inner: buf.to_vec(),
        }),
        FrameType::Signature => {
            let workspace_id = workspace_id_of(header, SIGNATURE_LEN)?;

            let mut mac = <HmacSha256 as Mac>::new_from_slice(token.as_bytes())
                .map_err(|e| HormError::Decode(format!("invalid workspace token: {}", e)))?;
            mac.update(payload);
            mac.verify_slice(&header[WORKSPACE_ID_LEN..])
                .map_err(|_| HormError::Decode("frame signature mismatch".to_string()))?;

            Ok(UnwrappedFrame {
                frame_type: FrameType::Signature,
                workspace_id: Some(workspace_id),
                inner: payload.to_vec(),
            })
        }
        FrameType::Encrypt => {
            let workspace_id = workspace_id_of(header, NONCE_LEN)?;
            let cipher = cipher_for(token)?;

            let inner = cipher
                .decrypt(Nonce::from_slice(&header[WORKSPACE_ID_LEN..]), payload)
                .map_err(|_| HormError::Decode("frame decryption failed".to_string()))?;

            Ok(UnwrappedFrame {
                frame_type: FrameType::Encrypt,
                workspace_id: Some(workspace_id),
                inner,
            })
        }
    }
}

fn workspace_id_of(header: &[u8], trailer_len: usize) -> Result<u32> {
    if header.len() != WORKSPACE_ID_LEN + trailer_len {
        return Err(HormError::Decode(format!(
            "wrapper header segment len {} != {}",
            header.len(),
            WORKSPACE_ID_LEN + trailer_len
        )));
    }
    Ok(u32::from_be_bytes([header[0], header[1], header[2], header[3]]))
}

fn hmac_of(token: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(token.as_bytes())
        .map_err(|e| HormError::Encode(format!("invalid workspace token: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn cipher_for(token: &str) -> Result<Aes256Gcm> {
    let key = Sha256::digest(token.as_bytes());
    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| HormError::Encode(format!("invalid frame key: {}", e)))
}
