use crate::protocol::error::{HormError, Result};

/// Size of the fixed frame head in bytes.
pub const FRAME_HEAD_LEN: usize = 10;

/// Largest frame accepted from or written to the wire (10 MB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// First byte of every frame.
pub const FRAME_MAGIC: u8 = 0x48;

/// Frame format version.
pub const FRAME_VERSION: u8 = 1;

const TOTAL_LEN_OFFSET: usize = 4;
const HEADER_LEN_OFFSET: usize = 8;

/// How the frame payload is protected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameType {
    /// Header segment and body in clear.
    #[default]
    Plain,
    /// Plain frame wrapped with a workspace HMAC.
    Signature,
    /// Plain frame encrypted with the workspace key.
    Encrypt,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Plain => 0,
            FrameType::Signature => 1,
            FrameType::Encrypt => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameType::Plain),
            1 => Some(FrameType::Signature),
            2 => Some(FrameType::Encrypt),
            _ => None,
        }
    }
}

/// The fixed-size head in front of every frame.
///
/// Wire layout (big-endian):
///
/// ```text
/// 0       1            2         3       4                8              10
/// | magic | frame type | version | flags | total len (u32) | header len (u16) |
/// ```
///
/// `total_len` covers the whole frame including this head. The header
/// segment of `header_len` bytes follows the head and the body fills the
/// rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub frame_type: FrameType,
    pub version: u8,
    pub flags: u8,
    pub total_len: u32,
    pub header_len: u16,
}

impl FrameHead {
    pub fn new(frame_type: FrameType) -> Self {
        FrameHead {
            frame_type,
            version: FRAME_VERSION,
            flags: 0,
            total_len: 0,
            header_len: 0,
        }
    }

    /// Assembles head, header segment and body into one contiguous frame.
    pub fn construct(&mut self, header: &[u8], body: &[u8]) -> Result<Vec<u8>> {
        let header_len = u16::try_from(header.len()).map_err(|_| {
            HormError::Encode(format!("frame header segment too large: {} bytes", header.len()))
        })?;

        let total = FRAME_HEAD_LEN + header.len() + body.len();
        if total > MAX_FRAME_SIZE {
            return Err(HormError::Encode(format!(
                "frame too large: {} bytes (max {} bytes)",
                total, MAX_FRAME_SIZE
            )));
        }

        self.header_len = header_len;
        self.total_len = total as u32;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&self.to_bytes());
        buf.extend_from_slice(header);
        buf.extend_from_slice(body);
        Ok(buf)
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEAD_LEN] {
        let mut head = [0u8; FRAME_HEAD_LEN];
        head[0] = FRAME_MAGIC;
        head[1] = self.frame_type.as_u8();
        head[2] = self.version;
        head[3] = self.flags;
        head[TOTAL_LEN_OFFSET..HEADER_LEN_OFFSET].copy_from_slice(&self.total_len.to_be_bytes());
        head[HEADER_LEN_OFFSET..FRAME_HEAD_LEN].copy_from_slice(&self.header_len.to_be_bytes());
        head
    }

    /// Parses the head at the start of `buf`.
    pub fn extract(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEAD_LEN {
            return Err(HormError::Decode(format!(
                "frame buf len {} shorter than frame head len {}",
                buf.len(),
                FRAME_HEAD_LEN
            )));
        }

        if buf[0] != FRAME_MAGIC {
            return Err(HormError::Decode(format!("invalid frame magic 0x{:02x}", buf[0])));
        }

        let frame_type = FrameType::from_u8(buf[1])
            .ok_or_else(|| HormError::Decode(format!("unknown frame type {}", buf[1])))?;

        Ok(FrameHead {
            frame_type,
            version: buf[2],
            flags: buf[3],
            total_len: total_len(buf),
            header_len: u16::from_be_bytes([buf[HEADER_LEN_OFFSET], buf[HEADER_LEN_OFFSET + 1]]),
        })
    }

    /// Splits a complete frame into its header segment and body.
    ///
    /// The declared total length must equal the buffer length and the header
    /// segment must be non-empty and in bounds.
    pub fn split(buf: &[u8]) -> Result<(FrameHead, &[u8], &[u8])> {
        let head = Self::extract(buf)?;

        if head.total_len as usize != buf.len() {
            return Err(HormError::Decode(format!(
                "total len {} is not actual buf len {}",
                head.total_len,
                buf.len()
            )));
        }

        if head.header_len == 0 {
            return Err(HormError::Decode("frame header segment len empty".to_string()));
        }

        let end = FRAME_HEAD_LEN + head.header_len as usize;
        if end > buf.len() {
            return Err(HormError::Decode(format!(
                "frame header segment len {} out of bounds for frame of {} bytes",
                head.header_len,
                buf.len()
            )));
        }

        Ok((head, &buf[FRAME_HEAD_LEN..end], &buf[end..]))
    }
}

/// Reads the big-endian total-length field of a frame head.
pub(crate) fn total_len(head: &[u8]) -> u32 {
    u32::from_be_bytes([
        head[TOTAL_LEN_OFFSET],
        head[TOTAL_LEN_OFFSET + 1],
        head[TOTAL_LEN_OFFSET + 2],
        head[TOTAL_LEN_OFFSET + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_layout() {
        let mut head = FrameHead::new(FrameType::Plain);
        let buf = head.construct(b"hdr", b"body!").unwrap();

        assert_eq!(buf.len(), FRAME_HEAD_LEN + 3 + 5);
        assert_eq!(buf[0], FRAME_MAGIC);
        assert_eq!(buf[1], 0);
        assert_eq!(buf[2], FRAME_VERSION);
        assert_eq!(&buf[4..8], &(18u32).to_be_bytes());
        assert_eq!(&buf[8..10], &(3u16).to_be_bytes());
        assert_eq!(&buf[10..13], b"hdr");
        assert_eq!(&buf[13..], b"body!");
    }

    #[test]
    fn test_split() {
        let mut head = FrameHead::new(FrameType::Signature);
        let buf = head.construct(b"abc", b"xyz").unwrap();

        let (parsed, header, body) = FrameHead::split(&buf).unwrap();
        assert_eq!(parsed, head);
        assert_eq!(header, b"abc");
        assert_eq!(body, b"xyz");
    }

    #[test]
    fn test_split_rejects_length_mismatch() {
        let mut head = FrameHead::new(FrameType::Plain);
        let mut buf = head.construct(b"abc", b"xyz").unwrap();
        buf.push(0);

        let err = FrameHead::split(&buf).unwrap_err();
        assert!(matches!(err, HormError::Decode(_)), "{}", err);

        buf.truncate(buf.len() - 2);
        assert!(matches!(FrameHead::split(&buf), Err(HormError::Decode(_))));
    }

    #[test]
    fn test_split_rejects_empty_header_segment() {
        let mut head = FrameHead::new(FrameType::Plain);
        let buf = head.construct(b"", b"body").unwrap();
        assert!(matches!(FrameHead::split(&buf), Err(HormError::Decode(_))));
    }

    #[test]
    fn test_split_rejects_header_out_of_bounds() {
        let mut head = FrameHead::new(FrameType::Plain);
        let mut buf = head.construct(b"abc", b"").unwrap();
        buf[8..10].copy_from_slice(&(40u16).to_be_bytes());
        assert!(matches!(FrameHead::split(&buf), Err(HormError::Decode(_))));
    }

    #[test]
    fn test_extract_rejects_bad_magic_and_type() {
        let mut head = FrameHead::new(FrameType::Plain);
        let mut buf = head.construct(b"a", b"").unwrap();

        buf[1] = 9;
        assert!(FrameHead::extract(&buf).is_err());

        buf[1] = 0;
        buf[0] = 0;
        assert!(FrameHead::extract(&buf).is_err());

        assert!(FrameHead::extract(&buf[..4]).is_err());
    }

    #[test]
    fn test_construct_rejects_oversized_header() {
        let mut head = FrameHead::new(FrameType::Plain);
        let header = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(head.construct(&header, b""), Err(HormError::Encode(_))));
    }
}
