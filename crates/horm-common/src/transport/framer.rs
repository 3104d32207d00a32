use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::error::{HormError, Result};
use crate::transport::frame::{total_len, FRAME_HEAD_LEN, MAX_FRAME_SIZE};

/// Reads whole frames from a byte stream.
///
/// A `Framer` is attached to one connection for its whole life. It reads the
/// fixed head first, validates the declared total length and then reads the
/// remainder of the frame into a single buffer.
///
/// # Errors
///
/// A short read at either stage surfaces as [`HormError::Io`] and a declared
/// length outside `FRAME_HEAD_LEN..=max_frame_size` as [`HormError::Decode`].
/// Either way the stream is no longer aligned on a frame boundary and the
/// connection must be discarded.
#[derive(Debug, Clone)]
pub struct Framer {
    head: [u8; FRAME_HEAD_LEN],
    max_frame_size: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Framer {
            head: [0u8; FRAME_HEAD_LEN],
            max_frame_size,
        }
    }

    /// Reads one complete frame, head included.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        reader.read_exact(&mut self.head).await?;

        let total = total_len(&self.head) as usize;
        if total < FRAME_HEAD_LEN {
            return Err(HormError::Decode(format!(
                "frame total len {} shorter than frame head len {}",
                total, FRAME_HEAD_LEN
            )));
        }
        if total > self.max_frame_size {
            return Err(HormError::Decode(format!(
                "frame too large: {} bytes (max {} bytes)",
                total, self.max_frame_size
            )));
        }

        let mut buf = vec![0u8; total];
        buf[..FRAME_HEAD_LEN].copy_from_slice(&self.head);
        reader.read_exact(&mut buf[FRAME_HEAD_LEN..]).await?;

        Ok(buf)
    }
}
