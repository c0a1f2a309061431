//! Divider-based framing.
//!
//! Every message on the wire is terminated by a single divider byte:
//! ```text
//! ┌──────────────────────┬─────────┐
//! │  payload             │ divider │
//! │  any bytes but div.  │ 1 byte  │
//! └──────────────────────┴─────────┘
//! ```
//! The default divider is `255`; human-readable variants use `\n`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Default divider byte.
pub const DEFAULT_DIVIDER: u8 = 255;

/// Divider used by line-oriented variants.
pub const NEWLINE_DIVIDER: u8 = b'\n';

/// Maximum payload buffered while waiting for a divider.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Appends the divider to a payload.
#[must_use]
pub fn encode(payload: &[u8], divider: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(divider);
    buf.freeze()
}

/// Frame decoder that handles partial data.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    divider: u8,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DIVIDER)
    }
}

impl FrameDecoder {
    /// Creates a new frame decoder splitting on `divider`.
    #[must_use]
    pub fn new(divider: u8) -> Self {
        Self {
            buffer: BytesMut::new(),
            divider,
        }
    }

    /// Returns the divider byte.
    #[must_use]
    pub const fn divider(&self) -> u8 {
        self.divider
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to extract the next complete frame.
    ///
    /// Returns `Ok(Some(payload))` without the divider, or `Ok(None)` if more
    /// data is needed. Zero-length frames (two dividers in a row) are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TooLarge`] and drops the buffer if more than
    /// [`MAX_FRAME_SIZE`] bytes arrive without a divider.
    pub fn decode(&mut self) -> Result<Option<Bytes>, DecodeError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == self.divider) else {
                if self.buffer.len() > MAX_FRAME_SIZE {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    return Err(DecodeError::TooLarge {
                        size,
                        max: MAX_FRAME_SIZE,
                    });
                }
                return Ok(None);
            };

            let frame = self.buffer.split_to(pos + 1);
            if pos == 0 {
                continue;
            }
            return Ok(Some(frame.freeze().slice(..pos)));
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
