//! Explicit message boundaries for the wireless path.
//!
//! Each envelope is prefixed with its length as a big-endian `u32` and the
//! result is cut into fixed-size frames. The receiving [`Reassembler`] does not
//! care how notifications slice the byte stream.

use crate::error::{ChatError, Result};

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Upper bound on one reassembled envelope.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(ChatError::Transport(format!(
            "envelope of {} bytes exceeds {} byte limit",
            payload.len(),
            MAX_MESSAGE_LEN
        )));
    }
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Split `bytes` into chunks of at most `frame_size` bytes, in order.
pub fn split_frames(bytes: &[u8], frame_size: usize) -> Vec<Vec<u8>> {
    let frame_size = frame_size.max(1);
    bytes.chunks(frame_size).map(<[u8]>::to_vec).collect()
}

/// Accumulates received chunks and yields complete envelopes.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification worth of bytes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(chunk);

        let mut complete = Vec::new();
        loop {
            if self.buffer.len() < LENGTH_PREFIX_LEN {
                break;
            }
            let mut prefix = [0u8; LENGTH_PREFIX_LEN];
            prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_LEN]);
            let len = u32::from_be_bytes(prefix) as usize;

            if len > MAX_MESSAGE_LEN {
                self.buffer.clear();
                return Err(ChatError::Transport(format!(
                    "declared frame length {} exceeds limit",
                    len
                )));
            }
            if self.buffer.len() < LENGTH_PREFIX_LEN + len {
                break;
            }

            let rest = self.buffer.split_off(LENGTH_PREFIX_LEN + len);
            let mut message = std::mem::replace(&mut self.buffer, rest);
            message.drain(..LENGTH_PREFIX_LEN);
            complete.push(message);
        }

        Ok(complete)
    }

    /// Bytes held for an envelope that has not fully arrived yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
