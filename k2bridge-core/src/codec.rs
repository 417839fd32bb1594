//! Binary wire buffers for the color, depth and infrared channels.
//!
//! Layout: `raw samples ++ f64 little-endian UTC seconds`. The length of every
//! buffer a packer produces is `geometry.sample_len() + 8` for the whole session.

use crate::error::{Error, Result};
use crate::types::FrameGeometry;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the trailing timestamp.
pub const TIMESTAMP_LEN: usize = std::mem::size_of::<f64>();

/// Packs frames of one fixed geometry into wire buffers.
///
/// A packed buffer is handed out as a frozen [`Bytes`] view. `pack` reuses the
/// allocation only once every earlier packet has been released. Subscriber
/// queues keep the most recent packets alive, so while anyone is subscribed
/// each `pack` allocates a fresh buffer of the same wire length.
pub struct WirePacker {
    sample_len: usize,
    buffer: BytesMut,
}

impl WirePacker {
    pub fn new(geometry: FrameGeometry) -> Self {
        let sample_len = geometry.sample_len();
        Self {
            sample_len,
            buffer: BytesMut::with_capacity(sample_len + TIMESTAMP_LEN),
        }
    }

    /// Length of every buffer produced by this packer.
    pub fn wire_len(&self) -> usize {
        self.sample_len + TIMESTAMP_LEN
    }

    /// Pack `samples` followed by `timestamp`.
    ///
    /// Fails with [`Error::GeometryMismatch`] when `samples` is not exactly one
    /// frame of the configured geometry; nothing is truncated or padded.
    pub fn pack(&mut self, samples: &[u8], timestamp: f64) -> Result<Bytes> {
        if samples.len() != self.sample_len {
            return Err(Error::GeometryMismatch {
                expected: self.sample_len,
                actual: samples.len(),
            });
        }
        self.buffer.clear();
        self.buffer.reserve(self.wire_len());
        self.buffer.extend_from_slice(samples);
        self.buffer.put_f64_le(timestamp);
        Ok(self.buffer.split().freeze())
    }
}

/// Pack into a freshly allocated buffer. Off the hot path only.
pub fn pack_binary_frame(samples: &[u8], timestamp: f64) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() + TIMESTAMP_LEN);
    out.extend_from_slice(samples);
    out.put_f64_le(timestamp);
    out.freeze()
}

/// Split a wire buffer into its samples and trailing timestamp.
pub fn split_wire_buffer(buffer: &[u8]) -> Option<(&[u8], f64)> {
    let split = buffer.len().checked_sub(TIMESTAMP_LEN)?;
    let (samples, tail) = buffer.split_at(split);
    let mut raw = [0u8; TIMESTAMP_LEN];
    raw.copy_from_slice(tail);
    Some((samples, f64::from_le_bytes(raw)))
}
