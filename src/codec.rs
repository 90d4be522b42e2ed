//! Audio codec utilities
//!
//! Pure conversions between raw PCM byte buffers, the transport-safe base64
//! text encoding, and normalized floating-point audio buffers. These run once
//! per streamed chunk on the hot path and do no I/O.

use crate::error::{LiveError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// A block of normalized audio samples at a fixed rate and channel count.
///
/// Samples are interleaved when `channels > 1` and always lie in [-1.0, 1.0]
/// when produced by [`decode_audio_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        let frames = self.samples.len() as f64 / self.channels as f64;
        frames / self.sample_rate as f64
    }
}

/// Encode arbitrary bytes into the transport-safe text representation.
///
/// Deterministic and reversible: `decode(encode(b)) == b` for all `b`.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`encode`]. Fails with [`LiveError::MalformedPayload`] on input
/// that is not validly encoded.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| LiveError::MalformedPayload(e.to_string()))
}

/// Interpret `bytes` as signed 16-bit little-endian PCM and normalize each
/// sample to [-1.0, 1.0] by dividing by 32768.
///
/// A trailing remainder shorter than one full frame (`2 * channels` bytes)
/// is truncated rather than treated as an error.
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioBuffer {
    let frame_bytes = 2 * channels.max(1) as usize;
    let usable = bytes.len() - bytes.len() % frame_bytes;

    let mut samples = Vec::with_capacity(usable / 2);
    for pair in bytes[..usable].chunks_exact(2) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(value as f32 / 32768.0);
    }

    AudioBuffer::new(samples, sample_rate, channels)
}
