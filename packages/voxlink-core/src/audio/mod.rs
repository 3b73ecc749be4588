//! Audio formats and transcoding.
//!
//! The gateway handles exactly three formats, all mono:
//! - μ-law 8-bit at 8 kHz (carrier side, both directions)
//! - PCM s16le at 16 kHz (model input)
//! - PCM s16le at 24 kHz (model output)
//!
//! [`CallCodec`] converts between them; everything here is pure computation
//! with no I/O.

pub mod codec;
pub mod mulaw;
pub mod resample;

use bytes::Bytes;

pub use codec::{CallCodec, CodecError};

/// Sample encoding for a tagged audio chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// 8-bit μ-law companded.
    Ulaw,
    /// 16-bit signed little-endian linear PCM.
    PcmS16le,
}

impl Encoding {
    /// Bytes per sample for this encoding.
    #[must_use]
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Ulaw => 1,
            Self::PcmS16le => 2,
        }
    }
}

/// Audio format of a stream leg: sample rate plus encoding, always mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub encoding: Encoding,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, encoding: Encoding) -> Self {
        Self {
            sample_rate,
            encoding,
        }
    }

    /// Carrier-side format: μ-law at 8 kHz.
    pub const fn carrier() -> Self {
        Self::new(crate::protocol_constants::CARRIER_SAMPLE_RATE, Encoding::Ulaw)
    }

    /// Model input format: PCM at 16 kHz.
    pub const fn model_input() -> Self {
        Self::new(
            crate::protocol_constants::MODEL_INPUT_SAMPLE_RATE,
            Encoding::PcmS16le,
        )
    }

    /// Model output format: PCM at 24 kHz.
    pub const fn model_output() -> Self {
        Self::new(
            crate::protocol_constants::MODEL_OUTPUT_SAMPLE_RATE,
            Encoding::PcmS16le,
        )
    }

    /// Number of samples for the given duration.
    #[inline]
    pub fn frame_samples(&self, duration_ms: u32) -> usize {
        ((u64::from(self.sample_rate) * u64::from(duration_ms)) / 1000) as usize
    }

    /// Frame size in bytes for the given duration.
    #[inline]
    pub fn frame_bytes(&self, duration_ms: u32) -> usize {
        self.frame_samples(duration_ms) * self.encoding.bytes_per_sample()
    }
}

/// An audio chunk tagged with its per-direction sequence number.
///
/// Sequence numbers increase monotonically per direction within a call and
/// exist for ordering checks; gaps are counted, never reordered.
#[derive(Debug, Clone)]
pub struct SequencedFrame {
    pub seq: u64,
    pub data: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_frame_is_160_bytes() {
        assert_eq!(AudioFormat::carrier().frame_bytes(20), 160);
    }

    #[test]
    fn model_input_frame_is_640_bytes() {
        // 20ms at 16kHz, 2 bytes/sample
        assert_eq!(AudioFormat::model_input().frame_bytes(20), 640);
    }

    #[test]
    fn model_output_frame_is_960_bytes() {
        // 20ms at 24kHz, 2 bytes/sample
        assert_eq!(AudioFormat::model_output().frame_bytes(20), 960);
    }

    #[test]
    fn sample_widths_match_encoding() {
        assert_eq!(Encoding::Ulaw.bytes_per_sample(), 1);
        assert_eq!(Encoding::PcmS16le.bytes_per_sample(), 2);
    }
}
