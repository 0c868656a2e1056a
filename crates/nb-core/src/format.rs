//! Stream format descriptors
//!
//! A format fixes the frame size for every buffer that crosses a pipe or
//! sink boundary. Negotiation compares formats for exact equality, so two
//! endpoints interoperate only when rate, channel count, and sample
//! encoding all match.

use serde::{Deserialize, Serialize};

use crate::error::{NbError, NbResult};

/// Maximum channel count accepted by [`FrameFormat::new`].
pub const MAX_CHANNELS: u16 = 8;

/// Encoding of a single sample within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit integer PCM.
    I16,
    /// Signed 24-bit integer PCM, packed (3 bytes per sample).
    I24,
    /// Signed 32-bit integer PCM.
    I32,
    /// 32-bit float PCM, nominal range [-1.0, 1.0].
    F32,
}

impl SampleFormat {
    /// Bytes occupied by one sample of this encoding.
    #[inline]
    pub const fn width_bytes(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }
}

/// Fully-specified stream format: rate, channel count, sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl FrameFormat {
    /// Builds a validated format.
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> NbResult<Self> {
        if sample_rate == 0 {
            return Err(NbError::InvalidFormat("sample rate must be nonzero"));
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(NbError::InvalidFormat("channel count out of range"));
        }
        Ok(Self {
            sample_rate,
            channels,
            sample_format,
        })
    }

    /// Stereo float at 48 kHz, the canonical fast-path format.
    #[inline]
    pub const fn stereo_f32_48k() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::F32,
        }
    }

    /// Bytes occupied by one frame (all channels of one sample instant).
    #[inline]
    pub const fn frame_size(&self) -> usize {
        self.sample_format.width_bytes() * self.channels as usize
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::stereo_f32_48k()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_accounts_for_channels_and_width() {
        let mono_i16 = FrameFormat::new(44_100, 1, SampleFormat::I16).unwrap();
        assert_eq!(mono_i16.frame_size(), 2);

        let stereo_f32 = FrameFormat::stereo_f32_48k();
        assert_eq!(stereo_f32.frame_size(), 8);

        let quad_i24 = FrameFormat::new(96_000, 4, SampleFormat::I24).unwrap();
        assert_eq!(quad_i24.frame_size(), 12);
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let err = FrameFormat::new(0, 2, SampleFormat::F32).unwrap_err();
        assert_eq!(err, NbError::InvalidFormat("sample rate must be nonzero"));
    }

    #[test]
    fn test_rejects_out_of_range_channel_count() {
        assert!(FrameFormat::new(48_000, 0, SampleFormat::F32).is_err());
        assert!(FrameFormat::new(48_000, MAX_CHANNELS + 1, SampleFormat::F32).is_err());
        assert!(FrameFormat::new(48_000, MAX_CHANNELS, SampleFormat::F32).is_ok());
    }

    #[test]
    fn test_default_is_stereo_f32_48k() {
        assert_eq!(FrameFormat::default(), FrameFormat::stereo_f32_48k());
    }
}
