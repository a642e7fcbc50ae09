//! Stream formats.
//!
//! A [`Format`] is the sole compatibility gate of the engine: connections,
//! buffer copies and render pulls all compare formats structurally.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample representation of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PcmFormat {
    /// 32-bit IEEE float
    Float32,
    /// 64-bit IEEE float
    Float64,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer with 24 fractional bits
    Fixed824,
}

impl PcmFormat {
    /// Size of one sample in bytes
    #[must_use]
    pub const fn sample_byte_count(self) -> usize {
        match self {
            Self::Float32 | Self::Fixed824 => 4,
            Self::Float64 => 8,
            Self::Int16 => 2,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int16 => "int16",
            Self::Fixed824 => "fixed8.24",
        }
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Low-level stream descriptor as handed over by device and file layers.
///
/// Mirrors the fields a hardware abstraction layer reports for a linear
/// PCM stream. Only linear PCM layouts that map onto a [`PcmFormat`] can
/// be turned into a [`Format`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDescription {
    pub sample_rate: f64,
    pub channels_per_frame: u32,
    pub bits_per_channel: u32,
    pub bytes_per_frame: u32,
    pub is_float: bool,
    pub is_signed_integer: bool,
    pub is_non_interleaved: bool,
    /// Number of fractional bits for fixed point samples
    pub fraction_bits: u32,
}

/// Immutable description of a PCM stream layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Format {
    sample_rate: f64,
    channel_count: u32,
    pcm_format: PcmFormat,
    interleaved: bool,
}

impl Format {
    /// Create a new format
    ///
    /// # Errors
    ///
    /// Returns an error if the sample rate is not a positive finite number
    /// or the channel count is zero.
    pub fn new(
        sample_rate: f64,
        channel_count: u32,
        pcm_format: PcmFormat,
        interleaved: bool,
    ) -> Result<Self, FormatError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(FormatError::InvalidSampleRate(sample_rate));
        }
        if channel_count == 0 {
            return Err(FormatError::InvalidChannelCount);
        }

        Ok(Self {
            sample_rate,
            channel_count,
            pcm_format,
            interleaved,
        })
    }

    /// Non-interleaved 32-bit float, the engine's canonical processing format
    pub fn standard(sample_rate: f64, channel_count: u32) -> Result<Self, FormatError> {
        Self::new(sample_rate, channel_count, PcmFormat::Float32, false)
    }

    /// Build a format from a stream descriptor
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::UnsupportedDescription`] for layouts that are not
    /// one of the supported PCM representations.
    pub fn from_stream_description(desc: &StreamDescription) -> Result<Self, FormatError> {
        let pcm_format = match (
            desc.is_float,
            desc.is_signed_integer,
            desc.bits_per_channel,
            desc.fraction_bits,
        ) {
            (true, _, 32, _) => PcmFormat::Float32,
            (true, _, 64, _) => PcmFormat::Float64,
            (false, true, 16, 0) => PcmFormat::Int16,
            (false, true, 32, 24) => PcmFormat::Fixed824,
            _ => {
                return Err(FormatError::UnsupportedDescription(
                    "not a supported linear PCM layout",
                ));
            }
        };

        let format = Self::new(
            desc.sample_rate,
            desc.channels_per_frame,
            pcm_format,
            !desc.is_non_interleaved,
        )?;

        if desc.bytes_per_frame as usize != format.bytes_per_frame() {
            return Err(FormatError::UnsupportedDescription(
                "bytes per frame disagrees with channel layout",
            ));
        }

        Ok(format)
    }

    /// Describe this format as a stream descriptor
    #[must_use]
    pub fn stream_description(&self) -> StreamDescription {
        StreamDescription {
            sample_rate: self.sample_rate,
            channels_per_frame: self.channel_count,
            bits_per_channel: (self.pcm_format.sample_byte_count() * 8) as u32,
            bytes_per_frame: self.bytes_per_frame() as u32,
            is_float: matches!(self.pcm_format, PcmFormat::Float32 | PcmFormat::Float64),
            is_signed_integer: matches!(self.pcm_format, PcmFormat::Int16 | PcmFormat::Fixed824),
            is_non_interleaved: !self.interleaved,
            fraction_bits: if self.pcm_format == PcmFormat::Fixed824 {
                24
            } else {
                0
            },
        }
    }

    #[must_use]
    pub const fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channel_count(&self) -> u32 {
        self.channel_count
    }

    #[must_use]
    pub const fn pcm_format(&self) -> PcmFormat {
        self.pcm_format
    }

    #[must_use]
    pub const fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    /// Number of separate sample buffers (1 if interleaved, else one per channel)
    #[must_use]
    pub const fn buffer_count(&self) -> u32 {
        if self.interleaved {
            1
        } else {
            self.channel_count
        }
    }

    /// Distance in samples between two consecutive frames of one channel
    #[must_use]
    pub const fn stride(&self) -> u32 {
        if self.interleaved {
            self.channel_count
        } else {
            1
        }
    }

    #[must_use]
    pub const fn sample_byte_count(&self) -> usize {
        self.pcm_format.sample_byte_count()
    }

    /// Bytes of one frame within a single buffer
    #[must_use]
    pub const fn bytes_per_frame(&self) -> usize {
        self.sample_byte_count() * self.stride() as usize
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}, {}",
            self.sample_rate,
            self.channel_count,
            self.pcm_format,
            if self.interleaved {
                "interleaved"
            } else {
                "non-interleaved"
            }
        )
    }
}

/// Errors raised while building a [`Format`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Channel count must be greater than zero")]
    InvalidChannelCount,

    #[error("Unsupported stream description: {0}")]
    UnsupportedDescription(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_accessors() {
        let non_interleaved = Format::new(48000.0, 2, PcmFormat::Float32, false).unwrap();
        assert_eq!(non_interleaved.buffer_count(), 2);
        assert_eq!(non_interleaved.stride(), 1);
        assert_eq!(non_interleaved.bytes_per_frame(), 4);

        let interleaved = Format::new(44100.0, 2, PcmFormat::Int16, true).unwrap();
        assert_eq!(interleaved.buffer_count(), 1);
        assert_eq!(interleaved.stride(), 2);
        assert_eq!(interleaved.bytes_per_frame(), 4);

        let wide = Format::new(96000.0, 6, PcmFormat::Float64, true).unwrap();
        assert_eq!(wide.bytes_per_frame(), 48);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            Format::new(0.0, 2, PcmFormat::Float32, false),
            Err(FormatError::InvalidSampleRate(_))
        ));
        assert!(matches!(
            Format::new(f64::NAN, 2, PcmFormat::Float32, false),
            Err(FormatError::InvalidSampleRate(_))
        ));
        assert_eq!(
            Format::new(48000.0, 0, PcmFormat::Float32, false),
            Err(FormatError::InvalidChannelCount)
        );
    }

    #[test]
    fn test_structural_equality() {
        let a = Format::standard(48000.0, 2).unwrap();
        let b = Format::new(48000.0, 2, PcmFormat::Float32, false).unwrap();
        let c = Format::new(48000.0, 2, PcmFormat::Float32, true).unwrap();
        let d = Format::standard(44100.0, 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_stream_description_conversion() {
        for pcm_format in [
            PcmFormat::Float32,
            PcmFormat::Float64,
            PcmFormat::Int16,
            PcmFormat::Fixed824,
        ] {
            let format = Format::new(48000.0, 2, pcm_format, true).unwrap();
            let desc = format.stream_description();
            assert_eq!(Format::from_stream_description(&desc).unwrap(), format);
        }

        let mut desc = Format::standard(48000.0, 2).unwrap().stream_description();
        desc.bits_per_channel = 24;
        assert!(matches!(
            Format::from_stream_description(&desc),
            Err(FormatError::UnsupportedDescription(_))
        ));
    }

    #[test]
    fn test_display() {
        let format = Format::standard(48000.0, 2).unwrap();
        assert_eq!(format.to_string(), "48000 Hz, 2 ch, float32, non-interleaved");
    }
}
