//! Core types shared across the pullgraph crates.
//!
//! This crate provides stream formats, PCM buffers and render timestamps.
//! Everything here is free of locking and, past construction, of allocation,
//! so it can be used from the render thread.

pub mod buffer_list;
pub mod format;
pub mod pcm_buffer;
pub mod sample;
pub mod time;

pub use buffer_list::{AudioBuffer, BufferList};
pub use format::{Format, FormatError, PcmFormat, StreamDescription};
pub use pcm_buffer::{ChannelMap, PcmBuffer, PcmBufferError};
pub use sample::{SILENCE_BYTE_COUNT, Sample, SampleData};
pub use time::Time;

/// Bus index on a node
pub type Bus = u32;

/// Number of audio frames (samples per channel)
pub type Frames = u32;

/// Common sample rates
pub mod sample_rates {
    /// 44.1 kHz sample rate (CD quality)
    pub const SR_44100: f64 = 44100.0;
    /// 48 kHz sample rate (professional audio standard)
    pub const SR_48000: f64 = 48000.0;
    /// 96 kHz sample rate (high resolution audio)
    pub const SR_96000: f64 = 96000.0;
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Format construction error
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Buffer operation error
    #[error("Buffer error: {0}")]
    Buffer(#[from] PcmBufferError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other unclassified error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
