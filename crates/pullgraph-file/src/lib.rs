//! Audio files read and written in a processing format.
//!
//! A file has two formats: the layout stored on disk (the file format) and
//! the layout buffers are exchanged in (the processing format). The
//! processing format shares the file's sample rate and channel count; its
//! sample representation and interleaving are chosen by the caller.

mod convert;
pub mod wav;

pub use wav::WavFile;

use pullgraph_core::{Format, Frames, PcmBuffer, PcmFormat, StreamDescription};
use std::path::PathBuf;

/// Arguments for [`AudioFile::open`]
#[derive(Debug, Clone)]
pub struct OpenArgs {
    pub path: PathBuf,
    pub pcm_format: PcmFormat,
    pub interleaved: bool,
}

impl OpenArgs {
    /// Open `path` for non-interleaved 32-bit float processing
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pcm_format: PcmFormat::Float32,
            interleaved: false,
        }
    }

    #[must_use]
    pub const fn pcm_format(mut self, pcm_format: PcmFormat) -> Self {
        self.pcm_format = pcm_format;
        self
    }

    #[must_use]
    pub const fn interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }
}

/// On-disk sample layout of a new file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSettings {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
}

impl FileSettings {
    #[must_use]
    pub const fn float32(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channel_count,
            bits_per_sample: 32,
            is_float: true,
        }
    }

    #[must_use]
    pub const fn int16(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channel_count,
            bits_per_sample: 16,
            is_float: false,
        }
    }

    /// Interleaved stream description of this layout
    #[must_use]
    pub fn stream_description(&self) -> StreamDescription {
        StreamDescription {
            sample_rate: f64::from(self.sample_rate),
            channels_per_frame: u32::from(self.channel_count),
            bits_per_channel: u32::from(self.bits_per_sample),
            bytes_per_frame: u32::from(self.channel_count) * u32::from(self.bits_per_sample / 8),
            is_float: self.is_float,
            is_signed_integer: !self.is_float,
            is_non_interleaved: false,
            fraction_bits: 0,
        }
    }
}

/// Arguments for [`AudioFile::create`]
#[derive(Debug, Clone)]
pub struct CreateArgs {
    pub path: PathBuf,
    pub settings: FileSettings,
    pub pcm_format: PcmFormat,
    pub interleaved: bool,
}

impl CreateArgs {
    /// Create `path` for non-interleaved 32-bit float processing
    pub fn new(path: impl Into<PathBuf>, settings: FileSettings) -> Self {
        Self {
            path: path.into(),
            settings,
            pcm_format: PcmFormat::Float32,
            interleaved: false,
        }
    }

    #[must_use]
    pub const fn pcm_format(mut self, pcm_format: PcmFormat) -> Self {
        self.pcm_format = pcm_format;
        self
    }

    #[must_use]
    pub const fn interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }
}

/// An audio file handle.
///
/// A handle is either closed, opened for reading or created for writing.
pub trait AudioFile {
    fn open(&mut self, args: OpenArgs) -> Result<(), OpenError>;

    fn create(&mut self, args: CreateArgs) -> Result<(), CreateError>;

    /// Close the file, flushing anything written; closing twice is a no-op
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Layout stored on disk
    fn file_format(&self) -> Option<StreamDescription>;

    /// Layout buffers must have to be read or written
    fn processing_format(&self) -> Option<Format>;

    /// Length of the file in processing frames
    fn processing_length(&self) -> u64;

    /// Frame the next read or write starts at
    fn file_frame_position(&self) -> u64;

    fn set_file_frame_position(&mut self, position: u64) -> Result<(), ReadError>;

    /// Read up to `frame_length` frames (the buffer capacity when zero).
    ///
    /// The buffer's frame length is set to the number of frames actually
    /// read, which is zero at the end of the file.
    fn read_into_buffer(
        &mut self,
        buffer: &mut PcmBuffer<'_>,
        frame_length: Frames,
    ) -> Result<(), ReadError>;

    /// Append the buffer's valid frames
    fn write_from_buffer(&mut self, buffer: &PcmBuffer<'_>) -> Result<(), WriteError>;
}

/// Errors opening a file
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("File is already open")]
    Opened,

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Failed to open file: {0}")]
    OpenFailed(String),
}

/// Errors creating a file
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("File is already open")]
    Created,

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Failed to create file: {0}")]
    CreateFailed(String),
}

/// Errors reading a file
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("File is closed")]
    Closed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Buffer format differs from the processing format")]
    InvalidFormat,

    #[error("Failed to read file: {0}")]
    ReadFailed(String),

    #[error("Failed to determine file position")]
    TellFailed,

    #[error("Frame length exceeds buffer capacity")]
    FrameLengthOutOfRange,
}

/// Errors writing a file
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("File is closed")]
    Closed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Buffer format differs from the processing format")]
    InvalidFormat,

    #[error("Failed to write file: {0}")]
    WriteFailed(String),

    #[error("Failed to determine file position")]
    TellFailed,
}
